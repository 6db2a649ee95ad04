//! Scheduler module for periodic station health evaluation.
//!
//! Each tick loads every station that has notification settings, derives its
//! online state, evaluates its enabled rules, and dispatches whatever fires
//! and is not a duplicate. Ticks never overlap.

mod clock;
mod dedup;
mod dispatch;
mod rules;
mod uptime;

pub use clock::*;
pub use dispatch::*;
pub use rules::*;
pub use uptime::*;

use crate::config::MonitorConfig;
use crate::db::{DbError, InvalidThreshold, NotificationRule, NotificationSettings, Repository};
use crate::mail::EmailSender;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Monitor error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("station {0} not found")]
    StationNotFound(i64),
}

impl From<InvalidThreshold> for MonitorError {
    fn from(e: InvalidThreshold) -> Self {
        MonitorError::Config(e.to_string())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub stations: usize,
    pub notifications_created: usize,
    pub station_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(TickSummary),
    /// Another tick was still in flight.
    Skipped,
}

/// Drives rule evaluation for all monitored stations on a fixed cadence.
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    running: AtomicBool,
    last_tick: Mutex<Option<TickSummary>>,
    stop: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            dispatcher: Dispatcher::new(repo.clone(), mailer),
            repo,
            clock,
            config,
            running: AtomicBool::new(false),
            last_tick: Mutex::new(None),
            stop,
        }
    }

    /// Start the periodic loop. The first tick runs immediately.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();

        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Starting monitor scheduler"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Monitor scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        // The store is synchronous; keep it off the async workers.
                        // Awaiting here is what keeps ticks from overlapping.
                        let worker = Arc::clone(&this);
                        match tokio::task::spawn_blocking(move || worker.run_tick()).await {
                            Ok(TickOutcome::Completed(summary)) => tracing::debug!(
                                stations = summary.stations,
                                created = summary.notifications_created,
                                failures = summary.station_failures,
                                elapsed_ms = summary.elapsed_ms,
                                "Monitor tick complete"
                            ),
                            Ok(TickOutcome::Skipped) => {}
                            Err(e) => tracing::error!("Monitor tick aborted: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Ask the loop to exit after any tick in progress.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Summary of the most recent completed tick.
    pub fn last_tick(&self) -> Option<TickSummary> {
        self.last_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one tick at the clock's current time.
    pub fn run_tick(&self) -> TickOutcome {
        self.tick_at(self.clock.now())
    }

    /// Run one tick as of `now`, unless one is already running.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.running) else {
            tracing::warn!("Previous monitor tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let started = Instant::now();
        let mut summary = TickSummary {
            started_at: now,
            elapsed_ms: 0,
            stations: 0,
            notifications_created: 0,
            station_failures: 0,
            error: None,
        };

        match self.repo.monitored_settings() {
            Ok(all) => {
                summary.stations = all.len();
                for settings in &all {
                    match self.process_station(settings, now) {
                        Ok(created) => summary.notifications_created += created,
                        Err(MonitorError::Config(msg)) => {
                            tracing::warn!(
                                station_id = settings.station_id,
                                "Skipping station: {}",
                                msg
                            );
                            summary.station_failures += 1;
                        }
                        Err(e) => {
                            tracing::error!(
                                station_id = settings.station_id,
                                "Station evaluation failed: {}",
                                e
                            );
                            summary.station_failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to load notification settings: {}", e);
                summary.error = Some(e.to_string());
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        if summary.notifications_created > 0 {
            tracing::info!(
                created = summary.notifications_created,
                "Monitor tick created notifications"
            );
        }

        *self
            .last_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary.clone());

        TickOutcome::Completed(summary)
    }

    /// Evaluate every enabled rule of one station. Returns notifications created.
    fn process_station(
        &self,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> Result<usize, MonitorError> {
        let enabled: Vec<&NotificationRule> = settings.rules.iter().filter(|r| r.enabled).collect();
        if enabled.is_empty() {
            return Ok(0);
        }

        let station = self
            .repo
            .get_station(settings.station_id)?
            .ok_or(MonitorError::StationNotFound(settings.station_id))?;
        let state = StationState::resolve(&*self.repo, station)?;

        let mut created = 0;
        for rule in enabled {
            match self.apply_rule(&state, rule, now) {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(MonitorError::Config(msg)) => tracing::warn!(
                    station_id = state.station.id,
                    rule = %rule.kind,
                    "Rule not evaluated: {}",
                    msg
                ),
                Err(e) => tracing::error!(
                    station_id = state.station.id,
                    rule = %rule.kind,
                    "Rule evaluation failed: {}",
                    e
                ),
            }
        }

        Ok(created)
    }

    fn apply_rule(
        &self,
        state: &StationState,
        rule: &NotificationRule,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        let Some(alert) = evaluate_rule(&*self.repo, &self.config, state, rule, now)? else {
            return Ok(false);
        };

        if is_duplicate(&*self.repo, state.station.id, &alert)? {
            tracing::debug!(
                station_id = state.station.id,
                kind = %alert.kind,
                threshold = ?alert.threshold,
                "Suppressed duplicate alert"
            );
            return Ok(false);
        }

        self.dispatcher.dispatch(&state.station, &alert, now)?;
        Ok(true)
    }
}

/// Holds the single-flight flag for the duration of a tick.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
