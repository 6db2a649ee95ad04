//! Rule evaluation against a station's derived online state.
//!
//! Online/offline is never stored. Each tick it is derived from how long it
//! has been since the station was last heard from.

use super::dedup::has_recent_notification;
use super::uptime::compute_uptime_percent;
use super::MonitorError;
use crate::config::MonitorConfig;
use crate::db::{
    Discriminator, EventStore, NotificationFilter, NotificationKind, NotificationRule,
    NotificationStore, RuleKind, Station,
};

use chrono::{DateTime, Duration, Utc};

/// Longest `down_minutes` threshold a rule may carry: one week.
pub const MAX_DOWN_MINUTES: i64 = 7 * 24 * 60;

/// A station together with what the monitor derived about it this tick.
#[derive(Debug, Clone)]
pub struct StationState {
    pub station: Station,
    pub threshold: Duration,
    /// Last ping, from the cached column or the event log.
    pub last_seen: Option<DateTime<Utc>>,
}

impl StationState {
    /// Validate the station's threshold and resolve when it was last heard from.
    pub fn resolve<R>(store: &R, station: Station) -> Result<Self, MonitorError>
    where
        R: EventStore + ?Sized,
    {
        let threshold = station.online_threshold()?;

        let last_seen = match station.last_seen {
            Some(ts) => Some(ts),
            None => store.latest_event(station.id)?.map(|e| e.timestamp),
        };

        Ok(Self {
            station,
            threshold,
            last_seen,
        })
    }

    /// Time since the last ping, or since creation for a station that never pinged.
    pub fn silent_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_seen.unwrap_or(self.station.created_at)
    }

    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        self.silent_for(now) <= self.threshold
    }
}

/// A notification a rule wants to send, before the dedup check.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: NotificationKind,
    /// Dedup discriminator, stored on the notification.
    pub threshold: Option<i64>,
    pub message: String,
    /// Suppress if a matching notification exists at or after this instant.
    pub dedup_since: DateTime<Utc>,
}

impl Alert {
    pub fn discriminator(&self) -> Discriminator {
        Discriminator::from_threshold(self.threshold)
    }
}

/// Decide whether `rule` fires for `state` at `now`.
///
/// Returns `Ok(None)` when the condition does not hold. Disabled rules never fire.
pub fn evaluate_rule<R>(
    store: &R,
    config: &MonitorConfig,
    state: &StationState,
    rule: &NotificationRule,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, MonitorError>
where
    R: EventStore + NotificationStore + ?Sized,
{
    if !rule.enabled {
        return Ok(None);
    }

    match rule.kind {
        RuleKind::DownMinutes => evaluate_down(config, state, rule, now),
        RuleKind::BackOnline => evaluate_back_online(store, config, state, now),
        RuleKind::LowUptime => evaluate_low_uptime(store, config, state, rule, now),
    }
}

fn evaluate_down(
    config: &MonitorConfig,
    state: &StationState,
    rule: &NotificationRule,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, MonitorError> {
    let (minutes, after) = match rule.threshold {
        Some(m) if (1..=MAX_DOWN_MINUTES).contains(&m) => (m, Duration::minutes(m)),
        other => {
            return Err(MonitorError::Config(format!(
                "down_minutes rule needs a threshold between 1 and {}, got {:?}",
                MAX_DOWN_MINUTES, other
            )))
        }
    };

    let silent = state.silent_for(now);
    if state.is_online(now) || silent < after {
        return Ok(None);
    }

    Ok(Some(Alert {
        kind: NotificationKind::StationDown,
        threshold: Some(minutes),
        message: format!(
            "Station {} has been offline for {} minutes",
            state.station.name,
            silent.num_minutes()
        ),
        dedup_since: now - config.down_dedup_window,
    }))
}

fn evaluate_back_online<R>(
    store: &R,
    config: &MonitorConfig,
    state: &StationState,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, MonitorError>
where
    R: NotificationStore + ?Sized,
{
    let Some(last_seen) = state.last_seen else {
        return Ok(None);
    };
    if !state.is_online(now) {
        return Ok(None);
    }

    // Only a station flagged down shortly before it was last heard from came "back".
    let recent_down = store.latest_notification(&NotificationFilter {
        related_id: state.station.id,
        kind: NotificationKind::StationDown,
        discriminator: Discriminator::Any,
        since: last_seen - config.online_dedup_window,
        until: Some(last_seen),
    })?;
    let Some(down) = recent_down else {
        return Ok(None);
    };

    // One recovery alert per down alert, and never more than one per window.
    let dedup_since = std::cmp::max(now - config.online_dedup_window, down.created_at);

    Ok(Some(Alert {
        kind: NotificationKind::StationOnline,
        threshold: None,
        message: format!("Station {} is back online", state.station.name),
        dedup_since,
    }))
}

fn evaluate_low_uptime<R>(
    store: &R,
    config: &MonitorConfig,
    state: &StationState,
    rule: &NotificationRule,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, MonitorError>
where
    R: EventStore + ?Sized,
{
    let percent = match rule.threshold {
        Some(p) if (1..=100).contains(&p) => p,
        other => {
            return Err(MonitorError::Config(format!(
                "low_uptime rule needs a threshold between 1 and 100, got {:?}",
                other
            )))
        }
    };

    let window_start = now - config.uptime_window;
    let events: Vec<_> = store
        .events_between(state.station.id, window_start, now)?
        .into_iter()
        .map(|e| e.timestamp)
        .collect();
    let uptime = compute_uptime_percent(&events, state.threshold, window_start, now);

    tracing::debug!(
        station_id = state.station.id,
        uptime,
        threshold = percent,
        "Computed uptime"
    );

    if uptime >= percent as f64 {
        return Ok(None);
    }

    Ok(Some(Alert {
        kind: NotificationKind::StationLowUptime,
        threshold: Some(percent),
        message: format!(
            "Station {} uptime is {:.1}% over the last {} hours (below {}%)",
            state.station.name,
            uptime,
            config.uptime_window.num_hours(),
            percent
        ),
        dedup_since: now - config.low_uptime_dedup_window,
    }))
}

/// Whether an alert was already sent inside its dedup window.
pub fn is_duplicate<R>(store: &R, station_id: i64, alert: &Alert) -> Result<bool, MonitorError>
where
    R: NotificationStore + ?Sized,
{
    Ok(has_recent_notification(
        store,
        station_id,
        alert.kind,
        alert.dedup_since,
        alert.discriminator(),
    )?)
}
