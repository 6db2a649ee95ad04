//! Repository interfaces consumed by the monitoring engine.
//!
//! `Store` implements all of them against SQLite; tests substitute the
//! in-memory fake from `db::memory`.

use chrono::{DateTime, Utc};

use super::models::*;
use super::store::DbError;

/// Append-only log of health pings.
pub trait EventStore: Send + Sync {
    /// Record a ping at `at`: appends an event and updates the station's `last_seen`.
    fn append_event(&self, station_id: i64, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Events with `start <= timestamp <= end`, oldest first.
    fn events_between(
        &self,
        station_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeEvent>, DbError>;

    /// The most recent event for a station, if it ever pinged.
    fn latest_event(&self, station_id: i64) -> Result<Option<UptimeEvent>, DbError>;
}

/// How a notification's threshold must match a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    /// Any threshold, including none.
    Any,
    /// Only notifications stored without a threshold.
    Unset,
    /// Only notifications stored with exactly this threshold.
    Threshold(i64),
}

impl Discriminator {
    pub fn from_threshold(threshold: Option<i64>) -> Self {
        match threshold {
            Some(t) => Discriminator::Threshold(t),
            None => Discriminator::Unset,
        }
    }

    #[cfg(test)]
    pub fn matches(&self, threshold: Option<i64>) -> bool {
        match self {
            Discriminator::Any => true,
            Discriminator::Unset => threshold.is_none(),
            Discriminator::Threshold(t) => threshold == Some(*t),
        }
    }
}

/// Lookup over stored notifications for one station.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub related_id: i64,
    pub kind: NotificationKind,
    pub discriminator: Discriminator,
    /// Inclusive lower bound on `created_at`.
    pub since: DateTime<Utc>,
    /// Inclusive upper bound on `created_at`, if any.
    pub until: Option<DateTime<Utc>>,
}

/// Notification records.
pub trait NotificationStore: Send + Sync {
    fn create_notification(&self, new: &NewNotification) -> Result<Notification, DbError>;

    /// Newest notification matching the filter.
    fn latest_notification(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, DbError>;

    /// A user's notifications, newest first.
    fn list_notifications(&self, user_id: i64, unread_only: bool)
        -> Result<Vec<Notification>, DbError>;

    /// Mark one notification read. `DbError::NotFound` if it does not exist.
    fn mark_read(&self, id: i64) -> Result<(), DbError>;
}

/// Notification settings and their rules.
pub trait SettingsStore: Send + Sync {
    /// Every settings row with its rules; these are the monitored stations.
    fn monitored_settings(&self) -> Result<Vec<NotificationSettings>, DbError>;

    fn settings_for_station(&self, station_id: i64)
        -> Result<Option<NotificationSettings>, DbError>;

    /// Replace a station's rule set, creating the settings row if needed.
    fn replace_rules(
        &self,
        station_id: i64,
        rules: &[NotificationRule],
    ) -> Result<NotificationSettings, DbError>;
}

/// Read access to stations and their owners.
pub trait StationStore: Send + Sync {
    fn get_station(&self, id: i64) -> Result<Option<Station>, DbError>;

    fn get_user(&self, id: i64) -> Result<Option<User>, DbError>;
}

/// Everything the monitoring engine needs from persistence.
pub trait Repository: EventStore + NotificationStore + SettingsStore + StationStore {}

impl<T> Repository for T where T: EventStore + NotificationStore + SettingsStore + StationStore {}
