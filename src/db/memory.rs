//! In-memory repository used by engine tests.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use super::models::*;
use super::repo::*;
use super::store::DbError;

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    stations: Vec<Station>,
    events: Vec<UptimeEvent>,
    settings: Vec<NotificationSettings>,
    notifications: Vec<Notification>,
}

/// A `Repository` backed by vectors, with switchable failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing_stations: Mutex<HashSet<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub fn add_station(&self, station: Station) {
        self.inner.lock().unwrap().stations.push(station);
    }

    pub fn remove_station(&self, id: i64) {
        self.inner.lock().unwrap().stations.retain(|s| s.id != id);
    }

    pub fn set_rules(&self, station_id: i64, rules: Vec<NotificationRule>) {
        self.replace_rules(station_id, &rules).unwrap();
    }

    /// Make every event lookup for this station fail.
    pub fn fail_station(&self, station_id: i64) {
        self.failing_stations.lock().unwrap().insert(station_id);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.notifications().iter().filter(|n| n.kind == kind).count()
    }

    fn check(&self, station_id: i64) -> Result<(), DbError> {
        if self.failing_stations.lock().unwrap().contains(&station_id) {
            return Err(DbError::Unavailable(format!("station {}", station_id)));
        }
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn append_event(&self, station_id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        self.check(station_id)?;
        let mut inner = self.inner.lock().unwrap();
        let station = inner
            .stations
            .iter_mut()
            .find(|s| s.id == station_id)
            .ok_or(DbError::NotFound)?;
        station.last_seen = Some(at);
        inner.events.push(UptimeEvent {
            station_id,
            timestamp: at,
        });
        Ok(())
    }

    fn events_between(
        &self,
        station_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeEvent>, DbError> {
        self.check(station_id)?;
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.station_id == station_id && e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn latest_event(&self, station_id: i64) -> Result<Option<UptimeEvent>, DbError> {
        self.check(station_id)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.station_id == station_id)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }
}

impl NotificationStore for MemoryStore {
    fn create_notification(&self, new: &NewNotification) -> Result<Notification, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let notification = Notification {
            id: inner.notifications.len() as i64 + 1,
            user_id: new.user_id,
            related_id: new.related_id,
            kind: new.kind,
            message: new.message.clone(),
            threshold: new.threshold,
            created_at: new.created_at,
            is_read: false,
        };
        inner.notifications.push(notification.clone());
        Ok(notification)
    }

    fn latest_notification(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, DbError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .notifications
            .iter()
            .filter(|n| {
                n.related_id == filter.related_id
                    && n.kind == filter.kind
                    && filter.discriminator.matches(n.threshold)
                    && n.created_at >= filter.since
                    && filter.until.map_or(true, |until| n.created_at <= until)
            })
            .max_by_key(|n| (n.created_at, n.id))
            .cloned())
    }

    fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>, DbError> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<_> = inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        list.sort_by_key(|n| std::cmp::Reverse((n.created_at, n.id)));
        Ok(list)
    }

    fn mark_read(&self, id: i64) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        let notification = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(DbError::NotFound)?;
        notification.is_read = true;
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn monitored_settings(&self) -> Result<Vec<NotificationSettings>, DbError> {
        Ok(self.inner.lock().unwrap().settings.clone())
    }

    fn settings_for_station(
        &self,
        station_id: i64,
    ) -> Result<Option<NotificationSettings>, DbError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .settings
            .iter()
            .find(|s| s.station_id == station_id)
            .cloned())
    }

    fn replace_rules(
        &self,
        station_id: i64,
        rules: &[NotificationRule],
    ) -> Result<NotificationSettings, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let next_id = inner.settings.len() as i64 + 1;
        let settings_id = match inner.settings.iter().find(|s| s.station_id == station_id) {
            Some(existing) => existing.id,
            None => {
                inner.settings.push(NotificationSettings {
                    id: next_id,
                    station_id,
                    rules: Vec::new(),
                });
                next_id
            }
        };

        let stored: Vec<_> = rules
            .iter()
            .enumerate()
            .map(|(i, r)| NotificationRule {
                id: i as i64 + 1,
                settings_id,
                ..r.clone()
            })
            .collect();

        let settings = inner
            .settings
            .iter_mut()
            .find(|s| s.id == settings_id)
            .ok_or(DbError::NotFound)?;
        settings.rules = stored;
        Ok(settings.clone())
    }
}

impl StationStore for MemoryStore {
    fn get_station(&self, id: i64) -> Result<Option<Station>, DbError> {
        self.check(id)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.stations.iter().find(|s| s.id == id).cloned())
    }

    fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }
}
