//! Suppression of repeat alerts by scanning stored notifications.
//!
//! The notification table is the only source of truth: nothing is cached
//! between ticks, so the check is as fresh as the store.

use crate::db::{DbError, Discriminator, NotificationFilter, NotificationKind, NotificationStore};

use chrono::{DateTime, Utc};

/// True if a matching notification was created at or after `window_start`.
pub fn has_recent_notification<R>(
    store: &R,
    station_id: i64,
    kind: NotificationKind,
    window_start: DateTime<Utc>,
    discriminator: Discriminator,
) -> Result<bool, DbError>
where
    R: NotificationStore + ?Sized,
{
    let filter = NotificationFilter {
        related_id: station_id,
        kind,
        discriminator,
        since: window_start,
        until: None,
    };
    Ok(store.latest_notification(&filter)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::NewNotification;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 5, 10, 0, 0).unwrap()
    }

    fn record(
        store: &MemoryStore,
        station_id: i64,
        kind: NotificationKind,
        threshold: Option<i64>,
        at: DateTime<Utc>,
    ) {
        store
            .create_notification(&NewNotification {
                user_id: 1,
                related_id: station_id,
                kind,
                message: String::new(),
                threshold,
                created_at: at,
            })
            .unwrap();
    }

    fn seen(
        store: &MemoryStore,
        station_id: i64,
        kind: NotificationKind,
        discriminator: Discriminator,
    ) -> bool {
        let since = t0() - Duration::hours(1);
        has_recent_notification(store, station_id, kind, since, discriminator).unwrap()
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let store = MemoryStore::new();
        record(&store, 1, NotificationKind::StationDown, Some(5), t0());

        let check = |start| {
            let d = Discriminator::Threshold(5);
            has_recent_notification(&store, 1, NotificationKind::StationDown, start, d).unwrap()
        };
        assert!(check(t0()));
        assert!(check(t0() - Duration::hours(1)));
        assert!(!check(t0() + Duration::seconds(1)));
    }

    #[test]
    fn test_thresholds_are_independent() {
        let store = MemoryStore::new();
        record(&store, 1, NotificationKind::StationDown, Some(5), t0());

        let down = NotificationKind::StationDown;
        assert!(!seen(&store, 1, down, Discriminator::Threshold(30)));
        assert!(seen(&store, 1, down, Discriminator::Any));
    }

    #[test]
    fn test_scoped_to_station_and_kind() {
        let store = MemoryStore::new();
        record(&store, 1, NotificationKind::StationOnline, None, t0());

        let online = NotificationKind::StationOnline;
        assert!(seen(&store, 1, online, Discriminator::Unset));
        assert!(!seen(&store, 2, online, Discriminator::Unset));
        assert!(!seen(&store, 1, NotificationKind::StationDown, Discriminator::Any));
    }
}
