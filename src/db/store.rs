//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::repo::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Apply embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".to_string()))
    }

    fn load_rules(conn: &Connection, settings_id: i64) -> SqlResult<Vec<NotificationRule>> {
        let mut stmt = conn.prepare(
            "SELECT id, settings_id, rule_type, threshold, enabled FROM notification_rules WHERE settings_id = ?1 ORDER BY id",
        )?;
        let rules = stmt
            .query_map(params![settings_id], |row| {
                Ok(NotificationRule {
                    id: row.get(0)?,
                    settings_id: row.get(1)?,
                    kind: kind_column(row, 2)?,
                    threshold: row.get(3)?,
                    enabled: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rules)
    }
}

/// Station and user management live outside this service; tests seed through these.
#[cfg(test)]
impl Store {
    /// Add a new user and return its ID.
    pub fn add_user(&self, user: &mut User) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, email, email_verified, email_notifications) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.username,
                user.email,
                user.email_verified,
                user.email_notifications,
            ],
        )?;
        user.id = conn.last_insert_rowid();
        Ok(user.id)
    }

    /// Add a new station and return its ID.
    pub fn add_station(&self, station: &mut Station) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stations (user_id, name, api_key, online_threshold_minutes, last_seen, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                station.user_id,
                station.name,
                station.api_key,
                station.online_threshold_minutes,
                station.last_seen.map(format_db_time),
                format_db_time(station.created_at),
            ],
        )?;
        station.id = conn.last_insert_rowid();
        Ok(station.id)
    }
}

impl EventStore for Store {
    fn append_event(&self, station_id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let ts = format_db_time(at);

        let updated = tx.execute(
            "UPDATE stations SET last_seen = ?1 WHERE id = ?2",
            params![ts, station_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        tx.execute(
            "INSERT INTO uptime_events (station_id, timestamp) VALUES (?1, ?2)",
            params![station_id, ts],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn events_between(
        &self,
        station_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeEvent>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT station_id, timestamp FROM uptime_events
             WHERE station_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 ORDER BY timestamp ASC",
        )?;

        let events = stmt
            .query_map(
                params![station_id, format_db_time(start), format_db_time(end)],
                |row| {
                    Ok(UptimeEvent {
                        station_id: row.get(0)?,
                        timestamp: time_column(row, 1)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }

    fn latest_event(&self, station_id: i64) -> Result<Option<UptimeEvent>, DbError> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                "SELECT station_id, timestamp FROM uptime_events WHERE station_id = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![station_id],
                |row| {
                    Ok(UptimeEvent {
                        station_id: row.get(0)?,
                        timestamp: time_column(row, 1)?,
                    })
                },
            )
            .optional()?;
        Ok(event)
    }
}

impl NotificationStore for Store {
    fn create_notification(&self, new: &NewNotification) -> Result<Notification, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notifications (user_id, related_id, kind, message, threshold, created_at, is_read) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                new.user_id,
                new.related_id,
                new.kind.as_str(),
                new.message,
                new.threshold,
                format_db_time(new.created_at),
            ],
        )?;

        Ok(Notification {
            id: conn.last_insert_rowid(),
            user_id: new.user_id,
            related_id: new.related_id,
            kind: new.kind,
            message: new.message.clone(),
            threshold: new.threshold,
            created_at: new.created_at,
            is_read: false,
        })
    }

    fn latest_notification(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, DbError> {
        let (threshold_clause, threshold) = match filter.discriminator {
            Discriminator::Any => ("", None),
            Discriminator::Unset => (" AND threshold IS NULL", None),
            Discriminator::Threshold(t) => (" AND threshold = ?5", Some(t)),
        };
        let until = filter
            .until
            .map(format_db_time)
            .unwrap_or_else(|| "9999-12-31 23:59:59".to_string());

        let sql = format!(
            "SELECT id, user_id, related_id, kind, message, threshold, created_at, is_read FROM notifications
             WHERE related_id = ?1 AND kind = ?2 AND created_at >= ?3 AND created_at <= ?4{}
             ORDER BY created_at DESC, id DESC LIMIT 1",
            threshold_clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let since = format_db_time(filter.since);
        let kind = filter.kind.as_str();

        let found = match threshold {
            Some(t) => stmt
                .query_row(
                    params![filter.related_id, kind, since, until, t],
                    notification_from_row,
                )
                .optional()?,
            None => stmt
                .query_row(
                    params![filter.related_id, kind, since, until],
                    notification_from_row,
                )
                .optional()?,
        };

        Ok(found)
    }

    fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, related_id, kind, message, threshold, created_at, is_read FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, id DESC",
        )?;
        let notifications = stmt
            .query_map(params![user_id, unread_only], notification_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(notifications)
    }

    fn mark_read(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

impl SettingsStore for Store {
    fn monitored_settings(&self) -> Result<Vec<NotificationSettings>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, station_id FROM notification_settings ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut settings = Vec::with_capacity(rows.len());
        for (id, station_id) in rows {
            settings.push(NotificationSettings {
                id,
                station_id,
                rules: Self::load_rules(&conn, id)?,
            });
        }
        Ok(settings)
    }

    fn settings_for_station(
        &self,
        station_id: i64,
    ) -> Result<Option<NotificationSettings>, DbError> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM notification_settings WHERE station_id = ?1",
                params![station_id],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(NotificationSettings {
                id,
                station_id,
                rules: Self::load_rules(&conn, id)?,
            })),
            None => Ok(None),
        }
    }

    fn replace_rules(
        &self,
        station_id: i64,
        rules: &[NotificationRule],
    ) -> Result<NotificationSettings, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO notification_settings (station_id) VALUES (?1) ON CONFLICT(station_id) DO NOTHING",
            params![station_id],
        )?;
        let settings_id: i64 = tx.query_row(
            "SELECT id FROM notification_settings WHERE station_id = ?1",
            params![station_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "DELETE FROM notification_rules WHERE settings_id = ?1",
            params![settings_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO notification_rules (settings_id, rule_type, threshold, enabled) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for rule in rules {
                stmt.execute(params![
                    settings_id,
                    rule.kind.as_str(),
                    rule.threshold,
                    rule.enabled,
                ])?;
            }
        }

        let stored = Self::load_rules(&tx, settings_id)?;
        tx.commit()?;

        Ok(NotificationSettings {
            id: settings_id,
            station_id,
            rules: stored,
        })
    }
}

impl StationStore for Store {
    fn get_station(&self, id: i64) -> Result<Option<Station>, DbError> {
        let conn = self.conn()?;
        let station = conn
            .query_row(
                "SELECT id, user_id, name, api_key, online_threshold_minutes, last_seen, created_at FROM stations WHERE id = ?1",
                params![id],
                station_from_row,
            )
            .optional()?;
        Ok(station)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, email, email_verified, email_notifications FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        email_verified: row.get(3)?,
                        email_notifications: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

fn station_from_row(row: &Row<'_>) -> SqlResult<Station> {
    let last_seen: Option<String> = row.get(5)?;
    Ok(Station {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        api_key: row.get(3)?,
        online_threshold_minutes: row.get(4)?,
        last_seen: last_seen.as_deref().and_then(parse_db_time),
        created_at: time_column(row, 6)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> SqlResult<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        related_id: row.get(2)?,
        kind: kind_column(row, 3)?,
        message: row.get(4)?,
        threshold: row.get(5)?,
        created_at: time_column(row, 6)?,
        is_read: row.get(7)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", s).into(),
        )
    })
}

fn kind_column<K>(row: &Row<'_>, idx: usize) -> SqlResult<K>
where
    K: FromStr<Err = UnknownKind>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: UnknownKind| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Format a datetime for storage. Fixed width, so text order is time order.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
