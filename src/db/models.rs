//! Database model types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a stored kind string is not one we know about.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown kind: {0}")]
pub struct UnknownKind(pub String);

/// A station whose online threshold cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("station {station_id} has invalid online threshold {minutes}")]
pub struct InvalidThreshold {
    pub station_id: i64,
    pub minutes: i64,
}

/// The owner of one or more stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub email_notifications: bool,
}

/// A ground station that reports health pings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    /// Largest gap between pings that still counts as alive.
    pub online_threshold_minutes: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Station {
    /// The online threshold as a duration. Must be positive and representable.
    pub fn online_threshold(&self) -> Result<Duration, InvalidThreshold> {
        Some(self.online_threshold_minutes)
            .filter(|m| *m > 0)
            .and_then(Duration::try_minutes)
            .ok_or(InvalidThreshold {
                station_id: self.id,
                minutes: self.online_threshold_minutes,
            })
    }
}

/// One received health ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UptimeEvent {
    pub station_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// The condition a notification rule watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Station has been offline for at least `threshold` minutes.
    DownMinutes,
    /// Station came back after a recent down alert.
    BackOnline,
    /// 24h uptime dropped below `threshold` percent.
    LowUptime,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::DownMinutes => "down_minutes",
            RuleKind::BackOnline => "back_online",
            RuleKind::LowUptime => "low_uptime",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "down_minutes" => Ok(RuleKind::DownMinutes),
            "back_online" => Ok(RuleKind::BackOnline),
            "low_uptime" => Ok(RuleKind::LowUptime),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A single alert rule attached to a station's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub settings_id: i64,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// Minutes for `down_minutes`, percent for `low_uptime`, unused for `back_online`.
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Per-station notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub id: i64,
    pub station_id: i64,
    pub rules: Vec<NotificationRule>,
}

/// The kind of an emitted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StationDown,
    StationOnline,
    StationLowUptime,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::StationDown => "station_down",
            NotificationKind::StationOnline => "station_online",
            NotificationKind::StationLowUptime => "station_low_uptime",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "station_down" => Ok(NotificationKind::StationDown),
            "station_online" => Ok(NotificationKind::StationOnline),
            "station_low_uptime" => Ok(NotificationKind::StationLowUptime),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A persisted alert for a user about one of their stations.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    /// The station this notification is about.
    pub related_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    /// Rule threshold that produced it; distinguishes same-kind alerts.
    pub threshold: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

/// A notification that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub related_id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub threshold: Option<i64>,
    pub created_at: DateTime<Utc>,
}
