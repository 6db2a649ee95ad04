//! Notification persistence and email fan-out.

use super::rules::Alert;
use super::MonitorError;
use crate::db::{NewNotification, Notification, NotificationKind, Repository, Station, User};
use crate::mail::{is_valid_email, EmailMessage, EmailSender};

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Stores notifications and emails opted-in owners.
pub struct Dispatcher {
    repo: Arc<dyn Repository>,
    mailer: Arc<dyn EmailSender>,
}

impl Dispatcher {
    pub fn new(repo: Arc<dyn Repository>, mailer: Arc<dyn EmailSender>) -> Self {
        Self { repo, mailer }
    }

    /// Persist the notification, then hand an email to the mailer without waiting.
    ///
    /// The stored row is what later dedup checks see, so it is written first.
    /// Anything that goes wrong with email is logged and does not affect the result.
    pub fn dispatch(
        &self,
        station: &Station,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<Notification, MonitorError> {
        let notification = self.repo.create_notification(&NewNotification {
            user_id: station.user_id,
            related_id: station.id,
            kind: alert.kind,
            message: alert.message.clone(),
            threshold: alert.threshold,
            created_at: now,
        })?;

        tracing::info!(
            station_id = station.id,
            notification_id = notification.id,
            kind = %notification.kind,
            "Notification created"
        );

        self.notify_owner(station, &notification);
        Ok(notification)
    }

    fn notify_owner(&self, station: &Station, notification: &Notification) {
        let owner = match self.repo.get_user(station.user_id) {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(
                    station_id = station.id,
                    user_id = station.user_id,
                    "Station owner not found, skipping email"
                );
                return;
            }
            Err(e) => {
                tracing::error!(station_id = station.id, "Failed to load station owner: {}", e);
                return;
            }
        };

        if !wants_email(&owner) {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::error!(station_id = station.id, "No runtime available, email not sent");
                return;
            }
        };

        let message = build_email(&owner, station, notification);
        let mailer = self.mailer.clone();
        let station_id = station.id;

        handle.spawn(async move {
            if let Err(e) = mailer.send(&message).await {
                tracing::error!(station_id, to = %message.to, "Failed to send alert email: {}", e);
            }
        });
    }
}

fn wants_email(user: &User) -> bool {
    user.email_notifications && user.email_verified && is_valid_email(&user.email)
}

fn build_email(owner: &User, station: &Station, notification: &Notification) -> EmailMessage {
    let subject = match notification.kind {
        NotificationKind::StationDown => format!("Station {} is down", station.name),
        NotificationKind::StationOnline => {
            format!("Station {} is back online", station.name)
        }
        NotificationKind::StationLowUptime => {
            format!("Station {} has low uptime", station.name)
        }
    };

    EmailMessage {
        to: owner.email.clone(),
        subject,
        template: "station_alert".to_string(),
        template_data: serde_json::json!({
            "username": owner.username,
            "station_id": station.id,
            "station_name": station.name,
            "type": notification.kind.as_str(),
            "message": notification.message,
            "created_at": notification.created_at.to_rfc3339(),
        }),
    }
}
