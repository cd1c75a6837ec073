//! Push-notification and polling entry points.
//!
//! Webhook transports are outside this crate: a request layer decodes the
//! provider's headers/body into these structs and maps the outcome to an
//! HTTP status.

use serde::{Deserialize, Serialize};

use super::engine::SyncEngine;
use super::types::FullSyncReport;
use crate::error::DatabaseError;

/// Headers of a Google Calendar push notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleNotification {
    /// `X-Goog-Channel-ID`
    pub channel_id: String,
    /// `X-Goog-Channel-Token`, set to the connection id at watch time.
    pub channel_token: Option<String>,
    /// `X-Goog-Resource-State`
    pub resource_state: String,
}

/// One entry of a Microsoft Graph change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrosoftNotification {
    /// Connection id, echoed back by Graph.
    pub client_state: String,
    pub change_type: Option<String>,
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum NotificationOutcome {
    Synced(FullSyncReport),
    /// Handshake or state with nothing to fetch.
    Ignored,
    NotFound,
    Unauthorized,
}

impl SyncEngine {
    pub async fn handle_google_notification(
        &self,
        notification: &GoogleNotification,
    ) -> Result<NotificationOutcome, DatabaseError> {
        let Some(connection) = self.db.connection_by_webhook(&notification.channel_id)? else {
            tracing::debug!(channel_id = %notification.channel_id, "unknown google channel");
            return Ok(NotificationOutcome::NotFound);
        };
        if notification.channel_token.as_deref() != Some(connection.id.to_string().as_str()) {
            tracing::warn!(
                channel_id = %notification.channel_id,
                "google channel token mismatch"
            );
            return Ok(NotificationOutcome::Unauthorized);
        }

        match notification.resource_state.as_str() {
            "exists" => Ok(NotificationOutcome::Synced(
                self.perform_full_sync(&connection).await,
            )),
            state => {
                tracing::debug!(connection_id = connection.id, state, "google notification ignored");
                Ok(NotificationOutcome::Ignored)
            }
        }
    }

    pub async fn handle_microsoft_notification(
        &self,
        notification: &MicrosoftNotification,
    ) -> Result<NotificationOutcome, DatabaseError> {
        let Ok(id) = notification.client_state.parse::<i64>() else {
            return Ok(NotificationOutcome::NotFound);
        };
        let Some(connection) = self.db.get_connection(id)? else {
            return Ok(NotificationOutcome::NotFound);
        };
        tracing::debug!(
            connection_id = connection.id,
            change_type = notification.change_type.as_deref().unwrap_or("unknown"),
            "microsoft notification"
        );
        Ok(NotificationOutcome::Synced(
            self.perform_full_sync(&connection).await,
        ))
    }

    /// Full sync of every sync-enabled connection of `user_id`.
    pub async fn poll_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(i64, FullSyncReport)>, DatabaseError> {
        let connections = self.db.list_connections(user_id)?;
        let mut reports = Vec::new();
        for connection in connections.iter().filter(|c| c.sync_enabled) {
            reports.push((connection.id, self.perform_full_sync(connection).await));
        }
        Ok(reports)
    }
}
