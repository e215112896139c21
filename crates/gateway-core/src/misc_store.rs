//! Unbatched persistence sink for events, command responses, and attribute
//! updates (spec.md §4.8). Unlike [`crate::location_store::LocationStore`],
//! each call here issues its own statement immediately — these writes are
//! comparatively rare, so there is no batching to get wrong. Failures are
//! logged and swallowed; callers never see a `Result` because a dropped
//! audit write is not supposed to interrupt the device session that
//! triggered it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::events::GatewayEvent;
use crate::serial::TrackerId;

pub struct MiscStore {
    pool: PgPool,
}

impl MiscStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save_event(&self, tracker_id: TrackerId, event: &GatewayEvent, at: DateTime<Utc>) {
        let message_json = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        let result = sqlx::query(
            "INSERT INTO event_message (tracker_id, event_type, message, message_json, event_timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tracker_id.0)
        .bind(event.topic())
        .bind(event_message_text(event))
        .bind(message_json)
        .bind(at)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, tracker_id = %tracker_id, "db_error: failed to save event");
        }
    }

    pub async fn save_command_response(
        &self,
        tracker_id: TrackerId,
        server_flag: u32,
        command: &str,
        command_time: DateTime<Utc>,
        response: &str,
        response_time: DateTime<Utc>,
    ) {
        let result = sqlx::query(
            "INSERT INTO gt06_command_response (tracker_id, server_flag, command, command_time, response, response_time) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(tracker_id.0)
        .bind(i64::from(server_flag))
        .bind(command)
        .bind(command_time)
        .bind(response)
        .bind(response_time)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, tracker_id = %tracker_id, "db_error: failed to save command response");
        }
    }

    pub async fn update_attribute(&self, tracker_id: TrackerId, key: &str, value: &serde_json::Value) {
        let result = sqlx::query(
            "UPDATE tracker SET attribute = jsonb_set(coalesce(attribute, '{}'::jsonb), ARRAY[$2], $3, true) \
             WHERE id = $1",
        )
        .bind(tracker_id.0)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, tracker_id = %tracker_id, key, "db_error: failed to update attribute");
        }
    }
}

fn event_message_text(event: &GatewayEvent) -> String {
    match event {
        GatewayEvent::CommandSent { command, .. } => command.clone(),
        GatewayEvent::CommandResponse { response, .. } => response.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_message_text_carries_command_and_response_payloads() {
        let sent = GatewayEvent::CommandSent { server_flag: 1, command: "STATUS#".into() };
        assert_eq!(event_message_text(&sent), "STATUS#");
        let response = GatewayEvent::CommandResponse { server_flag: 1, response: "OK".into() };
        assert_eq!(event_message_text(&response), "OK");
        let heartbeat = GatewayEvent::HeartbeatChanged { gps_time: Utc::now() };
        assert_eq!(event_message_text(&heartbeat), "");
    }
}
