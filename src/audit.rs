use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Emit a structured audit event. Failures log at warn so they stand out in aggregation.
pub fn record_audit_event(event_type: &str, success: bool, actor_id: Option<&Uuid>, metadata: JsonValue) {
    let actor = actor_id.map(|u| u.to_string());
    if success {
        tracing::info!(
            category = "audit",
            event_type = event_type,
            success = success,
            actor_id = actor.as_deref().unwrap_or("-"),
            metadata = %metadata,
            "check-in audit event"
        );
    } else {
        tracing::warn!(
            category = "audit",
            event_type = event_type,
            success = success,
            actor_id = actor.as_deref().unwrap_or("-"),
            metadata = %metadata,
            "check-in audit event (failure)"
        );
    }
}
