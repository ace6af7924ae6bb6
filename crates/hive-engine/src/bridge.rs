//! Bridge from engine events to wire notifications.
//!
//! Consumes the shared [`EngineEvent`] broadcast channel and fans each
//! event out to every connected console session as the matching §4.G
//! notification. A lagged bridge skips ahead rather than stalling the
//! producers.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use hive_net::{ProtocolServer, WireMessage};
use hive_types::EngineEvent;

/// Run the bridge until shutdown.
pub async fn run(
    server: Arc<ProtocolServer>,
    mut events: broadcast::Receiver<EngineEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        let message = to_notification(&event);
                        server.broadcast(&message);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Notification bridge lagged, skipping ahead");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("Notification bridge exited");
}

/// Map one engine event onto its wire notification.
pub fn to_notification(event: &EngineEvent) -> WireMessage {
    let data = match event {
        EngineEvent::StateChange {
            agent_id,
            state,
            position,
        } => json!({
            "ai_id": agent_id,
            "new_state": state,
            "position": position,
        }),
        EngineEvent::Battle {
            agent_id,
            event_type,
            data,
        } => json!({
            "ai_id": agent_id,
            "event_type": event_type,
            "data": data,
        }),
        EngineEvent::System { event_type, data } => {
            let mut object = json!({ "event_type": event_type });
            if let (Some(target), Some(source)) = (object.as_object_mut(), data.as_object()) {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            if data.is_object() { object } else { json!({ "event_type": event_type, "data": data }) }
        }
    };
    WireMessage::notification(event.topic(), data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hive_types::{AgentId, LifecycleState, Position};
    use serde_json::Value;

    use super::*;

    #[test]
    fn state_change_notification_shape() {
        let event = EngineEvent::StateChange {
            agent_id: AgentId::new(),
            state: LifecycleState::Fighting,
            position: Position::new(1.0, 2.0, 3.0),
        };
        let message = to_notification(&event);
        assert_eq!(message.cmd.as_deref(), Some("ai_state_change"));
        let data = message.data.unwrap();
        assert_eq!(data["new_state"], json!("fighting"));
        assert!(data.get("ai_id").is_some());
        assert!(data.get("position").is_some());
    }

    #[test]
    fn battle_notification_shape() {
        let event = EngineEvent::Battle {
            agent_id: AgentId::new(),
            event_type: String::from("attack"),
            data: json!({ "damage": 77 }),
        };
        let message = to_notification(&event);
        assert_eq!(message.cmd.as_deref(), Some("battle_event"));
        let data = message.data.unwrap();
        assert_eq!(data["event_type"], json!("attack"));
        assert_eq!(data["data"]["damage"], json!(77));
    }

    #[test]
    fn system_notification_merges_payload() {
        let event = EngineEvent::System {
            event_type: String::from("ai_level_up"),
            data: json!({ "ai_id": "x", "level": 6 }),
        };
        let message = to_notification(&event);
        assert_eq!(message.cmd.as_deref(), Some("system_event"));
        let data = message.data.unwrap();
        assert_eq!(data["event_type"], json!("ai_level_up"));
        assert_eq!(data["level"], json!(6));
    }

    #[test]
    fn system_notification_with_scalar_payload() {
        let event = EngineEvent::System {
            event_type: String::from("rebalance"),
            data: Value::Null,
        };
        let message = to_notification(&event);
        let data = message.data.unwrap();
        assert_eq!(data["event_type"], json!("rebalance"));
    }
}
