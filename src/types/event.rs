//! Outbound `service_status` event

use serde::{Deserialize, Serialize};

use super::ServiceView;

/// Event type tag carried by every orchestrator event
pub const SERVICE_STATUS_EVENT: &str = "service_status";

/// Broadcast payload describing one service state change.
///
/// Serializes as `{"type": "service_status", "data": {...}, "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ServiceView,
    pub message: String,
}

impl ServiceEvent {
    pub fn service_status(data: ServiceView, message: impl Into<String>) -> Self {
        Self {
            event_type: SERVICE_STATUS_EVENT.to_string(),
            data,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ManagedService, ServiceCategory, ServiceConfig};
    use chrono::Utc;

    #[test]
    fn event_json_shape() {
        let config = ServiceConfig::new("AI Detector", ServiceCategory::AI, 8090);
        let svc = ManagedService::from_config("ai-detector", &config);
        let event = ServiceEvent::service_status(
            ServiceView::from_service(&svc, Utc::now()),
            "Service discovered",
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "service_status");
        assert_eq!(json["message"], "Service discovered");
        assert_eq!(json["data"]["name"], "ai-detector");
        assert_eq!(json["data"]["category"], "ai");
        assert_eq!(json["data"]["status"], "not_found");
        assert_eq!(json["data"]["port"], 8090);
        assert!(json["data"]["container_id"].is_null());
        assert!(json["data"]["uptime_seconds"].is_null());
    }
}
