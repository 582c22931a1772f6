//! `internal` addressing objects sent with every engine request.

use serde::Serialize;
use uuid::Uuid;

/// Fresh entity id.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Worker-level requests carry an empty object.
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct WorkerInternal {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RouterInternal {
    pub(crate) router_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportInternal {
    pub(crate) router_id: String,
    pub(crate) transport_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProducerInternal {
    pub(crate) router_id: String,
    pub(crate) transport_id: String,
    pub(crate) producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumerInternal {
    pub(crate) router_id: String,
    pub(crate) transport_id: String,
    pub(crate) consumer_id: String,
    pub(crate) producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataProducerInternal {
    pub(crate) router_id: String,
    pub(crate) transport_id: String,
    pub(crate) data_producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataConsumerInternal {
    pub(crate) router_id: String,
    pub(crate) transport_id: String,
    pub(crate) data_consumer_id: String,
    pub(crate) data_producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RtpObserverInternal {
    pub(crate) router_id: String,
    pub(crate) rtp_observer_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn internal_objects_are_camel_case() {
        let internal = DataConsumerInternal {
            router_id: "r".to_string(),
            transport_id: "t".to_string(),
            data_consumer_id: "dc".to_string(),
            data_producer_id: "dp".to_string(),
        };
        assert_eq!(
            serde_json::to_value(internal).unwrap(),
            json!({
                "routerId": "r",
                "transportId": "t",
                "dataConsumerId": "dc",
                "dataProducerId": "dp"
            })
        );
        assert_eq!(serde_json::to_value(WorkerInternal {}).unwrap(), json!({}));
    }

    #[test]
    fn ids_are_unique_uuids() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
