//! Wire envelope for feed messages.
//!
//! Inbound and outbound frames share one shape: a `type` discriminator, a `data`
//! payload, and any further top-level fields, which are kept as-is so
//! subscribers can read whatever the server attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventRejection;

pub const TRANSACTION_UPDATE: &str = "TRANSACTION_UPDATE";
pub const NOTIFICATION_UPDATE: &str = "NOTIFICATION_UPDATE";
pub const ALERT: &str = "ALERT";

/// Status written when a reviewer clears a flagged transaction
pub const RESOLVED_STATUS: &str = "unflagged";
/// Risk level written when a reviewer clears a flagged transaction
pub const RESOLVED_RISK_LEVEL: &str = "normal";

const REQUIRED_TRANSACTION_FIELDS: [&str; 3] = ["transactionId", "status", "riskLevel"];

/// Typed view of the `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    TransactionUpdate,
    NotificationUpdate,
    Alert,
    Other(&'a str),
}

impl<'a> EventKind<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw {
            TRANSACTION_UPDATE => EventKind::TransactionUpdate,
            NOTIFICATION_UPDATE => EventKind::NotificationUpdate,
            ALERT => EventKind::Alert,
            other => EventKind::Other(other),
        }
    }
}

/// A feed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Message discriminator, e.g. `TRANSACTION_UPDATE`
    #[serde(rename = "type")]
    pub kind: String,

    /// Message payload; `null` when the sender omitted it
    #[serde(default)]
    pub data: Value,

    /// Any other top-level fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Deserialize a raw text frame
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn kind(&self) -> EventKind<'_> {
        EventKind::parse(&self.kind)
    }

    /// Apply the delivery predicate.
    ///
    /// `TRANSACTION_UPDATE` events need non-empty string `transactionId`,
    /// `status` and `riskLevel` in their payload. Other kinds are accepted as
    /// long as they deserialized; subscribers filter for what they care about.
    pub fn validate(&self) -> Result<(), EventRejection> {
        if self.kind() != EventKind::TransactionUpdate {
            return Ok(());
        }

        let payload = self
            .data
            .as_object()
            .ok_or(EventRejection::PayloadNotObject)?;

        for field in REQUIRED_TRANSACTION_FIELDS {
            let present = payload
                .get(field)
                .and_then(Value::as_str)
                .map_or(false, |s| !s.is_empty());
            if !present {
                return Err(EventRejection::MissingField(field));
            }
        }

        Ok(())
    }

    /// Typed payload of a `TRANSACTION_UPDATE`
    pub fn transaction_update(&self) -> Option<TransactionUpdate> {
        if self.kind() != EventKind::TransactionUpdate {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// String field from the payload, falling back to the top level
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data
            .get(name)
            .and_then(Value::as_str)
            .or_else(|| self.extra.get(name).and_then(Value::as_str))
    }

    pub fn concerns_transaction(&self, transaction_id: &str) -> bool {
        self.field("transactionId") == Some(transaction_id)
    }

    /// Whether the event refers to `customer_id`, either directly, through a
    /// `CUSTOMER#<id>` partition key, or through the transaction id.
    pub fn concerns_customer(&self, customer_id: &str) -> bool {
        if self.field("customerId") == Some(customer_id) {
            return true;
        }
        if let Some(pk) = self.field("PK") {
            if pk.split('#').nth(1) == Some(customer_id) {
                return true;
            }
        }
        self.transaction_update()
            .map_or(false, |update| update.customer_id() == Some(customer_id))
    }
}

/// Payload of a `TRANSACTION_UPDATE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub status: String,
    pub risk_level: String,
}

impl TransactionUpdate {
    pub fn new(
        transaction_id: impl Into<String>,
        status: impl Into<String>,
        risk_level: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: status.into(),
            risk_level: risk_level.into(),
        }
    }

    /// The announcement sent after a reviewer clears a transaction
    pub fn resolved(transaction_id: impl Into<String>) -> Self {
        Self::new(transaction_id, RESOLVED_STATUS, RESOLVED_RISK_LEVEL)
    }

    /// Customer segment of a `T-<customer>-<sequence>` transaction id
    pub fn customer_id(&self) -> Option<&str> {
        self.transaction_id
            .split('-')
            .nth(1)
            .filter(|segment| !segment.is_empty())
    }
}

impl From<TransactionUpdate> for UpdateEvent {
    fn from(update: TransactionUpdate) -> Self {
        // Serializing three owned strings cannot fail.
        let data = serde_json::to_value(&update).unwrap_or(Value::Null);
        UpdateEvent::new(TRANSACTION_UPDATE, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_valid_transaction_update() {
        let raw = r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T1","status":"flagged","riskLevel":"high"}}"#;
        let event = UpdateEvent::decode(raw).unwrap();

        assert_eq!(event.kind(), EventKind::TransactionUpdate);
        assert!(event.validate().is_ok());
        assert_eq!(
            event.transaction_update(),
            Some(TransactionUpdate::new("T1", "flagged", "high"))
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        let event = UpdateEvent::decode(r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T1"}}"#)
            .unwrap();
        assert_eq!(event.validate(), Err(EventRejection::MissingField("status")));

        let event = UpdateEvent::decode(
            r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T1","status":"flagged"}}"#,
        )
        .unwrap();
        assert_eq!(event.validate(), Err(EventRejection::MissingField("riskLevel")));
    }

    #[test]
    fn test_empty_and_non_string_fields_rejected() {
        let empty = UpdateEvent::new(
            TRANSACTION_UPDATE,
            json!({"transactionId": "", "status": "flagged", "riskLevel": "high"}),
        );
        assert_eq!(empty.validate(), Err(EventRejection::MissingField("transactionId")));

        let numeric = UpdateEvent::new(
            TRANSACTION_UPDATE,
            json!({"transactionId": "T1", "status": 3, "riskLevel": "high"}),
        );
        assert_eq!(numeric.validate(), Err(EventRejection::MissingField("status")));

        let no_payload = UpdateEvent::decode(r#"{"type":"TRANSACTION_UPDATE"}"#).unwrap();
        assert_eq!(no_payload.validate(), Err(EventRejection::PayloadNotObject));
    }

    #[test]
    fn test_other_kinds_pass_without_payload_check() {
        let notification = UpdateEvent::decode(r#"{"type":"NOTIFICATION_UPDATE"}"#).unwrap();
        assert_eq!(notification.kind(), EventKind::NotificationUpdate);
        assert_eq!(notification.data, Value::Null);
        assert!(notification.validate().is_ok());

        let custom = UpdateEvent::decode(r#"{"type":"HEARTBEAT","data":{}}"#).unwrap();
        assert_eq!(custom.kind(), EventKind::Other("HEARTBEAT"));
        assert!(custom.validate().is_ok());
        assert!(custom.transaction_update().is_none());
    }

    #[test]
    fn test_decode_failures() {
        assert!(UpdateEvent::decode("not json").is_err());
        assert!(UpdateEvent::decode(r#"{"data":{}}"#).is_err());
        assert!(UpdateEvent::decode(r#"{"type":42,"data":{}}"#).is_err());
        assert!(UpdateEvent::decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_extra_fields_preserved() {
        let raw = r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T-1001-052","status":"flagged","riskLevel":"high"},"customerId":"1001"}"#;
        let event = UpdateEvent::decode(raw).unwrap();
        assert_eq!(event.extra.get("customerId"), Some(&json!("1001")));
        assert_eq!(event.field("customerId"), Some("1001"));
        assert!(event.concerns_transaction("T-1001-052"));
    }

    #[test]
    fn test_resolved_wire_format() {
        let event: UpdateEvent = TransactionUpdate::resolved("T-1001-052").into();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "TRANSACTION_UPDATE",
                "data": {
                    "transactionId": "T-1001-052",
                    "status": "unflagged",
                    "riskLevel": "normal"
                }
            })
        );
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_customer_matching() {
        let update = TransactionUpdate::resolved("T-1001-052");
        assert_eq!(update.customer_id(), Some("1001"));
        assert_eq!(TransactionUpdate::resolved("T1").customer_id(), None);

        let event: UpdateEvent = update.into();
        assert!(event.concerns_customer("1001"));
        assert!(!event.concerns_customer("100"));

        let by_pk = UpdateEvent::new(ALERT, json!({"PK": "CUSTOMER#2002"}));
        assert!(by_pk.concerns_customer("2002"));
        assert!(!by_pk.concerns_customer("200"));
    }
}
