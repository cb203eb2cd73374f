//! Per-event compliance check for CRM change notifications.
//!
//! The webhook path does not touch the ledger: every event is checked
//! against the compliance API and written straight back to the CRM.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use tpsync_shared::{AppConfig, PropertyValue, TpsStatus, normalize_phone};

use crate::ports::{ComplianceCheck, CrmWriter, RecordSource};

/// Property names the reactor reads and writes.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub phone_property: String,
    pub status_property: String,
    pub checked_property: String,
}

impl ReactorConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            phone_property: config.webhook.phone_property.clone(),
            status_property: config.webhook.status_property.clone(),
            checked_property: config.webhook.checked_property.clone(),
        }
    }
}

/// One change notification as delivered by the CRM.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub object_id: ObjectId,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub property_changes: Vec<PropertyChange>,
}

/// Object ids arrive as numbers or strings depending on the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Number(u64),
    Text(String),
}

impl ObjectId {
    /// The id as a string, or `None` when blank.
    pub fn as_entity_id(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub property_name: String,
    #[serde(default)]
    pub property_value: Option<PropertyValue>,
}

impl WebhookEvent {
    /// Normalized value of `property` carried in the event itself, if any.
    pub fn property(&self, property: &str) -> Option<String> {
        self.property_changes
            .iter()
            .rev()
            .find(|c| c.property_name == property)
            .and_then(|c| normalize_phone(c.property_value.as_ref()))
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Updated { entity_id: String, status: TpsStatus },
    /// The record has no phone number to check.
    NoPhone { entity_id: String },
    /// The compliance API gave no answer for the number.
    NotChecked { entity_id: String },
    /// Record fetch or CRM write failed.
    Failed { entity_id: String, error: String },
    /// Unparseable event or missing object id.
    Malformed { reason: String },
}

/// Split a notification body into individual events.
///
/// Objects are a single event; arrays are a list; anything else is empty.
pub fn split_notification(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(_) => vec![payload],
        _ => Vec::new(),
    }
}

/// Handle every event in a notification, independently and in order.
#[instrument(skip_all)]
pub async fn handle_notification<S, C>(
    crm: &S,
    checker: &C,
    config: &ReactorConfig,
    payload: Value,
) -> Vec<EventOutcome>
where
    S: RecordSource + CrmWriter,
    C: ComplianceCheck,
{
    let events = split_notification(payload);
    info!(count = events.len(), "received notification");

    let mut outcomes = Vec::with_capacity(events.len());
    for raw in events {
        let outcome = match serde_json::from_value::<WebhookEvent>(raw) {
            Ok(event) => process_event(crm, checker, config, &event).await,
            Err(e) => {
                warn!(error = %e, "skipping malformed event");
                EventOutcome::Malformed {
                    reason: e.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Check the phone number of one event's record and write the verdict back.
///
/// The record is re-fetched only when the event does not carry the phone.
#[instrument(skip_all, fields(entity_id = tracing::field::Empty))]
pub async fn process_event<S, C>(
    crm: &S,
    checker: &C,
    config: &ReactorConfig,
    event: &WebhookEvent,
) -> EventOutcome
where
    S: RecordSource + CrmWriter,
    C: ComplianceCheck,
{
    let Some(entity_id) = event.object_id.as_entity_id() else {
        warn!("event without object id");
        return EventOutcome::Malformed {
            reason: "missing objectId".into(),
        };
    };
    tracing::Span::current().record("entity_id", entity_id.as_str());
    debug!(subscription = ?event.subscription_type, "processing event");

    let phone = match event.property(&config.phone_property) {
        Some(phone) => Some(phone),
        None => {
            let properties = [config.phone_property.clone()];
            match crm.fetch_one(&entity_id, &properties).await {
                Ok(record) => record.get(&config.phone_property).map(str::to_string),
                Err(e) => {
                    warn!(error = %e, "could not fetch record");
                    return EventOutcome::Failed {
                        entity_id,
                        error: e.to_string(),
                    };
                }
            }
        }
    };

    let Some(phone) = phone else {
        debug!("record has no phone number");
        return EventOutcome::NoPhone { entity_id };
    };

    let Some(result) = checker.check_one(&phone).await else {
        return EventOutcome::NotChecked { entity_id };
    };
    let status = result.status();

    let properties = BTreeMap::from([
        (config.checked_property.clone(), "true".to_string()),
        (config.status_property.clone(), status.to_string()),
    ]);
    match crm.update_properties(&entity_id, &properties).await {
        Ok(()) => {
            info!(%status, "record updated");
            EventOutcome::Updated { entity_id, status }
        }
        Err(e) => {
            warn!(error = %e, "could not update record");
            EventOutcome::Failed {
                entity_id,
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::testing::{FakeChecker, FakeCrm};
    use tpsync_shared::Record;

    fn config() -> ReactorConfig {
        ReactorConfig {
            phone_property: "phone".into(),
            status_property: "tps_status".into(),
            checked_property: "tps_checked".into(),
        }
    }

    #[test]
    fn notification_shapes() {
        assert_eq!(split_notification(json!({"objectId": 1})).len(), 1);
        assert_eq!(split_notification(json!([{"objectId": 1}, {"objectId": 2}])).len(), 2);
        assert!(split_notification(json!(null)).is_empty());
        assert!(split_notification(json!("text")).is_empty());
    }

    #[tokio::test]
    async fn malformed_event_does_not_block_others() {
        let crm = FakeCrm::default();
        let checker = FakeChecker::new(10_000).listing(&["0161 496 0001"]);
        let payload = json!([
            {"objectId": 11, "subscriptionType": "company.propertyChange",
             "propertyChanges": [{"propertyName": "phone", "propertyValue": "0161 496 0001"}]},
            {"subscriptionType": "company.propertyChange", "propertyChanges": "oops"},
            {"objectId": "13",
             "propertyChanges": [{"propertyName": "phone", "propertyValue": {"value": " 0161 496 0003 "}}]}
        ]);

        let outcomes = handle_notification(&crm, &checker, &config(), payload).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes[0],
            EventOutcome::Updated {
                entity_id: "11".into(),
                status: TpsStatus::Listed
            }
        );
        assert!(matches!(outcomes[1], EventOutcome::Malformed { .. }));
        assert_eq!(
            outcomes[2],
            EventOutcome::Updated {
                entity_id: "13".into(),
                status: TpsStatus::NotListed
            }
        );
        assert_eq!(checker.calls()[1], vec!["0161 496 0003".to_string()]);

        let written = crm.written();
        assert_eq!(written["11"]["tps_status"], "Listed");
        assert_eq!(written["11"]["tps_checked"], "true");
        assert_eq!(written["13"]["tps_status"], "Not Listed");
    }

    #[tokio::test]
    async fn record_is_fetched_only_when_event_lacks_phone() {
        let crm = FakeCrm::new(vec![Record::new("7").with("phone", "0113 496 0007")]);
        let checker = FakeChecker::new(10_000);

        let with_phone = json!({"objectId": 7,
            "propertyChanges": [{"propertyName": "phone", "propertyValue": "0113 496 0007"}]});
        handle_notification(&crm, &checker, &config(), with_phone).await;
        assert_eq!(crm.fetch_one_calls.load(Ordering::SeqCst), 0);

        let without_phone = json!({"objectId": 7,
            "propertyChanges": [{"propertyName": "name", "propertyValue": "Acme"}]});
        let outcomes = handle_notification(&crm, &checker, &config(), without_phone).await;
        assert_eq!(crm.fetch_one_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcomes[0], EventOutcome::Updated { .. }));
    }

    #[tokio::test]
    async fn record_without_phone_is_left_alone() {
        let crm = FakeCrm::new(vec![Record::new("8")]);
        let checker = FakeChecker::new(10_000);

        let outcomes = handle_notification(&crm, &checker, &config(), json!({"objectId": 8})).await;

        assert_eq!(outcomes, vec![EventOutcome::NoPhone { entity_id: "8".into() }]);
        assert!(checker.calls().is_empty());
        assert_eq!(crm.patch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_check_skips_the_write() {
        let crm = FakeCrm::default();
        let checker = FakeChecker::new(10_000).failing_on_call(1);
        let payload = json!({"objectId": 9,
            "propertyChanges": [{"propertyName": "phone", "propertyValue": "0113 496 0009"}]});

        let outcomes = handle_notification(&crm, &checker, &config(), payload).await;

        assert_eq!(outcomes, vec![EventOutcome::NotChecked { entity_id: "9".into() }]);
        assert!(crm.written().is_empty());
    }

    #[tokio::test]
    async fn unknown_record_is_reported_as_failed() {
        let crm = FakeCrm::default();
        let checker = FakeChecker::new(10_000);

        let outcomes = handle_notification(&crm, &checker, &config(), json!({"objectId": "404"})).await;

        assert!(matches!(&outcomes[0], EventOutcome::Failed { entity_id, .. } if entity_id == "404"));
    }
}
