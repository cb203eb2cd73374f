//! Core domain types for TPS/CTPS synchronization.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TpsyncError;

// ---------------------------------------------------------------------------
// NumberType
// ---------------------------------------------------------------------------

/// Which phone field of a record a number came from.
///
/// One entity can contribute several numbers and each gets its own verdict.
/// The wire/ledger tag for the primary number is `phone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NumberType {
    #[serde(rename = "phone")]
    Primary,
    #[serde(rename = "mobile")]
    Mobile,
}

impl NumberType {
    /// Tag written to the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "phone",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for NumberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NumberType {
    type Err = TpsyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phone" | "primary" => Ok(Self::Primary),
            "mobile" | "mobilephone" => Ok(Self::Mobile),
            other => Err(TpsyncError::validation(format!(
                "unknown number type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TpsStatus
// ---------------------------------------------------------------------------

/// Canonical do-not-call status derived from a compliance result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TpsStatus {
    #[serde(rename = "Listed")]
    Listed,
    #[serde(rename = "Not Listed")]
    NotListed,
}

impl TpsStatus {
    /// `Listed` when the number is on either register.
    pub fn from_flags(on_tps: bool, on_ctps: bool) -> Self {
        if on_tps || on_ctps {
            Self::Listed
        } else {
            Self::NotListed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listed => "Listed",
            Self::NotListed => "Not Listed",
        }
    }
}

impl fmt::Display for TpsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TpsStatus {
    type Err = TpsyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Listed" => Ok(Self::Listed),
            "Not Listed" => Ok(Self::NotListed),
            other => Err(TpsyncError::validation(format!("unknown status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Compliance results & check tasks
// ---------------------------------------------------------------------------

/// Verdict for one phone number from the compliance API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceResult {
    /// The number as submitted (the API does not echo it reliably).
    pub phone_number: String,
    /// On the Telephone Preference Service register.
    pub on_tps: bool,
    /// On the Corporate Telephone Preference Service register.
    pub on_ctps: bool,
}

impl ComplianceResult {
    pub fn status(&self) -> TpsStatus {
        TpsStatus::from_flags(self.on_tps, self.on_ctps)
    }
}

/// One phone number of one entity awaiting a compliance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberCheckTask {
    pub entity_id: String,
    pub number_type: NumberType,
    pub phone_number: String,
}

impl NumberCheckTask {
    /// Combine the task with its verdict into a ledger row.
    pub fn into_entry(self, status: TpsStatus) -> LedgerEntry {
        LedgerEntry {
            entity_id: self.entity_id,
            number_type: self.number_type,
            phone_number: self.phone_number,
            status,
        }
    }
}

/// One completed check, as persisted in the ledger file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entity_id: String,
    pub number_type: NumberType,
    pub phone_number: String,
    pub status: TpsStatus,
}

/// Per-number-type statuses aggregated for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStatuses {
    pub primary: Option<TpsStatus>,
    pub mobile: Option<TpsStatus>,
}

impl EntityStatuses {
    /// Record a status, replacing any earlier one for the same number type.
    pub fn set(&mut self, number_type: NumberType, status: TpsStatus) {
        match number_type {
            NumberType::Primary => self.primary = Some(status),
            NumberType::Mobile => self.mobile = Some(status),
        }
    }

    pub fn get(&self, number_type: NumberType) -> Option<TpsStatus> {
        match number_type {
            NumberType::Primary => self.primary,
            NumberType::Mobile => self.mobile,
        }
    }
}

// ---------------------------------------------------------------------------
// CRM property values & records
// ---------------------------------------------------------------------------

/// A CRM property as it arrives on the wire.
///
/// The CRM returns bare strings (or null) for object reads, while webhook
/// change events wrap values as `{"value": ...}`. Anything else is carried
/// as raw JSON and treated as absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Wrapped { value: Option<serde_json::Value> },
    Other(serde_json::Value),
}

impl PropertyValue {
    /// Trimmed string content, or `None` when missing, non-textual or blank.
    pub fn normalized(&self) -> Option<String> {
        let raw = match self {
            Self::Text(s) => s.as_str(),
            Self::Wrapped {
                value: Some(serde_json::Value::String(s)),
            } => s.as_str(),
            _ => return None,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Normalize an optional raw property to "string or absent".
pub fn normalize_phone(value: Option<&PropertyValue>) -> Option<String> {
    value.and_then(PropertyValue::normalized)
}

/// A CRM object exactly as deserialized from a read response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Transient projection of a CRM object with normalized property values.
///
/// Only properties with a non-blank string value are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub properties: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style helper, mostly for tests and fakes.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.properties.insert(name.into(), trimmed.to_string());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        let properties = raw
            .properties
            .iter()
            .filter_map(|(name, value)| value.normalized().map(|v| (name.clone(), v)))
            .collect();
        Self {
            id: raw.id,
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> PropertyValue {
        serde_json::from_value(value).expect("deserialize property")
    }

    #[test]
    fn phone_normalization_shapes() {
        assert_eq!(
            normalize_phone(Some(&parse(json!("555-1234")))),
            Some("555-1234".into())
        );
        assert_eq!(
            normalize_phone(Some(&parse(json!({"value": "555-1234"})))),
            Some("555-1234".into())
        );
        assert_eq!(normalize_phone(Some(&parse(json!({"value": "  "})))), None);
        assert_eq!(normalize_phone(None), None);
    }

    #[test]
    fn phone_normalization_odd_values() {
        assert_eq!(
            normalize_phone(Some(&parse(json!("  01632 960001 \n")))),
            Some("01632 960001".into())
        );
        assert_eq!(normalize_phone(Some(&parse(json!(null)))), None);
        assert_eq!(normalize_phone(Some(&parse(json!(447700900123u64)))), None);
        assert_eq!(normalize_phone(Some(&parse(json!({"value": null})))), None);
        assert_eq!(normalize_phone(Some(&parse(json!({"value": 12})))), None);
    }

    #[test]
    fn status_derivation() {
        assert_eq!(TpsStatus::from_flags(false, false), TpsStatus::NotListed);
        assert_eq!(TpsStatus::from_flags(true, false), TpsStatus::Listed);
        assert_eq!(TpsStatus::from_flags(false, true), TpsStatus::Listed);
        assert_eq!(TpsStatus::from_flags(true, true), TpsStatus::Listed);
    }

    #[test]
    fn status_and_number_type_parse() {
        assert_eq!("Not Listed".parse::<TpsStatus>().unwrap(), TpsStatus::NotListed);
        assert_eq!(" Listed ".parse::<TpsStatus>().unwrap(), TpsStatus::Listed);
        assert!("Maybe".parse::<TpsStatus>().is_err());

        assert_eq!(" Phone ".parse::<NumberType>().unwrap(), NumberType::Primary);
        assert_eq!("mobile".parse::<NumberType>().unwrap(), NumberType::Mobile);
        assert!("fax".parse::<NumberType>().is_err());
    }

    #[test]
    fn raw_record_drops_blank_properties() {
        let raw: RawRecord = serde_json::from_value(json!({
            "id": "101",
            "properties": {
                "phone": " 020 7946 0000 ",
                "mobilephone": null,
                "fax": ""
            },
            "archived": false
        }))
        .expect("deserialize record");

        let record = Record::from(raw);
        assert_eq!(record.id, "101");
        assert_eq!(record.get("phone"), Some("020 7946 0000"));
        assert_eq!(record.get("mobilephone"), None);
        assert_eq!(record.get("fax"), None);
    }

    #[test]
    fn entity_statuses_last_write_wins() {
        let mut statuses = EntityStatuses::default();
        statuses.set(NumberType::Primary, TpsStatus::Listed);
        statuses.set(NumberType::Primary, TpsStatus::NotListed);
        assert_eq!(statuses.get(NumberType::Primary), Some(TpsStatus::NotListed));
        assert_eq!(statuses.get(NumberType::Mobile), None);
    }
}
