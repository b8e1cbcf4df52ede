use std::future::Future;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::{BridgeError, ContentGateway, ErrorKind, FailureReason};

pub const FIELD_PATIENT_NAME: &str = "Patient Name";
pub const FIELD_DIAGNOSIS: &str = "Diagnosis";
pub const FIELD_TREATMENT: &str = "Treatment";
pub const FIELD_FACILITY: &str = "Issuing Facility";
pub const FIELD_TIMESTAMP: &str = "Timestamp";

/// Ledger-side identifier of the facility that issued a record. Zero is the
/// contract's "unset" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FacilityRef(pub u64);

impl FacilityRef {
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for FacilityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTimestamp {
    Integer(u64),
    Numeric(String),
}

impl RawTimestamp {
    /// Epoch seconds, if the value is usable. Integer zero is the contract's
    /// "unset" value and yields `None`.
    pub fn epoch_seconds(&self) -> Option<i64> {
        match self {
            RawTimestamp::Integer(0) => None,
            RawTimestamp::Integer(secs) => i64::try_from(*secs).ok(),
            RawTimestamp::Numeric(text) => text.trim().parse::<i64>().ok(),
        }
    }
}

/// One stored record as the ledger returns it, positionally:
/// key, patient name, diagnosis, treatment, attachment ids, facility, timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub record_key: Option<u64>,
    pub patient_name: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub ipfs_hashes: Option<Vec<String>>,
    pub facility_ref: Option<FacilityRef>,
    pub timestamp: Option<RawTimestamp>,
}

impl RawRecord {
    pub fn from_positional(items: &[Value]) -> Result<Self, BridgeError> {
        Ok(Self {
            record_key: items.first().map(json_u64).transpose()?.flatten(),
            patient_name: items.get(1).map(json_string).transpose()?.flatten(),
            diagnosis: items.get(2).map(json_string).transpose()?.flatten(),
            treatment: items.get(3).map(json_string).transpose()?.flatten(),
            ipfs_hashes: items.get(4).map(json_string_list).transpose()?.flatten(),
            facility_ref: items
                .get(5)
                .map(json_u64)
                .transpose()?
                .flatten()
                .map(FacilityRef),
            timestamp: items.get(6).map(json_timestamp).transpose()?.flatten(),
        })
    }

    pub fn from_named(obj: &serde_json::Map<String, Value>) -> Result<Self, BridgeError> {
        Ok(Self {
            record_key: obj.get("recordId").map(json_u64).transpose()?.flatten(),
            patient_name: obj.get("patientName").map(json_string).transpose()?.flatten(),
            diagnosis: obj.get("diagnosis").map(json_string).transpose()?.flatten(),
            treatment: obj.get("treatment").map(json_string).transpose()?.flatten(),
            ipfs_hashes: obj
                .get("ipfsHashes")
                .map(json_string_list)
                .transpose()?
                .flatten(),
            facility_ref: obj
                .get("hospitalId")
                .map(json_u64)
                .transpose()?
                .flatten()
                .map(FacilityRef),
            timestamp: obj.get("timestamp").map(json_timestamp).transpose()?.flatten(),
        })
    }
}

/// How the ledger encoded a read, decided once where the payload enters the
/// client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEncoding {
    Legacy(String),
    Current(Vec<RawRecord>),
}

impl RecordEncoding {
    /// A string is the legacy "Key: Value, ..." form; an array is the current
    /// tuple form (each element positional or keyed by field name).
    pub fn from_value(value: &Value) -> Result<Self, BridgeError> {
        match value {
            Value::String(s) => Ok(RecordEncoding::Legacy(s.clone())),
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    let record = match item {
                        Value::Array(fields) => RawRecord::from_positional(fields)?,
                        Value::Object(obj) => RawRecord::from_named(obj)?,
                        _ => return Err(invalid_shape("record element must be an array or object")),
                    };
                    records.push(record);
                }
                Ok(RecordEncoding::Current(records))
            }
            _ => Err(invalid_shape("records payload must be an array or string")),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RecordEncoding::Legacy(s) => s.trim().is_empty(),
            RecordEncoding::Current(records) => records.is_empty(),
        }
    }
}

/// Display-ready field map. Insertion order is kept; inserting an existing
/// key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub fields: FieldMap,
    #[serde(rename = "ipfsHashes", skip_serializing_if = "Option::is_none")]
    pub ipfs_hashes: Option<Vec<String>>,
}

impl NormalizedRecord {
    /// Retrieval URLs for the record's attachments, in attachment order.
    pub fn attachment_urls(&self, gateway: &ContentGateway) -> Vec<String> {
        self.ipfs_hashes
            .iter()
            .flatten()
            .map(|content_id| gateway.url_for(content_id))
            .collect()
    }
}

/// Read-only lookup from facility reference to display name.
pub trait FacilityDirectory: Send + Sync {
    fn facility_name(
        &self,
        facility: FacilityRef,
    ) -> impl Future<Output = Result<String, BridgeError>> + Send;
}

fn invalid_shape(message: &str) -> BridgeError {
    BridgeError::with_reason(
        ErrorKind::ReadFailed,
        FailureReason::InvalidResponse,
        message.to_string(),
    )
}

fn json_string(value: &Value) -> Result<Option<String>, BridgeError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(invalid_shape("expected a string field")),
    }
}

fn json_u64(value: &Value) -> Result<Option<u64>, BridgeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid_shape("expected an unsigned integer field")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid_shape("expected a numeric string field")),
        _ => Err(invalid_shape("expected an integer field")),
    }
}

fn json_string_list(value: &Value) -> Result<Option<Vec<String>>, BridgeError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| invalid_shape("attachment ids must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(invalid_shape("expected a string array field")),
    }
}

fn json_timestamp(value: &Value) -> Result<Option<RawTimestamp>, BridgeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(|secs| Some(RawTimestamp::Integer(secs)))
            .ok_or_else(|| invalid_shape("timestamp must be a non-negative integer")),
        Value::String(s) => Ok(Some(RawTimestamp::Numeric(s.clone()))),
        _ => Err(invalid_shape("timestamp must be an integer or numeric string")),
    }
}
