//! Turns ledger record payloads into display-ready field maps.
//!
//! This crate has no network or session dependencies; facility names come in
//! through [`FacilityDirectory`].

use chrono::{DateTime, Utc};
use medrec_contracts::record::{
    FIELD_DIAGNOSIS, FIELD_FACILITY, FIELD_PATIENT_NAME, FIELD_TIMESTAMP, FIELD_TREATMENT,
};
use medrec_contracts::{
    FacilityDirectory, FieldMap, NormalizedRecord, RawRecord, RawTimestamp, RecordEncoding,
};
use serde::Serialize;

mod timestamp;

pub use timestamp::{DisplayZone, TimestampFormatter};

const LEGACY_PATIENT_NAME: &str = "PatientName";

/// Normalized records in ledger order (earliest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecords {
    pub records: Vec<NormalizedRecord>,
    /// Patient name of the earliest record, for headers.
    pub header_patient_name: Option<String>,
    pub retrieved_at: String,
}

impl NormalizedRecords {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent first.
    pub fn display_order(&self) -> impl Iterator<Item = &NormalizedRecord> {
        self.records.iter().rev()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordNormalizer {
    formatter: TimestampFormatter,
}

impl RecordNormalizer {
    pub fn new(zone: DisplayZone) -> Self {
        Self {
            formatter: TimestampFormatter::new(zone),
        }
    }

    pub fn formatter(&self) -> &TimestampFormatter {
        &self.formatter
    }

    pub async fn normalize<D: FacilityDirectory>(
        &self,
        encoding: &RecordEncoding,
        directory: &D,
    ) -> NormalizedRecords {
        self.normalize_at(encoding, directory, Utc::now()).await
    }

    pub async fn normalize_at<D: FacilityDirectory>(
        &self,
        encoding: &RecordEncoding,
        directory: &D,
        retrieved_at: DateTime<Utc>,
    ) -> NormalizedRecords {
        let (records, header_patient_name) = match encoding {
            RecordEncoding::Legacy(text) => {
                let record = self.normalize_legacy(text);
                let header = record
                    .fields
                    .get(LEGACY_PATIENT_NAME)
                    .or_else(|| record.fields.get(FIELD_PATIENT_NAME))
                    .map(str::to_string);
                (vec![record], header)
            }
            RecordEncoding::Current(raw) => {
                let header = raw
                    .first()
                    .and_then(|r| r.patient_name.as_deref())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);
                (self.normalize_current(raw, directory).await, header)
            }
        };

        NormalizedRecords {
            records,
            header_patient_name,
            retrieved_at: self.formatter.format(retrieved_at),
        }
    }

    /// Parses `Key: Value, Key: Value`. Pairs without both a key and a value
    /// are dropped; a `Timestamp` holding epoch seconds is formatted.
    pub fn normalize_legacy(&self, text: &str) -> NormalizedRecord {
        let mut fields = FieldMap::new();
        for pair in text.split(',') {
            let mut parts = pair.split(':').map(str::trim);
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.is_empty() || value.is_empty() {
                continue;
            }

            if key == FIELD_TIMESTAMP {
                let formatted = RawTimestamp::Numeric(value.to_string())
                    .epoch_seconds()
                    .and_then(|secs| self.formatter.format_epoch_seconds(secs));
                fields.insert(key, formatted.unwrap_or_else(|| value.to_string()));
            } else {
                fields.insert(key, value);
            }
        }

        NormalizedRecord {
            fields,
            ipfs_hashes: None,
        }
    }

    /// One output per input, same order. Each record is normalized on its
    /// own; a failed facility lookup only drops that record's facility field.
    pub async fn normalize_current<D: FacilityDirectory>(
        &self,
        records: &[RawRecord],
        directory: &D,
    ) -> Vec<NormalizedRecord> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.normalize_record(record, directory).await);
        }
        out
    }

    async fn normalize_record<D: FacilityDirectory>(
        &self,
        record: &RawRecord,
        directory: &D,
    ) -> NormalizedRecord {
        let mut fields = FieldMap::new();

        for (key, value) in [
            (FIELD_PATIENT_NAME, &record.patient_name),
            (FIELD_DIAGNOSIS, &record.diagnosis),
            (FIELD_TREATMENT, &record.treatment),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                fields.insert(key, value);
            }
        }

        if let Some(facility) = record.facility_ref.filter(|f| !f.is_unset()) {
            match directory.facility_name(facility).await {
                Ok(name) => fields.insert(FIELD_FACILITY, name),
                Err(err) => {
                    tracing::debug!(
                        facility = %facility,
                        code = err.code(),
                        "normalizer.facility_unresolved"
                    );
                }
            }
        }

        if let Some(formatted) = record
            .timestamp
            .as_ref()
            .and_then(RawTimestamp::epoch_seconds)
            .and_then(|secs| self.formatter.format_epoch_seconds(secs))
        {
            fields.insert(FIELD_TIMESTAMP, formatted);
        }

        NormalizedRecord {
            fields,
            ipfs_hashes: record.ipfs_hashes.clone().filter(|ids| !ids.is_empty()),
        }
    }
}
