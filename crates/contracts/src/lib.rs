use serde::{Deserialize, Serialize};

mod error;
pub mod fingerprint;
pub mod record;

pub use error::{BridgeError, ErrorKind, FailureReason};
pub use record::{
    FacilityDirectory, FacilityRef, FieldMap, NormalizedRecord, RawRecord, RawTimestamp,
    RecordEncoding,
};

/// 20-byte account address in `0x` + 40 hex form. The caller's casing is kept
/// for display; comparisons between addresses are case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(input: &str) -> Result<Self, BridgeError> {
        if !is_address(input) {
            return Err(BridgeError::new(
                ErrorKind::InvalidAddress,
                format!("`{}` is not a 0x-prefixed 40 hex digit address", input),
            ));
        }
        Ok(Self(input.to_string()))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated on construction, so the decode cannot fail.
        let _ = hex::decode_to_slice(&self.0[2..], &mut out);
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// `0x1234ab...cdef01` form used in headers and logs.
    pub fn short_display(&self) -> String {
        format!("{}...{}", &self.0[..8], &self.0[self.0.len() - 6..])
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_lowercase().hash(state);
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// `^0x[a-fA-F0-9]{40}$`
pub fn is_address(s: &str) -> bool {
    let Some(digits) = s.strip_prefix("0x") else {
        return false;
    };
    digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Result<Self, BridgeError> {
        if value == 0 {
            return Err(BridgeError::new(
                ErrorKind::InvalidInput,
                "Record ID must be a positive integer",
            ));
        }
        Ok(Self(value))
    }

    /// Parses an id typed by a user: surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, BridgeError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BridgeError::new(
                ErrorKind::InvalidInput,
                "Please enter a patient ID",
            ));
        }
        let value = input.parse::<u64>().map_err(|_| {
            BridgeError::new(
                ErrorKind::InvalidInput,
                "Record ID must be a positive integer",
            )
        })?;
        Self::new(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWriteRequest {
    pub record_id: RecordId,
    pub patient_name: String,
    pub diagnosis: String,
    pub treatment: String,
    pub attachment_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    AuthorizedProvider,
    Unauthorized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub wallet_address: Option<Address>,
    pub connected: bool,
    pub owner: bool,
    pub authorized: bool,
    pub busy: bool,
}

impl SessionSnapshot {
    pub fn role(&self) -> Role {
        if self.owner {
            Role::Owner
        } else if self.authorized {
            Role::AuthorizedProvider
        } else {
            Role::Unauthorized
        }
    }
}

/// Outcome of one file in an upload batch; `content_id` is `None` when that
/// file's upload failed for any reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSlot {
    pub file_ref: String,
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Empty,
    Complete { uploaded: usize },
    Partial { uploaded: usize, failed: usize },
    AllFailed { failed: usize },
}

/// Per-file results in the same order and length as the submitted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub slots: Vec<UploadSlot>,
}

impl UploadResult {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.slots.iter().filter(|s| s.content_id.is_some()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.success_count()
    }

    pub fn outcome(&self) -> UploadOutcome {
        let uploaded = self.success_count();
        let failed = self.failed_count();
        match (uploaded, failed) {
            (0, 0) => UploadOutcome::Empty,
            (0, failed) => UploadOutcome::AllFailed { failed },
            (uploaded, 0) => UploadOutcome::Complete { uploaded },
            (uploaded, failed) => UploadOutcome::Partial { uploaded, failed },
        }
    }

    /// Successful content ids in batch order. A non-empty batch with no
    /// successes is a hard stop for the enclosing record write.
    pub fn attachment_ids(&self) -> Result<Vec<String>, BridgeError> {
        if let UploadOutcome::AllFailed { failed } = self.outcome() {
            return Err(BridgeError::new(
                ErrorKind::AllUploadsFailed,
                format!("0 of {} attachment(s) uploaded", failed),
            ));
        }
        Ok(self
            .slots
            .iter()
            .filter_map(|s| s.content_id.clone())
            .collect())
    }
}

/// Builds retrieval URLs of the form `<gateway-base>/<content-identifier>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentGateway {
    base_url: String,
}

impl ContentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, content_id: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            content_id.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";

    #[test]
    fn address_accepts_exact_pattern_only() {
        assert!(Address::parse(ADDR).is_ok());
        assert!(Address::parse(&format!("0x{}", "a".repeat(40))).is_ok());

        let bad_inputs = [
            "0x123".to_string(),
            String::new(),
            "0X0000000000000000000000000000000000000000".to_string(),
            format!("0x{}", "g".repeat(40)),
            format!("0x{}", "a".repeat(41)),
            format!(" {}", ADDR),
        ];
        for bad in &bad_inputs {
            let err = Address::parse(bad).expect_err("address should be rejected");
            assert_eq!(err.kind, ErrorKind::InvalidAddress);
        }
    }

    #[test]
    fn address_equality_ignores_case() {
        let a = Address::parse(ADDR).expect("valid");
        let b = Address::parse(&ADDR.to_ascii_lowercase()).expect("valid");
        assert_eq!(a, b);
        assert_eq!(Address::from_bytes(a.to_bytes()), a);
    }

    #[test]
    fn address_short_display_keeps_head_and_tail() {
        let a = Address::parse(ADDR).expect("valid");
        assert_eq!(a.short_display(), "0xAbCdEf...CDEF01");
    }

    #[test]
    fn record_id_parse_trims_and_rejects_non_positive() {
        assert_eq!(RecordId::parse(" 42 ").expect("valid").get(), 42);

        let empty = RecordId::parse("   ").unwrap_err();
        assert_eq!(empty.kind, ErrorKind::InvalidInput);
        assert_eq!(empty.message, "Please enter a patient ID");

        assert_eq!(RecordId::parse("0").unwrap_err().kind, ErrorKind::InvalidInput);
        assert_eq!(RecordId::parse("-3").unwrap_err().kind, ErrorKind::InvalidInput);
        assert_eq!(RecordId::parse("abc").unwrap_err().kind, ErrorKind::InvalidInput);
    }

    fn slot(name: &str, cid: Option<&str>) -> UploadSlot {
        UploadSlot {
            file_ref: name.to_string(),
            content_id: cid.map(|c| c.to_string()),
        }
    }

    #[test]
    fn upload_result_reports_partial_failure_and_keeps_order() {
        let result = UploadResult {
            slots: vec![slot("a", Some("Qa")), slot("b", None), slot("c", Some("Qc"))],
        };
        assert_eq!(
            result.outcome(),
            UploadOutcome::Partial {
                uploaded: 2,
                failed: 1
            }
        );
        assert_eq!(
            result.attachment_ids().expect("partial is allowed"),
            vec!["Qa".to_string(), "Qc".to_string()]
        );
    }

    #[test]
    fn upload_result_with_zero_successes_is_a_hard_stop() {
        let result = UploadResult {
            slots: vec![slot("a", None), slot("b", None)],
        };
        assert_eq!(result.outcome(), UploadOutcome::AllFailed { failed: 2 });
        let err = result.attachment_ids().unwrap_err();
        assert_eq!(err.kind, ErrorKind::AllUploadsFailed);
    }

    #[test]
    fn empty_upload_result_yields_no_attachments() {
        let result = UploadResult::default();
        assert_eq!(result.outcome(), UploadOutcome::Empty);
        assert!(result.attachment_ids().expect("empty is fine").is_empty());
    }

    #[test]
    fn session_role_follows_flags() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.role(), Role::Unauthorized);
        snapshot.authorized = true;
        assert_eq!(snapshot.role(), Role::AuthorizedProvider);
        snapshot.owner = true;
        assert_eq!(snapshot.role(), Role::Owner);
    }

    #[test]
    fn content_gateway_joins_with_single_slash() {
        let gateway = ContentGateway::new("https://gateway.example/ipfs/");
        assert_eq!(gateway.url_for("QmXyz"), "https://gateway.example/ipfs/QmXyz");
    }
}
