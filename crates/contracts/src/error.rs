use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    WalletUnavailable,
    ConnectionFailed,
    NotConnected,
    Unauthorized,
    NotOwner,
    InvalidAddress,
    InvalidInput,
    UploadFailed,
    AllUploadsFailed,
    WriteFailed,
    ReadFailed,
    FacilityResolutionFailed,
    Busy,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::WalletUnavailable => "ERR_WALLET_UNAVAILABLE",
            ErrorKind::ConnectionFailed => "ERR_CONNECTION_FAILED",
            ErrorKind::NotConnected => "ERR_NOT_CONNECTED",
            ErrorKind::Unauthorized => "ERR_UNAUTHORIZED",
            ErrorKind::NotOwner => "ERR_NOT_OWNER",
            ErrorKind::InvalidAddress => "ERR_INVALID_ADDRESS",
            ErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ErrorKind::UploadFailed => "ERR_UPLOAD_FAILED",
            ErrorKind::AllUploadsFailed => "ERR_ALL_UPLOADS_FAILED",
            ErrorKind::WriteFailed => "ERR_WRITE_FAILED",
            ErrorKind::ReadFailed => "ERR_READ_FAILED",
            ErrorKind::FacilityResolutionFailed => "ERR_FACILITY_RESOLUTION_FAILED",
            ErrorKind::Busy => "ERR_BUSY",
        }
    }

    /// Stable user-facing sentence; every kind maps to a distinct one.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::WalletUnavailable => {
                "No wallet provider found. Please install or enable a wallet."
            }
            ErrorKind::ConnectionFailed => "Failed to connect wallet. Please try again.",
            ErrorKind::NotConnected => "Wallet not connected. Please connect your wallet first.",
            ErrorKind::Unauthorized => {
                "You are not authorized. Only authorized healthcare providers can do this."
            }
            ErrorKind::NotOwner => "Only the contract owner can authorize providers.",
            ErrorKind::InvalidAddress => "Invalid Ethereum address format.",
            ErrorKind::InvalidInput => "Invalid input.",
            ErrorKind::UploadFailed => "An attachment failed to upload.",
            ErrorKind::AllUploadsFailed => {
                "All attachments failed to upload. The record was not saved."
            }
            ErrorKind::WriteFailed => "Failed to save to the blockchain.",
            ErrorKind::ReadFailed => "Failed to fetch patient records.",
            ErrorKind::FacilityResolutionFailed => "Failed to resolve facility name.",
            ErrorKind::Busy => "Another blockchain transaction is still in progress.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Rejected,
    Reverted,
    TimedOut,
    Transport,
    InvalidResponse,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Rejected => "rejected",
            FailureReason::Reverted => "reverted",
            FailureReason::TimedOut => "timed out",
            FailureReason::Transport => "transport error",
            FailureReason::InvalidResponse => "invalid response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub reason: Option<FailureReason>,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: None,
            message: message.into(),
        }
    }

    pub fn with_reason(kind: ErrorKind, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: Some(reason),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Message suitable for direct display: the kind's sentence, the failure
    /// reason when one applies, and the underlying detail.
    pub fn user_message(&self) -> String {
        if self.kind == ErrorKind::InvalidInput && !self.message.is_empty() {
            return self.message.clone();
        }

        let mut out = self.kind.user_message().to_string();
        if let Some(reason) = self.reason {
            out.push_str(&format!(" ({})", reason.as_str()));
        }
        if !self.message.is_empty() {
            out.push_str(&format!(": {}", self.message));
        }
        out
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            Some(reason) => write!(f, "{} ({}): {}", self.code(), reason.as_str(), self.message),
            None => write!(f, "{}: {}", self.code(), self.message),
        }
    }
}

impl std::error::Error for BridgeError {}
