use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// One file queued for upload. A file with no name and no bytes stands for
/// an unfilled attachment input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_absent(&self) -> bool {
        self.name.is_empty() && self.bytes.is_empty()
    }
}

#[derive(Debug)]
pub enum PinningError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
}

impl std::fmt::Display for PinningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinningError::Timeout => write!(f, "pinning request timed out"),
            PinningError::Http(err) => write!(f, "pinning HTTP error: {}", err),
            PinningError::BadStatus(status) => write!(f, "pinning service returned status {}", status),
            PinningError::InvalidResponse => write!(f, "pinning service returned invalid JSON response"),
        }
    }
}

impl std::error::Error for PinningError {}

impl From<reqwest::Error> for PinningError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            PinningError::Timeout
        } else {
            PinningError::Http(value)
        }
    }
}

/// Content-addressed store: takes a file, hands back its content identifier.
pub trait ContentStore: Send + Sync + 'static {
    fn pin(&self, file: AttachmentFile) -> impl Future<Output = Result<String, PinningError>> + Send;
}

#[derive(Debug, Clone)]
pub struct PinataConfig {
    pub upload_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Clone)]
pub struct PinataClient {
    upload_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
}

impl PinataClient {
    pub fn new(config: PinataConfig) -> Result<Self, PinningError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(PinningError::Http)?;

        Ok(Self {
            upload_url: config.upload_url,
            api_key: config.api_key,
            api_secret: config.api_secret,
            http,
        })
    }
}

impl ContentStore for PinataClient {
    async fn pin(&self, file: AttachmentFile) -> Result<String, PinningError> {
        let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.name);
        if let Some(content_type) = file.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&self.upload_url)
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.api_secret)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PinningError::BadStatus(resp.status()));
        }

        let decoded = resp
            .json::<PinResponse>()
            .await
            .map_err(|_| PinningError::InvalidResponse)?;
        if decoded.ipfs_hash.trim().is_empty() {
            return Err(PinningError::InvalidResponse);
        }

        Ok(decoded.ipfs_hash)
    }
}
