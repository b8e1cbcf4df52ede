//! Composition root for the healthcare records client: wires the session,
//! upload, ledger and normalizer components together and exposes the
//! user-facing actions as tagged [`ActionReport`] results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use medrec_chain::{JsonRpcClient, RpcWallet, WalletProvider};
use medrec_contracts::fingerprint::fingerprint;
use medrec_contracts::{
    BridgeError, ContentGateway, NormalizedRecord, RecordId, RecordWriteRequest, SessionSnapshot,
    UploadOutcome,
};
use medrec_ledger::{LedgerGateway, outcome_of};
use medrec_normalizer::{NormalizedRecords, RecordNormalizer};
use medrec_session::SessionManager;
use medrec_upload::{AttachmentFile, ContentStore, PinataClient, UploadCoordinator};
use serde::Serialize;
use tracing::Instrument;
use ulid::Ulid;

pub mod config;
pub mod metrics;

pub use config::{BridgeConfig, StartupError};

pub const MSG_RECORD_ADDED: &str = "Patient record added successfully!";
pub const MSG_PROVIDER_AUTHORIZED: &str = "Provider authorized successfully!";
pub const MSG_NO_RECORDS: &str = "No record found for this patient ID";

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG`. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Outcome of one user action: always returned, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub failed_uploads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub trace_id: String,
}

impl ActionReport {
    fn ok(trace_id: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
            failed_uploads: 0,
            tx_hash: None,
            trace_id: trace_id.to_string(),
        }
    }

    fn failed(trace_id: &str, err: &BridgeError) -> Self {
        Self {
            success: false,
            message: err.user_message(),
            code: Some(err.code()),
            failed_uploads: 0,
            tx_hash: None,
            trace_id: trace_id.to_string(),
        }
    }
}

/// Fields of the add-record form as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordForm {
    pub record_id: String,
    pub patient_name: String,
    pub diagnosis: String,
    pub treatment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordsView {
    pub report: ActionReport,
    /// `None` when nothing is stored for the id or the read failed.
    pub records: Option<NormalizedRecords>,
}

pub struct MedrecBridge<W: WalletProvider, S: ContentStore> {
    session: Arc<SessionManager<W>>,
    ledger: LedgerGateway<W>,
    uploads: UploadCoordinator<S>,
    normalizer: RecordNormalizer,
    content_gateway: ContentGateway,
}

pub type RpcBridge = MedrecBridge<RpcWallet, PinataClient>;

impl MedrecBridge<RpcWallet, PinataClient> {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, StartupError> {
        let wallet = match config.wallet_rpc_url.as_ref() {
            Some(url) => {
                let rpc = JsonRpcClient::new(url.clone(), Duration::from_millis(config.rpc_timeout_ms))
                    .map_err(|err| StartupError {
                        code: "ERR_RPC_CLIENT_INIT",
                        message: format!("failed to initialize wallet RPC client: {}", err),
                    })?;
                Some(RpcWallet::new(
                    rpc,
                    Duration::from_millis(config.tx_poll_interval_ms),
                ))
            }
            None => None,
        };

        let store = PinataClient::new(config.pinata_config()).map_err(|err| StartupError {
            code: "ERR_PINNING_CLIENT_INIT",
            message: format!("failed to initialize pinning client: {}", err),
        })?;

        Ok(Self::new(wallet, store, config))
    }
}

impl<W: WalletProvider, S: ContentStore> MedrecBridge<W, S> {
    pub fn new(wallet: Option<W>, store: S, config: &BridgeConfig) -> Self {
        let session = Arc::new(SessionManager::new(wallet, config.contract_address.clone()));
        let ledger = LedgerGateway::new(session.clone(), config.ledger_config());

        Self {
            session,
            ledger,
            uploads: UploadCoordinator::new(store),
            normalizer: RecordNormalizer::new(config.display_zone),
            content_gateway: ContentGateway::new(config.ipfs_gateway_url.clone()),
        }
    }

    pub async fn session(&self) -> SessionSnapshot {
        self.session.snapshot().await
    }

    /// True while any wallet, ledger or facility call is in flight; the UI
    /// disables mutating actions while set.
    pub fn is_busy(&self) -> bool {
        self.session.activity().is_busy()
    }

    pub fn attachment_url(&self, content_id: &str) -> String {
        self.content_gateway.url_for(content_id)
    }

    pub fn attachment_urls(&self, record: &NormalizedRecord) -> Vec<String> {
        record.attachment_urls(&self.content_gateway)
    }

    /// Runs once when the client starts, without any user gesture.
    pub async fn activate(&self) -> ActionReport {
        self.connect_wallet().await
    }

    pub async fn connect_wallet(&self) -> ActionReport {
        let trace_id = Ulid::new().to_string();
        let started = Instant::now();

        let report = match self.session.connect().await {
            Ok(snapshot) => {
                let wallet = snapshot
                    .wallet_address
                    .as_ref()
                    .map(|a| a.short_display())
                    .unwrap_or_default();
                ActionReport::ok(&trace_id, format!("Wallet connected: {}", wallet))
            }
            Err(err) => ActionReport::failed(&trace_id, &err),
        };

        metrics::set_session_connected(report.success);
        metrics::observe_ledger_operation(
            "connect",
            if report.success { "ok" } else { "error" },
            started.elapsed(),
        );
        report
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
        metrics::set_session_connected(false);
    }

    /// Uploads the attachments, then writes the record. A batch where every
    /// attachment failed stops before the write; a partial failure proceeds
    /// with the successful uploads and is reported.
    pub async fn add_patient_record(
        &self,
        form: &RecordForm,
        files: Vec<AttachmentFile>,
    ) -> ActionReport {
        let trace_id = Ulid::new().to_string();
        let span = tracing::info_span!(
            "bridge.add_patient_record",
            trace_id = %trace_id,
            patient = %fingerprint(&form.patient_name),
        );

        async {
            let started = Instant::now();
            let result = self.submit_record(form, files).await;

            let outcome = match &result {
                Ok(_) => "ok",
                Err((err, _)) => outcome_of(err),
            };
            metrics::observe_ledger_operation("write_record", outcome, started.elapsed());

            match result {
                Ok((tx_hash, failed, total)) => {
                    let mut report = ActionReport::ok(&trace_id, MSG_RECORD_ADDED);
                    if failed > 0 {
                        report.message = format!(
                            "{} {} of {} attachment(s) failed to upload.",
                            MSG_RECORD_ADDED, failed, total
                        );
                    }
                    report.failed_uploads = failed;
                    report.tx_hash = Some(tx_hash);
                    report
                }
                Err((err, failed)) => {
                    let mut report = ActionReport::failed(&trace_id, &err);
                    report.failed_uploads = failed;
                    report
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Returns the transaction hash plus failed and total attachment counts,
    /// or the error with the number of failed uploads seen so far.
    async fn submit_record(
        &self,
        form: &RecordForm,
        files: Vec<AttachmentFile>,
    ) -> Result<(String, usize, usize), (BridgeError, usize)> {
        // Covers the upload phase too, not only the ledger write.
        let _activity = self.session.activity().begin();
        self.session
            .require_authorized()
            .await
            .map_err(|err| (err, 0))?;
        let record_id = RecordId::parse(&form.record_id).map_err(|err| (err, 0))?;

        let files = files
            .into_iter()
            .filter(|file| !file.is_absent())
            .collect::<Vec<_>>();
        let total = files.len();

        let batch = self.uploads.upload_batch(files).await;
        metrics::observe_uploads(batch.success_count(), batch.failed_count());
        let failed = batch.failed_count();
        if let UploadOutcome::Partial { uploaded, failed } = batch.outcome() {
            tracing::warn!(uploaded, failed, "bridge.partial_upload");
        }
        let attachment_ids = batch.attachment_ids().map_err(|err| (err, failed))?;

        let request = RecordWriteRequest {
            record_id,
            patient_name: form.patient_name.clone(),
            diagnosis: form.diagnosis.clone(),
            treatment: form.treatment.clone(),
            attachment_ids,
        };

        let confirmation = self
            .ledger
            .write_record(&request)
            .await
            .map_err(|err| (err, failed))?;
        Ok((confirmation.tx_hash.0, failed, total))
    }

    pub async fn view_patient_records(&self, record_id: &str) -> RecordsView {
        let trace_id = Ulid::new().to_string();
        let span = tracing::info_span!("bridge.view_patient_records", trace_id = %trace_id);

        async {
            let started = Instant::now();
            let result = async {
                let record_id = RecordId::parse(record_id)?;
                self.ledger.read_records(record_id).await
            }
            .await;

            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) => outcome_of(err),
            };
            metrics::observe_ledger_operation("read_records", outcome, started.elapsed());

            match result {
                Ok(encoding) if encoding.is_empty() => RecordsView {
                    report: ActionReport::ok(&trace_id, MSG_NO_RECORDS),
                    records: None,
                },
                Ok(encoding) => {
                    let records = self.normalizer.normalize(&encoding, &self.ledger).await;
                    RecordsView {
                        report: ActionReport::ok(
                            &trace_id,
                            format!("Found {} record(s)", records.len()),
                        ),
                        records: Some(records),
                    }
                }
                Err(err) => RecordsView {
                    report: ActionReport::failed(&trace_id, &err),
                    records: None,
                },
            }
        }
        .instrument(span)
        .await
    }

    pub async fn authorize_provider(&self, provider_address: &str) -> ActionReport {
        let trace_id = Ulid::new().to_string();
        let span = tracing::info_span!("bridge.authorize_provider", trace_id = %trace_id);

        async {
            let started = Instant::now();
            let result = self.ledger.grant_authorization(provider_address).await;

            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) => outcome_of(err),
            };
            metrics::observe_ledger_operation("grant_authorization", outcome, started.elapsed());

            match result {
                Ok(confirmation) => {
                    let mut report = ActionReport::ok(&trace_id, MSG_PROVIDER_AUTHORIZED);
                    report.tx_hash = Some(confirmation.tx_hash.0);
                    report
                }
                Err(err) => ActionReport::failed(&trace_id, &err),
            }
        }
        .instrument(span)
        .await
    }
}
