use std::sync::Arc;
use std::time::{Duration, Instant};

use medrec_chain::{Confirmation, HealthcareLedger, RpcError, TxHash, WalletProvider};
use medrec_contracts::fingerprint::fingerprint;
use medrec_contracts::{
    Address, BridgeError, ErrorKind, FacilityDirectory, FacilityRef, FailureReason, RecordEncoding,
    RecordId, RecordWriteRequest,
};
use medrec_session::SessionManager;
use tokio::sync::Mutex;
use tracing::Instrument;

mod facility_cache;

pub use facility_cache::FacilityNameCache;

pub const FACILITY_PLACEHOLDER: &str = "Unknown facility";

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub confirmation_timeout: Duration,
    pub facility_cache_max_entries: usize,
    pub facility_cache_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            facility_cache_max_entries: 256,
            facility_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Every contract read and write goes through here. Writes hold a single
/// mutation slot for their whole lifetime, so a second write started while
/// one is in flight is rejected with `Busy` instead of racing it.
pub struct LedgerGateway<W: WalletProvider> {
    session: Arc<SessionManager<W>>,
    mutation_slot: Mutex<()>,
    confirmation_timeout: Duration,
    facility_cache: FacilityNameCache,
}

impl<W: WalletProvider> LedgerGateway<W> {
    pub fn new(session: Arc<SessionManager<W>>, config: LedgerConfig) -> Self {
        Self {
            session,
            mutation_slot: Mutex::new(()),
            confirmation_timeout: config.confirmation_timeout,
            facility_cache: FacilityNameCache::new(
                config.facility_cache_max_entries,
                config.facility_cache_ttl,
            ),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager<W>> {
        &self.session
    }

    /// Submits a record and waits for its confirmation. Success means the
    /// transaction is mined with a success status, not merely accepted.
    pub async fn write_record(
        &self,
        request: &RecordWriteRequest,
    ) -> Result<Confirmation, BridgeError> {
        let _activity = self.session.activity().begin();
        let span = tracing::info_span!(
            "ledger.write_record",
            record_id = %request.record_id,
            patient = %fingerprint(&request.patient_name),
            attachments = request.attachment_ids.len(),
            tx_hash = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let result = async {
                let contract = self.session.require_authorized().await?;
                let _slot = self.claim_mutation_slot()?;

                let tx = contract
                    .add_patient_record(request)
                    .await
                    .map_err(|err| write_failed("record submission failed", &err))?;
                tracing::Span::current().record("tx_hash", tx.0.as_str());

                self.confirm(contract.as_ref(), &tx).await
            }
            .await;

            record_completion(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    /// Returns everything stored under `record_id`. An id with no records is
    /// an empty `RecordEncoding`, never an error.
    pub async fn read_records(&self, record_id: RecordId) -> Result<RecordEncoding, BridgeError> {
        let _activity = self.session.activity().begin();
        let span = tracing::info_span!(
            "ledger.read_records",
            record_id = %record_id,
            records = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let result = async {
                let contract = self.session.require_authorized().await?;
                contract.fetch_all_records(record_id).await.map_err(|err| {
                    BridgeError::with_reason(
                        ErrorKind::ReadFailed,
                        err.reason(),
                        format!("fetching records for {} failed: {}", record_id, err),
                    )
                })
            }
            .await;

            if let Ok(RecordEncoding::Current(records)) = result.as_ref() {
                tracing::Span::current().record("records", records.len());
            }
            record_completion(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    /// Grants provider access to the address typed by the owner. Input is
    /// validated locally; a malformed address never reaches the ledger.
    pub async fn grant_authorization(&self, provider: &str) -> Result<Confirmation, BridgeError> {
        let _activity = self.session.activity().begin();
        let span = tracing::info_span!(
            "ledger.grant_authorization",
            provider = tracing::field::Empty,
            tx_hash = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let result = async {
                let contract = self.session.require_owner().await?;
                let provider = parse_provider_address(provider)?;
                tracing::Span::current().record("provider", provider.short_display().as_str());

                let _slot = self.claim_mutation_slot()?;
                let tx = contract
                    .authorize_the_provider(&provider)
                    .await
                    .map_err(|err| write_failed("authorization submission failed", &err))?;
                tracing::Span::current().record("tx_hash", tx.0.as_str());

                self.confirm(contract.as_ref(), &tx).await
            }
            .await;

            record_completion(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    pub async fn resolve_facility_name(&self, facility: FacilityRef) -> Result<String, BridgeError> {
        if let Some(name) = self.facility_cache.get(facility).await {
            return Ok(name);
        }

        let _activity = self.session.activity().begin();
        let span = tracing::info_span!(
            "ledger.resolve_facility_name",
            facility = %facility,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let result = async {
                let contract = self.session.require_connected().await?;
                let name = contract.hospital_name(facility).await.map_err(|err| {
                    BridgeError::with_reason(
                        ErrorKind::FacilityResolutionFailed,
                        err.reason(),
                        format!("facility {}: {}", facility, err),
                    )
                })?;
                if name.trim().is_empty() {
                    return Err(BridgeError::new(
                        ErrorKind::FacilityResolutionFailed,
                        format!("facility {} has no registered name", facility),
                    ));
                }
                Ok::<_, BridgeError>(name)
            }
            .await;

            if let Ok(name) = result.as_ref() {
                self.facility_cache.put(facility, name.clone()).await;
            }
            record_completion(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    /// Facility name for display, degrading to a placeholder on failure.
    pub async fn facility_display_name(&self, facility: FacilityRef) -> String {
        self.resolve_facility_name(facility)
            .await
            .unwrap_or_else(|_| FACILITY_PLACEHOLDER.to_string())
    }

    fn claim_mutation_slot(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, BridgeError> {
        self.mutation_slot.try_lock().map_err(|_| {
            BridgeError::new(
                ErrorKind::Busy,
                "another ledger transaction is still awaiting confirmation",
            )
        })
    }

    async fn confirm(
        &self,
        contract: &W::Ledger,
        tx: &TxHash,
    ) -> Result<Confirmation, BridgeError> {
        contract
            .wait_for_confirmation(tx, self.confirmation_timeout)
            .await
            .map_err(|err| match err {
                RpcError::ConfirmationTimeout { .. } => BridgeError::with_reason(
                    ErrorKind::WriteFailed,
                    FailureReason::TimedOut,
                    format!(
                        "transaction {} not confirmed within {}ms",
                        tx,
                        self.confirmation_timeout.as_millis()
                    ),
                ),
                other => write_failed("confirmation failed", &other),
            })
    }
}

impl<W: WalletProvider> FacilityDirectory for LedgerGateway<W> {
    async fn facility_name(&self, facility: FacilityRef) -> Result<String, BridgeError> {
        self.resolve_facility_name(facility).await
    }
}

fn parse_provider_address(input: &str) -> Result<Address, BridgeError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(BridgeError::new(
            ErrorKind::InvalidInput,
            "Please enter a provider address",
        ));
    }
    Address::parse(input)
}

fn write_failed(step: &str, err: &RpcError) -> BridgeError {
    BridgeError::with_reason(
        ErrorKind::WriteFailed,
        err.reason(),
        format!("{}: {}", step, err),
    )
}

/// Span `outcome` value for a gateway error.
pub fn outcome_of(err: &BridgeError) -> &'static str {
    match (err.kind, err.reason) {
        (_, Some(FailureReason::TimedOut)) => "timeout",
        (_, Some(FailureReason::Rejected | FailureReason::Reverted)) => "rejected",
        (ErrorKind::Busy, _) => "busy",
        (ErrorKind::NotConnected | ErrorKind::Unauthorized | ErrorKind::NotOwner, _) => "denied",
        (ErrorKind::InvalidAddress | ErrorKind::InvalidInput, _) => "invalid",
        _ => "error",
    }
}

fn record_completion<T>(started: Instant, result: &Result<T, BridgeError>) {
    let span = tracing::Span::current();
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    match result {
        Ok(_) => {
            span.record("outcome", "ok");
        }
        Err(err) => {
            span.record("outcome", outcome_of(err));
            tracing::warn!(code = err.code(), error = %err, "ledger.operation_failed");
        }
    }
}
