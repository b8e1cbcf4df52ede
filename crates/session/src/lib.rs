use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use medrec_chain::{HealthcareLedger, RpcError, WalletProvider};
use medrec_contracts::{Address, BridgeError, ErrorKind, SessionSnapshot};
use tokio::sync::RwLock;
use tracing::Instrument;

/// Number of network operations in flight across the session and the
/// gateway. The UI-facing `busy` flag is simply "count above zero".
#[derive(Debug, Clone, Default)]
pub struct Activity {
    in_flight: Arc<AtomicUsize>,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

#[must_use]
pub struct ActivityGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SessionState<L> {
    wallet_address: Option<Address>,
    connected: bool,
    owner: bool,
    authorized: bool,
    contract: Option<Arc<L>>,
}

impl<L> SessionState<L> {
    fn empty() -> Self {
        Self {
            wallet_address: None,
            connected: false,
            owner: false,
            authorized: false,
            contract: None,
        }
    }
}

struct Handshake<L> {
    address: Address,
    owner: bool,
    authorized: bool,
    contract: Arc<L>,
}

/// Process-wide session root. All mutation goes through `connect` and
/// `disconnect`; everything else reads a snapshot or borrows the contract
/// handle through one of the `require_*` gates.
pub struct SessionManager<W: WalletProvider> {
    provider: Option<W>,
    contract_address: Address,
    state: RwLock<SessionState<W::Ledger>>,
    activity: Activity,
}

impl<W: WalletProvider> SessionManager<W> {
    pub fn new(provider: Option<W>, contract_address: Address) -> Self {
        Self {
            provider,
            contract_address,
            state: RwLock::new(SessionState::empty()),
            activity: Activity::new(),
        }
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn contract_address(&self) -> &Address {
        &self.contract_address
    }

    /// Runs the full wallet handshake. Safe to call again while connected;
    /// the session only flips to connected once every step has succeeded.
    pub async fn connect(&self) -> Result<SessionSnapshot, BridgeError> {
        let Some(provider) = self.provider.as_ref() else {
            tracing::warn!("session.wallet_unavailable");
            return Err(BridgeError::new(
                ErrorKind::WalletUnavailable,
                "no wallet provider is configured",
            ));
        };

        let span = tracing::info_span!(
            "session.connect",
            contract = %self.contract_address.short_display(),
            wallet = tracing::field::Empty,
            role = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let result = {
                // Released before the snapshot below is taken.
                let _activity = self.activity.begin();
                self.handshake(provider).await
            };

            let latency_ms = started.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency_ms);

            let mut state = self.state.write().await;
            match result {
                Ok(handshake) => {
                    state.wallet_address = Some(handshake.address);
                    state.owner = handshake.owner;
                    state.authorized = handshake.authorized;
                    state.contract = Some(handshake.contract);
                    state.connected = true;

                    let snapshot = self.snapshot_of(&state);
                    if let Some(address) = snapshot.wallet_address.as_ref() {
                        tracing::Span::current().record("wallet", address.short_display().as_str());
                    }
                    tracing::Span::current().record("role", format!("{:?}", snapshot.role()).as_str());
                    tracing::Span::current().record("outcome", "ok");
                    Ok(snapshot)
                }
                Err((err, outcome)) => {
                    // Role flags keep their previous values; nothing reads them
                    // while disconnected.
                    state.connected = false;
                    state.contract = None;
                    tracing::Span::current().record("outcome", outcome);
                    tracing::warn!(code = err.code(), error = %err, "session.connect_failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handshake(
        &self,
        provider: &W,
    ) -> Result<Handshake<W::Ledger>, (BridgeError, &'static str)> {
        let accounts = provider
            .request_accounts()
            .await
            .map_err(|err| connection_failed("account request failed", &err))?;

        let Some(address) = accounts.into_iter().next() else {
            return Err((
                BridgeError::new(ErrorKind::ConnectionFailed, "wallet returned no accounts"),
                "rejected",
            ));
        };

        let contract = provider.bind_contract(&self.contract_address, &address);

        let owner_address = contract
            .get_owner()
            .await
            .map_err(|err| connection_failed("owner lookup failed", &err))?;
        let authorized_flag = contract
            .authorized_user(&address)
            .await
            .map_err(|err| connection_failed("authorization lookup failed", &err))?;

        let owner = owner_address == address;
        Ok(Handshake {
            address,
            owner,
            authorized: authorized_flag || owner,
            contract: Arc::new(contract),
        })
    }

    /// Returns the session to its initial empty state.
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        *state = SessionState::empty();
        tracing::info!("session.disconnected");
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &SessionState<W::Ledger>) -> SessionSnapshot {
        SessionSnapshot {
            wallet_address: state.wallet_address.clone(),
            connected: state.connected,
            owner: state.owner,
            authorized: state.authorized,
            busy: self.activity.is_busy(),
        }
    }

    pub async fn require_connected(&self) -> Result<Arc<W::Ledger>, BridgeError> {
        let state = self.state.read().await;
        connected_contract(&state)
    }

    pub async fn require_authorized(&self) -> Result<Arc<W::Ledger>, BridgeError> {
        let state = self.state.read().await;
        let contract = connected_contract(&state)?;
        if !state.authorized {
            return Err(BridgeError::new(
                ErrorKind::Unauthorized,
                "connected account is not an authorized provider",
            ));
        }
        Ok(contract)
    }

    pub async fn require_owner(&self) -> Result<Arc<W::Ledger>, BridgeError> {
        let state = self.state.read().await;
        let contract = connected_contract(&state)?;
        if !state.owner {
            return Err(BridgeError::new(
                ErrorKind::NotOwner,
                "connected account is not the contract owner",
            ));
        }
        Ok(contract)
    }
}

fn connected_contract<L>(state: &SessionState<L>) -> Result<Arc<L>, BridgeError> {
    match (state.connected, state.contract.as_ref()) {
        (true, Some(contract)) => Ok(contract.clone()),
        _ => Err(BridgeError::new(
            ErrorKind::NotConnected,
            "wallet session is not connected",
        )),
    }
}

fn connection_failed(step: &str, err: &RpcError) -> (BridgeError, &'static str) {
    (
        BridgeError::with_reason(
            ErrorKind::ConnectionFailed,
            err.reason(),
            format!("{}: {}", step, err),
        ),
        err.outcome(),
    )
}
