use std::future::Future;
use std::time::Duration;

use medrec_contracts::Address;

use crate::contract::{HealthcareLedger, RpcContract};
use crate::rpc::{JsonRpcClient, RpcError};

/// Account access plus contract binding, the two things a session needs
/// from an injected wallet.
pub trait WalletProvider: Send + Sync {
    type Ledger: HealthcareLedger + 'static;

    /// May prompt the user; a declined prompt surfaces as `RpcError::Rejected`.
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<Address>, RpcError>> + Send;

    fn bind_contract(&self, contract: &Address, signer: &Address) -> Self::Ledger;
}

#[derive(Clone)]
pub struct RpcWallet {
    rpc: JsonRpcClient,
    poll_interval: Duration,
}

impl RpcWallet {
    pub fn new(rpc: JsonRpcClient, poll_interval: Duration) -> Self {
        Self { rpc, poll_interval }
    }
}

impl WalletProvider for RpcWallet {
    type Ledger = RpcContract;

    async fn request_accounts(&self) -> Result<Vec<Address>, RpcError> {
        let raw: Vec<String> = self
            .rpc
            .call("eth_requestAccounts", serde_json::json!([]))
            .await?;

        raw.iter()
            .map(|account| {
                Address::parse(account).map_err(|_| {
                    RpcError::InvalidResponse(format!("wallet returned malformed account `{}`", account))
                })
            })
            .collect()
    }

    fn bind_contract(&self, contract: &Address, signer: &Address) -> RpcContract {
        RpcContract::new(
            self.rpc.clone(),
            contract.clone(),
            signer.clone(),
            self.poll_interval,
        )
    }
}
