//! Wallet and ledger boundary: JSON-RPC transport, the contract ABI codec and
//! transaction confirmation polling.

pub mod abi;
mod contract;
mod rpc;
mod wallet;

pub use contract::{Confirmation, HealthcareLedger, RpcContract, TxHash};
pub use rpc::{JsonRpcClient, RpcError};
pub use wallet::{RpcWallet, WalletProvider};
