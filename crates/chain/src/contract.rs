use std::future::Future;
use std::time::Duration;

use medrec_contracts::{Address, FacilityRef, RecordEncoding, RecordId, RecordWriteRequest};
use serde::Deserialize;

use crate::abi::{self, Token};
use crate::rpc::{JsonRpcClient, RpcError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Contract surface consumed by the client. Writes return as soon as the
/// transaction is accepted; callers must go through `wait_for_confirmation`
/// before treating them as done.
pub trait HealthcareLedger: Send + Sync {
    fn get_owner(&self) -> impl Future<Output = Result<Address, RpcError>> + Send;

    fn authorized_user(
        &self,
        account: &Address,
    ) -> impl Future<Output = Result<bool, RpcError>> + Send;

    fn authorize_the_provider(
        &self,
        provider: &Address,
    ) -> impl Future<Output = Result<TxHash, RpcError>> + Send;

    fn add_patient_record(
        &self,
        request: &RecordWriteRequest,
    ) -> impl Future<Output = Result<TxHash, RpcError>> + Send;

    fn fetch_all_records(
        &self,
        record_id: RecordId,
    ) -> impl Future<Output = Result<RecordEncoding, RpcError>> + Send;

    fn hospital_name(
        &self,
        facility: FacilityRef,
    ) -> impl Future<Output = Result<String, RpcError>> + Send;

    fn wait_for_confirmation(
        &self,
        tx: &TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<Confirmation, RpcError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

/// A contract handle bound to one signing account, talking JSON-RPC.
#[derive(Clone)]
pub struct RpcContract {
    rpc: JsonRpcClient,
    contract: Address,
    from: Address,
    poll_interval: Duration,
}

impl RpcContract {
    pub fn new(rpc: JsonRpcClient, contract: Address, from: Address, poll_interval: Duration) -> Self {
        Self {
            rpc,
            contract,
            from,
            poll_interval,
        }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    pub fn signer(&self) -> &Address {
        &self.from
    }

    async fn view(&self, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let raw: String = self
            .rpc
            .call(
                "eth_call",
                serde_json::json!([
                    {
                        "from": self.from.as_str(),
                        "to": self.contract.as_str(),
                        "data": abi::encode_hex(&data),
                    },
                    "latest"
                ]),
            )
            .await?;
        Ok(abi::decode_hex(&raw)?)
    }

    async fn send(&self, data: Vec<u8>) -> Result<TxHash, RpcError> {
        let hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                serde_json::json!([{
                    "from": self.from.as_str(),
                    "to": self.contract.as_str(),
                    "data": abi::encode_hex(&data),
                }]),
            )
            .await?;
        tracing::debug!(tx_hash = %hash, "chain.transaction_submitted");
        Ok(TxHash(hash))
    }

    async fn poll_receipt(&self, tx: &TxHash) -> Result<Confirmation, RpcError> {
        loop {
            let receipt: Option<Receipt> = self
                .rpc
                .call("eth_getTransactionReceipt", serde_json::json!([tx.0]))
                .await?;

            if let Some(receipt) = receipt {
                return match receipt.status.as_deref() {
                    Some("0x0") => Err(RpcError::Reverted {
                        tx_hash: tx.0.clone(),
                    }),
                    _ => Ok(Confirmation {
                        tx_hash: tx.clone(),
                        block_number: receipt.block_number.as_deref().and_then(parse_quantity),
                    }),
                };
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn parse_quantity(value: &str) -> Option<u64> {
    u64::from_str_radix(value.strip_prefix("0x")?, 16).ok()
}

impl HealthcareLedger for RpcContract {
    async fn get_owner(&self) -> Result<Address, RpcError> {
        let out = self
            .view(abi::encode_call(abi::SELECTOR_GET_OWNER, &[]))
            .await?;
        Ok(abi::decode_address(&out)?)
    }

    async fn authorized_user(&self, account: &Address) -> Result<bool, RpcError> {
        let out = self
            .view(abi::encode_call(
                abi::SELECTOR_AUTHORIZED_USER,
                &[Token::Address(account.clone())],
            ))
            .await?;
        Ok(abi::decode_bool(&out)?)
    }

    async fn authorize_the_provider(&self, provider: &Address) -> Result<TxHash, RpcError> {
        self.send(abi::encode_call(
            abi::SELECTOR_AUTHORIZE_THE_PROVIDER,
            &[Token::Address(provider.clone())],
        ))
        .await
    }

    async fn add_patient_record(&self, request: &RecordWriteRequest) -> Result<TxHash, RpcError> {
        self.send(abi::encode_call(
            abi::SELECTOR_ADD_PATIENT_RECORD,
            &[
                Token::Uint(request.record_id.get()),
                Token::String(request.patient_name.clone()),
                Token::String(request.diagnosis.clone()),
                Token::String(request.treatment.clone()),
                Token::Array(
                    request
                        .attachment_ids
                        .iter()
                        .cloned()
                        .map(Token::String)
                        .collect(),
                ),
            ],
        ))
        .await
    }

    async fn fetch_all_records(&self, record_id: RecordId) -> Result<RecordEncoding, RpcError> {
        let out = self
            .view(abi::encode_call(
                abi::SELECTOR_FETCH_ALL_RECORDS,
                &[Token::Uint(record_id.get())],
            ))
            .await?;

        // Older deployments return one delimited string instead of tuples.
        match abi::decode_records(&out) {
            Ok(records) => Ok(RecordEncoding::Current(records)),
            Err(tuple_err) => match abi::decode_string(&out) {
                Ok(legacy) => Ok(RecordEncoding::Legacy(legacy)),
                Err(_) => Err(tuple_err.into()),
            },
        }
    }

    async fn hospital_name(&self, facility: FacilityRef) -> Result<String, RpcError> {
        let out = self
            .view(abi::encode_call(
                abi::SELECTOR_GET_HOSPITAL_NAME,
                &[Token::Uint(facility.0)],
            ))
            .await?;
        Ok(abi::decode_string(&out)?)
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, RpcError> {
        match tokio::time::timeout(timeout, self.poll_receipt(tx)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConfirmationTimeout {
                tx_hash: tx.0.clone(),
            }),
        }
    }
}
