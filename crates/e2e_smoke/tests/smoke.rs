use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use medrec_bridge::{BridgeConfig, MSG_PROVIDER_AUTHORIZED, MSG_RECORD_ADDED, RpcBridge};
use medrec_chain::abi::{self, Reader, Token, WORD};
use medrec_contracts::record::{FIELD_FACILITY, FIELD_PATIENT_NAME, FIELD_TIMESTAMP};
use medrec_contracts::{Address, FacilityRef, RawRecord, RawTimestamp};
use medrec_upload::AttachmentFile;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";
const OWNER: &str = "0x00000000000000000000000000000000000000aa";
const PROVIDER: &str = "0x3333333333333333333333333333333333333333";
const PINATA_KEY: &str = "smoke-key";
const PINATA_SECRET: &str = "smoke-secret";
const MINED_AT: u64 = 1_700_000_000;

#[derive(Clone, Default)]
struct Node {
    records: Arc<Mutex<Vec<RawRecord>>>,
    transactions: Arc<AtomicUsize>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_connect_upload_write_read_normalize() {
    let log_buf = init_test_tracing();
    log_buf
        .lock()
        .expect("log lock should be available")
        .clear();

    let patient_canary = "MEDREC_CANARY_PATIENT_7f3c2a91";
    let diagnosis_canary = "MEDREC_CANARY_DIAGNOSIS_b81e04d6";

    let node = Node::default();
    let node_app = Router::new()
        .route("/", post(json_rpc))
        .with_state(node.clone());
    let (node_addr, node_shutdown, node_task) = spawn_server(node_app).await;

    let pinata_app = Router::new().route("/pinning/pinFileToIPFS", post(pin_file));
    let (pinata_addr, pinata_shutdown, pinata_task) = spawn_server(pinata_app).await;

    let config = BridgeConfig::from_kv(&HashMap::from([
        (
            "MEDREC_WALLET_RPC_URL".to_string(),
            format!("http://{}/", node_addr),
        ),
        ("MEDREC_CONTRACT_ADDRESS".to_string(), CONTRACT.to_string()),
        (
            "MEDREC_PINATA_UPLOAD_URL".to_string(),
            format!("http://{}/pinning/pinFileToIPFS", pinata_addr),
        ),
        ("MEDREC_PINATA_API_KEY".to_string(), PINATA_KEY.to_string()),
        (
            "MEDREC_PINATA_SECRET_API_KEY".to_string(),
            PINATA_SECRET.to_string(),
        ),
        ("MEDREC_TX_POLL_INTERVAL_MS".to_string(), "10".to_string()),
        ("MEDREC_TX_CONFIRMATION_TIMEOUT_MS".to_string(), "5000".to_string()),
        ("MEDREC_DISPLAY_UTC_OFFSET_MINUTES".to_string(), "0".to_string()),
    ]))
    .expect("bridge config should be valid");

    let bridge = RpcBridge::from_config(&config).expect("bridge should init");

    let connected = bridge.activate().await;
    assert!(connected.success, "connect failed: {:?}", connected);
    assert_eq!(connected.message, "Wallet connected: 0x000000...0000aa");
    let session = bridge.session().await;
    assert!(session.owner && session.authorized);

    let form = medrec_bridge::RecordForm {
        record_id: "42".to_string(),
        patient_name: patient_canary.to_string(),
        diagnosis: diagnosis_canary.to_string(),
        treatment: "Rest".to_string(),
    };
    let files = vec![
        AttachmentFile::new("a", b"first scan".to_vec()).with_content_type("application/pdf"),
        AttachmentFile::new("b", b"second scan".to_vec()),
    ];

    let added = bridge.add_patient_record(&form, files).await;
    assert!(added.success, "write failed: {:?}", added);
    assert_eq!(added.message, MSG_RECORD_ADDED);
    assert_eq!(added.failed_uploads, 0);
    assert_eq!(added.tx_hash.as_deref(), Some("0xfeed"));
    assert_eq!(node.transactions.load(Ordering::SeqCst), 1);

    let view = bridge.view_patient_records("42").await;
    assert!(view.report.success, "read failed: {:?}", view.report);
    let records = view.records.expect("records should be present");
    assert_eq!(records.len(), 1);

    let record = &records.records[0];
    assert_eq!(record.fields.get(FIELD_PATIENT_NAME), Some(patient_canary));
    assert_eq!(record.fields.get(FIELD_FACILITY), Some("General Hospital"));
    assert_eq!(
        record.fields.get(FIELD_TIMESTAMP),
        Some("11/14/2023, 10:13:20 PM")
    );
    assert_eq!(
        record.ipfs_hashes,
        Some(vec!["Qa".to_string(), "Qb".to_string()])
    );
    assert_eq!(bridge.attachment_url("Qa"), "https://gateway.pinata.cloud/ipfs/Qa");

    let json = serde_json::to_value(&records).expect("records serialize");
    assert_eq!(json["records"][0]["ipfsHashes"], serde_json::json!(["Qa", "Qb"]));

    let malformed = bridge.authorize_provider("0x123").await;
    assert_eq!(malformed.code, Some("ERR_INVALID_ADDRESS"));
    assert_eq!(node.transactions.load(Ordering::SeqCst), 1);

    let granted = bridge.authorize_provider(&format!("  {}  ", PROVIDER)).await;
    assert!(granted.success, "grant failed: {:?}", granted);
    assert_eq!(granted.message, MSG_PROVIDER_AUTHORIZED);
    assert_eq!(node.transactions.load(Ordering::SeqCst), 2);

    let empty = bridge.view_patient_records("7").await;
    assert!(empty.report.success);
    assert!(empty.records.is_none());
    assert!(!bridge.is_busy());

    let _ = node_shutdown.send(());
    let _ = pinata_shutdown.send(());
    let _ = node_task.await;
    let _ = pinata_task.await;

    let logs = String::from_utf8(
        log_buf
            .lock()
            .expect("log lock should be available")
            .clone(),
    )
    .expect("logs should be utf-8");

    for canary in [patient_canary, diagnosis_canary] {
        assert!(
            !logs.contains(canary),
            "logs must not contain record content {}; logs:\n{}",
            canary,
            logs
        );
    }
}

async fn json_rpc(
    State(node): State<Node>,
    Json(req): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let result = match req["method"].as_str().unwrap_or_default() {
        "eth_requestAccounts" => serde_json::json!([OWNER]),
        "eth_call" => {
            let data = call_data(&req);
            let selector: [u8; 4] = data[..4].try_into().expect("selector");
            let out = match selector {
                abi::SELECTOR_GET_OWNER => abi::encode(&[Token::Address(
                    Address::parse(OWNER).expect("owner address"),
                )]),
                abi::SELECTOR_AUTHORIZED_USER => abi::encode(&[Token::Bool(false)]),
                abi::SELECTOR_GET_HOSPITAL_NAME => {
                    abi::encode(&[Token::String("General Hospital".to_string())])
                }
                abi::SELECTOR_FETCH_ALL_RECORDS => {
                    let wanted = Reader::new(&data[4..]).uint_at(0).expect("record id");
                    let records: Vec<_> = node
                        .records
                        .lock()
                        .expect("records lock")
                        .iter()
                        .filter(|r| r.record_key == Some(wanted))
                        .cloned()
                        .collect();
                    abi::encode_records(&records)
                }
                _ => Vec::new(),
            };
            serde_json::json!(abi::encode_hex(&out))
        }
        "eth_sendTransaction" => {
            let data = call_data(&req);
            if data[..4] == abi::SELECTOR_ADD_PATIENT_RECORD {
                let args = Reader::new(&data[4..]);
                let record = RawRecord {
                    record_key: Some(args.uint_at(0).expect("record id")),
                    patient_name: Some(args.string_at(0, WORD).expect("patient name")),
                    diagnosis: Some(args.string_at(0, 2 * WORD).expect("diagnosis")),
                    treatment: Some(args.string_at(0, 3 * WORD).expect("treatment")),
                    ipfs_hashes: Some(args.string_array_at(0, 4 * WORD).expect("hashes")),
                    facility_ref: Some(FacilityRef(1)),
                    timestamp: Some(RawTimestamp::Integer(MINED_AT)),
                };
                node.records.lock().expect("records lock").push(record);
            }
            node.transactions.fetch_add(1, Ordering::SeqCst);
            serde_json::json!("0xfeed")
        }
        "eth_getTransactionReceipt" => serde_json::json!({"status": "0x1", "blockNumber": "0x2a"}),
        _ => serde_json::Value::Null,
    };

    Json(serde_json::json!({"jsonrpc": "2.0", "id": req["id"].clone(), "result": result}))
}

fn call_data(req: &serde_json::Value) -> Vec<u8> {
    abi::decode_hex(req["params"][0]["data"].as_str().unwrap_or("0x")).expect("call data is hex")
}

async fn pin_file(headers: HeaderMap, body: Bytes) -> Response {
    let key_ok = headers.get("pinata_api_key").and_then(|v| v.to_str().ok()) == Some(PINATA_KEY);
    let secret_ok = headers
        .get("pinata_secret_api_key")
        .and_then(|v| v.to_str().ok())
        == Some(PINATA_SECRET);
    if !key_ok || !secret_ok {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let body = String::from_utf8_lossy(&body);
    let name = body
        .split("filename=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or_default();

    Json(serde_json::json!({"IpfsHash": format!("Q{}", name), "PinSize": 10})).into_response()
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (addr, shutdown_tx, handle)
}

#[derive(Clone)]
struct TestWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut lock = self
            .buf
            .lock()
            .map_err(|_| std::io::Error::other("log mutex poisoned"))?;
        lock.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_test_tracing() -> Arc<Mutex<Vec<u8>>> {
    static LOG_BUF: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

    LOG_BUF
        .get_or_init(|| {
            let buf = Arc::new(Mutex::new(Vec::new()));
            let make_writer = {
                let buf = buf.clone();
                move || TestWriter { buf: buf.clone() }
            };

            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
                .with_ansi(false)
                .with_writer(make_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber)
                .expect("global tracing subscriber should be set once");

            buf
        })
        .clone()
}
