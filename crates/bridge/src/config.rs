use std::collections::HashMap;
use std::time::Duration;

use medrec_contracts::Address;
use medrec_ledger::LedgerConfig;
use medrec_normalizer::DisplayZone;
use medrec_upload::PinataConfig;

pub const DEFAULT_PINATA_UPLOAD_URL: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";
pub const DEFAULT_IPFS_GATEWAY_URL: &str = "https://gateway.pinata.cloud/ipfs";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub wallet_rpc_url: Option<String>,
    pub contract_address: Address,
    pub rpc_timeout_ms: u64,
    pub tx_confirmation_timeout_ms: u64,
    pub tx_poll_interval_ms: u64,
    pub pinata_upload_url: String,
    pub pinata_api_key: String,
    pub pinata_secret_api_key: String,
    pub ipfs_gateway_url: String,
    pub upload_timeout_ms: u64,
    pub facility_cache_max_entries: usize,
    pub facility_cache_ttl_ms: u64,
    pub display_zone: DisplayZone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl BridgeConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("MEDREC_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let wallet_rpc_url = optional_nonempty(kv, "MEDREC_WALLET_RPC_URL");

        let contract_address = require_nonempty(kv, "MEDREC_CONTRACT_ADDRESS")?;
        let contract_address = Address::parse(&contract_address).map_err(|_| StartupError {
            code: "ERR_INVALID_CONTRACT_ADDRESS",
            message: "MEDREC_CONTRACT_ADDRESS must be 0x followed by 40 hex digits".to_string(),
        })?;

        let rpc_timeout_ms = parse_u64(kv.get("MEDREC_RPC_TIMEOUT_MS"), 15_000, "MEDREC_RPC_TIMEOUT_MS")?;
        let tx_confirmation_timeout_ms = parse_u64(
            kv.get("MEDREC_TX_CONFIRMATION_TIMEOUT_MS"),
            120_000,
            "MEDREC_TX_CONFIRMATION_TIMEOUT_MS",
        )?;
        if tx_confirmation_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MEDREC_TX_CONFIRMATION_TIMEOUT_MS must be >= 1".to_string(),
            });
        }
        let tx_poll_interval_ms = parse_u64(
            kv.get("MEDREC_TX_POLL_INTERVAL_MS"),
            1_000,
            "MEDREC_TX_POLL_INTERVAL_MS",
        )?;
        if tx_poll_interval_ms == 0 || tx_poll_interval_ms > tx_confirmation_timeout_ms {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MEDREC_TX_POLL_INTERVAL_MS must be between 1 and the confirmation timeout"
                    .to_string(),
            });
        }

        let pinata_upload_url = optional_nonempty(kv, "MEDREC_PINATA_UPLOAD_URL")
            .unwrap_or_else(|| DEFAULT_PINATA_UPLOAD_URL.to_string());
        let pinata_api_key = require_nonempty(kv, "MEDREC_PINATA_API_KEY")?;
        let pinata_secret_api_key = require_nonempty(kv, "MEDREC_PINATA_SECRET_API_KEY")?;
        let ipfs_gateway_url = optional_nonempty(kv, "MEDREC_IPFS_GATEWAY_URL")
            .unwrap_or_else(|| DEFAULT_IPFS_GATEWAY_URL.to_string());

        for (key, url) in [
            ("MEDREC_WALLET_RPC_URL", wallet_rpc_url.as_deref()),
            ("MEDREC_PINATA_UPLOAD_URL", Some(pinata_upload_url.as_str())),
            ("MEDREC_IPFS_GATEWAY_URL", Some(ipfs_gateway_url.as_str())),
        ] {
            if let Some(url) = url
                && !is_http_url(url)
            {
                return Err(StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: format!("{} must be an http(s) URL", key),
                });
            }
        }

        let upload_timeout_ms = parse_u64(
            kv.get("MEDREC_UPLOAD_TIMEOUT_MS"),
            30_000,
            "MEDREC_UPLOAD_TIMEOUT_MS",
        )?;
        let facility_cache_max_entries = parse_usize(
            kv.get("MEDREC_FACILITY_CACHE_MAX_ENTRIES"),
            256,
            "MEDREC_FACILITY_CACHE_MAX_ENTRIES",
        )?;
        let facility_cache_ttl_ms = parse_u64(
            kv.get("MEDREC_FACILITY_CACHE_TTL_MS"),
            300_000,
            "MEDREC_FACILITY_CACHE_TTL_MS",
        )?;

        let display_zone = match optional_nonempty(kv, "MEDREC_DISPLAY_UTC_OFFSET_MINUTES") {
            None => DisplayZone::Local,
            Some(raw) => raw
                .parse::<i32>()
                .ok()
                .and_then(DisplayZone::from_offset_minutes)
                .ok_or_else(|| StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: "MEDREC_DISPLAY_UTC_OFFSET_MINUTES must be an offset within +/-1439 minutes"
                        .to_string(),
                })?,
        };

        Ok(Self {
            wallet_rpc_url,
            contract_address,
            rpc_timeout_ms,
            tx_confirmation_timeout_ms,
            tx_poll_interval_ms,
            pinata_upload_url,
            pinata_api_key,
            pinata_secret_api_key,
            ipfs_gateway_url,
            upload_timeout_ms,
            facility_cache_max_entries,
            facility_cache_ttl_ms,
            display_zone,
        })
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            confirmation_timeout: Duration::from_millis(self.tx_confirmation_timeout_ms),
            facility_cache_max_entries: self.facility_cache_max_entries,
            facility_cache_ttl: Duration::from_millis(self.facility_cache_ttl_ms),
        }
    }

    pub fn pinata_config(&self) -> PinataConfig {
        PinataConfig {
            upload_url: self.pinata_upload_url.clone(),
            api_key: self.pinata_api_key.clone(),
            api_secret: self.pinata_secret_api_key.clone(),
            timeout: Duration::from_millis(self.upload_timeout_ms),
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    for quote in ['"', '\''] {
        if s.len() >= 2
            && let Some(inner) = s.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    s.to_string()
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_nonempty(kv, key).ok_or_else(|| StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    })
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn is_http_url(s: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| s.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()))
}
