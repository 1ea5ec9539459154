//! A [`ChainReader`] over Bitcoin Core's JSON-RPC interface.

use super::{
    Block, BlockchainInfo, ChainReader, Error, SignedTransaction, Transaction, TxInput, TxOutput,
    Unspent,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bitcoin::{BlockHash, Txid};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::{env, fmt};
use tracing::{debug, warn};

pub const ENV_URL: &str = "BTC1_RPC_URL";
pub const ENV_USER: &str = "BTC1_RPC_USER";
pub const ENV_PASSWORD: &str = "BTC1_RPC_PASSWORD";
pub const ENV_TIMEOUT_SECS: &str = "BTC1_RPC_TIMEOUT_SECS";

/// Connection settings for a Bitcoin Core node.
///
/// The default targets a local regtest node as set up by Polar.
#[derive(Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:18443".into(),
            username: "polaruser".into(),
            password: "polarpass".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RpcConfig {
    /// The default configuration, overridden by `BTC1_RPC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_URL) {
            config.url = url;
        }
        if let Some(username) = lookup(ENV_USER) {
            config.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            config.password = password;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            match timeout.parse() {
                Ok(secs) => config.timeout = Duration::from_secs(secs),
                Err(err) => warn!(%timeout, %err, "Ignoring invalid {ENV_TIMEOUT_SECS}"),
            }
        }

        config
    }
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,

    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// A blocking JSON-RPC client.
pub struct RpcClient {
    config: RpcConfig,
    agent: ureq::Agent,
    authorization: String,
    next_id: AtomicU64,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    pub fn new(config: RpcConfig) -> Self {
        // Bitcoin Core reports RPC errors with non-2xx statuses and a JSON body.
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(config.timeout))
                .http_status_as_error(false)
                .build(),
        );
        let credentials = format!("{}:{}", config.username, config.password);
        let authorization = format!("Basic {}", STANDARD.encode(credentials));

        Self {
            config,
            agent,
            authorization,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Issue one call and decode its `result`.
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let started = Instant::now();
        let response = self.send(&request);
        let latency_ms = started.elapsed().as_millis() as u64;

        match &response {
            Ok(_) => debug!(method, latency_ms, "RPC call"),
            Err(err) => warn!(method, latency_ms, %err, "RPC call failed"),
        }

        let response = response?;
        if let Some(error) = response.error {
            return Err(Error::Rpc(error.code, error.message));
        }

        serde_json::from_value(response.result)
            .map_err(|err| Error::Response(method.to_string(), err.to_string()))
    }

    fn send(&self, request: &Value) -> Result<RpcResponse, Error> {
        let mut response = self
            .agent
            .post(&self.config.url)
            .header("Authorization", &self.authorization)
            .send_json(request)
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = response.status();
        response.body_mut().read_json().map_err(|err| {
            Error::Transport(format!("HTTP {status} without a JSON-RPC body: {err}"))
        })
    }
}

impl ChainReader for RpcClient {
    fn get_block_count(&self) -> Result<u64, Error> {
        self.call("getblockcount", json!([]))
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        self.call("getblockhash", json!([height]))
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Block, Error> {
        self.call("getblock", json!([hash, 2]))
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        self.call("getrawtransaction", json!([txid, true]))
    }

    fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        self.call("getblockchaininfo", json!([]))
    }

    fn list_unspent(&self, address: &str) -> Result<Vec<Unspent>, Error> {
        self.call("listunspent", json!([0, 9_999_999, [address]]))
    }

    fn create_raw_transaction(
        &self,
        inputs: &[TxInput],
        outputs: &[TxOutput],
    ) -> Result<String, Error> {
        let inputs: Vec<_> = inputs
            .iter()
            .map(|input| json!({"txid": input.txid, "vout": input.vout}))
            .collect();
        let outputs: Vec<_> = outputs
            .iter()
            .map(|output| match output {
                TxOutput::Address { address, amount } => json!({ address: amount.to_btc() }),
                TxOutput::Data(data) => json!({"data": hex::encode(data)}),
            })
            .collect();

        self.call("createrawtransaction", json!([inputs, outputs]))
    }

    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, Error> {
        self.call("signrawtransactionwithwallet", json!([hex]))
    }

    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, Error> {
        self.call("sendrawtransaction", json!([hex]))
    }
}
