//! Read access to a Bitcoin node, and the resolution machinery built on it.
//!
//! [`ChainReader`] mirrors the subset of the Bitcoin Core RPC interface that resolution and
//! beacon announcement need. The wire types follow Bitcoin Core's verbose JSON encodings.

use bitcoin::{Amount, BlockHash, Txid};
use onlyerror::Error;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod rpc;
pub mod signals;
pub mod target;
pub mod traversal;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node rejected the call
    #[error("RPC error {0}: {1}")]
    Rpc(i64, String),

    /// The node's answer could not be decoded
    #[error("Unexpected response to `{0}`: {1}")]
    Response(String, String),

    /// No block or transaction with this id
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Bitcoin Core's `RPC_INVALID_ADDRESS_OR_KEY`, returned for unknown transactions.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

impl Error {
    /// Whether the node answered that the requested object does not exist, as opposed to failing
    /// to answer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Rpc(RPC_INVALID_ADDRESS_OR_KEY, _))
    }
}

/// A transaction input, as reported by `getrawtransaction` and `getblock`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Vin {
    Coinbase { coinbase: String },
    Spend { txid: Txid, vout: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub value: Amount,

    pub n: u32,

    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Txid,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
}

/// A block with its transactions (`getblock` verbosity 2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,

    /// Unix timestamp of the block header.
    pub time: i64,

    /// `-1` for blocks that are no longer on the main chain.
    pub confirmations: i64,

    pub tx: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,

    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
}

/// A wallet output, as reported by `listunspent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub txid: Txid,
    pub vout: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub txid: Txid,
    pub vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOutput {
    /// Pay `amount` to an address.
    Address { address: String, amount: Amount },

    /// An `OP_RETURN` output carrying `data`.
    Data(Vec<u8>),
}

/// The node interface resolution and announcement run against.
///
/// Implementations must be shareable across threads: previous-output lookups of one block are
/// issued concurrently.
pub trait ChainReader: Sync {
    fn get_block_count(&self) -> Result<u64, Error>;

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error>;

    fn get_block(&self, hash: &BlockHash) -> Result<Block, Error>;

    fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction, Error>;

    fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error>;

    /// Unspent wallet outputs paying `address`.
    fn list_unspent(&self, address: &str) -> Result<Vec<Unspent>, Error>;

    /// Returns the unsigned transaction hex.
    fn create_raw_transaction(
        &self,
        inputs: &[TxInput],
        outputs: &[TxOutput],
    ) -> Result<String, Error>;

    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, Error>;

    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, Error>;

    /// The block at `height` on the main chain.
    fn get_block_at(&self, height: u64) -> Result<Block, Error> {
        self.get_block(&self.get_block_hash(height)?)
    }
}
