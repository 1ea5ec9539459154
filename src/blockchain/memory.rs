//! An in-memory chain for offline resolution and tests.
//!
//! Transactions are real consensus-encoded Bitcoin transactions; blocks are not. There is no
//! proof of work, no script validation and the wallet signs everything.

use super::{
    Block, BlockchainInfo, ChainReader, Error, ScriptPubKey, SignedTransaction, Transaction,
    TxInput, TxOutput, Unspent, Vin, Vout,
};
use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::hashes::{Hash as _, sha256d};
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, BlockHash, Network, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid,
    Witness, absolute,
};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Seconds between consecutive blocks.
pub const BLOCK_INTERVAL: i64 = 600;

/// Timestamp of the genesis block: 2025-01-01T00:00:00Z.
pub const GENESIS_TIME: i64 = 1_735_689_600;

#[derive(Debug, Default)]
struct State {
    blocks: Vec<Block>,
    transactions: HashMap<Txid, Transaction>,
    mempool: Vec<Transaction>,
    funding_nonce: u64,
}

/// A [`ChainReader`] over blocks held in memory.
///
/// Starts with an empty genesis block at height 0. Sent transactions wait in a mempool until
/// [`MemoryChain::mine_block`] confirms them.
#[derive(Debug)]
pub struct MemoryChain {
    network: Network,
    state: RwLock<State>,
}

impl MemoryChain {
    pub fn new(network: impl Into<Network>) -> Self {
        let chain = Self {
            network: network.into(),
            state: RwLock::default(),
        };

        if let Ok(mut state) = chain.state.write() {
            let genesis = new_block(0, Vec::new());
            state.blocks.push(genesis);
        }

        chain
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Queue a coinbase-style transaction paying `amount` to `address`.
    pub fn fund(&self, address: &Address, amount: Amount) -> Result<OutPoint, Error> {
        let mut state = self.write()?;
        state.funding_nonce += 1;

        let tx = bitcoin::Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(state.funding_nonce.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: amount,
                script_pubkey: address.script_pubkey(),
            }],
        };

        let tx = self.wire_transaction(&tx);
        let outpoint = OutPoint::new(tx.txid, 0);
        state.transactions.insert(tx.txid, tx.clone());
        state.mempool.push(tx);

        Ok(outpoint)
    }

    /// Queue an already decoded transaction, skipping every check.
    pub fn push_transaction(&self, tx: Transaction) -> Result<(), Error> {
        let mut state = self.write()?;
        state.transactions.insert(tx.txid, tx.clone());
        state.mempool.push(tx);

        Ok(())
    }

    /// Confirm the mempool in a new block and return its height.
    pub fn mine_block(&self) -> Result<u64, Error> {
        let mut state = self.write()?;
        let height = state.blocks.len() as u64;
        let txs = std::mem::take(&mut state.mempool);
        state.blocks.push(new_block(height, txs));

        Ok(height)
    }

    /// Mine `count` empty blocks.
    pub fn mine_blocks(&self, count: u64) -> Result<u64, Error> {
        let mut height = self.get_block_count()?;
        for _ in 0..count {
            height = self.mine_block()?;
        }

        Ok(height)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, Error> {
        self.state
            .read()
            .map_err(|_| Error::Transport("memory chain lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, Error> {
        self.state
            .write()
            .map_err(|_| Error::Transport("memory chain lock poisoned".into()))
    }

    fn wire_transaction(&self, tx: &bitcoin::Transaction) -> Transaction {
        let vin = tx
            .input
            .iter()
            .map(|input| {
                if input.previous_output.is_null() {
                    Vin::Coinbase {
                        coinbase: hex::encode(input.script_sig.as_bytes()),
                    }
                } else {
                    Vin::Spend {
                        txid: input.previous_output.txid,
                        vout: input.previous_output.vout,
                    }
                }
            })
            .collect();

        let vout = tx
            .output
            .iter()
            .zip(0..)
            .map(|(output, n)| Vout {
                value: output.value,
                n,
                script_pub_key: ScriptPubKey {
                    hex: hex::encode(output.script_pubkey.as_bytes()),
                    address: Address::from_script(&output.script_pubkey, self.network)
                        .ok()
                        .map(|address| address.to_string()),
                },
            })
            .collect();

        Transaction {
            txid: tx.compute_txid(),
            vin,
            vout,
        }
    }
}

fn new_block(height: u64, tx: Vec<Transaction>) -> Block {
    let hash = sha256d::Hash::hash(&height.to_le_bytes());

    Block {
        hash: BlockHash::from_raw_hash(hash),
        height,
        time: GENESIS_TIME + height as i64 * BLOCK_INTERVAL,
        confirmations: 0,
        tx,
    }
}

impl ChainReader for MemoryChain {
    fn get_block_count(&self) -> Result<u64, Error> {
        // The genesis block is always present.
        Ok(self.read()?.blocks.len() as u64 - 1)
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        self.read()?
            .blocks
            .get(height as usize)
            .map(|block| block.hash)
            .ok_or_else(|| Error::Rpc(-8, "Block height out of range".into()))
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Block, Error> {
        let state = self.read()?;
        let tip = state.blocks.len() as i64 - 1;

        let mut block = state
            .blocks
            .iter()
            .find(|block| block.hash == *hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {hash}")))?;
        block.confirmations = tip - block.height as i64 + 1;

        Ok(block)
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        self.read()?
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("transaction {txid}")))
    }

    fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        let state = self.read()?;
        let tip = state
            .blocks
            .last()
            .ok_or_else(|| Error::Response("getblockchaininfo".into(), "no blocks".into()))?;

        Ok(BlockchainInfo {
            chain: self.network.to_core_arg().to_string(),
            blocks: tip.height,
            best_block_hash: tip.hash,
        })
    }

    fn list_unspent(&self, address: &str) -> Result<Vec<Unspent>, Error> {
        let state = self.read()?;

        let spent: HashSet<_> = state
            .transactions
            .values()
            .flat_map(|tx| &tx.vin)
            .filter_map(|vin| match vin {
                Vin::Spend { txid, vout } => Some((*txid, *vout)),
                Vin::Coinbase { .. } => None,
            })
            .collect();

        let mut unspent: Vec<_> = state
            .transactions
            .values()
            .flat_map(|tx| tx.vout.iter().map(move |vout| (tx.txid, vout)))
            .filter(|(txid, vout)| {
                vout.script_pub_key.address.as_deref() == Some(address)
                    && !spent.contains(&(*txid, vout.n))
            })
            .map(|(txid, vout)| Unspent {
                txid,
                vout: vout.n,
                address: vout.script_pub_key.address.clone(),
                amount: vout.value,
            })
            .collect();
        unspent.sort_by_key(|utxo| (utxo.txid, utxo.vout));

        Ok(unspent)
    }

    fn create_raw_transaction(
        &self,
        inputs: &[TxInput],
        outputs: &[TxOutput],
    ) -> Result<String, Error> {
        let invalid = |err: String| Error::Rpc(-8, err);

        let input = inputs
            .iter()
            .map(|input| TxIn {
                previous_output: OutPoint::new(input.txid, input.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();

        let output = outputs
            .iter()
            .map(|output| match output {
                TxOutput::Address { address, amount } => {
                    let address = address
                        .parse::<Address<_>>()
                        .and_then(|address| address.require_network(self.network))
                        .map_err(|err| invalid(err.to_string()))?;

                    Ok(TxOut {
                        value: *amount,
                        script_pubkey: address.script_pubkey(),
                    })
                }
                TxOutput::Data(data) => {
                    let data = PushBytesBuf::try_from(data.clone())
                        .map_err(|err| invalid(err.to_string()))?;

                    Ok(TxOut {
                        value: Amount::ZERO,
                        script_pubkey: ScriptBuf::new_op_return(data),
                    })
                }
            })
            .collect::<Result<_, Error>>()?;

        Ok(serialize_hex(&bitcoin::Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input,
            output,
        }))
    }

    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, Error> {
        Ok(SignedTransaction {
            hex: hex.to_string(),
            complete: true,
        })
    }

    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, Error> {
        let tx: bitcoin::Transaction =
            deserialize_hex(hex).map_err(|err| Error::Rpc(-22, format!("TX decode failed: {err}")))?;

        if let Some(outpoint) = self.unspendable_inputs(&tx)?.first() {
            return Err(Error::Rpc(-25, format!("Missing or spent input {outpoint}")));
        }

        let tx = self.wire_transaction(&tx);
        let txid = tx.txid;
        self.push_transaction(tx)?;

        Ok(txid)
    }
}

impl MemoryChain {
    /// Inputs of `tx` that do not refer to an existing, unspent output.
    fn unspendable_inputs(&self, tx: &bitcoin::Transaction) -> Result<Vec<OutPoint>, Error> {
        let state = self.read()?;

        let spent: HashSet<_> = state
            .transactions
            .values()
            .flat_map(|tx| &tx.vin)
            .filter_map(|vin| match vin {
                Vin::Spend { txid, vout } => Some(OutPoint::new(*txid, *vout)),
                Vin::Coinbase { .. } => None,
            })
            .collect();

        Ok(tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| {
                let exists = state
                    .transactions
                    .get(&outpoint.txid)
                    .is_some_and(|prev| prev.vout.iter().any(|vout| vout.n == outpoint.vout));

                !exists || spent.contains(outpoint)
            })
            .collect())
    }
}
