//! Finding beacon signals in a block.
//!
//! A transaction is a signal of a beacon when one of its inputs spends an output paying the
//! beacon's address. Looking that up takes the previous transaction of every input, so lookups
//! for one block are batched by previous txid and run on a bounded thread pool.

use super::{Block, ChainReader, Error, Transaction, Vin};
use crate::beacon::{BeaconService, BeaconType};
use crate::canonical_hash::Sha256Hash;
use bitcoin::Txid;
use bitcoin::opcodes::all::{OP_PUSHBYTES_32, OP_RETURN};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Evidence that a transaction spent from a beacon address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconSignal {
    pub beacon_id: String,
    pub beacon_type: BeaconType,
    pub tx: Transaction,
}

impl BeaconSignal {
    /// The 32-byte payload of the transaction's last `OP_RETURN OP_PUSHBYTES_32` output.
    pub fn update_hash(&self) -> Option<Sha256Hash> {
        self.tx.vout.iter().rev().find_map(|vout| {
            let script = hex::decode(&vout.script_pub_key.hex).ok()?;

            match script.as_slice() {
                [op_return, push, hash @ ..]
                    if *op_return == OP_RETURN.to_u8()
                        && *push == OP_PUSHBYTES_32.to_u8()
                        && hash.len() == 32 =>
                {
                    hash.try_into().ok().map(Sha256Hash)
                }
                _ => None,
            }
        })
    }
}

/// Scan the transactions of `block` for signals of `beacons` (keyed by address).
///
/// Signals are returned in block order. A transaction signals each beacon at most once. Coinbase
/// inputs and inputs whose previous transaction the node does not know are skipped; any other node
/// failure fails the scan.
pub fn scan_block(
    reader: &dyn ChainReader,
    block: &Block,
    beacons: &HashMap<String, BeaconService>,
    pool: &ThreadPool,
) -> Result<Vec<BeaconSignal>, Error> {
    let previous = fetch_previous_transactions(reader, block, pool)?;

    let mut signals = Vec::new();
    for tx in &block.tx {
        let mut signalled = HashSet::new();

        for vin in &tx.vin {
            let Vin::Spend { txid, vout } = vin else {
                continue;
            };
            let Some(address) = previous
                .get(txid)
                .and_then(|prev| prev.vout.iter().find(|out| out.n == *vout))
                .and_then(|out| out.script_pub_key.address.as_ref())
            else {
                continue;
            };
            let Some(beacon) = beacons.get(address) else {
                continue;
            };

            if signalled.insert(beacon.id().to_string()) {
                debug!(beacon_id = beacon.id(), txid = %tx.txid, %address, "Beacon signal found");
                signals.push(BeaconSignal {
                    beacon_id: beacon.id().to_string(),
                    beacon_type: beacon.beacon_type(),
                    tx: tx.clone(),
                });
            }
        }
    }

    info!(
        height = block.height,
        txs = block.tx.len(),
        signals = signals.len(),
        "Block scanned"
    );

    Ok(signals)
}

/// Previous transactions of every non-coinbase input in `block`, fetched concurrently.
fn fetch_previous_transactions(
    reader: &dyn ChainReader,
    block: &Block,
    pool: &ThreadPool,
) -> Result<HashMap<Txid, Transaction>, Error> {
    let mut seen = HashSet::new();
    let txids: Vec<Txid> = block
        .tx
        .iter()
        .flat_map(|tx| &tx.vin)
        .filter_map(|vin| match vin {
            Vin::Spend { txid, .. } => Some(*txid),
            Vin::Coinbase { .. } => None,
        })
        .filter(|txid| seen.insert(*txid))
        .collect();

    pool.install(|| {
        txids
            .par_iter()
            .filter_map(|txid| match reader.get_raw_transaction(txid) {
                Ok(tx) => Some(Ok((*txid, tx))),
                Err(err) if err.is_not_found() => {
                    debug!(%txid, %err, "Skipping input with unknown previous output");
                    None
                }
                Err(err) => Some(Err(err)),
            })
            .collect()
    })
}
