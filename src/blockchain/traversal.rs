//! Walking the chain from the initial document to the requested version.
//!
//! Blocks are visited in height order. Each beacon signal yields at most one update; updates are
//! applied in the order their signals appear. A block is applied as a whole or not at all.

use super::ChainReader;
use super::signals::{BeaconSignal, scan_block};
use crate::beacon::{BeaconType, beacon_address_map};
use crate::canonical_hash::Sha256Hash;
use crate::document::Document;
use crate::error::Btc1Error;
use crate::identifier::Did;
use crate::store::{DocumentStore, cid_for_hash};
use crate::update::{Update, apply_update};
use rayon::ThreadPoolBuilder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The accumulator of one traversal.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionState {
    document: Document,
    version_id: u64,
    block_height: Option<u64>,
    update_hash_history: Vec<Sha256Hash>,
}

impl ResolutionState {
    /// The state of a freshly resolved initial document.
    pub fn initial(document: Document) -> Self {
        Self {
            document,
            version_id: 1,
            block_height: None,
            update_hash_history: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn version_id(&self) -> u64 {
        self.version_id
    }

    /// The last block traversed, if any.
    pub fn block_height(&self) -> Option<u64> {
        self.block_height
    }

    /// Hashes of the applied updates; entry `i` produced version `i + 2`.
    pub fn update_hash_history(&self) -> &[Sha256Hash] {
        &self.update_hash_history
    }
}

/// Where a traversal stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetCondition {
    /// Stop once this version is reached; fail if the target height passes first.
    Version { version_id: u64, block_height: u64 },

    /// Apply every update confirmed up to this height.
    BlockHeight(u64),
}

impl TargetCondition {
    fn block_height(&self) -> u64 {
        match self {
            Self::Version { block_height, .. } | Self::BlockHeight(block_height) => *block_height,
        }
    }

    fn is_reached(&self, state: &ResolutionState) -> bool {
        match self {
            Self::Version { version_id, .. } => state.version_id >= *version_id,
            Self::BlockHeight(_) => false,
        }
    }
}

/// Everything a traversal reads, besides the state it advances.
pub struct Traverser<'a> {
    pub did: &'a Did,
    pub reader: &'a dyn ChainReader,
    pub store: &'a dyn DocumentStore,

    /// Updates supplied out of band, keyed by update hash.
    pub sidecar_updates: &'a HashMap<Sha256Hash, Update>,

    pub start_block_height: u64,
    pub max_concurrent_lookups: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<&'a AtomicBool>,
}

impl Traverser<'_> {
    /// Advance `state` block by block until `target` is met.
    pub fn traverse(
        &self,
        mut state: ResolutionState,
        target: TargetCondition,
    ) -> Result<ResolutionState, Btc1Error> {
        if target.is_reached(&state) {
            debug!(version_id = state.version_id, "Target version already reached");
            return Ok(state);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.max_concurrent_lookups.max(1))
            .build()
            .map_err(|err| Btc1Error::BlockchainUnavailable(format!("Thread pool: {err}")))?;

        for height in self.start_block_height..=target.block_height() {
            self.check_cancelled(height)?;

            let block = self.reader.get_block_at(height)?;
            let beacons =
                beacon_address_map(&state.document.beacon_services(self.did.network())?);
            let signals = scan_block(self.reader, &block, &beacons, &pool)?;

            let mut scratch = state.clone();
            for signal in &signals {
                self.process_signal(&mut scratch, signal)?;
                if target.is_reached(&scratch) {
                    break;
                }
            }
            scratch.block_height = Some(height);
            state = scratch;

            if target.is_reached(&state) {
                return Ok(state);
            }
        }

        match target {
            TargetCondition::Version { version_id, .. } => Err(Btc1Error::NotFound(format!(
                "Version {version_id} not found; latest confirmed version is {}",
                state.version_id
            ))),
            TargetCondition::BlockHeight(_) => Ok(state),
        }
    }

    fn check_cancelled(&self, height: u64) -> Result<(), Btc1Error> {
        if self.cancel.is_some_and(|cancel| cancel.load(Ordering::Relaxed)) {
            return Err(Btc1Error::Cancelled(format!(
                "Resolution cancelled before block {height}"
            )));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Btc1Error::Cancelled(format!(
                "Resolution deadline passed before block {height}"
            )));
        }

        Ok(())
    }

    fn process_signal(
        &self,
        state: &mut ResolutionState,
        signal: &BeaconSignal,
    ) -> Result<(), Btc1Error> {
        match signal.beacon_type {
            BeaconType::Singleton => {}
            BeaconType::CidAggregate | BeaconType::SmtAggregate => {
                return Err(Btc1Error::NotYetImplemented(format!(
                    "{} signal from `{}`",
                    signal.beacon_type, signal.beacon_id
                )));
            }
        }

        let Some(update_hash) = signal.update_hash() else {
            debug!(txid = %signal.tx.txid, reason = "no update hash", "Signal skipped");
            return Ok(());
        };
        let Some(update) = self.find_update(&update_hash)? else {
            warn!(txid = %signal.tx.txid, hash = %update_hash, reason = "update not found", "Signal skipped");
            return Ok(());
        };

        let version_id = update.target_version_id();
        if version_id <= state.version_id {
            let applied = version_id
                .checked_sub(2)
                .and_then(|index| state.update_hash_history.get(index as usize));

            return match applied {
                Some(applied) if *applied == update_hash => {
                    debug!(version_id, hash = %update_hash, reason = "duplicate", "Signal skipped");
                    Ok(())
                }
                Some(applied) => Err(Btc1Error::late_publishing(update_hash, *applied)),
                None => Err(Btc1Error::LatePublishingError(format!(
                    "Update {update_hash} targets version {version_id}, which no update produces"
                ))),
            };
        }
        if version_id > state.version_id + 1 {
            return Err(Btc1Error::LatePublishingError(format!(
                "Update {update_hash} targets version {version_id}; current version is {}",
                state.version_id
            )));
        }

        state.document = apply_update(self.did, &state.document, &update)?;
        state.version_id = version_id;
        state.update_hash_history.push(update_hash);
        info!(version_id, hash = %update_hash, txid = %signal.tx.txid, "Update applied");

        Ok(())
    }

    /// Look an announced update up in the sidecar data, then in the store.
    fn find_update(&self, update_hash: &Sha256Hash) -> Result<Option<Update>, Btc1Error> {
        if let Some(update) = self.sidecar_updates.get(update_hash) {
            return Ok(Some(update.clone()));
        }

        let Some(bytes) = self.store.get(&cid_for_hash(update_hash)) else {
            return Ok(None);
        };
        let json = serde_json::from_slice(&bytes)
            .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Stored update: {err}")))?;
        let update = Update::from_json_value(json)?;

        if update.update_hash() != *update_hash {
            return Err(Btc1Error::InvalidDidUpdate(format!(
                "Stored update hashes to {}, announced as {update_hash}",
                update.update_hash()
            )));
        }

        Ok(Some(update))
    }
}
