//! Choosing the last block a resolution looks at.

use super::ChainReader;
use crate::error::Btc1Error;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Confirmations a block needs before resolution without a version time trusts it.
pub const DEFAULT_MIN_CONFIRMATIONS: i64 = 7;

/// Find the target block height by walking back from the chain tip.
///
/// With a `version_time`, the result is the highest block whose timestamp is not after it.
/// Without one, it is the highest block with more than `min_confirmations` confirmations.
/// The walk stops at the genesis block either way.
pub fn target_block_height(
    reader: &dyn ChainReader,
    version_time: Option<DateTime<Utc>>,
    min_confirmations: i64,
) -> Result<u64, Btc1Error> {
    let info = reader.get_blockchain_info()?;
    let count = reader.get_block_count()?;
    if info.blocks != count {
        return Err(Btc1Error::BlockchainUnavailable(format!(
            "Chain height {} disagrees with block count {count}",
            info.blocks
        )));
    }

    let mut height = count;
    loop {
        let block = reader.get_block_at(height)?;
        let too_recent = match version_time {
            Some(time) => block.time > time.timestamp(),
            None => block.confirmations <= min_confirmations,
        };
        if !too_recent || height == 0 {
            break;
        }
        height -= 1;
    }

    debug!(tip = count, height, "Target block height");

    Ok(height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory::{BLOCK_INTERVAL, GENESIS_TIME, MemoryChain};
    use crate::blockchain::{Block, BlockchainInfo, Error, SignedTransaction, Transaction};
    use crate::blockchain::{TxInput, TxOutput, Unspent};
    use crate::identifier::Network;
    use bitcoin::{BlockHash, Txid};

    fn time(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_by_time() {
        let chain = MemoryChain::new(Network::Regtest);
        chain.mine_blocks(20).unwrap();

        let at = |secs| target_block_height(&chain, Some(time(secs)), 7).unwrap();

        assert_eq!(at(GENESIS_TIME + 5 * BLOCK_INTERVAL), 5);
        assert_eq!(at(GENESIS_TIME + 5 * BLOCK_INTERVAL + 1), 5);
        assert_eq!(at(GENESIS_TIME + 6 * BLOCK_INTERVAL - 1), 5);
        assert_eq!(at(GENESIS_TIME + 1_000 * BLOCK_INTERVAL), 20);
        assert_eq!(at(GENESIS_TIME - 1), 0);
    }

    #[test]
    fn test_by_confirmations() {
        let chain = MemoryChain::new(Network::Regtest);
        chain.mine_blocks(20).unwrap();

        // Block h has 21 - h confirmations.
        assert_eq!(target_block_height(&chain, None, 7).unwrap(), 13);
        assert_eq!(target_block_height(&chain, None, 0).unwrap(), 20);
    }

    #[test]
    fn test_short_chain_stops_at_genesis() {
        let chain = MemoryChain::new(Network::Regtest);
        chain.mine_blocks(3).unwrap();

        assert_eq!(target_block_height(&chain, None, 7).unwrap(), 0);
    }

    /// Reports a chain height that disagrees with its block count.
    struct Inconsistent(MemoryChain);

    impl ChainReader for Inconsistent {
        fn get_block_count(&self) -> Result<u64, Error> {
            Ok(self.0.get_block_count()? + 1)
        }

        fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
            self.0.get_block_hash(height)
        }

        fn get_block(&self, hash: &BlockHash) -> Result<Block, Error> {
            self.0.get_block(hash)
        }

        fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
            self.0.get_raw_transaction(txid)
        }

        fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
            self.0.get_blockchain_info()
        }

        fn list_unspent(&self, address: &str) -> Result<Vec<Unspent>, Error> {
            self.0.list_unspent(address)
        }

        fn create_raw_transaction(
            &self,
            inputs: &[TxInput],
            outputs: &[TxOutput],
        ) -> Result<String, Error> {
            self.0.create_raw_transaction(inputs, outputs)
        }

        fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, Error> {
            self.0.sign_raw_transaction(hex)
        }

        fn send_raw_transaction(&self, hex: &str) -> Result<Txid, Error> {
            self.0.send_raw_transaction(hex)
        }
    }

    #[test]
    fn test_inconsistent_node() {
        let chain = Inconsistent(MemoryChain::new(Network::Regtest));

        assert!(matches!(
            target_block_height(&chain, None, 7),
            Err(Btc1Error::BlockchainUnavailable(_))
        ));
    }
}
