//! Content-addressed document storage.
//!
//! Documents and updates are addressed by a CIDv1 (`raw` codec) over the `sha2-256` multihash of
//! their canonical bytes. For an external identifier the genesis bytes already are that SHA-256,
//! so the identifier alone locates its initial document.

use crate::canonical_hash::Sha256Hash;
use cid::Cid;
use multihash::Multihash;
use std::collections::HashMap;

/// Multicodec `raw`.
const RAW_CODEC: u64 = 0x55;

/// Multicodec `sha2-256`.
const SHA2_256_CODE: u64 = 0x12;

/// A content-addressable store.
pub trait DocumentStore {
    /// Fetch the bytes stored under `cid`, if present.
    fn get(&self, cid: &Cid) -> Option<Vec<u8>>;

    /// Store `bytes`, returning the CID they are addressed by.
    fn add(&mut self, bytes: &[u8]) -> Cid;
}

/// The CID addressing content whose SHA-256 is `hash`.
pub fn cid_for_hash(hash: &Sha256Hash) -> Cid {
    // 32 bytes always fit the 64-byte multihash.
    let multihash = Multihash::<64>::wrap(SHA2_256_CODE, hash.as_bytes())
        .expect("a SHA-256 digest fits in a 64-byte multihash");

    Cid::new_v1(RAW_CODEC, multihash)
}

/// A [`DocumentStore`] backed by a `HashMap`.
#[derive(Clone, Debug, Default)]
pub struct MemoryDocumentStore {
    blocks: HashMap<Cid, Vec<u8>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, cid: &Cid) -> Option<Vec<u8>> {
        self.blocks.get(cid).cloned()
    }

    fn add(&mut self, bytes: &[u8]) -> Cid {
        let cid = cid_for_hash(&Sha256Hash::digest(bytes));
        self.blocks.insert(cid, bytes.to_vec());

        cid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_for_hash() {
        let cid = cid_for_hash(&Sha256Hash::digest(b"hello"));

        assert_eq!(cid.version(), cid::Version::V1);
        assert_eq!(cid.codec(), RAW_CODEC);
        assert_eq!(cid.hash().code(), SHA2_256_CODE);
        assert_eq!(cid.hash().digest(), Sha256Hash::digest(b"hello").as_bytes());
        assert_eq!(
            cid.to_string(),
            "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq"
        );
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryDocumentStore::new();
        assert!(store.is_empty());

        let cid = store.add(b"{}");
        assert_eq!(cid, cid_for_hash(&Sha256Hash::digest(b"{}")));
        assert_eq!(store.get(&cid).as_deref(), Some(&b"{}"[..]));
        assert_eq!(store.len(), 1);

        let missing = cid_for_hash(&Sha256Hash::digest(b"missing"));
        assert_eq!(store.get(&missing), None);
    }
}
