use crate::error::Btc1Error;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A SHA-256 digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Multibase (base58btc) form used for `sourceHash` and `targetHash`.
    pub fn to_multibase(&self) -> String {
        multibase::encode(multibase::Base::Base58Btc, self.0)
    }

    pub fn from_multibase(encoded: &str) -> Result<Self, Btc1Error> {
        let (_, bytes) = multibase::decode(encoded)
            .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Invalid multibase hash: {err}")))?;

        bytes.try_into().map(Self).map_err(|bytes: Vec<u8>| {
            Btc1Error::InvalidDidUpdate(format!("Hash must be 32 bytes, got {}", bytes.len()))
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// JSON Canonicalization Scheme (RFC 8785) serialization.
pub(crate) fn canonicalize(value: &Value) -> String {
    // A `Value` has no non-finite numbers or non-string keys, so JCS cannot fail.
    serde_jcs::to_string(value).expect("JSON is always valid JCS")
}

/// SHA-256 over the JCS form of `value`.
pub(crate) fn hash_json(value: &Value) -> Sha256Hash {
    Sha256Hash::digest(canonicalize(value))
}

pub(crate) trait CanonicalHash: AsRef<Value> {
    fn hash(&self) -> Sha256Hash {
        hash_json(self.as_ref())
    }
}
