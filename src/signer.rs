//! Signing keys behind an opaque reference.
//!
//! Proof creation only ever sees a [`KeyRef`]; secret keys stay inside the [`Signer`].

use crate::canonical_hash::Sha256Hash;
use crate::error::Btc1Error;
use crate::key::{MultikeyExt as _, SecretKey, SecretKeyExt as _, XOnlyPublicKey};
use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Secp256k1};
use std::collections::HashMap;
use std::fmt;

const KEY_REF_PREFIX: &str = "urn:mb:";

/// Reference to a key held by a [`Signer`]: `urn:mb:<multikey>` of its x-only public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyRef(String);

impl KeyRef {
    pub fn from_public_key(public_key: &XOnlyPublicKey) -> Self {
        Self(format!("{KEY_REF_PREFIX}{}", public_key.to_multikey()))
    }

    pub fn public_key(&self) -> Result<XOnlyPublicKey, Btc1Error> {
        let multikey = self
            .0
            .strip_prefix(KEY_REF_PREFIX)
            .ok_or_else(|| Btc1Error::InvalidPublicKey(format!("Invalid key reference `{self}`")))?;

        Ok(XOnlyPublicKey::from_multikey(multikey)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BIP340 Schnorr signing over 32-byte digests.
pub trait Signer {
    /// Take custody of a secret key.
    fn import_key(&mut self, secret_key: SecretKey) -> KeyRef;

    /// Return the secret key behind `key`, if held.
    fn export_key(&self, key: &KeyRef) -> Option<SecretKey>;

    /// Generate and keep a fresh key.
    fn generate_key(&mut self) -> KeyRef;

    fn sign(&self, key: &KeyRef, digest: &Sha256Hash) -> Result<Signature, Btc1Error>;

    /// Verification only needs the public key the reference encodes.
    fn verify(&self, key: &KeyRef, signature: &Signature, digest: &Sha256Hash) -> bool {
        key.public_key()
            .is_ok_and(|public_key| verify_schnorr(&public_key, signature, digest))
    }
}

pub(crate) fn verify_schnorr(
    public_key: &XOnlyPublicKey,
    signature: &Signature,
    digest: &Sha256Hash,
) -> bool {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(digest.0);

    secp.verify_schnorr(signature, &message, public_key).is_ok()
}

/// An in-memory [`Signer`].
#[derive(Default)]
pub struct KeyManager {
    keys: HashMap<KeyRef, Keypair>,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Signer for KeyManager {
    fn import_key(&mut self, secret_key: SecretKey) -> KeyRef {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let key = KeyRef::from_public_key(&keypair.x_only_public_key().0);

        self.keys.insert(key.clone(), keypair);
        key
    }

    fn export_key(&self, key: &KeyRef) -> Option<SecretKey> {
        self.keys.get(key).map(Keypair::secret_key)
    }

    fn generate_key(&mut self) -> KeyRef {
        self.import_key(SecretKey::generate())
    }

    fn sign(&self, key: &KeyRef, digest: &Sha256Hash) -> Result<Signature, Btc1Error> {
        let keypair = self
            .keys
            .get(key)
            .ok_or_else(|| Btc1Error::ProofGeneration(format!("No secret key for `{key}`")))?;

        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(digest.0);

        Ok(secp.sign_schnorr_no_aux_rand(&message, keypair))
    }
}
