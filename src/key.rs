use crate::error::Btc1Error;
use base58::{FromBase58 as _, ToBase58 as _};
use bitcoin::bip32::{DerivationPath, Xpriv};
use onlyerror::Error;
use secp256k1::Secp256k1;
pub use secp256k1::{PublicKey, SecretKey, XOnlyPublicKey};
use std::str::FromStr as _;

/// Multikey header for a secp256k1 x-only public key (varint of multicodec `0x2561`).
///
/// Specified by [Data Integrity BIP340 Cryptosuites].
///
/// [Data Integrity BIP340 Cryptosuites]: https://dcdpr.github.io/data-integrity-schnorr-secp256k1/#multikey
const MULTIKEY_PREFIX: [u8; 2] = [0xe1, 0x4a];

#[derive(Error, Debug)]
pub enum Error {
    /// Failed to create public key from bytes
    InvalidBytesForPublicKey(#[source] secp256k1::Error),

    /// Failed to create secret key from bytes
    InvalidBytesForSecretKey(#[source] secp256k1::Error),

    /// Multikey must start with 'z' (base58-btc)
    MultibasePrefix,

    /// Failed to decode base58
    MultikeyBase58,

    /// Invalid Multikey prefix for secp256k1 x-only public key
    MultikeyPrefix,
}

/// BIP-340 Multikey encoding.
pub trait MultikeyExt {
    /// Decode a BIP-340 Multikey.
    fn from_multikey(multikey: &str) -> Result<Self, Error>
    where
        Self: Sized;

    /// Encode into a BIP-340 Multikey.
    fn to_multikey(&self) -> String;
}

impl MultikeyExt for XOnlyPublicKey {
    fn from_multikey(multikey: &str) -> Result<Self, Error> {
        let encoded = multikey.strip_prefix('z').ok_or(Error::MultibasePrefix)?;
        let data = encoded.from_base58().map_err(|_| Error::MultikeyBase58)?;

        match data.split_first_chunk::<2>() {
            Some((prefix, key)) if *prefix == MULTIKEY_PREFIX => {
                Self::from_slice(key).map_err(Error::InvalidBytesForPublicKey)
            }
            _ => Err(Error::MultikeyPrefix),
        }
    }

    fn to_multikey(&self) -> String {
        let mut data = Vec::with_capacity(MULTIKEY_PREFIX.len() + 32);
        data.extend_from_slice(&MULTIKEY_PREFIX);
        data.extend_from_slice(&self.serialize());

        format!("z{}", data.to_base58())
    }
}

pub trait PublicKeyExt {
    /// Encode the x-only form of this key into a BIP-340 Multikey.
    fn to_multikey(&self) -> String;
}

impl PublicKeyExt for PublicKey {
    fn to_multikey(&self) -> String {
        self.x_only_public_key().0.to_multikey()
    }
}

pub trait SecretKeyExt {
    /// Generate a new random secret key.
    fn generate() -> Self;
}

impl SecretKeyExt for SecretKey {
    fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;

        Self::new(&mut rng)
    }
}

/// Represents a key pair (public and secret key)
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// The public key
    pub public_key: PublicKey,
    /// The secret key
    pub secret_key: SecretKey,
}

impl KeyPair {
    /// Create a new key pair from a secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        Self {
            public_key,
            secret_key,
        }
    }

    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::generate())
    }
}

/// Where the signing key of an update invocation comes from.
///
/// Exactly one source must be present: raw entropy, a BIP32 seed, or a BIP39 mnemonic together
/// with a derivation path.
#[derive(Clone, Debug, Default)]
pub struct KeyMaterial {
    pub entropy: Option<[u8; 32]>,
    pub seed: Option<Vec<u8>>,
    pub mnemonic: Option<String>,
    pub derivation_path: Option<String>,
}

impl KeyMaterial {
    pub fn from_entropy(entropy: [u8; 32]) -> Self {
        Self {
            entropy: Some(entropy),
            ..Default::default()
        }
    }

    pub fn from_seed(seed: impl Into<Vec<u8>>) -> Self {
        Self {
            seed: Some(seed.into()),
            ..Default::default()
        }
    }

    pub fn from_mnemonic(mnemonic: impl Into<String>, derivation_path: impl Into<String>) -> Self {
        Self {
            mnemonic: Some(mnemonic.into()),
            derivation_path: Some(derivation_path.into()),
            ..Default::default()
        }
    }

    /// Derive the secret key, failing unless exactly one source was supplied.
    pub fn derive_secret_key(&self) -> Result<SecretKey, Btc1Error> {
        let hd = self.mnemonic.is_some() || self.derivation_path.is_some();
        let sources = [self.entropy.is_some(), self.seed.is_some(), hd];

        match sources.iter().filter(|present| **present).count() {
            0 => {
                return Err(Btc1Error::InvalidKeyMaterial(
                    "One of entropy, seed or mnemonic with path is required".into(),
                ));
            }
            1 => (),
            _ => {
                return Err(Btc1Error::InvalidKeyMaterial(
                    "Only one of entropy, seed or mnemonic with path may be given".into(),
                ));
            }
        }

        let secp = Secp256k1::new();

        if let Some(entropy) = &self.entropy {
            return SecretKey::from_slice(entropy)
                .map_err(|err| Btc1Error::InvalidKeyMaterial(format!("Invalid entropy: {err}")));
        }

        if let Some(seed) = &self.seed {
            let master = master_key(seed)?;
            return Ok(master.private_key);
        }

        let (Some(mnemonic), Some(path)) = (&self.mnemonic, &self.derivation_path) else {
            return Err(Btc1Error::InvalidKeyMaterial(
                "A mnemonic requires a derivation path".into(),
            ));
        };

        let mnemonic = bip39::Mnemonic::parse(mnemonic)
            .map_err(|err| Btc1Error::InvalidKeyMaterial(format!("Invalid mnemonic: {err}")))?;
        let path = DerivationPath::from_str(path).map_err(|err| {
            Btc1Error::InvalidKeyMaterial(format!("Invalid derivation path: {err}"))
        })?;

        let child = master_key(&mnemonic.to_seed(""))?
            .derive_priv(&secp, &path)
            .map_err(|err| Btc1Error::InvalidKeyMaterial(format!("Derivation failed: {err}")))?;

        Ok(child.private_key)
    }
}

fn master_key(seed: &[u8]) -> Result<Xpriv, Btc1Error> {
    // The network only affects xpriv serialization, which is never exposed here.
    Xpriv::new_master(bitcoin::NetworkKind::Main, seed)
        .map_err(|err| Btc1Error::InvalidKeyMaterial(format!("Invalid seed: {err}")))
}
