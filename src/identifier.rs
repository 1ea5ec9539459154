//! # DID:BTC1 Identifiers
//!
//! Parsing and construction of `did:btc1` identifiers.
//!
//! ## Identifier Format
//!
//! ```text
//! did:btc1[:<version>][:<network>]:<bech32(hrp, genesis bytes)>
//! ```
//!
//! - `version` is a positive integer, omitted when it is `1`.
//! - `network` is one of `mainnet`, `testnet`, `signet` or `regtest`, omitted for `mainnet`.
//! - `hrp` is `k` for key identifiers (33-byte compressed secp256k1 public key) and `x` for
//!   external identifiers (32-byte SHA-256 of the initial document).
//!
//! ## Examples
//!
//! ```rust
//! use did_btc1::identifier::{Did, DidVersion, Error, IdType, Network};
//!
//! let didstr = "did:btc1:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk";
//!
//! let did: Did = didstr.parse()?;
//! let components = did.components();
//!
//! assert_eq!(components.version(), DidVersion::ONE);
//! assert_eq!(components.network(), Network::Mainnet);
//! assert!(matches!(components.id_type(), IdType::Key(_)));
//! assert_eq!(components.encode(), didstr);
//!
//! # Ok::<(), Error>(())
//! ```

use crate::key::PublicKey;
use bech32::primitives::decode::{CheckedHrpstring, CheckedHrpstringError};
use bech32::{Bech32, Hrp};
use onlyerror::Error;
use std::num::NonZeroU64;
use std::{fmt, str::FromStr};

/// The DID method prefix for BTC1 identifiers
pub const DID_BTC1_PREFIX: &str = "did:btc1:";

/// The DID method name
pub const DID_METHOD: &str = "btc1";

/// Human-readable part for key-based DID identifiers
pub const HRP_KEY: &str = "k";

/// Human-readable part for external document-based DID identifiers
pub const HRP_EXTERNAL: &str = "x";

/// Expected length of a compressed secp256k1 public key
pub const SECP256K1_COMPRESSED_KEY_LEN: usize = 33;

/// Expected length of a SHA-256 hash
pub const SHA256_HASH_LEN: usize = 32;

/// Errors that can occur during DID identifier encoding/decoding
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid DID format
    #[error("Invalid DID format: {0}")]
    InvalidDidFormat(String),

    /// The method segment is not `btc1`
    #[error("DID method not supported: {0}")]
    MethodNotSupported(String),

    /// Invalid version number
    #[error("Invalid version: {0} (must be a positive integer)")]
    InvalidVersion(String),

    /// Invalid network name
    #[error("Invalid network: {0} (must be mainnet, testnet, signet or regtest)")]
    InvalidNetwork(String),

    /// Invalid human-readable part
    #[error("Invalid HRP: {0} (must be 'k' or 'x')")]
    InvalidHrp(String),

    /// Invalid genesis bytes length
    #[error("Invalid genesis bytes length: {0} (expected {1})")]
    InvalidGenesisLength(usize, usize),

    /// Bech32 decoding error
    #[error("Bech32 error: {0}")]
    Bech32(#[from] CheckedHrpstringError),
}

/// A parsed `did:btc1` identifier.
///
/// Keeps the exact string it was parsed from, so a resolved document can carry the identifier
/// the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    encoded: String,
    components: DidComponents,
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(did: &str) -> Result<Self, Self::Err> {
        let components = parse_did_identifier(did)?;

        Ok(Self {
            encoded: did.to_string(),
            components,
        })
    }
}

impl From<DidComponents> for Did {
    fn from(components: DidComponents) -> Self {
        Self {
            encoded: components.encode(),
            components,
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl Did {
    pub fn encode(&self) -> &str {
        &self.encoded
    }

    pub fn components(&self) -> &DidComponents {
        &self.components
    }

    pub fn network(&self) -> Network {
        self.components.network
    }

    /// The public key committed to by a key identifier, if it is a valid curve point.
    pub fn public_key(&self) -> Option<PublicKey> {
        match self.components.id_type {
            IdType::Key(key) => PublicKey::from_slice(&key).ok(),
            IdType::External(_) => None,
        }
    }
}

/// DID:BTC1 identifier version. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DidVersion(NonZeroU64);

impl DidVersion {
    pub const ONE: Self = Self(NonZeroU64::MIN);

    pub fn new(version: u64) -> Result<Self, Error> {
        NonZeroU64::new(version)
            .map(Self)
            .ok_or_else(|| Error::InvalidVersion(version.to_string()))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for DidVersion {
    fn default() -> Self {
        Self::ONE
    }
}

impl FromStr for DidVersion {
    type Err = Error;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let number = version
            .parse::<u64>()
            .map_err(|_| Error::InvalidVersion(version.to_string()))?;

        Self::new(number)
    }
}

impl fmt::Display for DidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitcoin networks supported by DID:BTC1
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Bitcoin mainnet
    #[default]
    Mainnet,
    /// Bitcoin testnet
    Testnet,
    /// Bitcoin signet
    Signet,
    /// Bitcoin regtest
    Regtest,
}

impl Network {
    pub const ALL: [Self; 4] = [Self::Mainnet, Self::Testnet, Self::Signet, Self::Regtest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(network: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == network)
            .ok_or_else(|| Error::InvalidNetwork(network.to_string()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::Bitcoin,
            Network::Testnet => Self::Testnet,
            Network::Signet => Self::Signet,
            Network::Regtest => Self::Regtest,
        }
    }
}

/// Type of DID identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    /// Key-based identifier (secp256k1 public key)
    Key([u8; SECP256K1_COMPRESSED_KEY_LEN]),
    /// External document-based identifier (hash of external document)
    External([u8; SHA256_HASH_LEN]),
}

impl From<PublicKey> for IdType {
    fn from(key: PublicKey) -> Self {
        Self::Key(key.serialize())
    }
}

impl IdType {
    /// Build an identifier type from a human-readable part and the genesis bytes it encodes.
    pub fn from_hrp(hrp: &str, genesis_bytes: &[u8]) -> Result<Self, Error> {
        match hrp {
            HRP_KEY => genesis_bytes.try_into().map(Self::Key).map_err(|_| {
                Error::InvalidGenesisLength(genesis_bytes.len(), SECP256K1_COMPRESSED_KEY_LEN)
            }),
            HRP_EXTERNAL => genesis_bytes.try_into().map(Self::External).map_err(|_| {
                Error::InvalidGenesisLength(genesis_bytes.len(), SHA256_HASH_LEN)
            }),
            _ => Err(Error::InvalidHrp(hrp.to_string())),
        }
    }

    /// Get the human-readable part for this identifier type
    pub fn hrp(&self) -> &'static str {
        match self {
            IdType::Key(_) => HRP_KEY,
            IdType::External(_) => HRP_EXTERNAL,
        }
    }

    pub fn genesis_bytes(&self) -> &[u8] {
        match self {
            IdType::Key(key) => &key[..],
            IdType::External(hash) => &hash[..],
        }
    }
}

/// Components of a parsed DID:BTC1 identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DidComponents {
    version: DidVersion,
    network: Network,
    id_type: IdType,
}

impl DidComponents {
    pub fn new(version: DidVersion, network: Network, id_type: IdType) -> Self {
        Self {
            version,
            network,
            id_type,
        }
    }

    pub fn version(&self) -> DidVersion {
        self.version
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn genesis_bytes(&self) -> &[u8] {
        self.id_type.genesis_bytes()
    }

    /// Encode into the canonical identifier string.
    ///
    /// `:<version>` is emitted only when the version is greater than one and `:<network>`
    /// only when the network is not mainnet.
    pub fn encode(&self) -> String {
        let mut did = String::from(DID_BTC1_PREFIX);

        if self.version != DidVersion::ONE {
            did.push_str(&format!("{}:", self.version));
        }
        if self.network != Network::Mainnet {
            did.push_str(&format!("{}:", self.network));
        }

        // Both HRPs are single lowercase ASCII characters, and genesis bytes are at most 33
        // bytes, far below the bech32 code length limit.
        let hrp = Hrp::parse_unchecked(self.id_type.hrp());
        let bech32_part = bech32::encode::<Bech32>(hrp, self.genesis_bytes())
            .expect("genesis bytes fit in a bech32 string");
        did.push_str(&bech32_part);

        did
    }
}

/// Parse a DID:BTC1 identifier string into its components
///
/// # Examples
///
/// ```rust
/// use did_btc1::identifier::{parse_did_identifier, DidVersion, Error, IdType, Network};
///
/// let did = "did:btc1:2:regtest:x1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqya4rhx";
/// let components = parse_did_identifier(did)?;
///
/// assert_eq!(components.version().get(), 2);
/// assert_eq!(components.network(), Network::Regtest);
/// assert!(matches!(components.id_type(), IdType::External(_)));
/// # Ok::<(), Error>(())
/// ```
pub fn parse_did_identifier(did: &str) -> Result<DidComponents, Error> {
    let segments: Vec<&str> = did.split(':').collect();
    if segments.len() < 3 {
        return Err(Error::InvalidDidFormat(did.to_string()));
    }

    let (scheme, method) = (segments[0], segments[1]);
    if scheme != "did" {
        return Err(Error::InvalidDidFormat(format!(
            "invalid scheme `{scheme}`"
        )));
    }
    if method != DID_METHOD {
        return Err(Error::MethodNotSupported(method.to_string()));
    }

    // The bech32 part is always the last segment; what sits between it and the method is
    // zero, one or two positional fields.
    let (bech32_part, fields) = segments[2..]
        .split_last()
        .ok_or_else(|| Error::InvalidDidFormat(did.to_string()))?;

    let (version, network) = match fields {
        [] => (DidVersion::ONE, Network::Mainnet),
        [field] if !field.is_empty() && field.chars().all(|c| c.is_ascii_digit()) => {
            (field.parse()?, Network::Mainnet)
        }
        [field] => (DidVersion::ONE, field.parse()?),
        [version, network] => (version.parse()?, network.parse()?),
        _ => return Err(Error::InvalidDidFormat(did.to_string())),
    };

    let checked = CheckedHrpstring::new::<Bech32>(bech32_part)?;
    let genesis_bytes: Vec<u8> = checked.byte_iter().collect();
    let id_type = IdType::from_hrp(&checked.hrp().to_lowercase(), &genesis_bytes)?;

    Ok(DidComponents::new(version, network, id_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbtest::arbtest;

    const KEY_DID: &str = "did:btc1:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk";
    const KEY_HEX: &str = "029e0701b3e117a7358e9e37376b9174da15bbe12b4808c092c1c9ab4639494f33";

    fn key_id_type() -> IdType {
        IdType::Key(hex::decode(KEY_HEX).unwrap().try_into().unwrap())
    }

    #[test]
    fn test_parse_key_identifier() {
        let components = parse_did_identifier(KEY_DID).unwrap();

        assert_eq!(components.version(), DidVersion::ONE);
        assert_eq!(components.network(), Network::Mainnet);
        assert_eq!(components.id_type(), key_id_type());
        assert_eq!(hex::encode(components.genesis_bytes()), KEY_HEX);
    }

    #[test]
    fn test_construct_omits_defaults() {
        let mainnet = DidComponents::new(DidVersion::ONE, Network::Mainnet, key_id_type());
        assert_eq!(mainnet.encode(), KEY_DID);

        let regtest = DidComponents::new(DidVersion::ONE, Network::Regtest, key_id_type());
        assert!(regtest.encode().starts_with("did:btc1:regtest:k1"));

        let v2 = DidComponents::new(DidVersion::new(2).unwrap(), Network::Signet, key_id_type());
        assert!(v2.encode().starts_with("did:btc1:2:signet:k1"));
    }

    #[test]
    fn test_single_field_is_version_or_network() {
        let bech32_part = KEY_DID.strip_prefix(DID_BTC1_PREFIX).unwrap();

        let versioned = parse_did_identifier(&format!("did:btc1:3:{bech32_part}")).unwrap();
        assert_eq!(versioned.version().get(), 3);
        assert_eq!(versioned.network(), Network::Mainnet);

        let networked = parse_did_identifier(&format!("did:btc1:testnet:{bech32_part}")).unwrap();
        assert_eq!(networked.version(), DidVersion::ONE);
        assert_eq!(networked.network(), Network::Testnet);

        let explicit = parse_did_identifier(&format!("did:btc1:1:mainnet:{bech32_part}")).unwrap();
        assert_eq!(explicit, parse_did_identifier(KEY_DID).unwrap());
    }

    #[test]
    fn test_invalid_identifiers() {
        let bech32_part = KEY_DID.strip_prefix(DID_BTC1_PREFIX).unwrap();

        assert!(matches!(
            parse_did_identifier("did:btc1"),
            Err(Error::InvalidDidFormat(_))
        ));
        assert!(matches!(
            parse_did_identifier(&format!("urn:btc1:{bech32_part}")),
            Err(Error::InvalidDidFormat(_))
        ));
        assert!(matches!(
            parse_did_identifier(&format!("did:example:{bech32_part}")),
            Err(Error::MethodNotSupported(method)) if method == "example"
        ));
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1:1:mainnet:extra:{bech32_part}")),
            Err(Error::InvalidDidFormat(_))
        ));
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1:liquid:{bech32_part}")),
            Err(Error::InvalidNetwork(_))
        ));
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1:0:{bech32_part}")),
            Err(Error::InvalidVersion(_))
        ));
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1::{bech32_part}")),
            Err(Error::InvalidNetwork(network)) if network.is_empty()
        ));
        assert!(matches!(
            parse_did_identifier("did:btc1:k1notbech32"),
            Err(Error::Bech32(_))
        ));
    }

    #[test]
    fn test_invalid_hrp_and_length() {
        let wrong_hrp = bech32::encode::<Bech32>(Hrp::parse_unchecked("q"), &[0; 32]).unwrap();
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1:{wrong_hrp}")),
            Err(Error::InvalidHrp(hrp)) if hrp == "q"
        ));

        let short_key = bech32::encode::<Bech32>(Hrp::parse_unchecked("k"), &[2; 32]).unwrap();
        assert!(matches!(
            parse_did_identifier(&format!("did:btc1:{short_key}")),
            Err(Error::InvalidGenesisLength(32, 33))
        ));
    }

    #[test]
    fn test_did_public_key() {
        let did: Did = KEY_DID.parse().unwrap();
        assert_eq!(hex::encode(did.public_key().unwrap().serialize()), KEY_HEX);

        let external = Did::from(DidComponents::new(
            DidVersion::ONE,
            Network::Regtest,
            IdType::External([7; SHA256_HASH_LEN]),
        ));
        assert!(external.public_key().is_none());
        assert_eq!(external.to_string(), external.encode());
    }

    #[test]
    fn arbtest_construct_parse_round_trip() {
        arbtest(|u| {
            let version = DidVersion::new(u.int_in_range(1..=u64::MAX)?).unwrap();
            let network = *u.choose(&Network::ALL)?;
            let id_type = if u.arbitrary()? {
                IdType::Key(u.arbitrary()?)
            } else {
                IdType::External(u.arbitrary()?)
            };

            let components = DidComponents::new(version, network, id_type);
            let parsed = parse_did_identifier(&components.encode()).unwrap();
            assert_eq!(parsed, components);

            Ok(())
        });
    }
}
