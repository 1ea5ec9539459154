use crate::document::Service;
use crate::identifier::Network;
use crate::key::PublicKey;
use bitcoin::address::Address;
use bitcoin::CompressedPublicKey;
use onlyerror::Error;
use secp256k1::Secp256k1;
use std::collections::HashMap;
use std::{fmt, str::FromStr};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Invalid beacon type
    #[error("Invalid beacon type `{0}`")]
    InvalidBeaconType(String),

    /// Beacon service endpoint must be a BIP21 string
    InvalidBeaconDescriptor,

    /// Invalid BIP21 address.
    InvalidBip21,

    /// Bitcoin Address Parse error
    AddressParse(#[from] bitcoin::address::ParseError),

    /// Invalid beacon service
    #[error("Beacon service `{0}`: {1}")]
    InvalidService(String, Box<Error>),
}

/// Extension trait for [`Address`]. Allows parsing from and formatting as a [BIP21] URI.
///
/// [BIP21]: https://github.com/bitcoin/bips/blob/master/bip-0021.mediawiki
pub trait AddressExt {
    fn from_bip21(uri: &str, network: bitcoin::Network) -> Result<Self, Error>
    where
        Self: Sized;

    fn to_bip21(&self) -> String;
}

impl AddressExt for Address {
    fn from_bip21(uri: &str, network: bitcoin::Network) -> Result<Self, Error> {
        let address = uri.strip_prefix("bitcoin:").ok_or(Error::InvalidBip21)?;
        let address = address
            .split_once('?')
            .map(|(addr, _params)| addr)
            .unwrap_or(address);

        Ok(address.parse::<Address<_>>()?.require_network(network)?)
    }

    fn to_bip21(&self) -> String {
        format!("bitcoin:{self}")
    }
}

/// The closed set of beacon types.
///
/// Only [`BeaconType::Singleton`] has a working announcement and resolution path; the aggregate
/// variants are reported as not yet implemented wherever they are encountered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeaconType {
    Singleton,
    CidAggregate,
    SmtAggregate,
}

impl FromStr for BeaconType {
    type Err = Error;

    fn from_str(ty: &str) -> Result<Self, Self::Err> {
        match ty {
            "SingletonBeacon" => Ok(Self::Singleton),
            "CIDAggregateBeacon" => Ok(Self::CidAggregate),
            "SMTAggregateBeacon" => Ok(Self::SmtAggregate),
            _ => Err(Error::InvalidBeaconType(ty.to_string())),
        }
    }
}

impl fmt::Display for BeaconType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => f.write_str("SingletonBeacon"),
            Self::CidAggregate => f.write_str("CIDAggregateBeacon"),
            Self::SmtAggregate => f.write_str("SMTAggregateBeacon"),
        }
    }
}

/// A beacon service with its BIP21 endpoint resolved to an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconService {
    id: String,
    ty: BeaconType,
    service_endpoint: String,
    address: Address,
}

impl BeaconService {
    /// Parse a beacon service, requiring its address to belong to `network`.
    pub fn from_service(service: &Service, network: Network) -> Result<Self, Error> {
        Self::parse(service, network)
            .map_err(|err| Error::InvalidService(service.id.clone(), Box::new(err)))
    }

    fn parse(service: &Service, network: Network) -> Result<Self, Error> {
        let ty = service.service_type.parse()?;
        let service_endpoint = service
            .service_endpoint
            .as_str()
            .ok_or(Error::InvalidBeaconDescriptor)?
            .to_string();
        let address = Address::from_bip21(&service_endpoint, network.into())?;

        Ok(Self {
            id: service.id.clone(),
            ty,
            service_endpoint,
            address,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn beacon_type(&self) -> BeaconType {
        self.ty
    }

    pub fn service_endpoint(&self) -> &str {
        &self.service_endpoint
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// Beacons keyed by the string form of their address, as reported by the node.
pub(crate) fn beacon_address_map(beacons: &[BeaconService]) -> HashMap<String, BeaconService> {
    beacons
        .iter()
        .map(|beacon| (beacon.address.to_string(), beacon.clone()))
        .collect()
}

/// The three initial beacon addresses of a key identifier, in their fixed order:
/// P2PKH, P2WPKH and P2TR (key-path only, x-only internal key).
pub fn initial_beacon_addresses(
    public_key: &PublicKey,
    network: Network,
) -> [(&'static str, Address); 3] {
    let network = bitcoin::Network::from(network);
    let compressed = CompressedPublicKey(*public_key);
    let secp = Secp256k1::verification_only();

    [
        (
            "#initialP2PKH",
            Address::p2pkh(compressed.pubkey_hash(), network),
        ),
        ("#initialP2WPKH", Address::p2wpkh(&compressed, network)),
        (
            "#initialP2TR",
            Address::p2tr(&secp, public_key.x_only_public_key().0, None, network),
        ),
    ]
}
