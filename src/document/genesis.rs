//! Deterministic initial documents for key identifiers.

use super::{DID_BTC1_CONTEXT, DID_CORE_CONTEXT, Document, MULTIKEY_CONTEXT};
use crate::beacon::{AddressExt as _, BeaconType, initial_beacon_addresses};
use crate::error::Btc1Error;
use crate::identifier::{
    Did, DidComponents, DidVersion, IdType, Network, SECP256K1_COMPRESSED_KEY_LEN,
};
use crate::key::{PublicKey, PublicKeyExt as _};
use serde_json::{Value, json};

/// Create a key identifier and its initial document from a compressed public key.
///
/// This is a pure function of its inputs.
pub fn create_deterministic(
    public_key: &[u8],
    network: Network,
    version: DidVersion,
) -> Result<(Did, Document), Btc1Error> {
    if public_key.len() != SECP256K1_COMPRESSED_KEY_LEN {
        return Err(Btc1Error::InvalidPublicKey(format!(
            "Expected {SECP256K1_COMPRESSED_KEY_LEN} bytes, got {}",
            public_key.len()
        )));
    }
    let public_key = PublicKey::from_slice(public_key)
        .map_err(|err| Btc1Error::InvalidPublicKey(err.to_string()))?;

    let did = Did::from(DidComponents::new(version, network, IdType::from(public_key)));
    let document = deterministic_document(&did, &public_key)?;

    Ok((did, document))
}

/// Generate the initial document of a key identifier.
pub(crate) fn generate(did: &Did) -> Result<Document, Btc1Error> {
    let public_key = did.public_key().ok_or_else(|| {
        Btc1Error::InvalidPublicKey(format!("`{did}` does not commit to a valid public key"))
    })?;

    deterministic_document(did, &public_key)
}

fn deterministic_document(did: &Did, public_key: &PublicKey) -> Result<Document, Btc1Error> {
    let initial_key = json!(["#initialKey"]);

    Document::from_json_value(json!({
        "@context": [DID_CORE_CONTEXT, MULTIKEY_CONTEXT, DID_BTC1_CONTEXT],
        "id": did.encode(),
        "authentication": initial_key,
        "assertionMethod": initial_key,
        "capabilityInvocation": initial_key,
        "capabilityDelegation": initial_key,
        "verificationMethod": [{
            "id": "#initialKey",
            "type": "Multikey",
            "controller": did.encode(),
            "publicKeyMultibase": public_key.to_multikey(),
        }],
        "service": beacon_services(public_key, did.network()),
    }))
}

fn beacon_services(public_key: &PublicKey, network: Network) -> Value {
    initial_beacon_addresses(public_key, network)
        .into_iter()
        .map(|(id, address)| {
            json!({
                "id": id,
                "type": BeaconType::Singleton.to_string(),
                "serviceEndpoint": address.to_bip21(),
            })
        })
        .collect()
}
