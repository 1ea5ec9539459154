//! Broadcasting an update's hash through the beacons of a document.

use super::Update;
use crate::beacon::{BeaconService, BeaconType};
use crate::blockchain::{ChainReader, TxInput, TxOutput};
use crate::canonical_hash::Sha256Hash;
use crate::document::Document;
use crate::error::Btc1Error;
use crate::identifier::Network;
use bitcoin::{Amount, Txid};
use tracing::info;

/// Settings for Singleton beacon broadcasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnnounceOptions {
    /// Paid out of the spent beacon output; the rest returns to the beacon address.
    pub fee: Amount,
}

impl Default for AnnounceOptions {
    fn default() -> Self {
        Self {
            fee: Amount::from_sat(1_000),
        }
    }
}

/// What one beacon broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalMetadata {
    pub beacon_id: String,
    pub txid: Txid,
    pub update_hash: Sha256Hash,
}

/// Announce `update` through each beacon of `source_document` named in `beacon_ids`.
///
/// Every beacon is looked up before anything is broadcast, so an unknown or unsupported beacon
/// leaves the chain untouched.
pub fn announce_payload(
    reader: &dyn ChainReader,
    source_document: &Document,
    network: Network,
    beacon_ids: &[&str],
    update: &Update,
    options: &AnnounceOptions,
) -> Result<Vec<SignalMetadata>, Btc1Error> {
    let beacons = beacon_ids
        .iter()
        .map(|id| find_beacon(source_document, network, id))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(aggregate) = beacons
        .iter()
        .find(|beacon| beacon.beacon_type() != BeaconType::Singleton)
    {
        return Err(Btc1Error::NotYetImplemented(format!(
            "Announcing through {} `{}`",
            aggregate.beacon_type(),
            aggregate.id()
        )));
    }

    let update_hash = update.update_hash();

    beacons
        .iter()
        .map(|beacon| match beacon.beacon_type() {
            BeaconType::Singleton => announce_singleton(reader, beacon, update_hash, options),
            BeaconType::CidAggregate | BeaconType::SmtAggregate => Err(
                Btc1Error::NotYetImplemented(format!("Announcing through {}", beacon.beacon_type())),
            ),
        })
        .collect()
}

fn find_beacon(document: &Document, network: Network, id: &str) -> Result<BeaconService, Btc1Error> {
    let service = document
        .service(id)
        .ok_or_else(|| Btc1Error::invalid_document(format!("No service `{id}`")))?;

    if service.service_type.parse::<BeaconType>().is_err() {
        return Err(Btc1Error::invalid_document(format!(
            "Service `{id}` has unsupported type `{}`",
            service.service_type
        )));
    }

    Ok(BeaconService::from_service(service, network)?)
}

/// Spend the first unspent output of the beacon address, carrying `update_hash` in an
/// `OP_RETURN` output and returning the change to the beacon.
fn announce_singleton(
    reader: &dyn ChainReader,
    beacon: &BeaconService,
    update_hash: Sha256Hash,
    options: &AnnounceOptions,
) -> Result<SignalMetadata, Btc1Error> {
    let address = beacon.address().to_string();

    let utxo = reader
        .list_unspent(&address)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            Btc1Error::invalid_document(format!("Beacon `{}` at {address} is not funded", beacon.id()))
        })?;
    let change = utxo.amount.checked_sub(options.fee).ok_or_else(|| {
        Btc1Error::invalid_document(format!(
            "Beacon `{}` output of {} does not cover the {} fee",
            beacon.id(),
            utxo.amount,
            options.fee
        ))
    })?;

    let unsigned = reader.create_raw_transaction(
        &[TxInput {
            txid: utxo.txid,
            vout: utxo.vout,
        }],
        &[
            TxOutput::Data(update_hash.as_bytes().to_vec()),
            TxOutput::Address {
                address,
                amount: change,
            },
        ],
    )?;
    let signed = reader.sign_raw_transaction(&unsigned)?;
    if !signed.complete {
        return Err(Btc1Error::BlockchainUnavailable(format!(
            "Wallet could not sign the spend of beacon `{}`",
            beacon.id()
        )));
    }
    let txid = reader.send_raw_transaction(&signed.hex)?;

    info!(beacon_id = beacon.id(), %txid, hash = %update_hash, "Update announced");

    Ok(SignalMetadata {
        beacon_id: beacon.id().to_string(),
        txid,
        update_hash,
    })
}
