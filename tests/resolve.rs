use did_btc1::blockchain::ChainReader;
use did_btc1::blockchain::memory::{BLOCK_INTERVAL, GENESIS_TIME, MemoryChain};
use did_btc1::document::{external, genesis};
use did_btc1::signer::KeyManager;
use did_btc1::store::{DocumentStore, MemoryDocumentStore};
use did_btc1::update::AnnounceOptions;
use did_btc1::{
    Did, DidVersion, Document, KeyMaterial, Network, PublicKey, ResolutionOptions, SidecarData,
    Update, announce_payload, construct_payload, invoke_payload, resolve,
};
use bitcoin::Amount;
use chrono::DateTime;
use json_patch::Patch;
use secp256k1::Secp256k1;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

const ENTROPY: [u8; 32] = [42; 32];
const EXTERNAL_DID: &str = "did:btc1:x1f20lsehs0yhulakw7kjc3eqnaz0dv8m2845980j2u3ql27e0lras86ay8p";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn intermediate_document() -> Value {
    serde_json::from_str(include_str!("../fixtures/external_intermediate.json")).unwrap()
}

fn controlled_did() -> (Did, Document) {
    let secret_key = KeyMaterial::from_entropy(ENTROPY).derive_secret_key().unwrap();
    let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);

    genesis::create_deterministic(&public_key.serialize(), Network::Regtest, DidVersion::ONE)
        .unwrap()
}

fn linked_domain_patch() -> Patch {
    serde_json::from_value(json!([{
        "op": "add",
        "path": "/service/-",
        "value": {
            "id": "#linked-domain",
            "type": "LinkedDomains",
            "serviceEndpoint": "https://example.com",
        },
    }]))
    .unwrap()
}

fn sign(did: &Did, document: &Document, patch: Patch) -> Update {
    let payload = construct_payload(did, document, 1, patch).unwrap();
    let method = document.verification_method("#initialKey").unwrap();

    invoke_payload(
        did,
        method,
        payload,
        &KeyMaterial::from_entropy(ENTROPY),
        &mut KeyManager::new(),
    )
    .unwrap()
}

#[test]
fn test_key_identifier_resolves_offline() {
    init_tracing();
    let public_key =
        hex::decode("029e0701b3e117a7358e9e37376b9174da15bbe12b4808c092c1c9ab4639494f33").unwrap();
    let (did, document) =
        genesis::create_deterministic(&public_key, Network::Mainnet, DidVersion::ONE).unwrap();

    let chain = MemoryChain::new(Network::Mainnet);
    chain.mine_blocks(10).unwrap();
    let result = resolve(
        did.encode(),
        &chain,
        &MemoryDocumentStore::new(),
        &ResolutionOptions::default(),
    );

    let resolved = result.did_document.unwrap();
    assert_eq!(resolved["id"], did.encode());
    assert_eq!(&resolved, document.as_json());
    assert_eq!(result.did_document_metadata.version_id.as_deref(), Some("1"));
}

#[test]
fn test_version_one_is_idempotent() {
    init_tracing();
    let (did, document) = controlled_did();
    let chain = MemoryChain::new(Network::Regtest);
    let store = MemoryDocumentStore::new();
    let options = ResolutionOptions {
        version_id: Some(1),
        ..Default::default()
    };

    let first = resolve(did.encode(), &chain, &store, &options);
    let second = resolve(did.encode(), &chain, &store, &options);

    assert_eq!(first, second);
    assert_eq!(first.did_document.as_ref(), Some(document.as_json()));
}

#[test]
fn test_announced_update_is_resolved() {
    init_tracing();
    let (did, document) = controlled_did();
    let chain = MemoryChain::new(Network::Regtest);
    let mut store = MemoryDocumentStore::new();

    let beacons = document.beacon_services(Network::Regtest).unwrap();
    let p2tr = beacons
        .iter()
        .find(|beacon| beacon.id().ends_with("#initialP2TR"))
        .unwrap();
    chain.fund(p2tr.address(), Amount::from_sat(20_000)).unwrap();
    chain.mine_block().unwrap();

    let update = sign(&did, &document, linked_domain_patch());
    let signals = announce_payload(
        &chain,
        &document,
        Network::Regtest,
        &["#initialP2TR"],
        &update,
        &AnnounceOptions::default(),
    )
    .unwrap();
    assert_eq!(signals[0].update_hash, update.update_hash());
    store.add(&update.to_canonical_bytes());
    let announced_at = chain.mine_block().unwrap();

    // Not yet confirmed deeply enough.
    let result = resolve(did.encode(), &chain, &store, &ResolutionOptions::default());
    assert_eq!(result.did_document_metadata.version_id.as_deref(), Some("1"));

    chain.mine_blocks(7).unwrap();

    let result = resolve(did.encode(), &chain, &store, &ResolutionOptions::default());
    assert_eq!(result.did_document_metadata.version_id.as_deref(), Some("2"));
    assert_eq!(result.did_document_metadata.block_height, Some(announced_at));
    let resolved = Document::from_json_value(result.did_document.unwrap()).unwrap();
    assert!(resolved.service("#linked-domain").is_some());
    assert_eq!(resolved.multibase_hash(), update.unsecured().target_hash());

    // The same update supplied as sidecar data instead of stored.
    let options = ResolutionOptions {
        sidecar_data: Some(SidecarData {
            initial_document: None,
            updates: vec![update.as_ref().clone()],
        }),
        ..Default::default()
    };
    let from_sidecar = resolve(did.encode(), &chain, &MemoryDocumentStore::new(), &options);
    assert_eq!(from_sidecar.did_document, Some(resolved.as_json().clone()));

    // Without the update the signal carries nothing resolvable.
    let result = resolve(
        did.encode(),
        &chain,
        &MemoryDocumentStore::new(),
        &ResolutionOptions::default(),
    );
    assert_eq!(result.did_document.as_ref(), Some(document.as_json()));

    // Before the announcement.
    let before = DateTime::from_timestamp(GENESIS_TIME + (announced_at as i64 - 1) * BLOCK_INTERVAL, 0);
    let options = ResolutionOptions {
        version_time: before,
        ..Default::default()
    };
    let result = resolve(did.encode(), &chain, &store, &options);
    assert_eq!(result.did_document_metadata.version_id.as_deref(), Some("1"));

    // Explicit versions.
    let options = ResolutionOptions {
        version_id: Some(2),
        ..Default::default()
    };
    let result = resolve(did.encode(), &chain, &store, &options);
    assert_eq!(result.did_document, Some(resolved.as_json().clone()));

    let options = ResolutionOptions {
        version_id: Some(3),
        ..Default::default()
    };
    let result = resolve(did.encode(), &chain, &store, &options);
    assert_eq!(result.did_resolution_metadata.error.as_deref(), Some("notFound"));
}

#[test]
fn test_external_identifier_golden_vector() {
    init_tracing();
    let (did, created) =
        external::create(&intermediate_document(), Network::Mainnet, DidVersion::ONE).unwrap();

    assert_eq!(did.encode(), EXTERNAL_DID);
    assert_eq!(created.id(), EXTERNAL_DID);
    assert_eq!(created.verification_methods()[0].controller, EXTERNAL_DID);
}

#[test]
fn test_external_identifier_resolves() {
    init_tracing();
    let (_, created) =
        external::create(&intermediate_document(), Network::Mainnet, DidVersion::ONE).unwrap();
    let chain = MemoryChain::new(Network::Mainnet);

    let sidecar = ResolutionOptions {
        sidecar_data: Some(SidecarData {
            initial_document: Some(intermediate_document()),
            updates: vec![],
        }),
        ..Default::default()
    };
    let result = resolve(EXTERNAL_DID, &chain, &MemoryDocumentStore::new(), &sidecar);
    assert_eq!(result.did_document.as_ref(), Some(created.as_json()));

    let mut store = MemoryDocumentStore::new();
    external::publish_cas(created.as_json(), &mut store);
    let result = resolve(EXTERNAL_DID, &chain, &store, &ResolutionOptions::default());
    assert_eq!(result.did_document.as_ref(), Some(created.as_json()));
    assert_eq!(chain.get_block_count().unwrap(), 0);
}
