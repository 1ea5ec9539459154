//! DID resolution: from an identifier string to its document at the requested version.

use crate::blockchain::ChainReader;
use crate::blockchain::target::{DEFAULT_MIN_CONFIRMATIONS, target_block_height};
use crate::blockchain::traversal::{ResolutionState, TargetCondition, Traverser};
use crate::canonical_hash::Sha256Hash;
use crate::document::{Document, external, genesis};
use crate::error::{Btc1Error, ProblemDetails};
use crate::identifier::{Did, IdType};
use crate::store::DocumentStore;
use crate::update::Update;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, warn};

/// Media type of a resolved document.
pub const DID_JSON_CONTENT_TYPE: &str = "application/did+json";

/// Data supplied by the caller instead of being fetched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SidecarData {
    /// The initial document of an external identifier.
    pub initial_document: Option<Value>,

    /// Signed updates, matched to beacon signals by their hash.
    pub updates: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct ResolutionOptions {
    /// The version to resolve; the latest confirmed version when `None`.
    pub version_id: Option<u64>,

    /// Ignore blocks after this time.
    pub version_time: Option<DateTime<Utc>>,

    pub sidecar_data: Option<SidecarData>,

    /// Without a `version_time`, blocks need more confirmations than this to count.
    pub min_confirmations: i64,

    /// First block to scan for beacon signals.
    pub start_block_height: u64,

    /// Upper bound on concurrent previous-output lookups per block.
    pub max_concurrent_lookups: usize,

    pub deadline: Option<Instant>,

    /// Checked before each block; resolution stops with `Cancelled` once set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            version_id: None,
            version_time: None,
            sidecar_data: None,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            start_block_height: 0,
            max_concurrent_lookups: 8,
            deadline: None,
            cancel: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_details: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    /// The last block the document is confirmed at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
}

/// The outcome of [`resolve`]: a document, or the error that prevented one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub did_document: Option<Value>,
    pub did_resolution_metadata: ResolutionMetadata,
    pub did_document_metadata: DocumentMetadata,
}

impl ResolutionResult {
    fn resolved(state: ResolutionState) -> Self {
        Self {
            did_document_metadata: DocumentMetadata {
                version_id: Some(state.version_id().to_string()),
                block_height: state.block_height(),
            },
            did_document: Some(state.into_document().into_json()),
            did_resolution_metadata: ResolutionMetadata {
                content_type: Some(DID_JSON_CONTENT_TYPE.into()),
                ..Default::default()
            },
        }
    }

    fn failed(err: &Btc1Error) -> Self {
        Self {
            did_document: None,
            did_resolution_metadata: ResolutionMetadata {
                content_type: None,
                error: Some(err.code().into()),
                error_message: Some(err.to_string()),
                problem_details: err.details(),
            },
            did_document_metadata: DocumentMetadata::default(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.did_resolution_metadata.error.is_some()
    }
}

/// Resolve `did` against `reader` and `store`.
///
/// Never fails: errors are reported in the result's resolution metadata.
pub fn resolve(
    did: &str,
    reader: &dyn ChainReader,
    store: &dyn DocumentStore,
    options: &ResolutionOptions,
) -> ResolutionResult {
    let resolved = did
        .parse::<Did>()
        .map_err(Btc1Error::from)
        .and_then(|did| resolve_document(&did, reader, store, options));

    match resolved {
        Ok(state) => {
            info!(did, version_id = state.version_id(), "DID resolved");
            ResolutionResult::resolved(state)
        }
        Err(err) => {
            warn!(did, code = err.code(), %err, "DID resolution failed");
            ResolutionResult::failed(&err)
        }
    }
}

/// Resolve an already parsed identifier to its final traversal state.
pub fn resolve_document(
    did: &Did,
    reader: &dyn ChainReader,
    store: &dyn DocumentStore,
    options: &ResolutionOptions,
) -> Result<ResolutionState, Btc1Error> {
    if options.version_id == Some(0) {
        return Err(Btc1Error::NotFound("Version ids start at 1".into()));
    }

    let sidecar = options.sidecar_data.as_ref();
    let initial_document = initial_document(did, store, sidecar)?;
    let sidecar_updates = sidecar_updates(sidecar)?;
    let state = ResolutionState::initial(initial_document);

    if options.version_id == Some(1) {
        return Ok(state);
    }

    let block_height = target_block_height(reader, options.version_time, options.min_confirmations)?;
    let target = match options.version_id {
        Some(version_id) => TargetCondition::Version {
            version_id,
            block_height,
        },
        None => TargetCondition::BlockHeight(block_height),
    };

    Traverser {
        did,
        reader,
        store,
        sidecar_updates: &sidecar_updates,
        start_block_height: options.start_block_height,
        max_concurrent_lookups: options.max_concurrent_lookups,
        deadline: options.deadline,
        cancel: options.cancel.as_deref(),
    }
    .traverse(state, target)
}

fn initial_document(
    did: &Did,
    store: &dyn DocumentStore,
    sidecar: Option<&SidecarData>,
) -> Result<Document, Btc1Error> {
    match did.components().id_type() {
        IdType::Key(_) => genesis::generate(did),
        IdType::External(_) => match sidecar.and_then(|sidecar| sidecar.initial_document.as_ref()) {
            Some(document) => external::resolve_sidecar(did, document),
            None => external::resolve_cas(did, store),
        },
    }
}

fn sidecar_updates(sidecar: Option<&SidecarData>) -> Result<HashMap<Sha256Hash, Update>, Btc1Error> {
    let Some(sidecar) = sidecar else {
        return Ok(HashMap::new());
    };

    sidecar
        .updates
        .iter()
        .enumerate()
        .map(|(i, json)| {
            let update = Update::from_json_value(json.clone())
                .map_err(|err| Btc1Error::InvalidSidecarData(format!("updates[{i}]: {err}")))?;

            Ok((update.update_hash(), update))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory::MemoryChain;
    use crate::blockchain::rpc::{RpcClient, RpcConfig};
    use crate::document::tests::sample_document_on;
    use crate::identifier::{DidVersion, Network};
    use crate::store::MemoryDocumentStore;
    use serde_json::json;
    use std::time::Duration;

    const KEY_DID: &str = "did:btc1:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk";

    fn unreachable_node() -> RpcClient {
        RpcClient::new(RpcConfig {
            url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(1),
            ..Default::default()
        })
    }

    fn external_document() -> Value {
        let mut document = sample_document_on("did:btc1:intermediate", Network::Regtest);
        document.as_object_mut().unwrap().remove("id");
        document
    }

    #[test]
    fn test_resolve_key_identifier() {
        let chain = MemoryChain::new(Network::Mainnet);
        let result = resolve(
            KEY_DID,
            &chain,
            &MemoryDocumentStore::new(),
            &ResolutionOptions::default(),
        );

        assert!(!result.is_error());
        let document = result.did_document.unwrap();
        assert_eq!(document["id"], KEY_DID);
        assert_eq!(result.did_document_metadata.version_id.as_deref(), Some("1"));
        assert_eq!(
            result.did_resolution_metadata.content_type.as_deref(),
            Some(DID_JSON_CONTENT_TYPE)
        );
    }

    #[test]
    fn test_version_one_needs_no_node() {
        let options = ResolutionOptions {
            version_id: Some(1),
            ..Default::default()
        };
        let result = resolve(KEY_DID, &unreachable_node(), &MemoryDocumentStore::new(), &options);

        assert_eq!(result.did_document.unwrap()["id"], KEY_DID);
    }

    #[test]
    fn test_node_unavailable() {
        let result = resolve(
            KEY_DID,
            &unreachable_node(),
            &MemoryDocumentStore::new(),
            &ResolutionOptions::default(),
        );

        assert_eq!(result.did_document, None);
        assert_eq!(
            result.did_resolution_metadata.error.as_deref(),
            Some("blockchainUnavailable")
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        let chain = MemoryChain::new(Network::Mainnet);
        let store = MemoryDocumentStore::new();
        let options = ResolutionOptions::default();

        let code = |did| resolve(did, &chain, &store, &options).did_resolution_metadata.error;

        assert_eq!(code("did:btc1:").as_deref(), Some("invalidDid"));
        assert_eq!(code("not a did").as_deref(), Some("invalidDid"));
        assert_eq!(
            code("did:example:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk")
                .as_deref(),
            Some("methodNotSupported")
        );
    }

    #[test]
    fn test_external_identifier_sources() {
        let (did, created) =
            external::create(&external_document(), Network::Regtest, DidVersion::ONE).unwrap();
        let chain = MemoryChain::new(Network::Regtest);
        chain.mine_blocks(10).unwrap();
        let mut store = MemoryDocumentStore::new();

        // Neither sidecar nor store.
        let result = resolve(did.encode(), &chain, &store, &ResolutionOptions::default());
        assert_eq!(result.did_resolution_metadata.error.as_deref(), Some("notFound"));

        // Sidecar.
        let options = ResolutionOptions {
            sidecar_data: Some(SidecarData {
                initial_document: Some(external_document()),
                updates: vec![],
            }),
            ..Default::default()
        };
        let result = resolve(did.encode(), &chain, &store, &options);
        assert_eq!(result.did_resolution_metadata.error, None);
        assert_eq!(result.did_document.as_ref(), Some(created.as_json()));
        assert_eq!(result.did_document_metadata.block_height, Some(3));

        // Store.
        external::publish_cas(created.as_json(), &mut store);
        let result = resolve(did.encode(), &chain, &store, &ResolutionOptions::default());
        assert_eq!(result.did_document.as_ref(), Some(created.as_json()));
    }

    #[test]
    fn test_tampered_sidecar_document() {
        let (did, _) =
            external::create(&external_document(), Network::Regtest, DidVersion::ONE).unwrap();

        let mut tampered = external_document();
        tampered["service"][0]["id"] = json!("#beacon-1");
        let options = ResolutionOptions {
            sidecar_data: Some(SidecarData {
                initial_document: Some(tampered),
                updates: vec![],
            }),
            ..Default::default()
        };

        let result = resolve(
            did.encode(),
            &MemoryChain::new(Network::Regtest),
            &MemoryDocumentStore::new(),
            &options,
        );
        assert_eq!(
            result.did_resolution_metadata.error.as_deref(),
            Some("invalidDidDocument")
        );
    }

    #[test]
    fn test_invalid_sidecar_update() {
        let options = ResolutionOptions {
            sidecar_data: Some(SidecarData {
                initial_document: None,
                updates: vec![json!({"patch": "not a patch"})],
            }),
            ..Default::default()
        };

        let result = resolve(
            KEY_DID,
            &MemoryChain::new(Network::Mainnet),
            &MemoryDocumentStore::new(),
            &options,
        );
        assert_eq!(
            result.did_resolution_metadata.error.as_deref(),
            Some("invalidSidecarData")
        );
    }

    #[test]
    fn test_version_zero() {
        let options = ResolutionOptions {
            version_id: Some(0),
            ..Default::default()
        };

        let result = resolve(
            KEY_DID,
            &MemoryChain::new(Network::Mainnet),
            &MemoryDocumentStore::new(),
            &options,
        );
        assert_eq!(result.did_resolution_metadata.error.as_deref(), Some("notFound"));
    }

    #[test]
    fn test_result_serialization() {
        let result = ResolutionResult::failed(&Btc1Error::NotFound("Version 3".into()));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["didDocument"], Value::Null);
        assert_eq!(json["didResolutionMetadata"]["error"], "notFound");
        assert_eq!(
            json["didResolutionMetadata"]["errorMessage"],
            result.did_resolution_metadata.error_message.clone().unwrap()
        );
        assert_eq!(
            json["didResolutionMetadata"]["problemDetails"]["type"],
            "https://www.w3.org/ns/did#NOT_FOUND"
        );
        assert_eq!(json["didDocumentMetadata"], json!({}));
    }
}
