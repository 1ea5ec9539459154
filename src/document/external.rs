//! Initial documents of external identifiers.
//!
//! An external identifier commits to the SHA-256 of its initial document, canonicalized with JCS
//! after the identity is replaced by [`DID_PLACEHOLDER`](super::DID_PLACEHOLDER). The document
//! itself is either supplied by the resolver's caller (sidecar) or fetched from a
//! content-addressed store.

use super::{DID_PLACEHOLDER, Document, finalize, genesis_hash, rewrite_identity};
use crate::canonical_hash::{Sha256Hash, canonicalize};
use crate::error::{Btc1Error, Violations};
use crate::identifier::{Did, DidComponents, DidVersion, IdType, Network};
use crate::store::{DocumentStore, cid_for_hash};
use cid::Cid;
use serde_json::Value;
use tracing::debug;

/// Create an external identifier from an intermediate document.
///
/// The returned document carries the new identifier as `id` and as every verification method
/// `controller`.
pub fn create(
    intermediate: &Value,
    network: Network,
    version: DidVersion,
) -> Result<(Did, Document), Btc1Error> {
    validate_intermediate(intermediate).into_result()?;

    let hash = genesis_hash(intermediate);
    let did = Did::from(DidComponents::new(version, network, IdType::External(hash.0)));
    let document = finalize(intermediate, &did)?;

    Ok((did, document))
}

/// Resolve the initial document from caller-supplied sidecar data.
pub fn resolve_sidecar(did: &Did, document: &Value) -> Result<Document, Btc1Error> {
    let expected = external_hash(did)?;
    let actual = genesis_hash(document);

    if actual != expected {
        return Err(Btc1Error::invalid_document(format!(
            "Sidecar document hash {actual} does not match genesis bytes {expected}"
        )));
    }

    finalize(document, did)
}

/// Resolve the initial document from content-addressed storage.
///
/// The CID is derived from the genesis bytes, so the store lookup is itself the hash check.
pub fn resolve_cas(did: &Did, store: &dyn DocumentStore) -> Result<Document, Btc1Error> {
    let cid = cid_for_hash(&external_hash(did)?);
    debug!(%cid, "Fetching initial document");

    let bytes = store
        .get(&cid)
        .ok_or_else(|| Btc1Error::NotFound(format!("No initial document stored under {cid}")))?;
    let document: Value = serde_json::from_slice(&bytes)
        .map_err(|err| Btc1Error::invalid_document(format!("Stored document is not JSON: {err}")))?;

    finalize(&document, did)
}

/// Store the placeholder form of `document` so [`resolve_cas`] can find it.
///
/// Returns the CID, which is derived from the same hash as the identifier's genesis bytes.
pub fn publish_cas(document: &Value, store: &mut dyn DocumentStore) -> Cid {
    let placeholder = rewrite_identity(document, DID_PLACEHOLDER);

    store.add(canonicalize(&placeholder).as_bytes())
}

fn external_hash(did: &Did) -> Result<Sha256Hash, Btc1Error> {
    match did.components().id_type() {
        IdType::External(hash) => Ok(Sha256Hash(hash)),
        IdType::Key(_) => Err(Btc1Error::InvalidDid(format!(
            "`{did}` is a key identifier, not an external one"
        ))),
    }
}

/// An intermediate document needs at least one verification method and one service, each with
/// their identifying members. Controllers and `id` are filled in later.
fn validate_intermediate(intermediate: &Value) -> Violations {
    let mut violations = Violations::new();

    let required = [
        (
            "verificationMethod",
            &["id", "type", "publicKeyMultibase"][..],
        ),
        ("service", &["id", "type", "serviceEndpoint"][..]),
    ];

    for (key, members) in required {
        let entries = match intermediate.get(key) {
            Some(Value::Array(entries)) if !entries.is_empty() => entries,
            _ => {
                violations.push(format!("{key} must be a non-empty array"));
                continue;
            }
        };

        for (i, entry) in entries.iter().enumerate() {
            for member in members {
                if entry.get(member).is_none_or(Value::is_null) {
                    violations.push(format!("{key}[{i}].{member} is required"));
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::sample_document_on;
    use crate::store::MemoryDocumentStore;
    use arbtest::arbtest;
    use serde_json::json;

    fn intermediate(network: Network) -> Value {
        let mut document = sample_document_on("did:btc1:intermediate", network);
        document.as_object_mut().unwrap().remove("id");
        document["verificationMethod"][0]
            .as_object_mut()
            .unwrap()
            .remove("controller");
        document
    }

    #[test]
    fn test_create_rewrites_identity() {
        let (did, document) =
            create(&intermediate(Network::Regtest), Network::Regtest, DidVersion::ONE).unwrap();

        assert!(did.encode().starts_with("did:btc1:regtest:x1"));
        assert_eq!(document.id(), did.encode());
        assert_eq!(document.verification_methods()[0].controller, did.encode());
        assert!(!document.as_json().to_string().contains(DID_PLACEHOLDER));
    }

    #[test]
    fn test_create_then_resolve_sidecar() {
        let (did, created) =
            create(&intermediate(Network::Mainnet), Network::Mainnet, DidVersion::ONE).unwrap();

        let resolved = resolve_sidecar(&did, created.as_json()).unwrap();
        assert_eq!(resolved, created);

        // The intermediate form hashes identically.
        assert_eq!(
            resolve_sidecar(&did, &intermediate(Network::Mainnet)).unwrap(),
            created
        );
    }

    #[test]
    fn test_create_rejects_beacon_for_another_network() {
        let Err(Btc1Error::InvalidDidDocument(violations)) =
            create(&intermediate(Network::Mainnet), Network::Regtest, DidVersion::ONE)
        else {
            panic!("expected InvalidDidDocument");
        };

        let violations: Vec<_> = violations.iter().collect();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("service[0]: Beacon service `#beacon-0`"));
    }

    #[test]
    fn test_create_reports_every_missing_member() {
        let document = json!({
            "@context": ["https://www.w3.org/ns/did/v1"],
            "verificationMethod": [{"id": "#key-0"}],
        });

        let Err(Btc1Error::InvalidDidDocument(violations)) =
            create(&document, Network::Mainnet, DidVersion::ONE)
        else {
            panic!("expected InvalidDidDocument");
        };

        let violations: Vec<_> = violations.iter().collect();
        assert_eq!(
            violations,
            [
                "verificationMethod[0].type is required",
                "verificationMethod[0].publicKeyMultibase is required",
                "service must be a non-empty array",
            ]
        );
    }

    #[test]
    fn test_resolve_sidecar_rejects_key_identifier() {
        let did: Did = "did:btc1:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk"
            .parse()
            .unwrap();

        assert!(matches!(
            resolve_sidecar(&did, &intermediate(Network::Mainnet)),
            Err(Btc1Error::InvalidDid(_))
        ));
    }

    #[test]
    fn test_resolve_cas() {
        let (did, created) =
            create(&intermediate(Network::Signet), Network::Signet, DidVersion::ONE).unwrap();

        let mut store = MemoryDocumentStore::new();
        assert!(matches!(
            resolve_cas(&did, &store),
            Err(Btc1Error::NotFound(_))
        ));

        let cid = publish_cas(created.as_json(), &mut store);
        assert_eq!(cid, cid_for_hash(&external_hash(&did).unwrap()));

        assert_eq!(resolve_cas(&did, &store).unwrap(), created);
    }

    #[test]
    fn test_resolve_cas_rejects_non_json() {
        let mut store = MemoryDocumentStore::new();
        let cid = store.add(b"not json");

        let hash: [u8; 32] = cid.hash().digest().try_into().unwrap();
        let did = Did::from(DidComponents::new(
            DidVersion::ONE,
            Network::Mainnet,
            IdType::External(hash),
        ));

        assert!(matches!(
            resolve_cas(&did, &store),
            Err(Btc1Error::InvalidDidDocument(_))
        ));
    }

    #[test]
    fn arbtest_sidecar_tamper_detection() {
        let (did, created) =
            create(&intermediate(Network::Mainnet), Network::Mainnet, DidVersion::ONE).unwrap();
        let canonical = serde_jcs::to_string(&crate::document::rewrite_identity(
            created.as_json(),
            DID_PLACEHOLDER,
        ))
        .unwrap();

        // The identity is not committed to, so bytes inside it are not tamper targets.
        let identity_spans: Vec<_> = canonical
            .match_indices(DID_PLACEHOLDER)
            .map(|(start, _)| start..start + DID_PLACEHOLDER.len())
            .collect();

        arbtest(|u| {
            let index = u.choose_index(canonical.len())?;
            let replacement = *u.choose(b"abcdefghijklmnopqrstuvwxyz0123456789")?;

            if identity_spans.iter().any(|span| span.contains(&index))
                || canonical.as_bytes()[index] == replacement
            {
                return Ok(());
            }

            let mut tampered = canonical.clone().into_bytes();
            tampered[index] = replacement;

            if let Ok(document) = serde_json::from_slice::<Value>(&tampered) {
                assert!(matches!(
                    resolve_sidecar(&did, &document),
                    Err(Btc1Error::InvalidDidDocument(_))
                ));
            }

            Ok(())
        });
    }
}
