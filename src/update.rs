//! DID updates: construction, invocation, announcement and application.
//!
//! An update is a JSON Patch over the canonical form of the previous document version, bound to
//! it by `sourceHash` and to its result by `targetHash`, and authorized by a capability
//! invocation proof over the identifier's root capability.

use crate::canonical_hash::{CanonicalHash, Sha256Hash, canonicalize};
use crate::cryptosuite::CryptoSuite;
use crate::document::{DID_BTC1_CONTEXT, Document, VerificationMethod};
use crate::error::Btc1Error;
use crate::identifier::Did;
use crate::key::KeyMaterial;
use crate::signer::Signer;
use crate::zcap::proof::{CapabilityAction, Proof, ProofOptions, ProofPurpose};
use crate::zcap::{ZCAP_CONTEXT, derive_root_capability, dereference_root_capability};
use json_patch::Patch;
use serde::Deserialize;
use serde_json::{Value, json};
use std::num::NonZeroU64;
use std::{fs, path::Path};

pub mod announce;

pub use announce::{AnnounceOptions, SignalMetadata, announce_payload};

pub const DATA_INTEGRITY_CONTEXT: &str = "https://w3id.org/security/data-integrity/v2";
pub const JSON_LD_PATCH_CONTEXT: &str = "https://w3id.org/json-ld-patch/v1";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadFields {
    #[serde(rename = "@context", default)]
    context: Vec<String>,
    patch: Patch,
    source_hash: String,
    target_hash: String,
    target_version_id: NonZeroU64,
}

/// An update payload without its proof.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsecuredUpdate {
    fields: PayloadFields,
    json: Value,
}

impl UnsecuredUpdate {
    pub fn from_json_value(json: Value) -> Result<Self, Btc1Error> {
        let fields = PayloadFields::deserialize(&json)
            .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Malformed update: {err}")))?;

        Ok(Self { fields, json })
    }

    pub fn context(&self) -> &[String] {
        &self.fields.context
    }

    pub fn patch(&self) -> &Patch {
        &self.fields.patch
    }

    pub fn source_hash(&self) -> &str {
        &self.fields.source_hash
    }

    pub fn target_hash(&self) -> &str {
        &self.fields.target_hash
    }

    pub fn target_version_id(&self) -> u64 {
        self.fields.target_version_id.get()
    }

    pub(crate) fn with_proof(self, proof: Proof) -> Update {
        let mut json = self.json.clone();
        if let Some(object) = json.as_object_mut() {
            object.insert("proof".into(), json!(proof));
        }

        Update {
            unsecured: self,
            proof,
            json,
        }
    }
}

impl AsRef<Value> for UnsecuredUpdate {
    fn as_ref(&self) -> &Value {
        &self.json
    }
}

/// A signed update, as announced on chain by its hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    unsecured: UnsecuredUpdate,
    proof: Proof,
    json: Value,
}

impl Update {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Btc1Error> {
        let json = fs::read_to_string(path)
            .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Unreadable update: {err}")))?;

        Self::from_json_string(&json)
    }

    pub fn from_json_string(json: &str) -> Result<Self, Btc1Error> {
        let json = serde_json::from_str(json)
            .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Invalid JSON: {err}")))?;

        Self::from_json_value(json)
    }

    pub fn from_json_value(json: Value) -> Result<Self, Btc1Error> {
        let mut unsecured = json.clone();
        let proof = unsecured
            .as_object_mut()
            .and_then(|object| object.remove("proof"))
            .ok_or_else(|| Btc1Error::InvalidUpdateProof("Update has no proof".into()))?;
        let proof = serde_json::from_value(proof)
            .map_err(|err| Btc1Error::InvalidUpdateProof(format!("Malformed proof: {err}")))?;

        Ok(Self {
            unsecured: UnsecuredUpdate::from_json_value(unsecured)?,
            proof,
            json,
        })
    }

    pub fn unsecured(&self) -> &UnsecuredUpdate {
        &self.unsecured
    }

    pub fn proof(&self) -> &Proof {
        &self.proof
    }

    pub fn target_version_id(&self) -> u64 {
        self.unsecured.target_version_id()
    }

    /// SHA-256 of the canonical signed update: the value a beacon signal carries.
    pub fn update_hash(&self) -> Sha256Hash {
        self.hash()
    }

    /// The canonical bytes, as published to a [`DocumentStore`](crate::store::DocumentStore).
    ///
    /// Their CID is the one [`cid_for_hash`](crate::store::cid_for_hash) derives from
    /// [`Update::update_hash`].
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        canonicalize(&self.json).into_bytes()
    }
}

impl AsRef<Value> for Update {
    fn as_ref(&self) -> &Value {
        &self.json
    }
}

impl CanonicalHash for Update {}

/// Build the payload that moves `source_document` (at `source_version_id`) through `patch`.
pub fn construct_payload(
    did: &Did,
    source_document: &Document,
    source_version_id: u64,
    patch: Patch,
) -> Result<UnsecuredUpdate, Btc1Error> {
    if source_document.id() != did.encode() {
        return Err(Btc1Error::InvalidDid(format!(
            "Source document id `{}` does not match `{did}`",
            source_document.id()
        )));
    }

    let target_document = apply_patch(did, source_document, &patch)?;
    let target_version_id = source_version_id
        .checked_add(1)
        .ok_or_else(|| Btc1Error::InvalidDidUpdate("Version id overflow".into()))?;
    let patch = serde_json::to_value(&patch)
        .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Unserializable patch: {err}")))?;

    UnsecuredUpdate::from_json_value(json!({
        "@context": [ZCAP_CONTEXT, DATA_INTEGRITY_CONTEXT, JSON_LD_PATCH_CONTEXT, DID_BTC1_CONTEXT],
        "patch": patch,
        "sourceHash": source_document.multibase_hash(),
        "targetHash": target_document.multibase_hash(),
        "targetVersionId": target_version_id,
    }))
}

/// Sign `payload` with the key behind `verification_method`, invoking the root capability of
/// `did`.
///
/// The key is derived from `key_material` and must match the verification method.
pub fn invoke_payload(
    did: &Did,
    verification_method: &VerificationMethod,
    payload: UnsecuredUpdate,
    key_material: &KeyMaterial,
    signer: &mut dyn Signer,
) -> Result<Update, Btc1Error> {
    let secret_key = key_material.derive_secret_key()?;
    let key = signer.import_key(secret_key);

    if key.public_key()? != verification_method.public_key()? {
        return Err(Btc1Error::InvalidKeyMaterial(format!(
            "Key material does not match verification method `{}`",
            verification_method.id
        )));
    }

    let verification_method_id = if verification_method.id.starts_with('#') {
        format!("{did}{}", verification_method.id)
    } else {
        verification_method.id.clone()
    };

    let root_capability = derive_root_capability(did);
    let options = ProofOptions::capability_invocation(verification_method_id, root_capability.id);

    CryptoSuite::Bip340Jcs.create_proof(payload, options, signer, &key)
}

/// Check that `update` applies to `document` and produce the next version.
///
/// The proof must invoke the root capability of `did` with a `capabilityInvocation` key of
/// `document`, and both hashes must match.
pub fn apply_update(did: &Did, document: &Document, update: &Update) -> Result<Document, Btc1Error> {
    let unsecured = update.unsecured();

    let source_hash = Sha256Hash::from_multibase(unsecured.source_hash())?;
    if source_hash != document.hash() {
        return Err(Btc1Error::late_publishing(source_hash, document.hash()));
    }

    verify_invocation(did, document, update)?;

    let target_document = apply_patch(did, document, unsecured.patch())?;
    let target_hash = Sha256Hash::from_multibase(unsecured.target_hash())?;
    if target_hash != target_document.hash() {
        return Err(Btc1Error::InvalidDidUpdate(format!(
            "Patched document hash {} does not match targetHash {target_hash}",
            target_document.hash()
        )));
    }

    Ok(target_document)
}

fn verify_invocation(did: &Did, document: &Document, update: &Update) -> Result<(), Btc1Error> {
    let options = &update.proof().options;

    let root_capability = dereference_root_capability(&options.capability)?;
    if root_capability.invocation_target != did.encode() {
        return Err(Btc1Error::Zcap(format!(
            "Capability `{}` does not target `{did}`",
            options.capability
        )));
    }
    if options.capability_action != CapabilityAction::Write {
        return Err(Btc1Error::Zcap("Invalid capability action".into()));
    }

    let method = document
        .capability_invocation_method(&options.verification_method)
        .ok_or_else(|| {
            Btc1Error::InvalidUpdateProof(format!(
                "`{}` is not a capabilityInvocation method",
                options.verification_method
            ))
        })?;

    CryptoSuite::from(options.cryptosuite).data_integrity_verify_proof(
        &method.public_key()?,
        update,
        ProofPurpose::CapabilityInvocation,
    )
}

/// Apply `patch` to a copy of `document`; the result must be a valid document of `did`.
fn apply_patch(did: &Did, document: &Document, patch: &Patch) -> Result<Document, Btc1Error> {
    let mut patched = document.as_json().clone();
    json_patch::patch(&mut patched, patch)
        .map_err(|err| Btc1Error::InvalidDidUpdate(format!("Patch failed: {err}")))?;

    let target_document = Document::from_json_value(patched)?;
    if target_document.id() != did.encode() {
        return Err(Btc1Error::invalid_document(format!(
            "Patched document id `{}` must remain `{did}`",
            target_document.id()
        )));
    }
    target_document.beacon_violations(did.network()).into_result()?;

    Ok(target_document)
}
