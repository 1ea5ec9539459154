use crate::beacon::{BeaconService, BeaconType};
use crate::canonical_hash::{CanonicalHash, Sha256Hash, hash_json};
use crate::error::{Btc1Error, Violations};
use crate::identifier::{Did, Network};
use crate::key::{MultikeyExt as _, XOnlyPublicKey};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{fs, path::Path};

pub mod external;
pub mod genesis;

pub const DID_CORE_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const MULTIKEY_CONTEXT: &str = "https://w3id.org/security/multikey/v1";
pub const DID_BTC1_CONTEXT: &str = "https://github.com/dcdpr/did-btc1";

/// Stands in for the identifier while an external document is hashed.
pub const DID_PLACEHOLDER: &str =
    "did:btc1:xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

const VERIFICATION_RELATIONSHIPS: [&str; 4] = [
    "authentication",
    "assertionMethod",
    "capabilityInvocation",
    "capabilityDelegation",
];

/// A verification method entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,

    #[serde(rename = "type")]
    pub method_type: String,

    pub controller: String,

    pub public_key_multibase: String,
}

impl VerificationMethod {
    /// The x-only public key of a `Multikey` verification method.
    pub fn public_key(&self) -> Result<XOnlyPublicKey, Btc1Error> {
        if self.method_type != "Multikey" {
            return Err(Btc1Error::InvalidPublicKey(format!(
                "Unsupported verification method type `{}`",
                self.method_type
            )));
        }

        Ok(XOnlyPublicKey::from_multikey(&self.public_key_multibase)?)
    }
}

/// A verification relationship entry: either a reference or an embedded method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationRelationship {
    Reference(String),
    Embedded(VerificationMethod),
}

impl VerificationRelationship {
    fn id(&self) -> &str {
        match self {
            Self::Reference(id) => id,
            Self::Embedded(method) => &method.id,
        }
    }
}

/// A service entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,

    #[serde(rename = "type")]
    pub service_type: String,

    pub service_endpoint: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentFields {
    id: String,

    #[serde(default)]
    verification_method: Vec<VerificationMethod>,

    #[serde(default)]
    authentication: Vec<VerificationRelationship>,

    #[serde(default)]
    assertion_method: Vec<VerificationRelationship>,

    #[serde(default)]
    capability_invocation: Vec<VerificationRelationship>,

    #[serde(default)]
    capability_delegation: Vec<VerificationRelationship>,

    #[serde(default)]
    service: Vec<Service>,
}

/// A validated DID document.
///
/// The JSON is kept verbatim next to its typed fields: hashes commit to the JSON exactly as
/// received, including members this crate does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    fields: DocumentFields,
    json: Value,
}

impl Document {
    /// Load a document from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Btc1Error> {
        let content = fs::read_to_string(path)
            .map_err(|err| Btc1Error::invalid_document(format!("Unreadable document: {err}")))?;
        Self::from_json_string(&content)
    }

    /// Create a document from a JSON string
    pub fn from_json_string(json: &str) -> Result<Self, Btc1Error> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| Btc1Error::invalid_document(format!("Invalid JSON: {err}")))?;
        Self::from_json_value(value)
    }

    /// Create a document from a JSON Value, reporting every shape violation at once.
    pub fn from_json_value(json: Value) -> Result<Self, Btc1Error> {
        validate_document(&json).into_result()?;

        let fields = DocumentFields::deserialize(&json)
            .map_err(|err| Btc1Error::invalid_document(err.to_string()))?;

        Ok(Self { fields, json })
    }

    pub fn id(&self) -> &str {
        &self.fields.id
    }

    pub fn as_json(&self) -> &Value {
        &self.json
    }

    pub fn into_json(self) -> Value {
        self.json
    }

    pub fn verification_methods(&self) -> &[VerificationMethod] {
        &self.fields.verification_method
    }

    pub fn services(&self) -> &[Service] {
        &self.fields.service
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        let id = self.absolute(id);
        self.fields
            .service
            .iter()
            .find(|service| self.absolute(&service.id) == id)
    }

    /// Find a verification method by absolute or fragment-relative id.
    pub fn verification_method(&self, id: &str) -> Option<&VerificationMethod> {
        let id = self.absolute(id);
        self.fields
            .verification_method
            .iter()
            .chain(self.embedded_methods())
            .find(|method| self.absolute(&method.id) == id)
    }

    /// A verification method that is authorized for `capabilityInvocation`.
    pub fn capability_invocation_method(&self, id: &str) -> Option<&VerificationMethod> {
        let id = self.absolute(id);
        let authorized = self
            .fields
            .capability_invocation
            .iter()
            .any(|relationship| self.absolute(relationship.id()) == id);

        if authorized {
            self.verification_method(&id)
        } else {
            None
        }
    }

    /// Every service whose type is a beacon type, with its address parsed for `network`.
    pub fn beacon_services(&self, network: Network) -> Result<Vec<BeaconService>, Btc1Error> {
        self.fields
            .service
            .iter()
            .filter(|service| service.service_type.parse::<BeaconType>().is_ok())
            .map(|service| BeaconService::from_service(service, network).map_err(Btc1Error::from))
            .collect()
    }

    /// Violations for every beacon service that does not parse as an address on `network`.
    pub fn beacon_violations(&self, network: Network) -> Violations {
        let mut violations = Violations::new();

        for (i, service) in self.fields.service.iter().enumerate() {
            if service.service_type.parse::<BeaconType>().is_err() {
                continue;
            }
            if let Err(err) = BeaconService::from_service(service, network) {
                violations.push(format!("service[{i}]: {err}"));
            }
        }

        violations
    }

    /// Hash of the canonical form, in the multibase form used by update payloads.
    pub fn multibase_hash(&self) -> String {
        self.hash().to_multibase()
    }

    fn embedded_methods(&self) -> impl Iterator<Item = &VerificationMethod> {
        [
            &self.fields.authentication,
            &self.fields.assertion_method,
            &self.fields.capability_invocation,
            &self.fields.capability_delegation,
        ]
        .into_iter()
        .flatten()
        .filter_map(|relationship| match relationship {
            VerificationRelationship::Embedded(method) => Some(method),
            VerificationRelationship::Reference(_) => None,
        })
    }

    fn absolute(&self, id: &str) -> String {
        if id.starts_with('#') {
            format!("{}{id}", self.fields.id)
        } else {
            id.to_string()
        }
    }
}

impl AsRef<Value> for Document {
    fn as_ref(&self) -> &Value {
        &self.json
    }
}

impl CanonicalHash for Document {}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.json.serialize(serializer)
    }
}

/// Returns a copy of `document` with `id` and every `verificationMethod[].controller` set to
/// `identity`.
///
/// This is exactly what the genesis hash of an external identifier commits to: the hash is
/// taken over `rewrite_identity(document, DID_PLACEHOLDER)`.
pub fn rewrite_identity(document: &Value, identity: &str) -> Value {
    let mut rewritten = document.clone();

    if let Some(object) = rewritten.as_object_mut() {
        object.insert("id".into(), Value::String(identity.to_string()));

        if let Some(methods) = object
            .get_mut("verificationMethod")
            .and_then(Value::as_array_mut)
        {
            for method in methods.iter_mut().filter_map(Value::as_object_mut) {
                method.insert("controller".into(), Value::String(identity.to_string()));
            }
        }
    }

    rewritten
}

/// The genesis hash of an external document: SHA-256 of the JCS form of its placeholder rewrite.
pub fn genesis_hash(document: &Value) -> Sha256Hash {
    hash_json(&rewrite_identity(document, DID_PLACEHOLDER))
}

/// Set the identity of a document to `did` and validate the result, beacons included.
pub(crate) fn finalize(document: &Value, did: &Did) -> Result<Document, Btc1Error> {
    let document = Document::from_json_value(rewrite_identity(document, did.encode()))?;
    document.beacon_violations(did.network()).into_result()?;

    Ok(document)
}

/// Validate the shape of a DID document, collecting every violation.
pub fn validate_document(document: &Value) -> Violations {
    let mut violations = Violations::new();

    let Some(object) = document.as_object() else {
        violations.push("Document must be a JSON object");
        return violations;
    };

    match object.get("@context") {
        None => violations.push("@context is required"),
        Some(Value::String(context)) if context == DID_CORE_CONTEXT => (),
        Some(Value::Array(contexts))
            if contexts.iter().any(|c| c.as_str() == Some(DID_CORE_CONTEXT)) => {}
        Some(Value::String(_) | Value::Array(_)) => {
            violations.push(format!("@context must include `{DID_CORE_CONTEXT}`"))
        }
        Some(_) => violations.push("@context must be a string or an array"),
    }

    match object.get("id") {
        None => violations.push("id is required"),
        Some(Value::String(id)) if id.starts_with("did:") => (),
        Some(Value::String(id)) => violations.push(format!("id `{id}` must start with `did:`")),
        Some(_) => violations.push("id must be a string"),
    }

    for_each_entry(object, "verificationMethod", &mut violations, |path, entry, violations| {
        check_verification_method(path, entry, violations)
    });

    for relationship in VERIFICATION_RELATIONSHIPS {
        for_each_entry(object, relationship, &mut violations, |path, entry, violations| {
            match entry {
                Value::String(_) => (),
                Value::Object(_) => check_verification_method(path, entry, violations),
                _ => violations.push(format!(
                    "{path} must be a reference or an embedded verification method"
                )),
            }
        });
    }

    for_each_entry(object, "service", &mut violations, check_service);

    violations
}

fn for_each_entry<F>(object: &Map<String, Value>, key: &str, violations: &mut Violations, mut f: F)
where
    F: FnMut(&str, &Value, &mut Violations),
{
    match object.get(key) {
        None => (),
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                f(&format!("{key}[{i}]"), entry, violations);
            }
        }
        Some(_) => violations.push(format!("{key} must be an array")),
    }
}

fn require_string(entry: &Value, path: &str, key: &str, violations: &mut Violations) {
    match entry.get(key) {
        Some(Value::String(value)) if !value.is_empty() => (),
        Some(Value::String(_)) => violations.push(format!("{path}.{key} must not be empty")),
        Some(_) => violations.push(format!("{path}.{key} must be a string")),
        None => violations.push(format!("{path}.{key} is required")),
    }
}

fn check_verification_method(path: &str, entry: &Value, violations: &mut Violations) {
    if !entry.is_object() {
        violations.push(format!("{path} must be an object"));
        return;
    }

    for key in ["id", "type", "controller", "publicKeyMultibase"] {
        require_string(entry, path, key, violations);
    }
}

fn check_service(path: &str, entry: &Value, violations: &mut Violations) {
    if !entry.is_object() {
        violations.push(format!("{path} must be an object"));
        return;
    }

    require_string(entry, path, "id", violations);
    require_string(entry, path, "type", violations);

    match entry.get("serviceEndpoint") {
        None | Some(Value::Null) => violations.push(format!("{path}.serviceEndpoint is required")),
        Some(endpoint) => {
            let is_beacon = entry
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|ty| ty.parse::<BeaconType>().is_ok());
            let is_bip21 = endpoint.as_str().is_some_and(|uri| uri.starts_with("bitcoin:"));

            if is_beacon && !is_bip21 {
                violations.push(format!(
                    "{path}.serviceEndpoint must be a `bitcoin:` URI for a beacon service"
                ));
            }
        }
    }
}
