use crate::canonical_hash::Sha256Hash;
use onlyerror::Error;
use serde_json::{Value, json};
use std::fmt;

// Errors defined by the DID:BTC1 specification and other related specifications.
pub trait ProblemDetails {
    fn details(&self) -> Option<Value> {
        None
    }
}

/// Every problem found while validating a document.
///
/// Validators push as they go and only fail once the whole document was inspected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: impl Into<String>) {
        self.0.push(violation.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `Ok(())` when nothing was recorded, otherwise [`Btc1Error::InvalidDidDocument`].
    pub fn into_result(self) -> Result<(), Btc1Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Btc1Error::InvalidDidDocument(self))
        }
    }
}

impl From<String> for Violations {
    fn from(violation: String) -> Self {
        Self(vec![violation])
    }
}

impl From<&str> for Violations {
    fn from(violation: &str) -> Self {
        Self(vec![violation.to_string()])
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum Btc1Error {
    // Errors from DID Resolution Spec
    //
    /// An invalid DID was detected during DID Resolution.
    InvalidDid(String),

    /// The DID method is not supported.
    MethodNotSupported(String),

    /// The DID document was malformed.
    InvalidDidDocument(Violations),

    /// The DID document for the requested version was not found.
    NotFound(String),

    // Errors from DID BTC1 Spec
    //
    /// Invalid public key
    InvalidPublicKey(String),

    /// Invalid key material
    InvalidKeyMaterial(String),

    /// Bitcoin node unavailable
    BlockchainUnavailable(String),

    /// Beacon type is not yet implemented
    NotYetImplemented(String),

    /// Sidecar data was invalid
    InvalidSidecarData(String),

    /// Update payload was published late
    LatePublishingError(String),

    /// Invalid Update Proof
    InvalidUpdateProof(String),

    /// ZCAP (Authorization Capabilities) related errors
    Zcap(String),

    /// Problems when creating or applying a DID Update
    InvalidDidUpdate(String),

    /// Resolution was cancelled
    Cancelled(String),

    // Errors from Verifiable Credentials Data Integrity Spec
    //
    /// Proof verification error
    ProofVerification(String),

    /// Proof generation error
    ProofGeneration(String),
}

impl Btc1Error {
    pub(crate) fn late_publishing(found_hash: Sha256Hash, expected_hash: Sha256Hash) -> Self {
        Self::LatePublishingError(format!(
            "Found hash `{}`, expected `{}`",
            hex::encode(found_hash.0),
            hex::encode(expected_hash.0),
        ))
    }

    /// Shorthand for a document error with a single violation.
    pub(crate) fn invalid_document(violation: impl Into<String>) -> Self {
        Self::InvalidDidDocument(Violations::from(violation.into()))
    }

    /// The DID resolution error code, as carried in `didResolutionMetadata.error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDid(_) => "invalidDid",
            Self::MethodNotSupported(_) => "methodNotSupported",
            Self::InvalidDidDocument(_) => "invalidDidDocument",
            Self::NotFound(_) => "notFound",
            Self::InvalidPublicKey(_) => "invalidPublicKey",
            Self::InvalidKeyMaterial(_) => "invalidKeyMaterial",
            Self::BlockchainUnavailable(_) => "blockchainUnavailable",
            Self::NotYetImplemented(_) => "notYetImplemented",
            Self::InvalidSidecarData(_) => "invalidSidecarData",
            Self::LatePublishingError(_) => "latePublishingError",
            Self::InvalidUpdateProof(_) => "invalidUpdateProof",
            Self::Zcap(_) => "zcap",
            Self::InvalidDidUpdate(_) => "invalidDidUpdate",
            Self::Cancelled(_) => "cancelled",
            Self::ProofVerification(_) => "proofVerificationError",
            Self::ProofGeneration(_) => "proofGenerationError",
        }
    }

    /// Structural errors are never worth retrying; node failures and cancellation may be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BlockchainUnavailable(_) | Self::Cancelled(_))
    }

    fn detail(&self) -> String {
        match self {
            Self::InvalidDidDocument(violations) => violations.to_string(),
            Self::InvalidDid(detail)
            | Self::MethodNotSupported(detail)
            | Self::NotFound(detail)
            | Self::InvalidPublicKey(detail)
            | Self::InvalidKeyMaterial(detail)
            | Self::BlockchainUnavailable(detail)
            | Self::NotYetImplemented(detail)
            | Self::InvalidSidecarData(detail)
            | Self::LatePublishingError(detail)
            | Self::InvalidUpdateProof(detail)
            | Self::Zcap(detail)
            | Self::InvalidDidUpdate(detail)
            | Self::Cancelled(detail)
            | Self::ProofVerification(detail)
            | Self::ProofGeneration(detail) => detail.clone(),
        }
    }
}

impl ProblemDetails for Btc1Error {
    fn details(&self) -> Option<Value> {
        let prefix = match self {
            Self::InvalidDid(_)
            | Self::MethodNotSupported(_)
            | Self::InvalidDidDocument(_)
            | Self::NotFound(_) => "https://www.w3.org/ns/did",
            // From: https://github.com/dcdpr/did-btc1/issues/71#issuecomment-3179550385
            _ => "https://btc1.dev/context/v1",
        };

        let name = match self {
            Self::InvalidDid(_) => "INVALID_DID",
            Self::MethodNotSupported(_) => "METHOD_NOT_SUPPORTED",
            Self::InvalidDidDocument(_) => "INVALID_DID_DOCUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidPublicKey(_) => "INVALID_PUBLIC_KEY",
            Self::InvalidKeyMaterial(_) => "INVALID_KEY_MATERIAL",
            Self::BlockchainUnavailable(_) => "BLOCKCHAIN_UNAVAILABLE",
            Self::NotYetImplemented(_) => "NOT_YET_IMPLEMENTED",
            Self::InvalidSidecarData(_) => "INVALID_SIDECAR_DATA",
            Self::LatePublishingError(_) => "LATE_PUBLISHING_ERROR",
            Self::InvalidUpdateProof(_) => "INVALID_UPDATE_PROOF",
            Self::Zcap(_) => "ZCAP",
            Self::InvalidDidUpdate(_) => "INVALID_DID_UPDATE",
            Self::Cancelled(_) => "CANCELLED",
            Self::ProofVerification(_) => "PROOF_VERIFICATION_ERROR",
            Self::ProofGeneration(_) => "PROOF_GENERATION_ERROR",
        };

        let mut details = json!({
            "type": format!("{prefix}#{name}"),
            "title": self.to_string(),
            "detail": self.detail(),
        });

        if let Self::InvalidDidDocument(violations) = self {
            details["violations"] = violations.iter().collect::<Vec<_>>().into();
        }

        Some(details)
    }
}

impl From<crate::identifier::Error> for Btc1Error {
    fn from(err: crate::identifier::Error) -> Self {
        match err {
            crate::identifier::Error::MethodNotSupported(method) => {
                Self::MethodNotSupported(format!("Did method not supported: {method}"))
            }
            err => Self::InvalidDid(err.to_string()),
        }
    }
}

impl From<crate::key::Error> for Btc1Error {
    fn from(err: crate::key::Error) -> Self {
        Self::InvalidPublicKey(err.to_string())
    }
}

impl From<crate::beacon::Error> for Btc1Error {
    fn from(err: crate::beacon::Error) -> Self {
        Self::invalid_document(err.to_string())
    }
}

impl From<crate::blockchain::Error> for Btc1Error {
    fn from(err: crate::blockchain::Error) -> Self {
        Self::BlockchainUnavailable(err.to_string())
    }
}
