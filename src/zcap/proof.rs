use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Types of proofs supported by the library
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    #[default]
    DataIntegrityProof,
}

/// Purposes for cryptographic proofs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofPurpose {
    Authentication,
    AssertionMethod,
    CapabilityInvocation,
    CapabilityDelegation,
}

impl fmt::Display for ProofPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => f.write_str("authentication"),
            Self::AssertionMethod => f.write_str("assertionMethod"),
            Self::CapabilityInvocation => f.write_str("capabilityInvocation"),
            Self::CapabilityDelegation => f.write_str("capabilityDelegation"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptoSuiteName {
    #[default]
    #[serde(rename = "bip340-jcs-2025")]
    Bip340Jcs2025,
}

impl fmt::Display for CryptoSuiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bip340Jcs2025 => f.write_str("bip340-jcs-2025"),
        }
    }
}

/// ZCAP actions an invocation may perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityAction {
    #[default]
    Write,
}

/// Everything a proof commits to except its value: the proof configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOptions {
    #[serde(rename = "@context", default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,

    #[serde(rename = "type")]
    pub proof_type: ProofType,

    pub cryptosuite: CryptoSuiteName,

    /// Verification method that can be used to verify the proof
    pub verification_method: String,

    pub proof_purpose: ProofPurpose,

    /// ZCAP: Capability being invoked
    pub capability: String,

    /// ZCAP: Action being performed with the capability
    pub capability_action: CapabilityAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl ProofOptions {
    /// Options for invoking `capability` with the key `verification_method`.
    pub fn capability_invocation(
        verification_method: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            context: Vec::new(),
            proof_type: ProofType::DataIntegrityProof,
            cryptosuite: CryptoSuiteName::Bip340Jcs2025,
            verification_method: verification_method.into(),
            proof_purpose: ProofPurpose::CapabilityInvocation,
            capability: capability.into(),
            capability_action: CapabilityAction::Write,
            created: None,
        }
    }
}

/// A Data Integrity proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(flatten)]
    pub options: ProofOptions,

    /// Multibase (base58btc) BIP340 signature
    pub proof_value: String,
}
