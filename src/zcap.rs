//! Root capabilities for `did:btc1` updates.
//!
//! Every identifier has exactly one root capability, derived from the identifier itself. An
//! update proves authority by invoking it with a `capabilityInvocation` proof.

use crate::error::Btc1Error;
use crate::identifier::Did;
use serde::{Deserialize, Serialize};

pub mod proof;

pub const ZCAP_CONTEXT: &str = "https://w3id.org/zcap/v1";

const ROOT_CAPABILITY_PREFIX: &str = "urn:zcap:root:";

/// A ZCAP-LD root capability object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCapability {
    #[serde(rename = "@context")]
    pub context: String,

    /// `urn:zcap:root:<url-encoded identifier>`
    pub id: String,

    pub controller: String,

    pub invocation_target: String,
}

impl RootCapability {
    /// The identifier this capability grants authority over.
    pub fn did(&self) -> Result<Did, Btc1Error> {
        self.invocation_target
            .parse()
            .map_err(|err| Btc1Error::Zcap(format!("Invalid invocation target: {err}")))
    }
}

/// Derive the root capability of an identifier.
pub fn derive_root_capability(did: &Did) -> RootCapability {
    let encoded = urlencoding::encode(did.encode());

    RootCapability {
        context: ZCAP_CONTEXT.to_string(),
        id: format!("{ROOT_CAPABILITY_PREFIX}{encoded}"),
        controller: did.encode().to_string(),
        invocation_target: did.encode().to_string(),
    }
}

/// Rebuild the root capability object from its identifier.
pub fn dereference_root_capability(capability_id: &str) -> Result<RootCapability, Btc1Error> {
    let Some(encoded) = capability_id.strip_prefix(ROOT_CAPABILITY_PREFIX) else {
        return Err(Btc1Error::Zcap(format!(
            "`{capability_id}` is not a root capability"
        )));
    };

    let did: Did = urlencoding::decode(encoded)
        .map_err(|err| Btc1Error::Zcap(format!("Failed to decode DID from capability ID: {err}")))?
        .parse()
        .map_err(|err| Btc1Error::Zcap(format!("Invalid DID in root capability: {err}")))?;

    let capability = derive_root_capability(&did);
    if capability.id != capability_id {
        // Same DID, different percent-encoding.
        return Err(Btc1Error::Zcap(format!(
            "Root capability `{capability_id}` is not canonically encoded"
        )));
    }

    Ok(capability)
}
