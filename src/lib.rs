//! The `did:btc1` DID method: identifiers, initial documents, signed updates and resolution
//! against a Bitcoin node.

pub mod beacon;
pub mod blockchain;
pub mod canonical_hash;
pub mod document;
pub mod error;
pub mod identifier;
pub mod key;
pub mod resolver;
pub mod signer;
pub mod store;
pub mod update;
pub mod zcap;

mod cryptosuite;

// Re-exports of key components
pub use document::Document;
pub use error::Btc1Error;
pub use identifier::{Did, DidComponents, DidVersion, IdType, Network};
pub use key::{KeyMaterial, KeyPair, PublicKey, SecretKey};
pub use resolver::{ResolutionOptions, ResolutionResult, SidecarData, resolve};
pub use update::{Update, announce_payload, apply_update, construct_payload, invoke_payload};
