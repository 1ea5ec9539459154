//! The `bip340-jcs-2025` Data Integrity cryptosuite.
//!
//! Documents are canonicalized with JCS, hashed with SHA-256 and signed with BIP340 Schnorr.
//! See [Data Integrity BIP340 Cryptosuites].
//!
//! [Data Integrity BIP340 Cryptosuites]: https://dcdpr.github.io/data-integrity-schnorr-secp256k1/

use crate::canonical_hash::{Sha256Hash, canonicalize};
use crate::error::Btc1Error;
use crate::key::XOnlyPublicKey;
use crate::signer::{KeyRef, Signer, verify_schnorr};
use crate::update::{UnsecuredUpdate, Update};
use crate::zcap::proof::{CryptoSuiteName, Proof, ProofOptions, ProofPurpose};
use multibase::Base;
use secp256k1::schnorr::Signature;
use sha2::{Digest as _, Sha256};

pub(crate) enum CryptoSuite {
    Bip340Jcs,
}

impl From<CryptoSuiteName> for CryptoSuite {
    fn from(name: CryptoSuiteName) -> Self {
        match name {
            CryptoSuiteName::Bip340Jcs2025 => Self::Bip340Jcs,
        }
    }
}

impl CryptoSuite {
    /// Sign `unsecured_update` with `key`, committing to `options` and the update's `@context`.
    pub(crate) fn create_proof(
        &self,
        unsecured_update: UnsecuredUpdate,
        mut options: ProofOptions,
        signer: &dyn Signer,
        key: &KeyRef,
    ) -> Result<Update, Btc1Error> {
        options.context = unsecured_update.context().to_vec();

        let proof_config = self
            .configure_proof(&options)
            .map_err(Btc1Error::ProofGeneration)?;
        let transformed_data = self.transform(&unsecured_update);
        let hash_data = self.hash(&transformed_data, &proof_config);

        let signature = signer.sign(key, &hash_data)?;
        let proof = Proof {
            options,
            proof_value: multibase::encode(Base::Base58Btc, signature.serialize()),
        };

        Ok(unsecured_update.with_proof(proof))
    }

    /// Verify a secured update, including the purpose its proof was made for.
    pub(crate) fn data_integrity_verify_proof(
        &self,
        public_key: &XOnlyPublicKey,
        update: &Update,
        expected_proof_purpose: ProofPurpose,
    ) -> Result<(), Btc1Error> {
        if update.proof().options.proof_purpose != expected_proof_purpose {
            return Err(Btc1Error::ProofVerification(format!(
                "Proof purpose was expected to be {expected_proof_purpose}"
            )));
        }

        self.verify_proof(public_key, update)
    }

    fn verify_proof(&self, public_key: &XOnlyPublicKey, update: &Update) -> Result<(), Btc1Error> {
        let proof = update.proof();
        let signature = decode_proof_value(&proof.proof_value)?;

        if proof.options.context != update.unsecured().context() {
            return Err(Btc1Error::InvalidUpdateProof(
                "Proof context does not match update context".into(),
            ));
        }

        let transformed_data = self.transform(update.unsecured());
        let proof_config = self
            .configure_proof(&proof.options)
            .map_err(Btc1Error::ProofVerification)?;
        let hash_data = self.hash(&transformed_data, &proof_config);

        if verify_schnorr(public_key, &signature, &hash_data) {
            Ok(())
        } else {
            Err(Btc1Error::InvalidUpdateProof("Verification failed".into()))
        }
    }

    fn transform(&self, unsecured_update: &UnsecuredUpdate) -> String {
        match self {
            Self::Bip340Jcs => canonicalize(unsecured_update.as_ref()),
        }
    }

    /// SHA-256 of the concatenated SHA-256 digests of the proof config and the document.
    fn hash(&self, transformed_data: &str, proof_config: &str) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(proof_config));
        hasher.update(Sha256::digest(transformed_data));

        Sha256Hash(hasher.finalize().into())
    }

    fn configure_proof(&self, options: &ProofOptions) -> Result<String, String> {
        let options = serde_json::to_value(options).map_err(|err| err.to_string())?;

        match self {
            Self::Bip340Jcs => Ok(canonicalize(&options)),
        }
    }
}

fn decode_proof_value(proof_value: &str) -> Result<Signature, Btc1Error> {
    let invalid = || Btc1Error::ProofVerification("Invalid proofValue encoding".into());

    match multibase::decode(proof_value) {
        Ok((Base::Base58Btc, bytes)) => Signature::from_slice(&bytes).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SecretKey;
    use crate::signer::KeyManager;
    use crate::zcap::proof::ProofOptions;
    use serde_json::json;

    fn unsecured() -> UnsecuredUpdate {
        UnsecuredUpdate::from_json_value(json!({
            "@context": ["https://w3id.org/zcap/v1"],
            "patch": [{"op": "add", "path": "/foo", "value": "bar"}],
            "sourceHash": "zsource",
            "targetHash": "ztarget",
            "targetVersionId": 2,
        }))
        .unwrap()
    }

    fn signed() -> (Update, XOnlyPublicKey) {
        let mut signer = KeyManager::new();
        let key = signer.import_key(SecretKey::from_slice(&[1; 32]).unwrap());
        let options = ProofOptions::capability_invocation("did:btc1:x#key-0", "urn:zcap:root:x");

        let update = CryptoSuite::Bip340Jcs
            .create_proof(unsecured(), options, &signer, &key)
            .unwrap();

        (update, key.public_key().unwrap())
    }

    #[test]
    fn test_create_then_verify() {
        let (update, public_key) = signed();

        assert_eq!(update.proof().options.context, ["https://w3id.org/zcap/v1"]);
        assert!(update.proof().proof_value.starts_with('z'));
        CryptoSuite::Bip340Jcs
            .data_integrity_verify_proof(&public_key, &update, ProofPurpose::CapabilityInvocation)
            .unwrap();
    }

    #[test]
    fn test_wrong_purpose() {
        let (update, public_key) = signed();

        assert!(matches!(
            CryptoSuite::Bip340Jcs.data_integrity_verify_proof(
                &public_key,
                &update,
                ProofPurpose::Authentication
            ),
            Err(Btc1Error::ProofVerification(_))
        ));
    }

    #[test]
    fn test_tampered_update_fails() {
        let (update, public_key) = signed();

        let mut json = update.as_ref().clone();
        json["targetVersionId"] = json!(3);
        let tampered = Update::from_json_value(json).unwrap();

        assert!(matches!(
            CryptoSuite::Bip340Jcs.data_integrity_verify_proof(
                &public_key,
                &tampered,
                ProofPurpose::CapabilityInvocation
            ),
            Err(Btc1Error::InvalidUpdateProof(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let (update, _) = signed();
        let other = SecretKey::from_slice(&[2; 32])
            .unwrap()
            .x_only_public_key(&secp256k1::Secp256k1::new())
            .0;

        assert!(
            CryptoSuite::Bip340Jcs
                .data_integrity_verify_proof(&other, &update, ProofPurpose::CapabilityInvocation)
                .is_err()
        );
    }

    #[test]
    fn test_invalid_proof_value() {
        assert!(decode_proof_value("not multibase").is_err());
        assert!(decode_proof_value("z1111").is_err());
        assert!(decode_proof_value(&multibase::encode(Base::Base64, [0; 64])).is_err());
    }
}
