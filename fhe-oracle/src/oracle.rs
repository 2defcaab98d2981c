//! Decryption oracle contract and the in-process reference oracle.
//!
//! A ledger asks the oracle to decrypt a batch of handles and immediately gets a [`RequestId`]
//! back. Some time later the oracle delivers a [`Delivery`] carrying the cleartext and a proof
//! binding it to that request id. Ledgers must run the proof through a [`ProofVerifier`] before
//! trusting a single byte of cleartext.

use crate::constants::PROOF_DOMAIN;
use crate::fhe::{FheError, LocalFhe};
use crate::types::{encode_cleartext, CiphertextHandle, CodecError, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("decryption request carries no handles")]
    EmptyRequest,

    #[error("malformed handle: {0}")]
    MalformedHandle(#[from] FheError),

    #[error("cleartext encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("proof rejected: {0}")]
    Proof(#[from] SignatureError),

    #[error("delivery channel closed")]
    ChannelClosed,
}

/// Asynchronous decryption service consumed by the ledger.
pub trait DecryptionOracle: Send + Sync {
    /// Queue `handles` for decryption. Returns without waiting for the cleartext.
    fn request_decryption(&self, handles: &[CiphertextHandle]) -> Result<RequestId, OracleError>;
}

/// The oracle's signature-verification contract.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, request_id: &RequestId, cleartext: &[u8], proof: &[u8]) -> Result<(), OracleError>;
}

/// One oracle callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub request_id: RequestId,
    pub cleartext: Vec<u8>,
    pub proof: Vec<u8>,
}

/// Bytes the oracle signs for a delivery.
///
/// Length-prefixing the cleartext keeps `(request_id, cleartext)` pairs unambiguous.
pub fn decryption_message(request_id: &RequestId, cleartext: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(PROOF_DOMAIN.len() + 16 + 8 + cleartext.len());
    msg.extend_from_slice(PROOF_DOMAIN);
    msg.extend_from_slice(request_id.as_bytes());
    msg.extend_from_slice(&(cleartext.len() as u64).to_le_bytes());
    msg.extend_from_slice(cleartext);
    msg
}

/// Verifies proofs against a pinned oracle key.
#[derive(Clone, Debug)]
pub struct OracleVerifier {
    key: VerifyingKey,
}

impl OracleVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }
}

impl ProofVerifier for OracleVerifier {
    fn verify(&self, request_id: &RequestId, cleartext: &[u8], proof: &[u8]) -> Result<(), OracleError> {
        let signature = Signature::from_slice(proof)?;
        self.key
            .verify_strict(&decryption_message(request_id, cleartext), &signature)?;
        Ok(())
    }
}

/// Reference oracle: decrypts from a [`LocalFhe`] vault and signs each delivery with one Ed25519
/// key.
///
/// Deliveries are pushed onto an unbounded channel; whoever owns the receiver decides when they
/// reach the ledger, which is how the oracle's turnaround delay is modelled.
pub struct LocalOracle {
    fhe: Arc<LocalFhe>,
    key: SigningKey,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl LocalOracle {
    pub fn new(fhe: Arc<LocalFhe>, key: SigningKey) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { fhe, key, deliveries: tx }, rx)
    }

    pub fn verifier(&self) -> OracleVerifier {
        OracleVerifier::new(self.key.verifying_key())
    }

    /// Decrypt and sign without enqueueing; lets hosts build deliveries out of band.
    pub fn decrypt_and_sign(&self, request_id: RequestId, handles: &[CiphertextHandle]) -> Result<Delivery, OracleError> {
        if handles.is_empty() {
            return Err(OracleError::EmptyRequest);
        }

        let values = handles
            .iter()
            .map(|h| self.fhe.reveal(h))
            .collect::<Result<Vec<_>, _>>()?;
        let cleartext = encode_cleartext(&values)?;

        let proof = self
            .key
            .sign(&decryption_message(&request_id, &cleartext))
            .to_bytes()
            .to_vec();

        Ok(Delivery { request_id, cleartext, proof })
    }
}

impl DecryptionOracle for LocalOracle {
    fn request_decryption(&self, handles: &[CiphertextHandle]) -> Result<RequestId, OracleError> {
        let request_id = RequestId::new();
        let delivery = self.decrypt_and_sign(request_id, handles)?;
        self.deliveries.send(delivery).map_err(|_| OracleError::ChannelClosed)?;
        debug!(%request_id, handles = handles.len(), "decryption queued");
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{decode_cleartext, Plaintext};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn oracle() -> (Arc<LocalFhe>, LocalOracle, mpsc::UnboundedReceiver<Delivery>) {
        let fhe = Arc::new(LocalFhe::new());
        let key = SigningKey::generate(&mut ChaCha20Rng::from_seed([3u8; 32]));
        let (oracle, rx) = LocalOracle::new(fhe.clone(), key);
        (fhe, oracle, rx)
    }

    #[test]
    fn request_enqueues_a_verifiable_delivery() {
        let (fhe, oracle, mut rx) = oracle();
        let charge = fhe.encrypt_text("Theft").unwrap();
        let months = fhe.encrypt_uint(18).unwrap();

        let request_id = oracle.request_decryption(&[charge, months]).unwrap();
        let delivery = rx.try_recv().unwrap();

        assert_eq!(delivery.request_id, request_id);
        assert_eq!(
            decode_cleartext(&delivery.cleartext).unwrap(),
            vec![Plaintext::Text("Theft".into()), Plaintext::Uint(18)]
        );
        oracle
            .verifier()
            .verify(&request_id, &delivery.cleartext, &delivery.proof)
            .unwrap();
    }

    #[test]
    fn proof_is_bound_to_request_id_and_cleartext() {
        let (fhe, oracle, mut rx) = oracle();
        let months = fhe.encrypt_uint(18).unwrap();
        let request_id = oracle.request_decryption(&[months]).unwrap();
        let delivery = rx.try_recv().unwrap();
        let verifier = oracle.verifier();

        let forged = encode_cleartext(&[Plaintext::Uint(1)]).unwrap();
        assert!(verifier.verify(&request_id, &forged, &delivery.proof).is_err());
        assert!(verifier.verify(&RequestId::new(), &delivery.cleartext, &delivery.proof).is_err());
        assert!(matches!(
            verifier.verify(&request_id, &delivery.cleartext, &delivery.proof[..10]),
            Err(OracleError::Proof(_))
        ));

        let mut flipped = delivery.proof.clone();
        flipped[0] ^= 0x80;
        assert!(matches!(
            verifier.verify(&request_id, &delivery.cleartext, &flipped),
            Err(OracleError::Proof(_))
        ));
        assert_eq!(delivery.proof.len(), SIGNATURE_LENGTH);
    }

    #[test]
    fn malformed_requests_fail_without_delivery() {
        let (_fhe, oracle, mut rx) = oracle();
        assert!(matches!(oracle.request_decryption(&[]), Err(OracleError::EmptyRequest)));
        assert!(matches!(
            oracle.request_decryption(&[CiphertextHandle::random()]),
            Err(OracleError::MalformedHandle(FheError::UnknownHandle(_)))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_surfaces_as_channel_closed() {
        let (fhe, oracle, rx) = oracle();
        drop(rx);
        let months = fhe.encrypt_uint(1).unwrap();
        assert!(matches!(oracle.request_decryption(&[months]), Err(OracleError::ChannelClosed)));
    }
}
