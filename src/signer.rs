//! Message signing: ed25519 over the exact JSON bytes of an envelope.

use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::utils::error::{Error, Result};

/// CBOR header for a 32-byte byte string, as found in Cardano text envelopes.
const CBOR_BYTES_32: [u8; 2] = [0x58, 0x20];

/// Signed, transmittable form of one envelope. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    /// The envelope exactly as it was signed
    pub message: String,
    pub signature: String,
    pub verification_key: String,
}

impl SignedPayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the signature against the embedded verification key.
    pub fn verify(&self) -> Result<()> {
        let key: [u8; 32] = decode_hex(&self.verification_key)?
            .try_into()
            .map_err(|_| Error::Signing("verification key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&key).map_err(|e| Error::Signing(e.to_string()))?;
        let signature = Signature::from_slice(&decode_hex(&self.signature)?)
            .map_err(|e| Error::Signing(e.to_string()))?;
        key.verify(self.message.as_bytes(), &signature)
            .map_err(|e| Error::Signing(format!("signature does not verify: {}", e)))
    }
}

/// Holds the node signing key for the duration of a run.
pub struct MessageSigner {
    key: SigningKey,
}

impl std::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSigner")
            .field("verification_key", &self.verification_key_hex())
            .finish()
    }
}

impl MessageSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(seed) }
    }

    /// Load the signing key from disk. See [`MessageSigner::parse_key`] for accepted formats.
    pub fn from_key_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Signing(format!("cannot read signing key {}: {}", path.display(), e))
        })?;
        Self::parse_key(&text)
    }

    /// Accepts a bare 64-character hex seed, or a text envelope
    /// `{"type": .., "cborHex": "5820<seed hex>"}`.
    pub fn parse_key(text: &str) -> Result<Self> {
        let text = text.trim();
        let hex_str = if text.starts_with('{') {
            let envelope: Value = serde_json::from_str(text)
                .map_err(|e| Error::Signing(format!("invalid key envelope: {}", e)))?;
            envelope
                .get("cborHex")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Signing("key envelope has no cborHex".into()))?
                .to_string()
        } else {
            text.to_string()
        };

        let mut bytes = decode_hex(&hex_str)?;
        if bytes.len() == 34 && bytes[..2] == CBOR_BYTES_32 {
            bytes.drain(..2);
        }
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Signing(format!("signing key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(&seed))
    }

    pub fn verification_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Sign an envelope. Deterministic for a given key and envelope.
    pub fn sign(&self, envelope: &Envelope) -> Result<SignedPayload> {
        debug!("signing collected data for '{}'", envelope.feed());
        let message = serde_json::to_string(envelope)?;
        let signature: Signature = self.key.sign(message.as_bytes());
        Ok(SignedPayload {
            message,
            signature: hex::encode(signature.to_bytes()),
            verification_key: self.verification_key_hex(),
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim()).map_err(|e| Error::Signing(format!("invalid hex: {}", e)))
}
