//! Schnorr signing over canonical digests.
//!
//! A peer's identity is the x-only public key of its keypair; all protocol
//! signatures (commits, reveals, votes, flood envelopes) are 64-byte schnorr
//! signatures over a domain-separated digest of the canonical message bytes.

use secp256k1::{Keypair, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use doin_hashes::{Hash, HasherBase, MessageSigningHash};

use crate::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter, EncodeResult};
use crate::peer::PeerId;

pub const SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Secp256k1 -> {0}")]
    Secp256k1Error(#[from] secp256k1::Error),

    #[error("signature does not verify against peer {0}")]
    BadSignature(PeerId),
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes_array")] pub [u8; SIGNATURE_SIZE]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature([0; SIGNATURE_SIZE])
    }
}

impl CanonicalEncode for Signature {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer.write_raw(&self.0);
    }
}

impl CanonicalDecode for Signature {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(Signature(reader.read_raw(SIGNATURE_SIZE)?.try_into().unwrap()))
    }
}

/// Fixed-size serde helper, avoids pulling serde_bytes for a single array
mod serde_bytes_array {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let vec = Vec::<u8>::deserialize(deserializer)?;
        vec.try_into().map_err(|_| D::Error::custom("expected 64 bytes"))
    }
}

/// Digests canonical message bytes under the message-signing domain.
pub fn signing_digest(message: &[u8]) -> Hash {
    let mut hasher = MessageSigningHash::new();
    hasher.update(message);
    hasher.finalize()
}

/// Signs the digest of `message` with the peer's schnorr keypair.
pub fn sign_message(keypair: &Keypair, message: &[u8]) -> Signature {
    let digest = signing_digest(message);
    let msg = secp256k1::Message::from_digest(*digest.as_bytes());
    Signature(*keypair.sign_schnorr(msg).as_ref())
}

/// Verifies `signature` over the digest of `message` against `peer`.
pub fn verify_message(peer: &PeerId, message: &[u8], signature: &Signature) -> Result<(), Error> {
    let pubkey = XOnlyPublicKey::from_slice(peer.as_bytes())?;
    let digest = signing_digest(message);
    let msg = secp256k1::Message::from_digest(*digest.as_bytes());
    let sig = secp256k1::schnorr::Signature::from_slice(&signature.0)?;
    SECP256K1.verify_schnorr(&sig, &msg, &pubkey).map_err(|_| Error::BadSignature(*peer))
}

/// Derives the peer identity of a keypair.
pub fn peer_id_of(keypair: &Keypair) -> PeerId {
    PeerId::from(keypair.x_only_public_key().0)
}

/// Deterministic keypair from a 32-byte secret. Test and simulation helper.
pub fn keypair_from_secret(secret: &[u8; 32]) -> Result<Keypair, Error> {
    Ok(Keypair::from_seckey_slice(SECP256K1, secret)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair(byte: u8) -> Keypair {
        keypair_from_secret(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = test_keypair(1);
        let peer = peer_id_of(&keypair);
        let sig = sign_message(&keypair, b"vote payload");
        verify_message(&peer, b"vote payload", &sig).unwrap();
    }

    #[test]
    fn test_tampered_message_fails() {
        let keypair = test_keypair(2);
        let peer = peer_id_of(&keypair);
        let sig = sign_message(&keypair, b"vote payload");
        assert!(verify_message(&peer, b"vote payloae", &sig).is_err());
    }

    #[test]
    fn test_wrong_peer_fails() {
        let keypair = test_keypair(3);
        let other = peer_id_of(&test_keypair(4));
        let sig = sign_message(&keypair, b"vote payload");
        assert!(verify_message(&other, b"vote payload", &sig).is_err());
    }
}
