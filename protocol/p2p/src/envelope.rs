//! The canonical wire envelope:
//!
//! ```text
//! version:u8 ∥ type:u8 ∥ message_id:16B ∥ ttl:u8 ∥ origin:32B
//!           ∥ payload_len:u32 ∥ payload ∥ sig:64B
//! ```
//!
//! The signature covers everything except `ttl`, which relays decrement in
//! flight, and itself.

use doin_consensus_core::constants::PROTOCOL_VERSION;
use doin_consensus_core::encoding::{CanonicalReader, CanonicalWriter};
use doin_consensus_core::peer::{PeerId, PEER_ID_SIZE};
use doin_consensus_core::sign::{self, Signature, SIGNATURE_SIZE};
use doin_consensus_core::Uuid;

use crate::errors::{ProtocolError, ProtocolResult};
use crate::message::Payload;

pub const DEFAULT_TTL: u8 = 5;

/// Upper bound on a single payload; large enough for a full block-sync
/// response, small enough to bound relay memory.
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub message_id: Uuid,
    pub ttl: u8,
    pub origin: PeerId,
    pub payload: Payload,
    pub signature: Signature,
}

impl Envelope {
    /// Builds and signs a fresh envelope originating at `keypair`'s peer.
    pub fn new(keypair: &secp256k1::Keypair, payload: Payload, ttl: u8) -> Self {
        let origin = sign::peer_id_of(keypair);
        let message_id = Uuid::new_v4();
        let signature = sign::sign_message(keypair, &Self::signing_bytes(PROTOCOL_VERSION, message_id, origin, &payload));
        Self { version: PROTOCOL_VERSION, message_id, ttl, origin, payload, signature }
    }

    fn signing_bytes(version: u8, message_id: Uuid, origin: PeerId, payload: &Payload) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        writer
            .write_u8(version)
            .write_u8(payload.type_code())
            .write_uuid(message_id)
            .write_raw(origin.as_bytes())
            .write_var_bytes(&payload.to_bytes());
        writer.finish()
    }

    pub fn verify_signature(&self) -> ProtocolResult<()> {
        let bytes = Self::signing_bytes(self.version, self.message_id, self.origin, &self.payload);
        sign::verify_message(&self.origin, &bytes, &self.signature).map_err(|_| ProtocolError::BadSignature(self.origin))
    }

    /// A copy for relaying with one hop consumed. `None` once the ttl is spent.
    pub fn decremented(&self) -> Option<Envelope> {
        (self.ttl > 0).then(|| Envelope { ttl: self.ttl - 1, ..self.clone() })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = self.payload.to_bytes();
        let mut writer = CanonicalWriter::new();
        writer
            .write_u8(self.version)
            .write_u8(self.payload.type_code())
            .write_uuid(self.message_id)
            .write_u8(self.ttl)
            .write_raw(self.origin.as_bytes())
            .write_u32(payload.len() as u32)
            .write_raw(&payload)
            .write_raw(&self.signature.0);
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut reader = CanonicalReader::new(bytes);
        let version = reader.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let type_code = reader.read_u8()?;
        let message_id = reader.read_uuid()?;
        let ttl = reader.read_u8()?;
        let origin = PeerId::from_slice(reader.read_raw(PEER_ID_SIZE)?).expect("read exactly PEER_ID_SIZE bytes");
        let payload_len = reader.read_u32()? as usize;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::OversizedPayload(payload_len, MAX_PAYLOAD_BYTES));
        }
        let payload_bytes = reader.read_raw(payload_len)?;
        let payload = Payload::from_bytes(type_code, payload_bytes)?;
        let signature = Signature(reader.read_raw(SIGNATURE_SIZE)?.try_into().expect("read exactly SIGNATURE_SIZE bytes"));
        reader.finish()?;
        Ok(Self { version, message_id, ttl, origin, payload, signature })
    }
}
