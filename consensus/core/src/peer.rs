use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::{self, FromStr};

use crate::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter, EncodeResult};

pub const PEER_ID_SIZE: usize = 32;

/// A stable peer identity: the serialized x-only public key of the peer's
/// schnorr keypair. Used as `optimizer_id`, `evaluator_id`, `generator_id`
/// and as the flood envelope origin. Non-transferable.
///
/// Ordering is lexicographic over the raw key bytes; quorum selection and
/// fork tie-breaks rely on it.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    #[inline(always)]
    pub const fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Self {
        PeerId(bytes)
    }

    #[inline(always)]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(PeerId)
    }
}

impl AsRef<[u8]> for PeerId {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut hex = [0u8; PEER_ID_SIZE * 2];
        hex::encode_to_slice(self.0, &mut hex).expect("The output is exactly twice the size of the input");
        f.write_str(str::from_utf8(&hex).expect("hex is always valid UTF-8"))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for PeerId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; PEER_ID_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(PeerId(bytes))
    }
}

impl From<secp256k1::XOnlyPublicKey> for PeerId {
    fn from(key: secp256k1::XOnlyPublicKey) -> Self {
        PeerId(key.serialize())
    }
}

impl CanonicalEncode for PeerId {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer.write_raw(&self.0);
    }
}

impl CanonicalDecode for PeerId {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(PeerId(reader.read_raw(PEER_ID_SIZE)?.try_into().unwrap()))
    }
}
