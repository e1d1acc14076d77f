use doin_hashes::HasherBase;

pub mod block;
pub mod optima;
pub mod seed;

/// Canonical-form writes directly into a hasher state, mirroring
/// [`crate::encoding::CanonicalWriter`]: big-endian integers, `f64` as its
/// big-endian bit pattern, length-prefixed variable bytes.
pub trait HasherExtensions {
    /// Writes the len as u64 big endian bytes
    fn write_len(&mut self, len: usize) -> &mut Self;

    /// Writes the boolean as a u8
    fn write_bool(&mut self, element: bool) -> &mut Self;

    /// Writes the u16 as a big endian u8 array
    fn write_u16(&mut self, element: u16) -> &mut Self;

    /// Writes the u64 as a big endian u8 array
    fn write_u64(&mut self, element: u64) -> &mut Self;

    /// Writes the f64 bit pattern as a big endian u8 array
    fn write_f64(&mut self, element: f64) -> &mut Self;

    /// Writes the number of bytes followed by the bytes themselves
    fn write_var_bytes(&mut self, bytes: &[u8]) -> &mut Self;
}

/// Fails at compile time if `usize::MAX > u64::MAX`.
/// If `usize` will ever grow larger than `u64`, we need to verify
/// that the lossy conversion below at `write_len` remains precise.
const _: usize = u64::MAX as usize - usize::MAX;

impl<T: HasherBase> HasherExtensions for T {
    #[inline(always)]
    fn write_len(&mut self, len: usize) -> &mut Self {
        self.update((len as u64).to_be_bytes())
    }

    #[inline(always)]
    fn write_bool(&mut self, element: bool) -> &mut Self {
        self.update(if element { [1u8] } else { [0u8] })
    }

    #[inline(always)]
    fn write_u16(&mut self, element: u16) -> &mut Self {
        self.update(element.to_be_bytes())
    }

    #[inline(always)]
    fn write_u64(&mut self, element: u64) -> &mut Self {
        self.update(element.to_be_bytes())
    }

    #[inline(always)]
    fn write_f64(&mut self, element: f64) -> &mut Self {
        self.update(element.to_bits().to_be_bytes())
    }

    #[inline(always)]
    fn write_var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_len(bytes.len()).update(bytes)
    }
}
