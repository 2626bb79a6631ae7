//! Codec implementations for common types.

pub mod bytes;
pub mod map;
pub mod primitives;
pub mod vec;

use crate::{varint, Error, RangeCfg};
use ::bytes::{Buf, BufMut};

/// Writes a collection length prefix.
///
/// For portability, lengths must fit within a `u32`.
pub(crate) fn write_len(len: usize, buf: &mut impl BufMut) {
    let len = u32::try_from(len).expect("length exceeds u32");
    varint::write(len, buf);
}

/// Returns the encoded size of a collection length prefix.
pub(crate) fn len_size(len: usize) -> usize {
    let len = u32::try_from(len).expect("length exceeds u32");
    varint::size(len)
}

/// Reads a collection length prefix and checks it against `range`.
pub(crate) fn read_len(buf: &mut impl Buf, range: &RangeCfg) -> Result<usize, Error> {
    let len = varint::read::<u32>(buf)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidUsize)?;
    if !range.contains(&len) {
        return Err(Error::InvalidLength(len));
    }
    Ok(len)
}
