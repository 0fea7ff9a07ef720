//! Low-level box writing helpers.
//!
//! Boxes are written with a placeholder size that is patched once the
//! contents are known, so nested boxes can be built in a single pass.

use bytes::{BufMut, BytesMut};

/// Begin a box; returns the offset to pass to [`finish_box`].
pub(crate) fn start_box(buf: &mut BytesMut, box_type: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(box_type);
    start
}

/// Begin a full box (version + 24-bit flags).
pub(crate) fn start_full_box(buf: &mut BytesMut, box_type: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = start_box(buf, box_type);
    buf.put_u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
    start
}

/// Patch the size of the box started at `start`.
pub(crate) fn finish_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Identity transformation matrix used by mvhd and tkhd.
pub(crate) fn put_matrix(buf: &mut BytesMut) {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(value);
    }
}

/// Write an MPEG-4 descriptor length in expandable form.
pub(crate) fn put_descriptor_len(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let mut shift = 21;
    while shift > 0 {
        buf.put_u8(0x80 | ((len >> shift) & 0x7F) as u8);
        shift -= 7;
    }
    buf.put_u8((len & 0x7F) as u8);
}
