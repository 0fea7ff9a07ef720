//! Independent ISO-BMFF reader for produced segments.
//!
//! Parses boxes back out of serialized segments without sharing any code
//! with the writers, so tests and the segment validator can check what
//! was actually produced.

use std::fmt::Write;
use std::ops::Range;

use crate::error::{Error, Result};

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    /// Total box size including the header.
    pub size: u64,
    /// 8, or 16 for the 64-bit extended size form.
    pub header_len: u8,
    /// Offset of the box within the buffer it was read from.
    pub offset: usize,
}

impl BoxHeader {
    /// Four-character code as a string.
    pub fn type_str(&self) -> String {
        String::from_utf8_lossy(&self.box_type).into_owned()
    }

    /// Range of the payload (after the header) within the source buffer.
    pub fn payload_range(&self) -> Range<usize> {
        let start = self.offset + self.header_len as usize;
        start..self.offset + self.size as usize
    }
}

/// Read the box header at `offset`, checking the box fits in `data`.
pub fn read_box_header(data: &[u8], offset: usize) -> Result<BoxHeader> {
    let avail = data.len().saturating_sub(offset);
    if avail < 8 {
        return Err(Error::BufferUnderflow {
            need: 8,
            have: avail,
        });
    }

    let size32 = read_u32(data, offset)?;
    let mut box_type = [0u8; 4];
    box_type.copy_from_slice(&data[offset + 4..offset + 8]);

    let (size, header_len) = match size32 {
        0 => (avail as u64, 8),
        1 => (read_u64(data, offset + 8)?, 16),
        n => (u64::from(n), 8),
    };

    if size < u64::from(header_len) {
        return Err(Error::invalid_box(format!(
            "{} box size {} smaller than header",
            String::from_utf8_lossy(&box_type),
            size
        )));
    }
    if size > avail as u64 {
        return Err(Error::BufferUnderflow {
            need: size as usize,
            have: avail,
        });
    }

    Ok(BoxHeader {
        box_type,
        size,
        header_len,
        offset,
    })
}

/// Iterator over sibling boxes in a buffer.
///
/// Yields each header together with its payload; stops after the first error.
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<(BoxHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match read_box_header(self.data, self.pos) {
            Ok(header) => {
                let payload = &self.data[header.payload_range()];
                self.pos += header.size as usize;
                Some(Ok((header, payload)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-sample entry of a trun, with tfhd defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSummary {
    pub size: u32,
    pub duration: u32,
    pub flags: u32,
    pub composition_offset: i32,
}

impl SampleSummary {
    /// sample_is_non_sync_sample is clear.
    pub fn is_sync(&self) -> bool {
        self.flags & 0x0001_0000 == 0
    }
}

/// Contents of one traf.
#[derive(Debug, Clone, Default)]
pub struct TrafSummary {
    pub track_id: u32,
    pub base_decode_time: Option<u64>,
    pub default_base_is_moof: bool,
    pub base_data_offset: Option<u64>,
    pub data_offset: Option<i32>,
    pub samples: Vec<SampleSummary>,
}

impl TrafSummary {
    /// Total payload bytes of the run.
    pub fn payload_len(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.size)).sum()
    }
}

/// Decoded moof + mdat pair.
#[derive(Debug, Clone)]
pub struct FragmentSummary {
    /// Top-level box types in order.
    pub top_level: Vec<[u8; 4]>,
    pub sequence_number: u32,
    /// Offset of the moof within the segment.
    pub moof_offset: usize,
    pub trafs: Vec<TrafSummary>,
    /// Payload range of the mdat within the segment.
    pub mdat_payload: Range<usize>,
}

impl FragmentSummary {
    /// Sample count across all trafs.
    pub fn sample_count(&self) -> usize {
        self.trafs.iter().map(|t| t.samples.len()).sum()
    }

    /// Absolute byte range of a traf's run within the segment, if resolvable.
    pub fn run_range(&self, traf: &TrafSummary) -> Option<Range<usize>> {
        let base = match traf.base_data_offset {
            Some(base) => base as i64,
            None => self.moof_offset as i64,
        };
        let start = base + i64::from(traf.data_offset?);
        if start < 0 {
            return None;
        }
        let start = start as usize;
        Some(start..start + traf.payload_len() as usize)
    }
}

/// Parse a media segment: optional styp/sidx, then moof followed by mdat.
pub fn parse_fragment(data: &[u8]) -> Result<FragmentSummary> {
    let mut top_level = Vec::new();
    let mut moof = None;
    let mut mdat = None;

    for item in BoxIter::new(data) {
        let (header, payload) = item?;
        top_level.push(header.box_type);
        match &header.box_type {
            b"moof" if moof.is_none() => moof = Some((header, payload)),
            b"mdat" if mdat.is_none() => mdat = Some(header.payload_range()),
            _ => {}
        }
    }

    let (moof_header, moof_payload) = moof.ok_or_else(|| Error::invalid_box("missing moof"))?;
    let mdat_payload = mdat.ok_or_else(|| Error::invalid_box("missing mdat"))?;

    let mut sequence_number = None;
    let mut trafs = Vec::new();
    for item in BoxIter::new(moof_payload) {
        let (header, payload) = item?;
        match &header.box_type {
            b"mfhd" => sequence_number = Some(read_u32(payload, 4)?),
            b"traf" => trafs.push(parse_traf(payload)?),
            _ => {}
        }
    }

    Ok(FragmentSummary {
        top_level,
        sequence_number: sequence_number.ok_or_else(|| Error::invalid_box("missing mfhd"))?,
        moof_offset: moof_header.offset,
        trafs,
        mdat_payload,
    })
}

#[derive(Default)]
struct TfhdDefaults {
    duration: u32,
    size: u32,
    flags: u32,
}

fn parse_traf(data: &[u8]) -> Result<TrafSummary> {
    let mut traf = TrafSummary::default();
    let mut defaults = TfhdDefaults::default();
    let mut saw_tfhd = false;

    for item in BoxIter::new(data) {
        let (header, payload) = item?;
        match &header.box_type {
            b"tfhd" => {
                saw_tfhd = true;
                let flags = read_u32(payload, 0)? & 0x00FF_FFFF;
                traf.track_id = read_u32(payload, 4)?;
                traf.default_base_is_moof = flags & 0x020000 != 0;
                let mut pos = 8;
                if flags & 0x000001 != 0 {
                    traf.base_data_offset = Some(read_u64(payload, pos)?);
                    pos += 8;
                }
                if flags & 0x000002 != 0 {
                    pos += 4; // sample_description_index
                }
                if flags & 0x000008 != 0 {
                    defaults.duration = read_u32(payload, pos)?;
                    pos += 4;
                }
                if flags & 0x000010 != 0 {
                    defaults.size = read_u32(payload, pos)?;
                    pos += 4;
                }
                if flags & 0x000020 != 0 {
                    defaults.flags = read_u32(payload, pos)?;
                }
            }
            b"tfdt" => {
                let version = payload.first().copied().unwrap_or(0);
                traf.base_decode_time = Some(if version == 1 {
                    read_u64(payload, 4)?
                } else {
                    u64::from(read_u32(payload, 4)?)
                });
            }
            b"trun" => parse_trun(payload, &defaults, &mut traf)?,
            _ => {}
        }
    }

    if !saw_tfhd {
        return Err(Error::invalid_box("traf without tfhd"));
    }
    Ok(traf)
}

fn parse_trun(data: &[u8], defaults: &TfhdDefaults, traf: &mut TrafSummary) -> Result<()> {
    let version_flags = read_u32(data, 0)?;
    let version = version_flags >> 24;
    let flags = version_flags & 0x00FF_FFFF;
    let count = read_u32(data, 4)?;
    let mut pos = 8;

    if flags & 0x000001 != 0 {
        traf.data_offset = Some(read_u32(data, pos)? as i32);
        pos += 4;
    }
    let mut first_flags = None;
    if flags & 0x000004 != 0 {
        first_flags = Some(read_u32(data, pos)?);
        pos += 4;
    }

    let per_sample = [0x000100, 0x000200, 0x000400, 0x000800]
        .iter()
        .filter(|f| flags & **f != 0)
        .count()
        * 4;
    let need = pos + per_sample * count as usize;
    if need > data.len() {
        return Err(Error::BufferUnderflow {
            need,
            have: data.len(),
        });
    }

    for i in 0..count {
        let mut sample = SampleSummary {
            size: defaults.size,
            duration: defaults.duration,
            flags: defaults.flags,
            composition_offset: 0,
        };
        if flags & 0x000100 != 0 {
            sample.duration = read_u32(data, pos)?;
            pos += 4;
        }
        if flags & 0x000200 != 0 {
            sample.size = read_u32(data, pos)?;
            pos += 4;
        }
        if flags & 0x000400 != 0 {
            sample.flags = read_u32(data, pos)?;
            pos += 4;
        } else if let (0, Some(first)) = (i, first_flags) {
            sample.flags = first;
        }
        if flags & 0x000800 != 0 {
            let raw = read_u32(data, pos)?;
            sample.composition_offset = if version == 0 {
                raw.min(i32::MAX as u32) as i32
            } else {
                raw as i32
            };
            pos += 4;
        }
        traf.samples.push(sample);
    }

    Ok(())
}

/// Containers whose payload is a plain list of child boxes.
const CONTAINERS: [&[u8; 4]; 12] = [
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"mvex", b"moof", b"traf", b"edts",
    b"udta", b"mfra",
];

/// Render the box hierarchy as an indented outline.
pub fn box_tree(data: &[u8]) -> String {
    let mut out = String::new();
    write_tree(&mut out, data, 0);
    out
}

fn write_tree(out: &mut String, data: &[u8], depth: usize) {
    for item in BoxIter::new(data) {
        let (header, payload) = match item {
            Ok(entry) => entry,
            Err(e) => {
                let _ = writeln!(out, "{:indent$}<error: {}>", "", e, indent = depth * 2);
                return;
            }
        };
        let _ = writeln!(
            out,
            "{:indent$}{} ({} bytes)",
            "",
            header.type_str(),
            header.size,
            indent = depth * 2
        );

        // Skip the fixed fields that precede child boxes
        let children = match &header.box_type {
            t if CONTAINERS.contains(&t) => Some(payload),
            b"stsd" | b"dref" => payload.get(8..),
            b"avc1" => payload.get(78..),
            b"mp4a" => payload.get(28..),
            _ => None,
        };
        if let Some(children) = children {
            write_tree(out, children, depth + 1);
        }
    }
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Error::BufferUnderflow {
            need: pos + 4,
            have: data.len(),
        })
}

fn read_u64(data: &[u8], pos: usize) -> Result<u64> {
    data.get(pos..pos + 8)
        .map(|b| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            u64::from_be_bytes(bytes)
        })
        .ok_or(Error::BufferUnderflow {
            need: pos + 8,
            have: data.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_box_header_forms() {
        let mut data = vec![0, 0, 0, 12, b'f', b'r', b'e', b'e', 1, 2, 3, 4];
        let header = read_box_header(&data, 0).unwrap();
        assert_eq!(header.size, 12);
        assert_eq!(header.header_len, 8);
        assert_eq!(header.type_str(), "free");

        data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9]);
        let header = read_box_header(&data, 0).unwrap();
        assert_eq!(header.size, 20);
        assert_eq!(header.header_len, 16);
        assert_eq!(header.payload_range(), 16..20);
    }

    #[test]
    fn test_truncated_box() {
        let data = [0, 0, 0, 32, b'm', b'o', b'o', b'v', 0, 0];
        assert!(matches!(
            read_box_header(&data, 0),
            Err(Error::BufferUnderflow { need: 32, have: 10 })
        ));

        let mut iter = BoxIter::new(&data);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_box_tree_outline() {
        // moov { free }
        let data = [
            0, 0, 0, 16, b'm', b'o', b'o', b'v', 0, 0, 0, 8, b'f', b'r', b'e', b'e',
        ];
        let tree = box_tree(&data);
        assert_eq!(tree, "moov (16 bytes)\n  free (8 bytes)\n");
    }
}
