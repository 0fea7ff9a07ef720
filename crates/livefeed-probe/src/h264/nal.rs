//! H.264 NAL unit helpers

/// H.264 NAL unit types (Table 7-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture
    Slice,
    /// Coded slice data partition A
    SliceDataA,
    /// Coded slice data partition B
    SliceDataB,
    /// Coded slice data partition C
    SliceDataC,
    /// Coded slice of an IDR picture
    IdrSlice,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    /// End of sequence
    EndOfSequence,
    /// End of stream
    EndOfStream,
    /// Filler data
    Filler,
    /// Unknown/other
    Unknown(u8),
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        match value {
            1 => NalUnitType::Slice,
            2 => NalUnitType::SliceDataA,
            3 => NalUnitType::SliceDataB,
            4 => NalUnitType::SliceDataC,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::Filler,
            v => NalUnitType::Unknown(v),
        }
    }
}

impl NalUnitType {
    /// Whether this NAL carries coded picture data
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NalUnitType::Slice
                | NalUnitType::SliceDataA
                | NalUnitType::SliceDataB
                | NalUnitType::SliceDataC
                | NalUnitType::IdrSlice
        )
    }
}

/// Decode the NAL unit type from the first header byte
pub fn nal_unit_type(header: u8) -> NalUnitType {
    NalUnitType::from(header & 0x1F)
}

/// Remove emulation prevention bytes (0x03) from a NAL unit payload
///
/// The byte sequence 0x00 0x00 0x03 prevents start code emulation inside
/// the payload; the 0x03 is not part of the RBSP.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut zeros = 0usize;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        result.push(byte);
    }

    result
}

/// Insert emulation prevention bytes so the RBSP contains no start code
pub fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zeros = 0usize;

    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            result.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        result.push(byte);
    }

    result
}

/// Split an Annex B byte stream into NAL units (start codes stripped)
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(idx + 1) {
            Some(&next) => next - 3,
            None => data.len(),
        };
        // Trailing zeros belong to the next start code (or are trailing_zero_8bits)
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if start < end {
            units.push(&data[start..end]);
        }
    }

    units
}

/// Split a 4-byte length-prefixed (AVCC) payload into NAL units
pub fn split_avcc(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut i = 0;

    while i + 4 <= data.len() {
        let length = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as usize;
        i += 4;

        if length == 0 || i + length > data.len() {
            break;
        }

        units.push(&data[i..i + length]);
        i += length;
    }

    units
}

/// Concatenate NAL units with 4-byte big-endian length prefixes
pub fn to_avcc<'a>(units: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Convert an Annex B access unit to AVCC framing
pub fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    to_avcc(split_annex_b(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_type_from_header() {
        assert_eq!(nal_unit_type(0x67), NalUnitType::Sps);
        assert_eq!(nal_unit_type(0x68), NalUnitType::Pps);
        assert_eq!(nal_unit_type(0x65), NalUnitType::IdrSlice);
        assert_eq!(nal_unit_type(0x41), NalUnitType::Slice);
        assert!(NalUnitType::IdrSlice.is_vcl());
        assert!(!NalUnitType::Sps.is_vcl());
    }

    #[test]
    fn test_remove_emulation_prevention() {
        let input = vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x02];
        let output = remove_emulation_prevention(&input);
        assert_eq!(output, vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_add_emulation_prevention() {
        let rbsp = vec![0x67, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let escaped = add_emulation_prevention(&rbsp);
        assert_eq!(
            escaped,
            vec![0x67, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]
        );
        assert_eq!(remove_emulation_prevention(&escaped), rbsp);
    }

    #[test]
    fn test_split_annex_b() {
        let data = [
            0, 0, 0, 1, 0x67, 1, 2, // SPS, 4-byte start code
            0, 0, 1, 0x68, 3, // PPS, 3-byte start code
            0, 0, 0, 1, 0x65, 4, 5, 6,
        ];
        let units = split_annex_b(&data);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x67, 1, 2]);
        assert_eq!(units[1], &[0x68, 3]);
        assert_eq!(units[2], &[0x65, 4, 5, 6]);
    }

    #[test]
    fn test_avcc_conversion() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0, 0, 1, 0x06, 0xBB];
        let avcc = annex_b_to_avcc(&data);
        assert_eq!(avcc, vec![0, 0, 0, 2, 0x65, 0xAA, 0, 0, 0, 2, 0x06, 0xBB]);

        let units = split_avcc(&avcc);
        assert_eq!(units, vec![&[0x65, 0xAA][..], &[0x06, 0xBB][..]]);
    }
}
