//! Codec configuration records (avcC, esds).

use bytes::{BufMut, Bytes, BytesMut};
use livefeed_probe::h264::decode_sps;

use super::boxes::put_descriptor_len;

/// Profiles whose avcC carries the chroma format / bit depth extension
const AVCC_EXTENDED_PROFILES: [u8; 4] = [100, 110, 122, 144];

/// Build an AVCDecoderConfigurationRecord from one SPS and one PPS.
///
/// Returns `None` when either parameter set is too short to be usable.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    if sps.len() < 4 || pps.len() < 2 || sps.len() > u16::MAX as usize || pps.len() > u16::MAX as usize {
        return None;
    }

    let mut buf = BytesMut::with_capacity(16 + sps.len() + pps.len());
    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps[1]); // AVCProfileIndication
    buf.put_u8(sps[2]); // profile_compatibility
    buf.put_u8(sps[3]); // AVCLevelIndication
    buf.put_u8(0xFF); // lengthSizeMinusOne = 3
    buf.put_u8(0xE1); // one SPS
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // one PPS
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    if AVCC_EXTENDED_PROFILES.contains(&sps[1]) {
        let info = decode_sps(sps);
        buf.put_u8(0xFC | (info.chroma_format_idc as u8 & 0x03));
        buf.put_u8(0xF8 | (info.bit_depth_luma.saturating_sub(8) & 0x07));
        buf.put_u8(0xF8 | (info.bit_depth_chroma.saturating_sub(8) & 0x07));
        buf.put_u8(0); // numOfSequenceParameterSetExt
    }

    Some(buf.freeze())
}

/// Build the payload of an esds box (ES_Descriptor) for AAC.
pub fn build_esds(track_id: u32, audio_specific_config: &[u8]) -> Bytes {
    let asc_len = audio_specific_config.len();
    // DecoderSpecificInfo, DecoderConfigDescriptor, SLConfigDescriptor
    let dsi_len = asc_len;
    let dcd_len = 13 + 1 + descriptor_len_size(dsi_len) + dsi_len;
    let sl_len = 1;
    let es_len = 3 + 1 + descriptor_len_size(dcd_len) + dcd_len + 1 + descriptor_len_size(sl_len) + sl_len;

    let mut buf = BytesMut::with_capacity(8 + es_len);
    buf.put_u32(0); // version/flags

    buf.put_u8(0x03); // ES_DescrTag
    put_descriptor_len(&mut buf, es_len);
    buf.put_u16(track_id as u16); // ES_ID
    buf.put_u8(0); // flags

    buf.put_u8(0x04); // DecoderConfigDescrTag
    put_descriptor_len(&mut buf, dcd_len);
    buf.put_u8(0x40); // objectTypeIndication: MPEG-4 Audio
    buf.put_u8(0x15); // streamType audio (0x05 << 2) | upstream 0 | reserved 1
    buf.put_slice(&[0, 0, 0]); // bufferSizeDB
    buf.put_u32(0); // maxBitrate
    buf.put_u32(0); // avgBitrate

    buf.put_u8(0x05); // DecSpecificInfoTag
    put_descriptor_len(&mut buf, dsi_len);
    buf.put_slice(audio_specific_config);

    buf.put_u8(0x06); // SLConfigDescrTag
    put_descriptor_len(&mut buf, sl_len);
    buf.put_u8(0x02); // predefined: MP4

    buf.freeze()
}

fn descriptor_len_size(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::tests::{PPS, SPS};

    #[test]
    fn test_avcc_baseline() {
        let avcc = build_avcc(&SPS, &PPS).unwrap();
        assert_eq!(&avcc[..6], &[1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1]);
        assert_eq!(&avcc[6..8], &(SPS.len() as u16).to_be_bytes());
        assert_eq!(&avcc[8..16], &SPS);
        assert_eq!(avcc[16], 1);
        assert_eq!(avcc.len(), 8 + SPS.len() + 3 + PPS.len());
    }

    #[test]
    fn test_avcc_high_extension() {
        let sps = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xB4, 0x02, 0x80, 0x2D, 0xC8];
        let avcc = build_avcc(&sps, &PPS).unwrap();
        let ext = &avcc[avcc.len() - 4..];
        assert_eq!(ext, &[0xFD, 0xF8, 0xF8, 0x00]);
    }

    #[test]
    fn test_avcc_rejects_short_sps() {
        assert!(build_avcc(&[0x67, 0x42], &PPS).is_none());
    }

    #[test]
    fn test_esds_layout() {
        let esds = build_esds(2, &[0x11, 0x90]);
        assert_eq!(&esds[0..4], &[0, 0, 0, 0]);
        assert_eq!(esds[4], 0x03);
        // ES_Descriptor length covers the rest of the payload
        assert_eq!(esds[5] as usize, esds.len() - 6);
        assert_eq!(esds[9], 0x04);
        assert_eq!(esds[11], 0x40);
        assert_eq!(esds[12], 0x15);
        assert_eq!(&esds[esds.len() - 3..], &[0x06, 0x01, 0x02]);
    }
}
