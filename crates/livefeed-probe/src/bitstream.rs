//! Bit-level reading and writing for RBSP payloads.
//!
//! [`BitstreamReader`] walks a byte buffer MSB-first and decodes the fixed-width
//! and Exponential-Golomb fields used throughout the H.264 syntax. Reads past
//! the end of the buffer fail with [`BitstreamError::OutOfData`] instead of
//! yielding zeros, so a truncated parameter set is distinguishable from one
//! whose fields are legitimately zero.
//!
//! [`BitstreamWriter`] is the inverse, used when parameter sets are rewritten.

use std::io;

use bitstream_io::{BigEndian, BitWrite, BitWriter};

use crate::error::BitstreamError;

/// Result alias for bitstream reads
pub type Result<T> = std::result::Result<T, BitstreamError>;

/// MSB-first bit reader over a borrowed byte buffer
#[derive(Debug, Clone)]
pub struct BitstreamReader<'a> {
    data: &'a [u8],
    bit_pos: u64,
}

impl<'a> BitstreamReader<'a> {
    /// Create a reader positioned at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Total number of bits in the underlying buffer
    pub fn total_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Number of bits consumed so far
    pub fn bits_read(&self) -> u64 {
        self.bit_pos
    }

    /// Number of whole or partial bytes touched so far
    pub fn bytes_read(&self) -> usize {
        self.bit_pos.div_ceil(8) as usize
    }

    /// Number of unread bits
    pub fn bits_remaining(&self) -> u64 {
        self.total_bits().saturating_sub(self.bit_pos)
    }

    /// Whether any unread bits remain
    pub fn has_more_data(&self) -> bool {
        self.bits_remaining() > 0
    }

    /// Whether the cursor is on a byte boundary
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    /// Read `n` bits (1..=32) as an unsigned integer.
    ///
    /// The cursor does not move when the read fails.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n == 0 || n > 32 {
            return Err(BitstreamError::InvalidBitCount(n));
        }

        let available = self.bits_remaining();
        if u64::from(n) > available {
            return Err(BitstreamError::OutOfData {
                requested: u32::from(n),
                available,
            });
        }

        let mut result = 0u32;
        for _ in 0..n {
            let byte = self.data[(self.bit_pos / 8) as usize];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            result = (result << 1) | u32::from(bit);
            self.bit_pos += 1;
        }

        Ok(result)
    }

    /// Read a single bit as a flag
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Read an 8-bit field
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Advance the cursor by `n` bits without decoding them
    pub fn skip_bits(&mut self, n: u64) -> Result<()> {
        let available = self.bits_remaining();
        if n > available {
            return Err(BitstreamError::OutOfData {
                requested: n.min(u64::from(u32::MAX)) as u32,
                available,
            });
        }
        self.bit_pos += n;
        Ok(())
    }

    /// Read an unsigned Exp-Golomb code, ue(v).
    ///
    /// Counts `k` leading zero bits, reads `k` suffix bits and returns
    /// `2^k - 1 + suffix`. On failure the cursor is restored.
    pub fn read_ue(&mut self) -> Result<u32> {
        let start = self.bit_pos;
        let result = self.read_ue_inner();
        if result.is_err() {
            self.bit_pos = start;
        }
        result
    }

    fn read_ue_inner(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BitstreamError::ExpGolombOverflow);
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// Read a signed Exp-Golomb code, se(v).
    ///
    /// Odd code numbers map to positive values, even ones to negative:
    /// 0, 1, -1, 2, -2, ...
    pub fn read_se(&mut self) -> Result<i32> {
        let k = i64::from(self.read_ue()?);
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }

    /// Whether RBSP payload bits remain before the trailing stop bit.
    ///
    /// Mirrors `more_rbsp_data()` from the H.264 syntax: the last set bit of
    /// the buffer is the `rbsp_stop_one_bit`.
    pub fn more_rbsp_data(&self) -> bool {
        match self.stop_bit_position() {
            Some(stop) => self.bit_pos < stop,
            None => false,
        }
    }

    fn stop_bit_position(&self) -> Option<u64> {
        let (index, byte) = self
            .data
            .iter()
            .enumerate()
            .rev()
            .find(|(_, byte)| **byte != 0)?;
        Some(index as u64 * 8 + 7 - u64::from(byte.trailing_zeros()))
    }
}

/// MSB-first bit writer producing an owned byte buffer
pub struct BitstreamWriter {
    inner: BitWriter<Vec<u8>, BigEndian>,
    bits_written: u64,
}

impl BitstreamWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self {
            inner: BitWriter::endian(Vec::new(), BigEndian),
            bits_written: 0,
        }
    }

    /// Number of bits written so far
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Write the low `n` bits (0..=32) of `value`
    pub fn write_bits(&mut self, n: u8, value: u32) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.inner.write(u32::from(n), value)?;
        self.bits_written += u64::from(n);
        Ok(())
    }

    /// Write a single flag bit
    pub fn write_bit(&mut self, bit: bool) -> io::Result<()> {
        self.inner.write_bit(bit)?;
        self.bits_written += 1;
        Ok(())
    }

    /// Write an unsigned Exp-Golomb code
    pub fn write_ue(&mut self, value: u32) -> io::Result<()> {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        if len > 1 {
            self.inner.write(len - 1, 0u32)?;
        }
        self.inner.write(len, code)?;
        self.bits_written += u64::from(2 * len - 1);
        Ok(())
    }

    /// Write a signed Exp-Golomb code
    pub fn write_se(&mut self, value: i32) -> io::Result<()> {
        let value = i64::from(value);
        let code = if value > 0 { 2 * value - 1 } else { -2 * value };
        self.write_ue(code as u32)
    }

    /// Write `rbsp_trailing_bits()`: a stop bit then zero padding to a byte boundary
    pub fn write_trailing_bits(&mut self) -> io::Result<()> {
        self.write_bit(true)?;
        while self.bits_written % 8 != 0 {
            self.write_bit(false)?;
        }
        Ok(())
    }

    /// Finish writing, zero-padding any partial byte
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        self.inner.byte_align()?;
        Ok(self.inner.into_writer())
    }
}

impl Default for BitstreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_read_bits() {
        let data = [0b10110100, 0b01010101];
        let mut reader = BitstreamReader::new(&data);

        assert_eq!(reader.read_bits(4), Ok(0b1011));
        assert_eq!(reader.read_bits(4), Ok(0b0100));
        assert_eq!(reader.read_bits(8), Ok(0b01010101));
        assert!(!reader.has_more_data());
    }

    #[test]
    fn test_read_32_bits() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut reader = BitstreamReader::new(&data);
        assert_eq!(reader.read_bits(32), Ok(0xDEADBEEF));
    }

    #[test]
    fn test_read_ue() {
        // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let data = [0b10100110, 0b01000000];
        let mut reader = BitstreamReader::new(&data);

        assert_eq!(reader.read_ue(), Ok(0));
        assert_eq!(reader.read_ue(), Ok(1));
        assert_eq!(reader.read_ue(), Ok(2));
        assert_eq!(reader.read_ue(), Ok(3));
    }

    #[test]
    fn test_read_se() {
        // codes 1, 2, 3, 4 -> 1, -1, 2, -2
        let data = [0b01001100, 0b10000101, 0b00000000];
        let mut reader = BitstreamReader::new(&data);

        assert_eq!(reader.read_se(), Ok(1));
        assert_eq!(reader.read_se(), Ok(-1));
        assert_eq!(reader.read_se(), Ok(2));
        assert_eq!(reader.read_se(), Ok(-2));
    }

    #[test]
    fn test_read_se_extremes() {
        // 31 leading zeros, then all-ones suffix: code 2^32 - 2
        let data = [0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFE];
        assert_eq!(BitstreamReader::new(&data).read_se(), Ok(i32::MIN + 1));

        // Code 2^32 - 3
        let data = [0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFC];
        assert_eq!(BitstreamReader::new(&data).read_se(), Ok(i32::MAX));
    }

    #[test]
    fn test_out_of_data_is_signaled() {
        let data = [0xFF];
        let mut reader = BitstreamReader::new(&data);

        assert_eq!(reader.read_bits(6), Ok(0b111111));
        assert_eq!(
            reader.read_bits(3),
            Err(BitstreamError::OutOfData {
                requested: 3,
                available: 2
            })
        );
        // Failed reads leave the cursor alone
        assert_eq!(reader.bits_read(), 6);
        assert_eq!(reader.read_bits(2), Ok(0b11));
    }

    #[test]
    fn test_truncated_ue_restores_cursor() {
        // Prefix of four zeros with only three suffix bits available
        let data = [0b00001010];
        let mut reader = BitstreamReader::new(&data);

        assert!(matches!(
            reader.read_ue(),
            Err(BitstreamError::OutOfData { .. })
        ));
        assert_eq!(reader.bits_read(), 0);
    }

    #[test]
    fn test_invalid_bit_count() {
        let data = [0u8; 8];
        let mut reader = BitstreamReader::new(&data);
        assert_eq!(reader.read_bits(0), Err(BitstreamError::InvalidBitCount(0)));
        assert_eq!(
            reader.read_bits(33),
            Err(BitstreamError::InvalidBitCount(33))
        );
    }

    #[test]
    fn test_ue_overflow() {
        let data = [0u8; 8];
        let mut reader = BitstreamReader::new(&data);
        assert_eq!(reader.read_ue(), Err(BitstreamError::ExpGolombOverflow));
    }

    #[test]
    fn test_more_rbsp_data() {
        // One payload bit (1) then the stop bit and padding
        let data = [0b11000000];
        let mut reader = BitstreamReader::new(&data);

        assert!(reader.more_rbsp_data());
        reader.read_bit().unwrap();
        assert!(!reader.more_rbsp_data());
        assert!(reader.has_more_data());
    }

    #[test]
    fn test_writer_trailing_bits() {
        let mut writer = BitstreamWriter::new();
        writer.write_bits(3, 0b101).unwrap();
        writer.write_trailing_bits().unwrap();
        assert_eq!(writer.finish().unwrap(), vec![0b10110000]);
    }

    proptest! {
        #[test]
        fn ue_round_trip(value in 0u32..(1 << 20)) {
            let mut writer = BitstreamWriter::new();
            writer.write_ue(value).unwrap();
            writer.write_trailing_bits().unwrap();
            let bytes = writer.finish().unwrap();

            let mut reader = BitstreamReader::new(&bytes);
            prop_assert_eq!(reader.read_ue(), Ok(value));
            prop_assert!(!reader.more_rbsp_data());
        }

        #[test]
        fn se_round_trip(value in -(1i32 << 19)..(1i32 << 19)) {
            let mut writer = BitstreamWriter::new();
            writer.write_se(value).unwrap();
            writer.write_trailing_bits().unwrap();
            let bytes = writer.finish().unwrap();

            let mut reader = BitstreamReader::new(&bytes);
            prop_assert_eq!(reader.read_se(), Ok(value));
        }
    }
}
