// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitreader::BitReader;

use crate::{Error, Result};

/// MSB-first bit reader used by the AV1 OBU parser.
///
/// A thin layer over [`BitReader`] that adds byte-granular seeking and the
/// AV1 `leb128()`/`uvlc()` syntax elements.
pub struct BitCursor<'a> {
    data: &'a [u8],
    reader: BitReader<'a>,
}

impl<'a> BitCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            reader: BitReader::new(data),
        }
    }

    /// Absolute offset in bits from the start of the buffer.
    #[must_use]
    pub fn pos_in_bits(&self) -> usize {
        usize::try_from(self.reader.position()).unwrap_or(usize::MAX)
    }

    /// Index of the byte holding the next unread bit.
    #[must_use]
    pub fn pos_in_bytes(&self) -> usize {
        self.pos_in_bits() / 8
    }

    #[must_use]
    pub fn len_in_bytes(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn consumed(&self) -> bool {
        self.reader.remaining() == 0
    }

    /// Drops any partially read byte and continues at byte `pos`.
    pub fn seek_in_bytes(&mut self, pos: usize) -> Result<()> {
        let target = (pos as u64)
            .checked_mul(8)
            .ok_or(Error::InvalidData("seek position overflow"))?;
        let current = self.reader.position();
        if target < current {
            self.reader = BitReader::new(self.data);
            self.reader.skip(target)?;
        } else {
            self.reader.skip(target - current)?;
        }
        Ok(())
    }

    /// Reads `n` bits, `n <= 8`.
    pub fn read_bits(&mut self, n: u8) -> Result<u8> {
        if n > 8 {
            return Err(Error::InvalidData("bit read wider than 8 bits"));
        }
        Ok(self.reader.read_u8(n)?)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.reader.read_bool()?)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.reader.read_u16(16)?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.reader.read_u32(32)?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_uint(64)
    }

    /// Reads an unsigned integer of any width up to 64 bits.
    pub fn read_uint(&mut self, bits: u8) -> Result<u64> {
        if bits > 64 {
            return Err(Error::InvalidData("bit read wider than 64 bits"));
        }
        Ok(self.reader.read_u64(bits)?)
    }

    /// `leb128()` from the AV1 bitstream syntax: at most 8 bytes.
    pub fn read_leb128(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..8 {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << (i * 7);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// `uvlc()` from the AV1 bitstream syntax.
    pub fn read_uvlc(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u32;
        while !self.read_bool()? {
            leading_zeros += 1;
        }
        if leading_zeros >= 32 {
            return Ok(u32::MAX);
        }
        let value = self.read_uint(leading_zeros as u8)? as u32;
        Ok(value + ((1u32 << leading_zeros) - 1))
    }
}

impl std::fmt::Debug for BitCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitCursor")
            .field("len", &self.data.len())
            .field("pos_in_bits", &self.pos_in_bits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_byte_boundaries() {
        let mut b = BitCursor::new(&[0b1011_0011, 0b1100_0101]);
        assert_eq!(b.read_bits(3).unwrap(), 0b101);
        assert_eq!(b.pos_in_bits(), 3);
        assert_eq!(b.read_bits(7).unwrap(), 0b10011_11);
        assert_eq!(b.pos_in_bits(), 10);
        assert_eq!(b.pos_in_bytes(), 1);
        assert_eq!(b.read_bits(6).unwrap(), 0b00_0101);
        assert!(b.consumed());
        assert!(b.read_bool().is_err());
        assert!(BitCursor::new(&[0; 2]).read_bits(9).is_err());
    }

    #[test]
    fn read_uint_any_width() {
        let mut b = BitCursor::new(&[0xab, 0xcd, 0xef, 0x12]);
        assert_eq!(b.read_uint(4).unwrap(), 0xa);
        assert_eq!(b.read_uint(13).unwrap(), 0b1011_1100_1101_1);
        assert_eq!(b.read_uint(0).unwrap(), 0);
        assert_eq!(b.read_uint(15).unwrap(), 0b110_1111_0001_0010);
        assert!(b.consumed());

        let mut b = BitCursor::new(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
        assert_eq!(b.read_u64().unwrap(), 0x1234_5678_9abc_def0);
        assert!(BitCursor::new(&[0; 9]).read_uint(65).is_err());
    }

    #[test]
    fn leb128() {
        let mut b = BitCursor::new(&[0x8b, 0x02]);
        assert_eq!(b.read_leb128().unwrap(), 267);
        assert!(b.consumed());

        // stops after 8 bytes even if the continuation bit is set
        let mut b = BitCursor::new(&[0xff; 9]);
        assert_eq!(b.read_leb128().unwrap(), (1u64 << 56) - 1);
        assert_eq!(b.pos_in_bytes(), 8);
    }

    #[test]
    fn uvlc() {
        // 000 1 101 + padding
        let mut b = BitCursor::new(&[0b0001_1010]);
        assert_eq!(b.read_uvlc().unwrap(), 12);
        assert_eq!(b.pos_in_bits(), 7);

        let mut b = BitCursor::new(&[0b1000_0000]);
        assert_eq!(b.read_uvlc().unwrap(), 0);

        let mut data = [0u8; 5];
        data[4] = 0x80;
        let mut b = BitCursor::new(&data);
        assert_eq!(b.read_uvlc().unwrap(), u32::MAX);
    }

    #[test]
    fn seek_discards_partial_byte() {
        let mut b = BitCursor::new(&[0xff, 0x00]);
        b.read_bits(3).unwrap();
        b.seek_in_bytes(1).unwrap();
        assert_eq!(b.pos_in_bits(), 8);
        assert_eq!(b.read_u8().unwrap(), 0);
        assert!(b.consumed());
        assert!(b.seek_in_bytes(3).is_err());
    }

    #[test]
    fn seek_backwards_rereads() {
        let mut b = BitCursor::new(&[0xa5, 0x5a]);
        assert_eq!(b.read_u16().unwrap(), 0xa55a);
        b.seek_in_bytes(1).unwrap();
        assert_eq!(b.read_bits(4).unwrap(), 0x5);
        b.seek_in_bytes(0).unwrap();
        assert_eq!(b.read_u8().unwrap(), 0xa5);
    }
}
