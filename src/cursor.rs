// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ByteOrder};

use crate::boxes::FourCC;
use crate::{Error, Result, ToU64};

/// Sequential big-endian reader over an in-memory buffer.
///
/// Positions are absolute offsets into the buffer the cursor was created
/// from. A cursor produced by [`ByteCursor::limited`] keeps the same
/// coordinates but refuses to read past its new end, which is how box
/// bodies are kept inside their declared size.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// A cursor over `[self.position(), end)` sharing this cursor's offsets.
    pub fn limited(&self, end: usize) -> Result<Self> {
        if end > self.data.len() || end < self.pos {
            return Err(self.out_of_range(end.saturating_sub(self.pos)));
        }
        Ok(Self {
            data: &self.data[..end],
            pos: self.pos,
        })
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute end of the readable region.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn consumed(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Moves to an absolute position. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::OutOfRange {
                offset: pos.to_u64(),
                needed: 0,
                len: self.data.len().to_u64(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, bytes: usize) -> Result<()> {
        let target = self.pos.checked_add(bytes).ok_or_else(|| self.out_of_range(bytes))?;
        if target > self.data.len() {
            return Err(self.out_of_range(bytes));
        }
        self.pos = target;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let data = self.data;
        let end = self.pos.checked_add(n).filter(|&end| end <= data.len()).ok_or_else(|| self.out_of_range(n))?;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Everything up to the end of the readable region.
    pub fn read_to_end(&mut self) -> Result<&'a [u8]> {
        self.read_bytes(self.remaining())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        Ok(FourCC::from(self.read_u32()?))
    }

    /// Reads a big-endian integer `size` bytes wide. A width of 0 yields 0
    /// without consuming anything.
    pub fn read_uint(&mut self, size: u8) -> Result<u64> {
        match size {
            0 => Ok(0),
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => Err(Error::InvalidFieldSize { field: "integer", size }),
        }
    }

    /// Reads a NUL-terminated string, returning it without the terminator.
    pub fn read_string(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnterminatedString { offset: self.pos.to_u64() })?;
        let s = &rest[..len];
        self.pos += len + 1;
        Ok(s)
    }

    #[cold]
    fn out_of_range(&self, needed: usize) -> Error {
        Error::OutOfRange {
            offset: self.pos.to_u64(),
            needed: needed.to_u64(),
            len: self.data.len().to_u64(),
        }
    }
}
