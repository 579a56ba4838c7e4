#![deny(unsafe_code)]
//! Reading and writing AVIF containers, plus the AV1 OBU framing and
//! sequence header inside them.
//!
//! [`parse`] turns a complete file into a [`FileBox`] tree, [`write`] turns a
//! tree back into bytes, and [`obu::parse_obus`] decodes an AV1 bitstream into
//! packets. The [`query`] module has helpers for the common lookups (primary
//! item, properties of an item, where an item's bytes live).
//!
//! This crate is written entirely in safe Rust code, and every allocation
//! sized by file contents is fallible.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use std::convert::TryInto as _;
use std::num::NonZeroU32;

pub mod bits;
pub mod boxes;
pub mod container;
pub mod cursor;
pub mod obu;
mod parser;
pub mod query;
mod writer;

pub use crate::boxes::{BoxType, FourCC};
pub use crate::container::*;
pub use crate::parser::{parse, parse_with_config, read_avif};
pub use crate::writer::{write, write_to};
pub use enough::{Stop, StopReason, Unstoppable};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap_or(u64::MAX)
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap_or(usize::MAX)
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;
#[doc(hidden)]
pub type TryString = fallible_collections::TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser, writer and bitstream failures.
///
/// Structural problems carry the offending value and, where there is one,
/// the byte offset.
#[derive(Debug)]
pub enum Error {
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// A read of `needed` bytes at `offset` would pass the end (`len`) of the buffer.
    OutOfRange { offset: u64, needed: u64, len: u64 },
    /// No NUL terminator before the end of the enclosing box.
    UnterminatedString { offset: u64 },
    /// An integer width that must be 0, 4 or 8 bytes wasn't.
    InvalidFieldSize { field: &'static str, size: u8 },
    UnsupportedVersion { box_type: FourCC, version: u8 },
    /// A box declares an end past the end of whatever contains it.
    BoxOutOfBounds { box_type: FourCC, offset: u64, end: u64, limit: u64 },
    UnexpectedBox { expected: FourCC, found: FourCC },
    /// `ftyp` major brand isn't `avif`.
    UnsupportedBrand(FourCC),
    /// `ftyp` minor version isn't 0.
    UnsupportedMinorVersion(u32),
    /// OBU type in the reserved 9..=14 range.
    UnknownObuType(u8),
    /// `trailing_bits()` didn't match the expected `1` then `0…` pattern.
    TrailingBits { what: &'static str, value: u8 },
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
    /// Operation was stopped/cancelled
    Stopped(enough::StopReason),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s) | Self::Unsupported(s) | Self::ResourceLimitExceeded(s) => s,
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfRange { offset, needed, len } => {
                return write!(f, "out of range: {needed} bytes at offset {offset} in a buffer of {len}");
            },
            Self::UnterminatedString { offset } => {
                return write!(f, "corrupted or unterminated string at offset {offset}");
            },
            Self::InvalidFieldSize { field, size } => {
                return write!(f, "{field} must be 0, 4 or 8, got {size}");
            },
            Self::UnsupportedVersion { box_type, version } => {
                return write!(f, "unsupported '{box_type}' version {version}");
            },
            Self::BoxOutOfBounds { box_type, offset, end, limit } => {
                return write!(f, "'{box_type}' at {offset} ends at {end}, past its container's end {limit}");
            },
            Self::UnexpectedBox { expected, found } => {
                return write!(f, "expected '{expected}' box, found '{found}'");
            },
            Self::UnsupportedBrand(brand) => return write!(f, "unsupported major brand '{brand}', expected 'avif'"),
            Self::UnsupportedMinorVersion(v) => return write!(f, "unsupported minor version {v}, expected 0"),
            Self::UnknownObuType(t) => return write!(f, "unknown obu type = {t}"),
            Self::TrailingBits { what, value } => {
                return write!(f, "{what} has the wrong value {value}; is that a corrupted file?");
            },
            Self::OutOfMemory => "OOM",
            Self::Stopped(reason) => return write!(f, "Stopped: {}", reason),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::InvalidData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            Error::OutOfMemory => std::io::ErrorKind::OutOfMemory,
            Error::Unsupported(_)
            | Error::UnsupportedVersion { .. }
            | Error::UnsupportedBrand(_)
            | Error::UnsupportedMinorVersion(_) => std::io::ErrorKind::Unsupported,
            Error::ResourceLimitExceeded(_) | Error::Stopped(_) => std::io::ErrorKind::Other,
            _ => std::io::ErrorKind::InvalidData,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<enough::StopReason> for Error {
    fn from(reason: enough::StopReason) -> Self {
        Self::Stopped(reason)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Limits and strictness for [`parse_with_config`].
///
/// # Examples
///
/// ```rust
/// use zenavif_boxes::ParseConfig;
///
/// // Default limits, strict validation
/// let config = ParseConfig::default();
///
/// // Tight limit for untrusted input, tolerate minor encoder mistakes
/// let config = ParseConfig::default()
///     .with_peak_memory_limit(100_000_000)
///     .lenient(true);
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Maximum bytes copied out of `mdat`/`idat` boxes.
    /// Default: 1GB (1,000,000,000 bytes)
    pub peak_memory_limit: Option<u64>,

    /// Enable lenient parsing mode.
    ///
    /// Skips `infe` extensions of unknown type, accepts an `hdlr` name without
    /// a terminator, and ignores non-zero flags where they must be zero.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            peak_memory_limit: Some(1_000_000_000),
            lenient: false,
        }
    }
}

impl ParseConfig {
    /// Create a configuration with no resource limits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            peak_memory_limit: None,
            lenient: false,
        }
    }

    /// Set the peak memory limit in bytes
    #[must_use]
    pub fn with_peak_memory_limit(mut self, bytes: u64) -> Self {
        self.peak_memory_limit = Some(bytes);
        self
    }

    /// Enable lenient parsing mode
    #[must_use]
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Summary of an AV1 sequence header, see [`query::primary_item_metadata`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct AV1Metadata {
    /// Should be true for non-animated AVIF
    pub still_picture: bool,
    pub max_frame_width: NonZeroU32,
    pub max_frame_height: NonZeroU32,
    /// 8, 10, or 12
    pub bit_depth: u8,
    /// 0, 1 or 2 for the level of complexity
    pub seq_profile: u8,
    /// Horizontal and vertical. `false` is full-res.
    pub chroma_subsampling: (bool, bool),
    pub monochrome: bool,
}

impl AV1Metadata {
    /// Parses raw AV1 bitstream (OBU sequence header) only.
    ///
    /// This is for the bare image payload from an encoder, not an AVIF/HEIF file.
    /// To get this from an AVIF file, see [`query::primary_item_metadata`].
    #[inline(never)]
    pub fn parse_av1_bitstream(obu_bitstream: &[u8]) -> Result<Self> {
        let packets = obu::parse_obus(obu_bitstream)?;
        let h = obu::find_sequence_header(&packets).ok_or(Error::InvalidData("no sequence header OBU"))?;
        Ok(Self {
            still_picture: h.still_picture,
            max_frame_width: NonZeroU32::new(h.max_frame_width).ok_or(Error::InvalidData("zero frame width"))?,
            max_frame_height: NonZeroU32::new(h.max_frame_height).ok_or(Error::InvalidData("zero frame height"))?,
            bit_depth: h.color_config.bit_depth,
            seq_profile: h.seq_profile,
            chroma_subsampling: (h.color_config.subsampling_x, h.color_config.subsampling_y),
            monochrome: h.color_config.monochrome,
        })
    }
}
