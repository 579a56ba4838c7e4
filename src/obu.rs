// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AV1 OBU framing and sequence header decoding.
//!
//! Only the sequence header is decoded. Frame data, tile groups and metadata
//! OBUs are framed and skipped. See the AV1 Bitstream & Decoding Process
//! Specification, § 5.3 and § 5.5.

use std::convert::TryFrom;

use arrayvec::ArrayVec;
use log::{debug, trace};

use crate::bits::BitCursor;
use crate::{Error, Result, Stop, ToU64, TryVec, Unstoppable};

/// `seq_force_screen_content_tools` value meaning "decided per frame".
pub const SELECT_SCREEN_CONTENT_TOOLS: u8 = 2;
/// `seq_force_integer_mv` value meaning "decided per frame".
pub const SELECT_INTEGER_MV: u8 = 2;

/// Upper bound of `operating_points_cnt_minus_1 + 1`.
pub const MAX_OPERATING_POINTS: usize = 32;

/// `obu_type`, § 6.2.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObuType {
    Reserved,
    SequenceHeader,
    TemporalDelimiter,
    FrameHeader,
    TileGroup,
    Metadata,
    Frame,
    RedundantFrameHeader,
    TileList,
    Padding,
}

impl ObuType {
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            Self::Reserved => 0,
            Self::SequenceHeader => 1,
            Self::TemporalDelimiter => 2,
            Self::FrameHeader => 3,
            Self::TileGroup => 4,
            Self::Metadata => 5,
            Self::Frame => 6,
            Self::RedundantFrameHeader => 7,
            Self::TileList => 8,
            Self::Padding => 15,
        }
    }
}

impl TryFrom<u8> for ObuType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Reserved,
            1 => Self::SequenceHeader,
            2 => Self::TemporalDelimiter,
            3 => Self::FrameHeader,
            4 => Self::TileGroup,
            5 => Self::Metadata,
            6 => Self::Frame,
            7 => Self::RedundantFrameHeader,
            8 => Self::TileList,
            15 => Self::Padding,
            other => return Err(Error::UnknownObuType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuExtensionHeader {
    pub temporal_id: u8,
    pub spatial_id: u8,
    pub reserved_3bits: u8,
}

/// `obu_header()`, § 5.3.2. `forbidden` is reported as read, not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuHeader {
    pub forbidden: bool,
    pub obu_type: ObuType,
    pub extension_flag: bool,
    pub has_size_field: bool,
    pub reserved_1bit: bool,
    /// Present exactly when `extension_flag` is set.
    pub extension: Option<ObuExtensionHeader>,
}

macro_rules! u8_enum {
    ($(#[$attr:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant,)+
            Other(u8),
        }

        impl From<u8> for $name {
            fn from(v: u8) -> Self {
                match v {
                    $($value => Self::$variant,)+
                    other => Self::Other(other),
                }
            }
        }

        impl $name {
            #[must_use]
            pub fn value(self) -> u8 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Other(v) => v,
                }
            }
        }
    };
}

u8_enum!(
    /// `color_primaries`, § 6.4.2
    ColorPrimaries {
        Bt709 = 1,
        Unspecified = 2,
        Bt470M = 4,
        Bt470BG = 5,
        Bt601 = 6,
        Smpte240 = 7,
        GenericFilm = 8,
        Bt2020 = 9,
        Xyz = 10,
        Smpte431 = 11,
        Smpte432 = 12,
        Ebu3213 = 22,
    }
);

u8_enum!(
    /// `transfer_characteristics`, § 6.4.2
    TransferCharacteristics {
        Bt709 = 1,
        Unspecified = 2,
        Bt470M = 4,
        Bt470BG = 5,
        Bt601 = 6,
        Smpte240 = 7,
        Linear = 8,
        Log100 = 9,
        Log100Sqrt10 = 10,
        Iec61966 = 11,
        Bt1361 = 12,
        Srgb = 13,
        Bt2020TenBit = 14,
        Bt2020TwelveBit = 15,
        Smpte2084 = 16,
        Smpte428 = 17,
        Hlg = 18,
    }
);

u8_enum!(
    /// `matrix_coefficients`, § 6.4.2
    MatrixCoefficients {
        Identity = 0,
        Bt709 = 1,
        Unspecified = 2,
        Fcc = 4,
        Bt470BG = 5,
        Bt601 = 6,
        Smpte240 = 7,
        YCgCo = 8,
        Bt2020Ncl = 9,
        Bt2020Cl = 10,
        Smpte2085 = 11,
        ChromatNcl = 12,
        ChromatCl = 13,
        ICtCp = 14,
    }
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_display_tick: u32,
    pub time_scale: u32,
    pub equal_picture_interval: bool,
    /// Only coded when `equal_picture_interval` is set.
    pub num_ticks_per_picture_minus_1: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderModelInfo {
    pub buffer_delay_length_minus_1: u8,
    pub num_units_in_decoding_tick: u32,
    pub buffer_removal_time_length_minus_1: u8,
    pub frame_presentation_time_length_minus_1: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingParametersInfo {
    pub decoder_buffer_delay: u32,
    pub encoder_buffer_delay: u32,
    pub low_delay_mode_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingPoint {
    /// Bit `t` set: temporal layer `t` is included. Bit `8 + s`: spatial layer `s`.
    pub idc: u16,
    pub seq_level_idx: u8,
    pub seq_tier: u8,
    pub operating_parameters_info: Option<OperatingParametersInfo>,
    /// `initial_display_delay_minus_1 + 1`
    pub initial_display_delay: Option<u8>,
}

/// `color_config()`, § 5.5.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorConfig {
    /// 8, 10 or 12
    pub bit_depth: u8,
    pub monochrome: bool,
    pub color_description_present: bool,
    pub color_primaries: ColorPrimaries,
    pub transfer_characteristics: TransferCharacteristics,
    pub matrix_coefficients: MatrixCoefficients,
    pub color_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub separate_uv_delta_q: bool,
}

/// `sequence_header_obu()`, § 5.5.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub seq_profile: u8,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub timing_info: Option<TimingInfo>,
    pub decoder_model_info: Option<DecoderModelInfo>,
    pub initial_display_delay_present: bool,
    /// Never empty. A reduced header has a single implicit point with `idc == 0`.
    pub operating_points: ArrayVec<OperatingPoint, MAX_OPERATING_POINTS>,
    pub frame_width_bits: u8,
    pub frame_height_bits: u8,
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub frame_id_numbers_present: bool,
    /// `delta_frame_id_length_minus_2 + 2`, 0 when frame ids are absent
    pub delta_frame_id_length: u8,
    /// `additional_frame_id_length_minus_1 + 1`, 0 when frame ids are absent
    pub additional_frame_id_length: u8,
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_interintra_compound: bool,
    pub enable_masked_compound: bool,
    pub enable_warped_motion: bool,
    pub enable_dual_filter: bool,
    pub enable_order_hint: bool,
    pub enable_jnt_comp: bool,
    pub enable_ref_frame_mvs: bool,
    pub seq_choose_screen_content_tools: bool,
    /// 0, 1 or [`SELECT_SCREEN_CONTENT_TOOLS`]
    pub seq_force_screen_content_tools: u8,
    pub seq_choose_integer_mv: bool,
    /// 0, 1 or [`SELECT_INTEGER_MV`]
    pub seq_force_integer_mv: u8,
    /// 0 when order hints are disabled
    pub order_hint_bits: u8,
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub color_config: ColorConfig,
    pub film_grain_params_present: bool,
}

impl SequenceHeader {
    #[must_use]
    pub fn timing_info_present(&self) -> bool {
        self.timing_info.is_some()
    }

    #[must_use]
    pub fn decoder_model_info_present(&self) -> bool {
        self.decoder_model_info.is_some()
    }
}

/// What was decoded from an OBU payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObuContent {
    /// `OBU_RESERVED`: accepted and ignored.
    Reserved,
    SequenceHeader(SequenceHeader),
    TemporalDelimiter,
    /// Frame, tile and metadata payloads are framed but not decoded.
    Skipped,
    Padding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Byte offset of the OBU header.
    pub beg: usize,
    /// Byte offset one past the payload.
    pub end: usize,
    pub header: ObuHeader,
    pub content: ObuContent,
}

/// Splits a low-overhead AV1 bitstream into OBUs.
pub struct ObuParser<'a> {
    bits: BitCursor<'a>,
    operating_point: usize,
    operating_point_idc: u16,
}

impl<'a> ObuParser<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bits: BitCursor::new(data),
            operating_point: 0,
            operating_point_idc: 0,
        }
    }

    /// Selects which operating point filters layered OBUs once a sequence
    /// header has been seen. Out of range values select the last point.
    #[must_use]
    pub fn with_operating_point(mut self, operating_point: usize) -> Self {
        self.operating_point = operating_point;
        self
    }

    /// The layer mask in effect; 0 keeps everything.
    #[must_use]
    pub fn operating_point_idc(&self) -> u16 {
        self.operating_point_idc
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.bits.consumed()
    }

    /// Parses every OBU in the buffer, leaving out those dropped by the
    /// operating point.
    pub fn parse(mut self, stop: &dyn Stop) -> Result<TryVec<Packet>> {
        let mut packets = TryVec::new();
        while !self.is_done() {
            stop.check()?;
            if let Some(packet) = self.parse_packet()? {
                packets.push(packet)?;
            }
        }
        Ok(packets)
    }

    /// Parses one OBU. Returns `None` when the OBU belongs to a layer outside
    /// the selected operating point; it is skipped, not decoded.
    pub fn parse_packet(&mut self) -> Result<Option<Packet>> {
        let beg = self.bits.pos_in_bytes();
        let header = read_obu_header(&mut self.bits)?;
        let size = if header.has_size_field {
            usize::try_from(self.bits.read_leb128()?)?
        } else {
            // low overhead format: the last OBU runs to the end of the buffer
            self.bits.len_in_bytes() - self.bits.pos_in_bytes()
        };
        let payload_start = self.bits.pos_in_bytes();
        let end = payload_start
            .checked_add(size)
            .filter(|&end| end <= self.bits.len_in_bytes())
            .ok_or(Error::OutOfRange {
                offset: payload_start.to_u64(),
                needed: size.to_u64(),
                len: self.bits.len_in_bytes().to_u64(),
            })?;

        if let Some(ext) = header.extension {
            if !self.in_operating_point(header.obu_type, ext) {
                trace!("dropping {:?} OBU at {beg} (temporal {}, spatial {})", header.obu_type, ext.temporal_id, ext.spatial_id);
                self.bits.seek_in_bytes(end)?;
                return Ok(None);
            }
        }

        let content = match header.obu_type {
            ObuType::Reserved => {
                debug!("reserved OBU at {beg}, ignoring");
                ObuContent::Reserved
            },
            ObuType::SequenceHeader => {
                let sh = read_sequence_header(&mut self.bits)?;
                let last = sh.operating_points.len() - 1;
                self.operating_point_idc = sh.operating_points[self.operating_point.min(last)].idc;
                ObuContent::SequenceHeader(sh)
            },
            ObuType::TemporalDelimiter => {
                if size != 0 {
                    return Err(Error::InvalidData("temporal delimiter OBU must be empty"));
                }
                ObuContent::TemporalDelimiter
            },
            ObuType::Padding => ObuContent::Padding,
            skipped => {
                trace!("skipping {skipped:?} OBU of {size} bytes at {beg}");
                ObuContent::Skipped
            },
        };

        if self.bits.pos_in_bits() > end * 8 {
            return Err(Error::InvalidData("OBU payload overruns its declared size"));
        }
        if size > 0 && matches!(content, ObuContent::SequenceHeader(_) | ObuContent::TemporalDelimiter | ObuContent::Padding) {
            self.check_trailing_bits(payload_start, size)?;
        }
        self.bits.seek_in_bytes(end)?;

        Ok(Some(Packet {
            beg,
            end,
            header,
            content,
        }))
    }

    fn in_operating_point(&self, obu_type: ObuType, ext: ObuExtensionHeader) -> bool {
        let idc = self.operating_point_idc;
        if idc == 0 || matches!(obu_type, ObuType::SequenceHeader | ObuType::TemporalDelimiter) {
            return true;
        }
        let in_temporal_layer = (idc >> ext.temporal_id) & 1 == 1;
        let in_spatial_layer = (idc >> (ext.spatial_id + 8)) & 1 == 1;
        in_temporal_layer && in_spatial_layer
    }

    /// `trailing_bits()`, § 5.3.4: a single 1 bit, then zeros up to the end
    /// of the payload.
    fn check_trailing_bits(&mut self, payload_start: usize, size: usize) -> Result<()> {
        let payload_bits = self.bits.pos_in_bits() - payload_start * 8;
        let mut left = (size * 8)
            .checked_sub(payload_bits)
            .filter(|&left| left > 0)
            .ok_or(Error::InvalidData("OBU payload overruns its declared size"))?;

        let one = self.bits.read_bits(1)?;
        if one != 1 {
            return Err(Error::TrailingBits {
                what: "trailing_one_bit",
                value: one,
            });
        }
        left -= 1;
        while left > 0 {
            let n = left.min(8);
            let zero = self.bits.read_bits(n as u8)?;
            if zero != 0 {
                return Err(Error::TrailingBits {
                    what: "trailing_zero_bit",
                    value: zero,
                });
            }
            left -= n;
        }
        Ok(())
    }
}

/// Parses a whole buffer with operating point 0.
pub fn parse_obus(data: &[u8]) -> Result<TryVec<Packet>> {
    ObuParser::new(data).parse(&Unstoppable)
}

/// The first sequence header among `packets`.
#[must_use]
pub fn find_sequence_header(packets: &[Packet]) -> Option<&SequenceHeader> {
    packets.iter().find_map(|p| match &p.content {
        ObuContent::SequenceHeader(sh) => Some(sh),
        _ => None,
    })
}

fn read_obu_header(bits: &mut BitCursor<'_>) -> Result<ObuHeader> {
    let forbidden = bits.read_bool()?;
    let obu_type = ObuType::try_from(bits.read_bits(4)?)?;
    let extension_flag = bits.read_bool()?;
    let has_size_field = bits.read_bool()?;
    let reserved_1bit = bits.read_bool()?;
    let extension = if extension_flag {
        Some(ObuExtensionHeader {
            temporal_id: bits.read_bits(3)?,
            spatial_id: bits.read_bits(2)?,
            reserved_3bits: bits.read_bits(3)?,
        })
    } else {
        None
    };
    Ok(ObuHeader {
        forbidden,
        obu_type,
        extension_flag,
        has_size_field,
        reserved_1bit,
        extension,
    })
}

fn read_timing_info(bits: &mut BitCursor<'_>) -> Result<TimingInfo> {
    let num_units_in_display_tick = bits.read_u32()?;
    let time_scale = bits.read_u32()?;
    let equal_picture_interval = bits.read_bool()?;
    let num_ticks_per_picture_minus_1 = if equal_picture_interval {
        Some(bits.read_uvlc()?)
    } else {
        None
    };
    Ok(TimingInfo {
        num_units_in_display_tick,
        time_scale,
        equal_picture_interval,
        num_ticks_per_picture_minus_1,
    })
}

fn read_decoder_model_info(bits: &mut BitCursor<'_>) -> Result<DecoderModelInfo> {
    Ok(DecoderModelInfo {
        buffer_delay_length_minus_1: bits.read_bits(5)?,
        num_units_in_decoding_tick: bits.read_u32()?,
        buffer_removal_time_length_minus_1: bits.read_bits(5)?,
        frame_presentation_time_length_minus_1: bits.read_bits(5)?,
    })
}

fn read_operating_parameters_info(bits: &mut BitCursor<'_>, model: &DecoderModelInfo) -> Result<OperatingParametersInfo> {
    let n = model.buffer_delay_length_minus_1 + 1;
    Ok(OperatingParametersInfo {
        decoder_buffer_delay: bits.read_uint(n)? as u32,
        encoder_buffer_delay: bits.read_uint(n)? as u32,
        low_delay_mode_flag: bits.read_bool()?,
    })
}

fn read_sequence_header(bits: &mut BitCursor<'_>) -> Result<SequenceHeader> {
    let seq_profile = bits.read_bits(3)?;
    let still_picture = bits.read_bool()?;
    let reduced_still_picture_header = bits.read_bool()?;

    let mut timing_info = None;
    let mut decoder_model_info = None;
    let mut initial_display_delay_present = false;
    let mut operating_points = ArrayVec::new();

    if reduced_still_picture_header {
        operating_points.push(OperatingPoint {
            idc: 0,
            seq_level_idx: bits.read_bits(5)?,
            seq_tier: 0,
            operating_parameters_info: None,
            initial_display_delay: None,
        });
    } else {
        if bits.read_bool()? {
            timing_info = Some(read_timing_info(bits)?);
            if bits.read_bool()? {
                decoder_model_info = Some(read_decoder_model_info(bits)?);
            }
        }
        initial_display_delay_present = bits.read_bool()?;
        let operating_points_cnt = bits.read_bits(5)? + 1;
        for _ in 0..operating_points_cnt {
            let idc = bits.read_uint(12)? as u16;
            let seq_level_idx = bits.read_bits(5)?;
            let seq_tier = if seq_level_idx > 7 { bits.read_bits(1)? } else { 0 };
            let mut operating_parameters_info = None;
            if let Some(model) = &decoder_model_info {
                if bits.read_bool()? {
                    operating_parameters_info = Some(read_operating_parameters_info(bits, model)?);
                }
            }
            let mut initial_display_delay = None;
            if initial_display_delay_present && bits.read_bool()? {
                initial_display_delay = Some(bits.read_bits(4)? + 1);
            }
            operating_points
                .try_push(OperatingPoint {
                    idc,
                    seq_level_idx,
                    seq_tier,
                    operating_parameters_info,
                    initial_display_delay,
                })
                .map_err(|_| Error::InvalidData("too many operating points"))?;
        }
    }

    let frame_width_bits = bits.read_bits(4)? + 1;
    let frame_height_bits = bits.read_bits(4)? + 1;
    let max_frame_width = bits.read_uint(frame_width_bits)? as u32 + 1;
    let max_frame_height = bits.read_uint(frame_height_bits)? as u32 + 1;

    let frame_id_numbers_present = !reduced_still_picture_header && bits.read_bool()?;
    let (delta_frame_id_length, additional_frame_id_length) = if frame_id_numbers_present {
        (bits.read_bits(4)? + 2, bits.read_bits(3)? + 1)
    } else {
        (0, 0)
    };

    let use_128x128_superblock = bits.read_bool()?;
    let enable_filter_intra = bits.read_bool()?;
    let enable_intra_edge_filter = bits.read_bool()?;

    let mut enable_interintra_compound = false;
    let mut enable_masked_compound = false;
    let mut enable_warped_motion = false;
    let mut enable_dual_filter = false;
    let mut enable_order_hint = false;
    let mut enable_jnt_comp = false;
    let mut enable_ref_frame_mvs = false;
    let mut seq_choose_screen_content_tools = false;
    let mut seq_force_screen_content_tools = SELECT_SCREEN_CONTENT_TOOLS;
    let mut seq_choose_integer_mv = false;
    let mut seq_force_integer_mv = SELECT_INTEGER_MV;
    let mut order_hint_bits = 0;

    if !reduced_still_picture_header {
        enable_interintra_compound = bits.read_bool()?;
        enable_masked_compound = bits.read_bool()?;
        enable_warped_motion = bits.read_bool()?;
        enable_dual_filter = bits.read_bool()?;
        enable_order_hint = bits.read_bool()?;
        if enable_order_hint {
            enable_jnt_comp = bits.read_bool()?;
            enable_ref_frame_mvs = bits.read_bool()?;
        }
        seq_choose_screen_content_tools = bits.read_bool()?;
        if !seq_choose_screen_content_tools {
            seq_force_screen_content_tools = bits.read_bits(1)?;
        }
        if seq_force_screen_content_tools > 0 {
            seq_choose_integer_mv = bits.read_bool()?;
            if !seq_choose_integer_mv {
                seq_force_integer_mv = bits.read_bits(1)?;
            }
        }
        if enable_order_hint {
            order_hint_bits = bits.read_bits(3)? + 1;
        }
    }

    let enable_superres = bits.read_bool()?;
    let enable_cdef = bits.read_bool()?;
    let enable_restoration = bits.read_bool()?;
    let color_config = read_color_config(bits, seq_profile)?;
    let film_grain_params_present = bits.read_bool()?;

    Ok(SequenceHeader {
        seq_profile,
        still_picture,
        reduced_still_picture_header,
        timing_info,
        decoder_model_info,
        initial_display_delay_present,
        operating_points,
        frame_width_bits,
        frame_height_bits,
        max_frame_width,
        max_frame_height,
        frame_id_numbers_present,
        delta_frame_id_length,
        additional_frame_id_length,
        use_128x128_superblock,
        enable_filter_intra,
        enable_intra_edge_filter,
        enable_interintra_compound,
        enable_masked_compound,
        enable_warped_motion,
        enable_dual_filter,
        enable_order_hint,
        enable_jnt_comp,
        enable_ref_frame_mvs,
        seq_choose_screen_content_tools,
        seq_force_screen_content_tools,
        seq_choose_integer_mv,
        seq_force_integer_mv,
        order_hint_bits,
        enable_superres,
        enable_cdef,
        enable_restoration,
        color_config,
        film_grain_params_present,
    })
}

fn read_color_config(bits: &mut BitCursor<'_>, seq_profile: u8) -> Result<ColorConfig> {
    let high_bitdepth = bits.read_bool()?;
    let bit_depth = match (seq_profile, high_bitdepth) {
        (2, true) => {
            if bits.read_bool()? {
                12
            } else {
                10
            }
        },
        (0..=2, true) => 10,
        (0..=2, false) => 8,
        _ => return Err(Error::InvalidData("seq_profile must be 0, 1 or 2")),
    };
    let monochrome = seq_profile != 1 && bits.read_bool()?;

    let color_description_present = bits.read_bool()?;
    let (color_primaries, transfer_characteristics, matrix_coefficients) = if color_description_present {
        (
            ColorPrimaries::from(bits.read_u8()?),
            TransferCharacteristics::from(bits.read_u8()?),
            MatrixCoefficients::from(bits.read_u8()?),
        )
    } else {
        (
            ColorPrimaries::Unspecified,
            TransferCharacteristics::Unspecified,
            MatrixCoefficients::Unspecified,
        )
    };

    let mut config = ColorConfig {
        bit_depth,
        monochrome,
        color_description_present,
        color_primaries,
        transfer_characteristics,
        matrix_coefficients,
        color_range: false,
        subsampling_x: true,
        subsampling_y: true,
        chroma_sample_position: 0,
        separate_uv_delta_q: false,
    };

    if monochrome {
        config.color_range = bits.read_bool()?;
        return Ok(config);
    }

    if color_primaries == ColorPrimaries::Bt709
        && transfer_characteristics == TransferCharacteristics::Srgb
        && matrix_coefficients == MatrixCoefficients::Identity
    {
        config.color_range = true;
        config.subsampling_x = false;
        config.subsampling_y = false;
    } else {
        config.color_range = bits.read_bool()?;
        let (x, y) = match seq_profile {
            0 => (true, true),
            1 => (false, false),
            _ if bit_depth == 12 => {
                let x = bits.read_bool()?;
                let y = x && bits.read_bool()?;
                (x, y)
            },
            _ => (true, false),
        };
        config.subsampling_x = x;
        config.subsampling_y = y;
        if x && y {
            config.chroma_sample_position = bits.read_bits(2)?;
        }
    }
    config.separate_uv_delta_q = bits.read_bool()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 13] = [0x0a, 0x0b, 0x20, 0x00, 0x00, 0x42, 0x6b, 0xbf, 0xbc, 0x6f, 0xff, 0xcc, 0x10];

    /// MSB-first bit packer for building sequence headers.
    #[derive(Default)]
    struct BitWriter {
        bits: std::vec::Vec<bool>,
    }

    impl BitWriter {
        fn put(&mut self, value: u64, n: u32) -> &mut Self {
            for i in (0..n).rev() {
                self.bits.push((value >> i) & 1 == 1);
            }
            self
        }

        fn flag(&mut self, b: bool) -> &mut Self {
            self.put(b.into(), 1)
        }

        /// Appends trailing bits and returns the payload.
        fn finish(&mut self) -> std::vec::Vec<u8> {
            self.bits.push(true);
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
            self.bits
                .chunks(8)
                .map(|c| c.iter().fold(0u8, |acc, &b| acc << 1 | u8::from(b)))
                .collect()
        }
    }

    fn obu(header: u8, extension: Option<u8>, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut v = vec![header | 0b10];
        v.extend(extension);
        leb128::write::unsigned(&mut v, payload.len() as u64).unwrap();
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn sample_sequence_header() {
        let packets = parse_obus(&SAMPLE).unwrap();
        assert_eq!(packets.len(), 1);
        let p = &packets[0];
        assert_eq!(p.header.obu_type, ObuType::SequenceHeader);
        assert!(p.header.has_size_field);
        assert_eq!((p.beg, p.end), (0, 13));
        let sh = find_sequence_header(&packets).unwrap();
        assert!(sh.enable_cdef);
        assert!(sh.use_128x128_superblock);
        assert!(!sh.film_grain_params_present);
        assert!(!sh.enable_superres);
        assert_eq!(sh.seq_profile, 1);
        assert_eq!((sh.max_frame_width, sh.max_frame_height), (960, 1508));
        assert_eq!(sh.color_config.bit_depth, 8);
        assert!(!sh.color_config.subsampling_x);
        assert_eq!(sh.operating_points.len(), 1);
        assert_eq!(sh.operating_points[0].seq_level_idx, 8);
    }

    #[test]
    fn trailing_bits_must_be_one_then_zeros() {
        let mut data = SAMPLE;
        data[12] = 0b0001_1000;
        match parse_obus(&data) {
            Err(Error::TrailingBits { what, .. }) => assert_eq!(what, "trailing_zero_bit"),
            other => panic!("unexpected {other:?}"),
        }
        data[12] = 0b0001_0001;
        match parse_obus(&data) {
            Err(Error::TrailingBits { what, value }) => {
                assert_eq!(what, "trailing_zero_bit");
                assert_eq!(value, 1);
            },
            other => panic!("unexpected {other:?}"),
        }
        data[12] = 0b0000_0000;
        match parse_obus(&data) {
            Err(Error::TrailingBits { what, value: 0 }) => assert_eq!(what, "trailing_one_bit"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn temporal_delimiter_is_empty() {
        let packets = parse_obus(&[0x12, 0x00]).unwrap();
        assert_eq!(packets[0].content, ObuContent::TemporalDelimiter);
        assert!(parse_obus(&[0x12, 0x01, 0x80]).is_err());
    }

    #[test]
    fn obu_type_range() {
        assert!(matches!(parse_obus(&[0x4a, 0x00]), Err(Error::UnknownObuType(9))));
        assert!(matches!(parse_obus(&[0x72, 0x00]), Err(Error::UnknownObuType(14))));
        // reserved and padding OBUs are accepted
        let packets = parse_obus(&[0x02, 0x01, 0xff, 0x7a, 0x01, 0x80]).unwrap();
        assert_eq!(packets[0].content, ObuContent::Reserved);
        assert_eq!(packets[1].content, ObuContent::Padding);
        assert_eq!(packets[1].header.obu_type.value(), 15);
    }

    #[test]
    fn undecoded_payloads_are_skipped() {
        let mut data = obu(0x18, None, &[0xaa, 0xbb]);
        data.extend(obu(0x12, None, &[]));
        let packets = parse_obus(&data).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header.obu_type, ObuType::FrameHeader);
        assert_eq!(packets[0].content, ObuContent::Skipped);
        assert_eq!((packets[0].beg, packets[0].end), (0, 4));
        assert_eq!(packets[1].beg, 4);
    }

    #[test]
    fn size_inferred_without_size_field() {
        // frame OBU without a size field runs to the end of the buffer
        let packets = parse_obus(&[0x30, 1, 2, 3]).unwrap();
        assert_eq!(packets[0].end, 4);
        assert!(!packets[0].header.has_size_field);

        let packets = parse_obus(&[0x34, 0x08, 1, 2]).unwrap();
        assert_eq!(packets[0].header.extension.unwrap().temporal_id, 0);
        assert_eq!(packets[0].end, 4);
    }

    #[test]
    fn declared_size_past_end() {
        assert!(matches!(parse_obus(&[0x1a, 0x05, 0x00]), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn layers_outside_operating_point_are_dropped() {
        let mut p = ObuParser::new(&[]);
        p.operating_point_idc = 0x101;
        let t1 = ObuExtensionHeader { temporal_id: 1, spatial_id: 0, reserved_3bits: 0 };
        let t0 = ObuExtensionHeader { temporal_id: 0, ..t1 };
        let s1 = ObuExtensionHeader { spatial_id: 1, ..t0 };
        assert!(!p.in_operating_point(ObuType::Frame, t1));
        assert!(p.in_operating_point(ObuType::Frame, t0));
        assert!(!p.in_operating_point(ObuType::Frame, s1));
        assert!(p.in_operating_point(ObuType::TemporalDelimiter, t1));
        assert!(p.in_operating_point(ObuType::SequenceHeader, s1));
    }

    fn layered_sequence_header() -> std::vec::Vec<u8> {
        let mut w = BitWriter::default();
        w.put(0, 3).flag(false).flag(false); // profile, still_picture, reduced
        w.flag(true).put(1, 32).put(30, 32).flag(true).put(1, 1); // timing info, uvlc(0)
        w.flag(true).put(9, 5).put(1, 32).put(4, 5).put(4, 5); // decoder model info
        w.flag(true); // initial_display_delay_present
        w.put(1, 5); // two operating points
        w.put(0x103, 12).put(9, 5).put(1, 1); // idc, level, tier
        w.flag(true).put(100, 10).put(200, 10).flag(false);
        w.flag(true).put(3, 4);
        w.put(0x101, 12).put(4, 5).flag(false).flag(false);
        w.put(10, 4).put(10, 4).put(639, 11).put(479, 11);
        w.flag(true).put(5, 4).put(2, 3); // frame ids
        w.flag(false).flag(true).flag(true); // sb128, filter intra, intra edge
        w.flag(true).flag(true).flag(false).flag(true); // interintra, masked, warped, dual filter
        w.flag(true).flag(true).flag(false); // order hint, jnt comp, ref frame mvs
        w.flag(false).put(1, 1); // screen content tools forced on
        w.flag(true); // seq_choose_integer_mv
        w.put(6, 3); // order_hint_bits_minus_1
        w.flag(false).flag(true).flag(true); // superres, cdef, restoration
        w.flag(true).flag(false); // high bitdepth, mono
        w.flag(true).put(9, 8).put(16, 8).put(9, 8).flag(true); // colour description, range
        w.put(1, 2).flag(false); // chroma position, separate_uv_delta_q
        w.flag(true); // film grain
        w.finish()
    }

    #[test]
    fn full_sequence_header() {
        let data = obu(0x08, None, &layered_sequence_header());
        let packets = parse_obus(&data).unwrap();
        let sh = find_sequence_header(&packets).unwrap();

        let timing = sh.timing_info.unwrap();
        assert_eq!(timing.time_scale, 30);
        assert_eq!(timing.num_ticks_per_picture_minus_1, Some(0));
        assert_eq!(sh.decoder_model_info.unwrap().buffer_delay_length_minus_1, 9);
        assert_eq!(sh.operating_points.len(), 2);
        let op0 = &sh.operating_points[0];
        assert_eq!((op0.idc, op0.seq_level_idx, op0.seq_tier), (0x103, 9, 1));
        assert_eq!(
            op0.operating_parameters_info,
            Some(OperatingParametersInfo { decoder_buffer_delay: 100, encoder_buffer_delay: 200, low_delay_mode_flag: false })
        );
        assert_eq!(op0.initial_display_delay, Some(4));
        let op1 = &sh.operating_points[1];
        assert_eq!((op1.idc, op1.seq_level_idx, op1.seq_tier), (0x101, 4, 0));
        assert_eq!(op1.operating_parameters_info, None);
        assert_eq!(op1.initial_display_delay, None);

        assert_eq!((sh.max_frame_width, sh.max_frame_height), (640, 480));
        assert_eq!((sh.delta_frame_id_length, sh.additional_frame_id_length), (7, 3));
        assert!(sh.enable_order_hint && sh.enable_jnt_comp && !sh.enable_ref_frame_mvs);
        assert_eq!(sh.seq_force_screen_content_tools, 1);
        assert!(sh.seq_choose_integer_mv);
        assert_eq!(sh.seq_force_integer_mv, SELECT_INTEGER_MV);
        assert_eq!(sh.order_hint_bits, 7);

        let cc = &sh.color_config;
        assert_eq!(cc.bit_depth, 10);
        assert_eq!(cc.color_primaries, ColorPrimaries::Bt2020);
        assert_eq!(cc.transfer_characteristics, TransferCharacteristics::Smpte2084);
        assert_eq!(cc.matrix_coefficients, MatrixCoefficients::Bt2020Ncl);
        assert!(cc.color_range && cc.subsampling_x && cc.subsampling_y);
        assert_eq!(cc.chroma_sample_position, 1);
        assert!(sh.film_grain_params_present);
    }

    #[test]
    fn operating_point_selection_filters_layers() {
        let mut data = obu(0x08, None, &layered_sequence_header());
        // frame OBU in temporal layer 1
        data.extend(obu(0x34, Some(0b001_00_000), &[0]));

        let mut parser = ObuParser::new(&data);
        assert_eq!(parser.parse_packet().unwrap().unwrap().header.obu_type, ObuType::SequenceHeader);
        assert_eq!(parser.operating_point_idc(), 0x103);
        assert!(parser.parse_packet().unwrap().is_some());
        assert!(parser.is_done());

        let packets = ObuParser::new(&data).with_operating_point(1).parse(&Unstoppable).unwrap();
        assert_eq!(packets.len(), 1);

        // out of range selects the last point
        let mut parser = ObuParser::new(&data).with_operating_point(7);
        parser.parse_packet().unwrap();
        assert_eq!(parser.operating_point_idc(), 0x101);
        assert!(parser.parse_packet().unwrap().is_none());
        assert!(parser.is_done());
    }

    #[test]
    fn reduced_still_picture_header() {
        let mut w = BitWriter::default();
        w.put(2, 3).flag(true).flag(true); // profile 2, still, reduced
        w.put(31, 5); // seq_level_idx
        w.put(15, 4).put(15, 4).put(0xffff, 16).put(0, 16);
        w.flag(true).flag(false).flag(false); // sb128, filter intra, intra edge
        w.flag(false).flag(true).flag(false); // superres, cdef, restoration
        w.flag(true).flag(true).flag(false); // high bitdepth, twelve bit, mono
        w.flag(true).put(1, 8).put(13, 8).put(0, 8); // sRGB identity shortcut
        w.flag(false); // separate_uv_delta_q
        w.flag(false); // film grain
        let data = obu(0x08, None, &w.finish());

        let packets = parse_obus(&data).unwrap();
        let sh = find_sequence_header(&packets).unwrap();
        assert!(sh.still_picture && sh.reduced_still_picture_header);
        assert_eq!(sh.operating_points.len(), 1);
        assert_eq!(sh.operating_points[0].idc, 0);
        assert_eq!(sh.operating_points[0].seq_level_idx, 31);
        assert!(!sh.timing_info_present() && !sh.decoder_model_info_present());
        assert_eq!((sh.max_frame_width, sh.max_frame_height), (65536, 1));
        assert!(!sh.frame_id_numbers_present);
        assert_eq!(sh.seq_force_screen_content_tools, SELECT_SCREEN_CONTENT_TOOLS);
        assert_eq!(sh.seq_force_integer_mv, SELECT_INTEGER_MV);
        assert_eq!(sh.color_config.bit_depth, 12);
        assert!(sh.color_config.color_range);
        assert!(!sh.color_config.subsampling_x && !sh.color_config.subsampling_y);
    }

    #[test]
    fn monochrome_stops_after_colour_range() {
        let mut w = BitWriter::default();
        w.put(0, 3).flag(true).flag(true).put(0, 5);
        w.put(0, 4).put(0, 4).put(0, 1).put(0, 1);
        w.flag(false).flag(false).flag(false);
        w.flag(false).flag(false).flag(false);
        w.flag(false).flag(true).flag(false).flag(true); // 8-bit mono, no description, full range
        w.flag(false); // film grain
        let data = obu(0x08, None, &w.finish());
        let packets = parse_obus(&data).unwrap();
        let cc = find_sequence_header(&packets).unwrap().color_config;
        assert!(cc.monochrome && cc.color_range);
        assert!(cc.subsampling_x && cc.subsampling_y);
        assert!(!cc.separate_uv_delta_q);
        assert_eq!(cc.matrix_coefficients, MatrixCoefficients::Unspecified);
    }

    #[test]
    fn invalid_profile() {
        let mut w = BitWriter::default();
        w.put(3, 3).flag(true).flag(true).put(0, 5);
        w.put(0, 4).put(0, 4).put(0, 1).put(0, 1);
        w.put(0, 6).flag(false);
        let data = obu(0x08, None, &w.finish());
        assert!(matches!(parse_obus(&data), Err(Error::InvalidData(_))));
    }

    #[test]
    fn colour_enums_keep_unknown_values() {
        assert_eq!(ColorPrimaries::from(3), ColorPrimaries::Other(3));
        assert_eq!(ColorPrimaries::Other(3).value(), 3);
        assert_eq!(TransferCharacteristics::from(13), TransferCharacteristics::Srgb);
        assert_eq!(MatrixCoefficients::Identity.value(), 0);
    }
}
