// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The typed box tree produced by [`crate::parse`] and consumed by
//! [`crate::write`].
//!
//! These are plain data. Fields that only exist in some box versions are
//! `Option`s, and the version/flags that drove the layout are kept in each
//! full box's [`FullBoxHeader`] so writing reproduces the same layout.

use crate::boxes::{BoxType, FourCC};
use crate::{Error, TryString, TryVec};

/// Version and flags of an ISO full box. Flags are 24 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullBoxHeader {
    pub version: u8,
    pub flags: u32,
}

impl FullBoxHeader {
    #[must_use]
    pub const fn new(version: u8, flags: u32) -> Self {
        Self { version, flags }
    }
}

/// A whole AVIF file.
#[derive(Debug, Default, PartialEq)]
pub struct FileBox {
    pub file_type: FileTypeBox,
    /// Absent when the file has no `meta` box.
    pub meta: Option<MetaBox>,
    pub media_data: TryVec<MediaDataBox>,
}

/// See ISO 14496-12:2015 § 4.3
#[derive(Debug, Default, PartialEq)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: TryVec<FourCC>,
}

/// See ISO 14496-12:2015 § 8.11.1
#[derive(Debug, Default, PartialEq)]
pub struct MetaBox {
    pub header: FullBoxHeader,
    pub handler: HandlerBox,
    pub item_properties: ItemPropertiesBox,
    pub item_location: ItemLocationBox,
    pub item_info: ItemInfoBox,
    pub primary_item: Option<PrimaryItemBox>,
    pub item_reference: Option<ItemReferenceBox>,
    /// Contents of the `idat` box, used by `iloc` construction method 1.
    pub item_data: Option<TryVec<u8>>,
}

/// See ISO 14496-12:2015 § 8.4.3
#[derive(Debug, Default, PartialEq)]
pub struct HandlerBox {
    pub header: FullBoxHeader,
    pub handler_type: FourCC,
    /// Without the NUL terminator.
    pub name: TryString,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertiesBox {
    pub properties: ItemPropertyContainer,
    pub associations: TryVec<ItemPropertyAssociation>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyContainer {
    /// Referenced from `ipma` by 1-based index.
    pub properties: TryVec<Property>,
}

impl ItemPropertyContainer {
    /// Resolves a 1-based `ipma` property index. Index 0 means "none".
    #[must_use]
    pub fn get(&self, property_index: u16) -> Option<&Property> {
        match property_index {
            0 => None,
            i => self.properties.get(usize::from(i) - 1),
        }
    }
}

/// One entry of an `ipco` box.
#[derive(Debug, PartialEq)]
pub enum Property {
    PixelAspectRatio(PixelAspectRatioBox),
    ImageSpatialExtents(ImageSpatialExtentsProperty),
    PixelInformation(PixelInformationProperty),
    RelativeLocation(RelativeLocationProperty),
    AuxiliaryType(AuxiliaryTypeProperty),
    CleanAperture(CleanApertureBox),
    ImageRotation(ImageRotationBox),
    ImageMirror(ImageMirrorBox),
    ColourInformation(ColourInformationBox),
    ContentLightLevel(ContentLightLevelBox),
    MasteringDisplayColourVolume(MasteringDisplayColourVolumeBox),
    AV1CodecConfiguration(AV1CodecConfigurationBox),
    /// A box we don't interpret, kept so later indices stay valid.
    Unknown(OpaqueProperty),
}

impl Property {
    #[must_use]
    pub fn box_type(&self) -> FourCC {
        let t = match self {
            Self::PixelAspectRatio(_) => BoxType::PixelAspectRatioBox,
            Self::ImageSpatialExtents(_) => BoxType::ImageSpatialExtentsProperty,
            Self::PixelInformation(_) => BoxType::PixelInformationProperty,
            Self::RelativeLocation(_) => BoxType::RelativeLocationProperty,
            Self::AuxiliaryType(_) => BoxType::AuxiliaryTypeProperty,
            Self::CleanAperture(_) => BoxType::CleanApertureBox,
            Self::ImageRotation(_) => BoxType::ImageRotationBox,
            Self::ImageMirror(_) => BoxType::ImageMirrorBox,
            Self::ColourInformation(_) => BoxType::ColourInformationBox,
            Self::ContentLightLevel(_) => BoxType::ContentLightLevelBox,
            Self::MasteringDisplayColourVolume(_) => BoxType::MasteringDisplayColourVolumeBox,
            Self::AV1CodecConfiguration(_) => BoxType::AV1CodecConfigurationBox,
            Self::Unknown(p) => return p.box_type,
        };
        t.into()
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct OpaqueProperty {
    pub box_type: FourCC,
    pub payload: TryVec<u8>,
}

/// See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelAspectRatioBox {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

/// See ISO/IEC 23008-12:2017 § 6.5.3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSpatialExtentsProperty {
    pub header: FullBoxHeader,
    pub image_width: u32,
    pub image_height: u32,
}

/// See ISO/IEC 23008-12:2017 § 6.5.6
#[derive(Debug, Default, PartialEq)]
pub struct PixelInformationProperty {
    pub header: FullBoxHeader,
    pub bits_per_channel: TryVec<u8>,
}

/// See ISO/IEC 23008-12:2017 § 6.5.7
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelativeLocationProperty {
    pub header: FullBoxHeader,
    pub horizontal_offset: u32,
    pub vertical_offset: u32,
}

/// See ISO/IEC 23008-12:2017 § 6.5.8
#[derive(Debug, Default, PartialEq)]
pub struct AuxiliaryTypeProperty {
    pub header: FullBoxHeader,
    /// URN of the auxiliary type, without the NUL terminator.
    pub aux_type: TryString,
    /// Everything after the terminator.
    pub aux_subtype: TryVec<u8>,
}

/// See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanApertureBox {
    pub width_n: i32,
    pub width_d: u32,
    pub height_n: i32,
    pub height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

/// Counter-clockwise, in multiples of 90°.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Rot0 = 0,
    Rot90 = 1,
    Rot180 = 2,
    Rot270 = 3,
}

impl From<u8> for Rotation {
    fn from(angle: u8) -> Self {
        match angle & 3 {
            0 => Self::Rot0,
            1 => Self::Rot90,
            2 => Self::Rot180,
            _ => Self::Rot270,
        }
    }
}

/// See ISO/IEC 23008-12:2017 § 6.5.10
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageRotationBox {
    pub angle: Rotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MirrorAxis {
    #[default]
    Vertical = 0,
    Horizontal = 1,
}

impl From<u8> for MirrorAxis {
    fn from(axis: u8) -> Self {
        match axis & 1 {
            0 => Self::Vertical,
            _ => Self::Horizontal,
        }
    }
}

/// See ISO/IEC 23008-12:2017 § 6.5.12
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageMirrorBox {
    pub axis: MirrorAxis,
}

/// See ISO 14496-12:2015 § 12.1.5
#[derive(Debug, PartialEq)]
pub struct ColourInformationBox {
    pub profile: ColourProfile,
}

#[derive(Debug, PartialEq)]
pub enum ColourProfile {
    /// `nclx`: coded as ISO/IEC 23091-4 code points.
    Nclx(NclxColour),
    /// `rICC`: restricted ICC profile.
    RestrictedIcc(TryVec<u8>),
    /// `prof`: unrestricted ICC profile.
    UnrestrictedIcc(TryVec<u8>),
}

impl ColourProfile {
    #[must_use]
    pub fn colour_type(&self) -> FourCC {
        match self {
            Self::Nclx(_) => FourCC::NCLX,
            Self::RestrictedIcc(_) => FourCC::RICC,
            Self::UnrestrictedIcc(_) => FourCC::PROF,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NclxColour {
    pub colour_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

/// See ISO/IEC 23000-22 § 7.4.4.2.2
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentLightLevelBox {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

/// See ISO/IEC 23000-22 § 7.4.4.2.3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MasteringDisplayColourVolumeBox {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

#[derive(Debug, Default, PartialEq)]
pub struct AV1CodecConfigurationBox {
    pub config: AV1CodecConfigurationRecord,
}

/// See <https://aomediacodec.github.io/av1-isobmff/#av1codecconfigurationbox-section>
#[derive(Debug, Default, PartialEq)]
pub struct AV1CodecConfigurationRecord {
    pub marker: bool,
    /// 7 bits, always 1 in practice.
    pub version: u8,
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    /// `None` unless `initial_presentation_delay_present` is set.
    pub initial_presentation_delay_minus_one: Option<u8>,
    /// Raw configuration OBUs following the fixed 4-byte header.
    pub config_obus: TryVec<u8>,
}

/// One `ipma` box.
#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyAssociation {
    /// `version < 1` means 16-bit item IDs, `flags & 1` means 16-bit entries.
    pub header: FullBoxHeader,
    pub items: TryVec<AssociatedItem>,
}

#[derive(Debug, Default, PartialEq)]
pub struct AssociatedItem {
    pub item_id: u32,
    pub entries: TryVec<PropertyAssociation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyAssociation {
    pub essential: bool,
    /// 1-based, 0 means no property.
    pub property_index: u16,
}

/// Width of an `iloc` offset/length/index field, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IlocFieldSize {
    #[default]
    Zero,
    Four,
    Eight,
}

impl IlocFieldSize {
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    pub(crate) fn parse(field: &'static str, size: u8) -> Result<Self, Error> {
        match size {
            0 => Ok(Self::Zero),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(Error::InvalidFieldSize { field, size }),
        }
    }
}

/// See ISO 14496-12:2015 § 8.11.3
#[derive(Debug, Default, PartialEq)]
pub struct ItemLocationBox {
    pub header: FullBoxHeader,
    pub offset_size: IlocFieldSize,
    pub length_size: IlocFieldSize,
    pub base_offset_size: IlocFieldSize,
    /// Always `Zero` for version 0, which has no index field.
    pub index_size: IlocFieldSize,
    pub items: TryVec<ItemLocation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConstructionMethod {
    #[default]
    File = 0,
    Idat = 1,
    Item = 2,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemLocation {
    pub item_id: u32,
    /// Version 0 boxes don't store this; it reads back as `File`.
    pub construction_method: ConstructionMethod,
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: TryVec<ItemLocationExtent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemLocationExtent {
    pub extent_index: u64,
    pub extent_offset: u64,
    /// 0 means "to the end of the source".
    pub extent_length: u64,
}

/// See ISO 14496-12:2015 § 8.11.6
#[derive(Debug, Default, PartialEq)]
pub struct ItemInfoBox {
    pub header: FullBoxHeader,
    pub entries: TryVec<ItemInfoEntry>,
}

impl ItemInfoBox {
    #[must_use]
    pub fn find(&self, item_id: u32) -> Option<&ItemInfoEntry> {
        self.entries.iter().find(|e| e.item_id == item_id)
    }
}

/// See ISO 14496-12:2015 § 8.11.6.2
///
/// Versions 0 and 1 carry `content_type`/`content_encoding` and, for
/// version 1, an optional extension. Versions 2 and 3 carry an
/// `item_type`, with `mime` and `uri ` items adding their own strings.
#[derive(Debug, Default, PartialEq)]
pub struct ItemInfoEntry {
    pub header: FullBoxHeader,
    pub item_id: u32,
    pub item_protection_index: u16,
    pub item_type: Option<FourCC>,
    pub item_name: TryString,
    pub content_type: Option<TryString>,
    pub content_encoding: Option<TryString>,
    pub item_uri_type: Option<TryString>,
    pub extension: Option<ItemInfoExtension>,
}

#[derive(Debug, PartialEq)]
pub enum ItemInfoExtension {
    /// `fdel`
    FileDelivery(FDItemInfoExtension),
}

/// See ISO 14496-12:2015 § 8.11.6.2
#[derive(Debug, Default, PartialEq)]
pub struct FDItemInfoExtension {
    pub content_location: TryString,
    pub content_md5: TryString,
    pub content_length: u64,
    pub transfer_length: u64,
    pub group_ids: TryVec<u32>,
}

/// See ISO 14496-12:2015 § 8.11.4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimaryItemBox {
    pub header: FullBoxHeader,
    pub item_id: u32,
}

/// See ISO 14496-12:2015 § 8.11.12
#[derive(Debug, PartialEq)]
pub struct ItemReferenceBox {
    pub header: FullBoxHeader,
    pub references: ItemReferences,
}

/// Version 0 `iref` boxes use 16-bit item IDs, later versions 32-bit ones.
#[derive(Debug, PartialEq)]
pub enum ItemReferences {
    Small(TryVec<SingleItemTypeReferenceBox>),
    Large(TryVec<SingleItemTypeReferenceBoxLarge>),
}

#[derive(Debug, Default, PartialEq)]
pub struct SingleItemTypeReferenceBox {
    /// e.g. `auxl`, `dimg`, `thmb`
    pub reference_type: FourCC,
    pub from_item_id: u16,
    pub to_item_ids: TryVec<u16>,
}

#[derive(Debug, Default, PartialEq)]
pub struct SingleItemTypeReferenceBoxLarge {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: TryVec<u32>,
}

/// A single from→to link, independent of the ID width it was stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemReference {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_id: u32,
}

impl ItemReferences {
    /// Flattens every reference box into individual links, in file order.
    pub fn iter(&self) -> impl Iterator<Item = ItemReference> + '_ {
        let (small, large) = match self {
            Self::Small(refs) => (Some(refs), None),
            Self::Large(refs) => (None, Some(refs)),
        };
        let small = small.into_iter().flat_map(|refs| refs.iter()).flat_map(|r| {
            r.to_item_ids.iter().map(move |&to| ItemReference {
                reference_type: r.reference_type,
                from_item_id: r.from_item_id.into(),
                to_item_id: to.into(),
            })
        });
        let large = large.into_iter().flat_map(|refs| refs.iter()).flat_map(|r| {
            r.to_item_ids.iter().map(move |&to| ItemReference {
                reference_type: r.reference_type,
                from_item_id: r.from_item_id,
                to_item_id: to,
            })
        });
        small.chain(large)
    }
}

/// Contents of an `mdat` box.
#[derive(Debug, Default, PartialEq)]
pub struct MediaDataBox {
    /// Absolute file offset of the first payload byte.
    pub offset: u64,
    pub data: TryVec<u8>,
}

impl MediaDataBox {
    /// Whether `[start, end)` in file coordinates lies inside this box.
    #[must_use]
    pub fn contains(&self, start: u64, end: u64) -> bool {
        let len = self.data.len() as u64;
        start >= self.offset && end >= start && end <= self.offset.saturating_add(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_index_zero_is_none() {
        let mut ipco = ItemPropertyContainer::default();
        ipco.properties
            .push(Property::ImageRotation(ImageRotationBox { angle: Rotation::Rot90 }))
            .unwrap();
        assert!(ipco.get(0).is_none());
        assert_eq!(ipco.get(1).map(Property::box_type), Some(FourCC::from(*b"irot")));
        assert!(ipco.get(2).is_none());
    }

    #[test]
    fn references_flatten_across_widths() {
        let mut refs = TryVec::new();
        let mut to = TryVec::new();
        to.push(1u16).unwrap();
        to.push(3u16).unwrap();
        refs.push(SingleItemTypeReferenceBox {
            reference_type: FourCC::AUXL,
            from_item_id: 2,
            to_item_ids: to,
        })
        .unwrap();
        let links: std::vec::Vec<_> = ItemReferences::Small(refs).iter().collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[1], ItemReference { reference_type: FourCC::AUXL, from_item_id: 2, to_item_id: 3 });
    }
}
