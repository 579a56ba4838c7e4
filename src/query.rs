// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only lookups over a parsed [`FileBox`].

use std::borrow::Cow;
use std::ops::Range;

use crate::boxes::FourCC;
use crate::container::*;
use crate::{AV1Metadata, Error, Result, ToU64, TryVec};

/// A property payload type that can be picked out of [`Property`].
pub trait ItemProperty {
    fn from_property(property: &Property) -> Option<&Self>;
}

macro_rules! impl_item_property {
    ($($variant:ident => $ty:ty,)+) => {
        $(
            impl ItemProperty for $ty {
                fn from_property(property: &Property) -> Option<&Self> {
                    match property {
                        Property::$variant(p) => Some(p),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_item_property! {
    PixelAspectRatio => PixelAspectRatioBox,
    ImageSpatialExtents => ImageSpatialExtentsProperty,
    PixelInformation => PixelInformationProperty,
    RelativeLocation => RelativeLocationProperty,
    AuxiliaryType => AuxiliaryTypeProperty,
    CleanAperture => CleanApertureBox,
    ImageRotation => ImageRotationBox,
    ImageMirror => ImageMirrorBox,
    ColourInformation => ColourInformationBox,
    ContentLightLevel => ContentLightLevelBox,
    MasteringDisplayColourVolume => MasteringDisplayColourVolumeBox,
    AV1CodecConfiguration => AV1CodecConfigurationBox,
}

/// Properties associated with `item_id` (or with any item, for `None`), in
/// association order. Index 0 and indices past the end of `ipco` are skipped.
pub fn associated_properties(file: &FileBox, item_id: Option<u32>) -> impl Iterator<Item = &Property> + '_ {
    file.meta.iter().flat_map(move |meta| {
        let iprp = &meta.item_properties;
        iprp.associations
            .iter()
            .flat_map(|ipma| ipma.items.iter())
            .filter(move |item| item_id.is_none_or(|id| item.item_id == id))
            .flat_map(|item| item.entries.iter())
            .filter_map(move |entry| iprp.properties.get(entry.property_index))
    })
}

/// The first property of type `T` associated with `item_id`, or with any
/// item for `None`.
///
/// ```
/// # fn f(file: &zenavif_boxes::FileBox) {
/// use zenavif_boxes::ImageSpatialExtentsProperty;
/// use zenavif_boxes::query::find_property;
///
/// if let Some(ispe) = find_property::<ImageSpatialExtentsProperty>(file, Some(1)) {
///     println!("{}x{}", ispe.image_width, ispe.image_height);
/// }
/// # }
/// ```
pub fn find_property<T: ItemProperty>(file: &FileBox, item_id: Option<u32>) -> Option<&T> {
    associated_properties(file, item_id).find_map(T::from_property)
}

/// The `iloc` entry for `item_id`, or the first entry for `None`.
pub fn find_item_location(file: &FileBox, item_id: Option<u32>) -> Option<&ItemLocation> {
    let items = &file.meta.as_ref()?.item_location.items;
    match item_id {
        Some(id) => items.iter().find(|item| item.item_id == id),
        None => items.first(),
    }
}

/// Byte range of one extent of an item, relative to its construction
/// method's source. `item_id` defaults to the first `iloc` entry and
/// `extent`, a 0-based index, to the first extent.
///
/// A zero-length extent yields an empty range; [`item_data`] resolves those
/// to the end of their source.
pub fn find_item_region(file: &FileBox, item_id: Option<u32>, extent: Option<usize>) -> Result<Range<u64>> {
    let item = find_item_location(file, item_id).ok_or(Error::InvalidData("item has no iloc entry"))?;
    let extent = item
        .extents
        .get(extent.unwrap_or(0))
        .ok_or(Error::InvalidData("no such extent"))?;
    let start = item
        .base_offset
        .checked_add(extent.extent_offset)
        .ok_or(Error::InvalidData("offset calculation overflow"))?;
    let end = start
        .checked_add(extent.extent_length)
        .ok_or(Error::InvalidData("end calculation overflow"))?;
    Ok(start..end)
}

#[must_use]
pub fn find_primary_item_id(file: &FileBox) -> Option<u32> {
    file.meta.as_ref()?.primary_item.as_ref().map(|pitm| pitm.item_id)
}

/// The item that is an auxiliary image (`auxl` reference) of `item_id` and
/// carries an `auxC` property with the given type, such as
/// `b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha"`.
pub fn find_aux_item_id(file: &FileBox, item_id: u32, aux_type: &[u8]) -> Option<u32> {
    let iref = file.meta.as_ref()?.item_reference.as_ref()?;
    iref.references
        .iter()
        .filter(|r| r.reference_type == FourCC::AUXL && r.to_item_id == item_id)
        .map(|r| r.from_item_id)
        .find(|&from| {
            associated_properties(file, Some(from))
                .any(|p| matches!(p, Property::AuxiliaryType(auxc) if auxc.aux_type[..] == *aux_type))
        })
}

/// The payload of `item_id`, borrowed when it is a single extent.
///
/// `data` is the complete file the tree was parsed from; construction
/// method 0 offsets point into it.
pub fn item_data<'a>(file: &'a FileBox, data: &'a [u8], item_id: u32) -> Result<Cow<'a, [u8]>> {
    let item = find_item_location(file, Some(item_id)).ok_or(Error::InvalidData("item has no iloc entry"))?;
    if item.data_reference_index != 0 {
        return Err(Error::Unsupported("external data references are not supported"));
    }
    let source: &'a [u8] = match item.construction_method {
        ConstructionMethod::File => data,
        ConstructionMethod::Idat => file
            .meta
            .as_ref()
            .and_then(|meta| meta.item_data.as_deref())
            .ok_or(Error::InvalidData("idat box missing but construction_method is Idat"))?,
        ConstructionMethod::Item => return Err(Error::Unsupported("construction_method 'item' not supported")),
    };

    let extent_slice = |extent: &ItemLocationExtent| -> Result<&'a [u8]> {
        let start = item
            .base_offset
            .checked_add(extent.extent_offset)
            .ok_or(Error::InvalidData("offset calculation overflow"))?;
        let end = if extent.extent_length == 0 {
            to_end(file, item.construction_method, start, source.len().to_u64())
        } else {
            start
                .checked_add(extent.extent_length)
                .ok_or(Error::InvalidData("end calculation overflow"))?
        };
        source
            .get(usize::try_from(start)?..usize::try_from(end)?)
            .ok_or(Error::InvalidData("extent out of bounds"))
    };

    if let [extent] = &item.extents[..] {
        return Ok(Cow::Borrowed(extent_slice(extent)?));
    }

    let mut slices = TryVec::with_capacity(item.extents.len())?;
    for extent in item.extents.iter() {
        slices.push(extent_slice(extent)?)?;
    }
    let total = slices
        .iter()
        .try_fold(0usize, |total, s| total.checked_add(s.len()))
        .ok_or(Error::InvalidData("item size overflow"))?;
    let mut out = std::vec::Vec::new();
    out.try_reserve_exact(total).map_err(|_| Error::OutOfMemory)?;
    for s in slices.iter() {
        out.extend_from_slice(s);
    }
    Ok(Cow::Owned(out))
}

/// End of a zero-length ("rest of the source") extent: the end of the
/// `mdat` holding it, or the end of the source.
fn to_end(file: &FileBox, method: ConstructionMethod, start: u64, source_len: u64) -> u64 {
    if method == ConstructionMethod::File {
        if let Some(mdat) = file.media_data.iter().find(|mdat| mdat.contains(start, start)) {
            return mdat.offset.saturating_add(mdat.data.len().to_u64());
        }
    }
    source_len
}

/// Decodes the sequence header at the start of the primary item's payload.
pub fn primary_item_metadata(file: &FileBox, data: &[u8]) -> Result<AV1Metadata> {
    let id = find_primary_item_id(file).ok_or(Error::InvalidData("no primary item"))?;
    AV1Metadata::parse_av1_bitstream(&item_data(file, data, id)?)
}
