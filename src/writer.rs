// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::convert::TryFrom;
use std::io::Write;
use std::ops::{Deref, DerefMut};

use byteorder::{BigEndian, ByteOrder};
use log::trace;

use crate::boxes::{BoxType, FourCC};
use crate::container::*;
use crate::{Error, Result, ToU64, TryVec};

/// Append-only output buffer with nested box scopes.
struct BoxWriter {
    buf: TryVec<u8>,
    oversized: bool,
}

/// An open box. The size field is a placeholder until the scope is dropped,
/// at which point it is patched with everything written in between.
struct BoxScope<'w> {
    w: &'w mut BoxWriter,
    start: usize,
}

impl Deref for BoxScope<'_> {
    type Target = BoxWriter;

    fn deref(&self) -> &BoxWriter {
        self.w
    }
}

impl DerefMut for BoxScope<'_> {
    fn deref_mut(&mut self) -> &mut BoxWriter {
        self.w
    }
}

impl Drop for BoxScope<'_> {
    fn drop(&mut self) {
        self.w.patch_size(self.start);
    }
}

impl BoxWriter {
    fn new() -> Self {
        Self {
            buf: TryVec::new(),
            oversized: false,
        }
    }

    fn finish(self) -> Result<TryVec<u8>> {
        if self.oversized {
            return Err(Error::Unsupported("box does not fit a 32-bit size field"));
        }
        Ok(self.buf)
    }

    fn begin(&mut self, name: impl Into<FourCC>) -> Result<BoxScope<'_>> {
        let start = self.buf.len();
        self.write_u32(0)?;
        self.write_fourcc(name.into())?;
        Ok(BoxScope { w: self, start })
    }

    fn begin_full(&mut self, name: impl Into<FourCC>, header: FullBoxHeader) -> Result<BoxScope<'_>> {
        let mut scope = self.begin(name)?;
        write_fullbox_header(&mut scope, header)?;
        Ok(scope)
    }

    fn patch_size(&mut self, start: usize) {
        let size = self.buf.len() - start;
        match u32::try_from(size) {
            Ok(size) => BigEndian::write_u32(&mut self.buf[start..start + 4], size),
            Err(_) => self.oversized = true,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes)?;
        Ok(())
    }

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    fn write_u16(&mut self, v: u16) -> Result<()> {
        let mut b = [0; 2];
        BigEndian::write_u16(&mut b, v);
        self.write_bytes(&b)
    }

    fn write_u32(&mut self, v: u32) -> Result<()> {
        let mut b = [0; 4];
        BigEndian::write_u32(&mut b, v);
        self.write_bytes(&b)
    }

    fn write_u64(&mut self, v: u64) -> Result<()> {
        let mut b = [0; 8];
        BigEndian::write_u64(&mut b, v);
        self.write_bytes(&b)
    }

    fn write_fourcc(&mut self, v: FourCC) -> Result<()> {
        self.write_bytes(&v.value)
    }

    fn write_string(&mut self, s: &[u8]) -> Result<()> {
        self.write_bytes(s)?;
        self.write_u8(0)
    }

    /// Writes `v` in an `iloc` field of the given width.
    fn write_uint(&mut self, size: IlocFieldSize, v: u64) -> Result<()> {
        match size {
            IlocFieldSize::Zero if v == 0 => Ok(()),
            IlocFieldSize::Zero => Err(Error::InvalidData("non-zero value in a zero-width iloc field")),
            IlocFieldSize::Four => self.write_u32(u32::try_from(v)?),
            IlocFieldSize::Eight => self.write_u64(v),
        }
    }

    /// 16-bit item ids for box versions that only have room for them.
    fn write_item_id(&mut self, wide: bool, id: u32) -> Result<()> {
        if wide {
            self.write_u32(id)
        } else {
            self.write_u16(u16::try_from(id)?)
        }
    }
}

/// Where an item's data lands once the `mdat` boxes are laid out again.
#[derive(Debug, PartialEq)]
struct Placement {
    base_offset: u64,
    extent_offsets: TryVec<u64>,
}

/// Serialises `file` into a new buffer.
///
/// Boxes are written in a fixed order: `ftyp`, then `meta` with `hdlr`,
/// `iprp`, `iinf`, `iloc`, `pitm`, `iref` and `idat`, then every `mdat`.
/// Top-level boxes other than these are not kept. A tree parsed from a file
/// laid out in that order writes back byte-for-byte.
///
/// `iloc` extents that point into the file are moved along with the `mdat`
/// holding them, so every item keeps its payload. Extents that point
/// anywhere else in the file cannot be followed and are an error.
pub fn write(file: &FileBox) -> Result<TryVec<u8>> {
    let mut w = BoxWriter::new();
    write_ftyp(&mut w, &file.file_type)?;
    if let Some(meta) = &file.meta {
        // the size of meta does not depend on the offsets it carries
        let mdat_start = w.buf.len().to_u64() + measure_meta(meta)?;
        let placements = place_items(&meta.item_location, &file.media_data, mdat_start)?;
        write_meta(&mut w, meta, Some(&placements[..]))?;
    }
    for mdat in file.media_data.iter() {
        let mut b = w.begin(BoxType::MediaDataBox)?;
        b.write_bytes(&mdat.data)?;
    }
    let out = w.finish()?;
    trace!("wrote {} bytes", out.len());
    Ok(out)
}

/// Serialises `file` into `out`.
pub fn write_to<W: Write>(file: &FileBox, out: &mut W) -> Result<()> {
    let buf = write(file)?;
    out.write_all(&buf)?;
    Ok(())
}

fn write_ftyp(w: &mut BoxWriter, ftyp: &FileTypeBox) -> Result<()> {
    let mut b = w.begin(BoxType::FileTypeBox)?;
    b.write_fourcc(ftyp.major_brand)?;
    b.write_u32(ftyp.minor_version)?;
    for &brand in ftyp.compatible_brands.iter() {
        b.write_fourcc(brand)?;
    }
    Ok(())
}

fn measure_meta(meta: &MetaBox) -> Result<u64> {
    let mut w = BoxWriter::new();
    write_meta(&mut w, meta, None)?;
    Ok(w.finish()?.len().to_u64())
}

/// Offsets for every `iloc` item once the `mdat` boxes are written one after
/// another from `mdat_start`.
fn place_items(iloc: &ItemLocationBox, media_data: &[MediaDataBox], mdat_start: u64) -> Result<TryVec<Placement>> {
    let mut payload_offsets = TryVec::with_capacity(media_data.len())?;
    let mut pos = mdat_start;
    for mdat in media_data.iter() {
        let payload = pos.checked_add(8).ok_or(Error::InvalidData("mdat offset overflow"))?;
        payload_offsets.push(payload)?;
        pos = payload
            .checked_add(mdat.data.len().to_u64())
            .ok_or(Error::InvalidData("mdat offset overflow"))?;
    }

    let mut placements = TryVec::with_capacity(iloc.items.len())?;
    for item in iloc.items.iter() {
        placements.push(place_item(iloc, item, media_data, &payload_offsets)?)?;
    }
    Ok(placements)
}

fn place_item(iloc: &ItemLocationBox, item: &ItemLocation, media_data: &[MediaDataBox], payload_offsets: &[u64]) -> Result<Placement> {
    let movable = item.construction_method == ConstructionMethod::File && item.data_reference_index == 0;
    let mut shifts = TryVec::with_capacity(item.extents.len())?;
    for extent in item.extents.iter() {
        if !movable {
            shifts.push(0i64)?;
            continue;
        }
        let start = item
            .base_offset
            .checked_add(extent.extent_offset)
            .ok_or(Error::InvalidData("offset calculation overflow"))?;
        let end = start
            .checked_add(extent.extent_length)
            .ok_or(Error::InvalidData("end calculation overflow"))?;
        let i = media_data
            .iter()
            .position(|mdat| mdat.contains(start, end))
            .ok_or(Error::Unsupported("item data outside of any mdat cannot be relocated"))?;
        shifts.push(i64::try_from(i128::from(payload_offsets[i]) - i128::from(media_data[i].offset))?)?;
    }

    if shifts.iter().any(|&s| s != 0) {
        trace!("item {} moves with its mdat", item.item_id);
    }

    // extent offsets take the shift when they can, base_offset otherwise
    if iloc.offset_size != IlocFieldSize::Zero || shifts.iter().all(|&s| s == 0) {
        let mut extent_offsets = TryVec::with_capacity(item.extents.len())?;
        for (extent, &shift) in item.extents.iter().zip(shifts.iter()) {
            match extent.extent_offset.checked_add_signed(shift) {
                Some(offset) => extent_offsets.push(offset)?,
                None => break,
            }
        }
        if extent_offsets.len() == item.extents.len() {
            return Ok(Placement {
                base_offset: item.base_offset,
                extent_offsets,
            });
        }
    }

    let shared = shifts.first().copied().filter(|&first| shifts.iter().all(|&s| s == first));
    match (shared, iloc.base_offset_size) {
        (Some(shift), IlocFieldSize::Four | IlocFieldSize::Eight) => {
            let mut extent_offsets = TryVec::with_capacity(item.extents.len())?;
            for extent in item.extents.iter() {
                extent_offsets.push(extent.extent_offset)?;
            }
            Ok(Placement {
                base_offset: shifted(item.base_offset, shift)?,
                extent_offsets,
            })
        },
        _ => Err(Error::Unsupported("item offsets cannot be moved with their mdat")),
    }
}

fn shifted(offset: u64, shift: i64) -> Result<u64> {
    offset
        .checked_add_signed(shift)
        .ok_or(Error::InvalidData("relocated offset out of range"))
}

/// `placements` replaces the `iloc` offsets; `None` writes them as they are.
fn write_meta(w: &mut BoxWriter, meta: &MetaBox, placements: Option<&[Placement]>) -> Result<()> {
    let mut b = w.begin_full(BoxType::MetadataBox, meta.header)?;
    write_hdlr(&mut b, &meta.handler)?;
    write_iprp(&mut b, &meta.item_properties)?;
    write_iinf(&mut b, &meta.item_info)?;
    write_iloc(&mut b, &meta.item_location, placements)?;
    if let Some(pitm) = &meta.primary_item {
        let mut p = b.begin_full(BoxType::PrimaryItemBox, pitm.header)?;
        p.write_item_id(pitm.header.version > 0, pitm.item_id)?;
    }
    if let Some(iref) = &meta.item_reference {
        write_iref(&mut b, iref)?;
    }
    if let Some(idat) = &meta.item_data {
        let mut d = b.begin(BoxType::ItemDataBox)?;
        d.write_bytes(idat)?;
    }
    Ok(())
}

fn write_hdlr(w: &mut BoxWriter, hdlr: &HandlerBox) -> Result<()> {
    let mut b = w.begin_full(BoxType::HandlerBox, hdlr.header)?;
    // pre_defined
    b.write_u32(0)?;
    b.write_fourcc(hdlr.handler_type)?;
    // reserved
    b.write_bytes(&[0; 12])?;
    b.write_string(&hdlr.name)
}

fn write_iprp(w: &mut BoxWriter, iprp: &ItemPropertiesBox) -> Result<()> {
    let mut b = w.begin(BoxType::ItemPropertiesBox)?;
    {
        let mut ipco = b.begin(BoxType::ItemPropertyContainerBox)?;
        for property in iprp.properties.properties.iter() {
            write_property(&mut ipco, property)?;
        }
    }
    for ipma in iprp.associations.iter() {
        write_ipma(&mut b, ipma)?;
    }
    Ok(())
}

fn write_ipma(w: &mut BoxWriter, ipma: &ItemPropertyAssociation) -> Result<()> {
    let mut b = w.begin_full(BoxType::ItemPropertyAssociationBox, ipma.header)?;
    let wide_entries = ipma.header.flags & 1 == 1;
    b.write_u32(u32::try_from(ipma.items.len())?)?;
    for item in ipma.items.iter() {
        b.write_item_id(ipma.header.version >= 1, item.item_id)?;
        b.write_u8(u8::try_from(item.entries.len())?)?;
        for entry in item.entries.iter() {
            if wide_entries {
                if entry.property_index > 0x7fff {
                    return Err(Error::InvalidData("property index does not fit 15 bits"));
                }
                b.write_u16(u16::from(entry.essential) << 15 | entry.property_index)?;
            } else {
                let index = u8::try_from(entry.property_index)
                    .ok()
                    .filter(|&i| i <= 0x7f)
                    .ok_or(Error::InvalidData("property index does not fit 7 bits; set flags bit 0"))?;
                b.write_u8(u8::from(entry.essential) << 7 | index)?;
            }
        }
    }
    Ok(())
}

fn write_property(w: &mut BoxWriter, property: &Property) -> Result<()> {
    let mut b = w.begin(property.box_type())?;
    match property {
        Property::PixelAspectRatio(pasp) => {
            b.write_u32(pasp.h_spacing)?;
            b.write_u32(pasp.v_spacing)?;
        },
        Property::ImageSpatialExtents(ispe) => {
            write_fullbox_header(&mut b, ispe.header)?;
            b.write_u32(ispe.image_width)?;
            b.write_u32(ispe.image_height)?;
        },
        Property::PixelInformation(pixi) => {
            write_fullbox_header(&mut b, pixi.header)?;
            b.write_u8(u8::try_from(pixi.bits_per_channel.len())?)?;
            b.write_bytes(&pixi.bits_per_channel)?;
        },
        Property::RelativeLocation(rloc) => {
            write_fullbox_header(&mut b, rloc.header)?;
            b.write_u32(rloc.horizontal_offset)?;
            b.write_u32(rloc.vertical_offset)?;
        },
        Property::AuxiliaryType(auxc) => {
            write_fullbox_header(&mut b, auxc.header)?;
            b.write_string(&auxc.aux_type)?;
            b.write_bytes(&auxc.aux_subtype)?;
        },
        Property::CleanAperture(clap) => {
            for (n, d) in [
                (clap.width_n, clap.width_d),
                (clap.height_n, clap.height_d),
                (clap.horiz_off_n, clap.horiz_off_d),
                (clap.vert_off_n, clap.vert_off_d),
            ] {
                b.write_u32(n as u32)?;
                b.write_u32(d)?;
            }
        },
        Property::ImageRotation(irot) => b.write_u8(irot.angle as u8)?,
        Property::ImageMirror(imir) => b.write_u8(imir.axis as u8)?,
        Property::ColourInformation(colr) => {
            b.write_fourcc(colr.profile.colour_type())?;
            match &colr.profile {
                ColourProfile::Nclx(nclx) => {
                    b.write_u16(nclx.colour_primaries)?;
                    b.write_u16(nclx.transfer_characteristics)?;
                    b.write_u16(nclx.matrix_coefficients)?;
                    b.write_u8(u8::from(nclx.full_range) << 7)?;
                },
                ColourProfile::RestrictedIcc(icc) | ColourProfile::UnrestrictedIcc(icc) => b.write_bytes(icc)?,
            }
        },
        Property::ContentLightLevel(clli) => {
            b.write_u16(clli.max_content_light_level)?;
            b.write_u16(clli.max_pic_average_light_level)?;
        },
        Property::MasteringDisplayColourVolume(mdcv) => {
            for i in 0..3 {
                b.write_u16(mdcv.display_primaries_x[i])?;
                b.write_u16(mdcv.display_primaries_y[i])?;
            }
            b.write_u16(mdcv.white_point_x)?;
            b.write_u16(mdcv.white_point_y)?;
            b.write_u32(mdcv.max_display_mastering_luminance)?;
            b.write_u32(mdcv.min_display_mastering_luminance)?;
        },
        Property::AV1CodecConfiguration(av1c) => write_av1c(&mut b, &av1c.config)?,
        Property::Unknown(opaque) => b.write_bytes(&opaque.payload)?,
    }
    Ok(())
}

fn write_fullbox_header(w: &mut BoxWriter, header: FullBoxHeader) -> Result<()> {
    w.write_u32(u32::from(header.version) << 24 | (header.flags & 0x00ff_ffff))
}

fn write_av1c(w: &mut BoxWriter, c: &AV1CodecConfigurationRecord) -> Result<()> {
    let bit = |b: bool, shift: u8| u8::from(b) << shift;
    w.write_u8(bit(c.marker, 7) | (c.version & 0x7f))?;
    w.write_u8((c.seq_profile & 0x07) << 5 | (c.seq_level_idx_0 & 0x1f))?;
    w.write_u8(
        (c.seq_tier_0 & 1) << 7
            | bit(c.high_bitdepth, 6)
            | bit(c.twelve_bit, 5)
            | bit(c.monochrome, 4)
            | bit(c.chroma_subsampling_x, 3)
            | bit(c.chroma_subsampling_y, 2)
            | (c.chroma_sample_position & 0x03),
    )?;
    w.write_u8(match c.initial_presentation_delay_minus_one {
        Some(delay) => 0x10 | (delay & 0x0f),
        None => 0,
    })?;
    w.write_bytes(&c.config_obus)
}

fn write_iinf(w: &mut BoxWriter, iinf: &ItemInfoBox) -> Result<()> {
    let mut b = w.begin_full(BoxType::ItemInfoBox, iinf.header)?;
    if iinf.header.version == 0 {
        b.write_u16(u16::try_from(iinf.entries.len())?)?;
    } else {
        b.write_u32(u32::try_from(iinf.entries.len())?)?;
    }
    for entry in iinf.entries.iter() {
        write_infe(&mut b, entry)?;
    }
    Ok(())
}

fn write_infe(w: &mut BoxWriter, infe: &ItemInfoEntry) -> Result<()> {
    let mut b = w.begin_full(BoxType::ItemInfoEntry, infe.header)?;
    match infe.header.version {
        0 | 1 => {
            b.write_item_id(false, infe.item_id)?;
            b.write_u16(infe.item_protection_index)?;
            b.write_string(&infe.item_name)?;
            b.write_string(infe.content_type.as_deref().unwrap_or_default())?;
            match (&infe.content_encoding, &infe.extension) {
                (Some(encoding), _) => b.write_string(encoding)?,
                // the extension can only be found after an encoding string
                (None, Some(_)) if infe.header.version == 1 => b.write_string(b"")?,
                (None, _) => {},
            }
            if infe.header.version == 1 {
                if let Some(ItemInfoExtension::FileDelivery(fdel)) = &infe.extension {
                    b.write_fourcc(FourCC::FDEL)?;
                    b.write_string(&fdel.content_location)?;
                    b.write_string(&fdel.content_md5)?;
                    b.write_u64(fdel.content_length)?;
                    b.write_u64(fdel.transfer_length)?;
                    b.write_u8(u8::try_from(fdel.group_ids.len())?)?;
                    for &id in fdel.group_ids.iter() {
                        b.write_u32(id)?;
                    }
                }
            }
        },
        2 | 3 => {
            b.write_item_id(infe.header.version == 3, infe.item_id)?;
            b.write_u16(infe.item_protection_index)?;
            let item_type = infe.item_type.ok_or(Error::InvalidData("infe version 2 and up needs an item_type"))?;
            b.write_fourcc(item_type)?;
            b.write_string(&infe.item_name)?;
            if item_type == FourCC::MIME {
                b.write_string(infe.content_type.as_deref().unwrap_or_default())?;
                if let Some(encoding) = &infe.content_encoding {
                    b.write_string(encoding)?;
                }
            } else if item_type == FourCC::URI {
                b.write_string(infe.item_uri_type.as_deref().unwrap_or_default())?;
            }
        },
        version => {
            return Err(Error::UnsupportedVersion {
                box_type: BoxType::ItemInfoEntry.into(),
                version,
            });
        },
    }
    Ok(())
}

fn write_iloc(w: &mut BoxWriter, iloc: &ItemLocationBox, placements: Option<&[Placement]>) -> Result<()> {
    let version = iloc.header.version;
    if version > 2 {
        return Err(Error::UnsupportedVersion {
            box_type: BoxType::ItemLocationBox.into(),
            version,
        });
    }
    let mut b = w.begin_full(BoxType::ItemLocationBox, iloc.header)?;
    b.write_u8(iloc.offset_size.bytes() << 4 | iloc.length_size.bytes())?;
    let index_size = if version == 0 { IlocFieldSize::Zero } else { iloc.index_size };
    b.write_u8(iloc.base_offset_size.bytes() << 4 | index_size.bytes())?;
    if version < 2 {
        b.write_u16(u16::try_from(iloc.items.len())?)?;
    } else {
        b.write_u32(u32::try_from(iloc.items.len())?)?;
    }

    for (i, item) in iloc.items.iter().enumerate() {
        let placement = placements.and_then(|p| p.get(i));
        b.write_item_id(version == 2, item.item_id)?;
        if version >= 1 {
            b.write_u16(item.construction_method as u16)?;
        } else if item.construction_method != ConstructionMethod::File {
            return Err(Error::InvalidData("iloc version 0 can only point into the file"));
        }
        b.write_u16(item.data_reference_index)?;
        b.write_uint(iloc.base_offset_size, placement.map_or(item.base_offset, |p| p.base_offset))?;
        b.write_u16(u16::try_from(item.extents.len())?)?;
        for (j, extent) in item.extents.iter().enumerate() {
            let extent_offset = placement
                .and_then(|p| p.extent_offsets.get(j).copied())
                .unwrap_or(extent.extent_offset);
            b.write_uint(index_size, extent.extent_index)?;
            b.write_uint(iloc.offset_size, extent_offset)?;
            b.write_uint(iloc.length_size, extent.extent_length)?;
        }
    }
    Ok(())
}

fn write_iref(w: &mut BoxWriter, iref: &ItemReferenceBox) -> Result<()> {
    // the version decides the id width, so it follows the variant
    let header = match iref.references {
        ItemReferences::Small(_) => FullBoxHeader { version: 0, ..iref.header },
        ItemReferences::Large(_) => FullBoxHeader {
            version: iref.header.version.max(1),
            ..iref.header
        },
    };
    let mut b = w.begin_full(BoxType::ItemReferenceBox, header)?;
    match &iref.references {
        ItemReferences::Small(refs) => {
            for r in refs.iter() {
                let mut c = b.begin(r.reference_type)?;
                c.write_u16(r.from_item_id)?;
                c.write_u16(u16::try_from(r.to_item_ids.len())?)?;
                for &to in r.to_item_ids.iter() {
                    c.write_u16(to)?;
                }
            }
        },
        ItemReferences::Large(refs) => {
            for r in refs.iter() {
                let mut c = b.begin(r.reference_type)?;
                c.write_u32(r.from_item_id)?;
                c.write_u16(u16::try_from(r.to_item_ids.len())?)?;
                for &to in r.to_item_ids.iter() {
                    c.write_u32(to)?;
                }
            }
        },
    }
    Ok(())
}
