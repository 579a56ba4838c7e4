// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::convert::TryInto as _;
use std::io::Read;

use bitreader::BitReader;
use log::{debug, trace, warn};

use crate::boxes::{BoxType, FourCC};
use crate::container::*;
use crate::cursor::ByteCursor;
use crate::{Error, ParseConfig, Result, Stop, ToU64, ToUsize, TryString, TryVec, Unstoppable};

/// Basic ISO box structure.
///
/// mp4 files are a sequence of possibly-nested 'box' structures.  Each box
/// begins with a header describing the length of the box's data and a
/// four-byte box type which identifies the type of the box. Together these
/// are enough to interpret the contents of that section of the file.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    name: BoxType,
    /// Absolute offset of the size field.
    offset: usize,
    /// Absolute offset one past the last byte of the box.
    end: usize,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    const MIN_SIZE: u32 = 8;
}

/// A box whose body is readable through `content`, which stops at the
/// box's declared end.
struct BMFFBox<'a> {
    head: BoxHeader,
    content: ByteCursor<'a>,
}

impl<'a> BMFFBox<'a> {
    fn box_iter(&mut self) -> BoxIter<'a, '_> {
        BoxIter::new(&mut self.content)
    }

    fn fourcc(&self) -> FourCC {
        self.head.name.into()
    }

    fn bytes_left(&self) -> usize {
        self.content.remaining()
    }
}

struct BoxIter<'a, 'b> {
    src: &'b mut ByteCursor<'a>,
}

impl<'a, 'b> BoxIter<'a, 'b> {
    fn new(src: &'b mut ByteCursor<'a>) -> Self {
        BoxIter { src }
    }

    /// Reads the next child header and hands out its body. The parent is
    /// moved past the child right away, so whatever the caller does with the
    /// body, the next call starts at the next sibling.
    fn next_box(&mut self) -> Result<Option<BMFFBox<'a>>> {
        if self.src.consumed() {
            return Ok(None);
        }
        let head = read_box_header(self.src)?;
        let content = self.src.limited(head.end)?;
        self.src.seek(head.end)?;
        Ok(Some(BMFFBox { head, content }))
    }
}

/// Read and parse a box header.
///
/// A size of 0 extends the box to the end of whatever contains it. The
/// 64-bit size escape (size 1) is not supported.
///
/// See ISO 14496-12:2015 § 4.2
fn read_box_header(src: &mut ByteCursor<'_>) -> Result<BoxHeader> {
    let offset = src.position();
    let size32 = src.read_u32()?;
    let name = BoxType::from(src.read_u32()?);
    let end = match size32 {
        0 => src.len(),
        1 => return Err(Error::Unsupported("64-bit box sizes are not supported")),
        _ if size32 < BoxHeader::MIN_SIZE => return Err(Error::InvalidData("malformed size")),
        _ => offset
            .checked_add(size32.to_usize())
            .ok_or(Error::InvalidData("box size overflow"))?,
    };
    if end > src.len() {
        return Err(Error::BoxOutOfBounds {
            box_type: name.into(),
            offset: offset.to_u64(),
            end: end.to_u64(),
            limit: src.len().to_u64(),
        });
    }
    trace!("{name} at {offset}..{end}");
    Ok(BoxHeader { name, offset, end })
}

/// Parse the extra header fields for a full box.
fn read_fullbox_extra(src: &mut ByteCursor<'_>) -> Result<FullBoxHeader> {
    let v = src.read_u32()?;
    Ok(FullBoxHeader::new((v >> 24) as u8, v & 0x00ff_ffff))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_no_flags(src: &mut ByteCursor<'_>, config: &ParseConfig) -> Result<FullBoxHeader> {
    let header = read_fullbox_extra(src)?;

    if header.flags != 0 && !config.lenient {
        return Err(Error::Unsupported("expected flags to be 0"));
    }

    Ok(header)
}

/// Skip over the entire contents of a box.
fn skip_box_content(src: &BMFFBox<'_>) {
    let header = &src.head;
    match header.name {
        BoxType::FreeSpaceBox | BoxType::SkipBox => debug!("{} at {} (skipped)", header.name, header.offset),
        _ => warn!(
            "Unknown box type '{}' with size {} at {}, skipping",
            header.name,
            header.end - header.offset,
            header.offset
        ),
    }
}

/// Reads a NUL-terminated string, or in lenient mode, the rest of the box
/// when the terminator is missing.
fn read_string(src: &mut ByteCursor<'_>, config: &ParseConfig) -> Result<TryString> {
    let s = match src.read_string() {
        Ok(s) => s,
        Err(Error::UnterminatedString { offset }) if config.lenient => {
            warn!("unterminated string at {offset}, using the rest of the box");
            src.read_to_end()?
        },
        Err(e) => return Err(e),
    };
    copy_bytes(s)
}

fn copy_bytes(bytes: &[u8]) -> Result<TryVec<u8>> {
    let mut v = TryVec::with_capacity(bytes.len())?;
    v.extend_from_slice(bytes)?;
    Ok(v)
}

/// Capacity to pre-allocate for `count` entries of at least `min_entry_size`
/// bytes each, never more than the remaining bytes could hold.
fn bounded_capacity(src: &ByteCursor<'_>, count: usize, min_entry_size: usize) -> usize {
    count.min(src.remaining() / min_entry_size.max(1))
}

struct ResourceTracker<'a> {
    config: &'a ParseConfig,
    current_memory: u64,
}

impl<'a> ResourceTracker<'a> {
    fn new(config: &'a ParseConfig) -> Self {
        Self {
            config,
            current_memory: 0,
        }
    }

    fn reserve(&mut self, bytes: u64) -> Result<()> {
        self.current_memory = self.current_memory.saturating_add(bytes);

        if let Some(limit) = self.config.peak_memory_limit {
            if self.current_memory > limit {
                return Err(Error::ResourceLimitExceeded("peak memory limit exceeded"));
            }
        }

        Ok(())
    }

    fn copy_out(&mut self, bytes: &[u8]) -> Result<TryVec<u8>> {
        self.reserve(bytes.len().to_u64())?;
        copy_bytes(bytes)
    }
}

/// Parses a complete AVIF file held in memory, with default limits.
///
/// Either the whole tree is returned or an error is; nothing partial escapes.
pub fn parse(data: &[u8]) -> Result<FileBox> {
    parse_with_config(data, &ParseConfig::default(), &Unstoppable)
}

/// Read the whole of `f` and parse it.
pub fn read_avif<T: Read>(f: &mut T) -> Result<FileBox> {
    let mut buf = TryVec::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = match f.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        buf.extend_from_slice(&chunk[..n])?;
    }
    parse(&buf)
}

/// Parse an AVIF file with resource limits and cancellation support.
///
/// # Arguments
///
/// * `data` - The complete file
/// * `config` - Resource limits and parsing options
/// * `stop` - Cancellation token (use [`Unstoppable`] if not needed)
pub fn parse_with_config(data: &[u8], config: &ParseConfig, stop: &dyn Stop) -> Result<FileBox> {
    let mut tracker = ResourceTracker::new(config);
    let mut src = ByteCursor::new(data);
    let mut iter = BoxIter::new(&mut src);

    // 'ftyp' box must occur first; see ISO 14496-12:2015 § 4.3.1
    let file_type = match iter.next_box()? {
        Some(mut b) if b.head.name == BoxType::FileTypeBox => read_ftyp(&mut b)?,
        Some(b) => {
            return Err(Error::UnexpectedBox {
                expected: BoxType::FileTypeBox.into(),
                found: b.fourcc(),
            });
        },
        None => return Err(Error::InvalidData("empty file")),
    };

    let mut meta = None;
    let mut media_data = TryVec::new();

    while let Some(mut b) = iter.next_box()? {
        stop.check()?;

        match b.head.name {
            BoxType::MetadataBox => {
                if meta.is_some() {
                    return Err(Error::InvalidData("There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1"));
                }
                meta = Some(read_meta(&mut b, config, &mut tracker)?);
            },
            BoxType::MediaDataBox => {
                let offset = b.content.position().to_u64();
                let data = tracker.copy_out(b.content.read_to_end()?)?;
                media_data.push(MediaDataBox { offset, data })?;
            },
            BoxType::FileTypeBox => return Err(Error::InvalidData("duplicate ftyp box")),
            _ => skip_box_content(&b),
        }
    }

    match &meta {
        Some(meta) => validate_extents(meta, data.len().to_u64())?,
        None => debug!("no meta box"),
    }

    Ok(FileBox {
        file_type,
        meta,
        media_data,
    })
}

/// Every extent that points into the file or `idat` must lie inside it.
fn validate_extents(meta: &MetaBox, file_len: u64) -> Result<()> {
    for item in meta.item_location.items.iter() {
        let source_len = match item.construction_method {
            ConstructionMethod::File => file_len,
            ConstructionMethod::Idat => match &meta.item_data {
                Some(idat) => idat.len().to_u64(),
                None => return Err(Error::InvalidData("iloc uses construction method 1 without an idat box")),
            },
            // offsets into other items; resolved by whoever follows the reference
            ConstructionMethod::Item => continue,
        };
        for extent in item.extents.iter() {
            let start = item
                .base_offset
                .checked_add(extent.extent_offset)
                .ok_or(Error::InvalidData("offset calculation overflow"))?;
            let end = start
                .checked_add(extent.extent_length)
                .ok_or(Error::InvalidData("end calculation overflow"))?;
            if end > source_len {
                warn!("item {} extent {start}..{end} is outside its source of {source_len} bytes", item.item_id);
                return Err(Error::InvalidData("iloc extent is outside of its source"));
            }
        }
    }
    Ok(())
}

/// Parse an ftyp box.
/// See ISO 14496-12:2015 § 4.3
fn read_ftyp(src: &mut BMFFBox<'_>) -> Result<FileTypeBox> {
    let major_brand = src.content.read_fourcc()?;
    let minor_version = src.content.read_u32()?;
    if major_brand != FourCC::AVIF {
        warn!("major_brand: {major_brand}");
        return Err(Error::UnsupportedBrand(major_brand));
    }
    if minor_version != 0 {
        return Err(Error::UnsupportedMinorVersion(minor_version));
    }
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        return Err(Error::InvalidData("invalid ftyp size"));
    }
    let brand_count = bytes_left / 4;
    let mut compatible_brands = TryVec::with_capacity(brand_count)?;
    for _ in 0..brand_count {
        compatible_brands.push(src.content.read_fourcc()?)?;
    }
    Ok(FileTypeBox {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

/// Parse a metadata box in the context of an AVIF.
/// See ISO 14496-12:2015 § 8.11.1
fn read_meta(src: &mut BMFFBox<'_>, config: &ParseConfig, tracker: &mut ResourceTracker<'_>) -> Result<MetaBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    if header.version != 0 {
        return Err(Error::UnsupportedVersion {
            box_type: src.fourcc(),
            version: header.version,
        });
    }

    let mut handler = None;
    let mut item_properties = None;
    let mut item_location = None;
    let mut item_info = None;
    let mut primary_item = None;
    let mut item_reference = None;
    let mut item_data = None;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::HandlerBox => {
                if handler.is_some() {
                    return Err(Error::InvalidData("There should be one hdlr box per ISO 14496-12:2015 § 8.4.3.1"));
                }
                handler = Some(read_hdlr(&mut b, config)?);
            },
            BoxType::ItemPropertiesBox => {
                if item_properties.is_some() {
                    return Err(Error::InvalidData("There should be zero or one iprp boxes per ISO 23008-12:2017 § 9.3.1"));
                }
                item_properties = Some(read_iprp(&mut b, config)?);
            },
            BoxType::ItemLocationBox => {
                if item_location.is_some() {
                    return Err(Error::InvalidData("There should be zero or one iloc boxes per ISO 14496-12:2015 § 8.11.3.1"));
                }
                item_location = Some(read_iloc(&mut b, config)?);
            },
            BoxType::ItemInfoBox => {
                if item_info.is_some() {
                    return Err(Error::InvalidData("There should be zero or one iinf boxes per ISO 14496-12:2015 § 8.11.6.1"));
                }
                item_info = Some(read_iinf(&mut b, config)?);
            },
            BoxType::PrimaryItemBox => {
                if primary_item.is_some() {
                    return Err(Error::InvalidData("There should be zero or one pitm boxes per ISO 14496-12:2015 § 8.11.4.1"));
                }
                primary_item = Some(read_pitm(&mut b, config)?);
            },
            BoxType::ItemReferenceBox => {
                if item_reference.is_some() {
                    return Err(Error::InvalidData("There should be zero or one iref boxes per ISO 14496-12:2015 § 8.11.12.1"));
                }
                item_reference = Some(read_iref(&mut b, config)?);
            },
            BoxType::ItemDataBox => {
                if item_data.is_some() {
                    return Err(Error::InvalidData("There should be zero or one idat boxes"));
                }
                item_data = Some(tracker.copy_out(b.content.read_to_end()?)?);
            },
            _ => skip_box_content(&b),
        }
    }

    Ok(MetaBox {
        header,
        handler: handler.ok_or(Error::InvalidData("hdlr missing"))?,
        item_properties: item_properties.ok_or(Error::InvalidData("iprp missing"))?,
        item_location: item_location.ok_or(Error::InvalidData("iloc missing"))?,
        item_info: item_info.ok_or(Error::InvalidData("iinf missing"))?,
        primary_item,
        item_reference,
        item_data,
    })
}

/// Parse a Handler Reference Box
/// See ISO 14496-12:2015 § 8.4.3
fn read_hdlr(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<HandlerBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;

    // pre_defined
    src.content.skip(4)?;
    let handler_type = src.content.read_fourcc()?;
    // reserved
    src.content.skip(12)?;

    if handler_type == FourCC::NULL {
        warn!("hdlr handler_type is 'null'");
    } else if handler_type != FourCC::PICT {
        warn!("hdlr handler_type is '{handler_type}', expected 'pict'");
    }

    let name = read_string(&mut src.content, config)?;

    Ok(HandlerBox {
        header,
        handler_type,
        name,
    })
}

/// Parse a Primary Item Box
/// See ISO 14496-12:2015 § 8.11.4
fn read_pitm(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<PrimaryItemBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;

    let item_id = match header.version {
        0 => src.content.read_u16()?.into(),
        _ => src.content.read_u32()?,
    };

    Ok(PrimaryItemBox { header, item_id })
}

/// Parse an Item Information Box
/// See ISO 14496-12:2015 § 8.11.6
fn read_iinf(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemInfoBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;

    let entry_count = if header.version == 0 {
        src.content.read_u16()?.to_usize()
    } else {
        src.content.read_u32()?.to_usize()
    };
    let mut entries = TryVec::with_capacity(bounded_capacity(&src.content, entry_count, 12))?;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != BoxType::ItemInfoEntry {
            return Err(Error::UnexpectedBox {
                expected: BoxType::ItemInfoEntry.into(),
                found: b.fourcc(),
            });
        }

        entries.push(read_infe(&mut b, config)?)?;
    }

    if entries.len() != entry_count {
        warn!("iinf declares {entry_count} entries, found {}", entries.len());
    }

    Ok(ItemInfoBox { header, entries })
}

/// Parse an Item Info Entry
/// See ISO 14496-12:2015 § 8.11.6.2
fn read_infe(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemInfoEntry> {
    // According to the standard, it seems the flags field should be 0, but
    // at least one sample AVIF image has a nonzero value.
    let header = read_fullbox_extra(&mut src.content)?;
    let c = &mut src.content;

    let mut entry = ItemInfoEntry {
        header,
        ..ItemInfoEntry::default()
    };

    match header.version {
        0 | 1 => {
            entry.item_id = c.read_u16()?.into();
            entry.item_protection_index = c.read_u16()?;
            entry.item_name = read_string(c, config)?;
            entry.content_type = Some(read_string(c, config)?);
            if c.remaining() > 0 {
                entry.content_encoding = Some(read_string(c, config)?);
            }
            if header.version == 1 && c.remaining() > 0 {
                entry.extension = read_item_info_extension(c, config)?;
            }
        },
        2 | 3 => {
            entry.item_id = match header.version {
                2 => c.read_u16()?.into(),
                _ => c.read_u32()?,
            };
            entry.item_protection_index = c.read_u16()?;
            let item_type = c.read_fourcc()?;
            entry.item_type = Some(item_type);
            entry.item_name = read_string(c, config)?;
            if item_type == FourCC::MIME {
                entry.content_type = Some(read_string(c, config)?);
                if c.remaining() > 0 {
                    entry.content_encoding = Some(read_string(c, config)?);
                }
            } else if item_type == FourCC::URI {
                entry.item_uri_type = Some(read_string(c, config)?);
            }
        },
        version => {
            return Err(Error::UnsupportedVersion {
                box_type: BoxType::ItemInfoEntry.into(),
                version,
            });
        },
    }

    debug!("infe item_id {} item_type: {:?}", entry.item_id, entry.item_type);
    Ok(entry)
}

/// The extension type decides the layout of everything after it, so an
/// unknown one can't be skipped field by field.
fn read_item_info_extension(c: &mut ByteCursor<'_>, config: &ParseConfig) -> Result<Option<ItemInfoExtension>> {
    let extension_type = c.read_fourcc()?;
    if extension_type != FourCC::FDEL {
        if config.lenient {
            warn!("skipping unknown item info extension '{extension_type}'");
            c.read_to_end()?;
            return Ok(None);
        }
        return Err(Error::Unsupported("only 'fdel' item info extensions are supported"));
    }
    let content_location = read_string(c, config)?;
    let content_md5 = read_string(c, config)?;
    let content_length = c.read_u64()?;
    let transfer_length = c.read_u64()?;
    let entry_count = c.read_u8()?;
    let mut group_ids = TryVec::with_capacity(entry_count.to_usize())?;
    for _ in 0..entry_count {
        group_ids.push(c.read_u32()?)?;
    }
    Ok(Some(ItemInfoExtension::FileDelivery(FDItemInfoExtension {
        content_location,
        content_md5,
        content_length,
        transfer_length,
        group_ids,
    })))
}

/// Parse an Item Reference Box
/// See ISO 14496-12:2015 § 8.11.12
fn read_iref(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemReferenceBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;

    let mut iter = src.box_iter();
    let references = if header.version == 0 {
        let mut refs = TryVec::new();
        while let Some(mut b) = iter.next_box()? {
            let from_item_id = b.content.read_u16()?;
            let reference_count = b.content.read_u16()?;
            let mut to_item_ids = TryVec::with_capacity(bounded_capacity(&b.content, reference_count.into(), 2))?;
            for _ in 0..reference_count {
                to_item_ids.push(b.content.read_u16()?)?;
            }
            refs.push(SingleItemTypeReferenceBox {
                reference_type: b.fourcc(),
                from_item_id,
                to_item_ids,
            })?;
        }
        ItemReferences::Small(refs)
    } else {
        let mut refs = TryVec::new();
        while let Some(mut b) = iter.next_box()? {
            let from_item_id = b.content.read_u32()?;
            let reference_count = b.content.read_u16()?;
            let mut to_item_ids = TryVec::with_capacity(bounded_capacity(&b.content, reference_count.into(), 4))?;
            for _ in 0..reference_count {
                to_item_ids.push(b.content.read_u32()?)?;
            }
            refs.push(SingleItemTypeReferenceBoxLarge {
                reference_type: b.fourcc(),
                from_item_id,
                to_item_ids,
            })?;
        }
        ItemReferences::Large(refs)
    };

    Ok(ItemReferenceBox { header, references })
}

/// Parse an Item Properties Box: one `ipco` followed by `ipma` boxes.
/// See ISO 23008-12:2017 § 9.3
fn read_iprp(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemPropertiesBox> {
    let mut iter = src.box_iter();

    let properties = match iter.next_box()? {
        Some(mut b) if b.head.name == BoxType::ItemPropertyContainerBox => read_ipco(&mut b, config)?,
        Some(b) => {
            return Err(Error::UnexpectedBox {
                expected: BoxType::ItemPropertyContainerBox.into(),
                found: b.fourcc(),
            });
        },
        None => return Err(Error::InvalidData("iprp box without ipco")),
    };

    let mut associations = TryVec::new();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != BoxType::ItemPropertyAssociationBox {
            return Err(Error::UnexpectedBox {
                expected: BoxType::ItemPropertyAssociationBox.into(),
                found: b.fourcc(),
            });
        }
        associations.push(read_ipma(&mut b)?)?;
    }

    Ok(ItemPropertiesBox {
        properties,
        associations,
    })
}

fn read_ipma(src: &mut BMFFBox<'_>) -> Result<ItemPropertyAssociation> {
    let header = read_fullbox_extra(&mut src.content)?;
    let c = &mut src.content;

    let entry_count = c.read_u32()?.to_usize();
    let mut items = TryVec::with_capacity(bounded_capacity(c, entry_count, 3))?;
    let num_association_bytes = if header.flags & 1 == 1 { 2 } else { 1 };

    for _ in 0..entry_count {
        let item_id = if header.version == 0 {
            c.read_u16()?.into()
        } else {
            c.read_u32()?
        };
        let association_count = c.read_u8()?;
        let mut entries = TryVec::with_capacity(association_count.to_usize())?;
        for _ in 0..association_count {
            let association = c.read_bytes(num_association_bytes)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u16(association.remaining().try_into()?)?;
            entries.push(PropertyAssociation {
                essential,
                property_index,
            })?;
        }
        items.push(AssociatedItem { item_id, entries })?;
    }

    Ok(ItemPropertyAssociation { header, items })
}

fn read_ipco(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemPropertyContainer> {
    let mut properties = TryVec::new();

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        // Must push for every property to have correct index for them
        let prop = match b.head.name {
            BoxType::PixelAspectRatioBox => Property::PixelAspectRatio(read_pasp(&mut b)?),
            BoxType::ImageSpatialExtentsProperty => Property::ImageSpatialExtents(read_ispe(&mut b, config)?),
            BoxType::PixelInformationProperty => Property::PixelInformation(read_pixi(&mut b, config)?),
            BoxType::RelativeLocationProperty => Property::RelativeLocation(read_rloc(&mut b, config)?),
            BoxType::AuxiliaryTypeProperty => Property::AuxiliaryType(read_auxc(&mut b, config)?),
            BoxType::CleanApertureBox => Property::CleanAperture(read_clap(&mut b)?),
            BoxType::ImageRotationBox => Property::ImageRotation(ImageRotationBox {
                angle: b.content.read_u8()?.into(),
            }),
            BoxType::ImageMirrorBox => Property::ImageMirror(ImageMirrorBox {
                axis: b.content.read_u8()?.into(),
            }),
            BoxType::ColourInformationBox => Property::ColourInformation(read_colr(&mut b)?),
            BoxType::ContentLightLevelBox => Property::ContentLightLevel(ContentLightLevelBox {
                max_content_light_level: b.content.read_u16()?,
                max_pic_average_light_level: b.content.read_u16()?,
            }),
            BoxType::MasteringDisplayColourVolumeBox => Property::MasteringDisplayColourVolume(read_mdcv(&mut b)?),
            BoxType::AV1CodecConfigurationBox => Property::AV1CodecConfiguration(read_av1c(&mut b)?),
            _ => {
                skip_box_content(&b);
                Property::Unknown(OpaqueProperty {
                    box_type: b.fourcc(),
                    payload: copy_bytes(b.content.read_to_end()?)?,
                })
            },
        };
        properties.push(prop)?;
    }
    Ok(ItemPropertyContainer { properties })
}

fn read_pasp(src: &mut BMFFBox<'_>) -> Result<PixelAspectRatioBox> {
    Ok(PixelAspectRatioBox {
        h_spacing: src.content.read_u32()?,
        v_spacing: src.content.read_u32()?,
    })
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ImageSpatialExtentsProperty> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    Ok(ImageSpatialExtentsProperty {
        header,
        image_width: src.content.read_u32()?,
        image_height: src.content.read_u32()?,
    })
}

fn read_pixi(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<PixelInformationProperty> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    let num_channels = src.content.read_u8()?;
    let bits_per_channel = copy_bytes(src.content.read_bytes(num_channels.to_usize())?)?;
    Ok(PixelInformationProperty {
        header,
        bits_per_channel,
    })
}

fn read_rloc(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<RelativeLocationProperty> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    Ok(RelativeLocationProperty {
        header,
        horizontal_offset: src.content.read_u32()?,
        vertical_offset: src.content.read_u32()?,
    })
}

fn read_auxc(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<AuxiliaryTypeProperty> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    let aux_type = read_string(&mut src.content, config)?;
    let aux_subtype = copy_bytes(src.content.read_to_end()?)?;
    Ok(AuxiliaryTypeProperty {
        header,
        aux_type,
        aux_subtype,
    })
}

fn read_clap(src: &mut BMFFBox<'_>) -> Result<CleanApertureBox> {
    let c = &mut src.content;
    Ok(CleanApertureBox {
        width_n: c.read_u32()? as i32,
        width_d: c.read_u32()?,
        height_n: c.read_u32()? as i32,
        height_d: c.read_u32()?,
        horiz_off_n: c.read_u32()? as i32,
        horiz_off_d: c.read_u32()?,
        vert_off_n: c.read_u32()? as i32,
        vert_off_d: c.read_u32()?,
    })
}

/// Parse a Colour Information box. The colour type is not optional: an
/// unknown one fails the parse.
/// See ISO 14496-12:2015 § 12.1.5
fn read_colr(src: &mut BMFFBox<'_>) -> Result<ColourInformationBox> {
    let c = &mut src.content;
    let colour_type = c.read_fourcc()?;
    let profile = if colour_type == FourCC::NCLX {
        ColourProfile::Nclx(NclxColour {
            colour_primaries: c.read_u16()?,
            transfer_characteristics: c.read_u16()?,
            matrix_coefficients: c.read_u16()?,
            full_range: c.read_u8()? & 0x80 != 0,
        })
    } else if colour_type == FourCC::RICC {
        ColourProfile::RestrictedIcc(copy_bytes(c.read_to_end()?)?)
    } else if colour_type == FourCC::PROF {
        ColourProfile::UnrestrictedIcc(copy_bytes(c.read_to_end()?)?)
    } else {
        warn!("unknown colour_type '{colour_type}'");
        return Err(Error::InvalidData("unknown colour_type in colr box"));
    };
    Ok(ColourInformationBox { profile })
}

fn read_mdcv(src: &mut BMFFBox<'_>) -> Result<MasteringDisplayColourVolumeBox> {
    let c = &mut src.content;
    let mut mdcv = MasteringDisplayColourVolumeBox::default();
    for i in 0..3 {
        mdcv.display_primaries_x[i] = c.read_u16()?;
        mdcv.display_primaries_y[i] = c.read_u16()?;
    }
    mdcv.white_point_x = c.read_u16()?;
    mdcv.white_point_y = c.read_u16()?;
    mdcv.max_display_mastering_luminance = c.read_u32()?;
    mdcv.min_display_mastering_luminance = c.read_u32()?;
    Ok(mdcv)
}

/// Parse an AV1 Codec Configuration box: a fixed 4-byte bit-packed header,
/// then config OBUs up to the end of the box.
fn read_av1c(src: &mut BMFFBox<'_>) -> Result<AV1CodecConfigurationBox> {
    let fixed = src.content.read_bytes(4)?;
    let mut r = BitReader::new(fixed);
    let marker = r.read_bool()?;
    let version = r.read_u8(7)?;
    let seq_profile = r.read_u8(3)?;
    let seq_level_idx_0 = r.read_u8(5)?;
    let seq_tier_0 = r.read_u8(1)?;
    let high_bitdepth = r.read_bool()?;
    let twelve_bit = r.read_bool()?;
    let monochrome = r.read_bool()?;
    let chroma_subsampling_x = r.read_bool()?;
    let chroma_subsampling_y = r.read_bool()?;
    let chroma_sample_position = r.read_u8(2)?;
    let _reserved = r.read_u8(3)?;
    let initial_presentation_delay_present = r.read_bool()?;
    let delay = r.read_u8(4)?;
    if !marker {
        warn!("av1C marker bit is not set");
    }

    Ok(AV1CodecConfigurationBox {
        config: AV1CodecConfigurationRecord {
            marker,
            version,
            seq_profile,
            seq_level_idx_0,
            seq_tier_0,
            high_bitdepth,
            twelve_bit,
            monochrome,
            chroma_subsampling_x,
            chroma_subsampling_y,
            chroma_sample_position,
            initial_presentation_delay_minus_one: initial_presentation_delay_present.then_some(delay),
            config_obus: copy_bytes(src.content.read_to_end()?)?,
        },
    })
}

/// Parse an item location box inside a meta box
/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc(src: &mut BMFFBox<'_>, config: &ParseConfig) -> Result<ItemLocationBox> {
    let header = read_fullbox_no_flags(&mut src.content, config)?;
    let version = header.version;
    if version > 2 {
        return Err(Error::UnsupportedVersion {
            box_type: BoxType::ItemLocationBox.into(),
            version,
        });
    }
    let c = &mut src.content;

    let sizes = c.read_u8()?;
    let offset_size = IlocFieldSize::parse("offset_size", sizes >> 4)?;
    let length_size = IlocFieldSize::parse("length_size", sizes & 0x0f)?;
    let sizes = c.read_u8()?;
    let base_offset_size = IlocFieldSize::parse("base_offset_size", sizes >> 4)?;
    let index_size = match version {
        1 | 2 => IlocFieldSize::parse("index_size", sizes & 0x0f)?,
        // reserved
        _ => IlocFieldSize::Zero,
    };

    let item_count = match version {
        0 | 1 => c.read_u16()?.to_usize(),
        _ => c.read_u32()?.to_usize(),
    };

    let mut items = TryVec::with_capacity(bounded_capacity(c, item_count, 6))?;

    for _ in 0..item_count {
        let item_id = match version {
            0 | 1 => c.read_u16()?.into(),
            _ => c.read_u32()?,
        };

        // ISO 14496-12 isn't entirely clear how an `iloc` should be interpreted for version 0,
        // which has no `construction_method` field. It does say:
        // "For maximum compatibility, version 0 of this box should be used in preference to
        //  version 1 with `construction_method==0`, or version 2 when possible."
        // We take this to imply version 0 can be interpreted as using file offsets.
        let construction_method = match version {
            0 => ConstructionMethod::File,
            _ => match c.read_u16()? & 0x000f {
                0 => ConstructionMethod::File,
                1 => ConstructionMethod::Idat,
                2 => ConstructionMethod::Item,
                _ => return Err(Error::InvalidData("construction_method is taken from the set 0, 1 or 2 per ISO 14496-12:2015 § 8.11.3.3")),
            },
        };

        let data_reference_index = c.read_u16()?;
        let base_offset = c.read_uint(base_offset_size.bytes())?;
        let extent_count = c.read_u16()?;

        if extent_count < 1 {
            return Err(Error::InvalidData("extent_count must have a value 1 or greater per ISO 14496-12:2015 § 8.11.3.3"));
        }

        let mut extents = TryVec::with_capacity(bounded_capacity(c, extent_count.into(), 1))?;

        for _ in 0..extent_count {
            let extent_index = c.read_uint(index_size.bytes())?;
            // "If the offset is not identified (the field has a length of zero), then the
            //  beginning of the source (offset 0) is implied"
            let extent_offset = c.read_uint(offset_size.bytes())?;
            // "If the length is not specified, or specified as zero, then the entire length of
            //  the source is implied" (ibid)
            let extent_length = c.read_uint(length_size.bytes())?;
            extents.push(ItemLocationExtent {
                extent_index,
                extent_offset,
                extent_length,
            })?;
        }

        items.push(ItemLocation {
            item_id,
            construction_method,
            data_reference_index,
            base_offset,
            extents,
        })?;
    }

    if c.remaining() > 0 {
        debug!("{} trailing bytes in iloc", c.remaining());
    }

    Ok(ItemLocationBox {
        header,
        offset_size,
        length_size,
        base_offset_size,
        index_size,
        items,
    })
}
