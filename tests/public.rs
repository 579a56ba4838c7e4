// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::borrow::Cow;

use zenavif_boxes::obu::{self, ObuContent, ObuParser, ObuType};
use zenavif_boxes::query::{self, find_property};
use zenavif_boxes::{
    AV1Metadata, AuxiliaryTypeProperty, ColourInformationBox, ColourProfile, ConstructionMethod, Error, FileBox, FourCC,
    ImageSpatialExtentsProperty, ParseConfig, Property, StopReason, Unstoppable,
};

/// Profile 1 sequence header, 960x1508, 8-bit 4:4:4.
static SEQUENCE_HEADER: [u8; 13] = [0x0a, 0x0b, 0x20, 0x00, 0x00, 0x42, 0x6b, 0xbf, 0xbc, 0x6f, 0xff, 0xcc, 0x10];
static ALPHA_URN: &[u8] = b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";

fn bx(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

fn full(name: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = (u32::from(version) << 24 | flags).to_be_bytes().to_vec();
    body.extend_from_slice(payload);
    bx(name, &body)
}

fn infe(item_id: u16, name: &str) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&item_id.to_be_bytes());
    p.extend_from_slice(&0u16.to_be_bytes());
    p.extend_from_slice(b"av01");
    p.extend_from_slice(name.as_bytes());
    p.push(0);
    full(b"infe", 2, 0, &p)
}

fn meta(mdat_offset: u32) -> Vec<u8> {
    let mut hdlr = vec![0; 4];
    hdlr.extend_from_slice(b"pict");
    hdlr.extend_from_slice(&[0; 12]);
    hdlr.push(0);

    let mut ispe = Vec::new();
    ispe.extend_from_slice(&960u32.to_be_bytes());
    ispe.extend_from_slice(&1508u32.to_be_bytes());

    let mut av1c = vec![0x81, 1 << 5 | 8, 0x00, 0x00];
    av1c.extend_from_slice(&SEQUENCE_HEADER);

    let mut colr = b"nclx".to_vec();
    colr.extend_from_slice(&[0, 1, 0, 13, 0, 6, 0x80]);

    let mut auxc = ALPHA_URN.to_vec();
    auxc.push(0);

    let mut ipco = Vec::new();
    ipco.extend(full(b"ispe", 0, 0, &ispe));
    ipco.extend(bx(b"av1C", &av1c));
    ipco.extend(bx(b"colr", &colr));
    ipco.extend(full(b"auxC", 0, 0, &auxc));
    ipco.extend(bx(b"zzzz", &[1, 2, 3]));

    let ipma = full(b"ipma", 0, 0, &[0, 0, 0, 2, 0, 1, 3, 0x01, 0x82, 0x83, 0, 2, 2, 0x01, 0x84]);
    let mut iprp = bx(b"ipco", &ipco);
    iprp.extend(ipma);

    let mut iinf = vec![0, 2];
    iinf.extend(infe(1, "Color"));
    iinf.extend(infe(2, "Alpha"));

    let mut iloc = vec![0x44, 0x40, 0, 2];
    // item 1: file offset into mdat
    iloc.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    iloc.extend_from_slice(&mdat_offset.to_be_bytes());
    iloc.extend_from_slice(&13u32.to_be_bytes());
    // item 2: all of idat
    iloc.extend_from_slice(&[0, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);

    let mut body = Vec::new();
    body.extend(full(b"hdlr", 0, 0, &hdlr));
    body.extend(bx(b"iprp", &iprp));
    body.extend(full(b"iinf", 0, 0, &iinf));
    body.extend(full(b"iloc", 1, 0, &iloc));
    body.extend(full(b"pitm", 0, 0, &[0, 1]));
    body.extend(full(b"iref", 0, 0, &bx(b"auxl", &[0, 2, 0, 1, 0, 1])));
    body.extend(bx(b"idat", &SEQUENCE_HEADER));
    full(b"meta", 0, 0, &body)
}

fn ftyp() -> Vec<u8> {
    bx(b"ftyp", b"avif\0\0\0\0mif1miaf")
}

fn build(mdat_offset: u32) -> Vec<u8> {
    let mut out = ftyp();
    out.extend(meta(mdat_offset));
    out.extend(bx(b"mdat", &SEQUENCE_HEADER));
    out
}

/// A color item in `mdat` plus an alpha item in `idat`, boxes in the order
/// the writer emits them.
fn sample_avif() -> Vec<u8> {
    let layout = build(0);
    build((layout.len() - SEQUENCE_HEADER.len()) as u32)
}

/// Same items as [`sample_avif`] with a `free` box ahead of `meta`.
fn free_before_meta() -> Vec<u8> {
    let mut head = ftyp();
    head.extend(bx(b"free", &[0; 32]));
    let payload_at = head.len() + meta(0).len() + 8;
    let mut out = head;
    out.extend(meta(payload_at as u32));
    out.extend(bx(b"mdat", &SEQUENCE_HEADER));
    out
}

/// Same items as [`sample_avif`] with `mdat` ahead of `meta`.
fn mdat_before_meta() -> Vec<u8> {
    let mut out = ftyp();
    let payload_at = out.len() + 8;
    out.extend(bx(b"mdat", &SEQUENCE_HEADER));
    out.extend(meta(payload_at as u32));
    out
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn parse_sample_tree() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");

    assert_eq!(file.file_type.major_brand, FourCC::AVIF);
    assert_eq!(file.file_type.minor_version, 0);
    assert_eq!(file.file_type.compatible_brands[..], [FourCC::from(*b"mif1"), FourCC::from(*b"miaf")]);

    let meta = file.meta.as_ref().expect("no meta");
    assert_eq!(meta.handler.handler_type, FourCC::PICT);
    assert!(meta.handler.name.is_empty());
    assert_eq!(meta.primary_item.map(|p| p.item_id), Some(1));
    assert_eq!(meta.item_info.entries.len(), 2);
    assert_eq!(meta.item_info.find(2).map(|e| &e.item_name[..]), Some(&b"Alpha"[..]));
    assert_eq!(meta.item_data.as_deref(), Some(&SEQUENCE_HEADER[..]));

    let props = &meta.item_properties.properties;
    assert_eq!(props.properties.len(), 5);
    match props.get(5) {
        Some(Property::Unknown(opaque)) => {
            assert_eq!(opaque.box_type, FourCC::from(*b"zzzz"));
            assert_eq!(opaque.payload[..], [1, 2, 3]);
        },
        other => panic!("unexpected {other:?}"),
    }
    match props.get(2) {
        Some(Property::AV1CodecConfiguration(av1c)) => {
            assert_eq!(av1c.config.seq_profile, 1);
            assert_eq!(av1c.config.seq_level_idx_0, 8);
            assert_eq!(av1c.config.config_obus[..], SEQUENCE_HEADER);
        },
        other => panic!("unexpected {other:?}"),
    }

    let locations = &meta.item_location.items;
    assert_eq!(locations[0].construction_method, ConstructionMethod::File);
    assert_eq!(locations[1].construction_method, ConstructionMethod::Idat);

    assert_eq!(file.media_data.len(), 1);
    assert_eq!(file.media_data[0].offset, (data.len() - SEQUENCE_HEADER.len()) as u64);
}

#[test]
fn read_avif_from_reader() {
    let data = sample_avif();
    let from_reader = zenavif_boxes::read_avif(&mut std::io::Cursor::new(&data)).expect("read_avif failed");
    let from_bytes = zenavif_boxes::parse(&data).expect("parse failed");
    assert_eq!(from_reader, from_bytes);
}

#[test]
fn unknown_top_level_boxes_are_skipped() {
    let mut data = sample_avif();
    data.extend(bx(b"free", &[0; 16]));
    data.extend(bx(b"uuid", &[7; 20]));
    let file = zenavif_boxes::parse(&data).expect("parse failed");
    assert_eq!(file.media_data.len(), 1);
}

#[test]
fn every_truncation_is_rejected() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let data = sample_avif();
    for len in 0..data.len() {
        assert!(zenavif_boxes::parse(&data[..len]).is_err(), "prefix of {len} bytes was accepted");
    }
}

#[test]
fn ftyp_brand_and_version() {
    let data = sample_avif();

    let mut heic = data.clone();
    heic[8..12].copy_from_slice(b"heic");
    match zenavif_boxes::parse(&heic) {
        Err(Error::UnsupportedBrand(brand)) => assert_eq!(brand, FourCC::from(*b"heic")),
        other => panic!("unexpected {other:?}"),
    }

    let mut minor = data;
    minor[15] = 1;
    match zenavif_boxes::parse(&minor) {
        Err(Error::UnsupportedMinorVersion(1)) => {},
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn ftyp_must_come_first() {
    let mut data = bx(b"free", &[]);
    data.extend(sample_avif());
    match zenavif_boxes::parse(&data) {
        Err(Error::UnexpectedBox { expected, found }) => {
            assert_eq!(expected, FourCC::from(*b"ftyp"));
            assert_eq!(found, FourCC::from(*b"free"));
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn meta_at_most_once() {
    let data = sample_avif();
    let ftyp_len = ftyp().len();
    let meta_len = data.len() - ftyp_len - 8 - SEQUENCE_HEADER.len();

    let mut twice = data.clone();
    twice.extend_from_slice(&data[ftyp_len..ftyp_len + meta_len]);
    assert!(zenavif_boxes::parse(&twice).is_err());

    let mut missing = data[..ftyp_len].to_vec();
    missing.extend_from_slice(&data[ftyp_len + meta_len..]);
    let file = zenavif_boxes::parse(&missing).expect("parse failed");
    assert!(file.meta.is_none());
    assert_eq!(file.media_data.len(), 1);
    assert_eq!(file.media_data[0].offset, (ftyp_len + 8) as u64);
    assert_eq!(query::find_primary_item_id(&file), None);
    assert!(query::primary_item_metadata(&file, &missing).is_err());

    // and it writes back without one
    assert_eq!(zenavif_boxes::write(&file).expect("write failed")[..], missing[..]);
}

#[test]
fn extent_past_end_of_file() {
    let good = sample_avif();
    let bad = build((good.len() - SEQUENCE_HEADER.len() + 1) as u32);
    assert!(zenavif_boxes::parse(&good).is_ok());
    assert!(zenavif_boxes::parse(&bad).is_err());
}

#[test]
fn lenient_mode_accepts_what_strict_rejects() {
    // non-zero flags on pitm
    let data = sample_avif();
    let pitm = full(b"pitm", 0, 0, &[0, 1]);
    let at = data.windows(pitm.len()).position(|w| w == pitm).expect("pitm not found");
    let mut flagged = data;
    flagged[at + 11] = 1;

    assert!(zenavif_boxes::parse(&flagged).is_err());
    let config = ParseConfig::default().lenient(true);
    assert!(zenavif_boxes::parse_with_config(&flagged, &config, &Unstoppable).is_ok());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn item_properties() {
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");

    let ispe = find_property::<ImageSpatialExtentsProperty>(&file, Some(1)).expect("no ispe");
    assert_eq!((ispe.image_width, ispe.image_height), (960, 1508));

    let colr = find_property::<ColourInformationBox>(&file, Some(1)).expect("no colr");
    match &colr.profile {
        ColourProfile::Nclx(nclx) => {
            assert_eq!(nclx.colour_primaries, 1);
            assert_eq!(nclx.transfer_characteristics, 13);
            assert_eq!(nclx.matrix_coefficients, 6);
            assert!(nclx.full_range);
        },
        other => panic!("unexpected {other:?}"),
    }
    assert!(find_property::<ColourInformationBox>(&file, Some(2)).is_none());

    let auxc = find_property::<AuxiliaryTypeProperty>(&file, Some(2)).expect("no auxC");
    assert_eq!(auxc.aux_type[..], *ALPHA_URN);

    assert_eq!(query::associated_properties(&file, Some(1)).count(), 3);
    assert_eq!(query::associated_properties(&file, None).count(), 5);
}

#[test]
fn alpha_item_lookup() {
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");
    assert_eq!(query::find_primary_item_id(&file), Some(1));
    assert_eq!(query::find_aux_item_id(&file, 1, ALPHA_URN), Some(2));
    assert_eq!(query::find_aux_item_id(&file, 2, ALPHA_URN), None);
    assert_eq!(query::find_aux_item_id(&file, 1, b"urn:mpeg:hevc:2015:auxid:2"), None);
}

#[test]
fn item_payloads() {
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");

    let color = query::item_data(&file, &data, 1).expect("item 1");
    assert!(matches!(color, Cow::Borrowed(_)));
    assert_eq!(color[..], SEQUENCE_HEADER);

    // zero length runs to the end of idat
    let alpha = query::item_data(&file, &data, 2).expect("item 2");
    assert_eq!(alpha[..], SEQUENCE_HEADER);

    let start = (data.len() - SEQUENCE_HEADER.len()) as u64;
    assert_eq!(query::find_item_region(&file, Some(1), None).unwrap(), start..start + 13);
    assert_eq!(query::find_item_region(&file, None, Some(0)).unwrap(), start..start + 13);
    assert!(query::find_item_region(&file, Some(1), Some(1)).is_err());
    assert!(query::find_item_region(&file, Some(9), None).is_err());
    assert!(query::item_data(&file, &data, 9).is_err());
}

#[test]
fn primary_item_sequence_header() {
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");
    let md = query::primary_item_metadata(&file, &data).expect("metadata");
    assert_eq!(md.max_frame_width.get(), 960);
    assert_eq!(md.max_frame_height.get(), 1508);
    assert_eq!(md.seq_profile, 1);
    assert_eq!(md.bit_depth, 8);
    assert_eq!(md.chroma_subsampling, (false, false));
    assert!(!md.monochrome);
}

// ============================================================================
// Writing
// ============================================================================

#[test]
fn write_reproduces_canonical_input() {
    let data = sample_avif();
    let file = zenavif_boxes::parse(&data).expect("parse failed");
    let written = zenavif_boxes::write(&file).expect("write failed");
    assert_eq!(written[..], data[..]);
    assert_eq!(zenavif_boxes::parse(&written).expect("reparse failed"), file);

    let mut out = Vec::new();
    zenavif_boxes::write_to(&file, &mut out).expect("write_to failed");
    assert_eq!(out, data);
}

/// Everything but the `iloc` offsets and `mdat` positions, which follow the
/// layout.
fn assert_same_items(a: &FileBox, a_data: &[u8], b: &FileBox, b_data: &[u8]) {
    assert_eq!(a.file_type, b.file_type);
    let (ma, mb) = (a.meta.as_ref().expect("no meta"), b.meta.as_ref().expect("no meta"));
    assert_eq!(ma.header, mb.header);
    assert_eq!(ma.handler, mb.handler);
    assert_eq!(ma.item_properties, mb.item_properties);
    assert_eq!(ma.item_info, mb.item_info);
    assert_eq!(ma.primary_item, mb.primary_item);
    assert_eq!(ma.item_reference, mb.item_reference);
    assert_eq!(ma.item_data, mb.item_data);
    assert_eq!(ma.item_location.items.len(), mb.item_location.items.len());
    for item in ma.item_location.items.iter() {
        let before = query::item_data(a, a_data, item.item_id).expect("item data before");
        let after = query::item_data(b, b_data, item.item_id).expect("item data after");
        assert_eq!(before, after, "item {}", item.item_id);
    }
    let payloads = |f: &FileBox| f.media_data.iter().map(|m| m.data.to_vec()).collect::<Vec<_>>();
    assert_eq!(payloads(a), payloads(b));
}

/// Rewrites `data` and checks that the items survive and that the result is
/// a fixed point of parse then write.
fn assert_rewrite_keeps_items(data: &[u8]) -> Vec<u8> {
    let original = zenavif_boxes::parse(data).expect("parse failed");
    let written = zenavif_boxes::write(&original).expect("write failed").to_vec();
    let reparsed = zenavif_boxes::parse(&written).expect("reparse failed");
    assert_same_items(&original, data, &reparsed, &written);

    for mdat in reparsed.media_data.iter() {
        let at = mdat.offset as usize;
        assert_eq!(written[at..at + mdat.data.len()], mdat.data[..]);
    }

    let again = zenavif_boxes::write(&reparsed).expect("second write failed");
    assert_eq!(again[..], written[..]);
    assert_eq!(zenavif_boxes::parse(&again).expect("second reparse failed"), reparsed);
    written
}

#[test]
fn written_tree_parses_back() {
    let data = sample_avif();
    let mut file = zenavif_boxes::parse(&data).expect("parse failed");
    let meta = file.meta.as_mut().expect("no meta");
    meta.handler.name.extend_from_slice(b"zenavif").unwrap();
    let written = zenavif_boxes::write(&file).expect("write failed");
    let reparsed = zenavif_boxes::parse(&written).expect("reparse failed");

    assert_eq!(&reparsed.meta.as_ref().expect("no meta").handler.name[..], b"zenavif");
    assert_same_items(&file, &data, &reparsed, &written);
    // the longer hdlr pushes mdat back
    assert_eq!(reparsed.media_data[0].offset, file.media_data[0].offset + 7);
    assert_eq!(
        query::find_item_region(&reparsed, Some(1), None).unwrap().start,
        reparsed.media_data[0].offset
    );
}

#[test]
fn rewrite_drops_free_box_and_moves_items() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let data = free_before_meta();
    let written = assert_rewrite_keeps_items(&data);
    assert_eq!(written, sample_avif());
}

#[test]
fn rewrite_moves_mdat_after_meta() {
    let data = mdat_before_meta();
    let written = assert_rewrite_keeps_items(&data);
    assert_eq!(written, sample_avif());
}

#[test]
fn rewrite_rejects_extent_outside_mdat() {
    // item 1 points at the start of the free box
    let mut head = ftyp();
    let free_at = head.len() as u32;
    head.extend(bx(b"free", &[0; 16]));
    head.extend(meta(free_at));
    head.extend(bx(b"mdat", &SEQUENCE_HEADER));
    let file = zenavif_boxes::parse(&head).expect("parse failed");
    assert!(matches!(zenavif_boxes::write(&file), Err(Error::Unsupported(_))));
}

// ============================================================================
// Resource limits and cancellation
// ============================================================================

#[test]
fn resource_limit_peak_memory() {
    let data = sample_avif();
    let config = ParseConfig::default().with_peak_memory_limit(10);
    match zenavif_boxes::parse_with_config(&data, &config, &Unstoppable) {
        Err(Error::ResourceLimitExceeded(msg)) => assert_eq!(msg, "peak memory limit exceeded"),
        Ok(_) => panic!("Expected peak memory limit error"),
        Err(e) => panic!("Unexpected error: {:?}", e),
    }

    let config = ParseConfig::default().with_peak_memory_limit(26);
    assert!(zenavif_boxes::parse_with_config(&data, &config, &Unstoppable).is_ok());
}

struct ImmediatelyCancelled;

impl zenavif_boxes::Stop for ImmediatelyCancelled {
    fn check(&self) -> std::result::Result<(), StopReason> {
        Err(StopReason::Cancelled)
    }
}

#[test]
fn cancellation_stops_parse() {
    let data = sample_avif();
    match zenavif_boxes::parse_with_config(&data, &ParseConfig::default(), &ImmediatelyCancelled) {
        Err(Error::Stopped(reason)) => assert_eq!(reason, StopReason::Cancelled),
        Ok(_) => panic!("Expected cancellation"),
        Err(e) => panic!("Unexpected error: {:?}", e),
    }
}

#[test]
fn cancellation_stops_obu_parse() {
    match ObuParser::new(&SEQUENCE_HEADER).parse(&ImmediatelyCancelled) {
        Err(Error::Stopped(reason)) => assert_eq!(reason, StopReason::Cancelled),
        Ok(_) => panic!("Expected cancellation"),
        Err(e) => panic!("Unexpected error: {:?}", e),
    }
}

// ============================================================================
// AV1 bitstream
// ============================================================================

#[test]
fn obu_packets_in_order() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let mut stream = vec![0x12, 0x00];
    stream.extend_from_slice(&SEQUENCE_HEADER);
    let packets = obu::parse_obus(&stream).expect("parse_obus failed");
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].header.obu_type, ObuType::TemporalDelimiter);
    assert!(matches!(packets[0].content, ObuContent::TemporalDelimiter));
    assert_eq!((packets[0].beg, packets[0].end), (0, 2));
    assert_eq!(packets[1].header.obu_type, ObuType::SequenceHeader);
    assert_eq!((packets[1].beg, packets[1].end), (2, 15));

    let sh = obu::find_sequence_header(&packets).expect("no sequence header");
    assert_eq!(sh.max_frame_width, 960);
}

#[test]
fn bitstream_metadata() {
    let md = AV1Metadata::parse_av1_bitstream(&SEQUENCE_HEADER).expect("metadata");
    assert!(!md.still_picture);
    assert_eq!((md.max_frame_width.get(), md.max_frame_height.get()), (960, 1508));

    assert!(AV1Metadata::parse_av1_bitstream(&[0x12, 0x00]).is_err());
    assert!(matches!(obu::parse_obus(&[0x4a, 0x00]), Err(Error::UnknownObuType(9))));
}
