//! Print the OBUs of a raw AV1 stream, or of an AVIF file's primary item
use std::env;

use zenavif_boxes::obu::{ObuContent, ObuParser};
use zenavif_boxes::{query, Unstoppable};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <obu-or-avif-file> [operating-point]", args[0]);
        std::process::exit(1);
    }

    let data = std::fs::read(&args[1]).expect("Failed to open file");
    let operating_point = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);

    let payload = match zenavif_boxes::parse(&data) {
        Ok(file) => {
            let id = query::find_primary_item_id(&file).expect("no primary item");
            query::item_data(&file, &data, id).expect("primary item data").into_owned()
        },
        Err(_) => data,
    };

    let packets = match ObuParser::new(&payload).with_operating_point(operating_point).parse(&Unstoppable) {
        Ok(packets) => packets,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        },
    };

    for p in packets.iter() {
        let layer = p
            .header
            .extension
            .map(|e| format!(" t{} s{}", e.temporal_id, e.spatial_id))
            .unwrap_or_default();
        println!("{}..{} {:?}{}", p.beg, p.end, p.header.obu_type, layer);
        if let ObuContent::SequenceHeader(sh) = &p.content {
            println!(
                "  profile {} {}x{} still={} {}-bit",
                sh.seq_profile, sh.max_frame_width, sh.max_frame_height, sh.still_picture, sh.color_config.bit_depth
            );
            for (i, op) in sh.operating_points.iter().enumerate() {
                println!("  op {} idc={:#x} level={} tier={}", i, op.idc, op.seq_level_idx, op.seq_tier);
            }
        }
    }
}
