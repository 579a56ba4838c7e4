//! Print the box tree of an AVIF file
use std::env;

use zenavif_boxes::{MetaBox, query};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <avif-file>", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to open {path}: {e}");
            std::process::exit(1);
        },
    };
    let file = match zenavif_boxes::parse(&data) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        },
    };

    let ftyp = &file.file_type;
    let brands: Vec<_> = ftyp.compatible_brands.iter().map(|b| b.to_string()).collect();
    println!("ftyp {} minor={} compatible=[{}]", ftyp.major_brand, ftyp.minor_version, brands.join(", "));

    match &file.meta {
        Some(meta) => print_meta(meta),
        None => println!("no meta"),
    }
    for mdat in file.media_data.iter() {
        println!("mdat at {} {} bytes", mdat.offset, mdat.data.len());
    }

    match query::primary_item_metadata(&file, &data) {
        Ok(md) => println!("primary item: {md:?}"),
        Err(e) => println!("primary item: {e}"),
    }
}

fn print_meta(meta: &MetaBox) {
    println!("meta v{}", meta.header.version);
    println!(
        "  hdlr {} name={:?}",
        meta.handler.handler_type,
        String::from_utf8_lossy(&meta.handler.name)
    );

    println!("  iprp");
    for (i, property) in meta.item_properties.properties.properties.iter().enumerate() {
        println!("    [{}] {}", i + 1, property.box_type());
    }
    for ipma in meta.item_properties.associations.iter() {
        println!("    ipma v{} flags={}", ipma.header.version, ipma.header.flags);
        for item in ipma.items.iter() {
            let entries: Vec<_> = item
                .entries
                .iter()
                .map(|e| format!("{}{}", e.property_index, if e.essential { "!" } else { "" }))
                .collect();
            println!("      item {} -> {}", item.item_id, entries.join(" "));
        }
    }

    println!("  iinf v{}", meta.item_info.header.version);
    for entry in meta.item_info.entries.iter() {
        let item_type = entry.item_type.map(|t| t.to_string()).unwrap_or_default();
        println!(
            "    infe v{} id={} type={} name={:?}",
            entry.header.version,
            entry.item_id,
            item_type,
            String::from_utf8_lossy(&entry.item_name)
        );
    }

    println!("  iloc v{}", meta.item_location.header.version);
    for item in meta.item_location.items.iter() {
        println!("    item {} {:?} base={}", item.item_id, item.construction_method, item.base_offset);
        for extent in item.extents.iter() {
            println!("      {}+{}", extent.extent_offset, extent.extent_length);
        }
    }

    if let Some(pitm) = &meta.primary_item {
        println!("  pitm {}", pitm.item_id);
    }
    if let Some(iref) = &meta.item_reference {
        println!("  iref v{}", iref.header.version);
        for r in iref.references.iter() {
            println!("    {} {} -> {}", r.reference_type, r.from_item_id, r.to_item_id);
        }
    }
    if let Some(idat) = &meta.item_data {
        println!("  idat {} bytes", idat.len());
    }
}
