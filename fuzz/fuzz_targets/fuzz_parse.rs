#![no_main]
use libfuzzer_sys::fuzz_target;
use zenavif_boxes::{
    FileBox, FullBoxHeader, HandlerBox, ItemInfoBox, ItemPropertiesBox, ItemReferenceBox, ParseConfig, PrimaryItemBox,
    query,
};

type MetaParts<'a> = (
    &'a FullBoxHeader,
    &'a HandlerBox,
    &'a ItemPropertiesBox,
    &'a ItemInfoBox,
    &'a Option<PrimaryItemBox>,
    &'a Option<ItemReferenceBox>,
    Option<&'a [u8]>,
);

/// Everything in `meta` that does not depend on where `mdat` ends up.
fn meta_parts(file: &FileBox) -> Option<MetaParts<'_>> {
    file.meta.as_ref().map(|m| {
        (
            &m.header,
            &m.handler,
            &m.item_properties,
            &m.item_info,
            &m.primary_item,
            &m.item_reference,
            m.item_data.as_deref(),
        )
    })
}

fuzz_target!(|data: &[u8]| {
    let config = ParseConfig::default().with_peak_memory_limit(16 * 1024 * 1024);
    let Ok(file) = zenavif_boxes::parse_with_config(data, &config, &enough::Unstoppable) else {
        return;
    };
    let _ = query::primary_item_metadata(&file, data);

    // Anything accepted and written must parse back with the same items
    let Ok(written) = zenavif_boxes::write(&file) else {
        return;
    };
    let Ok(reparsed) = zenavif_boxes::parse_with_config(&written, &config, &enough::Unstoppable) else {
        return;
    };
    assert_eq!(reparsed.file_type, file.file_type);
    assert_eq!(meta_parts(&reparsed), meta_parts(&file));
    assert_eq!(reparsed.media_data.len(), file.media_data.len());
    for (a, b) in reparsed.media_data.iter().zip(file.media_data.iter()) {
        assert_eq!(a.data[..], b.data[..]);
    }
    if let Some(meta) = &file.meta {
        for item in meta.item_location.items.iter() {
            let before = query::item_data(&file, data, item.item_id).ok();
            let after = query::item_data(&reparsed, &written, item.item_id).ok();
            assert_eq!(before, after, "item {}", item.item_id);
        }
    }

    // and writing the rewritten tree changes nothing
    let again = zenavif_boxes::write(&reparsed).expect("rewritten tree must write");
    assert_eq!(again[..], written[..]);
});
