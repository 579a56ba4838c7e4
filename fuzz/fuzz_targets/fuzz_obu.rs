#![no_main]
use libfuzzer_sys::fuzz_target;
use zenavif_boxes::obu::ObuParser;

fuzz_target!(|data: &[u8]| {
    let Some((&op, stream)) = data.split_first() else {
        return;
    };
    if let Ok(packets) = ObuParser::new(stream).with_operating_point(usize::from(op & 31)).parse(&enough::Unstoppable) {
        for p in packets.iter() {
            assert!(p.beg < p.end && p.end <= stream.len());
        }
    }
});
