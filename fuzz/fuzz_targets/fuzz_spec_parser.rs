#![no_main]

use arbitrary::Arbitrary;
use flatdex::spec::{AimOptions, IndexOptions, parse_stored};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    name_len: u8,
    aim: bool,
    arguments: Vec<String>,
}

fuzz_target!(|input: Input| {
    // Stored arguments come straight from a header block, so any list must
    // either parse or fail cleanly
    let name_len = input.name_len as usize;
    if input.aim {
        if let Ok(spec) = parse_stored::<AimOptions>(name_len, &input.arguments) {
            let _ = spec.validate("fuzz");
            let _ = spec.stored_arguments();
        }
    } else if let Ok(spec) = parse_stored::<IndexOptions>(name_len, &input.arguments) {
        let _ = spec.validate("fuzz");
        let _ = spec.stored_arguments();
    }
});
