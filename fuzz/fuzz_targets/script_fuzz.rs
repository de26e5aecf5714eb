//! Script fuzz target: compile arbitrary text, then run it over the same bytes.
//! Neither step may panic. Build with: cargo fuzz run script_fuzz (nightly).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(parser) = binblock::ParserBuilder::new()
        .array_limit(binblock::ArrayLimit::Truncate(4096))
        .build(text)
    else {
        return;
    };
    let _ = parser.block().disassemble();
    let _ = parser.parse_bytes(data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run script_fuzz");
}
