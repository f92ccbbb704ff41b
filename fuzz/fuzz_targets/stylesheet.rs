#![no_main]

use libfuzzer_sys::fuzz_target;

use cascara::{compile_text, CompileOptions, Session};

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }
    let src = String::from_utf8_lossy(data);
    let session = Session::new();
    // No search paths: imports stay unresolved and the compiler never
    // touches the filesystem.
    let options = CompileOptions::default();
    let _ = compile_text(&src, "fuzz.scss", &options, &session);
});
