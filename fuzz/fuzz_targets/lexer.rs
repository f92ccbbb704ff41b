#![no_main]

use libfuzzer_sys::fuzz_target;

use cascara::{Lexer, NodeType, Session};

fuzz_target!(|data: &[u8]| {
    // Avoid pathological allocations in the harness itself; libFuzzer will still mutate below this.
    if data.len() > 64 * 1024 {
        return;
    }
    let src = String::from_utf8_lossy(data);
    let session = Session::new();
    let mut lexer = Lexer::new(&src, "fuzz.scss", &session);
    loop {
        let token = lexer.next_token();
        if token.is(NodeType::Eof) {
            break;
        }
    }
});
