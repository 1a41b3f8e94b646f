#![no_main]

use libfuzzer_sys::fuzz_target;
use ws_endpoint::frame::{InputFramer, Role};
use ws_endpoint::http;

// Exercises the two parsers that see untrusted bytes directly off the wire:
// the HTTP opening-handshake line/header tokenizer, and the frame parser.
// Neither should panic on any input, complete or truncated.
fuzz_target!(|data: &[u8]| {
    let _ = http::parse_request(data);

    let mut framer = InputFramer::new(Role::Server, None, Some(1 << 20));
    let _ = framer.feed(data);
});
