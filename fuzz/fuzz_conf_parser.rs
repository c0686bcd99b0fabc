//! Fuzz target for the daemon `key=value` conf parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_conf_parser

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let contents = String::from_utf8_lossy(data);
    let config = hempconnect_config::conf::parse_conf(&contents, Path::new("/fuzz/THC.conf"));
    assert_eq!(config.host, "127.0.0.1");
    assert!(config.uses_conf_file);
});
