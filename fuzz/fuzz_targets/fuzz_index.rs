#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use rar_seek::{HeaderParser, MemoryCatalog, VolumeSet};

// Walk an arbitrary single volume; every failure must surface as an error.
fuzz_target!(|data: &[u8]| {
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    runtime.block_on(async {
        let catalog = MemoryCatalog::new().with_volume("fuzz.rar", data.to_vec());
        let Some(first) = catalog.locator("fuzz.rar") else {
            return;
        };
        let Ok(volumes) = VolumeSet::open_with(first, Arc::new(catalog)).await else {
            return;
        };
        let _ = HeaderParser::parse_partial(&volumes).await;
    });
});
