#![no_main]
use libfuzzer_sys::fuzz_target;
use rar_seek::formats::Signature;
use rar_seek::parsing::{
    ArchiveHeaderParser, Block, FileHeaderParser, MarkerHeaderParser, TerminatorHeaderParser,
};

fuzz_target!(|data: &[u8]| {
    let _ = MarkerHeaderParser::parse(data);
    let _ = MarkerHeaderParser::search(data);
    let _ = ArchiveHeaderParser::parse(data);
    let _ = FileHeaderParser::parse(data);
    let _ = TerminatorHeaderParser::parse(data);

    // The walker only decodes once it knows the full header length.
    if let Ok(Some(len)) = Block::header_len(Signature::Rar15, data) {
        if len <= data.len() {
            let _ = Block::decode(Signature::Rar15, &data[..len]);
        }
    }
});
