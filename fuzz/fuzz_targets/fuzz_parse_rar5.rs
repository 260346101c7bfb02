#![no_main]
use libfuzzer_sys::fuzz_target;
use rar_seek::formats::Signature;
use rar_seek::parsing::rar5::{
    CommonHeader, Rar5ArchiveHeaderParser, Rar5EndHeaderParser, Rar5FileHeaderParser,
};
use rar_seek::parsing::Block;

fuzz_target!(|data: &[u8]| {
    let _ = CommonHeader::parse(data);
    let _ = Rar5ArchiveHeaderParser::parse(data);
    let _ = Rar5FileHeaderParser::parse(data);
    let _ = Rar5EndHeaderParser::parse(data);

    if let Ok(Some(len)) = Block::header_len(Signature::Rar50, data) {
        if len <= data.len() {
            let _ = Block::decode(Signature::Rar50, &data[..len]);
        }
    }
});
