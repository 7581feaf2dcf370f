//! Text codecs for bootloader configuration files.
//!
//! Localized SYSLINUX language files are not always UTF-8. Bytes are
//! decoded as UTF-8 first, then Windows-1252, then Latin-1 (which accepts
//! any byte), and the rewritten text is encoded with the same codec that
//! decoded it so non-ASCII strings survive a rewrite untouched.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCodec {
    Utf8,
    Windows1252,
    Latin1,
}

/// Windows-1252 mappings for bytes 0x80..=0x9F. `None` marks bytes the
/// codepage leaves undefined.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), // 0x80 €
    None,             // 0x81
    Some('\u{201A}'), // 0x82 ‚
    Some('\u{0192}'), // 0x83 ƒ
    Some('\u{201E}'), // 0x84 „
    Some('\u{2026}'), // 0x85 …
    Some('\u{2020}'), // 0x86 †
    Some('\u{2021}'), // 0x87 ‡
    Some('\u{02C6}'), // 0x88 ˆ
    Some('\u{2030}'), // 0x89 ‰
    Some('\u{0160}'), // 0x8A Š
    Some('\u{2039}'), // 0x8B ‹
    Some('\u{0152}'), // 0x8C Œ
    None,             // 0x8D
    Some('\u{017D}'), // 0x8E Ž
    None,             // 0x8F
    None,             // 0x90
    Some('\u{2018}'), // 0x91 '
    Some('\u{2019}'), // 0x92 '
    Some('\u{201C}'), // 0x93 "
    Some('\u{201D}'), // 0x94 "
    Some('\u{2022}'), // 0x95 •
    Some('\u{2013}'), // 0x96 –
    Some('\u{2014}'), // 0x97 —
    Some('\u{02DC}'), // 0x98 ˜
    Some('\u{2122}'), // 0x99 ™
    Some('\u{0161}'), // 0x9A š
    Some('\u{203A}'), // 0x9B ›
    Some('\u{0153}'), // 0x9C œ
    None,             // 0x9D
    Some('\u{017E}'), // 0x9E ž
    Some('\u{0178}'), // 0x9F Ÿ
];

/// Decode config file bytes. Always succeeds; the returned codec is the
/// one that must be used to write the text back.
pub fn decode(bytes: &[u8]) -> (String, TextCodec) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), TextCodec::Utf8);
    }
    if let Some(text) = decode_windows_1252(bytes) {
        return (text, TextCodec::Windows1252);
    }
    (decode_latin1(bytes), TextCodec::Latin1)
}

/// Encode text with the codec its file was decoded with. Returns `None`
/// when a character has no representation in the codec.
pub fn encode(text: &str, codec: TextCodec) -> Option<Vec<u8>> {
    match codec {
        TextCodec::Utf8 => Some(text.as_bytes().to_vec()),
        TextCodec::Windows1252 => text.chars().map(encode_windows_1252_char).collect(),
        TextCodec::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect(),
    }
}

fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
            _ => Some(char::from(b)),
        })
        .collect()
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn encode_windows_1252_char(c: char) -> Option<u8> {
    let code = u32::from(c);
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return Some(code as u8);
    }
    CP1252_HIGH
        .iter()
        .position(|&entry| entry == Some(c))
        .map(|index| 0x80 + index as u8)
}
