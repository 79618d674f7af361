//! GSM 03.38 default alphabet and UCS2 text encoding.

/// data_coding values used for submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCoding {
    /// GSM 03.38 default alphabet, one septet per octet (unpacked)
    Gsm7,
    /// UTF-16BE
    Ucs2,
}

impl DataCoding {
    pub fn code(&self) -> u8 {
        match self {
            DataCoding::Gsm7 => 0x00,
            DataCoding::Ucs2 => 0x08,
        }
    }

    /// UCS2 when the caller asks for it or the text leaves the GSM alphabet
    pub fn for_text(text: &str, unicode_hint: bool) -> Self {
        if unicode_hint || requires_ucs2(text) {
            DataCoding::Ucs2
        } else {
            DataCoding::Gsm7
        }
    }
}

pub const ESCAPE: u8 = 0x1B;

// Index is the septet value; ESCAPE has no character of its own.
const BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

// Extension table: character and the septet following ESCAPE
const EXTENSION: [(char, u8); 10] = [
    ('\u{0C}', 0x0A),
    ('^', 0x14),
    ('{', 0x28),
    ('}', 0x29),
    ('\\', 0x2F),
    ('[', 0x3C),
    ('~', 0x3D),
    (']', 0x3E),
    ('|', 0x40),
    ('€', 0x65),
];

fn basic_septet(c: char) -> Option<u8> {
    if c == '\u{1B}' {
        return None;
    }
    BASIC.iter().position(|b| *b == c).map(|i| i as u8)
}

fn extension_septet(c: char) -> Option<u8> {
    EXTENSION
        .iter()
        .find(|(ch, _)| *ch == c)
        .map(|(_, septet)| *septet)
}

/// Septets needed for `c` in the default alphabet: 1, 2 for an escape pair,
/// or `None` when the character is not representable
pub fn gsm_septets(c: char) -> Option<usize> {
    if basic_septet(c).is_some() {
        Some(1)
    } else if extension_septet(c).is_some() {
        Some(2)
    } else {
        None
    }
}

pub fn requires_ucs2(text: &str) -> bool {
    text.chars().any(|c| gsm_septets(c).is_none())
}

/// Append the septets for `c`; returns false if `c` is not representable
pub fn encode_gsm_char(c: char, out: &mut Vec<u8>) -> bool {
    if let Some(septet) = basic_septet(c) {
        out.push(septet);
        true
    } else if let Some(septet) = extension_septet(c) {
        out.push(ESCAPE);
        out.push(septet);
        true
    } else {
        false
    }
}

pub fn encode_gsm(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        if !encode_gsm_char(c, &mut out) {
            return None;
        }
    }
    Some(out)
}

pub fn encode_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn decode_gsm(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            if let Some(&next) = iter.next() {
                match EXTENSION.iter().find(|(_, s)| *s == next) {
                    Some((c, _)) => text.push(*c),
                    None => text.push(' '),
                }
            }
        } else {
            text.push(BASIC[(b & 0x7F) as usize]);
        }
    }
    text
}

fn decode_ucs2(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decode inbound `short_message` text (receipts) according to data_coding.
/// Codings other than UCS2 and the default alphabet are read as Latin-1/ASCII.
pub fn decode_text(data_coding: u8, bytes: &[u8]) -> String {
    match data_coding {
        0x00 => decode_gsm(bytes),
        0x08 => decode_ucs2(bytes),
        _ => bytes.iter().map(|b| char::from(*b)).collect(),
    }
}
