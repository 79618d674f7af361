use crate::encoding::{encode_gsm, encode_gsm_char, encode_ucs2, gsm_septets, DataCoding};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const GSM_SINGLE_SEPTETS: usize = 160;
pub const GSM_PART_SEPTETS: usize = 153;
pub const UCS2_SINGLE_UNITS: usize = 70;
pub const UCS2_PART_UNITS: usize = 67;
pub const MAX_PARTS: usize = 255;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SegmentError {
    #[error("character {0:?} is not in the GSM 03.38 alphabet")]
    NotRepresentable(char),

    #[error("message needs {0} parts, at most {MAX_PARTS} are allowed")]
    TooManyParts(usize),
}

/// Split `text` into `short_message` payloads for `coding`.
///
/// A message that fits one PDU is returned as a single part without a
/// header. Longer messages get a concatenation UDH
/// (`05 00 03 <reference> <total> <index>`) on every part; escape pairs and
/// surrogate pairs are never split across parts.
pub fn segment_message(
    text: &str,
    coding: DataCoding,
    reference: u8,
) -> Result<Vec<Bytes>, SegmentError> {
    let chunks = match coding {
        DataCoding::Gsm7 => gsm_chunks(text)?,
        DataCoding::Ucs2 => ucs2_chunks(text),
    };

    if chunks.len() == 1 {
        return Ok(chunks.into_iter().map(Bytes::from).collect());
    }
    if chunks.len() > MAX_PARTS {
        return Err(SegmentError::TooManyParts(chunks.len()));
    }

    let total = chunks.len() as u8;
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut part = BytesMut::with_capacity(6 + chunk.len());
            part.put_slice(&[0x05, 0x00, 0x03, reference, total, (i + 1) as u8]);
            part.put_slice(&chunk);
            part.freeze()
        })
        .collect())
}

fn gsm_chunks(text: &str) -> Result<Vec<Vec<u8>>, SegmentError> {
    let mut total = 0;
    for c in text.chars() {
        total += gsm_septets(c).ok_or(SegmentError::NotRepresentable(c))?;
    }

    if total <= GSM_SINGLE_SEPTETS {
        let single = encode_gsm(text).unwrap_or_default();
        return Ok(vec![single]);
    }

    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(GSM_PART_SEPTETS);
    for c in text.chars() {
        let cost = gsm_septets(c).unwrap_or(1);
        if current.len() + cost > GSM_PART_SEPTETS {
            chunks.push(std::mem::take(&mut current));
        }
        encode_gsm_char(c, &mut current);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

fn ucs2_chunks(text: &str) -> Vec<Vec<u8>> {
    let units = text.encode_utf16().count();
    if units <= UCS2_SINGLE_UNITS {
        return vec![encode_ucs2(text)];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_units = 0;
    for c in text.chars() {
        let cost = c.len_utf16();
        if current_units + cost > UCS2_PART_UNITS {
            chunks.push(encode_ucs2(&current));
            current.clear();
            current_units = 0;
        }
        current.push(c);
        current_units += cost;
    }
    if !current.is_empty() {
        chunks.push(encode_ucs2(&current));
    }
    chunks
}
