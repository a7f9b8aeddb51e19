//! Typed, self-delimiting message segments.
//!
//! BMF framing rules, per variant:
//!
//! | Variant | Bytes |
//! |---|---|
//! | Boolean | one byte, [`BMF_FALSE`] or [`BMF_TRUE`] |
//! | Integer | zigzag value; high bits in `0x80 \| 7 bits` groups, low 6 bits in a final `0x40 \| 6 bits` byte |
//! | Float | IEEE-754 bit pattern in the integer group scheme |
//! | String | [`STRING_MARKER`], each ASCII character OR'd with `0x80`, [`BLOB_TERMINATOR`] |
//! | String (non-ASCII) | [`PACKED_STRING_MARKER`], UTF-8 bytes re-packed as `0x80 \| 7 bits` chunks, [`BLOB_TERMINATOR`] |
//! | Route | see [`crate::route`] |
//! | Vector | [`VECTOR_MARKER`], raw bytes re-packed like a non-ASCII String, [`BLOB_TERMINATOR`] |
//!
//! Every segment therefore ends at the first byte with bit 7 clear (after the
//! String/Vector marker), and that byte is never zero.

use serde::{Deserialize, Serialize};

use crate::bits::{ChunkReader, ChunkWriter, CHUNK_BITS, CHUNK_MASK, MORE};
use crate::encoding::Encoding;
use crate::error::{WireError, WireResult};
use crate::route::RouteBits;
use crate::store::MessageStore;

/// Protocol-level boolean false.
pub const BMF_FALSE: u8 = 2;
/// Protocol-level boolean true.
pub const BMF_TRUE: u8 = 3;
/// Leading byte of a String segment.
pub const STRING_MARKER: u8 = 1;
/// Leading byte of a Vector segment.
pub const VECTOR_MARKER: u8 = 5;
/// Leading byte of a String segment holding non-ASCII text. A single-byte
/// route is always a multiple of 4, so this never starts a route.
pub const PACKED_STRING_MARKER: u8 = 6;
/// Final byte of String and Vector segments.
pub const BLOB_TERMINATOR: u8 = 1;

const FINAL_GROUP: u8 = 0x40;
const FINAL_BITS: u32 = 6;
const FINAL_MASK: u8 = 0x3f;

/// The variant tag of a segment, as declared by a variable's message shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Boolean,
    Integer,
    Float,
    String,
    Route,
    Vector,
}

/// A single wire-representable value.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Route(RouteBits),
    Vector(Vec<u8>),
}

impl Segment {
    /// The variant tag of this value.
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Boolean(_) => SegmentKind::Boolean,
            Segment::Integer(_) => SegmentKind::Integer,
            Segment::Float(_) => SegmentKind::Float,
            Segment::Str(_) => SegmentKind::String,
            Segment::Route(_) => SegmentKind::Route,
            Segment::Vector(_) => SegmentKind::Vector,
        }
    }

    /// Write this value into `store[index]` using the store's encoding.
    pub fn encode(&self, store: &mut MessageStore, index: usize) -> WireResult<()> {
        let bytes = self.to_wire(store.encoding());
        store.set(index, bytes)
    }

    /// Decode one segment whose start and length the caller has already located.
    pub fn decode(kind: SegmentKind, raw: &[u8], encoding: Encoding) -> WireResult<Segment> {
        match encoding {
            Encoding::Bmf => Self::from_bmf(kind, raw),
            Encoding::Pml => Self::from_pml(kind, raw),
        }
    }

    /// Encode in either encoding.
    pub fn to_wire(&self, encoding: Encoding) -> Vec<u8> {
        match encoding {
            Encoding::Bmf => self.to_bmf(),
            Encoding::Pml => self.to_pml(),
        }
    }

    /// BMF bytes of this value, framed as in the module table.
    pub fn to_bmf(&self) -> Vec<u8> {
        match self {
            Segment::Boolean(v) => vec![if *v { BMF_TRUE } else { BMF_FALSE }],
            Segment::Integer(v) => encode_groups(zigzag(*v)),
            Segment::Float(v) => encode_groups(v.to_bits()),
            Segment::Str(s) if s.is_ascii() => encode_ascii(s),
            Segment::Str(s) => encode_blob(PACKED_STRING_MARKER, s.as_bytes()),
            Segment::Route(r) => r.to_bytes(),
            Segment::Vector(v) => encode_blob(VECTOR_MARKER, v),
        }
    }

    /// Decode exactly one BMF segment of `kind`.
    pub fn from_bmf(kind: SegmentKind, raw: &[u8]) -> WireResult<Segment> {
        match kind {
            SegmentKind::Boolean => match raw {
                [byte] => decode_bool(*byte).map(Segment::Boolean),
                [] | [0, ..] => Err(WireError::Truncated),
                [byte, ..] => Err(WireError::InvalidBoolean(*byte)),
            },
            SegmentKind::Integer => decode_groups(raw).map(|v| Segment::Integer(unzigzag(v))),
            SegmentKind::Float => decode_groups(raw).map(|v| Segment::Float(f64::from_bits(v))),
            SegmentKind::String => {
                let bytes = match raw.first() {
                    Some(&PACKED_STRING_MARKER) => decode_blob(PACKED_STRING_MARKER, raw)?,
                    _ => decode_ascii(raw)?,
                };
                String::from_utf8(bytes)
                    .map(Segment::Str)
                    .map_err(|_| WireError::InvalidUtf8)
            }
            SegmentKind::Route => RouteBits::from_bytes(raw).map(Segment::Route),
            SegmentKind::Vector => decode_blob(VECTOR_MARKER, raw).map(Segment::Vector),
        }
    }

    /// PML text of this value.
    pub fn to_pml(&self) -> Vec<u8> {
        match self {
            Segment::Boolean(v) => (if *v { "true" } else { "false" }).into(),
            Segment::Integer(v) => v.to_string().into_bytes(),
            Segment::Float(v) => v.to_string().into_bytes(),
            Segment::Str(s) => s.clone().into_bytes(),
            Segment::Route(r) => r.to_text().into_bytes(),
            Segment::Vector(v) => v
                .iter()
                .flat_map(|b| [b'A' + (b >> 4), b'A' + (b & 0x0f)])
                .collect(),
        }
    }

    /// Parse the PML text of one segment of `kind`.
    pub fn from_pml(kind: SegmentKind, raw: &[u8]) -> WireResult<Segment> {
        let text = std::str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8)?;
        match kind {
            SegmentKind::Boolean => match text {
                "true" => Ok(Segment::Boolean(true)),
                "false" => Ok(Segment::Boolean(false)),
                other => Err(WireError::InvalidText(format!("not a boolean: {other:?}"))),
            },
            SegmentKind::Integer => text
                .parse()
                .map(Segment::Integer)
                .map_err(|e| WireError::InvalidText(format!("integer {text:?}: {e}"))),
            SegmentKind::Float => text
                .parse()
                .map(Segment::Float)
                .map_err(|e| WireError::InvalidText(format!("float {text:?}: {e}"))),
            SegmentKind::String => Ok(Segment::Str(text.to_owned())),
            SegmentKind::Route => RouteBits::from_text(text).map(Segment::Route),
            SegmentKind::Vector => {
                if raw.len() % 2 != 0 {
                    return Err(WireError::InvalidText("odd vector text length".into()));
                }
                raw.chunks(2)
                    .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
                    .collect::<WireResult<Vec<u8>>>()
                    .map(Segment::Vector)
            }
        }
    }
}

impl From<bool> for Segment {
    fn from(v: bool) -> Self {
        Segment::Boolean(v)
    }
}

impl From<i64> for Segment {
    fn from(v: i64) -> Self {
        Segment::Integer(v)
    }
}

impl From<f64> for Segment {
    fn from(v: f64) -> Self {
        Segment::Float(v)
    }
}

impl From<&str> for Segment {
    fn from(v: &str) -> Self {
        Segment::Str(v.to_owned())
    }
}

impl From<String> for Segment {
    fn from(v: String) -> Self {
        Segment::Str(v)
    }
}

impl From<RouteBits> for Segment {
    fn from(v: RouteBits) -> Self {
        Segment::Route(v)
    }
}

/// Length in bytes of a BMF segment of `kind` starting at `buf[0]`.
pub fn wire_length(kind: SegmentKind, buf: &[u8]) -> WireResult<usize> {
    match kind {
        SegmentKind::Boolean => match buf.first() {
            None | Some(0) => Err(WireError::Truncated),
            Some(&byte) => decode_bool(byte).map(|_| 1),
        },
        SegmentKind::Integer | SegmentKind::Float | SegmentKind::Route => scan_terminal(buf),
        SegmentKind::String => marked_length(&[STRING_MARKER, PACKED_STRING_MARKER], buf),
        SegmentKind::Vector => marked_length(&[VECTOR_MARKER], buf),
    }
}

/// Length in bytes of the BMF segment starting at `buf[0]`, whatever its kind.
///
/// This is how payloads of unknown shape are stepped over when forwarding.
pub fn frame_len(buf: &[u8]) -> WireResult<usize> {
    match buf.first() {
        None | Some(0) => Err(WireError::Truncated),
        Some(&STRING_MARKER) | Some(&PACKED_STRING_MARKER) | Some(&VECTOR_MARKER) => {
            Ok(1 + scan_terminal(&buf[1..])?)
        }
        Some(_) => scan_terminal(buf),
    }
}

fn marked_length(markers: &[u8], buf: &[u8]) -> WireResult<usize> {
    match buf.first() {
        None | Some(0) => Err(WireError::Truncated),
        Some(b) if markers.contains(b) => Ok(1 + scan_terminal(&buf[1..])?),
        Some(_) => Err(WireError::MalformedString),
    }
}

fn scan_terminal(buf: &[u8]) -> WireResult<usize> {
    for (i, &byte) in buf.iter().enumerate() {
        if byte == 0 {
            return Err(WireError::Truncated);
        }
        if byte & MORE == 0 {
            return Ok(i + 1);
        }
    }
    Err(WireError::Truncated)
}

fn decode_bool(byte: u8) -> WireResult<bool> {
    match byte & !MORE {
        BMF_FALSE => Ok(false),
        BMF_TRUE => Ok(true),
        _ => Err(WireError::InvalidBoolean(byte)),
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn encode_groups(value: u64) -> Vec<u8> {
    let mut high = value >> FINAL_BITS;
    let mut groups = Vec::with_capacity(10);
    while high != 0 {
        groups.push(MORE | (high as u8 & 0x7f));
        high >>= CHUNK_BITS;
    }
    groups.reverse();
    groups.push(FINAL_GROUP | (value as u8 & FINAL_MASK));
    groups
}

fn decode_groups(raw: &[u8]) -> WireResult<u64> {
    let (&last, head) = raw.split_last().ok_or(WireError::Truncated)?;
    if last == 0 {
        return Err(WireError::Truncated);
    }
    if last & (MORE | FINAL_GROUP) != FINAL_GROUP {
        return Err(WireError::MalformedInteger);
    }
    let mut acc = 0u64;
    for &byte in head {
        if byte & MORE == 0 || acc >> (64 - CHUNK_BITS) != 0 {
            return Err(WireError::MalformedInteger);
        }
        acc = (acc << CHUNK_BITS) | u64::from(byte & 0x7f);
    }
    if acc >> (64 - FINAL_BITS) != 0 {
        return Err(WireError::MalformedInteger);
    }
    Ok((acc << FINAL_BITS) | u64::from(last & FINAL_MASK))
}

fn encode_ascii(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(STRING_MARKER);
    out.extend(text.bytes().map(|c| c | MORE));
    out.push(BLOB_TERMINATOR);
    out
}

fn decode_ascii(raw: &[u8]) -> WireResult<Vec<u8>> {
    match raw {
        [STRING_MARKER, chars @ .., BLOB_TERMINATOR] if chars.iter().all(|c| c & MORE != 0) => {
            Ok(chars.iter().map(|c| c & CHUNK_MASK).collect())
        }
        [] | [_] => Err(WireError::Truncated),
        _ => Err(WireError::MalformedString),
    }
}

fn encode_blob(marker: u8, data: &[u8]) -> Vec<u8> {
    let mut writer = ChunkWriter::with_capacity(data.len() * 8 / CHUNK_BITS as usize + 3);
    for &byte in data {
        writer.push(byte, 8);
    }
    let packed = writer.finish_padded();
    let mut out = Vec::with_capacity(packed.len() + 2);
    out.push(marker);
    out.extend_from_slice(&packed);
    out.push(BLOB_TERMINATOR);
    out
}

fn decode_blob(marker: u8, raw: &[u8]) -> WireResult<Vec<u8>> {
    let (&first, rest) = raw.split_first().ok_or(WireError::Truncated)?;
    let (&last, chunks) = rest.split_last().ok_or(WireError::Truncated)?;
    if first != marker || last != BLOB_TERMINATOR || chunks.iter().any(|b| b & MORE == 0) {
        return Err(WireError::MalformedString);
    }
    let mut reader = ChunkReader::new(chunks);
    let mut bytes = Vec::with_capacity(reader.remaining_bits() / 8);
    while reader.remaining_bits() >= 8 {
        bytes.push(reader.read(8));
    }
    if reader.remaining_bits() >= CHUNK_BITS as usize || !reader.rest_is_zero() {
        return Err(WireError::MalformedString);
    }
    Ok(bytes)
}

fn nibble(letter: u8) -> WireResult<u8> {
    match letter {
        b'A'..=b'P' => Ok(letter - b'A'),
        other => Err(WireError::InvalidText(format!(
            "not a nibble letter: {:?}",
            char::from(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn framed(segment: &Segment) -> (Vec<u8>, usize, usize) {
        let bytes = segment.to_bmf();
        let typed = wire_length(segment.kind(), &bytes).unwrap();
        let generic = frame_len(&bytes).unwrap();
        (bytes, typed, generic)
    }

    fn assert_self_delimiting(segment: Segment) {
        let (bytes, typed, generic) = framed(&segment);
        assert_eq!(typed, bytes.len(), "{segment:?}");
        assert_eq!(generic, bytes.len(), "{segment:?}");
        assert!(bytes.iter().all(|b| *b != 0), "{segment:?} contains a zero byte");
        assert_eq!(Segment::from_bmf(segment.kind(), &bytes).unwrap(), segment);
    }

    #[test]
    fn boolean_is_one_byte() {
        assert_eq!(Segment::Boolean(false).to_bmf(), vec![BMF_FALSE]);
        assert_eq!(Segment::Boolean(true).to_bmf(), vec![BMF_TRUE]);
        assert_self_delimiting(Segment::Boolean(true));
        assert_self_delimiting(Segment::Boolean(false));
    }

    #[test]
    fn malformed_boolean_is_rejected() {
        assert_eq!(
            Segment::from_bmf(SegmentKind::Boolean, &[7]),
            Err(WireError::InvalidBoolean(7))
        );
        assert_eq!(
            wire_length(SegmentKind::Boolean, &[0x44]),
            Err(WireError::InvalidBoolean(0x44))
        );
        assert_eq!(wire_length(SegmentKind::Boolean, &[0]), Err(WireError::Truncated));
    }

    #[test]
    fn integer_boundaries_frame_exactly() {
        for v in [0, -1, 1, 63, 64, -64, i64::MAX, i64::MIN] {
            assert_self_delimiting(Segment::Integer(v));
        }
        assert_eq!(Segment::Integer(0).to_bmf(), vec![0x40]);
        assert_eq!(Segment::Integer(i64::MIN).to_bmf().len(), 10);
    }

    #[test]
    fn integer_overflow_is_rejected() {
        let mut raw = vec![0xff; 10];
        raw.push(0x7f);
        assert_eq!(
            Segment::from_bmf(SegmentKind::Integer, &raw),
            Err(WireError::MalformedInteger)
        );
    }

    #[test]
    fn integer_without_final_marker_is_rejected() {
        assert_eq!(
            Segment::from_bmf(SegmentKind::Integer, &[0x81, 0x05]),
            Err(WireError::MalformedInteger)
        );
    }

    #[test]
    fn strings_frame_exactly() {
        assert_self_delimiting(Segment::Str(String::new()));
        assert_self_delimiting(Segment::Str("a".into()));
        assert_self_delimiting(Segment::Str("x".repeat(300)));
        assert_self_delimiting(Segment::Str("grüße, 世界".into()));
    }

    #[test]
    fn empty_string_is_marker_and_terminator() {
        assert_eq!(
            Segment::Str(String::new()).to_bmf(),
            vec![STRING_MARKER, BLOB_TERMINATOR]
        );
    }

    #[test]
    fn ascii_string_is_characters_with_high_bit() {
        assert_eq!(Segment::Str("hi".into()).to_bmf(), vec![0x01, 0xe8, 0xe9, 0x01]);
        assert_eq!(
            Segment::from_bmf(SegmentKind::String, &[0x01, 0xe8, 0xe9, 0x01]).unwrap(),
            Segment::Str("hi".into())
        );
    }

    #[test]
    fn non_ascii_string_uses_packed_marker() {
        let bytes = Segment::Str("é".into()).to_bmf();
        assert_eq!(bytes[0], PACKED_STRING_MARKER);
        assert_eq!(frame_len(&bytes).unwrap(), bytes.len());
        assert_eq!(
            Segment::from_bmf(SegmentKind::String, &bytes).unwrap(),
            Segment::Str("é".into())
        );
    }

    #[test]
    fn string_without_high_bit_characters_is_malformed() {
        assert_eq!(
            Segment::from_bmf(SegmentKind::String, &[0x01, 0x68, 0x01]),
            Err(WireError::MalformedString)
        );
    }

    #[test]
    fn single_byte_routes_never_look_like_markers() {
        for port in 0..8 {
            let bytes = RouteBits::from_ports([port]).to_bytes();
            assert_eq!(bytes.len(), 1);
            assert!(![STRING_MARKER, VECTOR_MARKER, PACKED_STRING_MARKER].contains(&bytes[0]));
        }
    }

    #[test]
    fn routes_frame_exactly() {
        assert_self_delimiting(Segment::Route(RouteBits::empty()));
        assert_self_delimiting(Segment::Route(RouteBits::from_ports([3])));
        assert_self_delimiting(Segment::Route(RouteBits::from_ports(0..16)));
    }

    #[test]
    fn floats_and_vectors_frame_exactly() {
        for v in [0.0, -0.0, 1.5, f64::MAX, f64::MIN_POSITIVE, f64::INFINITY] {
            assert_self_delimiting(Segment::Float(v));
        }
        assert_self_delimiting(Segment::Vector(vec![]));
        assert_self_delimiting(Segment::Vector(vec![0, 0, 0, 255]));
    }

    #[test]
    fn truncated_segment_is_detected() {
        let mut bytes = Segment::Str("hello".into()).to_bmf();
        bytes.truncate(3);
        bytes.push(0);
        assert_eq!(frame_len(&bytes), Err(WireError::Truncated));
        assert_eq!(wire_length(SegmentKind::String, &bytes), Err(WireError::Truncated));
    }

    #[test]
    fn frame_len_stops_at_first_segment() {
        let mut buf = Segment::Str("ab".into()).to_bmf();
        let first = buf.len();
        buf.extend(Segment::Integer(-9).to_bmf());
        buf.extend(Segment::Boolean(true).to_bmf());
        buf.push(0);
        assert_eq!(frame_len(&buf).unwrap(), first);
        assert_eq!(frame_len(&buf[first..]).unwrap(), 1);
    }

    #[test]
    fn pml_forms() {
        assert_eq!(Segment::Boolean(true).to_pml(), b"true");
        assert_eq!(Segment::Integer(-42).to_pml(), b"-42");
        assert_eq!(Segment::Vector(vec![0x1f]).to_pml(), b"BP");
        assert_eq!(
            Segment::from_pml(SegmentKind::Route, b"D").unwrap(),
            Segment::Route(RouteBits::from_ports([3]))
        );
        assert!(Segment::from_pml(SegmentKind::Boolean, b"yes").is_err());
    }

    #[test]
    fn encode_respects_store_encoding() {
        let mut store = MessageStore::new(Encoding::Pml, 1);
        Segment::Integer(7).encode(&mut store, 0).unwrap();
        assert_eq!(store.get(0).unwrap(), b"7");
    }

    proptest! {
        #[test]
        fn integers_are_self_delimiting(v in any::<i64>()) {
            let bytes = Segment::Integer(v).to_bmf();
            prop_assert_eq!(frame_len(&bytes).unwrap(), bytes.len());
            prop_assert_eq!(Segment::from_bmf(SegmentKind::Integer, &bytes).unwrap(), Segment::Integer(v));
        }

        #[test]
        fn vectors_are_self_delimiting(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let bytes = Segment::Vector(data.clone()).to_bmf();
            prop_assert!(bytes.iter().all(|b| *b != 0));
            prop_assert_eq!(frame_len(&bytes).unwrap(), bytes.len());
            prop_assert_eq!(Segment::from_bmf(SegmentKind::Vector, &bytes).unwrap(), Segment::Vector(data));
        }
    }
}
