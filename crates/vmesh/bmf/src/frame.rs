//! Reading the core `[route][vnid][payload]*` unit of a BMF message.

use bytes::Bytes;
use vmesh_wire::{
    vnid_from_integer, Cursor, Encoding, MessageStore, RouteBits, Segment, SegmentKind, Vnid,
    WireError, WireResult,
};

use crate::envelope::{IntelligentEnvelope, INTELLIGENT_FLAG};
use crate::error::DispatchError;

/// Decode the route and VNID segments at the cursor.
pub fn decode_header(cursor: &mut Cursor<'_>) -> WireResult<(RouteBits, Vnid)> {
    let route = RouteBits::from_bytes(cursor.take_segment_of(SegmentKind::Route)?)?;
    let raw = cursor.take_segment_of(SegmentKind::Integer)?;
    match Segment::from_bmf(SegmentKind::Integer, raw)? {
        Segment::Integer(value) => Ok((route, vnid_from_integer(value)?)),
        _ => Err(WireError::MalformedInteger),
    }
}

/// Every remaining segment up to the terminator, copied verbatim.
pub fn take_payload(cursor: &mut Cursor<'_>) -> WireResult<MessageStore> {
    let mut segments = Vec::new();
    while !cursor.at_end() {
        segments.push(Bytes::copy_from_slice(cursor.take_segment()?));
    }
    Ok(MessageStore::from_segments(Encoding::Bmf, segments))
}

/// Exactly `count` segments, as declared by the receiving variable.
pub fn take_declared(cursor: &mut Cursor<'_>, count: usize) -> WireResult<MessageStore> {
    let segments = (0..count)
        .map(|_| cursor.take_segment().map(Bytes::copy_from_slice))
        .collect::<WireResult<Vec<_>>>()?;
    Ok(MessageStore::from_segments(Encoding::Bmf, segments))
}

/// One message as it appears on the wire, without any routing applied.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub envelope: Option<IntelligentEnvelope>,
    pub route: RouteBits,
    pub vnid: Vnid,
    /// Everything after the header up to the terminator. For a burst this
    /// includes the later units' headers.
    pub payload: MessageStore,
}

/// Parse a whole buffer into a [`Frame`] for inspection.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, DispatchError> {
    let mut cursor = Cursor::new(buf);
    let envelope = match cursor.peek() {
        Some(byte) if byte & INTELLIGENT_FLAG != 0 => {
            let envelope = IntelligentEnvelope::decode(&mut cursor)?;
            envelope.validate()?;
            Some(envelope).filter(|e| !e.is_empty())
        }
        _ => None,
    };
    let (route, vnid) = decode_header(&mut cursor)?;
    let payload = take_payload(&mut cursor)?;
    Ok(Frame {
        envelope,
        route,
        vnid,
        payload,
    })
}
