//! Read position over a received BMF buffer.

use crate::error::{WireError, WireResult};
use crate::segment::{frame_len, wire_length, SegmentKind};

/// A forward-only cursor over one inbound buffer.
///
/// The buffer may end with a `0x00` terminator; [`Cursor::at_end`] treats that
/// byte and the physical end alike.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread tail of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// The next byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// True at the physical end or at a zero terminator.
    pub fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(0))
    }

    /// Consume one byte. Running off the end of the buffer is truncation.
    pub fn take_byte(&mut self) -> WireResult<u8> {
        let byte = self.peek().ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Take the next segment without knowing its kind.
    pub fn take_segment(&mut self) -> WireResult<&'a [u8]> {
        let len = frame_len(self.remaining())?;
        Ok(self.advance(len))
    }

    /// Take the next segment, validating its framing against `kind`.
    pub fn take_segment_of(&mut self, kind: SegmentKind) -> WireResult<&'a [u8]> {
        let len = wire_length(kind, self.remaining())?;
        Ok(self.advance(len))
    }

    fn advance(&mut self, len: usize) -> &'a [u8] {
        let start = self.pos;
        self.pos += len;
        &self.buf[start..self.pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;

    #[test]
    fn walks_consecutive_segments() {
        let mut buf = Segment::Integer(300).to_bmf();
        buf.extend(Segment::Str("hey".into()).to_bmf());
        buf.push(0);

        let mut cursor = Cursor::new(&buf);
        let first = cursor.take_segment_of(SegmentKind::Integer).unwrap();
        assert_eq!(
            Segment::from_bmf(SegmentKind::Integer, first).unwrap(),
            Segment::Integer(300)
        );
        let second = cursor.take_segment().unwrap();
        assert_eq!(
            Segment::from_bmf(SegmentKind::String, second).unwrap(),
            Segment::Str("hey".into())
        );
        assert!(cursor.at_end());
        assert_eq!(cursor.position(), buf.len() - 1);
    }

    #[test]
    fn empty_buffer_is_at_end() {
        let mut cursor = Cursor::new(&[]);
        assert!(cursor.at_end());
        assert_eq!(cursor.take_byte(), Err(WireError::Truncated));
        assert_eq!(cursor.take_segment(), Err(WireError::Truncated));
    }

    #[test]
    fn failed_take_does_not_move() {
        let buf = [0x81, 0x82];
        let mut cursor = Cursor::new(&buf);
        assert!(cursor.take_segment().is_err());
        assert_eq!(cursor.position(), 0);
    }
}
