//! Indexed container of encoded segments.

use bytes::Bytes;

use crate::encoding::Encoding;
use crate::error::{WireError, WireResult};
use crate::segment::{Segment, SegmentKind};

/// The raw encoded segments of one message, all in one [`Encoding`].
///
/// Slots start empty and are filled by [`Segment::encode`]. Stored bytes are
/// reference counted, so cloning a store to hand it to several receivers
/// does not copy payload data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStore {
    encoding: Encoding,
    slots: Vec<Option<Bytes>>,
}

impl MessageStore {
    /// A store with `count` empty slots.
    pub fn new(encoding: Encoding, count: usize) -> Self {
        Self {
            encoding,
            slots: vec![None; count],
        }
    }

    /// Wrap already-encoded segments, e.g. slices taken from a received buffer.
    pub fn from_segments<I>(encoding: Encoding, segments: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self {
            encoding,
            slots: segments.into_iter().map(Some).collect(),
        }
    }

    /// Encode `values` in order.
    pub fn from_values(encoding: Encoding, values: &[Segment]) -> WireResult<Self> {
        let mut store = Self::new(encoding, values.len());
        for (index, value) in values.iter().enumerate() {
            value.encode(&mut store, index)?;
        }
        Ok(store)
    }

    /// Encoding every slot is written in.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of slots, written or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for a store with no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write already-encoded bytes into slot `index`.
    pub fn set(&mut self, index: usize, bytes: impl Into<Bytes>) -> WireResult<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(WireError::SlotOutOfRange { index, len })?;
        *slot = Some(bytes.into());
        Ok(())
    }

    /// Encoded bytes of slot `index`; fails if the slot is out of range or unwritten.
    pub fn get(&self, index: usize) -> WireResult<&[u8]> {
        match self.slots.get(index) {
            Some(Some(bytes)) => Ok(&bytes[..]),
            Some(None) => Err(WireError::EmptySlot(index)),
            None => Err(WireError::SlotOutOfRange {
                index,
                len: self.slots.len(),
            }),
        }
    }

    /// Every slot in order; `None` for slots not yet written.
    pub fn iter(&self) -> impl Iterator<Item = Option<&[u8]>> + '_ {
        self.slots.iter().map(|s| s.as_deref())
    }

    /// True once every slot has been written.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Index of the first unwritten slot, if any.
    pub fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Decode every slot against the declared shape `kinds`.
    pub fn decode_all(&self, kinds: &[SegmentKind]) -> WireResult<Vec<Segment>> {
        if kinds.len() != self.slots.len() {
            return Err(WireError::SegmentCount {
                expected: kinds.len(),
                actual: self.slots.len(),
            });
        }
        kinds
            .iter()
            .enumerate()
            .map(|(index, kind)| Segment::decode(*kind, self.get(index)?, self.encoding))
            .collect()
    }

    /// Sum of the encoded lengths of all written slots.
    pub fn total_len(&self) -> usize {
        self.slots.iter().flatten().map(Bytes::len).sum()
    }
}
