use thiserror::Error;

use crate::encoding::Encoding;

/// Errors from decoding or encoding wire segments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("segment truncated: buffer ended or hit a zero byte mid-segment")]
    Truncated,

    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBoolean(u8),

    #[error("malformed route padding")]
    InvalidRoutePadding,

    #[error("route port does not fit in 32 bits")]
    PortOverflow,

    #[error("malformed integer segment")]
    MalformedInteger,

    #[error("malformed string segment")]
    MalformedString,

    #[error("string segment is not valid UTF-8")]
    InvalidUtf8,

    #[error("store is {actual}-encoded, expected {expected}")]
    EncodingMismatch { expected: Encoding, actual: Encoding },

    #[error("slot {index} out of range for a store of {len} segments")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("slot {0} has not been written")]
    EmptySlot(usize),

    #[error("store holds {actual} segments, expected {expected}")]
    SegmentCount { expected: usize, actual: usize },

    #[error("invalid text: {0}")]
    InvalidText(String),

    #[error("variable id {0} out of range")]
    VariableIdOutOfRange(i64),
}

pub type WireResult<T> = Result<T, WireError>;
