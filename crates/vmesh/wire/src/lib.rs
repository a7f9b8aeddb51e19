//! vmesh-wire: the transport-neutral wire layer.
//!
//! Components exchange messages addressed by a [`Target`]: a component id, a
//! bit-packed hop [`RouteBits`] and a variable id. Every field travels as a
//! self-delimiting [`Segment`] in one of two encodings:
//!
//! - **BMF** (binary message format): dense, each segment ends at the first
//!   byte with bit 7 clear, and a zero byte never appears inside a segment,
//!   so "scan until 0" marks the end of a message.
//! - **PML**: the printable text counterpart, used for inspection and logs.
//!
//! A [`MessageStore`] holds the raw encoded segments of one message and is the
//! container segments are written into and read back from.

#![deny(unsafe_code)]

mod bits;
pub mod cursor;
pub mod encoding;
pub mod error;
pub mod pml;
pub mod route;
pub mod segment;
pub mod store;
pub mod target;

pub use cursor::Cursor;
pub use encoding::Encoding;
pub use error::{WireError, WireResult};
pub use pml::{parse_message, render_message, PmlMessage};
pub use route::RouteBits;
pub use segment::{frame_len, wire_length, Segment, SegmentKind};
pub use store::MessageStore;
pub use target::{vnid_from_integer, Target, Vnid, ROUTE_SLOT, VNID_SLOT};
