use thiserror::Error;
use vmesh_wire::{SegmentKind, Vnid, WireError};

use crate::envelope::Attribute;
use crate::registry::InterfaceId;

/// Errors decoding or validating an intelligent envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("invalid envelope tag {0}")]
    InvalidTag(u8),

    #[error("attribute {0:?} appears twice")]
    DuplicateAttribute(Attribute),

    #[error("incomplete {0} attribute group")]
    IncompleteGroup(&'static str),

    #[error("TargetVNName present: {named}, but message vnid is {vnid}")]
    VnNameMismatch { named: bool, vnid: Vnid },

    #[error("attribute {attribute:?} expects a {expected:?} segment, got {actual:?}")]
    KindMismatch {
        attribute: Attribute,
        expected: SegmentKind,
        actual: SegmentKind,
    },

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Reasons a single inbound message or burst was dropped.
///
/// These never escape [`crate::dispatch`]; they are logged and reported in
/// the [`crate::DispatchOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("unknown variable id {0}")]
    UnknownVariable(Vnid),

    #[error("unknown variable name {0:?}")]
    UnknownVariableName(String),

    #[error("vnid 0 without a TargetVNName")]
    UnnamedTarget,

    #[error("routed message inside a burst")]
    RoutedBurst,

    #[error("send on interface {port} failed: {source}")]
    InterfaceSend {
        port: InterfaceId,
        source: InterfaceSendError,
    },

    #[error("delivery to variable {vnid} failed: {reason}")]
    Delivery { vnid: Vnid, reason: DeliveryError },
}

/// Caller errors from the outbound builder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("payload is {0}-encoded; BMF messages need BMF segments")]
    PayloadEncoding(vmesh_wire::Encoding),

    #[error("payload slot {0} was never written")]
    IncompletePayload(usize),

    #[error("target has vnid 0 and no variable name")]
    UnresolvedTarget,

    #[error("target names a variable but also carries vnid {0}")]
    InconsistentTarget(Vnid),

    #[error("envelope must precede the first message")]
    EnvelopeAfterMessage,

    #[error("target names {target:?} but the envelope names {envelope:?}")]
    NameConflict { target: String, envelope: String },

    #[error("only the first message of a burst may address by name")]
    NamedBurst,

    #[error("only the first message of a burst may carry a route")]
    RoutedBurst,

    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Errors from an [`crate::ExternalInterfaceRegistry`] send.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceSendError {
    #[error("no interface on port {0}")]
    UnknownInterface(InterfaceId),

    #[error("link closed")]
    LinkClosed,

    #[error("could not build outbound buffer: {0}")]
    Build(#[from] BuildError),
}

/// Errors from a variable's delivery hook.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("payload does not match the declared shape: {0}")]
    Shape(#[from] WireError),

    #[error("receiver dropped")]
    ReceiverClosed,
}
