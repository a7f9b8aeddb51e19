//! vmesh-bmf: the BMF message layer.
//!
//! A BMF message on the wire is
//!
//! ```text
//! [intelligent envelope]? [route] [vnid] [payload segment]* ... 0x00
//! ```
//!
//! where the `[route] [vnid] [payload]*` unit may repeat (burst mode).
//!
//! - [`envelope`] decodes and encodes the optional attribute-tagged prefix
//!   carrying broadcast, hop budget, return routes and acknowledgement requests.
//! - [`dispatch`] is the inbound state machine: it decides whether a buffer has
//!   arrived, must be forwarded along its route, or must be re-broadcast.
//! - [`builder`] produces outbound buffers that [`dispatch`] reads back.
//!
//! The dispatcher reaches the rest of the component only through the traits in
//! [`registry`], bundled into a [`RoutingContext`].

#![deny(unsafe_code)]

pub mod builder;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod registry;
pub mod routing;

pub use builder::{build_message, MessageBuilder};
pub use dispatch::dispatch;
pub use envelope::{Attribute, IntelligentEnvelope, EMPTY_ENVELOPE};
pub use error::{BuildError, DeliveryError, DispatchError, EnvelopeError, InterfaceSendError};
pub use frame::{decode_frame, Frame};
pub use registry::{
    ExternalInterfaceRegistry, InterfaceId, LocalIdentity, RoutingContext, VariableRegistry,
};
pub use routing::{DispatchOutcome, RouteDecision};
