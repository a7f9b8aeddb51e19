//! The parts of a component the dispatcher talks to.

use vmesh_wire::{MessageStore, Target, Vnid};

use crate::envelope::IntelligentEnvelope;
use crate::error::{DeliveryError, InterfaceSendError};

/// External interfaces are addressed by the port number routes select.
pub type InterfaceId = u32;

/// Local variables that can receive messages.
pub trait VariableRegistry {
    fn has_variable(&self, vnid: Vnid) -> bool;

    /// Map a variable name to its VNID.
    fn resolve(&self, name: &str) -> Option<Vnid>;

    /// How many payload segments a message to `vnid` carries.
    fn declared_segment_count(&self, vnid: Vnid) -> usize;

    /// Hand a decoded payload to the variable's input hook.
    fn deliver(
        &self,
        vnid: Vnid,
        payload: MessageStore,
        envelope: Option<&IntelligentEnvelope>,
    ) -> Result<(), DeliveryError>;
}

/// Links to other components.
pub trait ExternalInterfaceRegistry {
    /// Every registered interface, in scan order.
    fn interfaces(&self) -> Vec<InterfaceId>;

    /// Logging interfaces observe traffic but are never relayed through.
    fn is_logging_only(&self, interface: InterfaceId) -> bool;

    /// Build and transmit one message out of `interface`.
    fn send(
        &self,
        interface: InterfaceId,
        target: &mut Target,
        payload: &MessageStore,
        envelope: Option<&IntelligentEnvelope>,
    ) -> Result<(), InterfaceSendError>;
}

pub trait LocalIdentity {
    fn component_id(&self) -> &str;
}

/// Everything [`crate::dispatch`] needs, passed explicitly.
#[derive(Clone, Copy)]
pub struct RoutingContext<'a> {
    pub variables: &'a dyn VariableRegistry,
    pub interfaces: &'a dyn ExternalInterfaceRegistry,
    pub identity: &'a dyn LocalIdentity,
}

impl<'a> RoutingContext<'a> {
    pub fn new(
        variables: &'a dyn VariableRegistry,
        interfaces: &'a dyn ExternalInterfaceRegistry,
        identity: &'a dyn LocalIdentity,
    ) -> Self {
        Self {
            variables,
            interfaces,
            identity,
        }
    }
}
