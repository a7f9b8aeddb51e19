use crate::error::DispatchError;
use crate::registry::InterfaceId;

/// Route decision: what happened to one inbound buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteDecision {
    /// Empty buffer or leading zero byte
    NoMessage,
    /// Delivered locally (the whole burst)
    Delivered,
    /// Sent one hop further along its route
    Forwarded { port: InterfaceId },
    /// Re-broadcast to these interfaces
    Broadcast { interfaces: Vec<InterfaceId> },
    /// Broadcast hop budget exhausted; dropped
    Expired,
    /// Dropped; anything already delivered from the burst stays delivered
    Rejected(DispatchError),
}

/// Result of one [`crate::dispatch`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    pub decision: RouteDecision,
    /// Messages handed to local variables before the decision was reached.
    pub delivered: usize,
}

impl DispatchOutcome {
    pub fn new(decision: RouteDecision, delivered: usize) -> Self {
        Self {
            decision,
            delivered,
        }
    }

    pub fn no_message() -> Self {
        Self::new(RouteDecision::NoMessage, 0)
    }

    /// Whether anything was done with the buffer.
    pub fn processed(&self) -> bool {
        self.delivered > 0
            || matches!(
                self.decision,
                RouteDecision::Forwarded { .. }
                    | RouteDecision::Broadcast { .. }
                    | RouteDecision::Expired
            )
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match &self.decision {
            RouteDecision::Rejected(err) => Some(err),
            _ => None,
        }
    }
}
