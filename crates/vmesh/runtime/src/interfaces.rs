//! External interfaces backed by in-process channel links.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vmesh_bmf::{
    build_message, ExternalInterfaceRegistry, InterfaceId, InterfaceSendError, IntelligentEnvelope,
};
use vmesh_wire::{MessageStore, Target};

use crate::config::InterfaceConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// One end of a bidirectional byte link between two components.
pub struct Link {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl Link {
    /// Two connected ends: what one sends the other receives.
    pub fn pair() -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Link {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Link {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }

    pub fn send(&self, bytes: Bytes) -> Result<(), InterfaceSendError> {
        self.tx
            .send(bytes)
            .map_err(|_| InterfaceSendError::LinkClosed)
    }

    /// Everything received so far, oldest first.
    pub fn drain(&self) -> Vec<Bytes> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(bytes);
        }
        out
    }
}

struct Interface {
    config: InterfaceConfig,
    link: Link,
}

/// The component's external interfaces, in attach order.
#[derive(Default)]
pub struct InterfaceTable {
    entries: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, config: InterfaceConfig, link: Link) -> RuntimeResult<()> {
        if self.find(config.port).is_some() {
            return Err(RuntimeError::DuplicateInterface(config.port));
        }
        debug!(
            name = %config.name,
            port = config.port,
            logging_only = config.logging_only,
            "Attached interface"
        );
        self.entries.push(Interface { config, link });
        Ok(())
    }

    pub fn config(&self, port: InterfaceId) -> Option<&InterfaceConfig> {
        self.find(port).map(|i| &i.config)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inbound buffers waiting on `port`.
    pub fn drain(&self, port: InterfaceId) -> Vec<Bytes> {
        self.find(port).map(|i| i.link.drain()).unwrap_or_default()
    }

    fn find(&self, port: InterfaceId) -> Option<&Interface> {
        self.entries.iter().find(|i| i.config.port == port)
    }
}

impl ExternalInterfaceRegistry for InterfaceTable {
    fn interfaces(&self) -> Vec<InterfaceId> {
        self.entries.iter().map(|i| i.config.port).collect()
    }

    fn is_logging_only(&self, interface: InterfaceId) -> bool {
        self.find(interface).is_some_and(|i| i.config.logging_only)
    }

    fn send(
        &self,
        interface: InterfaceId,
        target: &mut Target,
        payload: &MessageStore,
        envelope: Option<&IntelligentEnvelope>,
    ) -> Result<(), InterfaceSendError> {
        let entry = self
            .find(interface)
            .ok_or(InterfaceSendError::UnknownInterface(interface))?;
        let bytes = build_message(target, payload, envelope, Some(interface))?;
        trace!(
            interface = %entry.config.name,
            port = interface,
            len = bytes.len(),
            "Sending buffer"
        );
        entry.link.send(bytes)
    }
}
