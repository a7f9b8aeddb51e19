//! In-memory variable registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use vmesh_bmf::{DeliveryError, IntelligentEnvelope, VariableRegistry};
use vmesh_wire::{MessageStore, RouteBits, Segment, SegmentKind, Vnid};

use crate::error::{RuntimeError, RuntimeResult};

/// One message handed to a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub vnid: Vnid,
    pub name: String,
    pub values: Vec<Segment>,
    /// Sender, when the envelope carried a SourceCID
    pub source_cid: Option<String>,
    /// Path back to the sender, when the envelope carried a ReturnRoute
    pub return_route: Option<RouteBits>,
    pub msg_id: Option<i64>,
}

struct Variable {
    name: String,
    kinds: Vec<SegmentKind>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<Vnid, Variable>,
    by_name: HashMap<String, Vnid>,
}

/// Variables registered with a component, each with a declared message shape.
///
/// Deliveries are pushed onto the channel returned by [`VariableTable::register`].
#[derive(Default)]
pub struct VariableTable {
    tables: RwLock<Tables>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable and subscribe to its deliveries.
    pub fn register(
        &self,
        name: impl Into<String>,
        vnid: Vnid,
        kinds: &[SegmentKind],
    ) -> RuntimeResult<mpsc::UnboundedReceiver<Delivery>> {
        let name = name.into();
        if vnid == 0 {
            return Err(RuntimeError::ReservedVnid);
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.by_id.contains_key(&vnid) || tables.by_name.contains_key(&name) {
            return Err(RuntimeError::DuplicateVariable { name, vnid });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tables.by_name.insert(name.clone(), vnid);
        tables.by_id.insert(
            vnid,
            Variable {
                name: name.clone(),
                kinds: kinds.to_vec(),
                tx,
            },
        );
        debug!(name = %name, vnid, segments = kinds.len(), "Registered variable");
        Ok(rx)
    }

    /// Remove a variable; its receiver sees the channel close.
    pub fn unregister(&self, vnid: Vnid) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.by_id.remove(&vnid) {
            Some(variable) => {
                tables.by_name.remove(&variable.name);
                true
            }
            None => false,
        }
    }

    pub fn kinds(&self, vnid: Vnid) -> Option<Vec<SegmentKind>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.get(&vnid).map(|v| v.kinds.clone())
    }

    pub fn len(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VariableRegistry for VariableTable {
    fn has_variable(&self, vnid: Vnid) -> bool {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.contains_key(&vnid)
    }

    fn resolve(&self, name: &str) -> Option<Vnid> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_name.get(name).copied()
    }

    fn declared_segment_count(&self, vnid: Vnid) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.get(&vnid).map_or(0, |v| v.kinds.len())
    }

    fn deliver(
        &self,
        vnid: Vnid,
        payload: MessageStore,
        envelope: Option<&IntelligentEnvelope>,
    ) -> Result<(), DeliveryError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let variable = tables
            .by_id
            .get(&vnid)
            .ok_or(DeliveryError::ReceiverClosed)?;
        let values = payload.decode_all(&variable.kinds)?;
        let delivery = Delivery {
            vnid,
            name: variable.name.clone(),
            values,
            source_cid: envelope.and_then(|e| e.source_cid()).map(str::to_owned),
            return_route: envelope.and_then(|e| e.return_route()).cloned(),
            msg_id: envelope.and_then(|e| e.msg_id()),
        };
        variable
            .tx
            .send(delivery)
            .map_err(|_| DeliveryError::ReceiverClosed)
    }
}
