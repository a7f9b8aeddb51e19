//! A running component: variables, interfaces and the poll loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use vmesh_bmf::{
    build_message, dispatch, DispatchOutcome, ExternalInterfaceRegistry, InterfaceId,
    IntelligentEnvelope, LocalIdentity, RouteDecision, RoutingContext,
};
use vmesh_wire::{MessageStore, SegmentKind, Target, Vnid};

use crate::config::{ComponentConfig, InterfaceConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::interfaces::{InterfaceTable, Link};
use crate::variables::{Delivery, VariableTable};

/// Counters for one [`Component::poll_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Buffers taken off interface queues
    pub buffers: usize,
    /// Buffers that were delivered, forwarded, re-broadcast or expired
    pub processed: usize,
    /// Buffers dropped as malformed or unroutable
    pub rejected: usize,
}

/// One vmesh component.
pub struct Component {
    config: ComponentConfig,
    variables: VariableTable,
    interfaces: InterfaceTable,
}

impl LocalIdentity for Component {
    fn component_id(&self) -> &str {
        &self.config.component_id
    }
}

impl Component {
    pub fn new(config: ComponentConfig) -> Self {
        Self {
            config,
            variables: VariableTable::new(),
            interfaces: InterfaceTable::new(),
        }
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    /// Attach an interface. Its config is recorded alongside the configured ones.
    pub fn attach(&mut self, iface: InterfaceConfig, link: Link) -> RuntimeResult<()> {
        self.interfaces.attach(iface.clone(), link)?;
        if self.config.interface(&iface.name).is_none() {
            self.config.interfaces.push(iface);
        }
        Ok(())
    }

    /// Attach a link for a configured interface.
    pub fn connect(&mut self, name: &str, link: Link) -> RuntimeResult<()> {
        let iface = self
            .config
            .interface(name)
            .cloned()
            .ok_or_else(|| RuntimeError::Config(format!("no interface named {name:?}")))?;
        self.interfaces.attach(iface, link)
    }

    pub fn register_variable(
        &self,
        name: impl Into<String>,
        vnid: Vnid,
        kinds: &[SegmentKind],
    ) -> RuntimeResult<mpsc::UnboundedReceiver<Delivery>> {
        self.variables.register(name, vnid, kinds)
    }

    pub fn context(&self) -> RoutingContext<'_> {
        RoutingContext::new(&self.variables, &self.interfaces, self)
    }

    /// Dispatch one buffer as if it arrived through `arrival`.
    pub fn dispatch(&self, buf: &[u8], arrival: Option<InterfaceId>) -> DispatchOutcome {
        dispatch(&self.context(), buf, arrival)
    }

    /// Drain every interface queue once, in interface order.
    pub fn poll_once(&self) -> PollStats {
        let mut stats = PollStats::default();
        for port in self.interfaces.interfaces() {
            for buf in self.interfaces.drain(port) {
                let outcome = self.dispatch(&buf, Some(port));
                stats.buffers += 1;
                if outcome.processed() {
                    stats.processed += 1;
                }
                if outcome.error().is_some() {
                    stats.rejected += 1;
                }
            }
        }
        if stats.buffers > 0 {
            debug!(
                component_id = %self.config.component_id,
                buffers = stats.buffers,
                processed = stats.processed,
                rejected = stats.rejected,
                "Poll pass"
            );
        }
        stats
    }

    /// Poll until `shutdown` turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        info!(
            component_id = %self.config.component_id,
            interfaces = self.interfaces.len(),
            variables = self.variables.len(),
            "Component running"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(component_id = %self.config.component_id, "Component stopped");
    }

    /// Send a message originated here.
    ///
    /// An empty route is delivered locally through the dispatcher; otherwise
    /// the leading port selects the interface.
    pub fn send(
        &self,
        target: &mut Target,
        payload: &MessageStore,
        envelope: Option<&IntelligentEnvelope>,
    ) -> RuntimeResult<Option<InterfaceId>> {
        match target.take_next_hop() {
            Some(port) => {
                self.interfaces.send(port, target, payload, envelope)?;
                Ok(Some(port))
            }
            None => {
                let bytes = build_message(target, payload, envelope, None)?;
                match self.dispatch(&bytes, None).decision {
                    RouteDecision::Rejected(err) => Err(RuntimeError::Dispatch(err)),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Originate a broadcast for component `target_cid` on every relaying
    /// interface, with the configured hop budget. Returns the interfaces used.
    pub fn broadcast(
        &self,
        target_cid: &str,
        target: &Target,
        payload: &MessageStore,
    ) -> RuntimeResult<Vec<InterfaceId>> {
        let envelope = IntelligentEnvelope::broadcast(target_cid, self.config.default_hop_count)
            .with_source_cid(self.config.component_id.clone());
        let mut sent = Vec::new();
        for port in self.interfaces.interfaces() {
            if self.interfaces.is_logging_only(port) {
                continue;
            }
            let mut addressed = match target.vn_name() {
                Some(name) => Target::by_name(target_cid, target.route().clone(), name),
                None => Target::new(target_cid, target.route().clone(), target.vnid()),
            };
            self.interfaces
                .send(port, &mut addressed, payload, Some(&envelope))?;
            sent.push(port);
        }
        debug!(
            target_cid,
            hops = self.config.default_hop_count,
            interfaces = ?sent,
            "Originated broadcast"
        );
        Ok(sent)
    }
}
