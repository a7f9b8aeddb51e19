//! Message addressing: component id, hop route and variable id.

use crate::encoding::Encoding;
use crate::error::{WireError, WireResult};
use crate::route::RouteBits;
use crate::segment::Segment;
use crate::store::MessageStore;

/// Variable (node) identifier. 0 means "resolve by name".
pub type Vnid = u32;

/// Slot of the encoded route in a target's header store.
pub const ROUTE_SLOT: usize = 0;
/// Slot of the encoded VNID in a target's header store.
pub const VNID_SLOT: usize = 1;

/// Destination (or origin) of one message.
///
/// The route and VNID are encoded lazily into a two-slot [`MessageStore`]
/// that is cached until the route changes or another encoding is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    component_id: String,
    route: RouteBits,
    vnid: Vnid,
    vn_name: Option<String>,
    cached: Option<MessageStore>,
}

impl Target {
    /// A target addressed by numeric VNID.
    pub fn new(component_id: impl Into<String>, route: RouteBits, vnid: Vnid) -> Self {
        Self {
            component_id: component_id.into(),
            route,
            vnid,
            vn_name: None,
            cached: None,
        }
    }

    /// Address a variable by name; the receiver resolves it to a VNID.
    pub fn by_name(component_id: impl Into<String>, route: RouteBits, name: impl Into<String>) -> Self {
        Self {
            vn_name: Some(name.into()),
            ..Self::new(component_id, route, 0)
        }
    }

    /// A variable of this component.
    pub fn local(vnid: Vnid) -> Self {
        Self::new(String::new(), RouteBits::empty(), vnid)
    }

    /// Destination component.
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Remaining hops to the destination.
    pub fn route(&self) -> &RouteBits {
        &self.route
    }

    /// Destination variable; 0 when addressed by name.
    pub fn vnid(&self) -> Vnid {
        self.vnid
    }

    /// Destination variable name, when addressed by name.
    pub fn vn_name(&self) -> Option<&str> {
        self.vn_name.as_deref()
    }

    /// True when no hops remain.
    pub fn is_local(&self) -> bool {
        self.route.is_empty()
    }

    /// Replace the route, dropping any cached encoding.
    pub fn set_route(&mut self, route: RouteBits) {
        self.route = route;
        self.cached = None;
    }

    /// Consume the leading hop, returning the port it selects.
    pub fn take_next_hop(&mut self) -> Option<u32> {
        let port = self.route.pop_port()?;
        self.cached = None;
        Some(port)
    }

    /// The `[route, vnid]` header in `encoding`, re-encoding on a switch.
    pub fn encoded(&mut self, encoding: Encoding) -> WireResult<&MessageStore> {
        let store = match self.cached.take() {
            Some(store) if store.encoding() == encoding => store,
            _ => {
                let mut store = MessageStore::new(encoding, 2);
                Segment::Route(self.route.clone()).encode(&mut store, ROUTE_SLOT)?;
                Segment::Integer(i64::from(self.vnid)).encode(&mut store, VNID_SLOT)?;
                store
            }
        };
        Ok(&*self.cached.insert(store))
    }

    /// Encoding of the cached header, if one has been produced.
    pub fn cached_encoding(&self) -> Option<Encoding> {
        self.cached.as_ref().map(MessageStore::encoding)
    }
}

/// Narrow a decoded Integer segment to a VNID.
pub fn vnid_from_integer(value: i64) -> WireResult<Vnid> {
    Vnid::try_from(value).map_err(|_| WireError::VariableIdOutOfRange(value))
}
