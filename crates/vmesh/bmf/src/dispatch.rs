//! Inbound BMF dispatch.
//!
//! One call handles one received buffer to completion:
//!
//! 1. empty buffer or leading zero: nothing to do
//! 2. leading bit 7 set: decode and validate the envelope, then spend one hop
//!    and grow the return route
//! 3. decode the `[route][vnid]` header
//! 4. non-empty route: forward through the port the route leads with
//! 5. broadcast for another component: re-broadcast, or drop once the hop
//!    budget is spent
//! 6. otherwise deliver locally, then keep going while further units follow
//!    (burst mode)
//!
//! Data-driven failures never escape: they are logged and returned inside the
//! [`DispatchOutcome`].

use tracing::{debug, error, info, trace, warn};
use vmesh_wire::{Cursor, RouteBits, Target, Vnid};

use crate::envelope::{IntelligentEnvelope, INTELLIGENT_FLAG};
use crate::error::DispatchError;
use crate::frame::{decode_header, take_declared, take_payload};
use crate::registry::{InterfaceId, RoutingContext};
use crate::routing::{DispatchOutcome, RouteDecision};

/// Dispatch one inbound buffer that arrived through `arrival` (`None` for a
/// locally originated message).
pub fn dispatch(
    ctx: &RoutingContext<'_>,
    buf: &[u8],
    arrival: Option<InterfaceId>,
) -> DispatchOutcome {
    let mut cursor = Cursor::new(buf);
    if cursor.at_end() {
        return DispatchOutcome::no_message();
    }

    let mut delivered = 0;
    match route_message(ctx, &mut cursor, arrival, &mut delivered) {
        Ok(decision) => DispatchOutcome::new(decision, delivered),
        Err(err) => {
            match &err {
                DispatchError::UnknownVariableName(name) => warn!(
                    name = %name,
                    arrival = ?arrival,
                    delivered,
                    "Unknown variable name; message dropped"
                ),
                _ => error!(
                    error = %err,
                    arrival = ?arrival,
                    offset = cursor.position(),
                    delivered,
                    "Dropping inbound message"
                ),
            }
            DispatchOutcome::new(RouteDecision::Rejected(err), delivered)
        }
    }
}

fn route_message(
    ctx: &RoutingContext<'_>,
    cursor: &mut Cursor<'_>,
    arrival: Option<InterfaceId>,
    delivered: &mut usize,
) -> Result<RouteDecision, DispatchError> {
    let envelope = match cursor.peek() {
        Some(byte) if byte & INTELLIGENT_FLAG != 0 => {
            Some(arrive(cursor, arrival)?).filter(|e| !e.is_empty())
        }
        _ => None,
    };

    let (route, vnid) = decode_header(cursor)?;
    match &envelope {
        Some(envelope) => envelope.check_target_name(vnid)?,
        None if vnid == 0 => return Err(DispatchError::UnnamedTarget),
        None => {}
    }

    if let Some((port, rest)) = route.port_from_route() {
        let mut target = addressed(String::new(), rest, vnid, envelope.as_ref());
        let payload = take_payload(cursor)?;
        debug!(
            port,
            vnid,
            remaining = %target.route(),
            segments = payload.len(),
            "Forwarding message"
        );
        ctx.interfaces
            .send(port, &mut target, &payload, envelope.as_ref())
            .map_err(|source| DispatchError::InterfaceSend { port, source })?;
        return Ok(RouteDecision::Forwarded { port });
    }

    if let Some(envelope) = envelope.as_ref().filter(|e| e.is_broadcast()) {
        let target_cid = envelope.target_cid().unwrap_or_default();
        if target_cid != ctx.identity.component_id() {
            return rebroadcast(ctx, cursor, arrival, envelope, target_cid, vnid);
        }
    }

    deliver_burst(ctx, cursor, vnid, envelope.as_ref(), delivered)?;
    Ok(RouteDecision::Delivered)
}

fn arrive(
    cursor: &mut Cursor<'_>,
    arrival: Option<InterfaceId>,
) -> Result<IntelligentEnvelope, DispatchError> {
    let envelope = IntelligentEnvelope::decode(cursor)?;
    envelope.validate()?;
    let envelope = envelope.arrived_via(arrival);
    if envelope.ack_requested() {
        info!(
            msg_id = ?envelope.msg_id(),
            ack_vnid = ?envelope.ack_vnid(),
            "Acknowledgement requested; not implemented"
        );
    }
    if envelope.failed_route_requested() {
        info!(
            msg_id = ?envelope.msg_id(),
            failed_route_vnid = ?envelope.failed_route_vnid(),
            "Failed-route report requested; not implemented"
        );
    }
    Ok(envelope)
}

fn addressed(
    component_id: String,
    route: RouteBits,
    vnid: Vnid,
    envelope: Option<&IntelligentEnvelope>,
) -> Target {
    match envelope.and_then(IntelligentEnvelope::target_vn_name) {
        Some(name) if vnid == 0 => Target::by_name(component_id, route, name),
        _ => Target::new(component_id, route, vnid),
    }
}

fn rebroadcast(
    ctx: &RoutingContext<'_>,
    cursor: &mut Cursor<'_>,
    arrival: Option<InterfaceId>,
    envelope: &IntelligentEnvelope,
    target_cid: &str,
    vnid: Vnid,
) -> Result<RouteDecision, DispatchError> {
    let hops = envelope.hop_count().unwrap_or(-1);
    if hops < 0 {
        trace!(target_cid, arrival = ?arrival, "Broadcast hop budget spent");
        return Ok(RouteDecision::Expired);
    }

    let payload = take_payload(cursor)?;
    let mut sent = Vec::new();
    for interface in ctx.interfaces.interfaces() {
        if Some(interface) == arrival || ctx.interfaces.is_logging_only(interface) {
            continue;
        }
        let mut target = addressed(target_cid.to_owned(), RouteBits::empty(), vnid, Some(envelope));
        match ctx
            .interfaces
            .send(interface, &mut target, &payload, Some(envelope))
        {
            Ok(()) => sent.push(interface),
            Err(err) => warn!(interface, error = %err, "Broadcast relay failed"),
        }
    }
    debug!(
        target_cid,
        hops,
        interfaces = ?sent,
        "Re-broadcast message"
    );
    Ok(RouteDecision::Broadcast { interfaces: sent })
}

fn deliver_burst(
    ctx: &RoutingContext<'_>,
    cursor: &mut Cursor<'_>,
    first_vnid: Vnid,
    envelope: Option<&IntelligentEnvelope>,
    delivered: &mut usize,
) -> Result<(), DispatchError> {
    let mut vnid = match envelope.and_then(IntelligentEnvelope::target_vn_name) {
        Some(name) if first_vnid == 0 => ctx
            .variables
            .resolve(name)
            .ok_or_else(|| DispatchError::UnknownVariableName(name.to_owned()))?,
        _ => first_vnid,
    };

    loop {
        if !ctx.variables.has_variable(vnid) {
            return Err(DispatchError::UnknownVariable(vnid));
        }
        let count = ctx.variables.declared_segment_count(vnid);
        let payload = take_declared(cursor, count)?;
        ctx.variables
            .deliver(vnid, payload, envelope)
            .map_err(|reason| DispatchError::Delivery { vnid, reason })?;
        *delivered += 1;
        debug!(vnid, segments = count, "Delivered message");

        if cursor.at_end() {
            return Ok(());
        }
        let (route, next) = decode_header(cursor)?;
        if !route.is_empty() {
            return Err(DispatchError::RoutedBurst);
        }
        if next == 0 {
            return Err(DispatchError::UnnamedTarget);
        }
        vnid = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    use vmesh_wire::{Encoding, MessageStore, Segment, SegmentKind};

    use crate::builder::{build_message, MessageBuilder};
    use crate::error::{DeliveryError, InterfaceSendError};
    use crate::registry::{ExternalInterfaceRegistry, LocalIdentity, VariableRegistry};

    #[derive(Default)]
    struct Variables {
        shapes: HashMap<Vnid, (String, Vec<SegmentKind>)>,
        inbox: RefCell<Vec<(Vnid, Vec<Segment>, Option<IntelligentEnvelope>)>>,
    }

    impl Variables {
        fn with(mut self, vnid: Vnid, name: &str, kinds: &[SegmentKind]) -> Self {
            self.shapes.insert(vnid, (name.to_owned(), kinds.to_vec()));
            self
        }
    }

    impl VariableRegistry for Variables {
        fn has_variable(&self, vnid: Vnid) -> bool {
            self.shapes.contains_key(&vnid)
        }

        fn resolve(&self, name: &str) -> Option<Vnid> {
            self.shapes
                .iter()
                .find(|(_, (n, _))| n == name)
                .map(|(id, _)| *id)
        }

        fn declared_segment_count(&self, vnid: Vnid) -> usize {
            self.shapes.get(&vnid).map_or(0, |(_, k)| k.len())
        }

        fn deliver(
            &self,
            vnid: Vnid,
            payload: MessageStore,
            envelope: Option<&IntelligentEnvelope>,
        ) -> Result<(), DeliveryError> {
            let kinds = &self.shapes[&vnid].1;
            let values = payload.decode_all(kinds)?;
            self.inbox
                .borrow_mut()
                .push((vnid, values, envelope.cloned()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Interfaces {
        ports: Vec<(InterfaceId, bool)>,
        sent: RefCell<Vec<(InterfaceId, Target, MessageStore, Option<IntelligentEnvelope>)>>,
    }

    impl ExternalInterfaceRegistry for Interfaces {
        fn interfaces(&self) -> Vec<InterfaceId> {
            self.ports.iter().map(|(p, _)| *p).collect()
        }

        fn is_logging_only(&self, interface: InterfaceId) -> bool {
            self.ports.iter().any(|(p, l)| *p == interface && *l)
        }

        fn send(
            &self,
            interface: InterfaceId,
            target: &mut Target,
            payload: &MessageStore,
            envelope: Option<&IntelligentEnvelope>,
        ) -> Result<(), InterfaceSendError> {
            if !self.ports.iter().any(|(p, _)| *p == interface) {
                return Err(InterfaceSendError::UnknownInterface(interface));
            }
            self.sent.borrow_mut().push((
                interface,
                target.clone(),
                payload.clone(),
                envelope.cloned(),
            ));
            Ok(())
        }
    }

    struct Named(&'static str);

    impl LocalIdentity for Named {
        fn component_id(&self) -> &str {
            self.0
        }
    }

    fn store(values: &[Segment]) -> MessageStore {
        MessageStore::from_values(Encoding::Bmf, values).unwrap()
    }

    fn run(
        variables: &Variables,
        interfaces: &Interfaces,
        buf: &[u8],
        arrival: Option<InterfaceId>,
    ) -> DispatchOutcome {
        let me = Named("node-b");
        let ctx = RoutingContext::new(variables, interfaces, &me);
        dispatch(&ctx, buf, arrival)
    }

    #[test]
    fn empty_buffer_is_no_message() {
        let vars = Variables::default();
        let ifaces = Interfaces::default();
        assert_eq!(run(&vars, &ifaces, &[], None).decision, RouteDecision::NoMessage);
        assert_eq!(run(&vars, &ifaces, &[0, 1], None).decision, RouteDecision::NoMessage);
    }

    #[test]
    fn arrival_delivers_string_to_variable() {
        let vars = Variables::default().with(5, "greeting", &[SegmentKind::String]);
        let ifaces = Interfaces::default();
        let buf = build_message(
            &mut Target::local(5),
            &store(&[Segment::Str("hi".into())]),
            None,
            None,
        )
        .unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(1));
        assert_eq!(outcome.decision, RouteDecision::Delivered);
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.processed());
        let inbox = vars.inbox.borrow();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].0, 5);
        assert_eq!(inbox[0].1, vec![Segment::Str("hi".into())]);
    }

    #[test]
    fn routed_message_is_forwarded_one_hop() {
        let vars = Variables::default();
        let ifaces = Interfaces {
            ports: vec![(3, false)],
            ..Default::default()
        };
        let payload = store(&[Segment::Integer(42), Segment::Boolean(false)]);
        let mut target = Target::new("node-d", RouteBits::from_ports([3, 1, 2]), 7);
        let buf = build_message(&mut target, &payload, None, None).unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(0));
        assert_eq!(outcome.decision, RouteDecision::Forwarded { port: 3 });
        assert!(vars.inbox.borrow().is_empty());

        let sent = ifaces.sent.borrow();
        let (port, target, forwarded, _) = &sent[0];
        assert_eq!(*port, 3);
        assert_eq!(target.route().ports(), vec![1, 2]);
        assert_eq!(target.vnid(), 7);
        assert_eq!(forwarded, &payload);
    }

    #[test]
    fn long_route_without_envelope_is_not_read_as_tags() {
        let vars = Variables::default();
        let ifaces = Interfaces {
            ports: vec![(3, false)],
            ..Default::default()
        };
        let mut target = Target::new("", RouteBits::from_ports([3, 1, 12]), 7);
        let buf = build_message(&mut target, &store(&[Segment::Integer(1)]), None, None).unwrap();
        assert_eq!(buf[0], crate::envelope::EMPTY_ENVELOPE);

        let outcome = run(&vars, &ifaces, &buf, Some(2));
        assert_eq!(outcome.decision, RouteDecision::Forwarded { port: 3 });
        let sent = ifaces.sent.borrow();
        let (_, target, _, envelope) = &sent[0];
        assert_eq!(target.route().ports(), vec![1, 12]);
        assert_eq!(*envelope, None);
    }

    #[test]
    fn forward_to_unknown_interface_is_rejected() {
        let vars = Variables::default();
        let ifaces = Interfaces::default();
        let mut target = Target::new("", RouteBits::from_ports([9]), 7);
        let buf = build_message(&mut target, &store(&[]), None, None).unwrap();
        let outcome = run(&vars, &ifaces, &buf, None);
        assert!(matches!(
            outcome.decision,
            RouteDecision::Rejected(DispatchError::InterfaceSend { port: 9, .. })
        ));
    }

    #[test]
    fn broadcast_skips_arrival_and_logging_interfaces() {
        let vars = Variables::default().with(4, "alarm", &[SegmentKind::Boolean]);
        let ifaces = Interfaces {
            ports: vec![(1, false), (2, false), (3, true), (4, false), (5, true)],
            ..Default::default()
        };
        let envelope = IntelligentEnvelope::broadcast("node-z", 2);
        let buf = build_message(
            &mut Target::local(4),
            &store(&[Segment::Boolean(true)]),
            Some(&envelope),
            None,
        )
        .unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(2));
        assert_eq!(
            outcome.decision,
            RouteDecision::Broadcast {
                interfaces: vec![1, 4]
            }
        );
        let sent = ifaces.sent.borrow();
        assert_eq!(sent.len(), 5 - 2 - 1);
        for (_, target, payload, env) in sent.iter() {
            assert_eq!(target.component_id(), "node-z");
            assert_eq!(payload, &sent[0].2);
            assert_eq!(env.as_ref().and_then(|e| e.hop_count()), Some(1));
        }
        assert!(vars.inbox.borrow().is_empty());
    }

    #[test]
    fn broadcast_for_this_component_is_delivered() {
        let vars = Variables::default().with(4, "alarm", &[SegmentKind::Boolean]);
        let ifaces = Interfaces {
            ports: vec![(1, false)],
            ..Default::default()
        };
        let envelope = IntelligentEnvelope::broadcast("node-b", 2);
        let buf = build_message(
            &mut Target::local(4),
            &store(&[Segment::Boolean(true)]),
            Some(&envelope),
            None,
        )
        .unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(1));
        assert_eq!(outcome.decision, RouteDecision::Delivered);
        assert!(ifaces.sent.borrow().is_empty());
    }

    #[test]
    fn broadcast_with_spent_budget_is_dropped() {
        let vars = Variables::default();
        let ifaces = Interfaces {
            ports: vec![(1, false), (2, false)],
            ..Default::default()
        };
        let envelope = IntelligentEnvelope::broadcast("other", 0);
        let buf = build_message(&mut Target::local(1), &store(&[]), Some(&envelope), None).unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(1));
        assert_eq!(outcome.decision, RouteDecision::Expired);
        assert!(outcome.processed());
        assert!(ifaces.sent.borrow().is_empty());
    }

    #[test]
    fn name_is_resolved_on_arrival() {
        let vars = Variables::default().with(11, "speed", &[SegmentKind::Integer]);
        let ifaces = Interfaces::default();
        let mut target = Target::by_name("node-b", RouteBits::empty(), "speed");
        let buf = build_message(&mut target, &store(&[Segment::Integer(88)]), None, None).unwrap();

        let outcome = run(&vars, &ifaces, &buf, None);
        assert_eq!(outcome.decision, RouteDecision::Delivered);
        assert_eq!(vars.inbox.borrow()[0].0, 11);
    }

    #[test]
    fn unknown_name_is_dropped() {
        let vars = Variables::default();
        let ifaces = Interfaces::default();
        let mut target = Target::by_name("node-b", RouteBits::empty(), "ghost");
        let buf = build_message(&mut target, &store(&[]), None, None).unwrap();

        let outcome = run(&vars, &ifaces, &buf, None);
        assert_eq!(
            outcome.decision,
            RouteDecision::Rejected(DispatchError::UnknownVariableName("ghost".into()))
        );
        assert!(!outcome.processed());
    }

    #[test]
    fn unknown_vnid_is_rejected() {
        let vars = Variables::default();
        let ifaces = Interfaces::default();
        let buf = build_message(&mut Target::local(77), &store(&[]), None, None).unwrap();
        assert_eq!(
            run(&vars, &ifaces, &buf, None).decision,
            RouteDecision::Rejected(DispatchError::UnknownVariable(77))
        );
    }

    #[test]
    fn vnid_zero_without_envelope_is_rejected() {
        let vars = Variables::default();
        let ifaces = Interfaces::default();
        let mut buf = RouteBits::empty().to_bytes();
        buf.extend(Segment::Integer(0).to_bmf());
        buf.push(0);
        assert_eq!(
            run(&vars, &ifaces, &buf, None).decision,
            RouteDecision::Rejected(DispatchError::UnnamedTarget)
        );
    }

    #[test]
    fn burst_delivers_each_unit_in_order() {
        let vars = Variables::default()
            .with(1, "a", &[SegmentKind::Integer])
            .with(2, "b", &[SegmentKind::String, SegmentKind::Boolean]);
        let ifaces = Interfaces::default();
        let mut builder = MessageBuilder::new();
        builder
            .message(&mut Target::local(1), &store(&[Segment::Integer(-5)]))
            .unwrap()
            .message(
                &mut Target::local(2),
                &store(&[Segment::Str("x".into()), Segment::Boolean(true)]),
            )
            .unwrap()
            .message(&mut Target::local(1), &store(&[Segment::Integer(6)]))
            .unwrap();
        let buf = builder.finish();

        let outcome = run(&vars, &ifaces, &buf, None);
        assert_eq!(outcome.decision, RouteDecision::Delivered);
        assert_eq!(outcome.delivered, 3);
        let order: Vec<_> = vars.inbox.borrow().iter().map(|m| m.0).collect();
        assert_eq!(order, vec![1, 2, 1]);
    }

    #[test]
    fn burst_stops_at_first_unknown_vnid() {
        let vars = Variables::default().with(1, "a", &[SegmentKind::Integer]);
        let ifaces = Interfaces::default();
        let mut builder = MessageBuilder::new();
        builder
            .message(&mut Target::local(1), &store(&[Segment::Integer(1)]))
            .unwrap()
            .message(&mut Target::local(9), &store(&[Segment::Integer(2)]))
            .unwrap()
            .message(&mut Target::local(1), &store(&[Segment::Integer(3)]))
            .unwrap();

        let outcome = run(&vars, &ifaces, &builder.finish(), None);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.error(), Some(&DispatchError::UnknownVariable(9)));
        assert!(outcome.processed());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let vars = Variables::default().with(5, "s", &[SegmentKind::String]);
        let ifaces = Interfaces::default();
        let mut buf = build_message(
            &mut Target::local(5),
            &store(&[Segment::Str("hello".into())]),
            None,
            None,
        )
        .unwrap()
        .to_vec();
        let cut = buf.len() - 3;
        buf.truncate(cut);
        buf.push(0);

        let outcome = run(&vars, &ifaces, &buf, None);
        assert!(matches!(
            outcome.decision,
            RouteDecision::Rejected(DispatchError::Malformed(_))
        ));
        assert!(vars.inbox.borrow().is_empty());
    }

    #[test]
    fn invalid_envelope_is_rejected() {
        let vars = Variables::default().with(1, "a", &[]);
        let ifaces = Interfaces::default();
        // IsBroadcast without HopCount and TargetCID
        let mut buf = vec![INTELLIGENT_FLAG | 3, 3, 14];
        buf.extend(RouteBits::empty().to_bytes());
        buf.extend(Segment::Integer(1).to_bmf());
        buf.push(0);
        assert!(matches!(
            run(&vars, &ifaces, &buf, None).decision,
            RouteDecision::Rejected(DispatchError::Envelope(_))
        ));
    }

    #[test]
    fn ack_request_is_accepted_and_ignored() {
        let vars = Variables::default().with(1, "a", &[]);
        let ifaces = Interfaces::default();
        let envelope = IntelligentEnvelope::new()
            .request_ack(3)
            .with_msg_id(17)
            .with_source_cid("node-a")
            .request_failed_route(3);
        let buf = build_message(&mut Target::local(1), &store(&[]), Some(&envelope), None).unwrap();

        let outcome = run(&vars, &ifaces, &buf, Some(2));
        assert_eq!(outcome.decision, RouteDecision::Delivered);
        let inbox = vars.inbox.borrow();
        assert_eq!(inbox[0].2.as_ref().and_then(|e| e.msg_id()), Some(17));
    }

    #[test]
    fn return_route_grows_with_arrival_port() {
        let vars = Variables::default().with(1, "a", &[]);
        let ifaces = Interfaces::default();
        let envelope = IntelligentEnvelope::new().with_return_route(RouteBits::from_ports([6]));
        let buf = build_message(&mut Target::local(1), &store(&[]), Some(&envelope), None).unwrap();

        run(&vars, &ifaces, &buf, Some(2));
        let inbox = vars.inbox.borrow();
        let arrived = inbox[0].2.as_ref().and_then(|e| e.return_route().cloned());
        assert_eq!(arrived.map(|r| r.ports()), Some(vec![2, 6]));
    }
}
