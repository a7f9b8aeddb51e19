//! The intelligent envelope: an optional, attribute-tagged message prefix.
//!
//! On the wire an envelope is a run of `[tag byte][segment]` pairs closed by
//! the [`END_IMESSAGE`] tag. Bit 7 of the very first tag byte is the
//! [`INTELLIGENT_FLAG`]; no other tag byte carries it. Attributes are written in
//! ascending tag order.
//!
//! A route longer than one byte starts with bit 7 set, so a message without
//! attributes but with such a route is prefixed by [`EMPTY_ENVELOPE`]. Decoders
//! treat an empty envelope as no envelope.
//!
//! Decoding is pure. The per-hop side effects (hop budget decrement, return
//! route growth, forward route growth) are separate functions that produce a
//! new envelope value, so a decoded envelope can be relayed to several
//! interfaces without one copy affecting another.

use std::borrow::Cow;
use std::collections::BTreeMap;

use tracing::trace;
use vmesh_wire::{Cursor, RouteBits, Segment, SegmentKind, Vnid};

use crate::error::EnvelopeError;

/// Set on the first byte of a message that starts with an envelope.
pub const INTELLIGENT_FLAG: u8 = 0x80;
/// Tag closing the attribute list.
pub const END_IMESSAGE: u8 = 14;
/// Bound on valid tag values.
pub const NUM_INTELLIGENT_ATT: u8 = 15;
/// An envelope with no attributes. Written ahead of an envelope-less message
/// whose route starts with bit 7 set, so that the route is not read as tags.
pub const EMPTY_ENVELOPE: u8 = INTELLIGENT_FLAG | END_IMESSAGE;

/// Envelope attribute tags, in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Attribute {
    ForwardRoute = 1,
    ReturnRoute = 2,
    IsBroadcast = 3,
    HopCount = 4,
    TargetCid = 5,
    AckMsg = 6,
    AckVnid = 7,
    FailedRouteMsg = 8,
    FailedRouteVnid = 9,
    MsgId = 10,
    TranslationCount = 11,
    SourceCid = 12,
    TargetVnName = 13,
}

impl Attribute {
    pub const ALL: [Attribute; 13] = [
        Attribute::ForwardRoute,
        Attribute::ReturnRoute,
        Attribute::IsBroadcast,
        Attribute::HopCount,
        Attribute::TargetCid,
        Attribute::AckMsg,
        Attribute::AckVnid,
        Attribute::FailedRouteMsg,
        Attribute::FailedRouteVnid,
        Attribute::MsgId,
        Attribute::TranslationCount,
        Attribute::SourceCid,
        Attribute::TargetVnName,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Attribute> {
        Attribute::ALL.iter().copied().find(|a| a.tag() == tag)
    }

    /// The segment kind this attribute's value is carried as.
    pub fn kind(self) -> SegmentKind {
        match self {
            Attribute::ForwardRoute | Attribute::ReturnRoute => SegmentKind::Route,
            Attribute::IsBroadcast | Attribute::AckMsg | Attribute::FailedRouteMsg => {
                SegmentKind::Boolean
            }
            Attribute::HopCount
            | Attribute::AckVnid
            | Attribute::FailedRouteVnid
            | Attribute::MsgId
            | Attribute::TranslationCount => SegmentKind::Integer,
            Attribute::TargetCid | Attribute::SourceCid | Attribute::TargetVnName => {
                SegmentKind::String
            }
        }
    }
}

/// Decoded intelligent envelope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntelligentEnvelope {
    attributes: BTreeMap<Attribute, Segment>,
}

impl IntelligentEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broadcast addressed to `target_cid` with `hop_count` relays left.
    pub fn broadcast(target_cid: impl Into<String>, hop_count: i64) -> Self {
        Self::new()
            .set(Attribute::IsBroadcast, Segment::Boolean(true))
            .set(Attribute::HopCount, Segment::Integer(hop_count))
            .set(Attribute::TargetCid, Segment::Str(target_cid.into()))
    }

    pub fn with_forward_route(self, route: RouteBits) -> Self {
        self.set(Attribute::ForwardRoute, Segment::Route(route))
    }

    pub fn with_return_route(self, route: RouteBits) -> Self {
        self.set(Attribute::ReturnRoute, Segment::Route(route))
    }

    pub fn with_source_cid(self, cid: impl Into<String>) -> Self {
        self.set(Attribute::SourceCid, Segment::Str(cid.into()))
    }

    pub fn with_msg_id(self, id: i64) -> Self {
        self.set(Attribute::MsgId, Segment::Integer(id))
    }

    pub fn with_translation_count(self, count: i64) -> Self {
        self.set(Attribute::TranslationCount, Segment::Integer(count))
    }

    pub fn with_target_vn_name(self, name: impl Into<String>) -> Self {
        self.set(Attribute::TargetVnName, Segment::Str(name.into()))
    }

    /// Ask the receiver to acknowledge to `vnid`. Needs a message id and a
    /// source id or return route to validate.
    pub fn request_ack(self, vnid: Vnid) -> Self {
        self.set(Attribute::AckMsg, Segment::Boolean(true))
            .set(Attribute::AckVnid, Segment::Integer(i64::from(vnid)))
    }

    /// Ask relays to report an undeliverable route to `vnid`.
    pub fn request_failed_route(self, vnid: Vnid) -> Self {
        self.set(Attribute::FailedRouteMsg, Segment::Boolean(true))
            .set(Attribute::FailedRouteVnid, Segment::Integer(i64::from(vnid)))
    }

    /// Set an arbitrary attribute, checking the value's kind.
    pub fn with(self, attribute: Attribute, value: Segment) -> Result<Self, EnvelopeError> {
        if value.kind() != attribute.kind() {
            return Err(EnvelopeError::KindMismatch {
                attribute,
                expected: attribute.kind(),
                actual: value.kind(),
            });
        }
        Ok(self.set(attribute, value))
    }

    pub fn without(mut self, attribute: Attribute) -> Self {
        self.attributes.remove(&attribute);
        self
    }

    fn set(mut self, attribute: Attribute, value: Segment) -> Self {
        self.attributes.insert(attribute, value);
        self
    }

    pub fn get(&self, attribute: Attribute) -> Option<&Segment> {
        self.attributes.get(&attribute)
    }

    pub fn contains(&self, attribute: Attribute) -> bool {
        self.attributes.contains_key(&attribute)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attribute, &Segment)> + '_ {
        self.attributes.iter().map(|(a, s)| (*a, s))
    }

    fn flag(&self, attribute: Attribute) -> bool {
        matches!(self.get(attribute), Some(Segment::Boolean(true)))
    }

    fn integer(&self, attribute: Attribute) -> Option<i64> {
        match self.get(attribute) {
            Some(Segment::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    fn string(&self, attribute: Attribute) -> Option<&str> {
        match self.get(attribute) {
            Some(Segment::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn route(&self, attribute: Attribute) -> Option<&RouteBits> {
        match self.get(attribute) {
            Some(Segment::Route(r)) => Some(r),
            _ => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.flag(Attribute::IsBroadcast)
    }

    pub fn hop_count(&self) -> Option<i64> {
        self.integer(Attribute::HopCount)
    }

    pub fn target_cid(&self) -> Option<&str> {
        self.string(Attribute::TargetCid)
    }

    pub fn source_cid(&self) -> Option<&str> {
        self.string(Attribute::SourceCid)
    }

    pub fn target_vn_name(&self) -> Option<&str> {
        self.string(Attribute::TargetVnName)
    }

    pub fn forward_route(&self) -> Option<&RouteBits> {
        self.route(Attribute::ForwardRoute)
    }

    pub fn return_route(&self) -> Option<&RouteBits> {
        self.route(Attribute::ReturnRoute)
    }

    pub fn msg_id(&self) -> Option<i64> {
        self.integer(Attribute::MsgId)
    }

    pub fn translation_count(&self) -> Option<i64> {
        self.integer(Attribute::TranslationCount)
    }

    pub fn ack_requested(&self) -> bool {
        self.flag(Attribute::AckMsg)
    }

    pub fn ack_vnid(&self) -> Option<i64> {
        self.integer(Attribute::AckVnid)
    }

    pub fn failed_route_requested(&self) -> bool {
        self.flag(Attribute::FailedRouteMsg)
    }

    pub fn failed_route_vnid(&self) -> Option<i64> {
        self.integer(Attribute::FailedRouteVnid)
    }

    /// Decode an envelope at the cursor. The first byte must carry
    /// [`INTELLIGENT_FLAG`].
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, EnvelopeError> {
        let first = cursor.take_byte()?;
        if first & INTELLIGENT_FLAG == 0 {
            return Err(EnvelopeError::InvalidTag(first));
        }
        let mut envelope = Self::new();
        let mut tag = first & !INTELLIGENT_FLAG;
        while tag != END_IMESSAGE {
            let attribute = Attribute::from_tag(tag).ok_or(EnvelopeError::InvalidTag(tag))?;
            let raw = cursor.take_segment_of(attribute.kind())?;
            let value = Segment::from_bmf(attribute.kind(), raw)?;
            if envelope.attributes.insert(attribute, value).is_some() {
                return Err(EnvelopeError::DuplicateAttribute(attribute));
            }
            tag = cursor.take_byte()?;
        }
        trace!(attributes = envelope.len(), "decoded intelligent envelope");
        Ok(envelope)
    }

    /// Check the all-or-nothing attribute groups.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let broadcast = [
            Attribute::IsBroadcast,
            Attribute::HopCount,
            Attribute::TargetCid,
        ];
        let present = broadcast.iter().filter(|a| self.contains(**a)).count();
        if present != 0 && present != broadcast.len() {
            return Err(EnvelopeError::IncompleteGroup("broadcast"));
        }
        self.validate_reply_group(Attribute::AckMsg, Attribute::AckVnid, "acknowledgement")?;
        self.validate_reply_group(
            Attribute::FailedRouteMsg,
            Attribute::FailedRouteVnid,
            "failed-route",
        )
    }

    fn validate_reply_group(
        &self,
        flag: Attribute,
        vnid: Attribute,
        group: &'static str,
    ) -> Result<(), EnvelopeError> {
        if !self.contains(flag) && !self.contains(vnid) {
            return Ok(());
        }
        let complete = self.contains(flag)
            && self.contains(vnid)
            && self.contains(Attribute::MsgId)
            && (self.contains(Attribute::SourceCid) || self.contains(Attribute::ReturnRoute));
        if complete {
            Ok(())
        } else {
            Err(EnvelopeError::IncompleteGroup(group))
        }
    }

    /// A TargetVNName must be present exactly when the message vnid is 0.
    pub fn check_target_name(&self, vnid: Vnid) -> Result<(), EnvelopeError> {
        let named = self.contains(Attribute::TargetVnName);
        if named == (vnid == 0) {
            Ok(())
        } else {
            Err(EnvelopeError::VnNameMismatch { named, vnid })
        }
    }

    /// The envelope as seen after crossing into this component through
    /// `arrival`: one hop of budget spent, return route grown at the front.
    pub fn arrived_via(&self, arrival: Option<u32>) -> Self {
        let mut next = self.clone();
        if let Some(Segment::Integer(hops)) = next.attributes.get_mut(&Attribute::HopCount) {
            *hops = hops.saturating_sub(1);
        }
        if let (Some(port), Some(Segment::Route(route))) =
            (arrival, next.attributes.get_mut(&Attribute::ReturnRoute))
        {
            route.push_front(port);
        }
        next
    }

    /// The envelope to send out of `port`: the forward route, if any, grown
    /// at its tail. Borrowed unchanged when there is no forward route.
    pub fn relayed_via(&self, port: u32) -> Cow<'_, Self> {
        if !self.contains(Attribute::ForwardRoute) {
            return Cow::Borrowed(self);
        }
        let mut next = self.clone();
        if let Some(Segment::Route(route)) = next.attributes.get_mut(&Attribute::ForwardRoute) {
            route.push_end(port);
        }
        Cow::Owned(next)
    }

    /// Append the wire form. An empty envelope writes nothing.
    pub fn encode(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        let mut flag = INTELLIGENT_FLAG;
        for (attribute, value) in &self.attributes {
            out.push(flag | attribute.tag());
            flag = 0;
            out.extend_from_slice(&value.to_bmf());
        }
        out.push(END_IMESSAGE);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}
