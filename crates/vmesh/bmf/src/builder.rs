//! Outbound BMF message construction.

use std::borrow::Cow;

use bytes::Bytes;
use vmesh_wire::{Encoding, MessageStore, Target, ROUTE_SLOT, VNID_SLOT};

use crate::envelope::{IntelligentEnvelope, EMPTY_ENVELOPE, INTELLIGENT_FLAG};
use crate::error::BuildError;
use crate::registry::InterfaceId;

/// Builder for one outbound buffer: an optional envelope followed by one or
/// more `[route][vnid][payload]*` units.
///
/// # Example
///
/// ```
/// use vmesh_bmf::MessageBuilder;
/// use vmesh_wire::{Encoding, MessageStore, Segment, Target};
///
/// let payload = MessageStore::from_values(Encoding::Bmf, &[Segment::Boolean(true)]).unwrap();
/// let mut builder = MessageBuilder::new();
/// builder.message(&mut Target::local(5), &payload).unwrap();
/// let bytes = builder.finish();
/// assert_eq!(bytes.last(), Some(&0));
/// ```
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buf: Vec<u8>,
    units: usize,
    envelope_name: Option<String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the envelope. When `outbound_port` is given and the envelope has
    /// a forward route, the written copy has that port appended; `envelope`
    /// itself is not changed.
    pub fn envelope(
        &mut self,
        envelope: &IntelligentEnvelope,
        outbound_port: Option<InterfaceId>,
    ) -> Result<&mut Self, BuildError> {
        if !self.buf.is_empty() {
            return Err(BuildError::EnvelopeAfterMessage);
        }
        envelope.validate()?;
        let envelope = match outbound_port {
            Some(port) => envelope.relayed_via(port),
            None => Cow::Borrowed(envelope),
        };
        envelope.encode(&mut self.buf);
        self.envelope_name = envelope.target_vn_name().map(str::to_owned);
        Ok(self)
    }

    /// Append one `[route][vnid][payload]*` unit.
    ///
    /// When nothing precedes a route that starts with bit 7 set, an
    /// [`EMPTY_ENVELOPE`] is written first.
    pub fn message(
        &mut self,
        target: &mut Target,
        payload: &MessageStore,
    ) -> Result<&mut Self, BuildError> {
        self.check_target(target)?;
        if payload.encoding() != Encoding::Bmf {
            return Err(BuildError::PayloadEncoding(payload.encoding()));
        }
        if let Some(index) = payload.first_empty() {
            return Err(BuildError::IncompletePayload(index));
        }

        let header = target.encoded(Encoding::Bmf)?;
        let route = header.get(ROUTE_SLOT)?;
        self.buf.reserve(payload.total_len() + 9);
        if self.buf.is_empty() && route.first().is_some_and(|b| b & INTELLIGENT_FLAG != 0) {
            self.buf.push(EMPTY_ENVELOPE);
        }
        self.buf.extend_from_slice(route);
        self.buf.extend_from_slice(header.get(VNID_SLOT)?);
        for segment in payload.iter().flatten() {
            self.buf.extend_from_slice(segment);
        }
        self.units += 1;
        Ok(self)
    }

    fn check_target(&self, target: &Target) -> Result<(), BuildError> {
        if self.units > 0 {
            if target.vnid() == 0 {
                return Err(BuildError::NamedBurst);
            }
            if !target.is_local() {
                return Err(BuildError::RoutedBurst);
            }
            return Ok(());
        }
        match (self.envelope_name.as_deref(), target.vnid()) {
            (None, 0) => Err(BuildError::UnresolvedTarget),
            (Some(_), vnid) if vnid != 0 => Err(BuildError::InconsistentTarget(vnid)),
            (Some(named), _) => match target.vn_name() {
                Some(name) if name != named => Err(BuildError::NameConflict {
                    target: name.to_owned(),
                    envelope: named.to_owned(),
                }),
                _ => Ok(()),
            },
            (None, _) => Ok(()),
        }
    }

    /// Append the terminator and hand over the buffer.
    pub fn finish(mut self) -> Bytes {
        self.buf.push(0);
        Bytes::from(self.buf)
    }
}

/// Build a complete single-message buffer.
///
/// A target addressed by name has the name carried in the envelope's
/// TargetVNName attribute, creating an envelope if none was given.
pub fn build_message(
    target: &mut Target,
    payload: &MessageStore,
    envelope: Option<&IntelligentEnvelope>,
    outbound_port: Option<InterfaceId>,
) -> Result<Bytes, BuildError> {
    let folded;
    let envelope = match (target.vn_name(), envelope) {
        (Some(name), Some(env)) => match env.target_vn_name() {
            Some(existing) if existing != name => {
                return Err(BuildError::NameConflict {
                    target: name.to_owned(),
                    envelope: existing.to_owned(),
                })
            }
            Some(_) => Some(env),
            None => {
                folded = env.clone().with_target_vn_name(name);
                Some(&folded)
            }
        },
        (Some(name), None) => {
            folded = IntelligentEnvelope::new().with_target_vn_name(name);
            Some(&folded)
        }
        (None, envelope) => envelope,
    };

    let mut builder = MessageBuilder::new();
    if let Some(envelope) = envelope {
        builder.envelope(envelope, outbound_port)?;
    }
    builder.message(target, payload)?;
    Ok(builder.finish())
}
