//! Hop-counted, bit-packed routes.
//!
//! A route is a sequence of port selectors. Each port is written as a chain of
//! 4-bit groups `[continuation][3 data bits]`, most significant octal digit
//! first, the last group of a port having its continuation bit clear. Ports
//! 0..=7 therefore cost a single group.
//!
//! On the wire the group bits are followed by one `1` marker bit, zero-filled
//! to a multiple of 7 and carried 7 bits per byte. Every byte but the last has
//! bit 7 set, so the empty route is the single byte `0x40`.

use std::collections::VecDeque;
use std::fmt;

use crate::bits::{ChunkReader, ChunkWriter, CHUNK_BITS, CHUNK_MASK, MORE};
use crate::error::{WireError, WireResult};

const GROUP_BITS: u32 = 4;
const GROUP_CONTINUE: u8 = 0b1000;
const GROUP_DIGIT: u8 = 0b0111;
const DIGIT_BITS: u32 = 3;

/// A bit-packed hop route. Empty means the message has arrived.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RouteBits {
    groups: VecDeque<u8>,
}

impl RouteBits {
    /// The empty route: local delivery.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a route that leaves through `ports` in order.
    pub fn from_ports<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut route = Self::empty();
        for port in ports {
            route.push_end(port);
        }
        route
    }

    /// True when the message has arrived.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of hops remaining.
    pub fn hops(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| **g & GROUP_CONTINUE == 0)
            .count()
    }

    /// Length of the packed bit string, excluding the padding marker.
    pub fn bit_len(&self) -> usize {
        self.groups.len() * GROUP_BITS as usize
    }

    /// The hop ports in travel order.
    pub fn ports(&self) -> Vec<u32> {
        let mut ports = Vec::with_capacity(self.hops());
        let mut acc = 0u32;
        for &group in &self.groups {
            acc = (acc << DIGIT_BITS) | u32::from(group & GROUP_DIGIT);
            if group & GROUP_CONTINUE == 0 {
                ports.push(acc);
                acc = 0;
            }
        }
        ports
    }

    /// Prepend a hop. Used to grow a return route as a message travels.
    pub fn push_front(&mut self, port: u32) {
        for group in port_groups(port).into_iter().rev() {
            self.groups.push_front(group);
        }
    }

    /// Append a hop. Used to grow a forward route as a message travels.
    pub fn push_end(&mut self, port: u32) {
        self.groups.extend(port_groups(port));
    }

    /// Strip and decode the leading port selector.
    pub fn pop_port(&mut self) -> Option<u32> {
        if self.groups.is_empty() {
            return None;
        }
        let mut port = 0u32;
        while let Some(group) = self.groups.pop_front() {
            port = (port << DIGIT_BITS) | u32::from(group & GROUP_DIGIT);
            if group & GROUP_CONTINUE == 0 {
                break;
            }
        }
        Some(port)
    }

    /// The leading port and the route that remains once it is consumed.
    pub fn port_from_route(&self) -> Option<(u32, RouteBits)> {
        let mut rest = self.clone();
        let port = rest.pop_port()?;
        Some((port, rest))
    }

    /// BMF encoding of the route.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ChunkWriter::with_capacity(self.bit_len() / CHUNK_BITS as usize + 1);
        for &group in &self.groups {
            writer.push(group, GROUP_BITS);
        }
        writer.finish_marked()
    }

    /// Decode exactly one BMF route segment.
    pub fn from_bytes(raw: &[u8]) -> WireResult<Self> {
        let (&last, head) = raw.split_last().ok_or(WireError::Truncated)?;
        if last == 0 {
            return Err(WireError::Truncated);
        }
        if last & MORE != 0 || head.iter().any(|b| b & MORE == 0) {
            return Err(WireError::InvalidRoutePadding);
        }

        let padding = (last & CHUNK_MASK).trailing_zeros() as usize;
        let data_bits = raw.len() * CHUNK_BITS as usize - padding - 1;
        if data_bits % GROUP_BITS as usize != 0 {
            return Err(WireError::InvalidRoutePadding);
        }

        let mut reader = ChunkReader::new(raw);
        let groups = (0..data_bits / GROUP_BITS as usize)
            .map(|_| reader.read(GROUP_BITS))
            .collect();
        let route = Self { groups };
        route.validate()?;
        Ok(route)
    }

    /// PML encoding: one letter `'A'..='P'` per group.
    pub fn to_text(&self) -> String {
        self.groups.iter().map(|g| char::from(b'A' + g)).collect()
    }

    /// Parse the PML encoding. `'0'`/`'1'` digits spell a group bit by bit.
    pub fn from_text(text: &str) -> WireResult<Self> {
        let mut groups = VecDeque::with_capacity(text.len());
        let mut partial = 0u8;
        let mut partial_bits = 0u32;
        for c in text.chars() {
            match c {
                'A'..='P' if partial_bits == 0 => groups.push_back(c as u8 - b'A'),
                '0' | '1' => {
                    partial = (partial << 1) | (c as u8 - b'0');
                    partial_bits += 1;
                    if partial_bits == GROUP_BITS {
                        groups.push_back(partial);
                        partial = 0;
                        partial_bits = 0;
                    }
                }
                other => {
                    return Err(WireError::InvalidText(format!(
                        "unexpected route character {other:?}"
                    )))
                }
            }
        }
        if partial_bits != 0 {
            return Err(WireError::InvalidText(
                "route bits do not form whole groups".into(),
            ));
        }
        let route = Self { groups };
        route.validate()?;
        Ok(route)
    }

    fn validate(&self) -> WireResult<()> {
        if self
            .groups
            .back()
            .is_some_and(|g| g & GROUP_CONTINUE != 0)
        {
            return Err(WireError::InvalidRoutePadding);
        }
        let mut acc = 0u64;
        for &group in &self.groups {
            acc = (acc << DIGIT_BITS) | u64::from(group & GROUP_DIGIT);
            if acc > u64::from(u32::MAX) {
                return Err(WireError::PortOverflow);
            }
            if group & GROUP_CONTINUE == 0 {
                acc = 0;
            }
        }
        Ok(())
    }
}

impl fmt::Display for RouteBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<local>");
        }
        let ports: Vec<String> = self.ports().iter().map(u32::to_string).collect();
        write!(f, "{}", ports.join("."))
    }
}

fn port_groups(port: u32) -> Vec<u8> {
    let mut digits = Vec::with_capacity(11);
    let mut rest = port;
    loop {
        digits.push((rest as u8) & GROUP_DIGIT);
        rest >>= DIGIT_BITS;
        if rest == 0 {
            break;
        }
    }
    let last = digits.len() - 1;
    digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i < last { d | GROUP_CONTINUE } else { *d })
        .collect()
}
