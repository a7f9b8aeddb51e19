//! Human-readable PML rendering of whole messages.
//!
//! ```text
//! <msg route="DJA" vnid="7"><seg>hello</seg><seg>true</seg></msg>
//! ```

use bytes::Bytes;

use crate::encoding::Encoding;
use crate::error::{WireError, WireResult};
use crate::route::RouteBits;
use crate::store::MessageStore;
use crate::target::{vnid_from_integer, Target, Vnid, ROUTE_SLOT, VNID_SLOT};

/// A message parsed back from PML text.
#[derive(Debug, Clone, PartialEq)]
pub struct PmlMessage {
    pub route: RouteBits,
    pub vnid: Vnid,
    pub payload: MessageStore,
}

/// Render `target` and a PML-encoded `payload` as one `<msg>` element.
pub fn render_message(target: &mut Target, payload: &MessageStore) -> WireResult<String> {
    if payload.encoding() != Encoding::Pml {
        return Err(WireError::EncodingMismatch {
            expected: Encoding::Pml,
            actual: payload.encoding(),
        });
    }
    let header = target.encoded(Encoding::Pml)?;
    let mut out = String::from("<msg route=\"");
    escape_into(&mut out, text(header.get(ROUTE_SLOT)?)?);
    out.push_str("\" vnid=\"");
    escape_into(&mut out, text(header.get(VNID_SLOT)?)?);
    out.push_str("\">");
    for index in 0..payload.len() {
        out.push_str("<seg>");
        escape_into(&mut out, text(payload.get(index)?)?);
        out.push_str("</seg>");
    }
    out.push_str("</msg>");
    Ok(out)
}

/// Parse the form produced by [`render_message`].
pub fn parse_message(input: &str) -> WireResult<PmlMessage> {
    let rest = expect(input.trim(), "<msg route=\"")?;
    let (route_text, rest) = until(rest, "\"")?;
    let rest = expect(rest, " vnid=\"")?;
    let (vnid_text, rest) = until(rest, "\"")?;
    let mut rest = expect(rest, ">")?;

    let route = RouteBits::from_text(&unescape(route_text)?)?;
    let vnid_value: i64 = unescape(vnid_text)?
        .parse()
        .map_err(|e| WireError::InvalidText(format!("vnid: {e}")))?;
    let vnid = vnid_from_integer(vnid_value)?;

    let mut segments = Vec::new();
    while let Some(after) = rest.strip_prefix("<seg>") {
        let (body, after) = until(after, "</seg>")?;
        segments.push(Bytes::from(unescape(body)?.into_bytes()));
        rest = after;
    }
    if rest != "</msg>" {
        return Err(WireError::InvalidText(format!("trailing text {rest:?}")));
    }

    Ok(PmlMessage {
        route,
        vnid,
        payload: MessageStore::from_segments(Encoding::Pml, segments),
    })
}

fn text(raw: &[u8]) -> WireResult<&str> {
    std::str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8)
}

fn expect<'a>(input: &'a str, prefix: &str) -> WireResult<&'a str> {
    input
        .strip_prefix(prefix)
        .ok_or_else(|| WireError::InvalidText(format!("expected {prefix:?}")))
}

fn until<'a>(input: &'a str, delimiter: &str) -> WireResult<(&'a str, &'a str)> {
    let end = input
        .find(delimiter)
        .ok_or_else(|| WireError::InvalidText(format!("missing {delimiter:?}")))?;
    Ok((&input[..end], &input[end + delimiter.len()..]))
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> WireResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let (entity, after) = until(&rest[amp + 1..], ";")?;
        out.push(match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            other => return Err(WireError::InvalidText(format!("unknown entity &{other};"))),
        });
        rest = after;
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentKind};

    fn payload(values: &[Segment]) -> MessageStore {
        MessageStore::from_values(Encoding::Pml, values).unwrap()
    }

    #[test]
    fn renders_route_vnid_and_segments() {
        let mut target = Target::new("node-b", RouteBits::from_ports([3, 8]), 7);
        let store = payload(&[Segment::Str("hello".into()), Segment::Boolean(true)]);
        assert_eq!(
            render_message(&mut target, &store).unwrap(),
            r#"<msg route="DJA" vnid="7"><seg>hello</seg><seg>true</seg></msg>"#
        );
    }

    #[test]
    fn text_round_trips_with_escaping() {
        let mut target = Target::local(12);
        let values = [Segment::Str("a<b & \"c\">".into()), Segment::Integer(-3)];
        let text = render_message(&mut target, &payload(&values)).unwrap();
        assert!(text.contains("&lt;b &amp; &quot;c&quot;&gt;"));

        let parsed = parse_message(&text).unwrap();
        assert!(parsed.route.is_empty());
        assert_eq!(parsed.vnid, 12);
        assert_eq!(
            parsed
                .payload
                .decode_all(&[SegmentKind::String, SegmentKind::Integer])
                .unwrap(),
            values.to_vec()
        );
    }

    #[test]
    fn bmf_payload_is_refused() {
        let mut target = Target::local(1);
        let store = MessageStore::from_values(Encoding::Bmf, &[Segment::Integer(1)]).unwrap();
        assert!(matches!(
            render_message(&mut target, &store),
            Err(WireError::EncodingMismatch { .. })
        ));
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(parse_message("<msg vnid=\"1\"></msg>").is_err());
        assert!(parse_message("<msg route=\"\" vnid=\"x\"></msg>").is_err());
        assert!(parse_message("<msg route=\"\" vnid=\"1\"><seg>&bogus;</seg></msg>").is_err());
        assert!(parse_message("<msg route=\"\" vnid=\"1\"><seg>x</seg>").is_err());
    }
}
