//! Helpers for the restricted inline markup carried by the game stream.
//!
//! The markup is not XML proper: element names are ASCII, elements only nest
//! under `<room>`, and text never contains `<` or `>`. Tag recognition works
//! on name prefixes, matching how the game terminates self-closing tags.

use tokio_util::bytes::{BufMut, Bytes, BytesMut};

/// Which markup element the decoder is currently inside.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XmlMode {
    #[default]
    None,
    Room,
    Name,
    Description,
    Terrain,
    /// `nested` records whether the element was opened inside a `<room>`
    /// block, so its close tag can restore the right mode.
    Exits {
        nested: bool,
    },
    Prompt,
}

/// Replacement markers inserted in tintin output format in place of tags.
pub(crate) fn tag_replacement(tag: &[u8]) -> Option<&'static [u8]> {
    Some(match tag {
        b"prompt" => b"PROMPT:",
        b"/prompt" => b":PROMPT",
        b"name" => b"NAME:",
        b"/name" => b":NAME",
        b"tell" => b"TELL:",
        b"/tell" => b":TELL",
        b"narrate" => b"NARRATE:",
        b"/narrate" => b":NARRATE",
        b"pray" => b"PRAY:",
        b"/pray" => b":PRAY",
        b"say" => b"SAY:",
        b"/say" => b":SAY",
        b"emote" => b"EMOTE:",
        b"/emote" => b":EMOTE",
        _ => return None,
    })
}

/// Extract the direction from a `movement` tag body, e.g.
/// `movement dir=north/` yields `north`.
pub(crate) fn movement_direction(tag: &[u8]) -> Bytes {
    let rest = tag.get(b"movement".len()..).unwrap_or_default();
    let mut dir = BytesMut::with_capacity(rest.len());
    match find(rest, b" dir=") {
        Some(at) => {
            dir.put_slice(&rest[..at]);
            dir.put_slice(&rest[at + b" dir=".len()..]);
        }
        None => dir.put_slice(rest),
    }
    let end = dir.iter().position(|&b| b == b'/').unwrap_or(dir.len());
    dir.truncate(end);
    dir.freeze()
}

// Entities longer than this are passed through as literal text.
const MAX_ENTITY_LEN: usize = 12;

/// Replace entity references (`&lt;` `&gt;` `&amp;` `&quot;` `&#NNN;`
/// `&#xHH;`) with their literal bytes. Anything unrecognized is left as-is.
///
/// Numeric references up to 255 decode to a single byte; larger code points
/// decode to their UTF-8 encoding.
#[must_use]
pub fn unescape(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len());
    let mut at = 0;
    while at < data.len() {
        let byte = data[at];
        if byte != b'&' {
            out.put_u8(byte);
            at += 1;
            continue;
        }
        match data[at..]
            .iter()
            .take(MAX_ENTITY_LEN + 2)
            .position(|&b| b == b';')
        {
            Some(end) if end > 1 && decode_entity(&data[at + 1..at + end], &mut out) => {
                at += end + 1;
            }
            _ => {
                out.put_u8(byte);
                at += 1;
            }
        }
    }
    out.freeze()
}

fn decode_entity(entity: &[u8], out: &mut BytesMut) -> bool {
    let value = match entity {
        b"lt" => u32::from(b'<'),
        b"gt" => u32::from(b'>'),
        b"amp" => u32::from(b'&'),
        b"quot" => u32::from(b'"'),
        [b'#', b'x' | b'X', hex @ ..] => match parse_u32(hex, 16) {
            Some(value) => value,
            None => return false,
        },
        [b'#', digits @ ..] => match parse_u32(digits, 10) {
            Some(value) => value,
            None => return false,
        },
        _ => return false,
    };

    if let Ok(byte) = u8::try_from(value) {
        out.put_u8(byte);
        return true;
    }
    match char::from_u32(value) {
        Some(c) => {
            let mut buf = [0u8; 4];
            out.put_slice(c.encode_utf8(&mut buf).as_bytes());
            true
        }
        None => false,
    }
}

fn parse_u32(digits: &[u8], radix: u32) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| u32::from_str_radix(s, radix).ok())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn movement_directions() {
        assert_eq!(movement_direction(b"movement dir=north/"), "north");
        assert_eq!(movement_direction(b"movement dir=down/"), "down");
        // Movement without a direction (e.g. while blind).
        assert_eq!(movement_direction(b"movement/"), "");
    }

    #[test]
    fn replacements() {
        assert_eq!(tag_replacement(b"say"), Some(b"SAY:".as_slice()));
        assert_eq!(tag_replacement(b"/say"), Some(b":SAY".as_slice()));
        assert_eq!(tag_replacement(b"room"), None);
    }

    #[test]
    fn unescape_named() {
        assert_eq!(unescape(b"&lt;tag&gt;"), Bytes::from_static(b"<tag>"));
        assert_eq!(
            unescape(b"fish &amp; chips &quot;daily&quot;"),
            Bytes::from_static(b"fish & chips \"daily\"")
        );
    }

    #[test]
    fn unescape_numeric() {
        assert_eq!(unescape(b"&#65;&#x42;&#X43;"), Bytes::from_static(b"ABC"));
        // Values above 255 decode as UTF-8.
        assert_eq!(
            unescape(b"&#9731;"),
            Bytes::copy_from_slice("\u{2603}".as_bytes())
        );
        // Single byte values stay single bytes.
        assert_eq!(unescape(b"&#233;"), Bytes::from_static(&[233]));
    }

    #[test]
    fn unescape_leaves_unknown() {
        assert_eq!(unescape(b"&unknown;"), Bytes::from_static(b"&unknown;"));
        assert_eq!(unescape(b"a & b"), Bytes::from_static(b"a & b"));
        assert_eq!(unescape(b"&;"), Bytes::from_static(b"&;"));
        assert_eq!(unescape(b"&#;"), Bytes::from_static(b"&#;"));
        assert_eq!(unescape(b"&#x;"), Bytes::from_static(b"&#x;"));
        assert_eq!(unescape(b"trailing &"), Bytes::from_static(b"trailing &"));
        // Out of range code point.
        assert_eq!(
            unescape(b"&#x110000;"),
            Bytes::from_static(b"&#x110000;")
        );
    }

    #[test]
    fn unescape_inverts_escaping() {
        let plain = b"say all, 2 < 3 \"sometimes\"".to_vec();
        let mut escaped = Vec::new();
        for byte in &plain {
            match byte {
                b'<' => escaped.extend_from_slice(b"&lt;"),
                b'>' => escaped.extend_from_slice(b"&gt;"),
                b'&' => escaped.extend_from_slice(b"&amp;"),
                b'"' => escaped.extend_from_slice(b"&quot;"),
                other => escaped.push(*other),
            }
        }
        assert_eq!(unescape(&escaped), plain);
    }
}
