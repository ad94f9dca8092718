//! Response header handler
//!
//! Invoked by the transfer engine for each header line `Name: Value`.
//! Decides seekability, total size, MIME type, the ICY stream name and
//! the in-band metadata interval. Unknown headers are ignored; malformed
//! lines are silently skipped.

use tracing::debug;

use super::input::StreamState;
use super::tag::{Tag, TagKind};

/// Longest header name recognized; also the cap on numeric value regions.
const MAX_FIELD: usize = 64;

pub(crate) fn apply_header_line(st: &mut StreamState, line: &[u8]) {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return;
    };
    if colon >= MAX_FIELD {
        return;
    }

    let name = &line[..colon];
    let value = line[colon + 1..].trim_ascii();

    if name.eq_ignore_ascii_case(b"accept-ranges") {
        // a stream with icy-metadata is not seekable
        if !st.icy.is_enabled() {
            st.seekable = true;
        }
    } else if name.eq_ignore_ascii_case(b"content-length") {
        let Some(length) = parse_unsigned(value) else {
            return;
        };
        // the sum is only the total size while offset is the starting
        // point of the current transfer; a reopen for seek updates
        // offset before re-initializing the handle
        debug_assert_eq!(st.offset, st.transfer_offset);
        st.size = Some(st.offset + length);
    } else if name.eq_ignore_ascii_case(b"content-type") {
        st.mime = Some(String::from_utf8_lossy(value).into_owned());
    } else if name.eq_ignore_ascii_case(b"icy-name")
        || name.eq_ignore_ascii_case(b"ice-name")
        || name.eq_ignore_ascii_case(b"x-audiocast-name")
    {
        let station = String::from_utf8_lossy(value).into_owned();

        let mut tag = Tag::new();
        tag.add(TagKind::Name, station.clone());
        st.tag = Some(tag);
        st.meta_name = Some(station);
    } else if name.eq_ignore_ascii_case(b"icy-metaint") {
        if st.icy.is_enabled() {
            return;
        }
        let Some(interval) = parse_unsigned(value) else {
            return;
        };
        debug!("icy-metaint={interval}");

        if interval > 0 {
            st.icy.start(interval as usize);
            // a stream with icy-metadata is not seekable
            st.seekable = false;
        }
    }
}

fn parse_unsigned(value: &[u8]) -> Option<u64> {
    if value.len() >= MAX_FIELD {
        return None;
    }
    std::str::from_utf8(value).ok()?.parse().ok()
}
