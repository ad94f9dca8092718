//! ICY metadata de-interleaver
//!
//! Shoutcast/Icecast servers that were asked for metadata insert a length
//! byte every `icy-metaint` audio bytes, followed by that length times 16
//! bytes of `key='value';` text. This parser separates the two: the read
//! path asks it how many bytes of the current source region are audio
//! (`data`) and lets it swallow the interleaved metadata (`meta`).
//!
//! A stream with ICY enabled is not seekable; the caller enforces that
//! when it starts the parser.

use super::tag::{parse_meta_block, Tag};

#[derive(Debug)]
enum IcyState {
    /// No `icy-metaint` header seen; all bytes are audio.
    Disabled,
    /// Counting down audio bytes until the next length byte.
    Audio { remaining: usize },
    /// The next byte is the metadata block length divided by 16.
    LengthByte,
    /// Accumulating a metadata block.
    Meta { remaining: usize, block: Vec<u8> },
}

/// Stateful splitter for ICY-interleaved streams.
#[derive(Debug)]
pub struct IcyParser {
    interval: usize,
    state: IcyState,
    /// Most recently completed tag, readable once.
    tag: Option<Tag>,
}

impl Default for IcyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IcyParser {
    pub fn new() -> Self {
        Self {
            interval: 0,
            state: IcyState::Disabled,
            tag: None,
        }
    }

    /// Enable the parser with the given audio interval.
    pub fn start(&mut self, interval: usize) {
        debug_assert!(interval > 0);
        debug_assert!(!self.is_enabled());

        self.interval = interval;
        self.state = IcyState::Audio {
            remaining: interval,
        };
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, IcyState::Disabled)
    }

    /// How many of the next `length` source bytes are audio.
    ///
    /// The caller copies that many bytes out and advances the source by
    /// the same amount. Returns 0 when the parser expects metadata next.
    pub fn data(&mut self, length: usize) -> usize {
        debug_assert!(length > 0);

        match &mut self.state {
            IcyState::Disabled => length,
            IcyState::Audio { remaining } => {
                let n = length.min(*remaining);
                *remaining -= n;
                if *remaining == 0 {
                    self.state = IcyState::LengthByte;
                }
                n
            }
            IcyState::LengthByte | IcyState::Meta { .. } => 0,
        }
    }

    /// Consume metadata bytes from the front of `src` (at most `length`).
    ///
    /// Returns how many bytes were swallowed; they must not be emitted as
    /// audio. When a block completes, the parsed tag becomes available
    /// through [`read_tag`](Self::read_tag). A zero length byte skips the
    /// block entirely and produces no tag.
    pub fn meta(&mut self, src: &[u8], length: usize) -> usize {
        let length = length.min(src.len());
        let mut consumed = 0;

        while consumed < length {
            match &mut self.state {
                IcyState::Disabled | IcyState::Audio { .. } => break,
                IcyState::LengthByte => {
                    let size = src[consumed] as usize * 16;
                    consumed += 1;
                    if size == 0 {
                        self.state = IcyState::Audio {
                            remaining: self.interval,
                        };
                        break;
                    }
                    self.state = IcyState::Meta {
                        remaining: size,
                        block: Vec::with_capacity(size),
                    };
                }
                IcyState::Meta { remaining, block } => {
                    let n = (length - consumed).min(*remaining);
                    block.extend_from_slice(&src[consumed..consumed + n]);
                    consumed += n;
                    *remaining -= n;
                    if *remaining == 0 {
                        self.tag = Some(parse_meta_block(block));
                        self.state = IcyState::Audio {
                            remaining: self.interval,
                        };
                    }
                    break;
                }
            }
        }

        consumed
    }

    /// Hand off the pending tag, clearing the slot.
    pub fn read_tag(&mut self) -> Option<Tag> {
        self.tag.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tag::TagKind;

    /// Build a metadata insertion: length byte plus the padded block.
    fn meta_insertion(text: &str) -> Vec<u8> {
        let padded = text.len().div_ceil(16) * 16;
        let mut out = vec![(padded / 16) as u8];
        out.extend_from_slice(text.as_bytes());
        out.resize(1 + padded, 0);
        out
    }

    /// Run a raw byte sequence through the parser the way the read path
    /// does, returning the surviving audio bytes.
    fn deinterleave(parser: &mut IcyParser, mut src: &[u8]) -> Vec<u8> {
        let mut audio = Vec::new();
        while !src.is_empty() {
            let n = parser.data(src.len());
            if n > 0 {
                audio.extend_from_slice(&src[..n]);
                src = &src[n..];
                continue;
            }
            let n = parser.meta(src, src.len());
            assert!(n > 0, "parser made no progress");
            src = &src[n..];
        }
        audio
    }

    // --- disabled passthrough ---

    #[test]
    fn disabled_passes_everything_through() {
        let mut p = IcyParser::new();
        assert!(!p.is_enabled());
        assert_eq!(p.data(100), 100);
        assert_eq!(p.meta(&[5, 0, 0], 3), 0);
        assert!(p.read_tag().is_none());
    }

    // --- basic interleaving ---

    #[test]
    fn start_enables_with_interval() {
        let mut p = IcyParser::new();
        p.start(8192);
        assert!(p.is_enabled());
        assert_eq!(p.data(100), 100);
        assert_eq!(p.data(8192), 8092);
    }

    #[test]
    fn audio_countdown_reaches_length_byte() {
        let mut p = IcyParser::new();
        p.start(10);
        assert_eq!(p.data(4), 4);
        assert_eq!(p.data(100), 6);
        // interval exhausted: expecting the length byte now
        assert_eq!(p.data(100), 0);
    }

    #[test]
    fn extracts_metadata_and_resumes_audio() {
        let mut p = IcyParser::new();
        p.start(4);

        let mut stream = vec![1, 2, 3, 4];
        stream.extend_from_slice(&meta_insertion("StreamTitle='A - B';"));
        stream.extend_from_slice(&[5, 6, 7, 8]);

        let audio = deinterleave(&mut p, &stream);
        assert_eq!(audio, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        let tag = p.read_tag().expect("tag after completed block");
        assert_eq!(tag.get(TagKind::Title), Some("A - B"));
    }

    #[test]
    fn zero_length_block_produces_no_tag() {
        let mut p = IcyParser::new();
        p.start(2);

        let stream = [1u8, 2, 0, 3, 4];
        let audio = deinterleave(&mut p, &stream);
        assert_eq!(audio, vec![1, 2, 3, 4]);
        assert!(p.read_tag().is_none());
    }

    #[test]
    fn tag_is_readable_once() {
        let mut p = IcyParser::new();
        p.start(1);

        let mut stream = vec![9];
        stream.extend_from_slice(&meta_insertion("StreamTitle='X';"));
        deinterleave(&mut p, &stream);

        assert!(p.read_tag().is_some());
        assert!(p.read_tag().is_none());
    }

    // --- split delivery ---

    #[test]
    fn block_split_across_calls_is_reassembled() {
        let mut p = IcyParser::new();
        p.start(2);

        let mut stream = vec![1, 2];
        stream.extend_from_slice(&meta_insertion("StreamTitle='Split Title';"));
        stream.extend_from_slice(&[3, 4]);

        // feed one byte at a time, the worst case
        let mut audio = Vec::new();
        for chunk in stream.chunks(1) {
            audio.extend_from_slice(&deinterleave(&mut p, chunk));
        }

        assert_eq!(audio, vec![1, 2, 3, 4]);
        let tag = p.read_tag().unwrap();
        assert_eq!(tag.get(TagKind::Title), Some("Split Title"));
    }

    #[test]
    fn meta_consumes_at_most_the_block() {
        let mut p = IcyParser::new();
        p.start(4);
        assert_eq!(p.data(4), 4);

        // length byte says 16 bytes of metadata follow
        let mut src = vec![1u8];
        src.extend_from_slice(&[b'x'; 16]);
        src.extend_from_slice(&[7, 7, 7]); // audio after the block

        // first call swallows the length byte and the block, nothing more
        let consumed = p.meta(&src, src.len());
        assert_eq!(consumed, 17);
        assert_eq!(p.data(3), 3);
    }

    #[test]
    fn successive_blocks_each_produce_a_tag() {
        let mut p = IcyParser::new();
        p.start(2);

        let mut stream = vec![1, 2];
        stream.extend_from_slice(&meta_insertion("StreamTitle='First';"));
        stream.extend_from_slice(&[3, 4]);
        stream.extend_from_slice(&meta_insertion("StreamTitle='Second';"));

        // drive until the first tag shows up
        let mut fed = 0;
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        while fed < stream.len() {
            audio.extend_from_slice(&deinterleave(&mut p, &stream[fed..fed + 1]));
            fed += 1;
            if let Some(tag) = p.read_tag() {
                titles.push(tag.get(TagKind::Title).unwrap().to_string());
            }
        }

        assert_eq!(audio, vec![1, 2, 3, 4]);
        assert_eq!(titles, vec!["First", "Second"]);
    }

    // --- round trip over the full state machine ---

    #[test]
    fn audio_round_trip_with_interval() {
        // N-byte runs aligned to stream start survive exactly
        let interval = 32;
        let mut p = IcyParser::new();
        p.start(interval);

        let audio_src: Vec<u8> = (0..96).map(|i| (i % 251) as u8).collect();
        let mut stream = Vec::new();
        for (i, run) in audio_src.chunks(interval).enumerate() {
            stream.extend_from_slice(run);
            if i % 2 == 0 {
                stream.extend_from_slice(&meta_insertion("StreamTitle='T';"));
            } else {
                stream.push(0); // empty insertion
            }
        }

        let audio = deinterleave(&mut p, &stream);
        assert_eq!(audio, audio_src);
    }
}
