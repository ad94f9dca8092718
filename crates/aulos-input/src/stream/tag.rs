//! Stream tags
//!
//! Tag records built from ICY response headers and in-band metadata
//! blocks. A tag is a small multimap from tag kind to string value; the
//! pending tag of a stream is handed to the consumer exactly once.

/// Kind of a tag item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Station name (`icy-name` and friends).
    Name,
    /// Track title (`StreamTitle` from an in-band metadata block).
    Title,
}

/// An unordered collection of tag items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    items: Vec<(TagKind, String)>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: TagKind, value: impl Into<String>) {
        self.items.push((kind, value.into()));
    }

    pub fn has(&self, kind: TagKind) -> bool {
        self.items.iter().any(|(k, _)| *k == kind)
    }

    /// First value of the given kind, if any.
    pub fn get(&self, kind: TagKind) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagKind, &str)> {
        self.items.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Parse the `StreamTitle` value out of an ICY metadata string.
///
/// ICY metadata format: `StreamTitle='Artist - Song';StreamUrl='...';`
/// Only `StreamTitle` is mapped; all other keys are ignored.
fn parse_stream_title(metadata: &str) -> Option<String> {
    let start = metadata.find("StreamTitle='")?;
    let start = start + "StreamTitle='".len();
    let end = metadata[start..].find("';")?;
    let title = metadata[start..start + end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Build a tag from a raw in-band metadata block.
///
/// Blocks are null-padded to a multiple of 16 bytes; padding is stripped
/// before parsing. A block without a usable `StreamTitle` produces an
/// empty tag.
pub fn parse_meta_block(block: &[u8]) -> Tag {
    let end = block
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);

    let mut tag = Tag::new();
    if end == 0 {
        return tag;
    }

    let text = String::from_utf8_lossy(&block[..end]);
    if let Some(title) = parse_stream_title(&text) {
        tag.add(TagKind::Title, title);
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Tag ---

    #[test]
    fn tag_add_and_get() {
        let mut tag = Tag::new();
        tag.add(TagKind::Name, "Example FM");
        assert!(tag.has(TagKind::Name));
        assert!(!tag.has(TagKind::Title));
        assert_eq!(tag.get(TagKind::Name), Some("Example FM"));
        assert_eq!(tag.get(TagKind::Title), None);
    }

    #[test]
    fn tag_allows_multiple_items() {
        let mut tag = Tag::new();
        tag.add(TagKind::Title, "One");
        tag.add(TagKind::Title, "Two");
        // multimap: both retained, get() returns the first
        assert_eq!(tag.iter().count(), 2);
        assert_eq!(tag.get(TagKind::Title), Some("One"));
    }

    #[test]
    fn empty_tag() {
        let tag = Tag::new();
        assert!(tag.is_empty());
        assert_eq!(tag.iter().count(), 0);
    }

    // --- parse_meta_block ---

    #[test]
    fn parse_standard_block() {
        let tag = parse_meta_block(b"StreamTitle='Artist - Song';StreamUrl='http://x';");
        assert_eq!(tag.get(TagKind::Title), Some("Artist - Song"));
    }

    #[test]
    fn parse_null_padded_block() {
        let mut block = b"StreamTitle='Test Song';".to_vec();
        block.resize(48, 0);
        let tag = parse_meta_block(&block);
        assert_eq!(tag.get(TagKind::Title), Some("Test Song"));
    }

    #[test]
    fn other_keys_are_ignored() {
        let tag = parse_meta_block(b"StreamUrl='http://x';SomeKey='v';");
        assert!(tag.is_empty());
    }

    #[test]
    fn empty_title_produces_no_item() {
        let tag = parse_meta_block(b"StreamTitle='';StreamUrl='';");
        assert!(tag.is_empty());
    }

    #[test]
    fn all_null_block_is_empty() {
        let tag = parse_meta_block(&[0u8; 32]);
        assert!(tag.is_empty());
    }

    #[test]
    fn unterminated_title_is_ignored() {
        let tag = parse_meta_block(b"StreamTitle='No Closing Quote");
        assert!(tag.is_empty());
    }

    #[test]
    fn non_utf8_bytes_are_replaced() {
        let mut block = vec![0xFF, 0xFE];
        block.extend_from_slice(b"StreamTitle='Fallback';");
        block.resize(48, 0);
        let tag = parse_meta_block(&block);
        assert_eq!(tag.get(TagKind::Title), Some("Fallback"));
    }

    #[test]
    fn title_with_embedded_quote() {
        // the first "';" terminates the value
        let tag = parse_meta_block(b"StreamTitle='It's Alright';");
        assert_eq!(tag.get(TagKind::Title), Some("It's Alright"));
    }

    #[test]
    fn unicode_title() {
        let tag = parse_meta_block("StreamTitle='アーティスト - 曲名';".as_bytes());
        assert_eq!(tag.get(TagKind::Title), Some("アーティスト - 曲名"));
    }
}
