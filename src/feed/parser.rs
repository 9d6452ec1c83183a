//! Streaming extraction of `<item>` records from an RSS document.
//!
//! The document is never materialized as a tree: a pull reader walks the
//! events and only the subtree of each matched `item` is expanded into a
//! flat [`FeedItem`].

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Qualified tag of the rich-content child carrying an HTML fragment.
const ENCODED_CONTENT_TAG: &str = "content:encoded";

/// First `src="..."` attribute inside the encoded HTML.
static IMAGE_SRC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)src="([^"]*)""#).unwrap());

/// Failure while expanding a single `item`. Always recovered by skipping the item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("XML error inside item: {0}")]
    Xml(String),

    #[error("Document ended inside an item")]
    UnexpectedEof,
}

/// One immediate child of an `item` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedNode {
    /// Character data sitting directly under `item`.
    Text,
    /// Any named child; `value` is the text content of its whole subtree.
    NamedField { name: String, value: String },
    /// The `content:encoded` child.
    EncodedContent(String),
}

impl FeedNode {
    fn element(name: String, value: String) -> Self {
        if name == ENCODED_CONTENT_TAG {
            FeedNode::EncodedContent(value)
        } else {
            FeedNode::NamedField { name, value }
        }
    }
}

/// Flat field record for one feed item.
///
/// `image` is only meaningful when `has_encoded_content` is set: a
/// `content:encoded` child without any `src="..."` leaves it `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub fields: HashMap<String, String>,
    pub image: Option<String>,
    /// A `content:encoded` child was present.
    pub has_encoded_content: bool,
}

impl FeedItem {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.has_encoded_content
    }

    fn apply(&mut self, node: FeedNode) {
        match node {
            FeedNode::Text => {}
            FeedNode::NamedField { name, value } => {
                self.fields.insert(name, value);
            }
            FeedNode::EncodedContent(html) => {
                self.has_encoded_content = true;
                self.image = extract_image(&html);
            }
        }
    }
}

/// Items parsed from a feed plus the number dropped as malformed.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub items: Vec<FeedItem>,
    pub skipped: usize,
}

/// Returns the first `src="..."` value in an HTML fragment, if any.
pub fn extract_image(html: &str) -> Option<String> {
    IMAGE_SRC_PATTERN
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parses every `item` element of the document, in document order.
///
/// Never fails as a whole: a malformed item is skipped and counted, and an
/// XML error outside any item ends the scan with what was collected so far.
pub fn parse_feed(bytes: &[u8]) -> ParseResult {
    let mut reader = Reader::from_reader(bytes);
    let mut result = ParseResult::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"item" => {
                match read_item(&mut reader) {
                    Ok(item) if item.is_empty() => {
                        tracing::debug!("Skipping item without fields");
                    }
                    Ok(item) => result.items.push(item),
                    Err(e) => {
                        tracing::warn!(
                            position = reader.buffer_position(),
                            error = %e,
                            "Skipping malformed feed item"
                        );
                        result.skipped += 1;
                    }
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"item" => {
                tracing::debug!("Skipping empty item element");
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(
                    position = reader.buffer_position(),
                    error = %e,
                    parsed = result.items.len(),
                    "XML error outside of an item, stopping scan"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    result
}

/// Expands the subtree of the `item` whose start tag was just read.
fn read_item<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<FeedItem, ItemError> {
    let mut item = FeedItem::default();
    let mut buf = Vec::new();

    loop {
        let node = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let value = read_text_content(reader)?;
                FeedNode::element(name, value)
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                FeedNode::element(name, String::new())
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => FeedNode::Text,
            Ok(Event::End(_)) => return Ok(item),
            Ok(Event::Eof) => return Err(ItemError::UnexpectedEof),
            Ok(_) => FeedNode::Text,
            Err(e) => return Err(ItemError::Xml(e.to_string())),
        };
        item.apply(node);
        buf.clear();
    }
}

/// Concatenated text of the element whose start tag was just read,
/// including all descendants. Consumes the matching end tag.
fn read_text_content<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<String, ItemError> {
    let mut text = String::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            Ok(Event::Text(t)) => {
                let unescaped = t.unescape().map_err(|e| ItemError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) => {
                let decoded = c.decode().map_err(|e| ItemError::Xml(e.to_string()))?;
                text.push_str(&decoded);
            }
            Ok(Event::Eof) => return Err(ItemError::UnexpectedEof),
            Ok(_) => {}
            Err(e) => return Err(ItemError::Xml(e.to_string())),
        }
        buf.clear();
    }
}
