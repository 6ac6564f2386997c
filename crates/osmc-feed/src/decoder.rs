//! Segment decoder: gzip → OSM XML → raw changeset elements.
//!
//! Segment shape:
//!
//! ```xml
//! <osm>
//!   <changeset id="113928427" created_at="2021-11-18T06:17:42Z" open="false" ...>
//!     <tag k="comment" v="fix road"/>
//!     <discussion>...</discussion>
//!   </changeset>
//! </osm>
//! ```
//!
//! The decoder keeps attributes verbatim and does no type coercion; unknown
//! nested entries are preserved as [`NestedEntry::Other`] so the formatter can
//! report them.

use std::io::Read;

use flate2::read::MultiGzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use crate::FeedError;

/// One `<changeset>` element as published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawElement {
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub entries: Vec<NestedEntry>,
}

impl RawElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }
}

/// Child entries of a changeset element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedEntry {
    Tag { key: String, value: String },
    /// Comment thread; content is not modeled yet.
    Discussion,
    /// Any other child element, by name.
    Other(String),
}

/// Decompress and parse one segment payload.
pub fn decode_segment(payload: &[u8]) -> Result<Vec<RawElement>, FeedError> {
    let xml = decompress(payload)?;
    parse_elements(&xml)
}

pub fn decompress(payload: &[u8]) -> Result<String, FeedError> {
    let mut out = String::new();
    MultiGzDecoder::new(payload)
        .read_to_string(&mut out)
        .map_err(|e| FeedError::Decode(format!("gzip payload: {e}")))?;
    Ok(out)
}

pub fn parse_elements(xml: &str) -> Result<Vec<RawElement>, FeedError> {
    let mut reader = Reader::from_str(xml);
    let mut elements = Vec::new();
    let mut current: Option<RawElement> = None;
    let mut in_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            FeedError::Decode(format!("xml at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                if !in_root {
                    in_root = true;
                } else if let Some(el) = current.as_mut() {
                    if let Some(entry) = nested_entry(&e)? {
                        el.entries.push(entry);
                    }
                    skip_subtree(&mut reader, &e)?;
                } else if e.name().as_ref() == b"changeset" {
                    current = Some(start_element(&e)?);
                } else {
                    warn!(element = %element_name(&e), "skipping non-changeset element in segment");
                    skip_subtree(&mut reader, &e)?;
                }
            }
            Event::Empty(e) => {
                if !in_root {
                    // `<osm/>`: an empty segment.
                    continue;
                } else if let Some(el) = current.as_mut() {
                    if let Some(entry) = nested_entry(&e)? {
                        el.entries.push(entry);
                    }
                } else if e.name().as_ref() == b"changeset" {
                    elements.push(start_element(&e)?);
                } else {
                    warn!(element = %element_name(&e), "skipping non-changeset element in segment");
                }
            }
            Event::End(_) => {
                // Nested subtrees are consumed by skip_subtree, so an End is either
                // the current changeset closing or the root closing.
                match current.take() {
                    Some(el) => elements.push(el),
                    None => in_root = false,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        return Err(FeedError::Decode(
            "segment ended inside a changeset element".to_string(),
        ));
    }

    Ok(elements)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn skip_subtree(reader: &mut Reader<&[u8]>, e: &BytesStart<'_>) -> Result<(), FeedError> {
    reader
        .read_to_end(e.name())
        .map_err(|err| FeedError::Decode(format!("xml subtree <{}>: {err}", element_name(e))))?;
    Ok(())
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, FeedError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            FeedError::Decode(format!("attribute of <{}>: {err}", element_name(e)))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| FeedError::Decode(format!("attribute '{key}': {err}")))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn start_element(e: &BytesStart<'_>) -> Result<RawElement, FeedError> {
    Ok(RawElement {
        attributes: attributes(e)?,
        entries: Vec::new(),
    })
}

fn nested_entry(e: &BytesStart<'_>) -> Result<Option<NestedEntry>, FeedError> {
    match e.name().as_ref() {
        b"tag" => {
            let attrs = attributes(e)?;
            let mut key = None;
            let mut value = None;
            for (k, v) in attrs {
                match k.as_str() {
                    "k" => key = Some(v),
                    "v" => value = Some(v),
                    _ => {}
                }
            }
            match key {
                Some(key) => Ok(Some(NestedEntry::Tag {
                    key,
                    value: value.unwrap_or_default(),
                })),
                None => {
                    warn!("skipping <tag> without a k attribute");
                    Ok(None)
                }
            }
        }
        b"discussion" => Ok(Some(NestedEntry::Discussion)),
        _ => Ok(Some(NestedEntry::Other(element_name(e)))),
    }
}
