//! Streaming XMLTV merge
//!
//! Merges the spilled guide documents of several providers into one document
//! without building a tree. The merge runs in two passes over the same stores:
//! first every `<channel>` that matches the allow-set and has not been emitted
//! yet, then every `<programme>` whose channel was emitted in the first pass.
//! Fragments are produced one element at a time through [`Iterator`].
//!
//! A store that fails to tokenize is checked before anything from it is
//! emitted and is skipped in both passes. HTML named entities such as
//! `&nbsp;` are replaced by their text; any other undefined entity makes the
//! store malformed.

use std::collections::HashSet;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader};

use bytes::{Bytes, BytesMut};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::escape::{escape, resolve_html5_entity, unescape, unescape_with};
use quick_xml::{Reader, Writer};
use tracing::{debug, warn};

use crate::epg::allow_set::{AllowSet, normalize_identifier};
use crate::epg::spill::SpillStore;
use crate::errors::MergeError;

const CHANNEL: &str = "channel";
const PROGRAMME: &str = "programme";
const DISPLAY_NAME: &[u8] = b"display-name";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Channels,
    Programmes,
    Footer,
    Done,
}

/// One element lifted out of a provider document
#[derive(Debug)]
struct Element {
    /// Unescaped attribute values in document order
    attributes: Vec<(String, String)>,
    /// Raw inner markup; `None` for a self-closing element
    inner: Option<Vec<u8>>,
    display_names: Vec<String>,
}

impl Element {
    fn render(&self, name: &str) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(b"<");
        out.extend_from_slice(name.as_bytes());
        for (key, value) in &self.attributes {
            out.extend_from_slice(b" ");
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(escape(value.as_str()).as_bytes());
            out.extend_from_slice(b"\"");
        }
        match &self.inner {
            None => out.extend_from_slice(b"/>"),
            Some(inner) => {
                out.extend_from_slice(b">");
                out.extend_from_slice(inner);
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b">");
            }
        }
        out.extend_from_slice(b"\n");
        out.freeze()
    }
}

fn attribute<'a>(attributes: &'a [(String, String)], key: &str) -> &'a str {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or_default()
}

fn xml_error(err: impl Display) -> MergeError {
    MergeError::Xml(err.to_string())
}

/// How an entity reference is carried into the merged document
#[derive(Debug, PartialEq, Eq)]
enum Reference {
    /// Predefined XML entity or character reference, copied as is
    Xml,
    /// HTML named entity, written out as its replacement text
    Resolved(String),
}

fn classify_reference(name: &str) -> Result<Reference, MergeError> {
    let raw = format!("&{name};");
    if unescape(&raw).is_ok() {
        return Ok(Reference::Xml);
    }
    match unescape_with(&raw, resolve_html5_entity) {
        Ok(text) => Ok(Reference::Resolved(text.into_owned())),
        Err(_) => Err(MergeError::UndefinedEntity(raw)),
    }
}

/// Lazily merged guide document
pub struct GuideMerge {
    stores: Vec<SpillStore>,
    allow: AllowSet,
    generator_name: String,
    phase: Phase,
    cursor: usize,
    reader: Option<Reader<BufReader<File>>>,
    buf: Vec<u8>,
    /// Per store: `Some(true)` once it tokenized cleanly
    usable: Vec<Option<bool>>,
    /// Normalized ids of emitted channels; dedups pass one and gates pass two
    kept_channels: HashSet<String>,
    programmes: usize,
}

impl GuideMerge {
    /// `stores` are read in the given order, which decides duplicate resolution
    pub fn new(stores: Vec<SpillStore>, allow: AllowSet, generator_name: impl Into<String>) -> Self {
        let usable = vec![None; stores.len()];
        Self {
            stores,
            allow,
            generator_name: generator_name.into(),
            phase: Phase::Header,
            cursor: 0,
            reader: None,
            buf: Vec::with_capacity(4096),
            usable,
            kept_channels: HashSet::new(),
            programmes: 0,
        }
    }

    fn header(&self) -> Bytes {
        Bytes::from(format!(
            "{XML_DECLARATION}\n<tv generator-info-name=\"{}\">\n",
            escape(self.generator_name.as_str())
        ))
    }

    fn next_fragment(&mut self) -> Option<Bytes> {
        while self.cursor < self.stores.len() {
            if self.reader.is_none() {
                match self.open_current() {
                    Ok(Some(reader)) => self.reader = Some(reader),
                    Ok(None) => {
                        self.cursor += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            provider_id = self.stores[self.cursor].provider_id(),
                            error = %e,
                            "Unable to open spilled guide"
                        );
                        self.cursor += 1;
                        continue;
                    }
                }
            }

            match self.scan_current() {
                Ok(Some(fragment)) => return Some(fragment),
                Ok(None) => {}
                Err(e) => warn!(
                    provider_id = self.stores[self.cursor].provider_id(),
                    phase = ?self.phase,
                    error = %e,
                    "Spilled guide became unreadable, skipping remainder"
                ),
            }
            self.reader = None;
            self.cursor += 1;
        }
        None
    }

    /// Reader for the current store, or `None` when the store is unusable
    fn open_current(&mut self) -> Result<Option<Reader<BufReader<File>>>, MergeError> {
        let store = &self.stores[self.cursor];
        let usable = match self.usable[self.cursor] {
            Some(usable) => usable,
            None => {
                let usable = match validate_document(store) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            provider_id = store.provider_id(),
                            error = %e,
                            "Skipping malformed guide document"
                        );
                        false
                    }
                };
                self.usable[self.cursor] = Some(usable);
                usable
            }
        };
        if !usable {
            return Ok(None);
        }
        Ok(Some(Reader::from_reader(store.reader()?)))
    }

    fn scan_current(&mut self) -> Result<Option<Bytes>, MergeError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match self.phase {
            Phase::Channels => loop {
                let Some(element) = next_element(reader, &mut self.buf, CHANNEL, true, |_| true)? else {
                    return Ok(None);
                };
                let id = normalize_identifier(attribute(&element.attributes, "id"));
                if id.is_empty() {
                    continue;
                }
                let matched = self.allow.contains(&id)
                    || element
                        .display_names
                        .iter()
                        .any(|name| self.allow.contains(name));
                if matched && self.kept_channels.insert(id) {
                    return Ok(Some(element.render(CHANNEL)));
                }
            },
            Phase::Programmes => {
                let kept = &self.kept_channels;
                let element = next_element(reader, &mut self.buf, PROGRAMME, false, |attributes| {
                    kept.contains(&normalize_identifier(attribute(attributes, "channel")))
                })?;
                Ok(element.map(|element| {
                    self.programmes += 1;
                    element.render(PROGRAMME)
                }))
            }
            _ => Ok(None),
        }
    }
}

impl Iterator for GuideMerge {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            match self.phase {
                Phase::Header => {
                    self.phase = Phase::Channels;
                    return Some(self.header());
                }
                Phase::Channels | Phase::Programmes => {
                    if let Some(fragment) = self.next_fragment() {
                        return Some(fragment);
                    }
                    self.phase = if self.phase == Phase::Channels {
                        Phase::Programmes
                    } else {
                        Phase::Footer
                    };
                    self.cursor = 0;
                    self.reader = None;
                }
                Phase::Footer => {
                    debug!(
                        stores = self.stores.len(),
                        channels = self.kept_channels.len(),
                        programmes = self.programmes,
                        "Guide merge finished"
                    );
                    self.phase = Phase::Done;
                    return Some(Bytes::from_static(b"</tv>"));
                }
                Phase::Done => return None,
            }
        }
    }
}

/// Advance to the next `name` element accepted by `accept` and lift it out
///
/// Elements are matched by local name at any depth. Rejected elements are
/// skipped without copying their content.
fn next_element<R, F>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    name: &str,
    collect_names: bool,
    accept: F,
) -> Result<Option<Element>, MergeError>
where
    R: BufRead,
    F: Fn(&[(String, String)]) -> bool,
{
    loop {
        buf.clear();
        let event = reader.read_event_into(buf).map_err(xml_error)?;
        let found = match &event {
            Event::Start(start) if start.local_name().as_ref() == name.as_bytes() => {
                Some((read_attributes(start)?, false))
            }
            Event::Empty(start) if start.local_name().as_ref() == name.as_bytes() => {
                Some((read_attributes(start)?, true))
            }
            Event::Eof => return Ok(None),
            _ => None,
        };
        drop(event);

        let Some((attributes, empty)) = found else {
            continue;
        };
        if !accept(&attributes) {
            if !empty {
                skip_inner(reader, buf, name)?;
            }
            continue;
        }

        if empty {
            return Ok(Some(Element {
                attributes,
                inner: None,
                display_names: Vec::new(),
            }));
        }
        let (inner, display_names) = capture_inner(reader, buf, name, collect_names)?;
        return Ok(Some(Element {
            attributes,
            inner: Some(inner),
            display_names,
        }));
    }
}

fn read_attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, MergeError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        let value = unescape_with(&raw, resolve_html5_entity)
            .map_err(|e| MergeError::UndefinedEntity(format!("attribute {key}: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

/// `start` as is when its attribute values only use XML references, otherwise
/// rebuilt from the decoded values
fn normalize_attributes(start: BytesStart<'_>) -> Result<BytesStart<'_>, MergeError> {
    let plain = start.attributes().all(|attr| {
        attr.is_ok_and(|attr| unescape(&String::from_utf8_lossy(&attr.value)).is_ok())
    });
    if plain {
        return Ok(start);
    }
    let attributes = read_attributes(&start)?;
    let mut rebuilt = BytesStart::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for (key, value) in &attributes {
        rebuilt.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(rebuilt)
}

/// Copy everything up to the matching end tag, collecting text-only display names
fn capture_inner<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    name: &str,
    collect_names: bool,
) -> Result<(Vec<u8>, Vec<String>), MergeError> {
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut display_names = Vec::new();
    // (depth of the open display-name, offset where its content starts)
    let mut open_name: Option<(usize, usize)> = None;

    loop {
        buf.clear();
        match reader.read_event_into(buf).map_err(xml_error)? {
            Event::End(_) if depth == 0 => break,
            Event::End(end) => {
                depth -= 1;
                if let Some((name_depth, offset)) = open_name
                    && name_depth == depth
                {
                    if let Some(text) = display_text(&writer.get_ref()[offset..]) {
                        display_names.push(text);
                    }
                    open_name = None;
                }
                writer.write_event(Event::End(end)).map_err(xml_error)?;
            }
            Event::Start(start) => {
                let is_name = collect_names && start.local_name().as_ref() == DISPLAY_NAME;
                writer
                    .write_event(Event::Start(normalize_attributes(start)?))
                    .map_err(xml_error)?;
                if is_name && open_name.is_none() {
                    open_name = Some((depth, writer.get_ref().len()));
                }
                depth += 1;
            }
            Event::Eof => {
                return Err(MergeError::Truncated {
                    element: name.to_string(),
                });
            }
            Event::Empty(start) => {
                writer
                    .write_event(Event::Empty(normalize_attributes(start)?))
                    .map_err(xml_error)?;
            }
            Event::GeneralRef(reference) => {
                let kind = classify_reference(&String::from_utf8_lossy(&reference))?;
                match kind {
                    Reference::Xml => writer.write_event(Event::GeneralRef(reference)).map_err(xml_error)?,
                    Reference::Resolved(text) => writer
                        .write_event(Event::Text(BytesText::new(&text)))
                        .map_err(xml_error)?,
                }
            }
            other => writer.write_event(other).map_err(xml_error)?,
        }
    }
    Ok((writer.into_inner(), display_names))
}

fn skip_inner<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, name: &str) -> Result<(), MergeError> {
    let mut depth = 0usize;
    loop {
        buf.clear();
        match reader.read_event_into(buf).map_err(xml_error)? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(()),
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(MergeError::Truncated {
                    element: name.to_string(),
                });
            }
            _ => {}
        }
    }
}

/// Entity-decoded content of a display name that contains no markup
fn display_text(raw: &[u8]) -> Option<String> {
    if raw.is_empty() || raw.contains(&b'<') {
        return None;
    }
    let raw = String::from_utf8_lossy(raw);
    Some(match unescape(&raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.into_owned(),
    })
}

/// Tokenize a whole store to make sure it can be merged
fn validate_document(store: &SpillStore) -> Result<(), MergeError> {
    let mut reader = Reader::from_reader(store.reader()?);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(start) => {
                read_attributes(&start)?;
                depth += 1;
                saw_root = true;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Empty(start) => {
                read_attributes(&start)?;
                saw_root = true;
            }
            Event::GeneralRef(reference) => {
                classify_reference(&String::from_utf8_lossy(&reference))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !saw_root {
        return Err(xml_error("document has no root element"));
    }
    if depth != 0 {
        return Err(MergeError::Truncated {
            element: "tv".to_string(),
        });
    }
    Ok(())
}
