//! Source document parsing
//!
//! Documents are small enough to hold in memory, so they are parsed into a
//! plain element tree with quick-xml and then queried with simple
//! slash-separated paths (`transaction/value/@currency`).

use crate::stats::{StatsError, StatsResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// One XML element with its attributes, text and children
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Element> + 'n
    where
        'a: 'n,
    {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Elements reached by following a slash-separated child path
    pub fn select(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|el| el.children_named(segment))
                .collect();
        }
        current
    }

    /// Values at a path: attribute values when the last segment is `@name`,
    /// otherwise trimmed element text
    pub fn values(&self, path: &str) -> Vec<String> {
        match path.rsplit_once('@') {
            Some((parent, attr)) => self
                .select(parent.trim_end_matches('/'))
                .into_iter()
                .filter_map(|el| el.attr(attr))
                .map(str::to_string)
                .collect(),
            None => self
                .select(path)
                .into_iter()
                .map(|el| el.text.trim().to_string())
                .collect(),
        }
    }

    /// First value at a path
    pub fn value(&self, path: &str) -> Option<String> {
        self.values(path).into_iter().next()
    }

    /// Visit this element and every descendant, depth first
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// Parse a whole document into its root element
pub fn parse(bytes: &[u8]) -> StatsResult<Element> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| StatsError::Encoding(format!("invalid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let element = element_from(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| StatsError::Xml("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = t.unescape().map_err(|e| {
                        StatsError::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
                    })?;
                    top.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(StatsError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(StatsError::Xml(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| StatsError::Xml("document has no root element".to_string()))
}

fn element_from(start: &BytesStart) -> StatsResult<Element> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).to_string(),
        ..Default::default()
    };

    for attr in start.attributes() {
        let attr = attr.map_err(|e| StatsError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        element.attrs.insert(key, value);
    }

    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> StatsResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(StatsError::Xml("multiple root elements".to_string()));
        }
        None => *root = Some(element),
    }
    Ok(())
}
