use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use thiserror::Error;

use crate::tree::XmlNode;

/// Errors that can occur while parsing XML into an [`XmlNode`] tree.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input XML could not be decoded or tokenized.
    #[error("failed to parse XML at line {line}: {source}")]
    Xml {
        line: usize,
        #[source]
        source: quick_xml::Error,
    },
    /// Input bytes were not valid UTF-8 for tag/attribute/text extraction.
    #[error("invalid UTF-8 at line {line}: {source}")]
    Utf8 {
        line: usize,
        #[source]
        source: std::str::Utf8Error,
    },
    /// Failed to read input file.
    #[error("failed to read XML file: {0}")]
    Io(#[from] std::io::Error),
    /// Structural issue in XML document.
    #[error("malformed XML at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl ParseError {
    /// Line the error was detected on, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Xml { line, .. }
            | Self::Utf8 { line, .. }
            | Self::Malformed { line, .. } => Some(*line),
            Self::Io(_) => None,
        }
    }
}

/// Tracks the current line while the reader moves forward through the input.
struct LineCounter<'a> {
    input: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            line: 1,
        }
    }

    fn advance_to(&mut self, position: usize) -> usize {
        let end = position.min(self.input.len());
        if end > self.offset {
            self.line += self.input[self.offset..end]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.offset = end;
        }
        self.line
    }
}

/// Parse XML bytes into an [`XmlNode`] tree.
pub fn parse(xml: &[u8]) -> Result<XmlNode, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut lines = LineCounter::new(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event_start = position(&reader);
        let line = lines.advance_to(event_start);
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(source) => {
                let line = lines.advance_to(position(&reader));
                return Err(ParseError::Xml { line, source });
            }
        };

        match event {
            Event::Start(e) => {
                let node = build_node_start(&e, &reader, line)?;
                stack.push(node);
            }
            Event::Empty(e) => {
                let node = build_node_start(&e, &reader, line)?;
                attach(&mut stack, &mut root, node, line)?;
            }
            Event::Text(e) => {
                if let Some(current) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| ParseError::Xml {
                            line,
                            source: err.into(),
                        })?
                        .into_owned();
                    append_text(current, text);
                }
            }
            Event::CData(e) => {
                if let Some(current) = stack.last_mut() {
                    let text = std::str::from_utf8(e.as_ref())
                        .map_err(|source| ParseError::Utf8 { line, source })?
                        .to_string();
                    append_text(current, text);
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| ParseError::Malformed {
                    line,
                    message: "encountered closing tag without open tag".to_string(),
                })?;
                attach(&mut stack, &mut root, node, line)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Malformed {
            line: open.line,
            message: format!("unclosed element <{}> at end of document", open.tag),
        });
    }

    root.ok_or(ParseError::Malformed {
        line: lines.line,
        message: "no root element found".to_string(),
    })
}

/// Parse an XML file into an [`XmlNode`] tree.
pub fn parse_file(path: &Path) -> Result<XmlNode, ParseError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
    line: usize,
) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(ParseError::Malformed {
            line,
            message: "multiple top-level elements found".to_string(),
        });
    }
    *root = Some(node);
    Ok(())
}

fn append_text(current: &mut XmlNode, text: String) {
    if text.trim().is_empty() {
        return;
    }
    match &mut current.text {
        Some(existing) => existing.push_str(&text),
        None => current.text = Some(text),
    }
}

fn build_node_start(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    line: usize,
) -> Result<XmlNode, ParseError> {
    let tag = qname_to_string(e.name(), line)?;
    let mut node = XmlNode::new(tag);
    node.line = line;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Xml {
            line,
            source: quick_xml::Error::from(err),
        })?;
        let key = qname_to_string(attr.key, line)?;
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| ParseError::Xml {
                line,
                source: err.into(),
            })?
            .into_owned();
        node.attributes.insert(key, value);
    }

    Ok(node)
}

fn qname_to_string(name: QName<'_>, line: usize) -> Result<String, ParseError> {
    std::str::from_utf8(name.as_ref())
        .map(ToOwned::to_owned)
        .map_err(|source| ParseError::Utf8 { line, source })
}

#[cfg(test)]
mod tests {
    use super::{parse, ParseError};

    #[test]
    fn records_line_of_each_element() {
        let root = parse(b"<pfsense>\n  <filter>\n    <rule/>\n  </filter>\n</pfsense>\n")
            .expect("parse");
        let filter = root.get_child("filter").expect("filter");
        assert_eq!(root.line, 1);
        assert_eq!(filter.line, 2);
        assert_eq!(filter.children[0].line, 3);
    }

    #[test]
    fn reports_line_of_unclosed_element() {
        let err = parse(b"<pfsense>\n<filter>\n<rule>\n</filter>").expect_err("mismatched");
        assert!(err.line().is_some());
    }

    #[test]
    fn rejects_multiple_roots() {
        let err = parse(b"<a/>\n<b/>").expect_err("two roots");
        assert!(matches!(err, ParseError::Malformed { line: 2, .. }));
    }
}
