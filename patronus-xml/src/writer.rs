use std::fs;
use std::path::Path;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::tree::XmlNode;

const INDENT: usize = 2;

/// Errors that can occur while writing XML from an [`XmlNode`] tree.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to write XML file: {0}")]
    Io(#[from] std::io::Error),
    /// Text that fits neither an escaped text node nor a CDATA section.
    #[error("text of <{tag}> contains both markup characters and ']]>'")]
    Unwritable { tag: String },
}

/// Serialize a tree as an XML fragment, without a declaration.
pub fn write(node: &XmlNode) -> Result<Vec<u8>, WriteError> {
    serialize(node, false)
}

/// Serialize a tree as a standalone configuration document: XML
/// declaration, indented elements, trailing newline.
pub fn write_document(node: &XmlNode) -> Result<Vec<u8>, WriteError> {
    let mut bytes = serialize(node, true)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// [`write_document`] to `path`.
pub fn write_file(node: &XmlNode, path: &Path) -> Result<(), WriteError> {
    fs::write(path, write_document(node)?)?;
    Ok(())
}

fn serialize(node: &XmlNode, declaration: bool) -> Result<Vec<u8>, WriteError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    if declaration {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    }
    write_node(&mut writer, node)?;
    Ok(writer.into_inner())
}

/// Free text with markup characters goes into a CDATA section, the way
/// the firewall GUIs store descriptions.
fn needs_cdata(text: &str) -> bool {
    text.contains(['<', '>', '&', '"', '\''])
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<(), WriteError> {
    let mut start = BytesStart::new(node.tag.as_str());
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if node.children.is_empty() && node.text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;

    if let Some(text) = &node.text {
        if !needs_cdata(text) {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        } else if text.contains("]]>") {
            return Err(WriteError::Unwritable {
                tag: node.tag.clone(),
            });
        } else {
            writer.write_event(Event::CData(BytesCData::new(text)))?;
        }
    }
    for child in &node.children {
        write_node(writer, child)?;
    }

    writer.write_event(Event::End(BytesEnd::new(node.tag.as_str())))?;
    Ok(())
}
