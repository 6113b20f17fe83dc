use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// A generic XML tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XmlNode {
    /// Element tag name.
    pub tag: String,
    /// XML attributes keyed by name.
    pub attributes: BTreeMap<String, String>,
    /// Child elements.
    pub children: Vec<XmlNode>,
    /// Optional text content.
    pub text: Option<String>,
    /// 1-based line of the opening tag in the parsed document, 0 for built nodes.
    #[serde(skip_serializing_if = "is_zero")]
    pub line: usize,
}

impl XmlNode {
    /// Create a new XML node with no attributes, children, or text.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            text: None,
            line: 0,
        }
    }

    /// Create a leaf node holding `text`.
    pub fn with_text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        let mut node = Self::new(tag);
        node.text = Some(text.into());
        node
    }

    /// Append `child` and return `self`, for building trees inline.
    pub fn child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    /// Return the first child with the provided tag.
    pub fn get_child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.tag == tag)
    }

    /// Return all children with the provided tag.
    pub fn get_children(&self, tag: &str) -> Vec<&XmlNode> {
        self.children.iter().filter(|child| child.tag == tag).collect()
    }

    /// Iterate children with the provided tag, in document order.
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |child| child.tag == tag)
    }

    /// Whether a child with `tag` exists (flag elements such as `<disabled/>`).
    pub fn has_child(&self, tag: &str) -> bool {
        self.get_child(tag).is_some()
    }

    /// Walk a nested child path and return terminal node text if found.
    pub fn get_text<'a>(&'a self, path: &[&str]) -> Option<&'a str> {
        if path.is_empty() {
            return self.text.as_deref();
        }

        let mut current = self;
        for segment in path {
            current = current.get_child(segment)?;
        }
        current.text.as_deref()
    }

    /// Clone of this tree with every recorded line reset to 0.
    ///
    /// Used to compare trees that went through a write/parse cycle, where
    /// element positions change but structure must not.
    pub fn without_lines(&self) -> XmlNode {
        XmlNode {
            tag: self.tag.clone(),
            attributes: self.attributes.clone(),
            children: self.children.iter().map(XmlNode::without_lines).collect(),
            text: self.text.clone(),
            line: 0,
        }
    }

    /// Trimmed, non-empty text of the direct child `tag`.
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.get_text(&[tag])
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl Display for XmlNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (key, value) in &self.attributes {
            write!(f, " {}=\"{}\"", key, value)?;
        }

        if self.children.is_empty() && self.text.is_none() {
            return write!(f, "/>");
        }

        write!(f, ">")?;
        if let Some(text) = &self.text {
            write!(f, "{}", text)?;
        }
        for child in &self.children {
            write!(f, "{}", child)?;
        }
        write!(f, "</{}>", self.tag)
    }
}
