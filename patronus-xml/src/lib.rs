//! Line-aware XML parsing and writing primitives used by the Patronus config importer.

pub mod parser;
pub mod tree;
pub mod writer;

pub use parser::{parse, parse_file, ParseError};
pub use tree::XmlNode;
pub use writer::{write, write_document, write_file, WriteError};
