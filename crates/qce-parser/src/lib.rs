//! `qce-parser` — raw bridge messages to the normalised export model.
//!
//! One pass over the element union per message: text and HTML renderings,
//! mention/emoji/resource discovery, reply resolution via a bounded LRU of
//! recently seen messages. Failures degrade, never drop — a broken element
//! becomes a `special` entry, a broken message becomes a stub.

pub mod escape;
pub mod parser;
pub mod render;
pub mod reply;

pub use escape::escape_html;
pub use parser::{update_resource_paths, MessageParser, ParseError};
pub use reply::ReplyIndex;
