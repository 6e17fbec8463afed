//! Import discovery for JavaScript modules.
//!
//! Provides a lexical scanner that reports the byte ranges of import and
//! re-export specifiers, so they can be rewritten in place.

mod scan;

pub use scan::{scan_imports, ImportKind, ImportSpan, LexError};
