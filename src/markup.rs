//! Markup parsing/rendering collaborator boundary.
//!
//! The engine never parses a markup dialect itself. Callers provide a codec
//! for the syntaxes their documents use; a parse or render failure is "no
//! result", logged at the call site, never an error that aborts a document.

use crate::content::ContentTree;

pub trait MarkupCodec {
    /// Parses `text` written in `syntax` into a content tree, or `None` when
    /// the text cannot be parsed.
    fn parse(&self, text: &str, syntax: &str) -> Option<ContentTree>;

    /// Renders a tree back into `syntax`, or `None` when it cannot be
    /// serialized.
    fn render(&self, tree: &ContentTree, syntax: &str) -> Option<String>;
}

/// Macro capability lookup: whether a macro's body is markup in the
/// document's own syntax (and therefore worth recursing into) rather than
/// opaque text.
pub trait MacroCatalog {
    fn accepts_markup(&self, macro_name: &str) -> bool;
}
