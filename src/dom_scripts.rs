//! Page-context helper script embedding.
//!
//! The chunking and annotation helpers live in their own `.js` file so editors
//! can highlight them, and are bundled as a string at compile time.

/// Embedded contents of `scripts/dom_chunks.js`.
pub const DOM_CHUNKS_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/dom_chunks.js"
));

/// Return the embedded DOM helper script.
pub fn dom_chunks_script() -> &'static str {
    DOM_CHUNKS_SCRIPT
}
