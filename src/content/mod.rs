//! Content model: what the sync engine reads from the repository and what
//! the store persists.

pub mod frontmatter;
pub mod image;
pub mod paths;
pub mod post;
pub mod render;

pub use image::{content_hash, Image};
pub use paths::ContentKind;
pub use post::Post;
pub use render::{CmarkRenderer, MarkdownRenderer, Rendered};
