//! YAML frontmatter parsing
//!
//! Posts may start with YAML frontmatter delimited by `---`:
//!
//! ```markdown
//! ---
//! title: My Post
//! summary: One line teaser shown in listings
//! ---
//!
//! # Heading
//! ```
//!
//! Only `title` and `summary` are read; other keys are ignored.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Recognised frontmatter fields
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct FrontMatter {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

const FENCE: &str = "---";

/// Split markdown into its frontmatter and body.
///
/// Frontmatter opens when the first non-blank line is exactly `---` and ends
/// at the next line that is exactly `---`.
pub fn parse(content: &str) -> Result<(FrontMatter, &str)> {
    let (opening, after_opening) = split_line(content.trim_start());
    if !is_fence(opening) {
        return Ok((FrontMatter::default(), content));
    }

    let mut rest = after_opening;
    let mut yaml_len = 0;
    let body = loop {
        if rest.is_empty() {
            return Err(Error::Render {
                message: "unclosed frontmatter: missing closing ---".to_string(),
            });
        }
        let (line, next) = split_line(rest);
        if is_fence(line) {
            break next;
        }
        yaml_len += rest.len() - next.len();
        rest = next;
    };

    let yaml_content = after_opening[..yaml_len].trim();
    if yaml_content.is_empty() {
        return Ok((FrontMatter::default(), body));
    }

    let fields: serde_yaml::Value = serde_yaml::from_str(yaml_content)?;
    let matter = match fields {
        serde_yaml::Value::Null => FrontMatter::default(),
        value @ serde_yaml::Value::Mapping(_) => serde_yaml::from_value(value)?,
        _ => {
            return Err(Error::Render {
                message: "frontmatter must be a YAML mapping".to_string(),
            })
        }
    };

    Ok((matter, body))
}

/// First line (without its newline) and everything after it
fn split_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_end() == FENCE
}
