//! Markdown rendering
//!
//! The sync engine only depends on the [`MarkdownRenderer`] trait. The default
//! implementation uses pulldown-cmark and derives the title and snippet from
//! the document itself when the frontmatter does not provide them.

use pulldown_cmark::{html, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use super::frontmatter;
use crate::error::{Error, Result};

/// Title used when a post has neither frontmatter title nor a level-1 heading
pub const DEFAULT_TITLE: &str = "Untitled";

/// Output of rendering a single markdown file
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub title: String,
    pub snippet: String,
    pub html: Vec<u8>,
}

/// Converts markdown to HTML
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &[u8]) -> Result<Rendered>;
}

/// pulldown-cmark backed renderer
#[derive(Debug, Clone)]
pub struct CmarkRenderer {
    snippet_length: usize,
    options: Options,
}

impl Default for CmarkRenderer {
    fn default() -> Self {
        Self::new(200)
    }
}

impl CmarkRenderer {
    pub fn new(snippet_length: usize) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TASKLISTS);
        Self {
            snippet_length,
            options,
        }
    }
}

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, markdown: &[u8]) -> Result<Rendered> {
        let text = std::str::from_utf8(markdown).map_err(|e| Error::Render {
            message: format!("post is not valid UTF-8: {}", e),
        })?;
        let (matter, body) = frontmatter::parse(text)?;

        let mut events: Vec<Event<'_>> = Parser::new_ext(body, self.options).collect();

        let title = match matter.title {
            Some(title) => title,
            None => take_title(&mut events).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        };

        let snippet = match matter.summary {
            Some(summary) => summary,
            None => truncate(&first_paragraph(&events), self.snippet_length),
        };

        let mut out = String::new();
        html::push_html(&mut out, events.into_iter());

        Ok(Rendered {
            title,
            snippet,
            html: out.into_bytes(),
        })
    }
}

/// Remove the first level-1 heading from the event stream and return its text
fn take_title(events: &mut Vec<Event<'_>>) -> Option<String> {
    let start = events.iter().position(|e| {
        matches!(
            e,
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            })
        )
    })?;
    let len = events[start..]
        .iter()
        .position(|e| matches!(e, Event::End(TagEnd::Heading(HeadingLevel::H1))))?;

    let title = plain_text(&events[start..=start + len]);
    events.drain(start..=start + len);

    let title = title.trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Plain text of the first paragraph
fn first_paragraph(events: &[Event<'_>]) -> String {
    let Some(start) = events
        .iter()
        .position(|e| matches!(e, Event::Start(Tag::Paragraph)))
    else {
        return String::new();
    };
    let end = events[start..]
        .iter()
        .position(|e| matches!(e, Event::End(TagEnd::Paragraph)))
        .map(|len| start + len)
        .unwrap_or(events.len() - 1);

    plain_text(&events[start..=end]).trim().to_string()
}

fn plain_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            _ => {}
        }
    }
    text
}

/// Truncate on a char boundary, appending an ellipsis when shortened
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars).collect();
    short.truncate(short.trim_end().len());
    short.push('…');
    short
}
