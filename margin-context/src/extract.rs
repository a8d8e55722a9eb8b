//! Turns entity snapshots into plain text for indexing and embedding.
//!
//! Free-text fields may contain HTML from a rich-text editor or markdown typed
//! by hand. Both are reduced to readable plain text before the keyword index
//! or the embedding model sees them.

use crate::entity::Entity;
use regex::Regex;
use std::sync::LazyLock;

/// Texts longer than this many characters are split by [`crate::chunk::chunk`]
/// before embedding.
pub const CHUNK_THRESHOLD: usize = 500;

/// Maximum length of a stored or displayed preview, in characters.
pub const PREVIEW_LENGTH: usize = 200;

/// Title used when an entity has a blank title or name.
pub const UNTITLED: &str = "Untitled";

pub const QUERY_PREFIX: &str = "query: ";
pub const PASSAGE_PREFIX: &str = "passage: ";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```[^\n]*$").expect("code fence pattern"));
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("image pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("link pattern"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("html tag pattern"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("heading pattern"));
static BOLD_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").expect("bold pattern"));
static BOLD_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([^_\n]+)__").expect("bold pattern"));
static ITALIC_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("italic pattern"));
static ITALIC_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^_\n]+)_\b").expect("italic pattern"));
static STRIKETHROUGH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~([^~\n]+)~~").expect("strikethrough pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("inline code pattern"));
static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("inline space pattern"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank lines pattern"));

const HTML_ENTITIES: [(&str, &str); 7] = [
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    // Must come last so "&amp;lt;" decodes to "&lt;" and not "<".
    ("&amp;", "&"),
];

/// Title and body of an entity as stored in the keyword index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: String,
    pub body: String,
}

/// Removes HTML tags, common HTML entities and markdown decoration.
///
/// Link and image text is kept, their targets are dropped. Paragraph
/// structure survives as blank lines.
pub fn strip_markup(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, "");
    let text = IMAGE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, " ");

    let mut decoded = text.into_owned();
    for (entity, replacement) in HTML_ENTITIES {
        decoded = decoded.replace(entity, replacement);
    }

    let text = HEADING.replace_all(&decoded, "");
    let text = BOLD_STARS.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");

    let text = INLINE_SPACE.replace_all(&text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    BLANK_LINES.replace_all(&joined, "\n\n").trim().to_string()
}

/// The entity's title (or name) and its free-text fields, in display order.
fn fields(entity: &Entity) -> (&str, Vec<Option<&str>>) {
    match entity {
        Entity::Task(task) => (&task.title, vec![task.description.as_deref()]),
        Entity::Note(note) => (&note.title, vec![note.content.as_deref()]),
        Entity::Meeting(meeting) => (
            &meeting.title,
            vec![
                meeting.summary.as_deref(),
                meeting.notes.as_deref(),
                meeting.transcript.as_deref(),
            ],
        ),
        Entity::Project(project) => (&project.name, vec![project.description.as_deref()]),
        Entity::Stakeholder(stakeholder) => (
            &stakeholder.name,
            vec![
                stakeholder.role.as_deref(),
                stakeholder.organization.as_deref(),
                stakeholder.notes.as_deref(),
            ],
        ),
    }
}

fn stripped_body(free_text: Vec<Option<&str>>) -> Vec<String> {
    free_text
        .into_iter()
        .flatten()
        .map(strip_markup)
        .filter(|field| !field.is_empty())
        .collect()
}

/// Text fed to the embedding model: title first, then every non-empty
/// free-text field, separated by blank lines.
pub fn embeddable_text(entity: &Entity) -> String {
    let (title, free_text) = fields(entity);

    let mut parts = Vec::new();
    let title = title.trim();
    if !title.is_empty() {
        parts.push(title.to_string());
    }
    parts.extend(stripped_body(free_text));
    parts.join("\n\n")
}

/// Title and body for the keyword index.
pub fn extract(entity: &Entity) -> ExtractedContent {
    let (title, free_text) = fields(entity);
    let title = title.trim();

    ExtractedContent {
        title: if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title.to_string()
        },
        body: stripped_body(free_text).join("\n\n"),
    }
}

/// Change-detection token for a piece of text. Not a security boundary.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn should_chunk(text: &str) -> bool {
    text.chars().count() > CHUNK_THRESHOLD
}

/// Adds the role prefix that asymmetric retrieval models expect.
pub fn prepare_for_embedding(text: &str, is_query: bool) -> String {
    let prefix = if is_query { QUERY_PREFIX } else { PASSAGE_PREFIX };
    format!("{prefix}{text}")
}

/// Single-line preview of at most [`PREVIEW_LENGTH`] characters.
pub fn preview(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= PREVIEW_LENGTH {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(PREVIEW_LENGTH - 3).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Meeting, Note, Stakeholder, Task};

    #[test]
    fn test_strip_html() {
        let html = "<p>Discuss the <strong>Q3</strong> budget</p><p>Tom &amp; Jerry&nbsp;attend</p>";
        assert_eq!(strip_markup(html), "Discuss the Q3 budget Tom & Jerry attend");
    }

    #[test]
    fn test_strip_markdown() {
        let markdown = "# Launch plan\n\nShip **v2** with _care_ and see [the doc](https://example.com).\n\n![diagram](img.png)\n\nRun `cargo build` first.";
        assert_eq!(
            strip_markup(markdown),
            "Launch plan\n\nShip v2 with care and see the doc.\n\ndiagram\n\nRun cargo build first."
        );
    }

    #[test]
    fn test_strip_code_fences_keeps_code() {
        let markdown = "Before\n```rust\nlet x = 1;\n```\nAfter";
        assert_eq!(strip_markup(markdown), "Before\n\nlet x = 1;\n\nAfter");
    }

    #[test]
    fn test_snake_case_survives() {
        assert_eq!(strip_markup("rename user_id_field"), "rename user_id_field");
    }

    #[test]
    fn test_escaped_entities_decode_once() {
        assert_eq!(strip_markup("a &amp;lt; b"), "a &lt; b");
        assert_eq!(strip_markup("&lt;b&gt;bold&lt;/b&gt;"), "<b>bold</b>");
    }

    #[test]
    fn test_embeddable_text_orders_and_skips_fields() {
        let meeting = Entity::Meeting(Meeting {
            title: "Weekly sync".to_string(),
            summary: Some("Agreed on **dates**".to_string()),
            notes: Some("   ".to_string()),
            transcript: Some("Alice: hello".to_string()),
        });
        assert_eq!(
            embeddable_text(&meeting),
            "Weekly sync\n\nAgreed on dates\n\nAlice: hello"
        );

        let task = Entity::Task(Task {
            title: "Buy groceries".to_string(),
            description: None,
        });
        assert_eq!(embeddable_text(&task), "Buy groceries");
    }

    #[test]
    fn test_extract_uses_untitled_fallback() {
        let note = Entity::Note(Note {
            title: "  ".to_string(),
            content: Some("<p>Some thoughts</p>".to_string()),
        });
        let extracted = extract(&note);
        assert_eq!(extracted.title, UNTITLED);
        assert_eq!(extracted.body, "Some thoughts");
    }

    #[test]
    fn test_extract_stakeholder_body() {
        let stakeholder = Entity::Stakeholder(Stakeholder {
            name: "Ada Lovelace".to_string(),
            role: Some("Advisor".to_string()),
            organization: Some("Analytical Engines Ltd".to_string()),
            notes: None,
        });
        let extracted = extract(&stakeholder);
        assert_eq!(extracted.title, "Ada Lovelace");
        assert_eq!(extracted.body, "Advisor\n\nAnalytical Engines Ltd");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("hello world");
        assert_eq!(a, content_hash("hello world"));
        assert_ne!(a, content_hash("hello world!"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_should_chunk_threshold_counts_characters() {
        assert!(!should_chunk(&"a".repeat(CHUNK_THRESHOLD)));
        assert!(should_chunk(&"a".repeat(CHUNK_THRESHOLD + 1)));
        // 500 two-byte characters are still 500 characters.
        assert!(!should_chunk(&"é".repeat(CHUNK_THRESHOLD)));
    }

    #[test]
    fn test_prepare_for_embedding() {
        assert_eq!(prepare_for_embedding("rust", true), "query: rust");
        assert_eq!(prepare_for_embedding("rust", false), "passage: rust");
    }

    #[test]
    fn test_preview_collapses_and_truncates() {
        assert_eq!(preview("  one\n\ntwo\tthree "), "one two three");

        let long = "word ".repeat(100);
        let result = preview(&long);
        assert!(result.chars().count() <= PREVIEW_LENGTH);
        assert!(result.ends_with("..."));
    }
}
