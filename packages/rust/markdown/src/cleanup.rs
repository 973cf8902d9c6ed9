//! Normalization passes for fetched markdown.
//!
//! Each pass is a function applied in a fixed sequence. Fenced code blocks are
//! never modified by any pass after decoding.

use std::sync::LazyLock;

use regex::Regex;

use crate::DocumentKind;

/// Run the full normalization pipeline on raw bytes.
pub(crate) fn run_pipeline(bytes: &[u8], kind: DocumentKind) -> String {
    let text = decode(bytes);
    let body = strip_front_matter(&text);
    let stripped = strip_markup(body, kind);
    collapse_blank_lines(&stripped)
}

// ---------------------------------------------------------------------------
// Fence tracking
// ---------------------------------------------------------------------------

/// An opening code fence: its character and run length.
#[derive(Debug, Clone, Copy)]
struct Fence {
    ch: u8,
    len: usize,
}

/// Parse a fence marker line (up to 3 spaces of indent, then 3+ ` or ~).
fn fence_marker(line: &str) -> Option<(Fence, &str)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let ch = *rest.as_bytes().first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = rest.bytes().take_while(|&b| b == ch).count();
    if len < 3 {
        return None;
    }
    Some((Fence { ch, len }, &rest[len..]))
}

/// Tracks whether consecutive lines are inside a fenced code block.
#[derive(Debug, Default)]
struct FenceTracker {
    open: Option<Fence>,
}

impl FenceTracker {
    /// Feed one line; returns true when the line belongs to a code block
    /// (fence lines included).
    fn is_code(&mut self, line: &str) -> bool {
        match self.open {
            Some(open) => {
                if let Some((fence, rest)) = fence_marker(line) {
                    if fence.ch == open.ch && fence.len >= open.len && rest.trim().is_empty() {
                        self.open = None;
                    }
                }
                true
            }
            None => match fence_marker(line) {
                // Backtick fences may not carry backticks in their info string.
                Some((fence, rest)) if fence.ch == b'~' || !rest.contains('`') => {
                    self.open = Some(fence);
                    true
                }
                _ => false,
            },
        }
    }
}

/// Split text into alternating prose / code blocks, preserving every byte.
fn split_blocks(text: &str) -> Vec<(bool, &str)> {
    let mut blocks: Vec<(bool, &str)> = Vec::new();
    let mut tracker = FenceTracker::default();
    let mut start = 0;
    let mut current: Option<bool> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let code = tracker.is_code(line);
        if current.is_some_and(|c| c != code) {
            blocks.push((current.unwrap_or(false), &text[start..offset]));
            start = offset;
        }
        current = Some(code);
        offset += line.len();
    }
    if let Some(code) = current {
        blocks.push((code, &text[start..]));
    }

    blocks
}

// ---------------------------------------------------------------------------
// Pass 1: Decode
// ---------------------------------------------------------------------------

/// Decode UTF-8, replacing invalid sequences, and drop a leading byte-order mark.
fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text.into_owned(),
    }
}

// ---------------------------------------------------------------------------
// Pass 2: Front matter
// ---------------------------------------------------------------------------

/// Remove a leading `---` (YAML) or `+++` (TOML) block.
///
/// The block must be closed and hold at least one `key:` (YAML) or `key =`
/// (TOML) line. Anything else, such as a document opening with a `---`
/// thematic break, is kept.
fn strip_front_matter(text: &str) -> &str {
    static YAML_KEY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"^["']?[A-Za-z0-9_-]+["']?\s*:"#).expect("valid regex"));
    static TOML_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"^(?:\[[^\]]+\]\s*$|["']?[A-Za-z0-9_.-]+["']?\s*=)"#).expect("valid regex")
    });

    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return text;
    };

    let (closers, key_re): (&[&str], &Regex) = match first.trim_end() {
        "---" => (&["---", "..."][..], &*YAML_KEY_RE),
        "+++" => (&["+++"][..], &*TOML_KEY_RE),
        _ => return text,
    };

    let mut offset = first.len();
    let mut has_key = false;
    for line in lines {
        offset += line.len();
        let line = line.trim_end();
        if closers.contains(&line) {
            return if has_key { &text[offset..] } else { text };
        }
        has_key |= key_re.is_match(line);
    }

    text
}

// ---------------------------------------------------------------------------
// Pass 3: Strip markup
// ---------------------------------------------------------------------------

/// Remove HTML/JSX markup outside fenced code blocks and inline code spans.
fn strip_markup(text: &str, kind: DocumentKind) -> String {
    split_blocks(text)
        .into_iter()
        .map(|(code, block)| {
            if code {
                block.to_string()
            } else {
                map_outside_inline_code(block, |prose| strip_prose_markup(prose, kind))
            }
        })
        .collect()
}

fn strip_prose_markup(prose: &str, kind: DocumentKind) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex")
    });
    static STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex")
    });
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        // Opening, closing, and self-closing tags; attributes may span lines.
        Regex::new(r"</?[A-Za-z][A-Za-z0-9:._-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });
    static MDX_ESM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^(?:import|export)\s.*$").expect("valid regex"));
    static MDX_COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{/\*.*?\*/\}").expect("valid regex"));

    let mut out = COMMENT_RE.replace_all(prose, "").into_owned();
    out = SCRIPT_RE.replace_all(&out, "").into_owned();
    out = STYLE_RE.replace_all(&out, "").into_owned();
    if kind == DocumentKind::Mdx {
        out = MDX_ESM_RE.replace_all(&out, "").into_owned();
        out = MDX_COMMENT_RE.replace_all(&out, "").into_owned();
    }
    TAG_RE.replace_all(&out, "").into_owned()
}

/// Apply `f` to the text between inline code spans; spans are copied verbatim.
fn map_outside_inline_code(text: &str, f: impl Fn(&str) -> String) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut plain_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = backtick_run(bytes, i);
        match closing_run_end(bytes, i + run, run) {
            Some(end) => {
                out.push_str(&f(&text[plain_start..i]));
                out.push_str(&text[i..end]);
                i = end;
                plain_start = end;
            }
            // An unmatched run is literal text.
            None => i += run,
        }
    }

    out.push_str(&f(&text[plain_start..]));
    out
}

fn backtick_run(bytes: &[u8], start: usize) -> usize {
    bytes[start..].iter().take_while(|&&b| b == b'`').count()
}

/// End offset of the next backtick run of exactly `len`, searching from `from`.
fn closing_run_end(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b'`' {
            let run = backtick_run(bytes, j);
            if run == len {
                return Some(j + run);
            }
            j += run;
        } else {
            j += 1;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Pass 4: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse every run of blank lines outside code blocks to a single empty
/// line (at most two consecutive line breaks) and trim blank lines at both ends.
fn collapse_blank_lines(text: &str) -> String {
    let mut tracker = FenceTracker::default();
    let mut lines: Vec<&str> = Vec::new();
    let mut pending_blank = false;

    for line in text.split('\n') {
        let code = tracker.is_code(line);
        if !code && line.trim().is_empty() {
            pending_blank = true;
            continue;
        }

        if pending_blank && !lines.is_empty() {
            lines.push("");
        }
        pending_blank = false;

        if code {
            lines.push(line);
        } else {
            lines.push(line.strip_suffix('\r').unwrap_or(line));
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_replaces_invalid_utf8() {
        let result = decode(b"caf\xe9 ok");
        assert_eq!(result, "caf\u{fffd} ok");
    }

    #[test]
    fn decode_strips_bom() {
        assert_eq!(decode("\u{feff}---\n".as_bytes()), "---\n");
    }

    #[test]
    fn front_matter_yaml_removed() {
        let input = "---\ntitle: Intro\nsidebar_position: 1\n---\n# Intro\n";
        assert_eq!(strip_front_matter(input), "# Intro\n");
    }

    #[test]
    fn front_matter_toml_removed() {
        let input = "+++\ntitle = \"Intro\"\n+++\nBody";
        assert_eq!(strip_front_matter(input), "Body");
    }

    #[test]
    fn front_matter_must_start_document() {
        let input = "# Title\n---\nnot: frontmatter\n---\n";
        assert_eq!(strip_front_matter(input), input);
    }

    #[test]
    fn leading_thematic_break_kept() {
        let input = "---\n# Title\n\nText\n\n---\nMore";
        assert_eq!(strip_front_matter(input), input);

        let normalized = run_pipeline(input.as_bytes(), DocumentKind::Markdown);
        assert!(normalized.contains("# Title"));
        assert!(normalized.contains("More"));
    }

    #[test]
    fn front_matter_with_nested_keys_removed() {
        let input = "---\ntags:\n  - setup\n---\nBody";
        assert_eq!(strip_front_matter(input), "Body");

        let input = "+++\n[extra]\nweight = 2\n+++\nBody";
        assert_eq!(strip_front_matter(input), "Body");
    }

    #[test]
    fn unclosed_front_matter_kept() {
        let input = "---\ntitle: Intro\n# Intro";
        assert_eq!(strip_front_matter(input), input);
    }

    #[test]
    fn strip_markup_removes_tags_keeps_text() {
        let input = "<div align=\"center\">\n  <img src=\"logo.png\" />\n</div>\n\n<p>Hello <b>world</b></p>";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert!(!result.contains('<'));
        assert!(result.contains("Hello world"));
    }

    #[test]
    fn strip_markup_removes_comments_and_scripts() {
        let input = "A<!-- hidden\nnote -->B\n<script>alert(1)</script>C<style>p{}</style>";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert_eq!(result, "AB\nC");
    }

    #[test]
    fn strip_markup_preserves_fenced_code() {
        let input = "<span>x</span>\n```html\n<div>  Preserved  </div>\n\n\n\n```\n<span>y</span>";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert_eq!(
            result,
            "x\n```html\n<div>  Preserved  </div>\n\n\n\n```\ny"
        );
    }

    #[test]
    fn strip_markup_preserves_inline_code() {
        let input = "Use `<Tabs>` or ``<b>`` here <em>now</em>";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert_eq!(result, "Use `<Tabs>` or ``<b>`` here now");
    }

    #[test]
    fn strip_markup_leaves_autolinks_and_comparisons() {
        let input = "See <https://example.com> when a < b > c";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert_eq!(result, input);
    }

    #[test]
    fn strip_markup_mdx_statements() {
        let input = "import Tabs from '@theme/Tabs';\nexport const x = 1;\n{/* note */}\n# Doc\n<Tabs groupId=\"os\">\nText\n</Tabs>";
        let result = strip_markup(input, DocumentKind::Mdx);
        assert_eq!(result, "\n\n\n# Doc\n\nText\n");

        // Plain markdown keeps prose that merely starts with "import".
        let md = strip_markup("import the module first", DocumentKind::Markdown);
        assert_eq!(md, "import the module first");
    }

    #[test]
    fn tilde_fence_with_longer_close() {
        let input = "~~~\n<b>code</b>\n~~~~\n<b>prose</b>";
        let result = strip_markup(input, DocumentKind::Markdown);
        assert_eq!(result, "~~~\n<b>code</b>\n~~~~\nprose");
    }

    #[test]
    fn collapse_blank_lines_scenario() {
        let input = "# Title\n\n\n\n\nBody";
        assert_eq!(collapse_blank_lines(input), "# Title\n\nBody");
    }

    #[test]
    fn collapse_blank_lines_keeps_single_blank() {
        let input = "Line 1\n\nLine 2";
        assert_eq!(collapse_blank_lines(input), input);
    }

    #[test]
    fn collapse_treats_whitespace_lines_as_blank() {
        let input = "\n\nA\n   \n\t\n\nB\n\n";
        assert_eq!(collapse_blank_lines(input), "A\n\nB");
    }

    #[test]
    fn collapse_leaves_code_blocks_alone() {
        let input = "```\na\n\n\n\nb   \n```\n\n\n\nafter";
        assert_eq!(collapse_blank_lines(input), "```\na\n\n\n\nb   \n```\n\nafter");
    }

    #[test]
    fn full_pipeline_scenario() {
        let input = "---\ntitle: T\n---\n# Title\n\n\n\n\nBody";
        assert_eq!(run_pipeline(input.as_bytes(), DocumentKind::Markdown), "# Title\n\nBody");
    }

    #[test]
    fn full_pipeline_crlf() {
        let input = "---\r\ntitle: T\r\n---\r\n# Title\r\n\r\n\r\n\r\nBody\r\n";
        assert_eq!(run_pipeline(input.as_bytes(), DocumentKind::Markdown), "# Title\n\nBody");
    }
}
