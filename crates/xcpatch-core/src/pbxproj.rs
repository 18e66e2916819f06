//! Patch-or-insert transforms for `project.pbxproj` build settings.
//!
//! Everything here is a pure `&str -> String` transform. The functions work on
//! textual patterns, not on the pbxproj grammar:
//!
//! - An assignment is `KEY = "VALUE";` or `KEY = VALUE;` on any line. Xcode
//!   quotes values only when they need it, so both forms are matched. Values
//!   are always written back quoted.
//! - A block is an opening marker ending in `{` and the `}` that balances it.
//!   Braces inside double-quoted strings and `/* */` comments are skipped;
//!   anything else that confuses brace counting will confuse this module too.
//!
//! This is enough for the hand-maintained project files it is pointed at. It
//! is not a pbxproj parser and does not try to be one.
//!
//! ## Example
//!
//! ```
//! use xcpatch_core::pbxproj::{insert_field_into_block, patch_field, BlockMatcher, BlockOutcome};
//! use xcpatch_core::FieldAssignment;
//!
//! let text = "PRODUCT_BUNDLE_IDENTIFIER = \"com.old.app\";\n";
//! let (patched, count) = patch_field(text, "PRODUCT_BUNDLE_IDENTIFIER", "com.blakely.krittics");
//! assert_eq!(count, 1);
//! assert_eq!(patched, "PRODUCT_BUNDLE_IDENTIFIER = \"com.blakely.krittics\";\n");
//!
//! let project = "\
//! \t\tAB12 /* Release */ = {
//! \t\t\tisa = XCBuildConfiguration;
//! \t\t\tbuildSettings = {
//! \t\t\t\tCODE_SIGN_STYLE = Manual;
//! \t\t\t};
//! \t\t\tname = Release;
//! \t\t};
//! ";
//! let field = FieldAssignment::new("PROVISIONING_PROFILE_SPECIFIER", "Krittics App Store Profile")?;
//! let (patched, outcome) =
//!     insert_field_into_block(project, &BlockMatcher::build_configuration("Release"), &field);
//! assert_eq!(outcome, BlockOutcome::Inserted);
//! assert!(patched.contains(
//!     "\t\t\t\tPROVISIONING_PROFILE_SPECIFIER = \"Krittics App Store Profile\";\n\t\t\t};"
//! ));
//! # Ok::<(), xcpatch_core::PatchError>(())
//! ```

use crate::types::{FieldAssignment, PatchError};
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static BUILD_CONFIGURATION_ISA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bisa\s*=\s*XCBuildConfiguration\s*;").expect("static pattern is valid")
});

static BUILD_SETTINGS_OPENING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bbuildSettings\s*=\s*\{").expect("static pattern is valid"));

/// Builds the assignment pattern for `key`.
///
/// Groups: `lead` is the key through the `=` and its trailing whitespace,
/// `value` the current value (quotes included), `tail` the whitespace and `;`.
fn field_regex(key: &str) -> Regex {
    let pattern = format!(
        r#"(?P<lead>\b{}\s*=\s*)(?P<value>"(?:[^"\\\n]|\\.)*"|[^;"\s]+)(?P<tail>\s*;)"#,
        regex::escape(key)
    );
    Regex::new(&pattern).expect("escaped key always forms a valid pattern")
}

/// If a quoted string or `/* */` comment starts at byte `i`, returns the index
/// of its last byte. Unterminated ones run to the end of `text`.
fn skip_opaque(text: &str, i: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    match bytes[i] {
        b'"' => {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] != b'"' {
                if bytes[j] == b'\\' {
                    j += 1;
                }
                j += 1;
            }
            Some(j.min(bytes.len() - 1))
        }
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
            text[i + 2..]
                .find("*/")
                .map_or(bytes.len() - 1, |end| i + 2 + end + 1),
        ),
        _ => None,
    }
}

/// Byte ranges covered by quoted strings and comments, in file order.
fn opaque_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < text.len() {
        match skip_opaque(text, i) {
            Some(last) => {
                spans.push(i..last + 1);
                i = last + 1;
            }
            None => i += 1,
        }
    }
    spans
}

/// Ranges of the value of every `key = ...;` assignment, in file order.
///
/// Text inside quoted strings and comments is not an assignment: a
/// `shellScript = "export KEY=x; ..."` build phase must be left alone.
fn value_ranges(text: &str, key: &str) -> Vec<Range<usize>> {
    let re = field_regex(key);
    let spans = opaque_spans(text);
    let mut ranges = Vec::new();
    let mut at = 0;

    while let Some(caps) = re.captures_at(text, at) {
        let (Some(whole), Some(value)) = (caps.get(0), caps.name("value")) else {
            break;
        };
        match spans.iter().find(|span| span.contains(&whole.start())) {
            Some(span) => at = span.end,
            None => {
                ranges.push(value.range());
                at = whole.end();
            }
        }
    }

    ranges
}

/// Quotes `value` for a pbxproj string, escaping backslashes.
pub(crate) fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', r"\\"))
}

/// Reverses [`quote_value`] for a raw value as found in the file.
fn unquote_value(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(next @ ('\\' | '"'))) => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Replaces the value of every `key = ...;` assignment in `text`.
///
/// Returns the new text and the number of assignments rewritten. Zero means
/// the key does not appear; the text is then returned unchanged. `value` is
/// inserted literally, so `$(inherited)` and similar need no escaping.
/// Occurrences inside quoted strings and comments are not assignments and
/// are left alone.
pub fn patch_field(text: &str, key: &str, value: &str) -> (String, usize) {
    let ranges = value_ranges(text, key);
    if ranges.is_empty() {
        return (text.to_string(), 0);
    }

    let quoted = quote_value(value);
    let mut out = String::with_capacity(text.len() + ranges.len() * quoted.len());
    let mut last = 0;
    for range in &ranges {
        out.push_str(&text[last..range.start]);
        out.push_str(&quoted);
        last = range.end;
    }
    out.push_str(&text[last..]);

    (out, ranges.len())
}

/// Returns the current values of `key`, unquoted, in file order.
pub fn field_values(text: &str, key: &str) -> Vec<String> {
    value_ranges(text, key)
        .into_iter()
        .map(|range| unquote_value(&text[range]))
        .collect()
}

/// Identifies a block by its opening marker.
///
/// The opening pattern must end at the block's `{`.
/// [`BlockMatcher::build_configuration`] additionally requires
/// `isa = XCBuildConfiguration;` in the body and targets the nested
/// `buildSettings` block.
#[derive(Debug, Clone)]
pub struct BlockMatcher {
    opening: Regex,
    contents: Option<&'static Regex>,
    nested: Option<&'static Regex>,
}

impl BlockMatcher {
    /// Creates a matcher from an opening-marker regex.
    pub fn new(opening: &str) -> Result<Self, PatchError> {
        Ok(Self {
            opening: Regex::new(opening)?,
            contents: None,
            nested: None,
        })
    }

    /// Matches the `buildSettings` block of the `XCBuildConfiguration` named
    /// `configuration`, i.e. the block under `/* Release */ = {`.
    pub fn build_configuration(configuration: &str) -> Self {
        let opening = format!(r"/\*\s*{}\s*\*/\s*=\s*\{{", regex::escape(configuration));
        Self {
            opening: Regex::new(&opening).expect("escaped name always forms a valid pattern"),
            contents: Some(&*BUILD_CONFIGURATION_ISA),
            nested: Some(&*BUILD_SETTINGS_OPENING),
        }
    }
}

/// A located block. `body` spans from just after the opening `{` to the
/// closing `}` (exclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationBlock {
    pub body: Range<usize>,
}

impl ConfigurationBlock {
    pub fn contents<'a>(&self, text: &'a str) -> &'a str {
        &text[self.body.clone()]
    }
}

/// What [`insert_field_into_block`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The field already existed in the block; this many values were rewritten.
    Replaced(usize),
    /// The field was appended before the block's closing delimiter.
    Inserted,
    /// No block matched. The text is unchanged.
    BlockNotFound,
}

/// Returns the index of the `}` balancing an already-consumed `{`, scanning
/// from `start`.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = start;

    while i < bytes.len() {
        if let Some(last) = skip_opaque(text, i) {
            i = last + 1;
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Finds every block matched by `matcher`, in file order.
///
/// Blocks whose closing brace cannot be found are skipped. Returned blocks
/// never overlap.
pub fn find_blocks(text: &str, matcher: &BlockMatcher) -> Vec<ConfigurationBlock> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(m) = matcher.opening.find_at(text, search_from) {
        search_from = m.end();

        let Some(close) = matching_brace(text, m.end()) else {
            continue;
        };
        let body = &text[m.end()..close];

        if let Some(contents) = matcher.contents {
            if !contents.is_match(body) {
                continue;
            }
        }

        let target = match matcher.nested {
            Some(nested) => {
                let Some(inner) = nested.find(body) else {
                    continue;
                };
                let inner_start = m.end() + inner.end();
                let Some(inner_close) = matching_brace(text, inner_start) else {
                    continue;
                };
                inner_start..inner_close
            }
            None => m.end()..close,
        };

        blocks.push(ConfigurationBlock { body: target });
        search_from = close + 1;
    }

    blocks
}

/// Number of blocks `matcher` selects. More than one means
/// [`insert_field_into_block`] is picking the first of several candidates.
pub fn count_blocks(text: &str, matcher: &BlockMatcher) -> usize {
    find_blocks(text, matcher).len()
}

/// Leading whitespace of `line`.
fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Applies `field` to one located block, returning the replacement text for
/// the whole document.
fn apply_to_block(text: &str, block: &ConfigurationBlock, field: &FieldAssignment) -> (String, BlockOutcome) {
    let Range { start, end } = block.body.clone();
    let body = &text[start..end];

    let (patched, count) = patch_field(body, field.key(), field.value());
    if count > 0 {
        let out = format!("{}{}{}", &text[..start], patched, &text[end..]);
        return (out, BlockOutcome::Replaced(count));
    }

    let line = field.render();
    let close_line_start = text[..end].rfind('\n').map_or(0, |i| i + 1);
    let before_close = &text[close_line_start..end];

    let out = if close_line_start > start && before_close.trim().is_empty() {
        // Closing delimiter on its own line: add a line above it.
        let indent = body
            .lines()
            .skip(1)
            .find(|l| !l.trim().is_empty())
            .map(|l| indentation(l).to_string())
            .unwrap_or_else(|| format!("{}\t", before_close));
        format!(
            "{}{}{}\n{}",
            &text[..close_line_start],
            indent,
            line,
            &text[close_line_start..]
        )
    } else {
        // Single-line block such as `buildSettings = { A = b; };`.
        let sep = if body.ends_with(char::is_whitespace) { "" } else { " " };
        format!("{}{}{} {}", &text[..end], sep, line, &text[end..])
    };

    (out, BlockOutcome::Inserted)
}

/// Ensures `field` is set inside the first block matched by `matcher`.
///
/// If the key already appears in that block, only the occurrences inside it
/// are rewritten. Otherwise the rendered assignment is inserted on its own
/// line just before the closing `};`, indented like the block's existing
/// entries. When no block matches, the text is returned unchanged with
/// [`BlockOutcome::BlockNotFound`].
pub fn insert_field_into_block(
    text: &str,
    matcher: &BlockMatcher,
    field: &FieldAssignment,
) -> (String, BlockOutcome) {
    match find_blocks(text, matcher).first() {
        Some(block) => apply_to_block(text, block, field),
        None => (text.to_string(), BlockOutcome::BlockNotFound),
    }
}

/// Like [`insert_field_into_block`], applied to every matching block.
///
/// Outcomes are returned in file order. An empty vector means no block
/// matched and the text is unchanged.
pub fn insert_field_into_all_blocks(
    text: &str,
    matcher: &BlockMatcher,
    field: &FieldAssignment,
) -> (String, Vec<BlockOutcome>) {
    let blocks = find_blocks(text, matcher);
    let mut out = text.to_string();
    let mut outcomes = Vec::with_capacity(blocks.len());

    // Last block first so earlier ranges stay valid.
    for block in blocks.iter().rev() {
        let (next, outcome) = apply_to_block(&out, block, field);
        out = next;
        outcomes.push(outcome);
    }
    outcomes.reverse();

    (out, outcomes)
}
