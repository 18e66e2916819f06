//! String-entry patching for XML `Info.plist` files.
//!
//! Works on the `<key>K</key>` / `<string>V</string>` pairs of an XML plist
//! as text, with the same limits as [`crate::pbxproj`]: formatting is kept,
//! structure is not checked. Binary plists are not supported.

use regex::{Captures, Regex};

/// Groups: `lead` is the `<key>` element plus the whitespace after it,
/// `element` is the value element that follows.
fn key_regex(key: &str) -> Regex {
    let pattern = format!(
        r"(?P<lead><key>\s*{}\s*</key>\s*)(?P<element><[A-Za-z]+\s*/>|<(?P<tag>[A-Za-z]+)>[^<]*</[A-Za-z]+>|<[A-Za-z]+>)",
        regex::escape(key)
    );
    Regex::new(&pattern).expect("escaped key always forms a valid pattern")
}

/// Escapes the characters that cannot appear verbatim in XML character data.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn is_string_element(caps: &Captures) -> bool {
    match caps.name("tag") {
        Some(tag) => tag.as_str() == "string",
        None => caps["element"].starts_with("<string"),
    }
}

/// What [`insert_string`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlistOutcome {
    /// Existing string values were rewritten.
    Replaced(usize),
    /// The key was added to the top-level dictionary.
    Inserted,
    /// The key exists with a non-string value (e.g. `<true/>` or `<array>`),
    /// shown here. The text is unchanged.
    TypeMismatch(String),
    /// No top-level `<dict>` was found. The text is unchanged.
    DictNotFound,
}

/// Replaces the `<string>` value after every `<key>KEY</key>`.
///
/// Keys holding other element types are left alone and not counted. Empty
/// `<string/>` elements are expanded. `value` is XML-escaped.
pub fn patch_string(text: &str, key: &str, value: &str) -> (String, usize) {
    let escaped = escape_xml(value);
    let mut count = 0;
    let patched = key_regex(key).replace_all(text, |caps: &Captures| {
        if is_string_element(caps) {
            count += 1;
            format!("{}<string>{}</string>", &caps["lead"], escaped)
        } else {
            caps[0].to_string()
        }
    });
    (patched.into_owned(), count)
}

/// Returns the current string values of `key`, in file order.
pub fn string_values(text: &str, key: &str) -> Vec<String> {
    key_regex(key)
        .captures_iter(text)
        .filter(is_string_element)
        .filter_map(|caps| {
            let element = &caps["element"];
            let inner = element.strip_prefix("<string>")?.strip_suffix("</string>")?;
            Some(inner.to_string())
        })
        .collect()
}

/// Ensures `key` maps to the string `value`.
///
/// Existing string entries are rewritten. When the key is missing it is
/// appended to the top-level dictionary, i.e. just before the last `</dict>`
/// that precedes `</plist>`, indented like the first `<key>` in the file.
pub fn insert_string(text: &str, key: &str, value: &str) -> (String, PlistOutcome) {
    let (patched, count) = patch_string(text, key, value);
    if count > 0 {
        return (patched, PlistOutcome::Replaced(count));
    }

    if let Some(caps) = key_regex(key).captures(text) {
        return (
            text.to_string(),
            PlistOutcome::TypeMismatch(caps["element"].to_string()),
        );
    }

    let end = text.rfind("</plist>").unwrap_or(text.len());
    let Some(close) = text[..end].rfind("</dict>") else {
        return (text.to_string(), PlistOutcome::DictNotFound);
    };

    let key_el = format!("<key>{}</key>", escape_xml(key));
    let string_el = format!("<string>{}</string>", escape_xml(value));

    let line_start = text[..close].rfind('\n').map_or(0, |i| i + 1);
    let before_close = &text[line_start..close];

    let out = if before_close.trim().is_empty() {
        let indent = text
            .lines()
            .find(|l| l.trim_start().starts_with("<key>"))
            .map(|l| l[..l.len() - l.trim_start().len()].to_string())
            .unwrap_or_else(|| format!("{}\t", before_close));
        format!(
            "{}{indent}{}\n{indent}{}\n{}",
            &text[..line_start],
            key_el,
            string_el,
            &text[line_start..],
            indent = indent
        )
    } else {
        format!("{}{}{}{}", &text[..close], key_el, string_el, &text[close..])
    };

    (out, PlistOutcome::Inserted)
}
