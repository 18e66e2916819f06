//! Core types for xcpatch-core.
//!
//! This module defines the values passed between the text transforms and the
//! file-level [`crate::ProjectPatcher`]:
//!
//! - [`PatchError`] - Error types for file and rule handling
//! - [`FieldAssignment`] - A validated `KEY = "VALUE";` pair
//! - [`FieldRule`] / [`FileKind`] / [`BlockSelection`] - What to force, where
//! - [`FieldOutcome`] / [`PatchReport`] - What happened to each rule

use crate::pbxproj::quote_value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Error types for xcpatch-core operations.
///
/// A field or block that is simply absent is never an error; those cases are
/// reported through [`FieldOutcome`].
///
/// # Example
///
/// ```no_run
/// use xcpatch_core::{FieldAssignment, FieldRule, PatchError, ProjectPatcher};
///
/// let rule = FieldRule::pbxproj(FieldAssignment::new("CODE_SIGN_STYLE", "Manual")?);
/// match ProjectPatcher::pbxproj("ios/App/App.xcodeproj/project.pbxproj").apply(&[rule]) {
///     Ok(report) => println!("{} rule(s) applied", report.fields.len()),
///     Err(PatchError::FileNotFound(path)) => eprintln!("{} not found", path.display()),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), PatchError>(())
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The target file does not exist.
    #[error("{} not found", .0.display())]
    FileNotFound(PathBuf),

    /// Reading or writing the target file failed.
    ///
    /// Common causes are permission problems, a full disk, or a file that is
    /// not valid UTF-8.
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A field key or value cannot be written into a project file.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A block-matching pattern failed to compile.
    #[error("invalid block pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A `KEY = "VALUE";` assignment as it appears in a build settings block.
///
/// Keys are restricted to identifier characters (plus `.` for the dotted
/// keys Xcode uses in a few places). Values may not contain a double quote or
/// a line break. Backslashes are escaped when the value is written to a
/// pbxproj file.
///
/// # Example
///
/// ```
/// use xcpatch_core::FieldAssignment;
///
/// let field = FieldAssignment::new("PRODUCT_BUNDLE_IDENTIFIER", "com.blakely.krittics")?;
/// assert_eq!(field.render(), r#"PRODUCT_BUNDLE_IDENTIFIER = "com.blakely.krittics";"#);
/// # Ok::<(), xcpatch_core::PatchError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldAssignment {
    key: String,
    value: String,
}

impl FieldAssignment {
    /// Creates a validated assignment.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, PatchError> {
        let key = key.into();
        let value = value.into();

        let mut chars = key.chars();
        let valid_key = match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            }
            _ => false,
        };
        if !valid_key {
            return Err(PatchError::InvalidField(format!(
                "'{}' is not a valid build setting name",
                key
            )));
        }
        if value.contains(['"', '\n', '\r']) {
            return Err(PatchError::InvalidField(format!(
                "value for {} may not contain quotes or line breaks: {:?}",
                key, value
            )));
        }

        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the assignment as a pbxproj line, without indentation.
    pub fn render(&self) -> String {
        format!("{} = {};", self.key, quote_value(&self.value))
    }
}

impl fmt::Display for FieldAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Which kind of file a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// `project.pbxproj` build settings (`KEY = "VALUE";`).
    Pbxproj,
    /// `Info.plist` string entries (`<key>K</key><string>V</string>`).
    Plist,
}

/// How many configuration blocks an insertion touches when several share
/// the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSelection {
    /// Only the first matching block, in file order.
    #[default]
    First,
    /// Every matching block.
    All,
}

/// One value to force into a file.
///
/// For pbxproj rules the value is first replaced everywhere the key already
/// appears. Only when the key is absent from the whole file, and
/// `insert_into` names a build configuration, is the assignment inserted
/// into that configuration's `buildSettings` block.
///
/// Plist rules always insert into the top-level dictionary when the key is
/// missing; `insert_into` and `selection` are ignored for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub file: FileKind,
    pub field: FieldAssignment,
    /// Build configuration name (e.g. `Release`) to insert into when absent.
    pub insert_into: Option<String>,
    pub selection: BlockSelection,
    /// Human-readable label used in progress output, e.g. "provisioning profile".
    pub label: String,
}

impl FieldRule {
    /// A pbxproj rule that only replaces existing occurrences.
    pub fn pbxproj(field: FieldAssignment) -> Self {
        let label = field.key().to_string();
        Self {
            file: FileKind::Pbxproj,
            field,
            insert_into: None,
            selection: BlockSelection::First,
            label,
        }
    }

    /// A plist rule for a string-valued key.
    pub fn plist(field: FieldAssignment) -> Self {
        let label = field.key().to_string();
        Self {
            file: FileKind::Plist,
            field,
            insert_into: None,
            selection: BlockSelection::First,
            label,
        }
    }

    /// Sets the build configuration to insert into when the key is absent.
    pub fn insert_into(mut self, configuration: impl Into<String>) -> Self {
        self.insert_into = Some(configuration.into());
        self
    }

    pub fn selection(mut self, selection: BlockSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// What a single rule did to the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FieldOutcome {
    /// Existing occurrences were rewritten.
    Replaced { count: usize },
    /// The field was absent and was added to `blocks` configuration block(s).
    Inserted { block: String, blocks: usize },
    /// The field was absent and no insertion was requested.
    Absent,
    /// The field was absent and the requested block does not exist.
    BlockNotFound { block: String },
    /// The key exists but holds something other than a string, so it was
    /// left alone.
    TypeMismatch { found: String },
}

/// Result of one rule within a [`PatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    pub label: String,
    pub key: String,
    pub value: String,
    /// Values the key held before patching, in file order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub previous: Vec<String>,
    #[serde(flatten)]
    pub outcome: FieldOutcome,
}

/// Result of patching one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub path: PathBuf,
    pub file: FileKind,
    /// Whether the file was rewritten. False when nothing changed or in dry-run mode.
    pub written: bool,
    /// Whether the patched content differs from what was read.
    pub changed: bool,
    pub fields: Vec<FieldReport>,
}
