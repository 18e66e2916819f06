//! File-level patching.
//!
//! [`ProjectPatcher`] reads one project file, runs a list of [`FieldRule`]s
//! over its text with the transforms in [`crate::pbxproj`] and
//! [`crate::plist`], and writes the result back in one piece.

use crate::pbxproj::{self, BlockMatcher, BlockOutcome};
use crate::plist::{self, PlistOutcome};
use crate::types::{
    BlockSelection, FieldOutcome, FieldReport, FieldRule, FileKind, PatchError, PatchReport,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Patcher for a single project file
pub struct ProjectPatcher {
    /// File to patch
    path: PathBuf,
    /// Which transforms apply to the file
    kind: FileKind,
    /// Whether to use verbose output
    verbose: bool,
    /// Compute the report without writing
    dry_run: bool,
}

impl ProjectPatcher {
    /// Creates a patcher for an Xcode `project.pbxproj`
    pub fn pbxproj(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileKind::Pbxproj)
    }

    /// Creates a patcher for an XML `Info.plist`
    pub fn plist(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileKind::Plist)
    }

    pub fn new(path: impl Into<PathBuf>, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            kind,
            verbose: false,
            dry_run: false,
        }
    }

    /// Enables verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Skips writing the file back
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Applies `rules` to the file.
    ///
    /// Rules for the other file kind are ignored. The file is read once and
    /// written at most once, and only if its content changed. Absent fields
    /// and missing blocks are reported per rule, not as errors.
    ///
    /// # Returns
    ///
    /// * `Ok(PatchReport)` with one entry per applied rule
    /// * `Err(PatchError::FileNotFound)` if the file does not exist
    /// * `Err(PatchError::Io)` if it cannot be read or written
    pub fn apply(&self, rules: &[FieldRule]) -> Result<PatchReport, PatchError> {
        let original = read_config_text(&self.path)?;
        if self.verbose {
            println!("  Read {} ({} bytes)", self.path.display(), original.len());
        }

        let rules: Vec<&FieldRule> = rules.iter().filter(|r| r.file == self.kind).collect();
        let (patched, fields) = apply_rules(&original, &rules);

        if self.verbose {
            for field in &fields {
                if !field.previous.is_empty() {
                    println!("  {} was: {}", field.key, field.previous.join(", "));
                }
                println!("  {} -> {:?}", field.key, field.outcome);
            }
        }

        let changed = patched != original;
        let written = changed && !self.dry_run;
        if written {
            write_config_text(&self.path, &patched)?;
            debug!(path = %self.path.display(), bytes = patched.len(), "wrote patched file");
        } else if changed {
            debug!(path = %self.path.display(), "dry run, leaving file untouched");
        }

        Ok(PatchReport {
            path: self.path.clone(),
            file: self.kind,
            written,
            changed,
            fields,
        })
    }
}

/// Runs `rules` over `text` in order, each seeing the previous rule's output.
pub fn apply_rules(text: &str, rules: &[&FieldRule]) -> (String, Vec<FieldReport>) {
    let mut current = text.to_string();
    let mut reports = Vec::with_capacity(rules.len());

    for rule in rules {
        let previous = match rule.file {
            FileKind::Pbxproj => pbxproj::field_values(&current, rule.field.key()),
            FileKind::Plist => plist::string_values(&current, rule.field.key()),
        };
        if !previous.is_empty() {
            debug!(key = rule.field.key(), ?previous, "replacing existing values");
        }

        let (next, outcome) = match rule.file {
            FileKind::Pbxproj => apply_pbxproj_rule(&current, rule),
            FileKind::Plist => apply_plist_rule(&current, rule),
        };
        current = next;
        reports.push(FieldReport {
            label: rule.label.clone(),
            key: rule.field.key().to_string(),
            value: rule.field.value().to_string(),
            previous,
            outcome,
        });
    }

    (current, reports)
}

fn apply_pbxproj_rule(text: &str, rule: &FieldRule) -> (String, FieldOutcome) {
    let key = rule.field.key();
    let (patched, count) = pbxproj::patch_field(text, key, rule.field.value());
    if count > 0 {
        return (patched, FieldOutcome::Replaced { count });
    }

    let Some(configuration) = rule.insert_into.as_deref() else {
        return (patched, FieldOutcome::Absent);
    };

    let matcher = BlockMatcher::build_configuration(configuration);
    match rule.selection {
        BlockSelection::First => {
            let candidates = pbxproj::count_blocks(text, &matcher);
            if candidates > 1 {
                warn!(
                    configuration,
                    candidates, "several build configurations share this name; using the first"
                );
            }
            let (out, outcome) = pbxproj::insert_field_into_block(text, &matcher, &rule.field);
            let outcome = match outcome {
                BlockOutcome::Replaced(count) => FieldOutcome::Replaced { count },
                BlockOutcome::Inserted => FieldOutcome::Inserted {
                    block: configuration.to_string(),
                    blocks: 1,
                },
                BlockOutcome::BlockNotFound => FieldOutcome::BlockNotFound {
                    block: configuration.to_string(),
                },
            };
            (out, outcome)
        }
        BlockSelection::All => {
            let (out, outcomes) =
                pbxproj::insert_field_into_all_blocks(text, &matcher, &rule.field);
            let outcome = if outcomes.is_empty() {
                FieldOutcome::BlockNotFound {
                    block: configuration.to_string(),
                }
            } else {
                FieldOutcome::Inserted {
                    block: configuration.to_string(),
                    blocks: outcomes.len(),
                }
            };
            (out, outcome)
        }
    }
}

fn apply_plist_rule(text: &str, rule: &FieldRule) -> (String, FieldOutcome) {
    let (out, outcome) = plist::insert_string(text, rule.field.key(), rule.field.value());
    let outcome = match outcome {
        PlistOutcome::Replaced(count) => FieldOutcome::Replaced { count },
        PlistOutcome::Inserted => FieldOutcome::Inserted {
            block: "dict".to_string(),
            blocks: 1,
        },
        PlistOutcome::TypeMismatch(found) => FieldOutcome::TypeMismatch { found },
        PlistOutcome::DictNotFound => FieldOutcome::BlockNotFound {
            block: "dict".to_string(),
        },
    };
    (out, outcome)
}

/// Reads a project file as UTF-8 text.
pub fn read_config_text(path: &Path) -> Result<String, PatchError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => PatchError::FileNotFound(path.to_path_buf()),
        _ => PatchError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Replaces the file at `path` with `text`.
///
/// The text goes to a temporary file in the same directory which is then
/// renamed over the original, so readers never see a partial file. The
/// original file's permissions are carried over.
pub fn write_config_text(path: &Path, text: &str) -> Result<(), PatchError> {
    let io_err = |source: io::Error| PatchError::Io {
        action: "write",
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions()).map_err(io_err)?;
    }
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldAssignment;
    use tempfile::TempDir;

    const PROJECT: &str = "\
\t\t504EC3171FED79650016851F /* Release */ = {
\t\t\tisa = XCBuildConfiguration;
\t\t\tbuildSettings = {
\t\t\t\tCODE_SIGN_STYLE = Manual;
\t\t\t\tPRODUCT_BUNDLE_IDENTIFIER = \"com.old.app\";
\t\t\t};
\t\t\tname = Release;
\t\t};
";

    fn field(key: &str, value: &str) -> FieldAssignment {
        FieldAssignment::new(key, value).unwrap()
    }

    fn rules() -> Vec<FieldRule> {
        vec![
            FieldRule::pbxproj(field("PRODUCT_BUNDLE_IDENTIFIER", "com.blakely.krittics"))
                .insert_into("Release")
                .label("bundle identifier"),
            FieldRule::pbxproj(field("PROVISIONING_PROFILE_SPECIFIER", "Krittics App Store Profile"))
                .insert_into("Release")
                .label("provisioning profile"),
        ]
    }

    fn write_project(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("project.pbxproj");
        fs::write(&path, PROJECT).unwrap();
        path
    }

    #[test]
    fn test_patcher_creation() {
        let patcher = ProjectPatcher::pbxproj("/tmp/project.pbxproj");
        assert!(!patcher.verbose);
        assert!(!patcher.dry_run);
        assert_eq!(patcher.kind(), FileKind::Pbxproj);
    }

    #[test]
    fn test_patcher_options() {
        let patcher = ProjectPatcher::plist("/tmp/Info.plist")
            .verbose(true)
            .dry_run(true);
        assert!(patcher.verbose);
        assert!(patcher.dry_run);
        assert_eq!(patcher.path(), Path::new("/tmp/Info.plist"));
    }

    #[test]
    fn test_apply_replaces_and_inserts() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let report = ProjectPatcher::pbxproj(&path).apply(&rules()).unwrap();
        assert!(report.changed);
        assert!(report.written);
        assert_eq!(report.fields[0].outcome, FieldOutcome::Replaced { count: 1 });
        assert_eq!(report.fields[0].previous, vec!["com.old.app".to_string()]);
        assert!(report.fields[1].previous.is_empty());
        assert_eq!(
            report.fields[1].outcome,
            FieldOutcome::Inserted {
                block: "Release".to_string(),
                blocks: 1
            }
        );

        let on_disk = fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("PRODUCT_BUNDLE_IDENTIFIER = \"com.blakely.krittics\";"));
        assert!(on_disk.contains(
            "\t\t\t\tPROVISIONING_PROFILE_SPECIFIER = \"Krittics App Store Profile\";\n\t\t\t};"
        ));
    }

    #[test]
    fn test_apply_twice_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        ProjectPatcher::pbxproj(&path).apply(&rules()).unwrap();
        let first = fs::read_to_string(&path).unwrap();

        let report = ProjectPatcher::pbxproj(&path).apply(&rules()).unwrap();
        assert!(!report.changed);
        assert!(!report.written);
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let report = ProjectPatcher::pbxproj(&path)
            .dry_run(true)
            .apply(&rules())
            .unwrap();
        assert!(report.changed);
        assert!(!report.written);
        assert_eq!(fs::read_to_string(&path).unwrap(), PROJECT);
    }

    #[test]
    fn test_absent_field_without_insertion() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let rules = vec![FieldRule::pbxproj(field("DEVELOPMENT_TEAM", "ABCDE12345"))];
        let report = ProjectPatcher::pbxproj(&path).apply(&rules).unwrap();
        assert_eq!(report.fields[0].outcome, FieldOutcome::Absent);
        assert!(!report.written);
    }

    #[test]
    fn test_missing_block_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let rules = vec![
            FieldRule::pbxproj(field("DEVELOPMENT_TEAM", "ABCDE12345")).insert_into("Staging"),
            FieldRule::pbxproj(field("CODE_SIGN_STYLE", "Automatic")),
        ];
        let report = ProjectPatcher::pbxproj(&path).apply(&rules).unwrap();
        assert_eq!(
            report.fields[0].outcome,
            FieldOutcome::BlockNotFound {
                block: "Staging".to_string()
            }
        );
        assert_eq!(report.fields[1].outcome, FieldOutcome::Replaced { count: 1 });
        assert!(report.written);
    }

    #[test]
    fn test_rules_for_other_kind_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let rules = vec![FieldRule::plist(field("CFBundleIdentifier", "com.blakely.krittics"))];
        let report = ProjectPatcher::pbxproj(&path).apply(&rules).unwrap();
        assert!(report.fields.is_empty());
        assert!(!report.changed);
    }

    #[test]
    fn test_plist_rule() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Info.plist");
        fs::write(
            &path,
            "<plist version=\"1.0\">\n<dict>\n\t<key>CFBundleIdentifier</key>\n\t<string>$(PRODUCT_BUNDLE_IDENTIFIER)</string>\n</dict>\n</plist>\n",
        )
        .unwrap();

        let rules = vec![FieldRule::plist(field("CFBundleIdentifier", "com.blakely.krittics"))];
        let report = ProjectPatcher::plist(&path).apply(&rules).unwrap();
        assert_eq!(report.fields[0].outcome, FieldOutcome::Replaced { count: 1 });
        assert_eq!(
            report.fields[0].previous,
            vec!["$(PRODUCT_BUNDLE_IDENTIFIER)".to_string()]
        );
        assert!(
            fs::read_to_string(&path)
                .unwrap()
                .contains("<string>com.blakely.krittics</string>")
        );
    }

    #[test]
    fn test_select_all_blocks() {
        let doubled = format!("{}{}", PROJECT, PROJECT);
        let rule = FieldRule::pbxproj(field("DEVELOPMENT_TEAM", "ABCDE12345"))
            .insert_into("Release")
            .selection(BlockSelection::All);
        let (out, reports) = apply_rules(&doubled, &[&rule]);
        assert_eq!(
            reports[0].outcome,
            FieldOutcome::Inserted {
                block: "Release".to_string(),
                blocks: 2
            }
        );
        assert_eq!(out.matches("DEVELOPMENT_TEAM = \"ABCDE12345\";").count(), 2);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.pbxproj");
        let err = ProjectPatcher::pbxproj(&path).apply(&rules()).unwrap_err();
        assert!(matches!(err, PatchError::FileNotFound(p) if p == path));
    }

    #[test]
    fn test_invalid_utf8_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.pbxproj");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = read_config_text(&path).unwrap_err();
        assert!(matches!(err, PatchError::Io { action: "read", .. }));
    }

    #[test]
    fn test_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_project(&dir);

        let (patched, _) = apply_rules(PROJECT, &rules().iter().collect::<Vec<_>>());
        write_config_text(&path, &patched).unwrap();
        assert_eq!(read_config_text(&path).unwrap(), patched);
        assert_eq!(fs::read(&path).unwrap(), patched.as_bytes());
    }
}
