//! Patch-or-insert transforms for Xcode projects
//!
//! `xcpatch-core` forces specific values into an Xcode `project.pbxproj` and an
//! app's `Info.plist`: a bundle identifier, a provisioning profile specifier,
//! or any other string setting. It is the library behind the `xcpatch` CLI.
//!
//! # Architecture
//!
//! - **pbxproj**: pure text transforms for `KEY = "VALUE";` assignments and
//!   the build configuration blocks that hold them
//! - **plist**: the same for `<key>`/`<string>` pairs in an XML plist
//! - **patcher**: reads a file, applies [`FieldRule`]s, writes it back once
//! - **types**: rules, outcomes, reports and [`PatchError`]
//!
//! Matching is regex based and assumes the formatting Xcode itself writes.
//! It is not a parser for either file format.
//!
//! # Example
//!
//! ```no_run
//! use xcpatch_core::{FieldAssignment, FieldRule, ProjectPatcher};
//!
//! fn main() -> Result<(), xcpatch_core::PatchError> {
//!     let rule = FieldRule::pbxproj(FieldAssignment::new(
//!         "PROVISIONING_PROFILE_SPECIFIER",
//!         "Krittics App Store Profile",
//!     )?)
//!     .insert_into("Release");
//!
//!     let report = ProjectPatcher::pbxproj("ios/App/App.xcodeproj/project.pbxproj")
//!         .verbose(true)
//!         .apply(&[rule])?;
//!
//!     println!("written: {}", report.written);
//!     Ok(())
//! }
//! ```

// Public modules
pub mod patcher;
pub mod pbxproj;
pub mod plist;
pub mod types;

// Re-export key types for convenience
pub use patcher::{ProjectPatcher, apply_rules, read_config_text, write_config_text};
pub use pbxproj::{BlockMatcher, BlockOutcome, insert_field_into_block, patch_field};
pub use types::{
    BlockSelection, FieldAssignment, FieldOutcome, FieldReport, FieldRule, FileKind, PatchError,
    PatchReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
