//! Configuration file support for xcpatch.
//!
//! This module provides support for `xcpatch.toml` configuration files that
//! pin the project paths and the values to force, so CI scripts can run a bare
//! `xcpatch apply`.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. Current working directory (`./xcpatch.toml`)
//! 2. Parent directories (up to the repository root or filesystem root)
//!
//! Relative paths inside the file are resolved against the directory that
//! contains it.
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! pbxproj = "ios/App/App.xcodeproj/project.pbxproj"
//! info_plist = "ios/App/App/Info.plist"
//!
//! [ios]
//! bundle_id = "com.blakely.krittics"
//! provisioning_profile = "Krittics App Store Profile"
//! configuration = "Release"
//! block_selection = "first"
//!
//! [[fields]]
//! file = "pbxproj"
//! key = "CODE_SIGN_STYLE"
//! value = "Manual"
//! insert_into = "Release"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xcpatch_core::{BlockSelection, FieldAssignment, FieldRule, FileKind};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "xcpatch.toml";

/// Default location of the Xcode project file, relative to the app root.
pub const DEFAULT_PBXPROJ: &str = "ios/App/App.xcodeproj/project.pbxproj";

/// Default location of the app's Info.plist, relative to the app root.
pub const DEFAULT_INFO_PLIST: &str = "ios/App/App/Info.plist";

pub const DEFAULT_BUNDLE_ID: &str = "com.blakely.krittics";
pub const DEFAULT_PROVISIONING_PROFILE: &str = "Krittics App Store Profile";
pub const DEFAULT_CONFIGURATION: &str = "Release";

/// Root configuration structure for `xcpatch.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XcpatchConfig {
    /// File locations.
    pub project: ProjectConfig,

    /// Values forced by the `bundle-id` and `profile` commands.
    pub ios: IosConfig,

    /// Additional settings applied by `apply`.
    pub fields: Vec<FieldConfig>,
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Path to `project.pbxproj`.
    ///
    /// Defaults to `ios/App/App.xcodeproj/project.pbxproj`.
    pub pbxproj: PathBuf,

    /// Path to the app's `Info.plist`.
    ///
    /// Defaults to `ios/App/App/Info.plist`.
    pub info_plist: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            pbxproj: PathBuf::from(DEFAULT_PBXPROJ),
            info_plist: PathBuf::from(DEFAULT_INFO_PLIST),
        }
    }
}

/// Signing and identity values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    /// Bundle identifier written to `PRODUCT_BUNDLE_IDENTIFIER` and
    /// `CFBundleIdentifier`.
    pub bundle_id: String,

    /// Name written to `PROVISIONING_PROFILE_SPECIFIER`.
    pub provisioning_profile: String,

    /// Build configuration that receives settings missing from the project.
    ///
    /// Defaults to "Release".
    pub configuration: String,

    /// Which blocks receive an insertion when several configurations share
    /// the name. Defaults to `first`.
    pub block_selection: BlockSelection,

    /// Whether `bundle-id` and `apply` also patch `CFBundleIdentifier`.
    ///
    /// Defaults to true.
    pub patch_plist: bool,
}

impl Default for IosConfig {
    fn default() -> Self {
        Self {
            bundle_id: DEFAULT_BUNDLE_ID.to_string(),
            provisioning_profile: DEFAULT_PROVISIONING_PROFILE.to_string(),
            configuration: DEFAULT_CONFIGURATION.to_string(),
            block_selection: BlockSelection::First,
            patch_plist: true,
        }
    }
}

/// An extra setting to force, from a `[[fields]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub file: FileKind,
    pub key: String,
    pub value: String,
    /// Build configuration to insert into when the key is absent (pbxproj only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_into: Option<String>,
    /// Overrides `ios.block_selection` for this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_selection: Option<BlockSelection>,
}

impl FieldConfig {
    /// Converts the table into a validated rule.
    pub fn to_rule(&self, default_selection: BlockSelection) -> Result<FieldRule> {
        let field = FieldAssignment::new(&self.key, &self.value)
            .with_context(|| format!("Invalid [[fields]] entry for {}", self.key))?;
        let mut rule = match self.file {
            FileKind::Pbxproj => FieldRule::pbxproj(field),
            FileKind::Plist => FieldRule::plist(field),
        };
        if let Some(configuration) = &self.insert_into {
            rule = rule.insert_into(configuration.clone());
        }
        Ok(rule.selection(self.block_selection.unwrap_or(default_selection)))
    }
}

impl XcpatchConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the specified file path.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(XcpatchConfig)` - Successfully loaded configuration
    /// * `Err` - If the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: XcpatchConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    ///
    /// Stops at the first directory containing `.git`, or at the filesystem root.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Saves the configuration to the specified file path.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Rules for every `[[fields]]` entry, validated.
    pub fn extra_rules(&self) -> Result<Vec<FieldRule>> {
        self.fields
            .iter()
            .map(|f| f.to_rule(self.ios.block_selection))
            .collect()
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// This includes comments explaining each option.
    pub fn generate_starter_toml() -> String {
        format!(
            r#"# xcpatch configuration file
# Values to force into the Xcode project and Info.plist.
# CLI flags override these settings when provided.

[project]
# Xcode project file, relative to this file
pbxproj = "{pbxproj}"

# App Info.plist, relative to this file
info_plist = "{info_plist}"

[ios]
# Written to PRODUCT_BUNDLE_IDENTIFIER and CFBundleIdentifier
bundle_id = "{bundle_id}"

# Written to PROVISIONING_PROFILE_SPECIFIER
provisioning_profile = "{profile}"

# Build configuration that receives settings missing from the project
configuration = "{configuration}"

# "first" or "all": which configurations receive an insertion when
# several share the name above
block_selection = "first"

# Also force CFBundleIdentifier in Info.plist
patch_plist = true

# Extra settings applied by `xcpatch apply`
# [[fields]]
# file = "pbxproj"          # or "plist"
# key = "CODE_SIGN_STYLE"
# value = "Manual"
# insert_into = "Release"   # optional, pbxproj only
"#,
            pbxproj = DEFAULT_PBXPROJ,
            info_plist = DEFAULT_INFO_PLIST,
            bundle_id = DEFAULT_BUNDLE_ID,
            profile = DEFAULT_PROVISIONING_PROFILE,
            configuration = DEFAULT_CONFIGURATION,
        )
    }
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values, which take
/// precedence over built-in defaults.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<XcpatchConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a new resolver by discovering and loading configuration.
    pub fn new() -> Result<Self> {
        match XcpatchConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    /// Creates a resolver from an explicitly named config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = XcpatchConfig::load_from_file(path)?;
        Ok(Self {
            config: Some(config),
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Directory that relative config paths are resolved against.
    fn base_dir(&self) -> Option<&Path> {
        self.config_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
    }

    fn relative_to_config(&self, path: &Path) -> PathBuf {
        match self.base_dir() {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Returns the pbxproj path: CLI flag, else config, else the default.
    pub fn pbxproj(&self, cli_value: Option<PathBuf>) -> PathBuf {
        cli_value.unwrap_or_else(|| {
            let configured = self
                .config
                .as_ref()
                .map(|c| c.project.pbxproj.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PBXPROJ));
            self.relative_to_config(&configured)
        })
    }

    /// Returns the Info.plist path: CLI flag, else config, else the default.
    pub fn info_plist(&self, cli_value: Option<PathBuf>) -> PathBuf {
        cli_value.unwrap_or_else(|| {
            let configured = self
                .config
                .as_ref()
                .map(|c| c.project.info_plist.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INFO_PLIST));
            self.relative_to_config(&configured)
        })
    }

    /// Returns the iOS configuration.
    pub fn ios(&self) -> IosConfig {
        self.config
            .as_ref()
            .map(|c| c.ios.clone())
            .unwrap_or_default()
    }

    pub fn bundle_id(&self, cli_value: Option<String>) -> String {
        self.resolve(cli_value, |c| Some(c.ios.bundle_id.clone()), DEFAULT_BUNDLE_ID.to_string())
    }

    pub fn provisioning_profile(&self, cli_value: Option<String>) -> String {
        self.resolve(
            cli_value,
            |c| Some(c.ios.provisioning_profile.clone()),
            DEFAULT_PROVISIONING_PROFILE.to_string(),
        )
    }

    pub fn configuration(&self, cli_value: Option<String>) -> String {
        self.resolve(
            cli_value,
            |c| Some(c.ios.configuration.clone()),
            DEFAULT_CONFIGURATION.to_string(),
        )
    }

    /// `--all-blocks` forces [`BlockSelection::All`]; otherwise the config decides.
    pub fn block_selection(&self, all_blocks: bool) -> BlockSelection {
        let cli_value = all_blocks.then_some(BlockSelection::All);
        self.resolve(cli_value, |c| Some(c.ios.block_selection), BlockSelection::First)
    }

    /// Rules from `[[fields]]`, or none without a config file.
    pub fn extra_rules(&self) -> Result<Vec<FieldRule>> {
        match &self.config {
            Some(config) => config.extra_rules(),
            None => Ok(Vec::new()),
        }
    }

    /// Resolves a CLI value, using config as fallback.
    ///
    /// # Arguments
    ///
    /// * `cli_value` - Value from CLI argument (None if not provided)
    /// * `config_getter` - Function to get value from config
    /// * `default` - Default value if neither CLI nor config provides a value
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&XcpatchConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = XcpatchConfig::default();
        assert_eq!(config.project.pbxproj, PathBuf::from(DEFAULT_PBXPROJ));
        assert_eq!(config.project.info_plist, PathBuf::from(DEFAULT_INFO_PLIST));
        assert_eq!(config.ios.bundle_id, "com.blakely.krittics");
        assert_eq!(config.ios.provisioning_profile, "Krittics App Store Profile");
        assert_eq!(config.ios.configuration, "Release");
        assert_eq!(config.ios.block_selection, BlockSelection::First);
        assert!(config.ios.patch_plist);
        assert!(config.fields.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(
            &config_path,
            r#"
[project]
pbxproj = "App.xcodeproj/project.pbxproj"

[ios]
bundle_id = "com.example.app"
configuration = "Staging"
block_selection = "all"
patch_plist = false

[[fields]]
file = "pbxproj"
key = "CODE_SIGN_STYLE"
value = "Manual"
insert_into = "Release"

[[fields]]
file = "plist"
key = "CFBundleDisplayName"
value = "Krittics"
"#,
        )
        .unwrap();

        let config = XcpatchConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.project.pbxproj, PathBuf::from("App.xcodeproj/project.pbxproj"));
        assert_eq!(config.project.info_plist, PathBuf::from(DEFAULT_INFO_PLIST));
        assert_eq!(config.ios.bundle_id, "com.example.app");
        assert_eq!(config.ios.provisioning_profile, DEFAULT_PROVISIONING_PROFILE);
        assert_eq!(config.ios.configuration, "Staging");
        assert_eq!(config.ios.block_selection, BlockSelection::All);
        assert!(!config.ios.patch_plist);

        let rules = config.extra_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].file, FileKind::Pbxproj);
        assert_eq!(rules[0].insert_into.as_deref(), Some("Release"));
        assert_eq!(rules[0].selection, BlockSelection::All);
        assert_eq!(rules[1].file, FileKind::Plist);
        assert_eq!(rules[1].field.value(), "Krittics");
    }

    #[test]
    fn test_invalid_field_is_rejected() {
        let config: XcpatchConfig = toml::from_str(
            r#"
[[fields]]
file = "pbxproj"
key = "NOT A KEY"
value = "x"
"#,
        )
        .unwrap();
        assert!(config.extra_rules().is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[ios\nbundle_id = ").unwrap();
        assert!(XcpatchConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_discover_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[ios]\nbundle_id = \"com.discovered.app\"\n").unwrap();

        let nested = temp_dir.path().join("ios/App");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = XcpatchConfig::discover_from(&nested).unwrap().unwrap();
        assert_eq!(config.ios.bundle_id, "com.discovered.app");
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_no_config() {
        let temp_dir = TempDir::new().unwrap();
        // Create a .git directory to stop the search
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let result = XcpatchConfig::discover_from(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        let mut config = XcpatchConfig::new();
        config.ios.bundle_id = "com.saved.app".to_string();
        config.fields.push(FieldConfig {
            file: FileKind::Plist,
            key: "CFBundleName".to_string(),
            value: "Saved".to_string(),
            insert_into: None,
            block_selection: None,
        });
        config.save_to_file(&config_path).unwrap();

        let loaded = XcpatchConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.ios.bundle_id, "com.saved.app");
        assert_eq!(loaded.fields.len(), 1);
        assert_eq!(loaded.fields[0].key, "CFBundleName");
    }

    #[test]
    fn test_starter_toml_parses() {
        let toml = XcpatchConfig::generate_starter_toml();
        assert!(toml.contains("bundle_id = \"com.blakely.krittics\""));
        assert!(toml.contains("provisioning_profile = \"Krittics App Store Profile\""));

        let config: XcpatchConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config.ios.configuration, "Release");
        assert!(config.fields.is_empty());
    }

    #[test]
    fn test_config_resolver_precedence() {
        let mut config = XcpatchConfig::new();
        config.ios.bundle_id = "com.config.app".to_string();
        let resolver = ConfigResolver {
            config: Some(config),
            config_path: Some(PathBuf::from("/work/app/xcpatch.toml")),
        };

        // CLI value takes precedence
        assert_eq!(resolver.bundle_id(Some("com.cli.app".to_string())), "com.cli.app");
        // Config value used when CLI is None
        assert_eq!(resolver.bundle_id(None), "com.config.app");

        // Relative config paths resolve against the config file's directory
        assert_eq!(
            resolver.pbxproj(None),
            PathBuf::from("/work/app").join(DEFAULT_PBXPROJ)
        );
        assert_eq!(
            resolver.pbxproj(Some(PathBuf::from("other.pbxproj"))),
            PathBuf::from("other.pbxproj")
        );

        assert_eq!(resolver.block_selection(true), BlockSelection::All);
        assert_eq!(resolver.block_selection(false), BlockSelection::First);
    }

    #[test]
    fn test_resolver_without_config() {
        let resolver = ConfigResolver::default();
        assert_eq!(resolver.pbxproj(None), PathBuf::from(DEFAULT_PBXPROJ));
        assert_eq!(resolver.info_plist(None), PathBuf::from(DEFAULT_INFO_PLIST));
        assert_eq!(resolver.provisioning_profile(None), DEFAULT_PROVISIONING_PROFILE);
        assert_eq!(resolver.configuration(None), DEFAULT_CONFIGURATION);
        assert!(resolver.extra_rules().unwrap().is_empty());
        assert!(resolver.ios().patch_plist);
    }
}
