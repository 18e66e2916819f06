//! # xcpatch
//!
//! Command-line tool that forces signing and identity settings into an Xcode
//! project before a CI build.
//!
//! ## Overview
//!
//! Capacitor and similar generators recreate `project.pbxproj` and `Info.plist`
//! with their own bundle identifier and automatic signing. `xcpatch` rewrites
//! the values that matter for an App Store build:
//!
//! - **`PRODUCT_BUNDLE_IDENTIFIER`** in every build configuration
//! - **`PROVISIONING_PROFILE_SPECIFIER`**, added to the Release build
//!   settings when the project does not set it at all
//! - **`CFBundleIdentifier`** in `Info.plist`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter config next to the ios/ directory
//! xcpatch init
//!
//! # Force the provisioning profile
//! xcpatch profile --value "Krittics App Store Profile"
//!
//! # Force the bundle identifier in the project and Info.plist
//! xcpatch bundle-id --value com.blakely.krittics
//!
//! # Apply everything from xcpatch.toml, showing what would change
//! xcpatch apply --dry-run --verbose
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `profile` | Force `PROVISIONING_PROFILE_SPECIFIER` |
//! | `bundle-id` | Force the bundle identifier (pbxproj and Info.plist) |
//! | `apply` | Apply every setting from `xcpatch.toml` |
//! | `init` | Write a starter `xcpatch.toml` |
//!
//! ## Exit Status
//!
//! `0` when every targeted file could be read and written, even if nothing in
//! it needed changing. `1` when a file is missing or unreadable, or the
//! configuration is invalid. A failing file does not stop the others.
//!
//! ## Logging
//!
//! Progress goes to stdout. Diagnostics go to stderr through `tracing`;
//! `--verbose` enables debug output and `RUST_LOG` overrides the filter.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use xcpatch_core::{
    FieldAssignment, FieldOutcome, FieldReport, FieldRule, FileKind, PatchReport, ProjectPatcher,
};

pub mod config;

use config::{CONFIG_FILE_NAME, ConfigResolver, XcpatchConfig};

const PROFILE_KEY: &str = "PROVISIONING_PROFILE_SPECIFIER";
const BUNDLE_ID_KEY: &str = "PRODUCT_BUNDLE_IDENTIFIER";
const PLIST_BUNDLE_ID_KEY: &str = "CFBundleIdentifier";

/// Force bundle identifier and provisioning profile settings in an Xcode project.
#[derive(Parser, Debug)]
#[command(name = "xcpatch", author, version, about = "Force signing settings in an Xcode project", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Path to xcpatch.toml (default: discovered)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Report what would change without writing files")]
    dry_run: bool,

    #[arg(short, long, global = true, help = "Print each step and enable debug logging")]
    verbose: bool,

    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Force PROVISIONING_PROFILE_SPECIFIER in project.pbxproj.
    Profile {
        #[arg(long, help = "Profile name (default: from config)")]
        value: Option<String>,
        #[arg(long, help = "Path to project.pbxproj")]
        project: Option<PathBuf>,
        #[arg(long, help = "Build configuration to add the setting to when absent")]
        configuration: Option<String>,
        #[arg(long, help = "Add to every configuration with that name, not just the first")]
        all_blocks: bool,
    },
    /// Force the bundle identifier in project.pbxproj and Info.plist.
    BundleId {
        #[arg(long, help = "Bundle identifier (default: from config)")]
        value: Option<String>,
        #[arg(long, help = "Path to project.pbxproj")]
        project: Option<PathBuf>,
        #[arg(long, help = "Path to Info.plist")]
        plist: Option<PathBuf>,
        #[arg(long, help = "Leave Info.plist untouched")]
        skip_plist: bool,
        #[arg(long, help = "Build configuration to add the setting to when absent")]
        configuration: Option<String>,
        #[arg(long, help = "Add to every configuration with that name, not just the first")]
        all_blocks: bool,
    },
    /// Apply every setting from xcpatch.toml.
    Apply,
    /// Write a starter xcpatch.toml.
    Init {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

/// One file and the rules to apply to it.
#[derive(Debug)]
struct FileJob {
    path: PathBuf,
    kind: FileKind,
    rules: Vec<FieldRule>,
}

/// Totals for a run, used for the exit status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Entry point used by the binary.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(&cli) {
        Ok(summary) if summary.success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            println!("✗ Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_resolver(cli: &Cli) -> Result<ConfigResolver> {
    let resolver = match &cli.config {
        Some(path) => ConfigResolver::from_file(path)?,
        None => ConfigResolver::new()?,
    };
    match &resolver.config_path {
        Some(path) => info!(config = %path.display(), "using configuration file"),
        None => debug!("no {} found, using defaults", CONFIG_FILE_NAME),
    }
    Ok(resolver)
}

/// Runs the parsed command.
///
/// Errors are configuration problems found before any file is touched.
/// Per-file failures are printed and counted in the returned summary.
pub fn execute(cli: &Cli) -> Result<RunSummary> {
    if let Command::Init { output, force } = &cli.command {
        write_starter_config(output, *force)?;
        return Ok(RunSummary::default());
    }

    let resolver = load_resolver(cli)?;
    let jobs = plan_jobs(&cli.command, &resolver)?;
    Ok(run_jobs(&jobs, cli.dry_run, cli.verbose, cli.json))
}

fn write_starter_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{:?} already exists. Pass --force to overwrite it.", output);
    }
    std::fs::write(output, XcpatchConfig::generate_starter_toml())
        .with_context(|| format!("Failed to write config file: {:?}", output))?;
    println!("Wrote starter config to {:?}", output);
    Ok(())
}

fn profile_rule(
    resolver: &ConfigResolver,
    value: Option<String>,
    configuration: Option<String>,
    all_blocks: bool,
) -> Result<FieldRule> {
    let field = FieldAssignment::new(PROFILE_KEY, resolver.provisioning_profile(value))
        .context("Invalid provisioning profile")?;
    Ok(FieldRule::pbxproj(field)
        .insert_into(resolver.configuration(configuration))
        .selection(resolver.block_selection(all_blocks))
        .label("provisioning profile"))
}

fn bundle_id_rules(
    resolver: &ConfigResolver,
    value: Option<String>,
    configuration: Option<String>,
    all_blocks: bool,
) -> Result<(FieldRule, FieldRule)> {
    let bundle_id = resolver.bundle_id(value);
    let pbxproj = FieldAssignment::new(BUNDLE_ID_KEY, bundle_id.clone())
        .context("Invalid bundle identifier")?;
    let plist = FieldAssignment::new(PLIST_BUNDLE_ID_KEY, bundle_id)
        .context("Invalid bundle identifier")?;
    Ok((
        FieldRule::pbxproj(pbxproj)
            .insert_into(resolver.configuration(configuration))
            .selection(resolver.block_selection(all_blocks))
            .label("bundle identifier"),
        FieldRule::plist(plist).label("bundle identifier"),
    ))
}

/// Turns a command into per-file jobs. All rules are validated here, so a
/// bad value in the config fails before any file is read.
fn plan_jobs(command: &Command, resolver: &ConfigResolver) -> Result<Vec<FileJob>> {
    let mut pbxproj_rules = Vec::new();
    let mut plist_rules = Vec::new();

    let (project, plist) = match command {
        Command::Profile {
            value,
            project,
            configuration,
            all_blocks,
        } => {
            pbxproj_rules.push(profile_rule(
                resolver,
                value.clone(),
                configuration.clone(),
                *all_blocks,
            )?);
            (project.clone(), None)
        }
        Command::BundleId {
            value,
            project,
            plist,
            skip_plist,
            configuration,
            all_blocks,
        } => {
            let (pbxproj_rule, plist_rule) =
                bundle_id_rules(resolver, value.clone(), configuration.clone(), *all_blocks)?;
            pbxproj_rules.push(pbxproj_rule);
            if !*skip_plist {
                plist_rules.push(plist_rule);
            }
            (project.clone(), plist.clone())
        }
        Command::Apply => {
            let (pbxproj_rule, plist_rule) = bundle_id_rules(resolver, None, None, false)?;
            pbxproj_rules.push(pbxproj_rule);
            pbxproj_rules.push(profile_rule(resolver, None, None, false)?);
            if resolver.ios().patch_plist {
                plist_rules.push(plist_rule);
            }
            for rule in resolver.extra_rules()? {
                match rule.file {
                    FileKind::Pbxproj => pbxproj_rules.push(rule),
                    FileKind::Plist => plist_rules.push(rule),
                }
            }
            (None, None)
        }
        Command::Init { .. } => return Ok(Vec::new()),
    };

    let mut jobs = vec![FileJob {
        path: resolver.pbxproj(project),
        kind: FileKind::Pbxproj,
        rules: pbxproj_rules,
    }];
    if !plist_rules.is_empty() {
        jobs.push(FileJob {
            path: resolver.info_plist(plist),
            kind: FileKind::Plist,
            rules: plist_rules,
        });
    }

    Ok(jobs)
}

fn run_jobs(jobs: &[FileJob], dry_run: bool, verbose: bool, as_json: bool) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut json_reports = Vec::new();

    for job in jobs {
        summary.files += 1;
        if verbose && !as_json {
            println!("Patching {}...", job.path.display());
        }

        let result = ProjectPatcher::new(&job.path, job.kind)
            .verbose(verbose && !as_json)
            .dry_run(dry_run)
            .apply(&job.rules);

        match result {
            Ok(report) => {
                if as_json {
                    json_reports.push(json!(report));
                } else {
                    print_report(&report, dry_run);
                }
            }
            Err(err) => {
                summary.failed += 1;
                if as_json {
                    json_reports.push(json!({
                        "path": job.path,
                        "file": job.kind,
                        "error": err.to_string(),
                    }));
                } else {
                    println!("✗ Error: {}", err);
                }
            }
        }
    }

    if as_json {
        match serde_json::to_string_pretty(&Value::Array(json_reports)) {
            Ok(text) => println!("{text}"),
            Err(err) => println!("✗ Error: failed to serialize report: {err}"),
        }
    }

    summary
}

fn print_report(report: &PatchReport, dry_run: bool) {
    for field in &report.fields {
        for line in describe_field(field, report.file) {
            println!("{line}");
        }
    }

    if report.written {
        println!("✓ Wrote {}", report.path.display());
    } else if report.changed && dry_run {
        println!("ℹ Dry run: {} not written", report.path.display());
    }
}

/// Human-readable lines for one field outcome.
fn describe_field(field: &FieldReport, file: FileKind) -> Vec<String> {
    match &field.outcome {
        FieldOutcome::Replaced { count } => vec![
            format!("✓ Patched {} {} reference(s)", count, field.label),
            format!("✓ Set to: {}", field.value),
        ],
        FieldOutcome::Inserted { block, blocks } => {
            let target = match file {
                FileKind::Pbxproj if *blocks == 1 => format!("the {} configuration", block),
                FileKind::Pbxproj => format!("{} {} configurations", blocks, block),
                FileKind::Plist => "Info.plist".to_string(),
            };
            vec![
                format!("✓ Added {} ({}) to {}", field.label, field.key, target),
                format!("✓ Set to: {}", field.value),
            ]
        }
        FieldOutcome::Absent => vec![
            format!("⚠ No {} references found to patch", field.label),
            "ℹ This is expected if the setting comes from an xcconfig file".to_string(),
        ],
        FieldOutcome::BlockNotFound { block } => match file {
            FileKind::Pbxproj => vec![format!(
                "⚠ No {} build configuration found; {} not added",
                block, field.key
            )],
            FileKind::Plist => vec![format!(
                "⚠ No top-level dictionary found; {} not added",
                field.key
            )],
        },
        FieldOutcome::TypeMismatch { found } => vec![format!(
            "⚠ {} holds {} rather than a string; left unchanged",
            field.key, found
        )],
    }
}
