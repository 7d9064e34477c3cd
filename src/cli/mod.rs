//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::config::{Config, FileEqualityMode, StructurePolicy};
use crate::core::errors::ScanError;
use crate::scanner::job::ScanJobManager;
use crate::scanner::types::{FolderLabel, GroupRecord, ScanRequest, ScanStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Finds duplicate and near-duplicate directory subtrees by content fingerprint.
#[derive(Debug, Parser)]
#[command(
    name = "fdupe",
    author,
    version,
    about = "Find duplicate and near-duplicate directory subtrees",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan a directory tree for duplicate and near-duplicate subtrees.
    Scan(ScanArgs),
    /// Print effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version information.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFileEquality {
    Sha256,
    NameSize,
}

impl From<CliFileEquality> for FileEqualityMode {
    fn from(value: CliFileEquality) -> Self {
        match value {
            CliFileEquality::Sha256 => Self::Sha256,
            CliFileEquality::NameSize => Self::NameSize,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStructurePolicy {
    Relative,
    BagOfFiles,
}

impl From<CliStructurePolicy> for StructurePolicy {
    fn from(value: CliStructurePolicy) -> Self {
        match value {
            CliStructurePolicy::Relative => Self::Relative,
            CliStructurePolicy::BagOfFiles => Self::BagOfFiles,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
#[allow(clippy::struct_excessive_bools)]
struct ScanArgs {
    /// Root directory to scan.
    #[arg(value_name = "PATH")]
    root: PathBuf,
    /// Glob patterns to exclude, in addition to configured defaults.
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
    /// How file content equality is determined.
    #[arg(long, value_enum)]
    file_equality: Option<CliFileEquality>,
    /// Minimum weighted-Jaccard similarity for a group to be reported.
    #[arg(long, value_name = "SCORE")]
    threshold: Option<f64>,
    /// How file identities are scoped within a folder's fingerprint.
    #[arg(long, value_enum)]
    structure_policy: Option<CliStructurePolicy>,
    /// Lowercase identities before comparison.
    #[arg(long)]
    case_insensitive: bool,
    /// Worker pool override in [1, 32].
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,
    /// Only print groups with this label.
    #[arg(long, value_enum)]
    label: Option<CliFolderLabel>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFolderLabel {
    Identical,
    NearDuplicate,
    PartialOverlap,
}

impl From<CliFolderLabel> for FolderLabel {
    fn from(value: CliFolderLabel) -> Self {
        match value {
            CliFolderLabel::Identical => Self::Identical,
            CliFolderLabel::NearDuplicate => Self::NearDuplicate,
            CliFolderLabel::PartialOverlap => Self::PartialOverlap,
        }
    }
}

#[derive(Debug, Clone, clap::Args, Serialize, Default)]
struct ConfigArgs {
    /// Print resolved config file path instead of its contents.
    #[arg(long)]
    path: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, clap::Args, Serialize, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<ScanError> for CliError {
    fn from(value: ScanError) -> Self {
        Self::Runtime(value.to_string())
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version(args) => emit_version(cli, args),
    }
}

fn apply_scan_overrides(config: &mut Config, args: &ScanArgs) {
    config.walker.exclude_globs.extend(args.exclude.iter().cloned());
    if let Some(mode) = args.file_equality {
        config.walker.file_equality = mode.into();
    }
    if let Some(policy) = args.structure_policy {
        config.walker.structure_policy = policy.into();
    }
    if args.case_insensitive {
        config.walker.force_case_insensitive = true;
    }
    if let Some(threshold) = args.threshold {
        config.similarity.threshold = threshold;
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_scan_overrides(&mut config, args);

    let mut request = ScanRequest::new(&args.root);
    request.exclude = args.exclude.clone();
    request.file_equality = config.walker.file_equality;
    request.structure_policy = config.walker.structure_policy;
    request.force_case_insensitive = config.walker.force_case_insensitive;
    request.similarity_threshold = config.similarity.threshold;
    if let Some(mode) = args.file_equality {
        request.file_equality = mode.into();
    }
    if let Some(threshold) = args.threshold {
        request.similarity_threshold = threshold;
    }
    if let Some(policy) = args.structure_policy {
        request.structure_policy = policy.into();
    }
    if args.case_insensitive {
        request.force_case_insensitive = true;
    }
    request.concurrency = args.concurrency;

    let manager = ScanJobManager::new(config)?;
    let scan_id = manager.start_scan(request)?;

    if !cli.quiet && output_mode(cli) == OutputMode::Human {
        eprintln!("scanning {} ({scan_id})...", args.root.display());
    }

    loop {
        let status = manager.get_job_status(&scan_id)?;
        if matches!(status, ScanStatus::Completed | ScanStatus::Failed) {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let progress = manager.get_progress(&scan_id)?;
    if progress.status == ScanStatus::Failed {
        manager.shutdown();
        return Err(CliError::Runtime(format!(
            "scan {scan_id} failed (see warnings for detail)"
        )));
    }

    let label_filter = args.label.map(Into::into);
    let groups = manager.get_groups(&scan_id, label_filter)?;
    manager.shutdown();

    match output_mode(cli) {
        OutputMode::Human => print_groups_human(&groups, progress.warnings.len()),
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "scan_id": scan_id,
                "root_path": progress.root_path,
                "warning_count": progress.warnings.len(),
                "groups": groups,
            });
            write_json_line(&payload)?;
        }
    }

    Ok(())
}

fn print_groups_human(groups: &[GroupRecord], warning_count: usize) {
    if groups.is_empty() {
        println!("no duplicate or near-duplicate folders found.");
    } else {
        for group in groups {
            let label = match group.label {
                FolderLabel::Identical => "IDENTICAL".green(),
                FolderLabel::NearDuplicate => "NEAR-DUPLICATE".yellow(),
                FolderLabel::PartialOverlap => "PARTIAL-OVERLAP".normal(),
            };
            println!("[{label}] {} ({} members)", group.group_id, group.members.len());
            for member in &group.members {
                println!(
                    "  {}  ({}, {} files)",
                    member.path,
                    format_bytes(member.total_bytes),
                    member.file_count
                );
            }
        }
        println!();
        println!("{} group(s) found.", groups.len());
    }
    if warning_count > 0 {
        println!("{warning_count} warning(s) raised during scan.");
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;

    if args.path {
        println!("{}", config.paths.config_file.display());
        return Ok(());
    }

    match output_mode(cli) {
        OutputMode::Human => {
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
            print!("{rendered}");
        }
        OutputMode::Json => {
            let payload = serde_json::to_value(&config)?;
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("fdupe {version}");
            if args.verbose {
                println!("package: {package}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "fdupe",
                "version": version,
                "package": package,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("FOLDERDUPE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
