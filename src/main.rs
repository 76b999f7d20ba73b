use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use method_patcher::patch::{
    load_from_path, ApplyError, BatchStatus, PatchOutcome, PatchRegistry, StartupReport,
};
use method_patcher::stream::{InstructionStream, Op};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "method-patcher")]
#[command(about = "Method-body patch engine for precompiled host routines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to routine dumps
    Apply {
        /// Routine dump file or directory of .json dumps
        #[arg(short, long)]
        dumps: PathBuf,

        /// Patch file or directory of .toml patch sets (default: ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Version of the host the dumps were captured from
        #[arg(long)]
        host_version: String,

        /// Write patched dumps to this directory instead of in place
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Dry run - report outcomes without writing patched dumps
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a unified diff of each patched routine listing
        #[arg(long)]
        diff: bool,
    },

    /// Check patch sets against routine dumps without writing anything
    Status {
        /// Routine dump file or directory of .json dumps
        #[arg(short, long)]
        dumps: PathBuf,

        /// Patch file or directory of .toml patch sets (default: ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Version of the host the dumps were captured from
        #[arg(long)]
        host_version: String,
    },

    /// List available patch sets and their host ranges
    List {
        /// Patch file or directory of .toml patch sets (default: ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            dumps,
            patches,
            host_version,
            out,
            dry_run,
            diff,
        } => cmd_apply(&dumps, patches.as_deref(), &host_version, out, dry_run, diff),

        Commands::Status {
            dumps,
            patches,
            host_version,
        } => cmd_status(&dumps, patches.as_deref(), &host_version),

        Commands::List { patches } => cmd_list(patches.as_deref()),
    }
}

/// On-disk form of one decompiled routine body.
#[derive(Debug, Serialize, Deserialize)]
struct RoutineDump {
    routine: String,
    #[serde(default)]
    ops: Vec<Op>,
}

impl RoutineDump {
    fn into_stream(self) -> Result<InstructionStream> {
        InstructionStream::new(self.routine.as_str(), self.ops)
            .map_err(|e| anyhow::anyhow!("malformed routine dump: {e}"))
    }

    fn from_stream(stream: &InstructionStream) -> Self {
        RoutineDump {
            routine: stream.routine().as_str().to_string(),
            ops: stream.ops().to_vec(),
        }
    }
}

/// Discover .toml patch files under `path`, or under ./patches by default.
fn discover_patch_files(path: Option<&Path>) -> Result<Vec<PathBuf>> {
    let root = path.unwrap_or(Path::new("patches"));

    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        bail!("no patch file or directory at {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("no .toml patch files found under {}", root.display());
    }
    Ok(files)
}

/// Load routine dumps from a .json file or a directory of them.
fn load_streams(path: &Path) -> Result<Vec<(PathBuf, InstructionStream)>> {
    let mut paths = Vec::new();
    if path.is_file() {
        paths.push(path.to_path_buf());
    } else if path.is_dir() {
        for entry in WalkDir::new(path).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("json")
            {
                paths.push(entry.path().to_path_buf());
            }
        }
        paths.sort();
    } else {
        bail!("no routine dump at {}", path.display());
    }

    let mut streams = Vec::new();
    for path in paths {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading routine dump {}", path.display()))?;
        let dump: RoutineDump = serde_json::from_str(&contents)
            .with_context(|| format!("parsing routine dump {}", path.display()))?;
        let stream = dump
            .into_stream()
            .with_context(|| format!("validating routine dump {}", path.display()))?;
        streams.push((path, stream));
    }
    if streams.is_empty() {
        bail!("no .json routine dumps found under {}", path.display());
    }
    Ok(streams)
}

fn build_registry(patch_paths: &[PathBuf], host_version: &str) -> Result<PatchRegistry> {
    let mut registry = PatchRegistry::new(host_version)?;
    for path in patch_paths {
        let file =
            load_from_path(path).with_context(|| format!("loading {}", path.display()))?;
        let batches = file
            .into_batches()
            .with_context(|| format!("compiling {}", path.display()))?;
        registry.register_all(batches)?;
    }
    Ok(registry)
}

fn print_outcome(id: &str, outcome: &Result<PatchOutcome, ApplyError>) {
    match outcome {
        Ok(result @ PatchOutcome::Applied { .. }) => {
            println!("  {} {id}: {result}", "✓".green());
        }
        Ok(result @ PatchOutcome::SkippedVersion { .. }) => {
            println!("  {} {id}: {result}", "-".yellow());
        }
        Ok(result @ PatchOutcome::SkippedDrift(_)) => {
            println!("  {} {id}: {result}", "✗".red());
        }
        Err(error) => {
            println!("  {} {id}: {error}", "✗".red().bold());
        }
    }
}

fn print_listing_diff(routine: &str, before: &str, after: &str) {
    if before == after {
        return;
    }
    println!("{}", format!("--- {routine}").bold());
    let diff = TextDiff::from_lines(before, after);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("{}", format!("-{change}").red()),
            ChangeTag::Insert => print!("{}", format!("+{change}").green()),
            ChangeTag::Equal => print!(" {change}"),
        }
    }
}

fn run_patch_pass(
    dumps: &Path,
    patches: Option<&Path>,
    host_version: &str,
) -> Result<(Vec<(PathBuf, String, InstructionStream)>, StartupReport)> {
    let patch_paths = discover_patch_files(patches)?;
    let registry = build_registry(&patch_paths, host_version)?;

    let loaded = load_streams(dumps)?;
    let mut before = Vec::with_capacity(loaded.len());
    let mut streams = Vec::with_capacity(loaded.len());
    for (path, stream) in loaded {
        before.push((path, stream.listing()));
        streams.push(stream);
    }

    let report = registry.apply_all(&mut streams);

    let annotated = before
        .into_iter()
        .zip(streams)
        .map(|((path, listing), stream)| (path, listing, stream))
        .collect();
    Ok((annotated, report))
}

fn print_report(report: &StartupReport) {
    for batch in &report.batches {
        println!("{}", batch.routine.to_string().bold());
        if batch.status == BatchStatus::MissingRoutine {
            println!("  {} no stream for this routine", "✗".red());
        }
        for (id, outcome) in &batch.outcomes {
            print_outcome(id, outcome);
        }
    }
    println!();
    println!("{report}");
}

fn cmd_apply(
    dumps: &Path,
    patches: Option<&Path>,
    host_version: &str,
    out: Option<PathBuf>,
    dry_run: bool,
    diff: bool,
) -> Result<()> {
    let (streams, report) = run_patch_pass(dumps, patches, host_version)?;

    print_report(&report);

    if diff {
        for (_, before, stream) in &streams {
            print_listing_diff(stream.routine().as_str(), before, &stream.listing());
        }
    }

    if dry_run {
        println!("{}", "dry run - no dumps written".yellow());
        return Ok(());
    }

    for (path, before, stream) in &streams {
        if *before == stream.listing() {
            continue;
        }
        let target = match &out {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.join(path.file_name().context("dump path has no file name")?)
            }
            None => path.clone(),
        };
        let dump = RoutineDump::from_stream(stream);
        let json = serde_json::to_string_pretty(&dump)?;
        fs::write(&target, json)
            .with_context(|| format!("writing patched dump {}", target.display()))?;
        println!("wrote {}", target.display());
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_status(dumps: &Path, patches: Option<&Path>, host_version: &str) -> Result<()> {
    // Same resolution pipeline as apply, against in-memory streams only.
    let (_, report) = run_patch_pass(dumps, patches, host_version)?;
    print_report(&report);
    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_list(patches: Option<&Path>) -> Result<()> {
    let patch_paths = discover_patch_files(patches)?;
    for path in patch_paths {
        let file = load_from_path(&path).with_context(|| format!("loading {}", path.display()))?;
        println!("{}", path.display().to_string().bold());
        if !file.meta.name.is_empty() {
            println!("  name: {}", file.meta.name);
        }
        if let Some(description) = &file.meta.description {
            println!("  description: {description}");
        }
        match &file.meta.host_range {
            Some(range) => println!("  host range: {range}"),
            None => println!("  host range: any"),
        }
        println!("  patches: {}", file.patches.len());
        for patch in &file.patches {
            println!("    {} -> {}", patch.id, patch.routine);
        }
    }
    Ok(())
}
