use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use comfy_table::Table;
use icr2edit_core::{
    apply_edit, backup_path, changed_since, export_values, import_values, reset_to_default,
    snapshot, Category, EditorError, LoadedImage, Selector, VariantRegistry,
};

mod config;
mod interactive;
mod render;
mod session;

use session::Session;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error("save failed, no changes were committed: {0}")]
    SaveFailed(#[source] EditorError),

    #[error("no parameter catalog found (looked for {})", .0.join(", "))]
    NoCatalog(Vec<String>),

    #[error("bad edit '{0}': expected TARGET=VALUE")]
    BadEdit(String),

    #[error("{0} edit(s) failed; nothing was saved")]
    EditsFailed(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Parser)]
#[command(name = "icr2edit", version, about = "IndyCar Racing II executable parameter editor")]
struct Args {
    /// Parameter catalog (CSV). Defaults to the last one used, then
    /// parameters.csv next to the executable or in the working directory.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Extra executable builds, as a JSON array.
    #[arg(long, global = true)]
    variants: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report which build the executable is.
    Identify { exe: PathBuf },
    /// Print current and stock values.
    Show {
        exe: PathBuf,
        #[arg(long)]
        category: Option<Category>,
        /// Only parameters that differ from the backup.
        #[arg(long)]
        modified: bool,
    },
    /// Apply edits and save.
    Set {
        exe: PathBuf,
        /// TARGET=VALUE, where TARGET is `engine.3` or a parameter name.
        #[arg(long = "edit", required = true)]
        edits: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Put every parameter with a stock value back to it and save.
    Reset {
        exe: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Write current values to a CSV sheet.
    Export {
        exe: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Apply a CSV value sheet and save.
    Import {
        exe: PathBuf,
        sheet: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Menu-driven editing.
    Edit { exe: PathBuf },
}

impl Command {
    fn exe(&self) -> &Path {
        match self {
            Command::Identify { exe }
            | Command::Show { exe, .. }
            | Command::Set { exe, .. }
            | Command::Reset { exe, .. }
            | Command::Export { exe, .. }
            | Command::Import { exe, .. }
            | Command::Edit { exe } => exe,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("icr2edit_core={level},icr2edit_cli={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn registry(extra: Option<&Path>) -> Result<VariantRegistry, CliError> {
    let mut registry = VariantRegistry::builtin();
    if let Some(path) = extra {
        let file = File::open(path).map_err(|e| {
            EditorError::Io {
                operation: "open variants",
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        let added = registry.extend_from_json(BufReader::new(file))?;
        tracing::info!(added, "loaded extra variants");
    }
    Ok(registry)
}

fn split_edit(text: &str) -> Result<(&str, &str), CliError> {
    text.split_once('=')
        .map(|(target, value)| (target.trim(), value.trim()))
        .filter(|(target, value)| !target.is_empty() && !value.is_empty())
        .ok_or_else(|| CliError::BadEdit(text.to_string()))
}

/// Per-category tables, or only the fields that differ from `baseline`.
fn tables(
    session: &Session,
    baseline: Option<&LoadedImage>,
    only: Option<Category>,
) -> Result<Vec<(Category, Table)>, CliError> {
    let mut out = Vec::new();
    for category in session.catalog.categories() {
        if only.is_some_and(|c| c != category) {
            continue;
        }
        let table = match baseline {
            Some(base) => {
                render::parameter_table(category, changed_since(&session.image, base, &session.catalog)?)
            }
            None => render::parameter_table(category, snapshot(&session.image, &session.catalog)?),
        };
        out.push((category, table));
    }
    Ok(out)
}

fn show(
    session: &Session,
    registry: &VariantRegistry,
    only: Option<Category>,
    modified: bool,
) -> Result<(), CliError> {
    let baseline = if modified {
        let bak = backup_path(&session.path);
        if !bak.is_file() {
            println!("No backup at {}; nothing has been saved over this file.", bak.display());
            return Ok(());
        }
        Some(icr2edit_core::open(&bak, registry)?)
    } else {
        None
    };
    for (category, table) in tables(session, baseline.as_ref(), only)? {
        println!("\n{category}");
        println!("{table}");
    }
    Ok(())
}

fn commit(session: &mut Session, dry_run: bool) -> Result<(), CliError> {
    if dry_run {
        println!("Dry run; {} not written.", session.path.display());
        return Ok(());
    }
    if !session.image.is_modified() {
        println!("No changes to save.");
        return Ok(());
    }
    session.save()?;
    println!("Changes saved to {}.", session.path.display());
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    let registry = registry(args.variants.as_deref())?;
    let exe = args.command.exe().to_path_buf();

    if let Command::Identify { .. } = args.command {
        let image = icr2edit_core::open(&exe, &registry)?;
        println!("{} ({} bytes): {}", exe.display(), image.len(), image.variant().tag);
        return Ok(());
    }

    let mut cfg = config::load_config();
    let candidates = config::catalog_candidates(args.catalog.as_deref(), &cfg, &exe);
    let catalog_path = candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| CliError::NoCatalog(candidates.iter().map(|p| p.display().to_string()).collect()))?;

    let mut session = Session::open(exe.clone(), catalog_path.clone(), &registry)?;
    cfg.remember(&exe, &catalog_path);
    config::save_config(&cfg);

    match args.command {
        Command::Identify { .. } => Ok(()),
        Command::Show { category, modified, .. } => show(&session, &registry, category, modified),
        Command::Set { edits, dry_run, .. } => {
            let mut failed = 0;
            for edit in &edits {
                let (target, value) = split_edit(edit)?;
                let result = session
                    .target(target)
                    .and_then(|selector| {
                        apply_edit(&mut session.image, &session.catalog, selector, value).map_err(CliError::from)
                    });
                match result {
                    Ok(outcome) => println!("{}: {} -> {}", outcome.selector, outcome.previous, outcome.current),
                    Err(err) => {
                        eprintln!("{target}: {err}");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(CliError::EditsFailed(failed));
            }
            commit(&mut session, dry_run)
        }
        Command::Reset { dry_run, .. } => {
            let report = reset_to_default(&mut session.image, &session.catalog)?;
            render::print_reset(&report);
            if !report.is_complete() {
                return Err(CliError::EditsFailed(report.failed.len()));
            }
            commit(&mut session, dry_run)
        }
        Command::Export { output, category, .. } => {
            let selectors: Vec<Selector> = session
                .catalog
                .iter()
                .filter(|d| category.map_or(true, |c| d.category == c))
                .map(|d| d.selector())
                .collect();
            let file = File::create(&output).map_err(|e| EditorError::Io {
                operation: "create",
                path: output.clone(),
                source: e,
            })?;
            let written = export_values(&session.image, &session.catalog, &selectors, file)?;
            println!("Exported {written} value(s) to {}.", output.display());
            Ok(())
        }
        Command::Import { sheet, dry_run, .. } => {
            let file = File::open(&sheet).map_err(|e| EditorError::Io {
                operation: "open",
                path: sheet.clone(),
                source: e,
            })?;
            let report = import_values(&mut session.image, &session.catalog, BufReader::new(file))?;
            render::print_import(&report);
            commit(&mut session, dry_run)
        }
        Command::Edit { .. } => {
            let stdin = io::stdin();
            interactive::run(&mut session, stdin.lock(), io::stdout().lock())
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
