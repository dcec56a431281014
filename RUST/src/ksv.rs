use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ksv::*;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "ksv", version, about = "Binary structure viewer (field tree + hex pane)")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Browse a file interactively
    View {
        file: PathBuf,
        /// Format name (default: detect from the file, else `raw`)
        #[arg(long)]
        format: Option<String>,
        /// Do not recompute a field whose first computation failed
        #[arg(long)]
        no_retry: bool,
        /// Write logs to this file (filter with KSV_LOG, default `ksv=info`)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Print the decoded structure as JSON
    Dump {
        file: PathBuf,
        #[arg(long)]
        format: Option<String>,
        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Replay keys on an in-memory screen and print the final screen
    Screen {
        file: PathBuf,
        #[arg(long)]
        format: Option<String>,
        #[arg(long, default_value_t = 40)]
        rows: usize,
        #[arg(long, default_value_t = 160)]
        cols: usize,
        /// Comma separated key names, e.g. `right,down,enter,q`
        #[arg(long, default_value = "")]
        keys: String,
        #[arg(long)]
        no_retry: bool,
    },

    /// List built-in formats
    Formats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::View {
            file,
            format,
            no_retry,
            log_file,
        } => {
            if let Some(path) = log_file.as_deref() {
                init_logging(path)?;
            }
            cmd_view(&file, format.as_deref(), policy(no_retry))
        }
        Cmd::Dump { file, format, pretty } => cmd_dump(&file, format.as_deref(), pretty),
        Cmd::Screen {
            file,
            format,
            rows,
            cols,
            keys,
            no_retry,
        } => cmd_screen(&file, format.as_deref(), rows, cols, &keys, policy(no_retry)),
        Cmd::Formats => {
            for f in FormatRegistry::builtin().list() {
                println!("{:<6} {}", f.name(), f.description());
            }
            Ok(())
        }
    }
}

fn policy(no_retry: bool) -> ExplorePolicy {
    if no_retry {
        ExplorePolicy::GiveUp
    } else {
        ExplorePolicy::Retry
    }
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KSV_LOG").unwrap_or_else(|_| "ksv=info".into()),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn load(path: &Path, format: Option<&str>) -> Result<Decoded> {
    let buf = read_input(path).with_context(|| format!("read {}", path.display()))?;
    let registry = FormatRegistry::builtin();
    let fmt = match registry.resolve(format, &buf) {
        Ok(f) => f,
        Err(errs) => {
            eprint!("{errs}");
            std::process::exit(1);
        }
    };
    Ok(fmt.decode(buf))
}

fn cmd_view(path: &Path, format: Option<&str>, policy: ExplorePolicy) -> Result<()> {
    let decoded = load(path, format)?;
    let ui = platform_console()?;
    let mut tree = Tree::new(ui, decoded.root, policy);
    tree.refresh()?;
    if let Some(e) = decoded.error {
        message_box(tree.console_mut(), "Error while parsing", &e.to_string())?;
    }
    tree.run()?;
    Ok(())
}

fn cmd_dump(path: &Path, format: Option<&str>, pretty: bool) -> Result<()> {
    let decoded = load(path, format)?;
    if let Some(e) = &decoded.error {
        eprintln!("warning: decoding stopped early: {e}");
    }
    let json = to_json(&decoded.root).with_context(|| "computing fields")?;
    let out = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{out}");
    Ok(())
}

fn cmd_screen(
    path: &Path,
    format: Option<&str>,
    rows: usize,
    cols: usize,
    keys: &str,
    policy: ExplorePolicy,
) -> Result<()> {
    if rows < 4 || cols < 8 {
        bail!("screen of {rows}x{cols} is too small");
    }
    let keys = keys
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::parse::<Key>)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let decoded = load(path, format)?;
    let ui = VirtualConsole::new(rows, cols).with_keys(keys);
    let mut tree = Tree::new(ui, decoded.root, policy);
    tree.refresh()?;

    let res = match decoded.error {
        Some(e) => message_box(tree.console_mut(), "Error while parsing", &e.to_string()).and_then(|_| tree.run()),
        None => tree.run(),
    };
    match res {
        Ok(()) => {}
        // Running out of scripted keys ends the replay.
        Err(VisError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e.into()),
    }
    println!("{}", tree.console().text());
    Ok(())
}
