//! Tether CLI - open one file with its configured language server.
//!
//! ```text
//! tether <file> [--language <id>] [--hover <line:col>] [--complete <line:col>] [--wait <ms>]
//! ```
//!
//! Starts the servers from `~/.tether/config.toml`, waits for the handshake,
//! opens the file, optionally asks for hover or completion, prints whatever
//! the server reports until the wait expires, and shuts everything down.
//! Positions are 1-based.

mod config;

use std::{
    env,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use tether_lsp::diagnostics::LineDiagnostics;
use tether_lsp::protocol::path_to_file_uri;
use tether_lsp::{Host, LspManager, RequestContext, RequestOutcome};
use tether_types::{
    CompletionItem, MessageType, Position, line_content, split_lines_inclusive, utf16_to_byte,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT: Duration = Duration::from_secs(3);
const IDLE_TICK: Duration = Duration::from_millis(250);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.tether/logs/tether.log
    if let Some(config_path) = config::config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("tether.log"));
    }

    // Fallback: ./.tether/logs/tether.log
    candidates.push(PathBuf::from(".tether").join("logs").join("tether.log"));

    candidates
}

#[derive(Debug, Default)]
struct Args {
    file: PathBuf,
    language: Option<String>,
    hover: Option<Position>,
    complete: Option<Position>,
    wait: Option<Duration>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut file = None;
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().with_context(|| format!("{flag} needs a value"));
            match arg.as_str() {
                "--language" => parsed.language = Some(value("--language")?),
                "--hover" => parsed.hover = Some(parse_position(&value("--hover")?)?),
                "--complete" => parsed.complete = Some(parse_position(&value("--complete")?)?),
                "--wait" => {
                    let ms: u64 = value("--wait")?.parse().context("--wait takes milliseconds")?;
                    parsed.wait = Some(Duration::from_millis(ms));
                }
                flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
                _ => file = Some(PathBuf::from(arg)),
            }
        }
        parsed.file = file.context(
            "usage: tether <file> [--language <id>] [--hover <line:col>] [--complete <line:col>] [--wait <ms>]",
        )?;
        Ok(parsed)
    }
}

/// Parse a 1-based `line:col` into a protocol position.
fn parse_position(s: &str) -> Result<Position> {
    let (line, col) = s.split_once(':').context("position must be line:col")?;
    let line: u32 = line.trim().parse().context("invalid line")?;
    let col: u32 = col.trim().parse().context("invalid column")?;
    if line == 0 || col == 0 {
        bail!("positions are 1-based");
    }
    Ok(Position::new(line - 1, col - 1))
}

fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    Some(match ext {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "json" => "json",
        "lua" => "lua",
        "cs" => "csharp",
        "java" => "java",
        _ => return None,
    })
}

/// Text of `position`'s line before the caret.
fn line_prefix(text: &str, position: Position) -> &str {
    let line = split_lines_inclusive(text)
        .nth(position.line as usize)
        .map_or("", line_content);
    let end = utf16_to_byte(line, position.character).unwrap_or(line.len());
    &line[..end]
}

/// Prints what the servers report.
#[derive(Default)]
struct Printer {
    initialized: usize,
}

impl Host for Printer {
    fn status(&mut self, message: &str) {
        println!("status: {message}");
    }

    fn log_message(&mut self, server: &str, kind: MessageType, message: &str) {
        println!("[{server}] {}: {message}", kind.label());
    }

    fn show_message(&mut self, server: &str, kind: MessageType, message: &str) {
        println!("[{server}] {} (message): {message}", kind.label());
    }

    fn server_stderr(&mut self, server: &str, line: &str) {
        eprintln!("[{server}] {line}");
    }

    fn server_initialized(&mut self, _server: &str) {
        self.initialized += 1;
    }

    fn diagnostics_changed(&mut self, uri: &str, lines: &[LineDiagnostics]) {
        if lines.is_empty() {
            println!("{uri}: no diagnostics");
            return;
        }
        for line in lines {
            for entry in line.text.lines() {
                println!("{uri}:{}: {entry}", line.line + 1);
            }
        }
    }

    fn completion(&mut self, _context: &RequestContext, items: &[CompletionItem]) {
        println!("{} completion(s)", items.len());
        for item in items.iter().take(20) {
            match &item.detail {
                Some(detail) => println!("  {}  {detail}", item.label),
                None => println!("  {}", item.label),
            }
        }
    }

    fn hover(&mut self, _context: &RequestContext, text: &str) {
        println!("hover:\n{text}");
    }
}

async fn run(args: Args) -> Result<()> {
    let config = config::load()?.unwrap_or_default();
    if config.servers.is_empty() {
        bail!(
            "no language servers configured in {}",
            config::config_path().map_or_else(|| "~/.tether/config.toml".into(), |p| p.display().to_string())
        );
    }

    let path = fs::canonicalize(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let language = match args.language.as_deref().or_else(|| language_for(&path)) {
        Some(id) => id.to_string(),
        None => bail!("cannot tell the language of {}; pass --language", path.display()),
    };
    let uri = path_to_file_uri(&path)?.to_string();

    let mut host = Printer::default();
    let mut manager = LspManager::start(&config).await;
    if !manager.has_running_servers() {
        bail!("no language server could be started");
    }

    let deadline = Instant::now() + INIT_TIMEOUT;
    while host.initialized == 0 && Instant::now() < deadline && manager.has_running_servers() {
        manager.pump(&mut host);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if host.initialized == 0 {
        manager.shutdown_all(&mut host).await;
        bail!("language server did not finish initializing");
    }

    if !manager.open_document(&uri, Some(path.clone()), &language, &text, &mut host) {
        println!("status: no server opened {language} documents");
    }

    if let Some(position) = args.hover {
        manager.hover(&uri, &text, position, &mut host);
    }
    if let Some(position) = args.complete
        && let Some(RequestOutcome::Sent(id)) =
            manager.completion(&uri, &text, position, line_prefix(&text, position), &mut host)
    {
        tracing::debug!(id, "Completion requested");
    }

    let until = Instant::now() + args.wait.unwrap_or(DEFAULT_WAIT);
    while Instant::now() < until && manager.has_running_servers() {
        let now = Instant::now();
        manager.pump_due(now, &mut host);
        let next = manager
            .next_due()
            .unwrap_or(now + IDLE_TICK)
            .min(until)
            .max(now);
        tokio::time::sleep_until(next.into()).await;
    }

    manager.close_document(&uri, &text, &mut host);
    manager.shutdown_all(&mut host).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse(env::args().skip(1))?;
    if let Err(err) = run(args).await {
        tracing::warn!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
