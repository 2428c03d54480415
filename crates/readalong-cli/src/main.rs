use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use readalong_core::config_file;
use readalong_core::{
    ChunkError, ChunkResolver, Cue, DetectionReport, DocumentIndex, EchoSynthesizer, LibraryError,
    ReadalongConfig, SessionError,
};

mod output;

use output::ColorMode;

/// Readalong - index PDFs for click-to-listen reading
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a PDF and report pages, strategies and detected boilerplate
    Index {
        /// Path to the PDF
        file_path: PathBuf,
    },

    /// List every word with its global index and filter state
    Words {
        /// Path to the PDF
        file_path: PathBuf,

        /// Emit the per-word UI view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a click at a word would be split into speech chunks
    Chunks {
        /// Path to the PDF
        file_path: PathBuf,

        /// Global index of the clicked word
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// Speak headers, footers and page numbers too
        #[arg(long)]
        no_filter: bool,

        /// Stop after this many chunks
        #[arg(long)]
        limit: Option<usize>,

        /// Target words per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Simulate a reading session with a text-echo voice
    Read {
        /// Path to the PDF
        file_path: PathBuf,

        /// Start at this word instead of the saved position
        #[arg(long)]
        from: Option<usize>,

        /// Reader whose progress is loaded and saved
        #[arg(long, default_value = "local")]
        user: String,

        /// SQLite file for reading progress
        #[arg(long)]
        progress_db: Option<PathBuf>,

        /// Voice id passed to the synthesizer
        #[arg(long)]
        voice: Option<String>,

        /// Speak headers, footers and page numbers too
        #[arg(long)]
        no_filter: bool,

        /// Stop after this many chunks
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Target words per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Index { file_path } => {
            let config = resolve_config(None, None);
            let (index, report) = index_with_spinner(&file_path, &config).await?;
            let mut out = std::io::stdout();
            output::print_index_summary(&mut out, &display_name(&file_path), &index, &report, color)?;
            Ok(())
        }
        Command::Words { file_path, json } => {
            let config = resolve_config(None, None);
            let (index, _) = index_with_spinner(&file_path, &config).await?;
            words(&index, json, color)
        }
        Command::Chunks {
            file_path,
            from,
            no_filter,
            limit,
            chunk_size,
        } => {
            let config = resolve_config(chunk_size, None);
            let (index, _) = index_with_spinner(&file_path, &config).await?;
            chunks(&index, &config, from, !no_filter, limit, color)
        }
        Command::Read {
            file_path,
            from,
            user,
            progress_db,
            voice,
            no_filter,
            max_chunks,
            chunk_size,
        } => {
            let config = resolve_config(chunk_size, progress_db);
            let session = ReadOptions {
                from,
                user,
                voice,
                filtering: !no_filter,
                max_chunks,
            };
            read(&file_path, &config, session, color).await
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI flags > env vars > config files > defaults
fn resolve_config(chunk_size: Option<usize>, progress_db: Option<PathBuf>) -> ReadalongConfig {
    let mut config = ReadalongConfig::default();
    config_file::apply(&config_file::load_config(), &mut config);

    let chunk_size = chunk_size.or_else(|| {
        std::env::var("READALONG_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
    });
    if let Some(size) = chunk_size {
        config.chunking.chunk_size = size.max(1);
    }

    let progress_db =
        progress_db.or_else(|| std::env::var("READALONG_PROGRESS_DB").ok().map(PathBuf::from));
    if progress_db.is_some() {
        config.library.progress_db = progress_db;
    }
    config
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn spinner(message: String) -> anyhow::Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

async fn index_with_spinner(
    file_path: &Path,
    config: &ReadalongConfig,
) -> anyhow::Result<(DocumentIndex, DetectionReport)> {
    if !file_path.exists() {
        anyhow::bail!("File not found: {}", file_path.display());
    }
    let bar = spinner(format!("Extracting {}...", display_name(file_path)))?;
    let path = file_path.to_path_buf();
    let config = config.clone();
    let result =
        tokio::task::spawn_blocking(move || readalong_ingest::index_file(&path, &config)).await?;
    bar.finish_and_clear();
    Ok(result?)
}

fn words(index: &DocumentIndex, json: bool, color: ColorMode) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        let views: Vec<_> = index.word_views().collect();
        serde_json::to_writer_pretty(&mut out, &views)?;
        writeln!(out)?;
        return Ok(());
    }
    for word in index.words() {
        output::print_word(&mut out, word, color)?;
    }
    writeln!(
        out,
        "Total: {} words ({} filtered)",
        index.total_word_count(),
        index.filtered_count()
    )?;
    Ok(())
}

fn chunks(
    index: &DocumentIndex,
    config: &ReadalongConfig,
    from: usize,
    filtering: bool,
    limit: Option<usize>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let resolver = ChunkResolver::new(config.chunking.clone());
    let mut out = std::io::stdout().lock();
    let mut position = from;
    let mut planned = 0usize;

    while limit.is_none_or(|max| planned < max) {
        let chunk = match resolver.resolve_chunk(index, position, filtering) {
            Ok(chunk) => chunk,
            Err(ChunkError::OutOfRange { .. }) if planned > 0 => break,
            Err(e) => return Err(e.into()),
        };
        planned += 1;
        output::print_chunk(&mut out, planned, &chunk, color)?;
        position = chunk.end_index;
    }
    writeln!(out, "Total: {} chunks", planned)?;
    Ok(())
}

struct ReadOptions {
    from: Option<usize>,
    user: String,
    voice: Option<String>,
    filtering: bool,
    max_chunks: Option<usize>,
}

async fn read(
    file_path: &Path,
    config: &ReadalongConfig,
    options: ReadOptions,
    color: ColorMode,
) -> anyhow::Result<()> {
    let bytes = readalong_ingest::read_pdf(file_path, &config.extraction)?;
    let document_id = readalong_ingest::document_id(file_path);
    let library = Arc::new(readalong_ingest::open_library(config)?);

    // Ctrl+C stops synthesis; the session is still closed and saved below.
    let shutdown = Arc::clone(&library);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    let bar = spinner(format!("Indexing {}...", display_name(file_path)))?;
    let indexed = library.index_document(document_id.as_str(), bytes).await;
    bar.finish_and_clear();
    indexed?;

    let session = library.open_session(&document_id, &options.user).await?;
    let filtering = options.filtering;
    library
        .update_session(&session, |s| s.set_filtering(filtering))
        .await?;

    let synth = EchoSynthesizer::new();
    let mut out = std::io::stdout().lock();
    let mut cue = options.from.map_or(Cue::Next, Cue::From);
    let mut delivered = 0usize;

    while options.max_chunks.is_none_or(|max| delivered < max) {
        match library
            .narrate(&session, cue, &synth, options.voice.as_deref())
            .await
        {
            Ok(narration) => {
                delivered += 1;
                output::print_narration(&mut out, &narration, color)?;
                cue = Cue::Next;
            }
            Err(LibraryError::Session(SessionError::Chunk(_))) => {
                writeln!(out, "End of document.")?;
                break;
            }
            Err(LibraryError::Cancelled) => {
                writeln!(out, "Interrupted.")?;
                break;
            }
            Err(e) => {
                let _ = library.close_session(&session).await;
                return Err(e.into());
            }
        }
    }

    let progress = library.close_session(&session).await?;
    output::print_session_end(&mut out, &options.user, &progress, color)?;
    Ok(())
}
