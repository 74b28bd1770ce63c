//! Binary entry point for the batch subtitle downloader.

use anyhow::Result;
use batchsubs_core::batch::{run_batch, BatchConfig, MissingPolicy, DEFAULT_RANK};
use batchsubs_core::scan::VideoFormat;
use batchsubs_core::service::opensubtitles::{
    OpenSubtitlesClient, DEFAULT_ENDPOINT, DEFAULT_USER_AGENT,
};
use batchsubs_core::service::Language;
use clap::builder::TypedValueParser as _;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Video formats accepted by `-f`.
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Mkv,
    Avi,
}

impl From<FormatArg> for VideoFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Mkv => VideoFormat::Mkv,
            FormatArg::Avi => VideoFormat::Avi,
        }
    }
}

/// Subtitle languages accepted by `-l`.
#[derive(Clone, Copy, ValueEnum)]
enum LanguageArg {
    Eng,
    Spa,
}

impl From<LanguageArg> for Language {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Eng => Language::Eng,
            LanguageArg::Spa => Language::Spa,
        }
    }
}

/// Download subtitles in batch from OpenSubtitles.org.
#[derive(Parser)]
#[command(name = "batchsubs", version, about)]
struct Cli {
    /// Username of the OpenSubtitles.org account used to retrieve.
    #[arg(short = 'u', value_name = "USERNAME", env = "OPENSUBTITLES_USERNAME")]
    username: String,

    /// Password of the OpenSubtitles.org account used to retrieve.
    #[arg(
        short = 'p',
        value_name = "PASSWORD",
        env = "OPENSUBTITLES_PASSWORD",
        hide_env_values = true
    )]
    password: String,

    /// Input folder.
    #[arg(short = 'i', value_name = "FOLDER")]
    folder: PathBuf,

    /// Format of files for which to download subtitles.
    #[arg(short = 'f', value_enum)]
    format: FormatArg,

    /// Subtitle language.
    #[arg(short = 'l', value_enum)]
    language: LanguageArg,

    /// If multiple choices are available, choose another than the first one.
    #[arg(
        short = 'c',
        value_name = "NUMBER",
        default_value_t = DEFAULT_RANK,
        value_parser = clap::value_parser!(u32).range(1..).map(|n| n as usize)
    )]
    choice: usize,

    /// Skip videos without subtitles instead of aborting the run.
    #[arg(long)]
    skip_missing: bool,

    /// Search and choose subtitles but do not download them.
    #[arg(long)]
    dry_run: bool,

    /// XML-RPC endpoint of the subtitle service.
    #[arg(long, env = "OPENSUBTITLES_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// User agent registered with the subtitle service.
    #[arg(long, env = "OPENSUBTITLES_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,
}

/// Application entry point which parses CLI args and runs one batch.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("batchsubs=trace".parse()?)
            .add_directive("batchsubs_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("batchsubs=info".parse()?)
            .add_directive("batchsubs_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BatchConfig {
        username: cli.username,
        password: cli.password,
        folder: cli.folder,
        format: cli.format.into(),
        language: cli.language.into(),
        rank: cli.choice,
        missing: if cli.skip_missing {
            MissingPolicy::Skip
        } else {
            MissingPolicy::Abort
        },
        dry_run: cli.dry_run,
    };
    let service = OpenSubtitlesClient::new(cli.endpoint, cli.user_agent)?;
    let report = run_batch(&service, &config)?;
    info!(
        "done: {} written, {} planned, {} skipped",
        report.written.len(),
        report.planned.len(),
        report.skipped.len()
    );
    Ok(())
}
