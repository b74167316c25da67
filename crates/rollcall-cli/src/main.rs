use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rollcall_core::{
    AttendanceLedger, AttendancePipeline, DetSize, EmbeddingStore, GalleryBuilder, SystemClock,
};
use rollcall_vision::OnnxFaceAnalyzer;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Mark attendance from group photos")]
struct Cli {
    /// TOML config file (overrides ROLLCALL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Per-invocation path overrides, applied on top of the config file and environment.
#[derive(Args)]
struct PathArgs {
    /// Reference image directory (one folder per person)
    #[arg(long, global = true)]
    gallery_dir: Option<PathBuf>,
    /// Embedding store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Directory of uploaded group photos
    #[arg(long, global = true)]
    incoming_dir: Option<PathBuf>,
    /// Archive directory for processed photos
    #[arg(long, global = true)]
    processed_dir: Option<PathBuf>,
    /// Attendance CSV
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,
    /// Directory holding the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
}

impl PathArgs {
    fn apply(self, config: &mut Config) {
        let overrides = [
            (self.gallery_dir, &mut config.gallery_dir),
            (self.store, &mut config.store_path),
            (self.incoming_dir, &mut config.incoming_dir),
            (self.processed_dir, &mut config.processed_dir),
            (self.ledger, &mut config.ledger_path),
            (self.model_dir, &mut config.model_dir),
        ];
        for (value, field) in overrides {
            if let Some(path) = value {
                *field = path;
            }
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Embed new reference images into the gallery
    Enroll,
    /// Match uploaded group photos and mark attendance
    Attend,
    /// List identities in the gallery
    List,
    /// Show attendance for a day
    Report {
        /// Day to show (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.paths.apply(&mut config);
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Enroll => enroll(&config),
        Commands::Attend => attend(&config),
        Commands::List => list(&config),
        Commands::Report { date } => {
            report(&config, date.unwrap_or_else(|| chrono::Local::now().date_naive()))
        }
    }
}

fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer> {
    OnnxFaceAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))
}

fn enroll(config: &Config) -> Result<()> {
    let mut analyzer = load_analyzer(config)?;
    let builder = GalleryBuilder::new(
        &config.gallery_dir,
        &config.store_path,
        DetSize(config.gallery_det_size),
    );
    let (gallery, summary) = builder.build(&mut analyzer)?;

    println!(
        "Scanned {} images, {} new; gallery holds {} faces",
        summary.scanned,
        summary.new_images,
        gallery.len()
    );
    for (identity, count) in &summary.embedded {
        println!("  {identity}: {count} image(s) processed");
    }
    if summary.faceless > 0 {
        println!("  {} image(s) had no usable face", summary.faceless);
    }
    if summary.failed > 0 {
        println!("  {} image(s) failed and will be retried", summary.failed);
    }
    Ok(())
}

fn attend(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.incoming_dir)?;
    std::fs::create_dir_all(&config.processed_dir)?;

    if !has_files(&config.incoming_dir)? {
        println!("No uploaded images found to process");
        return Ok(());
    }

    let mut pipeline = AttendancePipeline::prepare(&config.pipeline(), SystemClock)?;
    let mut analyzer = load_analyzer(config)?;
    let summary = pipeline.run(&mut analyzer)?;

    println!(
        "Processed {} image(s): {} archived, {} skipped",
        summary.images, summary.archived, summary.skipped
    );
    println!(
        "Faces: {} seen, {} newly marked, {} already present, {} unmatched",
        summary.faces, summary.marked, summary.already_present, summary.unmatched
    );
    let unusable = summary.missing_embeddings + summary.invalid_embeddings;
    if unusable > 0 {
        println!("  {unusable} face(s) had no usable embedding");
    }
    Ok(())
}

fn has_files(dir: &Path) -> Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn list(config: &Config) -> Result<()> {
    let store = EmbeddingStore::load_or_default(&config.store_path)?;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &store.names {
        *counts.entry(name.as_str()).or_default() += 1;
    }

    if counts.is_empty() {
        println!("No faces enrolled");
    }
    for (identity, count) in &counts {
        println!("{identity}: {count} face(s)");
    }
    println!("{} source image(s) processed", store.files.len());
    Ok(())
}

fn report(config: &Config, day: NaiveDate) -> Result<()> {
    let ledger = AttendanceLedger::load(&config.ledger_path)?;
    let mut present = 0;
    for record in ledger.records_on(day) {
        println!("{}  {}", record.time, record.name);
        present += 1;
    }
    println!("{present} present on {day}");
    Ok(())
}
