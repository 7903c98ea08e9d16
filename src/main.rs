use anyhow::{Context, Result};
use audiotriage::arbiter::ArbitrationGate;
use audiotriage::config::AppConfig;
use audiotriage::db::models::{FeedbackEntry, UserLabel, VerdictRecord};
use audiotriage::db::Database;
use audiotriage::dispatch::{Dispatcher, EarlyResult, FinalResult, Pipeline, PipelineEvent};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "audiotriage", version, about = "Audio integrity triage")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LabelArg {
    Valid,
    Invalid,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, score and arbitrate audio files
    Analyze {
        /// Files or directories (directories are walked recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Skip the health check and never contact the text-generation endpoint
        #[arg(long)]
        offline: bool,

        /// Number of parallel workers (0 = from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Record a reviewer label for an analyzed file
    Feedback {
        /// Content hash (a unique prefix is enough)
        hash: String,

        #[arg(value_enum)]
        label: LabelArg,
    },

    /// Show the stored record for a hash
    Show {
        /// Content hash (a unique prefix is enough)
        hash: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the most recently analyzed files
    List {
        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store statistics
    Stats,

    /// Check that the text-generation endpoint is reachable
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = Arc::new(
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?,
    );

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(audiotriage::config::default_db_path);

    match cli.command {
        Commands::Analyze {
            paths,
            offline,
            jobs,
        } => {
            let offline = offline || !config.llm.enabled;
            if !offline {
                run_health(&config)
                    .context("Startup health check failed (pass --offline to analyze without arbitration)")?;
            }
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            run_analyze(&config, open_db(&db_path)?, &paths, offline, workers)?;
        }

        Commands::Feedback { hash, label } => {
            let db = open_db(&db_path)?;
            let record = resolve_hash(&db, &hash)?;
            let entry = FeedbackEntry {
                hash: record.hash,
                valid: matches!(label, LabelArg::Valid),
            };
            db.apply_feedback(&entry)
                .with_context(|| format!("Failed to record feedback for {}", entry.hash))?;
            println!(
                "{} ({}) marked {}",
                short_hash(&entry.hash),
                record.filename,
                UserLabel::from(entry.valid).as_str()
            );
        }

        Commands::Show { hash, json } => {
            let db = open_db(&db_path)?;
            let record = resolve_hash(&db, &hash)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
        }

        Commands::List { limit, json } => {
            let records = open_db(&db_path)?.recent(limit).context("Failed to list records")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No analyses stored yet.");
            } else {
                print_record_table(&records);
            }
        }

        Commands::Stats => {
            let stats = open_db(&db_path)?.stats().context("Failed to get stats")?;
            println!("Store Statistics");
            println!("================");
            println!("Analyzed files:   {}", stats.total);
            println!("Defective:        {}", stats.defective);
            println!("Labeled valid:    {}", stats.valid);
            println!("Labeled invalid:  {}", stats.invalid);
            println!("Unlabeled:        {}", stats.unset);
            if let Some(mean) = stats.mean_score {
                println!("Mean suspicion:   {:.3}", mean);
            }
        }

        Commands::Health => run_health(&config)?,
    }

    Ok(())
}

fn open_db(path: &Path) -> Result<Arc<Database>> {
    log::info!("Database: {}", path.display());
    let db = Database::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}

fn run_health(config: &AppConfig) -> Result<()> {
    let report = audiotriage::health::check_endpoint(&config.llm)?;
    println!(
        "Endpoint OK: {} ({} models, {} {})",
        report.listing_url,
        report.models.len(),
        config.llm.model_name,
        if report.has_model(&config.llm.model_name) { "available" } else { "NOT listed" }
    );
    Ok(())
}

fn run_analyze(
    config: &AppConfig,
    db: Arc<Database>,
    paths: &[PathBuf],
    offline: bool,
    workers: usize,
) -> Result<()> {
    let scan = audiotriage::scanner::collect_audio_files(paths, &config.audio);
    if scan.files.is_empty() {
        anyhow::bail!("No audio files found (accepted: {})", config.audio.extensions.join(", "));
    }
    let total = scan.files.len();

    let gate = ArbitrationGate::from_config(&config.llm, offline);
    let pipeline = Pipeline::new(config, gate, db);
    let (dispatcher, events) =
        Dispatcher::new(pipeline, workers).context("Failed to start worker pool")?;
    log::info!("Analyzing {} files with {} workers", total, dispatcher.workers());

    for path in scan.files {
        dispatcher.submit(path);
    }
    // Queued work still runs; the channel closes after the last task reports
    drop(dispatcher);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut finished: u64 = 0;
    let mut failed: u64 = 0;
    for event in events {
        match event {
            PipelineEvent::Scored(early) => pb.println(format_early(&early)),
            PipelineEvent::Finished(done) => {
                finished += 1;
                pb.println(format_final(&done));
                pb.inc(1);
            }
            PipelineEvent::Failed(f) => {
                failed += 1;
                pb.println(format!("FAILED  {}: {}", f.path.display(), f.cause));
                pb.inc(1);
            }
        }
        pb.set_message(format!("{} done, {} failed", finished, failed));
    }
    pb.finish_with_message(format!("Done: {} analyzed, {} failed", finished, failed));

    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, total);
    }
    Ok(())
}

fn format_early(e: &EarlyResult) -> String {
    let f = &e.features;
    let mel_bands = f.spectrogram.first().map_or(0, |frame| frame.len());
    format!(
        "scored  {}  {:<40} suspicion {:.2}  (spectrogram {}x{})",
        short_hash(&f.content_hash.to_hex()),
        truncate(&f.filename, 40),
        e.score.suspicion_score,
        f.spectrogram.len(),
        mel_bands
    )
}

fn format_final(r: &FinalResult) -> String {
    let f = &r.features;
    let mut line = format!(
        "final   {}  {:<40} suspicion {:.2}",
        short_hash(&f.content_hash.to_hex()),
        truncate(&f.filename, 40),
        r.score.suspicion_score
    );
    if r.score.defective {
        line.push_str(&format!("  DEFECTIVE ({})", status_reason(r)));
    } else {
        line.push_str(&format!(
            "  quality {:.0}  clip {:.4}  crackle {:.4}  centroid {:.0} Hz{}  snr {:.1} dB",
            r.score.quality_score,
            f.clipping_ratio,
            f.crackling_ratio,
            f.spectral_centroid_hz,
            if f.fake_hq { " (fake-HQ)" } else { "" },
            f.snr_db
        ));
        if let Some(ratio) = f.ms_energy_ratio {
            line.push_str(&format!("  s/m {:.4}", ratio));
        }
        if !f.defect_timestamps_sec.is_empty() {
            let stamps: Vec<String> = f
                .defect_timestamps_sec
                .iter()
                .map(|t| format!("{:.2}s", t))
                .collect();
            line.push_str(&format!("\n        clicks at {}", stamps.join(", ")));
        }
    }
    if let Some(reason) = &f.container.spoof_reason {
        line.push_str(&format!("\n        SPOOFED container: {}", reason));
    }
    if let Some(text) = &r.score.arbitration_text {
        line.push_str(&format!("\n        verdict: {}", text));
    }
    line
}

fn status_reason(r: &FinalResult) -> &str {
    match &r.features.status {
        audiotriage::analyzer::FeatureStatus::Defective { reason } => reason,
        audiotriage::analyzer::FeatureStatus::Ok => "ok",
    }
}

/// Exact match first, then a unique prefix.
fn resolve_hash(db: &Database, hash: &str) -> Result<VerdictRecord> {
    let hash = hash.trim().to_lowercase();
    if let Some(record) = db.get(&hash).context("Failed to query store")? {
        return Ok(record);
    }
    let mut matches = db.find_by_prefix(&hash).context("Failed to query store")?;
    match matches.len() {
        0 => anyhow::bail!("No analysis stored for hash {}", hash),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("Hash prefix {} is ambiguous ({} matches)", hash, n),
    }
}

fn print_record(r: &VerdictRecord) {
    println!("Hash:       {}", r.hash);
    println!("File:       {}", r.filename);
    println!("Status:     {}", r.status);
    println!("Suspicion:  {:.3}", r.score);
    if let Some(q) = r.quality_score {
        println!("Quality:    {:.0}", q);
    }
    println!("Label:      {}", r.user_label.as_str());
    if let Some(v) = &r.verdict {
        println!("Verdict:    {}", v);
    }
    if let Some(t) = &r.analyzed_at {
        println!("Analyzed:   {}", t);
    }
    if let Some(t) = &r.labeled_at {
        println!("Labeled:    {}", t);
    }
}

fn print_record_table(records: &[VerdictRecord]) {
    println!(
        "{:<12}  {:<40} {:>6} {:>7}  {:<9} {:<7}",
        "Hash", "File", "Score", "Quality", "Status", "Label"
    );
    println!("{}", "-".repeat(89));
    for r in records {
        println!(
            "{:<12}  {:<40} {:>6.3} {:>7}  {:<9} {:<7}",
            short_hash(&r.hash),
            truncate(&r.filename, 40),
            r.score,
            r.quality_score.map_or_else(|| "-".to_string(), |q| format!("{:.0}", q)),
            r.status,
            r.user_label.as_str()
        );
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
