mod crawl;
mod db;
mod experiment;
mod fetcher;
mod index;
mod inputs;
mod ledger;
mod parser;
mod store;
mod warc;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use experiment::completion::{OpenAiClient, RetryPolicy};
use ledger::{Ledger, LedgerFormat, LedgerMode, PropagationPolicy};
use store::StoreKind;

const LABELS_PATH: &str = "input_data/hybridhiring/DATA_RELEASE.csv";
const SNAPSHOTS_PATH: &str = "input_data/crawl_list.csv";
const BIOS_PATH: &str = "input_data/BIOS.jsonl";
const ARCHIVED_LEDGER: &str = "processed_data/cc_completed_searches.csv";
const LIVE_LEDGER: &str = "processed_data/current_completed_searches.csv";
const ARCHIVED_PAGES: &str = "processed_data/cc_htmls.csv";
const LIVE_PAGES: &str = "processed_data/current_htmls.csv";
const PAGES_DIR: &str = "htmls";
const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Parser)]
#[command(name = "hirebias", about = "Archived bio crawler and hiring-bias experiment")]
struct Cli {
    /// Experiment database
    #[arg(long, global = true, default_value = db::DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every bio URL from every archive snapshot
    Crawl {
        /// CSV with a bio_url column
        #[arg(long, default_value = LABELS_PATH)]
        urls: PathBuf,
        /// Snapshot names, one per line, oldest first
        #[arg(long, default_value = SNAPSHOTS_PATH)]
        snapshots: PathBuf,
        #[arg(long, default_value = ARCHIVED_LEDGER)]
        ledger: PathBuf,
        #[arg(long, value_enum, default_value = "legacy")]
        ledger_format: LedgerFormat,
        #[arg(long, value_enum, default_value = "csv")]
        store: StoreKind,
        /// Page store location (default depends on --store)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Do not skip later snapshots after a hit
        #[arg(long)]
        no_propagate: bool,
        /// Max targets to attempt
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch every bio URL from the live web
    Live {
        #[arg(long, default_value = LABELS_PATH)]
        urls: PathBuf,
        #[arg(long, default_value = LIVE_LEDGER)]
        ledger: PathBuf,
        #[arg(long, value_enum, default_value = "tabular")]
        ledger_format: LedgerFormat,
        #[arg(long, value_enum, default_value = "csv")]
        store: StoreKind,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract bio paragraphs from stored pages
    Extract {
        #[arg(long, value_enum, default_value = "csv")]
        store: StoreKind,
        /// Page store to read (default depends on --store and --archived)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Paragraphs CSV to write
        #[arg(long)]
        out: Option<PathBuf>,
        /// Read archived pages rather than live ones
        #[arg(long)]
        archived: bool,
    },
    /// Merge labeled bios with the corpus and build screening tasks
    BuildTasks {
        #[arg(long, default_value = LABELS_PATH)]
        labels: PathBuf,
        /// JSON-lines bio corpus
        #[arg(long, default_value = BIOS_PATH)]
        bios: PathBuf,
        #[arg(long, default_value = "0")]
        seed: u64,
    },
    /// Ask the model to screen every unscored task
    Score {
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Max tasks to score
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Attempts per task while rate limited
        #[arg(long, default_value = "8")]
        max_attempts: u32,
    },
    /// True-positive rates by profession and gender
    Report,
    /// Ledger, store and experiment counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    dotenvy::dotenv().ok();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl {
            urls,
            snapshots,
            ledger,
            ledger_format,
            store,
            out,
            no_propagate,
            limit,
        } => {
            let ids = inputs::read_identifiers(&urls)?;
            let snapshots = inputs::read_snapshots(&snapshots)?;
            let policy = if no_propagate {
                PropagationPolicy::None
            } else {
                PropagationPolicy::LaterSnapshots
            };
            let mut ledger = Ledger::open(
                &ledger,
                ledger_format,
                LedgerMode::Archived,
                policy,
                snapshots.clone(),
            )?;
            let targets = crawl::pending(crawl::archived_targets(&ids, &snapshots), &ledger, limit);
            if targets.is_empty() {
                println!("Nothing to fetch: every (url, snapshot) pair is in the ledger.");
                return Ok(());
            }

            let out = out.unwrap_or_else(|| default_pages(store, true));
            let mut pages = store::open(store, &out, true);
            let fetcher = fetcher::HttpFetcher::new(index::INDEX_HOST, fetcher::STORAGE_HOST);
            println!(
                "Fetching {} targets ({} urls x {} snapshots)...",
                targets.len(),
                ids.len(),
                snapshots.len()
            );
            let stats = crawl::run(&fetcher, pages.as_mut(), &mut ledger, targets).await?;
            println!(
                "Done: {} attempted ({} ok, {} without captures, {} errors, {} skipped), {} pages, {} ledger entries.",
                stats.total,
                stats.ok,
                stats.empty,
                stats.errors,
                stats.skipped,
                stats.pages,
                stats.checkpointed
            );
            Ok(())
        }
        Commands::Live {
            urls,
            ledger,
            ledger_format,
            store,
            out,
            limit,
        } => {
            let ids = inputs::read_identifiers(&urls)?;
            let mut ledger = Ledger::open(
                &ledger,
                ledger_format,
                LedgerMode::Live,
                PropagationPolicy::None,
                Vec::new(),
            )?;
            let targets = crawl::pending(crawl::live_targets(&ids), &ledger, limit);
            if targets.is_empty() {
                println!("Nothing to fetch: every url is in the ledger.");
                return Ok(());
            }

            let out = out.unwrap_or_else(|| default_pages(store, false));
            let mut pages = store::open(store, &out, false);
            let fetcher = fetcher::HttpFetcher::new(index::INDEX_HOST, fetcher::STORAGE_HOST);
            println!("Fetching {} live pages...", targets.len());
            let stats = crawl::run(&fetcher, pages.as_mut(), &mut ledger, targets).await?;
            println!(
                "Done: {} attempted ({} ok, {} errors), {} pages.",
                stats.total, stats.ok, stats.errors, stats.pages
            );
            Ok(())
        }
        Commands::Extract {
            store,
            input,
            out,
            archived,
        } => {
            let input = input.unwrap_or_else(|| default_pages(store, archived));
            let out = out.unwrap_or_else(|| {
                let prefix = if archived { "cc" } else { "current" };
                PathBuf::from(format!("processed_data/{}_paragraphs.csv", prefix))
            });
            let pages = store::open(store, &input, archived).read_all()?;
            if pages.is_empty() {
                println!("No pages in {}. Run 'crawl' or 'live' first.", input.display());
                return Ok(());
            }
            println!("Extracting paragraphs from {} pages...", pages.len());
            let records = parser::extract_pages(&pages);
            parser::write_csv(&out, &records)?;
            println!("Wrote {} paragraphs to {}", records.len(), out.display());
            Ok(())
        }
        Commands::BuildTasks { labels, bios, seed } => {
            let conn = db::connect(&cli.db)?;
            let existing = db::count_tasks(&conn)?;
            if existing > 0 {
                bail!(
                    "{} already holds {} tasks; delete it to rebuild",
                    cli.db.display(),
                    existing
                );
            }

            let merged = inputs::merge_bios(inputs::read_labeled(&labels)?, inputs::read_corpus(&bios)?);
            db::insert_bios(&conn, &merged)?;
            let tasks = experiment::sampler::build_tasks(
                &merged,
                experiment::PAIRS,
                &mut StdRng::seed_from_u64(seed),
            );
            let slots = db::insert_tasks(&conn, &tasks)?;
            println!("Saved {} tasks ({} bios) from {} merged bios.", tasks.len(), slots, merged.len());
            Ok(())
        }
        Commands::Score {
            model,
            seed,
            limit,
            max_attempts,
        } => {
            let conn = db::connect(&cli.db)?;
            if db::count_tasks(&conn)? == 0 {
                println!("No tasks. Run 'build-tasks' first.");
                return Ok(());
            }
            let client = OpenAiClient::from_env()?;
            let policy = RetryPolicy {
                max_attempts,
                ..Default::default()
            };
            let stats =
                experiment::score_pending(&conn, &client, &model, &policy, seed, limit).await?;
            println!(
                "Done: {} tasks ({} answered, {} rejected, {} skipped).",
                stats.tasks, stats.answered, stats.rejected, stats.skipped
            );
            Ok(())
        }
        Commands::Report => {
            let conn = db::connect(&cli.db)?;
            let rows = db::fetch_scored(&conn)?;
            if rows.is_empty() {
                println!("No scored tasks. Run 'score' first.");
                return Ok(());
            }
            let report = experiment::score::accuracy(&rows, &db::fetch_professions(&conn)?);
            print_report(&report);
            Ok(())
        }
        Commands::Stats => {
            for (name, path, mode) in [
                ("Archived ledger", ARCHIVED_LEDGER, LedgerMode::Archived),
                ("Live ledger", LIVE_LEDGER, LedgerMode::Live),
            ] {
                println!("{:<16} {}", format!("{}:", name), ledger_len(Path::new(path), mode)?);
            }
            for (name, path, archived) in [
                ("Archived pages", ARCHIVED_PAGES, true),
                ("Live pages", LIVE_PAGES, false),
            ] {
                let n = store::open(StoreKind::Csv, path, archived).count()?;
                println!("{:<16} {}", format!("{}:", name), n);
            }

            let conn = db::connect(&cli.db)?;
            let s = db::get_stats(&conn)?;
            println!("Bios:            {}", s.bios);
            println!("Tasks:           {}", s.tasks);
            println!("Scored:          {}", s.scored_tasks);
            println!("Pending:         {}", s.pending_tasks);
            println!("Rejected bios:   {}", s.rejected_bios);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn default_pages(kind: StoreKind, archived: bool) -> PathBuf {
    match (kind, archived) {
        (StoreKind::Dir, _) => PathBuf::from(PAGES_DIR),
        (StoreKind::Csv, true) => PathBuf::from(ARCHIVED_PAGES),
        (StoreKind::Csv, false) => PathBuf::from(LIVE_PAGES),
    }
}

/// Entry count of a ledger file in its command's default format.
fn ledger_len(path: &Path, mode: LedgerMode) -> Result<usize> {
    let format = match mode {
        LedgerMode::Archived => LedgerFormat::Legacy,
        LedgerMode::Live => LedgerFormat::Tabular,
    };
    ledger::count_entries(path, format, mode)
}

fn print_report(report: &experiment::score::Report) {
    println!(
        "{:<12} | {:>7} | {:>7} | {:>7} | {:>8} | {:>5}",
        "Profession", "TPR", "Female", "Male", "F - M", "n"
    );
    println!("{}", "-".repeat(62));
    for (profession, t) in &report.professions {
        println!(
            "{:<12} | {:>7} | {:>7} | {:>7} | {:>8} | {:>5}",
            truncate(profession, 12),
            rate(t.all.rate()),
            rate(t.female.rate()),
            rate(t.male.rate()),
            rate(t.difference()),
            t.all.total
        );
    }
    println!(
        "\nOverall TPR {} over {} bios ({} excluded with non-profession labels)",
        rate(report.overall.rate()),
        report.overall.total,
        report.excluded
    );
}

fn rate(r: Option<f64>) -> String {
    r.map(|r| format!("{:.3}", r)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
