//! Truth ledger CLI.
//!
//! Thin adapter over the core pipeline:
//! - seed sources/entities/attributes from JSON,
//! - run individual jobs or the full pipeline,
//! - resolve facts under a confidence slider,
//! - inspect status, stats, and the review queue,
//! - verify ledger invariants (`integrity` exits non-zero on critical
//!   violations).
//!
//! State lives in the in-memory reference store for the lifetime of the
//! process, so ingestion and queries compose within one invocation.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use truthledger_analysis::{
    default_rules, resolve_fact, run_integrity_check, DisplayStatus, FactQuery,
};
use truthledger_extract::ExtractorRegistry;
use truthledger_ingest::{FeedFetcher, Ingestor, PageFetcher};
use truthledger_jobs::{JobId, JobOrchestrator, PipelineContext, StuckJobReaper};
use truthledger_model::{ClaimKey, DisplayPolicy, ReviewStatus, ScoringPolicy, SyncState};
use truthledger_store::{DynStore, MemoryStore, Store};

mod seed;

#[derive(Parser)]
#[command(name = "truthledger")]
#[command(
    author,
    version,
    about = "Truth ledger: evidence-scored facts about engines and launch vehicles"
)]
struct Cli {
    /// Seed file applied before the command runs.
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a seed file without running anything.
    Seed {
        /// Seed JSON file.
        file: PathBuf,
    },

    /// Run one pipeline job to completion.
    Run {
        /// Job id: url_ingest, feed_ingest, extract, conflicts, derive,
        /// score, full_pipeline.
        job: String,
    },

    /// Run the composite pipeline (extract → conflicts → derive → score).
    Pipeline,

    /// Resolve a fact.
    Resolve {
        /// Claim key (64 hex chars).
        #[arg(long)]
        claim_key: Option<String>,
        /// Entity canonical name (with --field).
        #[arg(long)]
        entity: Option<String>,
        /// Domain field name, e.g. engines.isp_s.
        #[arg(long)]
        field: Option<String>,
        /// Confidence dial in [0, 1].
        #[arg(long, default_value_t = 0.5)]
        slider: f64,
    },

    /// Per-stage pipeline status.
    Status,

    /// Store counters.
    Stats,

    /// Review queue operations.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },

    /// Re-check ledger invariants; exits non-zero on critical violations.
    Integrity,

    /// Sweep stuck sync rows now.
    Reap,
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List pending review items.
    List,
    /// Resolve or dismiss an item.
    Resolve {
        /// Review item id.
        id: String,
        /// dismiss instead of resolve.
        #[arg(long)]
        dismiss: bool,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let store: DynStore = Arc::new(MemoryStore::new());
    let mut registry = ExtractorRegistry::canonical();

    if let Some(path) = &cli.seed {
        let seed = seed::read_seed_file(path)?;
        let summary = seed::apply_seed(&store, &mut registry, &seed).await?;
        println!(
            "{} sources={} feeds={} urls={} entities={} attributes={} extractors={}",
            "Seeded".green().bold(),
            summary.sources,
            summary.feeds,
            summary.urls,
            summary.entities,
            summary.attributes,
            summary.extractors
        );
    }

    let fetcher = PageFetcher::new()?;
    let ingestor = Ingestor::new(store.clone(), fetcher.clone());
    let feed_fetcher = FeedFetcher::new(store.clone(), ingestor.clone(), fetcher);
    let orchestrator = JobOrchestrator::new(PipelineContext {
        store: store.clone(),
        ingestor,
        feed_fetcher,
        registry,
        rules: default_rules(),
        scoring: ScoringPolicy::default(),
    });

    match cli.command {
        Commands::Seed { file } => {
            let seed = seed::read_seed_file(&file)?;
            println!(
                "{} sources={} entities={} attributes={} extractors={}",
                "Seed file ok".green().bold(),
                seed.sources.len(),
                seed.entities.len(),
                seed.attributes.len(),
                seed.extractors.len()
            );
            Ok(0)
        }

        Commands::Run { job } => {
            let job = JobId::parse(&job)?;
            run_job_to_completion(&orchestrator, job).await
        }

        Commands::Pipeline => run_job_to_completion(&orchestrator, JobId::FullPipeline).await,

        Commands::Resolve {
            claim_key,
            entity,
            field,
            slider,
        } => {
            let query = match (claim_key, entity, field) {
                (Some(key), None, None) => FactQuery::ClaimKey(
                    ClaimKey::from_hex(&key).map_err(|e| anyhow!("{e}"))?,
                ),
                (None, Some(entity_name), Some(field_name)) => {
                    let entity = store
                        .entity_by_name(&entity_name)
                        .await?
                        .ok_or_else(|| anyhow!("unknown entity: {entity_name}"))?;
                    FactQuery::Field {
                        entity_id: entity.id,
                        field_name,
                    }
                }
                _ => {
                    return Err(anyhow!(
                        "pass either --claim-key, or --entity with --field"
                    ))
                }
            };

            let response =
                resolve_fact(&store, &DisplayPolicy::default(), &query, slider).await?;
            print_fact_response(&response);
            Ok(0)
        }

        Commands::Status => {
            let status = orchestrator.status().await?;
            let health = if status.healthy {
                "healthy".green().bold()
            } else {
                "degraded".red().bold()
            };
            println!("{} {}", "Pipeline".bold(), health);
            for stage in &status.stages {
                match &stage.last_run {
                    Some(run) => {
                        let state = format_state(run.state);
                        println!(
                            "  {:14} {} records={} started={}",
                            stage.job.to_string(),
                            state,
                            run.records_synced,
                            run.started_at.format("%Y-%m-%d %H:%M:%S"),
                        );
                        if let Some(message) = &run.error_message {
                            println!("    {} {message}", "↳".yellow());
                        }
                    }
                    None => println!("  {:14} {}", stage.job.to_string(), "never run".dimmed()),
                }
            }
            Ok(0)
        }

        Commands::Stats => {
            let stats = store.pipeline_stats().await?;
            println!("{}", "Ledger stats".bold());
            println!("  sources            {}", stats.sources);
            println!("  documents          {}", stats.documents);
            println!("  snippets           {}", stats.snippets);
            println!("  entities           {}", stats.entities);
            println!("  attributes         {}", stats.attributes);
            println!("  claims             {}", stats.claims);
            println!("  derived claims     {}", stats.derived_claims);
            println!("  evidence           {}", stats.evidence);
            println!("  conflict groups    {}", stats.conflict_groups);
            println!("  groups in conflict {}", stats.groups_with_conflict);
            println!("  scored claims      {}", stats.scored_claims);
            println!("  field links        {}", stats.field_links);
            println!("  review backlog     {}", stats.review_pending);
            Ok(0)
        }

        Commands::Review { command } => match command {
            ReviewCommands::List => {
                let items = store.list_review_items(Some(ReviewStatus::Pending)).await?;
                if items.is_empty() {
                    println!("{}", "Review queue is empty".green());
                }
                for item in items {
                    println!(
                        "{} [p{}] {:?} {} — {}",
                        item.id.to_string().dimmed(),
                        item.priority,
                        item.item_type,
                        item.item_ref,
                        item.reason
                    );
                }
                Ok(0)
            }
            ReviewCommands::Resolve {
                id,
                dismiss,
                notes,
                by,
            } => {
                let id = id.parse().context("invalid review item id")?;
                let status = if dismiss {
                    ReviewStatus::Dismissed
                } else {
                    ReviewStatus::Resolved
                };
                store.resolve_review_item(id, status, notes, Some(by)).await?;
                println!("{}", "Review item updated".green().bold());
                Ok(0)
            }
        },

        Commands::Integrity => {
            let report = run_integrity_check(&store).await?;
            if report.is_clean() {
                println!(
                    "{} {} checks passed",
                    "Integrity ok".green().bold(),
                    report.checks_run
                );
                return Ok(0);
            }
            for violation in &report.violations {
                let tag = if violation.critical {
                    "CRITICAL".red().bold()
                } else {
                    "warn".yellow().bold()
                };
                println!("{tag} [{}] {}", violation.check, violation.message);
            }
            Ok(if report.has_critical() { 1 } else { 0 })
        }

        Commands::Reap => {
            let reaper = StuckJobReaper::new(store.clone());
            let reaped = reaper.run_once().await?;
            println!("{} {reaped} stuck rows", "Reaped".yellow().bold());
            Ok(0)
        }
    }
}

/// Start a job and poll the store until its row is terminal.
async fn run_job_to_completion(orchestrator: &JobOrchestrator, job: JobId) -> Result<i32> {
    let receipt = orchestrator.run(job, "cli").await?;
    println!(
        "{} {job} run_id={}",
        "Started".cyan().bold(),
        receipt.run_id
    );

    loop {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let latest = orchestrator.store().latest_sync_statuses().await?;
        let Some(row) = latest.iter().find(|s| s.sync_type == job.sync_type()) else {
            continue;
        };
        if !row.state.is_terminal() {
            continue;
        }
        println!(
            "  {} {} records={}",
            "→".cyan(),
            format_state(row.state),
            row.records_synced
        );
        if let Some(message) = &row.error_message {
            println!("  {} {message}", "↳".yellow());
        }
        return Ok(match row.state {
            SyncState::Success => 0,
            _ => 1,
        });
    }
}

fn format_state(state: SyncState) -> colored::ColoredString {
    match state {
        SyncState::Success => "success".green(),
        SyncState::Running => "running".cyan(),
        SyncState::Failed => "failed".red(),
        SyncState::Cancelled => "cancelled".yellow(),
        SyncState::Timeout => "timeout".red(),
    }
}

fn print_fact_response(response: &truthledger_analysis::FactResponse) {
    let status = match response.status_display {
        DisplayStatus::Supported => "supported".green().bold(),
        DisplayStatus::Insufficient => "insufficient".yellow().bold(),
        DisplayStatus::Disputed => "disputed".red().bold(),
        DisplayStatus::Unknown => "unknown".dimmed().bold(),
    };
    println!(
        "{} mode={} slider={:.2} status={}",
        "Fact".bold(),
        response.mode_label,
        response.truth_slider,
        status
    );
    if let (Some(entity), Some(attribute)) = (
        &response.metadata.entity_name,
        &response.metadata.attribute_name,
    ) {
        println!("  {entity} · {attribute}");
    }

    match &response.best_answer {
        Some(best) => {
            println!(
                "  {} {} {} (display {:.3}, raw {:.3}, {} independent sources)",
                "best:".green(),
                best.value.display(),
                best.unit.as_deref().unwrap_or(""),
                best.truth_display,
                best.truth_raw.unwrap_or(0.0),
                best.independent_sources
            );
            for ev in best.evidence.iter().take(3) {
                println!(
                    "    {} {} — {}",
                    "·".dimmed(),
                    ev.source_name,
                    ev.quote.chars().take(100).collect::<String>()
                );
            }
        }
        None => println!("  {}", "no best answer at this confidence".yellow()),
    }

    if response.alternatives.len() > 1 {
        println!("  {}", "alternatives:".dimmed());
        for alt in &response.alternatives {
            println!(
                "    {} {} (display {:.3})",
                alt.value.display(),
                alt.unit.as_deref().unwrap_or(""),
                alt.truth_display
            );
        }
    }
}
