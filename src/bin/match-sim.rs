//! Match Simulator CLI Tool
//!
//! Runs many concurrent waiters through an in-process coordinator and checks
//! the result: every match has exactly `min_players` members, nobody is in
//! two matches, and leftovers per table stay below `min_players`.
//!
//! Usage:
//!   cargo run --bin match-sim -- run --participants 100
//!   cargo run --bin match-sim -- run --participants 60 --tables 3 --levels 4 --min-players 3
//!   cargo run --bin match-sim -- compare --participants 200

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use table_match::audit::InMemoryMatchRecorder;
use table_match::coordinator::{CoordinatorConfig, WaitCoordinator, WaitMode};
use table_match::matching::{LevelWindowMatcher, MatchingConfig};
use table_match::notify::BroadcastNotifier;
use table_match::store::{InMemoryRequestStore, StoreConfig};
use table_match::types::{MatchId, MatchOutcome, MatchRequest, ParticipantId, TableId};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "match-sim")]
#[command(about = "In-process load simulator for table-match")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation
    Run {
        #[command(flatten)]
        options: SimOptions,

        /// Wait mode (notify or polling)
        #[arg(short, long, default_value = "notify")]
        mode: WaitMode,
    },
    /// Run the same load in both wait modes
    Compare {
        #[command(flatten)]
        options: SimOptions,
    },
}

#[derive(Args, Clone)]
struct SimOptions {
    /// Number of concurrent participants
    #[arg(short, long, default_value = "100")]
    participants: usize,

    /// Participants are spread round-robin over this many tables
    #[arg(long, default_value = "1")]
    tables: i64,

    /// Distinct levels per table
    #[arg(long, default_value = "1")]
    levels: i64,

    #[arg(long, default_value = "2")]
    min_players: usize,

    #[arg(long, default_value = "1")]
    level_window: u32,

    /// Delay between arrivals in milliseconds
    #[arg(long, default_value = "0")]
    stagger_ms: u64,

    #[arg(long, default_value = "1000")]
    ttl_ms: u64,

    #[arg(long, default_value = "20")]
    poll_ms: u64,

    /// Deadline for each waiter in milliseconds
    #[arg(long, default_value = "3000")]
    timeout_ms: u64,
}

/// Tallies from one run
#[derive(Debug, Default)]
struct SimReport {
    matches: usize,
    matched: usize,
    timed_out: usize,
    superseded: usize,
    errors: usize,
    leftovers: BTreeMap<TableId, usize>,
    violations: Vec<String>,
    elapsed: Duration,
}

impl SimReport {
    fn print(&self, mode: WaitMode) {
        println!("📊 Results ({} mode, {:.2?}):", mode, self.elapsed);
        println!("  Matches formed: {}", self.matches);
        println!("  Participants matched: {}", self.matched);
        println!("  Timed out: {}", self.timed_out);
        println!("  Superseded: {}", self.superseded);
        println!("  Errors: {}", self.errors);
        for (table, left) in &self.leftovers {
            println!("  Leftovers at table {}: {}", table, left);
        }

        if self.violations.is_empty() {
            println!("✅ No at-most-once violations");
        } else {
            println!("❌ {} violations:", self.violations.len());
            for violation in &self.violations {
                println!("    {}", violation);
            }
        }
    }
}

fn participant_request(options: &SimOptions, index: usize) -> MatchRequest {
    let tables = options.tables.max(1);
    let levels = options.levels.max(1);
    let i = index as i64;
    MatchRequest::new(i + 1, i % tables, (i / tables) % levels)
}

async fn simulate(options: &SimOptions, mode: WaitMode) -> Result<SimReport> {
    let request_ttl = Duration::from_millis(options.ttl_ms);
    let wait_timeout = Duration::from_millis(options.timeout_ms);

    let store = Arc::new(InMemoryRequestStore::new(StoreConfig {
        result_retention: wait_timeout.max(request_ttl.saturating_mul(2)),
    }));
    let matcher = Arc::new(LevelWindowMatcher::new(
        store.clone(),
        MatchingConfig {
            min_players: options.min_players,
            level_window: options.level_window,
        },
    ));
    let recorder = Arc::new(InMemoryMatchRecorder::new());
    let coordinator = Arc::new(WaitCoordinator::new(
        store,
        matcher,
        Arc::new(BroadcastNotifier::default()),
        recorder.clone(),
        CoordinatorConfig {
            mode,
            request_ttl,
            poll_interval: Duration::from_millis(options.poll_ms),
            recheck_interval: request_ttl / 3,
            wait_timeout,
        },
    ));

    let started = Instant::now();
    let mut waiters = JoinSet::new();
    for index in 0..options.participants {
        let request = participant_request(options, index);
        let coordinator = coordinator.clone();
        waiters.spawn(async move { (request, coordinator.request_match(request).await) });

        if options.stagger_ms > 0 {
            tokio::time::sleep(Duration::from_millis(options.stagger_ms)).await;
        }
    }

    let mut report = SimReport::default();
    let mut members_by_match: HashMap<MatchId, Vec<ParticipantId>> = HashMap::new();

    while let Some(joined) = waiters.join_next().await {
        let (request, outcome) = joined?;
        match outcome {
            Ok(MatchOutcome::Matched(formed)) => {
                report.matched += 1;
                if !formed.contains(request.participant_id) {
                    report.violations.push(format!(
                        "participant {} received match {} without being in it",
                        request.participant_id, formed.match_id
                    ));
                }
                if formed.size() != options.min_players {
                    report.violations.push(format!(
                        "match {} has {} members",
                        formed.match_id,
                        formed.size()
                    ));
                }
                let members = members_by_match
                    .entry(formed.match_id)
                    .or_insert_with(|| formed.participants.clone());
                if *members != formed.participants {
                    report.violations.push(format!(
                        "members of match {} disagree: {:?} vs {:?}",
                        formed.match_id, members, formed.participants
                    ));
                }
            }
            Ok(MatchOutcome::TimedOut { .. }) => {
                report.timed_out += 1;
                *report.leftovers.entry(request.table).or_default() += 1;
            }
            Ok(MatchOutcome::Superseded) => report.superseded += 1,
            Err(e) => {
                eprintln!("❌ Participant {} failed: {}", request.participant_id, e);
                report.errors += 1;
            }
        }
    }
    report.elapsed = started.elapsed();

    // Give detached recorder tasks a moment to land
    tokio::time::sleep(Duration::from_millis(50)).await;

    let records = recorder.records();
    report.matches = records.len();

    let mut appearances: HashMap<ParticipantId, usize> = HashMap::new();
    for record in &records {
        for participant in &record.participants {
            *appearances.entry(*participant).or_default() += 1;
        }
    }
    for (participant, count) in appearances {
        if count > 1 {
            report.violations.push(format!(
                "participant {} appears in {} recorded matches",
                participant, count
            ));
        }
    }

    for (table, left) in &report.leftovers {
        if options.level_window as i64 >= options.levels - 1 && *left >= options.min_players {
            report.violations.push(format!(
                "table {} left {} participants unmatched",
                table, left
            ));
        }
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let runs = match cli.command {
        Commands::Run { options, mode } => vec![(options, mode)],
        Commands::Compare { options } => vec![
            (options.clone(), WaitMode::Polling),
            (options, WaitMode::Notify),
        ],
    };

    let mut failed = false;
    for (options, mode) in runs {
        if options.min_players < 2 {
            eprintln!("❌ --min-players must be at least 2");
            std::process::exit(1);
        }

        println!(
            "🧪 Simulating {} participants over {} tables x {} levels ({} mode)",
            options.participants, options.tables, options.levels, mode
        );

        let report = simulate(&options, mode).await?;
        report.print(mode);
        failed |= !report.violations.is_empty() || report.errors > 0;
        println!();
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
