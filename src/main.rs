//! fixture-sync
//!
//! Fetches fixtures, odds and results from API-Football and season xG
//! history from Understat into local JSON/CSV snapshots, and patches
//! snapshots into the tree store.
//!
//! Every patch stage accepts `--dry-run`: the update set is computed in full
//! and previewed, and nothing is written.

use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate, SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use fixture_sync::api::ApiFootballClient;
use fixture_sync::config::{secs_to_duration, ApiConfig, UnderstatConfig, UpdateSettings};
use fixture_sync::files;
use fixture_sync::pipeline::{
    self, apply, build_odds_updates, build_results_updates, mapping_updates, odds_fixtures_from_snapshot, open_store,
    FetchOddsParams, FetchResultsParams, ResultsCsvRow, ResultsOptions, ResultsSnapshot,
};
use fixture_sync::results::records_from_snapshot;
use fixture_sync::store::StoreSlot;
use fixture_sync::understat::{self, League, UnderstatClient, FIRST_SEASON};
use fixture_sync::xg::XgModelKind;

#[derive(Parser)]
#[command(name = "fixture-sync", version, about = "Football odds/results ingestion into a tree store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch upcoming fixtures with odds into odds_full_*.json/csv
    FetchOdds(FetchOddsArgs),
    /// Write an odds snapshot and its derived features to the store
    PatchOdds(PatchOddsArgs),
    /// Fetch finished fixtures with team statistics into results_full_*.json/csv
    FetchResults(FetchResultsArgs),
    /// Write results, team form and indexes to the store
    PatchResults(PatchResultsArgs),
    /// Write the English to Thai team-name mapping to the store
    SyncMapping(SyncMappingArgs),
    /// Fetch one league's per-match xG history from Understat into CSV
    FetchUnderstat(FetchUnderstatArgs),
}

#[derive(Args)]
struct FetchOddsArgs {
    /// First UTC date (YYYY-MM-DD); today when omitted
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long, default_value_t = 1)]
    days: u32,
    /// League allowlist, one id per line
    #[arg(long, default_value = "allowlist_A.txt")]
    allow: PathBuf,
    /// Bookmaker id; 0 or "all" fetches every bookmaker
    #[arg(long, default_value = "6")]
    bookmaker: String,
    #[arg(long, default_value = "live_odds")]
    outdir: PathBuf,
    /// Pause between fixtures, seconds
    #[arg(long, default_value_t = 0.25)]
    sleep: f64,
}

#[derive(Args)]
struct PatchOddsArgs {
    /// Snapshot to patch; newest odds_full_*.json in --live-dir when omitted
    #[arg(long)]
    json: Option<PathBuf>,
    #[arg(long, default_value = "live_odds")]
    live_dir: PathBuf,
    /// Comma-separated bookmaker ids to keep
    #[arg(long)]
    only_bookmaker: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct FetchResultsArgs {
    #[arg(long)]
    date_from: Option<NaiveDate>,
    #[arg(long)]
    date_to: Option<NaiveDate>,
    /// Days back from today when no explicit range is given
    #[arg(long, default_value_t = 1)]
    days: u32,
    #[arg(long, default_value = "allowlist_ALL.txt")]
    allow: PathBuf,
    #[arg(long, default_value = "data")]
    outdir: PathBuf,
    #[arg(long, default_value_t = 0.15)]
    sleep: f64,
}

#[derive(Args)]
struct PatchResultsArgs {
    /// results_full_*.json from fetch-results
    #[arg(long)]
    json: PathBuf,
    /// Also write the legacy matches/*/results node
    #[arg(long)]
    mirror_old: bool,
    /// Write idx/* lookup indexes
    #[arg(long)]
    index: bool,
    /// Team form window
    #[arg(long, default_value_t = 5)]
    last: usize,
    /// xG estimate: shot-weighted, sot or none
    #[arg(long, default_value = "shot-weighted", env = "XG_MODEL")]
    xg_model: XgModelKind,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct SyncMappingArgs {
    /// Mapping CSV; well-known locations are searched when omitted
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct FetchUnderstatArgs {
    /// EPL, La_liga, Serie_A, Bundesliga or Ligue_1; rotates by weekday when omitted
    #[arg(long)]
    league: Option<League>,
    #[arg(long, default_value_t = FIRST_SEASON)]
    from_season: i32,
    /// Last season; the one in progress when omitted
    #[arg(long)]
    to_season: Option<i32>,
    #[arg(long, default_value = "understat_data")]
    outdir: PathBuf,
    /// Mapping CSV extended with newly seen team names
    #[arg(long, default_value = "team_mapping/eng_to_th.csv")]
    mapping: PathBuf,
    /// Refetch even when the league CSV already exists
    #[arg(long)]
    force: bool,
    /// Pause between season pages, seconds
    #[arg(long, default_value_t = 1.0)]
    sleep: f64,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn pause(seconds: f64) -> Duration {
    secs_to_duration(seconds).unwrap_or(Duration::ZERO)
}

async fn fetch_odds(args: FetchOddsArgs) -> Result<()> {
    let api = ApiFootballClient::new(&ApiConfig::from_env()?)?;
    let leagues = files::read_allowlist(&args.allow)?;
    let start = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let bookmaker = match args.bookmaker.trim() {
        "" | "0" | "all" | "ALL" => None,
        id => Some(id.to_string()),
    };
    let span = pipeline::date_span(start, args.days);
    let end = span.last().copied().unwrap_or(start);

    info!(
        "Fetching fixtures + odds [{} -> {}] | leagues={} | bookmaker={}",
        start,
        end,
        leagues.len(),
        bookmaker.as_deref().unwrap_or("ALL")
    );

    let params = FetchOddsParams {
        start,
        days: args.days,
        leagues,
        bookmaker,
        pause: pause(args.sleep),
    };
    let fetched = pipeline::fetch_odds(&api, &params).await?;

    let stem = format!("odds_full_{}", pipeline::range_tag(start, end));
    files::write_json(&args.outdir.join(format!("{}.json", stem)), &fetched.fixtures)?;
    files::write_csv(&args.outdir.join(format!("{}.csv", stem)), &fetched.csv_rows)?;
    Ok(())
}

async fn patch_odds(args: PatchOddsArgs, slot: &StoreSlot) -> Result<()> {
    let store = open_store(slot, args.dry_run)?;
    let path = match args.json {
        Some(p) => p,
        None => files::find_latest_snapshot(&args.live_dir, "odds_full_")?
            .ok_or_else(|| anyhow!("No odds_full_*.json found in {}", args.live_dir.display()))?,
    };
    let fixtures = odds_fixtures_from_snapshot(&files::read_json(&path)?);
    let only: Vec<String> = args
        .only_bookmaker
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let with_odds = fixtures.iter().filter(|f| !f.bookmakers.is_empty()).count();
    info!(
        "Loaded {}: {} fixtures ({} with bookmakers){}",
        path.display(),
        fixtures.len(),
        with_odds,
        if only.is_empty() { String::new() } else { format!(" | only bookmakers {}", only.join(",")) }
    );
    if fixtures.is_empty() {
        warn!("Snapshot has no fixtures; nothing to patch");
        return Ok(());
    }

    let updates = build_odds_updates(&fixtures, &only, &now_iso());
    apply(store, &updates, UpdateSettings::from_env(), args.dry_run).await?;
    Ok(())
}

async fn fetch_results(args: FetchResultsArgs) -> Result<()> {
    let api = ApiFootballClient::new(&ApiConfig::from_env()?)?;
    let leagues = files::read_allowlist(&args.allow)?;
    let (start, end) = pipeline::results_window(args.date_from, args.date_to, args.days, Utc::now().date_naive());
    info!("Fetching results [{} -> {}] | leagues={}", start, end, leagues.len());

    let params = FetchResultsParams {
        start,
        end,
        leagues,
        pause: pause(args.sleep),
    };
    let records = pipeline::fetch_results(&api, &params).await?;

    let tag = pipeline::range_tag(start, end);
    let rows: Vec<ResultsCsvRow> = records.iter().map(ResultsCsvRow::from).collect();
    let snapshot = ResultsSnapshot {
        date_from: start.to_string(),
        date_to: end.to_string(),
        generated_at: now_iso(),
        fixtures: records,
    };
    files::write_json(&args.outdir.join(format!("results_full_{}.json", tag)), &snapshot)?;
    files::write_csv(&args.outdir.join(format!("results_full_{}.csv", tag)), &rows)?;
    Ok(())
}

async fn patch_results(args: PatchResultsArgs, slot: &StoreSlot) -> Result<()> {
    let store = open_store(slot, args.dry_run)?;
    let records = records_from_snapshot(&files::read_json(&args.json)?);
    info!("Loaded {}: {} fixtures | xG model {}", args.json.display(), records.len(), args.xg_model);

    let model = args.xg_model.build();
    let options = ResultsOptions {
        last_n: args.last,
        mirror_old: args.mirror_old,
        index: args.index,
        input_name: file_name(&args.json),
    };
    let updates = build_results_updates(&records, model.as_deref(), &options, &now_iso());
    apply(store, &updates, UpdateSettings::from_env(), args.dry_run).await?;
    Ok(())
}

async fn sync_mapping(args: SyncMappingArgs, slot: &StoreSlot) -> Result<()> {
    let store = open_store(slot, args.dry_run)?;
    let path = files::resolve_mapping_csv(args.csv.as_deref(), Path::new("."))?;
    let mapping = files::load_team_mapping(&path)?;
    if mapping.is_empty() {
        return Err(anyhow!("{} has no usable rows", path.display()));
    }
    apply(store, &mapping_updates(&mapping), UpdateSettings::from_env(), args.dry_run).await?;
    Ok(())
}

async fn fetch_understat(args: FetchUnderstatArgs) -> Result<()> {
    let today = Utc::now();
    let league = args.league.unwrap_or_else(|| League::for_weekday(today.weekday()));
    let csv_path = args.outdir.join(league.csv_name());
    if csv_path.exists() && !args.force {
        info!("Skipping {}: {} already exists (use --force to refetch)", league, csv_path.display());
        return Ok(());
    }
    let to_season = args.to_season.unwrap_or_else(|| understat::current_season(today.date_naive()));
    if args.from_season > to_season {
        return Err(anyhow!("--from-season {} is after --to-season {}", args.from_season, to_season));
    }

    let mapping = if args.mapping.is_file() {
        files::load_team_mapping(&args.mapping)?
    } else {
        BTreeMap::new()
    };
    info!(
        "Fetching Understat {} seasons {}-{} | {} mapped team names",
        league,
        args.from_season,
        to_season,
        mapping.len()
    );

    let client = UnderstatClient::new(&UnderstatConfig::from_env())?;
    let fetched =
        understat::fetch_league(&client, league, args.from_season..=to_season, &mapping, pause(args.sleep)).await?;
    understat::extend_mapping_file(&args.mapping, &fetched.teams)?;
    files::write_csv(&csv_path, &fetched.rows)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("fixture_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("fixture-sync v{}", env!("CARGO_PKG_VERSION"));

    let slot = StoreSlot::new();
    let result = match cli.command {
        Command::FetchOdds(args) => fetch_odds(args).await,
        Command::PatchOdds(args) => patch_odds(args, &slot).await,
        Command::FetchResults(args) => fetch_results(args).await,
        Command::PatchResults(args) => patch_results(args, &slot).await,
        Command::SyncMapping(args) => sync_mapping(args, &slot).await,
        Command::FetchUnderstat(args) => fetch_understat(args).await,
    };

    if let Err(e) = &result {
        error!("Run failed: {:?}", e);
    }
    result
}
