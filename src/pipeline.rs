//! Pipeline stages: fetch snapshots from API-Football and turn snapshots
//! into store update sets.
//!
//! Builders are pure; [`apply`] hands their [`UpdateSet`]s to the
//! [`UpdateEngine`].

use anyhow::{anyhow, Context, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::FootballSource;
use crate::config::{StoreConfig, UpdateSettings};
use crate::odds::{build_features, filter_bookmakers, normalize_payload, FixtureMarkets};
use crate::results::{build_team_forms, is_finished, parse_result, ResultRecord};
use crate::stats::{normalize_stats, MatchStats};
use crate::store::{FirebaseStore, MemoryStore, StoreSlot, TreeStore};
use crate::store_path;
use crate::update::{CiEnv, RunSummary, UpdateEngine, UpdateOptions, UpdateSet};
use crate::xg::XgModel;

pub const SOURCE_TAG: &str = "api-sports-v3";

/// Statuses of fixtures whose odds are still worth fetching.
pub const UPCOMING_STATES: [&str; 2] = ["Not Started", "Time to be defined"];

/// Node under `teams/{id}/form` holding the recent-fixture rows.
pub const FORM_NODE: &str = "last5";

pub const MAPPING_PATH: &str = "team_mapping/eng_to_th";

// --- snapshots --------------------------------------------------------------

/// One upcoming fixture with the normalized odds of every bookmaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OddsFixture {
    pub season: i64,
    pub date: String,
    pub league_id: i64,
    pub fixture_id: i64,
    pub home: String,
    pub away: String,
    pub bookmakers: FixtureMarkets,
}

/// Read an odds snapshot: a bare list or `{"fixtures": [...]}`.
pub fn odds_fixtures_from_snapshot(doc: &Value) -> Vec<OddsFixture> {
    let items: &[Value] = match doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map.get("fixtures").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]),
        _ => &[],
    };
    items
        .iter()
        .filter_map(|it| match OddsFixture::deserialize(it) {
            Ok(fx) if fx.league_id != 0 && fx.fixture_id != 0 => Some(fx),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping unreadable odds fixture: {}", e);
                None
            }
        })
        .collect()
}

/// `results_full_*.json` layout.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSnapshot {
    pub date_from: String,
    pub date_to: String,
    pub generated_at: String,
    pub fixtures: Vec<ResultRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsCsvRow {
    pub season: i64,
    pub date: String,
    pub league_id: i64,
    pub fixture_id: i64,
    pub home: String,
    pub away: String,
    pub bookmaker_id: String,
    pub market: String,
    pub selection: String,
    pub line: String,
    pub odd: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsCsvRow {
    pub season: i64,
    pub date: String,
    pub league_id: i64,
    pub fixture_id: i64,
    pub home: String,
    pub away: String,
    pub status_long: String,
    pub goals_home: Option<i64>,
    pub goals_away: Option<i64>,
    pub ht_home: Option<i64>,
    pub ht_away: Option<i64>,
}

impl From<&ResultRecord> for ResultsCsvRow {
    fn from(r: &ResultRecord) -> Self {
        Self {
            season: r.season,
            date: r.date.clone(),
            league_id: r.league_id,
            fixture_id: r.fixture_id,
            home: r.teams.home.name.clone(),
            away: r.teams.away.name.clone(),
            status_long: r.status_long.clone(),
            goals_home: r.goals.home,
            goals_away: r.goals.away,
            ht_home: r.score.halftime.home,
            ht_away: r.score.halftime.away,
        }
    }
}

/// Flatten one fixture's odds into CSV rows; a fixture without odds gets a
/// single `NONE` row.
pub fn odds_csv_rows(fx: &OddsFixture, requested_bookmaker: Option<&str>) -> Vec<OddsCsvRow> {
    let row = |bm: &str, market: &str, selection: &str, line: &str, odd: &str| OddsCsvRow {
        season: fx.season,
        date: fx.date.clone(),
        league_id: fx.league_id,
        fixture_id: fx.fixture_id,
        home: fx.home.clone(),
        away: fx.away.clone(),
        bookmaker_id: bm.to_string(),
        market: market.to_string(),
        selection: selection.to_string(),
        line: line.to_string(),
        odd: odd.to_string(),
    };

    if fx.bookmakers.is_empty() {
        return vec![row(requested_bookmaker.unwrap_or(""), "NONE", "", "", "")];
    }

    let mut rows = Vec::new();
    for (bm, m) in &fx.bookmakers {
        for (sel, odd) in [("home", &m.match_winner.home), ("draw", &m.match_winner.draw), ("away", &m.match_winner.away)] {
            if let Some(odd) = odd {
                rows.push(row(bm, "1x2", sel, "", odd));
            }
        }
        for (line, q) in &m.ou {
            for (sel, odd) in [("Over", &q.over), ("Under", &q.under)] {
                if let Some(odd) = odd {
                    rows.push(row(bm, "ou", sel, line, odd));
                }
            }
        }
        for (line, q) in &m.hcp {
            for (sel, odd) in [("Home", &q.home), ("Away", &q.away)] {
                if let Some(odd) = odd {
                    rows.push(row(bm, "hcp", sel, line, odd));
                }
            }
        }
    }
    rows
}

// --- fetch stages -------------------------------------------------------------

fn league_id(raw: &Value) -> Option<i64> {
    let id = raw.get("league")?.get("id")?;
    id.as_i64().or_else(|| id.as_str()?.trim().parse().ok())
}

fn fixture_id(raw: &Value) -> Option<i64> {
    raw.get("fixture")?.get("id")?.as_i64()
}

fn status_long(raw: &Value) -> &str {
    raw.get("fixture")
        .and_then(|f| f.get("status"))
        .and_then(|s| s.get("long"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn team_name<'a>(raw: &'a Value, side: &str) -> &'a str {
    raw.get("teams")
        .and_then(|t| t.get(side))
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// `days` consecutive dates starting at `start`.
pub fn date_span(start: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..u64::from(days.max(1)))
        .filter_map(|i| start.checked_add_days(Days::new(i)))
        .collect()
}

/// Inclusive result window: explicit bounds when both are given, else the
/// `days` days ending `today`.
pub fn results_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    days: u32,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    match (from, to) {
        (Some(f), Some(t)) if f <= t => (f, t),
        (Some(f), Some(t)) => (t, f),
        _ => {
            let back = u64::from(days.max(1) - 1);
            (today.checked_sub_days(Days::new(back)).unwrap_or(today), today)
        }
    }
}

/// `{YYYYMMDD}_{YYYYMMDD}` tag used in snapshot file names.
pub fn range_tag(start: NaiveDate, end: NaiveDate) -> String {
    format!("{}_{}", start.format("%Y%m%d"), end.format("%Y%m%d"))
}

#[derive(Debug, Clone)]
pub struct FetchOddsParams {
    pub start: NaiveDate,
    pub days: u32,
    pub leagues: BTreeSet<i64>,
    pub bookmaker: Option<String>,
    pub pause: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct OddsFetch {
    pub fixtures: Vec<OddsFixture>,
    pub csv_rows: Vec<OddsCsvRow>,
}

/// Upcoming allowlisted fixtures with normalized odds, one request per fixture.
pub async fn fetch_odds(source: &dyn FootballSource, params: &FetchOddsParams) -> Result<OddsFetch> {
    let mut out = OddsFetch::default();
    let mut seen = BTreeSet::new();

    for day in date_span(params.start, params.days) {
        let ds = day.format("%Y-%m-%d").to_string();
        let fixtures: Vec<Value> = source
            .fixtures_by_date(&ds)
            .await?
            .into_iter()
            .filter(|f| league_id(f).is_some_and(|l| params.leagues.contains(&l)))
            .filter(|f| UPCOMING_STATES.contains(&status_long(f)))
            .collect();
        info!("{}: {} upcoming fixtures in allowlisted leagues", ds, fixtures.len());

        for raw in &fixtures {
            let (Some(lid), Some(fid)) = (league_id(raw), fixture_id(raw)) else {
                continue;
            };
            if !seen.insert((lid, fid)) {
                continue;
            }

            let bookmakers = match source.odds(fid, params.bookmaker.as_deref()).await {
                Ok(entries) => normalize_payload(&Value::Array(entries)),
                Err(e) => {
                    warn!("Odds fetch failed for fixture {}: {:?}", fid, e);
                    FixtureMarkets::new()
                }
            };
            let fx = OddsFixture {
                season: raw.get("league").and_then(|l| l.get("season")).and_then(Value::as_i64).unwrap_or(0),
                date: ds.clone(),
                league_id: lid,
                fixture_id: fid,
                home: team_name(raw, "home").to_string(),
                away: team_name(raw, "away").to_string(),
                bookmakers,
            };
            out.csv_rows.extend(odds_csv_rows(&fx, params.bookmaker.as_deref()));
            out.fixtures.push(fx);

            if !params.pause.is_zero() {
                tokio::time::sleep(params.pause).await;
            }
        }
    }

    info!(
        "Fetched odds for {} fixtures ({} with bookmakers)",
        out.fixtures.len(),
        out.fixtures.iter().filter(|f| !f.bookmakers.is_empty()).count()
    );
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct FetchResultsParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub leagues: BTreeSet<i64>,
    pub pause: Duration,
}

/// Finished allowlisted fixtures in `[start, end]` with per-team statistics.
pub async fn fetch_results(source: &dyn FootballSource, params: &FetchResultsParams) -> Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    let mut day = params.start;
    while day <= params.end {
        let ds = day.format("%Y-%m-%d").to_string();
        let finished: Vec<Value> = source
            .fixtures_by_date(&ds)
            .await?
            .into_iter()
            .filter(|f| league_id(f).is_some_and(|l| params.leagues.contains(&l)))
            .filter(|f| is_finished(status_long(f)))
            .collect();
        info!("{}: {} finished fixtures", ds, finished.len());

        for raw in &finished {
            let Some(fid) = fixture_id(raw) else { continue };
            let stats = match source.fixture_statistics(fid).await {
                Ok(resp) => normalize_stats(&resp),
                Err(e) => {
                    warn!("Statistics fetch failed for fixture {}: {:?}", fid, e);
                    MatchStats::default()
                }
            };
            if let Some(rec) = ResultRecord::from_fixture(raw, &ds, stats) {
                records.push(rec);
            }
            if !params.pause.is_zero() {
                tokio::time::sleep(params.pause).await;
            }
        }

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    Ok(records)
}

// --- update builders ------------------------------------------------------------

/// Raw per-bookmaker odds, their metadata and the derived feature record of
/// every fixture. Fixtures without bookmakers only get a feature record.
pub fn build_odds_updates(fixtures: &[OddsFixture], only_bookmakers: &[String], updated_at: &str) -> UpdateSet {
    let mut updates = UpdateSet::new();

    for fx in fixtures {
        let markets = filter_bookmakers(fx.bookmakers.clone(), only_bookmakers);
        let base = store_path!["matches", fx.league_id, fx.fixture_id];

        for (bm, m) in &markets {
            let node = base.clone().child("odds").child(bm);
            for (sel, odd) in [("home", &m.match_winner.home), ("draw", &m.match_winner.draw), ("away", &m.match_winner.away)] {
                if let Some(odd) = odd {
                    updates.insert_at(&node.clone().child("1x2").child(sel), odd.as_str());
                }
            }
            for (line, q) in &m.ou {
                let at = node.clone().child("ou").child(line);
                for (side, odd) in [("Over", &q.over), ("Under", &q.under)] {
                    if let Some(odd) = odd {
                        updates.insert_at(&at.clone().child(side), odd.as_str());
                    }
                }
            }
            for (line, q) in &m.hcp {
                let at = node.clone().child("hcp").child(line);
                for (side, odd) in [("Home", &q.home), ("Away", &q.away)] {
                    if let Some(odd) = odd {
                        updates.insert_at(&at.clone().child(side), odd.as_str());
                    }
                }
            }
            updates.insert_at(
                &node.child("meta"),
                json!({"source": SOURCE_TAG, "bookmaker_id": bm, "updated_at": updated_at}),
            );
        }

        let features = build_features(&markets);
        updates.insert_at(&base.child("odds_features"), features.to_value(updated_at));
    }
    updates
}

#[derive(Debug, Clone)]
pub struct ResultsOptions {
    /// Team form window; 0 keeps every fixture.
    pub last_n: usize,
    /// Also write the legacy `matches/*/results` node.
    pub mirror_old: bool,
    /// Write `idx/*` lookup indexes.
    pub index: bool,
    /// Snapshot file name recorded in the monitoring node.
    pub input_name: String,
}

impl Default for ResultsOptions {
    fn default() -> Self {
        Self {
            last_n: 5,
            mirror_old: false,
            index: false,
            input_name: String::new(),
        }
    }
}

fn ha_pair(h: Option<i64>, a: Option<i64>) -> Value {
    json!({"h": h, "a": a})
}

pub fn build_results_updates(
    records: &[ResultRecord],
    model: Option<&dyn XgModel>,
    opts: &ResultsOptions,
    now: &str,
) -> UpdateSet {
    let mut updates = UpdateSet::new();
    let parsed: Vec<_> = records.iter().map(|r| parse_result(r, model)).collect();

    for r in &parsed {
        let base = store_path!["matches", r.league_id, r.fixture_id];
        let xg = match (r.xg, &r.xg_method) {
            (Some(x), method) => json!({"home": x.home, "away": x.away, "method": method}),
            (None, _) => Value::Null,
        };
        updates.insert_at(
            &base.clone().child("result"),
            json!({
                "date": r.date,
                "kickoff_ts": r.kickoff_ts,
                "season": r.season,
                "league_id": r.league_id,
                "fixture_id": r.fixture_id,
                "teams": r.teams,
                "ht": ha_pair(r.ht.home, r.ht.away),
                "ft": ha_pair(r.ft.home, r.ft.away),
                "winner": r.winner,
                "xg": xg,
                "meta": {"ingested_at": now, "source": SOURCE_TAG},
            }),
        );
        if opts.mirror_old {
            updates.insert_at(
                &base.child("results"),
                json!({
                    "date": r.date,
                    "season": r.season,
                    "teams": {"home": r.teams.home.name, "away": r.teams.away.name},
                    "score": {
                        "ht": {"home": r.ht.home, "away": r.ht.away},
                        "ft": {"home": r.ft.home, "away": r.ft.away},
                        "winner": r.winner,
                    },
                    "xg": r.xg.map(|x| json!({"home": x.home, "away": x.away})),
                    "ingested_at": now,
                }),
            );
        }
    }

    for (tid, form) in build_team_forms(&parsed, opts.last_n) {
        for (fid, row) in &form.last {
            updates.insert_at(
                &store_path!["teams", tid, "form", FORM_NODE, fid],
                serde_json::to_value(row).unwrap_or(Value::Null),
            );
        }
        let mut summary = serde_json::to_value(&form.summary).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut summary {
            map.insert("updated_at".into(), json!(now));
        }
        updates.insert_at(&store_path!["teams", tid, "summary"], summary);
    }

    if opts.index {
        for r in &parsed {
            updates.insert_at(&store_path!["idx", "date_fixtures", r.date, r.fixture_id], true);
            for team in [r.teams.home.id, r.teams.away.id] {
                updates.insert_at(&store_path!["idx", "team_fixtures", team, r.date, r.fixture_id], true);
            }
            updates.insert_at(&store_path!["idx", "league_fixtures", r.league_id, r.date, r.fixture_id], true);
        }
    }

    updates.insert(
        "monitoring/results/last_run",
        json!({
            "run_at": now,
            "input_json": opts.input_name,
            "fixtures": parsed.len(),
            "last_window": opts.last_n,
            "mirror_old": opts.mirror_old,
            "indexed": opts.index,
            "env": CiEnv::from_env(),
        }),
    );
    updates
}

/// The whole mapping table as one node.
pub fn mapping_updates(mapping: &BTreeMap<String, String>) -> UpdateSet {
    let mut updates = UpdateSet::new();
    updates.insert(MAPPING_PATH, json!(mapping));
    updates
}

// --- applying ------------------------------------------------------------------

/// The process' store: Firebase for real runs, a detached in-memory tree for
/// dry runs so no credentials are needed and nothing leaves the process.
pub fn open_store(slot: &StoreSlot, dry_run: bool) -> Result<Arc<dyn TreeStore>> {
    slot.get_or_try_init(|| {
        if dry_run {
            info!("[DRY RUN] Using in-memory store; nothing will be written");
            return Ok(Arc::new(MemoryStore::new()) as Arc<dyn TreeStore>);
        }
        let config = StoreConfig::from_env()?;
        let store = FirebaseStore::new(&config).context("Failed to create store client")?;
        info!("Store client ready for {}", config.database_url);
        Ok(Arc::new(store) as Arc<dyn TreeStore>)
    })
}

/// Run `updates` through the update engine. A dry run only previews; a real
/// run with any failed chunk is an error.
pub async fn apply(
    store: Arc<dyn TreeStore>,
    updates: &UpdateSet,
    settings: UpdateSettings,
    dry_run: bool,
) -> Result<RunSummary> {
    info!("Prepared {} updates", updates.len());
    let engine = UpdateEngine::new(store, settings);
    let summary = engine.update_multi(updates, UpdateOptions::dry_run(dry_run)).await;

    if summary.dry_run {
        info!(
            "[DRY RUN] Skipped store writes: {} keys in {} chunks",
            summary.keys_total,
            summary.chunks_planned.unwrap_or(0)
        );
        return Ok(summary);
    }
    if !summary.is_success() {
        return Err(anyhow!(
            "Store update incomplete: {}/{} chunks failed, {} of {} keys written",
            summary.chunks_fail,
            summary.chunks_total,
            summary.keys_written,
            summary.keys_total
        ));
    }
    info!(
        "Store update done: {} keys, {} chunks, {} retries",
        summary.keys_written, summary.chunks_ok, summary.retries_used
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_span_counts_days() {
        let d = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap();
        let span = date_span(d, 3);
        assert_eq!(span.last().unwrap().to_string(), "2026-01-01");
        assert_eq!(date_span(d, 0).len(), 1);
    }

    #[test]
    fn results_window_defaults_to_trailing_days() {
        let today = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
        let (s, e) = results_window(None, None, 3, today);
        assert_eq!((s.to_string(), e.to_string()), ("2025-10-08".into(), "2025-10-10".into()));
        let f = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        assert_eq!(results_window(Some(today), Some(f), 1, today), (f, today));
        assert_eq!(range_tag(f, today), "20251001_20251010");
    }

    #[test]
    fn raw_field_helpers_tolerate_shapes() {
        let raw = json!({"league": {"id": "39"}, "fixture": {"id": 5, "status": {"long": "Not Started"}}});
        assert_eq!(league_id(&raw), Some(39));
        assert_eq!(fixture_id(&raw), Some(5));
        assert_eq!(status_long(&raw), "Not Started");
        assert_eq!(team_name(&raw, "home"), "");
    }

    #[test]
    fn fixture_without_odds_gets_none_row() {
        let fx = OddsFixture { league_id: 39, fixture_id: 1, ..Default::default() };
        let rows = odds_csv_rows(&fx, Some("6"));
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].bookmaker_id.as_str(), rows[0].market.as_str()), ("6", "NONE"));
    }
}
