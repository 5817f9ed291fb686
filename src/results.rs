//! Finished fixtures: snapshot records, normalized results and team form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::stats::MatchStats;
use crate::xg::{XgModel, XgPair};

/// Long statuses of fixtures that will not change score any more.
pub const FINISHED_STATES: [&str; 6] = [
    "Match Finished",
    "AET",
    "Penalty",
    "Awarded",
    "WO",
    "Abandoned",
];

pub fn is_finished(status_long: &str) -> bool {
    FINISHED_STATES.contains(&status_long)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Teams {
    pub home: TeamRef,
    pub away: TeamRef,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Goals {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

impl Goals {
    fn both(&self) -> Option<(i64, i64)> {
        Some((self.home?, self.away?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Score {
    pub halftime: Goals,
    pub fulltime: Goals,
    pub extratime: Goals,
    pub penalty: Goals,
}

/// One finished fixture as written to `results_full_*.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    pub season: i64,
    pub date: String,
    pub kickoff_ts: Option<i64>,
    pub league_id: i64,
    pub fixture_id: i64,
    pub teams: Teams,
    pub status_long: String,
    pub goals: Goals,
    pub score: Score,
    pub winner: String,
    pub stats: MatchStats,
    /// Externally sourced xG, when the snapshot carries one.
    pub xg: Option<XgPair>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiFixture {
    fixture: ApiFixtureInfo,
    league: ApiLeague,
    teams: ApiTeams,
    goals: Goals,
    score: Score,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiFixtureInfo {
    id: i64,
    timestamp: Option<i64>,
    status: ApiStatus,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiStatus {
    long: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiLeague {
    id: i64,
    season: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiTeams {
    home: ApiTeam,
    away: ApiTeam,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiTeam {
    id: i64,
    name: String,
    winner: Option<bool>,
}

impl ResultRecord {
    /// Build from an API-Football `/fixtures` item. `None` when the item has
    /// no fixture or league id.
    pub fn from_fixture(raw: &Value, date: &str, stats: MatchStats) -> Option<Self> {
        let fx = ApiFixture::deserialize(raw).ok()?;
        if fx.fixture.id == 0 || fx.league.id == 0 {
            return None;
        }
        let winner = match fx.goals.both() {
            Some((h, a)) if h > a => "home",
            Some((h, a)) if h < a => "away",
            Some(_) => "draw",
            None => match (fx.teams.home.winner, fx.teams.away.winner) {
                (Some(true), _) => "home",
                (_, Some(true)) => "away",
                _ => "",
            },
        };
        Some(Self {
            season: fx.league.season,
            date: date.to_string(),
            kickoff_ts: fx.fixture.timestamp,
            league_id: fx.league.id,
            fixture_id: fx.fixture.id,
            teams: Teams {
                home: TeamRef { id: fx.teams.home.id, name: fx.teams.home.name },
                away: TeamRef { id: fx.teams.away.id, name: fx.teams.away.name },
            },
            status_long: fx.fixture.status.long,
            goals: fx.goals,
            score: fx.score,
            winner: winner.to_string(),
            stats,
            xg: None,
        })
    }
}

/// A result ready to be written, with xG resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    pub league_id: i64,
    pub fixture_id: i64,
    pub date: String,
    pub season: i64,
    pub kickoff_ts: Option<i64>,
    pub teams: Teams,
    pub ht: Goals,
    pub ft: Goals,
    pub winner: String,
    pub xg: Option<XgPair>,
    pub xg_method: Option<String>,
}

/// Normalize a record. A snapshot xG wins over the model estimate.
pub fn parse_result(rec: &ResultRecord, model: Option<&dyn XgModel>) -> ParsedResult {
    let ft = if rec.score.fulltime.both().is_some() { rec.score.fulltime } else { rec.goals };

    let winner = match rec.winner.trim().to_lowercase().as_str() {
        w @ ("home" | "away" | "draw") => w.to_string(),
        _ => match ft.both() {
            Some((h, a)) if h > a => "home".to_string(),
            Some((h, a)) if h < a => "away".to_string(),
            _ => "draw".to_string(),
        },
    };

    let (xg, xg_method) = match (rec.xg, model) {
        (Some(x), _) => (Some(x), Some("source".to_string())),
        (None, Some(m)) => match m.estimate(&rec.stats) {
            Some(x) => (Some(x), Some(m.method().to_string())),
            None => (None, None),
        },
        (None, None) => (None, None),
    };

    ParsedResult {
        league_id: rec.league_id,
        fixture_id: rec.fixture_id,
        date: rec.date.clone(),
        season: rec.season,
        kickoff_ts: rec.kickoff_ts,
        teams: rec.teams.clone(),
        ht: rec.score.halftime,
        ft,
        winner,
        xg,
        xg_method,
    }
}

/// One fixture from a team's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormRow {
    pub date: String,
    pub league_id: i64,
    pub opp_id: i64,
    pub res: &'static str,
    pub pts: u32,
    pub gf: i64,
    pub ga: i64,
    pub gd: i64,
    pub xg_for: f64,
    pub xg_against: f64,
    pub xg_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(non_snake_case)]
pub struct FormSummary {
    pub n: usize,
    pub W: usize,
    pub D: usize,
    pub L: usize,
    pub GF: i64,
    pub GA: i64,
    pub GD: i64,
    pub xG_for: f64,
    pub xG_against: f64,
    pub xG_diff: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamForm {
    /// fixture id -> row, for the last N fixtures.
    pub last: BTreeMap<i64, FormRow>,
    pub summary: FormSummary,
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn row(r: &ParsedResult, gf: i64, ga: i64, opp_id: i64, xg_for: f64, xg_against: f64) -> FormRow {
    let (res, pts) = match gf.cmp(&ga) {
        std::cmp::Ordering::Greater => ("W", 3),
        std::cmp::Ordering::Less => ("L", 0),
        std::cmp::Ordering::Equal => ("D", 1),
    };
    FormRow {
        date: r.date.clone(),
        league_id: r.league_id,
        opp_id,
        res,
        pts,
        gf,
        ga,
        gd: gf - ga,
        xg_for: round3(xg_for),
        xg_against: round3(xg_against),
        xg_diff: round3(xg_for - xg_against),
    }
}

/// Per-team form over the last `last_n` fixtures (all when 0), oldest first
/// by date. Fixtures without a full-time score are left out.
pub fn build_team_forms(results: &[ParsedResult], last_n: usize) -> BTreeMap<i64, TeamForm> {
    let mut by_team: BTreeMap<i64, Vec<(String, i64, FormRow)>> = BTreeMap::new();
    for r in results {
        let Some((h, a)) = r.ft.both() else { continue };
        let (xh, xa) = r.xg.map(|x| (x.home, x.away)).unwrap_or((0.0, 0.0));
        let (home_id, away_id) = (r.teams.home.id, r.teams.away.id);
        by_team
            .entry(home_id)
            .or_default()
            .push((r.date.clone(), r.fixture_id, row(r, h, a, away_id, xh, xa)));
        by_team
            .entry(away_id)
            .or_default()
            .push((r.date.clone(), r.fixture_id, row(r, a, h, home_id, xa, xh)));
    }

    by_team
        .into_iter()
        .map(|(tid, mut rows)| {
            rows.sort_by(|x, y| x.0.cmp(&y.0).then(x.1.cmp(&y.1)));
            let skip = if last_n == 0 { 0 } else { rows.len().saturating_sub(last_n) };
            let last: Vec<(i64, FormRow)> = rows.into_iter().skip(skip).map(|(_, fid, r)| (fid, r)).collect();

            let count = |res: &str| last.iter().filter(|(_, r)| r.res == res).count();
            let gf: i64 = last.iter().map(|(_, r)| r.gf).sum();
            let ga: i64 = last.iter().map(|(_, r)| r.ga).sum();
            let xg_for = round3(last.iter().map(|(_, r)| r.xg_for).sum());
            let xg_against = round3(last.iter().map(|(_, r)| r.xg_against).sum());
            let summary = FormSummary {
                n: last.len(),
                W: count("W"),
                D: count("D"),
                L: count("L"),
                GF: gf,
                GA: ga,
                GD: gf - ga,
                xG_for: xg_for,
                xG_against: xg_against,
                xG_diff: round3(xg_for - xg_against),
            };
            (tid, TeamForm { last: last.into_iter().collect(), summary })
        })
        .collect()
}

/// Read a results snapshot: either a bare list or `{"fixtures": [...]}`.
/// Unreadable items are skipped.
pub fn records_from_snapshot(doc: &Value) -> Vec<ResultRecord> {
    let items: &[Value] = match doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map.get("fixtures").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]),
        _ => &[],
    };
    items
        .iter()
        .filter_map(|it| ResultRecord::deserialize(it).ok())
        .filter(|r| r.league_id != 0 && r.fixture_id != 0)
        .collect()
}
