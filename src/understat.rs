//! Understat league pages.
//!
//! Each season page embeds a `teamsData` object (`var teamsData =
//! JSON.parse('...')`) holding every team's per-match history with expected
//! goals, pressing and expected points. The stage flattens it into one row
//! per team and match and grows the team-name mapping with unseen names.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::{Chars, FromStr};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::UnderstatConfig;
use crate::files;
use crate::odds::parse::parse_percent;

/// First season Understat publishes.
pub const FIRST_SEASON: i32 = 2014;

/// Month the European season starts in; Understat names seasons by start year.
const SEASON_START_MONTH: u32 = 8;

/// Season in progress (or about to start) on `date`.
pub fn current_season(date: NaiveDate) -> i32 {
    if date.month() >= SEASON_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum League {
    Epl,
    LaLiga,
    SerieA,
    Bundesliga,
    Ligue1,
}

impl League {
    /// Rotation order of the daily job.
    pub const ALL: [League; 5] = [
        League::Epl,
        League::LaLiga,
        League::SerieA,
        League::Bundesliga,
        League::Ligue1,
    ];

    /// Path segment on understat.com.
    pub fn code(self) -> &'static str {
        match self {
            League::Epl => "EPL",
            League::LaLiga => "La_liga",
            League::SerieA => "Serie_A",
            League::Bundesliga => "Bundesliga",
            League::Ligue1 => "Ligue_1",
        }
    }

    /// League fetched on `weekday` when none is named: one a day, cycling
    /// from Monday.
    pub fn for_weekday(weekday: Weekday) -> League {
        Self::ALL[weekday.num_days_from_monday() as usize % Self::ALL.len()]
    }

    /// `understat_{code}.csv`, lowercased.
    pub fn csv_name(self) -> String {
        format!("understat_{}.csv", self.code().to_lowercase())
    }
}

impl FromStr for League {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "epl" | "premierleague" => Ok(League::Epl),
            "laliga" => Ok(League::LaLiga),
            "seriea" => Ok(League::SerieA),
            "bundesliga" => Ok(League::Bundesliga),
            "ligue1" => Ok(League::Ligue1),
            _ => Err(format!("unknown Understat league '{}'", s)),
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Season pages by league.
#[async_trait]
pub trait UnderstatSource: Send + Sync {
    /// HTML of the league page for the season starting in `season`.
    async fn league_page(&self, league: League, season: i32) -> Result<String>;
}

pub struct UnderstatClient {
    http_client: reqwest::Client,
    base_url: String,
    backoff: BackoffPolicy,
}

impl UnderstatClient {
    pub fn new(config: &UnderstatConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("fixture-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            backoff: config.backoff.clone(),
        })
    }

    fn url(&self, league: League, season: i32) -> String {
        format!("{}/league/{}/{}", self.base_url, league.code(), season)
    }
}

#[async_trait]
impl UnderstatSource for UnderstatClient {
    async fn league_page(&self, league: League, season: i32) -> Result<String> {
        let url = self.url(league, season);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.http_client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.context("Failed to read page body");
                }
                Ok(response) => anyhow!("status {}", response.status()),
                Err(e) => anyhow!(e),
            };

            if !self.backoff.should_retry(attempt) {
                return Err(failure.context(format!("GET {} failed after {} attempts", url, attempt)));
            }
            warn!("GET {} attempt {} failed: {}. Retrying...", url, attempt, failure);
            self.backoff.wait(attempt).await;
        }
    }
}

fn teams_data_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"var\s+teamsData\s*=\s*JSON\.parse\('(.*?)'\)").ok())
        .as_ref()
}

/// Undo the JavaScript string escapes (`\xNN`, `\uNNNN`, `\n`, `\'`, ...)
/// of an embedded string literal. Malformed escapes are kept verbatim.
pub fn unescape_js(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('x') => push_code_point(&mut out, &mut chars, 2, "\\x"),
            Some('u') => push_code_point(&mut out, &mut chars, 4, "\\u"),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn push_code_point(out: &mut String, chars: &mut Chars<'_>, digits: usize, prefix: &str) {
    let hex: String = chars.by_ref().take(digits).collect();
    let decoded = (hex.len() == digits)
        .then(|| u32::from_str_radix(&hex, 16).ok())
        .flatten()
        .and_then(char::from_u32);
    match decoded {
        Some(ch) => out.push(ch),
        // lone surrogates stay escaped; serde_json pairs them up
        None => {
            out.push_str(prefix);
            out.push_str(&hex);
        }
    }
}

/// The `teamsData` object of a league page.
pub fn extract_teams_data(html: &str) -> Result<Value> {
    let re = teams_data_re().ok_or_else(|| anyhow!("teamsData pattern failed to compile"))?;
    let raw = re
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| anyhow!("No teamsData found in page"))?;
    serde_json::from_str(&unescape_js(raw.as_str())).context("teamsData is not valid JSON")
}

/// One team's view of one match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMatchRow {
    pub date: String,
    pub season: i32,
    pub team: String,
    #[serde(rename = "xG")]
    pub xg: Option<f64>,
    #[serde(rename = "xGA")]
    pub xga: f64,
    pub scored: i64,
    pub missed: i64,
    pub result: String,
    #[serde(rename = "npxG")]
    pub npxg: f64,
    pub deep: i64,
    pub ppda: f64,
    pub xpts: f64,
    pub h_a: String,
}

fn num(v: Option<&Value>) -> Option<f64> {
    v.and_then(parse_percent)
}

fn text(v: Option<&Value>) -> String {
    v.and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

fn match_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Per-match rows of every team in `teams`, plus the English names seen.
///
/// Team names are shown through `mapping` where it has an entry. Matches
/// without a readable date or scoreline are skipped; other missing numbers
/// read as zero, except xG which stays absent.
pub fn team_match_rows(
    teams: &Value,
    season: i32,
    mapping: &BTreeMap<String, String>,
) -> (Vec<TeamMatchRow>, BTreeSet<String>) {
    let mut rows = Vec::new();
    let mut names = BTreeSet::new();
    let Some(teams) = teams.as_object() else {
        return (rows, names);
    };

    for team in teams.values() {
        let Some(title) = team
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            continue;
        };
        names.insert(title.to_string());
        let shown = mapping.get(title).map(String::as_str).unwrap_or(title);

        let history = team.get("history").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        for m in history {
            let Some(date) = m.get("date").and_then(Value::as_str).and_then(match_date) else {
                continue;
            };
            let (Some(scored), Some(missed)) = (num(m.get("scored")), num(m.get("missed"))) else {
                continue;
            };
            rows.push(TeamMatchRow {
                date: date.format("%Y-%m-%d").to_string(),
                season,
                team: shown.to_string(),
                xg: num(m.get("xG")),
                xga: num(m.get("xGA")).unwrap_or(0.0),
                scored: scored as i64,
                missed: missed as i64,
                result: text(m.get("result")),
                npxg: num(m.get("npxG")).unwrap_or(0.0),
                deep: num(m.get("deep")).unwrap_or(0.0) as i64,
                ppda: num(m.get("ppda").and_then(|p| p.get("att"))).unwrap_or(0.0),
                xpts: num(m.get("xpts")).unwrap_or(0.0),
                h_a: text(m.get("h_a")),
            });
        }
    }
    (rows, names)
}

/// Add `name -> name` entries for names the mapping lacks; returns them sorted.
pub fn extend_mapping(mapping: &mut BTreeMap<String, String>, names: &BTreeSet<String>) -> Vec<String> {
    let added: Vec<String> = names.iter().filter(|n| !mapping.contains_key(*n)).cloned().collect();
    for name in &added {
        mapping.insert(name.clone(), name.clone());
    }
    added
}

/// Merge `names` into the mapping CSV at `path`, creating the file when it
/// does not exist. The file is only rewritten when something was added.
pub fn extend_mapping_file(path: &Path, names: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut mapping = if path.is_file() {
        files::load_team_mapping(path)?
    } else {
        BTreeMap::new()
    };
    let added = extend_mapping(&mut mapping, names);
    if !added.is_empty() {
        files::write_team_mapping(path, &mapping)?;
        info!("Added {} team names to {}: {}", added.len(), path.display(), added.join(", "));
    }
    Ok(added)
}

#[derive(Debug, Clone, Default)]
pub struct LeagueFetch {
    pub rows: Vec<TeamMatchRow>,
    /// English names of every team seen, across seasons.
    pub teams: BTreeSet<String>,
}

/// Every season of `league` in `seasons`, oldest first. A page without
/// `teamsData` fails the whole fetch.
pub async fn fetch_league(
    source: &dyn UnderstatSource,
    league: League,
    seasons: RangeInclusive<i32>,
    mapping: &BTreeMap<String, String>,
    pause: Duration,
) -> Result<LeagueFetch> {
    let mut out = LeagueFetch::default();
    for season in seasons {
        let html = source.league_page(league, season).await?;
        let teams = extract_teams_data(&html).with_context(|| format!("Understat {} {}", league, season))?;
        let (rows, names) = team_match_rows(&teams, season, mapping);
        info!("{} {}: {} teams, {} match rows", league, season, names.len(), rows.len());
        out.rows.extend(rows);
        out.teams.extend(names);

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unescapes_understat_literal() {
        let raw = r"\x7B\x2289\x22\x3A\x7B\x22title\x22\x3A\x22Atlético\x20Madrid\x22\x7D\x7D";
        assert_eq!(unescape_js(raw), r#"{"89":{"title":"Atlético Madrid"}}"#);
        assert_eq!(unescape_js(r"it\'s\zz\x4"), "it'szz\\x4");
    }

    #[test]
    fn league_names_and_rotation() {
        assert_eq!("La Liga".parse::<League>(), Ok(League::LaLiga));
        assert_eq!("serie_a".parse::<League>(), Ok(League::SerieA));
        assert_eq!("Ligue 1".parse::<League>(), Ok(League::Ligue1));
        assert!("MLS".parse::<League>().is_err());
        assert_eq!(League::for_weekday(Weekday::Mon), League::Epl);
        assert_eq!(League::for_weekday(Weekday::Fri), League::Ligue1);
        assert_eq!(League::for_weekday(Weekday::Sat), League::Epl);
        assert_eq!(League::LaLiga.csv_name(), "understat_la_liga.csv");
    }

    #[test]
    fn season_rolls_over_in_august() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(current_season(day(2026, 1, 15)), 2025);
        assert_eq!(current_season(day(2026, 7, 31)), 2025);
        assert_eq!(current_season(day(2026, 8, 1)), 2026);
    }

    #[test]
    fn page_without_teams_data_is_an_error() {
        let err = extract_teams_data("<html><script>var datesData = []</script></html>").unwrap_err();
        assert!(err.to_string().contains("No teamsData"));
    }

    #[test]
    fn rows_skip_unreadable_matches() {
        let teams = json!({
            "71": {"id": "71", "title": "Aston Villa", "history": [
                {"h_a": "a", "xG": "1.2", "xGA": 0.8, "scored": "2", "missed": "1", "result": "w",
                 "date": "2024-08-17 14:00:00", "ppda": {"att": 210, "def": 20}, "deep": 4, "xpts": 2.1, "npxG": 1.2},
                {"h_a": "h", "scored": 1, "missed": 1, "date": "not a date"},
                {"h_a": "h", "date": "2024-08-24 14:00:00"}
            ]},
            "72": {"title": "  "}
        });
        let mapping: BTreeMap<String, String> = [("Aston Villa".to_string(), "แอสตัน วิลล่า".to_string())].into();
        let (rows, names) = team_match_rows(&teams, 2024, &mapping);

        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["Aston Villa"]);
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.team, "แอสตัน วิลล่า");
        assert_eq!((r.date.as_str(), r.season), ("2024-08-17", 2024));
        assert_eq!((r.scored, r.missed, r.deep), (2, 1, 4));
        assert_eq!((r.xg, r.ppda), (Some(1.2), 210.0));
    }

    #[test]
    fn identity_entries_for_new_names() {
        let mut mapping: BTreeMap<String, String> = [("Arsenal".to_string(), "อาร์เซนอล".to_string())].into();
        let names: BTreeSet<String> = ["Brentford", "Arsenal", "Ipswich"].map(String::from).into();
        assert_eq!(extend_mapping(&mut mapping, &names), vec!["Brentford", "Ipswich"]);
        assert_eq!(mapping["Arsenal"], "อาร์เซนอล");
        assert_eq!(mapping["Ipswich"], "Ipswich");
        assert!(extend_mapping(&mut mapping, &names).is_empty());
    }
}
