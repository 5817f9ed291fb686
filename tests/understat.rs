use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use fixture_sync::files;
use fixture_sync::understat::{extend_mapping_file, fetch_league, League, UnderstatSource};

/// Escape JSON the way Understat embeds it in `JSON.parse('...')`.
fn js_escape(json: &str) -> String {
    let mut out = String::new();
    for c in json.chars() {
        match c {
            '"' | '{' | '}' | ':' | ' ' | '\'' | '[' | ']' => out.push_str(&format!("\\x{:02X}", c as u32)),
            c if !c.is_ascii() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn league_page(teams: &Value) -> String {
    format!(
        "<!DOCTYPE html>\n<html><body>\n<div class=\"chart\"></div>\n<script>\n\tvar datesData = JSON.parse('\\x5B\\x5D');\n\
         \tvar teamsData = JSON.parse('{}');\n\tvar playersData = JSON.parse('\\x5B\\x5D');\n</script>\n</body></html>\n",
        js_escape(&teams.to_string())
    )
}

fn season_2023() -> Value {
    json!({
        "89": {"id": "89", "title": "Manchester United", "history": [
            {"h_a": "h", "xG": 2.16, "xGA": 0.74, "npxG": 2.16, "npxGA": 0.74,
             "ppda": {"att": 305, "def": 27}, "ppda_allowed": {"att": 210, "def": 19},
             "deep": 11, "deep_allowed": 2, "scored": 1, "missed": 0, "xpts": 2.47,
             "result": "w", "date": "2023-08-14 19:00:00", "wins": 1, "draws": 0, "loses": 0, "pts": 3, "npxGD": 1.42}
        ]},
        "238": {"id": "238", "title": "Atlético Madrid", "history": [
            {"h_a": "a", "xG": 0.9, "xGA": 1.4, "npxG": 0.9, "ppda": {"att": 180, "def": 20},
             "deep": 3, "scored": 0, "missed": 0, "xpts": 0.9, "result": "d", "date": "2023-08-21 17:30:00"}
        ]}
    })
}

fn season_2024() -> Value {
    json!({
        "89": {"id": "89", "title": "Manchester United", "history": [
            {"h_a": "a", "xG": 1.1, "xGA": 1.8, "npxG": 1.1, "ppda": {"att": 240, "def": 22},
             "deep": 5, "scored": 1, "missed": 2, "xpts": 0.7, "result": "l", "date": "2024-08-24 11:30:00"}
        ]},
        "244": {"id": "244", "title": "Brentford", "history": []}
    })
}

/// Serves canned league pages and records what was asked for.
struct CannedPages {
    pages: BTreeMap<i32, String>,
    requests: Mutex<Vec<(League, i32)>>,
}

impl CannedPages {
    fn new(pages: &[(i32, String)]) -> Self {
        Self {
            pages: pages.iter().cloned().collect(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UnderstatSource for CannedPages {
    async fn league_page(&self, league: League, season: i32) -> Result<String> {
        self.requests.lock().unwrap().push((league, season));
        self.pages
            .get(&season)
            .cloned()
            .ok_or_else(|| anyhow!("status 404 Not Found"))
    }
}

#[test]
fn canned_page_escapes_like_the_site() {
    let page = league_page(&season_2023());
    assert!(page.contains(r"var teamsData = JSON.parse('\x7B\x2289\x22\x3A\x7B"));
    assert!(page.contains(r"Atlético\x20Madrid"));
    assert!(!page.contains("Atlético"));
}

#[tokio::test]
async fn seasons_are_flattened_into_team_match_rows() {
    let source = CannedPages::new(&[(2023, league_page(&season_2023())), (2024, league_page(&season_2024()))]);
    let mapping: BTreeMap<String, String> =
        [("Manchester United".to_string(), "แมนเชสเตอร์ ยูไนเต็ด".to_string())].into();

    let fetched = fetch_league(&source, League::Epl, 2023..=2024, &mapping, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(*source.requests.lock().unwrap(), vec![(League::Epl, 2023), (League::Epl, 2024)]);
    assert_eq!(
        fetched.teams.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["Atlético Madrid", "Brentford", "Manchester United"]
    );
    assert_eq!(fetched.rows.len(), 3);

    let first = &fetched.rows[0];
    assert_eq!(first.team, "แมนเชสเตอร์ ยูไนเต็ด");
    assert_eq!((first.date.as_str(), first.season), ("2023-08-14", 2023));
    assert_eq!((first.scored, first.missed, first.result.as_str(), first.h_a.as_str()), (1, 0, "w", "h"));
    assert_eq!((first.xg, first.xga, first.npxg), (Some(2.16), 0.74, 2.16));
    assert_eq!((first.ppda, first.deep, first.xpts), (305.0, 11, 2.47));

    // unmapped names are shown in English
    assert_eq!(fetched.rows[1].team, "Atlético Madrid");
    assert_eq!((fetched.rows[2].season, fetched.rows[2].result.as_str()), (2024, "l"));
}

#[tokio::test]
async fn missing_teams_data_fails_the_league() {
    let source = CannedPages::new(&[
        (2023, league_page(&season_2023())),
        (2024, "<html><body>Under maintenance</body></html>".to_string()),
    ]);
    let err = fetch_league(&source, League::SerieA, 2023..=2024, &BTreeMap::new(), Duration::ZERO)
        .await
        .unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("Serie_A 2024"));
    assert!(msg.contains("No teamsData"));
}

#[tokio::test]
async fn page_fetch_error_propagates() {
    let source = CannedPages::new(&[]);
    let err = fetch_league(&source, League::Ligue1, 2019..=2019, &BTreeMap::new(), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[test]
fn new_team_names_extend_the_mapping_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("team_mapping").join("eng_to_th.csv");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "\u{feff}eng,th\nManchester United,แมนเชสเตอร์ ยูไนเต็ด\n").unwrap();

    let seen: BTreeSet<String> = ["Manchester United", "Brentford", "Atlético Madrid"].map(String::from).into();
    let added = extend_mapping_file(&path, &seen).unwrap();
    assert_eq!(added, vec!["Atlético Madrid", "Brentford"]);

    let mapping = files::load_team_mapping(&path).unwrap();
    assert_eq!(mapping.len(), 3);
    assert_eq!(mapping["Manchester United"], "แมนเชสเตอร์ ยูไนเต็ด");
    assert_eq!(mapping["Brentford"], "Brentford");
    assert!(fs::read_to_string(&path).unwrap().starts_with("\u{feff}eng,th\n"));

    let modified = fs::metadata(&path).unwrap().modified().unwrap();
    assert!(extend_mapping_file(&path, &seen).unwrap().is_empty());
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn mapping_csv_is_created_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh").join("eng_to_th.csv");
    let seen: BTreeSet<String> = ["Girona"].map(String::from).into();

    assert_eq!(extend_mapping_file(&path, &seen).unwrap(), vec!["Girona"]);
    assert_eq!(files::load_team_mapping(&path).unwrap()["Girona"], "Girona");
}

#[tokio::test]
async fn league_csv_uses_understat_column_names() {
    let source = CannedPages::new(&[(2024, league_page(&season_2024()))]);
    let fetched = fetch_league(&source, League::Epl, 2024..=2024, &BTreeMap::new(), Duration::ZERO)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(League::Epl.csv_name());
    files::write_csv(&path, &fetched.rows).unwrap();

    let body = fs::read_to_string(&path).unwrap();
    let mut lines = body.lines();
    assert_eq!(
        lines.next(),
        Some("date,season,team,xG,xGA,scored,missed,result,npxG,deep,ppda,xpts,h_a")
    );
    assert_eq!(lines.next(), Some("2024-08-24,2024,Manchester United,1.1,1.8,1,2,l,1.1,5,240.0,0.7,a"));
    assert_eq!(lines.next(), None);
}
