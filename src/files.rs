//! Local file inputs and outputs: allowlists, the team-name mapping table,
//! JSON snapshots and CSV exports.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Places searched for the mapping table when none is given.
pub const MAPPING_CANDIDATES: [&str; 3] = [
    "team_mapping/eng_to_th.csv",
    "data/team_mapping.csv",
    "team_mapping.csv",
];

const BOM: char = '\u{feff}';

fn read_text(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text.strip_prefix(BOM).map(str::to_string).unwrap_or(text))
}

/// League ids, one per line. Only the first whitespace-separated token counts;
/// blank lines, `#` comments and non-numeric tokens are skipped.
pub fn read_allowlist(path: &Path) -> Result<BTreeSet<i64>> {
    let text = read_text(path)?;
    let ids: BTreeSet<i64> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .filter(|tok| tok.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|tok| tok.parse().ok())
        .collect();
    info!("Loaded {} league ids from {}", ids.len(), path.display());
    Ok(ids)
}

fn header_columns(header: &[String]) -> Option<(usize, usize)> {
    const PAIRS: [(&str, &str); 2] = [("eng", "th"), ("eng_name", "th_name")];
    let find = |name: &str| header.iter().position(|h| h == name);
    PAIRS.iter().find_map(|(e, t)| Some((find(e)?, find(t)?)))
}

/// Two-column English to Thai team-name table.
///
/// A header row of `eng,th` or `eng_name,th_name` (any case) selects the
/// columns; otherwise the first two columns are used and the first row is
/// treated as data. Rows with an empty side are dropped.
pub fn load_team_mapping(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = read_text(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed CSV in {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let Some(first) = rows.first() else {
        return Ok(BTreeMap::new());
    };
    let lowered: Vec<String> = first.iter().map(|h| h.to_lowercase()).collect();
    let (cols, skip) = match header_columns(&lowered) {
        Some(cols) => (cols, 1),
        None => ((0, 1), 0),
    };

    let mapping: BTreeMap<String, String> = rows
        .iter()
        .skip(skip)
        .filter_map(|row| {
            let eng = row.get(cols.0)?.trim();
            let th = row.get(cols.1)?.trim();
            (!eng.is_empty() && !th.is_empty()).then(|| (eng.to_string(), th.to_string()))
        })
        .collect();
    info!("Loaded {} team names from {}", mapping.len(), path.display());
    Ok(mapping)
}

/// Write the mapping table as `eng,th` CSV with a UTF-8 BOM, creating parent
/// directories.
pub fn write_team_mapping(path: &Path, mapping: &BTreeMap<String, String>) -> Result<()> {
    ensure_parent(path)?;
    let mut file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(BOM.to_string().as_bytes())?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["eng", "th"])?;
    for (eng, th) in mapping {
        writer.write_record([eng, th])?;
    }
    writer.flush()?;
    info!("Wrote {} team names to {}", mapping.len(), path.display());
    Ok(())
}

/// The explicit path when given, else the first existing candidate under `root`.
pub fn resolve_mapping_csv(explicit: Option<&Path>, root: &Path) -> Result<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
        return Err(anyhow!("Mapping CSV not found: {}", p.display()));
    }
    MAPPING_CANDIDATES
        .iter()
        .map(|c| root.join(c))
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow!("No mapping CSV found (tried {})", MAPPING_CANDIDATES.join(", ")))
}

/// Newest `{prefix}*.json` in `dir` by modification time.
pub fn find_latest_snapshot(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(prefix) && n.ends_with(".json"))
            .unwrap_or(false);
        if !matches || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    if let Some((_, p)) = &best {
        debug!("Latest snapshot in {}: {}", dir.display(), p.display());
    }
    Ok(best.map(|(_, p)| p))
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Pretty-printed JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// One CSV row per serialized item, header from the field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        p
    }

    #[test]
    fn allowlist_skips_comments_and_noise() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(dir.path(), "leagues.txt", "# top flights\n39 Premier League\n\n140\nabc\n78x\n  61  Ligue 1\n");
        let ids = read_allowlist(&p).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![39, 61, 140]);
    }

    #[test]
    fn mapping_with_named_headers_and_bom() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(dir.path(), "m.csv", "\u{feff}id,th_name,eng_name\n1,ลิเวอร์พูล,Liverpool\n2,,Arsenal\n");
        let m = load_team_mapping(&p).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m["Liverpool"], "ลิเวอร์พูล");
    }

    #[test]
    fn mapping_without_header_is_positional() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(dir.path(), "m.csv", "Chelsea,เชลซี\nEverton,เอฟเวอร์ตัน,extra\n");
        let m = load_team_mapping(&p).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m["Everton"], "เอฟเวอร์ตัน");
    }

    #[test]
    fn resolves_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        let p = file(&dir.path().join("data"), "team_mapping.csv", "eng,th\n");
        assert_eq!(resolve_mapping_csv(None, dir.path()).unwrap(), p);
        assert!(resolve_mapping_csv(Some(&dir.path().join("nope.csv")), dir.path()).is_err());
    }

    #[test]
    fn latest_snapshot_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = file(dir.path(), "odds_full_20251001_20251002.json", "[]");
        let new = file(dir.path(), "odds_full_20250901_20250902.json", "[]");
        file(dir.path(), "results_full_x.json", "[]");
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options().write(true).open(&old).unwrap().set_modified(past).unwrap();

        assert_eq!(find_latest_snapshot(dir.path(), "odds_full_").unwrap(), Some(new));
        assert_eq!(find_latest_snapshot(dir.path(), "missing_").unwrap(), None);
    }

    #[test]
    fn json_write_then_read_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out/nested/x.json");
        write_json(&p, &serde_json::json!({"a": [1, 2]})).unwrap();
        assert_eq!(read_json(&p).unwrap()["a"][1], 2);
    }

    #[test]
    fn csv_rows_get_header() {
        #[derive(Serialize)]
        struct Row {
            fixture_id: i64,
            odd: String,
        }
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("o.csv");
        write_csv(&p, &[Row { fixture_id: 7, odd: "1.90".into() }]).unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "fixture_id,odd\n7,1.90\n");
    }
}
