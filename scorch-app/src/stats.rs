//! Local usage counters (rusqlite).
//!
//! Tracks how many roasts were generated and how many were voiced, in
//! daily buckets. Purely local — nothing leaves the machine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

/// Which counter an event increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    TextRoast,
    AudioRoast,
}

impl UsageKind {
    fn as_str(self) -> &'static str {
        match self {
            UsageKind::TextRoast => "text_roast",
            UsageKind::AudioRoast => "audio_roast",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub text_roasts: u64,
    pub audio_roasts: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub day: String,
    pub text_roasts: u64,
    pub audio_roasts: u64,
}

/// Counter store; opens a connection per operation.
#[derive(Debug, Clone)]
pub struct UsageStore {
    db_path: PathBuf,
}

impl UsageStore {
    pub fn default_db_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            std::env::var_os("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Charbroil Labs")
                .join("Scorch")
                .join("scorch.db")
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::env::var_os("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    std::env::var_os("HOME")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("/tmp"))
                        .join(".local")
                        .join("share")
                })
                .join("scorch")
                .join("scorch.db")
        }
    }

    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data dir {}", parent.display()))?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("opening usage db {}", self.db_path.display()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS usage_counts (
              kind TEXT NOT NULL,
              day TEXT NOT NULL,
              count INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (kind, day)
            );
            "#,
        )?;
        Ok(())
    }

    /// Increment one counter for today.
    pub fn record(&self, kind: UsageKind) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO usage_counts (kind, day, count) VALUES (?1, ?2, 1)
             ON CONFLICT(kind, day) DO UPDATE SET count = count + 1",
            params![kind.as_str(), day],
        )?;
        Ok(())
    }

    pub fn totals(&self) -> Result<UsageTotals> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT kind, SUM(count) FROM usage_counts GROUP BY kind")?;
        let mut totals = UsageTotals::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            match kind.as_str() {
                "text_roast" => totals.text_roasts = count.max(0) as u64,
                "audio_roast" => totals.audio_roasts = count.max(0) as u64,
                _ => {}
            }
        }
        Ok(totals)
    }

    /// Per-day buckets for the most recent `days`, newest first.
    pub fn recent_days(&self, days: usize) -> Result<Vec<DayBucket>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT day,
                    SUM(CASE WHEN kind = 'text_roast' THEN count ELSE 0 END),
                    SUM(CASE WHEN kind = 'audio_roast' THEN count ELSE 0 END)
             FROM usage_counts
             GROUP BY day
             ORDER BY day DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![days as i64], |row| {
            Ok(DayBucket {
                day: row.get(0)?,
                text_roasts: row.get::<_, i64>(1)?.max(0) as u64,
                audio_roasts: row.get::<_, i64>(2)?.max(0) as u64,
            })
        })?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> (UsageStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "scorch-stats-test-{}-{}",
            tag,
            std::process::id()
        ));
        let path = dir.join("scorch.db");
        let _ = std::fs::remove_dir_all(&dir);
        (UsageStore::new(path).expect("create store"), dir)
    }

    #[test]
    fn counters_increment_independently() {
        let (store, dir) = temp_store("inc");

        store.record(UsageKind::TextRoast).unwrap();
        store.record(UsageKind::TextRoast).unwrap();
        store.record(UsageKind::AudioRoast).unwrap();

        let totals = store.totals().unwrap();
        assert_eq!(totals.text_roasts, 2);
        assert_eq!(totals.audio_roasts, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_store_reports_zero() {
        let (store, dir) = temp_store("zero");
        let totals = store.totals().unwrap();
        assert_eq!(totals.text_roasts, 0);
        assert_eq!(totals.audio_roasts, 0);
        assert!(store.recent_days(7).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn recent_days_buckets_by_day() {
        let (store, dir) = temp_store("days");
        store.record(UsageKind::TextRoast).unwrap();
        store.record(UsageKind::AudioRoast).unwrap();

        let buckets = store.recent_days(7).unwrap();
        assert_eq!(buckets.len(), 1, "all of today's counts share a bucket");
        assert_eq!(buckets[0].text_roasts, 1);
        assert_eq!(buckets[0].audio_roasts, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
