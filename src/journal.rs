//! Daily-rotated JSONL journal of cycle reports and fills.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use engine::CycleReport;

pub const BOT_TRADE_DIR: &str = "ensemble-bot";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn resolve_repo_root() -> Option<PathBuf> {
    let mut cursor = std::env::current_dir().ok()?;
    loop {
        if cursor.join(".git").is_dir() {
            return Some(cursor);
        }
        if !cursor.pop() {
            return None;
        }
    }
}

pub fn resolve_trades_dir() -> PathBuf {
    if let Ok(raw) = std::env::var("TRADES_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join(BOT_TRADE_DIR);
        }
    }
    if let Some(root) = resolve_repo_root() {
        return root.join("TRADES").join(BOT_TRADE_DIR);
    }
    PathBuf::from("TRADES").join(BOT_TRADE_DIR)
}

pub struct TradeJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl TradeJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("trades-{}.jsonl", day_key)))
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    pub fn write_event(&mut self, event: serde_json::Value) {
        let result = (|| -> std::io::Result<()> {
            self.rotate_if_needed()?;
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{}", line)?;
            self.file.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            tracing::warn!("journal write failed: {}", e);
        }
    }

    /// One `fill` line per fill, then a `cycle` summary line.
    pub fn record_cycle(&mut self, report: &CycleReport, paper: bool) {
        for fill in report.fills() {
            self.write_event(json!({
                "ts": now_iso(),
                "event": "fill",
                "cycle_id": report.cycle_id,
                "paper": paper,
                "order_id": fill.order_id,
                "ticker": fill.ticker,
                "side": fill.side,
                "price_cents": fill.price_cents,
                "count": fill.count,
                "sources": fill.sources,
            }));
        }
        self.write_event(json!({
            "ts": now_iso(),
            "event": "cycle",
            "cycle_id": report.cycle_id,
            "duration_ms": report.duration_ms,
            "markets_scanned": report.markets_scanned,
            "markets_analyzed": report.markets_analyzed,
            "opportunities": report.opportunities,
            "executions": report.executions,
            "positions_resolved": report.positions_resolved,
            "timed_out": report.timed_out,
            "health": report.health.status,
        }));
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_file(&self) -> PathBuf {
        self.dir.join(format!("trades-{}.jsonl", self.day_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ensemble-journal-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_events_append_as_json_lines() {
        let dir = temp_dir();
        let mut journal = TradeJournal::open(dir.clone()).unwrap();
        journal.write_event(json!({"event": "start", "n": 1}));
        journal.write_event(json!({"event": "stop", "n": 2}));

        let contents = std::fs::read_to_string(journal.current_file()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "start");
        assert_eq!(lines[1]["n"], 2);
        assert_eq!(journal.dir(), dir.as_path());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = temp_dir();
        TradeJournal::open(dir.clone())
            .unwrap()
            .write_event(json!({"event": "first"}));
        let mut journal = TradeJournal::open(dir.clone()).unwrap();
        journal.write_event(json!({"event": "second"}));

        let contents = std::fs::read_to_string(journal.current_file()).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }
}
