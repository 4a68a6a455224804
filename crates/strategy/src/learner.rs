//! Persistent adaptive weights and parameter nudges, fed by trade outcomes.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::config::LearnerConfig;
use common::{Error, Result, StrategyKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzer::{StrategyParams, WeightSource};

const MIN_WEIGHT: f64 = 0.1;
const MAX_WEIGHT: f64 = 2.0;
const RECENT_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub strategy: StrategyKind,
    pub pnl: f64,
    pub note: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LearnerState {
    #[serde(default)]
    strategy_weights: BTreeMap<StrategyKind, f64>,
    #[serde(default)]
    strategy_params: BTreeMap<StrategyKind, StrategyParams>,
    #[serde(default)]
    performance_history: VecDeque<OutcomeEntry>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

impl Default for LearnerState {
    fn default() -> Self {
        Self {
            strategy_weights: BTreeMap::new(),
            strategy_params: BTreeMap::new(),
            performance_history: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }
}

/// JSON-file backed [`WeightSource`]. Every update is written through.
pub struct LearnerStore {
    config: LearnerConfig,
    path: PathBuf,
    state: Mutex<LearnerState>,
}

impl LearnerStore {
    pub fn load(config: LearnerConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        let state = if path.exists() {
            let mut raw = String::new();
            File::open(&path)?.read_to_string(&mut raw)?;
            serde_json::from_str::<LearnerState>(&raw).unwrap_or_else(|e| {
                warn!("Learner state at {} unreadable, starting fresh: {}", path.display(), e);
                LearnerState::default()
            })
        } else {
            LearnerState::default()
        };

        info!(
            "Learner loaded from {} ({} outcomes)",
            path.display(),
            state.performance_history.len()
        );
        Ok(Self {
            config,
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LearnerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("learner state lock poisoned".into()))
    }

    fn persist(&self, state: &LearnerState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(state)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        file.write_all(data.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Wins and losses among the most recent outcomes.
    pub fn recent_summary(&self) -> (usize, usize) {
        let Ok(state) = self.lock() else {
            return (0, 0);
        };
        let recent = state.performance_history.iter().rev().take(RECENT_WINDOW);
        let (wins, total) = recent.fold((0, 0), |(w, t), e| (w + usize::from(e.pnl > 0.0), t + 1));
        (wins, total - wins)
    }

    pub fn history_len(&self) -> usize {
        self.lock().map(|s| s.performance_history.len()).unwrap_or(0)
    }

    pub fn weights(&self) -> BTreeMap<StrategyKind, f64> {
        self.lock()
            .map(|s| s.strategy_weights.clone())
            .unwrap_or_default()
    }
}

/// Tighten the strategy's entry threshold after a loss.
fn nudge_after_loss(kind: StrategyKind, params: &mut StrategyParams) {
    match kind {
        StrategyKind::Fundamental => {
            let next = params.get_or("min_edge", 0.1) + 0.1;
            params.set("min_edge", next.min(5.0));
        }
        StrategyKind::Sentiment => {
            let next = params.get_or("sentiment_threshold", 0.3) + 0.05;
            params.set("sentiment_threshold", next.min(0.9));
        }
        StrategyKind::Momentum => {}
    }
}

impl WeightSource for LearnerStore {
    fn weight(&self, kind: StrategyKind) -> f64 {
        self.lock()
            .ok()
            .and_then(|s| s.strategy_weights.get(&kind).copied())
            .unwrap_or(1.0)
    }

    fn params(&self, kind: StrategyKind) -> StrategyParams {
        self.lock()
            .ok()
            .and_then(|s| s.strategy_params.get(&kind).cloned())
            .unwrap_or_default()
    }

    fn record_outcome(&self, ticker: &str, kind: StrategyKind, pnl: f64, note: &str) -> Result<()> {
        let mut state = self.lock()?;

        state.performance_history.push_back(OutcomeEntry {
            timestamp: Utc::now(),
            ticker: ticker.to_string(),
            strategy: kind,
            pnl,
            note: note.to_string(),
        });
        while state.performance_history.len() > self.config.history_limit.max(1) {
            state.performance_history.pop_front();
        }

        let rate = self.config.learning_rate;
        let current = state.strategy_weights.get(&kind).copied().unwrap_or(1.0);
        let next = if pnl > 0.0 {
            current * (1.0 + rate)
        } else {
            current * (1.0 - rate)
        };
        let next = next.clamp(MIN_WEIGHT, MAX_WEIGHT);
        state.strategy_weights.insert(kind, next);

        if pnl <= 0.0 {
            nudge_after_loss(kind, state.strategy_params.entry(kind).or_default());
        }
        state.updated_at = Utc::now();

        info!(
            "Learner: {} {} pnl={:.2} → weight {:.3}",
            kind, ticker, pnl, next
        );
        self.persist(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config() -> LearnerConfig {
        let path = std::env::temp_dir()
            .join(format!("learner-{}", uuid::Uuid::new_v4()))
            .join("learner.json");
        LearnerConfig {
            path: path.to_string_lossy().into_owned(),
            ..LearnerConfig::default()
        }
    }

    #[test]
    fn test_fresh_store_is_neutral() {
        let store = LearnerStore::load(temp_config()).unwrap();
        assert_eq!(store.weight(StrategyKind::Momentum), 1.0);
        assert!(store.params(StrategyKind::Fundamental).is_empty());
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_win_and_loss_move_weight() {
        let store = LearnerStore::load(temp_config()).unwrap();
        store.record_outcome("A", StrategyKind::Momentum, 2.0, "win").unwrap();
        assert!((store.weight(StrategyKind::Momentum) - 1.05).abs() < 1e-9);
        store.record_outcome("A", StrategyKind::Momentum, -1.0, "loss").unwrap();
        assert!((store.weight(StrategyKind::Momentum) - 1.05 * 0.95).abs() < 1e-9);
        assert_eq!(store.recent_summary(), (1, 1));
    }

    #[test]
    fn test_weight_clamped() {
        let store = LearnerStore::load(LearnerConfig {
            learning_rate: 0.9,
            ..temp_config()
        })
        .unwrap();
        for _ in 0..5 {
            store.record_outcome("A", StrategyKind::Sentiment, -1.0, "").unwrap();
        }
        assert_eq!(store.weight(StrategyKind::Sentiment), MIN_WEIGHT);
    }

    #[test]
    fn test_loss_tightens_thresholds() {
        let store = LearnerStore::load(temp_config()).unwrap();
        store.record_outcome("A", StrategyKind::Fundamental, -1.0, "").unwrap();
        store.record_outcome("B", StrategyKind::Sentiment, -1.0, "").unwrap();

        let fundamental = store.params(StrategyKind::Fundamental);
        assert!((fundamental.get_or("min_edge", 0.0) - 0.2).abs() < 1e-9);
        let sentiment = store.params(StrategyKind::Sentiment);
        assert!((sentiment.get_or("sentiment_threshold", 0.0) - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_state_survives_reload() {
        let config = temp_config();
        {
            let store = LearnerStore::load(config.clone()).unwrap();
            store.record_outcome("A", StrategyKind::Fundamental, 3.0, "resolved yes").unwrap();
        }
        let reloaded = LearnerStore::load(config.clone()).unwrap();
        assert!((reloaded.weight(StrategyKind::Fundamental) - 1.05).abs() < 1e-9);
        assert_eq!(reloaded.history_len(), 1);
        let _ = std::fs::remove_dir_all(reloaded.path().parent().unwrap());
    }

    #[test]
    fn test_history_bounded() {
        let store = LearnerStore::load(LearnerConfig {
            history_limit: 3,
            ..temp_config()
        })
        .unwrap();
        for i in 0..5 {
            store.record_outcome(&format!("T{i}"), StrategyKind::Momentum, 1.0, "").unwrap();
        }
        assert_eq!(store.history_len(), 3);
    }
}
