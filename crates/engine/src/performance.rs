use serde::Serialize;

/// Running statistics over resolved trades, in USD.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradePerformance {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// Positive for a run of wins, negative for a run of losses.
    pub current_streak: i64,
    pub max_win_streak: i64,
    pub max_loss_streak: i64,
    pub peak_pnl: f64,
    pub max_drawdown: f64,
    pub total_volume: u64,
}

impl TradePerformance {
    pub fn record(&mut self, pnl: f64, contracts: u64) {
        self.total_trades += 1;
        self.total_pnl += pnl;
        self.total_volume += contracts;

        if pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += pnl;
            self.current_streak = self.current_streak.max(0) + 1;
            self.max_win_streak = self.max_win_streak.max(self.current_streak);
        } else {
            self.losses += 1;
            self.gross_loss += -pnl;
            self.current_streak = self.current_streak.min(0) - 1;
            self.max_loss_streak = self.max_loss_streak.max(-self.current_streak);
        }

        self.peak_pnl = self.peak_pnl.max(self.total_pnl);
        self.max_drawdown = self.max_drawdown.max(self.peak_pnl - self.total_pnl);
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64
        }
    }

    /// Gross profit over gross loss; infinite with profits and no losses.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    pub fn average_pnl(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.total_pnl / self.total_trades as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaks_and_drawdown() {
        let mut perf = TradePerformance::default();
        for pnl in [2.0, 3.0, -1.0, -4.0, -1.0, 5.0] {
            perf.record(pnl, 10);
        }
        assert_eq!(perf.total_trades, 6);
        assert_eq!(perf.wins, 3);
        assert_eq!(perf.max_win_streak, 2);
        assert_eq!(perf.max_loss_streak, 3);
        assert_eq!(perf.current_streak, 1);
        assert!((perf.peak_pnl - 5.0).abs() < 1e-9);
        assert!((perf.max_drawdown - 6.0).abs() < 1e-9);
        assert_eq!(perf.total_volume, 60);
    }

    #[test]
    fn test_ratios() {
        let mut perf = TradePerformance::default();
        assert_eq!(perf.win_rate(), 0.0);
        assert_eq!(perf.profit_factor(), 0.0);

        perf.record(6.0, 1);
        assert!(perf.profit_factor().is_infinite());
        perf.record(-2.0, 1);
        assert!((perf.profit_factor() - 3.0).abs() < 1e-9);
        assert!((perf.win_rate() - 0.5).abs() < 1e-9);
        assert!((perf.average_pnl() - 2.0).abs() < 1e-9);
    }
}
