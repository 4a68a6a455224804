//! Signal generation: the three market strategies, their weighting and
//! consensus, and the adaptive weight store fed by trade outcomes.

pub mod analyzer;
pub mod fundamental;
pub mod learner;
pub mod manager;
pub mod momentum;
pub mod sentiment;
pub mod signals;

pub use analyzer::{NeutralWeights, Strategy, StrategyParams, WeightSource};
pub use fundamental::FundamentalStrategy;
pub use learner::LearnerStore;
pub use manager::{StrategyManager, StrategyPerformance, StrategyStats};
pub use momentum::MomentumStrategy;
pub use sentiment::SentimentStrategy;
