//! Shared types, config, collaborator traits, and error definitions for the ensemble bot.

pub mod config;
pub mod error;
pub mod opportunity;
pub mod service;
pub mod types;

pub use config::BotConfig;
pub use error::Error;
pub use opportunity::{MarketOpportunity, NewOpportunity, StrategyKind};
pub use service::{MarketFilter, MarketService, NewsSource};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
