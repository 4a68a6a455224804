//! Kalshi API client library.
//!
//! Authenticated REST access to the Kalshi trade API, exposed to the rest of
//! the bot through [`common::MarketService`].

pub mod auth;
pub mod rest;

pub use auth::KalshiAuth;
pub use rest::KalshiRestClient;
