//! Cross-marketplace price collection and arbitrage detection for CS2
//! items.
//!
//! The pipeline periodically pulls listing prices from Steam, BUFF and
//! YouPin, normalizes them into one append-only history, and scans the
//! freshest prices for buy-low/sell-high spreads between marketplaces.

pub mod arbitrage;
pub mod collectors;
pub mod config;
pub mod error;
pub mod models;
pub mod net;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
