pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod runtime;
pub mod services;
pub mod signing;
pub mod strategy;

pub use adapters::{ExchangeApi, OkxAccountWs, OkxMarketWs, OkxRestClient};
pub use config::AppConfig;
pub use error::{GambitError, Result};
pub use persistence::{Ledger, OrderRecord, SqliteStore};
pub use runtime::Runtime;
pub use services::{OrderLifecycle, PortfolioService, RiskManager};
pub use strategy::{EmaCrossStrategy, Signal, SignalAction};
