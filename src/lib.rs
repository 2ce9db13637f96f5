//! Technical Analysis
//!
//! Incremental market-data cache and indicator engine producing a structured
//! snapshot per instrument: moving averages, RSI, MACD, Bollinger Bands,
//! support/resistance levels, a trend label and a day label.

pub mod analysis;
pub mod cache;
pub mod calendar;
pub mod common;
pub mod config;
pub mod day_label;
pub mod error;
pub mod indicators;
pub mod levels;
pub mod provider;
pub mod series;
pub mod trend;
pub mod types;
pub mod updater;

pub use analysis::{AnalysisOrchestrator, AnalysisResult};
pub use config::Config;
pub use error::{AnalysisError, StaleDataWarning};
pub use series::PriceSeries;
pub use types::*;
