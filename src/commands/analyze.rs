//! Analyze command - refresh cached history and print the analysis

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use technical_analysis::provider::YahooProvider;
use technical_analysis::{AnalysisError, AnalysisOrchestrator, AnalysisResult, Config, Period, Ticker};

use crate::OutputFormat;

pub fn run(
    targets: Vec<String>,
    period: Option<Period>,
    format: OutputFormat,
    config: Config,
) -> Result<()> {
    let (tickers, period) = resolve_targets(targets, period)?;
    info!(
        "Analyzing {} ticker(s) over {}",
        tickers.len(),
        period
    );

    // Create a tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    let provider = YahooProvider::new(&config.provider).context("Failed to create HTTP client")?;
    let orchestrator = Arc::new(AnalysisOrchestrator::new(provider, config));
    let results = rt.block_on(orchestrator.analyze_many(tickers, period, Utc::now()));

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    for (ticker, result) in &results {
        if let Err(e) = result {
            error!("{}: {}", ticker, e);
        }
    }

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table => print_tables(&results),
    }

    if failed > 0 {
        anyhow::bail!("{} of {} analyses failed", failed, results.len());
    }
    Ok(())
}

/// Split positional arguments into tickers and an optional trailing period.
///
/// `AAPL 6mo` is one ticker with a period; `--period` wins over a positional period.
fn resolve_targets(mut targets: Vec<String>, flag: Option<Period>) -> Result<(Vec<Ticker>, Period)> {
    let mut period = flag;
    if targets.len() >= 2 {
        if let Some(Ok(p)) = targets.last().map(|s| s.parse::<Period>()) {
            targets.pop();
            period = period.or(Some(p));
        }
    }

    let tickers: Vec<Ticker> = targets
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Ticker::new)
        .collect();
    if tickers.is_empty() {
        anyhow::bail!("No ticker given. Usage: technical-analysis analyze <TICKER>... [PERIOD]");
    }

    Ok((tickers, period.unwrap_or_default()))
}

fn error_json(ticker: &Ticker, e: &AnalysisError) -> Value {
    json!({ "ticker": ticker, "error": e.to_string() })
}

fn print_json(results: &[(Ticker, Result<AnalysisResult, AnalysisError>)]) -> Result<()> {
    let values: Vec<Value> = results
        .iter()
        .map(|(ticker, result)| match result {
            Ok(analysis) => serde_json::to_value(analysis.rounded()),
            Err(e) => Ok(error_json(ticker, e)),
        })
        .collect::<Result<_, _>>()
        .context("Failed to serialize analysis")?;

    let output = match values.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(&values)?,
    };
    println!("{}", output);
    Ok(())
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "N/A".to_string())
}

fn print_tables(results: &[(Ticker, Result<AnalysisResult, AnalysisError>)]) {
    for (ticker, result) in results {
        println!("\n{}", "=".repeat(60));
        match result {
            Err(e) => {
                println!("{}: ERROR", ticker);
                println!("{}", "=".repeat(60));
                println!("  {}", e);
            }
            Ok(analysis) => print_table(&analysis.rounded()),
        }
        println!("{}", "=".repeat(60));
    }
}

fn print_table(r: &AnalysisResult) {
    println!("{} ({}, {} bars, as of {} - {})", r.ticker, r.period, r.bars, r.as_of, r.day_label);
    println!("{}", "=".repeat(60));
    println!("  Price:          {:.2}", r.current_price);
    println!(
        "  Change (1d):    {:+.2} ({:+.2}%)",
        r.price_change_1d, r.price_change_pct_1d
    );
    println!("  Volume:         {}", r.volume);
    println!("{}", "-".repeat(60));
    println!("  SMA 20:         {}", fmt_opt(r.sma_20, 2));
    println!("  SMA 50:         {}  (price {})", fmt_opt(r.sma_50, 2), r.price_vs_sma_50);
    println!("  SMA 200:        {}  (price {})", fmt_opt(r.sma_200, 2), r.price_vs_sma_200);
    for (period, value) in &r.ema.0 {
        println!("  {:<16}{}", format!("EMA {}:", period), fmt_opt(*value, 2));
    }
    println!("  RSI 14:         {}", fmt_opt(r.rsi_14, 2));
    println!("  MACD:           {}", fmt_opt(r.macd, 4));
    println!("  MACD signal:    {}", fmt_opt(r.macd_signal, 4));
    println!("  MACD histogram: {}", fmt_opt(r.macd_histogram, 4));
    println!(
        "  Bollinger:      {} / {} / {}",
        fmt_opt(r.bb_upper, 2),
        fmt_opt(r.bb_middle, 2),
        fmt_opt(r.bb_lower, 2)
    );
    println!("{}", "-".repeat(60));
    println!("  Trend:          {}", r.trend);
    for level in &r.resistance_levels {
        println!("  Resistance:     {:.2}  (strength {})", level.price, level.strength);
    }
    for level in &r.support_levels {
        println!("  Support:        {:.2}  (strength {})", level.price, level.strength);
    }
    if !r.insufficient_history.is_empty() {
        println!("  Not enough history for: {}", r.insufficient_history.join(", "));
    }
    for warning in &r.warnings {
        println!("  Warning: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_single_ticker_defaults_to_one_year() {
        let (tickers, period) = resolve_targets(strings(&["aapl"]), None).unwrap();
        assert_eq!(tickers, vec![Ticker::new("AAPL")]);
        assert_eq!(period, Period::OneYear);
    }

    #[test]
    fn test_resolve_trailing_period() {
        let (tickers, period) = resolve_targets(strings(&["AAPL", "6mo"]), None).unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(period, Period::SixMonths);

        let (_, period) = resolve_targets(strings(&["AAPL", "6mo"]), Some(Period::Max)).unwrap();
        assert_eq!(period, Period::Max);
    }

    #[test]
    fn test_resolve_many_tickers() {
        let (tickers, period) =
            resolve_targets(strings(&["AAPL", "MSFT", "BTC-USD"]), Some(Period::ThreeMonths)).unwrap();
        assert_eq!(tickers.len(), 3);
        assert_eq!(period, Period::ThreeMonths);
    }

    #[test]
    fn test_resolve_requires_ticker() {
        assert!(resolve_targets(vec![], None).is_err());
    }
}
