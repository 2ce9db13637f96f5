//! Cache command - list or clear cached price series

use anyhow::{Context, Result};

use technical_analysis::cache::CacheStore;
use technical_analysis::{Config, Ticker};

pub fn list(config: &Config) -> Result<()> {
    let store = CacheStore::new(&config.cache.dir);
    let entries = store.list().context("Failed to read cache directory")?;

    println!("\n{}", "=".repeat(60));
    println!("CACHE: {}", store.dir().display());
    println!("{}", "=".repeat(60));

    if entries.is_empty() {
        println!("  (empty)");
    }
    for entry in &entries {
        match (entry.bars, entry.first_date, entry.last_date) {
            (Some(bars), Some(first), Some(last)) => println!(
                "  {:<12} {:<5} {:>6} bars  {} -> {}",
                entry.ticker, entry.period, bars, first, last
            ),
            (Some(bars), _, _) => {
                println!("  {:<12} {:<5} {:>6} bars", entry.ticker, entry.period, bars)
            }
            (None, _, _) => println!(
                "  {:<12} {:<5} corrupt (refetched on next request)",
                entry.ticker, entry.period
            ),
        }
    }
    println!("{}\n", "=".repeat(60));
    Ok(())
}

pub fn clear(config: &Config, ticker: Option<String>) -> Result<()> {
    let store = CacheStore::new(&config.cache.dir);
    let ticker = ticker.map(Ticker::new);
    let removed = store
        .clear(ticker.as_ref())
        .context("Failed to clear cache")?;

    match ticker {
        Some(t) => println!("Removed {} cached series for {}", removed, t),
        None => println!("Removed {} cached series", removed),
    }
    Ok(())
}
