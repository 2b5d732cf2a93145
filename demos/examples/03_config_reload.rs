use std::time::Duration;

use tickerfeed::JsonFileSource;
use tickerfeed_demos::common::{demo_config, demo_engine, print_snapshot};
use tickerfeed_types::WatchedSymbol;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Settings live in a JSON file the engine re-reads on `config_changed`.
    let path = std::env::temp_dir().join(format!("tickerfeed-demo-{}.json", std::process::id()));
    let mut cfg = demo_config();
    std::fs::write(&path, serde_json::to_string_pretty(&cfg)?)?;

    let mut demo = demo_engine(cfg.clone()).await?;
    demo.builder = demo.builder.config_source(JsonFileSource::new(&path));
    let demo = demo.start()?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("before reload:");
    print_snapshot(&demo.engine);

    // Drop ETH, add SOL, and tighten the staleness threshold.
    cfg.watchlist.retain(|w| w.symbol != "ETH");
    cfg.watchlist.push(WatchedSymbol::crypto("SOL"));
    cfg.staleness.stale_after_ms = 30_000;
    std::fs::write(&path, serde_json::to_string_pretty(&cfg)?)?;
    demo.engine.config_changed();

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("after reload:");
    print_snapshot(&demo.engine);

    demo.shutdown().await;
    let _ = std::fs::remove_file(&path);
    Ok(())
}
