use std::time::Duration;

use tickerfeed::ProviderKey;
use tickerfeed_demos::common::{demo_config, demo_engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let demo = demo_engine(demo_config()).await?.start()?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    let engine = &demo.engine;

    for (provider, state) in engine.connector_states() {
        println!("stream {provider}: {state}");
    }

    for provider in ["finnhub", "coingecko"] {
        let stats = engine.credential_stats(ProviderKey::new(provider));
        if stats.is_empty() {
            println!("{provider}: no keys configured");
        }
        for slot in stats {
            println!("{provider}: {slot:?}");
        }
    }

    let m = engine.metrics();
    println!(
        "malformed={} rejected={} dropped_events={} poll_failures={} reconnects={}",
        m.malformed_ticks, m.rejected_updates, m.dropped_events, m.poll_batch_failures, m.reconnects
    );

    demo.shutdown().await;
    Ok(())
}
