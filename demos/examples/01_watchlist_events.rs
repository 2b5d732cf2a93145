use std::time::Duration;

use tickerfeed::EngineEvent;
use tickerfeed_demos::common::{demo_config, demo_engine, print_snapshot};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Register the sources (scripted when TICKERFEED_DEMOS_USE_MOCK is set).
    let demo = demo_engine(demo_config()).await?;

    // 2. Start the engine and listen before anything arrives.
    let demo = demo.start()?;
    let mut events = demo.engine.subscribe();

    // 3. Print events for a few seconds.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        match event {
            EngineEvent::QuoteUpdated(q) => {
                println!("quote     {} {:?}", q.symbol(), q.price);
            }
            EngineEvent::SignificantMove {
                symbol,
                change_percent,
                ..
            } => println!("move      {symbol} {:+}%", change_percent.round_dp(2)),
            EngineEvent::ConnectorStateChanged { provider, from, to } => {
                println!("connector {provider}: {from} -> {to}");
            }
            other => println!("event     {other:?}"),
        }
    }

    // 4. The store keeps the latest view of every symbol.
    print_snapshot(&demo.engine);
    demo.shutdown().await;
    Ok(())
}
