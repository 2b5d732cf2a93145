use std::time::Duration;

use tickerfeed_demos::common::{demo_config, demo_engine, print_snapshot};
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Human-friendly subscriber with env-based filtering.
    // Suggested: RUST_LOG=info,tickerfeed=debug,tickerfeed_providers=trace
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .try_init();

    let demo = demo_engine(demo_config()).await?.start()?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    print_snapshot(&demo.engine);
    demo.shutdown().await;
    Ok(())
}
