use tickerfeed::{HistoryRange, Instrument, Symbol};
use tickerfeed_demos::common::{demo_config, demo_engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let demo = demo_engine(demo_config()).await?.start()?;
    let engine = &demo.engine;

    let aapl = Instrument::equity("AAPL")?;
    let btc = Instrument::crypto("BTC")?;
    for instrument in [&aapl, &btc] {
        for range in [HistoryRange::OneDay, HistoryRange::FiveDays, HistoryRange::OneMonth] {
            match engine.history(instrument, range).await {
                Ok(cached) => {
                    let series = &cached.series;
                    println!(
                        "{instrument} {range}: {} points, low {:?}, high {:?}, change {:?}{}",
                        series.points().len(),
                        series.min_price(),
                        series.max_price(),
                        series.change_percent().map(|c| c.round_dp(2)),
                        if cached.stale { " (stale)" } else { "" }
                    );
                }
                Err(e) => println!("{instrument} {range}: {e}"),
            }
        }
    }

    // A second call is answered from the cache.
    let again = engine.history(&aapl, HistoryRange::OneDay).await?;
    println!("cached 1d series has {} points", again.series.points().len());

    for ticker in ["AAPL", "MSFT"] {
        let icon = engine.icon(&Symbol::new(ticker)?).await?;
        if icon.placeholder {
            println!("{ticker}: no icon, using placeholder");
        } else {
            println!("{ticker}: {} byte icon", icon.bytes.len());
        }
    }

    demo.shutdown().await;
    Ok(())
}
