//! Stream public market data: ticker plus order book, with reconnect
//! visibility.
//!
//! Run with: cargo run --example public_streams

use kraken_ws::{BookDepth, Environment, Error, KrakenClient};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let client = KrakenClient::connect(Environment::Production).await?;
    client.ping().await?;
    println!("connected");

    let mut lifecycle = client.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            println!("lifecycle: {event:?}");
        }
    });

    let mut tickers = client.subscribe_ticker(&["XBT/USD"], 30).await?;
    let (mut snapshots, mut updates) = client
        .subscribe_book(&["XBT/USD"], BookDepth::Ten, 50)
        .await?;

    loop {
        tokio::select! {
            Some(item) = tickers.recv() => match item {
                Ok(event) => println!(
                    "ticker {}: bid {} / ask {}",
                    event.pair, event.data.bid.price, event.data.ask.price
                ),
                Err(Error::StreamInterrupted) => println!("ticker stream interrupted, recovering"),
                Err(err) => return Err(err),
            },
            Some(item) = snapshots.recv() => match item {
                Ok(snapshot) => println!(
                    "book snapshot {}: {} asks / {} bids",
                    snapshot.pair,
                    snapshot.data.asks.len(),
                    snapshot.data.bids.len()
                ),
                Err(Error::StreamInterrupted) => println!("book stream interrupted, recovering"),
                Err(err) => return Err(err),
            },
            Some(item) = updates.recv() => match item {
                Ok(update) => println!(
                    "book update {}: {} ask / {} bid level(s)",
                    update.pair,
                    update.data.asks.len(),
                    update.data.bids.len()
                ),
                Err(Error::StreamInterrupted) => {}
                Err(err) => return Err(err),
            },
            else => break,
        }
    }

    Ok(())
}
