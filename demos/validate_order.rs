//! Submit a validate-only order on the private endpoint.
//!
//! Expects KRAKEN_API_KEY and KRAKEN_API_SECRET in the environment.
//! The `validate` flag makes the server check the order without booking
//! anything.
//!
//! Run with: cargo run --example validate_order

use kraken_ws::{
    AddOrder, Credentials, Environment, Error, KrakenClient, OrderSide, OrderType,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let api_key = std::env::var("KRAKEN_API_KEY")
        .map_err(|_| Error::Validation("KRAKEN_API_KEY is not set".into()))?;
    let api_secret = std::env::var("KRAKEN_API_SECRET")
        .map_err(|_| Error::Validation("KRAKEN_API_SECRET is not set".into()))?;

    let client =
        KrakenClient::connect_private(Environment::Production, Credentials::new(api_key, api_secret))
            .await?;

    let mut order = AddOrder::new("XBT/USD", OrderSide::Buy, OrderType::Market, "0.0002");
    order.validate = Some(true);

    match client.add_order(order).await {
        Ok(status) => println!("accepted: {:?}", status.descr),
        Err(err) => {
            println!("rejected: {err}");
            if let Some(body) = err.order_response() {
                println!("server response: {body:?}");
            }
        }
    }

    client.disconnect().await
}
