//! Kraken WebSocket client for Rust.
//!
//! A client for the Kraken WebSocket (v1) market-data and trading API. It
//! maintains one persistent connection per client and multiplexes above
//! it: request/response operations (ping, subscribe/unsubscribe, order
//! management) and long-lived server-pushed streams (ticker, candles,
//! trades, spreads, order books, own trades, open orders).
//!
//! # What This Crate Provides
//!
//! - High-level client: [`KrakenClient`]
//! - Typed subscription streams: [`EventStream`]
//! - Transparent reconnection with automatic resubscription
//! - Typed order operations with the server's wire vocabulary
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use kraken_ws::{Environment, KrakenClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kraken_ws::Error> {
//!     let client = KrakenClient::connect(Environment::Production).await?;
//!
//!     // Liveness round trip
//!     client.ping().await?;
//!
//!     // Stream ticker updates
//!     let mut tickers = client.subscribe_ticker(&["XBT/USD", "XBT/EUR"], 30).await?;
//!     while let Some(item) = tickers.recv().await {
//!         match item {
//!             Ok(event) => println!("{}: ask {}", event.pair, event.data.ask.price),
//!             Err(kraken_ws::Error::StreamInterrupted) => {
//!                 // Connection lost; the client reconnects and the same
//!                 // stream resumes after resubscription.
//!             }
//!             Err(err) => return Err(err),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Trading
//!
//! Order operations run on the private endpoint and authenticate with a
//! short-lived token the client mints and caches through the REST API:
//!
//! ```rust,no_run
//! use kraken_ws::{
//!     AddOrder, Credentials, Environment, KrakenClient, OrderSide, OrderType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kraken_ws::Error> {
//!     let credentials = Credentials::new("API_KEY", "API_SECRET");
//!     let client = KrakenClient::connect_private(Environment::Production, credentials).await?;
//!
//!     let mut order = AddOrder::new("XBT/USD", OrderSide::Buy, OrderType::Market, "0.0002");
//!     order.validate = Some(true); // dry run, nothing is booked
//!     let status = client.add_order(order).await?;
//!     println!("descr: {:?}", status.descr);
//!     Ok(())
//! }
//! ```
//!
//! # Streams and Backpressure
//!
//! Subscription streams are bounded channels with the capacity the caller
//! requested; the read path blocks on a full stream, so a slow consumer
//! exerts backpressure on its topic. The built-in heartbeat and
//! system-status channels are the one exception: they drop the oldest
//! entries instead, because nobody is required to listen to them.
//!
//! When the connection is lost, every live stream receives exactly one
//! `Err(Error::StreamInterrupted)` item; after the client reconnects and
//! resubscribes, events resume on the same stream. Callers holding
//! in-flight operations receive `Error::OperationInterrupted` — the
//! server outcome is indeterminate and must be reconciled out-of-band.
//!
//! # Logging
//!
//! This crate emits logs through the [`log`](https://docs.rs/log/) facade:
//! debug-level for operation flow, warn/error for dispatch and
//! reconnection anomalies. Configure any compatible logger in your binary.
//!
//! # Errors
//!
//! All fallible operations return [`Error`]. Server-side order rejections
//! carry the parsed response body ([`Error::order_response`]); partial
//! subscribe failures aggregate the per-pair reasons.
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod rest;

mod auth;
mod dispatch;
mod pending;
mod registry;
mod token;

// Re-export primary types for convenience.
pub use client::{EventStream, KrakenClient};
pub use config::{ClientConfig, EndpointConfig, Environment};
pub use engine::LifecycleEvent;
pub use errors::Error;
pub use models::*;
pub use rest::{Credentials, WebsocketToken};
