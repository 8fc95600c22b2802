//! Binance exchange feed.

pub mod ws;
