//! CoinGecko upstream access: key management, request building, retrying
//! execution and pagination.

pub mod client;
pub mod keys;
pub mod paginated;
pub mod params;
pub mod request;

pub use client::{CoinGeckoClient, HttpTransport, ReqwestTransport, RetryConfig, RetryingClient};
pub use keys::{ApiKey, KeyKind, KeyManager};
pub use request::RequestBuilder;
