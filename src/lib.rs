//! Crypto/fiat exchange-rate gateway: read endpoints over a rate store and a
//! job that appends fresh snapshots from a price API.

pub mod app;
pub mod appstate;
pub mod config;
pub mod currency;
pub mod db;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod logging;
pub mod memory;
pub mod price_api;
pub mod prometheus;
pub mod rates;
pub mod refresh;
pub mod route;
pub mod store;

pub use error::{AppError, Result};
