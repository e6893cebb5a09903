//! 🧘 stretch: a search-cluster client whose party trick is bulk indexing.
//!
//! 📦 Documents go in one end, NDJSON `_bulk` bodies come out the other, and a
//! small pool of workers ships them while you get on with your life.
//!
//! 🧠 Knowledge graph:
//! - `bulk`: the concurrent indexing pipeline (encoder, accumulator, timer, dispatcher).
//! - `transport`: the HTTP door every request walks through.
//! - `cluster`: health, state, node stats.
//! - `search`: the filter/query DSL and `_search` requests.
//! - `app_config`: figment-loaded `AppConfig`.

pub mod app_config;
pub mod bulk;
pub mod cluster;
pub mod error;
pub mod search;
pub mod transport;

pub use error::{Result, StretchError};
