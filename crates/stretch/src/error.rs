//! 💀 Errors: the many ways a document can fail to become searchable.
//!
//! 📦 One enum for the whole library surface. Callers match on it, the CLI wraps
//! it in `anyhow` and adds context, and the bulk workers count it and move on.
//! Nobody panics. Panicking is for people who have given up, and we are merely tired. 🦆

use thiserror::Error;

/// 💀 Everything that can go sideways inside `stretch`.
#[derive(Error, Debug)]
pub enum StretchError {
    /// 📦 The payload refused to become JSON. Nothing was buffered.
    #[error("💀 failed to encode document payload: {0}")]
    Encoding(#[source] serde_json::Error),

    /// 📡 The request never got a response worth reading (connect, timeout, TLS, ...).
    #[error("💀 transport failure: {0}")]
    Transport(String),

    /// 📡 The server answered, just not with good news.
    #[error("💀 HTTP {status} from the cluster: {body}")]
    Http { status: u16, body: String },

    /// 🔍 Bytes came back, but not in a shape we understand.
    #[error("💀 failed to decode response: {0}")]
    Decode(String),

    /// 🔧 The tunables do not make sense together.
    #[error("💀 invalid configuration: {0}")]
    Config(String),

    /// 🚪 The intake queue is closed; the indexer is shutting down or stopped.
    #[error("💀 bulk pipeline is closed, no more documents accepted")]
    PipelineClosed,

    /// 🔁 `start()` was called on an indexer that is already running.
    #[error("💀 bulk indexer was already started")]
    AlreadyStarted,
}

/// 🎯 Result alias for everything in this crate.
pub type Result<T> = std::result::Result<T, StretchError>;

impl StretchError {
    /// 📡 True when the failure happened on the wire (as opposed to our own bad input).
    pub fn is_transport(&self) -> bool {
        matches!(self, StretchError::Transport(_) | StretchError::Http { .. })
    }
}

impl From<reqwest::Error> for StretchError {
    fn from(err: reqwest::Error) -> Self {
        // -- 🧅 reqwest's Display hides the interesting part in the source chain
        let mut message = err.to_string();
        let mut cause = std::error::Error::source(&err);
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        StretchError::Transport(message)
    }
}
