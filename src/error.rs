use std::io;
use thiserror::Error;

/// Errors surfaced by the trace engine.
///
/// Receive timeouts and foreign (non-matching) frames are not errors: they
/// produce an empty `HopResult` and the scan continues.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Unparseable duration, impossible flag combination, bad packet size.
    #[error("config error: {0}")]
    Config(String),

    /// The target has no A/AAAA record matching the selected family.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Socket creation or bind rejected, typically missing privilege.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// Transient syscall failure during probe transmit.
    #[error("send error: {0}")]
    Send(#[source] io::Error),

    /// PTR or whois lookup failure. Swallowed by callers; enrichment is
    /// best-effort.
    #[error("enrichment error: {0}")]
    Enrichment(String),
}

impl TraceError {
    pub fn config(msg: impl Into<String>) -> Self {
        TraceError::Config(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        TraceError::Resolution(msg.into())
    }
}
