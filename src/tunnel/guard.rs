//! One-shot teardown guard shared by both directions of a tunnel.

use std::sync::OnceLock;
use tokio::sync::watch;

/// Which end of a tunnel an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Target => "target",
        }
    }
}

/// Why a tunnel was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The named side closed its write direction.
    Eof(Side),
    /// Reading from the named side failed.
    ReadError(Side),
    /// Writing to the named side failed.
    WriteError(Side),
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
}

impl CloseCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseCause::Eof(_) => "eof",
            CloseCause::ReadError(_) => "read_error",
            CloseCause::WriteError(_) => "write_error",
            CloseCause::IdleTimeout => "idle_timeout",
        }
    }
}

/// Fires at most once, no matter how many callers race on it.
///
/// The first `fire` records its cause and wakes everything waiting in
/// [`CloseGuard::fired`]; later calls return `false` and change nothing.
#[derive(Debug)]
pub struct CloseGuard {
    cause: OnceLock<CloseCause>,
    signal: watch::Sender<bool>,
}

impl CloseGuard {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            cause: OnceLock::new(),
            signal,
        }
    }

    /// Trigger teardown. Returns `true` only for the call that fired.
    pub fn fire(&self, cause: CloseCause) -> bool {
        if self.cause.set(cause).is_err() {
            return false;
        }
        self.signal.send_replace(true);
        true
    }

    /// The cause recorded by the firing call.
    pub fn cause(&self) -> Option<CloseCause> {
        self.cause.get().copied()
    }

    pub fn is_fired(&self) -> bool {
        self.cause.get().is_some()
    }

    /// Resolve once the guard has fired.
    pub async fn fired(&self) {
        let mut rx = self.signal.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CloseGuard {
    fn default() -> Self {
        Self::new()
    }
}
