//! Byte relay between a client and a dialed target.
//!
//! Two pumps run concurrently, one per direction. A pump stops on EOF, on a
//! read or write error, or when nothing has moved in either direction for
//! the idle timeout. The first pump to stop fires the session's
//! [`CloseGuard`], which makes the other pump stop too; once both are done
//! both streams are shut down and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::tunnel::guard::{CloseCause, CloseGuard, Side};

const RELAY_BUFFER_SIZE: usize = 32 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Result of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes read from the client and written to the target.
    pub client_to_target: u64,
    /// Bytes read from the target and written to the client.
    pub target_to_client: u64,
    /// What fired the close guard.
    pub cause: CloseCause,
}

/// Last time any byte crossed the tunnel, as an offset from session start.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        self.start
            .elapsed()
            .saturating_sub(Duration::from_millis(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// One CONNECT tunnel: the hijacked client stream and its dialed target.
///
/// The target stream is owned by this session alone and is closed when the
/// relay finishes.
pub struct TunnelSession<C, T> {
    client: C,
    target: T,
    idle_timeout: Duration,
    guard: CloseGuard,
}

impl<C, T> TunnelSession<C, T>
where
    C: AsyncRead + AsyncWrite + Send,
    T: AsyncRead + AsyncWrite + Send,
{
    pub fn new(client: C, target: T, idle_timeout: Duration) -> Self {
        Self {
            client,
            target,
            idle_timeout,
            guard: CloseGuard::new(),
        }
    }

    /// Copy bytes both ways until the guard fires, then close both sides.
    pub async fn relay(self) -> RelayStats {
        let TunnelSession {
            client,
            target,
            idle_timeout,
            guard,
        } = self;
        let activity = Activity::new();

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut target_read, mut target_write) = tokio::io::split(target);

        let ((client_to_target, _), (target_to_client, _)) = tokio::join!(
            pump(
                &mut client_read,
                &mut target_write,
                Side::Client,
                idle_timeout,
                &activity,
                &guard
            ),
            pump(
                &mut target_read,
                &mut client_write,
                Side::Target,
                idle_timeout,
                &activity,
                &guard
            ),
        );

        // Both halves of each stream drop here, closing the sockets.
        RelayStats {
            client_to_target,
            target_to_client,
            cause: guard.cause().unwrap_or(CloseCause::IdleTimeout),
        }
    }
}

/// Copy `from` into `to` until this direction ends or the guard fires.
async fn pump<R, W>(
    from: &mut R,
    to: &mut W,
    source: Side,
    idle_timeout: Duration,
    activity: &Activity,
    guard: &CloseGuard,
) -> (u64, Option<CloseCause>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let destination = match source {
        Side::Client => Side::Target,
        Side::Target => Side::Client,
    };
    let mut copied = 0u64;
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    let copy = async {
        loop {
            let read = loop {
                let remaining = idle_timeout.saturating_sub(activity.idle_for());
                if remaining.is_zero() {
                    return CloseCause::IdleTimeout;
                }
                if let Ok(result) = tokio::time::timeout(remaining, from.read(&mut buf)).await {
                    break result;
                }
            };

            let n = match read {
                Ok(0) => return CloseCause::Eof(source),
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(side = source.as_str(), error = %e, "Tunnel read failed");
                    return CloseCause::ReadError(source);
                }
            };
            activity.touch();

            if let Err(e) = to.write_all(&buf[..n]).await {
                tracing::debug!(side = destination.as_str(), error = %e, "Tunnel write failed");
                return CloseCause::WriteError(destination);
            }
            copied += n as u64;
        }
    };

    let ended = tokio::select! {
        cause = copy => Some(cause),
        _ = guard.fired() => None,
    };

    if let Some(cause) = ended {
        if guard.fire(cause) {
            tracing::debug!(cause = cause.as_str(), side = source.as_str(), "Tunnel closing");
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, to.shutdown()).await;
    (copied, ended)
}
