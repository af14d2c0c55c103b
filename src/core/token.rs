use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared, one-way cancellation signal observed by every stage of a pipeline run
///
/// Cloning is cheap and every clone observes the same signal. Once cancelled
/// (explicitly or because the deadline elapsed) a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct Token {
    inner: CancellationToken,
    deadline: Option<Instant>,
}

impl Token {
    /// Create a token with no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is considered cancelled once `deadline` is reached
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Create a token that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Signal cancellation to every holder of this token and its children
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled or its deadline elapses
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.cancelled().await,
        }
    }

    /// Derive a token that is cancelled with this one but can also be cancelled alone
    pub fn child(&self) -> Token {
        Token {
            inner: self.inner.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Cancel `token` when the process receives SIGINT, SIGTERM or SIGHUP (Ctrl+C elsewhere)
///
/// The returned task also finishes if the token is cancelled by other means.
pub fn cancel_on_signal(token: &Token) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                match signal {
                    Ok(name) => debug!(signal = name, "Cancelling pipeline on signal"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Signal handler unavailable");
                        return;
                    }
                }
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => "SIGHUP",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
