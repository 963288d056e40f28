//! Waiting for asynchronous config exports.
//!
//! The sandbox reports how much virtual time a promise needs before it settles. Here that
//! becomes a real timer bounded by the caller's timeout, so a config that never settles fails
//! with a timeout instead of hanging the caller.

use std::{future, path::Path, time::Duration};

use log::{debug, trace};
use tokio::{runtime, time};

use crate::{
    error::{ResolutionError, Result},
    types::ResolvedConfig,
};

/// Outcome of evaluating a config export, before any waiting.
#[derive(Debug)]
pub enum AsyncState {
    /// Settled without suspending: object exports, sync functions, already settled promises.
    Ready(Result<ResolvedConfig>),
    /// Settles once `after` has elapsed.
    Pending { after: Duration, outcome: Result<ResolvedConfig> },
    /// Nothing will ever settle it.
    Never,
}

impl AsyncState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AsyncState::Ready(_))
    }
}

/// Wait for `state` to settle, giving up after `timeout`.
pub async fn settle(path: &Path, state: AsyncState, timeout: Duration) -> Result<ResolvedConfig> {
    match state {
        AsyncState::Ready(outcome) => outcome,
        AsyncState::Pending { after, outcome } => {
            trace!("Waiting {:?} for {} to settle", after, path.display());
            match time::timeout(timeout, time::sleep(after)).await {
                Ok(()) => outcome,
                Err(_) => Err(timed_out(path, timeout)),
            }
        }
        AsyncState::Never => {
            debug!("{} returned a promise that never settles", path.display());
            let _elapsed = time::timeout(timeout, future::pending::<()>()).await;
            Err(timed_out(path, timeout))
        }
    }
}

/// Blocking form of [`settle`]. A runtime is only started when there is something to wait for.
///
/// Must not be called from inside a tokio runtime; use [`settle`] there.
pub fn settle_blocking(
    path: &Path,
    state: AsyncState,
    timeout: Duration,
) -> Result<ResolvedConfig> {
    if let AsyncState::Ready(outcome) = state {
        return outcome;
    }
    let rt = runtime::Builder::new_current_thread().enable_time().build().map_err(|e| {
        ResolutionError::ConfigResolutionError {
            path: path.to_path_buf(),
            message: format!("could not start async runtime: {}", e),
        }
    })?;
    rt.block_on(settle(path, state, timeout))
}

fn timed_out(path: &Path, timeout: Duration) -> ResolutionError {
    ResolutionError::ConfigResolutionTimeout { path: path.to_path_buf(), timeout }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::PathBuf, time::Instant};

    fn config() -> ResolvedConfig {
        let mut resolved = ResolvedConfig::default();
        resolved.values.insert("distDir".to_string(), serde_json::json!("build"));
        resolved
    }

    #[test]
    fn test_ready_needs_no_runtime() {
        let path = PathBuf::from("next.config.js");
        let result = settle_blocking(&path, AsyncState::Ready(Ok(config())), Duration::ZERO);
        assert_eq!(result.unwrap(), config());
    }

    #[test]
    fn test_pending_waits_for_delay() {
        let path = PathBuf::from("next.config.js");
        let start = Instant::now();
        let state = AsyncState::Pending { after: Duration::from_millis(30), outcome: Ok(config()) };
        let result = settle_blocking(&path, state, Duration::from_secs(5));
        assert_eq!(result.unwrap(), config());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_pending_longer_than_timeout_times_out() {
        let path = PathBuf::from("next.config.js");
        let state = AsyncState::Pending { after: Duration::from_secs(60), outcome: Ok(config()) };
        let err = settle_blocking(&path, state, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), "config_resolution_timeout");
    }

    #[tokio::test]
    async fn test_never_times_out() {
        let path = PathBuf::from("next.config.js");
        let start = Instant::now();
        let err = settle(&path, AsyncState::Never, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ResolutionError::ConfigResolutionTimeout { timeout, .. } if timeout == Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pending_rejection_is_returned_after_delay() {
        let path = PathBuf::from("next.config.js");
        let outcome = Err(ResolutionError::ConfigResolutionError {
            path: path.clone(),
            message: "rejected with 'nope'".to_string(),
        });
        let state = AsyncState::Pending { after: Duration::from_millis(5), outcome };
        let err = settle(&path, state, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), "config_resolution_error");
    }
}
