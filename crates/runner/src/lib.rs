//! Process runner for long-lived service loops.
//!
//! Named app processes run concurrently on a shared `CancellationToken`.
//! SIGINT, SIGTERM, or any process finishing first cancels the rest; closers
//! then run under a timeout and the process exits (code 1 if a process failed).
//!
//! ```no_run
//! use smsgate_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => tracing::info!("tick"),
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BoxedResultFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// An app process: receives the shared cancellation token
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// A cleanup action run after every process has stopped
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process-{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Add a process identified by `name` in lifecycle logs
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Closers run concurrently; a failing closer does not stop the others.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share an externally owned token, e.g. one already handed to components
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run to completion and exit the process
    pub async fn run(self) {
        match self.run_until_stopped().await {
            Ok(()) => {
                tracing::info!("Application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Run processes until cancelled or one of them stops, then run the
    /// closers. Returns the first process error, if any.
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            tracing::info!(process = %name, "starting app process");
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        spawn_signal_handlers(token.clone());

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    if token.is_cancelled() {
                        tracing::debug!(process = %name, "app process stopped");
                    } else {
                        tracing::warn!(process = %name, "app process exited, shutting down");
                    }
                }
                Ok((name, Err(err))) => {
                    if token.is_cancelled() {
                        tracing::warn!(process = %name, "app process failed during shutdown: {:#}", err);
                    } else {
                        tracing::error!(process = %name, "app process failed: {:#}", err);
                        first_error = Some(err.context(format!("process {name} failed")));
                    }
                }
                Err(err) => {
                    tracing::error!("app process panicked: {}", err);
                    if first_error.is_none() && !token.is_cancelled() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {err}"));
                    }
                }
            }

            token.cancel();
        }

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c_token.cancelled() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::info!("Received shutdown signal");
                    ctrl_c_token.cancel();
                }
                Err(err) => tracing::error!("Error setting up signal handler: {}", err),
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!("Error setting up SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
                token.cancel();
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok(Ok(())) => tracing::debug!("Closer completed successfully"),
            Ok(Err(err)) => tracing::error!("Closer error: {:#}", err),
            Err(err) => tracing::error!("Closer panicked: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let flag = closer_called.clone();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = Runner::new()
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token)
            .run_until_stopped()
            .await;

        assert!(result.is_ok());
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_others() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();

        let result = Runner::new()
            .with_named_process("healthy", move |ctx| async move {
                ctx.cancelled().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_named_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("session lost"))
            })
            .run_until_stopped()
            .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("session lost"));
        assert!(format!("{err:#}").contains("broken"));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_early_exit_triggers_shutdown_without_error() {
        let result = Runner::new()
            .with_app_process(|_ctx| async move { Ok(()) })
            .with_app_process(|ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .run_until_stopped()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_closer_timeout_does_not_hang() {
        let result = Runner::new()
            .with_app_process(|_ctx| async move { Ok(()) })
            .with_closer(|| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .with_closer_timeout(Duration::from_millis(20))
            .run_until_stopped()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failing_closer_does_not_block_others() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        Runner::new()
            .with_app_process(|_ctx| async move { Ok(()) })
            .with_closer(|| async move { Err(anyhow::anyhow!("flush failed")) })
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .run_until_stopped()
            .await
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
    }
}
