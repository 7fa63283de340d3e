use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};

use crate::shutdown::ShutdownSignal;

/// Errors surfaced while joining a service's long-lived tasks.
#[derive(Debug, Error)]
pub enum JoinTasksError {
    /// A task which should have run for the process lifetime returned early.
    #[error("long-lived task '{name}' finished prematurely")]
    PrematureFinish { name: Cow<'static, str> },
    /// Some tasks did not finish before the shutdown deadline.
    #[error("tasks still running at the shutdown deadline: {stuck:?}")]
    Stuck { stuck: Vec<String> },
}

/// A [`JoinHandle`] with a name attached, which:
///
/// (1) propagates panics from the spawned task instead of swallowing them
///     into a [`JoinError`], and
/// (2) is `#[must_use]`, so every spawn site either joins the handle or
///     states explicitly (via [`detach`]) that nobody will.
///
/// The current [`tracing::Span`] is carried across the spawn boundary, so
/// logs inside the task keep their context.
///
/// [`detach`]: NamedTask::detach
#[must_use]
pub struct NamedTask<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> NamedTask<T> {
    /// Spawn `future` onto the current runtime under `name`.
    pub fn spawn<F>(
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> NamedTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        debug!("spawning task: {name}");
        let span = tracing::Span::current();
        Self {
            handle: tokio::spawn(future.instrument(span)),
            name,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    #[inline]
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Drop the handle and let the task run unsupervised. Spelled out as a
    /// method so callsites read as a decision rather than an accident.
    #[inline]
    pub fn detach(self) {
        drop(self)
    }

    /// Wrap so the future's output carries the task name alongside the
    /// result, for join loops that report per-task outcomes.
    fn with_name(self) -> NamedOutput<T> {
        NamedOutput(self)
    }
}

impl<T> Future for NamedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let result = match result {
            Ok(value) => Ok(value),
            Err(join_err) => match join_err.try_into_panic() {
                Ok(panic_reason) => {
                    error!("task '{name}' panicked", name = self.name);
                    std::panic::resume_unwind(panic_reason)
                }
                Err(join_err) => Err(join_err),
            },
        };

        Poll::Ready(result)
    }
}

/// [`NamedTask`] whose output is `(name, join result)`.
struct NamedOutput<T>(NamedTask<T>);

impl<T> NamedOutput<T> {
    fn name(&self) -> &str {
        self.0.name()
    }
}

impl<T> Future for NamedOutput<T> {
    type Output = (Cow<'static, str>, Result<T, JoinError>);

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| (self.0.name.clone(), result))
    }
}

/// Run a service's long-lived tasks to completion.
///
/// Every task passed here is expected to run until `shutdown` fires; a task
/// returning earlier is treated as a partial failure, triggers a shutdown of
/// its siblings, and is reported as [`JoinTasksError::PrematureFinish`].
/// After the signal, all tasks get `shutdown_timeout` to wind down before
/// the stragglers are reported as [`JoinTasksError::Stuck`].
pub async fn join_all_with_shutdown(
    tasks: Vec<NamedTask<()>>,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
) -> Result<(), JoinTasksError> {
    if tasks.is_empty() {
        shutdown.recv().await;
        return Ok(());
    }

    let mut running = tasks
        .into_iter()
        .map(NamedTask::with_name)
        .collect::<FuturesUnordered<_>>();

    let mut outcome = Ok(());

    tokio::select! {
        // Prefer observing the shutdown signal over a simultaneous finish.
        biased;
        () = shutdown.recv() => (),
        Some((name, _result)) = running.next() => {
            outcome = Err(JoinTasksError::PrematureFinish { name });
            shutdown.send();
        }
    }

    let deadline = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(deadline);

    while !running.is_empty() {
        tokio::select! {
            Some((name, result)) = running.next() => match result {
                Ok(()) => info!("task '{name}' finished"),
                Err(e) => warn!("task '{name}' did not finish cleanly: {e}"),
            },
            () = &mut deadline => {
                let stuck = running
                    .iter()
                    .map(|task| task.name().to_owned())
                    .collect::<Vec<_>>();
                return Err(JoinTasksError::Stuck { stuck });
            }
        }
    }

    outcome
}
