use tokio::sync::watch;

/// A sticky one-shot signal for coordinating graceful shutdown.
///
/// Built on a [`watch`] channel whose value flips from `false` to `true`
/// exactly once. Because [`watch`] keeps the latest value, the signal is
/// sticky: a task that starts waiting after [`send`] has already happened
/// still observes it, and a handle cloned after the fact reports
/// [`fired`] immediately. Any clone may send; sending repeatedly is a
/// no-op.
///
/// Each call to [`recv`] subscribes a fresh [`watch::Receiver`], so the
/// signal itself stays shareable behind `&self` and can be awaited from
/// any number of tasks concurrently.
///
/// [`send`]: ShutdownSignal::send
/// [`recv`]: ShutdownSignal::recv
/// [`fired`]: ShutdownSignal::fired
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    fired: watch::Sender<bool>,
}

impl ShutdownSignal {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (fired, _rx) = watch::channel(false);
        Self { fired }
    }

    /// Fire the signal. All current and future [`recv`](Self::recv) calls
    /// complete; repeat sends change nothing.
    pub fn send(&self) {
        self.fired.send_replace(true);
    }

    /// Wait until the signal fires. Returns immediately if it already
    /// has.
    pub async fn recv(&self) {
        let mut rx = self.fired.subscribe();
        // Checks the current value before parking, so a signal sent
        // before this call is seen without a wakeup. The channel cannot
        // close while `self` holds the sender.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Whether the signal has fired, without waiting.
    pub fn fired(&self) -> bool {
        *self.fired.borrow()
    }
}
