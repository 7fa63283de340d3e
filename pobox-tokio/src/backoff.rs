use std::{cmp::min, time::Duration};

/// An iterator of sleep [`Duration`]s doubling from `initial` up to `cap`.
///
/// Never ends and never overflows; once the cap is reached every subsequent
/// item equals the cap. Callers reset simply by creating a fresh iterator.
///
/// ```
/// let mut waits = pobox_tokio::backoff::capped_exponential(
///     std::time::Duration::from_millis(250),
///     std::time::Duration::from_secs(30),
/// );
/// assert_eq!(waits.next().unwrap().as_millis(), 250);
/// assert_eq!(waits.next().unwrap().as_millis(), 500);
/// ```
pub fn capped_exponential(
    initial: Duration,
    cap: Duration,
) -> impl Iterator<Item = Duration> {
    let initial_ms = initial.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    (0u32..).map(move |attempt| {
        let factor = 2u64.saturating_pow(attempt);
        let wait_ms = initial_ms.saturating_mul(factor);
        Duration::from_millis(min(wait_ms, cap_ms))
    })
}
