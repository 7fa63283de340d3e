//! Process-wide `tracing` setup, shared by the gamehost binary and the
//! crates' test suites. Library crates emit events and spans but never
//! install a subscriber; that decision belongs to whoever owns `main` (or
//! the test harness).

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Install the global logger for a service process: compact format on
/// stdout, INFO and up unless `RUST_LOG` (targets syntax) says otherwise.
///
/// Panics if a subscriber is already installed; a process calls this once,
/// first thing.
pub fn init() {
    install(rust_log_filter())
        .expect("a global logger was already installed");
}

/// Logger setup for tests: quiet unless `RUST_LOG` is set.
///
/// Safe to call from every test. Does nothing without `RUST_LOG` (or with
/// an unparseable one), and silently loses the race when parallel tests
/// all try to install at once.
///
/// ```bash
/// RUST_LOG=pobox_core=debug cargo test -p pobox-core
/// ```
pub fn init_for_testing() {
    let Ok(spec) = std::env::var("RUST_LOG") else {
        return;
    };
    let Ok(filter) = spec.parse::<Targets>() else {
        return;
    };
    let _ = install(filter);
}

/// `RUST_LOG` if it parses, INFO otherwise.
fn rust_log_filter() -> Targets {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|spec| spec.parse().ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO))
}

fn install(filter: Targets) -> Result<(), TryInitError> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_layer).try_init()
}
