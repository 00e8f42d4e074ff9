//! Tracing subscriber setup for host applications.
//!
//! The library only emits `tracing` events. Hosts without their own
//! subscriber call [`init_logging`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither an explicit filter nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "offline_queue=info";

/// Install a formatting subscriber.
///
/// `filter` takes `EnvFilter` directives; `None` falls back to `RUST_LOG`
/// and then [`DEFAULT_FILTER`]. Returns `false` if the directives are
/// invalid or a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(_) => return false,
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
