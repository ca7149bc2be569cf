//! `tracing-subscriber` bootstrap. `RUST_LOG` overrides the default
//! filter; falls back to info for our own crates and warn for
//! `tower_http`'s per-request span noise.

pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "conductor_server=info,conductor_core=info,conductor_adapters=info,conductor_store=info,tower_http=warn"
            .into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
