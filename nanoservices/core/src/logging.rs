use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtering by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with another default directive when `RUST_LOG` is unset,
/// e.g. `"fieldflow_core=debug"`.
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init_with_default("debug");
        tracing::info!("still logging");
    }
}
