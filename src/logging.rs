//! Tracing setup shared by all three binaries.
//!
//! Logs go to stderr so that stdout stays reserved for JSON output. Outside
//! of dev mode the filter only lets warnings from this crate and errors from
//! dependencies through; `RUST_LOG` overrides both modes.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(dev: bool) -> &'static str {
    if dev {
        "info,defra_tools=debug,defra_kv=debug,defra_relay=debug,defra_rag=debug"
    } else {
        "error,defra_tools=warn,defra_tools::rag=info,defra_kv=warn,defra_relay=info,defra_rag=info"
    }
}

/// Installs the global subscriber. Calling it twice is harmless.
pub fn init_tracing(dev: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(dev)));
    let fmt_layer = fmt::layer()
        .with_target(dev)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for dev in [true, false] {
            EnvFilter::try_new(default_directives(dev)).unwrap();
        }
    }

    #[test]
    fn test_quiet_mode_silences_dependencies() {
        assert!(default_directives(false).starts_with("error,"));
        assert!(default_directives(true).contains("defra_tools=debug"));
    }
}
