//! Minimal tracing setup for `blksum`: a stderr fmt layer plus an
//! `EnvFilter`, trimmed from the workspace's full `tvix-tracing` (no
//! otlp/opentelemetry, no progress-bar layer — `blksum` is a one-shot CLI
//! with nothing long-running to show progress for).

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

pub struct TracingBuilder {
    level: Level,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder {
            level: Level::INFO,
        }
    }
}

impl TracingBuilder {
    /// Set the default log level for the stderr layer. `RUST_LOG` still
    /// takes priority over this value.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Install a stderr fmt layer filtered by `RUST_LOG` (falling back to
    /// the configured level).
    pub fn build(self) -> Result<(), Error> {
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stderr)
                .compact()
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(self.level.into())
                        .from_env()
                        .expect("invalid RUST_LOG"),
                ),
        );
        subscriber.try_init()?;
        Ok(())
    }
}
