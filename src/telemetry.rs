//! Logger construction.
//!
//! [`init`] builds one `tracing` subscriber from the observability settings
//! and hands it back as a [`Telemetry`] value instead of installing it as the
//! process-wide default. `main` runs the server under it with
//! [`WithSubscriber`](tracing::instrument::WithSubscriber), and the server
//! re-attaches it to every task and request future it spawns.
//!
//! Built once at startup, dropped at exit. The fmt writers are unbuffered, so
//! there is nothing to flush.

use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogLevel, ObservabilityConfig};

/// The service's logger.
#[derive(Clone, Debug)]
pub struct Telemetry {
    dispatch: Dispatch,
}

impl Telemetry {
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}

/// Builds the logger: JSON to stderr or text to stdout, filtered at the
/// configured level.
pub fn init(config: &ObservabilityConfig) -> Telemetry {
    let dispatch = match config.log_format {
        LogFormat::Json => build(config.log_level, LogFormat::Json, std::io::stderr),
        LogFormat::Text => build(config.log_level, LogFormat::Text, std::io::stdout),
    };
    Telemetry { dispatch }
}

fn build<W>(level: LogLevel, format: LogFormat, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(EnvFilter::new(level.as_str()));
    match format {
        LogFormat::Json => Dispatch::new(registry.with(fmt::layer().json().with_writer(writer))),
        LogFormat::Text => Dispatch::new(registry.with(fmt::layer().with_target(true).with_writer(writer))),
    }
}


#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use capture::Capture;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Sink {
        type Writer = Sink;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl Sink {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn level_filters_lower_severities() {
        let sink = Sink::default();
        let dispatch = build(LogLevel::Warn, LogFormat::Json, sink.clone());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("dropped");
            tracing::warn!(code = "CONFLICT", "kept");
        });

        let out = sink.text();
        assert!(!out.contains("dropped"));
        let record: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["fields"]["code"], "CONFLICT");
    }

    #[test]
    fn text_format_is_not_json() {
        let sink = Sink::default();
        let dispatch = build(LogLevel::Info, LogFormat::Text, sink.clone());

        tracing::dispatcher::with_default(&dispatch, || tracing::info!(trace_id = "abc123", "HTTP request"));

        let out = sink.text();
        assert!(out.contains("HTTP request"));
        assert!(out.contains("\"abc123\""));
        assert!(serde_json::from_str::<serde_json::Value>(out.trim()).is_err());
    }

    #[test]
    fn init_honours_the_configured_level() {
        let mut config = ObservabilityConfig::default();
        let info = init(&config);
        config.log_level = LogLevel::Debug;
        let debug = init(&config);

        assert!(!tracing::dispatcher::with_default(info.dispatch(), || tracing::enabled!(tracing::Level::DEBUG)));
        assert!(tracing::dispatcher::with_default(debug.dispatch(), || tracing::enabled!(tracing::Level::DEBUG)));
    }

    #[test]
    fn scoped_subscribers_do_not_leak() {
        let capture = Capture::default();

        tracing::dispatcher::with_default(&capture.subscriber(), || tracing::info!("scoped"));
        tracing::info!("outside");

        assert!(capture.find("scoped").is_some());
        assert!(capture.find("outside").is_none());
    }
}
