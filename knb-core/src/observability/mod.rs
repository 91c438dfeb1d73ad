//! Observability infrastructure: tracing and metrics.
//!
//! The logger is built explicitly from a [`LogDestination`] and handed back as
//! a [`Dispatch`]; only the binary decides to install it process-wide.

use std::fs::File;
use std::io;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

pub mod metrics;

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    /// Session log file only (quiet mode).
    File,
    /// Session log file and stdout.
    FileAndConsole,
}

impl LogDestination {
    pub fn from_quiet(quiet: bool) -> Self {
        if quiet {
            Self::File
        } else {
            Self::FileAndConsole
        }
    }
}

/// Build a logger writing to `log_file` and, depending on `destination`, stdout.
///
/// The filter defaults to `info` and honours `RUST_LOG`.
pub fn build<W>(destination: LogDestination, log_file: W) -> Dispatch
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer =
        tracing_subscriber::fmt::layer().with_ansi(false).with_target(true).with_writer(log_file);
    let console_layer = match destination {
        LogDestination::File => None,
        LogDestination::FileAndConsole => {
            Some(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stdout))
        }
    };

    let subscriber =
        tracing_subscriber::registry().with(filter).with(file_layer).with(console_layer);
    Dispatch::new(subscriber)
}

/// Build the logger for a session log file and install it for the process.
///
/// Must be called once at startup, before any other operation logs.
pub fn init(destination: LogDestination, log_file: File) -> Result<(), Box<dyn std::error::Error>> {
    let dispatch = build(destination, Mutex::new(log_file));
    tracing::dispatcher::set_global_default(dispatch)?;
    metrics::register_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_quiet_flag_maps_to_destination() {
        assert_eq!(LogDestination::from_quiet(true), LogDestination::File);
        assert_eq!(LogDestination::from_quiet(false), LogDestination::FileAndConsole);
    }

    #[test]
    fn test_records_reach_log_file() {
        let captured = Captured::default();
        let dispatch = build(LogDestination::File, captured.clone());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("started collection on monitor {}", "node-a");
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("started collection on monitor node-a"));
    }
}
