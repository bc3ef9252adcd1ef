//! Log sinks. Nothing here installs a global subscriber: callers get a
//! [`Dispatch`] and hand it to whatever runs the load, so each run (and each test)
//! can log somewhere of its own.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::Dispatch;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter, MakeWriter},
    layer::SubscriberExt,
    EnvFilter,
};

use crate::config::schema::Logging;

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, one event per line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

// RUST_LOG wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Build the dispatch described by the `[logging]` section: stderr, or a log file
/// opened in append mode.
pub fn build_dispatch(config: &Logging) -> io::Result<Dispatch> {
    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(dispatch_with_writer(
                config,
                BoxMakeWriter::new(Arc::new(file)),
                false,
            ))
        }
        None => Ok(dispatch_with_writer(
            config,
            BoxMakeWriter::new(io::stderr),
            true,
        )),
    }
}

pub fn dispatch_with_writer<W>(config: &Logging, writer: W, ansi: bool) -> Dispatch
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(env_filter(&config.level));

    match config.format {
        LogFormat::Json => Dispatch::new(
            registry.with(fmt::layer().json().with_writer(writer).with_ansi(false)),
        ),
        LogFormat::Pretty => {
            Dispatch::new(registry.with(fmt::layer().with_writer(writer).with_ansi(ansi)))
        }
    }
}

/// An in-memory sink. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// A dispatch that logs everything at `level` and above into this buffer.
    pub fn dispatch(&self, level: &str) -> Dispatch {
        let registry = tracing_subscriber::registry().with(EnvFilter::new(level));
        Dispatch::new(
            registry.with(
                fmt::layer()
                    .with_writer(self.clone())
                    .with_ansi(false)
                    .without_time(),
            ),
        )
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
