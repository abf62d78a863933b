//! Logging initialization for the entrypoint.
//!
//! Events are written as JSON lines to a size-capped operations log, so setup
//! failures can be inspected after the fact, and mirrored to stderr in
//! compact form where the sandbox runtime captures it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum operations log size (1 MiB).
const MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Operations log that keeps whole records until the cap is reached.
///
/// The file is opened in append mode and shared by every entrypoint started
/// in the container, including duplicates that exit at the port guard. The
/// cap covers the whole file. A record that would cross it is dropped along
/// with everything after it, so the file never ends in a partial JSON line.
struct OpsLog {
    file: File,
    written: u64,
    cap: u64,
    full: bool,
}

impl OpsLog {
    fn open(path: &Path, cap: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            file,
            written,
            cap,
            full: written >= cap,
        })
    }
}

impl Write for OpsLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.full && self.written + buf.len() as u64 > self.cap {
            self.full = true;
        }
        if self.full {
            return Ok(buf.len());
        }

        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` controls verbosity for both outputs (default `info`).
pub fn init(log_path: &str) -> anyhow::Result<()> {
    let ops_log = OpsLog::open(Path::new(log_path), MAX_LOG_BYTES)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(Mutex::new(ops_log)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr),
        )
        .try_init()?;

    Ok(())
}
