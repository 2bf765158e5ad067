//! Diagnostic log setup for the station binary.
//!
//! Records are formatted once and teed to a per-run file under the log
//! directory, to stderr, and optionally to a channel the presenter drains.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use crossbeam_channel::Sender;
use env_logger::{Env, Target};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Install the global logger. Returns the path of this run's log file.
pub fn init(log_dir: &Path, mirror: Option<Sender<String>>) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!(
        "inspection_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format(LOG_TIMESTAMP_FORMAT),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(TeeWriter::new(file, true, mirror))))
        .try_init()
        .map_err(|err| anyhow!("failed to install logger: {}", err))?;
    Ok(path)
}

/// Fan-out writer behind the logger.
pub(crate) struct TeeWriter {
    file: File,
    stderr: bool,
    mirror: Option<Sender<String>>,
    partial: Vec<u8>,
}

impl TeeWriter {
    pub(crate) fn new(file: File, stderr: bool, mirror: Option<Sender<String>>) -> Self {
        Self {
            file,
            stderr,
            mirror,
            partial: Vec::new(),
        }
    }

    fn forward_lines(&mut self) {
        let Some(mirror) = &self.mirror else {
            self.partial.clear();
            return;
        };
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            // A lagging presenter loses lines rather than stalling the caller.
            let _ = mirror.try_send(String::from_utf8_lossy(&line).trim_end().to_string());
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        if self.stderr {
            // Losing the console copy must not fail the file write.
            let _ = io::stderr().write_all(buf);
        }
        if self.mirror.is_some() {
            self.partial.extend_from_slice(buf);
            self.forward_lines();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.stderr {
            let _ = io::stderr().flush();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_writes_file_and_mirrors_whole_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.log");
        let (tx, rx) = crossbeam_channel::bounded(8);
        let mut tee = TeeWriter::new(File::create(&path)?, false, Some(tx));

        tee.write_all(b"first li")?;
        assert!(rx.try_recv().is_err());
        tee.write_all(b"ne\nsecond line\n")?;
        tee.flush()?;

        assert_eq!(rx.try_recv()?, "first line");
        assert_eq!(rx.try_recv()?, "second line");
        assert_eq!(fs::read_to_string(&path)?, "first line\nsecond line\n");
        Ok(())
    }

    #[test]
    fn full_mirror_does_not_block() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut tee = TeeWriter::new(File::create(dir.path().join("a.log"))?, false, Some(tx));
        tee.write_all(b"one\ntwo\nthree\n")?;
        assert_eq!(rx.len(), 1);
        Ok(())
    }
}
