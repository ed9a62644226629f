use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use chrono::Datelike;
use tracing_subscriber::fmt::MakeWriter;

/// Append-only error log partitioned by calendar year.
///
/// The target file is resolved per event, so a long-running process rolls
/// over to the new year's file without a restart.
#[derive(Debug, Clone)]
pub struct YearlyErrorLog {
    dir: PathBuf,
}

impl YearlyErrorLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("errors-{year}.log"))
    }

    fn open(&self) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(chrono::Local::now().year()))
    }
}

/// Writer handed out per event. Falls back to a sink when the file cannot
/// be opened; there is nowhere left to report that failure.
pub enum ErrorLogWriter {
    File(File),
    Unavailable,
}

impl Write for ErrorLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ErrorLogWriter::File(file) => file.write(buf),
            ErrorLogWriter::Unavailable => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ErrorLogWriter::File(file) => file.flush(),
            ErrorLogWriter::Unavailable => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for YearlyErrorLog {
    type Writer = ErrorLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match self.open() {
            Ok(file) => ErrorLogWriter::File(file),
            Err(_) => ErrorLogWriter::Unavailable,
        }
    }
}
