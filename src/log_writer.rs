//! The trajectory recorder: a [Component] that appends records to a log
//! on its own thread.

use crate::component::{Component, ComponentError};
use crate::record_format::Value;
use crate::trajectory_log::{LogError, LogHeader, TrajectoryWriter};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes batches of records to a trajectory log. Each batch is flushed
/// after it is written, so a crash loses at most the batch in flight.
pub struct LogWriter<W: Write = BufWriter<File>> {
    writer: Option<TrajectoryWriter<W>>,
}

impl LogWriter<BufWriter<File>> {
    /// Create the log file at `path` and write its header.
    pub fn create<P: AsRef<Path>>(path: P, header: &LogHeader) -> Result<Self, LogError> {
        let file = File::create(path).map_err(LogError::IoError)?;
        Self::new(BufWriter::new(file), header)
    }
}

impl<W: Write> LogWriter<W> {
    /// Write the header to `out` and get ready for records.
    pub fn new(out: W, header: &LogHeader) -> Result<Self, LogError> {
        let writer = TrajectoryWriter::create(out, &header.columns, header.format.clone())?;
        Ok(Self {
            writer: Some(writer),
        })
    }

    /// Give back the underlying writer, if the log was not finalized.
    pub fn into_inner(self) -> Option<W> {
        self.writer.map(TrajectoryWriter::into_inner)
    }
}

impl<W: Write> Component for LogWriter<W> {
    type InData = Vec<Vec<Value>>;
    type OutData = Result<usize, LogError>;

    /// Appends a batch of records and flushes. Returns the number of
    /// records written so far.
    fn convert(&mut self, input: Vec<Vec<Value>>) -> Result<usize, LogError> {
        let writer = self.writer.as_mut().ok_or(LogError::MissingHeader)?;
        for record in &input {
            writer.append_record(record)?;
        }
        writer.flush()?;
        Ok(writer.records_written())
    }

    /// Flushes and closes the log. Finalizing twice is a no-op.
    fn finalize(&mut self) -> Result<(), ComponentError> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<W: Write> std::fmt::Display for LogWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "LogWriter")
    }
}
