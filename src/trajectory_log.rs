//! This module reads and writes trajectory logs, the binary recordings a
//! session makes of every body's pose and joint positions. A log has the
//! following structure:
//!
//! - Two lines of text, each terminated by `\n`:
//!   - the comma-separated column names, e.g. `t,id,x,y,z,qx,qy,qz,qw`
//!   - a format string describing one record, see [crate::record_format]
//! - Then the records, each one followed by the two byte sentinel
//!   `0xAA 0xBB`.
//!
//! ```text
//! t,id,x,y,z,qx,qy,qz,qw
//! dddddddd
//! <64 bytes> AA BB <64 bytes> AA BB ...
//! ```
//!
//! Reading splits the body on the sentinel and keeps only the chunks that
//! are exactly one record long. The sentinel is not escaped, so a record
//! whose own bytes contain `AA BB` is split in two and both halves are
//! dropped. The number of dropped chunks is reported by
//! [TrajectoryLog::dropped_chunks].

use crate::record_format::{FieldKind, FormatError, RecordFormat, Value};

use log::debug;
use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::Path,
};

/// Marker written after every record.
pub const SENTINEL: [u8; 2] = [0xAA, 0xBB];

/// Column names and record format declared at the top of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    /// Names of the columns, in record order.
    pub columns: Vec<String>,
    /// Layout of one record.
    pub format: RecordFormat,
}

/// Everything that can go wrong while reading or writing a log.
#[derive(Debug)]
pub enum LogError {
    /// The stream ended before both header lines were read.
    MissingHeader,

    /// The format line could not be parsed, or a record did not fit it.
    Format(FormatError),

    /// Returned when io fails when reading or writing files.
    IoError(std::io::Error),

    /// A record does not have the column layout a [TrajectoryRecord] needs.
    Layout(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use LogError as LE;
        let msg = match self {
            LE::MissingHeader => Cow::from("log has no header"),
            LE::Format(error) => Cow::from(format!("format error: {}", error)),
            LE::IoError(error) => Cow::from(format!("io error: {}", error)),
            LE::Layout(what) => Cow::from(format!("not a trajectory record: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for LogError {}

impl From<FormatError> for LogError {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

/// Write the two header lines.
pub fn write_header(
    out: &mut impl Write,
    columns: &[impl AsRef<str>],
    format: &RecordFormat,
) -> Result<(), LogError> {
    let names: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    let header = format!("{}\n{}\n", names.join(","), format.spec());
    out.write_all(header.as_bytes()).map_err(LogError::IoError)
}

/// Read the two header lines, leaving `input` at the first record byte.
pub fn read_header(input: &mut impl BufRead) -> Result<LogHeader, LogError> {
    let mut keys = String::new();
    let mut spec = String::new();

    if input.read_line(&mut keys).map_err(LogError::IoError)? == 0 {
        return Err(LogError::MissingHeader);
    }
    if input.read_line(&mut spec).map_err(LogError::IoError)? == 0 {
        return Err(LogError::MissingHeader);
    }

    let columns = keys
        .trim_end_matches('\n')
        .split(',')
        .map(str::to_owned)
        .collect();
    let format = spec.trim_end_matches('\n').parse()?;

    Ok(LogHeader { columns, format })
}

/// Read every record left in `input`. Returns the records together with
/// the number of chunks that were dropped for having the wrong length.
pub fn read_all(
    input: &mut impl Read,
    format: &RecordFormat,
) -> Result<(Vec<Vec<Value>>, usize), LogError> {
    let mut body = Vec::new();
    input.read_to_end(&mut body).map_err(LogError::IoError)?;

    let size = format.size();
    let mut dropped = 0;
    let mut records = Vec::new();

    for chunk in split_on_sentinel(&body) {
        if chunk.len() == size {
            records.push(format.decode(chunk)?);
        } else if !chunk.is_empty() {
            dropped += 1;
        }
    }

    if dropped > 0 {
        debug!(
            "dropped {} chunk(s) that were not {} bytes long",
            dropped, size
        );
    }

    Ok((records, dropped))
}

/// Split on every non-overlapping occurrence of [SENTINEL], scanning left
/// to right. Empty chunks are kept, the caller filters on length.
fn split_on_sentinel(body: &[u8]) -> Vec<&[u8]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 1 < body.len() {
        if body[i] == SENTINEL[0] && body[i + 1] == SENTINEL[1] {
            chunks.push(&body[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    chunks.push(&body[start..]);

    chunks
}

/// Appends records to a log whose header has already been written.
#[derive(Debug)]
pub struct TrajectoryWriter<W: Write> {
    out: W,
    format: RecordFormat,
    written: usize,
}

impl<W: Write> TrajectoryWriter<W> {
    /// Write the header to `out` and return a writer ready for records.
    pub fn create(
        mut out: W,
        columns: &[impl AsRef<str>],
        format: RecordFormat,
    ) -> Result<Self, LogError> {
        write_header(&mut out, columns, &format)?;
        Ok(Self {
            out,
            format,
            written: 0,
        })
    }

    /// Encode `values` with the header's format and append it, followed by
    /// the sentinel.
    pub fn append_record(&mut self, values: &[Value]) -> Result<(), LogError> {
        let bytes = self.format.encode(values)?;
        self.out.write_all(&bytes).map_err(LogError::IoError)?;
        self.out.write_all(&SENTINEL).map_err(LogError::IoError)?;
        self.written += 1;
        Ok(())
    }

    /// Number of records appended so far.
    pub fn records_written(&self) -> usize {
        self.written
    }

    /// Layout every appended record must follow.
    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), LogError> {
        self.out.flush().map_err(LogError::IoError)
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// A whole log, read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryLog {
    header: LogHeader,
    records: Vec<Vec<Value>>,
    dropped: usize,
}

impl TrajectoryLog {
    /// Read a [TrajectoryLog] from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let mut handle = File::open(path).map_err(LogError::IoError)?;
        Self::from_file(&mut handle)
    }

    /// Read a [TrajectoryLog] from the [Read]able object provided.
    pub fn from_file(file: &mut impl Read) -> Result<Self, LogError> {
        let mut reader = BufReader::new(file);
        let header = read_header(&mut reader)?;
        let (records, dropped) = read_all(&mut reader, &header.format)?;

        Ok(TrajectoryLog {
            header,
            records,
            dropped,
        })
    }

    /// Write the header and every record to the [Write]able object provided.
    pub fn to_file(&self, file: &mut impl Write) -> Result<(), LogError> {
        let mut writer =
            TrajectoryWriter::create(file, &self.header.columns, self.header.format.clone())?;
        for record in &self.records {
            writer.append_record(record)?;
        }
        writer.flush()
    }

    /// Column names and format.
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Records in file order.
    pub fn records(&self) -> &[Vec<Value>] {
        &self.records
    }

    /// How many chunks between sentinels were not one record long.
    pub fn dropped_chunks(&self) -> usize {
        self.dropped
    }

    /// Interpret every record with the recorder's column layout.
    pub fn trajectory_records(&self) -> Result<Vec<TrajectoryRecord>, LogError> {
        self.records
            .iter()
            .map(|r| TrajectoryRecord::from_values(r))
            .collect()
    }
}

/// One body at one tick, as the session recorder writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryRecord {
    /// Seconds since recording started.
    pub timestamp: f64,
    /// Body the pose belongs to.
    pub body: i32,
    /// Base position.
    pub position: [f32; 3],
    /// Base orientation quaternion, `(x, y, z, w)`.
    pub orientation: [f32; 4],
    /// Joint positions, zero padded to the log's joint count.
    pub joints: Vec<f32>,
}

impl TrajectoryRecord {
    /// Columns and format for a log whose records carry `n_joints` joints.
    pub fn header(n_joints: usize) -> LogHeader {
        let mut columns: Vec<String> = ["t", "id", "x", "y", "z", "qx", "qy", "qz", "qw"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        columns.extend((0..n_joints).map(|i| format!("q{}", i)));

        let mut fields = vec![FieldKind::F64, FieldKind::I32];
        fields.extend(std::iter::repeat(FieldKind::F32).take(7 + n_joints));
        let format = RecordFormat::from_fields(fields);

        LogHeader { columns, format }
    }

    /// Flatten to values in header order.
    pub fn to_values(&self) -> Vec<Value> {
        let mut values = vec![Value::F64(self.timestamp), Value::I32(self.body)];
        values.extend(
            self.position
                .iter()
                .chain(self.orientation.iter())
                .chain(self.joints.iter())
                .map(|v| Value::F32(*v)),
        );
        values
    }

    /// Rebuild a record from values in header order.
    pub fn from_values(values: &[Value]) -> Result<Self, LogError> {
        let (timestamp, body) = match values {
            [Value::F64(t), Value::I32(id), ..] => (*t, *id),
            _ => return Err(LogError::Layout("expected a timestamp and a body id".into())),
        };

        let floats = values[2..]
            .iter()
            .map(|v| match v {
                Value::F32(f) => Ok(*f),
                other => Err(LogError::Layout(format!("{:?} in a pose column", other))),
            })
            .collect::<Result<Vec<f32>, LogError>>()?;

        if floats.len() < 7 {
            return Err(LogError::Layout(format!(
                "{} pose columns, need 7",
                floats.len()
            )));
        }

        Ok(TrajectoryRecord {
            timestamp,
            body,
            position: [floats[0], floats[1], floats[2]],
            orientation: [floats[3], floats[4], floats[5], floats[6]],
            joints: floats[7..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_record(t: f64, body: i32) -> TrajectoryRecord {
        TrajectoryRecord {
            timestamp: t,
            body,
            position: [0.25, -0.5, 1.0],
            orientation: [0.0, 1.0, 0.0, 0.0],
            joints: vec![0.125, 0.75],
        }
    }

    #[test]
    fn two_doubles_records_split_on_sentinel() {
        let values = [0.5, 1.0, 0.1, 0.2, 0.3, 0.0, 0.0, 0.0];
        let record: Vec<u8> = values.iter().flat_map(|v: &f64| v.to_le_bytes()).collect();

        let mut raw = b"t,id,x,y,z,qx,qy,qz,qw\ndddddddd\n".to_vec();
        raw.extend_from_slice(&record);
        raw.extend_from_slice(&SENTINEL);
        raw.extend_from_slice(&record);

        let log = TrajectoryLog::from_file(&mut Cursor::new(raw)).unwrap();

        assert_eq!(log.header().columns.len(), 9);
        assert_eq!(log.header().format.spec(), "dddddddd");
        assert_eq!(log.records().len(), 2);
        for r in log.records() {
            let read: Vec<f64> = r.iter().map(Value::as_f64).collect();
            assert_eq!(read, values);
        }
        assert_eq!(log.dropped_chunks(), 0);
    }

    #[test]
    fn write_and_read_path() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let header = TrajectoryRecord::header(2);
        let mut writer = TrajectoryWriter::create(
            File::create(tempfile.path()).unwrap(),
            &header.columns,
            header.format.clone(),
        )
        .unwrap();

        let written = vec![sample_record(0.0, 1), sample_record(0.01, 2)];
        for r in &written {
            writer.append_record(&r.to_values()).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.records_written(), 2);

        let log = TrajectoryLog::from_path(tempfile.path()).unwrap();
        assert_eq!(log.header(), &header);
        assert_eq!(log.trajectory_records().unwrap(), written);
    }

    #[test]
    fn write_and_read_cursor() {
        let header = TrajectoryRecord::header(2);
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer =
                TrajectoryWriter::create(&mut buf, &header.columns, header.format.clone())
                    .unwrap();
            writer.append_record(&sample_record(3.5, 7).to_values()).unwrap();
        }

        buf.set_position(0);
        let log = TrajectoryLog::from_file(&mut buf).unwrap();

        let mut again = Cursor::new(Vec::new());
        log.to_file(&mut again).unwrap();
        assert_eq!(again.into_inner(), buf.into_inner());
    }

    // A record whose own bytes contain the sentinel cannot be recovered.
    #[test]
    fn sentinel_inside_record_loses_it() {
        let fmt: RecordFormat = "i".parse().unwrap();
        let colliding = i32::from_le_bytes([0xAA, 0xBB, 0x00, 0x00]);
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = TrajectoryWriter::create(&mut buf, &["id"], fmt).unwrap();
            writer.append_record(&[Value::I32(7)]).unwrap();
            writer.append_record(&[Value::I32(colliding)]).unwrap();
            writer.append_record(&[Value::I32(9)]).unwrap();
        }

        buf.set_position(0);
        let log = TrajectoryLog::from_file(&mut buf).unwrap();
        assert_eq!(
            log.records(),
            &[vec![Value::I32(7)], vec![Value::I32(9)]]
        );
        assert_eq!(log.dropped_chunks(), 1);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let mut raw = b"id\ni\n".to_vec();
        raw.extend_from_slice(&5i32.to_le_bytes());
        raw.extend_from_slice(&SENTINEL);
        raw.extend_from_slice(&[1, 2]);

        let log = TrajectoryLog::from_file(&mut Cursor::new(raw)).unwrap();
        assert_eq!(log.records(), &[vec![Value::I32(5)]]);
        assert_eq!(log.dropped_chunks(), 1);
    }

    #[test]
    fn missing_header() {
        assert!(matches!(
            TrajectoryLog::from_file(&mut Cursor::new(b"t,id\n".to_vec())),
            Err(LogError::MissingHeader)
        ));
    }

    #[test]
    fn bad_record_is_rejected_before_writing() {
        let header = TrajectoryRecord::header(0);
        let mut writer =
            TrajectoryWriter::create(Vec::new(), &header.columns, header.format).unwrap();
        assert!(matches!(
            writer.append_record(&[Value::F64(0.0)]),
            Err(LogError::Format(FormatError::ValueCount { .. }))
        ));
        assert_eq!(writer.records_written(), 0);
    }

    #[test]
    fn foreign_layout_is_not_a_trajectory_record() {
        assert!(matches!(
            TrajectoryRecord::from_values(&[Value::U32(1), Value::F32(0.0)]),
            Err(LogError::Layout(_))
        ));
    }

    #[test]
    fn oversized_format_is_an_error() {
        let mut input = Cursor::new(b"t\n4000000000d\n".to_vec());
        assert!(matches!(
            read_header(&mut input),
            Err(LogError::Format(FormatError::TooLarge { .. }))
        ));
    }
}
