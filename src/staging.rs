//! Append-only CSV staging for an in-progress recording.
//!
//! While a session records, samples and annotations are staged to two
//! sibling CSV files; at stop time the stage is folded into the final
//! EDF+ file. Staging keeps memory bounded and leaves a recoverable
//! artifact if finalization is interrupted.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use csv::{Reader, Writer};
use tracing::{debug, info};

use crate::error::Error;

/// Writer for the staged sample matrix: header row of channel labels,
/// then one float row per synchronizer-emitted sample.
pub struct DataWriter {
    path: PathBuf,
    writer: Writer<BufWriter<File>>,
}

impl DataWriter {
    pub fn create(path: &Path, labels: &[&str]) -> Result<Self, Error> {
        let mut writer = Writer::from_writer(BufWriter::new(File::create(path)?));
        writer.write_record(labels)?;
        writer.flush()?;
        info!(path = %path.display(), ?labels, "created staged data CSV");

        Ok(DataWriter {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn append_rows(&mut self, rows: &[Vec<f64>]) -> Result<(), Error> {
        for row in rows {
            self.writer
                .write_record(row.iter().map(|value| value.to_string()))?;
        }
        self.writer.flush()?;
        debug!(path = %self.path.display(), rows = rows.len(), "appended staged data");
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf, Error> {
        self.writer.flush()?;
        info!(path = %self.path.display(), "closed staged data CSV");
        Ok(self.path)
    }
}

/// Writer for the staged annotations: `time,text` rows where `time`
/// is seconds since the recording anchor.
pub struct AnnotationsWriter {
    path: PathBuf,
    writer: Writer<BufWriter<File>>,
    anchor: Instant,
}

impl AnnotationsWriter {
    /// `anchor` is the data writer's start instant, shared so both
    /// staged files agree on time zero.
    pub fn create(path: &Path, anchor: Instant) -> Result<Self, Error> {
        let mut writer = Writer::from_writer(BufWriter::new(File::create(path)?));
        writer.write_record(&["time", "text"])?;
        writer.flush()?;
        info!(path = %path.display(), "created staged annotations CSV");

        Ok(AnnotationsWriter {
            path: path.to_path_buf(),
            writer,
            anchor,
        })
    }

    pub fn append(&mut self, text: &str) -> Result<(), Error> {
        let offset = self.anchor.elapsed().as_secs_f64();
        self.writer
            .write_record(&[offset.to_string(), text.to_string()])?;
        self.writer.flush()?;
        debug!(path = %self.path.display(), offset, "appended annotation");
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf, Error> {
        self.writer.flush()?;
        info!(path = %self.path.display(), "closed staged annotations CSV");
        Ok(self.path)
    }
}

/// Read a staged data CSV back as channel labels plus a
/// channels-major sample matrix.
pub fn read_data_matrix(path: &Path) -> Result<(Vec<String>, Vec<Vec<f64>>), Error> {
    info!(path = %path.display(), "reading staged data CSV");

    let mut reader = Reader::from_path(path)?;
    let labels: Vec<String> = reader
        .headers()?
        .iter()
        .map(|label| label.to_string())
        .collect();

    let mut channels: Vec<Vec<f64>> = vec![Vec::new(); labels.len()];
    for record in reader.records() {
        let record = record?;
        for (channel, field) in channels.iter_mut().zip(record.iter()) {
            let value = field.parse::<f64>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("non-numeric sample in staged data: {:?}", field),
                )
            })?;
            channel.push(value);
        }
    }

    Ok((labels, channels))
}

/// One staged annotation row.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Seconds since recording start.
    pub time: f64,
    pub text: String,
}

/// Read a staged annotations CSV. Fails with
/// [`Error::MalformedAnnotations`] when the `time`/`text` columns are
/// absent or a `time` value cannot be coerced to a float.
pub fn read_annotations(path: &Path) -> Result<Vec<Annotation>, Error> {
    let mut reader = Reader::from_path(path)?;

    let headers = reader.headers()?;
    let time_column = headers.iter().position(|h| h == "time");
    let text_column = headers.iter().position(|h| h == "text");
    let (time_column, text_column) = match (time_column, text_column) {
        (Some(t), Some(x)) => (t, x),
        _ => {
            return Err(Error::MalformedAnnotations(format!(
                "expected time,text columns, found {:?}",
                headers.iter().collect::<Vec<_>>()
            )))
        }
    };

    let mut annotations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let raw_time = record.get(time_column).unwrap_or("");
        let time = raw_time.parse::<f64>().map_err(|_| {
            Error::MalformedAnnotations(format!("cannot convert time to float: {:?}", raw_time))
        })?;
        let text = record.get(text_column).unwrap_or("").to_string();
        annotations.push(Annotation { time, text });
    }

    Ok(annotations)
}
