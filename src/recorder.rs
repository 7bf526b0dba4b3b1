//! Recording lifecycle: staged CSV writers plus EDF+ finalization.
//!
//! A recorder owns its staging files for the duration of one recording
//! and releases them by converting the stage into a single EDF+ file
//! at stop time. Samples are buffered and flushed in one-second
//! batches so the staging writes stay bounded.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

use crate::edf;
use crate::error::Error;
use crate::staging::{AnnotationsWriter, DataWriter};

type Callback = Box<dyn Fn() + Send + Sync>;

/// State held only while a recording is active.
struct ActiveRecording {
    edf_path: PathBuf,
    data_path: PathBuf,
    annotations_path: PathBuf,
    data: DataWriter,
    annotations: AnnotationsWriter,
    buffer: Vec<Vec<f64>>,
}

/// Coordinates the staged writers and the EDF+ finalizer over one
/// recording at a time.
pub struct Recorder {
    labels: Vec<&'static str>,
    sample_rate: usize,
    active: Mutex<Option<ActiveRecording>>,
    on_start: Mutex<Vec<Callback>>,
    on_stop: Mutex<Vec<Callback>>,
}

impl Recorder {
    pub fn new(labels: &[&'static str], sample_rate: usize) -> Self {
        Recorder {
            labels: labels.to_vec(),
            sample_rate,
            active: Mutex::new(None),
            on_start: Mutex::new(Vec::new()),
            on_stop: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback fired at the top of every
    /// [`Recorder::start_recording`]. The session uses this to reset
    /// its sample-rate synchronizer.
    pub fn on_start_recording(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_start.lock().unwrap().push(Box::new(callback));
    }

    /// Register a callback fired at the top of every
    /// [`Recorder::stop_recording`].
    pub fn on_stop_recording(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_stop.lock().unwrap().push(Box::new(callback));
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Begin a recording targeting `edf_path`. The staging files
    /// `data.csv` and `annotations.csv` are created next to the
    /// target, anchored to a shared start instant.
    pub fn start_recording(&self, edf_path: &Path) -> Result<(), Error> {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Err(Error::RecordingAlreadyStarted);
        }

        for callback in self.on_start.lock().unwrap().iter() {
            callback();
        }

        let parent = edf_path.parent().unwrap_or_else(|| Path::new("."));
        let data_path = parent.join("data.csv");
        let annotations_path = parent.join("annotations.csv");

        let start = Instant::now();
        let data = DataWriter::create(&data_path, &self.labels)?;
        let annotations = AnnotationsWriter::create(&annotations_path, start)?;

        info!(edf = %edf_path.display(), "recording started");
        *active = Some(ActiveRecording {
            edf_path: edf_path.to_path_buf(),
            data_path,
            annotations_path,
            data,
            annotations,
            buffer: Vec::with_capacity(self.sample_rate),
        });
        Ok(())
    }

    /// Append one synchronizer-emitted sample row. Rows are staged in
    /// memory and flushed once a full second has accumulated.
    pub fn write_data(&self, row: Vec<f64>) -> Result<(), Error> {
        let mut active = self.active.lock().unwrap();
        let recording = active.as_mut().ok_or(Error::RecordingNotStarted)?;

        recording.buffer.push(row);
        if recording.buffer.len() >= self.sample_rate {
            let rows = std::mem::take(&mut recording.buffer);
            recording.data.append_rows(&rows)?;
        }
        Ok(())
    }

    /// Stage an annotation at the current offset from recording start.
    pub fn write_annotation(&self, text: &str) -> Result<(), Error> {
        let mut active = self.active.lock().unwrap();
        let recording = active.as_mut().ok_or(Error::RecordingNotStarted)?;
        recording.annotations.append(text)
    }

    /// Stop the recording: flush the stage, close both writers, and
    /// fold the staged CSVs into the target EDF+ file.
    pub fn stop_recording(&self) -> Result<(), Error> {
        let mut recording = self
            .active
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::RecordingNotStarted)?;

        for callback in self.on_stop.lock().unwrap().iter() {
            callback();
        }

        if !recording.buffer.is_empty() {
            let rows = std::mem::take(&mut recording.buffer);
            recording.data.append_rows(&rows)?;
        }

        recording.annotations.finish()?;
        recording.data.finish()?;

        edf::save_csv_as_edf(
            &recording.data_path,
            Some(&recording.annotations_path),
            &recording.edf_path,
            self.sample_rate,
        )?;

        info!(edf = %recording.edf_path.display(), "recording stopped");
        Ok(())
    }
}
