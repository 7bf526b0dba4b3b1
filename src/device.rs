//! The device session: one BLE link bound to the decoding, filtering,
//! synchronization, recording, and validation pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decoder::PacketDecoder;
use crate::error::Error;
use crate::filter::{Filter, FilterChain};
use crate::model::{ChannelStatus, DeviceInfo};
use crate::recorder::Recorder;
use crate::sync::SampleSynchronizer;
use crate::SAMPLING_RATE;

/// The EEG GATT service.
pub const EEG_SERVICE: Uuid = Uuid::from_u128(0xf0001298_0451_4000_b000_000000000000);

/// Streams 20-byte sample packets; written to start/stop streaming.
pub const EEG_DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0xf0001299_0451_4000_b000_000000000000);

/// Accepts mode commands; written to select the raw channel count.
pub const EEG_CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0xf000129a_0451_4000_b000_000000000000);

const START_STREAMING: [u8; 2] = [0x01, 0x00];
const STOP_STREAMING: [u8; 2] = [0x00, 0x00];
const SELECT_8_CHANNELS: [u8; 2] = [0x01, 0x01];

/// How long channel validation waits for its one-second window before
/// concluding the link is dead.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Contact-quality thresholds, in µV of peak deviation.
const VALID_MAX_DEVIATION: f64 = 250.0;
const NOT_VALID_MIN_DEVIATION: f64 = 1000.0;

/// User-facing tap on the sample stream.
///
/// Both handlers are started concurrently for every decoded time step
/// and joined before the next step is processed. The default
/// implementations do nothing; the built-in recording and validation
/// paths run regardless of the sink in place.
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Called with the unfiltered µV row of each time step.
    async fn on_raw(&self, _row: &[f64]) {}

    /// Called with the filtered µV row of each time step.
    async fn on_filtered(&self, _row: &[f64]) {}

    /// Called once the session has reached the disconnected state.
    async fn on_disconnected(&self) {}
}

struct NullSink;

#[async_trait]
impl SampleSink for NullSink {}

/// Validation window state. The sample path fills the buffer while
/// `accumulating` is set and flips the watch channel once a full
/// second is captured.
struct Validation {
    accumulating: AtomicBool,
    buffer: Mutex<Vec<Vec<f64>>>,
    completed: watch::Sender<bool>,
}

impl Validation {
    fn new() -> Self {
        let (completed, _) = watch::channel(false);
        Validation {
            accumulating: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
            completed,
        }
    }

    fn reset(&self) {
        self.buffer.lock().unwrap().clear();
        self.accumulating.store(false, Ordering::SeqCst);
        self.completed.send_replace(false);
    }
}

/// State shared between the session handle and its notification pump.
struct Pipeline {
    decoder: Mutex<PacketDecoder>,
    filters: Mutex<Vec<FilterChain>>,
    synchronizer: Arc<Mutex<SampleSynchronizer>>,
    recorder: Recorder,
    validation: Validation,
    sink: Arc<dyn SampleSink>,
}

impl Pipeline {
    async fn handle_notification(&self, payload: &[u8]) {
        let frame = self.decoder.lock().unwrap().push(payload);
        if let Some(frame) = frame {
            for row in &frame.rows {
                let filtered = self.filter_row(row);
                // Raw and filtered handlers run concurrently, but both
                // complete before the next time step is touched.
                tokio::join!(self.sink.on_raw(row), self.dispatch_filtered(&filtered));
            }
        }
    }

    fn filter_row(&self, row: &[f64]) -> Vec<f64> {
        let mut chains = self.filters.lock().unwrap();
        row.iter()
            .zip(chains.iter_mut())
            .map(|(&sample, chain)| chain.step(sample))
            .collect()
    }

    async fn dispatch_filtered(&self, row: &[f64]) {
        if self.recorder.is_recording() {
            let emitted = self
                .synchronizer
                .lock()
                .unwrap()
                .synchronize(row, Instant::now());
            for synced in emitted {
                if let Err(e) = self.recorder.write_data(synced) {
                    warn!(error = %e, "dropping sample: staging write failed");
                }
            }
        }

        if self.validation.accumulating.load(Ordering::SeqCst) {
            let mut buffer = self.validation.buffer.lock().unwrap();
            buffer.push(row.to_vec());
            if buffer.len() >= SAMPLING_RATE {
                self.validation.accumulating.store(false, Ordering::SeqCst);
                self.validation.completed.send_replace(true);
            }
        }

        self.sink.on_filtered(row).await;
    }
}

/// A session over one discovered headset.
///
/// Construction wires up one filter cascade per channel, a sample-rate
/// synchronizer, and a recorder whose start resets the synchronizer.
/// Filter state persists across connects within the session; the
/// synchronizer is reset on every disconnect and recording start.
pub struct Device {
    info: DeviceInfo,
    peripheral: Peripheral,
    pipeline: Arc<Pipeline>,
    connected: Arc<AtomicBool>,
    data_characteristic: Mutex<Option<Characteristic>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    validate_gate: tokio::sync::Mutex<()>,
}

impl Device {
    /// Build a session with the default (no-op) sample sink.
    pub fn new(peripheral: Peripheral, info: DeviceInfo) -> Self {
        Device::with_sink(peripheral, info, Arc::new(NullSink))
    }

    /// Build a session with a user sink tapping the sample stream.
    pub fn with_sink(peripheral: Peripheral, info: DeviceInfo, sink: Arc<dyn SampleSink>) -> Self {
        let filters = (0..info.channel_count())
            .map(|_| FilterChain::standard())
            .collect();
        let synchronizer = Arc::new(Mutex::new(SampleSynchronizer::new(SAMPLING_RATE)));

        let recorder = Recorder::new(info.model().channel_labels(), SAMPLING_RATE);
        let sync_handle = synchronizer.clone();
        recorder.on_start_recording(move || sync_handle.lock().unwrap().reset());

        let pipeline = Arc::new(Pipeline {
            decoder: Mutex::new(PacketDecoder::new(info.model())),
            filters: Mutex::new(filters),
            synchronizer,
            recorder,
            validation: Validation::new(),
            sink,
        });

        Device {
            info,
            peripheral,
            pipeline,
            connected: Arc::new(AtomicBool::new(false)),
            data_characteristic: Mutex::new(None),
            pump: Mutex::new(None),
            validate_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The session's recording coordinator.
    pub fn recorder(&self) -> &Recorder {
        &self.pipeline.recorder
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the link and start streaming.
    ///
    /// Locates the EEG service and its data/control characteristics,
    /// commands the stream on in 8-channel mode, and subscribes to
    /// data notifications. If any step past the transport connect
    /// fails, the client is released again before the error surfaces
    /// so a half-attached link never lingers.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        self.peripheral.connect().await?;

        match self.attach().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(device = %self.info, "connected");
                Ok(())
            }
            Err(e) => {
                if let Err(teardown) = self.peripheral.disconnect().await {
                    warn!(error = %teardown, "failed to release client after attach error");
                }
                Err(e)
            }
        }
    }

    async fn attach(&self) -> Result<(), Error> {
        self.peripheral.discover_services().await?;

        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == EEG_SERVICE)
            .ok_or(Error::MissingService)?;

        let find = |uuid: Uuid| {
            service
                .characteristics
                .iter()
                .find(|characteristic| characteristic.uuid == uuid)
                .cloned()
                .ok_or(Error::MissingCharacteristic)
        };
        let data = find(EEG_DATA_CHARACTERISTIC)?;
        let control = find(EEG_CONTROL_CHARACTERISTIC)?;

        self.peripheral
            .write(&data, &START_STREAMING, WriteType::WithResponse)
            .await?;
        self.peripheral
            .write(&control, &SELECT_8_CHANNELS, WriteType::WithResponse)
            .await?;
        self.peripheral.subscribe(&data).await?;

        let mut notifications = self.peripheral.notifications().await?;
        let pipeline = self.pipeline.clone();
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == EEG_DATA_CHARACTERISTIC {
                    pipeline.handle_notification(&notification.value).await;
                } else {
                    debug!(uuid = %notification.uuid, "ignoring unrelated notification");
                }
            }
        });

        *self.data_characteristic.lock().unwrap() = Some(data);
        *self.pump.lock().unwrap() = Some(pump);
        Ok(())
    }

    /// Stop streaming and close the link.
    ///
    /// Transport errors while commanding the stream off or
    /// unsubscribing are logged and suppressed; the client is closed
    /// unconditionally and the session always ends disconnected.
    pub async fn disconnect(&self) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        info!(device = %self.info, "disconnecting");

        let data = self.data_characteristic.lock().unwrap().take();
        if let Some(characteristic) = data {
            if let Err(e) = self
                .peripheral
                .write(&characteristic, &STOP_STREAMING, WriteType::WithResponse)
                .await
            {
                warn!(error = %e, "failed to command stream off");
            }
            if let Err(e) = self.peripheral.unsubscribe(&characteristic).await {
                warn!(error = %e, "failed to stop notifications");
            }
        }

        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }

        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, "transport error while closing client");
        }
        self.connected.store(false, Ordering::SeqCst);

        self.pipeline.synchronizer.lock().unwrap().reset();
        self.pipeline.sink.on_disconnected().await;

        info!(device = %self.info, "disconnected");
        Ok(())
    }

    /// Classify electrode contact quality from one second of filtered
    /// samples.
    ///
    /// Concurrent calls are serialized. The call fails with
    /// [`Error::NotConnected`] when the link is down, when no window
    /// accumulates within five seconds, or when the link drops while
    /// the window is accumulating.
    pub async fn validate_channels(&self) -> Result<HashMap<String, ChannelStatus>, Error> {
        let _gate = self.validate_gate.lock().await;

        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let validation = &self.pipeline.validation;
        validation.completed.send_replace(false);
        validation.accumulating.store(true, Ordering::SeqCst);

        let mut completed = validation.completed.subscribe();
        let window = tokio::time::timeout(VALIDATION_TIMEOUT, completed.wait_for(|&done| done));
        match window.await {
            Ok(Ok(_)) => {}
            _ => {
                validation.reset();
                return Err(Error::NotConnected);
            }
        }

        if !self.is_connected() {
            validation.reset();
            return Err(Error::NotConnected);
        }

        let statuses = {
            let buffer = validation.buffer.lock().unwrap();
            classify_window(&buffer, self.info.channel_labels())
        };
        validation.reset();

        Ok(statuses)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}

/// Classify each channel of a validation window by its largest
/// absolute deviation.
fn classify_window(
    window: &[Vec<f64>],
    labels: &[&'static str],
) -> HashMap<String, ChannelStatus> {
    labels
        .iter()
        .enumerate()
        .map(|(channel, label)| {
            let deviation = window
                .iter()
                .filter_map(|row| row.get(channel))
                .fold(0.0f64, |acc, value| acc.max(value.abs()));

            let status = if deviation <= VALID_MAX_DEVIATION {
                ChannelStatus::Valid
            } else if deviation > NOT_VALID_MIN_DEVIATION {
                ChannelStatus::NotValid
            } else {
                ChannelStatus::Warn
            };
            (label.to_string(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_thresholds() {
        let labels: &[&'static str] = &["a", "b", "c", "d", "e", "f"];
        // Per-channel peak deviations: 100, 300, 1500, 250, 999, 1000.
        let window = vec![
            vec![100.0, -300.0, 1500.0, 250.0, -999.0, -1000.0],
            vec![-50.0, 20.0, -30.0, -250.0, 1.0, 500.0],
        ];

        let statuses = classify_window(&window, labels);
        assert_eq!(statuses["a"], ChannelStatus::Valid);
        assert_eq!(statuses["b"], ChannelStatus::Warn);
        assert_eq!(statuses["c"], ChannelStatus::NotValid);
        assert_eq!(statuses["d"], ChannelStatus::Valid);
        assert_eq!(statuses["e"], ChannelStatus::Warn);
        assert_eq!(statuses["f"], ChannelStatus::Warn);
    }

    #[test]
    fn classification_uses_negative_extremes() {
        let statuses = classify_window(&[vec![-1500.0], vec![10.0]], &["only"]);
        assert_eq!(statuses["only"], ChannelStatus::NotValid);
    }

    #[test]
    fn empty_window_is_quiet() {
        let statuses = classify_window(&[], &["a"]);
        assert_eq!(statuses["a"], ChannelStatus::Valid);
    }
}
