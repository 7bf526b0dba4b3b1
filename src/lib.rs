//! A client SDK for NeuroPlay EEG headsets: discovers devices over
//! BLE, decodes their notification packets into calibrated microvolt
//! samples, conditions the stream with online IIR filters, gap-fills
//! to a fixed sample rate, validates electrode contact, and persists
//! sessions as [EDF+](https://www.edfplus.info/specs/edfplus.html).
//!
//! The streaming pipeline is: BLE notification → [`decoder`] →
//! raw-sample tap + [`filter`] chain → [`sync`]hronizer →
//! [`recorder`] (staged CSV → EDF+) and/or the channel-quality
//! validator on [`device::Device`].
//!
//! Common abbreviations:
//!
//! - EEG: electroencephalogram;
//! - BLE: Bluetooth Low Energy;
//! - GATT: generic attribute profile (BLE service/characteristic table);
//! - EDF+: European Data Format with annotations;
//! - IIR: infinite impulse response (recursive digital filter);
//! - TAL: timestamped annotation list (EDF+ annotation encoding);
//! - µV: microvolt.
//!
//! ```no_run
//! use neuroplay::{DeviceModel, Scanner};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn record() -> anyhow::Result<()> {
//! let device = Scanner::search_for(DeviceModel::NeuroPlay6C, 1228, None)
//!     .await?
//!     .expect("device in range");
//!
//! device.connect().await?;
//! device.recorder().start_recording(Path::new("session.edf"))?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! device.recorder().stop_recording()?;
//! device.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod device;
pub mod edf;
pub mod error;
pub mod filter;
pub mod model;
pub mod recorder;
pub mod scanner;
pub mod staging;
pub mod sync;

pub use crate::device::{Device, SampleSink};
pub use crate::error::Error;
pub use crate::model::{ChannelStatus, DeviceInfo, DeviceModel};
pub use crate::recorder::Recorder;
pub use crate::scanner::Scanner;

/// Samples per second per channel. Fixed by the headset firmware.
pub const SAMPLING_RATE: usize = 125;

/// Scale factor from a raw 24-bit ADC count to microvolts.
pub const MAGIC_MICROVOLTS_BIT: f64 = 0.000186265;
