//! Device models, montage capabilities, and discovered-device
//! descriptors.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::SAMPLING_RATE;

/// Advertised names look like `"NeuroPlay-6C (1228)"`: a model string
/// followed by the unit id in parentheses.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)\s\((\d+)\)$").unwrap());

/// The supported headset variants.
///
/// The device firmware always streams 8 raw channels; the variant
/// determines which raw columns carry electrodes and what they are
/// called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceModel {
    /// 6-electrode headband.
    NeuroPlay6C,

    /// 8-electrode cap.
    NeuroPlay8Cap,
}

impl DeviceModel {
    /// Every supported model, in scanner-filter default order.
    pub const ALL: [DeviceModel; 2] = [DeviceModel::NeuroPlay6C, DeviceModel::NeuroPlay8Cap];

    /// The model string as it appears in BLE advertisements.
    pub fn advertised_name(self) -> &'static str {
        match self {
            DeviceModel::NeuroPlay6C => "NeuroPlay-6C",
            DeviceModel::NeuroPlay8Cap => "NeuroPlay-8Cap",
        }
    }

    /// Inverse of [`DeviceModel::advertised_name`].
    pub fn from_advertised_name(name: &str) -> Option<Self> {
        DeviceModel::ALL
            .iter()
            .copied()
            .find(|model| model.advertised_name() == name)
    }

    /// Electrode labels in stream order (10-20 positions).
    pub fn channel_labels(self) -> &'static [&'static str] {
        match self {
            DeviceModel::NeuroPlay6C => &["O1", "T3", "Fp1", "Fp2", "T4", "O2"],
            DeviceModel::NeuroPlay8Cap => &["O1", "P3", "C3", "F3", "F4", "C4", "P4", "O2"],
        }
    }

    /// Number of electrode channels the model exposes.
    pub fn channel_count(self) -> usize {
        self.channel_labels().len()
    }

    /// Which columns of the 8-wide raw sample matrix carry this model's
    /// electrodes. The 6C hardware leaves raw columns 1 and 6 unwired.
    pub(crate) fn raw_columns(self) -> &'static [usize] {
        match self {
            DeviceModel::NeuroPlay6C => &[0, 2, 3, 4, 5, 7],
            DeviceModel::NeuroPlay8Cap => &[0, 1, 2, 3, 4, 5, 6, 7],
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.advertised_name())
    }
}

impl FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceModel::from_advertised_name(s)
            .ok_or_else(|| format!("unknown NeuroPlay model: {:?}", s))
    }
}

/// An immutable descriptor of a discovered headset.
///
/// Constructed from the advertised name and transport address; fails
/// with [`Error::NotValidDevice`] when the name does not identify a
/// supported model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    full_name: String,
    address: String,
    model: DeviceModel,
    id: u32,
}

impl DeviceInfo {
    /// Parse an advertisement name of the form `"<model> (<id>)"`.
    pub fn parse(full_name: &str, address: impl Into<String>) -> Result<Self, Error> {
        let invalid = || Error::NotValidDevice(full_name.to_string());

        let captures = NAME_PATTERN.captures(full_name).ok_or_else(invalid)?;
        let model = DeviceModel::from_advertised_name(&captures[1]).ok_or_else(invalid)?;
        let id = captures[2].parse().map_err(|_| invalid())?;

        Ok(DeviceInfo {
            full_name: full_name.to_string(),
            address: address.into(),
            model,
            id,
        })
    }

    /// The full advertised name, e.g. `"NeuroPlay-6C (1228)"`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The model string without the id suffix.
    pub fn name(&self) -> &str {
        self.model.advertised_name()
    }

    /// The transport address the device was discovered at.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// The unit id parsed out of the advertised name.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn channel_labels(&self) -> &'static [&'static str] {
        self.model.channel_labels()
    }

    pub fn channel_count(&self) -> usize {
        self.model.channel_count()
    }

    /// Samples per second per channel. Fixed by the firmware.
    pub fn sampling_rate(&self) -> usize {
        SAMPLING_RATE
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.full_name, self.address)
    }
}

/// Electrode contact quality, classified from one second of filtered
/// samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelStatus {
    /// Peak deviation within ±250 µV.
    Valid,

    /// Peak deviation above 250 µV but not past 1000 µV.
    Warn,

    /// Peak deviation beyond 1000 µV; the electrode is not making
    /// contact.
    NotValid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_name() {
        let info = DeviceInfo::parse("NeuroPlay-6C (1228)", "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(info.model(), DeviceModel::NeuroPlay6C);
        assert_eq!(info.id(), 1228);
        assert_eq!(info.name(), "NeuroPlay-6C");
        assert_eq!(info.full_name(), "NeuroPlay-6C (1228)");
        assert_eq!(info.channel_count(), 6);
        assert_eq!(info.to_string(), "NeuroPlay-6C (1228) (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn parse_rejects_bad_names() {
        for name in [
            "NeuroPlay-6C",
            "NeuroPlay-6C 1228",
            "NeuroPlay-6C (abc)",
            "SomeOtherHeadset (3)",
            "",
        ]
        .iter()
        {
            match DeviceInfo::parse(name, "AA:BB:CC:DD:EE:FF") {
                Err(Error::NotValidDevice(n)) => assert_eq!(n, *name),
                other => panic!("expected NotValidDevice for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn montages() {
        assert_eq!(DeviceModel::NeuroPlay6C.channel_count(), 6);
        assert_eq!(DeviceModel::NeuroPlay8Cap.channel_count(), 8);
        assert_eq!(DeviceModel::NeuroPlay6C.raw_columns(), &[0, 2, 3, 4, 5, 7]);
        assert_eq!(
            DeviceModel::NeuroPlay8Cap.raw_columns().len(),
            DeviceModel::NeuroPlay8Cap.channel_count()
        );
    }

    #[test]
    fn model_round_trips_through_str() {
        for model in DeviceModel::ALL.iter() {
            assert_eq!(
                model.advertised_name().parse::<DeviceModel>().unwrap(),
                *model
            );
        }
        assert!("NeuroPlay-12X".parse::<DeviceModel>().is_err());
    }
}
