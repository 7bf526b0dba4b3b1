//! Async discovery of NeuroPlay headsets.
//!
//! The scanner walks the adapter's advertisement events, filters names
//! against a set of model strings, suppresses duplicate addresses, and
//! constructs a [`Device`] session per new headset. Each discovery is
//! bounded by a timeout, after which iteration reports the stream dry.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::{Stream, StreamExt};
use regex::Regex;
use tracing::{debug, info};

use crate::device::{Device, SampleSink};
use crate::error::Error;
use crate::model::{DeviceInfo, DeviceModel};

/// Default per-discovery timeout.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Discovers headsets and constructs sessions for them.
///
/// ```no_run
/// # use neuroplay::{Scanner, DeviceModel};
/// # async fn scan() -> Result<(), neuroplay::Error> {
/// let mut scanner = Scanner::new(DeviceModel::ALL.iter().copied().collect(), None).await?;
/// scanner.start().await?;
/// while let Some(device) = scanner.discover_next().await? {
///     println!("found {}", device.info());
/// }
/// scanner.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Scanner {
    adapter: Adapter,
    models: HashSet<DeviceModel>,
    timeout: Duration,
    sink: Option<Arc<dyn SampleSink>>,
    discovered: HashMap<String, DeviceInfo>,
    events: Option<EventStream>,
}

impl Scanner {
    /// Build a scanner over the first BLE adapter.
    ///
    /// Fails with [`Error::EmptyFilter`] when `models` is empty; pass
    /// [`DeviceModel::ALL`] to match every supported headset. A `None`
    /// timeout selects [`DEFAULT_DISCOVERY_TIMEOUT`].
    pub async fn new(models: HashSet<DeviceModel>, timeout: Option<Duration>) -> Result<Self, Error> {
        if models.is_empty() {
            return Err(Error::EmptyFilter);
        }

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(btleplug::Error::DeviceNotFound)?;

        Ok(Scanner {
            adapter,
            models,
            timeout: timeout.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT),
            sink: None,
            discovered: HashMap::new(),
            events: None,
        })
    }

    /// Inject a sample sink into every session this scanner constructs.
    pub fn with_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start the underlying BLE scan.
    pub async fn start(&mut self) -> Result<(), Error> {
        self.events = Some(self.adapter.events().await?);
        self.adapter.start_scan(ScanFilter::default()).await?;
        debug!("scan started");
        Ok(())
    }

    /// Stop the underlying BLE scan.
    pub async fn stop(&mut self) -> Result<(), Error> {
        self.adapter.stop_scan().await?;
        self.events = None;
        debug!("scan stopped");
        Ok(())
    }

    /// Await the next undiscovered matching headset.
    ///
    /// Returns `Ok(None)` when the per-discovery timeout elapses or
    /// the event stream ends, which terminates iteration.
    pub async fn discover_next(&mut self) -> Result<Option<Device>, Error> {
        let deadline = self.timeout;
        match tokio::time::timeout(deadline, self.next_matching()).await {
            Ok(result) => result,
            Err(_) => {
                info!(timeout = ?deadline, "discovery timeout reached, stop discovering");
                Ok(None)
            }
        }
    }

    async fn next_matching(&mut self) -> Result<Option<Device>, Error> {
        let events = match self.events.as_mut() {
            Some(events) => events,
            None => return Ok(None),
        };

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let peripheral = self.adapter.peripheral(&id).await?;
            let properties = match peripheral.properties().await? {
                Some(properties) => properties,
                None => continue,
            };
            let name = match properties.local_name {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };
            let address = properties.address.to_string();

            let matches_filter = self
                .models
                .iter()
                .any(|model| name.contains(model.advertised_name()));
            if !matches_filter || self.discovered.contains_key(&address) {
                continue;
            }

            let info = DeviceInfo::parse(&name, address.clone())?;
            info!(device = %info, "found device");
            self.discovered.insert(address, info.clone());

            let device = match &self.sink {
                Some(sink) => Device::with_sink(peripheral, info, sink.clone()),
                None => Device::new(peripheral, info),
            };
            return Ok(Some(device));
        }

        Ok(None)
    }

    /// Descriptors of every headset discovered so far.
    pub fn discovered_devices(&self) -> Vec<&DeviceInfo> {
        self.discovered.values().collect()
    }

    /// Forget discovered addresses so they may be reported again.
    pub fn clear_discovered(&mut self) {
        self.discovered.clear();
    }

    /// Scan until a headset with the given model and unit id appears.
    ///
    /// Returns `Ok(None)` when the timeout elapses first.
    pub async fn search_for(
        model: DeviceModel,
        id: u32,
        timeout: Option<Duration>,
    ) -> Result<Option<Device>, Error> {
        let pattern = full_name_pattern(model, id);

        let mut models = HashSet::new();
        models.insert(model);
        let mut scanner = Scanner::new(models, timeout).await?;
        scanner.start().await?;

        let found = loop {
            match scanner.discover_next().await {
                Ok(Some(device)) if pattern.is_match(device.info().full_name()) => {
                    break Ok(Some(device))
                }
                Ok(Some(_)) => continue,
                Ok(None) => break Ok(None),
                Err(e) => break Err(e),
            }
        };

        scanner.stop().await?;
        found
    }
}

fn full_name_pattern(model: DeviceModel, id: u32) -> Regex {
    Regex::new(&format!(
        r"^{}.* \({}\)$",
        regex::escape(model.advertised_name()),
        id
    ))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_filter_fails_at_construction() {
        match Scanner::new(HashSet::new(), None).await {
            Err(Error::EmptyFilter) => {}
            Err(other) => panic!("expected EmptyFilter, got {:?}", other),
            Ok(_) => panic!("expected EmptyFilter"),
        }
    }

    #[test]
    fn search_pattern_matches_exact_unit() {
        let pattern = full_name_pattern(DeviceModel::NeuroPlay6C, 1228);

        assert!(pattern.is_match("NeuroPlay-6C (1228)"));
        assert!(pattern.is_match("NeuroPlay-6C rev2 (1228)"));
        assert!(!pattern.is_match("NeuroPlay-6C (228)"));
        assert!(!pattern.is_match("NeuroPlay-6C (12281)"));
        assert!(!pattern.is_match("NeuroPlay-8Cap (1228)"));
    }

    #[test]
    fn search_pattern_escapes_the_model_string() {
        // The '-' in the model string must not behave like a regex
        // token boundary mistake; a lookalike name must not match.
        let pattern = full_name_pattern(DeviceModel::NeuroPlay8Cap, 7);
        assert!(pattern.is_match("NeuroPlay-8Cap (7)"));
        assert!(!pattern.is_match("NeuroPlayX8Cap (7)"));
    }
}
