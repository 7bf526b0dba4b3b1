//! Streaming IIR filters with persistent per-channel state.
//!
//! Filtering happens online, one scalar at a time, so that frame
//! boundaries introduce no discontinuities and contact validation can
//! run on live data. Each channel owns an independent [`FilterChain`];
//! chains are never shared or reordered.

/// A streaming scalar filter.
pub trait Filter: Send {
    /// Filter a single sample, updating internal state.
    fn step(&mut self, sample: f64) -> f64;
}

/// A single IIR stage in direct form II transposed.
///
/// The delay line has `max(|a|, |b|) - 1` taps and starts zeroed;
/// shorter coefficient vectors are zero-padded so numerator and
/// denominator share one length.
#[derive(Debug, Clone)]
pub struct IirFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    state: Vec<f64>,
}

impl IirFilter {
    /// Build a stage from transfer-function coefficients with `a[0]`
    /// normalized to 1.
    pub fn new(b: &[f64], a: &[f64]) -> Self {
        debug_assert!(!b.is_empty() && !a.is_empty());
        debug_assert!((a[0] - 1.0).abs() < 1e-12);

        let order = b.len().max(a.len());
        let mut b = b.to_vec();
        let mut a = a.to_vec();
        b.resize(order, 0.0);
        a.resize(order, 0.0);

        IirFilter {
            b,
            a,
            state: vec![0.0; order - 1],
        }
    }

    /// 2 Hz order-5 Butterworth high-pass at 125 Hz, for baseline-drift
    /// removal.
    pub fn highpass_2hz() -> Self {
        IirFilter::new(&HIGHPASS_2HZ_B, &HIGHPASS_2HZ_A)
    }

    /// 40 Hz order-5 Butterworth low-pass at 125 Hz.
    pub fn lowpass_40hz() -> Self {
        IirFilter::new(&LOWPASS_40HZ_B, &LOWPASS_40HZ_A)
    }

    /// 50 Hz Q=30 notch at 125 Hz, for mains interference.
    pub fn notch_50hz() -> Self {
        IirFilter::new(&NOTCH_50HZ_B, &NOTCH_50HZ_A)
    }
}

impl Filter for IirFilter {
    fn step(&mut self, x: f64) -> f64 {
        if self.state.is_empty() {
            return self.b[0] * x;
        }

        let y = self.b[0] * x + self.state[0];
        let taps = self.state.len();
        for i in 0..taps - 1 {
            self.state[i] = self.b[i + 1] * x + self.state[i + 1] - self.a[i + 1] * y;
        }
        self.state[taps - 1] = self.b[taps] * x - self.a[taps] * y;
        y
    }
}

/// An ordered cascade of filters applied as one.
///
/// The scalar output of each stage feeds the next in insertion order.
#[derive(Default)]
pub struct FilterChain {
    stages: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        FilterChain { stages: Vec::new() }
    }

    /// The standard EEG conditioning chain: high-pass 2 Hz, low-pass
    /// 40 Hz, notch 50 Hz.
    pub fn standard() -> Self {
        let mut chain = FilterChain::new();
        chain.add(IirFilter::highpass_2hz());
        chain.add(IirFilter::lowpass_40hz());
        chain.add(IirFilter::notch_50hz());
        chain
    }

    pub fn add(&mut self, filter: impl Filter + 'static) {
        self.stages.push(Box::new(filter));
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }
}

impl Filter for FilterChain {
    fn step(&mut self, sample: f64) -> f64 {
        self.stages
            .iter_mut()
            .fold(sample, |x, stage| stage.step(x))
    }
}

// Coefficients below are the fs = 125 Hz designs the headset ships
// with, in f64: Butterworth stages from the bilinear transform of the
// order-5 analog prototype, the notch from the standard two-pole
// closed form. The sampling rate is fixed by the firmware, so the
// tables are data rather than a runtime design step.

#[rustfmt::skip]
const HIGHPASS_2HZ_B: [f64; 6] = [
     0.8498059442850544,
    -4.249029721425272,
     8.498059442850543,
    -8.498059442850543,
     4.249029721425272,
    -0.8498059442850544,
];
#[rustfmt::skip]
const HIGHPASS_2HZ_A: [f64; 6] = [
     1.0,
    -4.674714813483247,
     8.751137525665719,
    -8.200005770674688,
     3.845761964355956,
    -0.7221701429421383,
];

#[rustfmt::skip]
const LOWPASS_40HZ_B: [f64; 6] = [
    0.14028084979907443,
    0.7014042489953721,
    1.4028084979907443,
    1.4028084979907443,
    0.7014042489953721,
    0.14028084979907443,
];
#[rustfmt::skip]
const LOWPASS_40HZ_A: [f64; 6] = [
    1.0,
    1.380667174595735,
    1.3035418942540122,
    0.6133175120379348,
    0.1719904071241471,
    0.019470205558553624,
];

#[rustfmt::skip]
const NOTCH_50HZ_B: [f64; 3] = [
    0.95977356895352,
    1.552946256070586,
    0.95977356895352,
];
#[rustfmt::skip]
const NOTCH_50HZ_A: [f64; 3] = [
    1.0,
    1.552946256070586,
    0.9195471379070399,
];
