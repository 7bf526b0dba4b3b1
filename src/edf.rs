//! EDF+ output.
//!
//! The staged CSV pair is folded into a single EDF+C file: one 16-bit
//! signal per electrode channel plus one `EDF Annotations` signal
//! carrying the staged annotations as zero-duration timestamped
//! annotation lists (TALs). Data records span one second each.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::Local;
use tracing::info;

use crate::error::Error;
use crate::staging::{self, Annotation};

/// Physical range of a channel signal, in µV.
pub const PHYSICAL_MIN: f64 = -10000.0;
pub const PHYSICAL_MAX: f64 = 10000.0;

/// Digital range of a channel signal (full i16).
pub const DIGITAL_MIN: i32 = -32768;
pub const DIGITAL_MAX: i32 = 32767;

/// Separators of the EDF+ timestamped annotation list format.
const TAL_TEXT_SEP: char = '\u{14}';
const TAL_END: char = '\u{0}';

/// Minimum width of the annotations signal, in 2-byte samples.
const MIN_ANNOTATION_SAMPLES: usize = 8;

struct SignalHeader {
    label: String,
    transducer: String,
    dimension: String,
    physical_min: f64,
    physical_max: f64,
    digital_min: i32,
    digital_max: i32,
    prefiltering: String,
    samples_per_record: usize,
}

impl SignalHeader {
    fn channel(label: &str, samples_per_record: usize) -> Self {
        SignalHeader {
            label: label.to_string(),
            transducer: String::new(),
            dimension: "uV".to_string(),
            physical_min: PHYSICAL_MIN,
            physical_max: PHYSICAL_MAX,
            digital_min: DIGITAL_MIN,
            digital_max: DIGITAL_MAX,
            prefiltering: String::new(),
            samples_per_record,
        }
    }

    fn annotations(samples_per_record: usize) -> Self {
        SignalHeader {
            label: "EDF Annotations".to_string(),
            transducer: String::new(),
            dimension: String::new(),
            physical_min: -1.0,
            physical_max: 1.0,
            digital_min: DIGITAL_MIN,
            digital_max: DIGITAL_MAX,
            prefiltering: String::new(),
            samples_per_record,
        }
    }
}

struct EdfHeader {
    start_date: String,
    start_time: String,
    num_data_records: usize,
    signals: Vec<SignalHeader>,
}

impl EdfHeader {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        // Fixed 256-byte preamble. All fields are left-justified
        // space-padded ASCII.
        write!(writer, "{:<8}", "0")?;
        write!(writer, "{:<80}", "X X X X")?;
        write!(writer, "{:<80}", "Startdate X X X X")?;
        write!(writer, "{:<8}", self.start_date)?;
        write!(writer, "{:<8}", self.start_time)?;
        write!(writer, "{:<8}", 256 * (self.signals.len() + 1))?;
        write!(writer, "{:<44}", "EDF+C")?;
        write!(writer, "{:<8}", self.num_data_records)?;
        write!(writer, "{:<8}", 1)?;
        write!(writer, "{:<4}", self.signals.len())?;

        // Per-signal fields, each written as a block across all
        // signals.
        for signal in &self.signals {
            write!(writer, "{:<16}", signal.label)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<80}", signal.transducer)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.dimension)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.physical_min)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.physical_max)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.digital_min)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.digital_max)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<80}", signal.prefiltering)?;
        }
        for signal in &self.signals {
            write!(writer, "{:<8}", signal.samples_per_record)?;
        }
        for _ in &self.signals {
            write!(writer, "{:<32}", "")?;
        }

        Ok(())
    }
}

/// Map a physical µV value onto the 16-bit digital range.
fn quantize(value: f64) -> i16 {
    let scaled = (value - PHYSICAL_MIN) / (PHYSICAL_MAX - PHYSICAL_MIN)
        * f64::from(DIGITAL_MAX - DIGITAL_MIN)
        + f64::from(DIGITAL_MIN);
    scaled
        .round()
        .clamp(f64::from(DIGITAL_MIN), f64::from(DIGITAL_MAX)) as i16
}

/// Render one record's annotation block: the record-keeping TAL,
/// followed by every staged annotation that falls inside the record,
/// as zero-duration TALs.
fn tal_block(record: usize, annotations: &[&Annotation]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(format!("+{}{}{}{}", record, TAL_TEXT_SEP, TAL_TEXT_SEP, TAL_END).as_bytes());
    for annotation in annotations {
        block.extend_from_slice(
            format!(
                "+{}{}{}{}{}",
                annotation.time, TAL_TEXT_SEP, annotation.text, TAL_TEXT_SEP, TAL_END
            )
            .as_bytes(),
        );
    }
    block
}

/// Convert the staged CSV pair into an EDF+ file.
///
/// The data CSV supplies the channel labels and the sample matrix; the
/// annotations CSV, if present on disk, supplies zero-duration
/// annotations at their staged offsets. The last data record is
/// zero-padded to a full second.
pub fn save_csv_as_edf(
    data_csv: &Path,
    annotations_csv: Option<&Path>,
    edf_path: &Path,
    sample_rate: usize,
) -> Result<(), Error> {
    let (labels, channels) = staging::read_data_matrix(data_csv)?;

    let annotations = match annotations_csv {
        Some(path) if path.exists() => staging::read_annotations(path)?,
        _ => Vec::new(),
    };

    let samples = channels.first().map(|channel| channel.len()).unwrap_or(0);
    let records = (samples + sample_rate - 1) / sample_rate;

    // Bucket annotations into the record containing their onset;
    // offsets past the end of the data land in the last record.
    let mut buckets: Vec<Vec<&Annotation>> = vec![Vec::new(); records];
    if records > 0 {
        for annotation in &annotations {
            let record = (annotation.time.max(0.0) as usize).min(records - 1);
            buckets[record].push(annotation);
        }
    }

    let tal_blocks: Vec<Vec<u8>> = (0..records)
        .map(|record| tal_block(record, &buckets[record]))
        .collect();
    let annotation_samples = tal_blocks
        .iter()
        .map(|block| (block.len() + 1) / 2)
        .max()
        .unwrap_or(0)
        .max(MIN_ANNOTATION_SAMPLES);

    let now = Local::now();
    let mut signals: Vec<SignalHeader> = labels
        .iter()
        .map(|label| SignalHeader::channel(label, sample_rate))
        .collect();
    signals.push(SignalHeader::annotations(annotation_samples));

    let header = EdfHeader {
        start_date: now.format("%d.%m.%y").to_string(),
        start_time: now.format("%H.%M.%S").to_string(),
        num_data_records: records,
        signals,
    };

    info!(
        data = %data_csv.display(),
        edf = %edf_path.display(),
        records,
        "writing EDF+ file"
    );

    let mut output = BufWriter::new(File::create(edf_path)?);
    header.write_to(&mut output)?;

    for record in 0..records {
        for channel in &channels {
            for s in record * sample_rate..(record + 1) * sample_rate {
                let value = channel.get(s).copied().unwrap_or(0.0);
                output.write_i16::<LittleEndian>(quantize(value))?;
            }
        }

        let block = &tal_blocks[record];
        output.write_all(block)?;
        for _ in block.len()..annotation_samples * 2 {
            output.write_all(&[0])?;
        }
    }

    output.flush()?;
    info!(edf = %edf_path.display(), "EDF+ file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_is_within_half_a_step() {
        let step = (PHYSICAL_MAX - PHYSICAL_MIN) / f64::from(DIGITAL_MAX - DIGITAL_MIN);

        for &value in [0.0, 1.5, -1.5, 250.0, -9999.9, 9999.9, 1562.5039].iter() {
            let digital = quantize(value);
            let restored = f64::from(i32::from(digital) - DIGITAL_MIN)
                / f64::from(DIGITAL_MAX - DIGITAL_MIN)
                * (PHYSICAL_MAX - PHYSICAL_MIN)
                + PHYSICAL_MIN;
            assert!(
                (restored - value).abs() <= step / 2.0 + 1e-9,
                "{} -> {} -> {}",
                value,
                digital,
                restored
            );
        }
    }

    #[test]
    fn quantization_clamps_out_of_range_values() {
        assert_eq!(quantize(20000.0), DIGITAL_MAX as i16);
        assert_eq!(quantize(-20000.0), DIGITAL_MIN as i16);
    }

    #[test]
    fn tal_block_layout() {
        let annotation = Annotation {
            time: 1.5,
            text: "blink".to_string(),
        };
        let block = tal_block(1, &[&annotation]);
        assert_eq!(block, b"+1\x14\x14\x00+1.5\x14blink\x14\x00".to_vec());

        // A record with no annotations still carries its keeping TAL.
        assert_eq!(tal_block(0, &[]), b"+0\x14\x14\x00".to_vec());
    }

    #[test]
    fn header_is_fixed_width() {
        let header = EdfHeader {
            start_date: "01.08.26".to_string(),
            start_time: "12.00.00".to_string(),
            num_data_records: 2,
            signals: vec![
                SignalHeader::channel("O1", 125),
                SignalHeader::channel("O2", 125),
                SignalHeader::annotations(8),
            ],
        };

        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 256 * (3 + 1));

        // Version, then the reserved field announcing EDF+C.
        assert_eq!(&bytes[0..8], b"0       ");
        assert_eq!(&bytes[192..197], b"EDF+C");
        // ns field sits at offset 252.
        assert_eq!(&bytes[252..256], b"3   ");
    }
}
