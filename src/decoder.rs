//! Assembles BLE notification packets into frames and extracts
//! calibrated per-channel samples.
//!
//! The headset streams 20-byte packets over the EEG data
//! characteristic. Four consecutive packets form one frame carrying
//! 3 time steps of 8 raw channels; the low two bits of a packet's
//! first byte hold its position (0..3) within the frame.

use std::collections::VecDeque;

use tracing::warn;

use crate::model::DeviceModel;
use crate::MAGIC_MICROVOLTS_BIT;

/// Size of a data-characteristic notification in bytes.
pub const PACKET_SIZE: usize = 20;

/// Number of packets per frame.
pub const FRAME_PACKETS: usize = 4;

/// Samples per packet: bytes 2..19 hold six 24-bit big-endian values.
const SAMPLES_PER_PACKET: usize = 6;

/// Time steps carried by one complete frame.
const ROWS_PER_FRAME: usize = 3;

/// Raw channels per time step before model demultiplexing.
const RAW_CHANNELS: usize = 8;

/// A decoded frame: three time-ordered rows of µV samples, already
/// reduced to the model's electrode columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub rows: Vec<Vec<f64>>,
}

/// Packet-queue state machine.
///
/// Push notifications in arrival order; a [`Frame`] is produced
/// whenever four packets are queued and the head packet's frame id is
/// 0. A nonzero head id means the stream is mid-frame: the head packet
/// is silently dropped so that assembly realigns on the next frame
/// boundary.
#[derive(Debug)]
pub struct PacketDecoder {
    model: DeviceModel,
    queue: VecDeque<[u8; PACKET_SIZE]>,
}

impl PacketDecoder {
    pub fn new(model: DeviceModel) -> Self {
        PacketDecoder {
            model,
            queue: VecDeque::with_capacity(FRAME_PACKETS),
        }
    }

    /// Feed one notification payload. Returns a frame when this packet
    /// completes one.
    ///
    /// Packets shorter than [`PACKET_SIZE`] violate the protocol and
    /// are dropped with a warning; trailing bytes past the packet size
    /// are ignored.
    pub fn push(&mut self, packet: &[u8]) -> Option<Frame> {
        if packet.len() < PACKET_SIZE {
            warn!(len = packet.len(), "discarding short EEG packet");
            return None;
        }

        let mut buf = [0u8; PACKET_SIZE];
        buf.copy_from_slice(&packet[..PACKET_SIZE]);
        self.queue.push_back(buf);

        if self.queue.len() < FRAME_PACKETS {
            return None;
        }

        // A frame must start with id 0; otherwise drop the head packet
        // and let the queue slide onto the next boundary.
        if self.queue[0][0] & 0x03 != 0 {
            self.queue.pop_front();
            return None;
        }

        let frame = self.decode_frame();
        self.queue.clear();
        Some(frame)
    }

    /// Number of packets currently queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drop any partially assembled frame.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    fn decode_frame(&self) -> Frame {
        let mut raw = [0f64; FRAME_PACKETS * SAMPLES_PER_PACKET];

        for (i, packet) in self.queue.iter().enumerate() {
            for j in 0..SAMPLES_PER_PACKET {
                let offset = 2 + 3 * j;
                raw[SAMPLES_PER_PACKET * i + j] = decode_sample([
                    packet[offset],
                    packet[offset + 1],
                    packet[offset + 2],
                ]);
            }
        }

        // The 24 values form a 3x8 row-major matrix: one row per time
        // step, one column per raw channel. Keep only the columns the
        // model wires to electrodes.
        let columns = self.model.raw_columns();
        let rows = (0..ROWS_PER_FRAME)
            .map(|t| {
                columns
                    .iter()
                    .map(|&c| raw[RAW_CHANNELS * t + c])
                    .collect()
            })
            .collect();

        Frame { rows }
    }
}

/// Interpret 3 bytes as a 24-bit big-endian signed integer and scale
/// to microvolts.
fn decode_sample(bytes: [u8; 3]) -> f64 {
    // Pad to 32 bits and shift the sign down.
    let value = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
    f64::from(value) * MAGIC_MICROVOLTS_BIT
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one 20-byte packet with the given frame id whose six
    /// sample slots all hold `fill`.
    fn packet(id: u8, fill: [u8; 3]) -> Vec<u8> {
        let mut p = vec![0u8; PACKET_SIZE];
        p[0] = id;
        for j in 0..SAMPLES_PER_PACKET {
            p[2 + 3 * j..2 + 3 * j + 3].copy_from_slice(&fill);
        }
        p
    }

    #[test]
    fn sample_scaling() {
        // 0x7FFFFF is the positive 24-bit extreme.
        assert_eq!(decode_sample([0x7F, 0xFF, 0xFF]), 8_388_607.0 * MAGIC_MICROVOLTS_BIT);
        // Sign extension: 0xFFFFFF == -1.
        assert_eq!(decode_sample([0xFF, 0xFF, 0xFF]), -MAGIC_MICROVOLTS_BIT);
        // 0x800000 is the negative extreme.
        assert_eq!(decode_sample([0x80, 0x00, 0x00]), -8_388_608.0 * MAGIC_MICROVOLTS_BIT);
        assert_eq!(decode_sample([0x00, 0x00, 0x00]), 0.0);
    }

    #[test]
    fn valid_frame_yields_three_rows() {
        let mut decoder = PacketDecoder::new(DeviceModel::NeuroPlay8Cap);

        for id in 0..3 {
            assert_eq!(decoder.push(&packet(id, [0x00, 0x00, 0x01])), None);
        }
        let frame = decoder
            .push(&packet(3, [0x00, 0x00, 0x01]))
            .expect("fourth packet completes the frame");

        assert_eq!(frame.rows.len(), 3);
        for row in &frame.rows {
            assert_eq!(row.len(), 8);
            for &value in row {
                assert_eq!(value, MAGIC_MICROVOLTS_BIT);
            }
        }
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn six_channel_demux_drops_raw_columns_1_and_6() {
        let mut decoder = PacketDecoder::new(DeviceModel::NeuroPlay6C);

        // Encode the raw channel index into each sample so the kept
        // column order is observable: sample k of packet i is raw
        // value 6*i + k, i.e. raw column (6*i + k) % 8.
        let mut frame = None;
        for i in 0..4u8 {
            let mut p = vec![0u8; PACKET_SIZE];
            p[0] = i;
            for j in 0..SAMPLES_PER_PACKET {
                p[2 + 3 * j + 2] = (6 * i + j as u8) % 8;
            }
            frame = decoder.push(&p);
        }
        let frame = frame.expect("frame");

        for row in &frame.rows {
            assert_eq!(row.len(), 6);
            let raw_indices: Vec<u8> = row
                .iter()
                .map(|v| (v / MAGIC_MICROVOLTS_BIT).round() as u8)
                .collect();
            assert_eq!(raw_indices, vec![0, 2, 3, 4, 5, 7]);
        }
    }

    #[test]
    fn realigns_on_misaligned_frame_id() {
        let mut decoder = PacketDecoder::new(DeviceModel::NeuroPlay8Cap);

        // Ids [1, 0, 0, 0, 0]: the first fill of the queue is headed
        // by id 1 and must be dropped; the remaining four decode.
        assert_eq!(decoder.push(&packet(1, [0; 3])), None);
        assert_eq!(decoder.push(&packet(0, [0; 3])), None);
        assert_eq!(decoder.push(&packet(0, [0; 3])), None);
        assert_eq!(decoder.push(&packet(0, [0; 3])), None);
        assert_eq!(decoder.pending(), 3);

        let frame = decoder.push(&packet(0, [0; 3])).expect("realigned frame");
        assert_eq!(frame.rows.len(), 3);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn short_packets_are_discarded() {
        let mut decoder = PacketDecoder::new(DeviceModel::NeuroPlay8Cap);

        assert_eq!(decoder.push(&[0x00; 19]), None);
        assert_eq!(decoder.pending(), 0);

        // A short packet in the middle of a frame must not count
        // towards the four-packet window.
        for id in 0..3 {
            decoder.push(&packet(id, [0; 3]));
        }
        decoder.push(&[0x03; 5]);
        assert_eq!(decoder.pending(), 3);
        assert!(decoder.push(&packet(3, [0; 3])).is_some());
    }
}
