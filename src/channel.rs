//! Public entry point: one `Channel` per physical SENT line, owning the
//! fast-channel FSM, the slow-channel demux, and the diagnostic counters.

use crate::error::ChannelError;
use crate::fast::FastChannel;
use crate::protocol::MAILBOX_SLOTS;
use crate::slow::SlowChannel;
use crate::stats::ChannelStats;
use serde::{Deserialize, Serialize};

/// Read-only projection of the most recently validated frame, suitable for
/// logging or JSON serialization. Not the internal decoder state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    pub status: u32,
    pub sig0: u32,
    pub sig1: u32,
    pub raw: u32,
}

/// Read-only projection of one slow-channel mailbox slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowChannelEntry {
    pub id: u8,
    pub data: u16,
}

/// Owns all state for one SENT line. Not `Sync`; a host sharing a channel
/// across tasks must provide its own critical section (see the concurrency
/// note in the crate docs).
#[derive(Debug, Clone)]
pub struct Channel {
    fast: FastChannel,
    slow: SlowChannel,
    stats: ChannelStats,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            fast: FastChannel::new(),
            slow: SlowChannel::new(),
            stats: ChannelStats::new(),
        }
    }

    /// Advances the decoder by one pulse. `flags` bit 0 is the caller's
    /// hardware-overflow indicator; other bits are reserved and ignored.
    ///
    /// Returns `+1` on a newly validated frame, `0` while still assembling,
    /// `-1` on a framing or CRC error. This return convention is part of the
    /// protocol's observable contract and is intentionally not wrapped in a
    /// `Result`.
    pub fn decode(&mut self, ticks: u32, flags: u8) -> i32 {
        if flags & 0x1 != 0 {
            self.stats.hw_overflow_cnt = self.stats.hw_overflow_cnt.saturating_add(1);
        }
        self.fast.step(ticks, &mut self.stats, &mut self.slow)
    }

    /// The raw 32-bit word of the most recently validated frame.
    pub fn get_msg(&self) -> Result<u32, ChannelError> {
        self.fast.last_frame().ok_or(ChannelError::NoData)
    }

    /// Decomposes the most recently validated frame into `(status, sig0,
    /// sig1)`. `sig1` has the device-observed nibble swap applied, per the
    /// preserved transform.
    pub fn get_signals(&self) -> Result<(u32, u32, u32), ChannelError> {
        let raw = self.fast.last_frame().ok_or(ChannelError::NoData)?;
        Ok(decompose_signals(raw))
    }

    /// The most recently validated frame as a serializable view.
    pub fn get_decoded_frame(&self) -> Result<DecodedFrame, ChannelError> {
        let raw = self.fast.last_frame().ok_or(ChannelError::NoData)?;
        let (status, sig0, sig1) = decompose_signals(raw);
        Ok(DecodedFrame {
            status,
            sig0,
            sig1,
            raw,
        })
    }

    /// Looks up one slow-channel mailbox entry by id.
    pub fn get_slow_channel_value(&self, id: u8) -> Result<u16, ChannelError> {
        self.slow.get(id).ok_or(ChannelError::NotFound)
    }

    /// All currently valid mailbox entries, for diagnostic dumps.
    pub fn slow_channel_entries(&self) -> Vec<SlowChannelEntry> {
        self.slow
            .slots()
            .iter()
            .filter(|s| s.valid)
            .map(|s| SlowChannelEntry {
                id: s.id,
                data: s.data,
            })
            .collect()
    }

    /// The current `tick_per_unit` estimate, as a diagnostic float. Zero
    /// means uncalibrated.
    pub fn get_tick_time(&self) -> f64 {
        self.fast.tick_per_unit() as f64
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub const MAILBOX_SLOTS: usize = MAILBOX_SLOTS;
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// `status = bits 31..28`, `sig0 = bits 27..16` (natural nibble order),
/// `sig1 = bits 15..4` with its nibble order reversed — preserved verbatim
/// as a device-observed quirk rather than a protocol requirement.
fn decompose_signals(raw: u32) -> (u32, u32, u32) {
    let status = (raw >> 28) & 0xF;
    let sig0 = (raw >> 16) & 0xFFF;
    let tmp = (raw >> 4) & 0xFFF;
    let sig1 = ((tmp >> 8) & 0x00F) | (tmp & 0x0F0) | ((tmp << 8) & 0xF00);
    (status, sig0, sig1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc4_sae;

    const TICK_PER_UNIT: u32 = 3;

    fn sync_ticks() -> u32 {
        (crate::protocol::SYNC_INTERVAL + crate::protocol::OFFSET) * TICK_PER_UNIT
    }

    fn nibble_ticks(value: u32) -> u32 {
        (value + crate::protocol::OFFSET) * TICK_PER_UNIT
    }

    fn calibrate(ch: &mut Channel) {
        ch.decode(sync_ticks(), 0);
        for _ in 0..8 {
            ch.decode(nibble_ticks(0), 0);
        }
    }

    fn feed_frame(ch: &mut Channel, status: u32, sig0: u32, sig1_raw: u32) -> i32 {
        let n1 = (sig0 >> 8) & 0xF;
        let n2 = (sig0 >> 4) & 0xF;
        let n3 = sig0 & 0xF;
        let n4 = (sig1_raw >> 8) & 0xF;
        let n5 = (sig1_raw >> 4) & 0xF;
        let n6 = sig1_raw & 0xF;
        let nibbles = [
            status as u8,
            n1 as u8,
            n2 as u8,
            n3 as u8,
            n4 as u8,
            n5 as u8,
            n6 as u8,
        ];
        let crc = crc4_sae(&nibbles);

        ch.decode(sync_ticks(), 0);
        for &n in &nibbles {
            ch.decode(nibble_ticks(n as u32), 0);
        }
        ch.decode(nibble_ticks(crc as u32), 0)
    }

    #[test]
    fn fresh_channel_reports_no_data() {
        let ch = Channel::new();
        assert_eq!(ch.get_msg(), Err(ChannelError::NoData));
        assert_eq!(ch.get_signals(), Err(ChannelError::NoData));
        assert_eq!(ch.get_slow_channel_value(0), Err(ChannelError::NotFound));
    }

    #[test]
    fn decode_and_get_signals_round_trip() {
        let mut ch = Channel::new();
        calibrate(&mut ch);
        let r = feed_frame(&mut ch, 0x0, 0x123, 0x456);
        assert_eq!(r, 1);

        let (status, sig0, sig1) = ch.get_signals().unwrap();
        assert_eq!(status, 0x0);
        assert_eq!(sig0, 0x123);
        // sig1 nibble-swap of 0x456 -> ((0x456>>8)&0xF)|(0x456&0xF0)|((0x456<<8)&0xF00)
        // = 0x4 | 0x50 | 0x600 = 0x654
        assert_eq!(sig1, 0x654);
    }

    #[test]
    fn sig1_swap_is_its_own_inverse() {
        let tmp = 0x456u32;
        let swapped = ((tmp >> 8) & 0x00F) | (tmp & 0x0F0) | ((tmp << 8) & 0xF00);
        let swapped_again =
            ((swapped >> 8) & 0x00F) | (swapped & 0x0F0) | ((swapped << 8) & 0xF00);
        assert_eq!(swapped_again, tmp);
    }

    #[test]
    fn overflow_flag_increments_counter_without_affecting_decode() {
        let mut ch = Channel::new();
        ch.decode(sync_ticks(), 0x1);
        assert_eq!(ch.stats().hw_overflow_cnt, 1);
    }

    #[test]
    fn hw_overflow_flag_has_no_effect_on_good_decode() {
        let mut ch1 = Channel::new();
        let mut ch2 = Channel::new();
        calibrate(&mut ch1);
        calibrate(&mut ch2);
        let r1 = feed_frame(&mut ch1, 0x0, 0x123, 0x456);
        // ch2 takes the same pulses but with the overflow flag set throughout.
        ch2.decode(sync_ticks(), 0x1);
        for _ in 0..8 {
            ch2.decode(nibble_ticks(0), 0x1);
        }
        let nibbles = [0x0u8, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6];
        let crc = crc4_sae(&nibbles);
        ch2.decode(sync_ticks(), 0x1);
        for &n in &nibbles {
            ch2.decode(nibble_ticks(n as u32), 0x1);
        }
        let r2 = ch2.decode(nibble_ticks(crc as u32), 0x1);
        assert_eq!(r1, r2);
        assert_eq!(ch1.get_msg(), ch2.get_msg());
    }
}
