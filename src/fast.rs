//! Fast-channel state machine: calibration -> sync acquisition -> nibble
//! capture -> CRC check, emitting validated 32-bit frames.
//!
//! State is advanced by explicit matches over [`FsmState`], never by
//! integer/ordinal arithmetic, so reordering the enum can't silently change
//! behavior.

use crate::crc::crc4_any_matches;
use crate::protocol::{
    interval_from_ticks, is_sync, recalibrate, CALIBRATION_PULSES, NIBBLE_MAX, NIBBLE_MIN,
    PAYLOAD_PULSES, RESYNC_PULSES,
};
use crate::slow::SlowChannel;
use crate::stats::ChannelStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Calib,
    Init,
    Sync,
    Status,
    Sig1D1,
    Sig1D2,
    Sig1D3,
    Sig2D1,
    Sig2D2,
    Sig2D3,
    Crc,
}

/// The next payload state after successfully capturing a nibble, expressed
/// as an explicit table rather than `state as u8 + 1`.
fn next_payload_state(state: FsmState) -> FsmState {
    match state {
        FsmState::Status => FsmState::Sig1D1,
        FsmState::Sig1D1 => FsmState::Sig1D2,
        FsmState::Sig1D2 => FsmState::Sig1D3,
        FsmState::Sig1D3 => FsmState::Sig2D1,
        FsmState::Sig2D1 => FsmState::Sig2D2,
        FsmState::Sig2D2 => FsmState::Sig2D3,
        FsmState::Sig2D3 => FsmState::Crc,
        other => other,
    }
}

/// Extracts the 7 payload nibbles (status through sig1 LSN) from a 32-bit
/// `rx_reg` that has had all 8 payload nibbles shifted in, MSN-first.
fn payload_nibbles(rx_reg: u32) -> [u8; 7] {
    let mut nibbles = [0u8; 7];
    for (i, n) in nibbles.iter_mut().enumerate() {
        *n = ((rx_reg >> (28 - 4 * i)) & 0xF) as u8;
    }
    nibbles
}

/// All per-channel fast-path state: the FSM position, the calibration
/// estimate, the nibble shift register, and the most recently validated
/// frame.
#[derive(Debug, Clone)]
pub struct FastChannel {
    fsm_state: FsmState,
    tick_per_unit: u32,
    pulse_counter: u32,
    state_pulse_counter: u32,
    pause_pulse_received: bool,
    rx_reg: u32,
    rx_last: u32,
    has_valid_fast: bool,
}

impl FastChannel {
    pub fn new() -> Self {
        Self {
            fsm_state: FsmState::Calib,
            tick_per_unit: 0,
            pulse_counter: 0,
            state_pulse_counter: 0,
            pause_pulse_received: false,
            rx_reg: 0,
            rx_last: 0,
            has_valid_fast: false,
        }
    }

    pub fn fsm_state(&self) -> FsmState {
        self.fsm_state
    }

    pub fn tick_per_unit(&self) -> u32 {
        self.tick_per_unit
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.has_valid_fast.then_some(self.rx_last)
    }

    /// Advances the state machine by one pulse. Returns `+1` on a newly
    /// validated frame, `0` while still assembling, `-1` on a framing or CRC
    /// error. On `+1`, `slow` has already been fed the frame's status
    /// nibble; on any error that drops to INIT or on CRC mismatch, `slow`
    /// has already been reset.
    pub fn step(&mut self, ticks: u32, stats: &mut ChannelStats, slow: &mut SlowChannel) -> i32 {
        match self.fsm_state {
            FsmState::Calib => self.step_calib(ticks, stats),
            FsmState::Init => self.step_init(ticks, stats),
            FsmState::Sync => self.step_sync(ticks, stats, slow),
            _ => self.step_payload(ticks, stats, slow),
        }
    }

    fn step_calib(&mut self, ticks: u32, stats: &mut ChannelStats) -> i32 {
        self.pulse_counter = self.pulse_counter.saturating_add(1);

        if self.state_pulse_counter == 0 {
            // First pulse of a hypothesis: assume it's a sync.
            self.tick_per_unit = recalibrate(ticks);
            self.state_pulse_counter = 1;
        } else {
            let interval = interval_from_ticks(ticks, self.tick_per_unit);
            if (NIBBLE_MIN..=NIBBLE_MAX).contains(&interval) {
                self.state_pulse_counter += 1;
                if self.state_pulse_counter == 1 + PAYLOAD_PULSES {
                    self.fsm_state = FsmState::Init;
                    self.pulse_counter = 0;
                    self.state_pulse_counter = 0;
                    return 0;
                }
            } else {
                // Hypothesis failed: recalibrate from this pulse and retry.
                self.tick_per_unit = recalibrate(ticks);
                self.state_pulse_counter = 1;
            }
        }

        if self.pulse_counter >= CALIBRATION_PULSES {
            self.restart(stats);
        }
        0
    }

    fn step_init(&mut self, ticks: u32, stats: &mut ChannelStats) -> i32 {
        if is_sync(ticks, self.tick_per_unit) {
            if self.state_pulse_counter == 1 {
                self.pause_pulse_received = true;
            }
            self.state_pulse_counter = 0;
            self.fsm_state = FsmState::Status;
            self.tick_per_unit = recalibrate(ticks);
            return 0;
        }
        self.state_pulse_counter += 1;
        if self.state_pulse_counter > RESYNC_PULSES {
            self.restart(stats);
        }
        0
    }

    fn step_sync(&mut self, ticks: u32, stats: &mut ChannelStats, slow: &mut SlowChannel) -> i32 {
        if is_sync(ticks, self.tick_per_unit) {
            self.rx_reg = 0;
            self.tick_per_unit = recalibrate(ticks);
            self.fsm_state = FsmState::Status;
            return 0;
        }

        if !self.pause_pulse_received {
            self.pause_pulse_received = true;
            stats.pause_cnt = stats.pause_cnt.saturating_add(1);
            return 0;
        }

        stats.sync_err = stats.sync_err.saturating_add(1);
        let interval = interval_from_ticks(ticks, self.tick_per_unit);
        if interval > crate::protocol::SYNC_INTERVAL as i32 {
            stats.long_interval_err = stats.long_interval_err.saturating_add(1);
        } else {
            stats.short_interval_err = stats.short_interval_err.saturating_add(1);
        }
        self.fsm_state = FsmState::Init;
        self.state_pulse_counter = 0;
        slow.reset();
        -1
    }

    fn step_payload(&mut self, ticks: u32, stats: &mut ChannelStats, slow: &mut SlowChannel) -> i32 {
        if self.fsm_state == FsmState::Status
            && !self.pause_pulse_received
            && is_sync(ticks, self.tick_per_unit)
        {
            self.pause_pulse_received = true;
            stats.pause_cnt = stats.pause_cnt.saturating_add(1);
            self.tick_per_unit = recalibrate(ticks);
            return 0;
        }

        let interval = interval_from_ticks(ticks, self.tick_per_unit);

        if interval < NIBBLE_MIN {
            stats.short_interval_err = stats.short_interval_err.saturating_add(1);
            self.fsm_state = FsmState::Init;
            self.state_pulse_counter = 0;
            slow.reset();
            return -1;
        }
        if interval > NIBBLE_MAX {
            stats.long_interval_err = stats.long_interval_err.saturating_add(1);
            self.fsm_state = FsmState::Init;
            self.state_pulse_counter = 0;
            slow.reset();
            return -1;
        }

        self.rx_reg = (self.rx_reg << 4) | interval as u32;

        if self.fsm_state != FsmState::Crc {
            self.fsm_state = next_payload_state(self.fsm_state);
            return 0;
        }

        // CRC state: the frame is complete regardless of CRC outcome.
        stats.frame_cnt = stats.frame_cnt.saturating_add(1);
        self.pause_pulse_received = false;
        self.fsm_state = FsmState::Sync;

        let nibbles = payload_nibbles(self.rx_reg);
        let expected = (self.rx_reg & 0xF) as u8;
        if crc4_any_matches(&nibbles, expected) {
            self.rx_last = self.rx_reg;
            self.has_valid_fast = true;
            let status = (self.rx_reg >> 28) & 0xF;
            slow.on_frame(status);
            1
        } else {
            stats.crc_err_cnt = stats.crc_err_cnt.saturating_add(1);
            slow.reset();
            -1
        }
    }

    /// Zeroes calibration and framing state and re-enters CALIB. Does not
    /// touch `rx_last`/`has_valid_fast` (the last validated frame remains
    /// readable) and does not touch the slow-channel mailbox (cleared only
    /// by a framing error, per the slow-channel reset rule).
    fn restart(&mut self, stats: &mut ChannelStats) {
        self.fsm_state = FsmState::Calib;
        self.tick_per_unit = 0;
        self.pulse_counter = 0;
        self.state_pulse_counter = 0;
        self.pause_pulse_received = false;
        self.rx_reg = 0;
        stats.restart_cnt = stats.restart_cnt.saturating_add(1);
    }
}

impl Default for FastChannel {
    fn default() -> Self {
        Self::new()
    }
}
