//! Command Intake (§4.I).
//!
//! Decodes the 8-byte request frame (§6.1) into a validated
//! [`ExternalCommandSlot`], rate-limiting and debouncing it before the
//! pack orchestrator and balancing engine ever see a value. Rate limiting
//! reuses the same token-bucket approach the RPC layer uses elsewhere in
//! this codebase, just against the simulated tick clock instead of wall
//! time.

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use burster::Limiter;

use crate::config::CommandIntakeConfig;
use crate::wire;

static CURRENT_TICK_MS: AtomicU32 = AtomicU32::new(0);

/// The periodic driver calls this once per tick before dispatching any
/// frame to [`CommandIntake::receive_bms_request`], keeping the rate
/// limiter's notion of time in lockstep with the rest of the core.
pub fn set_current_tick_ms(now_ms: u32) {
    CURRENT_TICK_MS.store(now_ms, Ordering::Relaxed);
}

fn tick_time_provider() -> Duration {
    Duration::from_millis(u64::from(CURRENT_TICK_MS.load(Ordering::Relaxed)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    None,
    Standby,
    Normal,
    Charge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancingRequestedState {
    None,
    On,
    Off,
}

/// Validated, debounced request state consumed by the pack orchestrator
/// and balancing engine (§3).
#[derive(Debug, Clone, Copy)]
pub struct ExternalCommandSlot {
    pub requested_mode: RequestedMode,
    pub prev_requested_mode: RequestedMode,
    pub pending_mode: RequestedMode,
    pub state_counter: u32,
    pub timestamp_ms: u32,
    pub clear_persistent_flags: bool,
    pub balancing_enable: BalancingRequestedState,
    pub balancing_threshold_mv: Option<u16>,
}

impl Default for ExternalCommandSlot {
    fn default() -> Self {
        Self {
            requested_mode: RequestedMode::None,
            prev_requested_mode: RequestedMode::None,
            pending_mode: RequestedMode::None,
            state_counter: 0,
            timestamp_ms: 0,
            clear_persistent_flags: false,
            balancing_enable: BalancingRequestedState::None,
            balancing_threshold_mv: None,
        }
    }
}

pub struct CommandIntake {
    config: CommandIntakeConfig,
    slot: ExternalCommandSlot,
    limiter: burster::TokenBucket<fn() -> Duration>,
    dropped_count: u32,
}

impl CommandIntake {
    pub fn new(config: CommandIntakeConfig) -> Self {
        Self {
            config,
            slot: ExternalCommandSlot::default(),
            limiter: burster::TokenBucket::new_with_time_provider(
                config.max_requests_per_second,
                config.max_requests_per_second,
                tick_time_provider as fn() -> Duration,
            ),
            dropped_count: 0,
        }
    }

    pub fn slot(&self) -> &ExternalCommandSlot {
        &self.slot
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }

    /// Decode and apply one incoming 8-byte frame. Frames exceeding the
    /// configured rate are silently dropped (counted, not reported as an
    /// error — a noisy bus is expected, not exceptional).
    pub fn receive_bms_request(&mut self, frame: &[u8; 8], now_ms: u32) {
        if self.limiter.try_consume(1).is_err() {
            self.dropped_count += 1;
            return;
        }

        let mode_bits = wire::read_bits(frame, 1, 2);
        let new_mode = match mode_bits {
            0 => RequestedMode::Standby,
            1 => RequestedMode::Normal,
            2 => RequestedMode::Charge,
            _ => RequestedMode::None,
        };
        let clear_persistent_flags = wire::read_bits(frame, 2, 1) != 0;
        let balancing_bit = wire::read_bits(frame, 8, 1) != 0;
        let threshold_raw = wire::read_bits(frame, 23, 8) as u16;

        let stale = crate::clock::elapsed_since(self.slot.timestamp_ms, now_ms) > self.config.request_update_window_ms;

        self.slot.prev_requested_mode = self.slot.requested_mode;
        self.slot.requested_mode = new_mode;
        if new_mode != self.slot.prev_requested_mode || stale {
            self.slot.pending_mode = new_mode;
        }
        self.slot.state_counter = self.slot.state_counter.wrapping_add(1);
        self.slot.timestamp_ms = now_ms;
        self.slot.clear_persistent_flags = clear_persistent_flags;
        self.slot.balancing_enable = if balancing_bit { BalancingRequestedState::On } else { BalancingRequestedState::Off };
        self.slot.balancing_threshold_mv = Some(threshold_raw.clamp(0, u16::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_mode(mode: u8) -> [u8; 8] {
        let mut frame = [0u8; 8];
        wire::write_bits(&mut frame, 1, 2, u64::from(mode));
        frame
    }

    #[test]
    fn decodes_mode_and_marks_pending_on_change() {
        let mut intake = CommandIntake::new(CommandIntakeConfig::default());
        intake.receive_bms_request(&frame_with_mode(1), 0);
        assert_eq!(intake.slot().requested_mode, RequestedMode::Normal);
        assert_eq!(intake.slot().pending_mode, RequestedMode::Normal);
    }

    #[test]
    fn unchanged_fresh_mode_does_not_re_pend() {
        let mut intake = CommandIntake::new(CommandIntakeConfig::default());
        intake.receive_bms_request(&frame_with_mode(1), 0);
        intake.receive_bms_request(&frame_with_mode(1), 10);
        // Second frame repeats the same mode within the freshness window;
        // pending_mode still reflects the original acceptance.
        assert_eq!(intake.slot().pending_mode, RequestedMode::Normal);
    }

    #[test]
    fn stale_slot_re_pends_identical_mode() {
        let mut intake = CommandIntake::new(CommandIntakeConfig::default());
        intake.receive_bms_request(&frame_with_mode(1), 0);
        let window = intake.config.request_update_window_ms;
        intake.receive_bms_request(&frame_with_mode(1), window + 1);
        assert_eq!(intake.slot().pending_mode, RequestedMode::Normal);
    }

    #[test]
    fn clear_persistent_flags_bit_is_decoded() {
        let mut frame = frame_with_mode(0);
        wire::write_bits(&mut frame, 2, 1, 1);
        let mut intake = CommandIntake::new(CommandIntakeConfig::default());
        intake.receive_bms_request(&frame, 0);
        assert!(intake.slot().clear_persistent_flags);
    }

    #[test]
    fn balancing_threshold_is_decoded() {
        let mut frame = frame_with_mode(0);
        wire::write_bits(&mut frame, 23, 8, 42);
        let mut intake = CommandIntake::new(CommandIntakeConfig::default());
        intake.receive_bms_request(&frame, 0);
        assert_eq!(intake.slot().balancing_threshold_mv, Some(42));
    }
}
