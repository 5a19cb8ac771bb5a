//! The narrow capability set a JTAG bridge adapter must expose to the
//! player. The core never talks to USB directly; it only calls through
//! this trait, a single point of contact between the player and the wire.

use std::collections::VecDeque;
use std::time::Duration;

use crate::parser::TrstMode;
use crate::SvfError;

/// Capability set a hardware bridge must provide. All methods take
/// `&mut self` since every real transport needs to mutate its own state
/// (open handles, sequence counters) to perform them.
pub trait HardwareInterface {
    /// Best-effort TCK rate; no return value.
    fn set_frequency(&mut self, hz: f64);

    /// Drive the TRST line.
    fn set_trst(&mut self, mode: TrstMode);

    /// Clock `bit_count` TMS bits (LSB-first from `byte`) with TDI held low; TDO ignored.
    fn pulse_tms(&mut self, byte: u8, bit_count: u8);

    /// Clock `count` TCK cycles while holding TMS at `tms_hold`; block until at
    /// least `min_time` has elapsed. Zero count with a positive `min_time` means
    /// pure delay.
    fn pulse_tck(&mut self, tms_hold: bool, count: u32, min_time: Duration);

    /// Shift exactly `length` bits into TDI (from `tdi_hex`, MSB-at-left),
    /// raising TMS on the final bit to enter Exit1. If `is_read`, capture TDO;
    /// otherwise return zeros. Returned hex is MSB-at-left, `ceil(length/4)` nibbles.
    fn shift_data(
        &mut self,
        tdi_hex: &str,
        length: u32,
        is_dr: bool,
        is_read: bool,
    ) -> Result<String, SvfError>;
}

/// Pads `hex` on the left with `'0'` to `nibbles` hex characters.
pub(crate) fn pad_hex(hex: &str, nibbles: usize) -> String {
    if hex.len() >= nibbles {
        hex[hex.len() - nibbles..].to_string()
    } else {
        format!("{}{}", "0".repeat(nibbles - hex.len()), hex)
    }
}

/// A runnable stand-in hardware backend that logs every call at `debug!`
/// and returns deterministic zeroed TDO. Used by the CLI binary so the
/// player has something to drive end-to-end without a real bridge
/// attached; a real deployment links an external `HardwareInterface`
/// implementor (e.g. over `rusb`) in its place.
pub struct LoggingHardware {
    frequency: f64,
}

impl LoggingHardware {
    pub fn new() -> Self {
        Self { frequency: 1e6 }
    }
}

impl Default for LoggingHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareInterface for LoggingHardware {
    fn set_frequency(&mut self, hz: f64) {
        log::debug!("hw: set_frequency({} Hz)", hz);
        self.frequency = hz;
    }

    fn set_trst(&mut self, mode: TrstMode) {
        log::debug!("hw: set_trst({:?})", mode);
    }

    fn pulse_tms(&mut self, byte: u8, bit_count: u8) {
        log::debug!("hw: pulse_tms(0b{:08b}, {})", byte, bit_count);
    }

    fn pulse_tck(&mut self, tms_hold: bool, count: u32, min_time: Duration) {
        log::debug!(
            "hw: pulse_tck(tms={}, count={}, min_time={:?}) at {} Hz",
            tms_hold as u8,
            count,
            min_time,
            self.frequency
        );
    }

    fn shift_data(
        &mut self,
        tdi_hex: &str,
        length: u32,
        is_dr: bool,
        is_read: bool,
    ) -> Result<String, SvfError> {
        log::debug!(
            "hw: shift_data(tdi={}, length={}, is_dr={}, is_read={})",
            tdi_hex,
            length,
            is_dr,
            is_read
        );
        let nibbles = ((length + 3) / 4) as usize;
        Ok("0".repeat(nibbles))
    }
}

/// One recorded call to a [`RecordingHardware`], for test assertions.
#[derive(Clone, Debug, PartialEq)]
pub enum HardwareCall {
    SetFrequency(f64),
    SetTrst(TrstMode),
    PulseTms { byte: u8, bit_count: u8 },
    PulseTck { tms_hold: bool, count: u32, min_time: Duration },
    ShiftData { tdi: String, length: u32, is_dr: bool, is_read: bool },
}

/// A scriptable test double: records every call it receives and lets a
/// test queue up the TDO hex strings that subsequent `shift_data(..., is_read=true)`
/// calls should return.
#[derive(Default)]
pub struct RecordingHardware {
    pub calls: Vec<HardwareCall>,
    pub frequency: f64,
    responses: VecDeque<String>,
}

impl RecordingHardware {
    pub fn new() -> Self {
        Self { calls: Vec::new(), frequency: 1e6, responses: VecDeque::new() }
    }

    /// Queues a TDO hex string to be returned by the next `is_read` shift.
    pub fn push_response(&mut self, hex: &str) {
        self.responses.push_back(hex.to_string());
    }
}

impl HardwareInterface for RecordingHardware {
    fn set_frequency(&mut self, hz: f64) {
        self.frequency = hz;
        self.calls.push(HardwareCall::SetFrequency(hz));
    }

    fn set_trst(&mut self, mode: TrstMode) {
        self.calls.push(HardwareCall::SetTrst(mode));
    }

    fn pulse_tms(&mut self, byte: u8, bit_count: u8) {
        self.calls.push(HardwareCall::PulseTms { byte, bit_count });
    }

    fn pulse_tck(&mut self, tms_hold: bool, count: u32, min_time: Duration) {
        self.calls.push(HardwareCall::PulseTck { tms_hold, count, min_time });
    }

    fn shift_data(
        &mut self,
        tdi_hex: &str,
        length: u32,
        is_dr: bool,
        is_read: bool,
    ) -> Result<String, SvfError> {
        let nibbles = ((length + 3) / 4) as usize;
        let response = if is_read {
            self.responses.pop_front().unwrap_or_else(|| "0".repeat(nibbles))
        } else {
            "0".repeat(nibbles)
        };
        self.calls.push(HardwareCall::ShiftData {
            tdi: tdi_hex.to_string(),
            length,
            is_dr,
            is_read,
        });
        Ok(pad_hex(&response, nibbles))
    }
}
