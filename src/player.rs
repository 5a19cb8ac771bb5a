//! Interprets a parsed SVF command list against a [`HardwareInterface`],
//! maintaining the single owned copy of TAP/end-state/frequency/error
//! controller state and applying the abort policy.

use std::time::Duration;

use crate::hardware::{pad_hex, HardwareInterface};
use crate::parser::{Command, Parser, ScanRequest, SourceCommand};
use crate::tap::{self, TapState};
use crate::SvfError;

const DEFAULT_MAX_ERRORS: u64 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ScanKind {
    Ir,
    Dr,
}

/// Controller state owned exclusively by the player.
struct ControllerState {
    current_state: TapState,
    endir_state: TapState,
    enddr_state: TapState,
    frequency_hz: f64,
    error_count: u64,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            current_state: TapState::Reset,
            endir_state: TapState::Idle,
            enddr_state: TapState::Idle,
            frequency_hz: 1e6,
            error_count: 0,
        }
    }
}

/// Outcome of a full playback run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub total_commands: u64,
    pub executed_commands: u64,
    pub error_count: u64,
    pub success: bool,
}

type ProgressCallback = Box<dyn FnMut(u64, u64, u64, bool)>;

/// Plays an ordered [`SourceCommand`] list against a [`HardwareInterface`],
/// single-threaded and synchronous: each command's hardware round-trips
/// complete before the next command is dispatched.
pub struct Player<'h, H: HardwareInterface + ?Sized> {
    hw: &'h mut H,
    state: ControllerState,
    max_errors: u64,
    verbose: bool,
    progress: Option<ProgressCallback>,
}

impl<'h, H: HardwareInterface + ?Sized> Player<'h, H> {
    pub fn new(hw: &'h mut H, verbose: bool) -> Self {
        Self {
            hw,
            state: ControllerState::new(),
            max_errors: DEFAULT_MAX_ERRORS,
            verbose,
            progress: None,
        }
    }

    /// Sets the callback invoked after each dispatched command with
    /// `(current, total, errors, aborting)`.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u64, u64, u64, bool) + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    /// Sets the error threshold that triggers abort; `0` disables it.
    pub fn set_max_errors(&mut self, n: u64) {
        self.max_errors = n;
    }

    pub fn error_count(&self) -> u64 {
        self.state.error_count
    }

    pub fn current_state(&self) -> TapState {
        self.state.current_state
    }

    /// Seeds the controller's believed TCK rate and forwards it to the
    /// hardware, e.g. to reflect an out-of-band `--frequency` override
    /// applied before playback starts. Using this instead of calling the
    /// hardware interface directly keeps `FREQUENCY` dispatch's
    /// change-detection in sync with the actual rate in effect.
    pub fn set_frequency(&mut self, hz: f64) {
        self.state.frequency_hz = hz;
        self.hw.set_frequency(hz);
    }

    /// Parses `path` as SVF and plays it. Parsing failure (I/O only)
    /// propagates without executing any command.
    pub fn play_file<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
    ) -> Result<PlaybackReport, SvfError> {
        let parser = Parser::new(self.verbose);
        let commands = parser.parse_file(path)?;
        Ok(self.play(&commands))
    }

    /// Dispatches every command in order, applying the abort policy
    /// between commands. Returns once all commands ran or abort triggered.
    pub fn play(&mut self, commands: &[SourceCommand]) -> PlaybackReport {
        let total = commands.len() as u64;
        let mut executed = 0u64;
        let mut aborting = false;

        for cmd in commands {
            self.dispatch(cmd);
            executed += 1;

            if self.max_errors > 0 && self.state.error_count >= self.max_errors {
                aborting = true;
            }

            if let Some(cb) = self.progress.as_mut() {
                cb(executed, total, self.state.error_count, aborting);
            }

            if aborting {
                break;
            }
        }

        PlaybackReport {
            total_commands: total,
            executed_commands: executed,
            error_count: self.state.error_count,
            success: self.state.error_count == 0,
        }
    }

    fn dispatch(&mut self, cmd: &SourceCommand) {
        if self.verbose {
            log::debug!("executing line {}: {}", cmd.line, cmd.raw.lines().next().unwrap_or(""));
        }

        match &cmd.command {
            Command::EndIr(state) => self.state.endir_state = *state,
            Command::EndDr(state) => self.state.enddr_state = *state,
            Command::State(path) => {
                for &state in path {
                    self.goto(state);
                }
            }
            Command::Frequency(Some(hz)) => {
                if *hz != self.state.frequency_hz {
                    self.set_frequency(*hz);
                }
            }
            Command::Frequency(None) => {}
            Command::Sir(req) => self.shift(ScanKind::Ir, req, cmd.line),
            Command::Sdr(req) => self.shift(ScanKind::Dr, req, cmd.line),
            Command::RunTest(rt) => {
                self.goto(TapState::Idle);
                let cycle_time = rt.run_count as f64 / self.state.frequency_hz;
                let required = rt.min_time.max(cycle_time);
                self.hw.pulse_tck(false, rt.run_count, Duration::from_secs_f64(required));
                self.goto(rt.end_state);
            }
            Command::Trst(mode) => self.hw.set_trst(*mode),
            Command::Comment(text) => log::trace!("SVF comment (line {}): {}", cmd.line, text),
            other => {
                log::debug!("SVF line {}: ignoring unhandled command {:?}", cmd.line, other);
            }
        }
    }

    /// Drives the TAP from the current state to `target`, packing the
    /// shortest TMS sequence into a single byte (the 16-state diameter is
    /// well under a byte) and issuing one `pulse_tms` call.
    fn goto(&mut self, target: TapState) {
        if self.state.current_state == target {
            return;
        }

        if target == TapState::Reset {
            self.hw.pulse_tms(0b1111_1111, 5);
            self.state.current_state = TapState::Reset;
            return;
        }

        let bits = tap::shortest_path(self.state.current_state, target);
        let mut byte = 0u8;
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                byte |= 1 << i;
            }
        }
        if self.verbose {
            log::trace!("TAP {:?} -> {:?} via {} TMS bits", self.state.current_state, target, bits.len());
        }
        self.hw.pulse_tms(byte, bits.len() as u8);
        self.state.current_state = target;
    }

    fn shift(&mut self, kind: ScanKind, req: &ScanRequest, line: u32) {
        let nibbles = nibbles_for_bits(req.length);
        let tdi = req.tdi.clone().unwrap_or_else(|| "0".repeat(nibbles));

        self.goto(if kind == ScanKind::Ir { TapState::IrShift } else { TapState::DrShift });

        let is_read = req.tdo.is_some();
        let received = match self.hw.shift_data(&tdi, req.length, kind == ScanKind::Dr, is_read) {
            Ok(hex) => hex,
            Err(err) => {
                log::error!("SVF line {}: hardware error during shift: {}", line, err);
                self.state.error_count += 1;
                return;
            }
        };

        self.state.current_state = if kind == ScanKind::Ir { TapState::IrExit1 } else { TapState::DrExit1 };
        self.goto(if kind == ScanKind::Ir { self.state.endir_state } else { self.state.enddr_state });

        if let Some(expected) = &req.tdo {
            let mask = req.mask.clone().unwrap_or_else(|| "F".repeat(nibbles));
            if verify_tdo(&received, expected, &mask, req.length) {
                log::trace!("SVF line {}: TDO match", line);
            } else {
                self.state.error_count += 1;
                log::warn!(
                    "SVF line {}: TDO mismatch: expected {} (mask {}), got {}",
                    line,
                    expected,
                    mask,
                    received
                );
            }
        }
    }
}

fn nibbles_for_bits(length: u32) -> usize {
    ((length + 3) / 4) as usize
}

/// Bit-exact compare of `received` against `expected` under `mask`, over
/// `length` bits. Absent mask is treated as all-ones by callers.
fn verify_tdo(received: &str, expected: &str, mask: &str, length: u32) -> bool {
    let n = nibbles_for_bits(length);
    let received = pad_hex(received, n);
    let expected = pad_hex(expected, n);
    let mask = pad_hex(mask, n);

    for i in 0..n {
        let r = hex_nibble(received.as_bytes()[i]);
        let e = hex_nibble(expected.as_bytes()[i]);
        let m = hex_nibble(mask.as_bytes()[i]);
        match (r, e, m) {
            (Some(r), Some(e), Some(m)) => {
                if (r & m) != (e & m) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

fn hex_nibble(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|v| v as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::RecordingHardware;
    use crate::parser::Parser;

    fn run(svf: &str, hw: &mut RecordingHardware) -> PlaybackReport {
        let commands = Parser::new(false).parse_str(svf);
        let mut player = Player::new(hw, false);
        player.set_max_errors(1);
        player.play(&commands)
    }

    #[test]
    fn mask_identity_zero_mask_always_succeeds() {
        assert!(verify_tdo("FF", "00", "00", 8));
        assert!(verify_tdo("00", "FF", "00", 8));
    }

    #[test]
    fn mask_full_ones_matches_bitwise() {
        assert!(verify_tdo("5A", "5A", "FF", 8));
        assert!(!verify_tdo("5A", "5B", "FF", 8));
    }

    #[test]
    fn idempotent_endir_enddr_emits_no_hardware_traffic() {
        let mut hw = RecordingHardware::new();
        let report = run("ENDIR IDLE; ENDIR IDLE;", &mut hw);
        assert_eq!(report.error_count, 0);
        assert!(hw.calls.is_empty());
    }

    #[test]
    fn scenario_idcode_read() {
        let mut hw = RecordingHardware::new();
        hw.push_response("DEADBEEF");
        let report = run(
            "STATE RESET; STATE IDLE; SIR 8 TDI (02); \
             SDR 32 TDI (00000000) TDO (FFFFFFFF) MASK (00000000);",
            &mut hw,
        );
        assert_eq!(report.error_count, 0);
        assert_eq!(report.executed_commands, 4);
    }

    #[test]
    fn scenario_masked_compare_failure() {
        let mut hw = RecordingHardware::new();
        hw.push_response("5");
        let report = run("SDR 4 TDI (0) TDO (A) MASK (F);", &mut hw);
        assert_eq!(report.error_count, 1);
        assert!(!report.success);
    }

    #[test]
    fn scenario_multiline_payload() {
        let mut hw = RecordingHardware::new();
        let report = run("SDR 16 TDI (\nDE AD\n) ;", &mut hw);
        assert_eq!(report.error_count, 0);
        let last = hw.calls.last().unwrap();
        match last {
            crate::hardware::HardwareCall::ShiftData { tdi, length, .. } => {
                assert_eq!(tdi, "DEAD");
                assert_eq!(*length, 16);
            }
            other => panic!("expected shift_data, got {:?}", other),
        }
    }

    #[test]
    fn scenario_inline_comment_state_path() {
        let mut hw = RecordingHardware::new();
        let mut player = Player::new(&mut hw, false);
        let commands = Parser::new(false).parse_str("STATE IDLE ! comment;");
        player.play(&commands);
        assert_eq!(player.current_state(), TapState::Idle);
    }

    #[test]
    fn scenario_runtest_with_endstate() {
        let mut hw = RecordingHardware::new();
        let commands =
            Parser::new(false).parse_str("RUNTEST 100 1.0E-3 SEC ENDSTATE IRPAUSE;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);
        assert_eq!(player.current_state(), TapState::IrPause);
    }

    #[test]
    fn scenario_hard_reset_path() {
        let mut hw = RecordingHardware::new();
        let commands = Parser::new(false).parse_str("STATE DRPAUSE; STATE RESET;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);
        assert_eq!(player.current_state(), TapState::Reset);

        let reset_call = hw
            .calls
            .iter()
            .find(|c| matches!(c, crate::hardware::HardwareCall::PulseTms { bit_count: 5, .. }))
            .expect("expected a 5-bit TMS pulse for the hard reset shortcut");
        match reset_call {
            crate::hardware::HardwareCall::PulseTms { byte, bit_count } => {
                assert_eq!(*bit_count, 5);
                assert_eq!(byte & 0b1_1111, 0b1_1111);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn runtest_duration_is_at_least_min_time_and_cycle_time() {
        let mut hw = RecordingHardware::new();
        let commands = Parser::new(false).parse_str("RUNTEST 1000000 0.0;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);

        let cycle_time = 1_000_000.0 / 1e6; // default frequency_hz
        match hw.calls.iter().find(|c| matches!(c, crate::hardware::HardwareCall::PulseTck { .. })) {
            Some(crate::hardware::HardwareCall::PulseTck { min_time, .. }) => {
                assert!(min_time.as_secs_f64() >= cycle_time - 1e-9);
            }
            _ => panic!("expected a pulse_tck call"),
        }
    }

    #[test]
    fn missing_tdi_defaults_to_all_zeros() {
        let mut hw = RecordingHardware::new();
        let commands = Parser::new(false).parse_str("SDR 8;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);
        match hw.calls.last().unwrap() {
            crate::hardware::HardwareCall::ShiftData { tdi, .. } => assert_eq!(tdi, "00"),
            other => panic!("expected shift_data, got {:?}", other),
        }
    }

    #[test]
    fn frequency_change_is_forwarded_once() {
        let mut hw = RecordingHardware::new();
        let commands = Parser::new(false).parse_str("FREQUENCY 2.0E6 HZ; FREQUENCY 2.0E6 HZ;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);
        let freq_calls = hw
            .calls
            .iter()
            .filter(|c| matches!(c, crate::hardware::HardwareCall::SetFrequency(_)))
            .count();
        assert_eq!(freq_calls, 1);
    }

    #[test]
    fn malformed_frequency_leaves_rate_unchanged() {
        let mut hw = RecordingHardware::new();
        let commands =
            Parser::new(false).parse_str("FREQUENCY 5000000; FREQUENCY BOGUS;");
        let mut player = Player::new(&mut hw, false);
        player.play(&commands);
        let freq_calls: Vec<_> = hw
            .calls
            .iter()
            .filter(|c| matches!(c, crate::hardware::HardwareCall::SetFrequency(_)))
            .collect();
        assert_eq!(freq_calls, vec![&crate::hardware::HardwareCall::SetFrequency(5_000_000.0)]);
    }

    #[test]
    fn set_frequency_seeds_controller_state_before_play() {
        let mut hw = RecordingHardware::new();
        let mut player = Player::new(&mut hw, false);
        player.set_frequency(1_000_000.0);
        let commands = Parser::new(false).parse_str("FREQUENCY 1000000;");
        player.play(&commands);
        let freq_calls = hw
            .calls
            .iter()
            .filter(|c| matches!(c, crate::hardware::HardwareCall::SetFrequency(_)))
            .count();
        // The CLI-seeded rate already matches the file's request, so no
        // further hardware call is made once Player knows about it.
        assert_eq!(freq_calls, 1);
    }

    #[test]
    fn abort_policy_stops_dispatch_after_max_errors() {
        let mut hw = RecordingHardware::new();
        hw.push_response("1");
        hw.push_response("1");
        let commands = Parser::new(false)
            .parse_str("SDR 4 TDI (0) TDO (A) MASK (F); SDR 4 TDI (0) TDO (A) MASK (F); STATE IDLE;");
        let mut player = Player::new(&mut hw, false);
        player.set_max_errors(1);
        let report = player.play(&commands);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.executed_commands, 1);
    }
}
