//! Lexical and syntactic treatment of an SVF command stream: turns a text
//! file (or in-memory string) into an ordered list of typed command
//! records, tolerating SVF's awkward continuation and parenthesis rules.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::tap::TapState;
use crate::SvfError;

const KEYWORDS: &[&str] = &[
    "ENDIR", "ENDDR", "STATE", "FREQUENCY", "HIR", "TIR", "HDR", "TDR", "SIR", "SDR", "RUNTEST",
    "TRST", "PIOMAP", "PIO",
];

const UNIT_TOKENS: &[&str] = &["SEC", "MSEC", "USEC", "HZ", "TCK", "SCK"];

/// TRST line drive mode, per SVF's `TRST` command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrstMode {
    On,
    Off,
    Z,
    Absent,
}

impl TrstMode {
    fn from_token(tok: &str) -> Option<TrstMode> {
        match tok.trim_matches(|c| c == '(' || c == ')' || c == ';').to_ascii_uppercase().as_str() {
            "ON" => Some(TrstMode::On),
            "OFF" => Some(TrstMode::Off),
            "Z" => Some(TrstMode::Z),
            "ABSENT" => Some(TrstMode::Absent),
            _ => None,
        }
    }
}

/// The length/TDI/TDO/MASK/SMASK parameter set shared by SIR, SDR, HIR,
/// TIR, HDR and TDR.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub length: u32,
    pub tdi: Option<String>,
    pub tdo: Option<String>,
    pub mask: Option<String>,
    pub smask: Option<String>,
}

/// Parameters of a `RUNTEST` command.
#[derive(Clone, Debug, PartialEq)]
pub struct RunTest {
    pub run_count: u32,
    pub min_time: f64,
    pub max_time: Option<f64>,
    pub end_state: TapState,
}

/// One parsed SVF command, tagged by kind.
#[derive(Clone, Debug)]
pub enum Command {
    EndIr(TapState),
    EndDr(TapState),
    State(Vec<TapState>),
    Frequency(Option<f64>),
    Sir(ScanRequest),
    Sdr(ScanRequest),
    Hir(ScanRequest),
    Tir(ScanRequest),
    Hdr(ScanRequest),
    Tdr(ScanRequest),
    RunTest(RunTest),
    Trst(TrstMode),
    Comment(String),
    Piomap(Vec<String>),
    Pio(Vec<String>),
    Unknown(String),
}

/// A parsed command together with its source location, for diagnostics and
/// round-trip fidelity.
#[derive(Clone, Debug)]
pub struct SourceCommand {
    pub line: u32,
    pub raw: String,
    pub command: Command,
}

/// Converts an SVF text stream into an ordered list of [`SourceCommand`]s.
pub struct Parser {
    verbose: bool,
}

impl Parser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Reads and parses the SVF file at `path`. The only failure mode is
    /// I/O: once a command's keyword is recognized or not, it is always
    /// emitted (with defaulted sub-fields on malformed parameters).
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<SourceCommand>, SvfError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        Ok(self.parse_lines(lines))
    }

    /// Parses an in-memory SVF string. Pure, no I/O.
    pub fn parse_str(&self, text: &str) -> Vec<SourceCommand> {
        self.parse_lines(text.lines().map(|l| l.to_string()).collect())
    }

    fn parse_lines(&self, lines: Vec<String>) -> Vec<SourceCommand> {
        let mut commands = Vec::new();
        let mut acc = String::new();
        let mut acc_start_line = 0u32;
        let mut acc_raw_lines: Vec<String> = Vec::new();
        let mut in_multiline = false;

        for (i, raw) in lines.iter().enumerate() {
            let line_no = (i + 1) as u32;

            if !in_multiline && raw.trim_start().starts_with("//") {
                commands.push(SourceCommand {
                    line: line_no,
                    raw: raw.clone(),
                    command: Command::Comment(raw.trim().to_string()),
                });
                continue;
            }

            let stripped = strip_bang_comment(raw);

            if !in_multiline && stripped.trim().is_empty() {
                continue;
            }

            if !in_multiline {
                acc_start_line = line_no;
                acc_raw_lines.clear();
                acc = stripped;
                in_multiline = true;
            } else {
                acc.push(' ');
                acc.push_str(&stripped);
            }
            acc_raw_lines.push(raw.clone());

            if let Some(semi) = acc.find(';') {
                let body = acc[..semi].trim().to_string();
                if !body.is_empty() {
                    if let Some(cmd) = self.parse_command(&body, acc_start_line) {
                        commands.push(SourceCommand {
                            line: acc_start_line,
                            raw: acc_raw_lines.join("\n"),
                            command: cmd,
                        });
                    }
                }
                acc.clear();
                in_multiline = false;
            }
        }

        if in_multiline && !acc.trim().is_empty() {
            log::warn!(
                "SVF: unfinished command at end of file (line {}): {}",
                acc_start_line,
                acc.trim()
            );
            if let Some(cmd) = self.parse_command(acc.trim(), acc_start_line) {
                commands.push(SourceCommand {
                    line: acc_start_line,
                    raw: acc_raw_lines.join("\n"),
                    command: cmd,
                });
            }
        }

        commands
    }

    fn parse_command(&self, body: &str, line: u32) -> Option<Command> {
        let tokens: Vec<&str> = body.split_whitespace().collect();
        let keyword = tokens[0].to_ascii_uppercase();

        if self.verbose {
            log::trace!("SVF line {}: {}", line, body);
        }

        if !KEYWORDS.contains(&keyword.as_str()) {
            log::warn!("SVF line {}: unrecognized keyword '{}'", line, tokens[0]);
            return Some(Command::Unknown(tokens[0].to_string()));
        }

        Some(match keyword.as_str() {
            "ENDIR" => Command::EndIr(self.parse_single_state(&tokens, line)),
            "ENDDR" => Command::EndDr(self.parse_single_state(&tokens, line)),
            "STATE" => {
                let mut states = Vec::new();
                for tok in &tokens[1..] {
                    match TapState::from_name(tok) {
                        Some(s) => states.push(s),
                        None => log::warn!("SVF line {}: unknown TAP state '{}', dropped", line, tok),
                    }
                }
                Command::State(states)
            }
            "FREQUENCY" => {
                let hz = tokens.get(1).and_then(|t| parse_numeric_token(t));
                if hz.is_none() {
                    log::warn!("SVF line {}: missing/invalid FREQUENCY value, leaving rate unchanged", line);
                }
                Command::Frequency(hz)
            }
            "SIR" => Command::Sir(self.parse_scan_request(&tokens, line)),
            "SDR" => Command::Sdr(self.parse_scan_request(&tokens, line)),
            "HIR" => Command::Hir(self.parse_scan_request(&tokens, line)),
            "TIR" => Command::Tir(self.parse_scan_request(&tokens, line)),
            "HDR" => Command::Hdr(self.parse_scan_request(&tokens, line)),
            "TDR" => Command::Tdr(self.parse_scan_request(&tokens, line)),
            "RUNTEST" => Command::RunTest(self.parse_runtest(&tokens, line)),
            "TRST" => {
                let mode = tokens
                    .get(1)
                    .and_then(|t| TrstMode::from_token(t))
                    .unwrap_or_else(|| {
                        log::warn!("SVF line {}: invalid TRST mode, defaulting to OFF", line);
                        TrstMode::Off
                    });
                Command::Trst(mode)
            }
            "PIOMAP" => Command::Piomap(tokens[1..].iter().map(|s| s.to_string()).collect()),
            "PIO" => Command::Pio(tokens[1..].iter().map(|s| s.to_string()).collect()),
            _ => unreachable!("keyword filtered above"),
        })
    }

    fn parse_single_state(&self, tokens: &[&str], line: u32) -> TapState {
        match tokens.get(1).and_then(|t| TapState::from_name(t)) {
            Some(s) => s,
            None => {
                log::warn!("SVF line {}: missing or unknown end state, defaulting to Idle", line);
                TapState::Idle
            }
        }
    }

    fn parse_scan_request(&self, tokens: &[&str], line: u32) -> ScanRequest {
        let mut length: Option<u32> = None;
        let mut tdi = None;
        let mut tdo = None;
        let mut mask = None;
        let mut smask = None;

        let mut idx = 1;
        while idx < tokens.len() {
            let tok = tokens[idx];
            let upper = tok.to_ascii_uppercase();
            if !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()) {
                length = tok.parse().ok();
                idx += 1;
            } else if matches!(upper.as_str(), "TDI" | "TDO" | "MASK" | "SMASK") {
                idx += 1;
                match self.parse_hex_payload(tokens, &mut idx, line) {
                    Some(payload) => match upper.as_str() {
                        "TDI" => tdi = Some(payload),
                        "TDO" => tdo = Some(payload),
                        "MASK" => mask = Some(payload),
                        "SMASK" => smask = Some(payload),
                        _ => unreachable!(),
                    },
                    None => log::warn!("SVF line {}: missing payload for {}", line, upper),
                }
            } else {
                idx += 1;
            }
        }

        let length = length.unwrap_or_else(|| match &tdi {
            Some(t) => (t.len() as u32) * 4,
            None => {
                log::warn!("SVF line {}: missing length and TDI, defaulting length to 0", line);
                0
            }
        });

        ScanRequest { length, tdi, tdo, mask, smask }
    }

    /// Parses a `(hexdigits)` payload that may be split across multiple
    /// whitespace-separated tokens, with `(`/`)` stuck to the first/last.
    fn parse_hex_payload(&self, tokens: &[&str], idx: &mut usize, line: u32) -> Option<String> {
        let first = *tokens.get(*idx)?;
        if !first.starts_with('(') {
            // Not parenthesized at all; accept the bare token as a degraded payload.
            *idx += 1;
            return Some(clean_hex(first));
        }

        let first_body = &first[1..];
        let mut parts = Vec::new();
        if let Some(body) = first_body.strip_suffix(')') {
            parts.push(body.to_string());
            *idx += 1;
        } else {
            parts.push(first_body.to_string());
            *idx += 1;
            let mut closed = false;
            while *idx < tokens.len() {
                let tok = tokens[*idx];
                if tok == ")" {
                    *idx += 1;
                    closed = true;
                    break;
                } else if let Some(body) = tok.strip_suffix(')') {
                    parts.push(body.to_string());
                    *idx += 1;
                    closed = true;
                    break;
                } else {
                    parts.push(tok.to_string());
                    *idx += 1;
                }
            }
            if !closed {
                log::warn!("SVF line {}: unmatched '(' in hex payload", line);
            }
        }

        Some(clean_hex(&parts.concat()))
    }

    fn parse_runtest(&self, tokens: &[&str], line: u32) -> RunTest {
        let mut run_count = 0u32;
        let mut min_time = 0.0f64;
        let mut max_time = None;
        let mut end_state = TapState::Idle;

        let mut idx = 1;
        while idx < tokens.len() {
            let tok = tokens[idx];
            let upper = tok.to_ascii_uppercase();

            if upper == "MAXIMUM" {
                idx += 1;
                if let Some(&val_tok) = tokens.get(idx) {
                    match parse_numeric_token(val_tok) {
                        Some(v) => max_time = Some(v),
                        None => log::warn!("SVF line {}: invalid MAXIMUM value '{}'", line, val_tok),
                    }
                    idx += 1;
                    if tokens.get(idx).map_or(false, |t| is_unit_token(t)) {
                        idx += 1;
                    }
                }
            } else if upper == "ENDSTATE" {
                idx += 1;
                if let Some(&state_tok) = tokens.get(idx) {
                    match TapState::from_name(state_tok) {
                        Some(s) => end_state = s,
                        None => log::warn!("SVF line {}: unknown ENDSTATE '{}'", line, state_tok),
                    }
                    idx += 1;
                }
            } else if !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()) {
                run_count = tok.parse().unwrap_or(0);
                idx += 1;
            } else if is_unit_token(tok) {
                idx += 1;
            } else if let Some(v) = parse_numeric_token(tok) {
                min_time = v;
                idx += 1;
                if tokens.get(idx).map_or(false, |t| is_unit_token(t)) {
                    idx += 1;
                }
            } else {
                idx += 1;
            }
        }

        RunTest { run_count, min_time, max_time, end_state }
    }
}

fn strip_bang_comment(line: &str) -> String {
    match line.find('!') {
        Some(idx) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

fn clean_hex(s: &str) -> String {
    let s = s.trim();
    let s = if s.len() >= 2 && s[..2].eq_ignore_ascii_case("0x") { &s[2..] } else { s };
    s.to_ascii_uppercase()
}

fn is_unit_token(tok: &str) -> bool {
    UNIT_TOKENS.contains(&tok.to_ascii_uppercase().as_str())
}

/// Parses a numeric literal that may carry a stuck-on unit suffix (`100HZ`,
/// `1.0E-3SEC`). Tries a direct parse first so correctly formed scientific
/// notation (`1.0E-3`) is never mangled.
fn parse_numeric_token(tok: &str) -> Option<f64> {
    if let Ok(v) = tok.parse::<f64>() {
        return Some(v);
    }
    let trimmed = tok.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    let filtered: String = tok
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        .collect();
    filtered.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> Parser {
        Parser::new(false)
    }

    #[test]
    fn comment_round_trip() {
        let cmds = parser().parse_str("  // a comment\nSTATE IDLE;\n//another\n");
        assert_eq!(cmds.len(), 3);
        match &cmds[0].command {
            Command::Comment(text) => assert_eq!(text, "// a comment"),
            other => panic!("expected comment, got {:?}", other),
        }
        match &cmds[2].command {
            Command::Comment(text) => assert_eq!(text, "//another"),
            other => panic!("expected comment, got {:?}", other),
        }
    }

    #[test]
    fn inline_bang_comment() {
        let cmds = parser().parse_str("STATE IDLE ! comment;\n");
        assert_eq!(cmds.len(), 1);
        match &cmds[0].command {
            Command::State(path) => assert_eq!(path, &[TapState::Idle]),
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn multiline_payload() {
        let cmds = parser().parse_str("SDR 16 TDI (\nDE AD\n) ;\n");
        assert_eq!(cmds.len(), 1);
        match &cmds[0].command {
            Command::Sdr(req) => {
                assert_eq!(req.length, 16);
                assert_eq!(req.tdi.as_deref(), Some("DEAD"));
            }
            other => panic!("expected sdr, got {:?}", other),
        }
    }

    #[test]
    fn sir_with_stuck_parens() {
        let cmds = parser().parse_str("SIR 8 TDI (02);\n");
        match &cmds[0].command {
            Command::Sir(req) => {
                assert_eq!(req.length, 8);
                assert_eq!(req.tdi.as_deref(), Some("02"));
            }
            other => panic!("expected sir, got {:?}", other),
        }
    }

    #[test]
    fn length_inferred_from_tdi() {
        let cmds = parser().parse_str("SDR TDI (FF00);\n");
        match &cmds[0].command {
            Command::Sdr(req) => assert_eq!(req.length, 16),
            other => panic!("expected sdr, got {:?}", other),
        }
    }

    #[test]
    fn runtest_with_endstate_and_engineering_notation() {
        let cmds = parser().parse_str("RUNTEST 100 1.0E-3 SEC ENDSTATE IRPAUSE;\n");
        match &cmds[0].command {
            Command::RunTest(rt) => {
                assert_eq!(rt.run_count, 100);
                assert!((rt.min_time - 1e-3).abs() < 1e-12);
                assert_eq!(rt.end_state, TapState::IrPause);
            }
            other => panic!("expected runtest, got {:?}", other),
        }
    }

    #[test]
    fn unknown_state_in_path_is_dropped() {
        let cmds = parser().parse_str("STATE IDLE BOGUS DRPAUSE;\n");
        match &cmds[0].command {
            Command::State(path) => assert_eq!(path, &[TapState::Idle, TapState::DrPause]),
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn semicolon_recombination() {
        let text = "STATE RESET;\nSIR 8 TDI (02);\nSDR 4 TDI (0) TDO (A) MASK (F);\n";
        let first = parser().parse_str(text);

        let rejoined = first
            .iter()
            .filter(|c| !matches!(c.command, Command::Comment(_)))
            .map(|c| {
                c.raw
                    .lines()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(";\n")
            + ";\n";
        let second = parser().parse_str(&rejoined);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(format!("{:?}", a.command), format!("{:?}", b.command));
        }
    }

    #[test]
    fn unrecognized_keyword_is_unknown() {
        let cmds = parser().parse_str("FOOBAR 1 2 3;\n");
        match &cmds[0].command {
            Command::Unknown(kw) => assert_eq!(kw, "FOOBAR"),
            other => panic!("expected unknown, got {:?}", other),
        }
    }
}
