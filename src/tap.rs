//! The 16-state JTAG TAP controller state machine and shortest-path TMS
//! sequencing between any two states.

use std::collections::VecDeque;

/// One of the 16 standard JTAG TAP controller states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TapState {
    Reset = 0,
    Idle = 1,
    DrSelect = 2,
    DrCapture = 3,
    DrShift = 4,
    DrExit1 = 5,
    DrPause = 6,
    DrExit2 = 7,
    DrUpdate = 8,
    IrSelect = 9,
    IrCapture = 10,
    IrShift = 11,
    IrExit1 = 12,
    IrPause = 13,
    IrExit2 = 14,
    IrUpdate = 15,
}

/// All 16 states, in declaration order. Used for exhaustive table lookups.
pub const ALL_STATES: [TapState; 16] = [
    TapState::Reset,
    TapState::Idle,
    TapState::DrSelect,
    TapState::DrCapture,
    TapState::DrShift,
    TapState::DrExit1,
    TapState::DrPause,
    TapState::DrExit2,
    TapState::DrUpdate,
    TapState::IrSelect,
    TapState::IrCapture,
    TapState::IrShift,
    TapState::IrExit1,
    TapState::IrPause,
    TapState::IrExit2,
    TapState::IrUpdate,
];

/// `TRANSITIONS[state][tms]` is the next state when `tms` is driven while in `state`.
const TRANSITIONS: [[TapState; 2]; 16] = [
    // Reset
    [TapState::Idle, TapState::Reset],
    // Idle
    [TapState::Idle, TapState::DrSelect],
    // DrSelect
    [TapState::DrCapture, TapState::IrSelect],
    // DrCapture
    [TapState::DrShift, TapState::DrExit1],
    // DrShift
    [TapState::DrShift, TapState::DrExit1],
    // DrExit1
    [TapState::DrPause, TapState::DrUpdate],
    // DrPause
    [TapState::DrPause, TapState::DrExit2],
    // DrExit2
    [TapState::DrShift, TapState::DrUpdate],
    // DrUpdate
    [TapState::Idle, TapState::DrSelect],
    // IrSelect
    [TapState::IrCapture, TapState::Reset],
    // IrCapture
    [TapState::IrShift, TapState::IrExit1],
    // IrShift
    [TapState::IrShift, TapState::IrExit1],
    // IrExit1
    [TapState::IrPause, TapState::IrUpdate],
    // IrPause
    [TapState::IrPause, TapState::IrExit2],
    // IrExit2
    [TapState::IrShift, TapState::IrUpdate],
    // IrUpdate
    [TapState::Idle, TapState::DrSelect],
];

impl TapState {
    /// Look up a TAP state by its SVF name (case-insensitive, trailing `;` tolerated).
    ///
    /// Returns `None` for anything that isn't one of the 16 standard names, which
    /// callers treat as SVF's "Unknown" sentinel.
    pub fn from_name(name: &str) -> Option<TapState> {
        let name = name.trim_end_matches(';').to_ascii_uppercase();
        Some(match name.as_str() {
            "RESET" => TapState::Reset,
            "IDLE" => TapState::Idle,
            "DRSELECT" => TapState::DrSelect,
            "DRCAPTURE" => TapState::DrCapture,
            "DRSHIFT" => TapState::DrShift,
            "DREXIT1" => TapState::DrExit1,
            "DRPAUSE" => TapState::DrPause,
            "DREXIT2" => TapState::DrExit2,
            "DRUPDATE" => TapState::DrUpdate,
            "IRSELECT" => TapState::IrSelect,
            "IRCAPTURE" => TapState::IrCapture,
            "IRSHIFT" => TapState::IrShift,
            "IREXIT1" => TapState::IrExit1,
            "IRPAUSE" => TapState::IrPause,
            "IREXIT2" => TapState::IrExit2,
            "IRUPDATE" => TapState::IrUpdate,
            _ => return None,
        })
    }

    fn next(self, tms: bool) -> TapState {
        TRANSITIONS[self as usize][tms as usize]
    }
}

/// Computes the shortest TMS bit sequence that drives the TAP from `from` to `to`.
///
/// Uses breadth-first search over the 16-node transition graph, expanding
/// `tms=0` before `tms=1` at each node so that ties are broken toward `tms=0`.
/// The returned sequence is empty if `from == to`. Bit order is the order the
/// bits must be applied in (first element shifted first).
pub fn shortest_path(from: TapState, to: TapState) -> Vec<bool> {
    if from == to {
        return Vec::new();
    }

    let mut visited = [false; 16];
    visited[from as usize] = true;
    let mut queue = VecDeque::new();
    queue.push_back((from, Vec::new()));

    while let Some((state, path)) = queue.pop_front() {
        for &tms in &[false, true] {
            let next = state.next(tms);
            if next == to {
                let mut path = path.clone();
                path.push(tms);
                return path;
            }
            if !visited[next as usize] {
                visited[next as usize] = true;
                let mut path = path.clone();
                path.push(tms);
                queue.push_back((next, path));
            }
        }
    }

    // The transition graph is strongly connected, so every pair has a path.
    unreachable!("TAP transition graph is strongly connected: {:?} -> {:?}", from, to)
}

/// Applies `tms` bits one at a time to `state`, returning the resulting state.
/// Used by tests to check a computed path actually reaches its target.
pub fn apply(mut state: TapState, bits: &[bool]) -> TapState {
    for &tms in bits {
        state = state.next(tms);
    }
    state
}
