use failure_derive::Fail;

mod tap;
mod parser;
mod hardware;
mod player;

pub use tap::TapState;
pub use parser::{Command, Parser, RunTest, SourceCommand, TrstMode};
pub use hardware::{HardwareCall, HardwareInterface, LoggingHardware, RecordingHardware};
pub use player::{PlaybackReport, Player};

#[derive(Fail, Debug)]
pub enum SvfError {
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] std::io::Error),

    #[fail(display = "SVF parse error at line {}: {}", line, message)]
    ParseError { line: u32, message: String },

    #[fail(display = "Hardware error: {}", message)]
    HardwareError { message: String },

    #[fail(
        display = "TDO mismatch at line {}: expected {} (mask {}), got {}",
        line, expected, mask, received
    )]
    VerificationMismatch {
        line: u32,
        expected: String,
        received: String,
        mask: String,
    },
}

impl From<std::io::Error> for SvfError {
    fn from(error: std::io::Error) -> Self {
        SvfError::Io(error)
    }
}

pub type Result<T> = std::result::Result<T, failure::Error>;
