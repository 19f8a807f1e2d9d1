//! Script-layer errors, following the teacher's `script_error.rs`
//! `Box<ErrorKind>` idiom exactly (hand-written `Display`, no derive crate).

use std::fmt;

pub type ScriptResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    ScriptTooLong(usize, usize),
    TruncatedPush,
    InvalidTokenMarker,
    InvalidWitnessProgram,
    UnbalancedIf,
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ScriptTooLong(max, actual) => {
                write!(f, "script too long: max {}B, actual {}B", max, actual)
            }
            ErrorKind::TruncatedPush => write!(f, "push opcode truncated at end of script"),
            ErrorKind::InvalidTokenMarker => write!(f, "malformed token opcode payload"),
            ErrorKind::InvalidWitnessProgram => write!(f, "malformed witness program"),
            ErrorKind::UnbalancedIf => write!(f, "IF/ELSE/ENDIF branches unbalanced"),
        }
    }
}
