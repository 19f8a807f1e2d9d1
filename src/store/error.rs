use std::fmt;

pub type StoreResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug)]
pub enum ErrorKind {
    Io(String),
    Backend(String),
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io(msg) => write!(f, "store I/O error: {}", msg),
            ErrorKind::Backend(msg) => write!(f, "store backend error: {}", msg),
        }
    }
}
