use std::fmt;

pub type TokenResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidName(String),
    DuplicateIssue(String),
    UnknownToken(String),
    NotReissuable(String),
    InsufficientBalance { name: String, have: i64, want: i64 },
    OwnerTokenRequired(String),
    AmountOutOfRange,
    UnitsMayOnlyIncrease { name: String, current: u8, requested: u8 },
    InsufficientFee { required: i64, paid: i64 },
    Store(Box<crate::store::ErrorKind>),
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidName(name) => write!(f, "invalid token name: {}", name),
            ErrorKind::DuplicateIssue(name) => write!(f, "token already issued: {}", name),
            ErrorKind::UnknownToken(name) => write!(f, "unknown token: {}", name),
            ErrorKind::NotReissuable(name) => write!(f, "token is not reissuable: {}", name),
            ErrorKind::InsufficientBalance { name, have, want } => {
                write!(f, "insufficient {} balance: have {}, want {}", name, have, want)
            }
            ErrorKind::OwnerTokenRequired(name) => {
                write!(f, "owner token for {} must be consumed", name)
            }
            ErrorKind::AmountOutOfRange => write!(f, "token amount out of range"),
            ErrorKind::UnitsMayOnlyIncrease { name, current, requested } => write!(
                f,
                "reissue of {} may only raise units ({} -> {} not allowed)",
                name, current, requested
            ),
            ErrorKind::InsufficientFee { required, paid } => {
                write!(f, "insufficient issuance fee: required {}, paid {}", required, paid)
            }
            ErrorKind::Store(e) => write!(f, "token store I/O error: {}", e),
        }
    }
}

impl From<Box<crate::store::ErrorKind>> for Box<ErrorKind> {
    fn from(e: Box<crate::store::ErrorKind>) -> Self {
        Box::new(ErrorKind::Store(e))
    }
}
