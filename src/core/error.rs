use thiserror::Error;

use crate::unit::UnitId;

/// Errors surfaced by topology construction, evaluation and state import.
///
/// Every variant is raised before the failing operation writes anything, so a
/// caller that receives an error still holds a consistent graph.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid connection: a link needs both endpoints (from: {from:?}, to: {to:?})")]
    InvalidConnection {
        from: Option<UnitId>,
        to: Option<UnitId>,
    },

    #[error("{what} has {got} values but the ensemble has {expected} units")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid projection target: {0}")]
    InvalidProjectionTarget(String),

    #[error("unknown ensemble {0}")]
    UnknownEnsemble(usize),

    #[error("invalid gate: {0}")]
    InvalidGate(String),

    #[error("snapshot: {0}")]
    Snapshot(String),

    #[error("memory image: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Snapshot(err.to_string())
    }
}

pub type Result<T> = core::result::Result<T, NetError>;

/// Length check shared by the interpreted and compiled paths.
pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(NetError::SizeMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}
