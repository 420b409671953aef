use thiserror::Error;

pub type SelectResult<T> = Result<T, SelectError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no eligible target store among candidates")]
    NoEligibleTarget,

    #[error("no holder can give up its place to the conflicting candidate")]
    ConflictUnresolved,
}
