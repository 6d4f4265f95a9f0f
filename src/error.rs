use thiserror::Error;

/// Typed failures the public API can return.
///
/// Invariant violations inside the hot-path hooks (stack overflow, negative
/// time delta, impossible allocation classification) are deliberately *not*
/// represented here — they are bugs in the hook logic itself and are raised
/// as `assert!`/`debug_assert!` panics rather than recovered from.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("invalid profiler configuration: {0}")]
    Configuration(String),

    #[error("profiler already started")]
    AlreadyStarted,

    #[error("profiler not started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, ProfileError>;
