//! Error taxonomy for the ARMv8-A debug driver (`spec.md` §7).

/// The overarching error type returned by every operation in this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Generic failure: an architectural timeout exhausted its retries, a
    /// runtime allocation (e.g. a breakpoint slot bookkeeping invariant)
    /// could not be satisfied, or a sticky hardware abort was detected and
    /// cleared before returning.
    #[error("operation failed")]
    Fail,

    /// The operation requires the core to be halted and it is not.
    #[error("target is not halted")]
    TargetNotHalted,

    /// `mmu()`/`virt2phys()` was called while the target is not halted.
    #[error("target state is invalid for this operation")]
    TargetInvalid,

    /// No free breakpoint or watchpoint slot is available.
    #[error("no breakpoint/watchpoint resource available")]
    ResourceUnavailable,

    /// Invalid argument combination, e.g. an unsupported access size.
    #[error("invalid argument combination")]
    SyntaxError,

    /// A bounded poll loop exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// An architecture-specific error, boxed so that this crate's public
    /// API does not need to enumerate every implementation-local error
    /// type up front.
    #[error("architecture specific error")]
    ArchitectureSpecific(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// Any other error, surfaced unchanged from the DAP access layer or a
    /// caller-supplied collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap an architecture-specific error type, boxing its source.
    pub fn architecture_specific(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ArchitectureSpecific(Box::new(e))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
