//! Run-control state enums shared across the crate (`spec.md` §3, §4.6).
//!
//! Carried from the teacher's `core.rs` pattern: small tagged enums with a
//! couple of convenience predicates, rather than raw status words leaking
//! out of the driver.

/// The run-control state of a single core (`spec.md` §4.6 "States").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreStatus {
    /// State has not been determined yet (before the first `poll`).
    Unknown,
    /// The core is executing.
    Running,
    /// The core is halted for the given reason.
    Halted(HaltReason),
    /// The core is held in reset.
    Reset,
    /// The core is running a debug agent's own instruction stream
    /// (`debug_execution`) rather than target code.
    DebugRunning,
}

impl CoreStatus {
    /// Is the core currently halted (in any reason)?
    pub fn is_halted(&self) -> bool {
        matches!(self, CoreStatus::Halted(_))
    }
}

/// Why a software or hardware breakpoint fired, when distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointCause {
    /// A hardware address-match breakpoint.
    Hardware,
    /// A software breakpoint instruction (`BRK`).
    Software,
    /// The cause could not be distinguished from `DSCR.HALT_MASK` alone.
    Unknown,
}

/// The reason a core transitioned into the halted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Hit a breakpoint (hardware or software).
    Breakpoint(BreakpointCause),
    /// An exception was taken into Debug state (reset catch, OS unlock
    /// catch, software access to a debug register, ...).
    Exception,
    /// Hit a data watchpoint.
    Watchpoint,
    /// Completed a single step.
    Step,
    /// A debugger-issued halt request (`DBGRQ`).
    Request,
    /// Unknown or not yet decoded.
    Unknown,
}

/// `debug_reason` as tracked by the run-control state machine, distinct
/// from [`HaltReason`]: it records *why the driver asked for a halt*,
/// whereas `HaltReason` records what `DSCR.HALT_MASK` actually reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugReason {
    /// No halt is outstanding; the core is expected to be running.
    NotHalted,
    /// Halted by an explicit debugger request (`halt()`).
    Dbgrq,
    /// Halted after completing a single step.
    Breakpoint,
    /// Halt reason not yet determined.
    Undefined,
}

/// The program counter at the moment a run-control operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInformation {
    /// Current program counter value.
    pub pc: u64,
}

/// A register value, which may be 32-bit (AArch32 state) or 64-bit
/// (AArch64 state) depending on what the core was executing when read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    /// 32-bit value (AArch32 general-purpose register, or any SCTLR/DSCR
    /// shadow which is always 32 bits regardless of execution state).
    U32(u32),
    /// 64-bit value (AArch64 general-purpose register or PC).
    U64(u64),
}

impl RegisterValue {
    /// Interpret this value as a 64-bit unsigned integer, zero-extending
    /// 32-bit values.
    pub fn as_u64(&self) -> u64 {
        match self {
            RegisterValue::U32(v) => *v as u64,
            RegisterValue::U64(v) => *v,
        }
    }
}

impl From<u32> for RegisterValue {
    fn from(v: u32) -> Self {
        RegisterValue::U32(v)
    }
}

impl From<u64> for RegisterValue {
    fn from(v: u64) -> Self {
        RegisterValue::U64(v)
    }
}
