//! Host-side ARMv8-A (AArch64) debug driver core: the debug programmer's
//! model (DPM) and run-control/memory-access engine that sits directly on
//! top of a Debug Access Port's external debug register banks and Cross
//! Trigger Interface.
//!
//! This crate is the hard middle layer between a probe's raw DAP transport
//! (out of scope — see [`dap`]'s traits) and a remote-serial-protocol
//! front-end. It does not speak to a probe directly, does not implement a
//! register cache, and does not decode trace; it halts cores, pumps
//! instructions through the Instruction Transfer Register, manages the
//! fixed breakpoint/watchpoint bank, and moves memory in and out of a halted
//! core.
//!
//! Start at [`target::Target`]: one instance per core, built with
//! [`target::Target::target_create`] and brought up with
//! [`target::Target::examine`].

pub mod breakpoint;
pub mod core_status;
pub mod dap;
pub mod dcc;
pub mod deadline;
pub mod dpm;
pub mod error;
pub mod instructions;
pub mod memory;
pub mod opcode_pump;
pub mod regs;
pub mod run_control;
pub mod target;

pub use breakpoint::{Breakpoint, BreakpointBank, BreakpointKind};
pub use core_status::{CoreInformation, CoreStatus, DebugReason, HaltReason, RegisterValue};
pub use dap::{ApHandle, ApKind, ApLookup, CoresightComponent, DapAccess};
pub use dpm::{Aarch64Dpm, Dpm};
pub use error::{Error, Result};
pub use memory::{Aarch64MemoryEngine, MemoryEngine, PageTableWalker, SystemControlCoordinator};
pub use run_control::{CoreContext, CoreMode, RegisterWriteback};
pub use target::{Identification, Sibling, Target};
