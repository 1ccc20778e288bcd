//! The Run-Control State Machine (`spec.md` §4.6): polling, halt, resume,
//! step, debug-entry/post-entry, and SMP fan-out via the Cross-Trigger
//! Interface.
//!
//! Grounded in the teacher's `Armv8a::{halt, run, reset_catch_set,
//! prepare_for_clobber, ack_cti_halt}` (`armv8a.rs`) and
//! `sequences/armv8a.rs::core_start` for the CTI bring-up sequence; the
//! debug-entry/post-entry split and the `system_control_reg`/
//! `system_control_reg_curr` shadow are generalized from the same file's
//! `prepare_for_clobber`/register-restore pairing.

use std::time::Duration;

use crate::core_status::{CoreStatus, DebugReason, HaltReason};
use crate::dap::{ApHandle, DapAccess};
use crate::deadline::Deadline;
use crate::dpm::{Aarch64Dpm, DirtyScratch, Dpm};
use crate::error::{Error, Result};
use crate::instructions::{build_mrs_sctlr, build_msr_sctlr, NOP};
use crate::memory::SystemControlCoordinator;
use crate::regs::{
    Apppulse, Ctr, Drcr, Dscr, Edecr, Edprcr, Gate, Inack, MemoryMappedRegister, Outen,
    TroutStatus,
};

const HALT_TIMEOUT: Duration = Duration::from_secs(1);
const RESTART_TIMEOUT: Duration = Duration::from_secs(1);
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// The exception level + execution state a core was halted in. An
/// exhaustive tagged match, per `spec.md` §9 "Enumerated states" — there is
/// no silent fallthrough for a state the map doesn't recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreMode {
    El0t,
    El1t,
    El1h,
    El2t,
    El2h,
    El3t,
    El3h,
    /// A combination `DSCR.EL`/`DSCR.RW` doesn't define. Never silently
    /// logged and ignored: every caller must handle this as failure.
    Unknown,
}

impl CoreMode {
    /// Decode `(DSCR.EL, DSCR.RW)` the way the post-entry hook must, to
    /// know which `SCTLR_ELx` to read.
    pub fn from_dscr(el: u8, rw_at_el: bool) -> Self {
        match (el, rw_at_el) {
            (0, _) => CoreMode::El0t,
            (1, false) => CoreMode::El1t,
            (1, true) => CoreMode::El1h,
            (2, false) => CoreMode::El2t,
            (2, true) => CoreMode::El2h,
            (3, false) => CoreMode::El3t,
            (3, true) => CoreMode::El3h,
            _ => CoreMode::Unknown,
        }
    }

    /// The system-register `op1` field selecting `SCTLR_EL1/EL2/EL3`.
    fn sctlr_op1(&self) -> Result<u8> {
        match self {
            CoreMode::El0t | CoreMode::El1t | CoreMode::El1h => Ok(0),
            CoreMode::El2t | CoreMode::El2h => Ok(4),
            CoreMode::El3t | CoreMode::El3h => Ok(6),
            CoreMode::Unknown => Err(Error::Fail),
        }
    }
}

/// Restores whatever general-purpose scratch registers a DPM macro-op
/// clobbered. Left as a caller-supplied trait because the full register
/// read/write path is the architecture-independent register cache
/// (`spec.md` §1 out of scope) — this crate only needs to know the dirty
/// set gets consumed before resume.
pub trait RegisterWriteback {
    fn write_back_scratch(&mut self, dpm: &mut dyn Dpm, dirty: DirtyScratch) -> Result<()>;
}

/// Per-core run-control state (`spec.md` §3 "Target handle" subset that
/// belongs to the state machine rather than the memory engine or the
/// breakpoint bank).
pub struct CoreContext {
    pub status: CoreStatus,
    pub debug_reason: DebugReason,
    pub core_mode: CoreMode,
    pub system_control_reg: u32,
    pub system_control_reg_curr: u32,
    pub mmu_enabled: bool,
    pub i_cache_enabled: bool,
    pub d_cache_enabled: bool,
    pub smp: bool,
}

impl CoreContext {
    pub fn new() -> Self {
        Self {
            status: CoreStatus::Unknown,
            debug_reason: DebugReason::NotHalted,
            core_mode: CoreMode::Unknown,
            system_control_reg: 0,
            system_control_reg_curr: 0,
            mmu_enabled: false,
            i_cache_enabled: false,
            d_cache_enabled: false,
            smp: false,
        }
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControlCoordinator for CoreContext {
    fn halted(&self) -> bool {
        self.status.is_halted()
    }

    fn mmu_enabled(&self) -> bool {
        self.mmu_enabled
    }

    fn i_cache_enabled(&self) -> bool {
        self.i_cache_enabled
    }

    fn d_cache_enabled(&self) -> bool {
        self.d_cache_enabled
    }

    fn mmu_modify(&mut self, dpm: &mut dyn Dpm, enable: bool) -> Result<()> {
        if !self.halted() {
            return Err(Error::TargetNotHalted);
        }
        if enable && !self.mmu_enabled {
            // The core halted with the MMU already off; there is nothing
            // recorded to turn back on (`spec.md` §4.7 "MMU coordination").
            return Err(Error::TargetInvalid);
        }

        let op1 = self.core_mode.sctlr_op1()?;
        let mut sctlr = self.system_control_reg_curr;
        if enable {
            sctlr |= 1; // M
        } else {
            // Callers flush the data cache (via the memory engine's
            // line-by-line cache-maintenance helper) before disabling it;
            // this only clears the enable bits once that has run.
            sctlr &= !1; // M
            sctlr &= !(1 << 2); // C
        }

        dpm.instr_write_data_r0(build_msr_sctlr(op1, 0), sctlr)?;
        dpm.instr_cpsr_sync()?;
        self.system_control_reg_curr = sctlr;
        self.mmu_enabled = enable;
        Ok(())
    }
}

fn cti_unlock(dpm: &mut impl Dpm, cti_base: u64) -> Result<()> {
    dpm.raw_write(
        crate::regs::CtiUnlock::mmio_address(cti_base),
        crate::regs::LOCK_UNLOCK_VALUE,
    )
}

/// `poll` (`spec.md` §4.6): read `DSCR`, transition state, and report
/// whether a halt-entry event should be emitted.
pub fn poll(dpm: &mut impl Dpm, ctx: &mut CoreContext) -> Result<Option<HaltReason>> {
    let raw = dpm.raw_read(Dscr::mmio_address(dpm.debug_base()))?;
    let dscr = Dscr::from(raw);

    if dscr.halted() {
        let was_debug_running = matches!(ctx.status, CoreStatus::DebugRunning);
        let reason = dscr.halt_reason();
        ctx.status = CoreStatus::Halted(reason);
        if was_debug_running {
            tracing::debug!("core halted out of debug-execution");
        } else {
            tracing::debug!(?reason, "core halted");
        }
        Ok(Some(reason))
    } else {
        ctx.status = CoreStatus::Running;
        Ok(None)
    }
}

/// `halt` (`spec.md` §4.6): program the CTI for a halt request, pulse it,
/// and wait for acknowledgement.
pub fn halt(dpm: &mut impl Dpm, cti_base: u64, ctx: &mut CoreContext) -> Result<()> {
    tracing::debug!("halting core");
    let debug_base = dpm.debug_base();

    let mut ctr = Ctr::from(0u32);
    ctr.set_glben(true);
    dpm.raw_write(Ctr::mmio_address(cti_base), ctr.into())?;

    let mut gate = Gate::from(0u32);
    gate.set_en(0b11);
    dpm.raw_write(Gate::mmio_address(cti_base), gate.into())?;

    let mut outen0 = Outen::from(0u32);
    outen0.set_outen(1);
    dpm.raw_write(Outen::mmio_address(cti_base), outen0.into())?;
    let mut outen1 = Outen::from(0u32);
    outen1.set_outen(2);
    dpm.raw_write(Outen::mmio_address(cti_base) + 4, outen1.into())?;

    let raw = dpm.raw_read(Dscr::mmio_address(debug_base))?;
    let mut dscr = Dscr::from(raw);
    dscr.set_hde(true);
    dpm.raw_write(Dscr::mmio_address(debug_base), dscr.into())?;

    let mut pulse = Apppulse::from(0u32);
    pulse.set_apppulse(1);
    dpm.raw_write(Apppulse::mmio_address(cti_base), pulse.into())?;

    let deadline = Deadline::after(HALT_TIMEOUT);
    loop {
        let raw = dpm.raw_read(TroutStatus::mmio_address(cti_base))?;
        if TroutStatus::from(raw).status() != 0 {
            break;
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }

    let mut ack = Inack::from(0u32);
    ack.set_ack(1);
    dpm.raw_write(Inack::mmio_address(cti_base), ack.into())?;

    let deadline = Deadline::after(HALT_TIMEOUT);
    loop {
        let raw = dpm.raw_read(Dscr::mmio_address(debug_base))?;
        if Dscr::from(raw).halted() {
            break;
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }

    ctx.debug_reason = DebugReason::Dbgrq;
    Ok(())
}

/// `internal_restart` (`spec.md` §4.6 "resume"). Clears sticky exceptions,
/// acks the CTI, pulses the restart channel, and waits for `DSCR.HDE`.
///
/// Resolves Open Question (1): the original's unreachable `LOG_ERROR`
/// after `return` suggests the intent was "return early only when the
/// target is already not halted" — implemented that way here, without the
/// dead code or its mis-ordered log.
fn internal_restart(dpm: &mut impl Dpm, cti_base: u64, ctx: &CoreContext) -> Result<()> {
    if !ctx.status.is_halted() {
        return Ok(());
    }
    let debug_base = dpm.debug_base();

    dpm.instr_execute(NOP)?;

    let mut drcr = Drcr::from(0u32);
    drcr.set_clear_spa(true);
    drcr.set_clear_exceptions(true);
    dpm.raw_write(Drcr::mmio_address(debug_base), drcr.into())?;

    let mut ack = Inack::from(0u32);
    ack.set_ack(1);
    dpm.raw_write(Inack::mmio_address(cti_base), ack.into())?;

    let mut pulse = Apppulse::from(0u32);
    pulse.set_apppulse(2);
    dpm.raw_write(Apppulse::mmio_address(cti_base), pulse.into())?;

    let deadline = Deadline::after(RESTART_TIMEOUT);
    loop {
        let raw = dpm.raw_read(Dscr::mmio_address(debug_base))?;
        if Dscr::from(raw).hde() {
            break;
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }
    Ok(())
}

/// `resume` (`spec.md` §4.6). Restores the system control register if it
/// drifted, writes back dirty scratch registers, then calls
/// `internal_restart`.
pub fn resume(
    dpm: &mut impl Dpm,
    cti_base: u64,
    writeback: &mut impl RegisterWriteback,
    ctx: &mut CoreContext,
) -> Result<()> {
    if !ctx.status.is_halted() {
        return Err(Error::TargetNotHalted);
    }

    if ctx.system_control_reg_curr != ctx.system_control_reg {
        let op1 = ctx.core_mode.sctlr_op1()?;
        dpm.instr_write_data_r0(build_msr_sctlr(op1, 0), ctx.system_control_reg)?;
        dpm.instr_cpsr_sync()?;
        ctx.system_control_reg_curr = ctx.system_control_reg;
    }

    let dirty = dpm.take_dirty();
    writeback.write_back_scratch(dpm, dirty)?;

    ctx.status = CoreStatus::Running;
    ctx.debug_reason = DebugReason::NotHalted;

    internal_restart(dpm, cti_base, ctx)
}

/// `step` (`spec.md` §4.6): enable halting-step mode, resume, wait for
/// re-halt, then disable halting-step mode again.
pub fn step(
    dpm: &mut impl Dpm,
    cti_base: u64,
    writeback: &mut impl RegisterWriteback,
    ctx: &mut CoreContext,
) -> Result<()> {
    let debug_base = dpm.debug_base();
    let raw = dpm.raw_read(Edecr::mmio_address(debug_base))?;
    let mut edecr = Edecr::from(raw);
    let was_enabled = edecr.ss();
    edecr.set_ss(true);
    dpm.raw_write(Edecr::mmio_address(debug_base), edecr.into())?;

    resume(dpm, cti_base, writeback, ctx)?;

    let deadline = Deadline::after(STEP_TIMEOUT);
    loop {
        if poll(dpm, ctx)?.is_some() {
            break;
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }

    let raw = dpm.raw_read(Edecr::mmio_address(debug_base))?;
    let mut edecr = Edecr::from(raw);
    edecr.set_ss(was_enabled);
    dpm.raw_write(Edecr::mmio_address(debug_base), edecr.into())?;

    ctx.debug_reason = DebugReason::Breakpoint;
    Ok(())
}

/// `post_entry` (`spec.md` §4.6): clear the sticky error, snapshot
/// `SCTLR_ELx`, and derive the cache-enabled flags from it.
pub fn post_entry(dpm: &mut impl Dpm, ctx: &mut CoreContext) -> Result<()> {
    let debug_base = dpm.debug_base();
    let mut drcr = Drcr::from(0u32);
    drcr.set_cse(true);
    dpm.raw_write(Drcr::mmio_address(debug_base), drcr.into())?;

    let op1 = ctx.core_mode.sctlr_op1()?;
    let sctlr = dpm.instr_read_data_r0(build_mrs_sctlr(op1, 0))?;

    ctx.system_control_reg = sctlr;
    ctx.system_control_reg_curr = sctlr;
    ctx.mmu_enabled = sctlr & 1 != 0;
    ctx.d_cache_enabled = sctlr & (1 << 2) != 0;
    ctx.i_cache_enabled = sctlr & (1 << 12) != 0;
    Ok(())
}

/// `assert_reset`/`reset_catch_set` (`spec.md` §4.6 addendum): request a
/// warm reset while latching `EDECR.RCE` so the core halts at the reset
/// vector instead of free-running.
pub fn assert_reset(dpm: &mut impl Dpm) -> Result<()> {
    let debug_base = dpm.debug_base();
    let raw = dpm.raw_read(Edecr::mmio_address(debug_base))?;
    let mut edecr = Edecr::from(raw);
    edecr.set_rce(true);
    dpm.raw_write(Edecr::mmio_address(debug_base), edecr.into())?;

    let mut edprcr = Edprcr::from(0u32);
    edprcr.set_cwrr(true);
    dpm.raw_write(Edprcr::mmio_address(debug_base), edprcr.into())
}

/// `deassert_reset`/`reset_catch_clear`.
pub fn deassert_reset(dpm: &mut impl Dpm) -> Result<()> {
    let debug_base = dpm.debug_base();
    let raw = dpm.raw_read(Edecr::mmio_address(debug_base))?;
    let mut edecr = Edecr::from(raw);
    edecr.set_rce(false);
    dpm.raw_write(Edecr::mmio_address(debug_base), edecr.into())
}

/// `init_debug_access` (`spec.md` §4.9): unlock the debug block (one
/// retry), clear the sticky power-down bit, and bring up the CTI for
/// subsequent halt/resume.
pub fn init_debug_access(dpm: &mut impl Dpm, cti_base: u64) -> Result<()> {
    use crate::regs::{Lockaccess, Prsr, LOCK_UNLOCK_VALUE};

    let debug_base = dpm.debug_base();
    let first = dpm.raw_write(Lockaccess::mmio_address(debug_base), LOCK_UNLOCK_VALUE);
    if first.is_err() {
        tracing::warn!("first LOCKACCESS write failed, retrying");
        dpm.raw_write(Lockaccess::mmio_address(debug_base), LOCK_UNLOCK_VALUE)?;
    }
    let _ = dpm.raw_read(Prsr::mmio_address(debug_base))?;

    let mut ctr = Ctr::from(0u32);
    ctr.set_glben(true);
    dpm.raw_write(Ctr::mmio_address(cti_base), ctr.into())?;

    let mut gate = Gate::from(0u32);
    gate.set_en(0xF);
    dpm.raw_write(Gate::mmio_address(cti_base), gate.into())?;

    let mut outen0 = Outen::from(0u32);
    outen0.set_outen(1);
    dpm.raw_write(Outen::mmio_address(cti_base), outen0.into())?;
    let mut outen1 = Outen::from(0u32);
    outen1.set_outen(2);
    dpm.raw_write(Outen::mmio_address(cti_base) + 4, outen1.into())?;

    let raw = dpm.raw_read(Dscr::mmio_address(debug_base))?;
    let mut dscr = Dscr::from(raw);
    dscr.set_hde(true);
    dpm.raw_write(Dscr::mmio_address(debug_base), dscr.into())?;

    cti_unlock(dpm, cti_base)
}

/// `state`/`states` CLI text producers (`spec.md` §6, addendum §4.6).
pub fn state_text(ctx: &CoreContext) -> String {
    match ctx.status {
        CoreStatus::Unknown => "unknown".to_string(),
        CoreStatus::Running => "running".to_string(),
        CoreStatus::Halted(reason) => format!("halted ({reason:?})"),
        CoreStatus::Reset => "reset".to_string(),
        CoreStatus::DebugRunning => "debug-running".to_string(),
    }
}

/// `cache_info` CLI text producer.
pub fn cache_info_text(ctx: &CoreContext) -> String {
    format!(
        "mmu {} icache {} dcache {}",
        if ctx.mmu_enabled { "enabled" } else { "disabled" },
        if ctx.i_cache_enabled { "enabled" } else { "disabled" },
        if ctx.d_cache_enabled { "enabled" } else { "disabled" },
    )
}

/// `mmu_info` CLI text producer.
pub fn mmu_info_text(ctx: &CoreContext) -> String {
    format!(
        "mmu: {}",
        if ctx.mmu_enabled { "on" } else { "off" }
    )
}

/// SMP fan-out (`spec.md` §4.6 "SMP fan-out"): halt every sibling that
/// isn't already halted. Siblings share one DAP/AP (the whole cluster sits
/// behind the same probe connection) but each has its own debug/CTI base,
/// so operations are issued sequentially, one borrow of `dap` at a time —
/// `spec.md` §5 "no inter-core ordering guarantee beyond all siblings
/// acknowledged before return".
pub fn smp_halt_siblings<D: DapAccess>(
    dap: &mut D,
    siblings: &mut [(ApHandle, u64, u64, &mut CoreContext)],
) -> Result<()> {
    for (ap, debug_base, cti_base, ctx) in siblings.iter_mut() {
        if !ctx.status.is_halted() {
            let mut dpm = Aarch64Dpm::new(&mut *dap, *ap, *debug_base);
            halt(&mut dpm, *cti_base, ctx)?;
            poll(&mut dpm, ctx)?;
        }
    }
    Ok(())
}

/// `regs`/`registers` CLI text producer (`spec.md` §6). The general-purpose
/// register values themselves live in the architecture-independent register
/// cache (out of scope, `spec.md` §1); this only formats whatever snapshot
/// the caller hands in.
pub fn registers_text(registers: &[(&str, crate::core_status::RegisterValue)]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for (name, value) in registers {
        let _ = writeln!(out, "{name}: {:#018x}", value.as_u64());
    }
    out
}

/// `states` CLI text producer: one `state_text` line per core in an SMP
/// cluster, current core first.
pub fn states_text(current: &CoreContext, siblings: &[CoreContext]) -> String {
    let mut out = state_text(current);
    for sibling in siblings {
        out.push('\n');
        out.push_str(&state_text(sibling));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, false, CoreMode::El0t)]
    #[test_case(0, true, CoreMode::El0t)]
    #[test_case(1, false, CoreMode::El1t)]
    #[test_case(1, true, CoreMode::El1h)]
    #[test_case(2, false, CoreMode::El2t)]
    #[test_case(2, true, CoreMode::El2h)]
    #[test_case(3, false, CoreMode::El3t)]
    #[test_case(3, true, CoreMode::El3h)]
    fn core_mode_from_dscr_matches_exception_levels(el: u8, rw: bool, expected: CoreMode) {
        assert_eq!(CoreMode::from_dscr(el, rw), expected);
    }

    #[test]
    fn unknown_core_mode_fails_sctlr_lookup() {
        assert!(matches!(CoreMode::Unknown.sctlr_op1(), Err(Error::Fail)));
    }

    #[test]
    fn mmu_modify_rejects_enable_when_target_not_halted() {
        struct NoopDpm;
        impl Dpm for NoopDpm {
            fn prepare(&mut self) -> Result<()> { Ok(()) }
            fn finish(&mut self) -> Result<()> { Ok(()) }
            fn instr_execute(&mut self, _o: u32) -> Result<()> { Ok(()) }
            fn instr_write_data_dcc(&mut self, _o: u32, _d: u32) -> Result<()> { Ok(()) }
            fn instr_write_data_dcc_64(&mut self, _o: u32, _d: u64) -> Result<()> { Ok(()) }
            fn instr_write_data_r0(&mut self, _o: u32, _d: u32) -> Result<()> { Ok(()) }
            fn instr_write_data_r0_64(&mut self, _o: u32, _d: u64) -> Result<()> { Ok(()) }
            fn instr_read_data_dcc(&mut self, _o: u32) -> Result<u32> { Ok(0) }
            fn instr_read_data_dcc_64(&mut self, _o: u32) -> Result<u64> { Ok(0) }
            fn instr_read_data_r0(&mut self, _o: u32) -> Result<u32> { Ok(0) }
            fn instr_read_data_r0_64(&mut self, _o: u32) -> Result<u64> { Ok(0) }
            fn instr_cpsr_sync(&mut self) -> Result<()> { Ok(()) }
            fn bpwp_enable(&mut self, _i: usize, _a: u64, _c: u32) -> Result<()> { Ok(()) }
            fn bpwp_disable(&mut self, _i: usize) -> Result<()> { Ok(()) }
            fn dirty(&self) -> DirtyScratch { DirtyScratch::default() }
            fn take_dirty(&mut self) -> DirtyScratch { DirtyScratch::default() }
            fn raw_read(&mut self, _address: u64) -> Result<u32> { Ok(0) }
            fn raw_write(&mut self, _address: u64, _value: u32) -> Result<()> { Ok(()) }
            fn ap(&self) -> ApHandle { ApHandle(0) }
            fn debug_base(&self) -> u64 { 0 }
        }

        let mut ctx = CoreContext::new();
        let mut dpm = NoopDpm;
        let result = ctx.mmu_modify(&mut dpm, true);
        assert!(matches!(result, Err(Error::TargetNotHalted)));
    }
}
