//! The per-core target handle (`spec.md` §3 "Target handle", §4.8–§4.9
//! "Examine/Init"): the object a front-end actually calls into. It wires
//! the DAP access layer, the DPM, the breakpoint bank, and the run-control
//! state together for one core, the way the teacher's `Armv8a::new` wires a
//! borrowed `Memory<'probe>` and a `CortexAState` (`armv8a.rs`).
//!
//! Every operation below constructs its [`Aarch64Dpm`]/[`Aarch64MemoryEngine`]
//! inline from `self.dap` rather than through a helper method: a method
//! returning something that borrows `self` ties up the whole struct for as
//! long as the result lives, which would make it impossible to also touch
//! `self.ctx` or `self.bank` in the same call. Borrowing the one field
//! directly keeps the rest of `self` available.

use crate::breakpoint::{Breakpoint, BreakpointBank, BreakpointKind};
use crate::core_status::{CoreStatus, HaltReason};
use crate::dap::{ApHandle, ApKind, ApLookup, CoresightComponent, DapAccess};
use crate::dpm::Aarch64Dpm;
use crate::error::{Error, Result};
use crate::memory::{
    mmu_state, virt2phys, Aarch64MemoryEngine, MemoryEngine as _, PageTableWalker,
    SystemControlCoordinator,
};
use crate::regs::{
    Dbgfeature0, Dscr, Edesr, Mainid0, MemoryMappedRegister, Memfeature0, Oslar, Prsr, Wfar0,
    Wfar1,
};
use crate::run_control::{self, CoreContext, CoreMode, RegisterWriteback};

/// One additional core reached through the same DAP/probe connection in an
/// SMP cluster (`spec.md` §4.6 "SMP fan-out").
pub struct Sibling {
    pub ap: ApHandle,
    pub debug_base: u64,
    pub cti_base: u64,
    pub ctx: CoreContext,
}

/// Identification registers captured at examine time (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct Identification {
    pub cpuid: u32,
    pub mmfr0: u64,
    pub dfr0: u64,
}

/// The per-core target handle (`spec.md` §3 "Target handle").
pub struct Target<D> {
    dap: D,
    ap_apb: ApHandle,
    ap_ahb: Option<ApHandle>,
    debug_base: u64,
    cti_base: u64,
    ctx: CoreContext,
    bank: Option<BreakpointBank>,
    id: Identification,
    examined: bool,
    dbgbase_set: bool,
    memory_ap_available: bool,
    smp: bool,
    siblings: Vec<Sibling>,
    /// `gdb_service->core[1]` (`spec.md` §4.6 "SMP fan-out"): a sibling
    /// index awaiting a core switch on the next `poll`, or `None` for
    /// "no switch pending". Kept as an `Option` rather than the original's
    /// `-1` sentinel.
    pending_gdb_core: Option<usize>,
}

impl<D: DapAccess + ApLookup> Target<D> {
    /// `target_create` (`spec.md` §6): construct the handle; nothing is
    /// probed until [`Target::examine`].
    pub fn target_create(dap: D) -> Self {
        Self {
            dap,
            ap_apb: ApHandle(0),
            ap_ahb: None,
            debug_base: 0,
            cti_base: 0,
            ctx: CoreContext::new(),
            bank: None,
            id: Identification::default(),
            examined: false,
            dbgbase_set: false,
            memory_ap_available: false,
            smp: false,
            siblings: Vec::new(),
            pending_gdb_core: None,
        }
    }

    /// `init_target` (`spec.md` §6): framework lifecycle hook run once
    /// before the first `examine`, resetting any stale run-control state.
    pub fn init_target(&mut self) -> Result<()> {
        self.ctx = CoreContext::new();
        Ok(())
    }

    /// `examine` (`spec.md` §4.8): one-time probe (AP discovery, unlock,
    /// identification registers, BP/WP bank sizing); subsequent calls only
    /// re-run [`Target::init_debug_access`].
    pub fn examine(&mut self) -> Result<()> {
        if self.examined {
            return self.init_debug_access();
        }

        let apb = self.dap.dap_find_ap(ApKind::Apb)?.ok_or(Error::Fail)?;
        self.ap_apb = apb;
        self.debug_base = self.dap.dap_get_debugbase(apb)?;
        self.cti_base = self
            .dap
            .dap_lookup_cs_component(apb, CoresightComponent::Cti)
            .unwrap_or(self.debug_base + 0x1000);
        self.dbgbase_set = true;

        if let Some(ahb) = self.dap.dap_find_ap(ApKind::Ahb)? {
            self.dap.ahbap_debugport_init(ahb)?;
            self.ap_ahb = Some(ahb);
            self.memory_ap_available = true;
        }

        self.unlock_debug()?;

        let (cpuid, mmfr0, dfr0_lo, dfr0_hi) = {
            let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
            let cpuid = dpm.raw_read(Mainid0::mmio_address(self.debug_base))?;
            let mmfr0_lo = dpm.raw_read(Memfeature0::mmio_address(self.debug_base))? as u64;
            let mmfr0_hi = dpm.raw_read(Memfeature0::mmio_address(self.debug_base) + 4)? as u64;
            let dfr0_lo = dpm.raw_read(Dbgfeature0::mmio_address(self.debug_base))?;
            let dfr0_hi = dpm.raw_read(Dbgfeature0::mmio_address(self.debug_base) + 4)?;
            (cpuid, mmfr0_lo | (mmfr0_hi << 32), dfr0_lo, dfr0_hi)
        };

        self.id = Identification {
            cpuid,
            mmfr0,
            dfr0: (dfr0_lo as u64) | ((dfr0_hi as u64) << 32),
        };

        let dfr = Dbgfeature0::from(dfr0_lo);
        let brp_num = (dfr.brps() as usize) + 1;
        let brp_num_context = (dfr.ctx_cmps() as usize) + 1;
        let wrp_num = (dfr.wrps() as usize) + 1;
        self.bank = Some(BreakpointBank::new(brp_num, brp_num_context, wrp_num));

        tracing::debug!(cpuid, brp_num, brp_num_context, wrp_num, "examined core");
        self.examined = true;
        Ok(())
    }

    fn unlock_debug(&mut self) -> Result<()> {
        let mut oslar = Oslar::from(0u32);
        oslar.set_oslk(false);
        self.dap.mem_ap_write_atomic_u32(
            self.ap_apb,
            Oslar::mmio_address(self.debug_base),
            oslar.into(),
        )?;
        self.init_debug_access()
    }

    /// `init_debug_access` (`spec.md` §4.9), re-run on every `examine`.
    pub fn init_debug_access(&mut self) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        run_control::init_debug_access(&mut dpm, self.cti_base)?;
        run_control::poll(&mut dpm, &mut self.ctx)?;
        Ok(())
    }

    pub fn identification(&self) -> Identification {
        self.id
    }

    pub fn memory_ap_available(&self) -> bool {
        self.memory_ap_available
    }

    pub fn dbgbase_set(&self) -> bool {
        self.dbgbase_set
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn brp_num_available(&self) -> usize {
        self.bank.as_ref().map(|b| b.brp_num_available()).unwrap_or(0)
    }

    /// `poll` (`spec.md` §4.6, §6): observe `DSCR`, running debug-entry (and
    /// SMP fan-out) the moment a halt is newly observed.
    ///
    /// A pending GDB core switch (`spec.md` §4.6 "SMP fan-out") is completed
    /// here first: if this core is already halted and `smp_gdb` queued a
    /// switch, this swaps the active-core fields with the requested sibling
    /// and reports a synthetic halt without re-reading `DSCR` — the core in
    /// question never actually changed state, only which one the front-end
    /// is looking at.
    pub fn poll(&mut self) -> Result<Option<HaltReason>> {
        if self.smp && self.ctx.status.is_halted() {
            if let Some(idx) = self.pending_gdb_core.take() {
                if let Some(sibling) = self.siblings.get_mut(idx) {
                    std::mem::swap(&mut self.ap_apb, &mut sibling.ap);
                    std::mem::swap(&mut self.debug_base, &mut sibling.debug_base);
                    std::mem::swap(&mut self.cti_base, &mut sibling.cti_base);
                    std::mem::swap(&mut self.ctx, &mut sibling.ctx);
                    let reason = match self.ctx.status {
                        CoreStatus::Halted(reason) => reason,
                        _ => HaltReason::Unknown,
                    };
                    tracing::debug!(idx, "completed pending smp_gdb core switch");
                    return Ok(Some(reason));
                }
            }
        }

        let reason = {
            let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
            run_control::poll(&mut dpm, &mut self.ctx)?
        };
        if let Some(reason) = reason {
            self.debug_entry(reason)?;
            if self.smp {
                self.smp_halt_siblings()?;
            }
        }
        Ok(reason)
    }

    /// Debug entry (`spec.md` §4.6 "Debug entry"): diagnostic register
    /// reads, watchpoint fault address, core-mode decode, and the
    /// architecture-specific post-entry hook.
    fn debug_entry(&mut self, reason: HaltReason) -> Result<()> {
        let prsr = self
            .dap
            .mem_ap_read_atomic_u32(self.ap_apb, Prsr::mmio_address(self.debug_base))?;
        let edesr = self
            .dap
            .mem_ap_read_atomic_u32(self.ap_apb, Edesr::mmio_address(self.debug_base))?;
        tracing::debug!(prsr, edesr, ?reason, "debug entry");

        if matches!(reason, HaltReason::Watchpoint) {
            let lo = self
                .dap
                .mem_ap_read_atomic_u32(self.ap_apb, Wfar0::mmio_address(self.debug_base))?;
            let hi = self
                .dap
                .mem_ap_read_atomic_u32(self.ap_apb, Wfar1::mmio_address(self.debug_base))?;
            let fault_address = (lo as u64) | ((hi as u64) << 32);
            tracing::debug!(fault_address, "watchpoint fault address");
        }

        let raw_dscr = self
            .dap
            .mem_ap_read_atomic_u32(self.ap_apb, Dscr::mmio_address(self.debug_base))?;
        let dscr = Dscr::from(raw_dscr);
        self.ctx.core_mode = CoreMode::from_dscr(dscr.el(), dscr.currently_64_bit());

        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        dpm.set_cached_dscr(dscr);
        run_control::post_entry(&mut dpm, &mut self.ctx)
    }

    /// `halt` (`spec.md` §4.6, §6).
    pub fn halt(&mut self) -> Result<()> {
        {
            let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
            run_control::halt(&mut dpm, self.cti_base, &mut self.ctx)?;
        }
        self.debug_entry(HaltReason::Request)
    }

    /// `resume(current, address, handle_breakpoints, debug_execution)`
    /// (`spec.md` §6). `current`/`address`/`handle_breakpoints` and
    /// breakpoint-hiding-on-resume are the register-cache/front-end's
    /// responsibility (out of scope, `spec.md` §1); this drives the
    /// architectural resume sequence itself.
    pub fn resume(&mut self, writeback: &mut impl RegisterWriteback) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        run_control::resume(&mut dpm, self.cti_base, writeback, &mut self.ctx)
    }

    /// `step(current, address, handle_breakpoints)` (`spec.md` §6).
    pub fn step(&mut self, writeback: &mut impl RegisterWriteback) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        run_control::step(&mut dpm, self.cti_base, writeback, &mut self.ctx)
    }

    /// `assert_reset` (`spec.md` §6).
    pub fn assert_reset(&mut self) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        run_control::assert_reset(&mut dpm)
    }

    /// `deassert_reset` (`spec.md` §6).
    pub fn deassert_reset(&mut self) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        run_control::deassert_reset(&mut dpm)
    }

    /// `read_memory`/`write_memory` (`spec.md` §6, §4.7): dispatch to the
    /// AHB-AP direct path when available, otherwise the APB-through-core
    /// path. MMU translation for the AHB path is left to the caller via
    /// [`Target::virt2phys`] — this crate does not walk page tables itself.
    pub fn read_memory(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        if self.ap_ahb.is_some() && !self.ctx.mmu_enabled {
            return self.read_memory_ahb(address as u64, out);
        }
        let mut memory = Aarch64MemoryEngine::new(
            Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
            self.ap_ahb,
        );
        memory.read_memory(address, out)
    }

    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        if self.ap_ahb.is_some() && !self.ctx.mmu_enabled {
            return self.write_memory_ahb(address as u64, data);
        }
        let mut memory = Aarch64MemoryEngine::new(
            Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
            self.ap_ahb,
        );
        memory.write_memory(address, data)
    }

    fn read_memory_ahb(&mut self, address: u64, out: &mut [u8]) -> Result<()> {
        let ahb = self.ap_ahb.expect("checked by caller");
        let mut words = vec![0u32; out.len().div_ceil(4)];
        self.dap.mem_ap_read_buf(ahb, address & !0x3, &mut words)?;
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for w in &words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let offset = (address & 0x3) as usize;
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn write_memory_ahb(&mut self, address: u64, data: &[u8]) -> Result<()> {
        if address & 0x3 != 0 || data.len() % 4 != 0 {
            let mut memory = Aarch64MemoryEngine::new(
                Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
                self.ap_ahb,
            );
            return memory.write_memory(address as u32, data);
        }
        let ahb = self.ap_ahb.expect("checked by caller");
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        self.dap.mem_ap_write_buf(ahb, address, &words)
    }

    /// `read_phys_memory`/`write_phys_memory` (`spec.md` §6, §4.7 "MMU
    /// coordination"): force the MMU off (flushing the data cache first)
    /// around a physical access, then maintain the instruction/data cache
    /// over the written range before restoring the MMU state.
    pub fn write_phys_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        let was_enabled = self.ctx.mmu_enabled;
        if was_enabled {
            self.mmu_modify(false)?;
        }

        let result = {
            let mut memory = Aarch64MemoryEngine::new(
                Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
                self.ap_ahb,
            );
            memory.write_memory(address, data)
        };

        if result.is_ok() && (self.ctx.i_cache_enabled || self.ctx.d_cache_enabled) {
            self.maintain_cache_range(address as u64, data.len())?;
        }

        if was_enabled {
            self.mmu_modify(true)?;
        }
        result
    }

    pub fn read_phys_memory(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        let was_enabled = self.ctx.mmu_enabled;
        if was_enabled {
            self.mmu_modify(false)?;
        }
        let result = {
            let mut memory = Aarch64MemoryEngine::new(
                Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
                self.ap_ahb,
            );
            memory.read_memory(address, out)
        };
        if was_enabled {
            self.mmu_modify(true)?;
        }
        result
    }

    /// `read_phys_memory_64`, the instruction-by-instruction path
    /// (`spec.md` §4.7).
    pub fn read_phys_memory_64(
        &mut self,
        address: u64,
        size: u8,
        count: usize,
        out: &mut [u8],
    ) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        let mut memory = Aarch64MemoryEngine::new(
            Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
            self.ap_ahb,
        );
        memory.read_memory_64(address, size, count, out)
    }

    /// `write_phys_memory` at a 64-bit address. Per Open Question (2),
    /// write sizes above 4 bytes are rejected rather than silently
    /// mishandled.
    pub fn write_phys_memory_64(
        &mut self,
        address: u64,
        size: u8,
        count: usize,
        data: &[u8],
    ) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        if size > 4 {
            return Err(Error::SyntaxError);
        }
        let mut memory = Aarch64MemoryEngine::new(
            Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
            self.ap_ahb,
        );
        memory.write_memory_64(address, size, count, data)
    }

    fn maintain_cache_range(&mut self, start: u64, len: usize) -> Result<()> {
        const LINE: u64 = 64;
        let first = start & !(LINE - 1);
        let last = (start + len as u64).saturating_sub(1) & !(LINE - 1);
        let icache = self.ctx.i_cache_enabled;
        let dcache = self.ctx.d_cache_enabled;
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        let mut line = first;
        while line <= last {
            crate::dpm::maintain_cache_line(&mut dpm, line, icache, dcache)?;
            line += LINE;
        }
        Ok(())
    }

    /// `mmu(&enabled)` (`spec.md` §6): the MMU state captured at halt.
    pub fn mmu(&self) -> Result<bool> {
        mmu_state(self.ctx.status.is_halted(), self.ctx.mmu_enabled)
    }

    fn mmu_modify(&mut self, enable: bool) -> Result<()> {
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        self.ctx.mmu_modify(&mut dpm, enable)
    }

    /// `virt2phys` (`spec.md` §6), delegated to a caller-supplied walker.
    pub fn virt2phys(&mut self, walker: &mut impl PageTableWalker, virt: u64) -> Result<u64> {
        virt2phys(self.ctx.status.is_halted(), walker, virt)
    }

    /// `add_breakpoint` (`spec.md` §4.5, §6): dispatches on `bp.kind`.
    pub fn add_breakpoint(&mut self, bp: &mut Breakpoint) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        match bp.kind {
            BreakpointKind::Hard => {
                let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
                let bank = self.bank.as_mut().ok_or(Error::Fail)?;
                bank.set_hard(&mut dpm, bp)
            }
            BreakpointKind::Soft => {
                let mut memory = Aarch64MemoryEngine::new(
                    Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
                    self.ap_ahb,
                );
                let bank = self.bank.as_mut().ok_or(Error::Fail)?;
                bank.set_soft(&mut memory, bp)
            }
            BreakpointKind::Watch => {
                let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
                let bank = self.bank.as_mut().ok_or(Error::Fail)?;
                bank.set_watch(&mut dpm, bp)
            }
        }
    }

    /// `add_context_breakpoint` (`spec.md` §4.5 "Context-ID", §6).
    pub fn add_context_breakpoint(&mut self, bp: &mut Breakpoint) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        let bank = self.bank.as_mut().ok_or(Error::Fail)?;
        bank.set_context(&mut dpm, bp)
    }

    /// `add_hybrid_breakpoint` (`spec.md` §4.5 "Hybrid", §6).
    pub fn add_hybrid_breakpoint(&mut self, bp: &mut Breakpoint) -> Result<()> {
        if !self.ctx.status.is_halted() {
            return Err(Error::TargetNotHalted);
        }
        let mut dpm = Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base);
        let bank = self.bank.as_mut().ok_or(Error::Fail)?;
        bank.set_hybrid(&mut dpm, bp)
    }

    /// `remove_breakpoint` (`spec.md` §4.5 "Unset", §6).
    pub fn remove_breakpoint(&mut self, bp: &mut Breakpoint) -> Result<()> {
        let mut memory = Aarch64MemoryEngine::new(
            Aarch64Dpm::new(&mut self.dap, self.ap_apb, self.debug_base),
            self.ap_ahb,
        );
        let bank = self.bank.as_mut().ok_or(Error::Fail)?;
        bank.unset(&mut memory, bp)
    }

    /// `smp_on`/`smp_off` (`spec.md` §4.6, §6).
    pub fn smp_on(&mut self) {
        self.smp = true;
    }

    pub fn smp_off(&mut self) {
        self.smp = false;
    }

    /// Register an additional core of the SMP cluster, reached through the
    /// same DAP/probe connection as this one.
    pub fn add_sibling(&mut self, ap: ApHandle, debug_base: u64, cti_base: u64) {
        self.siblings.push(Sibling {
            ap,
            debug_base,
            cti_base,
            ctx: CoreContext::new(),
        });
    }

    fn smp_halt_siblings(&mut self) -> Result<()> {
        let mut entries: Vec<(ApHandle, u64, u64, &mut CoreContext)> = self
            .siblings
            .iter_mut()
            .map(|s| (s.ap, s.debug_base, s.cti_base, &mut s.ctx))
            .collect();
        run_control::smp_halt_siblings(&mut self.dap, &mut entries)
    }

    /// `state`/`states` CLI text producers (`spec.md` §6).
    pub fn state_text(&self) -> String {
        run_control::state_text(&self.ctx)
    }

    pub fn states_text(&self) -> String {
        let sibling_ctxs: Vec<CoreContext> = self
            .siblings
            .iter()
            .map(|s| CoreContext {
                status: s.ctx.status,
                debug_reason: s.ctx.debug_reason,
                core_mode: s.ctx.core_mode,
                system_control_reg: s.ctx.system_control_reg,
                system_control_reg_curr: s.ctx.system_control_reg_curr,
                mmu_enabled: s.ctx.mmu_enabled,
                i_cache_enabled: s.ctx.i_cache_enabled,
                d_cache_enabled: s.ctx.d_cache_enabled,
                smp: s.ctx.smp,
            })
            .collect();
        run_control::states_text(&self.ctx, &sibling_ctxs)
    }

    /// `cache_info` CLI text producer.
    pub fn cache_info_text(&self) -> String {
        run_control::cache_info_text(&self.ctx)
    }

    /// `mmu_info` CLI text producer.
    pub fn mmu_info_text(&self) -> String {
        run_control::mmu_info_text(&self.ctx)
    }

    /// `smp_gdb [coreid]` (`spec.md` §4.6 "SMP fan-out", §6): queue a GDB
    /// core switch to sibling `coreid`; the next [`Target::poll`] completes
    /// it and reports a synthetic halt. Called with `None`, this only
    /// reports the sibling currently selected (if any) without queuing
    /// anything, the "print current core id" form of the CLI command.
    pub fn smp_gdb(&mut self, core: Option<usize>) -> Option<&CoreContext> {
        if let Some(idx) = core {
            self.pending_gdb_core = Some(idx);
        }
        self.pending_gdb_core.and_then(|i| self.siblings.get(i)).map(|s| &s.ctx)
    }
}
