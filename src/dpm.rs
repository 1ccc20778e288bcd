//! The Debug Programmer's Model (`spec.md` §4.4): the opaque contract the
//! architecture-independent register save/restore layer consumes.
//!
//! Grounded in the teacher's `execute_instruction_with_result`/
//! `execute_instruction_with_input` pair in `armv8a.rs`, generalized here
//! into the full read/write × dcc/r0 × 32/64 matrix the original driver
//! exposes as one opaque function table.

use crate::dap::{ApHandle, DapAccess};
use crate::dcc::{read_dcc_32, read_dcc_64, write_dcc_32, write_dcc_64};
use crate::error::Result;
use crate::instructions::{
    build_dc_cvau, build_ic_ivau, build_msr_dbgdtr, build_msr_dbgdtrtx, build_mrs_dbgdtr,
    build_mrs_dbgdtrrx, DSB_SY,
};
use crate::opcode_pump::exec_opcode;
use crate::regs::{Dbgbcr, Dbgbvr, Dbgwcr, Dbgwvr, Dscr, Drcr, Dtrrx, MemoryMappedRegister, BRP_STRIDE};

use std::time::Duration;

use crate::deadline::Deadline;

const PREPARE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which general-purpose scratch registers a DPM macro-op has clobbered.
/// The register-writeback layer in `run_control` consumes this to decide
/// what must be restored before resume (`spec.md` §3, §5 "Shared resources").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtyScratch {
    pub r0: bool,
    pub r1: bool,
}

/// The DPM operation set (`spec.md` §4.4). Indices `0..=15` address the
/// breakpoint bank, `16..=31` the watchpoint bank (biased by -16).
pub trait Dpm {
    fn prepare(&mut self) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    fn instr_execute(&mut self, opcode: u32) -> Result<()>;
    fn instr_write_data_dcc(&mut self, opcode: u32, data: u32) -> Result<()>;
    fn instr_write_data_dcc_64(&mut self, opcode: u32, data: u64) -> Result<()>;
    fn instr_write_data_r0(&mut self, opcode: u32, data: u32) -> Result<()>;
    fn instr_write_data_r0_64(&mut self, opcode: u32, data: u64) -> Result<()>;
    fn instr_read_data_dcc(&mut self, opcode: u32) -> Result<u32>;
    fn instr_read_data_dcc_64(&mut self, opcode: u32) -> Result<u64>;
    fn instr_read_data_r0(&mut self, opcode: u32) -> Result<u32>;
    fn instr_read_data_r0_64(&mut self, opcode: u32) -> Result<u64>;
    fn instr_cpsr_sync(&mut self) -> Result<()>;
    fn bpwp_enable(&mut self, index: usize, address: u64, control: u32) -> Result<()>;
    fn bpwp_disable(&mut self, index: usize) -> Result<()>;

    /// Scratch registers clobbered since the last [`Dpm::take_dirty`]
    /// (`spec.md` §3 "Register 0 ... are marked dirty").
    fn dirty(&self) -> DirtyScratch;

    /// Drain and reset the dirty-scratch set, for the register-writeback
    /// phase to consume before resume.
    fn take_dirty(&mut self) -> DirtyScratch;

    /// A raw, non-opcode-pump register read at an absolute MMIO address
    /// reached through the same AP this DPM drives. Lets `run_control`
    /// (CTI programming, `DRCR`/`EDECR` pokes) share one borrow of the DAP
    /// access layer with the opcode pump instead of needing its own,
    /// aliasing one (`spec.md` §9 "Shared scratch registers").
    fn raw_read(&mut self, address: u64) -> Result<u32>;

    /// The write counterpart to [`Dpm::raw_read`].
    fn raw_write(&mut self, address: u64, value: u32) -> Result<()>;

    /// The `AP` this DPM is driving, for callers (CTI programming) that
    /// need to reach a different register block through the same AP.
    fn ap(&self) -> ApHandle;

    /// The external debug register block's MMIO origin.
    fn debug_base(&self) -> u64;
}

/// The concrete DPM, driving one core's external debug register block
/// through a borrowed DAP access layer.
pub struct Aarch64Dpm<'a, D: DapAccess> {
    dap: &'a mut D,
    ap: ApHandle,
    debug_base: u64,
    dscr: Option<Dscr>,
    dirty: DirtyScratch,
}

impl<'a, D: DapAccess> Aarch64Dpm<'a, D> {
    pub fn new(dap: &'a mut D, ap: ApHandle, debug_base: u64) -> Self {
        Self {
            dap,
            ap,
            debug_base,
            dscr: None,
            dirty: DirtyScratch::default(),
        }
    }

    /// Mark `X0`/`X1` dirty directly, for callers that clobber scratch
    /// registers through raw DAP access rather than a DPM macro-op (the
    /// bulk APB memory path, `spec.md` §4.7).
    pub fn mark_dirty(&mut self, r0: bool, r1: bool) {
        self.dirty.r0 |= r0;
        self.dirty.r1 |= r1;
    }

    /// Borrow the underlying DAP access layer directly, for callers (the
    /// memory engine's bulk path) that need primitives outside the DPM's
    /// opaque contract.
    pub fn dap_mut(&mut self) -> &mut D {
        self.dap
    }

    pub fn ap(&self) -> ApHandle {
        self.ap
    }

    pub fn debug_base(&self) -> u64 {
        self.debug_base
    }

    /// The last `DSCR` observed by any opcode-pump or DCC call, if any.
    pub fn cached_dscr(&self) -> Option<Dscr> {
        self.dscr
    }

    pub fn set_cached_dscr(&mut self, dscr: Dscr) {
        self.dscr = Some(dscr);
    }

    fn exec(&mut self, opcode: u32) -> Result<()> {
        exec_opcode(self.dap, self.ap, self.debug_base, opcode, &mut self.dscr)
    }

    fn bank_address<R: MemoryMappedRegister<u32>>(&self, slot: usize) -> u64 {
        R::mmio_address(self.debug_base) + (slot as u64) * BRP_STRIDE
    }
}

impl<'a, D: DapAccess> Dpm for Aarch64Dpm<'a, D> {
    fn prepare(&mut self) -> Result<()> {
        let deadline = Deadline::after(PREPARE_TIMEOUT);
        loop {
            let raw = self
                .dap
                .mem_ap_read_atomic_u32(self.ap, Dscr::mmio_address(self.debug_base))?;
            let dscr = Dscr::from(raw);
            self.dscr = Some(dscr);
            if dscr.ite() {
                break;
            }
            if deadline.expired() {
                return Err(crate::error::Error::Timeout);
            }
        }

        let dscr = self.dscr.expect("set above");
        if dscr.rxfull() {
            // Stuck write side: drain it and clear the sticky error so the
            // next opcode doesn't inherit a half-finished transfer.
            let _ = self
                .dap
                .mem_ap_read_atomic_u32(self.ap, Dtrrx::mmio_address(self.debug_base))?;
            let mut drcr = Drcr::from(0u32);
            drcr.set_cse(true);
            self.dap.mem_ap_write_atomic_u32(
                self.ap,
                Drcr::mmio_address(self.debug_base),
                drcr.into(),
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn instr_execute(&mut self, opcode: u32) -> Result<()> {
        self.exec(opcode)
    }

    fn instr_write_data_dcc(&mut self, opcode: u32, data: u32) -> Result<()> {
        write_dcc_32(self.dap, self.ap, self.debug_base, data)?;
        self.exec(opcode)
    }

    fn instr_write_data_dcc_64(&mut self, opcode: u32, data: u64) -> Result<()> {
        write_dcc_64(self.dap, self.ap, self.debug_base, data)?;
        self.exec(opcode)
    }

    fn instr_write_data_r0(&mut self, opcode: u32, data: u32) -> Result<()> {
        self.dirty.r0 = true;
        write_dcc_32(self.dap, self.ap, self.debug_base, data)?;
        self.exec(build_mrs_dbgdtrrx(0))?;
        self.exec(opcode)
    }

    fn instr_write_data_r0_64(&mut self, opcode: u32, data: u64) -> Result<()> {
        self.dirty.r0 = true;
        write_dcc_64(self.dap, self.ap, self.debug_base, data)?;
        self.exec(build_mrs_dbgdtr(0))?;
        self.exec(opcode)
    }

    fn instr_read_data_dcc(&mut self, opcode: u32) -> Result<u32> {
        self.exec(opcode)?;
        read_dcc_32(self.dap, self.ap, self.debug_base, &mut self.dscr)
    }

    fn instr_read_data_dcc_64(&mut self, opcode: u32) -> Result<u64> {
        self.exec(opcode)?;
        read_dcc_64(self.dap, self.ap, self.debug_base, &mut self.dscr)
    }

    fn instr_read_data_r0(&mut self, opcode: u32) -> Result<u32> {
        self.dirty.r0 = true;
        self.exec(opcode)?;
        self.exec(build_msr_dbgdtrtx(0))?;
        read_dcc_32(self.dap, self.ap, self.debug_base, &mut self.dscr)
    }

    fn instr_read_data_r0_64(&mut self, opcode: u32) -> Result<u64> {
        self.dirty.r0 = true;
        self.exec(opcode)?;
        self.exec(build_msr_dbgdtr(0))?;
        read_dcc_64(self.dap, self.ap, self.debug_base, &mut self.dscr)
    }

    fn instr_cpsr_sync(&mut self) -> Result<()> {
        self.exec(DSB_SY)
    }

    fn bpwp_enable(&mut self, index: usize, address: u64, control: u32) -> Result<()> {
        if index < 16 {
            let vr = self.bank_address::<Dbgbvr>(index);
            let cr = self.bank_address::<Dbgbcr>(index);
            self.dap
                .mem_ap_write_atomic_u32(self.ap, vr, address as u32)?;
            self.dap
                .mem_ap_write_atomic_u32(self.ap, vr + 4, (address >> 32) as u32)?;
            self.dap.mem_ap_write_atomic_u32(self.ap, cr, control)
        } else {
            let slot = index - 16;
            let vr = self.bank_address::<Dbgwvr>(slot);
            let cr = self.bank_address::<Dbgwcr>(slot);
            self.dap
                .mem_ap_write_atomic_u32(self.ap, vr, address as u32)?;
            self.dap
                .mem_ap_write_atomic_u32(self.ap, vr + 4, (address >> 32) as u32)?;
            self.dap.mem_ap_write_atomic_u32(self.ap, cr, control)
        }
    }

    fn bpwp_disable(&mut self, index: usize) -> Result<()> {
        if index < 16 {
            let cr = self.bank_address::<Dbgbcr>(index);
            self.dap.mem_ap_write_atomic_u32(self.ap, cr, 0)
        } else {
            let cr = self.bank_address::<Dbgwcr>(index - 16);
            self.dap.mem_ap_write_atomic_u32(self.ap, cr, 0)
        }
    }

    fn dirty(&self) -> DirtyScratch {
        self.dirty
    }

    fn take_dirty(&mut self) -> DirtyScratch {
        std::mem::take(&mut self.dirty)
    }

    fn raw_read(&mut self, address: u64) -> Result<u32> {
        self.dap.mem_ap_read_atomic_u32(self.ap, address)
    }

    fn raw_write(&mut self, address: u64, value: u32) -> Result<()> {
        self.dap.mem_ap_write_atomic_u32(self.ap, address, value)
    }

    fn ap(&self) -> ApHandle {
        self.ap
    }

    fn debug_base(&self) -> u64 {
        self.debug_base
    }
}

/// Stage a cache-line address through X0 and run `op` (`IC IVAU`/`DC CVAU`).
/// Used by the memory engine's post-write cache maintenance
/// (`spec.md` §4.7 "Post-write cache maintenance").
pub fn maintain_cache_line(
    dpm: &mut impl Dpm,
    address: u64,
    invalidate_icache: bool,
    clean_dcache: bool,
) -> Result<()> {
    if invalidate_icache {
        dpm.instr_write_data_r0(build_ic_ivau(0), address as u32)?;
    }
    if clean_dcache {
        dpm.instr_write_data_r0(build_dc_cvau(0), address as u32)?;
    }
    Ok(())
}
