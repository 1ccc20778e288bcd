//! The Breakpoint Slot Manager (`spec.md` §4.5, §3 "Breakpoint slot").
//!
//! Grounded in the teacher's `Armv8a::{set_hw_breakpoint, clear_hw_breakpoint,
//! hw_breakpoints}` (`armv8a.rs`), generalized from its single HARD kind to
//! the full HARD/SOFT/CONTEXT/hybrid matrix and the supplemented data
//! watchpoint kind (grounded in the original driver's
//! `aarch64_set_watchpoint`/`aarch64_unset_watchpoint`, which share this
//! same slot-allocation shape).

use crate::dpm::Dpm;
use crate::error::{Error, Result};
use crate::instructions::{build_ic_iallu, BRK_0X11};
use crate::memory::MemoryEngine;

/// The hardware kind backing a bank slot (`spec.md` §3 "Breakpoint slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Normal,
    Context,
}

/// One entry in the fixed breakpoint/watchpoint bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub used: bool,
    pub kind: SlotType,
    pub value: u64,
    pub control: u32,
}

impl Slot {
    fn unused(kind: SlotType) -> Self {
        Self {
            used: false,
            kind,
            value: 0,
            control: 0,
        }
    }
}

/// What a front-end-owned breakpoint actually is (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Hard,
    Soft,
    /// Supplemented beyond the distilled table: a data watchpoint, sharing
    /// the watchpoint (`WVR`/`WCR`) bank.
    Watch,
}

/// A breakpoint or watchpoint as the front-end sees it.
#[derive(Debug, Clone, Copy)]
pub struct Breakpoint {
    pub kind: BreakpointKind,
    pub address: u64,
    pub length: u8,
    pub asid: Option<u32>,
    /// Slot index + 1, or `0x11` for soft, or `0` when unset.
    pub set: u32,
    /// Index of the linked NORMAL slot, for hybrid address+context pairs.
    pub linked_brp: Option<usize>,
    /// Saved instruction bytes, for soft breakpoints.
    pub orig_instr: u32,
}

const MAGIC_SOFT_SET: u32 = 0x11;

/// The fixed bank of breakpoint (`BVR`/`BCR`) slots plus, sharing the same
/// index space at `brp_num..brp_num+wrp_num`, the watchpoint (`WVR`/`WCR`)
/// bank. `brp_num_context` of the breakpoint slots, at the tail, are
/// `CONTEXT`; the rest are `NORMAL` (`spec.md` §3 "Breakpoint slot").
pub struct BreakpointBank {
    brp: Vec<Slot>,
    wrp: Vec<Slot>,
    brp_num_context: usize,
    brp_num_available: usize,
}

impl BreakpointBank {
    pub fn new(brp_num: usize, brp_num_context: usize, wrp_num: usize) -> Self {
        let mut brp = Vec::with_capacity(brp_num);
        for i in 0..brp_num {
            let kind = if i < brp_num - brp_num_context {
                SlotType::Normal
            } else {
                SlotType::Context
            };
            brp.push(Slot::unused(kind));
        }
        let wrp = vec![Slot::unused(SlotType::Normal); wrp_num];
        Self {
            brp,
            wrp,
            brp_num_context,
            brp_num_available: brp_num - brp_num_context,
        }
    }

    pub fn brp_num_available(&self) -> usize {
        self.brp_num_available
    }

    fn first_unused_normal(&self) -> Option<usize> {
        self.brp
            .iter()
            .position(|s| !s.used && s.kind == SlotType::Normal)
    }

    fn first_unused_context(&self) -> Option<usize> {
        self.brp
            .iter()
            .position(|s| !s.used && s.kind == SlotType::Context)
    }

    fn first_unused_watch(&self) -> Option<usize> {
        self.wrp.iter().position(|s| !s.used)
    }

    fn byte_addr_select(address: u64, length: u8) -> u32 {
        if length == 4 {
            0xF
        } else {
            3 << (address & 2)
        }
    }

    fn hard_control(address: u64, length: u8) -> u32 {
        let matchmode: u32 = 0;
        let bas = Self::byte_addr_select(address, length);
        (matchmode & 7) << 20 | bas << 5 | (3 << 1) | (1 << 13) | 1
    }

    /// Set a HARD address-match breakpoint (`spec.md` §4.5 "Hard").
    pub fn set_hard(&mut self, dpm: &mut impl Dpm, bp: &mut Breakpoint) -> Result<()> {
        let index = self.first_unused_normal().ok_or(Error::ResourceUnavailable)?;
        let value = bp.address & !0x3;
        let control = Self::hard_control(value, bp.length);

        dpm.bpwp_enable(index, value, control)?;

        self.brp[index] = Slot {
            used: true,
            kind: SlotType::Normal,
            value,
            control,
        };
        self.brp_num_available -= 1;
        bp.set = (index as u32) + 1;
        Ok(())
    }

    /// Set a CONTEXT-ID breakpoint (`spec.md` §4.5 "Context-ID").
    pub fn set_context(&mut self, dpm: &mut impl Dpm, bp: &mut Breakpoint) -> Result<()> {
        let index = self.first_unused_context().ok_or(Error::ResourceUnavailable)?;
        let asid = bp.asid.unwrap_or(0) as u64;
        let matchmode: u32 = 2;
        let control = (matchmode & 7) << 20 | (3 << 1) | (1 << 13) | 1;

        dpm.bpwp_enable(index, asid, control)?;

        self.brp[index] = Slot {
            used: true,
            kind: SlotType::Context,
            value: asid,
            control,
        };
        self.brp_num_available -= 1;
        bp.set = (index as u32) + 1;
        Ok(())
    }

    /// Set a hybrid address+context linked pair (`spec.md` §4.5 "Hybrid").
    pub fn set_hybrid(&mut self, dpm: &mut impl Dpm, bp: &mut Breakpoint) -> Result<()> {
        let c = self.first_unused_context().ok_or(Error::ResourceUnavailable)?;
        let n = self
            .brp
            .iter()
            .position(|s| !s.used && s.kind == SlotType::Normal)
            .ok_or(Error::ResourceUnavailable)?;

        let asid = bp.asid.unwrap_or(0) as u64;
        let address = bp.address & !0x3;

        let context_control = (3u32 & 7) << 20 | (n as u32) << 16 | (3 << 1) | (1 << 13) | 1;
        let normal_control =
            (1u32 & 7) << 20 | (c as u32) << 16 | Self::byte_addr_select(address, bp.length) << 5
                | (3 << 1)
                | (1 << 13)
                | 1;

        dpm.bpwp_enable(c, asid, context_control)?;
        dpm.bpwp_enable(n, address, normal_control)?;

        self.brp[c] = Slot {
            used: true,
            kind: SlotType::Context,
            value: asid,
            control: context_control,
        };
        self.brp[n] = Slot {
            used: true,
            kind: SlotType::Normal,
            value: address,
            control: normal_control,
        };
        self.brp_num_available -= 1;
        bp.set = (c as u32) + 1;
        bp.linked_brp = Some(n);
        Ok(())
    }

    /// Set a data watchpoint (supplemented; shares the `WVR`/`WCR` bank).
    pub fn set_watch(&mut self, dpm: &mut impl Dpm, bp: &mut Breakpoint) -> Result<()> {
        let index = self.first_unused_watch().ok_or(Error::ResourceUnavailable)?;
        let value = bp.address & !0x3;
        let bas = Self::byte_addr_select(value, bp.length);
        let control = bas << 5 | (3 << 1) | 1;

        dpm.bpwp_enable(index + 16, value, control)?;

        self.wrp[index] = Slot {
            used: true,
            kind: SlotType::Normal,
            value,
            control,
        };
        bp.set = (index as u32) + 1;
        Ok(())
    }

    /// Set a SOFT breakpoint by instruction patching (`spec.md` §4.5 "Soft").
    ///
    /// Takes one combined handle rather than a separate `Dpm` and
    /// `MemoryEngine`: both ultimately drive the same core, and a memory
    /// engine already carries a `Dpm` internally (`spec.md` §9 "Shared
    /// scratch registers").
    pub fn set_soft(
        &mut self,
        handle: &mut (impl Dpm + MemoryEngine),
        bp: &mut Breakpoint,
    ) -> Result<()> {
        let addr = bp.address & !0x1;
        let orig = handle.read_phys_word(addr)?;
        handle.write_phys_word(addr, BRK_0X11)?;
        handle.instr_execute(build_ic_iallu())?;

        bp.orig_instr = orig;
        bp.set = MAGIC_SOFT_SET;
        Ok(())
    }

    /// Release whatever slot(s) a breakpoint owns (`spec.md` §4.5 "Unset").
    pub fn unset(&mut self, handle: &mut (impl Dpm + MemoryEngine), bp: &mut Breakpoint) -> Result<()> {
        if bp.set == 0 {
            return Ok(());
        }
        if bp.set == MAGIC_SOFT_SET {
            let addr = bp.address & !0x1;
            handle.write_phys_word(addr, bp.orig_instr)?;
            handle.instr_execute(build_ic_iallu())?;
            bp.set = 0;
            return Ok(());
        }

        match bp.kind {
            BreakpointKind::Watch => {
                let index = (bp.set - 1) as usize;
                handle.bpwp_disable(index + 16)?;
                self.wrp[index].used = false;
            }
            _ => {
                let index = (bp.set - 1) as usize;
                handle.bpwp_disable(index)?;
                self.brp[index].used = false;
                self.brp_num_available += 1;

                if let Some(n) = bp.linked_brp.take() {
                    handle.bpwp_disable(n)?;
                    self.brp[n].used = false;
                }
            }
        }
        bp.set = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpm::DirtyScratch;
    use pretty_assertions::assert_eq;

    struct FakeDpm {
        writes: Vec<(usize, u64, u32)>,
        disables: Vec<usize>,
    }

    impl Dpm for FakeDpm {
        fn prepare(&mut self) -> Result<()> {
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
        fn instr_execute(&mut self, _opcode: u32) -> Result<()> {
            Ok(())
        }
        fn instr_write_data_dcc(&mut self, _opcode: u32, _data: u32) -> Result<()> {
            Ok(())
        }
        fn instr_write_data_dcc_64(&mut self, _opcode: u32, _data: u64) -> Result<()> {
            Ok(())
        }
        fn instr_write_data_r0(&mut self, _opcode: u32, _data: u32) -> Result<()> {
            Ok(())
        }
        fn instr_write_data_r0_64(&mut self, _opcode: u32, _data: u64) -> Result<()> {
            Ok(())
        }
        fn instr_read_data_dcc(&mut self, _opcode: u32) -> Result<u32> {
            Ok(0)
        }
        fn instr_read_data_dcc_64(&mut self, _opcode: u32) -> Result<u64> {
            Ok(0)
        }
        fn instr_read_data_r0(&mut self, _opcode: u32) -> Result<u32> {
            Ok(0)
        }
        fn instr_read_data_r0_64(&mut self, _opcode: u32) -> Result<u64> {
            Ok(0)
        }
        fn instr_cpsr_sync(&mut self) -> Result<()> {
            Ok(())
        }
        fn bpwp_enable(&mut self, index: usize, address: u64, control: u32) -> Result<()> {
            self.writes.push((index, address, control));
            Ok(())
        }
        fn bpwp_disable(&mut self, index: usize) -> Result<()> {
            self.disables.push(index);
            Ok(())
        }
        fn dirty(&self) -> DirtyScratch {
            DirtyScratch::default()
        }
        fn take_dirty(&mut self) -> DirtyScratch {
            DirtyScratch::default()
        }
        fn raw_read(&mut self, _address: u64) -> Result<u32> {
            Ok(0)
        }
        fn raw_write(&mut self, _address: u64, _value: u32) -> Result<()> {
            Ok(())
        }
        fn ap(&self) -> crate::dap::ApHandle {
            crate::dap::ApHandle(0)
        }
        fn debug_base(&self) -> u64 {
            0
        }
    }

    impl crate::memory::MemoryEngine for FakeDpm {
        fn read_phys_word(&mut self, _address: u64) -> Result<u32> {
            Ok(0)
        }
        fn write_phys_word(&mut self, _address: u64, _value: u32) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn hard_breakpoint_matches_scenario_4() {
        let mut bank = BreakpointBank::new(16, 16, 16);
        let mut dpm = FakeDpm {
            writes: Vec::new(),
            disables: Vec::new(),
        };
        let mut bp = Breakpoint {
            kind: BreakpointKind::Hard,
            address: 0x4000,
            length: 4,
            asid: None,
            set: 0,
            linked_brp: None,
            orig_instr: 0,
        };
        bank.set_hard(&mut dpm, &mut bp).unwrap();
        let (_, value, control) = dpm.writes[0];
        assert_eq!(value, 0x4000);
        assert_eq!(control, 0x0000_21E7);
        assert_eq!(bp.set, 1);
    }

    #[test]
    fn running_out_of_normal_slots_returns_resource_unavailable() {
        let mut bank = BreakpointBank::new(1, 0, 0);
        let mut dpm = FakeDpm {
            writes: Vec::new(),
            disables: Vec::new(),
        };
        let mut first = Breakpoint {
            kind: BreakpointKind::Hard,
            address: 0x1000,
            length: 4,
            asid: None,
            set: 0,
            linked_brp: None,
            orig_instr: 0,
        };
        bank.set_hard(&mut dpm, &mut first).unwrap();
        let mut second = first;
        second.set = 0;
        let result = bank.set_hard(&mut dpm, &mut second);
        assert!(matches!(result, Err(Error::ResourceUnavailable)));
    }

    #[test]
    fn unset_restores_availability() {
        let mut bank = BreakpointBank::new(2, 0, 0);
        let mut dpm = FakeDpm {
            writes: Vec::new(),
            disables: Vec::new(),
        };
        let mut bp = Breakpoint {
            kind: BreakpointKind::Hard,
            address: 0x2000,
            length: 4,
            asid: None,
            set: 0,
            linked_brp: None,
            orig_instr: 0,
        };
        bank.set_hard(&mut dpm, &mut bp).unwrap();
        assert_eq!(bank.brp_num_available(), 1);

        bank.unset(&mut dpm, &mut bp).unwrap();
        assert_eq!(bank.brp_num_available(), 2);
        assert_eq!(bp.set, 0);
        assert_eq!(dpm.disables, vec![0]);
    }
}
