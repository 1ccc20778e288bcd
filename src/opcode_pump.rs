//! The Opcode Pump (`spec.md` §4.2): feeds a single A64 instruction into a
//! halted core through the Instruction Transfer Register, tracking one bit
//! of "instruction complete" state to avoid deadlocking the pipe.
//!
//! Grounded in the teacher's `Armv8a::execute_instruction`
//! (`architecture/arm/core/armv8a.rs`), which polls `Edscr.ite()` the same
//! way around a single `Editr` write.

use std::time::Duration;

use crate::dap::{ApHandle, DapAccess};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::regs::{Dscr, Itr, MemoryMappedRegister};

const PRE_OP_TIMEOUT: Duration = Duration::from_secs(2);
const POST_OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll `DSCR` until `ITE` (InstrCompl) is set, bounded by `timeout`.
/// Returns the last-read `DSCR` value.
fn wait_instr_complete(
    dap: &mut impl DapAccess,
    ap: ApHandle,
    debug_base: u64,
    timeout: Duration,
) -> Result<Dscr> {
    let deadline = Deadline::after(timeout);
    loop {
        let raw = dap.mem_ap_read_atomic_u32(ap, Dscr::mmio_address(debug_base))?;
        let dscr = Dscr::from(raw);
        if dscr.ite() {
            return Ok(dscr);
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }
}

/// Run one opcode through the ITR (`spec.md` §4.2).
///
/// `dscr` is both an optimization and an output: if the caller already knows
/// InstrCompl is set (a prior operation left it that way), pass that cached
/// value in and the initial poll is skipped. On return it holds the final
/// `DSCR`, which has InstrCompl set whenever this returns `Ok`.
pub fn exec_opcode(
    dap: &mut impl DapAccess,
    ap: ApHandle,
    debug_base: u64,
    opcode: u32,
    dscr: &mut Option<Dscr>,
) -> Result<()> {
    let already_complete = dscr.map(|d| d.ite()).unwrap_or(false);
    if !already_complete {
        *dscr = Some(wait_instr_complete(dap, ap, debug_base, PRE_OP_TIMEOUT)?);
    }

    dap.mem_ap_write_atomic_u32(ap, Itr::mmio_address(debug_base), opcode)?;

    *dscr = Some(wait_instr_complete(dap, ap, debug_base, POST_OP_TIMEOUT)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeDap {
        reads: VecDeque<u32>,
        writes: Vec<(u64, u32)>,
    }

    impl DapAccess for FakeDap {
        fn mem_ap_read_atomic_u32(&mut self, _ap: ApHandle, _address: u64) -> Result<u32> {
            Ok(self.reads.pop_front().unwrap_or(1 << 24))
        }
        fn mem_ap_write_atomic_u32(
            &mut self,
            _ap: ApHandle,
            address: u64,
            value: u32,
        ) -> Result<()> {
            self.writes.push((address, value));
            Ok(())
        }
        fn mem_ap_read_buf(&mut self, _ap: ApHandle, _address: u64, _data: &mut [u32]) -> Result<()> {
            unimplemented!()
        }
        fn mem_ap_write_buf(&mut self, _ap: ApHandle, _address: u64, _data: &[u32]) -> Result<()> {
            unimplemented!()
        }
        fn mem_ap_read_buf_noincr(
            &mut self,
            _ap: ApHandle,
            _address: u64,
            _data: &mut [u32],
        ) -> Result<()> {
            unimplemented!()
        }
        fn mem_ap_write_buf_noincr(
            &mut self,
            _ap: ApHandle,
            _address: u64,
            _data: &[u32],
        ) -> Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn skips_initial_poll_when_dscr_already_complete() {
        let mut dap = FakeDap {
            reads: VecDeque::from([1 << 24]),
            writes: Vec::new(),
        };
        let mut dscr = Some(Dscr::from(1u32 << 24));
        exec_opcode(&mut dap, ApHandle(0), 0x8000_0000, 0xd503201f, &mut dscr).unwrap();
        assert_eq!(dap.writes.len(), 1);
        assert_eq!(dap.writes[0], (0x8000_0000 + 0x084, 0xd503201f));
        assert!(dscr.unwrap().ite());
    }

    #[test]
    fn polls_when_no_cached_dscr_is_known() {
        let mut dap = FakeDap {
            reads: VecDeque::from([0, 1 << 24, 1 << 24]),
            writes: Vec::new(),
        };
        let mut dscr = None;
        exec_opcode(&mut dap, ApHandle(0), 0x8000_0000, 0xd503201f, &mut dscr).unwrap();
        assert!(dscr.unwrap().ite());
    }

    #[test]
    fn times_out_when_instr_never_completes() {
        struct NeverCompletes;
        impl DapAccess for NeverCompletes {
            fn mem_ap_read_atomic_u32(&mut self, _ap: ApHandle, _address: u64) -> Result<u32> {
                Ok(0)
            }
            fn mem_ap_write_atomic_u32(
                &mut self,
                _ap: ApHandle,
                _address: u64,
                _value: u32,
            ) -> Result<()> {
                Ok(())
            }
            fn mem_ap_read_buf(&mut self, _ap: ApHandle, _address: u64, _data: &mut [u32]) -> Result<()> {
                unimplemented!()
            }
            fn mem_ap_write_buf(&mut self, _ap: ApHandle, _address: u64, _data: &[u32]) -> Result<()> {
                unimplemented!()
            }
            fn mem_ap_read_buf_noincr(
                &mut self,
                _ap: ApHandle,
                _address: u64,
                _data: &mut [u32],
            ) -> Result<()> {
                unimplemented!()
            }
            fn mem_ap_write_buf_noincr(
                &mut self,
                _ap: ApHandle,
                _address: u64,
                _data: &[u32],
            ) -> Result<()> {
                unimplemented!()
            }
        }

        let mut dap = NeverCompletes;
        let mut dscr = None;
        let result = exec_opcode(&mut dap, ApHandle(0), 0x8000_0000, 0xd503201f, &mut dscr);
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
