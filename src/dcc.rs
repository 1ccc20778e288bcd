//! The DCC Channel (`spec.md` §4.3): 32- and 64-bit transfer helpers layered
//! on `DTRRX`/`DTRTX` and the Opcode Pump.
//!
//! Grounded in the teacher's `write_core_reg`/`read_core_reg` plumbing in
//! `armv8a.rs`, which moves data through the same pair of registers one
//! word at a time.

use std::time::Duration;

use crate::dap::{ApHandle, DapAccess};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::regs::{Dscr, Dtrrx, Dtrtx, MemoryMappedRegister};

const DCC_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Write a 32-bit value to `DTRRX` for the core to consume.
pub fn write_dcc_32(dap: &mut impl DapAccess, ap: ApHandle, debug_base: u64, data: u32) -> Result<()> {
    dap.mem_ap_write_atomic_u32(ap, Dtrrx::mmio_address(debug_base), data)
}

/// Write a 64-bit value across `DTRRX` (low word) and `DTRTX` (high word).
/// The register mapping and write order are fixed by the architecture.
pub fn write_dcc_64(
    dap: &mut impl DapAccess,
    ap: ApHandle,
    debug_base: u64,
    data: u64,
) -> Result<()> {
    dap.mem_ap_write_atomic_u32(ap, Dtrrx::mmio_address(debug_base), data as u32)?;
    dap.mem_ap_write_atomic_u32(ap, Dtrtx::mmio_address(debug_base), (data >> 32) as u32)
}

/// Poll `DSCR.DTR_TX_FULL` with a 1s bound, then read `DTRTX`.
pub fn read_dcc_32(
    dap: &mut impl DapAccess,
    ap: ApHandle,
    debug_base: u64,
    dscr: &mut Option<Dscr>,
) -> Result<u32> {
    let deadline = Deadline::after(DCC_POLL_TIMEOUT);
    loop {
        let raw = dap.mem_ap_read_atomic_u32(ap, Dscr::mmio_address(debug_base))?;
        let d = Dscr::from(raw);
        *dscr = Some(d);
        if d.txfull() {
            break;
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
    }
    dap.mem_ap_read_atomic_u32(ap, Dtrtx::mmio_address(debug_base))
}

/// Poll `DSCR.DTR_TX_FULL`, then read `DTRTX` into the low word and
/// `DTRRX` into the high word (`spec.md` §4.3; note this is not a byte
/// alias of the 32-bit read — §9 Open Question 3 calls out that aliasing
/// bug in the original driver and this implementation avoids it).
pub fn read_dcc_64(
    dap: &mut impl DapAccess,
    ap: ApHandle,
    debug_base: u64,
    dscr: &mut Option<Dscr>,
) -> Result<u64> {
    let low = read_dcc_32(dap, ap, debug_base, dscr)?;
    let high = dap.mem_ap_read_atomic_u32(ap, Dtrrx::mmio_address(debug_base))?;
    Ok((low as u64) | ((high as u64) << 32))
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
            Ok(self.reads.pop_front().unwrap_or(0))
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
    fn write_dcc_64_hits_dtrrx_then_dtrtx() {
        let mut dap = FakeDap {
            reads: VecDeque::new(),
            writes: Vec::new(),
        };
        write_dcc_64(&mut dap, ApHandle(0), 0x8000_0000, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(dap.writes[0], (0x8000_0000 + 0x080, 0x5566_7788));
        assert_eq!(dap.writes[1], (0x8000_0000 + 0x08C, 0x1122_3344));
    }

    #[test]
    fn read_dcc_64_combines_tx_as_low_and_rx_as_high() {
        let mut dap = FakeDap {
            reads: VecDeque::from([1 << 29, 0x0000_beef, 0xdead_0000]),
            writes: Vec::new(),
        };
        let mut dscr = None;
        let value = read_dcc_64(&mut dap, ApHandle(0), 0x8000_0000, &mut dscr).unwrap();
        assert_eq!(value, 0xdead_0000_0000_beef);
    }
}
