//! The external collaborator interfaces this crate is built on top of
//! (`spec.md` §6, "Consumed from DAP layer").
//!
//! Everything in this module is a *trait* the host's DAP transport (probe
//! discovery, JTAG/SWD framing, AP selection, memory-AP primitives) must
//! implement. This crate never talks to a probe directly — that glue is out
//! of scope per `spec.md` §1.

use crate::error::Result;

/// The two kinds of Access Port this driver cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApKind {
    /// Debug-APB-AP: a memory window onto the external debug register
    /// block, reached only by making the halted core execute load/store
    /// instructions (there is no bus mastering on this path).
    Apb,
    /// AHB-AP (or AXI-AP): a memory window with direct bus-mastering
    /// access to system memory, bypassing the core entirely.
    Ahb,
}

/// An opaque handle to a selected Access Port, as produced by
/// [`ApLookup::dap_find_ap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApHandle(pub u8);

/// A CoreSight component discoverable through a ROM table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoresightComponent {
    /// The Cross-Trigger Interface associated with a core.
    Cti,
}

/// Word-granular, atomic read/write of memory-mapped debug registers
/// through a selected Access Port.
///
/// Implementors only need to get bytes on and off the wire correctly; bank
/// switching, AP selection, and retrying transient `WAIT` responses are
/// their responsibility, not this crate's.
pub trait DapAccess {
    /// `mem_ap_sel_read_atomic_u32`: a single atomic 32-bit read.
    fn mem_ap_read_atomic_u32(&mut self, ap: ApHandle, address: u64) -> Result<u32>;

    /// `mem_ap_sel_write_atomic_u32`: a single atomic 32-bit write.
    fn mem_ap_write_atomic_u32(&mut self, ap: ApHandle, address: u64, value: u32) -> Result<()>;

    /// `mem_ap_sel_read_u32`: a single, non-atomic 32-bit read. Implementors
    /// may alias this to the atomic form; the distinction only matters to
    /// probes that can batch non-atomic transactions.
    fn mem_ap_read_u32(&mut self, ap: ApHandle, address: u64) -> Result<u32> {
        self.mem_ap_read_atomic_u32(ap, address)
    }

    /// `mem_ap_sel_write_u32`.
    fn mem_ap_write_u32(&mut self, ap: ApHandle, address: u64, value: u32) -> Result<()> {
        self.mem_ap_write_atomic_u32(ap, address, value)
    }

    /// `mem_ap_sel_read_buf`: bulk read, incrementing the address each word.
    fn mem_ap_read_buf(&mut self, ap: ApHandle, address: u64, data: &mut [u32]) -> Result<()>;

    /// `mem_ap_sel_write_buf`: bulk write, incrementing the address each word.
    fn mem_ap_write_buf(&mut self, ap: ApHandle, address: u64, data: &[u32]) -> Result<()>;

    /// `mem_ap_sel_read_buf_noincr`: bulk read from a single fixed address
    /// (used to drain a FIFO-like register such as `DTRTX`).
    fn mem_ap_read_buf_noincr(
        &mut self,
        ap: ApHandle,
        address: u64,
        data: &mut [u32],
    ) -> Result<()>;

    /// `mem_ap_sel_write_buf_noincr`: bulk write to a single fixed address
    /// (streaming words into `DTRRX` while `DSCR.MA` is set).
    fn mem_ap_write_buf_noincr(&mut self, ap: ApHandle, address: u64, data: &[u32]) -> Result<()>;
}

/// AP/component discovery, performed once at examine time.
pub trait ApLookup {
    /// `dap_find_ap`: locate the first AP of the given kind, if any.
    fn dap_find_ap(&mut self, kind: ApKind) -> Result<Option<ApHandle>>;

    /// `dap_get_debugbase`: the MMIO base address the AP's memory window
    /// starts at (the external debug register block origin).
    fn dap_get_debugbase(&mut self, ap: ApHandle) -> Result<u64>;

    /// `dap_lookup_cs_component`: walk the ROM table reachable from `ap` to
    /// find `component`'s base address.
    fn dap_lookup_cs_component(
        &mut self,
        ap: ApHandle,
        component: CoresightComponent,
    ) -> Result<u64>;

    /// `ahbap_debugport_init`: one-time bring-up of a memory AP (CSW
    /// defaults, etc.) before it is used for bulk memory transfers.
    fn ahbap_debugport_init(&mut self, ap: ApHandle) -> Result<()>;
}
