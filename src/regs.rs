//! The Debug Register Map (`spec.md` §4.1): a flat, bit-exact catalogue of
//! offsets and bitfields for the external debug block and the CTI block.
//! No logic lives here beyond field accessors and the halt-reason decode
//! that is purely a lookup table over `DSCR.HALT_MASK`.

use crate::core_status::{BreakpointCause, HaltReason};
use std::fmt;

/// A register whose address is offset from a base MMIO origin, the way
/// every register in this module is (the external debug block and the CTI
/// block each have their own `base_address`).
pub trait MemoryMappedRegister<T>: Clone + From<T> + Into<T> + Sized + fmt::Debug {
    /// Offset from the owning block's base address.
    const ADDRESS_OFFSET: u64;
    /// Register name, for diagnostics.
    const NAME: &'static str;

    /// Resolve this register's MMIO address given the block's base.
    fn mmio_address(base_address: u64) -> u64 {
        base_address + Self::ADDRESS_OFFSET
    }
}

macro_rules! debug_register {
    ($(#[$outer:meta])* pub struct $name:ident($t:ty); $addr:expr, $regname:expr; $($rest:tt)*) => {
        bitfield::bitfield! {
            $(#[$outer])*
            #[derive(Copy, Clone)]
            #[allow(clippy::upper_case_acronyms)]
            pub struct $name($t);
            impl Debug;
            $($rest)*
        }

        impl From<$name> for $t {
            fn from(r: $name) -> Self {
                r.0
            }
        }

        impl From<$t> for $name {
            fn from(v: $t) -> Self {
                Self(v)
            }
        }

        impl MemoryMappedRegister<$t> for $name {
            const ADDRESS_OFFSET: u64 = $addr;
            const NAME: &'static str = $regname;
        }
    };
}

// ---------------------------------------------------------------------
// External debug block
// ---------------------------------------------------------------------

debug_register! {
    /// DSCR - Debug Status and Control Register.
    pub struct Dscr(u32);
    0x088, "DSCR";

    /// DTRRX full (`DSCR.DTR_RX_FULL`).
    pub rxfull, set_rxfull: 30;
    /// DTRTX full (`DSCR.DTR_TX_FULL`).
    pub txfull, set_txfull: 29;
    /// Pipeline Advance.
    pub pipeadv, _: 25;
    /// ITR empty / Instruction Complete (`DSCR.ITE`, a.k.a. InstrCompl).
    pub ite, set_ite: 24;
    /// Memory access mode (`DSCR.MA`).
    pub ma, set_ma: 20;
    /// Halting debug enable (`DSCR.HDE`).
    pub hde, set_hde: 14;
    /// Execution state (AArch64 vs AArch32) per exception level.
    pub rw, _: 13, 10;
    /// Current exception level.
    pub el, _: 9, 8;
    /// SError interrupt pending (`DSCR.SYS_ERROR_PEND`).
    pub sys_error_pend, _: 7;
    /// Cumulative error flag (`DSCR.ERR`).
    pub err, _: 6;
    /// Debug status flags (`DSCR.HALT_MASK` when read as a group).
    pub status, set_status: 5, 0;
}

impl Dscr {
    /// Is the core currently executing in AArch64 state? Only meaningful
    /// while halted.
    pub fn currently_64_bit(&self) -> bool {
        self.rw() & (1 << self.el()) > 0
    }

    /// Decode `DSCR.HALT_MASK` into "is the core halted".
    pub fn halted(&self) -> bool {
        matches!(
            self.status(),
            0b000111 | 0b010011 | 0b011011 | 0b011111 | 0b100011 | 0b100111 | 0b101011
                | 0b101111 | 0b110011 | 0b110111 | 0b111011
        )
    }

    /// Decode `DSCR.HALT_MASK` into a [`HaltReason`].
    pub fn halt_reason(&self) -> HaltReason {
        match self.status() {
            0b000111 => HaltReason::Breakpoint(BreakpointCause::Unknown),
            0b010011 => HaltReason::Request,
            0b011011 | 0b011111 | 0b111011 => HaltReason::Step,
            0b100011 | 0b100111 | 0b110011 | 0b110111 => HaltReason::Exception,
            0b101011 => HaltReason::Watchpoint,
            0b101111 => HaltReason::Breakpoint(BreakpointCause::Software),
            _ => HaltReason::Unknown,
        }
    }
}

debug_register! {
    /// ITR - Instruction Transfer Register.
    pub struct Itr(u32);
    0x084, "ITR";
    pub value, set_value: 31, 0;
}

debug_register! {
    /// DTRRX - host to core Data Transfer Register.
    pub struct Dtrrx(u32);
    0x080, "DTRRX";
    pub value, set_value: 31, 0;
}

debug_register! {
    /// DTRTX - core to host Data Transfer Register.
    pub struct Dtrtx(u32);
    0x08C, "DTRTX";
    pub value, set_value: 31, 0;
}

debug_register! {
    /// DRCR - Debug Reserve Control Register.
    pub struct Drcr(u32);
    0x090, "DRCR";
    /// Allow imprecise entry to Debug state.
    pub cbrrq, set_cbrrq: 4;
    /// Clear Sticky Pipeline Advance (`DRCR.CLEAR_SPA`).
    pub clear_spa, set_clear_spa: 3;
    /// Clear Sticky Errors (`DRCR.CSE`).
    pub cse, set_cse: 2;
    /// Clear sticky exception flags (`DRCR.CLEAR_EXCEPTIONS`).
    pub clear_exceptions, set_clear_exceptions: 1;
}

debug_register! {
    /// PRSR - Processor Status Register.
    pub struct Prsr(u32);
    0x314, "PRSR";
    /// Sticky Debug Restart.
    pub sdr, _: 11;
    /// Double Lock.
    pub dlk, _: 6;
    /// OS Lock status.
    pub oslk, _: 5;
    /// Halted status bit.
    pub halted, _: 4;
    /// Sticky core Reset status bit.
    pub sr, _: 3;
    /// PE Reset status bit.
    pub r, _: 2;
    /// Core powerup status bit.
    pub pu, _: 0;
}

debug_register! {
    /// EDECR - Execution Control Register.
    pub struct Edecr(u32);
    0x024, "EDECR";
    /// Halting step enable (`EDECR.SS_HALTING_STEP_ENABLE`).
    pub ss, set_ss: 2;
    /// Reset Catch Enable.
    pub rce, set_rce: 1;
    /// OS Unlock Catch Enable.
    pub osuce, set_osuce: 0;
}

debug_register! {
    /// EDESR - Execution Status Register. Sticky latch of the last
    /// halt/step/reset/OS-unlock catch event; read during debug entry for
    /// diagnostics and cleared the same way as the DRCR catch-enable bits.
    pub struct Edesr(u32);
    0x020, "EDESR";
    pub ss, set_ss: 2;
    pub rc, set_rc: 1;
    pub oslk, set_oslk: 0;
}

debug_register! {
    /// WFAR0 - Watchpoint Fault Address Register, low word.
    pub struct Wfar0(u32);
    0x018, "WFAR0";
    pub value, _: 31, 0;
}

debug_register! {
    /// WFAR1 - Watchpoint Fault Address Register, high word.
    pub struct Wfar1(u32);
    0x01C, "WFAR1";
    pub value, _: 31, 0;
}

debug_register! {
    /// LOCKACCESS - Software Lock Access Register. Writing the magic
    /// unlock value `0xC5ACCE55` opens the block for access; any other
    /// value re-locks it.
    pub struct Lockaccess(u32);
    0xFB0, "LOCKACCESS";
    pub value, set_value: 31, 0;
}

/// Value that unlocks (or, written again, re-locks) a CoreSight component.
pub const LOCK_UNLOCK_VALUE: u32 = 0xC5AC_CE55;

debug_register! {
    /// OSLAR - OS Lock Access Register.
    pub struct Oslar(u32);
    0x300, "OSLAR";
    pub oslk, set_oslk: 0;
}

debug_register! {
    /// EDPRCR - Power/Reset Control Register.
    pub struct Edprcr(u32);
    0x310, "EDPRCR";
    /// Core-powered-up request.
    pub corepurq, set_corepurq: 3;
    /// Warm reset request.
    pub cwrr, set_cwrr: 1;
    /// Core no-powerdown request.
    pub corenpdrq, set_corenpdrq: 0;
}

debug_register! {
    /// MAINID - processor main ID (CPUID, `MIDR_EL1` shadow).
    pub struct Mainid0(u32);
    0xD00, "MAINID0";
    pub value, _: 31, 0;
}

debug_register! {
    /// MEMFEATURE - memory model feature register (`ID_AA64MMFR0_EL1`
    /// shadow, low word). `+4` reads the high word.
    pub struct Memfeature0(u32);
    0xD38, "MEMFEATURE0";
    pub value, _: 31, 0;
}

debug_register! {
    /// DBGFEATURE - debug feature register (`ID_AA64DFR0_EL1` shadow, low
    /// word). `+4` reads the high word.
    pub struct Dbgfeature0(u32);
    0xD28, "DBGFEATURE0";
    /// Number of context-aware breakpoints/watchpoints, minus 1.
    pub ctx_cmps, _: 31, 28;
    /// Number of watchpoints, minus 1.
    pub wrps, _: 23, 20;
    /// Number of breakpoints, minus 1 (`brp_num` field).
    pub brps, _: 15, 12;
}

debug_register! {
    /// DBGBVR<n> - Breakpoint Value Register. 16-byte stride per slot.
    pub struct Dbgbvr(u32);
    0x400, "DBGBVR";
    pub value, set_value: 31, 0;
}

debug_register! {
    /// DBGBCR<n> - Breakpoint Control Register. 16-byte stride per slot.
    pub struct Dbgbcr(u32);
    0x408, "DBGBCR";
    /// Linked breakpoint number (hybrid address+context matches).
    pub lbn, set_lbn: 19, 16;
    /// Hyp mode control bit.
    pub hmc, set_hmc: 13;
    /// Byte address select.
    pub bas, set_bas: 8, 5;
    /// Privileged mode control.
    pub pmc, set_pmc: 2, 1;
    /// Match mode (bits 22:20 of the full control word).
    pub matchmode, set_matchmode: 22, 20;
    /// Breakpoint enable.
    pub e, set_e: 0;
}

debug_register! {
    /// DBGWVR<n> - Watchpoint Value Register. 16-byte stride per slot.
    pub struct Dbgwvr(u32);
    0x800, "DBGWVR";
    pub value, set_value: 31, 0;
}

debug_register! {
    /// DBGWCR<n> - Watchpoint Control Register. 16-byte stride per slot.
    pub struct Dbgwcr(u32);
    0x808, "DBGWCR";
    pub lbn, set_lbn: 19, 16;
    pub hmc, set_hmc: 13;
    pub bas, set_bas: 12, 5;
    pub pmc, set_pmc: 2, 1;
    pub e, set_e: 0;
}

// ---------------------------------------------------------------------
// Cross-Trigger Interface block
// ---------------------------------------------------------------------

debug_register! {
    /// CTR - CTI global enable.
    pub struct Ctr(u32);
    0x000, "CTICONTROL";
    pub glben, set_glben: 0;
}

debug_register! {
    /// GATE - per-channel gate enable. Each bit gates one of the (up to 32)
    /// CTI channels; callers pass the whole mask, not a single channel, so
    /// this is one plain 32-bit field rather than the `bitfield` crate's
    /// per-index array form.
    pub struct Gate(u32);
    0x140, "CTIGATE";
    pub en, set_en: 31, 0;
}

debug_register! {
    /// OUTEN<n> - per-output channel enable. `n` selects which output
    /// (0 = halt request, 1 = restart request); stride is 4 bytes.
    pub struct Outen(u32);
    0x0A0, "CTIOUTEN";
    pub outen, set_outen: 31, 0;
}

debug_register! {
    /// APPPULSE - software-triggered channel pulse.
    pub struct Apppulse(u32);
    0x01C, "CTIAPPPULSE";
    pub apppulse, set_apppulse: 31, 0;
}

debug_register! {
    /// INACK - acknowledge an output trigger.
    pub struct Inack(u32);
    0x010, "CTIINACK";
    pub ack, set_ack: 31, 0;
}

debug_register! {
    /// TROUT_STATUS - live status of each output trigger line.
    pub struct TroutStatus(u32);
    0x134, "CTITROUTSTATUS";
    pub status, _: 31, 0;
}

debug_register! {
    /// UNLOCK - CTI lock access register, same magic value as
    /// [`Lockaccess`].
    pub struct CtiUnlock(u32);
    0xFB0, "CTIUNLOCK";
    pub value, set_value: 31, 0;
}

/// Breakpoint/watchpoint bank register stride: each `BVR`/`BCR` (and
/// `WVR`/`WCR`) pair for slot `n` lives `16 * n` bytes past slot 0.
pub const BRP_STRIDE: u64 = 16;
