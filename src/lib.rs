#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::sync::atomic::{Ordering, fence};

pub mod constant;
pub mod sd_emmc;
mod err;

pub use dma_api::Direction;
pub use err::SdError;
pub use sd_emmc::{
    ChipFamily, CardType, HostConfig, SdEmmcHost, TuningHint, TuningMode,
    cmd::{Completion, MmcCommand, MmcData, MmcRequest, Rejected},
    dma::{DmaOps, SgSegment},
    regs::{MmioRegs, RegisterIo},
};

/// Busy-wait for roughly `us` microseconds.
fn delay_us(us: u32) {
    for _ in 0..us * 10 {
        fence(Ordering::SeqCst);
    }
}

/// Index of the most significant set bit, 1-based. Zero for zero.
pub fn generic_fls(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// log2 of a power-of-two block size.
pub(crate) fn ilog2(x: u32) -> u32 {
    generic_fls(x).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fls_matches_bit_positions() {
        assert_eq!(generic_fls(0), 0);
        assert_eq!(generic_fls(1), 1);
        assert_eq!(generic_fls(0x200), 10);
        assert_eq!(generic_fls(0x8000_0000), 32);
        assert_eq!(ilog2(512), 9);
        assert_eq!(ilog2(64), 6);
    }
}
