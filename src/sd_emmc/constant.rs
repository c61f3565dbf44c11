#![allow(unused)]

use bitflags::bitflags;

// SD_EMMC register offsets
pub const SD_EMMC_CLOCK: u32 = 0x00;                 // Clock divider, source, phases
pub const SD_EMMC_DELAY: u32 = 0x04;                 // Per data line delay taps
pub const SD_EMMC_ADJUST: u32 = 0x08;                // Sampling adjust and calibration control
pub const SD_EMMC_CALOUT: u32 = 0x10;                // Calibration output, 4 words
pub const SD_EMMC_START: u32 = 0x40;                 // Descriptor chain start
pub const SD_EMMC_CFG: u32 = 0x44;                   // Bus configuration
pub const SD_EMMC_STATUS: u32 = 0x48;                // Interrupt status, write 1 to clear
pub const SD_EMMC_IRQ_EN: u32 = 0x4c;                // Interrupt enable
pub const SD_EMMC_CMD_RSP: u32 = 0x5c;               // Response bits [31:0]
pub const SD_EMMC_CMD_RSP1: u32 = 0x60;              // Response bits [63:32]
pub const SD_EMMC_CMD_RSP2: u32 = 0x64;              // Response bits [95:64]
pub const SD_EMMC_CMD_RSP3: u32 = 0x68;              // Response bits [127:96]

pub const SD_EMMC_IRQ_ALL: u32 = 0x3fff;
pub const SD_EMMC_IRQ_ACK: u32 = 0x7fff;

bitflags! {
    /// Event bits of SD_EMMC_STATUS and SD_EMMC_IRQ_EN.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqStatus: u32 {
        const RXD_ERR = 0xff;
        const TXD_ERR = 1 << 8;
        const DESC_ERR = 1 << 9;
        const RESP_ERR = 1 << 10;
        const RESP_TIMEOUT = 1 << 11;
        const DESC_TIMEOUT = 1 << 12;
        const END_OF_CHAIN = 1 << 13;
        const DESC_IRQ = 1 << 14;
        const IRQ_SDIO = 1 << 15;
    }
}

bitflags! {
    /// Sticky per-host retry bookkeeping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlag: u32 {
        const RETRY_ARMED = 1 << 0;
        const LAST_RETRY_FAILED = 1 << 30;
    }
}

// Descriptor timeouts, log2 of card clock cycles
pub const DESC_TIMEOUT_DATA: u32 = 0xc;
pub const DESC_TIMEOUT_CMD: u32 = 0xa;
pub const DESC_TIMEOUT_STATUS: u32 = 0xb;
pub const DESC_TIMEOUT_ERASE: u32 = 0xf;

pub const SD_EMMC_MAX_DESC_NUM: usize = 512 / 4;
pub const SD_EMMC_MAX_DESC_LEN: u32 = 0x1ff;
pub const SD_EMMC_BOUNCE_REQ_SIZE: usize = 512 * 1024;
pub const SD_EMMC_DMA_ALIGN: u64 = 0x7;

pub const CLK_SRC_PLL_RATE: u32 = 1_000_000_000;
pub const CLK_SRC_XTAL_RATE: u32 = 24_000_000;
pub const CLK_SRC_XTAL: u32 = 0;
pub const CLK_SRC_PLL: u32 = 1;
pub const CLK_DIV_INIT: u32 = 60;                   // 400KHz from 24MHz
pub const CLK_CORE_PHASE_180: u32 = 2;

pub const CFG_BL_LEN_512: u32 = 9;
pub const CFG_RESP_TIMEOUT_256: u32 = 8;
pub const CFG_RC_CC_1024: u32 = 4;

// Retry and tuning limits
pub const AML_ERROR_RETRY_COUNTER: u32 = 10;
pub const MAX_TUNING_RETRY: u32 = 4; // last escalation count allowed to bump again
pub const TUNING_NUM_PER_POINT: u32 = 40;
pub const TUNING_MAX_DIV: u32 = 10;
pub const STAT_POLL_TIMEOUT: u32 = 100_000;
pub const XFER_POLL_TIMEOUT: u32 = 1_000_000;

// Rx phase/delay sweep: phase 0 uses 10 delays, phase 2 uses 15
pub const RX_PHASE0_STEPS: u32 = 10;
pub const RX_PHASE2_STEPS: u32 = 15;
pub const RX_POINTS: u32 = RX_PHASE0_STEPS + RX_PHASE2_STEPS;

// Calibration
pub const CALI_PATTERN_OFFSET: u32 = (1024 * 1024 * 39) / 512;
pub const CALI_BLK_CNT: u32 = 80;
pub const MAX_CALI_RETRY: u32 = 3;
pub const MAX_DELAY_CNT: u32 = 16;
pub const CALI_READS_PER_TAP: usize = 8;
pub const CALI_AUTO_DIV: u32 = 5;
pub const CALI_SPREAD_LIMIT: i64 = 2000;
pub const CALI_INVALID: u8 = 0xff;
pub const CALOUT_WORDS: u32 = 4;
pub const CALI_DATA_LINES: usize = 8;

pub const DEFAULT_DELAY_GXBB: u32 = 0x8585_4055;
pub const DEFAULT_DELAY: u32 = 0x1010_1331;
pub const DELAY_STEP_GXBB: i64 = 125;
pub const DELAY_STEP: i64 = 200;

/// Human readable SD_EMMC_STATUS bus_fsm state.
pub const fn bus_fsm_name(fsm: u32) -> &'static str {
    match fsm {
        0 => "idle",
        1 => "send cmd",
        2 => "wait for cmd done",
        3 => "resp start",
        4 => "wait for resp done",
        5 => "data start",
        6 => "wait for data done",
        7 => "wait for desc write back",
        8 => "wait for irq service",
        _ => "unknown",
    }
}
