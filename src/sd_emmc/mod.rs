//! Amlogic SD_EMMC host controller: descriptor-driven transfers, line delay
//! calibration and sampling point tuning.

mod clock;
mod irq;
mod retry;
mod xfer;

#[cfg(feature = "calibration")]
mod cali;

pub mod cmd;
pub mod constant;
pub mod desc;
pub mod dma;
pub mod regs;
pub mod tuning;

use core::fmt::Display;

use kspin::SpinNoIrq;
use log::info;
use spin::Mutex;

use crate::constant::*;
use constant::*;
use dma::DmaOps;
use regs::RegisterIo;
use xfer::XferState;

pub use irq::IrqReturn;
pub use tuning::{AdjWindow, RxWindow, TuningHint, TuningMode, TuningWindow};
pub use xfer::{HostStatus, XferStep};

/// Silicon generations, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChipFamily {
    M8b,
    Gxbb,
    Gxtvbb,
    Gxl,
    Gxm,
    Txl,
    Txlx,
    Axg,
    Gxlx,
    Txhd,
    G12a,
    G12b,
}

impl ChipFamily {
    /// Delay written when calibration cannot settle.
    pub fn default_delay(&self) -> u32 {
        match self {
            ChipFamily::Gxbb => DEFAULT_DELAY_GXBB,
            _ => DEFAULT_DELAY,
        }
    }

    /// Delay tap width in calibration units.
    pub(crate) fn delay_step(&self) -> i64 {
        match self {
            ChipFamily::Gxbb => DELAY_STEP_GXBB,
            _ => DELAY_STEP,
        }
    }

    /// Calibration output registers report index and count directly.
    pub fn has_auto_calibration(&self) -> bool {
        *self >= ChipFamily::Gxl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Mmc,
    Sd,
    Sdio,
}

#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub chip: ChipFamily,
    pub card_type: CardType,
    pub card_present: bool,
    /// Retry budget armed on the first transport error of a request.
    pub retries: u32,
    /// Board specific DELAY word used instead of the chip default when
    /// calibration cannot settle.
    pub default_delay: Option<u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            chip: ChipFamily::Gxl,
            card_type: CardType::Mmc,
            card_present: true,
            retries: AML_ERROR_RETRY_COUNTER,
            default_delay: None,
        }
    }
}

impl HostConfig {
    pub fn with_chip(mut self, chip: ChipFamily) -> Self {
        self.chip = chip;
        self
    }

    pub fn with_card_type(mut self, card_type: CardType) -> Self {
        self.card_type = card_type;
        self
    }

    pub fn with_card_present(mut self, present: bool) -> Self {
        self.card_present = present;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_default_delay(mut self, delay: u32) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// DELAY word for the fallback paths.
    pub fn default_delay(&self) -> u32 {
        self.default_delay.unwrap_or_else(|| self.chip.default_delay())
    }
}

/// Bus timing bookkeeping. Only touched from thread context.
#[derive(Debug, Default)]
pub(crate) struct TimingState {
    pub tuning_mode: TuningMode,
    pub adj: AdjWindow,
    pub rx: RxWindow,
    pub bus_width: u8,
    pub timing: u32,
    pub ddr: bool,
    pub actual_clock: u32,
}

pub struct SdEmmcHost<R: RegisterIo, D: DmaOps> {
    regs: R,
    config: HostConfig,
    // shared with the hard IRQ path
    xfer: SpinNoIrq<XferState<D>>,
    // lock order: xfer before timing
    timing: Mutex<TimingState>,
}

impl<R: RegisterIo, D: DmaOps> Display for SdEmmcHost<R, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let timing = self.timing.lock();
        write!(
            f,
            "SD_EMMC Controller {{ chip: {:?}, card: {:?}, clock: {}, bus_width: {}, tuning: {:?} }}",
            self.config.chip,
            self.config.card_type,
            timing.actual_clock,
            timing.bus_width,
            timing.tuning_mode
        )
    }
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    pub fn new(regs: R, dma: D, config: HostConfig) -> Self {
        let host = Self {
            regs,
            config,
            xfer: SpinNoIrq::new(XferState::new(dma)),
            timing: Mutex::new(TimingState {
                bus_width: MMC_BUS_WIDTH_1,
                timing: MMC_TIMING_LEGACY,
                ..Default::default()
            }),
        };

        info!("SD_EMMC Controller created: {}", host);

        host
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn tuning_mode(&self) -> TuningMode {
        self.timing.lock().tuning_mode
    }

    pub fn adj_window(&self) -> AdjWindow {
        self.timing.lock().adj
    }

    pub fn rx_window(&self) -> RxWindow {
        self.timing.lock().rx
    }

    pub fn actual_clock(&self) -> u32 {
        self.timing.lock().actual_clock
    }

    pub fn bus_width(&self) -> u8 {
        self.timing.lock().bus_width
    }

    /// Run `f` against the DMA provider while no request can start.
    pub fn with_dma<T>(&self, f: impl FnOnce(&mut D) -> T) -> T {
        let mut xfer = self.xfer.lock();
        f(&mut xfer.dma)
    }
}
