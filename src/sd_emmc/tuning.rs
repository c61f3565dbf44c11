//! Sampling point tuning.
//!
//! A sweep issues a burst of tuning block reads at every point of a
//! parameter space and records whether every read matched the pattern.
//! The longest passing run, with a run touching both ends merged across
//! the wrap, becomes the operating window and its midpoint the operating
//! point.

use alloc::vec::Vec;

use cfg_if::cfg_if;
use log::{debug, error, info, warn};

use super::cmd::{MmcCommand, MmcData, MmcRequest};
use super::constant::*;
use super::dma::DmaOps;
use super::regs::{AdjustReg, ClockReg, RegisterIo};
use super::{CardType, ChipFamily, SdEmmcHost};
use crate::constant::*;
use crate::err::SdError;

/// How the retry path corrects the sampling point after a bus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TuningMode {
    #[default]
    None,
    /// Single adjust delay swept over the clock divider.
    Adjust,
    /// Controller tracks the sampling point itself.
    Auto,
    /// Legacy rx phase and rx delay pair.
    RxPhaseDelay,
}

/// Which tuning variant `tune` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningHint {
    /// Pick from chip family, divider and card type.
    Chip,
    Adjust,
    RxPhaseDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TuningWindow {
    pub start: u32,
    pub len: u32,
}

impl TuningWindow {
    /// Middle of the window over a space of `n` points, rounded toward the
    /// start, wrapped into the space.
    pub fn midpoint(&self, n: u32) -> u32 {
        (self.start + self.len.saturating_sub(1) / 2) % n.max(1)
    }
}

/// Longest run of passing points, treating the space as circular.
///
/// A run that reaches the last point is joined with the run starting at
/// point 0. Ties keep the earlier run; the joined run wins only when
/// strictly longer.
pub fn find_window(pass: &[bool]) -> TuningWindow {
    let mut best: Option<TuningWindow> = None;
    let mut curr: Option<TuningWindow> = None;
    let mut in_wrap = false;
    let mut wrap_len = 0;

    for (i, &ok) in pass.iter().enumerate() {
        let i = i as u32;
        if ok {
            if i == 0 {
                in_wrap = true;
            }
            if in_wrap {
                wrap_len += 1;
            }
            curr = Some(match curr {
                Some(w) => TuningWindow { len: w.len + 1, ..w },
                None => TuningWindow { start: i, len: 1 },
            });
        } else {
            if let Some(w) = curr.take() {
                if best.is_none_or(|b| w.len > b.len) {
                    best = Some(w);
                }
            }
            in_wrap = false;
        }
    }

    if let Some(w) = curr {
        best = match best {
            None => Some(w),
            Some(b) if wrap_len > 0 => {
                if w.len + wrap_len > b.len {
                    Some(TuningWindow {
                        start: w.start,
                        len: w.len + wrap_len,
                    })
                } else {
                    Some(b)
                }
            }
            Some(b) if w.len > b.len => Some(w),
            keep => keep,
        };
    }

    best.unwrap_or_default()
}

/// Result of the adjust delay sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdjWindow {
    pub start: u32,
    pub size: u32,
    pub point: u32,
    pub clk_div: u32,
}

/// Result of the rx phase/delay sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxWindow {
    pub start: u32,
    pub size: u32,
    pub point: u32,
}

/// Flattened rx sweep index to `(rx_phase, rx_delay)`.
pub fn rx_point(index: u32) -> (u32, u32) {
    let index = index % RX_POINTS;
    if index < RX_PHASE0_STEPS {
        (0, index)
    } else {
        (2, index - RX_PHASE0_STEPS)
    }
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Find a sampling point for the current bus mode. `opcode` is the
    /// tuning command the card answers (CMD19 or CMD21).
    pub fn tune(&self, opcode: u8, hint: TuningHint) -> Result<TuningMode, SdError> {
        let (bus_width, timing, ddr) = {
            let t = self.timing.lock();
            (t.bus_width, t.timing, t.ddr)
        };

        let pattern: &[u8] = match (opcode, bus_width) {
            (MMC_SEND_TUNING_BLOCK_HS200, MMC_BUS_WIDTH_8) => &TUNING_BLK_PATTERN_8BIT,
            (MMC_SEND_TUNING_BLOCK_HS200, MMC_BUS_WIDTH_4) => &TUNING_BLK_PATTERN_4BIT,
            (MMC_SEND_TUNING_BLOCK, _) => &TUNING_BLK_PATTERN_4BIT,
            _ => {
                error!("CMD{} cannot tune a {}-bit bus", opcode, bus_width);
                return Err(SdError::InvalidArgument);
            }
        };

        let clk_div = ClockReg(self.read_reg(SD_EMMC_CLOCK)).div();
        #[allow(unused_mut)]
        let mut adj_win_start = None;

        cfg_if! {
            if #[cfg(feature = "calibration")] {
                if self.config.card_type == CardType::Mmc
                    && timing != MMC_TIMING_MMC_HS400
                    && clk_div <= TUNING_MAX_DIV
                {
                    let auto = self.config.chip.has_auto_calibration();
                    if auto || clk_div <= 7 {
                        match self.execute_calibration(auto) {
                            Ok(start) => adj_win_start = Some(start),
                            Err(e) => {
                                warn!("calibration: {}, using default delays", e);
                                self.write_reg(SD_EMMC_DELAY, self.config.default_delay());
                            }
                        }
                    }
                }
            } else {
                let _ = timing;
            }
        }

        let mode = self.pick_tuning(hint, clk_div);
        info!("tuning CMD{} div {} as {:?}", opcode, clk_div, mode);

        self.set_tuning(true);
        let res = match mode {
            TuningMode::Adjust => self
                .tune_adjust(opcode, pattern, ddr, adj_win_start)
                .map(|w| self.timing.lock().adj = w),
            TuningMode::RxPhaseDelay => self
                .tune_rxclk(opcode, pattern, ddr)
                .map(|w| self.timing.lock().rx = w),
            TuningMode::Auto => {
                let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
                adj.set_cali_enable(1).set_adj_auto(1);
                self.write_reg(SD_EMMC_ADJUST, adj.0);
                Ok(())
            }
            TuningMode::None => Ok(()),
        };
        self.set_tuning(false);

        let mut t = self.timing.lock();
        match res {
            Ok(()) => {
                t.tuning_mode = mode;
                Ok(mode)
            }
            Err(e) => {
                t.tuning_mode = TuningMode::None;
                Err(e)
            }
        }
    }

    fn pick_tuning(&self, hint: TuningHint, clk_div: u32) -> TuningMode {
        match hint {
            TuningHint::Adjust => TuningMode::Adjust,
            TuningHint::RxPhaseDelay => TuningMode::RxPhaseDelay,
            TuningHint::Chip => {
                let chip = self.config.chip;
                if clk_div > 5 || chip == ChipFamily::Gxbb {
                    TuningMode::Adjust
                } else if chip.has_auto_calibration() {
                    if self.config.card_type == CardType::Sdio {
                        TuningMode::Adjust
                    } else {
                        TuningMode::Auto
                    }
                } else {
                    TuningMode::RxPhaseDelay
                }
            }
        }
    }

    pub(crate) fn set_tuning(&self, on: bool) {
        self.xfer.lock().is_tuning = on;
    }

    /// Number of consecutive matching tuning reads, up to the per-point burst.
    fn tuning_transfer(&self, opcode: u8, pattern: &[u8], ddr: bool) -> u32 {
        let mut nmatch = 0;
        for _ in 0..TUNING_NUM_PER_POINT {
            let req = if ddr {
                MmcRequest::new(MmcCommand::new(MMC_READ_SINGLE_BLOCK, 0, MMC_RSP_R1))
                    .with_data(MmcData::read(512, 1))
            } else {
                MmcRequest::new(MmcCommand::new(opcode, 0, MMC_RSP_R1))
                    .with_data(MmcData::read(pattern.len() as u32, 1))
            };
            let matched = match self.wait_for_req(req) {
                Ok(done) if done.result.is_ok() => {
                    ddr || done
                        .request
                        .data
                        .as_ref()
                        .is_some_and(|d| d.buf.as_slice() == pattern)
                }
                _ => false,
            };
            if !matched {
                break;
            }
            nmatch += 1;
        }
        nmatch
    }

    /// Whether another sweep at a slower clock is allowed; bumps the divider.
    /// The count is checked before it is bumped, so up to
    /// `MAX_TUNING_RETRY + 1` escalations happen before giving up.
    fn escalate(&self, clk_div: u32, tuning_num: &mut u32) -> Result<(), SdError> {
        if *tuning_num > MAX_TUNING_RETRY || clk_div >= TUNING_MAX_DIV {
            error!("no tuning window, div {} after {} retries", clk_div, tuning_num);
            return Err(SdError::TuningFailed);
        }
        *tuning_num += 1;
        warn!("no tuning window at div {}, retry at div {}", clk_div, clk_div + 1);
        self.set_clock_div(clk_div + 1);
        Ok(())
    }

    fn tune_adjust(
        &self,
        opcode: u8,
        pattern: &[u8],
        ddr: bool,
        adj_win_start: Option<u32>,
    ) -> Result<AdjWindow, SdError> {
        // start from a clean sampling setup
        self.write_reg(SD_EMMC_ADJUST, 0);
        let mut tuning_num = 0;
        loop {
            let clk_div = ClockReg(self.read_reg(SD_EMMC_CLOCK)).div();
            if clk_div == 0 {
                return Err(SdError::InvalidArgument);
            }

            let results: Vec<bool> = (0..clk_div)
                .map(|adj| {
                    self.set_adj_delay(adj);
                    let nmatch = self.tuning_transfer(opcode, pattern, ddr);
                    debug!("adj {} matched {}", adj, nmatch);
                    nmatch == TUNING_NUM_PER_POINT
                })
                .collect();

            let win = find_window(&results);
            if win.len == 0 {
                self.escalate(clk_div, &mut tuning_num)?;
                continue;
            }

            let mut point = if win.len == clk_div {
                0
            } else {
                win.midpoint(clk_div)
            };
            if let (Some(start), ChipFamily::Gxbb, CardType::Mmc) =
                (adj_win_start, self.config.chip, self.config.card_type)
            {
                if clk_div <= 5 {
                    info!("adj_win_start {}", start);
                    point = start % clk_div;
                }
            }

            self.set_adj_delay(point);
            info!(
                "adj window start {} size {} div {}, point {}",
                win.start, win.len, clk_div, point
            );
            return Ok(AdjWindow {
                start: win.start,
                size: win.len,
                point,
                clk_div,
            });
        }
    }

    fn tune_rxclk(&self, opcode: u8, pattern: &[u8], ddr: bool) -> Result<RxWindow, SdError> {
        let mut tuning_num = 0;
        loop {
            let clk_div = ClockReg(self.read_reg(SD_EMMC_CLOCK)).div();
            let results: Vec<bool> = (0..RX_POINTS)
                .map(|i| {
                    let (phase, delay) = rx_point(i);
                    self.set_rx_point(phase, delay);
                    self.tuning_transfer(opcode, pattern, ddr) == TUNING_NUM_PER_POINT
                })
                .collect();

            let win = find_window(&results);
            if win.len == 0 {
                self.escalate(clk_div, &mut tuning_num)?;
                continue;
            }

            let point = win.midpoint(RX_POINTS);
            let (phase, delay) = rx_point(point);
            self.set_rx_point(phase, delay);
            info!(
                "rx window start {} size {}, phase {} delay {}",
                win.start, win.len, phase, delay
            );
            return Ok(RxWindow {
                start: win.start,
                size: win.len,
                point,
            });
        }
    }

    pub(crate) fn set_adj_delay(&self, point: u32) {
        let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
        adj.set_adj_delay(point)
            .set_adj_enable(1)
            .set_cali_enable(0)
            .set_cali_rise(0);
        self.write_reg(SD_EMMC_ADJUST, adj.0);
    }

    pub(crate) fn set_rx_point(&self, phase: u32, delay: u32) {
        let mut clk = ClockReg(self.read_reg(SD_EMMC_CLOCK));
        clk.set_rx_phase(phase).set_rx_delay(delay);
        self.write_reg(SD_EMMC_CLOCK, clk.0);
    }
}
