//! Controller bring-up and bus setup: clock divider, bus width, timing mode
//! and power.

use log::{debug, error, info};

use super::constant::*;
use super::dma::DmaOps;
use super::regs::{AdjustReg, ClockReg, ConfigReg, RegisterIo};
use super::tuning::TuningMode;
use super::SdEmmcHost;
use crate::constant::*;
use crate::err::SdError;

fn source_rate(src: u32) -> u32 {
    match src {
        CLK_SRC_XTAL => CLK_SRC_XTAL_RATE,
        _ => CLK_SRC_PLL_RATE,
    }
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Put the controller in identification mode: 400KHz from the crystal,
    /// 1-bit bus, 512 byte blocks, all interrupts enabled.
    pub fn init(&self) {
        let mut clk = ClockReg(0);
        clk.set_div(CLK_DIV_INIT)
            .set_src(CLK_SRC_XTAL)
            .set_core_phase(CLK_CORE_PHASE_180)
            .set_always_on(1);
        self.write_reg(SD_EMMC_CLOCK, clk.0);

        let mut cfg = ConfigReg(0);
        cfg.set_bus_width(0)
            .set_bl_len(CFG_BL_LEN_512)
            .set_resp_timeout(CFG_RESP_TIMEOUT_256)
            .set_rc_cc(CFG_RC_CC_1024)
            .set_auto_clk(1);
        self.write_reg(SD_EMMC_CFG, cfg.0);

        self.write_reg(SD_EMMC_STATUS, 0xffff);
        self.write_reg(SD_EMMC_IRQ_EN, SD_EMMC_IRQ_ALL);

        let mut t = self.timing.lock();
        t.bus_width = MMC_BUS_WIDTH_1;
        t.timing = MMC_TIMING_LEGACY;
        t.ddr = false;
        t.actual_clock = CLK_SRC_XTAL_RATE / CLK_DIV_INIT;
        info!("SD_EMMC init, clock {:#010x} cfg {:#010x}", clk.0, cfg.0);
    }

    /// Program divider and source with the card clock gated around the
    /// change.
    pub fn set_clock(&self, div: u32, src: u32) -> Result<(), SdError> {
        if div == 0 || div > 0x3f || src > CLK_SRC_PLL {
            error!("bad clock setting div {} src {}", div, src);
            return Err(SdError::InvalidArgument);
        }

        let mut clk = ClockReg(self.read_reg(SD_EMMC_CLOCK));
        if clk.div() == div && clk.src() == src {
            return Ok(());
        }

        let mut cfg = ConfigReg(self.read_reg(SD_EMMC_CFG));
        cfg.set_stop_clk(1);
        self.write_reg(SD_EMMC_CFG, cfg.0);

        clk.set_div(div).set_src(src);
        self.write_reg(SD_EMMC_CLOCK, clk.0);

        cfg.set_stop_clk(0);
        self.write_reg(SD_EMMC_CFG, cfg.0);

        let rate = source_rate(src) / div;
        self.timing.lock().actual_clock = rate;
        debug!("clock div {} src {}, {} Hz", div, src, rate);
        Ok(())
    }

    /// Divider change used while tuning, source unchanged.
    pub(crate) fn set_clock_div(&self, div: u32) {
        let mut clk = ClockReg(self.read_reg(SD_EMMC_CLOCK));
        clk.set_div(div);
        self.write_reg(SD_EMMC_CLOCK, clk.0);
        self.timing.lock().actual_clock = source_rate(clk.src()) / div.max(1);
    }

    pub fn set_bus_width(&self, width: u8) -> Result<(), SdError> {
        let encoded = match width {
            MMC_BUS_WIDTH_1 => 0,
            MMC_BUS_WIDTH_4 => 1,
            MMC_BUS_WIDTH_8 => 2,
            _ => {
                error!("unsupported bus width {}", width);
                return Err(SdError::InvalidArgument);
            }
        };

        let mut t = self.timing.lock();
        if t.bus_width != width {
            let mut cfg = ConfigReg(self.read_reg(SD_EMMC_CFG));
            cfg.set_bus_width(encoded);
            self.write_reg(SD_EMMC_CFG, cfg.0);
            t.bus_width = width;
            debug!("bus width {}", width);
        }
        Ok(())
    }

    /// Select SDR or DDR sampling for `timing`. DDR modes halve the divider.
    pub fn set_timing_mode(&self, timing: u32) {
        let mut cfg = ConfigReg(self.read_reg(SD_EMMC_CFG));
        let ddr = matches!(
            timing,
            MMC_TIMING_MMC_HS400 | MMC_TIMING_MMC_DDR52 | MMC_TIMING_UHS_DDR50
        );
        let mut t = self.timing.lock();

        if ddr {
            if timing == MMC_TIMING_MMC_HS400 {
                cfg.set_chk_ds(1);
                if self.config.chip.has_auto_calibration() {
                    let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
                    adj.set_ds_enable(1);
                    self.write_reg(SD_EMMC_ADJUST, adj.0);
                    t.tuning_mode = TuningMode::Auto;
                }
            }
            let mut clk = ClockReg(self.read_reg(SD_EMMC_CLOCK));
            let mut div = clk.div();
            if div & 1 == 1 {
                div += 1;
            }
            clk.set_div(div / 2);
            self.write_reg(SD_EMMC_CLOCK, clk.0);
            t.actual_clock = source_rate(clk.src()) / div.max(1);
            info!("DDR mode, clock div {}", div / 2);
        }

        cfg.set_ddr(ddr as u32);
        self.write_reg(SD_EMMC_CFG, cfg.0);
        t.timing = timing;
        t.ddr = ddr;
        debug!("timing {} is {}", timing, if ddr { "DDR" } else { "SDR" });
    }

    /// Drop line delays and sampling adjustment.
    pub fn power_off(&self) {
        self.write_reg(SD_EMMC_DELAY, 0);
        self.write_reg(SD_EMMC_ADJUST, 0);
    }
}
