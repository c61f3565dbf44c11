use log::{error, info, warn};

use super::constant::*;
use super::dma::DmaOps;
use super::regs::{AdjustReg, ClockReg, RegisterIo};
use super::tuning::{rx_point, TuningMode};
use super::xfer::{HostStatus, XferState};
use super::{CardType, SdEmmcHost};
use crate::constant::*;
use crate::err::SdError;

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Error path of the deferred IRQ stage. Arms the retry budget on the
    /// first failure of a request, moves the sampling point while budget
    /// remains, and sends CMD12 when the request needs one.
    ///
    /// Returns `true` when a CMD12 is on the bus and the request must stay
    /// current until it completes.
    pub(crate) fn recover(&self, xfer: &mut XferState<D>, code: HostStatus, err: SdError) -> bool {
        let card = self.config.card_type;
        let mmc_or_sd = matches!(card, CardType::Mmc | CardType::Sd);

        let Some(inflight) = xfer.mrq.as_mut() else {
            return false;
        };
        let opcode = inflight.req.opcode();

        if xfer.error_flag.is_empty() && mmc_or_sd && !xfer.is_tuning {
            xfer.error_flag |= ErrorFlag::RETRY_ARMED;
            inflight.req.cmd.retries = self.config.retries;
        }

        let armed = xfer.error_flag.contains(ErrorFlag::RETRY_ARMED);
        let retries = inflight.req.cmd.retries;

        if armed && retries > 0 {
            match card {
                CardType::Sd => self.nudge_rx_phase(),
                CardType::Mmc => self.nudge_sampling(code),
                CardType::Sdio => {}
            }
        }

        if mmc_or_sd && armed && retries == 0 {
            xfer.error_flag |= ErrorFlag::LAST_RETRY_FAILED;
            error!("CMD{} failed after {} retries: {}", opcode, self.config.retries, err);
        }

        let wants_stop = xfer.mrq.as_ref().is_some_and(|m| m.req.stop.is_some());
        if wants_stop && mmc_or_sd && self.config.card_present && !mmc_op_tuning(opcode) {
            return match self.send_stop(xfer, err) {
                Ok(()) => true,
                Err(e) => {
                    error!("CMD12 after CMD{} not sent: {}", opcode, e);
                    xfer.cmd_is_stop = false;
                    false
                }
            };
        }
        false
    }

    /// Move the sampling point one step in the active tuning mode.
    fn nudge_sampling(&self, code: HostStatus) {
        let mut timing = self.timing.lock();
        match timing.tuning_mode {
            TuningMode::Auto => {
                if !code.is_response_error() {
                    return;
                }
                let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
                let delay = adj.cmd_delay();
                let next = if delay <= 13 {
                    delay + 2
                } else if delay % 2 == 1 {
                    0
                } else {
                    1
                };
                adj.set_cmd_delay(next);
                self.write_reg(SD_EMMC_ADJUST, adj.0);
                info!("cmd delay {} -> {}", delay, next);
            }
            TuningMode::Adjust => {
                let w = &mut timing.adj;
                if w.clk_div == 0 {
                    return;
                }
                w.point = (w.point + 1) % w.clk_div;
                let point = w.point;
                let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
                adj.set_adj_delay(point).set_adj_enable(1);
                self.write_reg(SD_EMMC_ADJUST, adj.0);
                info!("adj point -> {}", point);
            }
            TuningMode::RxPhaseDelay => {
                let w = &mut timing.rx;
                w.point = (w.point + 1) % RX_POINTS;
                let (phase, delay) = rx_point(w.point);
                drop(timing);
                self.set_rx_point(phase, delay);
                info!("rx phase {} delay {}", phase, delay);
            }
            TuningMode::None => {
                drop(timing);
                self.nudge_rx_phase();
            }
        }
    }

    fn nudge_rx_phase(&self) {
        let mut phase = 0;
        self.modify_reg(SD_EMMC_CLOCK, |v| {
            let mut clk = ClockReg(v);
            phase = (clk.rx_phase() + 1) % 4;
            clk.set_rx_phase(phase);
            clk.0
        });
        warn!("rx phase -> {}", phase);
    }
}
