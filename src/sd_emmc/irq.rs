use log::{debug, error, warn};

use super::cmd::Completion;
use super::constant::*;
use super::dma::DmaOps;
use super::regs::{ConfigReg, RegisterIo, StatusReg};
use super::xfer::{HostStatus, XferStep};
use super::{CardType, SdEmmcHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not raised by this controller.
    None,
    Handled,
    /// Run `irq_thread` to finish the work.
    WakeThread,
}

/// Snapshot handed from the hard IRQ stage to the deferred stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IrqEvent {
    pub status: u32,
    pub code: HostStatus,
}

/// Map raw status bits to an outcome, errors first.
pub(crate) fn classify(status: IrqStatus, has_data: bool) -> Option<HostStatus> {
    if status.intersects(IrqStatus::RXD_ERR | IrqStatus::TXD_ERR | IrqStatus::DESC_ERR) {
        Some(HostStatus::DatCrcErr)
    } else if status.contains(IrqStatus::RESP_ERR) {
        Some(HostStatus::RspCrcErr)
    } else if status.contains(IrqStatus::RESP_TIMEOUT) {
        Some(HostStatus::RspTimeoutErr)
    } else if status.contains(IrqStatus::DESC_TIMEOUT) {
        Some(HostStatus::DatTimeoutErr)
    } else if status.intersects(IrqStatus::END_OF_CHAIN | IrqStatus::DESC_IRQ) {
        Some(if has_data {
            HostStatus::TaskletData
        } else {
            HostStatus::TaskletCmd
        })
    } else {
        None
    }
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Hard IRQ stage: snapshot and acknowledge status, classify it and
    /// leave one event for `irq_thread`.
    pub fn irq(&self) -> IrqReturn {
        let virqc = self.read_reg(SD_EMMC_IRQ_EN) & 0xffff;
        let vstat = self.read_reg(SD_EMMC_STATUS);
        let ista = IrqStatus::from_bits_truncate(vstat);
        let irqc = IrqStatus::from_bits_truncate(virqc);

        let mut xfer = self.xfer.lock();

        let sdio = irqc.contains(IrqStatus::IRQ_SDIO) && ista.contains(IrqStatus::IRQ_SDIO);
        if sdio {
            xfer.sdio_irqs += 1;
            self.write_reg(SD_EMMC_STATUS, IrqStatus::IRQ_SDIO.bits());
        }

        if vstat & SD_EMMC_IRQ_ALL == 0 {
            return if sdio { IrqReturn::Handled } else { IrqReturn::None };
        }

        if xfer.mrq.is_none() {
            if !sdio {
                warn!("spurious irq, status {:#010x}", vstat);
            }
            self.write_reg(SD_EMMC_STATUS, SD_EMMC_IRQ_ACK);
            return IrqReturn::Handled;
        }

        // sequencer is done with this chain
        self.halt_chain();
        self.write_reg(SD_EMMC_STATUS, SD_EMMC_IRQ_ACK);

        if matches!(xfer.step, XferStep::TimerTimeout | XferStep::Finished) {
            debug!("irq after {:?}, dropped", xfer.step);
            return IrqReturn::Handled;
        }

        let has_data = xfer
            .mrq
            .as_ref()
            .is_some_and(|m| m.req.data.is_some() && m.req.opcode() != 0);
        let Some(code) = classify(ista, has_data) else {
            debug!("irq without outcome, status {:#010x}", vstat);
            return IrqReturn::Handled;
        };

        xfer.step = if xfer.cmd_is_stop {
            XferStep::IrqTaskletBusy
        } else {
            XferStep::IrqOccur
        };
        xfer.status = code;

        if code.error().is_some() && !xfer.is_tuning {
            let st = StatusReg(vstat);
            warn!(
                "CMD{} {:?}, status {:#010x}, bus fsm: {}",
                xfer.mrq.as_ref().map_or(0, |m| m.req.opcode()),
                code,
                vstat,
                bus_fsm_name(st.bus_fsm())
            );
        }

        xfer.event = Some(IrqEvent { status: vstat, code });
        IrqReturn::WakeThread
    }

    /// Deferred stage: consume the event left by `irq` and either complete
    /// the request or start recovery. Returns the completion when the
    /// request is released.
    pub fn irq_thread(&self) -> Option<Completion> {
        let mut xfer = self.xfer.lock();
        let event = xfer.event.take()?;

        if matches!(xfer.step, XferStep::TimerTimeout | XferStep::Finished) || xfer.mrq.is_none() {
            warn!("event {:?} for finished request", event.code);
            return None;
        }

        if xfer.cmd_is_stop {
            xfer.cmd_is_stop = false;
            if let Some(e) = event.code.error() {
                error!("CMD12 after failed transfer: {}", e);
            }
            xfer.step = XferStep::TaskletCmd;
            let result = match xfer.error_bak.take() {
                Some(e) => Err(e),
                None => Ok(()),
            };
            return self.request_done(&mut xfer, result, 0);
        }

        match event.code.error() {
            None => {
                xfer.error_flag = ErrorFlag::empty();
                let bytes = xfer
                    .mrq
                    .as_ref()
                    .and_then(|m| m.req.data.as_ref().filter(|_| m.req.opcode() != 0))
                    .map(|d| d.blksz * d.blocks);
                xfer.step = match bytes {
                    Some(_) => XferStep::TaskletData,
                    None => XferStep::TaskletCmd,
                };
                self.read_resp(&mut xfer);
                self.request_done(&mut xfer, Ok(()), bytes.unwrap_or(0))
            }
            Some(err) => {
                debug!("{} with status {:#010x}", err, event.status);
                self.read_resp(&mut xfer);
                self.post_dma(&mut xfer);
                if self.recover(&mut xfer, event.code, err) {
                    return None;
                }
                self.request_done(&mut xfer, Err(err), 0)
            }
        }
    }

    /// Card-interrupt events seen so far.
    pub fn sdio_irq_count(&self) -> u32 {
        self.xfer.lock().sdio_irqs
    }

    /// DAT0..DAT3 held low by the card. After a voltage switch on SD or
    /// SDIO the first idle reading hands the clock back to auto gating.
    pub fn card_busy(&self) -> bool {
        let st = StatusReg(self.read_reg(SD_EMMC_STATUS));
        let busy = st.dat_i() & 0xf == 0;

        let mut xfer = self.xfer.lock();
        if !busy && xfer.volt_switch && self.config.card_type != CardType::Mmc {
            let mut cfg = ConfigReg(self.read_reg(SD_EMMC_CFG));
            cfg.set_auto_clk(1);
            self.write_reg(SD_EMMC_CFG, cfg.0);
            xfer.volt_switch = false;
            debug!("voltage switch done, auto clock on");
        }
        busy
    }

    pub fn last_retry_failed(&self) -> bool {
        self.xfer.lock().error_flag.contains(ErrorFlag::LAST_RETRY_FAILED)
    }

    pub fn xfer_step(&self) -> XferStep {
        self.xfer.lock().step
    }

    pub fn host_status(&self) -> HostStatus {
        self.xfer.lock().status
    }
}
