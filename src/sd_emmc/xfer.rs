use alloc::vec;
use alloc::vec::Vec;

use log::{debug, error, warn};

use super::cmd::{Completion, MmcRequest, Rejected};
use super::constant::*;
use super::desc::build_chain;
use super::dma::{DmaOps, SgSegment};
use super::irq::{IrqEvent, IrqReturn};
use super::regs::{AdjustReg, ConfigReg, RegisterIo, StartReg};
use super::SdEmmcHost;
use crate::constant::*;
use crate::err::SdError;
use crate::{delay_us, ilog2};

/// Progress of the request currently owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferStep {
    Init,
    Start,
    AfterStart,
    IrqOccur,
    IrqTaskletBusy,
    TaskletCmd,
    TaskletData,
    TimerTimeout,
    Finished,
}

/// Outcome classified by the hard IRQ stage for the deferred stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Invalid,
    TaskletCmd,
    TaskletData,
    DatCrcErr,
    RspCrcErr,
    RspTimeoutErr,
    DatTimeoutErr,
}

impl HostStatus {
    pub fn error(&self) -> Option<SdError> {
        match self {
            HostStatus::DatCrcErr => Some(SdError::DataCrc),
            HostStatus::RspCrcErr => Some(SdError::Crc),
            HostStatus::RspTimeoutErr => Some(SdError::Timeout),
            HostStatus::DatTimeoutErr => Some(SdError::DataTimeout),
            HostStatus::Invalid | HostStatus::TaskletCmd | HostStatus::TaskletData => None,
        }
    }

    pub fn is_response_error(&self) -> bool {
        matches!(self, HostStatus::RspCrcErr | HostStatus::RspTimeoutErr)
    }
}

pub(crate) struct InFlight {
    pub req: MmcRequest,
    pub chain_len: usize,
    pub bounce: bool,
    pub mapped: bool,
    pub resp: [u32; 4],
}

pub(crate) struct XferState<D> {
    pub dma: D,
    pub mrq: Option<InFlight>,
    pub step: XferStep,
    pub status: HostStatus,
    /// Single-slot handoff from the hard IRQ stage.
    pub event: Option<IrqEvent>,
    /// A synthesized CMD12 is on the bus for `mrq`.
    pub cmd_is_stop: bool,
    pub error_bak: Option<SdError>,
    pub error_flag: ErrorFlag,
    pub is_tuning: bool,
    /// Data line under calibration, routed into ADJUST on CMD18.
    pub cali_line: Option<u32>,
    /// CMD11 ran with the card clock forced on; cleared once the card
    /// releases DAT0..DAT3.
    pub volt_switch: bool,
    pub sdio_irqs: u32,
}

impl<D> XferState<D> {
    pub fn new(dma: D) -> Self {
        Self {
            dma,
            mrq: None,
            step: XferStep::Init,
            status: HostStatus::Invalid,
            event: None,
            cmd_is_stop: false,
            error_bak: None,
            error_flag: ErrorFlag::empty(),
            is_tuning: false,
            cali_line: None,
            volt_switch: false,
            sdio_irqs: 0,
        }
    }
}

struct Prepared {
    chain_len: usize,
    bounce: bool,
    mapped: bool,
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Hand a request to the controller. Fails with `Busy` while another
    /// request is current, or with a build error if no chain can describe it.
    pub fn submit(&self, mut req: MmcRequest) -> Result<(), Rejected> {
        let mut xfer = self.xfer.lock();
        if xfer.mrq.is_some() {
            warn!("CMD{} rejected, request in flight", req.opcode());
            return Err(Rejected {
                reason: SdError::Busy,
                request: req,
            });
        }

        if xfer.error_flag.contains(ErrorFlag::LAST_RETRY_FAILED) {
            xfer.error_flag = ErrorFlag::empty();
        }

        debug!(
            "starting CMD{} arg {:#010x} flags {:#x}",
            req.cmd.opcode, req.cmd.arg, req.cmd.resp_type
        );

        match self.start_cmd(&mut xfer, &mut req) {
            Ok(p) => {
                xfer.mrq = Some(InFlight {
                    req,
                    chain_len: p.chain_len,
                    bounce: p.bounce,
                    mapped: p.mapped,
                    resp: [0; 4],
                });
                Ok(())
            }
            Err(e) => {
                error!("CMD{} not dispatched: {}", req.opcode(), e);
                Err(Rejected {
                    reason: e,
                    request: req,
                })
            }
        }
    }

    /// Map data, write the chain and kick the sequencer.
    fn start_cmd(&self, xfer: &mut XferState<D>, req: &mut MmcRequest) -> Result<Prepared, SdError> {
        let desc_bus = u32::try_from(xfer.dma.desc_bus_addr()).map_err(|_| SdError::DmaMap)?;

        self.halt_chain();
        let prepared = self.pre_dma(xfer, req)?;

        let mut cfg = ConfigReg(self.read_reg(SD_EMMC_CFG));
        let old = cfg;
        if let Some(data) = &req.data {
            if data.block_mode() {
                cfg.set_bl_len(ilog2(data.blksz));
            }
        }
        if req.opcode() == SD_SWITCH_VOLTAGE {
            cfg.set_auto_clk(0);
            xfer.volt_switch = true;
        }
        if cfg != old {
            self.write_reg(SD_EMMC_CFG, cfg.0);
        }

        if let (Some(line), MMC_READ_MULTIPLE_BLOCK) = (xfer.cali_line, req.opcode()) {
            self.cali_select(line);
        }

        self.kick(xfer, desc_bus);
        Ok(prepared)
    }

    /// Point START at descriptor 0 and set busy.
    fn kick(&self, xfer: &mut XferState<D>, desc_bus: u32) {
        self.write_reg(SD_EMMC_STATUS, SD_EMMC_IRQ_ALL);
        xfer.step = XferStep::Start;
        let mut start = StartReg(0);
        start.set_init(0).set_busy(1).set_addr(desc_bus >> 2);
        self.write_reg(SD_EMMC_START, start.0);
        xfer.step = XferStep::AfterStart;
    }

    /// Route calibration sampling to data line `line` for the next read.
    fn cali_select(&self, line: u32) {
        let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
        adj.set_cali_sel(line).set_cali_enable(1).set_cali_rise(0);
        self.write_reg(SD_EMMC_ADJUST, adj.0);
    }

    pub(crate) fn halt_chain(&self) {
        let start = StartReg(self.read_reg(SD_EMMC_START));
        if start.busy() == 1 {
            let mut start = start;
            start.set_busy(0);
            self.write_reg(SD_EMMC_START, start.0);
        }
    }

    fn pre_dma(&self, xfer: &mut XferState<D>, req: &mut MmcRequest) -> Result<Prepared, SdError> {
        let mut bounce = false;
        let mut mapped = false;

        let segs: Vec<SgSegment> = match &mut req.data {
            None => Vec::new(),
            Some(data) => {
                let len = data.byte_len().ok_or(SdError::InvalidArgument)?;
                if data.buf.len() < len || len == 0 {
                    return Err(SdError::InvalidArgument);
                }
                let segs = xfer.dma.map_sg(&data.buf[..len], data.direction())?;
                if segs.iter().any(|s| s.bus_addr & SD_EMMC_DMA_ALIGN != 0) {
                    // sequencer needs 8 byte aligned data addresses
                    let dir = data.direction();
                    xfer.dma.unmap_sg(&mut data.buf[..len], dir);
                    if len > xfer.dma.bounce_capacity() {
                        return Err(SdError::BounceOverflow);
                    }
                    if !data.is_read {
                        xfer.dma.copy_to_bounce(&data.buf[..len]);
                    }
                    bounce = true;
                    vec![SgSegment {
                        bus_addr: xfer.dma.bounce_bus_addr(),
                        len: len as u32,
                    }]
                } else {
                    mapped = true;
                    segs
                }
            }
        };

        let chain = match build_chain(req, &segs, xfer.dma.desc_capacity()) {
            Ok(chain) => chain,
            Err(e) => {
                if let (true, Some(data)) = (mapped, &mut req.data) {
                    let (len, dir) = (data.len(), data.direction());
                    xfer.dma.unmap_sg(&mut data.buf[..len], dir);
                }
                return Err(e);
            }
        };
        xfer.dma.write_desc(&chain);

        Ok(Prepared {
            chain_len: chain.len(),
            bounce,
            mapped,
        })
    }

    /// Return device data to the request buffer and drop mappings.
    pub(crate) fn post_dma(&self, xfer: &mut XferState<D>) {
        let XferState { dma, mrq, .. } = xfer;
        let Some(inflight) = mrq.as_mut() else {
            return;
        };
        if let Some(data) = &mut inflight.req.data {
            let len = data.len();
            if inflight.bounce && data.is_read {
                dma.copy_from_bounce(&mut data.buf[..len]);
            }
            if inflight.mapped {
                let dir = data.direction();
                dma.unmap_sg(&mut data.buf[..len], dir);
            }
        }
        inflight.bounce = false;
        inflight.mapped = false;
    }

    /// Capture the response of the current command.
    pub(crate) fn read_resp(&self, xfer: &mut XferState<D>) {
        let XferState { dma, mrq, .. } = xfer;
        let Some(inflight) = mrq.as_mut() else {
            return;
        };
        let cmd = &inflight.req.cmd;
        if cmd.is_long_response() {
            inflight.resp = [
                self.read_reg(SD_EMMC_CMD_RSP3),
                self.read_reg(SD_EMMC_CMD_RSP2),
                self.read_reg(SD_EMMC_CMD_RSP1),
                self.read_reg(SD_EMMC_CMD_RSP),
            ];
        } else if cmd.has_response() {
            // 48-bit responses are written back into the issuing descriptor
            let found = (0..inflight.chain_len)
                .map(|i| dma.read_desc(i))
                .find(|d| d.cfg().no_cmd() == 0 && d.cfg().cmd_index() == cmd.opcode as u32);
            if let Some(d) = found {
                inflight.resp[0] = d.resp_addr;
            }
        }
    }

    /// Release the current request and build its completion.
    pub(crate) fn request_done(
        &self,
        xfer: &mut XferState<D>,
        result: Result<(), SdError>,
        bytes_xfered: u32,
    ) -> Option<Completion> {
        self.post_dma(xfer);
        let inflight = xfer.mrq.take()?;
        xfer.step = XferStep::Finished;
        xfer.status = HostStatus::Invalid;
        xfer.event = None;
        debug!("CMD{} done: {:?}", inflight.req.opcode(), result);
        Some(Completion {
            request: inflight.req,
            result,
            resp: inflight.resp,
            bytes_xfered,
        })
    }

    /// Abandon the current request after the caller's watchdog fired.
    /// Interrupts that still arrive for it are acknowledged and dropped.
    pub fn cancel_on_timeout(&self) -> Option<Completion> {
        let mut xfer = self.xfer.lock();
        xfer.mrq.as_ref()?;
        self.halt_chain();
        error!(
            "CMD{} timed out at {:?}",
            xfer.mrq.as_ref().map_or(0, |m| m.req.opcode()),
            xfer.step
        );
        xfer.cmd_is_stop = false;
        let result = Err(xfer.error_bak.take().unwrap_or(SdError::Timeout));
        let done = self.request_done(&mut xfer, result, 0);
        xfer.step = XferStep::TimerTimeout;
        done
    }

    /// Issue CMD12 for the current request, keeping its error for later.
    pub(crate) fn send_stop(&self, xfer: &mut XferState<D>, err: SdError) -> Result<(), SdError> {
        let desc_bus = u32::try_from(xfer.dma.desc_bus_addr()).map_err(|_| SdError::DmaMap)?;
        self.wait_start_idle()?;

        let stop = xfer
            .mrq
            .as_ref()
            .and_then(|m| m.req.stop.clone())
            .ok_or(SdError::InvalidArgument)?;
        let chain = build_chain(&MmcRequest::new(stop), &[], xfer.dma.desc_capacity())?;
        xfer.dma.write_desc(&chain);

        xfer.cmd_is_stop = true;
        xfer.error_bak = Some(err);
        if let Some(m) = xfer.mrq.as_mut() {
            m.chain_len = chain.len();
        }
        debug!("sending CMD12 after {}", err);
        self.kick(xfer, desc_bus);
        Ok(())
    }

    fn wait_start_idle(&self) -> Result<(), SdError> {
        let mut timeout = STAT_POLL_TIMEOUT;
        while StartReg(self.read_reg(SD_EMMC_START)).busy() == 1 {
            if timeout == 0 {
                return Err(SdError::Timeout);
            }
            timeout -= 1;
            delay_us(1);
        }
        Ok(())
    }

    /// Run one request to completion by polling the status register, then
    /// resubmit it while transport errors leave retries in its budget.
    pub fn wait_for_req(&self, mut req: MmcRequest) -> Result<Completion, SdError> {
        loop {
            let done = self.run_polled(req)?;
            match done.result {
                Err(e) if e.is_transport() && done.request.cmd.retries > 0 => {
                    req = done.request;
                    req.cmd.retries -= 1;
                    debug!("retry CMD{} after {}, {} left", req.opcode(), e, req.cmd.retries);
                }
                _ => return Ok(done),
            }
        }
    }

    fn run_polled(&self, req: MmcRequest) -> Result<Completion, SdError> {
        self.submit(req).map_err(|r| r.reason)?;

        let mut timeout = XFER_POLL_TIMEOUT;
        loop {
            let pending = self.read_reg(SD_EMMC_STATUS) & SD_EMMC_IRQ_ALL;
            if pending != 0 && self.irq() == IrqReturn::WakeThread {
                if let Some(done) = self.irq_thread() {
                    return Ok(done);
                }
                // CMD12 still on the bus
                timeout = XFER_POLL_TIMEOUT;
                continue;
            }
            if timeout == 0 {
                return self.cancel_on_timeout().ok_or(SdError::Timeout);
            }
            timeout -= 1;
        }
    }
}
