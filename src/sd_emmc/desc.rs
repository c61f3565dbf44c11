//! Descriptor chains for the SD_EMMC sequencer.
//!
//! A chain is rebuilt for every dispatch: an optional CMD23, the command
//! itself carrying the first data segment, one descriptor per remaining
//! segment piece, and an optional CMD12. Only the last descriptor carries
//! `end_of_chain`.

use alloc::vec::Vec;

use super::cmd::{MmcCommand, MmcRequest};
use super::constant::*;
use super::dma::SgSegment;
use super::regs::CmdCfg;
use crate::constant::*;
use crate::err::SdError;
use crate::ilog2;

#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub cmd_cfg: u32,
    pub cmd_arg: u32,
    pub data_addr: u32,
    /// Holds the 48-bit response after completion when `resp_num` is set.
    pub resp_addr: u32,
}

impl Descriptor {
    pub fn cfg(&self) -> CmdCfg {
        CmdCfg(self.cmd_cfg)
    }

    fn update(&mut self, f: impl FnOnce(&mut CmdCfg)) {
        let mut cfg = self.cfg();
        f(&mut cfg);
        self.cmd_cfg = cfg.0;
    }

    pub fn words(&self) -> [u32; 4] {
        [self.cmd_cfg, self.cmd_arg, self.data_addr, self.resp_addr]
    }

    pub fn from_words(w: [u32; 4]) -> Self {
        Self {
            cmd_cfg: w[0],
            cmd_arg: w[1],
            data_addr: w[2],
            resp_addr: w[3],
        }
    }
}

fn command_timeout(opcode: u8) -> u32 {
    match opcode {
        MMC_SEND_STATUS => DESC_TIMEOUT_STATUS,
        MMC_ERASE => DESC_TIMEOUT_ERASE,
        _ => DESC_TIMEOUT_CMD,
    }
}

/// Descriptor issuing `cmd` with no data phase.
pub(crate) fn command_descriptor(cmd: &MmcCommand) -> Descriptor {
    let mut cfg = CmdCfg(0);
    let mut resp_addr = 0;
    cfg.set_cmd_index(cmd.opcode as u32)
        .set_owner(1)
        .set_timeout(command_timeout(cmd.opcode));

    if cmd.has_response() {
        if cmd.is_long_response() {
            // response lands in CMD_RSP..CMD_RSP3
            cfg.set_resp_128(1);
            resp_addr = 1;
        } else {
            cfg.set_resp_num(1);
        }
        if cmd.is_busy() {
            cfg.set_r1b(1);
        }
        if !cmd.checks_crc() {
            cfg.set_resp_nocrc(1);
        }
    } else {
        cfg.set_no_resp(1);
    }

    Descriptor {
        cmd_cfg: cfg.0,
        cmd_arg: cmd.arg,
        data_addr: 0,
        resp_addr,
    }
}

fn data_continuation() -> Descriptor {
    let mut cfg = CmdCfg(0);
    cfg.set_no_resp(1).set_no_cmd(1).set_owner(1);
    Descriptor {
        cmd_cfg: cfg.0,
        ..Default::default()
    }
}

/// Build the chain for `req` whose data, if any, is described by `segs`.
pub fn build_chain(
    req: &MmcRequest,
    segs: &[SgSegment],
    capacity: usize,
) -> Result<Vec<Descriptor>, SdError> {
    let opcode = req.opcode();
    let mut chain = Vec::new();

    if let (Some(sbc), Some(data)) = (&req.sbc, &req.data) {
        if mmc_op_multi(opcode) {
            let mut d = command_descriptor(sbc);
            // upper bits carry CMD23 flags such as reliable write
            d.cmd_arg = (sbc.arg & !SBC_BLOCK_COUNT_MASK) | (data.blocks & SBC_BLOCK_COUNT_MASK);
            d.update(|c| {
                c.set_timeout(DESC_TIMEOUT_DATA);
            });
            chain.push(d);
        }
    }

    let main = command_descriptor(&req.cmd);
    match &req.data {
        None => chain.push(main),
        Some(data) => {
            let block_mode = data.block_mode();
            if block_mode && !data.blksz.is_power_of_two() {
                return Err(SdError::BadSegment);
            }
            if segs.is_empty() {
                return Err(SdError::BadSegment);
            }
            let shift = if block_mode { ilog2(data.blksz) } else { 0 };

            let mut next = Some(main);
            for seg in segs {
                if seg.len == 0 || (block_mode && seg.len % data.blksz != 0) {
                    return Err(SdError::BadSegment);
                }
                let mut units = seg.len >> shift;
                let mut addr = seg.bus_addr;
                while units > 0 {
                    let n = units.min(SD_EMMC_MAX_DESC_LEN);
                    let bus = u32::try_from(addr).map_err(|_| SdError::DmaMap)?;
                    let mut d = next.take().unwrap_or_else(data_continuation);
                    d.update(|c| {
                        c.set_data_io(1)
                            .set_data_wr(!data.is_read as u32)
                            .set_block_mode(block_mode as u32)
                            .set_length(n)
                            .set_timeout(DESC_TIMEOUT_DATA);
                    });
                    d.data_addr = bus;
                    chain.push(d);
                    addr += (n as u64) << shift;
                    units -= n;
                }
            }

            if mmc_op_multi(opcode) && req.sbc.is_none() {
                let stop = req.stop.clone().unwrap_or_else(MmcCommand::stop);
                let mut d = command_descriptor(&stop);
                d.update(|c| {
                    c.set_timeout(DESC_TIMEOUT_DATA);
                });
                chain.push(d);
            }
        }
    }

    if chain.len() > capacity {
        return Err(SdError::DescOverflow);
    }
    if let Some(last) = chain.last_mut() {
        last.update(|c| {
            c.set_end_of_chain(1);
        });
    }
    Ok(chain)
}
