use alloc::vec;
use alloc::vec::Vec;

use dma_api::Direction;

use crate::constant::*;
use crate::err::SdError;

#[derive(Debug, Clone)]
pub struct MmcCommand {
    pub opcode: u8,
    pub arg: u32,
    pub resp_type: u32,
    /// Remaining resubmissions after a transport error.
    pub retries: u32,
}

impl MmcCommand {
    pub fn new(opcode: u8, arg: u32, resp_type: u32) -> Self {
        Self {
            opcode,
            arg,
            resp_type,
            retries: 0,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn has_response(&self) -> bool {
        self.resp_type & MMC_RSP_PRESENT != 0
    }

    pub fn is_long_response(&self) -> bool {
        self.resp_type & MMC_RSP_136 != 0
    }

    pub fn is_busy(&self) -> bool {
        self.resp_type & MMC_RSP_BUSY != 0
    }

    pub fn checks_crc(&self) -> bool {
        self.resp_type & MMC_RSP_CRC != 0
    }

    pub(crate) fn stop() -> Self {
        Self::new(MMC_STOP_TRANSMISSION, 0, MMC_RSP_R1B)
    }
}

/// Data phase of a request. `buf` is the CPU side of the transfer.
#[derive(Debug, Clone)]
pub struct MmcData {
    pub blksz: u32,
    pub blocks: u32,
    pub is_read: bool,
    pub buf: Vec<u8>,
}

impl MmcData {
    /// Read buffer for `blocks` of `blksz`. A size that does not fit in
    /// 32 bits leaves `buf` empty and the request is refused at submission.
    pub fn read(blksz: u32, blocks: u32) -> Self {
        let len = blksz.checked_mul(blocks).unwrap_or(0);
        Self {
            blksz,
            blocks,
            is_read: true,
            buf: vec![0; len as usize],
        }
    }

    /// `buf` must hold a whole number of blocks.
    pub fn write(blksz: u32, buf: Vec<u8>) -> Self {
        Self {
            blksz,
            blocks: buf.len() as u32 / blksz.max(1),
            is_read: false,
            buf,
        }
    }

    /// Transfer size in bytes, `None` when it overflows.
    pub fn byte_len(&self) -> Option<usize> {
        self.blksz.checked_mul(self.blocks).map(|n| n as usize)
    }

    pub fn len(&self) -> usize {
        self.byte_len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn direction(&self) -> Direction {
        if self.is_read {
            Direction::FromDevice
        } else {
            Direction::ToDevice
        }
    }

    /// Multi-block or full-sector transfers are counted in blocks.
    pub(crate) fn block_mode(&self) -> bool {
        self.blocks > 1 || self.blksz >= 512
    }
}

#[derive(Debug, Clone)]
pub struct MmcRequest {
    pub cmd: MmcCommand,
    pub data: Option<MmcData>,
    /// CMD23 issued ahead of a multi-block transfer.
    pub sbc: Option<MmcCommand>,
    /// CMD12 that closes an open-ended multi-block transfer.
    pub stop: Option<MmcCommand>,
}

impl MmcRequest {
    pub fn new(cmd: MmcCommand) -> Self {
        Self {
            cmd,
            data: None,
            sbc: None,
            stop: None,
        }
    }

    pub fn with_data(mut self, data: MmcData) -> Self {
        self.data = Some(data);
        self
    }

    /// Precede the transfer with CMD23. The block count is taken from the
    /// data phase when the chain is built.
    pub fn with_sbc(mut self) -> Self {
        self.sbc = Some(MmcCommand::new(MMC_SET_BLOCK_COUNT, 0, MMC_RSP_R1));
        self
    }

    pub fn with_stop(mut self) -> Self {
        self.stop = Some(MmcCommand::stop());
        self
    }

    /// CMD17/CMD18 read starting at block `start`.
    pub fn read_blocks(start: u32, blocks: u32, blksz: u32) -> Self {
        let opcode = if blocks > 1 {
            MMC_READ_MULTIPLE_BLOCK
        } else {
            MMC_READ_SINGLE_BLOCK
        };
        let req = Self::new(MmcCommand::new(opcode, start, MMC_RSP_R1))
            .with_data(MmcData::read(blksz, blocks));
        if blocks > 1 { req.with_stop() } else { req }
    }

    /// CMD24/CMD25 write starting at block `start`.
    pub fn write_blocks(start: u32, blksz: u32, buf: Vec<u8>) -> Self {
        let data = MmcData::write(blksz, buf);
        let multi = data.blocks > 1;
        let opcode = if multi {
            MMC_WRITE_MULTIPLE_BLOCK
        } else {
            MMC_WRITE_BLOCK
        };
        let req = Self::new(MmcCommand::new(opcode, start, MMC_RSP_R1)).with_data(data);
        if multi { req.with_stop() } else { req }
    }

    pub fn opcode(&self) -> u8 {
        self.cmd.opcode
    }
}

/// Outcome of one request as delivered to the upper layer.
#[derive(Debug)]
pub struct Completion {
    pub request: MmcRequest,
    pub result: Result<(), SdError>,
    pub resp: [u32; 4],
    pub bytes_xfered: u32,
}

impl Completion {
    pub fn as_r1(&self) -> u32 {
        self.resp[0]
    }

    pub fn as_r2(&self) -> [u32; 4] {
        self.resp
    }
}

/// A request refused at submission, handed back untouched.
#[derive(Debug)]
pub struct Rejected {
    pub reason: SdError,
    pub request: MmcRequest,
}
