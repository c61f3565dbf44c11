use alloc::vec;
use alloc::vec::Vec;

use dma_api::{DVec, Direction};

use super::constant::*;
use super::desc::Descriptor;
use crate::err::SdError;

/// One device-visible piece of a mapped request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgSegment {
    pub bus_addr: u64,
    pub len: u32,
}

/// Device memory the host owns for the lifetime of one in-flight request:
/// the descriptor table, the bounce buffer and the mapping of request data.
pub trait DmaOps {
    fn desc_bus_addr(&self) -> u64;

    fn desc_capacity(&self) -> usize {
        SD_EMMC_MAX_DESC_NUM
    }

    /// Store `chain` at slot 0 onward, visible to the device on return.
    fn write_desc(&mut self, chain: &[Descriptor]);

    /// Descriptor at `index` as last written back by the device.
    fn read_desc(&self, index: usize) -> Descriptor;

    fn bounce_bus_addr(&self) -> u64;

    fn bounce_capacity(&self) -> usize {
        SD_EMMC_BOUNCE_REQ_SIZE
    }

    fn copy_to_bounce(&mut self, src: &[u8]);

    fn copy_from_bounce(&mut self, dst: &mut [u8]);

    fn map_sg(&mut self, buf: &[u8], dir: Direction) -> Result<Vec<SgSegment>, SdError>;

    /// Drop the mapping made by `map_sg`; device writes land in `buf`.
    fn unmap_sg(&mut self, buf: &mut [u8], dir: Direction);
}

/// `DmaOps` backed by `dma_api` coherent vectors. Request data is staged
/// through one contiguous buffer per request.
pub struct DVecDma {
    desc: DVec<u32>,
    bounce: DVec<u8>,
    staged: Option<DVec<u8>>,
}

impl DVecDma {
    /// The descriptor table is bidirectional: the controller writes the
    /// response back into `resp_addr`.
    pub fn new() -> Result<Self, SdError> {
        let desc = DVec::zeros(SD_EMMC_MAX_DESC_NUM * 4, 0x1000, Direction::Bidirectional)
            .ok_or(SdError::DmaMap)?;
        let bounce = DVec::zeros(SD_EMMC_BOUNCE_REQ_SIZE, 0x1000, Direction::Bidirectional)
            .ok_or(SdError::DmaMap)?;
        Ok(Self {
            desc,
            bounce,
            staged: None,
        })
    }
}

impl DmaOps for DVecDma {
    fn desc_bus_addr(&self) -> u64 {
        self.desc.bus_addr() as u64
    }

    fn write_desc(&mut self, chain: &[Descriptor]) {
        for (i, d) in chain.iter().enumerate() {
            for (k, word) in d.words().into_iter().enumerate() {
                self.desc.set(i * 4 + k, word);
            }
        }
    }

    fn read_desc(&self, index: usize) -> Descriptor {
        let base = index * 4;
        Descriptor::from_words([
            self.desc[base],
            self.desc[base + 1],
            self.desc[base + 2],
            self.desc[base + 3],
        ])
    }

    fn bounce_bus_addr(&self) -> u64 {
        self.bounce.bus_addr() as u64
    }

    fn copy_to_bounce(&mut self, src: &[u8]) {
        for (i, b) in src.iter().enumerate() {
            self.bounce.set(i, *b);
        }
    }

    fn copy_from_bounce(&mut self, dst: &mut [u8]) {
        for (i, b) in dst.iter_mut().enumerate() {
            *b = self.bounce[i];
        }
    }

    fn map_sg(&mut self, buf: &[u8], dir: Direction) -> Result<Vec<SgSegment>, SdError> {
        let to_device = matches!(dir, Direction::ToDevice);
        let mut staged = DVec::zeros(buf.len(), 512, dir).ok_or(SdError::DmaMap)?;
        if to_device {
            for (i, b) in buf.iter().enumerate() {
                staged.set(i, *b);
            }
        }
        let seg = SgSegment {
            bus_addr: staged.bus_addr() as u64,
            len: buf.len() as u32,
        };
        self.staged = Some(staged);
        Ok(vec![seg])
    }

    fn unmap_sg(&mut self, buf: &mut [u8], dir: Direction) {
        if let Some(staged) = self.staged.take() {
            if matches!(dir, Direction::FromDevice) {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = staged[i];
                }
            }
        }
    }
}
