//! Software model of an SD_EMMC controller with an attached card.
//!
//! Register writes are recorded; a write to START with busy set runs the
//! descriptor chain at once against simulated device memory and raises the
//! status bits the chain ends with.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use meson_sdmmc::constant::*;
use meson_sdmmc::sd_emmc::constant::*;
use meson_sdmmc::sd_emmc::desc::Descriptor;
use meson_sdmmc::sd_emmc::regs::{AdjustReg, ClockReg, ConfigReg, StartReg, delay_line};
use meson_sdmmc::{
    Direction, DmaOps, HostConfig, RegisterIo, SdEmmcHost, SdError, SgSegment,
};

pub const DESC_BASE: u64 = 0x0100_0000;
pub const BOUNCE_BASE: u64 = 0x0200_0000;
pub const MAP_BASE: u64 = 0x0300_0000;
pub const CARD_STATUS: u32 = 0x900;

/// Outcome injected into the next data or command chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    DataCrc,
    RespCrc,
    RespTimeout,
    DataTimeout,
    /// Chain never finishes, no status raised.
    Hang,
}

impl Fault {
    fn status(self) -> u32 {
        match self {
            Fault::None => IrqStatus::END_OF_CHAIN.bits(),
            Fault::DataCrc => 1,
            Fault::RespCrc => IrqStatus::RESP_ERR.bits(),
            Fault::RespTimeout => IrqStatus::RESP_TIMEOUT.bits(),
            Fault::DataTimeout => IrqStatus::DESC_TIMEOUT.bits(),
            Fault::Hang => 0,
        }
    }
}

/// Calibration index reported for `(line, tap)`, `None` for an invalid read.
pub type CaliModel = Box<dyn Fn(u32, u32) -> Option<u8>>;

/// Whether a tuning read passes for the `(ADJUST, CLOCK)` values in force.
pub type TuningModel = Box<dyn Fn(AdjustReg, ClockReg) -> bool>;

/// One executed chain.
#[derive(Debug, Clone)]
pub struct Kick {
    pub chain: Vec<Descriptor>,
    pub fault: Fault,
}

pub struct Sim {
    regs: [u32; 32],
    pub writes: Vec<(u32, u32)>,
    pub desc: Vec<Descriptor>,
    pub bounce: Vec<u8>,
    pub mapped: Option<Vec<u8>>,
    pub faults: VecDeque<Fault>,
    pub kicks: Vec<Kick>,
    /// Bytes the card received, per write command.
    pub written: Vec<Vec<u8>>,
    /// Map request buffers at an address the sequencer cannot use.
    pub misalign: bool,
    pub auto_calout: bool,
    pub cali: Option<CaliModel>,
    pub tuning: Option<TuningModel>,
    pub maps: usize,
    pub unmaps: usize,
}

impl Sim {
    pub fn new() -> Self {
        let mut regs = [0; 32];
        // DAT lines idle high
        regs[(SD_EMMC_STATUS / 4) as usize] = 0xff << 16;
        Self {
            regs,
            writes: Vec::new(),
            desc: vec![Descriptor::default(); SD_EMMC_MAX_DESC_NUM],
            bounce: vec![0; SD_EMMC_BOUNCE_REQ_SIZE],
            mapped: None,
            faults: VecDeque::new(),
            kicks: Vec::new(),
            written: Vec::new(),
            misalign: false,
            auto_calout: true,
            cali: None,
            tuning: None,
            maps: 0,
            unmaps: 0,
        }
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.regs[(offset / 4) as usize]
    }

    fn set_reg(&mut self, offset: u32, value: u32) {
        self.regs[(offset / 4) as usize] = value;
    }

    /// Writes to `offset` so far.
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Latch interrupt status as the controller would.
    pub fn raise(&mut self, bits: u32) {
        let st = self.reg(SD_EMMC_STATUS) | bits;
        self.set_reg(SD_EMMC_STATUS, st);
    }

    /// Drive DAT0..DAT7 to `level`, one bit per line.
    pub fn set_dat_lines(&mut self, level: u8) {
        let st = (self.reg(SD_EMMC_STATUS) & !(0xff << 16)) | (level as u32) << 16;
        self.set_reg(SD_EMMC_STATUS, st);
    }

    /// Kicks whose first descriptor issues `opcode`.
    pub fn kicks_of(&self, opcode: u8) -> usize {
        self.kicks
            .iter()
            .filter(|k| first_opcode(&k.chain) == Some(opcode as u32))
            .count()
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.writes.push((offset, value));
        match offset {
            SD_EMMC_STATUS => {
                let st = self.reg(SD_EMMC_STATUS) & !(value & 0xffff);
                self.set_reg(SD_EMMC_STATUS, st);
            }
            SD_EMMC_START => {
                self.set_reg(offset, value);
                if StartReg(value).busy() == 1 {
                    self.run_chain(((StartReg(value).addr() as u64) << 2) - DESC_BASE);
                }
            }
            _ => self.set_reg(offset, value),
        }
    }

    fn dev_mem(&mut self, addr: u64, len: usize) -> &mut [u8] {
        let (buf, off) = if addr >= MAP_BASE {
            (self.mapped.as_mut().expect("no mapping"), addr - MAP_BASE)
        } else {
            (&mut self.bounce, addr - BOUNCE_BASE)
        };
        let off = off as usize;
        &mut buf[off..off + len]
    }

    fn run_chain(&mut self, offset: u64) {
        assert_eq!(offset, 0, "chain must start at descriptor 0");
        let mut chain = Vec::new();
        for d in &self.desc {
            chain.push(*d);
            if d.cfg().end_of_chain() == 1 {
                break;
            }
        }

        let standalone_stop =
            chain.len() == 1 && chain[0].cfg().cmd_index() == MMC_STOP_TRANSMISSION as u32;
        let fault = if standalone_stop {
            Fault::None
        } else {
            self.faults.pop_front().unwrap_or(Fault::None)
        };

        if fault == Fault::Hang {
            self.kicks.push(Kick { chain, fault });
            return;
        }

        let cfg = ConfigReg(self.reg(SD_EMMC_CFG));
        let blksz = 1usize << cfg.bl_len();
        let mut opcode = 0;
        let mut arg = 0;
        let mut status = fault.status();
        let mut received = Vec::new();
        let mut read_off = 0;

        for (i, d) in chain.iter().enumerate() {
            let c = d.cfg();
            if c.no_cmd() == 0 {
                opcode = c.cmd_index();
                arg = d.cmd_arg;
                if c.resp_num() == 1 {
                    self.desc[i].resp_addr = CARD_STATUS;
                } else if c.resp_128() == 1 {
                    self.set_reg(SD_EMMC_CMD_RSP, 0x1111);
                    self.set_reg(SD_EMMC_CMD_RSP1, 0x2222);
                    self.set_reg(SD_EMMC_CMD_RSP2, 0x3333);
                    self.set_reg(SD_EMMC_CMD_RSP3, 0x4444);
                }
            }
            if c.data_io() == 0 {
                continue;
            }

            let len = if c.block_mode() == 1 {
                c.length() as usize * blksz
            } else {
                c.length() as usize
            };
            let addr = d.data_addr as u64;
            if c.data_wr() == 1 {
                let data = self.dev_mem(addr, len).to_vec();
                received.extend(data);
            } else {
                let fill = self.read_fill(opcode, arg, read_off, len);
                read_off += len;
                if opcode == MMC_SEND_TUNING_BLOCK as u32
                    || opcode == MMC_SEND_TUNING_BLOCK_HS200 as u32
                {
                    let adj = AdjustReg(self.reg(SD_EMMC_ADJUST));
                    let clk = ClockReg(self.reg(SD_EMMC_CLOCK));
                    let pass = self.tuning.as_ref().is_none_or(|t| t(adj, clk));
                    if !pass && status == IrqStatus::END_OF_CHAIN.bits() {
                        status = IrqStatus::RXD_ERR.bits();
                    }
                }
                self.dev_mem(addr, len).copy_from_slice(&fill);
            }
        }

        if !received.is_empty() {
            self.written.push(received);
        }
        if first_opcode(&chain) == Some(MMC_READ_MULTIPLE_BLOCK as u32) {
            self.latch_calout();
        }

        self.raise(status);
        let start = StartReg(self.reg(SD_EMMC_START));
        let mut idle = start;
        idle.set_busy(0);
        self.set_reg(SD_EMMC_START, idle.0);
        self.kicks.push(Kick { chain, fault });
    }

    fn read_fill(&self, opcode: u32, arg: u32, off: usize, len: usize) -> Vec<u8> {
        match opcode as u8 {
            MMC_SEND_TUNING_BLOCK_HS200 if ConfigReg(self.reg(SD_EMMC_CFG)).bus_width() == 2 => {
                TUNING_BLK_PATTERN_8BIT[..len].to_vec()
            }
            MMC_SEND_TUNING_BLOCK | MMC_SEND_TUNING_BLOCK_HS200 => {
                TUNING_BLK_PATTERN_4BIT[..len].to_vec()
            }
            _ => (off..off + len).map(|i| block_byte(arg, i)).collect(),
        }
    }

    /// CALOUT after a calibration read, for the line selected in ADJUST.
    fn latch_calout(&mut self) {
        let adj = AdjustReg(self.reg(SD_EMMC_ADJUST));
        if adj.cali_enable() == 0 {
            return;
        }
        let Some(model) = self.cali.as_ref() else {
            return;
        };
        let line = adj.cali_sel();
        let tap = delay_line(line).get(self.reg(SD_EMMC_DELAY));
        let idx = model(line, tap);
        if self.auto_calout {
            let idx = idx.unwrap_or(0) as u32;
            self.set_reg(SD_EMMC_CALOUT, (idx << 24) | 1000);
            self.set_reg(SD_EMMC_CALOUT + 4, ((idx + 1) << 24) | 10);
            self.set_reg(SD_EMMC_CALOUT + 8, 0);
            self.set_reg(SD_EMMC_CALOUT + 12, 0);
        } else {
            let word = match idx {
                Some(i) => (1 << 7) | i as u32,
                None => 0,
            };
            self.set_reg(SD_EMMC_CALOUT, word);
        }
    }
}

fn first_opcode(chain: &[Descriptor]) -> Option<u32> {
    chain
        .iter()
        .find(|d| d.cfg().no_cmd() == 0)
        .map(|d| d.cfg().cmd_index())
}

/// Card content at byte `i` of a read starting at block `arg`.
pub fn block_byte(arg: u32, i: usize) -> u8 {
    (i as u32 ^ arg.wrapping_mul(31)) as u8
}

#[derive(Clone)]
pub struct SimRegs(pub Rc<RefCell<Sim>>);

impl RegisterIo for SimRegs {
    fn read32(&self, offset: u32) -> u32 {
        self.0.borrow().reg(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        self.0.borrow_mut().write(offset, value)
    }
}

pub struct SimDma(pub Rc<RefCell<Sim>>);

impl DmaOps for SimDma {
    fn desc_bus_addr(&self) -> u64 {
        DESC_BASE
    }

    fn write_desc(&mut self, chain: &[Descriptor]) {
        let mut sim = self.0.borrow_mut();
        sim.desc[..chain.len()].copy_from_slice(chain);
    }

    fn read_desc(&self, index: usize) -> Descriptor {
        self.0.borrow().desc[index]
    }

    fn bounce_bus_addr(&self) -> u64 {
        BOUNCE_BASE
    }

    fn copy_to_bounce(&mut self, src: &[u8]) {
        self.0.borrow_mut().bounce[..src.len()].copy_from_slice(src);
    }

    fn copy_from_bounce(&mut self, dst: &mut [u8]) {
        let sim = self.0.borrow();
        dst.copy_from_slice(&sim.bounce[..dst.len()]);
    }

    fn map_sg(&mut self, buf: &[u8], _dir: Direction) -> Result<Vec<SgSegment>, SdError> {
        let mut sim = self.0.borrow_mut();
        assert!(sim.mapped.is_none(), "buffer mapped twice");
        let shift = if sim.misalign { 4 } else { 0 };
        let mut mem = vec![0; buf.len() + shift];
        mem[shift..].copy_from_slice(buf);
        sim.mapped = Some(mem);
        sim.maps += 1;
        Ok(vec![SgSegment {
            bus_addr: MAP_BASE + shift as u64,
            len: buf.len() as u32,
        }])
    }

    fn unmap_sg(&mut self, buf: &mut [u8], dir: Direction) {
        let mut sim = self.0.borrow_mut();
        let shift = if sim.misalign { 4 } else { 0 };
        let mem = sim.mapped.take().expect("unmap without mapping");
        sim.unmaps += 1;
        if matches!(dir, Direction::FromDevice) {
            buf.copy_from_slice(&mem[shift..shift + buf.len()]);
        }
    }
}

pub type TestHost = SdEmmcHost<SimRegs, SimDma>;

/// Host wired to a fresh simulator, initialized and clocked at `div` from
/// the PLL.
pub fn host(config: HostConfig, div: u32) -> (TestHost, Rc<RefCell<Sim>>) {
    let sim = Rc::new(RefCell::new(Sim::new()));
    let host = SdEmmcHost::new(SimRegs(sim.clone()), SimDma(sim.clone()), config);
    host.init();
    host.set_clock(div, CLK_SRC_PLL).unwrap();
    sim.borrow_mut().writes.clear();
    (host, sim)
}
