use super::{DmaOps, SdEmmcHost};

/// 32-bit register window of one controller.
pub trait RegisterIo {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
}

/// Memory-mapped register block at a fixed virtual address.
#[derive(Debug, Clone, Copy)]
pub struct MmioRegs {
    base_addr: usize,
}

impl MmioRegs {
    /// # Safety
    ///
    /// `base_addr` must map the controller's register block for the lifetime
    /// of the returned value.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }
}

impl RegisterIo for MmioRegs {
    // Read a 32-bit register
    fn read32(&self, offset: u32) -> u32 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u32) }
    }

    // Write a 32-bit register
    fn write32(&self, offset: u32, value: u32) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u32, value) }
    }
}

/// One bit field inside a 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    shift: u32,
    width: u32,
}

impl Field {
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    const fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    pub const fn get(&self, reg: u32) -> u32 {
        (reg >> self.shift) & self.mask()
    }

    /// Returns `reg` with the field replaced by `value`, truncated to width.
    pub const fn set(&self, reg: u32, value: u32) -> u32 {
        (reg & !(self.mask() << self.shift)) | ((value & self.mask()) << self.shift)
    }
}

pub const fn get_field(reg: u32, shift: u32, width: u32) -> u32 {
    Field::new(shift, width).get(reg)
}

pub const fn set_field(reg: u32, shift: u32, width: u32, value: u32) -> u32 {
    Field::new(shift, width).set(reg, value)
}

/// Declares a register value type with a getter and a chained `set_*` per field.
macro_rules! register_fields {
    ($(#[$meta:meta])* $vis:vis struct $name:ident { $($field:ident: $shift:expr, $width:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        $vis struct $name(pub u32);

        impl $name {
            $(
                pub const fn $field(&self) -> u32 {
                    Field::new($shift, $width).get(self.0)
                }
            )*

            paste::paste! {
                $(
                    pub fn [<set_ $field>](&mut self, value: u32) -> &mut Self {
                        self.0 = Field::new($shift, $width).set(self.0, value);
                        self
                    }
                )*
            }
        }
    };
}

register_fields! {
    /// SD_EMMC_CLOCK
    pub struct ClockReg {
        div: 0, 6;
        src: 6, 2;
        core_phase: 8, 2;
        tx_phase: 10, 2;
        rx_phase: 12, 2;
        tx_delay: 16, 4;
        rx_delay: 20, 4;
        always_on: 24, 1;
        irq_sdio_sleep: 25, 1;
    }
}

register_fields! {
    /// SD_EMMC_ADJUST
    pub struct AdjustReg {
        cmd_delay: 0, 4;
        ds_delay: 4, 4;
        cali_sel: 8, 4;
        cali_enable: 12, 1;
        adj_enable: 13, 1;
        cali_rise: 14, 1;
        ds_enable: 15, 1;
        adj_delay: 16, 6;
        adj_auto: 22, 1;
    }
}

register_fields! {
    /// SD_EMMC_CALOUT
    pub struct CalOutReg {
        cali_idx: 0, 6;
        cali_vld: 7, 1;
        // layout of the four auto-calibration words
        auto_idx: 24, 6;
        auto_count: 0, 24;
    }
}

register_fields! {
    /// SD_EMMC_START
    pub struct StartReg {
        init: 0, 1;
        busy: 1, 1;
        addr: 2, 30;
    }
}

register_fields! {
    /// SD_EMMC_CFG
    pub struct ConfigReg {
        bus_width: 0, 2;
        ddr: 2, 1;
        bl_len: 4, 4;
        resp_timeout: 8, 4;
        rc_cc: 12, 4;
        chk_ds: 20, 1;
        stop_clk: 22, 1;
        auto_clk: 23, 1;
    }
}

register_fields! {
    /// Input-level fields of SD_EMMC_STATUS; event bits live in `IrqStatus`.
    pub struct StatusReg {
        dat_i: 16, 8;
        cmd_i: 24, 1;
        ds: 25, 1;
        bus_fsm: 26, 4;
        desc_wr_rdy: 30, 1;
        core_busy: 31, 1;
    }
}

register_fields! {
    /// First word of a descriptor.
    pub struct CmdCfg {
        length: 0, 9;
        block_mode: 9, 1;
        r1b: 10, 1;
        end_of_chain: 11, 1;
        timeout: 12, 4;
        no_resp: 16, 1;
        no_cmd: 17, 1;
        data_io: 18, 1;
        data_wr: 19, 1;
        resp_nocrc: 20, 1;
        resp_128: 21, 1;
        resp_num: 22, 1;
        data_num: 23, 1;
        cmd_index: 24, 6;
        error: 30, 1;
        owner: 31, 1;
    }
}

/// Delay field of data line `line` in SD_EMMC_DELAY.
pub const fn delay_line(line: u32) -> Field {
    Field::new(line * 4, 4)
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    pub fn read_reg(&self, offset: u32) -> u32 {
        self.regs.read32(offset)
    }

    pub fn write_reg(&self, offset: u32, value: u32) {
        self.regs.write32(offset, value)
    }

    /// Read-modify-write of one register.
    pub(crate) fn modify_reg(&self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let val = self.read_reg(offset);
        self.write_reg(offset, f(val));
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_get_set() {
        let f = Field::new(16, 6);
        let reg = f.set(0xffff_ffff, 5);
        assert_eq!(f.get(reg), 5);
        assert_eq!(reg & 0xffff, 0xffff);
        assert_eq!(reg >> 22, 0x3ff);
        // value truncated to width
        assert_eq!(f.get(f.set(0, 0x7f)), 0x3f);
        assert_eq!(set_field(0, 4, 4, 9), 0x90);
        assert_eq!(get_field(0x90, 4, 4), 9);
    }

    #[test]
    fn generated_accessors_touch_only_their_bits() {
        let mut adj = AdjustReg(0);
        adj.set_adj_delay(0x2a).set_adj_enable(1).set_cali_sel(3);
        assert_eq!(adj.0, (0x2a << 16) | (1 << 13) | (3 << 8));
        assert_eq!(adj.adj_delay(), 0x2a);
        assert_eq!(adj.cali_enable(), 0);

        let mut cmd = CmdCfg(0);
        cmd.set_cmd_index(18).set_owner(1).set_end_of_chain(1).set_length(4);
        assert_eq!(cmd.cmd_index(), 18);
        assert_eq!(cmd.0 >> 31, 1);
        assert_eq!(cmd.end_of_chain(), 1);
        assert_eq!(cmd.length(), 4);

        let mut start = StartReg(0);
        start.set_busy(1).set_addr(0x1000_0000 >> 2);
        assert_eq!(start.0, 0x1000_0002);
    }

    #[test]
    fn delay_lines_are_packed_nibbles() {
        let mut reg = 0;
        for line in 0..8 {
            reg = delay_line(line).set(reg, line + 1);
        }
        assert_eq!(reg, 0x8765_4321);
        assert_eq!(delay_line(3).get(reg), 4);
    }
}
