//! Per line delay calibration.
//!
//! Each data line is stepped through its delay taps while a fixed pattern
//! is read back. The controller reports a calibration index per read; the
//! tap at which the index moves past the line's base index measures the
//! line's skew. Lines are then padded so that all of them sample at the
//! same point.

use log::{debug, error, info, warn};

use super::cmd::{MmcCommand, MmcData, MmcRequest};
use super::constant::*;
use super::dma::DmaOps;
use super::regs::{AdjustReg, CalOutReg, ClockReg, RegisterIo, delay_line};
use super::{ChipFamily, SdEmmcHost};
use crate::constant::*;
use crate::err::SdError;

/// Whether `value` lies past `base`, allowing for a base sitting at the
/// top index where the next index wraps to a smaller value.
pub(crate) fn is_larger(value: u8, base: u8, wrap: u8) -> bool {
    value > base || (value < base && base == wrap)
}

/// Per line results of one calibration round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CaliData {
    pub base_index: [u8; CALI_DATA_LINES],
    pub ln_delay: [u8; CALI_DATA_LINES],
    pub base_index_min: u8,
    pub base_index_max: u8,
}

impl CaliData {
    pub fn new(max_index: u8) -> Self {
        Self {
            base_index: [0; CALI_DATA_LINES],
            ln_delay: [0; CALI_DATA_LINES],
            base_index_min: max_index.saturating_add(1),
            base_index_max: 0,
        }
    }

    fn record_base(&mut self, line: usize, base: u8) {
        self.base_index[line] = base;
        self.base_index_min = self.base_index_min.min(base);
        self.base_index_max = self.base_index_max.max(base);
    }
}

/// Base index candidates seen during the first tap of the index strategy.
#[derive(Debug, Default)]
struct BaseVote {
    seen: u8,
    first: (u8, u8),
    other: (u8, u8),
}

impl BaseVote {
    fn add(&mut self, sample: u8) {
        self.seen += 1;
        if self.seen == 1 {
            self.first = (sample, 1);
        } else if sample == self.first.0 {
            self.first.1 += 1;
        } else {
            self.other = (sample, self.other.1 + 1);
        }
    }

    fn winner(&self) -> u8 {
        if self.other.1 > self.first.1 {
            self.other.0
        } else {
            self.first.0
        }
    }
}

/// Combine per line results into a DELAY word for the lines of the bus.
///
/// Fails when the spread between the earliest and latest line is too large
/// to pad out. May lower `base_index_max` when the base indexes wrap.
pub(crate) fn cali_find(
    data: &mut CaliData,
    lines: usize,
    max_index: u8,
    step: i64,
) -> Result<u32, SdError> {
    let lines = lines.min(CALI_DATA_LINES);
    let max_index = max_index as i64;
    let base_max = data.base_index_max as i64;
    let mut cal = [0i64; CALI_DATA_LINES];

    for line in 0..lines {
        if data.ln_delay[line] as i64 * step > 1000 {
            data.ln_delay[line] = (1000 / step) as u8;
        }
        let taps = data.ln_delay[line] as i64 * step;
        let base = data.base_index[line] as i64;

        cal[line] = if base == max_index {
            (max_index + 1) * 1000 - taps
        } else if base_max == max_index && base != max_index - 1 && base != max_index - 2 {
            ((base + 1) % (max_index + 1) + max_index + 1) * 1000 - taps
        } else {
            (base + 1) % (max_index + 1) * 1000 - taps
        };
        info!(
            "delay[{}]={:5} padding={:2}, bidx={}",
            line, cal[line], data.ln_delay[line], base
        );
    }

    let used = &cal[..lines];
    let mut max_cal = used.iter().copied().max().unwrap_or(0);
    let min_cal = used.iter().copied().min().unwrap_or(0);
    info!("calibration result: max({}), min({})", max_cal, min_cal);
    if max_cal - min_cal >= CALI_SPREAD_LIMIT {
        return Err(SdError::CalibrationFailed);
    }

    if data.base_index_max as i64 == max_index && data.base_index_min == 0 {
        data.base_index_max = 0;
    }
    max_cal = max_cal.max(data.base_index_max as i64 * 1000);

    let mut word = 0;
    for (line, c) in used.iter().enumerate() {
        let pad = ((max_cal - c) / step).clamp(0, 15) as u32;
        word = delay_line(line as u32).set(word, pad);
    }
    debug!("line delay {:#010x}, max {}", word, max_cal);
    Ok(word)
}

impl<R: RegisterIo, D: DmaOps> SdEmmcHost<R, D> {
    /// Run delay calibration with the strategy the chip supports. On
    /// failure the configured default delays are written.
    ///
    /// Returns the adjust point derived from the highest base index.
    pub fn calibrate(&self) -> Result<u32, SdError> {
        let auto = self.config.chip.has_auto_calibration();
        self.execute_calibration(auto).inspect_err(|_| {
            warn!("calibration failed, default delay {:#010x}", self.config.default_delay());
            self.write_reg(SD_EMMC_DELAY, self.config.default_delay());
        })
    }

    pub(crate) fn execute_calibration(&self, auto: bool) -> Result<u32, SdError> {
        let saved_div = ClockReg(self.read_reg(SD_EMMC_CLOCK)).div();
        if auto {
            self.set_clock_div(CALI_AUTO_DIV);
        }
        let max_index = ClockReg(self.read_reg(SD_EMMC_CLOCK)).div().saturating_sub(1) as u8;
        let lines = self.timing.lock().bus_width as usize;
        let step = self.config.chip.delay_step();

        let mut result = Err(SdError::CalibrationFailed);
        for round in 0..=MAX_CALI_RETRY {
            info!("trying cali {}-th time(s)", round);
            let mut data = CaliData::new(max_index);

            self.set_tuning(true);
            let swept = if auto {
                self.cali_auto(&mut data, lines, max_index)
            } else {
                self.cali_index(&mut data, lines, max_index)
            };
            self.set_tuning(false);

            if let Err(line) = swept {
                error!("no valid line delay on line {}", line);
                continue;
            }
            match cali_find(&mut data, lines, max_index, step) {
                Ok(word) => {
                    self.write_reg(SD_EMMC_DELAY, word);
                    info!(
                        "calibration ok after {} retries, base index max {} min {}",
                        round, data.base_index_max, data.base_index_min
                    );
                    result = Ok(data.base_index_max as u32 + 2);
                    break;
                }
                Err(_) => warn!("line spread too large"),
            }
        }

        if auto {
            self.set_clock_div(saved_div);
        }
        if result.is_ok() && !auto && self.config.chip == ChipFamily::Gxbb {
            let mut adj = AdjustReg(self.read_reg(SD_EMMC_ADJUST));
            adj.set_cmd_delay(7);
            self.write_reg(SD_EMMC_ADJUST, adj.0);
        }
        if result.is_err() {
            error!("calibration failed, use default");
        }
        result
    }

    /// Read the calibration pattern once with `line` under test.
    fn cali_transfer(&self, line: u32) {
        self.xfer.lock().cali_line = Some(line);
        let req = MmcRequest::new(MmcCommand::new(
            MMC_READ_MULTIPLE_BLOCK,
            CALI_PATTERN_OFFSET,
            MMC_RSP_R1,
        ))
        .with_data(MmcData::read(512, CALI_BLK_CNT))
        .with_stop();
        if let Err(e) = self.wait_for_req(req).and_then(|done| done.result) {
            debug!("cali read on line {}: {}", line, e);
        }
        self.xfer.lock().cali_line = None;

        self.modify_reg(SD_EMMC_ADJUST, |v| {
            let mut adj = AdjustReg(v);
            adj.set_cali_enable(0).set_cali_sel(0);
            adj.0
        });
    }

    /// Strategy reading index and hit count straight from CALOUT.
    fn cali_auto(&self, data: &mut CaliData, lines: usize, max_index: u8) -> Result<(), usize> {
        for line in 0..lines {
            let mut found = None;

            for tap in 0..MAX_DELAY_CNT {
                self.write_reg(SD_EMMC_DELAY, delay_line(line as u32).set(0, tap));
                self.cali_transfer(line as u32);

                let best = (0..CALOUT_WORDS)
                    .map(|i| CalOutReg(self.read_reg(SD_EMMC_CALOUT + i * 4)))
                    .fold(CalOutReg(0), |best, w| {
                        if w.auto_count() > best.auto_count() {
                            w
                        } else {
                            best
                        }
                    });
                let idx = best.auto_idx() as u8;

                if tap == 0 {
                    data.record_base(line, idx);
                }
                if is_larger(idx, data.base_index[line], max_index) {
                    found = Some(tap);
                    break;
                }
            }
            debug!("line {} base {} moved at {:?}", line, data.base_index[line], found);

            data.ln_delay[line] = found.ok_or(line)? as u8;
        }
        Ok(())
    }

    /// Strategy taking several reads per tap and voting on the base index.
    fn cali_index(&self, data: &mut CaliData, lines: usize, max_index: u8) -> Result<(), usize> {
        for line in 0..lines {
            let mut vote = BaseVote::default();
            let mut have_base = false;
            let mut found = None;

            for tap in 0..MAX_DELAY_CNT {
                self.write_reg(SD_EMMC_DELAY, delay_line(line as u32).set(0, tap));
                let mut larger = 0;

                for read in 0..CALI_READS_PER_TAP {
                    self.cali_transfer(line as u32);
                    let out = CalOutReg(self.read_reg(SD_EMMC_CALOUT));
                    let sample = if out.cali_vld() == 1 {
                        out.cali_idx() as u8
                    } else {
                        CALI_INVALID
                    };

                    if sample == CALI_INVALID {
                        warn!("no valid index on line {} read {}", line, read);
                    } else if !have_base {
                        vote.add(sample);
                    } else if is_larger(sample, data.base_index[line], max_index) {
                        larger += 1;
                    }
                }

                if !have_base {
                    have_base = true;
                    data.record_base(line, vote.winner());
                } else if larger == CALI_READS_PER_TAP {
                    found = Some(tap);
                    break;
                }
            }
            debug!("line {} base {} moved at {:?}", line, data.base_index[line], found);

            data.ln_delay[line] = found.ok_or(line)? as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_handles_wrap_at_top_index() {
        assert!(is_larger(5, 4, 9));
        assert!(!is_larger(4, 4, 9));
        assert!(!is_larger(3, 4, 9));
        // base at the top: any smaller index has wrapped
        assert!(is_larger(0, 9, 9));
        assert!(!is_larger(9, 9, 9));
    }

    #[test]
    fn vote_prefers_strictly_more_frequent() {
        let mut v = BaseVote::default();
        for s in [3, 4, 4, 3] {
            v.add(s);
        }
        assert_eq!(v.winner(), 3);

        let mut v = BaseVote::default();
        for s in [3, 4, 4, 4] {
            v.add(s);
        }
        assert_eq!(v.winner(), 4);
    }

    #[test]
    fn equal_lines_need_no_padding() {
        let mut d = CaliData::new(9);
        for line in 0..4 {
            d.record_base(line, 3);
            d.ln_delay[line] = 2;
        }
        let word = cali_find(&mut d, 4, 9, 200).unwrap();
        assert_eq!(word, 0);
    }

    #[test]
    fn slower_line_pads_the_others() {
        // line 1 moved one tap later than the rest
        let mut d = CaliData::new(9);
        for line in 0..4 {
            d.record_base(line, 3);
            d.ln_delay[line] = 3;
        }
        d.ln_delay[1] = 2;
        let word = cali_find(&mut d, 4, 9, 200).unwrap();
        // cal: 4000 - 600 = 3400, line 1 3600; others padded by 1 tap
        assert_eq!(delay_line(0).get(word), 1);
        assert_eq!(delay_line(1).get(word), 0);
        assert_eq!(delay_line(2).get(word), 1);
        assert_eq!(delay_line(3).get(word), 1);
        assert_eq!(word >> 16, 0);
    }

    #[test]
    fn base_index_floor_raises_reference() {
        let mut d = CaliData::new(9);
        d.record_base(0, 5);
        d.ln_delay[0] = 5;
        // cal = 6000 - 1000 = 5000, floor 5 * 1000 matches, no padding
        assert_eq!(cali_find(&mut d, 1, 9, 200).unwrap(), 0);

        let mut d = CaliData::new(9);
        d.record_base(0, 5);
        d.ln_delay[0] = 10;
        // taps clamped to 5, same as above
        assert_eq!(cali_find(&mut d, 1, 9, 200).unwrap(), 0);
        assert_eq!(d.ln_delay[0], 5);
    }

    #[test]
    fn wide_spread_fails() {
        let mut d = CaliData::new(9);
        d.record_base(0, 1);
        d.record_base(1, 4);
        assert_eq!(
            cali_find(&mut d, 2, 9, 200),
            Err(SdError::CalibrationFailed)
        );
    }

    #[test]
    fn wrapped_base_is_lifted_a_full_turn() {
        // base max at top index: low bases count as one turn later
        let mut d = CaliData::new(4);
        d.record_base(0, 4);
        d.record_base(1, 0);
        let word = cali_find(&mut d, 2, 4, 200).unwrap();
        // cal0 = 5000, cal1 = (1 + 5) * 1000 = 6000; max and min swap drops floor
        assert_eq!(d.base_index_max, 0);
        assert_eq!(delay_line(0).get(word), 5);
        assert_eq!(delay_line(1).get(word), 0);
    }
}
