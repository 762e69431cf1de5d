//! One-latch-bounded count snapshots.

use crate::driver::LogicDriver;
use crate::err::CountError;
use crate::session::DeviceSession;

/// Counts from one hardware interval.
///
/// Counts are since the previous latch, not cumulative: taking two samples
/// in a row yields two disjoint intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// One count per configured coincidence group, in order
    pub coincidences: Vec<u32>,
    /// One count per configured singles channel, in order
    pub singles: Vec<u32>,
    /// Hardware ticks spanned by the interval
    pub ticks: u64,
}

/// The mask sets read out in every sample.
#[derive(Debug, Clone)]
pub struct SampleReader {
    pos_coincidence: Vec<u16>,
    pos_singles: Vec<u16>,
    neg_singles: Vec<u16>,
}

impl SampleReader {
    /// `neg_singles` holds either one gate mask, broadcast over every
    /// coincidence group, or exactly one per group. Anything else is a
    /// configuration mismatch, rejected here before any hardware call.
    pub fn new(
        pos_coincidence: Vec<u16>,
        pos_singles: Vec<u16>,
        neg_singles: Vec<u16>,
    ) -> Result<Self, CountError> {
        if neg_singles.len() != 1 && neg_singles.len() != pos_coincidence.len() {
            return Err(CountError::ConfigurationMismatch {
                pos: pos_coincidence.len(),
                neg: neg_singles.len(),
            });
        }
        Ok(SampleReader {
            pos_coincidence,
            pos_singles,
            neg_singles,
        })
    }

    /// Reader built from a run declaration's masks, with no gates declared
    /// anywhere falling back to the ungated broadcast mask
    pub fn from_run(run: &logictools::cfg::Run) -> Result<Self, CountError> {
        let pos_singles = run.singles_masks()?;
        let (pos_coincidence, neg_singles) = run.coincidence_masks()?;
        if neg_singles.is_empty() {
            return SampleReader::new(pos_coincidence, pos_singles, vec![0]);
        }
        SampleReader::new(pos_coincidence, pos_singles, neg_singles)
    }

    pub fn coincidences_len(&self) -> usize {
        self.pos_coincidence.len()
    }

    pub fn singles_len(&self) -> usize {
        self.pos_singles.len()
    }

    /// Latch the counters and read every configured pattern out of the
    /// frozen interval. Consumes the interval.
    pub fn read<D: LogicDriver>(
        &self,
        session: &mut DeviceSession<D>,
    ) -> Result<Sample, CountError> {
        let ticks = session.latch_and_read()?;
        let mut singles = Vec::with_capacity(self.pos_singles.len());
        for &pos in &self.pos_singles {
            singles.push(session.count(pos, 0)?);
        }
        let mut coincidences = Vec::with_capacity(self.pos_coincidence.len());
        for (i, &pos) in self.pos_coincidence.iter().enumerate() {
            let neg = if self.neg_singles.len() == 1 {
                self.neg_singles[0]
            } else {
                self.neg_singles[i]
            };
            coincidences.push(session.count(pos, neg)?);
        }
        Ok(Sample {
            coincidences,
            singles,
            ticks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDriver, SimSlice};

    const CH1: u16 = 0b01;
    const CH2: u16 = 0b10;

    #[test]
    fn mismatched_gate_list_is_rejected() {
        match SampleReader::new(vec![CH1 | CH2, CH1], vec![CH1], vec![0, 0, 0]) {
            Err(CountError::ConfigurationMismatch { pos: 2, neg: 3 }) => {}
            other => panic!("expected ConfigurationMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn broadcast_and_exact_gate_lists_are_accepted() {
        assert!(SampleReader::new(vec![CH1 | CH2, CH1], vec![CH1], vec![0]).is_ok());
        assert!(SampleReader::new(vec![CH1 | CH2, CH1], vec![CH1], vec![0, CH2]).is_ok());
        assert!(SampleReader::new(vec![], vec![CH1], vec![0]).is_ok());
    }

    #[test]
    fn reads_singles_then_gated_coincidences() {
        let script = vec![
            SimSlice::idle(0), // discarded by enable_logic_mode
            SimSlice::idle(100)
                .count(CH1, 0, 5)
                .count(CH2, 0, 3)
                .count(CH1 | CH2, 0, 2),
        ];
        let drv = SimDriver::new(5e-9, 16, script);
        let mut s = DeviceSession::open(drv).unwrap();
        s.enable_logic_mode().unwrap();

        let reader =
            SampleReader::new(vec![CH1 | CH2], vec![CH1, CH2], vec![0]).unwrap();
        let sample = reader.read(&mut s).unwrap();
        assert_eq!(sample.singles, vec![5, 3]);
        assert_eq!(sample.coincidences, vec![2]);
        assert_eq!(sample.ticks, 100);
    }

    #[test]
    fn consecutive_reads_consume_disjoint_intervals() {
        let script = vec![
            SimSlice::idle(0),
            SimSlice::idle(50).count(CH1, 0, 5),
            SimSlice::idle(70).count(CH1, 0, 7),
        ];
        let drv = SimDriver::new(5e-9, 16, script);
        let mut s = DeviceSession::open(drv).unwrap();
        s.enable_logic_mode().unwrap();

        let reader = SampleReader::new(vec![], vec![CH1], vec![0]).unwrap();
        let first = reader.read(&mut s).unwrap();
        let second = reader.read(&mut s).unwrap();
        assert_eq!(first.singles, vec![5]);
        assert_eq!(first.ticks, 50);
        assert_eq!(second.singles, vec![7]);
        assert_eq!(second.ticks, 70);
    }
}
