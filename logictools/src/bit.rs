//! Bitmask encoding for channel patterns
//!
//! The card gates counts with 16-bit masks: channel `c` occupies bit
//! `c - 1`, and a group of channels is the union of its members' bits.
//! Masks for disjoint groups therefore add without aliasing; duplicate
//! channels within one group are a configuration error caught by
//! [`crate::cfg::Run::validate`] before anything is encoded.

use bit_iter::BitIter;
use thiserror::Error;

/// Highest channel representable in a [`u16`] mask.
pub const MAX_CHANNEL: u8 = 16;

/// Channel id that cannot be encoded into a mask.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid channel {0}: channels are numbered 1-{MAX_CHANNEL}")]
pub struct InvalidChannel(pub u8);

/// Convert one channel into its bitmask
pub fn chan_to_mask(ch: u8) -> Result<u16, InvalidChannel> {
    if ch < 1 || ch > MAX_CHANNEL {
        return Err(InvalidChannel(ch));
    }
    Ok(1 << (ch - 1))
}

/// Convert a group of channels into one bitmask
pub fn chans_to_mask(chs: &[u8]) -> Result<u16, InvalidChannel> {
    let mut m = 0;
    for &ch in chs {
        m |= chan_to_mask(ch)?;
    }
    Ok(m)
}

/// Returns all channels in a mask, ascending
pub fn mask_to_chans(m: u16) -> Vec<u8> {
    // Channels are 1-indexed, bits are 0-indexed
    BitIter::from(m).map(|b| 1 + b as u8).collect()
}

/// Returns the channel if the mask holds exactly one
pub fn mask_to_single(m: u16) -> Option<u8> {
    match m.count_ones() {
        1 => mask_to_chans(m).first().copied(),
        _ => None,
    }
}

/// Returns the channels if the mask holds exactly two
pub fn mask_to_pair(m: u16) -> Option<(u8, u8)> {
    match m.count_ones() {
        2 => {
            let chs = mask_to_chans(m);
            Some((chs[0], chs[1]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CHAN16;

    #[test]
    fn single_channel_masks() {
        for ch in CHAN16 {
            assert_eq!(chan_to_mask(ch), Ok(1u16 << (ch - 1)));
        }
        assert_eq!(chan_to_mask(1), Ok(0b01));
        assert_eq!(chan_to_mask(2), Ok(0b10));
        assert_eq!(chans_to_mask(&[1, 2]), Ok(0b11));
        assert_eq!(chans_to_mask(&[16]), Ok(0x8000));
        assert_eq!(chans_to_mask(&[]), Ok(0));
    }

    #[test]
    fn out_of_range_channels() {
        assert_eq!(chan_to_mask(0), Err(InvalidChannel(0)));
        assert_eq!(chan_to_mask(17), Err(InvalidChannel(17)));
        assert_eq!(chans_to_mask(&[1, 2, 0]), Err(InvalidChannel(0)));
        assert_eq!(chans_to_mask(&[1, 255]), Err(InvalidChannel(255)));
    }

    #[test]
    fn disjoint_groups_add() {
        // Pairwise over all single channels
        for a in 1..=MAX_CHANNEL {
            for b in (a + 1)..=MAX_CHANNEL {
                let ma = chan_to_mask(a).unwrap();
                let mb = chan_to_mask(b).unwrap();
                assert_eq!(chans_to_mask(&[a, b]).unwrap(), ma + mb);
            }
        }
        // And over some larger disjoint groups
        let g1 = [1u8, 4, 9];
        let g2 = [2u8, 3, 16];
        let m1 = chans_to_mask(&g1).unwrap();
        let m2 = chans_to_mask(&g2).unwrap();
        let mut both = g1.to_vec();
        both.extend_from_slice(&g2);
        assert_eq!(chans_to_mask(&both).unwrap(), m1 + m2);
    }

    #[test]
    fn bijective_channel_masks() {
        // Exhaustively check all u16s
        for pat in u16::MIN..=u16::MAX {
            let chs = mask_to_chans(pat);
            assert!(!chs.contains(&0));
            assert_eq!(chans_to_mask(&chs), Ok(pat));
            match pat.count_ones() {
                1 => {
                    assert_eq!(mask_to_single(pat), Some(chs[0]));
                    assert_eq!(mask_to_pair(pat), None);
                }
                2 => {
                    assert_eq!(mask_to_single(pat), None);
                    assert_eq!(mask_to_pair(pat), Some((chs[0], chs[1])));
                }
                _ => {
                    assert_eq!(mask_to_single(pat), None);
                    assert_eq!(mask_to_pair(pat), None);
                }
            }
        }
    }
}
