//! CRC-32/MPEG-2 section validation and the bad-section recovery ring.

use bytes::Bytes;
use crc::{CRC_32_MPEG_2, Crc};

use crate::constants::GARBAGE_RING_LEN;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Computes the CRC-32 (poly 0x04C11DB7, init 0xFFFFFFFF, unreflected)
/// over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    CRC.checksum(data)
}

/// Verifies a full section: the trailing 4 bytes are the big-endian CRC of
/// everything before them. Sections shorter than the trailer never verify.
pub fn verify(section: &[u8]) -> bool {
    if section.len() < 4 {
        return false;
    }
    let (body, trailer) = section.split_at(section.len() - 4);
    let Ok(trailer) = <[u8; 4]>::try_from(trailer) else { return false };
    CRC.checksum(body) == u32::from_be_bytes(trailer)
}

/// Bounded ring of raw copies of sections that failed CRC. Repeated
/// receptions of the same damaged section let a per-bit majority vote
/// reconstruct the original; the reconstruction is only used if it
/// passes CRC itself.
#[derive(Default)]
pub struct GarbageRing {
    ring: Vec<Bytes>,
}

impl GarbageRing {
    pub fn push(&mut self, raw: Bytes) {
        if self.ring.len() == GARBAGE_RING_LEN {
            self.ring.remove(0);
        }
        self.ring.push(raw);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Majority vote over the retained copies. Needs at least three copies
    /// of identical length; returns the voted section only when it
    /// verifies.
    pub fn recover(&self) -> Option<Bytes> {
        let len = self.ring.last()?.len();
        let same: Vec<&Bytes> = self.ring.iter().filter(|b| b.len() == len).collect();
        if same.len() < 3 {
            return None;
        }

        let mut voted = vec![0u8; len];
        for (i, out) in voted.iter_mut().enumerate() {
            for bit in 0..8 {
                let ones = same.iter().filter(|b| b[i] & (1 << bit) != 0).count();
                if ones * 2 > same.len() {
                    *out |= 1 << bit;
                }
            }
        }

        if verify(&voted) { Some(Bytes::from(voted)) } else { None }
    }
}

/// Appends the correct trailer to `body`. Test fixture helper.
#[cfg(test)]
pub(crate) fn seal(body: &[u8]) -> Vec<u8> {
    let mut v = body.to_vec();
    v.extend_from_slice(&checksum(body).to_be_bytes());
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sealed_sections() {
        let sec = seal(&[0x00, 0xB0, 0x0D, 0x04, 0xD2, 0xC1, 0x00, 0x00]);
        assert!(verify(&sec));
    }

    #[test]
    fn rejects_any_single_bit_flip() {
        let sec = seal(&[0x42, 0x13, 0x37, 0x00, 0xFF]);
        for byte in 0..sec.len() - 4 {
            for bit in 0..8 {
                let mut bad = sec.clone();
                bad[byte] ^= 1 << bit;
                assert!(!verify(&bad), "flip at {byte}:{bit} slipped through");
            }
        }
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(!verify(&[]));
        assert!(!verify(&[0x12, 0x34, 0x56]));
    }

    #[test]
    fn majority_vote_recovers_from_disjoint_errors() {
        let good = seal(&[0x40, 0xF0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let mut a = good.clone();
        let mut b = good.clone();
        let mut c = good.clone();
        a[0] ^= 0x01;
        b[3] ^= 0x80;
        c[5] ^= 0x10;

        let mut ring = GarbageRing::default();
        ring.push(Bytes::from(a));
        ring.push(Bytes::from(b));
        ring.push(Bytes::from(c));
        assert_eq!(ring.recover().as_deref(), Some(&good[..]));
    }

    #[test]
    fn vote_needs_three_copies() {
        let good = seal(&[1, 2, 3, 4]);
        let mut bad = good.clone();
        bad[0] ^= 4;
        let mut ring = GarbageRing::default();
        ring.push(Bytes::from(bad.clone()));
        ring.push(Bytes::from(bad));
        assert!(ring.recover().is_none());
    }
}
