//! Page-seeded CRC16 used by account records
//!
//! The register update is CRC-16/ARC (reflected polynomial 0xA001). The
//! register starts at the page number the record lives on, so a record copied
//! to a different page no longer validates. Records store the one's
//! complement of the CRC little-endian; running the CRC across the data and
//! the stored bytes leaves [`CRC16_RESIDUE`] in the register.

use crc::{Crc, CRC_16_ARC};

/// Register value after folding a valid stored CRC back in
pub const CRC16_RESIDUE: u16 = 0xB001;

static ARC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// CRC16 over `data` with the register seeded to `seed`
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    // digest_with_initial reflects its argument for reflected algorithms
    let mut digest = ARC.digest_with_initial(seed.reverse_bits());
    digest.update(data);
    digest.finalize()
}

/// One's complement of the CRC, little-endian, as stored in a record
pub fn stored_crc(seed: u16, data: &[u8]) -> [u8; 2] {
    (!crc16(seed, data)).to_le_bytes()
}

/// True if `data` ends with a stored CRC that validates under `seed`
pub fn validates(seed: u16, data: &[u8]) -> bool {
    crc16(seed, data) == CRC16_RESIDUE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_check_value() {
        assert_eq!(crc16(0, b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_seed_changes_result() {
        let data = [0x1D, 0x01, 0x02, 0x03];
        assert_ne!(crc16(0, &data), crc16(8, &data));
    }

    #[test]
    fn test_stored_crc_leaves_residue() {
        for page in 0u16..16 {
            let mut buf = vec![0x1D, 0x01, 0x8B, 0x48, 0x10, 0x27, 0x00];
            let crc = stored_crc(page, &buf);
            buf.extend_from_slice(&crc);
            assert!(validates(page, &buf), "page {}", page);
            assert!(!validates(page ^ 1, &buf));
        }
    }
}
