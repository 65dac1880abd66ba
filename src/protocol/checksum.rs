//! Frame checksum algorithms.
//!
//! The algorithm is a configuration point of the framing codec. `Crc16` is the
//! one the pump family uses on the wire; the 8-bit variants exist for
//! firmware that frames with a single checksum byte.

/// Checksum algorithm applied to the frame body (command code + payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    /// XOR of all body bytes, 1 byte on the wire.
    Xor8,
    /// Sum of all body bytes modulo 256, 1 byte on the wire.
    Sum8,
    /// CRC-16/CCITT (polynomial 0x1021, initial value 0), 2 bytes on the wire.
    #[default]
    Crc16,
}

impl Checksum {
    /// Number of bytes the checksum occupies on the wire.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Xor8 | Self::Sum8 => 1,
            Self::Crc16 => 2,
        }
    }

    /// Computes the checksum over `data`.
    #[must_use]
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            Self::Xor8 => u16::from(data.iter().fold(0u8, |acc, &b| acc ^ b)),
            Self::Sum8 => u16::from(data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))),
            Self::Crc16 => crc16(data),
        }
    }
}

/// Byte-wise CRC-16/CCITT without lookup table.
fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &b| {
        let mut crc = crc.rotate_left(8) ^ u16::from(b);
        crc ^= (crc & 0xff) >> 4;
        crc ^= crc << 12;
        crc ^ ((crc & 0xff) << 5)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_known_check_values() {
        assert_eq!(Checksum::Crc16.compute(CHECK), 0x31C3);
        assert_eq!(Checksum::Xor8.compute(CHECK), 0x31);
        assert_eq!(Checksum::Sum8.compute(CHECK), 0xDD);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(Checksum::Crc16.compute(&[]), 0);
        assert_eq!(Checksum::Xor8.compute(&[]), 0);
        assert_eq!(Checksum::Sum8.compute(&[]), 0);
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let body = [0x42, 0xF2, 0x01, 0x18, 0x0A, 0x0C, 0x08, 0x1E, 0x00, 0x00, 0x64];
        for algo in [Checksum::Xor8, Checksum::Sum8, Checksum::Crc16] {
            let reference = algo.compute(&body);
            for byte in 0..body.len() {
                for bit in 0..8 {
                    let mut flipped = body;
                    flipped[byte] ^= 1 << bit;
                    assert_ne!(
                        algo.compute(&flipped),
                        reference,
                        "{algo:?} missed flip at byte {byte} bit {bit}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_width() {
        assert_eq!(Checksum::Xor8.width(), 1);
        assert_eq!(Checksum::Crc16.width(), 2);
        assert_eq!(Checksum::default(), Checksum::Crc16);
    }
}
