//! CRC16/MODBUS (poly 0xA001 reflected, init 0xFFFF)

const SEED: u16 = 0xFFFF;
const POLY: u16 = 0xA001;

/// Compute the MODBUS CRC16 of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = SEED;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Check the trailing little-endian CRC of a complete frame.
pub fn validate(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    crc16(body) == u16::from_le_bytes([tail[0], tail[1]])
}

/// Return `bytes` followed by its CRC (LSB first).
pub fn append(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.extend_from_slice(bytes);
    out.extend_from_slice(&crc16(bytes).to_le_bytes());
    out
}
