//! Certificate serial numbers.

use super::error::CaError;
use rand::RngCore;
use rand::rngs::OsRng;

/// Serial numbers are 128-bit values.
pub const SERIAL_LEN: usize = 16;

/// Draw a fresh serial number from the operating system's random source.
///
/// The value is treated as an unsigned integer; the DER encoder adds a
/// leading zero octet when the high bit is set.
pub fn random_serial() -> Result<[u8; SERIAL_LEN], CaError> {
    let mut serial = [0u8; SERIAL_LEN];
    OsRng
        .try_fill_bytes(&mut serial)
        .map_err(|e| CaError::SerialNumber(e.to_string()))?;

    // An all-zero draw means the source is broken, and zero is not a valid serial.
    if serial.iter().all(|b| *b == 0) {
        return Err(CaError::SerialNumber(
            "random source returned all zero bytes".to_string(),
        ));
    }

    Ok(serial)
}

/// Render a serial as lowercase hex for logs and audit events.
pub fn serial_hex(serial: &[u8]) -> String {
    serial.iter().map(|b| format!("{b:02x}")).collect()
}
