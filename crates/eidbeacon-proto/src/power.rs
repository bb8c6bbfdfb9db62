//! Supported radio transmit powers and calibrated ranging data.
//!
//! Each supported transmit power has a measured received power at 0 m. The
//! two tables share an index: `CALIBRATED_RANGING[i]` is the ranging byte to
//! broadcast while transmitting at `SUPPORTED_TX_POWER[i]`.

/// Transmit powers the radio accepts, in dBm, strongest first.
pub const SUPPORTED_TX_POWER: [i8; 9] = [4, 3, 0, -4, -8, -12, -16, -20, -40];

/// Received power at 0 m for each entry of [`SUPPORTED_TX_POWER`], in dBm.
pub const CALIBRATED_RANGING: [i8; 9] = [-5, -7, -9, -14, -19, -24, -29, -39, -49];

/// Whether the radio supports `dbm` exactly.
#[must_use]
pub fn is_supported(dbm: i8) -> bool {
    SUPPORTED_TX_POWER.contains(&dbm)
}

/// Ranging byte for a supported transmit power.
///
/// Returns `None` for unsupported powers.
#[must_use]
pub fn ranging_for(dbm: i8) -> Option<i8> {
    SUPPORTED_TX_POWER.iter().position(|&p| p == dbm).map(|i| CALIBRATED_RANGING[i])
}
