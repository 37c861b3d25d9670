//! Hardware and radio configuration constants for the ESP32-S3 with WIO-SX1262
//!
//! All values are fixed at initialisation; nothing here is runtime-mutable.

/// Activity indicator LED pin
pub mod led {
    pub const PIN: u8 = 48;
}

/// SPI pins for LoRa module
pub mod spi {
    pub const SCLK: u8 = 7;
    pub const MISO: u8 = 8;
    pub const MOSI: u8 = 9;
}

/// LoRa control pins
///
/// DIO1 is not owned by the driver: it is wired to the wake interrupt and
/// its only job is releasing the wake signal.
pub mod lora_pins {
    pub const NSS: u8 = 41;
    pub const DIO1: u8 = 39;
    pub const NRST: u8 = 42;
    pub const BUSY: u8 = 40;
}

/// TCXO configuration
pub mod tcxo {
    /// TCXO voltage code for SX1262 register (0x02 = 1.8V)
    pub const VOLTAGE_CODE: u8 = 0x02;
}

/// LoRa link parameters, fixed for this node's link budget
pub mod lora_defaults {
    /// AS923 ISM band frequency
    pub const FREQUENCY_HZ: u32 = 923_300_000;
    pub const SPREADING_FACTOR: u8 = 7;
    pub const BANDWIDTH_KHZ: u32 = 125;
    /// Coding rate 4/5
    pub const CODING_RATE: u8 = 5;
    pub const PREAMBLE_LENGTH: u16 = 8;
    pub const TX_POWER_DBM: i8 = 22;
    /// Hardware-enforced transmit timeout
    pub const TX_TIMEOUT_MS: u32 = 5_000;
    /// Symbol timeout for receive (0 = continuous preamble search)
    pub const RX_SYMBOL_TIMEOUT: u8 = 0;
}

/// Clear Channel Assessment parameters
pub mod cad {
    use super::lora_defaults::SPREADING_FACTOR;

    /// Number of symbols the radio listens for before reporting a result
    pub const DETECTION_SYMBOLS: u8 = 8;
    /// Peak detection threshold, derived from the spreading factor
    pub const DETECTION_PEAK: u8 = SPREADING_FACTOR + 13;
    /// Minimum detection threshold
    pub const DETECTION_MIN: u8 = 10;
    /// CAD hardware timeout (0 = none; the result always arrives via IRQ)
    pub const TIMEOUT_MS: u32 = 0;

    /// Maximum CAD attempts per send cycle, including the first
    pub const RETRY_MAX_ATTEMPTS: u8 = 3;
    /// Backoff before the second attempt; doubles per attempt
    pub const RETRY_BASE_MS: u64 = 300;
    /// Cap on the exponential backoff
    pub const RETRY_MAX_MS: u64 = 1_200;
}

/// Duty-cycle receive windows (receive-enabled postlude only)
///
/// Values follow Semtech AN1200.36: the radio sleeps for the long window and
/// wakes briefly to catch a preamble.
pub mod duty_cycle {
    pub const SLEEP_WINDOW_US: u32 = 32_000_000;
    pub const WAKE_WINDOW_US: u32 = 160_000;
}

/// Control task timing
pub mod control {
    /// Bound on the non-blocking wake re-arm performed after every handler
    pub const REARM_BOUND_MS: u64 = 10;
}
