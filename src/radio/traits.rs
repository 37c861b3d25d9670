//! Radio driver trait for abstraction and testability
//!
//! Defines the event-driven interface the control core consumes. Operations
//! that involve airtime (`start_cad`, `send`) only kick the hardware and
//! return; completion is reported later through [`Radio::process_irq`], the
//! deferred interrupt processor called from task context after a wake.

use crate::config::{cad, lora_defaults};
use core::future::Future;
use heapless::Vec;

/// Maximum payload the radio can deliver on receive
pub const MAX_RX_PAYLOAD: usize = 255;

/// Errors that can occur during radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Radio busy timeout
    BusyTimeout,
    /// SPI communication error
    SpiError,
    /// Invalid configuration
    InvalidConfig,
    /// Radio not initialised
    NotInitialised,
    /// Reception failed
    ReceiveFailed,
}

/// Power/activity state of the radio, tracked across driver calls.
///
/// Exactly one state is active at a time. Every event handler leaves the
/// radio in `Sleeping` (transmit-only policy) or `Receiving` (duty-cycle
/// policy) before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Sleeping,
    ConfiguringCad,
    AwaitingCadResult,
    Transmitting,
    Receiving,
}

/// Channel assessment result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadOutcome {
    /// No activity detected; the channel is free to transmit on
    Clear,
    /// Another transmitter is occupying the channel
    Busy,
}

/// Outcome of a completed radio operation, delivered by [`Radio::process_irq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Transmission completed successfully
    TxDone,
    /// A frame was received
    RxDone {
        data: Vec<u8, MAX_RX_PAYLOAD>,
        rssi: i16,
        snr: i8,
    },
    /// Transmission did not complete within the hardware timeout
    TxTimeout,
    /// Reception did not complete within the hardware timeout
    RxTimeout,
    /// Framing or CRC error on reception
    RxError,
    /// Channel assessment finished
    CadDone(CadOutcome),
}

/// Transmit configuration, fixed at initialisation
#[derive(Debug, Clone)]
pub struct TxConfig {
    pub frequency_hz: u32,
    pub tx_power_dbm: i8,
    pub bandwidth_khz: u32,
    pub spreading_factor: u8,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    pub preamble_length: u16,
    pub iq_inverted: bool,
    /// Hardware transmit timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            frequency_hz: lora_defaults::FREQUENCY_HZ,
            tx_power_dbm: lora_defaults::TX_POWER_DBM,
            bandwidth_khz: lora_defaults::BANDWIDTH_KHZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            coding_rate: lora_defaults::CODING_RATE,
            preamble_length: lora_defaults::PREAMBLE_LENGTH,
            iq_inverted: false,
            timeout_ms: lora_defaults::TX_TIMEOUT_MS,
        }
    }
}

/// Receive configuration, fixed at initialisation
#[derive(Debug, Clone)]
pub struct RxConfig {
    pub bandwidth_khz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub preamble_length: u16,
    /// Symbol timeout (0 = continuous preamble search)
    pub symbol_timeout: u8,
    pub iq_inverted: bool,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            bandwidth_khz: lora_defaults::BANDWIDTH_KHZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            coding_rate: lora_defaults::CODING_RATE,
            preamble_length: lora_defaults::PREAMBLE_LENGTH,
            symbol_timeout: lora_defaults::RX_SYMBOL_TIMEOUT,
            iq_inverted: false,
        }
    }
}

/// What the radio does once CAD completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadExitMode {
    /// Report the result and go to standby
    CadOnly,
    /// Enter receive when activity is detected
    CadRx,
}

/// Channel assessment parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadParams {
    /// Number of symbols to listen for (1, 2, 4, 8 or 16)
    pub symbols: u8,
    pub detection_peak: u8,
    pub detection_min: u8,
    pub exit_mode: CadExitMode,
    pub timeout_ms: u32,
}

impl Default for CadParams {
    fn default() -> Self {
        Self {
            symbols: cad::DETECTION_SYMBOLS,
            detection_peak: cad::DETECTION_PEAK,
            detection_min: cad::DETECTION_MIN,
            exit_mode: CadExitMode::CadOnly,
            timeout_ms: cad::TIMEOUT_MS,
        }
    }
}

/// Abstract radio driver interface
///
/// Allows the control core to run against either the real SX1262 hardware
/// driver or a mock implementation for testing.
pub trait Radio {
    /// Initialise the radio hardware
    fn init(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Put the radio into its lowest-power sleep mode
    fn sleep(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Put the radio into standby
    fn set_standby(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Tune the channel frequency
    fn set_channel(&mut self, frequency_hz: u32) -> impl Future<Output = Result<(), RadioError>>;

    /// Apply the transmit configuration
    fn set_tx_config(&mut self, config: &TxConfig) -> impl Future<Output = Result<(), RadioError>>;

    /// Apply the receive configuration
    fn set_rx_config(&mut self, config: &RxConfig) -> impl Future<Output = Result<(), RadioError>>;

    /// Configure channel assessment parameters
    fn set_cad_params(&mut self, params: &CadParams)
        -> impl Future<Output = Result<(), RadioError>>;

    /// Start channel assessment; the result arrives as [`RadioEvent::CadDone`]
    fn start_cad(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Start transmitting; completion arrives as `TxDone` or `TxTimeout`
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), RadioError>>;

    /// Arm duty-cycle receive: sleep for `sleep_us`, wake for `wake_us`
    fn set_rx_duty_cycle(
        &mut self,
        sleep_us: u32,
        wake_us: u32,
    ) -> impl Future<Output = Result<(), RadioError>>;

    /// Deferred interrupt processing: read and clear the pending hardware
    /// interrupt and translate it into at most one event.
    ///
    /// Must be called from task context after a wake, never from interrupt
    /// context. Returns `Ok(None)` on a spurious wake.
    fn process_irq(&mut self) -> impl Future<Output = Result<Option<RadioEvent>, RadioError>>;

    /// Current tracked radio state
    fn state(&self) -> RadioState;
}
