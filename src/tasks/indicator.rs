//! Activity indicator task
//!
//! Drives the board LED without blocking the control task. The LED is on
//! while a radio operation is in flight and off while the node sleeps, so a
//! lit LED directly reflects time spent out of deep sleep.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

/// Requested indicator level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCommand {
    /// Radio activity started
    On,
    /// Radio idle, back to sleep
    Off,
}

/// Type alias for the indicator channel sender
pub type IndicatorSender = Sender<'static, CriticalSectionRawMutex, IndicatorCommand, 4>;

/// Type alias for the indicator channel receiver
pub type IndicatorReceiver = Receiver<'static, CriticalSectionRawMutex, IndicatorCommand, 4>;

/// Type alias for the indicator channel itself
pub type IndicatorChannel = Channel<CriticalSectionRawMutex, IndicatorCommand, 4>;

/// Channel for indicator level changes
pub static INDICATOR_CHANNEL: IndicatorChannel = Channel::new();

/// Task that drives the activity LED (active low).
#[cfg(feature = "embedded")]
pub async fn indicator_task(mut led: esp_hal::gpio::Output<'static>, receiver: IndicatorReceiver) {
    loop {
        match receiver.receive().await {
            IndicatorCommand::On => led.set_low(),
            IndicatorCommand::Off => led.set_high(),
        }
    }
}
