//! Embassy tasks module
//!
//! Contains the async tasks for the firmware, organised by functionality.

pub mod control;
pub mod indicator;

pub use control::{control_task, initialise_radio, request_send, RX_EVENT, SEND_REQUESTS, WAKE};
pub use indicator::{IndicatorCommand, IndicatorReceiver, IndicatorSender, INDICATOR_CHANNEL};

#[cfg(feature = "embedded")]
pub use indicator::indicator_task;
