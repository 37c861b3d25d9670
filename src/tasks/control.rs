//! Control task
//!
//! The single task that owns the radio. It parks on the wake signal, and on
//! each wake runs deferred interrupt processing, dispatches the resulting
//! event, and services queued send requests. All radio I/O happens here, in
//! task context; the interrupt handler only raises [`WAKE`].
//!
//! The task never terminates: radio errors are logged, the radio is put back
//! to sleep on a best-effort basis, and the loop re-arms for the next wake.

use crate::channel_access::ChannelAccessController;
use crate::config::lora_defaults;
use crate::events::{DispatchOutcome, EventDispatcher, PostludePolicy, RxNotify};
use crate::frame::SensorReport;
use crate::radio::traits::{Radio, RadioError, RxConfig, TxConfig};
use crate::tasks::indicator::INDICATOR_CHANNEL;
use crate::wake::WakeSignal;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_deadline, Duration, Instant, Timer};

/// Raised by the radio interrupt handler and by [`request_send`]; the only
/// thing the control task suspends on.
pub static WAKE: WakeSignal = WakeSignal::new();

/// Signalled once per completed receive, for consumers outside the control
/// task.
pub static RX_EVENT: RxNotify = RxNotify::new();

/// Queued send requests from application tasks
pub static SEND_REQUESTS: Channel<CriticalSectionRawMutex, SensorReport, 4> = Channel::new();

/// Delay before re-attempting radio initialisation after a failure
const INIT_RETRY_DELAY_MS: u64 = 5000;

/// Queue a sensor report for transmission and wake the control task.
///
/// Safe to call from any task. Returns `false` when the queue is full and
/// the report was dropped.
pub fn request_send(report: SensorReport) -> bool {
    let accepted = SEND_REQUESTS.try_send(report).is_ok();
    if accepted {
        WAKE.nudge();
    } else {
        log::warn!("send queue full, report dropped");
    }
    accepted
}

/// Bring the radio from power-on to its configured low-power state.
///
/// Channel, transmit and receive configuration are applied once here and
/// never change at runtime.
pub async fn initialise_radio<R: Radio>(
    radio: &mut R,
    policy: PostludePolicy,
) -> Result<(), RadioError> {
    radio.init().await?;
    radio.set_channel(lora_defaults::FREQUENCY_HZ).await?;
    radio.set_tx_config(&TxConfig::default()).await?;
    radio.set_rx_config(&RxConfig::default()).await?;

    match policy {
        PostludePolicy::Sleep => radio.sleep().await?,
        PostludePolicy::RxDutyCycle { sleep_us, wake_us } => {
            radio.set_rx_duty_cycle(sleep_us, wake_us).await?
        }
    }

    log::info!(
        "radio initialised: {}Hz, SF{}, {}dBm",
        lora_defaults::FREQUENCY_HZ,
        lora_defaults::SPREADING_FACTOR,
        lora_defaults::TX_POWER_DBM
    );
    Ok(())
}

/// Best-effort recovery after a radio error: drop any pending channel
/// assessment, switch the indicator off and try to reach the sleep state.
async fn recover<R: Radio>(radio: &mut R, access: &mut ChannelAccessController) {
    access.abandon();
    let _ = INDICATOR_CHANNEL
        .sender()
        .try_send(crate::tasks::indicator::IndicatorCommand::Off);
    if let Err(e) = radio.sleep().await {
        log::error!("recovery sleep failed: {:?}", e);
    }
}

/// Main control loop. Owns the radio for the lifetime of the firmware.
pub async fn control_task<R: Radio>(mut radio: R, policy: PostludePolicy) {
    WAKE.init();

    let mut access = ChannelAccessController::new(&WAKE, INDICATOR_CHANNEL.sender());
    let mut dispatcher =
        EventDispatcher::new(policy, &WAKE, INDICATOR_CHANNEL.sender(), &RX_EVENT);

    while let Err(e) = initialise_radio(&mut radio, policy).await {
        log::error!("radio initialisation failed: {:?}", e);
        Timer::after(Duration::from_millis(INIT_RETRY_DELAY_MS)).await;
    }

    // Deadline of a scheduled CAD retry, if one is pending
    let mut retry_at: Option<Instant> = None;

    loop {
        match retry_at {
            None => WAKE.wait().await,
            Some(deadline) => {
                if with_deadline(deadline, WAKE.wait()).await.is_err() {
                    // Backoff elapsed with no interrupt in between
                    retry_at = None;
                    if let Err(e) = access.restart_cad(&mut radio).await {
                        log::error!("CAD restart failed: {:?}", e);
                        recover(&mut radio, &mut access).await;
                    }
                    continue;
                }
            }
        }

        // Deferred interrupt processing: translate whatever the hardware
        // latched into at most one event. A pure nudge yields None.
        match radio.process_irq().await {
            Ok(Some(event)) => {
                match dispatcher.dispatch(&mut radio, &mut access, event).await {
                    Ok(DispatchOutcome::Idle) => retry_at = None,
                    Ok(DispatchOutcome::TxInFlight) => retry_at = None,
                    Ok(DispatchOutcome::RetryCad { after }) => {
                        retry_at = Some(Instant::now() + after);
                    }
                    Err(e) => {
                        log::error!("event dispatch failed: {:?}", e);
                        retry_at = None;
                        recover(&mut radio, &mut access).await;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("interrupt processing failed: {:?}", e);
                recover(&mut radio, &mut access).await;
            }
        }

        // Service one queued send request when no cycle is in progress;
        // further entries wait for the in-flight cycle to complete. The
        // cycle stays busy from CAD arm until TxDone/TxTimeout resolves it,
        // so a queued send can never re-target a transmitting radio.
        if !access.cycle_pending() && retry_at.is_none() {
            if let Ok(report) = SEND_REQUESTS.try_receive() {
                if let Err(e) = access.send_lora(&mut radio, &report).await {
                    log::error!("send failed: {:?}", e);
                    recover(&mut radio, &mut access).await;
                }
            }
        }
    }
}
