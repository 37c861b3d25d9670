//! Radio event dispatch
//!
//! Translates driver-reported outcomes into state transitions and power-mode
//! decisions. All six outcomes share one postlude — radio to its lowest-power
//! state, activity indicator off, wake signal re-armed — except a clear
//! channel assessment, which starts the transmission instead and leaves the
//! postlude to the eventual TxDone/TxTimeout.
//!
//! Dispatch runs synchronously in control-task context, never in interrupt
//! context, so the frame buffer and attempt bookkeeping need no locking.

use crate::channel_access::ChannelAccessController;
use crate::config::control;
use crate::radio::traits::{CadOutcome, Radio, RadioError, RadioEvent, MAX_RX_PAYLOAD};
use crate::tasks::indicator::{IndicatorCommand, IndicatorSender};
use crate::wake::WakeSignal;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

/// Notification primitive signalled on every completed receive, independent
/// of the wake signal.
pub type RxNotify = Signal<CriticalSectionRawMutex, ()>;

/// Power-mode strategy applied by the shared postlude.
///
/// Selects between the transmit-only build (radio sleeps between events) and
/// the receive-enabled build (radio keeps a low-duty-cycle receive window
/// armed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostludePolicy {
    /// Lowest-power sleep between operations (transmit-only node)
    Sleep,
    /// Re-arm a duty-cycle receive window after every operation
    RxDutyCycle { sleep_us: u32, wake_us: u32 },
}

/// What the control task should do after an event was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing pending; park on the wake signal
    Idle,
    /// A transmission is in flight; its own completion event will follow
    TxInFlight,
    /// Channel was busy; re-arm CAD after the backoff elapses
    RetryCad { after: Duration },
}

/// Dispatches driver events to their handlers.
pub struct EventDispatcher {
    policy: PostludePolicy,
    wake: &'static WakeSignal,
    indicator: IndicatorSender,
    rx_notify: &'static RxNotify,
}

impl EventDispatcher {
    pub fn new(
        policy: PostludePolicy,
        wake: &'static WakeSignal,
        indicator: IndicatorSender,
        rx_notify: &'static RxNotify,
    ) -> Self {
        Self {
            policy,
            wake,
            indicator,
            rx_notify,
        }
    }

    pub fn policy(&self) -> PostludePolicy {
        self.policy
    }

    /// Handle one driver-reported outcome.
    pub async fn dispatch<R: Radio>(
        &mut self,
        radio: &mut R,
        access: &mut ChannelAccessController,
        event: RadioEvent,
    ) -> Result<DispatchOutcome, RadioError> {
        match event {
            RadioEvent::TxDone => {
                log::debug!("tx done");
                access.on_tx_complete();
                self.postlude(radio).await?;
                Ok(DispatchOutcome::Idle)
            }
            RadioEvent::RxDone { data, rssi, snr } => {
                log::debug!("rx done: {} bytes, rssi {}dBm, snr {}dB", data.len(), rssi, snr);
                access.record_rssi(rssi);
                // Wake any consumer waiting on a receive, independent of the
                // control task's own wake signal
                self.rx_notify.signal(());
                log_payload_hex(&data);
                self.postlude(radio).await?;
                Ok(DispatchOutcome::Idle)
            }
            RadioEvent::TxTimeout => {
                log::debug!("tx timeout");
                access.on_tx_complete();
                self.postlude(radio).await?;
                Ok(DispatchOutcome::Idle)
            }
            RadioEvent::RxTimeout => {
                log::debug!("rx timeout");
                self.postlude(radio).await?;
                Ok(DispatchOutcome::Idle)
            }
            RadioEvent::RxError => {
                log::debug!("rx error");
                self.postlude(radio).await?;
                Ok(DispatchOutcome::Idle)
            }
            RadioEvent::CadDone(CadOutcome::Busy) => {
                let retry = access.on_cad_busy();
                self.postlude(radio).await?;
                match retry {
                    Some(after) => Ok(DispatchOutcome::RetryCad { after }),
                    None => Ok(DispatchOutcome::Idle),
                }
            }
            RadioEvent::CadDone(CadOutcome::Clear) => {
                if let Some(elapsed) = access.on_cad_clear() {
                    log::debug!("channel clear after {}ms", elapsed.as_millis());
                }
                // Transmission is now in flight; its own TxDone/TxTimeout
                // runs the postlude
                radio.send(access.frame_bytes()).await?;
                Ok(DispatchOutcome::TxInFlight)
            }
        }
    }

    /// Shared handler postlude: lowest-power state per policy, indicator
    /// off, wake signal re-armed for the next sleep cycle.
    async fn postlude<R: Radio>(&mut self, radio: &mut R) -> Result<(), RadioError> {
        match self.policy {
            PostludePolicy::Sleep => radio.sleep().await?,
            PostludePolicy::RxDutyCycle { sleep_us, wake_us } => {
                radio.set_rx_duty_cycle(sleep_us, wake_us).await?
            }
        }

        let _ = self.indicator.try_send(IndicatorCommand::Off);

        self.wake
            .consume_within(Duration::from_millis(control::REARM_BOUND_MS))
            .await;
        Ok(())
    }
}

/// Hex-dump a received payload at debug level. Diagnostic only; no effect on
/// control flow.
fn log_payload_hex(data: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut dump: heapless::String<{ MAX_RX_PAYLOAD * 3 }> = heapless::String::new();
    for byte in data {
        let hi = b"0123456789ABCDEF"[(byte >> 4) as usize] as char;
        let lo = b"0123456789ABCDEF"[(byte & 0x0F) as usize] as char;
        let _ = dump.push(hi);
        let _ = dump.push(lo);
        let _ = dump.push(' ');
    }
    log::debug!("rx payload: {}", dump.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{cad, duty_cycle};
    use crate::frame::{SensorReport, FRAME_LEN};
    use crate::radio::traits::mock::MockRadio;
    use crate::radio::traits::RadioState;
    use crate::tasks::indicator::IndicatorChannel;
    use futures::executor::block_on;
    use heapless::Vec;

    fn sample_report() -> SensorReport {
        SensorReport {
            device_id: 7,
            lights_status: 0,
            lights_on: true,
            temperature_int: 27,
            temperature_frac: 35,
            humidity_int: 67,
            humidity_frac: 55,
            light_primary: 34,
            light_secondary: 12,
            light_threshold: 0x4B00,
            time_sync_request: false,
            secondary_light: false,
        }
    }

    /// Drain the indicator channel, returning the last command seen.
    fn last_indicator(channel: &'static IndicatorChannel) -> Option<IndicatorCommand> {
        let mut last = None;
        while let Ok(cmd) = channel.try_receive() {
            last = Some(cmd);
        }
        last
    }

    #[test]
    fn test_cad_clear_transmits_prepared_frame() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            let outcome = dispatcher
                .dispatch(
                    &mut radio,
                    &mut access,
                    RadioEvent::CadDone(CadOutcome::Clear),
                )
                .await
                .unwrap();

            assert_eq!(outcome, DispatchOutcome::TxInFlight);
        });

        // Exactly the frame written this cycle, with its fixed length
        assert_eq!(radio.sent_frames().len(), 1);
        assert_eq!(radio.sent_frames()[0].len(), FRAME_LEN);
        assert_eq!(radio.sent_frames()[0].as_slice(), access.frame_bytes());
        assert_eq!(radio.state(), RadioState::Transmitting);
        // No postlude ran: radio never slept
        assert_eq!(radio.sleep_count(), 0);
    }

    #[test]
    fn test_cad_busy_sleeps_without_transmit() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            let outcome = dispatcher
                .dispatch(
                    &mut radio,
                    &mut access,
                    RadioEvent::CadDone(CadOutcome::Busy),
                )
                .await
                .unwrap();

            // Busy schedules a bounded retry and still runs the postlude
            assert_eq!(
                outcome,
                DispatchOutcome::RetryCad {
                    after: Duration::from_millis(cad::RETRY_BASE_MS)
                }
            );
        });

        assert!(radio.sent_frames().is_empty());
        assert_eq!(radio.sleep_count(), 1);
        assert_eq!(radio.state(), RadioState::Sleeping);
        assert_eq!(last_indicator(&INDICATOR), Some(IndicatorCommand::Off));
        assert!(!WAKE.is_signaled());
    }

    #[test]
    fn test_busy_gives_up_after_attempt_budget() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            for attempt in 1..cad::RETRY_MAX_ATTEMPTS {
                let outcome = dispatcher
                    .dispatch(
                        &mut radio,
                        &mut access,
                        RadioEvent::CadDone(CadOutcome::Busy),
                    )
                    .await
                    .unwrap();
                assert!(
                    matches!(outcome, DispatchOutcome::RetryCad { .. }),
                    "attempt {} should schedule a retry",
                    attempt
                );
                access.restart_cad(&mut radio).await.unwrap();
            }

            // Final busy result exhausts the budget
            let outcome = dispatcher
                .dispatch(
                    &mut radio,
                    &mut access,
                    RadioEvent::CadDone(CadOutcome::Busy),
                )
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::Idle);
        });

        assert!(radio.sent_frames().is_empty());
        assert!(!access.attempt_pending());
    }

    #[test]
    fn test_queued_send_waits_for_tx_completion() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            let outcome = dispatcher
                .dispatch(
                    &mut radio,
                    &mut access,
                    RadioEvent::CadDone(CadOutcome::Clear),
                )
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::TxInFlight);

            // A second request while the frame is on the air must be
            // refused without re-targeting the radio
            assert!(access.cycle_pending());
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
            assert_eq!(radio.cad_starts(), 1);
            assert_eq!(radio.state(), RadioState::Transmitting);
            assert_eq!(radio.sent_frames().len(), 1);

            // TxDone resolves the cycle; the next request is accepted
            dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::TxDone)
                .await
                .unwrap();
            assert!(!access.cycle_pending());
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
            assert_eq!(radio.cad_starts(), 2);
        });
    }

    #[test]
    fn test_tx_done_runs_postlude() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        // A stray signal from the completed operation must be consumed
        WAKE.signal_from_isr();

        block_on(async {
            radio.init().await.unwrap();
            let outcome = dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::TxDone)
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::Idle);
        });

        assert_eq!(radio.sleep_count(), 1);
        assert_eq!(radio.state(), RadioState::Sleeping);
        assert_eq!(last_indicator(&INDICATOR), Some(IndicatorCommand::Off));
        // Wake signal re-armed: not left signalled
        assert!(!WAKE.is_signaled());
    }

    #[test]
    fn test_rx_done_records_rssi_and_notifies_once() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        let mut data: Vec<u8, MAX_RX_PAYLOAD> = Vec::new();
        data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        block_on(async {
            radio.init().await.unwrap();
            dispatcher
                .dispatch(
                    &mut radio,
                    &mut access,
                    RadioEvent::RxDone {
                        data,
                        rssi: -42,
                        snr: 9,
                    },
                )
                .await
                .unwrap();
        });

        assert_eq!(access.last_recorded_rssi(), -42);
        // Receive notification signalled exactly once
        assert!(RX_EVENT.try_take().is_some());
        assert!(RX_EVENT.try_take().is_none());
        assert_eq!(radio.sleep_count(), 1);
    }

    #[test]
    fn test_tx_timeout_matches_tx_done_postlude() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            let outcome = dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::TxTimeout)
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::Idle);
        });

        // No retransmission attempted
        assert!(radio.sent_frames().is_empty());
        assert_eq!(radio.sleep_count(), 1);
        assert_eq!(last_indicator(&INDICATOR), Some(IndicatorCommand::Off));
        assert!(!WAKE.is_signaled());
    }

    #[test]
    fn test_duty_cycle_policy_rearms_receive_window() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher = EventDispatcher::new(
            PostludePolicy::RxDutyCycle {
                sleep_us: duty_cycle::SLEEP_WINDOW_US,
                wake_us: duty_cycle::WAKE_WINDOW_US,
            },
            &WAKE,
            INDICATOR.sender(),
            &RX_EVENT,
        );
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::TxDone)
                .await
                .unwrap();
        });

        assert_eq!(radio.sleep_count(), 0);
        assert_eq!(
            radio.duty_cycle_arms(),
            &[(duty_cycle::SLEEP_WINDOW_US, duty_cycle::WAKE_WINDOW_US)]
        );
        assert_eq!(radio.state(), RadioState::Receiving);
    }

    #[test]
    fn test_rx_error_and_rx_timeout_run_postlude() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        static RX_EVENT: RxNotify = RxNotify::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut dispatcher =
            EventDispatcher::new(PostludePolicy::Sleep, &WAKE, INDICATOR.sender(), &RX_EVENT);
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::RxError)
                .await
                .unwrap();
            dispatcher
                .dispatch(&mut radio, &mut access, RadioEvent::RxTimeout)
                .await
                .unwrap();
        });

        assert_eq!(radio.sleep_count(), 2);
        assert_eq!(radio.state(), RadioState::Sleeping);
    }
}
