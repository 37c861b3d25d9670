//! Channel access control
//!
//! Orchestrates one send attempt: the transmit frame is overwritten with the
//! current sensor values, the radio is moved to standby, Clear Channel
//! Assessment is configured and started, and control returns to the caller
//! immediately. The clear/busy outcome arrives asynchronously through the
//! event dispatcher, which transmits on clear and returns the radio to its
//! low-power state on busy.
//!
//! A busy channel is retried a bounded number of times with exponential
//! backoff before the frame is dropped; the retry delay is surfaced to the
//! control task rather than blocking here.

use crate::config::{cad, control};
use crate::frame::{SensorReport, TransmitFrame};
use crate::radio::traits::{CadParams, Radio, RadioError};
use crate::tasks::indicator::{IndicatorCommand, IndicatorSender};
use crate::wake::WakeSignal;
use core::sync::atomic::{AtomicI32, Ordering};
use embassy_time::{Duration, Instant};

/// RSSI of the last received frame, readable by the application for
/// inclusion in subsequent outgoing frames. Zero until the first receive.
static LAST_RSSI: AtomicI32 = AtomicI32::new(0);

/// RSSI of the last received frame in dBm.
pub fn last_rssi() -> i16 {
    LAST_RSSI.load(Ordering::Relaxed) as i16
}

/// One in-flight channel assessment.
///
/// An attempt is either pending (the interrupt has not fired yet) or
/// resolved, exactly once, by a CadDone event.
#[derive(Debug)]
struct CadAttempt {
    started_at: Instant,
    attempts: u8,
}

/// Owns the transmit frame and drives channel assessment for it.
pub struct ChannelAccessController {
    frame: TransmitFrame,
    attempt: Option<CadAttempt>,
    tx_in_flight: bool,
    cad_params: CadParams,
    last_rssi: i16,
    wake: &'static WakeSignal,
    indicator: IndicatorSender,
}

impl ChannelAccessController {
    pub fn new(wake: &'static WakeSignal, indicator: IndicatorSender) -> Self {
        Self {
            frame: TransmitFrame::new(),
            attempt: None,
            tx_in_flight: false,
            cad_params: CadParams::default(),
            last_rssi: 0,
            wake,
            indicator,
        }
    }

    /// Trigger one channel-access-and-transmit cycle.
    ///
    /// Fire-and-forget: control returns as soon as CAD is armed; completion
    /// is only observable through the eventual TxDone/TxTimeout event. A
    /// request arriving while a previous attempt is still pending is refused
    /// without touching the radio.
    pub async fn send_lora<R: Radio>(
        &mut self,
        radio: &mut R,
        report: &SensorReport,
    ) -> Result<(), RadioError> {
        if self.cycle_pending() {
            log::warn!("send refused: a send cycle is already in progress");
            return Ok(());
        }

        self.frame.write_report(report, self.last_rssi);

        radio.set_standby().await?;
        radio.set_cad_params(&self.cad_params).await?;

        self.attempt = Some(CadAttempt {
            started_at: Instant::now(),
            attempts: 1,
        });
        let _ = self.indicator.try_send(IndicatorCommand::On);

        radio.start_cad().await?;

        // A stray signal left over from the previous cycle must not cause an
        // immediate spurious wake
        self.wake
            .consume_within(Duration::from_millis(control::REARM_BOUND_MS))
            .await;

        Ok(())
    }

    /// Re-arm CAD for a retry after a busy result. The frame written at the
    /// start of the cycle is reused untouched.
    pub async fn restart_cad<R: Radio>(&mut self, radio: &mut R) -> Result<(), RadioError> {
        let Some(attempt) = self.attempt.as_mut() else {
            log::warn!("CAD restart with no pending attempt");
            return Ok(());
        };
        attempt.attempts += 1;
        attempt.started_at = Instant::now();

        let _ = self.indicator.try_send(IndicatorCommand::On);
        radio.set_standby().await?;
        radio.set_cad_params(&self.cad_params).await?;
        radio.start_cad().await?;
        Ok(())
    }

    /// Handle a busy channel result.
    ///
    /// Returns the backoff to wait before the next CAD attempt, or `None`
    /// when the attempt budget is exhausted and the frame is dropped.
    pub fn on_cad_busy(&mut self) -> Option<Duration> {
        let Some(attempt) = self.attempt.as_ref() else {
            log::warn!("CadDone(busy) with no pending attempt");
            return None;
        };

        if attempt.attempts >= cad::RETRY_MAX_ATTEMPTS {
            log::debug!(
                "channel busy after {} attempts, dropping frame",
                attempt.attempts
            );
            self.attempt = None;
            return None;
        }

        let backoff_ms =
            (cad::RETRY_BASE_MS << (attempt.attempts - 1)).min(cad::RETRY_MAX_MS);
        log::debug!(
            "channel busy on attempt {}, retrying in {}ms",
            attempt.attempts,
            backoff_ms
        );
        Some(Duration::from_millis(backoff_ms))
    }

    /// Resolve the attempt on a clear channel, returning how long the
    /// assessment took. The cycle stays busy until the transmission itself
    /// completes; see [`Self::on_tx_complete`].
    pub fn on_cad_clear(&mut self) -> Option<Duration> {
        let elapsed = self.attempt.take().map(|a| a.started_at.elapsed());
        if elapsed.is_some() {
            self.tx_in_flight = true;
        }
        elapsed
    }

    /// Mark the transmission finished (TxDone or TxTimeout), freeing the
    /// controller for the next send cycle.
    pub fn on_tx_complete(&mut self) {
        self.tx_in_flight = false;
    }

    /// Whether a channel assessment is currently pending.
    pub fn attempt_pending(&self) -> bool {
        self.attempt.is_some()
    }

    /// Whether a send cycle is in progress, from CAD arm until the
    /// transmission resolves. While true, the radio must not be re-targeted.
    pub fn cycle_pending(&self) -> bool {
        self.attempt.is_some() || self.tx_in_flight
    }

    /// Drop the pending cycle after a radio error so new requests are
    /// accepted again.
    pub fn abandon(&mut self) {
        self.attempt = None;
        self.tx_in_flight = false;
    }

    /// Record the RSSI of a received frame for the next outgoing frame.
    pub fn record_rssi(&mut self, rssi: i16) {
        self.last_rssi = rssi;
        LAST_RSSI.store(rssi as i32, Ordering::Relaxed);
    }

    /// RSSI recorded by the last successful receive.
    pub fn last_recorded_rssi(&self) -> i16 {
        self.last_rssi
    }

    /// The prepared frame bytes, read-only once handed to the radio.
    pub fn frame_bytes(&self) -> &[u8] {
        self.frame.as_bytes()
    }

    #[cfg(test)]
    pub(crate) fn frame(&self) -> &TransmitFrame {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_LEN;
    use crate::radio::traits::mock::MockRadio;
    use crate::radio::traits::RadioState;
    use crate::tasks::indicator::IndicatorChannel;
    use futures::executor::block_on;

    fn sample_report() -> SensorReport {
        SensorReport {
            device_id: 7,
            lights_status: 0,
            lights_on: false,
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

    #[test]
    fn test_send_prepares_frame_and_arms_cad() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
        });

        assert_eq!(access.frame_bytes().len(), FRAME_LEN);
        assert_eq!(access.frame().device_id(), 7);
        assert_eq!(radio.standby_count(), 1);
        assert_eq!(radio.cad_starts(), 1);
        assert_eq!(radio.state(), RadioState::AwaitingCadResult);
        assert!(access.attempt_pending());
        // CAD parameters were handed to the radio
        let params = radio.cad_params().expect("CAD params configured");
        assert_eq!(params.symbols, cad::DETECTION_SYMBOLS);
        assert_eq!(params.detection_peak, cad::DETECTION_PEAK);
        // Indicator switched on
        assert!(matches!(
            INDICATOR.try_receive(),
            Ok(IndicatorCommand::On)
        ));
    }

    #[test]
    fn test_send_consumes_stray_wake_signal() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        WAKE.signal_from_isr(); // stray signal from a previous cycle
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
        });

        assert!(!WAKE.is_signaled());
    }

    #[test]
    fn test_send_refused_while_attempt_pending() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
        });

        // Second request did not reach the radio
        assert_eq!(radio.cad_starts(), 1);
    }

    #[test]
    fn test_busy_backoff_doubles_then_gives_up() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            // First busy: retry after base backoff
            let backoff = access.on_cad_busy().expect("first retry scheduled");
            assert_eq!(backoff, Duration::from_millis(cad::RETRY_BASE_MS));
            access.restart_cad(&mut radio).await.unwrap();

            // Second busy: doubled backoff
            let backoff = access.on_cad_busy().expect("second retry scheduled");
            assert_eq!(backoff, Duration::from_millis(cad::RETRY_BASE_MS * 2));
            access.restart_cad(&mut radio).await.unwrap();

            // Third busy: budget exhausted, frame dropped
            assert!(access.on_cad_busy().is_none());
            assert!(!access.attempt_pending());
        });

        assert_eq!(radio.cad_starts(), 3);
    }

    #[test]
    fn test_send_refused_until_tx_completes() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();

            // Channel clear: the assessment resolves but the cycle stays
            // busy while the transmission is in flight
            assert!(access.on_cad_clear().is_some());
            radio.send(access.frame_bytes()).await.unwrap();
            assert!(!access.attempt_pending());
            assert!(access.cycle_pending());

            // A request arriving mid-transmit must not touch the radio
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
            assert_eq!(radio.cad_starts(), 1);
            assert_eq!(radio.state(), RadioState::Transmitting);

            // TxDone frees the controller for the next cycle
            access.on_tx_complete();
            assert!(!access.cycle_pending());
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
            assert_eq!(radio.cad_starts(), 2);
        });
    }

    #[test]
    fn test_clear_resolves_attempt_exactly_once() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
        });

        assert!(access.on_cad_clear().is_some());
        assert!(access.on_cad_clear().is_none());
        assert!(!access.attempt_pending());
    }

    #[test]
    fn test_recorded_rssi_lands_in_next_frame() {
        static WAKE: WakeSignal = WakeSignal::new();
        static INDICATOR: IndicatorChannel = IndicatorChannel::new();
        WAKE.init();
        let mut access = ChannelAccessController::new(&WAKE, INDICATOR.sender());
        let mut radio = MockRadio::new();

        access.record_rssi(-42);
        assert_eq!(access.last_recorded_rssi(), -42);

        block_on(async {
            radio.init().await.unwrap();
            access.send_lora(&mut radio, &sample_report()).await.unwrap();
        });

        assert_eq!(access.frame().last_rssi(), -42);
    }
}
