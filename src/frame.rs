//! Fixed-layout transmit frame
//!
//! The node sends a single 14-byte frame whose bytes are individually
//! meaningful sensor/status fields. The frame is a reusable buffer owned by
//! the channel access controller and overwritten before every send cycle;
//! nothing is allocated per transmission.
//!
//! # Byte layout
//!
//! ```text
//! 0  device id
//! 1  lights status flags
//! 2  lights on/off
//! 3  temperature, integer part
//! 4  temperature, fractional part
//! 5  humidity, integer part
//! 6  humidity, fractional part
//! 7  primary light sensor reading
//! 8  secondary light sensor reading
//! 9  light activation threshold, high byte
//! 10 light activation threshold, low byte
//! 11 RSSI of last received frame (i8, two's complement)
//! 12 date/time update request flag
//! 13 secondary light flag
//! ```

/// Length of the transmit frame in bytes
pub const FRAME_LEN: usize = 14;

/// Sensor and status values supplied by the application before a send cycle.
///
/// Collecting the readings is an external concern; this crate only owns the
/// byte layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SensorReport {
    pub device_id: u8,
    pub lights_status: u8,
    pub lights_on: bool,
    pub temperature_int: u8,
    pub temperature_frac: u8,
    pub humidity_int: u8,
    pub humidity_frac: u8,
    pub light_primary: u8,
    pub light_secondary: u8,
    /// Light activation threshold, big-endian over bytes 9..=10
    pub light_threshold: u16,
    pub time_sync_request: bool,
    pub secondary_light: bool,
}

/// The single reusable transmit buffer.
#[derive(Debug)]
pub struct TransmitFrame {
    buf: [u8; FRAME_LEN],
}

impl TransmitFrame {
    pub const fn new() -> Self {
        Self {
            buf: [0; FRAME_LEN],
        }
    }

    /// Overwrite the frame with the current report and the RSSI of the last
    /// received frame.
    ///
    /// The RSSI is clamped into the i8 range and stored as two's complement.
    pub fn write_report(&mut self, report: &SensorReport, last_rssi: i16) {
        self.buf[0] = report.device_id;
        self.buf[1] = report.lights_status;
        self.buf[2] = report.lights_on as u8;
        self.buf[3] = report.temperature_int;
        self.buf[4] = report.temperature_frac;
        self.buf[5] = report.humidity_int;
        self.buf[6] = report.humidity_frac;
        self.buf[7] = report.light_primary;
        self.buf[8] = report.light_secondary;
        self.buf[9] = (report.light_threshold >> 8) as u8;
        self.buf[10] = (report.light_threshold & 0xFF) as u8;
        self.buf[11] = last_rssi.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8;
        self.buf[12] = report.time_sync_request as u8;
        self.buf[13] = report.secondary_light as u8;
    }

    /// Frame contents, read-only once handed to the radio.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn device_id(&self) -> u8 {
        self.buf[0]
    }

    pub fn lights_status(&self) -> u8 {
        self.buf[1]
    }

    pub fn lights_on(&self) -> bool {
        self.buf[2] != 0
    }

    pub fn temperature(&self) -> (u8, u8) {
        (self.buf[3], self.buf[4])
    }

    pub fn humidity(&self) -> (u8, u8) {
        (self.buf[5], self.buf[6])
    }

    pub fn light_readings(&self) -> (u8, u8) {
        (self.buf[7], self.buf[8])
    }

    pub fn light_threshold(&self) -> u16 {
        ((self.buf[9] as u16) << 8) | self.buf[10] as u16
    }

    pub fn last_rssi(&self) -> i8 {
        self.buf[11] as i8
    }

    pub fn time_sync_request(&self) -> bool {
        self.buf[12] != 0
    }

    pub fn secondary_light(&self) -> bool {
        self.buf[13] != 0
    }
}

impl Default for TransmitFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> SensorReport {
        SensorReport {
            device_id: 7,
            lights_status: 0b0000_0101,
            lights_on: true,
            temperature_int: 27,
            temperature_frac: 35,
            humidity_int: 67,
            humidity_frac: 55,
            light_primary: 34,
            light_secondary: 12,
            light_threshold: 0x4B00,
            time_sync_request: false,
            secondary_light: true,
        }
    }

    #[test]
    fn test_round_trip_all_fields() {
        let report = sample_report();
        let mut frame = TransmitFrame::new();
        frame.write_report(&report, -80);

        assert_eq!(frame.device_id(), 7);
        assert_eq!(frame.lights_status(), 0b0000_0101);
        assert!(frame.lights_on());
        assert_eq!(frame.temperature(), (27, 35));
        assert_eq!(frame.humidity(), (67, 55));
        assert_eq!(frame.light_readings(), (34, 12));
        assert_eq!(frame.light_threshold(), 0x4B00);
        assert_eq!(frame.last_rssi(), -80);
        assert!(!frame.time_sync_request());
        assert!(frame.secondary_light());
    }

    #[test]
    fn test_frame_length_is_fixed() {
        let mut frame = TransmitFrame::new();
        frame.write_report(&sample_report(), 0);
        assert_eq!(frame.as_bytes().len(), FRAME_LEN);
    }

    #[test]
    fn test_rssi_two_complement_encoding() {
        let mut frame = TransmitFrame::new();
        frame.write_report(&sample_report(), -42);
        assert_eq!(frame.as_bytes()[11], (-42i8) as u8);
        assert_eq!(frame.last_rssi(), -42);
    }

    #[test]
    fn test_rssi_clamped_to_i8_range() {
        let mut frame = TransmitFrame::new();
        frame.write_report(&sample_report(), -150);
        assert_eq!(frame.last_rssi(), i8::MIN);

        frame.write_report(&sample_report(), 300);
        assert_eq!(frame.last_rssi(), i8::MAX);
    }

    #[test]
    fn test_overwrite_replaces_previous_cycle() {
        let mut frame = TransmitFrame::new();
        frame.write_report(&sample_report(), -80);

        let mut next = sample_report();
        next.device_id = 9;
        next.temperature_int = 31;
        frame.write_report(&next, -60);

        assert_eq!(frame.device_id(), 9);
        assert_eq!(frame.temperature(), (31, 35));
        assert_eq!(frame.last_rssi(), -60);
    }
}
