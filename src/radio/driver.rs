//! SX1262 LoRa driver
//!
//! Implements the [`Radio`] trait directly over the SPI command interface.
//! Airtime operations (`start_cad`, `send`, duty-cycle receive) only kick the
//! hardware and return; the chip raises DIO1 on completion and the pending
//! interrupt is translated into a [`RadioEvent`] by [`Radio::process_irq`]
//! from task context. DIO1 itself is owned by the wake-interrupt layer, not
//! by this driver.

use crate::config::tcxo;
use crate::radio::traits::{
    CadExitMode, CadOutcome, CadParams, Radio, RadioError, RadioEvent, RadioState, RxConfig,
    TxConfig, MAX_RX_PAYLOAD,
};
use embassy_time::{Duration, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::spi::SpiBus;
use heapless::Vec;

/// SX1262 command opcodes
mod cmd {
    pub const SET_SLEEP: u8 = 0x84;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_CAD_PARAMS: u8 = 0x88;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_RX_DUTY_CYCLE: u8 = 0x94;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_CAD: u8 = 0xC5;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PACKET_STATUS: u8 = 0x14;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
}

/// SX1262 register addresses
mod reg {
    /// Over-current protection register
    pub const OCP_CONFIGURATION: u16 = 0x08E7;
}

/// Standby modes
mod standby {
    pub const STDBY_RC: u8 = 0x00;
}

/// Sleep configuration
mod sleep_cfg {
    /// Warm start: retain configuration while sleeping
    pub const WARM_START: u8 = 0x04;
}

/// Packet types
mod packet_type {
    pub const LORA: u8 = 0x01;
}

/// IRQ masks
mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const HEADER_ERR: u16 = 0x0020;
    pub const CRC_ERR: u16 = 0x0040;
    pub const CAD_DONE: u16 = 0x0080;
    pub const CAD_DETECTED: u16 = 0x0100;
    pub const TIMEOUT: u16 = 0x0200;
}

/// One SX1262 timing step is 15.625 microseconds
fn steps_from_us(us: u32) -> u32 {
    ((us as u64 * 64) / 1000) as u32
}

fn steps_from_ms(ms: u32) -> u32 {
    (ms as u64 * 64).min(0xFF_FFFF) as u32
}

/// Control pins for SX1262
pub struct Sx1262Pins<Nss, Nrst, Busy> {
    pub nss: Nss,
    pub nrst: Nrst,
    pub busy: Busy,
}

/// SX1262 LoRa driver
///
/// Uses dependency injection for SPI and GPIO pins (SpiBus with manual NSS
/// control), so the driver is generic over the HAL.
pub struct Sx1262Driver<Spi, Nss, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Nrst: OutputPin,
    Busy: InputPin,
{
    spi: Spi,
    nss: Nss,
    nrst: Nrst,
    busy: Busy,
    initialised: bool,
    state: RadioState,
    tx_config: TxConfig,
    rx_config: RxConfig,
}

impl<Spi, Nss, Nrst, Busy> Sx1262Driver<Spi, Nss, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Nrst: OutputPin,
    Busy: InputPin,
{
    /// Create a new SX1262 driver
    pub fn new(spi: Spi, pins: Sx1262Pins<Nss, Nrst, Busy>) -> Self {
        Self {
            spi,
            nss: pins.nss,
            nrst: pins.nrst,
            busy: pins.busy,
            initialised: false,
            state: RadioState::Sleeping,
            tx_config: TxConfig::default(),
            rx_config: RxConfig::default(),
        }
    }

    /// Reset the radio
    async fn reset(&mut self) -> Result<(), RadioError> {
        let _ = self.nrst.set_low();
        Timer::after(Duration::from_millis(10)).await;
        let _ = self.nrst.set_high();
        Timer::after(Duration::from_millis(20)).await;
        Ok(())
    }

    /// Wait for the BUSY pin to go low
    async fn wait_not_busy(&mut self) -> Result<(), RadioError> {
        // Poll with timeout
        for _ in 0..1000 {
            if self.busy.is_low().unwrap_or(false) {
                return Ok(());
            }
            Timer::after(Duration::from_micros(100)).await;
        }
        Err(RadioError::BusyTimeout)
    }

    /// Wake the chip from sleep mode.
    ///
    /// A sleeping SX1262 wakes on the NSS falling edge; BUSY stays high until
    /// the chip is back in standby.
    async fn wakeup(&mut self) -> Result<(), RadioError> {
        if self.state != RadioState::Sleeping {
            return Ok(());
        }
        let _ = self.nss.set_low();
        Timer::after(Duration::from_millis(1)).await;
        let _ = self.nss.set_high();
        self.wait_not_busy().await
    }

    /// Write a command to the radio
    async fn write_command(&mut self, cmd: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        let mut buf = [0u8; 16];
        buf[0] = cmd;
        let len = 1 + data.len().min(15);
        buf[1..len].copy_from_slice(&data[..len - 1]);

        self.spi
            .write(&buf[..len])
            .await
            .map_err(|_| RadioError::SpiError)?;

        let _ = self.nss.set_high();

        Ok(())
    }

    /// Read data from the radio
    async fn read_command(&mut self, cmd: u8, len: usize) -> Result<[u8; 16], RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // SX1262 requires command byte + NOP byte, then reads
        let mut tx_buf = [0u8; 18];
        let mut rx_buf = [0u8; 18];
        tx_buf[0] = cmd;
        tx_buf[1] = 0x00; // NOP

        let total_len = 2 + len;
        self.spi
            .transfer(&mut rx_buf[..total_len], &tx_buf[..total_len])
            .await
            .map_err(|_| RadioError::SpiError)?;

        let _ = self.nss.set_high();

        // Response starts after status byte (index 2)
        let mut result = [0u8; 16];
        result[..len].copy_from_slice(&rx_buf[2..2 + len]);

        Ok(result)
    }

    /// Configure DIO3 as TCXO control
    async fn configure_tcxo(&mut self) -> Result<(), RadioError> {
        // SetDIO3AsTcxoCtrl: voltage code + timeout (24-bit)
        let timeout: u32 = 0x000140; // ~5ms startup time
        let data = [
            tcxo::VOLTAGE_CODE,
            ((timeout >> 16) & 0xFF) as u8,
            ((timeout >> 8) & 0xFF) as u8,
            (timeout & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_DIO3_AS_TCXO_CTRL, &data).await
    }

    /// Configure DIO2 as RF switch control
    async fn configure_dio2_rf_switch(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])
            .await
    }

    /// Write to a register
    async fn write_register(&mut self, addr: u16, value: u8) -> Result<(), RadioError> {
        let data = [((addr >> 8) & 0xFF) as u8, (addr & 0xFF) as u8, value];
        self.write_command(cmd::WRITE_REGISTER, &data).await
    }

    /// Set current limit (OCP - Over Current Protection)
    async fn set_current_limit(&mut self, current_ma: u16) -> Result<(), RadioError> {
        // OCP register value = current_ma / 2.5
        let ocp_value = ((current_ma as u32 * 10) / 25).min(63) as u8;
        self.write_register(reg::OCP_CONFIGURATION, ocp_value).await
    }

    async fn set_standby_internal(&mut self) -> Result<(), RadioError> {
        self.wakeup().await?;
        self.write_command(cmd::SET_STANDBY, &[standby::STDBY_RC])
            .await
    }

    /// Set packet type to LoRa
    async fn set_packet_type_lora(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_PACKET_TYPE, &[packet_type::LORA])
            .await
    }

    /// Set RF frequency
    async fn set_frequency(&mut self, freq_hz: u32) -> Result<(), RadioError> {
        // Frequency = (freq_rf * 2^25) / 32MHz
        let freq_reg = ((freq_hz as u64 * (1 << 25)) / 32_000_000) as u32;
        let data = [
            ((freq_reg >> 24) & 0xFF) as u8,
            ((freq_reg >> 16) & 0xFF) as u8,
            ((freq_reg >> 8) & 0xFF) as u8,
            (freq_reg & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_RF_FREQUENCY, &data).await
    }

    /// Set modulation parameters
    async fn set_modulation_params(
        &mut self,
        spreading_factor: u8,
        bandwidth_khz: u32,
        coding_rate: u8,
    ) -> Result<(), RadioError> {
        let bw = match bandwidth_khz {
            7 | 8 => 0x00,   // 7.8 kHz
            10 => 0x08,      // 10.4 kHz
            15 | 16 => 0x01, // 15.6 kHz
            20 | 21 => 0x09, // 20.8 kHz
            31 => 0x02,      // 31.25 kHz
            41 | 42 => 0x0A, // 41.7 kHz
            62 | 63 => 0x03, // 62.5 kHz
            125 => 0x04,     // 125 kHz
            250 => 0x05,     // 250 kHz
            500 => 0x06,     // 500 kHz
            _ => 0x04,       // Default to 125 kHz
        };

        let cr = match coding_rate {
            5 => 0x01, // 4/5
            6 => 0x02, // 4/6
            7 => 0x03, // 4/7
            8 => 0x04, // 4/8
            _ => 0x01, // Default to 4/5
        };

        // Low data rate optimisation: required for SF11/SF12 at 125kHz
        let ldro = if spreading_factor >= 11 && bandwidth_khz <= 125 {
            0x01
        } else {
            0x00
        };

        let data = [spreading_factor, bw, cr, ldro];
        self.write_command(cmd::SET_MODULATION_PARAMS, &data).await
    }

    /// Set packet parameters
    async fn set_packet_params(
        &mut self,
        preamble_length: u16,
        payload_len: u8,
        iq_inverted: bool,
    ) -> Result<(), RadioError> {
        let data = [
            ((preamble_length >> 8) & 0xFF) as u8,
            (preamble_length & 0xFF) as u8,
            0x00, // Explicit header
            payload_len,
            0x01, // CRC on
            iq_inverted as u8,
        ];
        self.write_command(cmd::SET_PACKET_PARAMS, &data).await
    }

    /// Configure the Power Amplifier for SX1262
    async fn configure_pa(&mut self) -> Result<(), RadioError> {
        // SetPaConfig for SX1262 (high power PA)
        // paDutyCycle=0x04, hpMax=0x07, deviceSel=0x00 (SX1262), paLut=0x01
        let data = [0x04, 0x07, 0x00, 0x01];
        self.write_command(cmd::SET_PA_CONFIG, &data).await
    }

    /// Set TX power
    async fn set_tx_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
        // After SetPaConfig the power register value maps directly to dBm for
        // the -9 to +22 range; negative values are two's complement
        let power = if power_dbm < 0 {
            (256 + power_dbm as i16) as u8
        } else {
            power_dbm as u8
        };
        let data = [power, 0x04]; // Power, ramp time 200us
        self.write_command(cmd::SET_TX_PARAMS, &data).await
    }

    /// Set buffer base addresses
    async fn set_buffer_base_address(&mut self, tx_base: u8, rx_base: u8) -> Result<(), RadioError> {
        self.write_command(cmd::SET_BUFFER_BASE_ADDRESS, &[tx_base, rx_base])
            .await
    }

    /// Route the IRQ mask to DIO1
    async fn configure_irq(&mut self, irq_mask: u16) -> Result<(), RadioError> {
        let data = [
            ((irq_mask >> 8) & 0xFF) as u8,
            (irq_mask & 0xFF) as u8,
            ((irq_mask >> 8) & 0xFF) as u8, // DIO1 mask
            (irq_mask & 0xFF) as u8,
            0x00,
            0x00, // DIO2 mask
            0x00,
            0x00, // DIO3 mask
        ];
        self.write_command(cmd::SET_DIO_IRQ_PARAMS, &data).await
    }

    /// Clear IRQ status
    async fn clear_irq(&mut self, irq_mask: u16) -> Result<(), RadioError> {
        let data = [((irq_mask >> 8) & 0xFF) as u8, (irq_mask & 0xFF) as u8];
        self.write_command(cmd::CLEAR_IRQ_STATUS, &data).await
    }

    /// Get IRQ status
    async fn get_irq_status(&mut self) -> Result<u16, RadioError> {
        let result = self.read_command(cmd::GET_IRQ_STATUS, 2).await?;
        Ok(((result[0] as u16) << 8) | (result[1] as u16))
    }

    /// Write data to TX buffer
    async fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // Command + offset + data
        let mut buf = [0u8; 258];
        buf[0] = cmd::WRITE_BUFFER;
        buf[1] = offset;
        let len = data.len().min(256);
        buf[2..2 + len].copy_from_slice(&data[..len]);

        self.spi
            .write(&buf[..2 + len])
            .await
            .map_err(|_| RadioError::SpiError)?;

        let _ = self.nss.set_high();

        Ok(())
    }

    /// Read data from RX buffer
    async fn read_buffer(
        &mut self,
        offset: u8,
        len: usize,
    ) -> Result<Vec<u8, MAX_RX_PAYLOAD>, RadioError> {
        self.wait_not_busy().await?;

        let _ = self.nss.set_low();

        // Command + offset + NOP + data
        let mut tx_buf = [0u8; 259];
        let mut rx_buf = [0u8; 259];
        tx_buf[0] = cmd::READ_BUFFER;
        tx_buf[1] = offset;
        tx_buf[2] = 0x00; // NOP

        let total_len = 3 + len;
        self.spi
            .transfer(&mut rx_buf[..total_len], &tx_buf[..total_len])
            .await
            .map_err(|_| RadioError::SpiError)?;

        let _ = self.nss.set_high();

        let mut result = Vec::new();
        result
            .extend_from_slice(&rx_buf[3..3 + len])
            .map_err(|_| RadioError::ReceiveFailed)?;

        Ok(result)
    }

    /// Get RX buffer status: (payload_length, buffer_offset)
    async fn get_rx_buffer_status(&mut self) -> Result<(u8, u8), RadioError> {
        let result = self.read_command(cmd::GET_RX_BUFFER_STATUS, 2).await?;
        Ok((result[0], result[1]))
    }

    /// Get packet status: (rssi, snr)
    async fn get_packet_status(&mut self) -> Result<(i16, i8), RadioError> {
        let result = self.read_command(cmd::GET_PACKET_STATUS, 3).await?;

        // RSSI: -result[0]/2
        let rssi = -(result[0] as i16) / 2;

        // SNR: result[1] as signed / 4
        let snr = (result[1] as i8) / 4;

        Ok((rssi, snr))
    }

    /// Translate a completed receive interrupt into an RxDone event
    async fn read_rx_done(&mut self) -> Result<RadioEvent, RadioError> {
        let (payload_len, buffer_offset) = self.get_rx_buffer_status().await?;
        let data = self.read_buffer(buffer_offset, payload_len as usize).await?;
        let (rssi, snr) = self.get_packet_status().await?;
        Ok(RadioEvent::RxDone { data, rssi, snr })
    }
}

impl<Spi, Nss, Nrst, Busy> Radio for Sx1262Driver<Spi, Nss, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Nrst: OutputPin,
    Busy: InputPin,
{
    async fn init(&mut self) -> Result<(), RadioError> {
        self.reset().await?;
        self.wait_not_busy().await?;
        self.state = RadioState::ConfiguringCad;

        self.set_standby_internal().await?;

        // Configure TCXO (1.8V)
        self.configure_tcxo().await?;
        Timer::after(Duration::from_millis(10)).await;

        self.configure_dio2_rf_switch().await?;

        // Set current limit (140mA for the SX1262 high-power PA)
        self.set_current_limit(140).await?;

        self.set_packet_type_lora().await?;
        self.set_buffer_base_address(0x00, 0x80).await?;

        self.initialised = true;
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), RadioError> {
        if self.state == RadioState::Sleeping {
            return Ok(());
        }
        self.write_command(cmd::SET_SLEEP, &[sleep_cfg::WARM_START])
            .await?;
        self.state = RadioState::Sleeping;
        Ok(())
    }

    async fn set_standby(&mut self) -> Result<(), RadioError> {
        self.set_standby_internal().await?;
        self.state = RadioState::ConfiguringCad;
        Ok(())
    }

    async fn set_channel(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        self.set_frequency(frequency_hz).await
    }

    async fn set_tx_config(&mut self, config: &TxConfig) -> Result<(), RadioError> {
        self.set_standby_internal().await?;
        self.set_frequency(config.frequency_hz).await?;
        self.set_modulation_params(
            config.spreading_factor,
            config.bandwidth_khz,
            config.coding_rate,
        )
        .await?;
        // PA must be configured before SetTxParams
        self.configure_pa().await?;
        self.set_tx_power(config.tx_power_dbm).await?;

        self.tx_config = config.clone();
        Ok(())
    }

    async fn set_rx_config(&mut self, config: &RxConfig) -> Result<(), RadioError> {
        // Modulation is shared with TX on this chip; the receive-specific
        // parts are applied when a receive window is armed.
        self.rx_config = config.clone();
        Ok(())
    }

    async fn set_cad_params(&mut self, params: &CadParams) -> Result<(), RadioError> {
        let symbols = match params.symbols {
            1 => 0x00,
            2 => 0x01,
            4 => 0x02,
            8 => 0x03,
            16 => 0x04,
            _ => return Err(RadioError::InvalidConfig),
        };
        let exit_mode = match params.exit_mode {
            CadExitMode::CadOnly => 0x00,
            CadExitMode::CadRx => 0x01,
        };
        let timeout = steps_from_ms(params.timeout_ms);
        let data = [
            symbols,
            params.detection_peak,
            params.detection_min,
            exit_mode,
            ((timeout >> 16) & 0xFF) as u8,
            ((timeout >> 8) & 0xFF) as u8,
            (timeout & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_CAD_PARAMS, &data).await
    }

    async fn start_cad(&mut self) -> Result<(), RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }
        self.configure_irq(irq::CAD_DONE | irq::CAD_DETECTED).await?;
        self.clear_irq(0xFFFF).await?;
        self.write_command(cmd::SET_CAD, &[]).await?;
        self.state = RadioState::AwaitingCadResult;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }
        if data.is_empty() || data.len() > MAX_RX_PAYLOAD {
            return Err(RadioError::InvalidConfig);
        }

        self.set_standby_internal().await?;
        self.set_packet_params(
            self.tx_config.preamble_length,
            data.len() as u8,
            self.tx_config.iq_inverted,
        )
        .await?;
        self.write_buffer(0x00, data).await?;

        self.configure_irq(irq::TX_DONE | irq::TIMEOUT).await?;
        self.clear_irq(0xFFFF).await?;

        // Kick the transmission; TxDone/TxTimeout arrives on DIO1
        let timeout = steps_from_ms(self.tx_config.timeout_ms);
        let timeout_bytes = [
            ((timeout >> 16) & 0xFF) as u8,
            ((timeout >> 8) & 0xFF) as u8,
            (timeout & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_TX, &timeout_bytes).await?;
        self.state = RadioState::Transmitting;
        Ok(())
    }

    async fn set_rx_duty_cycle(&mut self, sleep_us: u32, wake_us: u32) -> Result<(), RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }

        self.set_standby_internal().await?;
        self.set_packet_params(
            self.rx_config.preamble_length,
            MAX_RX_PAYLOAD as u8,
            self.rx_config.iq_inverted,
        )
        .await?;
        self.configure_irq(irq::RX_DONE | irq::TIMEOUT | irq::CRC_ERR | irq::HEADER_ERR)
            .await?;
        self.clear_irq(0xFFFF).await?;

        let rx_period = steps_from_us(wake_us);
        let sleep_period = steps_from_us(sleep_us);
        let data = [
            ((rx_period >> 16) & 0xFF) as u8,
            ((rx_period >> 8) & 0xFF) as u8,
            (rx_period & 0xFF) as u8,
            ((sleep_period >> 16) & 0xFF) as u8,
            ((sleep_period >> 8) & 0xFF) as u8,
            (sleep_period & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_RX_DUTY_CYCLE, &data).await?;
        self.state = RadioState::Receiving;
        Ok(())
    }

    async fn process_irq(&mut self) -> Result<Option<RadioEvent>, RadioError> {
        if !self.initialised {
            return Err(RadioError::NotInitialised);
        }

        let status = self.get_irq_status().await?;
        if status == 0 {
            // Spurious wake
            return Ok(None);
        }
        self.clear_irq(0xFFFF).await?;

        if status & irq::CAD_DONE != 0 {
            let outcome = if status & irq::CAD_DETECTED != 0 {
                CadOutcome::Busy
            } else {
                CadOutcome::Clear
            };
            return Ok(Some(RadioEvent::CadDone(outcome)));
        }

        if status & irq::TX_DONE != 0 {
            return Ok(Some(RadioEvent::TxDone));
        }

        if status & irq::TIMEOUT != 0 {
            let event = if self.state == RadioState::Transmitting {
                RadioEvent::TxTimeout
            } else {
                RadioEvent::RxTimeout
            };
            return Ok(Some(event));
        }

        if status & (irq::CRC_ERR | irq::HEADER_ERR) != 0 {
            return Ok(Some(RadioEvent::RxError));
        }

        if status & irq::RX_DONE != 0 {
            return Ok(Some(self.read_rx_done().await?));
        }

        Ok(None)
    }

    fn state(&self) -> RadioState {
        self.state
    }
}
