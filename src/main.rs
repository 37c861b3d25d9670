#![no_std]
#![no_main]

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"), // version
    env!("CARGO_PKG_NAME"),    // project_name
    "00:00:00",                // build_time
    "2025-01-01",              // build_date
    "0.0.0",                   // idf_ver (not using IDF)
    0x10000,                   // mmu_page_size (64KB)
    0,                         // min_efuse_blk_rev_full (accept all)
    u16::MAX                   // max_efuse_blk_rev_full (accept all)
);

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull};
use esp_hal::handler;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode as SpiMode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::Async;
use static_cell::StaticCell;

use lora_beacon_firmware::events::PostludePolicy;
use lora_beacon_firmware::frame::SensorReport;
use lora_beacon_firmware::radio::{Sx1262Driver, Sx1262Pins};
use lora_beacon_firmware::tasks::{
    control_task, indicator_task, request_send, IndicatorReceiver, INDICATOR_CHANNEL, WAKE,
};

/// Power strategy between radio operations. `Sleep` for the transmit-only
/// node; switch to `RxDutyCycle` on nodes that must also listen.
const POSTLUDE_POLICY: PostludePolicy = PostludePolicy::Sleep;

/// Interval between sensor reports
const REPORT_INTERVAL_MS: u64 = 60_000;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

/// DIO1 input, shared with the interrupt handler
static RADIO_DIO1: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

/// Radio interrupt handler: clear the pin interrupt and raise the wake
/// signal. All actual radio I/O is deferred to the control task.
#[handler]
fn radio_irq_handler() {
    critical_section::with(|cs| {
        if let Some(dio1) = RADIO_DIO1.borrow_ref_mut(cs).as_mut() {
            if dio1.is_interrupt_set() {
                dio1.clear_interrupt();
                WAKE.signal_from_isr();
            }
        }
    });
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_println::logger::init_logger_from_env();

    // LED off until the first radio operation (active low)
    let led = Output::new(peripherals.GPIO48, Level::High, OutputConfig::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Configure SPI for LoRa
    let sclk = peripherals.GPIO7;
    let miso = peripherals.GPIO8;
    let mosi = peripherals.GPIO9;

    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(1))
            .with_mode(SpiMode::_0),
    )
    .unwrap()
    .with_sck(sclk)
    .with_miso(miso)
    .with_mosi(mosi)
    .into_async();

    // Configure LoRa control pins
    let nss = Output::new(peripherals.GPIO41, Level::High, OutputConfig::default());
    let nrst = Output::new(peripherals.GPIO42, Level::High, OutputConfig::default());
    let busy = Input::new(peripherals.GPIO40, InputConfig::default().with_pull(Pull::Down));

    // DIO1 is not owned by the driver: it only exists to wake the control
    // task, which then reads the interrupt cause over SPI
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(radio_irq_handler);
    let mut dio1 = Input::new(peripherals.GPIO39, InputConfig::default().with_pull(Pull::Down));
    critical_section::with(|cs| {
        dio1.listen(Event::RisingEdge);
        RADIO_DIO1.borrow_ref_mut(cs).replace(dio1);
    });

    let lora_pins = Sx1262Pins { nss, nrst, busy };
    let lora_driver = Sx1262Driver::new(spi, lora_pins);

    // Read unique device ID from eFuse MAC address (last byte)
    let mac = esp_hal::efuse::Efuse::read_base_mac_address();
    let device_id = mac[5];

    // Create and run the embassy executor
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(async_main(spawner, lora_driver, led, device_id));
    })
}

#[embassy_executor::task]
async fn async_main(
    spawner: Spawner,
    lora_driver: Sx1262Driver<
        Spi<'static, Async>,
        Output<'static>,
        Output<'static>,
        Input<'static>,
    >,
    led: Output<'static>,
    device_id: u8,
) {
    spawner
        .spawn(radio_control_task(lora_driver))
        .unwrap();
    spawner
        .spawn(led_task(led, INDICATOR_CHANNEL.receiver()))
        .unwrap();
    spawner.spawn(sensor_report_task(device_id)).unwrap();
}

/// Task that owns the radio for the lifetime of the firmware
#[embassy_executor::task]
async fn radio_control_task(
    radio: Sx1262Driver<Spi<'static, Async>, Output<'static>, Output<'static>, Input<'static>>,
) {
    control_task(radio, POSTLUDE_POLICY).await;
}

/// Task that drives the activity LED
#[embassy_executor::task]
async fn led_task(led: Output<'static>, receiver: IndicatorReceiver) {
    indicator_task(led, receiver).await;
}

/// Task that queues a sensor report at a fixed interval.
///
/// Sensor acquisition is not wired up yet; fixed reference readings exercise
/// the full channel-access and transmit path end to end.
#[embassy_executor::task]
async fn sensor_report_task(device_id: u8) {
    let report = SensorReport {
        device_id,
        lights_status: 0,
        lights_on: false,
        temperature_int: 25,
        temperature_frac: 0,
        humidity_int: 50,
        humidity_frac: 0,
        light_primary: 0,
        light_secondary: 0,
        light_threshold: 0x4B00,
        time_sync_request: false,
        secondary_light: false,
    };

    loop {
        Timer::after(Duration::from_millis(REPORT_INTERVAL_MS)).await;
        request_send(report);
    }
}
