#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _; // panic handler

#[rtic::app(
    device = eon_hal::pac,
    dispatchers = []
)]
mod app {
    use core::fmt::Write;

    use eon_hal::clock::ClockConfig;
    use eon_hal::eeprom::DataEeprom;
    use eon_hal::ring_buffer::RingBuffer;
    use eon_hal::rtc::{BackupRegister, RtcClockSource, RtcPeripheral};
    use eon_hal::serial::{SerialConfig, SerialRx, Usart1, Usart1Rx};
    use eon_hal::system::Hardware;
    use eon_hal::tick::{Millis, TickHandler, Ticks};
    use eon_hal::wait::Spin;
    use eon_hal::{Eeprom, Rtc, Serial, System};

    /// EEPROM offset of the boot counter
    const BOOT_COUNT: u32 = 0;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        system: System<Hardware, RtcPeripheral>,
        eeprom: Eeprom<'static, DataEeprom>,
        serial: Serial<'static, Usart1, 64>,
        serial_rx: SerialRx<'static, Usart1Rx, 64>,
        ticks: TickHandler<'static>,
        millis: Millis<'static>,
    }

    #[init(local = [
        ticks: Ticks = Ticks::new(),
        rx_buffer: RingBuffer<64> = RingBuffer::new(),
    ])]
    fn init(cx: init::Context) -> (Shared, Local) {
        defmt::info!("init");

        let dp = cx.device;
        let cp = cx.core;

        let (ticks, millis) = cx.local.ticks.split();

        // Keep the calendar across resets, the LSE runs from the backup domain
        let rtc = Rtc::init(
            RtcPeripheral::new(dp.RTC, dp.EXTI),
            RtcClockSource::Lse,
            false,
            Spin,
        )
        .unwrap();

        let hardware = Hardware::new(
            dp.RCC, dp.PWR, dp.ADC, dp.GPIOA, dp.GPIOB, dp.GPIOC, cp.SCB, cp.SYST,
        );
        let mut system = System::new(hardware, rtc, Spin);

        if system.woke_from_standby() {
            defmt::info!("woke from standby");
        }

        let hclk = system.init(ClockConfig::Hsi16MHz).unwrap();

        let (serial, serial_rx) = Serial::new(
            Usart1::new(dp.USART1),
            SerialConfig::default(),
            hclk,
            cx.local.rx_buffer,
        );

        let eeprom = Eeprom::new(DataEeprom::new(dp.FLASH), millis);

        (
            Shared {},
            Local {
                system,
                eeprom,
                serial,
                serial_rx,
                ticks,
                millis,
            },
        )
    }

    #[task(binds = SysTick, local = [ticks])]
    fn tick(cx: tick::Context) {
        cx.local.ticks.on_tick();
    }

    #[task(binds = USART1, local = [serial_rx])]
    fn usart1(cx: usart1::Context) {
        cx.local.serial_rx.on_interrupt();
    }

    #[idle(local = [system, eeprom, serial, millis])]
    fn idle(cx: idle::Context) -> ! {
        defmt::info!("idle");

        let system = cx.local.system;
        let eeprom = cx.local.eeprom;
        let serial = cx.local.serial;
        let millis = cx.local.millis;

        // The EEPROM waits are bounded by the tick, which only runs once init returns
        let boots = eeprom.read_word(BOOT_COUNT).unwrap_or(0).wrapping_add(1);
        eeprom.unlock();
        if let Err(e) = eeprom.write_word(BOOT_COUNT, boots) {
            defmt::warn!("Failed to store the boot count: {}", e);
        }
        eeprom.lock();
        defmt::info!("boot {}", boots);

        system.rtc().write_backup(BackupRegister::Dr0, boots);

        serial.print("boot ");
        serial.println_num(boots as u64);

        loop {
            // Echo whatever arrived while we were asleep
            while let Some(byte) = serial.read() {
                serial.write(byte);
            }

            let now = system.rtc().datetime();
            let _ = writeln!(serial, "{} up {} ms\r", now, millis.millis());

            match system.stop_seconds(1) {
                Ok(events) => defmt::debug!("woke {}", events),
                Err(e) => defmt::warn!("stop failed: {}", e),
            }
        }
    }
}
