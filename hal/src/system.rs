//! # System management
//!
//! The [`System`] owns the clock controller, the power controller and the RTC. It's the only
//! place the active [`ClockConfig`] can be changed, and every low power mode goes through it so
//! the configuration can be replayed on the way out.
//!
//! ## Power modes
//!
//! | Mode              | Core       | Regulator   | Clock during the wait  |
//! |-------------------|------------|-------------|------------------------|
//! | [`Sleep`]         | sleep      | main        | unchanged              |
//! | [`LowPowerSleep`] | sleep      | low power   | MSI ~65.536 kHz        |
//! | [`Stop`]          | deep sleep | low power   | stopped                |
//! | [`LowPowerStop`]  | deep sleep | low power   | stopped, MSI on wake   |
//! | [`Standby`]       | deep sleep | off         | off, wakes from reset  |
//!
//! Timed modes are ended by the RTC. Seconds use alarm B and milliseconds the wake-up timer. The
//! tick interrupt is disabled for the duration, otherwise it would end the wait after 1 ms.
//!
//! Standby loses the RAM and register contents, so entering it never returns. The next thing
//! that runs is the reset vector.
//!
//! [`Sleep`]: PowerMode::Sleep
//! [`LowPowerSleep`]: PowerMode::LowPowerSleep
//! [`Stop`]: PowerMode::Stop
//! [`LowPowerStop`]: PowerMode::LowPowerStop
//! [`Standby`]: PowerMode::Standby

use cortex_m::peripheral::{NVIC, SCB, SYST};
use embedded_time::rate::Hertz;

use crate::clock::{flash_acr, ClockConfig, ClockTree, Clocks};
use crate::pac::{Interrupt, ADC, GPIOA, GPIOB, GPIOC, PWR, RCC};
use crate::rtc::{Events, Rtc, RtcRegisters, WakeAfter};
use crate::tick::TickTimer;
use crate::wait::{wait_for, Spin, WaitPolicy};
use crate::{Error, WaitFor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    Sleep,
    /// Sleep with the regulator in low power mode, downclocked to the MSI
    LowPowerSleep,
    Stop,
    /// Stop, downclocked to the MSI beforehand
    LowPowerStop,
    Standby,
}

impl PowerMode {
    /// Switch to the low frequency MSI before waiting
    pub fn downclocks(self) -> bool {
        matches!(self, Self::LowPowerSleep | Self::LowPowerStop)
    }

    /// Put the regulator in low power mode while waiting
    pub fn low_power_regulator(self) -> bool {
        matches!(self, Self::LowPowerSleep | Self::Stop | Self::LowPowerStop)
    }

    /// Set `SLEEPDEEP` before waiting
    pub fn deep(self) -> bool {
        matches!(self, Self::Stop | Self::LowPowerStop | Self::Standby)
    }
}

/// Mode entered on deep sleep (`PDDS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeepSleep {
    Stop,
    Standby,
}

/// Pins able to wake the device from standby
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupPin {
    /// WKUP1
    Pa0,
    /// WKUP2
    Pc13,
    /// WKUP3
    Pa2,
}

impl WakeupPin {
    pub const ALL: [WakeupPin; 3] = [Self::Pa0, Self::Pc13, Self::Pa2];
}

/// The power controller, plus the flash and analog blocks it powers down
pub trait PowerControl {
    /// Regulator mode used in sleep and deep sleep (`LPSDSR`)
    fn set_regulator_low_power(&mut self, low_power: bool);
    /// The regulator is still in low power mode (`REGLPF`)
    fn regulator_in_low_power(&self) -> bool;
    fn disable_low_power_run(&mut self);
    fn set_deep_sleep_mode(&mut self, mode: DeepSleep);
    /// Woken from standby (`SBF`)
    fn standby_flag(&self) -> bool;
    fn clear_standby_flag(&mut self);
    fn clear_wakeup_flag(&mut self);
    /// Disable VREFINT, the temperature sensor and the PVD
    fn disable_references(&mut self);
    /// Switch VREFINT off in low power modes without waiting for it on wake up
    fn enable_ultra_low_power(&mut self);
    fn set_wakeup_pin(&mut self, pin: WakeupPin, enabled: bool);
    fn set_flash_prefetch(&mut self, enabled: bool);
    /// Power the flash down while sleeping
    fn set_flash_sleep_power_down(&mut self, enabled: bool);
    /// Put every pin of ports A-C in analog mode with no pulls
    fn turn_off_gpios(&mut self);
}

/// The parts of the Cortex-M core involved in entering a low power mode
pub trait Core {
    fn disable_interrupts(&mut self);
    fn enable_interrupts(&mut self);
    fn unmask_rtc(&mut self);
    fn mask_rtc(&mut self);
    fn unpend_rtc(&mut self);
    fn set_sleep_deep(&mut self, deep: bool);
    fn wait_for_interrupt(&mut self);
}

/// How the device leaves standby
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum StandbyWake {
    Reset,
    Rtc(u32),
    Pin(WakeupPin),
}

/// # System
///
/// `H` is the register level hardware, `R` the RTC registers and `W` the policy for polling
/// ready flags.
pub struct System<H, R, W = Spin> {
    hw: H,
    rtc: Rtc<R, W>,
    clocks: Clocks,
    wait: W,
}

impl<H, R, W> System<H, R, W>
where
    H: ClockTree + TickTimer + PowerControl + Core,
    R: RtcRegisters,
    W: WaitPolicy,
{
    pub fn new(hw: H, rtc: Rtc<R, W>, wait: W) -> Self {
        Self {
            hw,
            rtc,
            clocks: Clocks::new(),
            wait,
        }
    }

    /// Apply the clock configuration and remember it
    ///
    /// Can be called again at runtime to switch configuration.
    pub fn init(&mut self, config: ClockConfig) -> Result<Hertz, Error> {
        self.clocks.apply(&mut self.hw, &mut self.wait, config)
    }

    /// The active clock configuration
    pub fn clock(&self) -> Option<ClockConfig> {
        self.clocks.current()
    }

    pub fn hclk(&self) -> Option<Hertz> {
        self.clocks.hclk()
    }

    pub fn rtc(&mut self) -> &mut Rtc<R, W> {
        &mut self.rtc
    }

    /// Check and clear whether the last reset was a wake from standby
    pub fn woke_from_standby(&mut self) -> bool {
        let woke = self.hw.standby_flag();
        if woke {
            self.hw.clear_standby_flag();
        }
        woke
    }

    pub fn sleep_seconds(&mut self, seconds: u32) -> Result<Events, Error> {
        self.enter(PowerMode::Sleep, WakeAfter::Seconds(seconds))
    }

    pub fn sleep_millis(&mut self, ms: u32) -> Result<Events, Error> {
        self.enter(PowerMode::Sleep, WakeAfter::Millis(ms))
    }

    pub fn sleep_lp_seconds(&mut self, seconds: u32) -> Result<Events, Error> {
        self.enter(PowerMode::LowPowerSleep, WakeAfter::Seconds(seconds))
    }

    pub fn sleep_lp_millis(&mut self, ms: u32) -> Result<Events, Error> {
        self.enter(PowerMode::LowPowerSleep, WakeAfter::Millis(ms))
    }

    pub fn stop_seconds(&mut self, seconds: u32) -> Result<Events, Error> {
        self.enter(PowerMode::Stop, WakeAfter::Seconds(seconds))
    }

    pub fn stop_millis(&mut self, ms: u32) -> Result<Events, Error> {
        self.enter(PowerMode::Stop, WakeAfter::Millis(ms))
    }

    pub fn stop_lp_seconds(&mut self, seconds: u32) -> Result<Events, Error> {
        self.enter(PowerMode::LowPowerStop, WakeAfter::Seconds(seconds))
    }

    pub fn stop_lp_millis(&mut self, ms: u32) -> Result<Events, Error> {
        self.enter(PowerMode::LowPowerStop, WakeAfter::Millis(ms))
    }

    /// Enter `mode` until the RTC fires `after` from now
    ///
    /// Returns the RTC events seen on wake. A duration of 0 leaves the RTC disarmed, so only an
    /// other enabled interrupt can end the wait. [`PowerMode::Standby`] only returns if the RTC
    /// couldn't be armed; standby with a millisecond duration is rounded up to whole seconds.
    pub fn enter(&mut self, mode: PowerMode, after: WakeAfter) -> Result<Events, Error> {
        if mode == PowerMode::Standby {
            let seconds = match after {
                WakeAfter::Seconds(seconds) => seconds,
                WakeAfter::Millis(ms) => (ms as u64).div_ceil(1000) as u32,
            };
            return Err(self.standby_seconds(seconds));
        }

        trace!("Entering {:?} for {:?}", mode, after);

        if mode.downclocks() {
            self.hw.set_flash_prefetch(false);
            self.hw.set_flash_sleep_power_down(true);

            if let Err(error) = self.downclock() {
                warn!("Downclock failed: {}", error);
                self.hw.set_flash_sleep_power_down(false);
                self.hw.set_flash_prefetch(true);
                // The downclock error is the one reported
                let _ = self.clocks.restore(&mut self.hw, &mut self.wait);
                return Err(error);
            }
        }

        self.hw.disable_interrupts();
        self.hw.disable_tick();
        self.hw.unmask_rtc();

        let armed = self.rtc.arm(after);
        if armed.is_ok() {
            self.hw.set_deep_sleep_mode(DeepSleep::Stop);
            self.hw.clear_wakeup_flag();
            self.hw.set_regulator_low_power(mode.low_power_regulator());
            self.hw.set_sleep_deep(mode.deep());

            self.hw.wait_for_interrupt();
        }

        let resumed = self.resume(mode);
        armed?;
        resumed
    }

    fn downclock(&mut self) -> Result<(), Error> {
        Clocks::reset(&mut self.hw, &mut self.wait)?;
        self.clocks.decrease(&mut self.hw, &mut self.wait)
    }

    /// Leave a low power mode, restoring the state from before [`System::enter`]
    fn resume(&mut self, mode: PowerMode) -> Result<Events, Error> {
        self.hw.set_sleep_deep(false);

        let mut result = Ok(());

        if mode.low_power_regulator() {
            self.hw.disable_low_power_run();
            self.hw.set_regulator_low_power(false);

            let hw = &self.hw;
            result = wait_for(&mut self.wait, WaitFor::RegulatorMainMode, || {
                !hw.regulator_in_low_power()
            });
        }

        if mode.downclocks() {
            self.hw.set_flash_sleep_power_down(false);
            self.hw.set_flash_prefetch(true);
        }

        // Stop hands the system clock back to the MSI
        if result.is_ok() && (mode.downclocks() || mode.deep()) {
            result = self.clocks.restore(&mut self.hw, &mut self.wait).map(|_| ());
        }

        let events = self.rtc.take_events();
        self.rtc.disarm();
        self.hw.unpend_rtc();
        self.hw.mask_rtc();

        self.hw.enable_interrupts();
        self.hw.enable_tick();

        trace!("Resumed from {:?}", mode);

        result.map(|()| events)
    }

    /// Stop until any enabled interrupt fires. The RTC isn't armed
    pub fn stop_until_interrupt(&mut self) -> Result<(), Error> {
        self.hw.disable_tick();
        self.hw.set_deep_sleep_mode(DeepSleep::Stop);
        self.hw.set_regulator_low_power(true);
        self.hw.set_sleep_deep(true);

        self.hw.wait_for_interrupt();

        self.hw.set_sleep_deep(false);
        self.hw.set_regulator_low_power(false);
        let restored = self.clocks.restore(&mut self.hw, &mut self.wait);
        self.hw.enable_tick();

        restored.map(|_| ())
    }

    /// Enter standby. Only a reset or an already enabled wake-up pin ends it
    pub fn standby(&mut self) -> ! {
        // Only arming the RTC can fail
        let _ = self.prepare_standby(StandbyWake::Reset);
        self.enter_standby()
    }

    /// Enter standby until `pin` rises
    pub fn standby_until_wakeup_pin(&mut self, pin: WakeupPin) -> ! {
        let _ = self.prepare_standby(StandbyWake::Pin(pin));
        self.enter_standby()
    }

    /// Enter standby for `seconds`
    ///
    /// Only returns if alarm B couldn't be armed, in which case the tick is running again.
    pub fn standby_seconds(&mut self, seconds: u32) -> Error {
        if let Err(error) = self.prepare_standby(StandbyWake::Rtc(seconds)) {
            self.hw.enable_tick();
            self.hw.enable_interrupts();
            return error;
        }

        self.enter_standby()
    }

    fn prepare_standby(&mut self, wake: StandbyWake) -> Result<(), Error> {
        info!("Entering standby, wake on {:?}", wake);

        if self.hw.standby_flag() {
            self.hw.clear_standby_flag();
        }

        if wake != StandbyWake::Reset {
            self.hw.disable_interrupts();
        }
        self.hw.disable_tick();
        self.hw.disable_references();

        // A pin held high sets WUF again as soon as it's cleared. Other enabled pins are left
        // alone, they still end standby
        if let StandbyWake::Pin(pin) = wake {
            self.hw.set_wakeup_pin(pin, false);
        }

        self.hw.clear_wakeup_flag();
        self.hw.enable_ultra_low_power();

        match wake {
            StandbyWake::Reset => {}
            StandbyWake::Rtc(seconds) => {
                self.hw.unmask_rtc();
                self.rtc.arm_after(seconds)?;
            }
            StandbyWake::Pin(pin) => self.hw.set_wakeup_pin(pin, true),
        }

        self.hw.set_deep_sleep_mode(DeepSleep::Standby);

        Ok(())
    }

    fn enter_standby(&mut self) -> ! {
        self.hw.set_sleep_deep(true);

        loop {
            self.hw.wait_for_interrupt();
        }
    }

    /// Put every GPIO in analog mode, the lowest power state
    ///
    /// The SWD pins PA13 and PA14 are left alone so the debugger stays attached.
    pub fn turn_off_all_gpios(&mut self) {
        self.hw.turn_off_gpios();
    }

    /// Release the hardware
    pub fn free(self) -> (H, Rtc<R, W>) {
        (self.hw, self.rtc)
    }
}

/// The peripherals driven by the [`System`]
pub struct Hardware {
    pub(crate) rcc: RCC,
    pub(crate) pwr: PWR,
    adc: ADC,
    gpioa: GPIOA,
    gpiob: GPIOB,
    gpioc: GPIOC,
    scb: SCB,
    syst: SYST,
}

impl Hardware {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rcc: RCC,
        pwr: PWR,
        adc: ADC,
        gpioa: GPIOA,
        gpiob: GPIOB,
        gpioc: GPIOC,
        scb: SCB,
        syst: SYST,
    ) -> Self {
        Self {
            rcc,
            pwr,
            adc,
            gpioa,
            gpiob,
            gpioc,
            scb,
            syst,
        }
    }
}

/// Put the listed pins of a port in analog mode
macro_rules! analog {
    ($w:ident, $($mode:ident),+) => {
        $w$(.$mode().analog())+
    };
}

impl TickTimer for Hardware {
    fn set_period(&mut self, hclk: Hertz) {
        self.syst.set_period(hclk);
    }

    fn enable_tick(&mut self) {
        self.syst.enable_tick();
    }

    fn disable_tick(&mut self) {
        self.syst.disable_tick();
    }
}

impl PowerControl for Hardware {
    fn set_regulator_low_power(&mut self, low_power: bool) {
        self.pwr.cr.modify(|_, w| {
            if low_power {
                w.lpsdsr().low_power_mode()
            } else {
                w.lpsdsr().main_mode()
            }
        });
    }

    fn regulator_in_low_power(&self) -> bool {
        self.pwr.csr.read().reglpf().is_not_ready()
    }

    fn disable_low_power_run(&mut self) {
        self.pwr.cr.modify(|_, w| w.lprun().main_mode());
    }

    fn set_deep_sleep_mode(&mut self, mode: DeepSleep) {
        self.pwr.cr.modify(|_, w| match mode {
            DeepSleep::Stop => w.pdds().stop_mode(),
            DeepSleep::Standby => w.pdds().standby_mode(),
        });
    }

    fn standby_flag(&self) -> bool {
        self.pwr.csr.read().sbf().is_standby_event()
    }

    fn clear_standby_flag(&mut self) {
        self.pwr.cr.modify(|_, w| w.csbf().clear());
    }

    fn clear_wakeup_flag(&mut self) {
        self.pwr.cr.modify(|_, w| w.cwuf().clear());
    }

    fn disable_references(&mut self) {
        self.adc
            .ccr
            .modify(|_, w| w.vrefen().disabled().tsen().disabled());
        self.pwr.cr.modify(|_, w| w.pvde().disabled());
    }

    fn enable_ultra_low_power(&mut self) {
        self.pwr.cr.modify(|_, w| w.ulp().enabled().fwu().enabled());
    }

    fn set_wakeup_pin(&mut self, pin: WakeupPin, enabled: bool) {
        self.pwr.csr.modify(|_, w| match pin {
            WakeupPin::Pa0 => w.ewup1().bit(enabled),
            WakeupPin::Pc13 => w.ewup2().bit(enabled),
            WakeupPin::Pa2 => w.ewup3().bit(enabled),
        });
    }

    fn set_flash_prefetch(&mut self, enabled: bool) {
        flash_acr().acr.modify(|_, w| {
            if enabled {
                w.prften().enabled()
            } else {
                w.prften().disabled()
            }
        });
    }

    fn set_flash_sleep_power_down(&mut self, enabled: bool) {
        flash_acr().acr.modify(|_, w| {
            if enabled {
                w.sleep_pd().nvmpwr_down_mode()
            } else {
                w.sleep_pd().nvmidle_mode()
            }
        });
    }

    fn turn_off_gpios(&mut self) {
        self.rcc
            .iopenr
            .modify(|_, w| w.iopaen().enabled().iopben().enabled().iopcen().enabled());

        // SWDIO and SWCLK keep their alternate function and pulls
        self.gpioa.moder.write(|w| {
            analog!(
                w, mode0, mode1, mode2, mode3, mode4, mode5, mode6, mode7, mode8, mode9, mode10,
                mode11, mode12, mode15
            )
            .mode13()
            .alternate()
            .mode14()
            .alternate()
        });
        self.gpioa.pupdr.reset();
        self.gpioa.otyper.reset();
        self.gpioa.odr.reset();

        // Every other port resets to analog with no pulls
        for port in [&*self.gpiob, &*self.gpioc] {
            port.moder.reset();
            port.pupdr.reset();
            port.otyper.reset();
            port.odr.reset();
        }
    }
}

impl Core for Hardware {
    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
    }

    fn enable_interrupts(&mut self) {
        // Safety: Only called on the way out of a low power mode, to undo `disable_interrupts`
        unsafe { cortex_m::interrupt::enable() };
    }

    fn unmask_rtc(&mut self) {
        // Safety: The RTC interrupt is only unmasked for the duration of a low power mode
        unsafe { NVIC::unmask(Interrupt::RTC) };
    }

    fn mask_rtc(&mut self) {
        NVIC::mask(Interrupt::RTC);
    }

    fn unpend_rtc(&mut self) {
        NVIC::unpend(Interrupt::RTC);
    }

    fn set_sleep_deep(&mut self, deep: bool) {
        if deep {
            self.scb.set_sleepdeep();
        } else {
            self.scb.clear_sleepdeep();
        }
    }

    fn wait_for_interrupt(&mut self) {
        cortex_m::asm::wfi();
    }
}
