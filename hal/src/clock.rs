//! # Clock controller
//!
//! The system clock is selected from a fixed set of [`ClockConfig`]s. Each configuration maps to
//! a [`ClockProfile`] describing the oscillator, PLL, prescaler, voltage range and flash wait
//! states needed to reach its frequency.
//!
//! [`Clocks`] remembers the last configuration applied so it can be replayed when the core comes
//! back from a low power mode that had to downclock to the MSI.
//!
//! Every ready flag is polled through the [`WaitPolicy`] of the caller.

use embedded_time::rate::Hertz;

use crate::pac::FLASH;
use crate::system::Hardware;
use crate::tick::TickTimer;
use crate::wait::{wait_for, WaitPolicy};
use crate::{Error, WaitFor};

/// HSI16 factory trim midpoint
const HSI_TRIM: u8 = 16;
const MSI_TRIM: u8 = 0;

const HSI16_FREQ: u32 = 16_000_000;

/// Supported system clock configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockConfig {
    /// HSI16 through the PLL (x4, /2)
    Hsi32MHz,
    /// HSI16 direct
    Hsi16MHz,
    /// HSI16 through the PLL (x3, /3), AHB /2
    Hsi8MHz,
    /// HSI16 through the PLL (x3, /2), AHB /4
    Hsi6MHz,
    /// HSI16 through the PLL (x3, /3), AHB /4
    Hsi4MHz,
    /// MSI range 5
    Msi2MHz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oscillator {
    Hsi16,
    Msi,
}

/// System clock switch positions (`SW`/`SWS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysClkSource {
    Msi,
    Hsi16,
    Hse,
    Pll,
}

/// Core voltage range (`VOS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageRange {
    /// 1.8 V, up to 32 MHz
    Range1,
    /// 1.5 V, up to 16 MHz
    Range2,
    /// 1.2 V, up to 4.2 MHz
    Range3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashLatency {
    Zero,
    One,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MsiRange {
    /// ~65.536 kHz
    Range0 = 0,
    /// ~131.072 kHz
    Range1 = 1,
    /// ~262.144 kHz
    Range2 = 2,
    /// ~524.288 kHz
    Range3 = 3,
    /// ~1.048 MHz
    Range4 = 4,
    /// ~2.097 MHz
    Range5 = 5,
    /// ~4.194 MHz
    Range6 = 6,
}

impl MsiRange {
    pub const fn freq(self) -> Hertz {
        Hertz(65_536 << self as u32)
    }
}

/// PLL multiplier and divider applied to the HSI16
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pll {
    pub mul: PllMul,
    pub div: PllDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllMul {
    Mul3,
    Mul4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllDiv {
    Div2,
    Div3,
}

impl Pll {
    const fn output(self, input: u32) -> u32 {
        let mul = match self.mul {
            PllMul::Mul3 => 3,
            PllMul::Mul4 => 4,
        };
        let div = match self.div {
            PllDiv::Div2 => 2,
            PllDiv::Div3 => 3,
        };

        input * mul / div
    }
}

/// AHB prescaler (`HPRE`). The APB prescalers are always left at /1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AhbPrescaler {
    Div1,
    Div2,
    Div4,
}

impl AhbPrescaler {
    const fn divisor(self) -> u32 {
        match self {
            Self::Div1 => 1,
            Self::Div2 => 2,
            Self::Div4 => 4,
        }
    }
}

/// Everything needed to program a [`ClockConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockProfile {
    pub oscillator: Oscillator,
    pub msi_range: Option<MsiRange>,
    pub pll: Option<Pll>,
    pub source: SysClkSource,
    pub ahb: AhbPrescaler,
    pub voltage: VoltageRange,
    pub latency: FlashLatency,
}

impl ClockProfile {
    /// Resulting core clock
    pub const fn hclk(&self) -> Hertz {
        let sysclk = match (self.oscillator, self.pll, self.msi_range) {
            (Oscillator::Hsi16, Some(pll), _) => pll.output(HSI16_FREQ),
            (Oscillator::Hsi16, None, _) => HSI16_FREQ,
            (Oscillator::Msi, _, Some(range)) => range.freq().0,
            (Oscillator::Msi, _, None) => MsiRange::Range5.freq().0,
        };

        Hertz(sysclk / self.ahb.divisor())
    }
}

impl ClockConfig {
    pub const fn profile(self) -> ClockProfile {
        const fn hsi_pll(mul: PllMul, div: PllDiv, ahb: AhbPrescaler, voltage: VoltageRange) -> ClockProfile {
            ClockProfile {
                oscillator: Oscillator::Hsi16,
                msi_range: None,
                pll: Some(Pll { mul, div }),
                source: SysClkSource::Pll,
                ahb,
                voltage,
                latency: FlashLatency::Zero,
            }
        }

        match self {
            Self::Hsi32MHz => ClockProfile {
                latency: FlashLatency::One,
                ..hsi_pll(PllMul::Mul4, PllDiv::Div2, AhbPrescaler::Div1, VoltageRange::Range1)
            },
            Self::Hsi16MHz => ClockProfile {
                oscillator: Oscillator::Hsi16,
                msi_range: None,
                pll: None,
                source: SysClkSource::Hsi16,
                ahb: AhbPrescaler::Div1,
                voltage: VoltageRange::Range1,
                latency: FlashLatency::Zero,
            },
            Self::Hsi8MHz => hsi_pll(PllMul::Mul3, PllDiv::Div3, AhbPrescaler::Div2, VoltageRange::Range1),
            Self::Hsi6MHz => hsi_pll(PllMul::Mul3, PllDiv::Div2, AhbPrescaler::Div4, VoltageRange::Range2),
            Self::Hsi4MHz => hsi_pll(PllMul::Mul3, PllDiv::Div3, AhbPrescaler::Div4, VoltageRange::Range1),
            Self::Msi2MHz => ClockProfile {
                oscillator: Oscillator::Msi,
                msi_range: Some(MsiRange::Range5),
                pll: None,
                source: SysClkSource::Msi,
                ahb: AhbPrescaler::Div1,
                voltage: VoltageRange::Range3,
                latency: FlashLatency::Zero,
            },
        }
    }

    pub const fn hclk(self) -> Hertz {
        self.profile().hclk()
    }
}

/// The reset and clock control registers
pub trait ClockTree {
    /// Enable the SYSCFG and PWR bus clocks
    fn enable_bus_clocks(&mut self);
    fn set_flash_latency(&mut self, latency: FlashLatency);
    /// The wait states currently in effect
    fn flash_latency(&self) -> FlashLatency;
    fn set_voltage_range(&mut self, range: VoltageRange);
    /// The regulator reached the requested voltage range
    fn voltage_range_ready(&self) -> bool;
    fn enable_oscillator(&mut self, oscillator: Oscillator);
    fn disable_oscillator(&mut self, oscillator: Oscillator);
    fn oscillator_ready(&self, oscillator: Oscillator) -> bool;
    fn trim_oscillator(&mut self, oscillator: Oscillator, trim: u8);
    fn set_msi_range(&mut self, range: MsiRange);
    /// Program the PLL with the HSI16 as input. The PLL must be off
    fn configure_pll(&mut self, pll: Pll);
    fn enable_pll(&mut self);
    fn disable_pll(&mut self);
    fn pll_ready(&self) -> bool;
    fn set_prescalers(&mut self, ahb: AhbPrescaler);
    fn select_sysclk(&mut self, source: SysClkSource);
    /// The source currently driving the system clock
    fn sysclk(&self) -> SysClkSource;
}

/// Clock controller
///
/// Owns the record of the active configuration. Only [`Clocks::apply`] changes it.
#[derive(Debug, Default)]
pub struct Clocks {
    current: Option<ClockConfig>,
}

impl Clocks {
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// The configuration applied last
    pub fn current(&self) -> Option<ClockConfig> {
        self.current
    }

    /// Core clock of the active configuration
    pub fn hclk(&self) -> Option<Hertz> {
        self.current.map(ClockConfig::hclk)
    }

    /// Switch to `config`, reprogram the tick for the new frequency and remember it
    pub fn apply<H, W>(&mut self, hw: &mut H, wait: &mut W, config: ClockConfig) -> Result<Hertz, Error>
    where
        H: ClockTree + TickTimer,
        W: WaitPolicy,
    {
        if self.current.is_some() {
            Self::reset(hw, wait)?;
        }

        let hclk = Self::program(hw, wait, config)?;
        self.current = Some(config);

        info!("Clock set to {:?} ({} Hz)", config, hclk.0);

        Ok(hclk)
    }

    /// Reset the tree and replay the active configuration
    ///
    /// Returns `None` if no configuration was ever applied, in which case the tree is left alone.
    pub fn restore<H, W>(&mut self, hw: &mut H, wait: &mut W) -> Result<Option<Hertz>, Error>
    where
        H: ClockTree + TickTimer,
        W: WaitPolicy,
    {
        let Some(config) = self.current else {
            return Ok(None);
        };

        Self::reset(hw, wait)?;
        let hclk = Self::program(hw, wait, config)?;
        debug!("Clock restored to {:?}", config);

        Ok(Some(hclk))
    }

    /// Drop to the MSI at ~65.536 kHz ahead of a low power mode
    ///
    /// The active configuration is kept so [`Clocks::restore`] can return to it. The tick is not
    /// reprogrammed, it has to be disabled by the caller.
    pub fn decrease<H, W>(&mut self, hw: &mut H, wait: &mut W) -> Result<(), Error>
    where
        H: ClockTree,
        W: WaitPolicy,
    {
        hw.enable_oscillator(Oscillator::Msi);
        wait_for(wait, WaitFor::Oscillator(Oscillator::Msi), || {
            hw.oscillator_ready(Oscillator::Msi)
        })?;
        hw.set_msi_range(MsiRange::Range5);
        hw.select_sysclk(SysClkSource::Msi);
        wait_for(wait, WaitFor::ClockSwitch(SysClkSource::Msi), || {
            hw.sysclk() == SysClkSource::Msi
        })?;

        hw.set_msi_range(MsiRange::Range0);

        hw.set_voltage_range(VoltageRange::Range2);
        wait_for(wait, WaitFor::VoltageScaling, || hw.voltage_range_ready())?;
        Self::set_latency(hw, wait, FlashLatency::Zero)?;

        Ok(())
    }

    /// Return the tree to its reset state, MSI range 5 driving the system clock
    pub fn reset<H, W>(hw: &mut H, wait: &mut W) -> Result<(), Error>
    where
        H: ClockTree,
        W: WaitPolicy,
    {
        hw.enable_oscillator(Oscillator::Msi);
        wait_for(wait, WaitFor::Oscillator(Oscillator::Msi), || {
            hw.oscillator_ready(Oscillator::Msi)
        })?;
        hw.set_msi_range(MsiRange::Range5);

        hw.select_sysclk(SysClkSource::Msi);
        wait_for(wait, WaitFor::ClockSwitch(SysClkSource::Msi), || {
            hw.sysclk() == SysClkSource::Msi
        })?;
        hw.set_prescalers(AhbPrescaler::Div1);

        hw.disable_pll();
        wait_for(wait, WaitFor::Pll, || !hw.pll_ready())?;
        hw.disable_oscillator(Oscillator::Hsi16);

        Ok(())
    }

    /// The new latency has to be in effect before the clock changes
    fn set_latency<H, W>(hw: &mut H, wait: &mut W, latency: FlashLatency) -> Result<(), Error>
    where
        H: ClockTree,
        W: WaitPolicy,
    {
        hw.set_flash_latency(latency);
        wait_for(wait, WaitFor::FlashLatency, || hw.flash_latency() == latency)
    }

    fn program<H, W>(hw: &mut H, wait: &mut W, config: ClockConfig) -> Result<Hertz, Error>
    where
        H: ClockTree + TickTimer,
        W: WaitPolicy,
    {
        let profile = config.profile();

        hw.enable_bus_clocks();
        Self::set_latency(hw, wait, profile.latency)?;
        hw.set_voltage_range(profile.voltage);
        wait_for(wait, WaitFor::VoltageScaling, || hw.voltage_range_ready())?;

        let oscillator = profile.oscillator;
        hw.enable_oscillator(oscillator);
        wait_for(wait, WaitFor::Oscillator(oscillator), || {
            hw.oscillator_ready(oscillator)
        })?;

        match oscillator {
            Oscillator::Hsi16 => hw.trim_oscillator(oscillator, HSI_TRIM),
            Oscillator::Msi => {
                hw.set_msi_range(profile.msi_range.unwrap_or(MsiRange::Range5));
                hw.trim_oscillator(oscillator, MSI_TRIM);
            }
        }

        if let Some(pll) = profile.pll {
            hw.configure_pll(pll);
            hw.enable_pll();
            wait_for(wait, WaitFor::Pll, || hw.pll_ready())?;
        }

        hw.set_prescalers(profile.ahb);

        hw.select_sysclk(profile.source);
        wait_for(wait, WaitFor::ClockSwitch(profile.source), || {
            hw.sysclk() == profile.source
        })?;

        let hclk = profile.hclk();
        hw.set_period(hclk);
        hw.enable_tick();

        Ok(hclk)
    }
}

pub(crate) fn flash_acr() -> &'static crate::pac::flash::RegisterBlock {
    // Correctness: The access control register is only touched by the clock and power
    // controllers, which are owned by the `System`. The data EEPROM driver owns the FLASH
    // peripheral but never writes ACR.
    unsafe { &*FLASH::ptr() }
}

impl ClockTree for Hardware {
    fn enable_bus_clocks(&mut self) {
        self.rcc.apb2enr.modify(|_, w| w.syscfgen().enabled());
        self.rcc.apb1enr.modify(|_, w| w.pwren().enabled());
    }

    fn set_flash_latency(&mut self, latency: FlashLatency) {
        flash_acr().acr.modify(|_, w| match latency {
            FlashLatency::Zero => w.latency().ws0(),
            FlashLatency::One => w.latency().ws1(),
        });
    }

    fn flash_latency(&self) -> FlashLatency {
        if flash_acr().acr.read().latency().is_ws1() {
            FlashLatency::One
        } else {
            FlashLatency::Zero
        }
    }

    fn set_voltage_range(&mut self, range: VoltageRange) {
        self.pwr.cr.modify(|_, w| match range {
            VoltageRange::Range1 => w.vos().v1_8(),
            VoltageRange::Range2 => w.vos().v1_5(),
            VoltageRange::Range3 => w.vos().v1_2(),
        });
    }

    fn voltage_range_ready(&self) -> bool {
        self.pwr.csr.read().vosf().is_ready()
    }

    fn enable_oscillator(&mut self, oscillator: Oscillator) {
        self.rcc.cr.modify(|_, w| match oscillator {
            Oscillator::Hsi16 => w.hsi16on().enabled(),
            Oscillator::Msi => w.msion().enabled(),
        });
    }

    fn disable_oscillator(&mut self, oscillator: Oscillator) {
        self.rcc.cr.modify(|_, w| match oscillator {
            Oscillator::Hsi16 => w.hsi16on().disabled(),
            Oscillator::Msi => w.msion().disabled(),
        });
    }

    fn oscillator_ready(&self, oscillator: Oscillator) -> bool {
        let cr = self.rcc.cr.read();
        match oscillator {
            Oscillator::Hsi16 => cr.hsi16rdyf().is_ready(),
            Oscillator::Msi => cr.msirdy().is_ready(),
        }
    }

    fn trim_oscillator(&mut self, oscillator: Oscillator, trim: u8) {
        self.rcc.icscr.modify(|_, w| match oscillator {
            Oscillator::Hsi16 => w.hsi16trim().bits(trim),
            Oscillator::Msi => w.msitrim().bits(trim),
        });
    }

    fn set_msi_range(&mut self, range: MsiRange) {
        self.rcc.icscr.modify(|_, w| match range {
            MsiRange::Range0 => w.msirange().range0(),
            MsiRange::Range1 => w.msirange().range1(),
            MsiRange::Range2 => w.msirange().range2(),
            MsiRange::Range3 => w.msirange().range3(),
            MsiRange::Range4 => w.msirange().range4(),
            MsiRange::Range5 => w.msirange().range5(),
            MsiRange::Range6 => w.msirange().range6(),
        });
    }

    fn configure_pll(&mut self, pll: Pll) {
        self.rcc.cfgr.modify(|_, w| {
            w.pllsrc().hsi16();
            match pll.mul {
                PllMul::Mul3 => w.pllmul().mul3(),
                PllMul::Mul4 => w.pllmul().mul4(),
            };
            match pll.div {
                PllDiv::Div2 => w.plldiv().div2(),
                PllDiv::Div3 => w.plldiv().div3(),
            }
        });
    }

    fn enable_pll(&mut self) {
        self.rcc.cr.modify(|_, w| w.pllon().enabled());
    }

    fn disable_pll(&mut self) {
        self.rcc.cr.modify(|_, w| w.pllon().disabled());
    }

    fn pll_ready(&self) -> bool {
        self.rcc.cr.read().pllrdy().is_locked()
    }

    fn set_prescalers(&mut self, ahb: AhbPrescaler) {
        self.rcc.cfgr.modify(|_, w| {
            w.ppre1().div1().ppre2().div1();
            match ahb {
                AhbPrescaler::Div1 => w.hpre().div1(),
                AhbPrescaler::Div2 => w.hpre().div2(),
                AhbPrescaler::Div4 => w.hpre().div4(),
            }
        });
    }

    fn select_sysclk(&mut self, source: SysClkSource) {
        self.rcc.cfgr.modify(|_, w| match source {
            SysClkSource::Msi => w.sw().msi(),
            SysClkSource::Hsi16 => w.sw().hsi16(),
            SysClkSource::Hse => w.sw().hse(),
            SysClkSource::Pll => w.sw().pll(),
        });
    }

    fn sysclk(&self) -> SysClkSource {
        let sws = self.rcc.cfgr.read().sws();
        if sws.is_msi() {
            SysClkSource::Msi
        } else if sws.is_hsi16() {
            SysClkSource::Hsi16
        } else if sws.is_hse() {
            SysClkSource::Hse
        } else {
            SysClkSource::Pll
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wait::{Bounded, Spin};
    use rstest::rstest;

    /// Register model of the clock tree
    ///
    /// Ready flags follow their enable bits immediately unless the oscillator is marked as dead.
    #[derive(Debug)]
    pub(crate) struct MockTree {
        pub hsi_on: bool,
        pub msi_on: bool,
        pub msi_range: MsiRange,
        pub pll: Option<Pll>,
        pub pll_on: bool,
        pub sysclk: SysClkSource,
        pub ahb: AhbPrescaler,
        pub voltage: VoltageRange,
        pub latency: FlashLatency,
        pub trims: [Option<u8>; 2],
        pub hsi_dead: bool,
        /// The regulator never settles in this range
        pub stuck_voltage: Option<VoltageRange>,
        pub tick_reload: Option<u32>,
        pub tick_enabled: bool,
    }

    impl Default for MockTree {
        fn default() -> Self {
            Self {
                hsi_on: false,
                msi_on: true,
                msi_range: MsiRange::Range5,
                pll: None,
                pll_on: false,
                sysclk: SysClkSource::Msi,
                ahb: AhbPrescaler::Div1,
                voltage: VoltageRange::Range2,
                latency: FlashLatency::Zero,
                trims: [None; 2],
                hsi_dead: false,
                stuck_voltage: None,
                tick_reload: None,
                tick_enabled: false,
            }
        }
    }

    impl MockTree {
        /// Frequency the modelled tree is actually producing
        pub fn hclk(&self) -> u32 {
            let sysclk = match self.sysclk {
                SysClkSource::Msi => self.msi_range.freq().0,
                SysClkSource::Hsi16 => HSI16_FREQ,
                SysClkSource::Pll => self.pll.map_or(0, |pll| pll.output(HSI16_FREQ)),
                SysClkSource::Hse => 0,
            };
            sysclk / self.ahb.divisor()
        }
    }

    impl ClockTree for MockTree {
        fn enable_bus_clocks(&mut self) {}

        fn set_flash_latency(&mut self, latency: FlashLatency) {
            self.latency = latency;
        }

        fn flash_latency(&self) -> FlashLatency {
            self.latency
        }

        fn set_voltage_range(&mut self, range: VoltageRange) {
            self.voltage = range;
        }

        fn voltage_range_ready(&self) -> bool {
            self.stuck_voltage != Some(self.voltage)
        }

        fn enable_oscillator(&mut self, oscillator: Oscillator) {
            match oscillator {
                Oscillator::Hsi16 => self.hsi_on = true,
                Oscillator::Msi => self.msi_on = true,
            }
        }

        fn disable_oscillator(&mut self, oscillator: Oscillator) {
            match oscillator {
                Oscillator::Hsi16 => self.hsi_on = false,
                Oscillator::Msi => self.msi_on = false,
            }
        }

        fn oscillator_ready(&self, oscillator: Oscillator) -> bool {
            match oscillator {
                Oscillator::Hsi16 => self.hsi_on && !self.hsi_dead,
                Oscillator::Msi => self.msi_on,
            }
        }

        fn trim_oscillator(&mut self, oscillator: Oscillator, trim: u8) {
            self.trims[oscillator as usize] = Some(trim);
        }

        fn set_msi_range(&mut self, range: MsiRange) {
            self.msi_range = range;
        }

        fn configure_pll(&mut self, pll: Pll) {
            assert!(!self.pll_on, "PLL reconfigured while running");
            self.pll = Some(pll);
        }

        fn enable_pll(&mut self) {
            self.pll_on = true;
        }

        fn disable_pll(&mut self) {
            self.pll_on = false;
        }

        fn pll_ready(&self) -> bool {
            self.pll_on && self.hsi_on && !self.hsi_dead
        }

        fn set_prescalers(&mut self, ahb: AhbPrescaler) {
            self.ahb = ahb;
        }

        fn select_sysclk(&mut self, source: SysClkSource) {
            let ready = match source {
                SysClkSource::Msi => self.msi_on,
                SysClkSource::Hsi16 => self.hsi_on && !self.hsi_dead,
                SysClkSource::Pll => self.pll_ready(),
                SysClkSource::Hse => false,
            };
            if ready {
                self.sysclk = source;
            }
        }

        fn sysclk(&self) -> SysClkSource {
            self.sysclk
        }
    }

    impl TickTimer for MockTree {
        fn set_period(&mut self, hclk: Hertz) {
            self.tick_reload = Some(crate::tick::reload_for(hclk));
        }

        fn enable_tick(&mut self) {
            self.tick_enabled = true;
        }

        fn disable_tick(&mut self) {
            self.tick_enabled = false;
        }
    }

    #[rstest]
    #[case(ClockConfig::Hsi32MHz, 32_000_000)]
    #[case(ClockConfig::Hsi16MHz, 16_000_000)]
    #[case(ClockConfig::Hsi8MHz, 8_000_000)]
    #[case(ClockConfig::Hsi6MHz, 6_000_000)]
    #[case(ClockConfig::Hsi4MHz, 4_000_000)]
    #[case(ClockConfig::Msi2MHz, 2_097_152)]
    fn test_apply(#[case] config: ClockConfig, #[case] hclk: u32) {
        let mut tree = MockTree::default();
        let mut clocks = Clocks::new();

        assert_eq!(clocks.apply(&mut tree, &mut Spin, config), Ok(Hertz(hclk)));

        assert_eq!(tree.hclk(), hclk);
        assert_eq!(tree.tick_reload, Some(hclk / 1000 - 1));
        assert!(tree.tick_enabled);
        assert_eq!(tree.voltage, config.profile().voltage);
        assert_eq!(tree.latency, config.profile().latency);
        assert_eq!(clocks.current(), Some(config));
        assert_eq!(clocks.hclk(), Some(Hertz(hclk)));
    }

    #[test]
    fn test_switch_at_runtime() {
        let mut tree = MockTree::default();
        let mut clocks = Clocks::new();

        clocks.apply(&mut tree, &mut Spin, ClockConfig::Hsi32MHz).unwrap();
        clocks.apply(&mut tree, &mut Spin, ClockConfig::Hsi6MHz).unwrap();

        assert_eq!(tree.hclk(), 6_000_000);
        assert_eq!(tree.pll, Some(Pll { mul: PllMul::Mul3, div: PllDiv::Div2 }));
        assert_eq!(clocks.current(), Some(ClockConfig::Hsi6MHz));
    }

    #[test]
    fn test_decrease_then_restore() {
        let mut tree = MockTree::default();
        let mut clocks = Clocks::new();
        clocks.apply(&mut tree, &mut Spin, ClockConfig::Hsi16MHz).unwrap();

        clocks.decrease(&mut tree, &mut Spin).unwrap();
        assert_eq!(tree.sysclk, SysClkSource::Msi);
        assert_eq!(tree.msi_range, MsiRange::Range0);
        assert_eq!(tree.hclk(), 65_536);
        assert_eq!(tree.voltage, VoltageRange::Range2);
        assert_eq!(clocks.current(), Some(ClockConfig::Hsi16MHz));

        assert_eq!(clocks.restore(&mut tree, &mut Spin), Ok(Some(Hertz(16_000_000))));
        assert_eq!(tree.hclk(), 16_000_000);
        assert_eq!(tree.tick_reload, Some(15_999));
        assert!(!tree.pll_on);
    }

    #[test]
    fn test_restore_without_config() {
        let mut tree = MockTree::default();
        let mut clocks = Clocks::new();

        assert_eq!(clocks.restore(&mut tree, &mut Spin), Ok(None));
        assert_eq!(tree.tick_reload, None);
    }

    #[test]
    fn test_dead_oscillator_times_out() {
        let mut tree = MockTree {
            hsi_dead: true,
            ..Default::default()
        };
        let mut clocks = Clocks::new();

        assert_eq!(
            clocks.apply(&mut tree, &mut Bounded::new(100), ClockConfig::Hsi32MHz),
            Err(Error::Timeout(WaitFor::Oscillator(Oscillator::Hsi16)))
        );
        assert_eq!(clocks.current(), None);
        assert_eq!(tree.sysclk, SysClkSource::Msi);
    }

    #[test]
    fn test_decrease_regulator_never_settles() {
        let mut tree = MockTree {
            stuck_voltage: Some(VoltageRange::Range2),
            ..Default::default()
        };
        let mut clocks = Clocks::new();
        clocks.apply(&mut tree, &mut Spin, ClockConfig::Hsi16MHz).unwrap();

        assert_eq!(
            clocks.decrease(&mut tree, &mut Bounded::new(100)),
            Err(Error::Timeout(WaitFor::VoltageScaling))
        );
        assert_eq!(clocks.current(), Some(ClockConfig::Hsi16MHz));
        assert_eq!(clocks.restore(&mut tree, &mut Spin), Ok(Some(Hertz(16_000_000))));
    }

    #[test]
    fn test_trims() {
        let mut tree = MockTree::default();
        let mut clocks = Clocks::new();

        clocks.apply(&mut tree, &mut Spin, ClockConfig::Hsi16MHz).unwrap();
        assert_eq!(tree.trims[Oscillator::Hsi16 as usize], Some(HSI_TRIM));

        clocks.apply(&mut tree, &mut Spin, ClockConfig::Msi2MHz).unwrap();
        assert_eq!(tree.trims[Oscillator::Msi as usize], Some(MSI_TRIM));
    }
}
