//! # Real time clock (RTC)
//!
//! The real time clock is clocked by the LSE (32.768 kHz) or the LSI (~37 kHz), both of which
//! keep running in stop and standby. It's prescaled to 1 Hz to drive the calendar.
//!
//! Note that the RTC uses 24 hour notation.
//!
//! ## Wake engine
//!
//! Every timed low power mode is ended by the RTC
//!
//! - Seconds are counted on alarm B, which is armed to match the calendar `n` seconds from now
//! - Milliseconds are counted on the wake-up timer, clocked by RTC/16 (2.048 kHz from the LSE).
//!   Durations too long for the 16 bit reload fall back to the 1 Hz `ck_spre` clock
//!
//! Arming a duration of 0 disables the source. After a wake the sources are disarmed again so an
//! unrelated RTC interrupt can't immediately end the next sleep.
//!
//! ## Alarms
//!
//! Alarm A and B can also be set to an absolute time of day, matching either a day of the month
//! or a day of the week.
//!
//! ## Tamper detection
//!
//! The three tamper inputs raise an interrupt on a configurable edge and can erase the backup
//! registers.
//!
//! ## Backup registers
//!
//! The RTC contains five registers which retain their contents as long as the RTC is powered,
//! meaning they survive a reset and standby. They can be used to carry state across standby.

mod calendar;

pub use calendar::{Date, DateTime, Time, Weekday, EPOCH_2000, MAX_UNIX};

use core::fmt;

use embedded_time::rate::Hertz;

use crate::pac::{EXTI, PWR, RCC, RTC};
use crate::wait::{wait_for, Spin, WaitPolicy};
use crate::{Error, WaitFor};

use calendar::{from_bcd, to_bcd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcError {
    InvalidTime,
    InvalidDate,
    /// Outside of the 2000-2099 range the RTC can represent
    OutOfRange,
    Hardware(Error),
}

impl From<Error> for RtcError {
    fn from(error: Error) -> Self {
        Self::Hardware(error)
    }
}

impl fmt::Display for RtcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTime => write!(f, "Invalid time of day"),
            Self::InvalidDate => write!(f, "Invalid date"),
            Self::OutOfRange => write!(f, "Date outside of 2000-2099"),
            Self::Hardware(e) => write!(f, "{}", e),
        }
    }
}

/// Oscillator driving the RTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcClockSource {
    /// Internal ~37 kHz oscillator
    Lsi,
    /// External 32.768 kHz crystal
    Lse,
}

impl RtcClockSource {
    pub const fn freq(self) -> Hertz {
        match self {
            Self::Lsi => Hertz(37_000),
            Self::Lse => Hertz(32_768),
        }
    }

    /// Asynchronous and synchronous prescalers giving 1 Hz
    const fn prescalers(self) -> (u8, u16) {
        match self {
            Self::Lsi => (127, 288),
            Self::Lse => (127, 255),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    A,
    B,
}

/// Which calendar field the alarm day is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmMatch {
    /// Day of the month, 1-31
    Date(u8),
    Weekday(Weekday),
}

/// Duration of an RTC wake request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeAfter {
    /// Counted on alarm B
    Seconds(u32),
    /// Counted on the wake-up timer
    Millis(u32),
}

/// Clock of the wake-up timer (`WUCKSEL`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupClock {
    /// RTCCLK / 16
    RtcDiv16,
    /// ck_spre, 1 Hz
    CkSpre,
    /// ck_spre with 2^16 added to the reload
    CkSpreExtended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackupRegister {
    Dr0 = 0,
    Dr1 = 1,
    Dr2 = 2,
    Dr3 = 3,
    Dr4 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperInput {
    Tamper1,
    Tamper2,
    Tamper3,
}


/// Active edge of a tamper input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperTrigger {
    Rising,
    Falling,
}

/// Sampling frequency of the tamper inputs (`TAMPFREQ`), as a division of RTCCLK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperSampling {
    Div32768,
    Div16384,
    Div8192,
    Div4096,
    Div2048,
    Div1024,
    Div512,
    Div256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TamperConfig {
    pub trigger: TamperTrigger,
    /// Erase the backup registers when the tamper event occurs
    pub erase_backup: bool,
    /// Clear the tamper flag in hardware so the input rearms by itself
    pub auto_clear_flag: bool,
    pub sampling: TamperSampling,
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            trigger: TamperTrigger::Rising,
            erase_backup: false,
            auto_clear_flag: false,
            sampling: TamperSampling::Div32768,
        }
    }
}

/// Pending RTC events, as returned by [`Rtc::take_events`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Events {
    pub wakeup: bool,
    pub alarm_a: bool,
    pub alarm_b: bool,
    /// Tamper 1-3
    pub tamper: [bool; 3],
}

impl Events {
    pub fn any(&self) -> bool {
        self.wakeup || self.alarm_a || self.alarm_b || self.tamper.iter().any(|t| *t)
    }

    fn wakeup() -> Self {
        Self {
            wakeup: true,
            ..Self::default()
        }
    }

    fn alarm(alarm: Alarm) -> Self {
        Self {
            alarm_a: alarm == Alarm::A,
            alarm_b: alarm == Alarm::B,
            ..Self::default()
        }
    }

    fn tamper(input: TamperInput) -> Self {
        let mut events = Self::default();
        events.tamper[input as usize] = true;
        events
    }
}

/// EXTI lines wired to the RTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtiLine {
    Alarm = 17,
    Tamper = 19,
    Wakeup = 20,
}

/// The RTC registers, plus the parts of RCC, PWR and EXTI it depends on
pub trait RtcRegisters {
    /// Allow writes to the backup domain (`DBP`)
    fn unlock_backup_domain(&mut self);
    fn backup_domain_unlocked(&self) -> bool;
    /// Reset the RTC and the backup registers
    fn reset_domain(&mut self);
    fn enable_oscillator(&mut self, source: RtcClockSource);
    fn oscillator_ready(&self, source: RtcClockSource) -> bool;
    /// Select the RTC clock and enable the RTC
    fn select_clock(&mut self, source: RtcClockSource);
    /// Remove the write protection of the RTC registers
    fn disable_write_protection(&mut self);

    fn enter_init_mode(&mut self);
    fn init_mode_ready(&self) -> bool;
    fn exit_init_mode(&mut self);

    fn time(&self) -> Time;
    fn date(&self) -> Date;
    /// Only allowed in initialisation mode
    fn set_calendar(&mut self, time: &Time, date: &Date);
    /// Only allowed in initialisation mode
    fn set_prescaler(&mut self, asynchronous: u8, synchronous: u16);
    /// 24 hour format with the shadow registers bypassed
    fn set_format(&mut self);

    /// Enable the alarm and its interrupt
    fn enable_alarm(&mut self, alarm: Alarm);
    fn disable_alarm(&mut self, alarm: Alarm);
    fn alarm_writeable(&self, alarm: Alarm) -> bool;
    /// Match `time` on `day`, or on every day if `None`. Only allowed while the alarm is disabled
    fn set_alarm(&mut self, alarm: Alarm, day: Option<AlarmMatch>, time: &Time);

    /// Enable the wake-up timer and its interrupt
    fn enable_wakeup(&mut self);
    fn disable_wakeup(&mut self);
    fn wakeup_writeable(&self) -> bool;
    /// Only allowed while the wake-up timer is disabled
    fn set_wakeup(&mut self, clock: WakeupClock, reload: u16);

    fn events(&self) -> Events;
    /// Clear the flags set in `events`, leaving the others untouched
    fn clear_events(&mut self, events: Events);

    fn enable_tamper(&mut self, input: TamperInput, config: &TamperConfig);
    fn disable_tamper(&mut self, input: TamperInput);

    fn backup(&self, register: BackupRegister) -> u32;
    fn set_backup(&mut self, register: BackupRegister, value: u32);

    /// Route an RTC event to the NVIC on the rising edge
    fn listen(&mut self, line: ExtiLine);
    fn clear_pending(&mut self, line: ExtiLine);
}

/// # RTC
///
/// The RTC has two states, `run` mode and `initialisation` mode.
///
/// - In initialisation mode the RTC is stopped; the calendar registers are writeable allowing the
///   time to be set.
/// - In run mode the RTC measures time; the calendar registers are read only.
///
/// See [`crate::rtc`] for more information.
pub struct Rtc<R, W = Spin> {
    regs: R,
    wait: W,
    source: RtcClockSource,
}

impl<R: RtcRegisters, W: WaitPolicy> Rtc<R, W> {
    /// Start the RTC from `source`
    ///
    /// If `reset` is set the backup domain is reset first, clearing the calendar and the backup
    /// registers. Otherwise a calendar kept running through a reset or standby is left untouched.
    pub fn init(mut regs: R, source: RtcClockSource, reset: bool, mut wait: W) -> Result<Self, Error> {
        regs.unlock_backup_domain();
        wait_for(&mut wait, WaitFor::BackupDomain, || {
            regs.backup_domain_unlocked()
        })?;

        if reset {
            regs.reset_domain();
        }

        regs.enable_oscillator(source);
        wait_for(&mut wait, WaitFor::RtcClock(source), || {
            regs.oscillator_ready(source)
        })?;
        regs.select_clock(source);
        regs.disable_write_protection();

        let mut rtc = Self { regs, wait, source };

        rtc.init_mode(|regs| {
            let (asynchronous, synchronous) = source.prescalers();
            regs.set_prescaler(asynchronous, synchronous);

            // The shadow registers are bypassed as the APB clock may be slower than 7 times the
            // RTC clock while downclocked
            regs.set_format();
        })?;

        rtc.regs.listen(ExtiLine::Alarm);
        rtc.regs.listen(ExtiLine::Tamper);
        rtc.regs.listen(ExtiLine::Wakeup);

        info!("RTC running from {:?}", source);

        Ok(rtc)
    }

    pub fn clock_source(&self) -> RtcClockSource {
        self.source
    }

    /// Execute closure in initialisation mode
    fn init_mode<T>(&mut self, f: impl FnOnce(&mut R) -> T) -> Result<T, Error> {
        self.regs.enter_init_mode();
        let regs = &self.regs;
        if let Err(e) = wait_for(&mut self.wait, WaitFor::RtcInitMode, || regs.init_mode_ready()) {
            self.regs.exit_init_mode();
            return Err(e);
        }

        let result = f(&mut self.regs);

        // Return to run mode
        self.regs.exit_init_mode();

        Ok(result)
    }

    /// Read the calendar registers.
    ///
    /// The shadow registers are bypassed so the time needs to be read twice to ensure a clock tick
    /// doesn't occur between reading the time and the date.
    fn read_calendar(&self) -> (Time, Date) {
        let first = self.regs.time();
        let date = self.regs.date();
        let second = self.regs.time();

        if first != second {
            // An update occured during the reads. A third read will definately give a correct
            // result
            return (self.regs.time(), self.regs.date());
        }

        (second, date)
    }

    /// Get the current date and time
    pub fn datetime(&self) -> DateTime {
        let (time, date) = self.read_calendar();

        DateTime { date, time }
    }

    pub fn time(&self) -> Time {
        self.datetime().time
    }

    pub fn date(&self) -> Date {
        self.datetime().date
    }

    pub fn set_datetime(&mut self, datetime: &DateTime) -> Result<(), RtcError> {
        if !datetime.time.is_valid() {
            return Err(RtcError::InvalidTime);
        }
        if !datetime.date.is_valid() {
            return Err(RtcError::InvalidDate);
        }

        self.init_mode(|regs| regs.set_calendar(&datetime.time, &datetime.date))?;

        debug!("RTC set to {}", datetime.to_unix());

        Ok(())
    }

    /// Set the time of day, keeping the date
    pub fn set_time(&mut self, time: &Time) -> Result<(), RtcError> {
        let date = self.date();
        self.set_datetime(&DateTime { date, time: *time })
    }

    /// Set the date, keeping the time of day
    pub fn set_date(&mut self, date: &Date) -> Result<(), RtcError> {
        let time = self.time();
        self.set_datetime(&DateTime { date: *date, time })
    }

    /// Seconds since the Unix epoch
    pub fn unix(&self) -> u32 {
        self.datetime().to_unix()
    }

    pub fn set_unix(&mut self, unix: u32) -> Result<(), RtcError> {
        let datetime = DateTime::from_unix(unix)?;
        self.set_datetime(&datetime)
    }

    /// Arm the wake source matching the duration
    pub fn arm(&mut self, after: WakeAfter) -> Result<(), Error> {
        match after {
            WakeAfter::Seconds(seconds) => self.arm_after(seconds),
            WakeAfter::Millis(ms) => self.arm_millis(ms),
        }
    }

    /// Fire alarm B `seconds` from now. 0 disables alarm B
    pub fn arm_after(&mut self, seconds: u32) -> Result<(), Error> {
        self.arm_alarm_after(Alarm::B, seconds)
    }

    /// Fire `alarm` `seconds` from now. 0 disables the alarm
    ///
    /// The alarm compares the day of the month, so durations of more than 28 days may fire a
    /// month early.
    pub fn arm_alarm_after(&mut self, alarm: Alarm, seconds: u32) -> Result<(), Error> {
        if seconds == 0 {
            self.disable_alarm(alarm);
            return Ok(());
        }

        let target = self.unix().saturating_add(seconds).min(MAX_UNIX);
        let target = DateTime::from_unix(target).unwrap_or_else(|_| self.datetime());

        trace!("Alarm {:?} armed for {}", alarm, target.to_unix());

        self.set_alarm(alarm, AlarmMatch::Date(target.date.day), &target.time)
    }

    /// Fire `alarm` at `time` on the given day
    pub fn set_alarm(&mut self, alarm: Alarm, day: AlarmMatch, time: &Time) -> Result<(), Error> {
        self.write_alarm(alarm, Some(day), time)
    }

    /// Fire `alarm` every day at `time`
    pub fn set_daily_alarm(&mut self, alarm: Alarm, time: &Time) -> Result<(), Error> {
        self.write_alarm(alarm, None, time)
    }

    fn write_alarm(&mut self, alarm: Alarm, day: Option<AlarmMatch>, time: &Time) -> Result<(), Error> {
        self.disable_alarm(alarm);
        let regs = &self.regs;
        wait_for(&mut self.wait, WaitFor::RtcAlarmWrite(alarm), || {
            regs.alarm_writeable(alarm)
        })?;

        self.regs.set_alarm(alarm, day, time);
        self.regs.clear_events(Events::alarm(alarm));
        self.regs.enable_alarm(alarm);

        Ok(())
    }

    pub fn disable_alarm(&mut self, alarm: Alarm) {
        self.regs.disable_alarm(alarm);
        self.regs.clear_events(Events::alarm(alarm));
    }

    /// Fire the wake-up timer after `ms` milliseconds. 0 disables the timer
    pub fn arm_millis(&mut self, ms: u32) -> Result<(), Error> {
        if ms == 0 {
            self.disable_wakeup();
            return Ok(());
        }

        let tick_freq = (self.source.freq().0 / 16) as u64;
        let ticks = (ms as u64 * tick_freq / 1000).max(1);

        if ticks > 0x1_0000 {
            // Too long for RTCCLK/16, count seconds instead
            return self.arm_wakeup_seconds(((ms as u64 + 500) / 1000) as u32);
        }

        self.program_wakeup(WakeupClock::RtcDiv16, (ticks - 1) as u16)
    }

    /// Fire the wake-up timer after `seconds`. 0 disables the timer
    ///
    /// At most 2^17 seconds (~36 hours) can be counted, longer durations are clamped.
    pub fn arm_wakeup_seconds(&mut self, seconds: u32) -> Result<(), Error> {
        match seconds {
            0 => {
                self.disable_wakeup();
                Ok(())
            }
            1..=0x1_0000 => self.program_wakeup(WakeupClock::CkSpre, (seconds - 1) as u16),
            _ => {
                let seconds = seconds.min(0x2_0000);
                if seconds == 0x2_0000 {
                    warn!("Wake-up clamped to {} s", seconds);
                }
                self.program_wakeup(WakeupClock::CkSpreExtended, (seconds - 1 - 0x1_0000) as u16)
            }
        }
    }

    fn program_wakeup(&mut self, clock: WakeupClock, reload: u16) -> Result<(), Error> {
        self.disable_wakeup();

        let regs = &self.regs;
        wait_for(&mut self.wait, WaitFor::RtcWakeupWrite, || {
            regs.wakeup_writeable()
        })?;

        self.regs.set_wakeup(clock, reload);
        self.regs.enable_wakeup();

        trace!("Wake-up armed, clock {:?} reload {}", clock, reload);

        Ok(())
    }

    pub fn disable_wakeup(&mut self) {
        self.regs.disable_wakeup();
        self.regs.clear_events(Events::wakeup());
    }

    /// Disarm the sources used to end a timed low power mode
    pub fn disarm(&mut self) {
        self.disable_alarm(Alarm::B);
        self.disable_wakeup();
    }

    /// Read and clear the pending RTC events
    pub fn take_events(&mut self) -> Events {
        let events = self.regs.events();

        self.regs.clear_events(events);
        self.regs.clear_pending(ExtiLine::Alarm);
        self.regs.clear_pending(ExtiLine::Tamper);
        self.regs.clear_pending(ExtiLine::Wakeup);

        events
    }

    pub fn enable_tamper(&mut self, input: TamperInput, config: TamperConfig) {
        self.regs.clear_events(Events::tamper(input));
        self.regs.enable_tamper(input, &config);

        debug!("Tamper {:?} enabled", input);
    }

    pub fn disable_tamper(&mut self, input: TamperInput) {
        self.regs.disable_tamper(input);
        self.regs.clear_events(Events::tamper(input));
    }

    pub fn read_backup(&self, register: BackupRegister) -> u32 {
        self.regs.backup(register)
    }

    pub fn write_backup(&mut self, register: BackupRegister, value: u32) {
        self.regs.set_backup(register, value);
    }

    /// Release the registers
    pub fn free(self) -> R {
        self.regs
    }
}

/// The RTC peripheral together with the EXTI, which routes its events
pub struct RtcPeripheral {
    rtc: RTC,
    exti: EXTI,
}

impl RtcPeripheral {
    pub fn new(rtc: RTC, exti: EXTI) -> Self {
        Self { rtc, exti }
    }

    fn rcc(&self) -> &'static crate::pac::rcc::RegisterBlock {
        // Correctness: Only `RCC_CSR` and the PWR clock enable are touched here. The `System` never
        // writes `RCC_CSR`, and read-modify-writes of `RCC_APB1ENR` happen in the main-line before
        // the RTC is initialised.
        unsafe { &*RCC::ptr() }
    }

    fn pwr(&self) -> &'static crate::pac::pwr::RegisterBlock {
        // Correctness: Only `DBP` is set, which the `System` never clears.
        unsafe { &*PWR::ptr() }
    }

    fn alarm(&self, alarm: Alarm) -> &crate::pac::rtc::ALRMR {
        match alarm {
            Alarm::A => self.rtc.alrmar(),
            Alarm::B => self.rtc.alrmbr(),
        }
    }
}

/// Set the edge, erase and flag behaviour of one tamper input, then enable it
macro_rules! tamper_enable {
    ($w:ident, $config:ident, $e:ident, $trg:ident, $ie:ident, $noerase:ident, $mf:ident) => {{
        match $config.trigger {
            TamperTrigger::Rising => $w.$trg().rising_edge(),
            TamperTrigger::Falling => $w.$trg().falling_edge(),
        };
        if $config.erase_backup {
            $w.$noerase().erase();
        } else {
            $w.$noerase().no_erase();
        }
        if $config.auto_clear_flag {
            $w.$mf().masked();
        } else {
            $w.$mf().not_masked();
        }
        $w.$ie().enabled().$e().enabled()
    }};
}

impl RtcRegisters for RtcPeripheral {
    fn unlock_backup_domain(&mut self) {
        self.rcc().apb1enr.modify(|_, w| w.pwren().enabled());
        self.pwr().cr.modify(|_, w| w.dbp().enabled());
    }

    fn backup_domain_unlocked(&self) -> bool {
        self.pwr().cr.read().dbp().is_enabled()
    }

    fn reset_domain(&mut self) {
        let csr = &self.rcc().csr;
        csr.modify(|_, w| w.rtcrst().reset());
        csr.modify(|_, w| w.rtcrst().clear_bit());
    }

    fn enable_oscillator(&mut self, source: RtcClockSource) {
        match source {
            RtcClockSource::Lsi => self.rcc().csr.modify(|_, w| w.lsion().on()),
            RtcClockSource::Lse => self
                .rcc()
                .csr
                .modify(|_, w| w.lsedrv().medium_high().lseon().on()),
        }
    }

    fn oscillator_ready(&self, source: RtcClockSource) -> bool {
        let csr = self.rcc().csr.read();
        match source {
            RtcClockSource::Lsi => csr.lsirdy().is_ready(),
            RtcClockSource::Lse => csr.lserdy().is_ready(),
        }
    }

    fn select_clock(&mut self, source: RtcClockSource) {
        self.rcc().csr.modify(|_, w| {
            match source {
                RtcClockSource::Lse => w.rtcsel().lse(),
                RtcClockSource::Lsi => w.rtcsel().lsi(),
            };
            w.rtcen().enabled()
        });
    }

    fn disable_write_protection(&mut self) {
        self.rtc.wpr.write(|w| w.key().bits(0xCA));
        self.rtc.wpr.write(|w| w.key().bits(0x53));
    }

    fn enter_init_mode(&mut self) {
        self.rtc.isr.modify(|_, w| w.init().init_mode());
    }

    fn init_mode_ready(&self) -> bool {
        self.rtc.isr.read().initf().is_allowed()
    }

    fn exit_init_mode(&mut self) {
        self.rtc.isr.modify(|_, w| w.init().free_running_mode());
    }

    fn time(&self) -> Time {
        let tr = self.rtc.tr.read();

        Time {
            hours: from_bcd(tr.ht().bits(), tr.hu().bits()),
            minutes: from_bcd(tr.mnt().bits(), tr.mnu().bits()),
            seconds: from_bcd(tr.st().bits(), tr.su().bits()),
        }
    }

    fn date(&self) -> Date {
        let dr = self.rtc.dr.read();

        Date {
            year: 2000 + from_bcd(dr.yt().bits(), dr.yu().bits()) as u16,
            month: from_bcd(dr.mt().bit() as u8, dr.mu().bits()),
            day: from_bcd(dr.dt().bits(), dr.du().bits()),
            weekday: Weekday::from_number(dr.wdu().bits()).unwrap_or(Weekday::Monday),
        }
    }

    fn set_calendar(&mut self, time: &Time, date: &Date) {
        let (ht, hu) = to_bcd(time.hours);
        let (mnt, mnu) = to_bcd(time.minutes);
        let (st, su) = to_bcd(time.seconds);

        self.rtc.tr.write(|w| {
            w.ht()
                .bits(ht)
                .hu()
                .bits(hu)
                .mnt()
                .bits(mnt)
                .mnu()
                .bits(mnu)
                .st()
                .bits(st)
                .su()
                .bits(su)
        });

        let (yt, yu) = to_bcd((date.year - 2000) as u8);
        let (mt, mu) = to_bcd(date.month);
        let (dt, du) = to_bcd(date.day);

        self.rtc.dr.write(|w| {
            // Correctness: Weekdays are numbered 1-7, all valid `WDU` values
            unsafe { w.wdu().bits(date.weekday as u8) };
            w.yt()
                .bits(yt)
                .yu()
                .bits(yu)
                .mt()
                .bit(mt == 1)
                .mu()
                .bits(mu)
                .dt()
                .bits(dt)
                .du()
                .bits(du)
        });
    }

    fn set_prescaler(&mut self, asynchronous: u8, synchronous: u16) {
        // The two prescalers have to be written separately
        // Correctness: `PREDIV_S` is 15 bits wide, the synchronous prescalers all fit
        self.rtc
            .prer
            .write(|w| unsafe { w.prediv_s().bits(synchronous) });
        self.rtc.prer.modify(|_, w| w.prediv_a().bits(asynchronous));
    }

    fn set_format(&mut self) {
        self.rtc
            .cr
            .modify(|_, w| w.fmt().twenty_four_hour().bypshad().bypass_shadow_reg());
    }

    fn enable_alarm(&mut self, alarm: Alarm) {
        match alarm {
            Alarm::A => self
                .rtc
                .cr
                .modify(|_, w| w.alrae().enabled().alraie().enabled()),
            Alarm::B => self
                .rtc
                .cr
                .modify(|_, w| w.alrbe().enabled().alrbie().enabled()),
        }
    }

    fn disable_alarm(&mut self, alarm: Alarm) {
        match alarm {
            Alarm::A => self
                .rtc
                .cr
                .modify(|_, w| w.alrae().disabled().alraie().disabled()),
            Alarm::B => self
                .rtc
                .cr
                .modify(|_, w| w.alrbe().disabled().alrbie().disabled()),
        }
    }

    fn alarm_writeable(&self, alarm: Alarm) -> bool {
        let isr = self.rtc.isr.read();
        match alarm {
            Alarm::A => isr.alrawf().is_update_allowed(),
            Alarm::B => isr.alrbwf().is_update_allowed(),
        }
    }

    fn set_alarm(&mut self, alarm: Alarm, day: Option<AlarmMatch>, time: &Time) {
        let (ht, hu) = to_bcd(time.hours);
        let (mnt, mnu) = to_bcd(time.minutes);
        let (st, su) = to_bcd(time.seconds);

        // The PAC names the compare state of `MSKx` `mask`, and don't care `not_mask`
        self.alarm(alarm).write(|w| {
            w.msk1()
                .mask()
                .st()
                .bits(st)
                .su()
                .bits(su)
                .msk2()
                .mask()
                .mnt()
                .bits(mnt)
                .mnu()
                .bits(mnu)
                .msk3()
                .mask()
                .pm()
                .am()
                .ht()
                .bits(ht)
                .hu()
                .bits(hu);

            match day {
                None => w.msk4().not_mask(),
                Some(AlarmMatch::Date(day)) => {
                    let (dt, du) = to_bcd(day);
                    w.msk4()
                        .mask()
                        .wdsel()
                        .date_units()
                        .dt()
                        .bits(dt)
                        .du()
                        .bits(du)
                }
                Some(AlarmMatch::Weekday(weekday)) => w
                    .msk4()
                    .mask()
                    .wdsel()
                    .week_day()
                    .du()
                    .bits(weekday as u8),
            }
        });
    }

    fn enable_wakeup(&mut self) {
        self.rtc
            .cr
            .modify(|_, w| w.wute().enabled().wutie().enabled());
    }

    fn disable_wakeup(&mut self) {
        self.rtc
            .cr
            .modify(|_, w| w.wute().disabled().wutie().disabled());
    }

    fn wakeup_writeable(&self) -> bool {
        self.rtc.isr.read().wutwf().is_update_allowed()
    }

    fn set_wakeup(&mut self, clock: WakeupClock, reload: u16) {
        self.rtc.wutr.write(|w| w.wut().bits(reload));
        self.rtc.cr.modify(|_, w| match clock {
            WakeupClock::RtcDiv16 => w.wucksel().div16(),
            WakeupClock::CkSpre => w.wucksel().clock_spare(),
            WakeupClock::CkSpreExtended => w.wucksel().clock_spare_with_offset(),
        });
    }

    fn events(&self) -> Events {
        let isr = self.rtc.isr.read();

        Events {
            wakeup: isr.wutf().is_zero(),
            alarm_a: isr.alraf().is_match(),
            alarm_b: isr.alrbf().is_match(),
            tamper: [
                isr.tamp1f().is_tampered(),
                isr.tamp2f().is_tampered(),
                isr.tamp3f().is_tampered(),
            ],
        }
    }

    fn clear_events(&mut self, events: Events) {
        // The flags are cleared by writing 0, writing back a set flag leaves it set
        self.rtc.isr.modify(|_, w| {
            if events.wakeup {
                w.wutf().clear();
            }
            if events.alarm_a {
                w.alraf().clear();
            }
            if events.alarm_b {
                w.alrbf().clear();
            }
            if events.tamper[0] {
                w.tamp1f().clear();
            }
            if events.tamper[1] {
                w.tamp2f().clear();
            }
            if events.tamper[2] {
                w.tamp3f().clear();
            }
            w
        });
    }

    fn enable_tamper(&mut self, input: TamperInput, config: &TamperConfig) {
        self.rtc.tampcr.modify(|_, w| {
            match config.sampling {
                TamperSampling::Div32768 => w.tampfreq().div32768(),
                TamperSampling::Div16384 => w.tampfreq().div16384(),
                TamperSampling::Div8192 => w.tampfreq().div8192(),
                TamperSampling::Div4096 => w.tampfreq().div4096(),
                TamperSampling::Div2048 => w.tampfreq().div2048(),
                TamperSampling::Div1024 => w.tampfreq().div1024(),
                TamperSampling::Div512 => w.tampfreq().div512(),
                TamperSampling::Div256 => w.tampfreq().div256(),
            };

            match input {
                TamperInput::Tamper1 => {
                    tamper_enable!(w, config, tamp1e, tamp1trg, tamp1ie, tamp1noerase, tamp1mf)
                }
                TamperInput::Tamper2 => {
                    tamper_enable!(w, config, tamp2e, tamp2trg, tamp2ie, tamp2noerase, tamp2mf)
                }
                TamperInput::Tamper3 => {
                    tamper_enable!(w, config, tamp3e, tamp3trg, tamp3ie, tamp3noerase, tamp3mf)
                }
            }
        });
    }

    fn disable_tamper(&mut self, input: TamperInput) {
        self.rtc.tampcr.modify(|_, w| match input {
            TamperInput::Tamper1 => w.tamp1e().disabled().tamp1ie().disabled(),
            TamperInput::Tamper2 => w.tamp2e().disabled().tamp2ie().disabled(),
            TamperInput::Tamper3 => w.tamp3e().disabled().tamp3ie().disabled(),
        });
    }

    fn backup(&self, register: BackupRegister) -> u32 {
        self.rtc.bkpr[register as usize].read().bkp().bits()
    }

    fn set_backup(&mut self, register: BackupRegister, value: u32) {
        self.rtc.bkpr[register as usize].write(|w| w.bkp().bits(value));
    }

    fn listen(&mut self, line: ExtiLine) {
        let exti = &self.exti;
        match line {
            ExtiLine::Alarm => {
                exti.rtsr.modify(|_, w| w.rt17().enabled());
                exti.imr.modify(|_, w| w.im17().unmasked());
            }
            ExtiLine::Tamper => {
                exti.rtsr.modify(|_, w| w.rt19().enabled());
                exti.imr.modify(|_, w| w.im19().unmasked());
            }
            ExtiLine::Wakeup => {
                exti.rtsr.modify(|_, w| w.rt20().enabled());
                exti.imr.modify(|_, w| w.im20().unmasked());
            }
        }
    }

    fn clear_pending(&mut self, line: ExtiLine) {
        self.exti.pr.write(|w| match line {
            ExtiLine::Alarm => w.pif17().clear(),
            ExtiLine::Tamper => w.pif19().clear(),
            ExtiLine::Wakeup => w.pif20().clear(),
        });
    }
}
