//! # Eon HAL
//!
//! A hardware abstraction library for STM32L073 based low power sensor nodes.
//!
//! ---
//!
//! This library provides an opinionated way to configure and interact with the hardware. The
//! primary goal is to spend as much time as possible in a low power mode while keeping the
//! main-line code simple
//!
//! - The [`System`] owns the clock tree and the power controller. It remembers the active
//!   [`ClockConfig`](clock::ClockConfig) so it can be replayed after a low power excursion
//!   forced a downclock
//! - The [`Rtc`] is clocked by the LSE or the LSI so it keeps running while the core is stopped.
//!   Its alarm B and wake-up timer end every timed sleep
//! - Serial reception is interrupt driven into a lock-free single-producer/single-consumer
//!   [`RingBuffer`](ring_buffer::RingBuffer)
//! - The millisecond [`Ticks`](tick::Ticks) counter is driven by SysTick and only mutated by its
//!   interrupt handler. The [`Eeprom`] bounds its busy waits with it
//! - [`Serial`] prints strings, integers and floats over USART1 or USART2
//!
//! Register access goes through small traits (`ClockTree`, `PowerControl`, `RtcRegisters`, ...)
//! implemented on top of the `stm32l0` PAC. The controllers only see the traits, which keeps the
//! sequencing logic testable on the host.

#![cfg_attr(not(test), no_std)]

// Needs to come first so the logging macros are visible to the other modules
mod fmt;

pub mod clock;
pub mod eeprom;
pub mod ring_buffer;
pub mod rtc;
pub mod serial;
pub mod system;
pub mod tick;
pub mod wait;

pub use eeprom::Eeprom;
pub use rtc::Rtc;
pub use serial::Serial;
pub use system::System;

pub use embedded_time::rate::Hertz;
pub use stm32l0::stm32l0x3 as pac;

use core::fmt as core_fmt;

/// Errors raised by the clock and power sequencing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A hardware ready flag did not assert within the budget of the wait policy
    Timeout(WaitFor),
}

/// The hardware condition a wait was polling for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitFor {
    Oscillator(clock::Oscillator),
    Pll,
    ClockSwitch(clock::SysClkSource),
    VoltageScaling,
    FlashLatency,
    RegulatorMainMode,
    /// Write access to the backup domain (`DBP`)
    BackupDomain,
    RtcClock(rtc::RtcClockSource),
    RtcInitMode,
    RtcAlarmWrite(rtc::Alarm),
    RtcWakeupWrite,
}

impl core_fmt::Display for Error {
    fn fmt(&self, f: &mut core_fmt::Formatter<'_>) -> core_fmt::Result {
        match self {
            Self::Timeout(what) => write!(f, "Timed out waiting for {:?}", what),
        }
    }
}
