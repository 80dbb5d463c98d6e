//! # Millisecond tick counter
//!
//! A free running 32 bit counter incremented once per SysTick interrupt. With a 1 ms period it
//! wraps after roughly 49.7 days, so durations must always be computed with
//! [`Millis::elapsed_since`] rather than by comparing raw values.
//!
//! The counter is split into a [`TickHandler`], the only handle able to increment it, and any
//! number of [`Millis`] readers. The handler belongs in the SysTick interrupt.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::{syst::SystClkSource, SYST};
use embedded_time::rate::Hertz;

/// Backing storage of the tick counter
pub struct Ticks(AtomicU32);

impl Ticks {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Split the counter into its writer and a reader
    pub fn split(&mut self) -> (TickHandler<'_>, Millis<'_>) {
        let count = &self.0;
        (TickHandler(count), Millis(count))
    }
}

impl Default for Ticks {
    fn default() -> Self {
        Self::new()
    }
}

/// Increments the counter. Owned by the tick interrupt
pub struct TickHandler<'a>(&'a AtomicU32);

impl TickHandler<'_> {
    /// Count one tick
    ///
    /// thumbv6m has no atomic read-modify-write, so this is a load followed by a store. That is
    /// sound because this handle is the only writer.
    pub fn on_tick(&mut self) {
        let now = self.0.load(Ordering::Relaxed);
        self.0.store(now.wrapping_add(1), Ordering::Release);
    }
}

/// Read only view of the counter
#[derive(Clone, Copy)]
pub struct Millis<'a>(&'a AtomicU32);

impl Millis<'_> {
    /// Milliseconds since the counter started
    pub fn millis(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Milliseconds elapsed since `start`, correct across one wrap around
    pub fn elapsed_since(&self, start: u32) -> u32 {
        self.millis().wrapping_sub(start)
    }
}

/// The timer generating the 1 ms tick
pub trait TickTimer {
    /// Program a 1 ms period for the given core clock
    fn set_period(&mut self, hclk: Hertz);
    fn enable_tick(&mut self);
    fn disable_tick(&mut self);
}

/// SysTick reload value giving a 1 ms period at `hclk`
pub const fn reload_for(hclk: Hertz) -> u32 {
    let reload = hclk.0 / 1000;
    if reload == 0 {
        0
    } else {
        reload - 1
    }
}

impl TickTimer for SYST {
    fn set_period(&mut self, hclk: Hertz) {
        self.disable_counter();
        self.set_clock_source(SystClkSource::Core);
        self.set_reload(reload_for(hclk));
        self.clear_current();
    }

    fn enable_tick(&mut self) {
        self.enable_interrupt();
        self.enable_counter();
    }

    fn disable_tick(&mut self) {
        self.disable_interrupt();
        self.disable_counter();
    }
}
