//! # Wait policies
//!
//! Every hardware ready flag (oscillators, PLL, clock switch, regulator, RTC write flags) is
//! polled through a [`WaitPolicy`]. On the device [`Spin`] is used, which waits forever just like
//! a bare `while !ready {}` loop. [`Bounded`] gives up after a number of polls, which lets the
//! host tests simulate a flag that never asserts without hanging.

use crate::{Error, WaitFor};

/// A wait gave up before the condition became true
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

pub trait WaitPolicy {
    /// Poll `ready` until it returns `true`
    fn wait_until(&mut self, ready: impl FnMut() -> bool) -> Result<(), Timeout>;
}

/// Busy wait with no upper bound
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl WaitPolicy for Spin {
    fn wait_until(&mut self, mut ready: impl FnMut() -> bool) -> Result<(), Timeout> {
        while !ready() {}

        Ok(())
    }
}

/// Busy wait for at most `max_polls` polls of the condition
#[derive(Debug, Clone, Copy)]
pub struct Bounded {
    pub max_polls: u32,
}

impl Bounded {
    pub const fn new(max_polls: u32) -> Self {
        Self { max_polls }
    }
}

impl WaitPolicy for Bounded {
    fn wait_until(&mut self, mut ready: impl FnMut() -> bool) -> Result<(), Timeout> {
        for _ in 0..self.max_polls {
            if ready() {
                return Ok(());
            }
        }

        Err(Timeout)
    }
}

/// Wait for `ready`, reporting a timeout as waiting on `what`
pub(crate) fn wait_for<W: WaitPolicy>(
    wait: &mut W,
    what: WaitFor,
    ready: impl FnMut() -> bool,
) -> Result<(), Error> {
    wait.wait_until(ready).map_err(|Timeout| {
        warn!("Gave up waiting for {:?}", what);
        Error::Timeout(what)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_returns_once_ready() {
        let mut polls = 0;
        assert_eq!(
            Spin.wait_until(|| {
                polls += 1;
                polls == 10
            }),
            Ok(())
        );
        assert_eq!(polls, 10);
    }

    #[test]
    fn test_bounded_gives_up() {
        let mut polls = 0;
        assert_eq!(
            Bounded::new(5).wait_until(|| {
                polls += 1;
                false
            }),
            Err(Timeout)
        );
        assert_eq!(polls, 5);
    }

    #[test]
    fn test_bounded_succeeds_within_budget() {
        let mut polls = 0;
        assert_eq!(
            Bounded::new(5).wait_until(|| {
                polls += 1;
                polls == 3
            }),
            Ok(())
        );
    }
}
