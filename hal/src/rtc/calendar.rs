//! Calendar types and the BCD digits of the calendar registers
//!
//! The RTC only stores a two digit year, so dates are limited to 2000-2099.

use core::fmt;

use super::RtcError;

/// Unix time of 2000-01-01 00:00:00
pub const EPOCH_2000: u32 = 946_684_800;
/// Unix time of 2099-12-31 23:59:59
pub const MAX_UNIX: u32 = 4_102_444_799;

const SECONDS_PER_DAY: u32 = 86_400;

/// Time of day in 24 hour notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Time {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl Time {
    pub fn new(hours: u8, minutes: u8, seconds: u8) -> Result<Self, RtcError> {
        let time = Self {
            hours,
            minutes,
            seconds,
        };

        if time.is_valid() {
            Ok(time)
        } else {
            Err(RtcError::InvalidTime)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.hours < 24 && self.minutes < 60 && self.seconds < 60
    }

    fn seconds_of_day(&self) -> u32 {
        self.hours as u32 * 3600 + self.minutes as u32 * 60 + self.seconds as u32
    }

    fn from_seconds_of_day(seconds: u32) -> Self {
        Self {
            hours: (seconds / 3600) as u8,
            minutes: (seconds / 60 % 60) as u8,
            seconds: (seconds % 60) as u8,
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Weekday {
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
    Sunday = 7,
}

impl Weekday {
    /// From the RTC encoding, Monday = 1 to Sunday = 7
    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => Self::Monday,
            2 => Self::Tuesday,
            3 => Self::Wednesday,
            4 => Self::Thursday,
            5 => Self::Friday,
            6 => Self::Saturday,
            7 => Self::Sunday,
            _ => return None,
        })
    }

    /// Weekday of a day counted from 2000-01-01, which was a Saturday
    fn from_days_since_2000(days: u32) -> Self {
        match (days + 5) % 7 {
            0 => Self::Monday,
            1 => Self::Tuesday,
            2 => Self::Wednesday,
            3 => Self::Thursday,
            4 => Self::Friday,
            5 => Self::Saturday,
            _ => Self::Sunday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Date {
    /// Full year, 2000-2099
    pub year: u16,
    /// 1-12
    pub month: u8,
    /// 1-31
    pub day: u8,
    pub weekday: Weekday,
}

impl Date {
    /// Build a date, deriving the weekday
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self, RtcError> {
        if !(2000..=2099).contains(&year) || !(1..=12).contains(&month) {
            return Err(RtcError::InvalidDate);
        }
        if day == 0 || day > days_in_month(year, month) {
            return Err(RtcError::InvalidDate);
        }

        let mut date = Self {
            year,
            month,
            day,
            weekday: Weekday::Monday,
        };
        date.weekday = Weekday::from_days_since_2000(date.days_since_2000());

        Ok(date)
    }

    pub fn is_valid(&self) -> bool {
        (2000..=2099).contains(&self.year)
            && (1..=12).contains(&self.month)
            && self.day != 0
            && self.day <= days_in_month(self.year, self.month)
    }

    fn days_since_2000(&self) -> u32 {
        let years: u32 = (2000..self.year).map(|y| days_in_year(y) as u32).sum();
        let months: u32 = (1..self.month)
            .map(|m| days_in_month(self.year, m) as u32)
            .sum();

        years + months + self.day as u32 - 1
    }

    fn from_days_since_2000(mut days: u32) -> Self {
        let mut year = 2000;
        while days >= days_in_year(year) as u32 {
            days -= days_in_year(year) as u32;
            year += 1;
        }

        let mut month = 1;
        while days >= days_in_month(year, month) as u32 {
            days -= days_in_month(year, month) as u32;
            month += 1;
        }

        Self {
            year,
            month,
            day: days as u8 + 1,
            weekday: Weekday::Monday,
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    /// Seconds since the Unix epoch
    pub fn to_unix(&self) -> u32 {
        EPOCH_2000 + self.date.days_since_2000() * SECONDS_PER_DAY + self.time.seconds_of_day()
    }

    pub fn from_unix(unix: u32) -> Result<Self, RtcError> {
        if !(EPOCH_2000..=MAX_UNIX).contains(&unix) {
            return Err(RtcError::OutOfRange);
        }

        let since = unix - EPOCH_2000;
        let days = since / SECONDS_PER_DAY;

        let mut date = Date::from_days_since_2000(days);
        date.weekday = Weekday::from_days_since_2000(days);

        Ok(Self {
            date,
            time: Time::from_seconds_of_day(since % SECONDS_PER_DAY),
        })
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)
    }
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_year(year: u16) -> u16 {
    if is_leap(year) {
        366
    } else {
        365
    }
}

pub(crate) fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Split into the tens and units digits of the RTC registers
pub(crate) fn to_bcd(value: u8) -> (u8, u8) {
    (value / 10, value % 10)
}

pub(crate) fn from_bcd(tens: u8, units: u8) -> u8 {
    tens * 10 + units
}
