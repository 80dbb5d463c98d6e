//! # Data EEPROM
//!
//! Byte, half-word and word access to the 6 KiB data EEPROM. Addresses are offsets from the
//! start of the EEPROM.
//!
//! Programming needs the EEPROM to be unlocked first, and every write waits for the previous
//! operation to finish. The wait is bounded by the tick counter, so the SysTick interrupt has to
//! be running.

use core::fmt;

use crate::pac::FLASH;
use crate::tick::Millis;

/// Address of the data EEPROM
pub const BASE_ADDR: u32 = 0x0808_0000;
/// Size of the data EEPROM in bytes
pub const SIZE: u32 = 6 * 1024;
/// Default budget for a single operation
pub const TIMEOUT_MS: u32 = 50_000;

const PEKEY1: u32 = 0x89AB_CDEF;
const PEKEY2: u32 = 0x0203_0405;

/// Error flags of `FLASH_SR`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashErrors {
    /// `WRPERR`, also raised by a write while the EEPROM is locked
    pub write_protection: bool,
    /// `PGAERR`
    pub alignment: bool,
    /// `SIZERR`
    pub size: bool,
    /// `OPTVERR`
    pub option_validity: bool,
    /// `RDERR`
    pub read_protection: bool,
    /// `NOTZEROERR`
    pub not_zero: bool,
    /// `FWWERR`
    pub fetch_while_write: bool,
}

impl FlashErrors {
    pub fn any(&self) -> bool {
        self.write_protection
            || self.alignment
            || self.size
            || self.option_validity
            || self.read_protection
            || self.not_zero
            || self.fetch_while_write
    }
}

/// Snapshot of `FLASH_SR`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlashStatus {
    pub busy: bool,
    pub end_of_operation: bool,
    pub errors: FlashErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// The access does not fit in the EEPROM
    OutOfRange,
    /// The address is not a multiple of the access width
    Misaligned,
    /// The previous operation did not finish in time
    Timeout,
    /// The flash interface raised the contained error flags
    Flash(FlashErrors),
}

impl fmt::Display for EepromError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "Address out of range"),
            Self::Misaligned => write!(f, "Misaligned address"),
            Self::Timeout => write!(f, "Timed out waiting for the flash interface"),
            Self::Flash(errors) => write!(f, "Flash error {:?}", errors),
        }
    }
}

/// Width of a single access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Width {
    Byte,
    HalfWord,
    Word,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value {
    Byte(u8),
    HalfWord(u16),
    Word(u32),
}

impl Value {
    pub const fn width(self) -> Width {
        match self {
            Self::Byte(_) => Width::Byte,
            Self::HalfWord(_) => Width::HalfWord,
            Self::Word(_) => Width::Word,
        }
    }
}

/// The flash interface registers and the EEPROM array behind them
pub trait FlashRegisters {
    /// `FLASH_PECR.PELOCK`
    fn locked(&self) -> bool;
    fn write_key(&mut self, key: u32);
    fn lock(&mut self);
    fn status(&self) -> FlashStatus;
    /// Clear `EOP`
    fn clear_end_of_operation(&mut self);
    /// Clear the set flags of `errors`
    fn clear_errors(&mut self, errors: FlashErrors);
    /// Program `value` at `offset`. The range has already been checked
    fn program(&mut self, offset: u32, value: Value);
    fn read(&self, offset: u32, width: Width) -> u32;
}

pub struct Eeprom<'a, F> {
    flash: F,
    millis: Millis<'a>,
    timeout_ms: u32,
}

impl<'a, F: FlashRegisters> Eeprom<'a, F> {
    pub fn new(flash: F, millis: Millis<'a>) -> Self {
        Self {
            flash,
            millis,
            timeout_ms: TIMEOUT_MS,
        }
    }

    /// Use a different budget for each operation
    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Unlock the EEPROM and `FLASH_PECR` for programming
    pub fn unlock(&mut self) {
        if self.flash.locked() {
            self.flash.write_key(PEKEY1);
            self.flash.write_key(PEKEY2);
        }
    }

    pub fn lock(&mut self) {
        self.flash.lock();
    }

    pub fn is_locked(&self) -> bool {
        self.flash.locked()
    }

    pub fn write_byte(&mut self, address: u32, data: u8) -> Result<(), EepromError> {
        self.write(address, Value::Byte(data))
    }

    pub fn write_half_word(&mut self, address: u32, data: u16) -> Result<(), EepromError> {
        self.write(address, Value::HalfWord(data))
    }

    pub fn write_word(&mut self, address: u32, data: u32) -> Result<(), EepromError> {
        self.write(address, Value::Word(data))
    }

    /// Store the bit pattern of `data` as a word
    pub fn write_float(&mut self, address: u32, data: f32) -> Result<(), EepromError> {
        self.write(address, Value::Word(data.to_bits()))
    }

    pub fn read_byte(&self, address: u32) -> Result<u8, EepromError> {
        self.read(address, Width::Byte).map(|v| v as u8)
    }

    pub fn read_half_word(&self, address: u32) -> Result<u16, EepromError> {
        self.read(address, Width::HalfWord).map(|v| v as u16)
    }

    pub fn read_word(&self, address: u32) -> Result<u32, EepromError> {
        self.read(address, Width::Word)
    }

    pub fn read_float(&self, address: u32) -> Result<f32, EepromError> {
        self.read_word(address).map(f32::from_bits)
    }

    pub fn free(self) -> F {
        self.flash
    }

    fn write(&mut self, address: u32, value: Value) -> Result<(), EepromError> {
        check(address, value.width())?;

        self.wait_for_last_operation()?;
        self.flash.program(address, value);
        self.wait_for_last_operation()
    }

    fn read(&self, address: u32, width: Width) -> Result<u32, EepromError> {
        check(address, width)?;
        Ok(self.flash.read(address, width))
    }

    fn wait_for_last_operation(&mut self) -> Result<(), EepromError> {
        let start = self.millis.millis();

        while self.flash.status().busy {
            if self.millis.elapsed_since(start) > self.timeout_ms {
                warn!("EEPROM busy for more than {} ms", self.timeout_ms);
                return Err(EepromError::Timeout);
            }
        }

        let status = self.flash.status();
        if status.end_of_operation {
            self.flash.clear_end_of_operation();
        }

        if status.errors.any() {
            self.flash.clear_errors(status.errors);
            warn!("EEPROM error flags {:?}", status.errors);
            return Err(EepromError::Flash(status.errors));
        }

        Ok(())
    }
}

fn check(address: u32, width: Width) -> Result<(), EepromError> {
    let end = address
        .checked_add(width.bytes())
        .ok_or(EepromError::OutOfRange)?;
    if end > SIZE {
        return Err(EepromError::OutOfRange);
    }
    if address % width.bytes() != 0 {
        return Err(EepromError::Misaligned);
    }

    Ok(())
}

/// The data EEPROM behind the FLASH peripheral
pub struct DataEeprom {
    flash: FLASH,
}

impl DataEeprom {
    pub fn new(flash: FLASH) -> Self {
        Self { flash }
    }
}

impl FlashRegisters for DataEeprom {
    fn locked(&self) -> bool {
        self.flash.pecr.read().pelock().is_locked()
    }

    fn write_key(&mut self, key: u32) {
        self.flash.pekeyr.write(|w| w.pekeyr().bits(key));
    }

    fn lock(&mut self) {
        self.flash.pecr.modify(|_, w| w.pelock().locked());
    }

    fn status(&self) -> FlashStatus {
        let sr = self.flash.sr.read();

        FlashStatus {
            busy: sr.bsy().is_active(),
            end_of_operation: sr.eop().is_event(),
            errors: FlashErrors {
                write_protection: sr.wrperr().is_error(),
                alignment: sr.pgaerr().is_error(),
                size: sr.sizerr().is_error(),
                option_validity: sr.optverr().is_error(),
                read_protection: sr.rderr().is_error(),
                not_zero: sr.notzeroerr().is_event(),
                fetch_while_write: sr.fwwerr().is_error(),
            },
        }
    }

    fn clear_end_of_operation(&mut self) {
        // Written as 1 to clear
        self.flash.sr.write(|w| w.eop().event());
    }

    fn clear_errors(&mut self, errors: FlashErrors) {
        self.flash.sr.write(|w| {
            if errors.write_protection {
                w.wrperr().clear();
            }
            if errors.alignment {
                w.pgaerr().clear();
            }
            if errors.size {
                w.sizerr().clear();
            }
            if errors.option_validity {
                w.optverr().clear();
            }
            if errors.read_protection {
                w.rderr().clear();
            }
            if errors.not_zero {
                w.notzeroerr().clear();
            }
            if errors.fetch_while_write {
                w.fwwerr().clear();
            }
            w
        });
    }

    fn program(&mut self, offset: u32, value: Value) {
        let address = BASE_ADDR + offset;

        // Safety: `offset` has been checked against the size and alignment of the EEPROM
        unsafe {
            match value {
                Value::Byte(v) => (address as *mut u8).write_volatile(v),
                Value::HalfWord(v) => (address as *mut u16).write_volatile(v),
                Value::Word(v) => (address as *mut u32).write_volatile(v),
            }
        }
    }

    fn read(&self, offset: u32, width: Width) -> u32 {
        let address = BASE_ADDR + offset;

        // Safety: as for `program`
        unsafe {
            match width {
                Width::Byte => (address as *const u8).read_volatile() as u32,
                Width::HalfWord => (address as *const u16).read_volatile() as u32,
                Width::Word => (address as *const u32).read_volatile(),
            }
        }
    }
}
