//! # Serial
//!
//! Interrupt driven USART with 8 data bits, no parity and 1 stop bit.
//!
//! Transmission busy waits on the transmit register. Reception is split off into a [`SerialRx`]
//! which belongs in the USART interrupt, where it moves received bytes into a
//! [`RingBuffer`]. The main-line [`Serial`] reads them back out.
//!
//! ```ignore
//! let (mut serial, serial_rx) = Serial::new(Usart1::new(dp.USART1), SerialConfig::default(), hclk, rx_buffer);
//!
//! serial.println("Hello");
//! serial.print_float(3.14159, 2);
//! ```

use core::fmt;

use embedded_time::rate::Hertz;

use crate::pac::{self, Interrupt, RCC};
use crate::ring_buffer::{Consumer, Producer, RingBuffer};

/// Line ending of the `println` family
const NEWLINE: &[u8] = b"\r\n";

/// Baud rate in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Baud(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialConfig {
    pub baud: Baud,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud: Baud(115_200) }
    }
}

/// `USART_BRR` for oversampling by 8
pub fn brr_over8(pclk: Hertz, baud: Baud) -> u32 {
    let div = (2 * pclk.0 + baud.0 / 2) / baud.0;

    (div & !0xF) | ((div & 0xF) >> 1)
}

/// The transmit side and configuration of a USART
pub trait UsartRegisters {
    type Receiver: UsartReceiver;

    /// Enable the peripheral for 8N1 with oversampling by 8, with the receive interrupt on
    fn configure(&mut self, brr: u32);
    /// Disable the peripheral, its clock and its interrupt
    fn disable(&mut self);
    fn tx_empty(&self) -> bool;
    fn write_data(&mut self, byte: u8);
    /// Handle to the receive side, used from the interrupt
    fn receiver(&self) -> Self::Receiver;
}

/// The receive side of a USART
pub trait UsartReceiver {
    fn rx_ready(&self) -> bool;
    fn read_data(&mut self) -> u8;
    /// Clear an overrun, which otherwise blocks further reception
    fn clear_errors(&mut self);
}

/// Main-line side of the serial port
pub struct Serial<'a, U, const N: usize> {
    usart: U,
    rx: Consumer<'a, N>,
}

/// Interrupt side of the serial port
pub struct SerialRx<'a, R, const N: usize> {
    receiver: R,
    buffer: Producer<'a, N>,
}

impl<'a, U: UsartRegisters, const N: usize> Serial<'a, U, N> {
    /// Configure the USART clocked by `pclk` and split it into its two halves
    pub fn new(
        mut usart: U,
        config: SerialConfig,
        pclk: Hertz,
        buffer: &'a mut RingBuffer<N>,
    ) -> (Self, SerialRx<'a, U::Receiver, N>) {
        buffer.clear();
        let (producer, consumer) = buffer.split();

        usart.configure(brr_over8(pclk, config.baud));
        let receiver = usart.receiver();

        debug!("Serial running at {} baud", config.baud.0);

        (
            Self {
                usart,
                rx: consumer,
            },
            SerialRx {
                receiver,
                buffer: producer,
            },
        )
    }

    /// Disable the USART
    pub fn off(&mut self) {
        self.usart.disable();
    }

    /// Reprogram the USART, after [`Serial::off`] or a clock change
    pub fn reconfigure(&mut self, config: SerialConfig, pclk: Hertz) {
        self.usart.configure(brr_over8(pclk, config.baud));
    }

    pub fn write(&mut self, byte: u8) {
        while !self.usart.tx_empty() {}
        self.usart.write_data(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.write(*byte);
        }
    }

    pub fn print(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn println(&mut self, s: &str) {
        self.print(s);
        self.write_bytes(NEWLINE);
    }

    pub fn print_num(&mut self, n: u64) {
        self.print_num_base(n, 10);
    }

    /// Print `n` in `base`, using upper case letters past 9
    ///
    /// Bases outside of 2-36 fall back to 10.
    pub fn print_num_base(&mut self, mut n: u64, base: u8) {
        let base = if (2..=36).contains(&base) { base as u64 } else { 10 };

        // Enough for u64::MAX in base 2
        let mut digits = [0u8; 64];
        let mut len = 0;

        loop {
            let digit = (n % base) as u8;
            digits[len] = if digit < 10 {
                b'0' + digit
            } else {
                b'A' + digit - 10
            };
            len += 1;
            n /= base;

            if n == 0 {
                break;
            }
        }

        for digit in digits[..len].iter().rev() {
            self.write(*digit);
        }
    }

    /// Print `n` with a fixed number of decimals, rounding half up
    pub fn print_float(&mut self, mut n: f64, decimals: u8) {
        if n.is_nan() {
            return self.print("nan");
        }
        if n.is_infinite() {
            return self.print(if n < 0.0 { "-inf" } else { "inf" });
        }

        if n < 0.0 {
            self.write(b'-');
            n = -n;
        }

        // So that e.g. 1.999 with 2 decimals prints as 2.00
        let mut rounding = 0.5;
        for _ in 0..decimals {
            rounding /= 10.0;
        }
        n += rounding;

        let int_part = n as u64;
        let mut remainder = n - int_part as f64;
        self.print_num(int_part);

        if decimals > 0 {
            self.write(b'.');
        }

        for _ in 0..decimals {
            remainder *= 10.0;
            let digit = remainder as u8;
            self.write(b'0' + digit.min(9));
            remainder -= digit as f64;
        }
    }

    pub fn println_num(&mut self, n: u64) {
        self.print_num(n);
        self.write_bytes(NEWLINE);
    }

    pub fn println_num_base(&mut self, n: u64, base: u8) {
        self.print_num_base(n, base);
        self.write_bytes(NEWLINE);
    }

    pub fn println_float(&mut self, n: f64, decimals: u8) {
        self.print_float(n, decimals);
        self.write_bytes(NEWLINE);
    }

    /// Number of received bytes waiting to be read
    pub fn available(&self) -> usize {
        self.rx.available()
    }

    pub fn read(&mut self) -> Option<u8> {
        self.rx.read()
    }

    pub fn peek(&self) -> Option<u8> {
        self.rx.peek()
    }

    /// Block until `terminator` is received, see [`Consumer::read_until`]
    pub fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> usize {
        self.rx.read_until(terminator, buf)
    }

    /// Release the USART
    pub fn free(mut self) -> U {
        self.usart.disable();
        self.usart
    }
}

impl<U: UsartRegisters, const N: usize> fmt::Write for Serial<'_, U, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}

impl<R: UsartReceiver, const N: usize> SerialRx<'_, R, N> {
    /// Move received bytes into the ring buffer. Call from the USART interrupt
    pub fn on_interrupt(&mut self) {
        while self.receiver.rx_ready() {
            let byte = self.receiver.read_data();
            self.buffer.insert(byte);
        }

        self.receiver.clear_errors();
    }
}

fn rcc() -> &'static pac::rcc::RegisterBlock {
    // Correctness: Only the USART enable bit of the peripheral being configured is changed, with
    // a single read-modify-write from the main-line.
    unsafe { &*RCC::ptr() }
}

macro_rules! usart {
    ($($USART:ident: ($Usart:ident, $Rx:ident, $enr:ident, $en:ident),)+) => {
        $(
            #[doc = concat!("Owns the ", stringify!($USART), " peripheral")]
            pub struct $Usart {
                usart: pac::$USART,
            }

            impl $Usart {
                pub fn new(usart: pac::$USART) -> Self {
                    Self { usart }
                }
            }

            #[doc = concat!("Receive side of ", stringify!($USART))]
            pub struct $Rx {
                _private: (),
            }

            impl UsartRegisters for $Usart {
                type Receiver = $Rx;

                fn configure(&mut self, brr: u32) {
                    rcc().$enr.modify(|_, w| w.$en().enabled());

                    self.usart.cr1.reset();
                    self.usart.cr2.reset();
                    self.usart.cr3.reset();
                    self.usart.brr.write(|w| w.brr().bits(brr as u16));
                    self.usart.cr1.write(|w| {
                        w.over8()
                            .oversampling8()
                            .rxneie()
                            .enabled()
                            .te()
                            .enabled()
                            .re()
                            .enabled()
                            .ue()
                            .enabled()
                    });

                    // Safety: The interrupt only touches the ring buffer producer
                    unsafe { cortex_m::peripheral::NVIC::unmask(Interrupt::$USART) };
                }

                fn disable(&mut self) {
                    cortex_m::peripheral::NVIC::mask(Interrupt::$USART);
                    self.usart.cr1.reset();
                    rcc().$enr.modify(|_, w| w.$en().disabled());
                }

                fn tx_empty(&self) -> bool {
                    self.usart.isr.read().txe().bit_is_set()
                }

                fn write_data(&mut self, byte: u8) {
                    self.usart.tdr.write(|w| w.tdr().bits(byte as u16));
                }

                fn receiver(&self) -> $Rx {
                    $Rx { _private: () }
                }
            }

            impl $Rx {
                fn regs(&self) -> &'static pac::usart1::RegisterBlock {
                    // Correctness: The receiver only reads RDR and ISR and clears the error
                    // flags, none of which the transmit side touches.
                    unsafe { &*pac::$USART::ptr() }
                }
            }

            impl UsartReceiver for $Rx {
                fn rx_ready(&self) -> bool {
                    self.regs().isr.read().rxne().bit_is_set()
                }

                fn read_data(&mut self) -> u8 {
                    self.regs().rdr.read().rdr().bits() as u8
                }

                fn clear_errors(&mut self) {
                    let isr = self.regs().isr.read();
                    if isr.ore().bit_is_set()
                        || isr.fe().bit_is_set()
                        || isr.nf().bit_is_set()
                        || isr.pe().bit_is_set()
                    {
                        // A set ORE blocks reception until cleared
                        self.regs().icr.write(|w| {
                            w.orecf().clear().fecf().clear().ncf().clear().pecf().clear()
                        });
                    }
                }
            }
        )+
    };
}

usart! {
    USART1: (Usart1, Usart1Rx, apb2enr, usart1en),
    USART2: (Usart2, Usart2Rx, apb1enr, usart2en),
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Line {
        incoming: VecDeque<u8>,
        overrun: bool,
    }

    #[derive(Default)]
    struct MockUsart {
        brr: Option<u32>,
        enabled: bool,
        sent: Vec<u8>,
        line: Rc<RefCell<Line>>,
    }

    struct MockRx(Rc<RefCell<Line>>);

    impl UsartRegisters for MockUsart {
        type Receiver = MockRx;

        fn configure(&mut self, brr: u32) {
            self.brr = Some(brr);
            self.enabled = true;
        }

        fn disable(&mut self) {
            self.enabled = false;
        }

        fn tx_empty(&self) -> bool {
            true
        }

        fn write_data(&mut self, byte: u8) {
            assert!(self.enabled, "write while disabled");
            self.sent.push(byte);
        }

        fn receiver(&self) -> MockRx {
            MockRx(self.line.clone())
        }
    }

    impl UsartReceiver for MockRx {
        fn rx_ready(&self) -> bool {
            !self.0.borrow().incoming.is_empty()
        }

        fn read_data(&mut self) -> u8 {
            self.0.borrow_mut().incoming.pop_front().unwrap_or(0)
        }

        fn clear_errors(&mut self) {
            self.0.borrow_mut().overrun = false;
        }
    }

    fn sent<const N: usize>(serial: &Serial<'_, MockUsart, N>) -> String {
        String::from_utf8(serial.usart.sent.clone()).unwrap()
    }

    #[rstest]
    #[case(16_000_000, 115_200, 0x113)]
    #[case(32_000_000, 9_600, 0x1A05)]
    #[case(2_097_152, 9_600, 0x1B2)]
    fn test_brr_over8(#[case] pclk: u32, #[case] baud: u32, #[case] brr: u32) {
        assert_eq!(brr_over8(Hertz(pclk), Baud(baud)), brr);
    }

    #[test]
    fn test_configure() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut serial, _) = Serial::new(
            MockUsart::default(),
            SerialConfig::default(),
            Hertz(16_000_000),
            &mut rb,
        );
        assert_eq!(serial.usart.brr, Some(0x113));

        serial.off();
        assert!(!serial.usart.enabled);

        serial.reconfigure(SerialConfig { baud: Baud(9_600) }, Hertz(32_000_000));
        assert_eq!(serial.usart.brr, Some(0x1A05));
        assert!(serial.usart.enabled);
    }

    #[test]
    fn test_print() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut serial, _) = Serial::new(
            MockUsart::default(),
            SerialConfig::default(),
            Hertz(16_000_000),
            &mut rb,
        );

        serial.print("temp=");
        serial.print_num(21);
        serial.println("");
        serial.println_num(0);
        serial.println_num_base(255, 16);
        serial.println_num_base(5, 2);
        serial.println_num_base(35, 36);
        serial.println_num_base(42, 1);
        write!(serial, "{}-{}", 1, 2).unwrap();

        assert_eq!(sent(&serial), "temp=21\r\n0\r\nFF\r\n101\r\nZ\r\n42\r\n1-2");
    }

    #[test]
    fn test_print_num_max() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut serial, _) = Serial::new(
            MockUsart::default(),
            SerialConfig::default(),
            Hertz(16_000_000),
            &mut rb,
        );

        serial.print_num_base(u64::MAX, 2);
        assert_eq!(sent(&serial), "1".repeat(64));
    }

    #[rstest]
    #[case(1.999, 2, "2.00")]
    #[case(-3.14159, 3, "-3.142")]
    #[case(0.5, 0, "1")]
    #[case(21.25, 1, "21.3")]
    #[case(0.0, 2, "0.00")]
    #[case(1234.5678, 2, "1234.57")]
    #[case(f64::NAN, 2, "nan")]
    #[case(f64::INFINITY, 2, "inf")]
    #[case(f64::NEG_INFINITY, 2, "-inf")]
    fn test_print_float(#[case] n: f64, #[case] decimals: u8, #[case] expected: &str) {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut serial, _) = Serial::new(
            MockUsart::default(),
            SerialConfig::default(),
            Hertz(16_000_000),
            &mut rb,
        );

        serial.print_float(n, decimals);
        assert_eq!(sent(&serial), expected);
    }

    #[test]
    fn test_receive() {
        let mut rb: RingBuffer<8> = RingBuffer::new();
        let usart = MockUsart::default();
        let line = usart.line.clone();
        let (mut serial, mut serial_rx) =
            Serial::new(usart, SerialConfig::default(), Hertz(16_000_000), &mut rb);

        line.borrow_mut().incoming.extend(b"ok\n");
        line.borrow_mut().overrun = true;
        serial_rx.on_interrupt();
        assert!(!line.borrow().overrun);

        assert_eq!(serial.available(), 3);
        assert_eq!(serial.peek(), Some(b'o'));

        let mut buf = [0; 8];
        let len = serial.read_until(b'\n', &mut buf);
        assert_eq!(&buf[..len], b"ok");
        assert_eq!(serial.read(), None);
    }

    #[test]
    fn test_receive_overflow_drops_newest() {
        let mut rb: RingBuffer<4> = RingBuffer::new();
        let usart = MockUsart::default();
        let line = usart.line.clone();
        let (mut serial, mut serial_rx) =
            Serial::new(usart, SerialConfig::default(), Hertz(16_000_000), &mut rb);

        line.borrow_mut().incoming.extend(b"abcdef");
        serial_rx.on_interrupt();

        assert_eq!(serial.available(), 3);
        assert_eq!(serial.read(), Some(b'a'));
        assert_eq!(serial.read(), Some(b'b'));
        assert_eq!(serial.read(), Some(b'c'));
        assert_eq!(serial.read(), None);
    }
}
