/*!
Transport seam between the bridge and the physical serial line.

Opening, configuring and raw-moding a serial device is host-specific and
lives outside this crate; the bridge only needs the three operations of the
[`Transport`] trait. Every read is bounded by a timeout so the worker can
always observe its stop flag - nothing in the bridge blocks indefinitely.

The `<rate>-<bits><parity><stopbits>` configuration string accepted by the
attach command (default `9600-8N1`) is parsed here so callers can hand the
validated [`SerialConfig`] to whatever serial backend they use.
*/

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("console link i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for {wanted} byte(s), got {got}")]
    Timeout { wanted: usize, got: usize },
    #[error("short write: {wrote} of {len} byte(s)")]
    ShortWrite { wrote: usize, len: usize },
    #[error("console link closed")]
    Closed,
}

/// Byte transport to the console processor.
///
/// Implementations own the line exclusively; the bridge guarantees a strict
/// request/response discipline on top (one outstanding exchange at a time).
pub trait Transport: Send {
    /// Write a complete frame. A partial write is an error; the frame must
    /// not be retried half-sent.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `buf.len()` bytes within `timeout`. On timeout the
    /// partial data is discarded and `TransportError::Timeout` is returned.
    fn recv_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError>;

    /// Non-blocking poll for a single unsolicited byte (console key press).
    fn try_recv_byte(&mut self) -> Result<Option<u8>, TransportError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid serial configuration `{0}`")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

/// Serial line parameters in `<rate>-<bits><parity><stopbits>` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub rate: u32,
    /// Character size in bits, 5 through 8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    /// The console processor ships configured for 9600-8N1.
    fn default() -> Self {
        SerialConfig {
            rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl FromStr for SerialConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError(s.to_string());

        let (rate, rest) = s.split_once('-').ok_or_else(bad)?;
        let rate: u32 = rate.parse().map_err(|_| bad())?;
        if rate == 0 {
            return Err(bad());
        }

        let mut chars = rest.chars();
        let data_bits = match chars.next().ok_or_else(bad)? {
            c @ '5'..='8' => c as u8 - b'0',
            _ => return Err(bad()),
        };
        let parity = match chars.next().ok_or_else(bad)?.to_ascii_uppercase() {
            'N' => Parity::None,
            'E' => Parity::Even,
            'O' => Parity::Odd,
            'M' => Parity::Mark,
            'S' => Parity::Space,
            _ => return Err(bad()),
        };
        let stop_bits = match chars.as_str() {
            "1" => StopBits::One,
            "1.5" => StopBits::OneAndHalf,
            "2" => StopBits::Two,
            _ => return Err(bad()),
        };

        Ok(SerialConfig {
            rate,
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OneAndHalf => "1.5",
            StopBits::Two => "2",
        };
        write!(f, "{}-{}{}{}", self.rate, self.data_bits, parity, stop)
    }
}
