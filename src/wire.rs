/*!
Wire protocol to the console processor.

Every exchange is a single-byte command (optionally followed by payload
bytes) with a fixed response length:

| code  | payload out            | response in      |
|-------|------------------------|------------------|
| `Q`   | -                      | 5 switch bytes   |
| `R`   | -                      | 1 rotary byte    |
| `A`   | 3 address bytes        | -                |
| `D`   | 2 data bytes           | -                |
| `B`   | 3 + 2 addr/data bytes  | -                |
| `U`   | 3 + 2 + 2 addr/data/status | -            |
| `F`   | 2 status bytes         | -                |
| `c`   | port + toggle mask     | -                |
| `i`   | -                      | -                |
| `pN`  | model select, attach only | -             |

The high address byte is masked to the 16/18/22-bit width in effect so
unused lamp lines stay dark. A short or late response is a transport error;
the partial bytes never reach the control block.
*/

use std::time::Duration;

use tracing::{debug, trace};

use crate::control::AckFlags;
use crate::model::{AddressWidth, Model};
use crate::transport::{Transport, TransportError};

pub const CMD_QUERY: u8 = b'Q';
pub const CMD_ROTARY: u8 = b'R';
pub const CMD_ADDRESS: u8 = b'A';
pub const CMD_DATA: u8 = b'D';
pub const CMD_ADDRESS_DATA: u8 = b'B';
pub const CMD_ALL: u8 = b'U';
pub const CMD_STATUS: u8 = b'F';
pub const CMD_ACK: u8 = b'c';
pub const CMD_CLEAR_TOGGLES: u8 = b'i';

/// Switch bytes returned by a query exchange.
pub const QUERY_RESPONSE_LEN: usize = 5;

/// The momentary toggles latch on the console processor's third input port.
pub const ACK_PORT: u8 = b'2';

#[inline]
fn addr_bytes(addr: u32, width: AddressWidth) -> [u8; 3] {
    [
        ((addr >> 16) as u8) & width.high_byte_mask(),
        (addr >> 8) as u8,
        addr as u8,
    ]
}

pub fn address_frame(addr: u32, width: AddressWidth) -> [u8; 4] {
    let a = addr_bytes(addr, width);
    [CMD_ADDRESS, a[0], a[1], a[2]]
}

pub fn data_frame(data: u16) -> [u8; 3] {
    [CMD_DATA, (data >> 8) as u8, data as u8]
}

pub fn address_data_frame(addr: u32, data: u16, width: AddressWidth) -> [u8; 6] {
    let a = addr_bytes(addr, width);
    [
        CMD_ADDRESS_DATA,
        a[0],
        a[1],
        a[2],
        (data >> 8) as u8,
        data as u8,
    ]
}

pub fn all_frame(addr: u32, data: u16, status: (u8, u8), width: AddressWidth) -> [u8; 8] {
    let a = addr_bytes(addr, width);
    [
        CMD_ALL,
        a[0],
        a[1],
        a[2],
        (data >> 8) as u8,
        data as u8,
        status.0,
        status.1,
    ]
}

pub fn status_frame(status: (u8, u8)) -> [u8; 3] {
    [CMD_STATUS, status.0, status.1]
}

pub fn ack_frame(mask: AckFlags) -> [u8; 3] {
    [CMD_ACK, ACK_PORT, mask.bits()]
}

/// Recover the address/data pair from a combined `B` frame payload.
/// Used by tests and diagnostics; the console processor is the real decoder.
pub fn decode_address_data(frame: &[u8; 6]) -> Option<(u32, u16)> {
    if frame[0] != CMD_ADDRESS_DATA {
        return None;
    }
    let addr =
        u32::from(frame[1]) << 16 | u32::from(frame[2]) << 8 | u32::from(frame[3]);
    let data = u16::from(frame[4]) << 8 | u16::from(frame[5]);
    Some((addr, data))
}

/// Request/response wrapper giving the rest of the crate typed exchanges
/// over an owned transport.
pub struct Link<T> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Link { transport, timeout }
    }

    /// Adjust the exchange timeout (attach uses a longer handshake bound).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Query all switches and knobs.
    pub fn query_switches(&mut self) -> Result<[u8; QUERY_RESPONSE_LEN], TransportError> {
        self.transport.send(&[CMD_QUERY])?;
        let mut buf = [0u8; QUERY_RESPONSE_LEN];
        self.transport.recv_exact(&mut buf, self.timeout)?;
        debug!(bytes = ?buf, "switch query");
        Ok(buf)
    }

    /// Query the rotary knob byte only.
    pub fn query_rotary(&mut self) -> Result<u8, TransportError> {
        self.transport.send(&[CMD_ROTARY])?;
        let mut buf = [0u8; 1];
        self.transport.recv_exact(&mut buf, self.timeout)?;
        debug!(byte = buf[0], "rotary query");
        Ok(buf[0])
    }

    pub fn send_address(&mut self, addr: u32, width: AddressWidth) -> Result<(), TransportError> {
        trace!(addr, "address lamps");
        self.transport.send(&address_frame(addr, width))
    }

    pub fn send_data(&mut self, data: u16) -> Result<(), TransportError> {
        trace!(data, "data lamps");
        self.transport.send(&data_frame(data))
    }

    pub fn send_address_data(
        &mut self,
        addr: u32,
        data: u16,
        width: AddressWidth,
    ) -> Result<(), TransportError> {
        trace!(addr, data, "address+data lamps");
        self.transport.send(&address_data_frame(addr, data, width))
    }

    pub fn send_all(
        &mut self,
        addr: u32,
        data: u16,
        status: (u8, u8),
        width: AddressWidth,
    ) -> Result<(), TransportError> {
        trace!(addr, data, status1 = status.0, status2 = status.1, "full lamp update");
        self.transport.send(&all_frame(addr, data, status, width))
    }

    pub fn send_status(&mut self, status: (u8, u8)) -> Result<(), TransportError> {
        trace!(status1 = status.0, status2 = status.1, "status lamps");
        self.transport.send(&status_frame(status))
    }

    /// Acknowledge one or more momentary toggles so the console processor
    /// re-arms them.
    pub fn ack_toggles(&mut self, mask: AckFlags) -> Result<(), TransportError> {
        debug!(mask = mask.bits(), "toggle ack");
        self.transport.send(&ack_frame(mask))
    }

    /// Re-arm every toggle latch.
    pub fn clear_toggles(&mut self) -> Result<(), TransportError> {
        debug!("clear all toggles");
        self.transport.send(&[CMD_CLEAR_TOGGLES])
    }

    /// Send the model select code; first exchange of an attach.
    pub fn select_model(&mut self, model: Model) -> Result<(), TransportError> {
        self.transport.send(&model.layout().select_code)
    }

    /// Non-blocking poll for a console key byte. A NUL is line noise and is
    /// reported as no data.
    pub fn poll_key(&mut self) -> Result<Option<u8>, TransportError> {
        match self.transport.try_recv_byte()? {
            Some(0) | None => Ok(None),
            Some(byte) => Ok(Some(byte)),
        }
    }
}
