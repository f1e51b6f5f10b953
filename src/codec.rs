/*!
Address/data codec: pure conversions between raw switch-register bytes and
bus addresses/data words. No I/O here.

Behavior:
- An address is assembled from three switch bytes (low, mid, high), masked
  to the 16/18/22-bit width currently in effect, and range-checked against
  the configured memory size. Addresses inside the fixed I/O page window
  are always valid regardless of memory size.
- Auto-increment steps by 2 and keeps the address even, except inside the
  eight-location general register window where it steps by 1. Stepping past
  the 22-bit top wraps to zero.
- Two boot-ROM windows are write-protected; deposits there are refused by
  the dispatcher without touching any state.
*/

use crate::model::AddressWidth;

/// Switch-snapshot byte indices for the address/data switch register.
pub const SWR_LOW: usize = 0;
pub const SWR_MID: usize = 1;
pub const SWR_HIGH: usize = 2;

/// The eight general registers appear as consecutive bus locations and are
/// stepped by 1, not 2.
pub const GEN_REG_FIRST: u32 = 0x3FFC0;
pub const GEN_REG_LAST: u32 = 0x3FFC7;

/// Largest even 22-bit address; stepping past it wraps to zero.
const ADDR_TOP: u32 = 0x3FFFFE;

/// Boot-ROM windows (half-open): 165000..166000 and 173000..174000 octal,
/// plus their aliases at the top of the 22-bit space.
const ROM_WINDOWS: [(u32, u32); 4] = [
    (0x00EA00, 0x00EC00),
    (0x00F600, 0x00F800),
    (0x3FEA00, 0x3FEC00),
    (0x3FF600, 0x3FF800),
];

/// Assemble an address from the switch snapshot.
///
/// Returns the masked address and whether it falls outside both the
/// configured memory size and the always-valid I/O page.
pub fn extract_address(switches: &[u8; 5], width: AddressWidth, mem_size: u32) -> (u32, bool) {
    let raw = u32::from(switches[SWR_HIGH]) << 16
        | u32::from(switches[SWR_MID]) << 8
        | u32::from(switches[SWR_LOW]);
    let addr = raw & width.value_mask();

    let (io_lo, io_hi) = width.io_page_bounds();
    let invalid = addr >= mem_size && !(addr > io_lo && addr < io_hi);
    (addr, invalid)
}

/// Assemble a data word from the two low switch bytes.
#[inline]
pub fn extract_data(switches: &[u8; 5]) -> u16 {
    u16::from(switches[SWR_MID]) << 8 | u16::from(switches[SWR_LOW])
}

/// Step the active address for a repeated EXAMINE/DEPOSIT.
pub fn advance_address(addr: u32) -> u32 {
    if (GEN_REG_FIRST..=GEN_REG_LAST).contains(&addr) {
        return addr + 1;
    }
    let next = addr + 2;
    if next > ADDR_TOP {
        return 0;
    }
    // A +1 step out of the register window can leave an odd address behind.
    next & ADDR_TOP
}

/// True if the address lies in a write-protected boot-ROM window.
pub fn is_protected(addr: u32) -> bool {
    let a = addr & AddressWidth::W22.value_mask();
    ROM_WINDOWS.iter().any(|&(lo, hi)| a >= lo && a < hi)
}
