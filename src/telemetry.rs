/*!
Lamp telemetry: what the console displays while nobody is flipping switches.

The worker refreshes the lamps on a fixed cadence. Most cycles send a light
address/data frame so the address and data rows track the running program;
every [`FULL_FRAME_INTERVAL`]th cycle sends a full update that also drives
the status lamps, and every [`ROTARY_POLL_INTERVAL`]th full cycle re-reads
the rotary knobs so a knob turn is noticed without waiting for a key press.

Which address and data the lamps show is the rotary knobs' choice on models
that have them; the other models always show the program-physical address
and the shifter data.
*/

use crate::control::{AddressSpace, ControlBlock, DataSource};
use crate::model::{AddressWidth, Model};
use crate::transport::{Transport, TransportError};
use crate::wire::Link;

/// Every Nth refresh cycle sends a full lamp update instead of a light one.
pub const FULL_FRAME_INTERVAL: u32 = 5;

/// Every Nth full update also re-queries the rotary knobs.
pub const ROTARY_POLL_INTERVAL: u32 = 3;

/// What one refresh cycle should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePlan {
    /// Address and data lamps only.
    Light,
    /// Address, data and status lamps; optionally re-read the knobs first.
    Full { poll_rotary: bool },
}

/// Cycle counter producing the refresh schedule. The first cycle after
/// attach is a full one with a rotary poll so the lamps start correct.
#[derive(Debug, Default)]
pub struct Cadence {
    cycle: u32,
    fulls: u32,
}

impl Cadence {
    pub fn new() -> Self {
        Cadence::default()
    }

    pub fn next(&mut self) -> CyclePlan {
        let plan = if self.cycle == 0 {
            let poll_rotary = self.fulls == 0;
            self.fulls = (self.fulls + 1) % ROTARY_POLL_INTERVAL;
            CyclePlan::Full { poll_rotary }
        } else {
            CyclePlan::Light
        };
        self.cycle = (self.cycle + 1) % FULL_FRAME_INTERVAL;
        plan
    }
}

/// Fold a freshly polled rotary byte back into the cached snapshot.
pub fn apply_rotary(ctl: &mut ControlBlock, model: Model, byte: u8) {
    if let Some(rot) = model.layout().rotary {
        ctl.switch_bytes[rot.byte] = byte;
    }
}

/// Pick the address and data the lamps should show, per the rotary knobs.
///
/// Physical address spaces display at the model's full width; the mapped
/// spaces are 16-bit virtual addresses.
pub fn select_display(ctl: &ControlBlock, model: Model) -> (u32, u16, AddressWidth) {
    let layout = model.layout();
    let (space, source) = match layout.rotary {
        Some(rot) => {
            let byte = ctl.switch_bytes[rot.byte];
            (
                AddressSpace::from_knob(byte >> rot.addr_shift),
                DataSource::from_knob(byte >> rot.data_shift),
            )
        }
        None => (AddressSpace::ProgramPhysical, DataSource::Shifter),
    };
    let width = space.display_width(layout.max_width);
    (ctl.address(space), ctl.data(source), width)
}

/// Send one refresh frame: light address/data, or the full variant with the
/// status ports appended.
pub fn publish<T: Transport>(
    ctl: &ControlBlock,
    model: Model,
    link: &mut Link<T>,
    full: bool,
) -> Result<(), TransportError> {
    let (addr, data, width) = select_display(ctl, model);
    if full {
        let status = model.layout().status.encode(&ctl.lamps);
        link.send_all(addr, data, status, width)
    } else {
        link.send_address_data(addr, data, width)
    }
}
