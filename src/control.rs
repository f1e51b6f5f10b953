/*!
Control block: the single mutable state record behind one attached console.

The block is created zeroed when a console is attached and torn down at
detach; it is owned exclusively by the console worker thread. The emulator
side never touches it directly - it talks to the worker through the bounded
channel pair in [`crate::worker`].

Contents:
- the last raw switch/knob snapshot from the console processor,
- the address and data register files the rotary knobs select between,
- the active address/data set by LOAD ADDRESS / EXAMINE / DEPOSIT and the
  first-use flags driving auto-increment,
- the HALT/ENABLE tri-state and the logical lamp state,
- the pending toggle-acknowledge mask.
*/

use bitflags::bitflags;

use crate::model::{AddressWidth, ModelLayout, RingMode};

/// HALT/ENABLE switch state.
///
/// `PendingEnable` is the one-shot set when the switch transitions back up;
/// it decays to `Running` after the next serviced console command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HaltState {
    #[default]
    Running,
    PendingEnable,
    Halted,
}

/// Address spaces selectable by the DISPLAY ADDRESS rotary knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    KernelI = 0,
    KernelD = 1,
    SuperI = 2,
    SuperD = 3,
    UserI = 4,
    UserD = 5,
    ProgramPhysical = 6,
    ConsolePhysical = 7,
}

pub const ADDRESS_SPACES: usize = 8;

impl AddressSpace {
    /// Decode the 3-bit DISPLAY ADDRESS knob code.
    pub fn from_knob(code: u8) -> AddressSpace {
        match code & 0x07 {
            0 => AddressSpace::ProgramPhysical,
            1 => AddressSpace::KernelD,
            2 => AddressSpace::KernelI,
            3 => AddressSpace::ConsolePhysical,
            4 => AddressSpace::SuperD,
            5 => AddressSpace::SuperI,
            6 => AddressSpace::UserD,
            _ => AddressSpace::UserI,
        }
    }

    /// The instruction-space slot for a ring protection mode.
    pub fn instruction_space(ring: RingMode) -> AddressSpace {
        match ring {
            RingMode::Kernel => AddressSpace::KernelI,
            RingMode::Supervisor => AddressSpace::SuperI,
            RingMode::User => AddressSpace::UserI,
        }
    }

    /// Physical spaces display at the full model width; mapped spaces are
    /// 16-bit virtual addresses.
    pub fn display_width(self, max: AddressWidth) -> AddressWidth {
        match self {
            AddressSpace::ProgramPhysical | AddressSpace::ConsolePhysical => max,
            _ => AddressWidth::W16,
        }
    }
}

/// Data sources selectable by the DISPLAY DATA rotary knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Shifter = 0,
    BusRegister = 1,
    MicroAddress = 2,
    DisplayRegister = 3,
}

pub const DATA_SOURCES: usize = 4;

impl DataSource {
    /// Decode the 2-bit DISPLAY DATA knob code.
    pub fn from_knob(code: u8) -> DataSource {
        match code & 0x03 {
            0 => DataSource::BusRegister,
            1 => DataSource::Shifter,
            2 => DataSource::DisplayRegister,
            _ => DataSource::MicroAddress,
        }
    }
}

bitflags! {
    /// Pending toggle-switch acknowledgments, one bit per momentary control.
    /// The bit values are the console processor's wire encoding.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct AckFlags: u8 {
        const EXAM = 0x01;
        const START = 0x02;
        const LOAD = 0x04;
        const CONT = 0x08;
        const DEP = 0x40;
    }
}

/// Logical lamp state. Per-model encoding into the two status port bytes
/// happens at frame-build time, see [`crate::model::StatusLayout::encode`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Lamps {
    pub run: bool,
    pub master: bool,
    pub pause: bool,
    pub address_error: bool,
    pub indirect_data: bool,
    pub ring: RingMode,
    pub width: AddressWidth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    /// Last queried switch/knob snapshot.
    pub switch_bytes: [u8; 5],
    /// Address register file, indexed by [`AddressSpace`].
    pub addresses: [u32; ADDRESS_SPACES],
    /// Data register file, indexed by [`DataSource`].
    pub data: [u16; DATA_SOURCES],
    /// Address last set by LOAD ADDRESS / EXAMINE / DEPOSIT.
    pub active_address: u32,
    /// Data last deposited.
    pub active_data: u16,
    pub halt: HaltState,
    /// True until the first EXAMINE after a LOAD ADDRESS or DEPOSIT.
    pub first_examine: bool,
    /// True until the first DEPOSIT after a LOAD ADDRESS or EXAMINE.
    pub first_deposit: bool,
    /// Recomputed on every address load, never left stale.
    pub invalid_address: bool,
    pub lamps: Lamps,
    /// Toggle acks not yet delivered to the console processor.
    pub ack_pending: AckFlags,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBlock {
    pub fn new() -> Self {
        ControlBlock {
            switch_bytes: [0; 5],
            addresses: [0; ADDRESS_SPACES],
            data: [0; DATA_SOURCES],
            active_address: 0,
            active_data: 0,
            halt: HaltState::Running,
            first_examine: true,
            first_deposit: true,
            invalid_address: false,
            lamps: Lamps::default(),
            ack_pending: AckFlags::empty(),
        }
    }

    #[inline]
    pub fn address(&self, space: AddressSpace) -> u32 {
        self.addresses[space as usize]
    }

    #[inline]
    pub fn set_address(&mut self, space: AddressSpace, value: u32) {
        self.addresses[space as usize] = value;
    }

    #[inline]
    pub fn data(&self, source: DataSource) -> u16 {
        self.data[source as usize]
    }

    #[inline]
    pub fn set_data(&mut self, source: DataSource, value: u16) {
        self.data[source as usize] = value;
    }

    /// HALT switch position in the cached snapshot.
    #[inline]
    pub fn halt_switch_down(&self, layout: &ModelLayout) -> bool {
        self.switch_bytes[layout.halt_switch.byte] & layout.halt_switch.mask != 0
    }

    /// Key switch in the LOCK position in the cached snapshot.
    #[inline]
    pub fn key_locked(&self, layout: &ModelLayout) -> bool {
        self.switch_bytes[layout.key_switch.byte] & layout.key_switch.mask != 0
    }

    /// Leave halt mode: clear the cached HALT switch bit so a stale snapshot
    /// cannot re-halt before the next query.
    pub fn clear_halt(&mut self, layout: &ModelLayout) {
        self.switch_bytes[layout.halt_switch.byte] &= !layout.halt_switch.mask;
        self.halt = HaltState::Running;
    }
}
