/*!
CPU model variant layer.

The console bridge supports five processor variants. They differ in three
ways that matter to the bridge and in no other:
- the maximum physical address width (16, 18 or 22 bits),
- where the HALT/ENABLE and key switches sit inside the five-byte switch
  snapshot returned by the console processor's query command,
- which rotary display knobs exist and how the status-lamp bytes are laid
  out on the two output ports.

All of that is captured once in a static [`ModelLayout`] per variant. The
codec, dispatcher and worker take the layout as data and contain no
per-model branching of their own.
*/

use crate::control::Lamps;

/// Supported processor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    M1105,
    M1120,
    M1140,
    M1145,
    M1170,
}

/// Physical address width currently in effect (16/18/22-bit mapping).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    #[default]
    W16,
    W18,
    W22,
}

/// Memory-management mode as reported by the CPU engine on each bus publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MmuMode {
    /// Mapping disabled, 16-bit addressing.
    #[default]
    Off,
    /// 18-bit mapping enabled.
    Map18,
    /// 22-bit mapping enabled.
    Map22,
}

/// Current ring-protection (privilege) mode, shown on the console lamps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RingMode {
    #[default]
    Kernel,
    Supervisor,
    User,
}

/// One bit inside the five-byte switch snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchBit {
    pub byte: usize,
    pub mask: u8,
}

/// Placement of the two rotary display knobs inside the switch snapshot.
///
/// The address knob selects one of eight address spaces (3 bits), the data
/// knob one of four data sources (2 bits). Only the 11/45 and 11/70 have
/// rotary knobs; the other models display program-physical address and
/// shifter data unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotaryLayout {
    /// Switch-snapshot byte holding both knob fields.
    pub byte: usize,
    pub addr_shift: u8,
    pub data_shift: u8,
}

/// Per-model status lamp bit positions. A zero mask means the lamp does not
/// exist on that model and the bit is never driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout {
    pub run: u8,
    pub master: u8,
    pub pause: u8,
    pub addr_err: u8,
    pub ind_data: u8,
    /// Ring protection encoded in the two low bits of status port 1
    /// (kernel = 00, supervisor = 01, user = 11).
    pub ring_low_bits: bool,
    /// Status port 2 carries the 16/18/22-bit mapping lamps.
    pub width_port2: bool,
}

/// Everything the bridge needs to know about one processor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLayout {
    pub max_width: AddressWidth,
    /// Two-byte select/handshake code sent to the console processor at attach.
    pub select_code: [u8; 2],
    pub halt_switch: SwitchBit,
    pub key_switch: SwitchBit,
    pub rotary: Option<RotaryLayout>,
    pub status: StatusLayout,
}

const LAYOUT_1105: ModelLayout = ModelLayout {
    max_width: AddressWidth::W16,
    select_code: *b"p1",
    halt_switch: SwitchBit { byte: 1, mask: 0x01 },
    key_switch: SwitchBit { byte: 1, mask: 0x80 },
    rotary: None,
    status: StatusLayout {
        run: 0x80,
        master: 0,
        pause: 0,
        addr_err: 0,
        ind_data: 0,
        ring_low_bits: false,
        width_port2: false,
    },
};

const LAYOUT_1120: ModelLayout = ModelLayout {
    select_code: *b"p2",
    ..LAYOUT_1105
};

const LAYOUT_1140: ModelLayout = ModelLayout {
    max_width: AddressWidth::W18,
    select_code: *b"p3",
    ..LAYOUT_1105
};

const LAYOUT_1145: ModelLayout = ModelLayout {
    max_width: AddressWidth::W18,
    select_code: *b"p4",
    halt_switch: SwitchBit { byte: 4, mask: 0x01 },
    key_switch: SwitchBit { byte: 2, mask: 0x80 },
    rotary: Some(RotaryLayout {
        byte: 2,
        addr_shift: 4,
        data_shift: 2,
    }),
    status: StatusLayout {
        run: 0x80,
        master: 0x40,
        addr_err: 0x20,
        pause: 0x10,
        ind_data: 0x04,
        ring_low_bits: true,
        width_port2: false,
    },
};

const LAYOUT_1170: ModelLayout = ModelLayout {
    max_width: AddressWidth::W22,
    select_code: *b"p5",
    halt_switch: SwitchBit { byte: 4, mask: 0x40 },
    key_switch: SwitchBit { byte: 4, mask: 0x80 },
    rotary: Some(RotaryLayout {
        byte: 4,
        addr_shift: 0,
        data_shift: 3,
    }),
    status: StatusLayout {
        run: 0x80,
        master: 0x40,
        pause: 0x20,
        addr_err: 0x10,
        ind_data: 0x04,
        ring_low_bits: true,
        width_port2: true,
    },
};

impl Model {
    pub fn layout(self) -> &'static ModelLayout {
        match self {
            Model::M1105 => &LAYOUT_1105,
            Model::M1120 => &LAYOUT_1120,
            Model::M1140 => &LAYOUT_1140,
            Model::M1145 => &LAYOUT_1145,
            Model::M1170 => &LAYOUT_1170,
        }
    }

    /// Parse a model name as used by configuration glue ("11/70", "1170").
    pub fn from_name(name: &str) -> Option<Model> {
        match name.trim().trim_start_matches("11").trim_start_matches('/') {
            "05" => Some(Model::M1105),
            "20" => Some(Model::M1120),
            "40" => Some(Model::M1140),
            "45" => Some(Model::M1145),
            "70" => Some(Model::M1170),
            _ => None,
        }
    }
}

impl AddressWidth {
    /// Mask covering every address bit of this width.
    #[inline]
    pub fn value_mask(self) -> u32 {
        match self {
            AddressWidth::W16 => 0x00FFFF,
            AddressWidth::W18 => 0x03FFFF,
            AddressWidth::W22 => 0x3FFFFF,
        }
    }

    /// Mask applied to the high address byte of outbound lamp frames.
    #[inline]
    pub fn high_byte_mask(self) -> u8 {
        match self {
            AddressWidth::W16 => 0x00,
            AddressWidth::W18 => 0x03,
            AddressWidth::W22 => 0x3F,
        }
    }

    /// Exclusive bounds of the always-valid I/O page window for this width.
    ///
    /// An address `a` is inside the window iff `lo < a < hi`; the bounds
    /// themselves are outside, matching the range checks the console
    /// firmware was built against.
    #[inline]
    pub fn io_page_bounds(self) -> (u32, u32) {
        match self {
            AddressWidth::W16 => (0x00DFFF, 0x00FFFF),
            AddressWidth::W18 => (0x03DFFF, 0x03FFFF),
            AddressWidth::W22 => (0x3FDFFF, 0x3FFFFF),
        }
    }
}

impl MmuMode {
    /// Address width implied by the current mapping mode.
    #[inline]
    pub fn width(self) -> AddressWidth {
        match self {
            MmuMode::Off => AddressWidth::W16,
            MmuMode::Map18 => AddressWidth::W18,
            MmuMode::Map22 => AddressWidth::W22,
        }
    }
}

impl StatusLayout {
    /// Encode the logical lamp state into the two status port bytes.
    pub fn encode(&self, lamps: &Lamps) -> (u8, u8) {
        let mut port1 = 0u8;
        if lamps.run {
            port1 |= self.run;
        }
        if lamps.master {
            port1 |= self.master;
        }
        if lamps.pause {
            port1 |= self.pause;
        }
        if lamps.address_error {
            port1 |= self.addr_err;
        }
        if lamps.indirect_data {
            port1 |= self.ind_data;
        }
        if self.ring_low_bits {
            port1 |= match lamps.ring {
                RingMode::Kernel => 0x00,
                RingMode::Supervisor => 0x01,
                RingMode::User => 0x03,
            };
        }

        let mut port2 = 0u8;
        if self.width_port2 {
            port2 |= match lamps.width {
                AddressWidth::W16 => 0x01,
                AddressWidth::W18 => 0x02,
                AddressWidth::W22 => 0x04,
            };
        }
        (port1, port2)
    }
}
