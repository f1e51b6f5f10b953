/*!
Command dispatcher: turns console key bytes into emulator command lines.

Each byte the console processor forwards identifies one operator action:

- `H`/`E` - HALT/ENABLE switch edges (not momentary toggles),
- `c` `d` `l` `s` `x` - CONTINUE, DEPOSIT, LOAD ADDRESS, START, EXAMINE.

Servicing a toggle mutates the control block (active address, first-use
flags, lamps), publishes the affected lamp frames, acknowledges the toggle
so the console processor re-arms it, and yields one text line for the
emulator. Lines starting with `;` are operator-visible comments; everything
else is a command the emulator executes verbatim (`step`, `continue`,
`run <addr>`, `reset all`, `examine <addr>`, `deposit <addr> <data>`, all
values in octal).

The dispatcher is a two-state machine. After producing a line it parks in
`AwaitingAck` until the worker reports the line consumed; duplicate toggle
bytes arriving meanwhile are dropped, so a bouncing switch can never
duplicate emulator-visible output. Switch edges (`H`/`E`) still update the
halt state while parked.

Transport hiccups while publishing lamps or acks are logged and retried by
the worker; they never lose a produced line and never leave the control
block half-updated. Only a failed switch re-query aborts servicing, leaving
the toggle unacknowledged for the operator to press again.
*/

use tracing::{debug, warn};

use crate::codec;
use crate::control::{AckFlags, AddressSpace, ControlBlock, HaltState};
use crate::model::Model;
use crate::transport::{Transport, TransportError};
use crate::wire::Link;

pub const KEY_HALT: u8 = b'H';
pub const KEY_ENABLE: u8 = b'E';
pub const KEY_CONTINUE: u8 = b'c';
pub const KEY_DEPOSIT: u8 = b'd';
pub const KEY_LOAD: u8 = b'l';
pub const KEY_START: u8 = b's';
pub const KEY_EXAMINE: u8 = b'x';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    /// A line was produced and not yet consumed by the emulator side.
    AwaitingAck,
}

pub struct Dispatcher {
    state: DispatchState,
    model: Model,
    /// Configured memory size in bytes, for address range validation.
    mem_size: u32,
}

impl Dispatcher {
    pub fn new(model: Model, mem_size: u32) -> Self {
        Dispatcher {
            state: DispatchState::Idle,
            model,
            mem_size,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The worker delivered the produced line; accept toggles again.
    pub fn delivered(&mut self) {
        self.state = DispatchState::Idle;
    }

    /// Service one console key byte.
    ///
    /// Returns the line to hand to the emulator, or `None` when the byte
    /// required no emulator-visible action.
    pub fn dispatch<T: Transport>(
        &mut self,
        key: u8,
        ctl: &mut ControlBlock,
        link: &mut Link<T>,
    ) -> Result<Option<String>, TransportError> {
        let layout = self.model.layout();
        let key_char = key as char;
        debug!(key = %key_char, state = ?self.state, "console key");

        if self.state == DispatchState::AwaitingAck {
            // Switch edges still count; toggle repeats are bounce.
            match key {
                KEY_HALT => ctl.halt = HaltState::Halted,
                KEY_ENABLE => {
                    ctl.halt = HaltState::PendingEnable;
                    best_effort(link.clear_toggles());
                }
                _ => debug!(key = %key_char, "dropped repeat while awaiting ack"),
            }
            return Ok(None);
        }

        let entry_halt = ctl.halt;
        let line = match key {
            KEY_HALT => {
                ctl.halt = HaltState::Halted;
                Some(";halt key down".to_string())
            }
            KEY_ENABLE => {
                ctl.halt = HaltState::PendingEnable;
                best_effort(link.clear_toggles());
                Some(";halt key up".to_string())
            }
            KEY_CONTINUE => {
                self.ack(ctl, link, AckFlags::CONT);
                if ctl.halt == HaltState::Halted {
                    // CONT with HALT down single-steps.
                    Some("step".to_string())
                } else {
                    ctl.lamps.address_error = false;
                    leave_halt(ctl, link, layout);
                    Some("continue".to_string())
                }
            }
            KEY_DEPOSIT => {
                ctl.switch_bytes = link.query_switches()?;
                if !ctl.first_deposit {
                    ctl.active_address = codec::advance_address(ctl.active_address);
                }
                let line = if ctl.invalid_address {
                    ctl.lamps.address_error = true;
                    ";address out of defined range".to_string()
                } else if codec::is_protected(ctl.active_address) {
                    ";no deposit in boot rom range".to_string()
                } else {
                    let data = codec::extract_data(&ctl.switch_bytes);
                    ctl.active_data = data;
                    ctl.first_examine = true;
                    ctl.first_deposit = false;
                    ctl.set_address(AddressSpace::ConsolePhysical, ctl.active_address);
                    best_effort(link.send_address_data(
                        ctl.active_address,
                        data,
                        ctl.lamps.width,
                    ));
                    format!("deposit {:o} {:o}", ctl.active_address, data)
                };
                self.ack(ctl, link, AckFlags::DEP);
                Some(line)
            }
            KEY_LOAD => {
                ctl.lamps.address_error = false;
                ctl.switch_bytes = link.query_switches()?;
                ctl.first_deposit = true;
                ctl.first_examine = true;
                let (addr, invalid) =
                    codec::extract_address(&ctl.switch_bytes, ctl.lamps.width, self.mem_size);
                ctl.active_address = addr;
                ctl.invalid_address = invalid;
                ctl.set_address(AddressSpace::ConsolePhysical, addr);
                best_effort(link.send_address(addr, ctl.lamps.width));
                self.ack(ctl, link, AckFlags::LOAD);
                Some(format!(";load address {:08o}", addr))
            }
            KEY_START => {
                let line = if ctl.halt == HaltState::Halted {
                    // START with HALT down resets the machine.
                    ctl.lamps.address_error = false;
                    "reset all".to_string()
                } else {
                    format!("run {:o}", ctl.active_address)
                };
                // START re-arms through the clear-all in leave_halt.
                leave_halt(ctl, link, layout);
                Some(line)
            }
            KEY_EXAMINE => {
                if !ctl.first_examine {
                    ctl.active_address = codec::advance_address(ctl.active_address);
                }
                let line = if ctl.invalid_address {
                    ctl.lamps.address_error = true;
                    ";address out of defined range".to_string()
                } else {
                    ctl.first_examine = false;
                    ctl.first_deposit = true;
                    ctl.set_address(AddressSpace::ConsolePhysical, ctl.active_address);
                    best_effort(link.send_address(ctl.active_address, ctl.lamps.width));
                    format!("examine {:o}", ctl.active_address)
                };
                self.ack(ctl, link, AckFlags::EXAM);
                Some(line)
            }
            _ => {
                debug!(byte = key, "ignoring stray byte");
                None
            }
        };

        if line.is_some() {
            // Keep the physical lamps in step with whatever just changed.
            best_effort(link.send_status(layout.status.encode(&ctl.lamps)));
            self.state = DispatchState::AwaitingAck;

            // The ENABLE edge is a one-shot: it decays once the next toggle
            // has been serviced (CONTINUE/START clear it through leave_halt).
            if entry_halt == HaltState::PendingEnable
                && ctl.halt == HaltState::PendingEnable
                && !matches!(key, KEY_HALT | KEY_ENABLE)
            {
                ctl.halt = HaltState::Running;
            }
        }
        Ok(line)
    }

    /// Queue and attempt a toggle acknowledgment. On transport failure the
    /// mask stays pending and the worker retries it next cycle.
    fn ack<T: Transport>(&mut self, ctl: &mut ControlBlock, link: &mut Link<T>, mask: AckFlags) {
        ctl.ack_pending.insert(mask);
        match link.ack_toggles(ctl.ack_pending) {
            Ok(()) => ctl.ack_pending = AckFlags::empty(),
            Err(e) => warn!(error = %e, "toggle ack deferred"),
        }
    }
}

/// Leave halt mode: clear the cached HALT bit and re-arm all toggles.
fn leave_halt<T: Transport>(
    ctl: &mut ControlBlock,
    link: &mut Link<T>,
    layout: &crate::model::ModelLayout,
) {
    ctl.clear_halt(layout);
    best_effort(link.clear_toggles());
}

fn best_effort(result: Result<(), TransportError>) {
    if let Err(e) = result {
        warn!(error = %e, "lamp update failed; will refresh next cycle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddressWidth;
    use crate::test_utils::{PanelHandle, ScriptedPanel, panel};
    use crate::wire::{self, Link};
    use std::time::Duration;

    const MEM_64K: u32 = 0x1_0000;
    const MEM_4M: u32 = 0x40_0000;

    fn rig(model: Model, mem: u32) -> (Dispatcher, ControlBlock, Link<ScriptedPanel>, PanelHandle) {
        let (transport, handle) = panel();
        (
            Dispatcher::new(model, mem),
            ControlBlock::new(),
            Link::new(transport, Duration::from_millis(50)),
            handle,
        )
    }

    /// Dispatch and immediately mark the line delivered, like the worker
    /// does once the emulator consumed it.
    fn run_key(
        dsp: &mut Dispatcher,
        ctl: &mut ControlBlock,
        link: &mut Link<ScriptedPanel>,
        key: u8,
    ) -> Option<String> {
        let line = dsp.dispatch(key, ctl, link).unwrap();
        if line.is_some() {
            dsp.delivered();
        }
        line
    }

    #[test]
    fn halt_key_halts_and_comments() {
        let (mut dsp, mut ctl, mut link, _h) = rig(Model::M1170, MEM_4M);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_HALT);
        assert_eq!(line.as_deref(), Some(";halt key down"));
        assert_eq!(ctl.halt, HaltState::Halted);
    }

    #[test]
    fn continue_steps_while_halted() {
        let (mut dsp, mut ctl, mut link, _h) = rig(Model::M1170, MEM_4M);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_HALT);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_CONTINUE);
        assert_eq!(line.as_deref(), Some("step"));
        // Stepping does not leave halt mode.
        assert_eq!(ctl.halt, HaltState::Halted);
    }

    #[test]
    fn continue_after_enable_continues() {
        let (mut dsp, mut ctl, mut link, _h) = rig(Model::M1170, MEM_4M);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_HALT);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_ENABLE);
        assert_eq!(line.as_deref(), Some(";halt key up"));
        assert_eq!(ctl.halt, HaltState::PendingEnable);

        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_CONTINUE);
        assert_eq!(line.as_deref(), Some("continue"));
        assert_eq!(ctl.halt, HaltState::Running);
    }

    #[test]
    fn pending_enable_decays_after_one_serviced_toggle() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_4M);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_ENABLE);
        assert_eq!(ctl.halt, HaltState::PendingEnable);

        h.set_switch_register(0o1000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        assert_eq!(ctl.halt, HaltState::Running);
    }

    #[test]
    fn load_address_sets_active_and_publishes() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o1000);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        assert_eq!(line.as_deref(), Some(";load address 00001000"));
        assert_eq!(ctl.active_address, 0o1000);
        assert!(!ctl.invalid_address);
        assert!(ctl.first_examine && ctl.first_deposit);

        let frame = h.last_frame(wire::CMD_ADDRESS).unwrap();
        assert_eq!(frame, wire::address_frame(0o1000, AddressWidth::W16));
        // LOAD acknowledged.
        let ack = h.last_frame(wire::CMD_ACK).unwrap();
        assert_eq!(ack[2], AckFlags::LOAD.bits());
    }

    #[test]
    fn first_examine_uses_loaded_address_then_increments() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o1000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);

        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        assert_eq!(line.as_deref(), Some("examine 1000"));
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        assert_eq!(line.as_deref(), Some("examine 1002"));
    }

    #[test]
    fn examine_steps_by_one_in_register_window() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_4M);
        ctl.lamps.width = AddressWidth::W22;
        h.set_switch_register(codec::GEN_REG_FIRST);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);

        run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        assert_eq!(
            line,
            Some(format!("examine {:o}", codec::GEN_REG_FIRST + 1))
        );
    }

    #[test]
    fn deposit_extracts_data_and_alternates_with_examine() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o1000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);

        h.set_switch_register(0o177_777 & 0xFFFF);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_DEPOSIT);
        assert_eq!(line.as_deref(), Some("deposit 1000 177777"));
        assert_eq!(ctl.active_data, 0o177777);
        assert!(ctl.first_examine);
        assert!(!ctl.first_deposit);

        // Second deposit auto-increments.
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_DEPOSIT);
        assert_eq!(line.as_deref(), Some("deposit 1002 177777"));

        // A deposit resets examine sequencing: next examine re-uses the
        // deposited address.
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        assert_eq!(line.as_deref(), Some("examine 1002"));
    }

    #[test]
    fn deposit_into_boot_rom_is_refused() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o165000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        let before_addr = ctl.active_address;
        let before_data = ctl.active_data;

        h.clear_writes();
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_DEPOSIT);
        assert_eq!(line.as_deref(), Some(";no deposit in boot rom range"));
        assert_eq!(ctl.active_address, before_addr);
        assert_eq!(ctl.active_data, before_data);
        assert!(ctl.first_deposit, "refused deposit must not start a run");
        // No address/data lamp frame went out for the refused write.
        assert!(h.last_frame(wire::CMD_ADDRESS_DATA).is_none());
        // The toggle is still re-armed.
        assert!(h.last_frame(wire::CMD_ACK).is_some());
    }

    #[test]
    fn out_of_range_address_sets_error_lamp() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, 0x2000);
        h.set_switch_register(0x3000); // beyond memory, below the I/O page
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        assert!(ctl.invalid_address);

        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_EXAMINE);
        assert_eq!(line.as_deref(), Some(";address out of defined range"));
        assert!(ctl.lamps.address_error);

        // LOAD ADDRESS clears the lamp again.
        h.set_switch_register(0x1000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        assert!(!ctl.lamps.address_error);
        assert!(!ctl.invalid_address);
    }

    #[test]
    fn start_resets_while_halted_and_runs_otherwise() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_HALT);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_START);
        assert_eq!(line.as_deref(), Some("reset all"));
        assert_eq!(ctl.halt, HaltState::Running);

        h.set_switch_register(0o2000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);
        let line = run_key(&mut dsp, &mut ctl, &mut link, KEY_START);
        assert_eq!(line.as_deref(), Some("run 2000"));
    }

    #[test]
    fn duplicate_toggle_while_awaiting_ack_is_dropped() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o1000);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_LOAD);

        let first = dsp.dispatch(KEY_EXAMINE, &mut ctl, &mut link).unwrap();
        assert_eq!(first.as_deref(), Some("examine 1000"));
        assert_eq!(dsp.state(), DispatchState::AwaitingAck);

        // Same toggle again before delivery: swallowed, no second line.
        let repeat = dsp.dispatch(KEY_EXAMINE, &mut ctl, &mut link).unwrap();
        assert_eq!(repeat, None);

        // After delivery the toggle works again and increments once.
        dsp.delivered();
        let next = dsp.dispatch(KEY_EXAMINE, &mut ctl, &mut link).unwrap();
        assert_eq!(next.as_deref(), Some("examine 1002"));
    }

    #[test]
    fn halt_edge_applies_even_while_awaiting_ack() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.set_switch_register(0o1000);
        let line = dsp.dispatch(KEY_LOAD, &mut ctl, &mut link).unwrap();
        assert!(line.is_some());

        let during = dsp.dispatch(KEY_HALT, &mut ctl, &mut link).unwrap();
        assert_eq!(during, None);
        assert_eq!(ctl.halt, HaltState::Halted);
    }

    #[test]
    fn serviced_keys_republish_status() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        run_key(&mut dsp, &mut ctl, &mut link, KEY_HALT);
        assert!(h.last_frame(wire::CMD_STATUS).is_some());
    }

    #[test]
    fn stray_bytes_are_ignored() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        let line = dsp.dispatch(b'?', &mut ctl, &mut link).unwrap();
        assert_eq!(line, None);
        assert_eq!(dsp.state(), DispatchState::Idle);
        assert!(h.last_frame(wire::CMD_STATUS).is_none());
    }

    #[test]
    fn failed_switch_query_leaves_block_consistent() {
        let (mut dsp, mut ctl, mut link, h) = rig(Model::M1170, MEM_64K);
        h.wedge();
        let err = dsp.dispatch(KEY_LOAD, &mut ctl, &mut link);
        assert!(err.is_err());
        assert_eq!(dsp.state(), DispatchState::Idle);
        assert_eq!(ctl.active_address, 0);
        assert!(ctl.first_examine && ctl.first_deposit);
    }
}
