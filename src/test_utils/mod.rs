//! Shared test double standing in for the console processor.
//!
//! [`ScriptedPanel`] implements [`Transport`] over an in-memory script:
//! query and rotary exchanges answer from a settable switch snapshot, every
//! outbound frame is recorded for inspection, and key presses queued on the
//! [`PanelHandle`] surface through `try_recv_byte` exactly like bytes
//! arriving on the serial line.
//!
//! The handle side is `Arc<Mutex<_>>`-shared so tests can keep poking the
//! panel after the transport has been moved into an attached console.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::model::Model;
use crate::transport::{Transport, TransportError};
use crate::wire::{CMD_QUERY, CMD_ROTARY};

#[derive(Default)]
struct PanelState {
    switches: [u8; 5],
    rotary: u8,
    keys: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    /// When set, frames still go out but no response ever comes back.
    wedged: bool,
}

/// Transport half: owned by the code under test.
pub struct ScriptedPanel {
    state: Arc<Mutex<PanelState>>,
    responses: VecDeque<u8>,
}

/// Test half: inspect traffic and script the operator's actions.
pub struct PanelHandle {
    state: Arc<Mutex<PanelState>>,
}

/// Build a connected panel/handle pair.
pub fn panel() -> (ScriptedPanel, PanelHandle) {
    let state = Arc::new(Mutex::new(PanelState::default()));
    (
        ScriptedPanel {
            state: Arc::clone(&state),
            responses: VecDeque::new(),
        },
        PanelHandle { state },
    )
}

impl Transport for ScriptedPanel {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut st = self.state.lock().unwrap();
        st.writes.push(frame.to_vec());
        if st.wedged {
            return Ok(());
        }
        match frame[0] {
            CMD_QUERY => {
                let switches = st.switches;
                self.responses.extend(switches);
            }
            CMD_ROTARY => {
                let rotary = st.rotary;
                self.responses.push_back(rotary);
            }
            _ => {}
        }
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), TransportError> {
        for (got, slot) in buf.iter_mut().enumerate() {
            match self.responses.pop_front() {
                Some(byte) => *slot = byte,
                None => {
                    return Err(TransportError::Timeout {
                        wanted: buf.len(),
                        got,
                    });
                }
            }
        }
        Ok(())
    }

    fn try_recv_byte(&mut self) -> Result<Option<u8>, TransportError> {
        Ok(self.state.lock().unwrap().keys.pop_front())
    }
}

impl PanelHandle {
    pub fn set_switches(&self, switches: [u8; 5]) {
        self.state.lock().unwrap().switches = switches;
    }

    /// Load the three address/data switch-register bytes, leaving the key
    /// and knob bytes alone.
    pub fn set_switch_register(&self, value: u32) {
        let mut st = self.state.lock().unwrap();
        st.switches[0] = value as u8;
        st.switches[1] = (value >> 8) as u8;
        st.switches[2] = (value >> 16) as u8;
    }

    pub fn set_rotary(&self, byte: u8) {
        self.state.lock().unwrap().rotary = byte;
    }

    /// Move the HALT/ENABLE switch in the snapshot the next query returns.
    pub fn set_halt_switch(&self, model: Model, down: bool) {
        let sw = model.layout().halt_switch;
        let mut st = self.state.lock().unwrap();
        if down {
            st.switches[sw.byte] |= sw.mask;
        } else {
            st.switches[sw.byte] &= !sw.mask;
        }
    }

    /// Queue a key press byte as if the operator flipped a toggle.
    pub fn press(&self, key: u8) {
        self.state.lock().unwrap().keys.push_back(key);
    }

    /// Stop answering queries; outbound frames are still swallowed.
    pub fn wedge(&self) {
        self.state.lock().unwrap().wedged = true;
    }

    /// All frames sent to the panel so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Most recent frame starting with `cmd`, if any.
    pub fn last_frame(&self, cmd: u8) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .rev()
            .find(|f| f.first() == Some(&cmd))
            .cloned()
    }

    /// Forget recorded traffic (handy between test phases).
    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// True once every queued key press has been consumed.
    pub fn keys_drained(&self) -> bool {
        self.state.lock().unwrap().keys.is_empty()
    }
}
