/*!
Console worker: the background thread owning the serial link.

One worker runs per attached console. It is the only code that touches the
transport after attach; the emulator side talks to it through a pair of
bounded capacity-1 channels and two shared flags:

- `BusUpdate` snapshots flow emulator-to-worker. The sender coalesces: with
  an unconsumed snapshot already in the channel the newer one is dropped,
  so a fast CPU loop never backs up behind a 9600-baud lamp refresh.
- Command lines flow worker-to-emulator, one at a time. The worker keeps an
  undelivered line and retries until the emulator polls it; the dispatcher
  stays parked meanwhile, so switch bounce cannot duplicate a command.
- `stop` asks the worker to exit; `halt_requested` mirrors whether the
  HALT switch currently calls for the CPU to stop.

Each cycle the worker absorbs bus snapshots, retries any deferred toggle
ack, drains console key bytes through the dispatcher, and refreshes the
lamps on the [`crate::telemetry`] cadence. Full-refresh cycles re-query the
switches, which doubles as HALT edge detection in case the console
processor's key byte for the edge was lost on the line. The cycle sleep
doubles as the bus-snapshot wait, and stretches while halted since the
lamps are frozen anyway.

Transport errors during a cycle are logged and the cycle's remaining lamp
work skipped; the control block is never left half-updated.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::control::{AckFlags, AddressSpace, ControlBlock, DataSource, HaltState};
use crate::dispatch::Dispatcher;
use crate::model::{MmuMode, Model, RingMode};
use crate::telemetry::{self, Cadence, CyclePlan};
use crate::transport::Transport;
use crate::wire::Link;

/// Cycle period while the CPU is running.
pub const RUN_CYCLE: Duration = Duration::from_millis(10);

/// Cycle period while halted; nothing moves on the lamps, so poll slowly.
pub const HALT_CYCLE: Duration = Duration::from_millis(50);

/// One coalesced bus snapshot from the CPU engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusUpdate {
    /// Program-physical address of the last bus cycle.
    pub address: u32,
    /// Data word of the last bus cycle.
    pub data: u16,
    pub ring: RingMode,
    pub mmu: MmuMode,
}

pub struct Worker<T: Transport> {
    link: Link<T>,
    ctl: ControlBlock,
    dispatcher: Dispatcher,
    cadence: Cadence,
    model: Model,
    bus_rx: Receiver<BusUpdate>,
    line_tx: SyncSender<String>,
    stop: Arc<AtomicBool>,
    halt_requested: Arc<AtomicBool>,
    /// Produced but not yet consumed by the emulator side.
    pending_line: Option<String>,
}

impl<T: Transport> Worker<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Model,
        mem_size: u32,
        link: Link<T>,
        ctl: ControlBlock,
        bus_rx: Receiver<BusUpdate>,
        line_tx: SyncSender<String>,
        stop: Arc<AtomicBool>,
        halt_requested: Arc<AtomicBool>,
    ) -> Self {
        Worker {
            link,
            ctl,
            dispatcher: Dispatcher::new(model, mem_size),
            cadence: Cadence::new(),
            model,
            bus_rx,
            line_tx,
            stop,
            halt_requested,
            pending_line: None,
        }
    }

    /// Service cycles until the stop flag is raised or the emulator side
    /// goes away. Consumes the worker; the transport drops with it.
    pub fn run(mut self) {
        debug!(model = ?self.model, "console worker started");
        while !self.stop.load(Ordering::Relaxed) {
            self.drain_bus_updates();
            self.flush_pending_ack();
            self.deliver_pending_line();
            self.drain_keys();
            self.refresh_lamps();

            self.halt_requested
                .store(self.ctl.halt == HaltState::Halted, Ordering::Relaxed);

            let period = if self.ctl.halt == HaltState::Halted {
                HALT_CYCLE
            } else {
                RUN_CYCLE
            };
            match self.bus_rx.recv_timeout(period) {
                Ok(update) => self.absorb(update),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("console worker stopped");
    }

    fn drain_bus_updates(&mut self) {
        while let Ok(update) = self.bus_rx.try_recv() {
            self.absorb(update);
        }
    }

    /// Fold a bus snapshot into the display registers and lamps.
    fn absorb(&mut self, update: BusUpdate) {
        trace!(addr = update.address, data = update.data, "bus snapshot");
        self.ctl
            .set_address(AddressSpace::ProgramPhysical, update.address);
        self.ctl
            .set_address(AddressSpace::instruction_space(update.ring), update.address);
        self.ctl.set_data(DataSource::Shifter, update.data);
        self.ctl.lamps.ring = update.ring;
        self.ctl.lamps.width = update.mmu.width();
    }

    /// Retry a toggle acknowledge that failed at dispatch time. Until it
    /// lands the operator's switch stays latched, which is visible but
    /// harmless.
    fn flush_pending_ack(&mut self) {
        if self.ctl.ack_pending.is_empty() {
            return;
        }
        match self.link.ack_toggles(self.ctl.ack_pending) {
            Ok(()) => self.ctl.ack_pending = AckFlags::empty(),
            Err(e) => warn!(error = %e, "toggle ack retry failed"),
        }
    }

    fn deliver_pending_line(&mut self) {
        let Some(line) = self.pending_line.take() else {
            return;
        };
        self.offer_line(line);
    }

    /// Try to hand a line to the emulator; park it (and the dispatcher) if
    /// the previous one has not been polled yet.
    fn offer_line(&mut self, line: String) {
        match self.line_tx.try_send(line) {
            Ok(()) => self.dispatcher.delivered(),
            Err(TrySendError::Full(line)) => self.pending_line = Some(line),
            Err(TrySendError::Disconnected(_)) => self.stop.store(true, Ordering::Relaxed),
        }
    }

    fn drain_keys(&mut self) {
        loop {
            let key = match self.link.poll_key() {
                Ok(Some(key)) => key,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "key poll failed");
                    return;
                }
            };
            match self.dispatcher.dispatch(key, &mut self.ctl, &mut self.link) {
                Ok(Some(line)) => self.offer_line(line),
                Ok(None) => {}
                Err(e) => warn!(key = %(key as char), error = %e, "key service failed"),
            }
        }
    }

    fn refresh_lamps(&mut self) {
        self.ctl.lamps.run = self.ctl.halt == HaltState::Running;
        match self.cadence.next() {
            CyclePlan::Light => {
                if let Err(e) = telemetry::publish(&self.ctl, self.model, &mut self.link, false) {
                    warn!(error = %e, "lamp refresh failed");
                }
            }
            CyclePlan::Full { poll_rotary } => {
                match self.link.query_switches() {
                    Ok(snapshot) => self.observe_switches(snapshot),
                    Err(e) => warn!(error = %e, "switch poll failed"),
                }
                if poll_rotary {
                    match self.link.query_rotary() {
                        Ok(byte) => telemetry::apply_rotary(&mut self.ctl, self.model, byte),
                        Err(e) => warn!(error = %e, "rotary poll failed"),
                    }
                }
                if let Err(e) = telemetry::publish(&self.ctl, self.model, &mut self.link, true) {
                    warn!(error = %e, "lamp refresh failed");
                }
            }
        }
    }

    /// Take a fresh switch snapshot and catch a HALT press whose key byte
    /// never arrived. Only the down edge is recovered here; the up edge
    /// must come as a key byte so its one-shot semantics stay intact.
    fn observe_switches(&mut self, snapshot: [u8; 5]) {
        let layout = self.model.layout();
        let was_down = self.ctl.halt_switch_down(layout);
        self.ctl.switch_bytes = snapshot;
        if self.ctl.key_locked(layout) {
            return;
        }
        if self.ctl.halt_switch_down(layout) && !was_down && self.ctl.halt != HaltState::Halted {
            debug!("halt switch edge seen in poll");
            self.ctl.halt = HaltState::Halted;
        }
    }
}
