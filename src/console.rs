/*!
Emulator-facing console handle.

[`Console::attach`] performs the handshake with the console processor over
a caller-supplied [`Transport`], spawns the worker thread that owns the
link from then on, and returns a handle with the three calls a CPU idle
loop needs:

- [`Console::poll_console_command`] - at most one operator command line per
  call, never blocking,
- [`Console::publish_bus_state`] - hand over the latest bus cycle for the
  lamps, never blocking,
- [`Console::is_halt_requested`] - whether the HALT switch wants the CPU
  stopped.

Detach is idempotent and implied by drop: raise the stop flag, join the
worker, and the transport closes with it.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::control::{ControlBlock, HaltState};
use crate::model::{AddressWidth, MmuMode, Model, RingMode};
use crate::transport::{SerialConfig, Transport, TransportError};
use crate::wire::Link;
use crate::worker::{BusUpdate, Worker};

/// Exchange timeout during normal operation.
const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(200);

/// The first query after power-up gives the console processor extra time.
const ATTACH_TIMEOUT: Duration = Duration::from_millis(500);

/// Lamp test pattern shown right after a successful attach, so the
/// operator sees the link is alive before the first real refresh.
const LAMP_TEST_ADDRESS: u32 = 0o0020005;
const LAMP_TEST_DATA: u16 = 0o020025;

#[derive(Debug, Error)]
pub enum AttachError {
    /// The console processor never answered the first switch query.
    #[error("console processor did not respond")]
    NoResponse,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not start console worker")]
    Spawn(#[from] std::io::Error),
}

/// Everything `attach` needs besides the open transport.
#[derive(Debug, Clone, Copy)]
pub struct AttachOptions {
    pub model: Model,
    /// Configured memory size in bytes, for address range checks.
    pub mem_size: u32,
    /// Line parameters the caller opened the port with; recorded for
    /// diagnostics, the transport is already configured.
    pub serial: SerialConfig,
}

pub struct Console {
    bus_tx: SyncSender<BusUpdate>,
    line_rx: Receiver<String>,
    stop: Arc<AtomicBool>,
    halt_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Console {
    /// Handshake with the console processor and start the worker.
    ///
    /// On any error nothing stays attached; the transport is dropped and
    /// the caller may retry with a fresh one.
    pub fn attach<T: Transport + 'static>(
        options: AttachOptions,
        transport: T,
    ) -> Result<Console, AttachError> {
        debug!(model = ?options.model, serial = %options.serial, "attaching console");
        let mut link = Link::new(transport, ATTACH_TIMEOUT);

        link.select_model(options.model)?;
        let snapshot = match link.query_switches() {
            Ok(snapshot) => snapshot,
            Err(TransportError::Timeout { .. }) => return Err(AttachError::NoResponse),
            Err(e) => return Err(e.into()),
        };

        let layout = options.model.layout();
        let mut ctl = ControlBlock::new();
        ctl.switch_bytes = snapshot;

        let halt_requested = Arc::new(AtomicBool::new(false));
        if ctl.key_locked(layout) {
            // Key in LOCK: the toggles are physically disabled, so the
            // HALT position is not inspected.
            debug!("key switch in LOCK at attach");
        } else if ctl.halt_switch_down(layout) {
            // Attached with the switch already down: start halted.
            debug!("HALT switch down at attach");
            ctl.halt = HaltState::Halted;
            halt_requested.store(true, Ordering::Relaxed);
        }

        link.send_all(
            LAMP_TEST_ADDRESS,
            LAMP_TEST_DATA,
            layout.status.encode(&ctl.lamps),
            AddressWidth::W16,
        )?;
        link.set_timeout(EXCHANGE_TIMEOUT);

        let (bus_tx, bus_rx) = mpsc::sync_channel(1);
        let (line_tx, line_rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker::new(
            options.model,
            options.mem_size,
            link,
            ctl,
            bus_rx,
            line_tx,
            Arc::clone(&stop),
            Arc::clone(&halt_requested),
        );
        let thread = std::thread::Builder::new()
            .name("console-worker".into())
            .spawn(move || worker.run())?;

        Ok(Console {
            bus_tx,
            line_rx,
            stop,
            halt_requested,
            thread: Some(thread),
        })
    }

    /// Next operator command line, if one is ready. Non-blocking; returns
    /// at most one line per call.
    pub fn poll_console_command(&self) -> Option<String> {
        self.line_rx.try_recv().ok()
    }

    /// Hand the lamps the latest bus cycle. Non-blocking; while an older
    /// snapshot sits unconsumed this one is dropped, the display only ever
    /// wants the most recent state it can get.
    pub fn publish_bus_state(&self, address: u32, data: u16, ring: RingMode, mmu: MmuMode) {
        let _ = self.bus_tx.try_send(BusUpdate {
            address,
            data,
            ring,
            mmu,
        });
    }

    /// Whether the HALT switch currently calls for the CPU to stop.
    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::Relaxed)
    }

    /// True while the worker is attached and serving the panel.
    pub fn is_active(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker and close the link. Safe to call more than once.
    pub fn detach(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("console worker panicked");
            }
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.detach();
    }
}
