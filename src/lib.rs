#![doc = r#"
Opcon library crate.

Bridge between an emulated CPU's bus state and a physical operator console
(switches, lamps, rotary knobs) driven by a console-processor
microcontroller on a serial line.

Modules:
- codec: pure switch-byte/address/data conversions, auto-increment, ROM guard
- console: emulator-facing handle; attach/detach and the idle-loop calls
- control: per-console control block, halt tri-state, lamp state
- dispatch: console key bytes to emulator command lines
- model: the five CPU variants and their static console layouts
- telemetry: lamp refresh cadence and rotary display selection
- transport: serial transport trait seam and line-configuration parsing
- wire: frame builders and the request/response link
- worker: background thread owning the link

In tests, a scripted console-processor double is available under
`crate::test_utils`.
"#]

pub mod codec;
pub mod console;
pub mod control;
pub mod dispatch;
pub mod model;
pub mod telemetry;
pub mod transport;
pub mod wire;
pub mod worker;

// Re-export the attach surface at the crate root for convenience.
pub use console::{AttachError, AttachOptions, Console};
pub use model::{MmuMode, Model, RingMode};
pub use transport::{SerialConfig, Transport, TransportError};

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
