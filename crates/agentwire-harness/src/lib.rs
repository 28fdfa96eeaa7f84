#![doc = "agentwire Harness\n\nTransport drivers that need no network: a scriptable `MockDriver` for\ndeterministic tests and a `LocalHub` that wires several in-process agents\ntogether, plus helpers for building inbound frames."]

extern crate alloc;

pub mod frames;
pub mod local;
pub mod mock;

pub use frames::{signed_frame, unsigned_frame};
pub use local::{LocalDriver, LocalHub};
pub use mock::{DriverCall, MockDriver};
