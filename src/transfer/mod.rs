//! File transfer coordination: arming BINARY mode, running the embedded
//! Kermit engine or a child-process modem helper, and restoring Telnet
//! negotiation state afterward.

pub mod child;
pub mod coordinator;
pub mod kermit;
pub mod state;

pub use coordinator::{run_helper, run_kermit_receive, run_kermit_send, DEFAULT_GLOBAL_TIMEOUT};
pub use kermit::{KermitEngine, KermitIo, TransferOutcome, UnimplementedKermitEngine};
pub use state::{PendingBuffer, Protocol, TransferState};
