//! Versioned offline shell with an install/activate lifecycle.

mod clients;
mod lifecycle;
mod worker;

pub use clients::{Client, ClientId, ClientRegistry};
pub use lifecycle::{ActivationReport, InstallReport, Registration, WorkerState};
pub use worker::{OfflineShell, ShellStatus};
