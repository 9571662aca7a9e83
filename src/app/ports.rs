//! Port traits — the hexagonal boundary between domain logic and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Core (domain)
//! ```
//!
//! Driven adapters (measurement/contactor hardware, the NVM medium, the
//! diagnostics sink) implement these traits. [`Core`](super::service::Core)
//! consumes them via dynamic dispatch at the tick boundary, so the domain
//! never touches hardware directly.

/// Re-exported so adapters only need `app::ports` for the storage seam.
pub use crate::nvm::StorageBackend as NvmBackend;
