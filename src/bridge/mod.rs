//! Bridge core: connect-time reconciliation and command dispatch
//!
//! The [`Reconciler`] reacts to broker lifecycle events; each established
//! connection triggers one hardware read, a round of retained state publishes
//! and subscriptions, and a fresh dispatcher table. Inbound messages flow
//! through a per-relay [`CommandDispatcher`] into the hardware layer.

pub mod dispatcher;
pub mod reconciler;

pub use dispatcher::{CommandDispatcher, RelayCommand};
pub use reconciler::Reconciler;
