//! Shared types for the Switchboard session coordinator: branded IDs, the
//! conversation data model, engine wire events, broadcast events, the
//! connection error taxonomy, and the injectable clock.

pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::ConnectionError;
