//! mitmkit-replay - reconstructs and dispatches outbound requests from
//! stored records, and runs the concurrent command-injection scanner over
//! them.

pub mod replay;
pub mod scan;

pub use replay::{replay_and_store, ReplayEngine};
pub use scan::{default_concurrency, InjectionScanner};
