//! Live run observation engine.
//!
//! Subscribes to a run's server-sent event feed, folds the delivered
//! envelopes into a monotonic phase indicator and progress counters, and
//! backstops the live feed with periodic polling of the run record.

pub mod api;
pub mod auth;
pub mod config;
pub mod cursor;
pub mod envelope;
pub mod envelope_log;
pub mod errors;
pub mod phase;
pub mod poller;
pub mod session;
pub mod sse;
pub mod status;
pub mod stream_client;

#[allow(unused_imports)]
pub use api::*;
#[allow(unused_imports)]
pub use auth::*;
#[allow(unused_imports)]
pub use config::*;
#[allow(unused_imports)]
pub use cursor::*;
#[allow(unused_imports)]
pub use envelope::*;
#[allow(unused_imports)]
pub use envelope_log::*;
#[allow(unused_imports)]
pub use errors::*;
#[allow(unused_imports)]
pub use phase::*;
#[allow(unused_imports)]
pub use poller::*;
#[allow(unused_imports)]
pub use session::*;
#[allow(unused_imports)]
pub use sse::*;
#[allow(unused_imports)]
pub use status::*;
#[allow(unused_imports)]
pub use stream_client::*;
