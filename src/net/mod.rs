//! Wire protocol: discovery, framing, the device-side session, and the
//! host-side sender.
//!
//! All protocol integers are little-endian. One session serves exactly one
//! accepted connection; the caller restarts discovery after any failure.

pub mod discovery;
pub mod framing;
pub mod push;
pub mod session;

pub use discovery::{Dialect, DiscoveryResponder};
pub use framing::{FrameError, FramedChannel};
pub use push::{PushClient, PushError, PushReport, TransferKind};
pub use session::{Mode, Receiver, Received, ReceiveError, SessionError, serve_connection};
