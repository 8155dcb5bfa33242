pub mod coalescer;
pub mod consumer;
pub mod protocol;
pub mod session;

pub use coalescer::Coalescer;
pub use consumer::{ChatClient, ChatEvent, ClientConfig};
pub use protocol::LineBuffer;
pub use session::{LocalId, LocalMessage, SessionState};
