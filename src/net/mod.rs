// Import the submodules
pub mod codec;
pub mod endpoint;
pub mod inbound;
pub mod proto;
pub mod session;
pub mod zlib;

// Export the public types
pub use self::codec::{ProtocolCodec, Side};
pub use self::endpoint::Endpoint;
pub use self::inbound::{InboundGate, InboundQueue, WorldMessage};
pub use self::proto::Packet;
pub use self::session::SessionTable;
