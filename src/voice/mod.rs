//! Voice send path: the UDP transport, the per-guild session and the paced sender.

pub mod constants;
pub mod send_system;
pub mod session;
pub mod speaking;
pub mod udp;

pub use send_system::{FrameProvider, SendSystem};
pub use session::{Speaking, VoiceSession, VoiceSignaling};
pub use speaking::SpeakingFlags;
pub use udp::{PacketSealer, PlainSealer, UdpTransport, VoiceTransport, discover_ip};
