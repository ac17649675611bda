//! Discrete-event network simulator: virtual-time scheduling, a
//! packet-forwarding fabric of nodes and links, a TCP-like reliable
//! transport with pluggable congestion control, and unit-cost
//! distance-vector routing.

pub mod buffer;
pub mod congestion;
pub mod error;
pub mod link;
pub mod nethelper;
pub mod node;
pub mod packet;
pub mod range;
pub mod router;
pub mod scheduler;
pub mod sniffer;
pub mod tcp;
pub mod trace;
pub mod transport;

pub use error::{SimError, SimResult};
pub use nethelper::NetHelper;
pub use packet::{FourTuple, NetPacket, Packet, TcpPacket};
pub use scheduler::{Handle, Scheduler};
