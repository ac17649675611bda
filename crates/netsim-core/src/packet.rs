//! Packet types (§3 "Packet", "TCP packet") plus the [`NetPacket`] envelope
//! that lets [`crate::node`] and [`crate::link`] move any protocol's packet
//! shape through the same forwarding/timing machinery (the original Python
//! relies on duck typing; `NetPacket` is the Rust stand-in).

use serde::{Deserialize, Serialize};

use crate::router::DvrPacket;

/// Destination address reserved for broadcast delivery (§3, §4.3).
pub const BROADCAST_ADDRESS: u32 = 0;

/// A network-layer packet. Carries identity, addressing, TTL, timing
/// annotations, and a byte length used purely for transmission timing.
///
/// Cloned for every broadcast fan-out delivery (§5 "Broadcast copies") so
/// that per-link timing annotations never alias between copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub ident: u64,
    pub protocol: String,
    pub source_address: u32,
    pub destination_address: u32,
    pub length: usize,
    pub ttl: u32,
    /// Simulation time the packet was first sent, set on first hand-off to
    /// `Node::send_packet`. `None` until then.
    pub created: Option<f64>,

    // Timing annotations, updated by links as the packet is queued and
    // transmitted (§3 "Link", derived fields).
    pub enter_queue: Option<f64>,
    pub queueing_delay: f64,
    pub transmission_delay: f64,
    pub propagation_delay: f64,
}

impl Packet {
    pub fn new(ident: u64, protocol: impl Into<String>, destination_address: u32, length: usize) -> Self {
        Packet {
            ident,
            protocol: protocol.into(),
            source_address: 0,
            destination_address,
            length,
            ttl: 64,
            created: None,
            enter_queue: None,
            queueing_delay: 0.0,
            transmission_delay: 0.0,
            propagation_delay: 0.0,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_address == BROADCAST_ADDRESS
    }

    pub fn total_delay(&self) -> f64 {
        self.queueing_delay + self.transmission_delay + self.propagation_delay
    }
}

/// A packet carried over a TCP-like connection (§3 "TCP packet"). Bundles a
/// network-layer [`Packet`] with transport-layer fields; `length` on the
/// embedded packet always equals `body.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpPacket {
    pub packet: Packet,
    pub source_port: u16,
    pub destination_port: u16,
    pub body: Vec<u8>,
    /// Sender's byte offset of the first body byte.
    pub sequence: i64,
    /// Next expected sequence number at the sender of this packet; 0 means
    /// "no ACK carried."
    pub ack_number: i64,
}

impl TcpPacket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ident: u64,
        source_address: u32,
        source_port: u16,
        destination_address: u32,
        destination_port: u16,
        body: Vec<u8>,
        sequence: i64,
        ack_number: i64,
    ) -> Self {
        let mut packet = Packet::new(ident, "TCP", destination_address, body.len());
        packet.source_address = source_address;
        TcpPacket {
            packet,
            source_port,
            destination_port,
            body,
            sequence,
            ack_number,
        }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn four_tuple(&self) -> FourTuple {
        FourTuple {
            source_address: self.packet.source_address,
            source_port: self.source_port,
            destination_address: self.packet.destination_address,
            destination_port: self.destination_port,
        }
    }
}

/// Connection-identifying 4-tuple used by the transport demux (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourTuple {
    pub source_address: u32,
    pub source_port: u16,
    pub destination_address: u32,
    pub destination_port: u16,
}

impl FourTuple {
    /// The tuple as seen by the peer receiving a packet sent on this tuple:
    /// source/destination are swapped.
    pub fn reversed(&self) -> FourTuple {
        FourTuple {
            source_address: self.destination_address,
            source_port: self.destination_port,
            destination_address: self.source_address,
            destination_port: self.source_port,
        }
    }
}

/// Envelope around any packet shape that can flow through a [`crate::node::NodeState`]
/// or [`crate::link::LinkState`]. The node/link layer only ever touches the
/// embedded [`Packet`] fields; protocol handlers match on the variant they
/// expect and ignore (and log) the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetPacket {
    Data(Packet),
    Tcp(TcpPacket),
    Dvr(DvrPacket),
}

impl NetPacket {
    pub fn packet(&self) -> &Packet {
        match self {
            NetPacket::Data(p) => p,
            NetPacket::Tcp(t) => &t.packet,
            NetPacket::Dvr(d) => &d.packet,
        }
    }

    pub fn packet_mut(&mut self) -> &mut Packet {
        match self {
            NetPacket::Data(p) => p,
            NetPacket::Tcp(t) => &mut t.packet,
            NetPacket::Dvr(d) => &mut d.packet,
        }
    }
}
