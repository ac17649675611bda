//! Observer hooks (§9 REDESIGN FLAG).
//!
//! The Python original instruments nodes and links by monkey-patching their
//! bound methods at runtime (`functools.wraps`-based wrapping of
//! `send_packet`/`receive_packet`/`transmit`/`forward_packet`). That has no
//! sound Rust equivalent, so instead [`crate::node::NodeState`] and
//! [`crate::link::LinkState`] each carry an explicit list of observers and
//! call into them at the same four points the Python version wrapped.
//! Returning `None` from a hook drops the packet; returning `Some(p)` lets
//! the observer substitute a modified packet before the pipeline continues.

use crate::packet::NetPacket;

/// Observer attached to a [`crate::node::NodeState`].
pub trait NodeObserver {
    fn on_send(&mut self, packet: NetPacket) -> Option<NetPacket> {
        Some(packet)
    }
    fn on_receive(&mut self, packet: NetPacket) -> Option<NetPacket> {
        Some(packet)
    }
    fn on_forward(&mut self, packet: NetPacket) -> Option<NetPacket> {
        Some(packet)
    }
}

/// Observer attached to a [`crate::link::LinkState`].
pub trait LinkObserver {
    fn on_transmit(&mut self, packet: NetPacket) -> Option<NetPacket> {
        Some(packet)
    }
}

/// A simple recording sniffer: implements both observer traits, keeping a
/// running log of every packet it has seen tagged by the hook it came
/// through. Registered on a node and/or a link the way the Python
/// `PacketSniffer` was attached to both.
#[derive(Default)]
pub struct PacketSniffer {
    pub log: Vec<(&'static str, NetPacket)>,
}

impl PacketSniffer {
    pub fn new() -> Self {
        PacketSniffer { log: Vec::new() }
    }
}

impl NodeObserver for PacketSniffer {
    fn on_send(&mut self, packet: NetPacket) -> Option<NetPacket> {
        self.log.push(("send", packet.clone()));
        Some(packet)
    }

    fn on_receive(&mut self, packet: NetPacket) -> Option<NetPacket> {
        self.log.push(("receive", packet.clone()));
        Some(packet)
    }

    fn on_forward(&mut self, packet: NetPacket) -> Option<NetPacket> {
        self.log.push(("forward", packet.clone()));
        Some(packet)
    }
}

impl LinkObserver for PacketSniffer {
    fn on_transmit(&mut self, packet: NetPacket) -> Option<NetPacket> {
        self.log.push(("transmit", packet.clone()));
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[test]
    fn sniffer_records_every_hook() {
        let mut sniffer = PacketSniffer::new();
        let packet = NetPacket::Data(Packet::new(1, "DATA", 2, 10));
        sniffer.on_send(packet.clone());
        sniffer.on_receive(packet.clone());
        sniffer.on_forward(packet.clone());
        sniffer.on_transmit(packet);
        assert_eq!(sniffer.log.len(), 4);
        assert_eq!(sniffer.log[0].0, "send");
        assert_eq!(sniffer.log[3].0, "transmit");
    }

    struct Blackhole;
    impl NodeObserver for Blackhole {
        fn on_send(&mut self, _packet: NetPacket) -> Option<NetPacket> {
            None
        }
    }

    #[test]
    fn observer_returning_none_drops_packet() {
        let mut bh = Blackhole;
        let packet = NetPacket::Data(Packet::new(1, "DATA", 2, 10));
        assert!(bh.on_send(packet).is_none());
    }
}
