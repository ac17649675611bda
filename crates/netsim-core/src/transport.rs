//! TCP demultiplexer (§4.7): binds 4-tuples to connections and applies
//! scheduled, deterministic packet drops ahead of link-level random loss.
//!
//! Scheduled drops are registered as a byte range on a 4-tuple (in the
//! direction the packet is *sent*, i.e. keyed by the sender's view of the
//! tuple) together with a remaining count: the number of times that range
//! still gets to eat an overlapping send. When a packet's body overlaps a
//! scheduled range, the overlapping bytes are dropped and the range's count
//! is decremented; any part of the range the packet didn't touch keeps its
//! original count untouched. Once a range's count reaches zero it is
//! removed, so a later retransmission of the same bytes goes through
//! (mirroring `lab3/transport.py::send_split_packet`). If the overlap with a
//! packet is partial, the packet is split so the surviving bytes still go
//! out as their own packet rather than discarding the whole thing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use crate::node::{self, NodeHandle, ProtocolHandler};
use crate::packet::{FourTuple, NetPacket, TcpPacket};
use crate::range;
use crate::scheduler::Scheduler;
use crate::tcp::TcpConnectionHandle;
use crate::trace;

pub const TCP_PROTOCOL: &str = "TCP";

pub type TransportHandle = Rc<RefCell<TransportState>>;

struct ScheduledDrop {
    range: Range<i64>,
    remaining: u32,
}

pub struct TransportState {
    node: NodeHandle,
    bindings: HashMap<FourTuple, TcpConnectionHandle>,
    scheduled_drops: HashMap<FourTuple, Vec<ScheduledDrop>>,
    next_ident: u64,
}

impl TransportState {
    pub fn new(node: NodeHandle) -> TransportHandle {
        let transport = Rc::new(RefCell::new(TransportState {
            node,
            bindings: HashMap::new(),
            scheduled_drops: HashMap::new(),
            next_ident: 1,
        }));
        let node = transport.borrow().node.clone();
        node.borrow_mut().add_protocol(TCP_PROTOCOL, transport.clone());
        transport
    }

    pub fn bind(&mut self, tuple: FourTuple, connection: TcpConnectionHandle) {
        self.bindings.insert(tuple, connection);
    }

    pub fn unbind(&mut self, tuple: &FourTuple) {
        self.bindings.remove(tuple);
    }

    /// Drop every byte in `drop_range` sent on `tuple`, for `times` sends
    /// that overlap it (once it stops overlapping, it stops counting down).
    pub fn schedule_drop(&mut self, tuple: FourTuple, drop_range: Range<i64>, times: u32) {
        self.scheduled_drops.entry(tuple).or_default().push(ScheduledDrop { range: drop_range, remaining: times });
    }

    pub fn next_ident(&mut self) -> u64 {
        let id = self.next_ident;
        self.next_ident += 1;
        id
    }

    pub fn node(&self) -> NodeHandle {
        self.node.clone()
    }

    /// Consume one overlapping hit from each scheduled drop range overlapping
    /// `body_range` on `tuple`, returning the ranges actually eaten this
    /// time. Entries whose count reaches zero are dropped; the part of an
    /// entry's range this packet didn't touch is carried forward unchanged.
    fn consume_drops(&mut self, tuple: &FourTuple, body_range: &Range<i64>) -> Vec<Range<i64>> {
        let Some(entries) = self.scheduled_drops.get_mut(tuple) else {
            return Vec::new();
        };
        let mut eaten = Vec::new();
        let mut kept = Vec::new();
        for entry in entries.drain(..) {
            let overlap = range::overlap(body_range, &entry.range);
            if overlap.is_empty() {
                kept.push(entry);
                continue;
            }
            eaten.push(overlap.clone());
            for untouched in range::subtract(&entry.range, [body_range.clone()]) {
                kept.push(ScheduledDrop { range: untouched, remaining: entry.remaining });
            }
            let remaining = entry.remaining.saturating_sub(1);
            if remaining > 0 {
                kept.push(ScheduledDrop { range: overlap, remaining });
            }
        }
        if kept.is_empty() {
            self.scheduled_drops.remove(tuple);
        } else {
            self.scheduled_drops.insert(*tuple, kept);
        }
        eaten
    }
}

/// Hand a freshly-built TCP packet to the network, first checking for
/// scheduled drops on its 4-tuple and splitting it if only part of the body
/// falls in a scheduled drop range.
pub fn send(scheduler: &mut Scheduler, transport: &TransportHandle, packet: TcpPacket) {
    let tuple = packet.four_tuple();
    let node = transport.borrow().node();

    if packet.body.is_empty() {
        // Pure ACK: nothing to split, no bytes to drop.
        node::send_packet(scheduler, &node, NetPacket::Tcp(packet));
        return;
    }

    let body_range = packet.sequence..packet.sequence + packet.len() as i64;
    let eaten = transport.borrow_mut().consume_drops(&tuple, &body_range);
    if eaten.is_empty() {
        node::send_packet(scheduler, &node, NetPacket::Tcp(packet));
        return;
    }

    let surviving = range::subtract(&body_range, eaten);
    if surviving.is_empty() {
        trace::trace("transport", &format!("scheduled drop consumed whole packet at seq {}", packet.sequence));
        return;
    }

    trace::trace(
        "transport",
        &format!("scheduled drop split packet at seq {} into {} piece(s)", packet.sequence, surviving.len()),
    );
    for piece in surviving {
        let offset = (piece.start - packet.sequence) as usize;
        let len = (piece.end - piece.start) as usize;
        let body = packet.body[offset..offset + len].to_vec();
        let mut sub = TcpPacket::new(
            packet.packet.ident,
            packet.packet.source_address,
            packet.source_port,
            packet.packet.destination_address,
            packet.destination_port,
            body,
            piece.start,
            packet.ack_number,
        );
        sub.packet.ttl = packet.packet.ttl;
        node::send_packet(scheduler, &node, NetPacket::Tcp(sub));
    }
}

impl ProtocolHandler for TransportState {
    fn receive_packet(&mut self, scheduler: &mut Scheduler, packet: NetPacket) {
        let tcp = match packet {
            NetPacket::Tcp(t) => t,
            other => {
                trace::trace("transport", &format!("dropping non-tcp packet on TCP protocol: {}", other.packet().protocol));
                return;
            }
        };
        let tuple = tcp.four_tuple().reversed();
        match self.bindings.get(&tuple).cloned() {
            Some(connection) => crate::tcp::receive_packet(scheduler, &connection, tcp),
            None => trace::trace("transport", &format!("no connection bound for {tuple:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::connect;
    use crate::node::NodeState;

    #[test]
    fn scheduled_drop_consumes_overlapping_bytes_only() {
        let body_range = 0i64..10;
        let drops = vec![3i64..6];
        let surviving = range::subtract(&body_range, drops);
        assert_eq!(surviving, vec![0..3, 6..10]);
    }

    struct Recorder {
        received: Vec<TcpPacket>,
    }
    impl ProtocolHandler for Recorder {
        fn receive_packet(&mut self, _scheduler: &mut Scheduler, packet: NetPacket) {
            if let NetPacket::Tcp(t) = packet {
                self.received.push(t);
            }
        }
    }

    fn two_nodes_with_transport() -> (NodeHandle, NodeHandle, TransportHandle, Rc<RefCell<Recorder>>) {
        let a = NodeState::new("a");
        let b = NodeState::new("b");
        let link_ab = connect(&a, &b, 1, 8_000.0, 0.0, None, None, 1);
        connect(&b, &a, 2, 8_000.0, 0.0, None, None, 2);
        a.borrow_mut().add_forwarding_entry(1, link_ab);

        let transport_a = TransportState::new(a.clone());
        let recorder = Rc::new(RefCell::new(Recorder { received: Vec::new() }));
        b.borrow_mut().add_protocol(TCP_PROTOCOL, recorder.clone());
        (a, b, transport_a, recorder)
    }

    /// A scheduled mid-range drop splits a sent segment into its surviving
    /// halves, and both halves actually arrive through the node/link fabric
    /// as separate packets, rather than the whole segment being dropped.
    #[test]
    fn scheduled_drop_splits_segment_across_the_wire() {
        let (_a, _b, transport_a, recorder) = two_nodes_with_transport();

        let tuple = FourTuple {
            source_address: 0,
            source_port: 10,
            destination_address: 1,
            destination_port: 20,
        };
        transport_a.borrow_mut().schedule_drop(tuple, 3..6, 1);

        let mut scheduler = Scheduler::new();
        let packet = TcpPacket::new(1, 0, 10, 1, 20, b"0123456789".to_vec(), 0, 0);
        send(&mut scheduler, &transport_a, packet);
        scheduler.run();

        let received = &recorder.borrow().received;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].sequence, 0);
        assert_eq!(received[0].body, b"012".to_vec());
        assert_eq!(received[1].sequence, 6);
        assert_eq!(received[1].body, b"6789".to_vec());
    }

    /// A scheduled drop covering the whole body consumes the packet: nothing
    /// arrives at the destination.
    #[test]
    fn scheduled_drop_covering_whole_body_delivers_nothing() {
        let (_a, _b, transport_a, recorder) = two_nodes_with_transport();

        let tuple = FourTuple {
            source_address: 0,
            source_port: 10,
            destination_address: 1,
            destination_port: 20,
        };
        transport_a.borrow_mut().schedule_drop(tuple, 0..5, 1);

        let mut scheduler = Scheduler::new();
        let packet = TcpPacket::new(1, 0, 10, 1, 20, b"hello".to_vec(), 0, 0);
        send(&mut scheduler, &transport_a, packet);
        scheduler.run();

        assert!(recorder.borrow().received.is_empty());
    }

    /// A drop scheduled for a single occurrence is consumed on first use: a
    /// retransmission of the very same bytes afterward goes through whole.
    #[test]
    fn scheduled_drop_is_consumed_and_retransmission_gets_through() {
        let (_a, _b, transport_a, recorder) = two_nodes_with_transport();

        let tuple = FourTuple {
            source_address: 0,
            source_port: 10,
            destination_address: 1,
            destination_port: 20,
        };
        transport_a.borrow_mut().schedule_drop(tuple, 0..5, 1);

        let mut scheduler = Scheduler::new();
        let packet = TcpPacket::new(1, 0, 10, 1, 20, b"hello".to_vec(), 0, 0);
        send(&mut scheduler, &transport_a, packet.clone());
        scheduler.run();
        assert!(recorder.borrow().received.is_empty());

        // Retransmit the identical segment: the drop's count has reached
        // zero and was removed, so this one arrives.
        send(&mut scheduler, &transport_a, packet);
        scheduler.run();
        let received = &recorder.borrow().received;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, b"hello".to_vec());
    }

    /// A two-occurrence drop still eats a second overlapping send before
    /// letting a third through.
    #[test]
    fn scheduled_drop_with_multiple_occurrences_counts_down() {
        let (_a, _b, transport_a, recorder) = two_nodes_with_transport();

        let tuple = FourTuple {
            source_address: 0,
            source_port: 10,
            destination_address: 1,
            destination_port: 20,
        };
        transport_a.borrow_mut().schedule_drop(tuple, 0..5, 2);

        let mut scheduler = Scheduler::new();
        let packet = TcpPacket::new(1, 0, 10, 1, 20, b"hello".to_vec(), 0, 0);
        send(&mut scheduler, &transport_a, packet.clone());
        scheduler.run();
        assert!(recorder.borrow().received.is_empty());

        send(&mut scheduler, &transport_a, packet.clone());
        scheduler.run();
        assert!(recorder.borrow().received.is_empty());

        send(&mut scheduler, &transport_a, packet);
        scheduler.run();
        assert_eq!(recorder.borrow().received.len(), 1);
    }
}
