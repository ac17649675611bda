//! Network node (§3 "Node", §4.3).
//!
//! A node forwards by address: outgoing links are indexed by destination
//! address in `forwarding_table`, while `recv_links` lists the links that
//! terminate here (a packet matches this node when its destination address
//! equals one of those links' addresses). Broadcast packets (destination
//! address 0) are delivered to the local protocol handler *and* continue to
//! flood outward one hop at a time, with TTL doing the work of bounding how
//! far a broadcast travels — this is why DVR broadcasts carry TTL 1 rather
//! than the node refusing to forward broadcasts at all (ported faithfully
//! from the original `node.py`, where `receive_packet` falls through to
//! `forward_packet` after locally delivering a broadcast).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::link::{self, LinkHandle};
use crate::packet::NetPacket;
use crate::scheduler::Scheduler;
use crate::sniffer::NodeObserver;
use crate::trace;

pub type NodeHandle = Rc<RefCell<NodeState>>;

pub trait ProtocolHandler {
    fn receive_packet(&mut self, scheduler: &mut Scheduler, packet: NetPacket);
}

pub struct NodeState {
    pub hostname: String,
    links: Vec<LinkHandle>,
    recv_links: Vec<LinkHandle>,
    protocols: HashMap<String, Rc<RefCell<dyn ProtocolHandler>>>,
    forwarding_table: HashMap<u32, LinkHandle>,
    observers: Vec<Rc<RefCell<dyn NodeObserver>>>,
    next_ident: u64,
}

impl NodeState {
    pub fn new(hostname: impl Into<String>) -> NodeHandle {
        Rc::new(RefCell::new(NodeState {
            hostname: hostname.into(),
            links: Vec::new(),
            recv_links: Vec::new(),
            protocols: HashMap::new(),
            forwarding_table: HashMap::new(),
            observers: Vec::new(),
            next_ident: 1,
        }))
    }

    pub fn add_outgoing_link(&mut self, link: LinkHandle) {
        self.links.push(link);
    }

    pub fn add_recv_link(&mut self, link: LinkHandle) {
        self.recv_links.push(link);
    }

    pub fn add_protocol(&mut self, protocol: impl Into<String>, handler: Rc<RefCell<dyn ProtocolHandler>>) {
        self.protocols.insert(protocol.into(), handler);
    }

    pub fn add_observer(&mut self, observer: Rc<RefCell<dyn NodeObserver>>) {
        self.observers.push(observer);
    }

    pub fn add_forwarding_entry(&mut self, destination_address: u32, link: LinkHandle) {
        self.forwarding_table.insert(destination_address, link);
    }

    pub fn links(&self) -> &[LinkHandle] {
        &self.links
    }

    pub fn recv_links(&self) -> &[LinkHandle] {
        &self.recv_links
    }

    /// The link whose endpoint is the node named `hostname`, if directly connected.
    pub fn get_link(&self, hostname: &str) -> Option<LinkHandle> {
        self.links
            .iter()
            .find(|l| l.borrow().endpoint.borrow().hostname == hostname)
            .cloned()
    }

    /// The address of the link connecting this node to `hostname`, or 0 if
    /// not directly connected (mirrors the original's "unknown -> 0" convention).
    pub fn get_address(&self, hostname: &str) -> u32 {
        self.get_link(hostname).map(|l| l.borrow().address).unwrap_or(0)
    }

    /// Allocates a fresh packet identifier, monotonically increasing per node.
    pub fn next_ident(&mut self) -> u64 {
        let ident = self.next_ident;
        self.next_ident += 1;
        ident
    }

    fn is_local_address(&self, address: u32) -> bool {
        self.recv_links.iter().any(|l| l.borrow().address == address)
    }

    fn run_on_send(&mut self, mut packet: NetPacket) -> Option<NetPacket> {
        for observer in &self.observers {
            match observer.borrow_mut().on_send(packet) {
                Some(p) => packet = p,
                None => return None,
            }
        }
        Some(packet)
    }

    fn run_on_receive(&mut self, mut packet: NetPacket) -> Option<NetPacket> {
        for observer in &self.observers {
            match observer.borrow_mut().on_receive(packet) {
                Some(p) => packet = p,
                None => return None,
            }
        }
        Some(packet)
    }

    fn run_on_forward(&mut self, mut packet: NetPacket) -> Option<NetPacket> {
        for observer in &self.observers {
            match observer.borrow_mut().on_forward(packet) {
                Some(p) => packet = p,
                None => return None,
            }
        }
        Some(packet)
    }
}

/// Originate `packet` from this node. Stamps `created` on first send, then
/// either delivers locally (if, unusually, the node addressed itself) or
/// forwards it out.
pub fn send_packet(scheduler: &mut Scheduler, node: &NodeHandle, mut packet: NetPacket) {
    let now = scheduler.current_time();
    {
        let mut n = node.borrow_mut();
        if packet.packet().created.is_none() {
            packet.packet_mut().created = Some(now);
        }
        packet = match n.run_on_send(packet) {
            Some(p) => p,
            None => return,
        };
    }

    let local = node.borrow().is_local_address(packet.packet().destination_address);
    if local {
        receive_packet(scheduler, node, packet);
    } else {
        forward_packet(scheduler, node, packet);
    }
}

/// Entry point called when a link delivers `packet` to this node, whether it
/// originated elsewhere or was handed in directly by `send_packet`.
pub fn receive_packet(scheduler: &mut Scheduler, node: &NodeHandle, packet: NetPacket) {
    let mut packet = match node.borrow_mut().run_on_receive(packet) {
        Some(p) => p,
        None => return,
    };

    let destination = packet.packet().destination_address;
    let broadcast = packet.packet().is_broadcast();
    let locally_addressed = broadcast || node.borrow().is_local_address(destination);

    if locally_addressed {
        deliver_packet(scheduler, node, packet.clone());
        if !broadcast {
            // Unicast packet addressed to us: delivered, nothing left to do.
            return;
        }
        // Broadcast: delivered locally, but still subject to the TTL-gated
        // flood below so it can reach hosts beyond this node.
    }

    let ttl = packet.packet().ttl;
    if ttl == 0 {
        trace::trace("node", "received packet with ttl already 0, dropping");
        return;
    }
    packet.packet_mut().ttl = ttl - 1;
    if packet.packet().ttl == 0 {
        trace::trace("node", "packet ttl exhausted, dropping");
        return;
    }
    forward_packet(scheduler, node, packet);
}

fn deliver_packet(scheduler: &mut Scheduler, node: &NodeHandle, packet: NetPacket) {
    let protocol = packet.packet().protocol.clone();
    let handler = node.borrow().protocols.get(&protocol).cloned();
    match handler {
        Some(h) => h.borrow_mut().receive_packet(scheduler, packet),
        None => trace::trace("node", &format!("no handler registered for protocol {protocol}")),
    }
}

/// Forward `packet` onward: broadcasts fan out to every outgoing link (as a
/// deep copy each, so per-link timing annotations never alias), unicast
/// packets follow the forwarding table or are dropped if no route is known.
pub fn forward_packet(scheduler: &mut Scheduler, node: &NodeHandle, packet: NetPacket) {
    let packet = match node.borrow_mut().run_on_forward(packet) {
        Some(p) => p,
        None => return,
    };

    if packet.packet().is_broadcast() {
        let links = node.borrow().links.clone();
        for l in links {
            link::send_packet(scheduler, &l, packet.clone());
        }
        return;
    }

    let destination = packet.packet().destination_address;
    let outgoing = node.borrow().forwarding_table.get(&destination).cloned();
    match outgoing {
        Some(l) => link::send_packet(scheduler, &l, packet),
        None => trace::trace("node", &format!("no forwarding entry for address {destination}, dropping")),
    }
}
