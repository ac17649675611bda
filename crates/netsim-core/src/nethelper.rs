//! Scenario builder (§6 "Simulator interface", supplemented `find_route`
//! from the original `NetHelper`). Ties together nodes, links, and the
//! scheduler behind a small imperative API so CLI demos and tests can stand
//! up a topology without touching `Rc<RefCell<_>>` plumbing directly.
//!
//! Parsing topology description *files* is explicitly out of scope (§1);
//! topologies here are always built in-process, one `add_link` call at a time.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{SimError, SimResult};
use crate::link::{self, LinkHandle};
use crate::node::{NodeHandle, NodeState};
use crate::packet::{NetPacket, Packet};
use crate::scheduler::Scheduler;

pub struct NetHelper {
    scheduler: Scheduler,
    nodes: HashMap<String, NodeHandle>,
    default_protocol: Option<String>,
    default_length: Option<usize>,
    next_address: u32,
}

impl Default for NetHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl NetHelper {
    pub fn new() -> Self {
        NetHelper {
            scheduler: Scheduler::new(),
            nodes: HashMap::new(),
            default_protocol: None,
            default_length: None,
            next_address: 1,
        }
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn get_node(&mut self, hostname: &str) -> NodeHandle {
        self.nodes
            .entry(hostname.to_string())
            .or_insert_with(|| NodeState::new(hostname))
            .clone()
    }

    pub fn default_protocol(&mut self, protocol: impl Into<String>) {
        self.default_protocol = Some(protocol.into());
    }

    pub fn default_length(&mut self, length: usize) {
        self.default_length = Some(length);
    }

    /// One directed link `from -> to`. Allocates the next free address.
    pub fn add_link(
        &mut self,
        from: &str,
        to: &str,
        bandwidth: f64,
        propagation: f64,
        loss_rate: Option<f64>,
        queue_limit: Option<usize>,
    ) -> LinkHandle {
        let a = self.get_node(from);
        let b = self.get_node(to);
        let address = self.next_address;
        self.next_address += 1;
        link::connect(&a, &b, address, bandwidth, propagation, loss_rate, queue_limit, address as u64)
    }

    /// Two mirrored directed links, `from -> to` and `to -> from`, with the
    /// same bandwidth/propagation (a typical full-duplex point-to-point link).
    pub fn add_duplex_link(
        &mut self,
        from: &str,
        to: &str,
        bandwidth: f64,
        propagation: f64,
        loss_rate: Option<f64>,
        queue_limit: Option<usize>,
    ) -> (LinkHandle, LinkHandle) {
        let out = self.add_link(from, to, bandwidth, propagation, loss_rate, queue_limit);
        let back = self.add_link(to, from, bandwidth, propagation, loss_rate, queue_limit);
        (out, back)
    }

    fn link_between(&self, from: &str, to: &str) -> Option<LinkHandle> {
        self.nodes.get(from)?.borrow().get_link(to)
    }

    /// Set the loss rate of the direct link `from -> to`, if one exists.
    pub fn loss(&mut self, from: &str, to: &str, rate: f64) {
        if let Some(link) = self.link_between(from, to) {
            link.borrow_mut().loss_rate = Some(rate);
        }
    }

    /// Set the queue limit of the direct link `from -> to`, if one exists.
    pub fn queue(&mut self, from: &str, to: &str, limit: usize) {
        if let Some(link) = self.link_between(from, to) {
            link.borrow_mut().queue_limit = Some(limit);
        }
    }

    /// Clear loss and queue limits on every link in the topology.
    pub fn reset_all_links(&mut self) {
        for node in self.nodes.values() {
            for link in node.borrow().links() {
                let mut l = link.borrow_mut();
                l.loss_rate = None;
                l.queue_limit = None;
            }
        }
    }

    /// Breadth-first shortest hop path from `from` to `to`, inclusive of
    /// both endpoints. `None` if no path exists.
    pub fn find_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut predecessor: HashMap<String, String> = HashMap::new();

        visited.insert(from.to_string());
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            let node = self.nodes.get(&current)?;
            let neighbors: Vec<String> = node
                .borrow()
                .links()
                .iter()
                .map(|l| l.borrow().endpoint.borrow().hostname.clone())
                .collect();
            for neighbor in neighbors {
                if visited.insert(neighbor.clone()) {
                    predecessor.insert(neighbor.clone(), current.clone());
                    if neighbor == to {
                        let mut path = vec![neighbor.clone()];
                        let mut cursor = neighbor;
                        while let Some(prev) = predecessor.get(&cursor) {
                            path.push(prev.clone());
                            cursor = prev.clone();
                        }
                        path.reverse();
                        return Some(path);
                    }
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    /// The address that identifies `to` when reached from `from`: the
    /// address of the last hop's link.
    pub fn resolve_dest_address(&self, from: &str, to: &str) -> SimResult<u32> {
        let path = self.find_route(from, to).ok_or_else(|| SimError::NoRoute { src: from.to_string() })?;
        if path.len() < 2 {
            return Err(SimError::NoRoute { src: from.to_string() });
        }
        let last_hop = &path[path.len() - 2];
        let link = self.link_between(last_hop, to).ok_or_else(|| SimError::NoRoute { src: from.to_string() })?;
        Ok(link.borrow().address)
    }

    /// Install static unicast forwarding table entries at every node along
    /// the shortest path from `from` to `to`, all pointing at the same
    /// final destination address.
    pub fn forward_route(&mut self, from: &str, to: &str) -> SimResult<()> {
        let path = self.find_route(from, to).ok_or_else(|| SimError::NoRoute { src: from.to_string() })?;
        let dest_address = self.resolve_dest_address(from, to)?;
        for pair in path.windows(2) {
            let (hop, next) = (&pair[0], &pair[1]);
            let link = self.link_between(hop, next).ok_or_else(|| SimError::NoRoute { src: hop.clone() })?;
            self.get_node(hop).borrow_mut().add_forwarding_entry(dest_address, link);
        }
        Ok(())
    }

    /// Not implemented: see DESIGN.md Open Question decisions. Installing a
    /// full all-pairs forwarding table automatically (rather than per-route
    /// or via DVR) has no well-defined unit-cost semantics here.
    pub fn forward_all_links(&mut self, _hostname: &str) -> SimResult<()> {
        Err(SimError::AutoForwardingUnsupported)
    }

    /// Send one packet of `length` (or the default) bytes of `protocol` (or
    /// the default) from `from` to `destination_address`.
    pub fn send_packet(
        &mut self,
        from: &str,
        protocol: Option<&str>,
        destination_address: u32,
        length: Option<usize>,
    ) -> SimResult<()> {
        let protocol = protocol
            .map(str::to_string)
            .or_else(|| self.default_protocol.clone())
            .ok_or(SimError::DefaultProtocolMissing)?;
        let length = length.or(self.default_length).ok_or(SimError::DefaultLengthMissing)?;
        let node = self.get_node(from);
        let ident = node.borrow_mut().next_ident();
        let packet = Packet::new(ident, protocol, destination_address, length);
        crate::node::send_packet(&mut self.scheduler, &node, NetPacket::Data(packet));
        Ok(())
    }

    /// Send `count` packets from `from` to `destination_address`, paced so
    /// each is spaced `8 * length / bandwidth` seconds apart (the original
    /// `send_packet_stream`'s pacing formula).
    pub fn send_packet_stream(
        &mut self,
        from: &str,
        protocol: &str,
        destination_address: u32,
        length: usize,
        count: usize,
        bandwidth: f64,
    ) {
        let packet_delay = 8.0 * length as f64 / bandwidth;
        let node = self.get_node(from);
        let mut offset = 0.0;
        for _ in 0..count {
            let node = node.clone();
            let protocol = protocol.to_string();
            self.scheduler.add(offset, move |scheduler| {
                let ident = node.borrow_mut().next_ident();
                let packet = Packet::new(ident, protocol.clone(), destination_address, length);
                crate::node::send_packet(scheduler, &node, NetPacket::Data(packet));
            });
            offset += packet_delay;
        }
    }

    pub fn run(&mut self) {
        self.scheduler.run();
    }

    pub fn run_until(&mut self, delay: f64) {
        self.scheduler.run_until(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_route_across_three_hops() {
        let mut net = NetHelper::new();
        net.add_link("a", "b", 800.0, 0.01, None, None);
        net.add_link("b", "c", 800.0, 0.01, None, None);
        let path = net.find_route("a", "c").unwrap();
        assert_eq!(path, vec!["a", "b", "c"]);
    }

    #[test]
    fn forward_route_lets_unicast_reach_destination() {
        let mut net = NetHelper::new();
        net.add_link("a", "b", 800.0, 0.0, None, None);
        net.add_link("b", "a", 800.0, 0.0, None, None);
        net.add_link("b", "c", 800.0, 0.0, None, None);
        net.add_link("c", "b", 800.0, 0.0, None, None);
        net.forward_route("a", "c").unwrap();

        let dest = net.resolve_dest_address("a", "c").unwrap();
        net.default_protocol("DATA");
        net.send_packet("a", None, dest, Some(10)).unwrap();
        net.run();
    }

    #[test]
    fn send_packet_without_defaults_reports_missing_protocol() {
        let mut net = NetHelper::new();
        net.add_link("a", "b", 800.0, 0.0, None, None);
        let err = net.send_packet("a", None, 1, Some(10)).unwrap_err();
        assert_eq!(err, SimError::DefaultProtocolMissing);
    }
}
