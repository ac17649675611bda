//! Unit-cost distance-vector routing (§3 "Router", §4.10).
//!
//! Each router advertises, once per `broadcast_interval`, a vector of
//! `(hostname, cost)` pairs plus the canonical destination address for each
//! hostname (`host_links`, carried so a hostname's address survives
//! unchanged as it is re-advertised hop by hop). Neighbors merge
//! advertisements with straightforward Bellman-Ford: a hop through the
//! advertising neighbor is taken if it is strictly cheaper, or if it
//! refreshes the route already going through that neighbor. A neighbor not
//! heard from within `neighbor_timeout` is presumed down and every route
//! that went through it is withdrawn — this is how link failures are
//! noticed and routed around (§8 scenario 5).
//!
//! Open question (recorded in DESIGN.md): routing is unit-cost only, no
//! bandwidth/latency weighting.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::node::{self, NodeHandle, ProtocolHandler};
use crate::packet::{NetPacket, Packet};
use crate::scheduler::Scheduler;
use crate::trace;

pub const DVR_PROTOCOL: &str = "dvr";

/// A distance-vector advertisement (§4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvrPacket {
    pub packet: Packet,
    pub src_hostname: String,
    pub distance_vector: HashMap<String, f64>,
    /// hostname -> the address that identifies packets destined for it,
    /// unchanged as the advertisement propagates hop by hop.
    pub host_links: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub cost: f64,
    /// Address of this node's own outgoing link toward the next hop.
    pub via_address: u32,
    /// Canonical destination address to install in the forwarding table.
    pub dest_address: u32,
}

pub type RouterHandle = Rc<RefCell<RouterState>>;

pub struct RouterState {
    node: NodeHandle,
    hostname: String,
    host_address: u32,
    routes: HashMap<String, RouteEntry>,
    neighbor_last_heard: HashMap<String, f64>,
    broadcast_interval: f64,
    neighbor_timeout: f64,
    next_ident: u64,
}

impl RouterState {
    pub fn new(
        node: NodeHandle,
        hostname: impl Into<String>,
        host_address: u32,
        broadcast_interval: f64,
        neighbor_timeout: f64,
    ) -> RouterHandle {
        Rc::new(RefCell::new(RouterState {
            node,
            hostname: hostname.into(),
            host_address,
            routes: HashMap::new(),
            neighbor_last_heard: HashMap::new(),
            broadcast_interval,
            neighbor_timeout,
            next_ident: 1,
        }))
    }

    pub fn route_to(&self, hostname: &str) -> SimResult<RouteEntry> {
        self.routes.get(hostname).copied().ok_or_else(|| SimError::RoutingFailed {
            hostname: hostname.to_string(),
        })
    }

    fn distance_vector_snapshot(&self) -> HashMap<String, f64> {
        let mut dv: HashMap<String, f64> = self.routes.iter().map(|(h, r)| (h.clone(), r.cost)).collect();
        dv.insert(self.hostname.clone(), 0.0);
        dv
    }

    fn host_links_snapshot(&self) -> HashMap<String, u32> {
        let mut links: HashMap<String, u32> = self.routes.iter().map(|(h, r)| (h.clone(), r.dest_address)).collect();
        links.insert(self.hostname.clone(), self.host_address);
        links
    }

    fn next_ident(&mut self) -> u64 {
        let id = self.next_ident;
        self.next_ident += 1;
        id
    }
}

/// Seed direct-neighbor routes (cost 1 via each outgoing link) and start the
/// periodic broadcast + neighbor-liveness sweep. Must be called once after
/// all of this node's links exist.
pub fn start(scheduler: &mut Scheduler, router: &RouterHandle) {
    {
        let mut r = router.borrow_mut();
        let node = r.node.clone();
        let links = node.borrow().links().to_vec();
        for link in links {
            let (address, endpoint_hostname) = {
                let l = link.borrow();
                (l.address, l.endpoint.borrow().hostname.clone())
            };
            r.routes.insert(
                endpoint_hostname.clone(),
                RouteEntry {
                    cost: 1.0,
                    via_address: address,
                    dest_address: address,
                },
            );
            node.borrow_mut().add_forwarding_entry(address, link.clone());
        }
    }
    let node = router.borrow().node.clone();
    node.borrow_mut().add_protocol(DVR_PROTOCOL, router.clone());

    broadcast_routes(scheduler, router);
    sweep_neighbors(scheduler, router);
}

fn broadcast_routes(scheduler: &mut Scheduler, router: &RouterHandle) {
    let (node, packet) = {
        let mut r = router.borrow_mut();
        let ident = r.next_ident();
        let dv = r.distance_vector_snapshot();
        let host_links = r.host_links_snapshot();
        let length = 32 + 24 * dv.len();
        let mut base = Packet::new(ident, DVR_PROTOCOL, crate::packet::BROADCAST_ADDRESS, length);
        base.ttl = 1;
        base.source_address = r.host_address;
        let dvr = DvrPacket {
            packet: base,
            src_hostname: r.hostname.clone(),
            distance_vector: dv,
            host_links,
        };
        (r.node.clone(), dvr)
    };
    node::send_packet(scheduler, &node, NetPacket::Dvr(packet));

    let router = router.clone();
    let interval = router.borrow().broadcast_interval;
    scheduler.add(interval, move |scheduler| {
        broadcast_routes(scheduler, &router);
    });
}

fn sweep_neighbors(scheduler: &mut Scheduler, router: &RouterHandle) {
    let now = scheduler.current_time();
    let timeout = router.borrow().neighbor_timeout;
    let stale: Vec<(String, u32)> = {
        let r = router.borrow();
        r.neighbor_last_heard
            .iter()
            .filter(|(_, &last)| now - last > timeout)
            .filter_map(|(hostname, _)| r.routes.get(hostname).map(|route| (hostname.clone(), route.via_address)))
            .collect()
    };
    if !stale.is_empty() {
        let mut r = router.borrow_mut();
        for (hostname, via_address) in &stale {
            trace::trace("router", &format!("neighbor {hostname} timed out, withdrawing routes via it"));
            r.routes.retain(|_, route| route.via_address != *via_address);
            r.neighbor_last_heard.remove(hostname);
        }
    }

    let router = router.clone();
    let interval = router.borrow().neighbor_timeout / 2.0;
    scheduler.add(interval, move |scheduler| {
        sweep_neighbors(scheduler, &router);
    });
}

impl ProtocolHandler for RouterState {
    fn receive_packet(&mut self, scheduler: &mut Scheduler, packet: NetPacket) {
        let dvr = match packet {
            NetPacket::Dvr(d) => d,
            other => {
                trace::trace("router", &format!("dropping non-dvr packet on dvr protocol: {:?}", other.packet().protocol));
                return;
            }
        };
        if dvr.src_hostname == self.hostname {
            return;
        }
        let via_address = self.node.borrow().get_address(&dvr.src_hostname);
        if via_address == 0 {
            trace::trace("router", &format!("dvr packet from non-neighbor {}", dvr.src_hostname));
            return;
        }

        let now = scheduler.current_time();
        self.neighbor_last_heard.insert(dvr.src_hostname.clone(), now);

        let mut new_forwarding: Vec<(u32, u32)> = Vec::new(); // (dest_address, via_address)
        for (hostname, cost) in &dvr.distance_vector {
            if *hostname == self.hostname {
                continue;
            }
            let Some(&dest_address) = dvr.host_links.get(hostname) else {
                continue;
            };
            let candidate = cost + 1.0;
            let better = match self.routes.get(hostname) {
                None => true,
                Some(existing) => candidate < existing.cost || existing.via_address == via_address,
            };
            if better {
                self.routes.insert(
                    hostname.clone(),
                    RouteEntry {
                        cost: candidate,
                        via_address,
                        dest_address,
                    },
                );
                new_forwarding.push((dest_address, via_address));
            }
        }

        if !new_forwarding.is_empty() {
            let node = self.node.clone();
            let links = node.borrow().links().to_vec();
            for (dest_address, via_address) in new_forwarding {
                if let Some(link) = links.iter().find(|l| l.borrow().address == via_address) {
                    node.borrow_mut().add_forwarding_entry(dest_address, link.clone());
                }
            }
        }
    }
}
