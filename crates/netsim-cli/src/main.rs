use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use netsim_core::nethelper::NetHelper;
use netsim_core::router::{self, RouterState};
use netsim_core::sniffer::PacketSniffer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Discrete-event network simulator demos")]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,

    /// Write a JSON report of the run to this path instead of stdout.
    #[arg(long, global = true)]
    report_out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Scenario {
    /// Two nodes, one queued link: send a burst of packets and report
    /// average end-to-end delay.
    Queue {
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long, default_value_t = 512)]
        length: usize,
        #[arg(long, default_value_t = 8_000.0)]
        bandwidth: f64,
        #[arg(long, default_value_t = 0.02)]
        propagation: f64,
        #[arg(long)]
        queue_limit: Option<usize>,
    },
    /// Five nodes in a ring, each running distance-vector routing: report
    /// the converged routing table at every node.
    Dvr {
        #[arg(long, default_value_t = 2.0)]
        broadcast_interval: f64,
        #[arg(long, default_value_t = 10.0)]
        neighbor_timeout: f64,
        #[arg(long, default_value_t = 20.0)]
        run_for: f64,
    },
}

#[derive(Serialize)]
struct QueueReport {
    sent: usize,
    delivered: usize,
    average_delay: f64,
}

#[derive(Serialize)]
struct DvrReport {
    routes: Vec<DvrRouteRow>,
}

#[derive(Serialize)]
struct DvrRouteRow {
    from: String,
    to: String,
    cost: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("netsim-cli starting");

    match &args.scenario {
        Scenario::Queue {
            count,
            length,
            bandwidth,
            propagation,
            queue_limit,
        } => {
            let report = run_queue_scenario(*count, *length, *bandwidth, *propagation, *queue_limit);
            emit(&report, &args.report_out)?;
        }
        Scenario::Dvr {
            broadcast_interval,
            neighbor_timeout,
            run_for,
        } => {
            let report = run_dvr_scenario(*broadcast_interval, *neighbor_timeout, *run_for);
            emit(&report, &args.report_out)?;
        }
    }

    Ok(())
}

fn run_queue_scenario(count: usize, length: usize, bandwidth: f64, propagation: f64, queue_limit: Option<usize>) -> QueueReport {
    let mut net = NetHelper::new();
    net.add_duplex_link("sender", "receiver", bandwidth, propagation, None, queue_limit);
    net.default_protocol("DATA");

    let dest = net.resolve_dest_address("sender", "receiver").expect("direct link exists");

    let sniffer = Rc::new(RefCell::new(PacketSniffer::new()));
    {
        let receiver = net.get_node("receiver");
        receiver.borrow_mut().add_observer(sniffer.clone());
    }

    net.send_packet_stream("sender", "DATA", dest, length, count, bandwidth);
    net.run();

    let log = &sniffer.borrow().log;
    let delays: Vec<f64> = log
        .iter()
        .filter(|(tag, _)| *tag == "receive")
        .map(|(_, packet)| packet.packet().total_delay())
        .collect();
    let delivered = delays.len();
    let average_delay = if delivered > 0 { delays.iter().sum::<f64>() / delivered as f64 } else { 0.0 };

    QueueReport {
        sent: count,
        delivered,
        average_delay,
    }
}

fn run_dvr_scenario(broadcast_interval: f64, neighbor_timeout: f64, run_for: f64) -> DvrReport {
    let hostnames = ["r1", "r2", "r3", "r4", "r5"];
    let mut net = NetHelper::new();
    for i in 0..hostnames.len() {
        let next = hostnames[(i + 1) % hostnames.len()];
        net.add_duplex_link(hostnames[i], next, 8_000.0, 0.01, None, None);
    }

    let mut routers = Vec::new();
    for hostname in hostnames {
        let node = net.get_node(hostname);
        // Canonical address: any one of this node's own recv_link
        // addresses identifies it unambiguously (see router.rs) — here,
        // the address of its link back from the previous ring neighbor.
        let host_address = node.borrow().recv_links()[0].borrow().address;
        let router = RouterState::new(node, hostname, host_address, broadcast_interval, neighbor_timeout);
        routers.push((hostname, router));
    }
    for (_, router) in &routers {
        router::start(net.scheduler(), router);
    }

    net.run_until(run_for);

    let mut rows = Vec::new();
    for (from, router) in &routers {
        for to in hostnames {
            if to == *from {
                continue;
            }
            if let Ok(route) = router.borrow().route_to(to) {
                rows.push(DvrRouteRow {
                    from: from.to_string(),
                    to: to.to_string(),
                    cost: route.cost,
                });
            }
        }
    }
    DvrReport { routes: rows }
}

fn emit<T: Serialize>(report: &T, path: &Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    match path {
        Some(p) => fs::write(p, &json).with_context(|| format!("failed to write report to {}", p.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
