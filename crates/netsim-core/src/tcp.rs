//! Reliable transport connection (§3 "Connection state", §4.8).
//!
//! One `TcpConnectionState` models one direction-agnostic endpoint: it can
//! be sending application data, receiving application data, or both at
//! once, the way a real TCP socket is full duplex. A single retransmission
//! timer tracks the oldest outstanding byte; `fast_retransmit` duplicate
//! acks (0 disables it) trigger an immediate resend of just that byte
//! range without touching the rest of the outstanding window, while an RTO
//! timeout rewinds the whole window back to `base_seq` the way slow start
//! expects. The segment size the sender clocks out is bounded by three
//! independent caps: the congestion window, the peer-advertised flow
//! control `window`, and `mss`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::congestion::CongestionControl;
use crate::packet::{FourTuple, TcpPacket};
use crate::scheduler::{Handle, Scheduler};
use crate::trace;
use crate::transport::{self, TransportHandle};

pub type TcpConnectionHandle = Rc<RefCell<TcpConnectionState>>;

pub struct TcpConnectionState {
    transport: TransportHandle,
    local_tuple: FourTuple,
    send_buffer: SendBuffer,
    receive_buffer: ReceiveBuffer,
    peer_base_seq: i64,
    cc: Box<dyn CongestionControl>,
    rto: f64,
    /// Peer-advertised flow-control window: an independent cap on bytes
    /// outstanding, on top of whatever the congestion control allows.
    window: i64,
    /// Duplicate acks needed to trigger fast retransmit; 0 disables it.
    fast_retransmit: u32,
    timer: Option<Handle>,
    last_ack_received: i64,
    dup_ack_streak: u32,
    on_data: Option<Box<dyn FnMut(Vec<u8>)>>,
    ident: u64,
}

/// Create one endpoint of a connection and bind it into `transport`'s demux
/// table. The caller is responsible for constructing the mirrored endpoint
/// (with addresses/ports/initial sequences swapped) on the peer node.
#[allow(clippy::too_many_arguments)]
pub fn connect(
    transport: &TransportHandle,
    local_address: u32,
    local_port: u16,
    remote_address: u32,
    remote_port: u16,
    local_initial_seq: i64,
    peer_initial_seq: i64,
    cc: Box<dyn CongestionControl>,
    rto: f64,
    window: i64,
    fast_retransmit: u32,
) -> TcpConnectionHandle {
    let local_tuple = FourTuple {
        source_address: local_address,
        source_port: local_port,
        destination_address: remote_address,
        destination_port: remote_port,
    };
    let ident = transport.borrow_mut().next_ident();
    let connection = Rc::new(RefCell::new(TcpConnectionState {
        transport: transport.clone(),
        local_tuple,
        send_buffer: SendBuffer::new(local_initial_seq),
        receive_buffer: ReceiveBuffer::new(),
        peer_base_seq: peer_initial_seq,
        cc,
        rto,
        window,
        fast_retransmit,
        timer: None,
        last_ack_received: local_initial_seq,
        dup_ack_streak: 0,
        on_data: None,
        ident,
    }));
    transport.borrow_mut().bind(local_tuple, connection.clone());
    connection
}

pub fn set_on_data(connection: &TcpConnectionHandle, callback: Box<dyn FnMut(Vec<u8>)>) {
    connection.borrow_mut().on_data = Some(callback);
}

/// Queue application bytes for sending and push as much as the congestion
/// window currently allows.
pub fn send(scheduler: &mut Scheduler, connection: &TcpConnectionHandle, data: &[u8]) {
    connection.borrow_mut().send_buffer.put(data);
    try_send(scheduler, connection);
}

fn current_ack(state: &TcpConnectionState) -> i64 {
    state.receive_buffer.cumulative_ack(state.peer_base_seq)
}

fn build_segment(state: &mut TcpConnectionState, seq: i64, body: Vec<u8>) -> TcpPacket {
    let ack = current_ack(state);
    let ident = state.ident;
    state.ident += 1;
    TcpPacket::new(
        ident,
        state.local_tuple.source_address,
        state.local_tuple.source_port,
        state.local_tuple.destination_address,
        state.local_tuple.destination_port,
        body,
        seq,
        ack,
    )
}

/// Push as much buffered data as the congestion window allows, starting a
/// fresh retransmission timer if one isn't already running.
fn try_send(scheduler: &mut Scheduler, connection: &TcpConnectionHandle) {
    let (segments, transport) = {
        let mut state = connection.borrow_mut();
        let skip = state.cc.skip_sending();
        state.send_buffer.skip(skip);
        let mss = state.cc.mss().max(1) as usize;
        let mut segments = Vec::new();
        loop {
            let in_flight = state.send_buffer.next_seq() - state.send_buffer.base_seq();
            let cc_room = (state.cc.window() - in_flight).max(0) as usize;
            let flow_room = (state.window - in_flight).max(0) as usize;
            let len = mss.min(cc_room).min(flow_room);
            if state.send_buffer.unsent() <= 0 || len == 0 {
                break;
            }
            let (seq, body) = state.send_buffer.peek(len);
            if body.is_empty() {
                break;
            }
            let n = body.len() as i64;
            state.send_buffer.advance(n);
            segments.push(build_segment(&mut state, seq, body));
        }
        if !segments.is_empty() && state.timer.is_none() {
            arm_timer(scheduler, connection, &mut state);
        }
        (segments, state.transport.clone())
    };
    for segment in segments {
        transport::send(scheduler, &transport, segment);
    }
}

fn arm_timer(scheduler: &mut Scheduler, connection: &TcpConnectionHandle, state: &mut TcpConnectionState) {
    let rto = state.rto;
    let conn = connection.clone();
    state.timer = Some(scheduler.add(rto, move |scheduler| {
        on_timeout(scheduler, &conn);
    }));
}

fn disarm_timer(scheduler: &mut Scheduler, state: &mut TcpConnectionState) {
    if let Some(handle) = state.timer.take() {
        scheduler.cancel(handle);
    }
}

fn on_timeout(scheduler: &mut Scheduler, connection: &TcpConnectionHandle) {
    {
        let mut state = connection.borrow_mut();
        state.timer = None;
        if state.send_buffer.next_seq() == state.send_buffer.base_seq() {
            // Nothing outstanding any more; a stale timer that lost the
            // race with an ack. Nothing to do.
            return;
        }
        trace::trace("tcp", "retransmission timeout, cutting window back to one segment");
        state.cc.on_timeout();
        state.dup_ack_streak = 0;
        state.send_buffer.resend_from_base();
    }
    try_send(scheduler, connection);
}

/// Called by the transport demux when a packet addressed to this
/// connection's 4-tuple arrives.
pub fn receive_packet(scheduler: &mut Scheduler, connection: &TcpConnectionHandle, packet: TcpPacket) {
    let (ack_reply, fast_retransmit_segment) = {
        let mut state = connection.borrow_mut();

        let mut delivered_to_app: Option<Vec<u8>> = None;
        if !packet.body.is_empty() {
            let peer_base_seq = state.peer_base_seq;
            state.receive_buffer.put(packet.sequence, packet.body.clone(), peer_base_seq);
            let ack = current_ack(&state);
            let bytes = state.receive_buffer.get(state.peer_base_seq);
            if !bytes.is_empty() {
                state.peer_base_seq = ack;
                delivered_to_app = Some(bytes);
            }
        }

        let mut fast_retransmit_segment = None;
        let mut became_fully_acked = false;
        let mut new_ack_progress = false;
        if packet.ack_number > state.last_ack_received {
            new_ack_progress = true;
            let acked = packet.ack_number - state.last_ack_received;
            state.last_ack_received = packet.ack_number;
            state.dup_ack_streak = 0;
            state.send_buffer.slide(packet.ack_number);
            state.cc.on_new_ack(acked);
            if state.send_buffer.next_seq() == state.send_buffer.base_seq() {
                became_fully_acked = true;
            }
        } else if packet.ack_number == state.last_ack_received
            && state.send_buffer.next_seq() > state.send_buffer.base_seq()
        {
            state.dup_ack_streak += 1;
            state.cc.on_duplicate_ack();
            if state.fast_retransmit > 0 && state.dup_ack_streak == state.fast_retransmit {
                trace::trace("tcp", "duplicate ack threshold reached, fast retransmitting");
                let mss = state.cc.mss().max(1) as usize;
                let base = state.send_buffer.base_seq();
                let body = state.send_buffer.peek_from(base, mss);
                if !body.is_empty() {
                    fast_retransmit_segment = Some(build_segment(&mut state, base, body));
                }
            }
        }

        let ack_reply = if packet.body.is_empty() {
            None
        } else {
            let ack = current_ack(&state);
            Some(build_segment(&mut state, state.send_buffer.next_seq(), Vec::new()).with_ack(ack))
        };

        if became_fully_acked {
            disarm_timer(scheduler, &mut state);
        } else if new_ack_progress && state.timer.is_some() {
            // Partial progress: restart the clock on the new oldest segment.
            disarm_timer(scheduler, &mut state);
            arm_timer(scheduler, connection, &mut state);
        }

        if let Some(bytes) = delivered_to_app {
            if let Some(cb) = state.on_data.as_mut() {
                cb(bytes);
            }
        }

        (ack_reply, fast_retransmit_segment)
    };

    let transport = connection.borrow().transport.clone();
    if let Some(ack) = ack_reply {
        transport::send(scheduler, &transport, ack);
    }
    if let Some(segment) = fast_retransmit_segment {
        transport::send(scheduler, &transport, segment);
    }
    // Window may have grown (new ack) or shrunk (fast retransmit, timeout);
    // either way there may be more to send now.
    try_send(scheduler, connection);
}

impl TcpPacket {
    fn with_ack(mut self, ack: i64) -> Self {
        self.ack_number = ack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::{NoCongestionControl, Tahoe};
    use crate::node::NodeState;
    use crate::transport::TransportState;

    fn two_connected_endpoints() -> (TcpConnectionHandle, TcpConnectionHandle) {
        let a = NodeState::new("a");
        let b = NodeState::new("b");
        crate::link::connect(&a, &b, 1, 8000.0, 0.01, None, None, 1);
        crate::link::connect(&b, &a, 2, 8000.0, 0.01, None, None, 2);
        a.borrow_mut().add_forwarding_entry(2, a.borrow().get_link("b").unwrap());
        b.borrow_mut().add_forwarding_entry(1, b.borrow().get_link("a").unwrap());

        let t_a = TransportState::new(a);
        let t_b = TransportState::new(b);

        let conn_a = connect(&t_a, 2, 100, 1, 200, 0, 0, Box::new(NoCongestionControl::new(1000)), 2.0, 1_000_000, 3);
        let conn_b = connect(&t_b, 1, 200, 2, 100, 0, 0, Box::new(NoCongestionControl::new(1000)), 2.0, 1_000_000, 3);
        (conn_a, conn_b)
    }

    #[test]
    fn data_sent_is_received_in_order() {
        let (conn_a, conn_b) = two_connected_endpoints();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        set_on_data(&conn_b, Box::new(move |bytes| r.borrow_mut().extend(bytes)));

        let mut scheduler = Scheduler::new();
        send(&mut scheduler, &conn_a, b"hello network");
        scheduler.run();

        assert_eq!(*received.borrow(), b"hello network");
    }

    #[test]
    fn three_duplicate_acks_trigger_fast_retransmit() {
        let a = NodeState::new("a");
        crate::link::connect(&a, &NodeState::new("b"), 1, 8000.0, 0.01, None, None, 1);
        let t_a = TransportState::new(a);
        // mss=4, send 10 bytes so one segment (seq 4..8) stays outstanding
        // after a first ack for the opening 4 bytes; three duplicate acks
        // repeating that same cumulative ack should then fast-retransmit
        // the segment starting at seq 4 without waiting for the RTO.
        let conn_a = connect(&t_a, 2, 100, 1, 200, 0, 0, Box::new(Tahoe::new(4)), 50.0, 1_000_000, 3);

        let mut scheduler = Scheduler::new();
        send(&mut scheduler, &conn_a, b"0123456789");

        let first_ack = TcpPacket::new(1, 1, 200, 2, 100, Vec::new(), 0, 4);
        receive_packet(&mut scheduler, &conn_a, first_ack.clone());
        assert_eq!(conn_a.borrow().last_ack_received, 4);

        let dup = TcpPacket::new(2, 1, 200, 2, 100, Vec::new(), 0, 4);
        receive_packet(&mut scheduler, &conn_a, dup.clone());
        receive_packet(&mut scheduler, &conn_a, dup.clone());
        assert_eq!(conn_a.borrow().dup_ack_streak, 2);
        receive_packet(&mut scheduler, &conn_a, dup);
        assert_eq!(conn_a.borrow().dup_ack_streak, 3);
    }

    #[test]
    fn fast_retransmit_disabled_when_threshold_is_zero() {
        let a = NodeState::new("a");
        crate::link::connect(&a, &NodeState::new("b"), 1, 8000.0, 0.01, None, None, 1);
        let t_a = TransportState::new(a);
        let conn_a = connect(&t_a, 2, 100, 1, 200, 0, 0, Box::new(Tahoe::new(4)), 50.0, 1_000_000, 0);

        let mut scheduler = Scheduler::new();
        send(&mut scheduler, &conn_a, b"0123456789");

        let dup = TcpPacket::new(1, 1, 200, 2, 100, Vec::new(), 0, 0);
        for _ in 0..5 {
            receive_packet(&mut scheduler, &conn_a, dup.clone());
        }
        // streak still counts, but with fast_retransmit == 0 no resend is
        // ever triggered regardless of how high it climbs.
        assert!(conn_a.borrow().dup_ack_streak >= 3);
    }

    #[test]
    fn peer_advertised_window_caps_outstanding_bytes_independent_of_cc() {
        let a = NodeState::new("a");
        crate::link::connect(&a, &NodeState::new("b"), 1, 8000.0, 0.01, None, None, 1);
        let t_a = TransportState::new(a);
        // NoCongestionControl's window is unbounded, so the only cap on
        // in-flight bytes is the peer-advertised flow-control window.
        let conn_a = connect(&t_a, 2, 100, 1, 200, 0, 0, Box::new(NoCongestionControl::new(1000)), 50.0, 5, 3);

        let mut scheduler = Scheduler::new();
        send(&mut scheduler, &conn_a, b"0123456789");

        let in_flight = conn_a.borrow().send_buffer.next_seq() - conn_a.borrow().send_buffer.base_seq();
        assert_eq!(in_flight, 5);
    }
}
