//! The Transmission Control Block: a pure, synchronously driven state
//! machine for one simplified TCP connection.
//!
//! An RFC 9293-style `Tcb`, implemented separately from the connection
//! and listener types so it can be tested without a channel or event
//! loop at all. A `Tcb` never touches a [`Channel`](crate::channel::Channel)
//! or a timer directly -- it only reacts to
//! `segment_arrives`/`close`/`queue_send` calls and hands back packets
//! to transmit -- but trades RFC 9293 compliance (options, RST-driven
//! resets, simultaneous-open recovery) for simplified semantics: no RST
//! packet kind, a single retransmission timer over the oldest unacked
//! segment, and a fixed, unnegotiated receive window.

use std::collections::{BinaryHeap, VecDeque};

use crate::codec::{Kind, Packet};
use crate::error::Error;
use crate::message::Message;
use crate::seqnum::mod32::{self, Bound};

mod receive_sequence_space;
mod segment;
mod send_sequence_space;
mod state;


use receive_sequence_space::ReceiveSequenceSpace;
pub use segment::Segment;
use segment::Reordered;
use send_sequence_space::SendSequenceSpace;
pub use state::State;

use super::{Config, Endpoints};

/// The result of feeding a packet to [`Tcb::segment_arrives`].
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// The third duplicate ACK arrived; the caller should immediately
    /// retransmit the segment at `snd.una` via [`Tcb::retransmit_oldest`].
    pub fast_retransmit: bool,
    /// Sequence numbers of segments whose acknowledgment just completed
    /// without ever being retransmitted -- valid RTT samples per Karn's
    /// rule. The caller looks up its own send timestamps by these keys.
    pub acked_clean: Vec<u32>,
    /// An ACK named data that was never sent. The segment is dropped and
    /// a challenge ACK queued; state is left untouched.
    pub protocol_error: bool,
    /// The connection just entered (or re-entered) TIME_WAIT; the
    /// caller should (re)start the 2*MSL timer.
    pub enter_time_wait: bool,
}

/// The Transmission Control Block: all per-connection state for one
/// simplified TCP connection.
#[derive(Debug)]
pub struct Tcb {
    id: Endpoints,
    mss: usize,
    state: State,
    snd: SendSequenceSpace,
    rcv: ReceiveSequenceSpace,
    /// Bytes the application has queued but that have not yet been
    /// formed into segments.
    send_buffer: Message,
    /// Segments sent and not yet acknowledged, in sequence order. The
    /// front is always the next candidate for retransmission.
    retransmit_queue: VecDeque<Segment>,
    /// Bytes received in order and not yet consumed by the application.
    recv_buffer: Message,
    /// Segments that arrived ahead of `rcv.nxt`, waiting for the gap to
    /// be filled.
    reorder_buffer: BinaryHeap<Reordered>,
    /// Packets generated in response to the most recent event that are
    /// never retransmitted on their own (plain ACKs, challenge ACKs).
    control_queue: Vec<Packet>,
    dup_ack_count: u32,
    retransmit_count: u32,
}

impl Tcb {
    fn new(id: Endpoints, config: &Config, state: State, snd: SendSequenceSpace) -> Self {
        Self {
            id,
            mss: config.mss,
            state,
            snd,
            rcv: ReceiveSequenceSpace {
                irs: 0,
                nxt: 0,
                wnd: config.window,
            },
            send_buffer: Message::default(),
            retransmit_queue: VecDeque::new(),
            recv_buffer: Message::default(),
            reorder_buffer: BinaryHeap::new(),
            control_queue: Vec::new(),
            dup_ack_count: 0,
            retransmit_count: 0,
        }
    }

    /// Active open: send a SYN and move to SYN_SENT.
    pub fn connect(id: Endpoints, iss: u32, config: &Config) -> Self {
        let snd = SendSequenceSpace {
            iss,
            una: iss,
            nxt: iss.wrapping_add(1),
            wnd: config.window,
        };
        let mut tcb = Self::new(id, config, State::SynSent, snd);
        tcb.retransmit_queue
            .push_back(Segment::new(Packet::control(Kind::Syn, iss, 0)));
        tcb
    }

    /// Passive open: sit in LISTEN until a SYN arrives. `iss` is chosen
    /// by the caller (typically at random) ahead of time so this
    /// constructor stays a pure function of its arguments.
    pub fn listen(id: Endpoints, iss: u32, config: &Config) -> Self {
        let snd = SendSequenceSpace {
            iss,
            una: iss,
            nxt: iss,
            wnd: config.window,
        };
        Self::new(id, config, State::Listen, snd)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn id(&self) -> Endpoints {
        self.id
    }

    /// Queues bytes for transmission. Fails once [`Tcb::close`] has been
    /// called or the peer has reset the connection.
    pub fn queue_send(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed);
        }
        self.send_buffer.concatenate(Message::new(bytes));
        Ok(())
    }

    /// Bytes queued by the application but not yet formed into segments.
    pub fn send_buffer_len(&self) -> usize {
        self.send_buffer.len()
    }

    /// Whether the send window currently has room for at least one more
    /// byte of new data.
    pub fn send_window_has_room(&self) -> bool {
        let outstanding = self.snd.nxt.wrapping_sub(self.snd.una);
        outstanding < self.snd.wnd
    }

    /// Forms as many new segments as the send window and MSS allow from
    /// the queued send buffer, enqueuing them for (re)transmission and
    /// returning them for immediate sending.
    pub fn segmentize(&mut self) -> Vec<Packet> {
        let mut formed = Vec::new();
        if !matches!(self.state, State::Established | State::CloseWait) {
            return formed;
        }
        loop {
            let outstanding = self.snd.nxt.wrapping_sub(self.snd.una) as usize;
            let window = self.snd.wnd as usize;
            if outstanding >= window {
                break;
            }
            let room = window - outstanding;
            let len = self.mss.min(room).min(self.send_buffer.len());
            if len == 0 {
                break;
            }
            let payload = self.send_buffer.cut(len).to_vec();
            let packet = Packet::new(Kind::Data, self.snd.nxt, self.rcv.nxt, 0, payload);
            self.snd.nxt = self.snd.nxt.wrapping_add(len as u32);
            self.retransmit_queue.push_back(Segment::already_sent(packet.clone()));
            formed.push(packet);
        }
        formed
    }

    /// Removes up to `max` bytes of delivered, in-order data for the
    /// application to consume.
    pub fn take_received(&mut self, max: usize) -> Vec<u8> {
        let len = max.min(self.recv_buffer.len());
        self.recv_buffer.cut(len).to_vec()
    }

    pub fn has_received(&self) -> bool {
        !self.recv_buffer.is_empty()
    }

    /// Initiates a graceful close. Returns whether a FIN was actually
    /// queued (a no-op if the connection is already closing or never
    /// opened).
    pub fn close(&mut self) -> bool {
        match self.state {
            State::Closed | State::Listen | State::SynSent => {
                self.state = State::Closed;
                false
            }
            State::SynReceived | State::Established => {
                self.queue_fin(Kind::Fin);
                self.state = State::FinWait1;
                true
            }
            State::CloseWait => {
                // This side already consumed the peer's FIN (plainly
                // ACKed, see `process_established`), so its own closing
                // FIN doubles as the final word on that exchange.
                self.queue_fin(Kind::FinAck);
                self.state = State::LastAck;
                true
            }
            State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck | State::TimeWait => {
                false
            }
        }
    }

    fn queue_fin(&mut self, kind: Kind) {
        let fin = Packet::new(kind, self.snd.nxt, self.rcv.nxt, 0, Vec::new());
        self.retransmit_queue.push_back(Segment::new(fin));
        self.snd.nxt = self.snd.nxt.wrapping_add(1);
    }

    /// Tears the connection down immediately without waiting for
    /// acknowledgment, discarding all outstanding state.
    pub fn abort(&mut self) {
        self.retransmit_queue.clear();
        self.control_queue.clear();
        self.send_buffer = Message::default();
        self.state = State::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn oldest_unacked(&self) -> Option<&Segment> {
        self.retransmit_queue.front()
    }

    pub fn has_outstanding(&self) -> bool {
        !self.retransmit_queue.is_empty()
    }

    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count
    }

    /// Marks the oldest unacknowledged segment retransmitted (excluding
    /// it from future RTT sampling, per Karn's rule) and returns it for
    /// the caller to send again. Used for both RTO-driven and
    /// fast retransmit.
    pub fn retransmit_oldest(&mut self) -> Option<Packet> {
        let segment = self.retransmit_queue.front_mut()?;
        segment.retransmitted = true;
        segment.needs_transmit = false;
        self.retransmit_count += 1;
        Some(segment.packet.clone())
    }

    /// Drains packets ready to send right now: every pending control
    /// packet, plus any retransmit-queue entry that hasn't been sent
    /// since it was queued or last retransmitted.
    pub fn take_outgoing(&mut self) -> Vec<Packet> {
        let mut out = std::mem::take(&mut self.control_queue);
        for segment in self.retransmit_queue.iter_mut() {
            if segment.needs_transmit {
                out.push(segment.packet.clone());
                segment.needs_transmit = false;
            }
        }
        out
    }

    /// Called by the caller's 2*MSL timer; finalizes TIME_WAIT.
    pub fn time_wait_elapsed(&mut self) {
        if self.state == State::TimeWait {
            self.state = State::Closed;
        }
    }

    /// Processes one arriving packet, updating state and queuing any
    /// immediate responses.
    pub fn segment_arrives(&mut self, packet: Packet) -> Outcome {
        let mut outcome = Outcome::default();
        match self.state {
            State::Closed => {}

            State::Listen => {
                if packet.kind == Kind::Syn {
                    self.rcv.irs = packet.seq;
                    self.rcv.nxt = packet.seq.wrapping_add(1);
                    let syn_ack =
                        Packet::new(Kind::SynAck, self.snd.iss, self.rcv.nxt, 0, Vec::new());
                    self.retransmit_queue.push_back(Segment::new(syn_ack));
                    self.snd.nxt = self.snd.iss.wrapping_add(1);
                    self.state = State::SynReceived;
                }
            }

            State::SynSent => {
                if packet.kind == Kind::SynAck {
                    if packet.ack != self.snd.nxt {
                        outcome.protocol_error = true;
                        return outcome;
                    }
                    self.rcv.irs = packet.seq;
                    self.rcv.nxt = packet.seq.wrapping_add(1);
                    self.snd.una = packet.ack;
                    self.retransmit_queue.clear();
                    self.state = State::Established;
                    self.control_queue.push(Packet::new(
                        Kind::Ack,
                        self.snd.nxt,
                        self.rcv.nxt,
                        0,
                        Vec::new(),
                    ));
                }
            }

            State::SynReceived => {
                if packet.kind == Kind::Ack && packet.ack == self.snd.nxt {
                    self.snd.una = packet.ack;
                    self.retransmit_queue.clear();
                    self.state = State::Established;
                }
            }

            State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck
            | State::TimeWait => {
                outcome = self.process_established(packet);
            }
        }
        outcome
    }

    fn process_established(&mut self, packet: Packet) -> Outcome {
        let mut outcome = Outcome::default();
        self.process_ack(&packet, &mut outcome);
        if outcome.protocol_error {
            return outcome;
        }

        let carries_seq = matches!(packet.kind, Kind::Data | Kind::Fin | Kind::FinAck);
        if carries_seq {
            let fin_consumed = self.process_data(packet);
            self.control_queue.push(Packet::new(
                Kind::Ack,
                self.snd.nxt,
                self.rcv.nxt,
                0,
                Vec::new(),
            ));
            if fin_consumed {
                self.on_fin_received(&mut outcome);
            }
        }
        outcome
    }

    fn process_ack(&mut self, packet: &Packet, outcome: &mut Outcome) {
        if mod32::gt(packet.ack, self.snd.una) && mod32::le(packet.ack, self.snd.nxt) {
            self.snd.una = packet.ack;
            self.dup_ack_count = 0;
            self.retransmit_count = 0;
            while let Some(segment) = self.retransmit_queue.front() {
                if mod32::le(segment.end_seq(), self.snd.una) {
                    let segment = self.retransmit_queue.pop_front().unwrap();
                    if !segment.retransmitted {
                        outcome.acked_clean.push(segment.packet.seq);
                    }
                } else {
                    break;
                }
            }
            self.advance_close_state_on_ack(outcome);
        } else if packet.ack == self.snd.una && !self.retransmit_queue.is_empty() {
            self.dup_ack_count += 1;
            if self.dup_ack_count == 3 {
                outcome.fast_retransmit = true;
                self.dup_ack_count = 0;
            }
        } else if mod32::gt(packet.ack, self.snd.nxt) {
            outcome.protocol_error = true;
            self.control_queue.push(Packet::new(
                Kind::Ack,
                self.snd.nxt,
                self.rcv.nxt,
                0,
                Vec::new(),
            ));
        }
    }

    fn is_fin_acked(&self) -> bool {
        self.snd.una == self.snd.nxt
    }

    fn advance_close_state_on_ack(&mut self, outcome: &mut Outcome) {
        match self.state {
            State::FinWait1 if self.is_fin_acked() => {
                self.state = State::FinWait2;
            }
            State::Closing if self.is_fin_acked() => {
                self.state = State::TimeWait;
                outcome.enter_time_wait = true;
            }
            State::LastAck if self.is_fin_acked() => {
                self.state = State::Closed;
            }
            _ => {}
        }
    }

    /// Returns whether a FIN was consumed, either from `packet` directly
    /// or while draining the reorder buffer afterward.
    fn process_data(&mut self, packet: Packet) -> bool {
        let mut fin_consumed = false;
        if packet.seq == self.rcv.nxt {
            fin_consumed |= self.accept_in_order(packet);
            fin_consumed |= self.drain_reorder_buffer();
        } else if mod32::bounded(
            self.rcv.nxt,
            Bound::Inclusive,
            packet.seq,
            Bound::Exclusive,
            self.rcv.nxt.wrapping_add(self.rcv.wnd),
        ) {
            if !self.reorder_buffer.iter().any(|r| r.0.seq == packet.seq) {
                self.reorder_buffer.push(Reordered(packet));
            }
        }
        // Otherwise: a duplicate of already-delivered data. Dropped; the
        // caller still sends the (unchanged) cumulative ACK.
        fin_consumed
    }

    fn accept_in_order(&mut self, packet: Packet) -> bool {
        let is_fin = matches!(packet.kind, Kind::Fin | Kind::FinAck);
        let payload_len = packet.payload.len() as u32;
        if payload_len > 0 {
            self.recv_buffer.concatenate(Message::new(packet.payload));
            self.rcv.nxt = self.rcv.nxt.wrapping_add(payload_len);
        }
        if is_fin {
            self.rcv.nxt = self.rcv.nxt.wrapping_add(1);
        }
        is_fin
    }

    fn drain_reorder_buffer(&mut self) -> bool {
        let mut fin_consumed = false;
        while let Some(top) = self.reorder_buffer.peek() {
            if top.0.seq != self.rcv.nxt {
                break;
            }
            let Reordered(packet) = self.reorder_buffer.pop().unwrap();
            if self.accept_in_order(packet) {
                fin_consumed = true;
            }
        }
        fin_consumed
    }

    fn on_fin_received(&mut self, outcome: &mut Outcome) {
        match self.state {
            State::Established => {
                self.state = State::CloseWait;
            }
            State::FinWait1 => {
                self.state = if self.is_fin_acked() {
                    outcome.enter_time_wait = true;
                    State::TimeWait
                } else {
                    State::Closing
                };
            }
            State::FinWait2 => {
                self.state = State::TimeWait;
                outcome.enter_time_wait = true;
            }
            State::TimeWait => {
                // A stray retransmission of the peer's FIN; the ACK
                // queued above restarts their timer, and ours.
                outcome.enter_time_wait = true;
            }
            _ => {}
        }
    }
}
