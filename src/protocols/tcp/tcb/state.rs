//! The connection states of the simplified TCP state machine.
//!
//! Unlike the RFC 9293 diagram this is adapted from, CLOSED and LISTEN
//! are ordinary variants here rather than handled by freestanding
//! functions outside the [`Tcb`](super::Tcb): every connection in this
//! crate owns exactly one [`Channel`](crate::channel::Channel), so there
//! is no separate socket-demultiplexing layer to split LISTEN out of.
///
/// ```text
///                             +---------+ ---------\      active OPEN
///                             |  CLOSED |            \    -----------
///                             +---------+<---------\   \   create TCB
///                               |     ^              \   \  snd SYN
///                  passive OPEN |     |   CLOSE        \   \
///                  ------------ |     | ----------       \   \
///                   create TCB  |     | delete TCB         \   \
///                               V     |                      \   \
///                             +---------+            CLOSE    |    \
///                             |  LISTEN |          ---------- |     |
///                             +---------+          delete TCB |     |
///                  rcv SYN      |     |     SEND              |     |
///                 -----------   |     |    -------            |     V
///                snd SYN,ACK  /       \   snd SYN          +--------+
///                            V         V                   |        |
///                     +--------+                            |  SYN   |
///                     |  SYN   |<-----------------------------------|  SENT  |
///                     |  RCVD  |         rcv SYN,ACK / snd ACK      +--------+
///                     +--------+
///                         |  rcv ACK of SYN
///                         V  --------------
///                    +---------+
///                    |  ESTAB  |
///                    +---------+
///                 CLOSE    |     |    rcv FIN
///                -------   |     |    -------
///                snd FIN  /       \   snd ACK         +---------+
///               +---------+         \----------------->|  CLOSE  |
///               |  FIN    |                            |   WAIT  |
///               | WAIT-1  |                            +---------+
///               +---------+                             CLOSE  |
///                 | rcv ACK of FIN                      ------- |
///                 V        ---------------------------- snd FIN V
///               +---------+                                +---------+
///               |FINWAIT-2|                                | LAST-ACK|
///               +---------+                                +---------+
///                 |  rcv FIN                       rcv ACK of FIN |
///                 |  ------- snd ACK     Timeout=2MSL ------------ |
///                 V                      ------------              V
///               +---------+delete TCB                        +---------+
///               |TIME-WAIT|--------------------------------->| CLOSED  |
///               +---------+                                  +---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection exists and none is being formed.
    Closed,
    /// Waiting for a connection request from a remote peer (passive open).
    Listen,
    /// Waiting for a matching connection request after sending one
    /// (active open).
    SynSent,
    /// Waiting for a confirming ACK of a connection request after having
    /// both received and sent one.
    SynReceived,
    /// An open connection; data may flow in either direction.
    Established,
    /// Waiting for a connection termination request from the peer, or an
    /// ACK of one already sent.
    FinWait1,
    /// Waiting for a connection termination request from the peer, its
    /// own FIN having already been acknowledged.
    FinWait2,
    /// Waiting for a connection termination request from the local
    /// application, having already received one from the peer.
    CloseWait,
    /// Both sides sent FIN before either was acknowledged; waiting for
    /// an ACK of the locally sent FIN.
    Closing,
    /// Waiting for an ACK of a FIN sent in response to the peer's FIN.
    LastAck,
    /// Waiting out 2*MSL to absorb stray retransmissions of the peer's
    /// final ACK.
    TimeWait,
}

impl State {
    /// Whether the application may still queue bytes to send.
    pub fn can_send(self) -> bool {
        matches!(self, State::SynSent | State::SynReceived | State::Established)
    }

    /// Whether the application may still read delivered bytes.
    pub fn can_receive(self) -> bool {
        matches!(
            self,
            State::SynSent
                | State::SynReceived
                | State::Established
                | State::FinWait1
                | State::FinWait2
                | State::CloseWait
        )
    }
}
