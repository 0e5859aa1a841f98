//     1          2          3
// ----------|----------|----------
//        RCV.NXT    RCV.NXT
//                  +RCV.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers allowed for new reception
// 3 - future sequence numbers which are not yet allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveSequenceSpace {
    /// Initial receive sequence number (the peer's ISS).
    pub irs: u32,
    /// Next sequence number expected from the peer; the left edge of
    /// the receive window.
    pub nxt: u32,
    /// The number of bytes this side can buffer from the peer.
    pub wnd: u32,
}
