//      1         2          3          4
// ----------|----------|----------|----------
//        SND.UNA    SND.NXT    SND.UNA
//                             +SND.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers of unacknowledged data
// 3 - sequence numbers allowed for new data transmission (send window)
// 4 - future sequence numbers which are not yet allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendSequenceSpace {
    /// Initial send sequence number.
    pub iss: u32,
    /// Oldest unacknowledged sequence number.
    pub una: u32,
    /// Next sequence number to be sent.
    pub nxt: u32,
    /// The peer's receive window, in bytes. Fixed for the life of the
    /// connection -- this crate does not negotiate flow control beyond
    /// the configured window.
    pub wnd: u32,
}
