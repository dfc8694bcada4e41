use derive_more::Display;

/// What kind of packet the sender may emit next.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendMode {
    /// Nothing can be sent, every packet number space is discarded.
    #[display("none")]
    None,
    /// Only packets that carry nothing but ACK frames.
    #[display("ack")]
    Ack,
    /// Queued retransmissions, and ACKs.
    #[display("retransmission")]
    Retransmission,
    /// Probe packets after a probe timeout.
    #[display("pto")]
    Probe,
    /// New data, retransmissions and ACKs.
    #[display("any")]
    Any,
}
