mod ack;

pub use ack::AckFrame;

/// Define the basic behaviors for all kinds of frames.
///
/// The reliable delivery core never looks inside a frame, it only asks
/// what type it is.
pub trait BeFrame {
    /// Return the type of frame
    fn frame_type(&self) -> FrameType;
}

/// The `Spec` summarizes any special rules governing the processing
/// or generation of the frame type.
///
/// See [table-3](https://www.rfc-editor.org/rfc/rfc9000.html#table-3)
/// of [QUIC](https://www.rfc-editor.org/rfc/rfc9000.html) for more details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spec {
    /// Packets containing only frames with this marking are not ack-eliciting.
    NonAckEliciting = 1,
    /// Packets containing only frames with this marking do not count toward bytes
    /// in flight for congestion control purposes.
    CongestionControlFree = 2,
    /// Packets containing only frames with this marking can be used to probe
    /// new network paths during connection migration.
    ProbeNewPath = 4,
    /// The contents of frames with this marking are flow controlled.
    FlowControlled = 8,
}

pub trait ContainSpec {
    fn contain(&self, spec: Spec) -> bool;
}

impl ContainSpec for u8 {
    #[inline]
    fn contain(&self, spec: Spec) -> bool {
        *self & spec as u8 != 0
    }
}

/// The sum type of all the core QUIC frame types.
///
/// The inner `u8` of some variants carries the flag bits of the type byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameType {
    Padding,
    Ping,
    Ack(u8),
    ResetStream,
    StopSending,
    Crypto,
    NewToken,
    Stream(u8),
    MaxData,
    MaxStreamData,
    MaxStreams(u8),
    DataBlocked,
    StreamDataBlocked,
    StreamsBlocked(u8),
    NewConnectionId,
    RetireConnectionId,
    PathChallenge,
    PathResponse,
    ConnectionClose(u8),
    HandshakeDone,
    Datagram(u8),
}

impl FrameType {
    /// Return the specs of the frame type
    pub fn specs(&self) -> u8 {
        let (n, c, p, f) = (
            Spec::NonAckEliciting as u8,
            Spec::CongestionControlFree as u8,
            Spec::ProbeNewPath as u8,
            Spec::FlowControlled as u8,
        );
        match self {
            FrameType::Padding => n | p,
            FrameType::Ack(_) => n | c,
            FrameType::Stream(_) => f,
            FrameType::NewConnectionId => p,
            FrameType::PathChallenge => p,
            FrameType::PathResponse => p,
            // CONNECTION_CLOSE is not counted in flight either
            FrameType::ConnectionClose(_) => n | c,
            _ => 0,
        }
    }

    /// Return if the frame type is ack-eliciting
    pub fn is_ack_eliciting(&self) -> bool {
        !self.specs().contain(Spec::NonAckEliciting)
    }

    /// A PATH_CHALLENGE validates a path. Once lost, a new challenge with fresh
    /// data is sent instead of repeating it.
    pub fn is_path_challenge(&self) -> bool {
        matches!(self, FrameType::PathChallenge)
    }
}

impl BeFrame for FrameType {
    fn frame_type(&self) -> FrameType {
        *self
    }
}
