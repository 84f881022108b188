pub mod frame;
pub mod sse;

pub use frame::{Contents, Data, FrameType, MessageFrame};
pub use sse::{encode, ChannelSink, FrameSink, NullSink};
