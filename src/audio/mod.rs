//! Audio collaborators
//!
//! Stand-ins for a real capture device and playback backend: a synthetic
//! frame source and channel-backed playback sinks.

pub mod capture;
pub mod playback;

pub use capture::{frame_channel, SyntheticCapture};
pub use playback::{ChannelSink, ChannelSinkFactory, PlaybackStats, ReceivedPacket};
