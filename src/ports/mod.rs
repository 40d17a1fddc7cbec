pub mod control_channel;

pub use control_channel::{ControlChannel, ControlChannelError, ControlChannelResult};
