pub mod source;
pub mod stdin;
pub mod wav;

pub use source::{AudioSource, ChunkRead, PcmSource, TimedRead};
pub use stdin::ChannelReader;
