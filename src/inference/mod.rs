pub mod pool;
pub mod server;

pub use pool::{BorrowedChannel, ChannelPool};
pub use server::{InferenceChannel, InferenceServer};
