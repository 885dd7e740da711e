mod buffer_channel;

pub use buffer_channel::BoundedBufferChannel;
pub use buffer_channel::BoundedBufferChannelReader;
pub use buffer_channel::BoundedBufferChannelWriter;
pub use buffer_channel::StreamCompletion;
pub use buffer_channel::StreamError;
