pub mod stream;
pub mod telnet;

pub use stream::Stream;
