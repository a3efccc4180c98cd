//! Plain data records carried over the channel fabric.

pub mod beacon;
pub mod command;
pub mod status;
pub mod task;

pub use beacon::*;
pub use command::*;
pub use status::*;
pub use task::*;
