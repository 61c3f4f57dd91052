pub mod connection;
pub mod dispatcher;

pub use dispatcher::{Dispatcher, RoomBroadcast};
