pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;
pub mod unread;
pub mod viewer;
