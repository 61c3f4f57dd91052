//! Client-side realtime sync for event forums.
//!
//! A [`ForumClient`] owns the live channel ([`TransportSession`]), the
//! durable store ([`MessageStore`]) and the process-wide
//! [`NotificationCenter`]. Each open forum runs as its own task around a
//! [`ForumRoom`] state machine and is driven through a [`RoomHandle`].

pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod identity;
pub mod notifications;
pub mod propagator;
pub mod reconciler;
pub mod room;
pub mod store;
pub mod transport;
pub mod typing;

pub use client::ForumClient;
pub use config::SyncConfig;
pub use error::SyncError;
pub use handle::RoomHandle;
pub use identity::{Viewer, ViewerRole};
pub use notifications::NotificationCenter;
pub use reconciler::{Entry, MessageCache};
pub use room::{ForumRoom, Notice, RoomView};
pub use store::{HttpMessageStore, MessageStore};
pub use transport::{ConnectionState, TransportSession};
