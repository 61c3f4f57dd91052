//! Follow one event's forum from the terminal.
//!
//! Usage: `forum-tail <event-id>` with `FORUM_TOKEN` (and optionally
//! `FORUM_API_URL`) in the environment or `.env`.

use tracing::{info, warn};

use forum_sync::{ForumClient, Notice, RoomView, SyncConfig};
use forum_types::models::EventId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forum_sync=info,forum_tail=info".into()),
        )
        .init();

    let event_id: EventId = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: forum-tail <event-id>"))?
        .into();

    let config = SyncConfig::from_env()?;
    let client = ForumClient::connect(config).await?;
    let mut room = client.open_room(&event_id).await?;
    room.focus(true).await?;

    let mut views = room.watch();
    let mut last = room.view();
    loop {
        let seen = last.clone();
        tokio::select! {
            view = views.wait_for(move |v| has_changed(&seen, v)) => {
                let view = view?.clone();
                print_changes(&last, &view);
                last = view;
            }
            Some(notice) = room.next_notice() => match notice {
                Notice::SendFailed { content, error } => warn!("Send failed ({}): {}", error, content),
                Notice::ModerationFailed { message_id, action, error } => {
                    warn!("{} on {} failed: {}", action, message_id, error)
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    room.close();
    client.shutdown();
    Ok(())
}

fn has_changed(before: &RoomView, after: &RoomView) -> bool {
    after.messages.len() != before.messages.len()
        || after.typing != before.typing
        || after.connected != before.connected
}

fn print_changes(before: &RoomView, after: &RoomView) {
    for message in after.messages.messages() {
        if before.messages.get(&message.id).is_none() {
            let thread = if message.is_reply() { "  ↳ " } else { "" };
            info!(
                "{}{} ({}): {}",
                thread, message.author_name, message.author_role, message.content
            );
        }
    }
    if after.typing != before.typing {
        if let Some(name) = &after.typing {
            info!("{} is typing...", name);
        }
    }
    if after.connected != before.connected {
        info!("Live updates {}", if after.connected { "connected" } else { "paused" });
    }
}
