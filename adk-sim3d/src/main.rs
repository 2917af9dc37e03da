use std::{sync::Arc, time::Duration};

use adk_sim3d::{
    ClientConfig, ClientRuntime, HttpChatFallback, LoopbackTransport, SimClient,
    fallback::ChatFallback,
};
use anyhow::Context;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// Upper bound on frames spent waiting for playback to finish.
const MAX_DRAIN_FRAMES: u32 = 10_000;

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    /// A user chat message, optionally stamped so its session id matches recorded events.
    Send {
        send: String,
        #[serde(default)]
        at: Option<i64>,
    },
    /// Drop or restore the channel.
    Connected { connected: bool },
    /// Let the frame clock run.
    Wait { wait_ms: u64 },
    /// A recorded `{"event": ..., "data": ...}` channel event, decoded by the client.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .context("usage: adk-sim3d <events.jsonl>")?;
    let replay = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {path}"))?;

    // Recorded sessions carry their original timestamps, so the idle timeout would close them
    // on the first frame.
    let config = ClientConfig {
        stream_timeout: None,
        ..ClientConfig::from_env()?
    };
    let frame_interval = config.frame_interval;
    let fallback: Arc<dyn ChatFallback> = Arc::new(HttpChatFallback::from_config(&config));
    let (transport, mut peer) = LoopbackTransport::pair();
    let (handle, task) = ClientRuntime::spawn(SimClient::new(config, transport), Some(fallback));
    handle.set_viewport(1280.0, 720.0).await?;

    for (idx, line) in replay.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 1;
        let entry = match serde_json::from_str::<ReplayLine>(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path, line = line_no, error = %e, "not a replay entry; skipped");
                continue;
            }
        };
        match entry {
            ReplayLine::Send { send, at } => {
                let session_id = match at {
                    Some(millis) => {
                        let Some(at) = Utc.timestamp_millis_opt(millis).single() else {
                            warn!(path = %path, line = line_no, millis, "invalid timestamp; skipped");
                            continue;
                        };
                        handle.send_chat_at(send, at).await?
                    }
                    None => handle.send_chat(send).await?,
                };
                info!(session_id = ?session_id, "chat sent");
            }
            ReplayLine::Connected { connected } => peer.set_connected(connected),
            ReplayLine::Wait { wait_ms } => tokio::time::sleep(Duration::from_millis(wait_ms)).await,
            ReplayLine::Event { event, data } => handle.deliver_raw(event, data)?,
        }
        while let Some(outbound) = peer.try_recv() {
            info!(event = outbound.event_name(), payload = ?outbound.payload()?, "outbound");
        }
    }

    let mut snapshot = handle.snapshot().await?;
    let mut frames = 0;
    while !snapshot.playback_idle {
        if frames == MAX_DRAIN_FRAMES {
            warn!(frames, "playback still running; giving up");
            break;
        }
        tokio::time::sleep(frame_interval).await;
        snapshot = handle.snapshot().await?;
        frames += 1;
    }

    handle.shutdown()?;
    task.await.context("client runtime panicked")?;

    for session in &snapshot.sessions {
        info!(session_id = %session.id, state = ?session.state, text = %session.text, "session");
    }
    for entity in &snapshot.entities {
        info!(entity_id = %entity.id, kind = ?entity.kind, position = ?entity.position, "entity");
    }
    for notice in &snapshot.notices {
        info!(level = ?notice.level, message = %notice.message, "notice");
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
