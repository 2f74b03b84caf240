use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use notify_debouncer_full::{
    new_debouncer, DebouncedEvent,
    notify::{RecursiveMode, Watcher, Error as NotifyError},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::SiteConfig;
use crate::site::build_site;

pub type RefreshBroadcaster = broadcast::Sender<()>;

/// Editor scratch files: Emacs lock files and `~` backups.
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|s| s.starts_with(".#") || s.ends_with('~'))
}

fn is_relevant(event: &DebouncedEvent) -> bool {
    let kind = &event.event.kind;
    let is_relevant_kind = kind.is_modify() || kind.is_create() || kind.is_remove();
    is_relevant_kind && !event.event.paths.iter().any(|path| is_temp_file(path))
}

/// Rebuild on a blocking thread. Returns whether the build succeeded.
pub async fn rebuild(config: Arc<SiteConfig>) -> bool {
    match tokio::task::spawn_blocking(move || build_site(&config)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            error!("Failed to build site: {}", e);
            false
        }
        Err(e) => {
            error!("Build task failed: {}", e);
            false
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(tx): State<RefreshBroadcaster>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, tx))
}

async fn handle_socket(mut socket: WebSocket, tx: RefreshBroadcaster) {
    let mut rx = tx.subscribe();

    // Wait for a reload signal
    if rx.recv().await.is_ok() {
        if socket.send(Message::Text("reload".to_string().into())).await.is_err() {
            debug!("Client disconnected before reload message could be sent");
        }
    }
}

pub fn start_content_watcher(tx: RefreshBroadcaster, config: Arc<SiteConfig>) {
    info!("Watching {} for changes...", config.content_dir.display());
    tokio::spawn(async move {
        let (watcher_tx, mut watcher_rx) = tokio::sync::mpsc::channel(1);

        let debouncer = new_debouncer(
            Duration::from_millis(200),
            None,
            move |res: Result<Vec<DebouncedEvent>, Vec<NotifyError>>| match res {
                Ok(events) => {
                    let relevant_events: Vec<&DebouncedEvent> =
                        events.iter().filter(|event| is_relevant(event)).collect();

                    if !relevant_events.is_empty() {
                        debug!(
                            "Relevant file change detected: {:?}",
                            relevant_events
                                .iter()
                                .flat_map(|e| &e.event.paths)
                                .map(|p| p.display())
                                .collect::<Vec<_>>()
                        );
                        // A full channel already has a rebuild pending.
                        let _ = watcher_tx.try_send(());
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("Watcher error: {}", e);
                    }
                }
            },
        );
        let mut debouncer = match debouncer {
            Ok(debouncer) => debouncer,
            Err(e) => {
                error!("Failed to create file watcher: {}", e);
                return;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&config.content_dir, RecursiveMode::Recursive)
        {
            error!("Failed to watch {}: {}", config.content_dir.display(), e);
            return;
        }

        // Keep the debouncer alive and wait for events
        while watcher_rx.recv().await.is_some() {
            info!("Content change detected, rebuilding site...");

            if rebuild(config.clone()).await {
                // Receivers are only the open browser tabs; none is fine.
                let _ = tx.send(());
            }
        }
    });
}
