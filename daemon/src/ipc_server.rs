use anyhow::Result;
use common::{ClipdeckError, Command, HostAction, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, broadcast};

use crate::{DaemonState, log_and_continue};

pub async fn start(
    state: Arc<Mutex<DaemonState>>,
    actions_tx: broadcast::Sender<Vec<HostAction>>,
    wake: Arc<Notify>,
) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    serve(listener, state, actions_tx, wake).await;

    // Clean up socket
    log_and_continue!(std::fs::remove_file(&socket_path), "remove IPC socket");
    log::info!("IPC server stopped");
    Ok(())
}

/// Accept connections until the exit flag is raised
async fn serve(
    listener: UnixListener,
    state: Arc<Mutex<DaemonState>>,
    actions_tx: broadcast::Sender<Vec<HostAction>>,
    wake: Arc<Notify>,
) {
    loop {
        // Check if we should exit
        if state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                let tx = actions_tx.clone();
                let wake = wake.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state, tx, wake).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    actions_tx: broadcast::Sender<Vec<HostAction>>,
    wake: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(Command::Subscribe) => {
                // Subscribe before acknowledging so no batch falls in between
                let receiver = actions_tx.subscribe();
                write_response(&mut writer, &Response::Ok).await?;
                log::info!("Host subscribed to pushed actions");
                return stream_actions(receiver, &mut writer).await;
            }
            Ok(command) => handle_command(command, &state, &wake).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(ClipdeckError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        write_response(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_json = serde_json::to_string(response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Forward pushed action batches until the host disconnects
async fn stream_actions<W>(
    mut receiver: broadcast::Receiver<Vec<HostAction>>,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match receiver.recv().await {
            Ok(actions) => write_response(writer, &Response::Actions(actions)).await?,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Subscriber fell behind, {} batch(es) dropped", skipped);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn handle_command(command: Command, state: &Arc<Mutex<DaemonState>>, wake: &Notify) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = state.lock().await;
            Response::Status(state.bridge.status(state.uptime_secs()))
        }

        Command::ListVideos => {
            let state = state.lock().await;
            Response::Videos(state.bridge.videos())
        }

        Command::Kill => {
            log::info!("Received kill command");
            state.lock().await.should_exit = true;
            // Let the ticker see the flag without waiting out its idle sleep
            wake.notify_one();
            Response::Ok
        }

        Command::Subscribe => Response::Error(ClipdeckError::Ipc(
            "Subscribe must be the first command on its connection".to_string(),
        )),

        command => {
            let result = state.lock().await.bridge.handle(command);
            // The command may have parked a deferred pass
            wake.notify_one();

            match result {
                Ok(actions) => Response::Actions(actions),
                Err(e) => {
                    log::warn!("Command rejected: {}", e);
                    Response::Error(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BridgeSettings, HostBridge};
    use common::{Rect, Viewport};
    use std::time::Duration;

    struct Harness {
        state: Arc<Mutex<DaemonState>>,
        actions_tx: broadcast::Sender<Vec<HostAction>>,
        wake: Arc<Notify>,
    }

    fn harness() -> Harness {
        let mut settings = BridgeSettings::default();
        settings.scheduler.throttle = Duration::ZERO;
        let (actions_tx, _) = broadcast::channel(16);
        Harness {
            state: Arc::new(Mutex::new(DaemonState::new(HostBridge::new(settings)))),
            actions_tx,
            wake: Arc::new(Notify::new()),
        }
    }

    impl Harness {
        async fn send(&self, command: Command) -> Response {
            handle_command(command, &self.state, &self.wake).await
        }
    }

    #[tokio::test]
    async fn test_ping_and_query() {
        let h = harness();
        assert!(matches!(h.send(Command::Ping).await, Response::Pong));

        match h.send(Command::Query).await {
            Response::Status(status) => {
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
                assert_eq!(status.mounted, 0);
                assert_eq!(status.active_video, None);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_element_commands_return_actions() {
        let h = harness();
        h.send(Command::Resize {
            viewport: Viewport::new(400.0, 1000.0),
            elements: Vec::new(),
        })
        .await;
        h.send(Command::Mount {
            id: "clip".to_string(),
            rect: Rect::new(450.0, 650.0),
            native_hls: false,
        })
        .await;

        match h
            .send(Command::Register {
                id: "clip".to_string(),
                prefers_to_play: true,
            })
            .await
        {
            Response::Actions(actions) => assert_eq!(
                actions,
                vec![HostAction::Play {
                    id: "clip".to_string()
                }]
            ),
            other => panic!("Unexpected response: {:?}", other),
        }

        match h.send(Command::ListVideos).await {
            Response::Videos(videos) => {
                assert_eq!(videos.len(), 1);
                assert!(videos[0].active);
                assert!(!videos[0].paused);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_video_is_reported() {
        let h = harness();
        let response = h
            .send(Command::Retry {
                id: "missing".to_string(),
            })
            .await;
        assert!(matches!(response, Response::Error(ClipdeckError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deferred_pass_is_pushed_to_subscribers() {
        let h = Harness {
            state: Arc::new(Mutex::new(DaemonState::new(HostBridge::new(
                BridgeSettings::default(),
            )))),
            ..harness()
        };
        let mut receiver = h.actions_tx.subscribe();

        h.send(Command::Resize {
            viewport: Viewport::new(400.0, 1000.0),
            elements: Vec::new(),
        })
        .await;
        h.send(Command::Mount {
            id: "clip".to_string(),
            rect: Rect::new(450.0, 650.0),
            native_hls: false,
        })
        .await;

        // Inside the throttle window, so nothing plays yet
        match h
            .send(Command::Register {
                id: "clip".to_string(),
                prefers_to_play: true,
            })
            .await
        {
            Response::Actions(actions) => assert!(actions.is_empty()),
            other => panic!("Unexpected response: {:?}", other),
        }

        let ticker = tokio::spawn(crate::run_ticker(
            h.state.clone(),
            h.actions_tx.clone(),
            h.wake.clone(),
        ));

        let pushed = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            pushed,
            vec![HostAction::Play {
                id: "clip".to_string()
            }]
        );

        h.state.lock().await.should_exit = true;
        h.wake.notify_one();
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_sets_exit_flag() {
        let h = harness();
        assert!(matches!(h.send(Command::Kill).await, Response::Ok));
        assert!(h.state.lock().await.should_exit);
    }

    #[tokio::test]
    async fn test_socket_session() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipdeck.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(serve(
            listener,
            h.state.clone(),
            h.actions_tx.clone(),
            h.wake.clone(),
        ));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"\"Ping\"\nnot json\n").await.unwrap();

        let first: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap())
            .unwrap();
        assert!(matches!(first, Response::Pong));

        let second: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap())
            .unwrap();
        assert!(matches!(second, Response::Error(ClipdeckError::Ipc(_))));

        h.state.lock().await.should_exit = true;
        server.await.unwrap();
    }
}
