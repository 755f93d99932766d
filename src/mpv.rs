use crate::player::{MediaEvent, MediaOutput};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const OBSERVED_PROPERTIES: &[&str] = &["media-title", "pause", "paused-for-cache", "core-idle"];

#[derive(Debug, Clone)]
pub enum MpvCommand {
    LoadUrl { url: String },
    SetPause(bool),
    SetVolume(f32),
    Stop,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct MpvProcess {
    cmd_tx: mpsc::UnboundedSender<MpvCommand>,
}

impl MpvProcess {
    pub async fn spawn(socket_path: PathBuf) -> Result<(Self, mpsc::UnboundedReceiver<MediaEvent>)> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_mpv(socket_path.clone(), cmd_rx, evt_tx));

        Ok((Self { cmd_tx }, evt_rx))
    }

    pub fn command(&self, cmd: MpvCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| anyhow!("mpv task is not running"))
    }

    pub fn shutdown(&self) {
        let _ = self.command(MpvCommand::Shutdown);
    }
}

impl MediaOutput for MpvProcess {
    fn load(&self, url: &str) -> Result<()> {
        self.command(MpvCommand::LoadUrl { url: url.to_string() })?;
        self.command(MpvCommand::SetPause(false))
    }

    fn resume(&self) -> Result<()> {
        self.command(MpvCommand::SetPause(false))
    }

    fn pause(&self) -> Result<()> {
        self.command(MpvCommand::SetPause(true))
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        self.command(MpvCommand::SetVolume(volume))
    }

    fn clear(&self) -> Result<()> {
        self.command(MpvCommand::Stop)
    }
}

async fn run_mpv(
    socket_path: PathBuf,
    mut cmd_rx: mpsc::UnboundedReceiver<MpvCommand>,
    evt_tx: mpsc::UnboundedSender<MediaEvent>,
) {
    let mut backoff = Duration::from_millis(200);
    loop {
        if cmd_rx.is_closed() {
            return;
        }
        match spawn_and_connect(&socket_path).await {
            Ok((mut child, mut stream)) => {
                backoff = Duration::from_millis(200);
                let _ = send_observers(&mut stream).await;
                let _ = evt_tx.send(MediaEvent::Ready);
                match io_loop(&mut child, stream, &mut cmd_rx, &evt_tx).await {
                    Ok(()) => return,
                    Err(e) => {
                        let _ = evt_tx.send(MediaEvent::Crashed(e.to_string()));
                    }
                }
            }
            Err(e) => {
                let _ = evt_tx.send(MediaEvent::Crashed(e.to_string()));
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_secs(5));
            }
        }
    }
}

async fn spawn_and_connect(socket_path: &Path) -> Result<(Child, UnixStream)> {
    let _ = tokio::fs::remove_file(socket_path).await;

    let mut child = Command::new("mpv")
        .arg("--idle=yes")
        .arg("--no-terminal")
        .arg("--no-video")
        .arg("--force-window=no")
        .arg("--keep-open=yes")
        .arg(format!(
            "--input-ipc-server={}",
            socket_path
                .to_str()
                .ok_or_else(|| anyhow!("Invalid socket path"))?
        ))
        .spawn()
        .context("Failed to spawn mpv")?;

    let start = tokio::time::Instant::now();
    let stream = loop {
        match UnixStream::connect(socket_path).await {
            Ok(s) => break s,
            Err(e) => {
                if start.elapsed() > Duration::from_secs(3) {
                    let _ = child.kill().await;
                    return Err(e).context("Timed out connecting to mpv IPC socket");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };

    Ok((child, stream))
}

async fn send_observers(stream: &mut UnixStream) -> Result<()> {
    for (id, name) in OBSERVED_PROPERTIES.iter().enumerate() {
        send_json(stream, mpv_cmd(vec![
            serde_json::json!("observe_property"),
            serde_json::json!(id + 1),
            serde_json::json!(name),
        ]))
        .await?;
    }
    Ok(())
}

async fn io_loop(
    child: &mut Child,
    stream: UnixStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<MpvCommand>,
    evt_tx: &mpsc::UnboundedSender<MediaEvent>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("mpv wait failed")?;
                return Err(anyhow!("mpv exited: {status}"));
            }
            maybe_line = reader.next_line() => {
                let line = maybe_line.context("mpv IPC read error")?;
                let Some(line) = line else {
                    return Err(anyhow!("mpv IPC closed"));
                };
                if let Some(ev) = parse_event(&line) {
                    let _ = evt_tx.send(ev);
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return Ok(()); };
                match cmd {
                    MpvCommand::LoadUrl { url } => {
                        send_json_half(&mut write_half, mpv_cmd(vec![
                            serde_json::json!("loadfile"),
                            serde_json::json!(url),
                            serde_json::json!("replace"),
                        ])).await?;
                    }
                    MpvCommand::SetPause(p) => {
                        send_json_half(&mut write_half, mpv_cmd(vec![
                            serde_json::json!("set_property"),
                            serde_json::json!("pause"),
                            serde_json::json!(p),
                        ])).await?;
                    }
                    MpvCommand::SetVolume(v) => {
                        send_json_half(&mut write_half, mpv_cmd(vec![
                            serde_json::json!("set_property"),
                            serde_json::json!("volume"),
                            serde_json::json!(f64::from(v) * 100.0),
                        ])).await?;
                    }
                    MpvCommand::Stop => {
                        send_json_half(&mut write_half, mpv_cmd(vec![serde_json::json!("stop")])).await?;
                    }
                    MpvCommand::Shutdown => {
                        let _ = child.kill().await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn mpv_cmd(command: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "command": command })
}

async fn send_json(stream: &mut UnixStream, v: serde_json::Value) -> Result<()> {
    let mut buf = serde_json::to_vec(&v).context("Serialize mpv IPC request")?;
    buf.push(b'\n');
    stream.write_all(&buf).await.context("Write mpv IPC request")?;
    Ok(())
}

async fn send_json_half(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    v: serde_json::Value,
) -> Result<()> {
    let mut buf = serde_json::to_vec(&v).context("Serialize mpv IPC request")?;
    buf.push(b'\n');
    write_half.write_all(&buf).await.context("Write mpv IPC request")?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MpvIncoming {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    file_error: Option<String>,
}

/// Maps one IPC line to a media event; replies and unrelated events map to
/// nothing.
fn parse_event(line: &str) -> Option<MediaEvent> {
    let incoming: MpvIncoming = serde_json::from_str(line).ok()?;
    match incoming.event.as_deref()? {
        "property-change" => {}
        "playback-restart" => return Some(MediaEvent::Playing),
        "end-file" if incoming.reason.as_deref() == Some("error") => {
            let msg = incoming.file_error.unwrap_or_else(|| "playback error".to_string());
            return Some(MediaEvent::Error(msg));
        }
        _ => return None,
    }
    let flag = || incoming.data.as_ref().and_then(|v| v.as_bool());
    match incoming.name.as_deref()? {
        "media-title" => {
            let title = incoming
                .data
                .as_ref()
                .and_then(|v| v.as_str().map(|s| s.to_string()));
            Some(MediaEvent::MediaTitle(title))
        }
        "pause" => match flag()? {
            true => Some(MediaEvent::Pause),
            false => None,
        },
        "paused-for-cache" => match flag()? {
            true => Some(MediaEvent::Waiting),
            false => None,
        },
        "core-idle" => match flag()? {
            false => Some(MediaEvent::Playing),
            true => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_media_title() {
        let line = r#"{"event":"property-change","name":"media-title","data":"Song Title"}"#;
        assert_eq!(
            parse_event(line),
            Some(MediaEvent::MediaTitle(Some("Song Title".to_string())))
        );
    }

    #[test]
    fn parses_pause_and_buffering() {
        let pause = r#"{"event":"property-change","name":"pause","data":true}"#;
        assert_eq!(parse_event(pause), Some(MediaEvent::Pause));
        let unpause = r#"{"event":"property-change","name":"pause","data":false}"#;
        assert_eq!(parse_event(unpause), None);
        let cache = r#"{"event":"property-change","name":"paused-for-cache","data":true}"#;
        assert_eq!(parse_event(cache), Some(MediaEvent::Waiting));
    }

    #[test]
    fn core_running_means_playing() {
        let line = r#"{"event":"property-change","name":"core-idle","data":false}"#;
        assert_eq!(parse_event(line), Some(MediaEvent::Playing));
        assert_eq!(parse_event(r#"{"event":"playback-restart"}"#), Some(MediaEvent::Playing));
    }

    #[test]
    fn end_file_error_is_a_stream_error() {
        let line = r#"{"event":"end-file","reason":"error","file_error":"loading failed"}"#;
        assert_eq!(parse_event(line), Some(MediaEvent::Error("loading failed".to_string())));
        let eof = r#"{"event":"end-file","reason":"stop"}"#;
        assert_eq!(parse_event(eof), None);
    }

    #[test]
    fn ignores_command_replies() {
        assert_eq!(parse_event(r#"{"request_id":0,"error":"success"}"#), None);
        assert_eq!(parse_event("not json"), None);
    }
}
