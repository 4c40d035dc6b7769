//! Session driver that runs an external command
//!
//! The command runs one conversation and reports progress on stdout as
//! newline-delimited JSON ([`SessionMessage`]). Anything else it prints is
//! passed through to the debug log.

use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PhaseHooks, Session, SessionDriver, SessionError};
use crate::events::SessionMessage;

/// Lines of stderr kept for the failure message
const STDERR_TAIL: usize = 5;

pub struct CommandDriver {
    command: String,
}

impl CommandDriver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl SessionDriver for CommandDriver {
    type Session = CommandSession;

    async fn start(&mut self, hooks: PhaseHooks) -> Result<CommandSession, SessionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // own group, so ending the session reaches the shell's children too
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Start(format!("{}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Start("session stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::Start("session stderr unavailable".into()))?;

        info!(pid = ?child.id(), "session process started");

        Ok(CommandSession {
            child,
            messages: Some(tokio::spawn(read_messages(stdout, hooks))),
            stderr: Some(tokio::spawn(read_stderr(stderr))),
        })
    }
}

pub struct CommandSession {
    child: Child,
    messages: Option<JoinHandle<Option<String>>>,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl CommandSession {
    async fn finish(&mut self, status: ExitStatus) -> Result<Option<String>, SessionError> {
        // handles stay in place until joined so a cancelled wait can still abort them
        let conversation_id = match self.messages.as_mut() {
            Some(task) => task.await.unwrap_or(None),
            None => None,
        };
        self.messages = None;
        let tail = match self.stderr.as_mut() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        self.stderr = None;

        if status.success() {
            Ok(conversation_id)
        } else {
            Err(SessionError::Failed(format!("{status}: {}", tail.join(" | "))))
        }
    }

    /// Stop reading output; no hook fires after this
    fn abort_readers(&mut self) {
        if let Some(task) = self.messages.take() {
            task.abort();
        }
        if let Some(task) = self.stderr.take() {
            task.abort();
        }
    }

    /// SIGKILL the session's whole process group while the shell is unreaped
    fn kill_group(&self) {
        let Some(pgid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => info!(pgid, "session process group killed"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid, error = %e, "could not kill session process group"),
        }
    }
}

impl Session for CommandSession {
    async fn wait_for_end(&mut self) -> Result<Option<String>, SessionError> {
        let status = self.child.wait().await?;
        debug!(%status, "session process exited");
        self.finish(status).await
    }

    async fn end(&mut self) -> Result<(), SessionError> {
        self.abort_readers();
        self.kill_group();
        match self.child.start_kill() {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        let status = self.child.wait().await?;
        debug!(%status, "session process exited");
        Ok(())
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        self.abort_readers();
        self.kill_group();
    }
}

async fn read_messages(stdout: ChildStdout, hooks: PhaseHooks) -> Option<String> {
    let mut lines = BufReader::new(stdout).lines();
    let mut conversation_id = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading session output");
                break;
            }
        };

        let message = match serde_json::from_str::<SessionMessage>(&line) {
            Ok(message) => message,
            Err(_) => {
                debug!(output = %line, "session output");
                continue;
            }
        };

        match &message {
            SessionMessage::UserTranscript { .. } => {
                info!("{message}");
                hooks.on_thinking();
            }
            SessionMessage::AgentResponse { .. } | SessionMessage::AgentResponseCorrection { .. } => {
                info!("{message}");
                hooks.on_speaking();
            }
            SessionMessage::SessionEnded { conversation_id: id } => {
                debug!("{message}");
                conversation_id = id.clone();
            }
        }
    }

    conversation_id
}

async fn read_stderr<R: AsyncRead + Unpin>(stderr: R) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(output = %line, "session stderr");
        if tail.len() == STDERR_TAIL {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::indicator::device::recording::RecordingDevice;
    use crate::indicator::{IndicatorState, StatusIndicator};

    fn hooks() -> (PhaseHooks, StatusIndicator) {
        let indicator = StatusIndicator::spawn(Box::new(RecordingDevice::default()), Duration::ZERO);
        (PhaseHooks::new(indicator.clone()), indicator)
    }

    #[tokio::test]
    async fn test_messages_drive_phases() {
        let (hooks, indicator) = hooks();
        let script = r#"
            echo '{"type":"user_transcript","text":"hej"}'
            echo 'some library chatter'
            echo '{"type":"agent_response","text":"hallå"}'
            echo '{"type":"session_ended","conversation_id":"conv-1"}'
        "#;
        let mut driver = CommandDriver::new(script);
        let mut session = driver.start(hooks).await.unwrap();
        let id = session.wait_for_end().await.unwrap();
        assert_eq!(id.as_deref(), Some("conv-1"));

        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.state, IndicatorState::Speaking);
    }

    #[tokio::test]
    async fn test_transcript_only_leaves_thinking() {
        let (hooks, indicator) = hooks();
        let mut driver = CommandDriver::new(r#"echo '{"type":"user_transcript","text":"?"}'"#);
        let mut session = driver.start(hooks).await.unwrap();
        assert_eq!(session.wait_for_end().await.unwrap(), None);
        assert_eq!(indicator.snapshot().await.unwrap().state, IndicatorState::Thinking);
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let (hooks, _indicator) = hooks();
        let mut driver = CommandDriver::new("echo 'needs_authorization' >&2; exit 3");
        let mut session = driver.start(hooks).await.unwrap();
        let err = session.wait_for_end().await.unwrap_err();
        assert!(matches!(err, SessionError::Failed(_)));
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn test_end_stops_long_session() {
        let (hooks, _indicator) = hooks();
        let mut driver = CommandDriver::new("sleep 30");
        let mut session = driver.start(hooks).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.end())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_stops_compound_command() {
        // the shell forks here, so `sleep` holds stdout open after sh dies
        let (hooks, _indicator) = hooks();
        let mut driver = CommandDriver::new("cd / && sleep 30; echo done");
        let mut session = driver.start(hooks).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.end())
            .await
            .expect("end() must not wait for the shell's children")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wait_then_end_silences_hooks() {
        let (hooks, indicator) = hooks();
        let script = r#"
            sleep 1
            echo '{"type":"agent_response","text":"late"}'
            sleep 30
        "#;
        let mut driver = CommandDriver::new(script);
        let mut session = driver.start(hooks).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(100), session.wait_for_end()).await;
        assert!(waited.is_err());
        tokio::time::timeout(Duration::from_secs(5), session.end())
            .await
            .unwrap()
            .unwrap();
        indicator.idle().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(indicator.snapshot().await.unwrap().state, IndicatorState::Idle);
    }
}
