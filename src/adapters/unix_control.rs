use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::Mutex,
    time::timeout,
};

use crate::ports::control_channel::{ControlChannel, ControlChannelError, ControlChannelResult};

/// Control channel over the proxy's stats socket.
///
/// Every command opens a fresh connection; the proxy closes it after
/// replying. Commands are serialized through an internal lock since the
/// socket does not cope well with concurrent sessions.
pub struct UnixControlSocket {
    path: PathBuf,
    timeout: Duration,
    lock: Mutex<()>,
}

impl UnixControlSocket {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            lock: Mutex::new(()),
        }
    }

    fn timed_out(&self) -> ControlChannelError {
        ControlChannelError::Timeout {
            path: self.path.display().to_string(),
            millis: self.timeout.as_millis(),
        }
    }

    async fn round_trip(&self, command: &str) -> ControlChannelResult<String> {
        let mut stream = match timeout(self.timeout, UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ControlChannelError::Unavailable {
                    path: self.path.display().to_string(),
                    source,
                });
            }
            Err(_) => return Err(self.timed_out()),
        };

        let send = async {
            stream.write_all(command.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        match timeout(self.timeout, send).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out()),
        }

        let mut reply = String::new();
        match timeout(self.timeout, stream.read_to_string(&mut reply)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(self.timed_out()),
        }
        Ok(reply)
    }
}

#[async_trait]
impl ControlChannel for UnixControlSocket {
    async fn execute(&self, command: &str) -> ControlChannelResult<String> {
        let _guard = self.lock.lock().await;
        tracing::debug!("Sending '{}' to {}", command, self.path.display());
        let reply = self.round_trip(command.trim_end()).await?;
        tracing::trace!("Reply to '{}': {} bytes", command, reply.len());
        Ok(reply)
    }
}
