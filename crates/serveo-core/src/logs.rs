//! Relays tunnel container output to the caller

use crate::tunnel::tunnel_container_name;
use crate::{Project, Result};
use futures::StreamExt;
use serveo_provider::{ContainerId, ContainerProvider, LogConfig, ProviderError};
use std::io::Write;

/// Destination of relayed output: a standard and an error channel
pub trait OutputSink: Send {
    fn write_out(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn write_err(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Writes to the process's stdout and stderr
#[derive(Debug, Default)]
pub struct StdioSink;

impl OutputSink for StdioSink {
    fn write_out(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(data)?;
        out.flush()
    }

    fn write_err(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut err = std::io::stderr().lock();
        err.write_all(data)?;
        err.flush()
    }
}

/// Collects output in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    pub out: Vec<u8>,
    pub err: Vec<u8>,
}

impl BufferSink {
    pub fn out_str(&self) -> String {
        String::from_utf8_lossy(&self.out).to_string()
    }

    pub fn err_str(&self) -> String {
        String::from_utf8_lossy(&self.err).to_string()
    }
}

impl OutputSink for BufferSink {
    fn write_out(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.out.extend_from_slice(data);
        Ok(())
    }

    fn write_err(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.err.extend_from_slice(data);
        Ok(())
    }
}

pub struct LogRelay<'a> {
    provider: &'a dyn ContainerProvider,
    tail: u64,
}

impl<'a> LogRelay<'a> {
    pub fn new(provider: &'a dyn ContainerProvider, tail: u64) -> Self {
        Self { provider, tail }
    }

    /// Follow the project's tunnel output until the stream closes.
    ///
    /// A missing container is not an error. Stream errors go to the sink's
    /// error channel and relaying continues with whatever follows. A reader
    /// that hangs up (`serveo logs | head`) ends the relay cleanly.
    pub async fn stream_logs(&self, project: &Project, sink: &mut dyn OutputSink) -> Result<()> {
        let name = ContainerId::new(tunnel_container_name(project));
        let id = match self.provider.inspect(&name).await {
            Ok(details) => details.id,
            Err(ProviderError::ContainerNotFound(_)) => {
                tracing::debug!("No tunnel container {}, nothing to show", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let config = LogConfig {
            follow: true,
            stdout: true,
            stderr: true,
            tail: Some(self.tail),
            timestamps: false,
        };
        let mut logs = self.provider.logs(&id, &config).await?;

        while let Some(item) = logs.stream.next().await {
            let written = match item {
                Ok(chunk) => sink.write_out(chunk.bytes()),
                Err(ProviderError::ContainerNotFound(_)) => {
                    tracing::debug!("Tunnel container {} went away", id);
                    break;
                }
                Err(e) => sink.write_err(format!("{}\n", e).as_bytes()),
            };
            match written {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("Log reader closed, stopping relay for {}", id);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider};
    use serveo_provider::{ContainerStatus, LogChunk, ProviderType};

    fn shop() -> Project {
        Project::new("42", "shop", "/work/shop")
    }

    #[tokio::test]
    async fn test_absent_container_returns_quietly() {
        let mock = MockProvider::new(ProviderType::Docker);
        let mut sink = BufferSink::default();

        LogRelay::new(&mock, 5)
            .stream_logs(&shop(), &mut sink)
            .await
            .unwrap();
        assert!(sink.out.is_empty());
        assert!(sink.err.is_empty());
    }

    #[tokio::test]
    async fn test_chunks_are_forwarded_verbatim() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", "wocker-serveo", ContainerStatus::Running);
        mock.push_log(Ok(LogChunk::Stdout(b"Forwarding HTTP traffic from ".to_vec())));
        mock.push_log(Ok(LogChunk::Stdout(b"https://myshop.serveo.net\n".to_vec())));
        mock.push_log(Ok(LogChunk::Stderr(b"\x1b[32mok\x1b[0m\n".to_vec())));
        let mut sink = BufferSink::default();

        LogRelay::new(&mock, 5)
            .stream_logs(&shop(), &mut sink)
            .await
            .unwrap();
        assert_eq!(
            sink.out,
            b"Forwarding HTTP traffic from https://myshop.serveo.net\n\x1b[32mok\x1b[0m\n".to_vec()
        );
        let id = mock.container("serveo-42").unwrap().id;
        assert!(mock.was_called(&MockCall::Logs {
            id,
            follow: true,
            tail: Some(5),
        }));
    }

    #[tokio::test]
    async fn test_stream_errors_go_to_error_channel() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", "wocker-serveo", ContainerStatus::Running);
        mock.push_log(Ok(LogChunk::Stdout(b"before\n".to_vec())));
        mock.push_log(Err("connection reset".to_string()));
        mock.push_log(Ok(LogChunk::Stdout(b"after\n".to_vec())));
        let mut sink = BufferSink::default();

        LogRelay::new(&mock, 5)
            .stream_logs(&shop(), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.out_str(), "before\nafter\n");
        assert!(sink.err_str().contains("connection reset"));
    }

    /// Accepts `limit` writes, then fails like a closed pipe or a full disk
    struct ClosingSink {
        writes: usize,
        limit: usize,
        kind: std::io::ErrorKind,
    }

    impl ClosingSink {
        fn new(limit: usize, kind: std::io::ErrorKind) -> Self {
            Self {
                writes: 0,
                limit,
                kind,
            }
        }

        fn write(&mut self) -> std::io::Result<()> {
            if self.writes >= self.limit {
                return Err(std::io::Error::from(self.kind));
            }
            self.writes += 1;
            Ok(())
        }
    }

    impl OutputSink for ClosingSink {
        fn write_out(&mut self, _data: &[u8]) -> std::io::Result<()> {
            self.write()
        }

        fn write_err(&mut self, _data: &[u8]) -> std::io::Result<()> {
            self.write()
        }
    }

    #[tokio::test]
    async fn test_closed_reader_ends_relay() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", "wocker-serveo", ContainerStatus::Running);
        for line in ["one\n", "two\n", "three\n"] {
            mock.push_log(Ok(LogChunk::Stdout(line.as_bytes().to_vec())));
        }
        let mut sink = ClosingSink::new(1, std::io::ErrorKind::BrokenPipe);

        LogRelay::new(&mock, 5)
            .stream_logs(&shop(), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.writes, 1);
    }

    #[tokio::test]
    async fn test_closed_reader_on_error_channel_ends_relay() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", "wocker-serveo", ContainerStatus::Running);
        mock.push_log(Err("connection reset".to_string()));
        mock.push_log(Ok(LogChunk::Stdout(b"after\n".to_vec())));
        let mut sink = ClosingSink::new(0, std::io::ErrorKind::BrokenPipe);

        LogRelay::new(&mock, 5)
            .stream_logs(&shop(), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.writes, 0);
    }

    #[tokio::test]
    async fn test_other_write_errors_propagate() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", "wocker-serveo", ContainerStatus::Running);
        mock.push_log(Ok(LogChunk::Stdout(b"one\n".to_vec())));
        let mut sink = ClosingSink::new(0, std::io::ErrorKind::PermissionDenied);

        let result = LogRelay::new(&mock, 5).stream_logs(&shop(), &mut sink).await;
        assert!(matches!(result, Err(crate::CoreError::Io(_))));
    }
}
