//! Background draining of server output.
//!
//! The pump owns one Tokio task per process lifetime. It reads stdout and
//! stderr as bytes arrive, decodes them incrementally, classifies each chunk
//! and posts it to the supervisor's event queue. It never calls into the
//! rendering side directly.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::console::{ClassifiedLine, OutputCategory, OutputChunk, OutputSource, Utf8StreamDecoder};
use crate::supervisor::{SupervisorError, SupervisorEvent};

/// Default read size, matching the server console's own buffer.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Default bound on waiting for the pump task to finish.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a pump task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// All streams reached end of file.
    Drained,
    /// Stopped by the cancellation token.
    Cancelled,
    /// Did not stop within the bound and was aborted.
    Aborted,
}

/// Handle to a running output pump.
#[derive(Debug)]
pub struct OutputPump {
    cancel: CancellationToken,
    stopping: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl OutputPump {
    /// Start pumping `stdout` and, if present, `stderr` into `sink`.
    pub fn start<O, E>(
        stdout: O,
        stderr: Option<E>,
        sink: UnboundedSender<SupervisorEvent>,
        buffer_size: usize,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stopping = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_stopping = stopping.clone();
        let buffer_size = buffer_size.max(1);

        let handle = tokio::spawn(async move {
            let out = StreamReader::new(stdout, OutputSource::Stdout, buffer_size);
            let err = stderr.map(|e| StreamReader::new(e, OutputSource::Stderr, buffer_size));
            run(out, err, &sink, &task_cancel, &task_stopping).await;
            tracing::debug!("Output pump finished");
        });

        Self {
            cancel,
            stopping,
            handle: Some(handle),
        }
    }

    /// Mark the process as going away. The pump keeps draining, but read
    /// errors from here on are expected and only logged.
    pub fn mark_stopping(&self) {
        self.stopping.cancel();
    }

    /// Whether the pump task has already ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `grace` for the streams to drain, then cancel and wait up
    /// to `grace` again.
    pub async fn join(mut self, grace: Duration) -> PumpExit {
        let Some(mut handle) = self.handle.take() else {
            return PumpExit::Drained;
        };

        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            return PumpExit::Drained;
        }

        tracing::debug!(grace_ms = grace.as_millis(), "Output pump still running, cancelling");
        self.cancel.cancel();
        Self::await_cancelled(handle, grace).await
    }

    /// Cancel immediately and wait up to `grace` for the task to end.
    pub async fn stop(mut self, grace: Duration) -> PumpExit {
        let Some(handle) = self.handle.take() else {
            return PumpExit::Drained;
        };
        if handle.is_finished() {
            return PumpExit::Drained;
        }
        self.cancel.cancel();
        Self::await_cancelled(handle, grace).await
    }

    async fn await_cancelled(mut handle: JoinHandle<()>, grace: Duration) -> PumpExit {
        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            PumpExit::Cancelled
        } else {
            tracing::warn!("Output pump did not stop in time, aborting");
            handle.abort();
            PumpExit::Aborted
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

async fn run<O, E>(
    mut out: StreamReader<O>,
    mut err: Option<StreamReader<E>>,
    sink: &UnboundedSender<SupervisorEvent>,
    cancel: &CancellationToken,
    stopping: &CancellationToken,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    loop {
        let out_open = !out.closed;
        let err_open = err.as_ref().is_some_and(|r| !r.closed);
        if !out_open && !err_open {
            break;
        }

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!("Output pump cancelled");
                break;
            }
            read = out.read(), if out_open => {
                out.handle(read, sink, stopping);
            }
            read = read_optional(&mut err), if err_open => {
                if let Some(reader) = err.as_mut() {
                    reader.handle(read, sink, stopping);
                }
            }
        }
    }
}

async fn read_optional<R: AsyncRead + Unpin>(
    reader: &mut Option<StreamReader<R>>,
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read().await,
        None => std::future::pending().await,
    }
}

struct StreamReader<R> {
    reader: R,
    source: OutputSource,
    buf: Vec<u8>,
    decoder: Utf8StreamDecoder,
    closed: bool,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    fn new(reader: R, source: OutputSource, buffer_size: usize) -> Self {
        Self {
            reader,
            source,
            buf: vec![0; buffer_size],
            decoder: Utf8StreamDecoder::new(),
            closed: false,
        }
    }

    /// Cancel safe: a dropped read consumes no bytes.
    async fn read(&mut self) -> std::io::Result<usize> {
        self.reader.read(&mut self.buf).await
    }

    fn handle(
        &mut self,
        read: std::io::Result<usize>,
        sink: &UnboundedSender<SupervisorEvent>,
        stopping: &CancellationToken,
    ) {
        match read {
            Ok(0) => {
                self.closed = true;
                if let Some(tail) = self.decoder.finish() {
                    self.emit(tail, sink);
                }
                tracing::debug!(source = ?self.source, "Output stream closed");
            }
            Ok(n) => {
                let text = self.decoder.decode(&self.buf[..n]);
                if !text.is_empty() {
                    self.emit(text, sink);
                }
            }
            Err(e) => {
                self.closed = true;
                if stopping.is_cancelled() {
                    tracing::debug!(source = ?self.source, error = %e, "Read failed after stop");
                } else {
                    tracing::warn!(source = ?self.source, error = %e, "Read failed");
                    let message = SupervisorError::ReadFailed(e).to_string();
                    let _ = sink.send(SupervisorEvent::Output(ClassifiedLine::notice(
                        message,
                        OutputCategory::Error,
                    )));
                }
            }
        }
    }

    fn emit(&self, text: String, sink: &UnboundedSender<SupervisorEvent>) {
        let line = ClassifiedLine::from_chunk(OutputChunk::new(text, self.source));
        // A closed queue means nobody renders; keep draining so the child
        // never blocks on a full pipe.
        let _ = sink.send(SupervisorEvent::Output(line));
    }
}
