//! Queue listener
//!
//! Pulls [`QueueMessage`]s off a [`JobQueue`], resolves their stack
//! reference, runs the job on the executor and replies with exactly one
//! [`Response`] per message. Jobs run concurrently, but no more messages
//! are taken off the queue than the executor has pool slots; replies are
//! written in completion order.

use crate::error::{Result, WorkerError};
use crate::executor::JobExecutor;
use crate::job::{Job, QueueMessage};
use crate::response::Response;
use crate::stack::StackCatalog;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

const REPLY_CHANNEL_SIZE: usize = 64;

#[async_trait]
pub trait JobQueue: Send {
    /// Next message, or `None` once the queue is drained
    async fn receive(&mut self) -> Result<Option<QueueMessage>>;

    async fn reply(&mut self, response: &Response) -> Result<()>;
}

/// Queue over a line-oriented stream: one JSON message per input line, one
/// YAML document per reply
pub struct LinesQueue<R, W> {
    lines: Lines<R>,
    writer: W,
}

impl<R, W> LinesQueue<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: reader.lines(),
            writer,
        }
    }
}

#[async_trait]
impl<R, W> JobQueue for LinesQueue<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<QueueMessage>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => tracing::warn!("Skipping malformed queue message: {}", e),
            }
        }
        Ok(None)
    }

    async fn reply(&mut self, response: &Response) -> Result<()> {
        let document = format!("---\n{}", response.dump_yaml()?);
        self.writer.write_all(document.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Listener {
    catalog: Arc<dyn StackCatalog>,
    executor: Arc<JobExecutor>,
    /// One permit per message taken off the queue and not yet replied to
    intake: Arc<Semaphore>,
}

impl Listener {
    pub fn new(catalog: Arc<dyn StackCatalog>, executor: Arc<JobExecutor>) -> Self {
        let intake = Arc::new(Semaphore::new(executor.pool_size()));
        Self {
            catalog,
            executor,
            intake,
        }
    }

    /// Resolve and run one message
    pub async fn handle(&self, message: QueueMessage) -> Response {
        let QueueMessage {
            job_name,
            request_id,
            stack_reference,
        } = message;

        match self.catalog.find(&stack_reference) {
            Ok(Some(stack)) => {
                tracing::info!(
                    job = %job_name,
                    request_id = %request_id,
                    "Running job for stack {}",
                    stack_reference
                );
                self.executor
                    .submit(Job::new(job_name, request_id, stack))
                    .await
            }
            Ok(None) | Err(WorkerError::InvalidReference(_)) => {
                tracing::warn!(
                    job = %job_name,
                    request_id = %request_id,
                    "No stack named {}",
                    stack_reference
                );
                Response::rejected(
                    job_name,
                    request_id,
                    format!("Job not found: no stack named '{}'", stack_reference),
                )
            }
            Err(e) => {
                tracing::error!(job = %job_name, request_id = %request_id, "{:?}", e);
                Response::failure(job_name, request_id, &e.to_string())
            }
        }
    }

    /// Serve `queue` until it is drained and every job has replied
    pub async fn serve<Q: JobQueue>(&self, queue: &mut Q) -> Result<()> {
        enum Event {
            Received(Result<Option<QueueMessage>>),
            Finished(Response, Option<OwnedSemaphorePermit>),
        }

        let (tx, mut rx) =
            mpsc::channel::<(Response, Option<OwnedSemaphorePermit>)>(REPLY_CHANNEL_SIZE);
        let mut open = true;
        let mut in_flight = 0usize;
        let mut slot: Option<OwnedSemaphorePermit> = None;

        while open || in_flight > 0 {
            if open && slot.is_none() {
                slot = self.intake.clone().try_acquire_owned().ok();
            }

            let event = tokio::select! {
                received = queue.receive(), if open && slot.is_some() => Event::Received(received),
                Some((response, permit)) = rx.recv() => Event::Finished(response, permit),
            };

            match event {
                Event::Received(Ok(Some(message))) => {
                    let permit = slot.take();
                    in_flight += 1;
                    let listener = self.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = listener.handle(message).await;
                        if tx.send((response, permit)).await.is_err() {
                            tracing::error!("Reply channel closed before job finished");
                        }
                    });
                }
                Event::Received(Ok(None)) => {
                    tracing::info!("Queue drained; waiting for {} job(s)", in_flight);
                    open = false;
                }
                Event::Received(Err(e)) => {
                    tracing::error!("Failed to read queue: {}", e);
                    open = false;
                }
                Event::Finished(response, permit) => {
                    in_flight -= 1;
                    queue.reply(&response).await?;
                    drop(permit);
                }
            }
        }
        Ok(())
    }
}
