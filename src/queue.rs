//! Bounded command queues.
//!
//! A queue has exactly one consumer, the [`CommandReceiver`] held by the
//! owning task, and any number of producers. Task-context producers hold a
//! [`CommandSender`]; interrupt-context producers hold an [`IsrSender`], whose
//! only operation never waits. Every failed send hands the command back so the
//! producer decides what to do with its payload (usually: drop it).

use crate::command::Command;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("command queue full")]
    Full(Command),
    #[error("timed out waiting for queue space")]
    Timeout(Command),
    #[error("command queue closed")]
    Closed(Command),
}

/// Every producer of the queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all producers of the command queue are gone")]
pub struct QueueClosed;

impl QueueError {
    /// Returns the command that could not be enqueued.
    pub fn into_command(self) -> Command {
        match self {
            QueueError::Full(cmd) | QueueError::Timeout(cmd) | QueueError::Closed(cmd) => cmd,
        }
    }
}

/// Creates a queue holding at most `depth` commands.
///
/// A zero depth is a startup programming error and halts.
pub fn command_queue(depth: usize) -> (CommandSender, CommandReceiver) {
    crate::halt_unless!(depth > 0, "command queue creation failed: depth must be non-zero");
    let (tx, rx) = mpsc::channel(depth);
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Task-context producer handle.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Waits as long as needed for space.
    pub async fn send(&self, cmd: Command) -> Result<(), QueueError> {
        self.tx.send(cmd).await.map_err(|e| QueueError::Closed(e.0))
    }

    /// Waits at most `wait` for space.
    pub async fn send_timeout(&self, cmd: Command, wait: Duration) -> Result<(), QueueError> {
        self.tx.send_timeout(cmd, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(cmd) => QueueError::Timeout(cmd),
            SendTimeoutError::Closed(cmd) => QueueError::Closed(cmd),
        })
    }

    /// Never waits.
    pub fn try_send(&self, cmd: Command) -> Result<(), QueueError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(cmd) => QueueError::Full(cmd),
            TrySendError::Closed(cmd) => QueueError::Closed(cmd),
        })
    }

    /// A producer handle restricted to the interrupt-safe operation.
    pub fn isr_sender(&self) -> IsrSender {
        IsrSender { tx: self.tx.clone() }
    }

    /// Commands currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Interrupt-context producer handle.
///
/// Exposes no operation that can suspend the caller.
#[derive(Debug, Clone)]
pub struct IsrSender {
    tx: mpsc::Sender<Command>,
}

impl IsrSender {
    /// Enqueues without waiting. On failure the queue is untouched and the
    /// command is returned so the caller can release its payload.
    pub fn send_from_isr(&self, cmd: Command) -> Result<(), Command> {
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(cmd) | TrySendError::Closed(cmd) => cmd,
        })
    }
}

/// The single consumer end of a queue. Not cloneable.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Blocks until a command arrives. `None` only once every producer is gone.
    pub async fn receive_wait(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Non-blocking poll.
    pub fn receive(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    /// Waits at most `wait` for a command. `Ok(None)` means the wait ran out.
    pub async fn receive_timeout(&mut self, wait: Duration) -> Result<Option<Command>, QueueClosed> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(cmd)) => Ok(Some(cmd)),
            Ok(None) => Err(QueueClosed),
            Err(_elapsed) => Ok(None),
        }
    }
}
