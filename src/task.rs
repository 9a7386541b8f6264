//! The scheduling unit.
//!
//! A [`Task`] owns one command queue. It is constructed at startup, handed its
//! run loop exactly once through [`Task::init`], and then runs until the
//! process ends. Other components only ever see a [`TaskHandle`].

use crate::command::Command;
use crate::config::{TaskConfig, DEFAULT_QUEUE_SEND_WAIT_MS};
use crate::queue::{command_queue, CommandReceiver, CommandSender, IsrSender};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug)]
pub struct Task {
    name: &'static str,
    priority: u8,
    sender: CommandSender,
    receiver: Option<CommandReceiver>,
    join: Option<JoinHandle<()>>,
}

impl Task {
    pub fn new(name: &'static str, config: TaskConfig) -> Self {
        let (sender, receiver) = command_queue(config.queue_depth);
        Self {
            name,
            priority: config.priority,
            sender,
            receiver: Some(receiver),
            join: None,
        }
    }

    /// Spawns the run loop. `entry` receives the task's queue receiver.
    ///
    /// Initializing a task twice is a startup programming error and halts.
    pub fn init<F, Fut>(&mut self, entry: F)
    where
        F: FnOnce(CommandReceiver) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        crate::halt_unless!(self.join.is_none(), "Cannot initialize {} twice", self.name);
        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => crate::halt!("{}::init - command queue already consumed", self.name),
        };

        let span = info_span!("task", name = self.name, priority = self.priority);
        self.join = Some(tokio::spawn(entry(receiver).instrument(span)));
        info!(task = self.name, priority = self.priority, "task started");
    }

    pub fn is_initialized(&self) -> bool {
        self.join.is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            name: self.name,
            sender: self.sender.clone(),
        }
    }

    /// Stops the run loop. Only used when the hosted runtime shuts down.
    pub fn abort(&self) {
        if let Some(join) = &self.join {
            join.abort();
        }
    }
}

/// Cloneable address of a task's queue.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    name: &'static str,
    sender: CommandSender,
}

impl TaskHandle {
    /// Builds a handle around an existing queue, for components that are not
    /// spawned through [`Task`].
    pub fn from_sender(name: &'static str, sender: CommandSender) -> Self {
        Self { name, sender }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Sends with the default bounded wait. A full queue is reported, not
    /// fatal; the rejected command is dropped here.
    pub async fn send_command(&self, cmd: Command) -> bool {
        let wait = Duration::from_millis(DEFAULT_QUEUE_SEND_WAIT_MS);
        match self.sender.send_timeout(cmd, wait).await {
            Ok(()) => true,
            Err(e) => {
                warn!(task = self.name, "send_command failed: {}", e);
                false
            }
        }
    }

    pub fn isr_sender(&self) -> IsrSender {
        self.sender.isr_sender()
    }

    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}
