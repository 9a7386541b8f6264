//! Flash task: erase requests, flash logging and the persisted system state.

use crate::command::{Command, CommandKind, TaskOpcode};
use crate::hardware::{FlashController, PersistedState, SystemStorage};
use crate::queue::CommandReceiver;
use tracing::{info, warn};

pub struct FlashTask {
    flash: Box<dyn FlashController>,
    storage: Box<dyn SystemStorage>,
    logging: bool,
}

impl FlashTask {
    pub fn new(flash: Box<dyn FlashController>, storage: Box<dyn SystemStorage>) -> Self {
        Self {
            flash,
            storage,
            logging: false,
        }
    }

    pub fn logging(&self) -> bool {
        self.logging
    }

    pub async fn run(mut self, mut rx: CommandReceiver) {
        while let Some(cmd) = rx.receive_wait().await {
            self.handle_command(cmd);
        }
    }

    pub fn handle_command(&mut self, cmd: Command) {
        if cmd.kind() != CommandKind::TaskSpecific {
            warn!("FlashTask - Received Unsupported Command {{{:?}}}", cmd.kind());
            return;
        }

        match TaskOpcode::try_from(cmd.opcode()) {
            Ok(TaskOpcode::EraseAllFlash) => {
                warn!("FlashTask - erasing all flash");
                match self.flash.erase_all() {
                    Ok(()) => info!("FlashTask - flash erase complete"),
                    Err(e) => warn!("FlashTask - {}", e),
                }
            }
            Ok(TaskOpcode::WriteSystemState) => match cmd.copy_data::<PersistedState>() {
                Ok(state) => {
                    if let Err(e) = self.storage.write(&state) {
                        warn!("FlashTask - {}", e);
                    }
                }
                Err(e) => warn!("FlashTask - bad system state record: {}", e),
            },
            Ok(TaskOpcode::FlashLogEnable) => self.set_logging(true),
            Ok(TaskOpcode::FlashLogDisable) => self.set_logging(false),
            Ok(other) => warn!("FlashTask - Received Unsupported TASK_SPECIFIC_COMMAND {:?}", other),
            Err(opcode) => warn!("FlashTask - Received Unsupported TASK_SPECIFIC_COMMAND {{{}}}", opcode),
        }
    }

    fn set_logging(&mut self, enabled: bool) {
        self.logging = enabled;
        self.flash.set_logging(enabled);
        info!("FlashTask - flash logging {}", if enabled { "enabled" } else { "disabled" });
    }
}
