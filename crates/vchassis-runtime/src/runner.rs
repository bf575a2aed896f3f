use crate::command::{CommandError, CommandOutput, HostCommand};
use crate::RuntimeError;

/// Executes typed host commands. Failures come back already classified, so
/// callers never inspect stderr text.
pub trait CommandRunner: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError>;
}

pub fn select_runner(name: &str, engine: &str) -> Result<Box<dyn CommandRunner>, RuntimeError> {
    match name {
        "host" => Ok(Box::new(crate::host::HostRunner::new(engine))),
        "mock" => Ok(Box::new(crate::mock::SimulatedHost::new())),
        other => Err(RuntimeError::UnknownRunner(other.to_owned())),
    }
}
