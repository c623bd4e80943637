use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, Command};
use tracing::debug;

/// A task's command line running as a local child process.
///
/// Kickoff does not capture stdout or stderr; the child inherits the
/// worker's streams and any data transfer is the command's own business.
pub struct TaskProcess {
    child: Child,
}

impl TaskProcess {
    /// Spawn `sh -c <command>`. The child is killed if the worker drops it.
    pub fn spawn(command: &str) -> io::Result<TaskProcess> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .spawn()?;
        Ok(TaskProcess { child })
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the child and reap it. Losing the race against a natural exit
    /// is fine; the wait below settles it either way.
    pub async fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "kill raced with process exit");
        }
        self.child.wait().await
    }
}
