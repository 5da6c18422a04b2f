//! Recurring execution of `wacs --renew`.

use async_trait::async_trait;

use crate::settings::Settings;

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Makes sure the OS runs the renewal batch periodically, creating or replacing the task.
    async fn ensure_task_exists(&self, settings: &Settings) -> eyre::Result<()>;
}

/// Leaves scheduling to the administrator and logs the command to schedule.
#[derive(Debug, Default)]
pub struct ManualScheduler;

impl ManualScheduler {
    pub fn command() -> String {
        let exe = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "wacs".to_owned());

        format!("{exe} --renew")
    }
}

#[async_trait]
impl TaskScheduler for ManualScheduler {
    async fn ensure_task_exists(&self, settings: &Settings) -> eyre::Result<()> {
        log::info!(
            "Schedule `{}` to run daily (config in {})",
            Self::command(),
            settings.paths.config.display()
        );
        Ok(())
    }
}
