//! User interaction used by interactive setup and by plugins that need an operator.

use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use eyre::{bail, WrapErr as _};
use tokio::sync::Mutex;

use crate::error::ConfigurationError;

#[async_trait]
pub trait InputService: Send + Sync {
    /// Asks the user to pick one of `options`, returning its index.
    async fn choose(&self, question: &str, options: &[String]) -> eyre::Result<usize>;

    /// Asks for a line of free text. The answer is trimmed.
    async fn request_string(&self, question: &str) -> eyre::Result<String>;

    async fn confirm(&self, question: &str, default: bool) -> eyre::Result<bool>;

    /// Displays a labelled value, e.g. a DNS record to create.
    async fn show(&self, label: &str, value: &str);

    /// Blocks until the user acknowledges `message`.
    async fn wait(&self, message: &str) -> eyre::Result<()>;
}

/// Input for scheduled runs. Every question is a configuration error.
#[derive(Debug, Default)]
pub struct Unattended;

#[async_trait]
impl InputService for Unattended {
    async fn choose(&self, question: &str, _options: &[String]) -> eyre::Result<usize> {
        Err(unavailable(question))
    }

    async fn request_string(&self, question: &str) -> eyre::Result<String> {
        Err(unavailable(question))
    }

    async fn confirm(&self, _question: &str, default: bool) -> eyre::Result<bool> {
        Ok(default)
    }

    async fn show(&self, label: &str, value: &str) {
        log::info!("{label}: {value}");
    }

    async fn wait(&self, message: &str) -> eyre::Result<()> {
        Err(unavailable(message))
    }
}

fn unavailable(question: &str) -> eyre::Report {
    ConfigurationError::Invalid(format!("user input required in unattended mode: {question}")).into()
}

/// Terminal prompts through `dialoguer`.
///
/// Prompts block, so they run on the blocking thread pool. Only one prompt is shown at a time.
#[derive(Default)]
pub struct ConsoleInput {
    terminal: Mutex<()>,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self::default()
    }

    async fn prompt<T, F>(&self, prompt: F) -> eyre::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ColorfulTheme) -> dialoguer::Result<T> + Send + 'static,
    {
        let _terminal = self.terminal.lock().await;

        let answer = tokio::task::spawn_blocking(move || prompt(&ColorfulTheme::default()))
            .await
            .wrap_err("prompt was interrupted")?;

        Ok(answer?)
    }
}

#[async_trait]
impl InputService for ConsoleInput {
    async fn choose(&self, question: &str, options: &[String]) -> eyre::Result<usize> {
        if options.is_empty() {
            bail!("nothing to choose from: {question}");
        }

        let question = question.to_owned();
        let options = options.to_vec();

        self.prompt(move |theme| {
            Select::with_theme(theme)
                .with_prompt(question)
                .items(&options)
                .default(0)
                .interact()
        })
        .await
    }

    async fn request_string(&self, question: &str) -> eyre::Result<String> {
        let question = question.to_owned();

        let answer = self
            .prompt(move |theme| {
                Input::<String>::with_theme(theme)
                    .with_prompt(question)
                    .allow_empty(true)
                    .interact_text()
            })
            .await?;

        Ok(answer.trim().to_owned())
    }

    async fn confirm(&self, question: &str, default: bool) -> eyre::Result<bool> {
        let question = question.to_owned();

        self.prompt(move |theme| {
            Confirm::with_theme(theme)
                .with_prompt(question)
                .default(default)
                .interact()
        })
        .await
    }

    async fn show(&self, label: &str, value: &str) {
        let _terminal = self.terminal.lock().await;
        println!(" {label}: {value}");
    }

    async fn wait(&self, message: &str) -> eyre::Result<()> {
        let message = format!("{message} (press enter to continue)");

        self.prompt(move |theme| {
            Input::<String>::with_theme(theme)
                .with_prompt(message)
                .allow_empty(true)
                .interact_text()
        })
        .await
        .map(drop)
    }
}
