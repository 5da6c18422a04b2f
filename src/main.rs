use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use wacs::{
    input::{ConsoleInput, InputService, Unattended},
    plugins::{PluginContext, PluginRegistry, PluginResolver, RunLevel},
    scheduler::{ManualScheduler, TaskScheduler as _},
    setup, AcmeClient, FileRenewalStore, RenewalExecutor, RenewalStore as _, Settings,
};

/// Keeps ACME certificates renewed. Without arguments a new renewal is created interactively.
#[derive(Parser, Debug)]
#[command(name = "wacs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run every renewal that is due, without interaction
    #[arg(long)]
    renew: bool,

    /// Renew even when not due yet
    #[arg(long, requires = "renew")]
    force: bool,

    /// Offer every option while creating a renewal
    #[arg(long, conflicts_with = "renew")]
    advanced: bool,

    /// Settings file
    #[arg(long, value_name = "FILE", default_value = "settings.toml")]
    settings: PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    let settings = Arc::new(Settings::load(&args.settings)?);
    let http = settings.http.client()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Cancelling, waiting for cleanup to finish");
                cancel.cancel();
            }
        }
    });

    let input: Arc<dyn InputService> = if args.renew {
        Arc::new(Unattended)
    } else {
        Arc::new(ConsoleInput::new())
    };

    let ctx = PluginContext {
        settings: settings.clone(),
        input: input.clone(),
        http: http.clone(),
    };
    let registry = PluginRegistry::builtin();
    let store = FileRenewalStore::new(&settings.paths.config);

    let success = if args.renew {
        let run_level = if args.force {
            RunLevel::UNATTENDED.forced()
        } else {
            RunLevel::UNATTENDED
        };

        let acme = AcmeClient::connect(&settings, http).await?;
        RenewalExecutor::new(&registry, &ctx, &acme, cancel)
            .renew_all(&store, run_level)
            .await?
            .success()
    } else {
        let run_level = if args.advanced {
            RunLevel::ADVANCED
        } else {
            RunLevel::SIMPLE
        };

        let resolver = PluginResolver::new(&registry, &ctx, run_level);
        let mut renewal = setup::create_renewal(&resolver, input.as_ref()).await?;

        let acme = AcmeClient::connect(&settings, http).await?;
        let result = RenewalExecutor::new(&registry, &ctx, &acme, cancel)
            .execute(&mut renewal, run_level)
            .await;

        store.save(&mut renewal).await?;
        ManualScheduler.ensure_task_exists(&settings).await?;

        result.is_some_and(|result| result.success)
    };

    if !success {
        std::process::exit(1);
    }

    Ok(())
}
