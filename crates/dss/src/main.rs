use core::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use derive_more::Display;
use dss::cluster::KubeCluster;
use dss::config::resolve_kubeconfig_from_env;
use dss::config::Cli;
use dss::config::Commands;
use dss::config::DssConfig;
use dss::output;
use dss::readiness::TokioClock;
use dss::workflow::Dss;
use dss::workflow::WorkflowResult;
use error_stack::Report;
use error_stack::ResultExt;
use utils::logging;
use utils::version;

const LOG_FILE: &str = "logs/dss.log";

#[derive(Debug, Display)]
enum CliError {
    #[display("Failed to load configuration")]
    Config,
    #[display("Failed to connect to the Kubernetes cluster")]
    Connection,
}

impl Error for CliError {}

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(Path::new(LOG_FILE));
    tracing::debug!(version = &**version::VERSION, command = cli.command.name(), "starting dss");

    let command = cli.command.name();
    let dss = match connect(&cli).await {
        Ok(dss) => dss,
        Err(report) => {
            output::report_failure(command, &report);
            return ExitCode::FAILURE;
        }
    };

    match run(&dss, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            output::report_failure(command, &report);
            ExitCode::FAILURE
        }
    }
}

async fn connect(cli: &Cli) -> Result<Dss, Report<CliError>> {
    let config = DssConfig::load(cli.config.as_deref()).change_context(CliError::Config)?;
    let kubeconfig = resolve_kubeconfig_from_env(cli.kubeconfig.clone());
    tracing::debug!(kubeconfig = %kubeconfig.display(), "using kubeconfig");

    let cluster = KubeCluster::connect(&kubeconfig, &config.field_manager)
        .await
        .change_context(CliError::Connection)?;
    Ok(Dss::new(
        Arc::new(cluster),
        Arc::new(TokioClock::new()),
        config,
    ))
}

async fn run(dss: &Dss, command: Commands) -> WorkflowResult<()> {
    match command {
        Commands::Initialize => dss.initialize().await,
        Commands::Create(args) => dss
            .create_notebook(&args.name, args.image.as_deref(), args.gpu())
            .await
            .map(|_| ()),
        Commands::List(args) => {
            let notebooks = dss.list().await?;
            println!("{}", output::notebook_table(&notebooks, args.wide));
            Ok(())
        }
        Commands::Start(args) => dss.start(&args.name).await,
        Commands::Stop(args) => dss.stop(&args.name).await,
        Commands::Remove(args) => dss.remove(&args.name).await,
        Commands::Purge => dss.purge().await,
        Commands::Status => {
            let status = dss.status().await?;
            for line in output::status_lines(&status) {
                tracing::info!("{line}");
            }
            Ok(())
        }
        Commands::Logs(args) => {
            let logs = dss.logs(&args.target()).await?;
            for line in output::log_lines(&logs) {
                println!("{line}");
            }
            Ok(())
        }
    }
}
