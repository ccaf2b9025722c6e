use std::path::PathBuf;

use clap::ArgGroup;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::settings::GpuKind;
use crate::workflow::LogTarget;

#[derive(Parser)]
#[command(name = "dss", about, long_about = None, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a Kubernetes config file. Defaults to DSS_KUBECONFIG, then KUBECONFIG, then ./kubeconfig"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "DSS_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file overriding built-in names, images and wait policies"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy the namespace, MLflow and the shared notebook volume
    Initialize,
    /// Create a notebook server
    Create(CreateArgs),
    /// List notebook servers
    List(ListArgs),
    /// Scale a stopped notebook back up
    Start(NotebookArgs),
    /// Scale a notebook down to zero replicas
    Stop(NotebookArgs),
    /// Delete a notebook server
    Remove(NotebookArgs),
    /// Delete the namespace and everything in it
    Purge,
    /// Show MLflow and GPU status
    Status,
    /// Print logs of notebooks or MLflow
    Logs(LogsArgs),
}

impl Commands {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Create(_) => "create",
            Self::List(_) => "list",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Remove(_) => "remove",
            Self::Purge => "purge",
            Self::Status => "status",
            Self::Logs(_) => "logs",
        }
    }
}

#[derive(Parser)]
pub struct CreateArgs {
    #[arg(help = "Name of the notebook server")]
    pub name: String,

    #[arg(
        long,
        help = "Image for the notebook server: a full reference or one of scipy, pytorch, pytorch-cuda, tensorflow, tensorflow-cuda"
    )]
    pub image: Option<String>,

    #[arg(long, value_enum, help = "Request GPU acceleration of the given kind")]
    pub gpu: Option<GpuKind>,

    #[arg(long, conflicts_with = "gpu", help = "Run without GPU acceleration")]
    pub no_gpu: bool,
}

impl CreateArgs {
    pub fn gpu(&self) -> Option<GpuKind> {
        if self.no_gpu {
            None
        } else {
            self.gpu
        }
    }
}

#[derive(Parser)]
pub struct ListArgs {
    #[arg(long, help = "Show full values instead of truncating them")]
    pub wide: bool,
}

#[derive(Parser)]
pub struct NotebookArgs {
    #[arg(help = "Name of the notebook server")]
    pub name: String,
}

#[derive(Parser)]
#[command(group(ArgGroup::new("target").required(true).args(["name", "mlflow", "all"])))]
pub struct LogsArgs {
    #[arg(help = "Name of the notebook server")]
    pub name: Option<String>,

    #[arg(long, help = "Print logs of the MLflow tracking server")]
    pub mlflow: bool,

    #[arg(long, help = "Print logs of MLflow and every notebook")]
    pub all: bool,
}

impl LogsArgs {
    pub fn target(&self) -> LogTarget {
        match (&self.name, self.mlflow) {
            (_, _) if self.all => LogTarget::All,
            (_, true) => LogTarget::Mlflow,
            (Some(name), false) => LogTarget::Notebook(name.clone()),
            // The argument group guarantees one of the three is set.
            (None, false) => LogTarget::All,
        }
    }
}
