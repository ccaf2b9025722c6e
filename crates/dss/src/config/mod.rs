pub mod cli;
pub mod kubeconfig;
pub mod settings;

pub use cli::*;
pub use kubeconfig::resolve_kubeconfig;
pub use kubeconfig::resolve_kubeconfig_from_env;
pub use settings::ConfigError;
pub use settings::DssConfig;
pub use settings::GpuKind;
pub use settings::WaitPolicy;
