use std::path::PathBuf;

/// Environment variable checked first for the kubeconfig path.
pub const DSS_KUBECONFIG_ENV_VAR: &str = "DSS_KUBECONFIG";
/// Standard Kubernetes variable, checked after [`DSS_KUBECONFIG_ENV_VAR`].
pub const KUBECONFIG_ENV_VAR: &str = "KUBECONFIG";
/// Path used when neither a flag nor an environment variable is given.
pub const KUBECONFIG_DEFAULT: &str = "./kubeconfig";

/// Picks the kubeconfig path: `--kubeconfig`, then `DSS_KUBECONFIG`, then
/// `KUBECONFIG`, then [`KUBECONFIG_DEFAULT`]. Empty values are skipped.
pub fn resolve_kubeconfig<F>(flag: Option<PathBuf>, env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    flag.filter(|path| !path.as_os_str().is_empty())
        .or_else(|| non_empty(env(DSS_KUBECONFIG_ENV_VAR)))
        .or_else(|| non_empty(env(KUBECONFIG_ENV_VAR)))
        .unwrap_or_else(|| PathBuf::from(KUBECONFIG_DEFAULT))
}

/// [`resolve_kubeconfig`] against the process environment.
pub fn resolve_kubeconfig_from_env(flag: Option<PathBuf>) -> PathBuf {
    resolve_kubeconfig(flag, |key| std::env::var(key).ok())
}

fn non_empty(value: Option<String>) -> Option<PathBuf> {
    value.filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn flag_wins_over_environment() {
        let env = env_of(&[
            (DSS_KUBECONFIG_ENV_VAR, "/dss/config"),
            (KUBECONFIG_ENV_VAR, "/kube/config"),
        ]);
        assert_eq!(
            resolve_kubeconfig(Some(PathBuf::from("/flag/config")), env),
            PathBuf::from("/flag/config")
        );
    }

    #[test]
    fn dss_variable_wins_over_kubeconfig() {
        let env = env_of(&[
            (DSS_KUBECONFIG_ENV_VAR, "/dss/config"),
            (KUBECONFIG_ENV_VAR, "/kube/config"),
        ]);
        assert_eq!(
            resolve_kubeconfig(None, env),
            PathBuf::from("/dss/config")
        );
    }

    #[test]
    fn kubeconfig_variable_is_used_when_dss_is_empty() {
        let env = env_of(&[
            (DSS_KUBECONFIG_ENV_VAR, ""),
            (KUBECONFIG_ENV_VAR, "/kube/config"),
        ]);
        assert_eq!(
            resolve_kubeconfig(None, env),
            PathBuf::from("/kube/config")
        );
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(
            resolve_kubeconfig(None, env_of(&[])),
            PathBuf::from(KUBECONFIG_DEFAULT)
        );
    }
}
