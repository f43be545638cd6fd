use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Installs a global fmt subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| EngineError::Config(format!("log filter: {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| EngineError::Config(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_config_error() {
        let _ = init("lessonsync=debug");
        assert!(matches!(init("lessonsync=debug"), Err(EngineError::Config(_))));
    }
}
