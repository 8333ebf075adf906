// Archivo: config.rs
// Propósito: configuración del daemon. La configuración del motor se usa
// por defecto en cada módulo registrado que no traiga una propia.
use trx_core::{ConfigError, TrxEngineConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
  /// Nombre del daemon; elige la tabla de mensajes localizados.
  pub name: String,
  pub engine: TrxEngineConfig,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self { name: "daemon".to_string(), engine: TrxEngineConfig::default() }
  }
}

impl DaemonConfig {
  pub const ENV_NAME: &'static str = "TRX_DAEMON_NAME";

  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), ..Self::default() }
  }

  /// Lee `TRX_DAEMON_NAME` y las variables del motor (`TRX_*`).
  pub fn from_env() -> Result<Self, ConfigError> {
    let _ = dotenvy::dotenv();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let engine = TrxEngineConfig::from_lookup(&lookup)?;
    let name = match lookup(Self::ENV_NAME) {
      Some(v) if v.trim().is_empty() => return Err(ConfigError::Invalid { key: Self::ENV_NAME.into(), value: v }),
      Some(v) => v.trim().to_string(),
      None => Self::default().name,
    };
    Ok(Self { name, engine })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn reads_name_and_engine_settings() {
    let env: HashMap<&str, &str> = HashMap::from([("TRX_DAEMON_NAME", " api "), ("TRX_LOG_STATUS", "yes")]);
    let cfg = DaemonConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(cfg.name, "api");
    assert!(cfg.engine.log_status);
    assert_eq!(cfg.engine.idempotency_capacity, 1024);
  }

  #[test]
  fn blank_name_is_rejected() {
    let err = DaemonConfig::from_lookup(|k| (k == "TRX_DAEMON_NAME").then(|| "  ".to_string())).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { key: "TRX_DAEMON_NAME".into(), value: "  ".into() });
  }
}
