// Archivo: config.rs
// Propósito: configuración del `TrxEngine` y su lectura desde variables de
// entorno (con soporte de fichero `.env` vía dotenvy).
use thiserror::Error;

/// Errores al leer la configuración.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Valor presente pero no interpretable.
    #[error("Valor inválido para {key}: '{value}'")]
    Invalid { key: String, value: String },
}

/// Configuración del motor de transacciones.
///
/// - `log_status`: emite el resumen en árbol de cada transacción finalizada
///   a nivel `info`.
/// - `idempotency_capacity`: número máximo de claves de idempotencia
///   recordadas (FIFO). 0 desactiva la caché.
/// - `persist_placeholder`: persiste un registro provisional al abrir la
///   transacción, antes de ejecutar la función del llamador.
#[derive(Debug, Clone, PartialEq)]
pub struct TrxEngineConfig {
    pub log_status: bool,
    pub idempotency_capacity: usize,
    pub persist_placeholder: bool,
}

impl Default for TrxEngineConfig {
    fn default() -> Self {
        Self { log_status: false,
               idempotency_capacity: 1024,
               persist_placeholder: true }
    }
}

impl TrxEngineConfig {
    pub const ENV_LOG_STATUS: &'static str = "TRX_LOG_STATUS";
    pub const ENV_IDEMPOTENCY_CAPACITY: &'static str = "TRX_IDEMPOTENCY_CAPACITY";
    pub const ENV_PERSIST_PLACEHOLDER: &'static str = "TRX_PERSIST_PLACEHOLDER";

    /// Lee la configuración del entorno. Las variables ausentes toman el
    /// valor por defecto.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una función de búsqueda inyectada.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(Self::ENV_LOG_STATUS) {
            cfg.log_status = parse_bool(Self::ENV_LOG_STATUS, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_IDEMPOTENCY_CAPACITY) {
            cfg.idempotency_capacity = v.trim().parse().map_err(|_| ConfigError::Invalid { key: Self::ENV_IDEMPOTENCY_CAPACITY.into(),
                                                                                           value: v.clone() })?;
        }
        if let Some(v) = lookup(Self::ENV_PERSIST_PLACEHOLDER) {
            cfg.persist_placeholder = parse_bool(Self::ENV_PERSIST_PLACEHOLDER, &v)?;
        }
        Ok(cfg)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key: key.into(),
                                        value: value.into() }),
    }
}
