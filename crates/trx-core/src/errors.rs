// Archivo: errors.rs
// Propósito: definir el error de dominio `TrxError`, la taxonomía de
// nombres estables y el alias Result<T> usado por las APIs del crate.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

/// Error "lanzado" por el código de negocio dentro de un nodo.
///
/// Las closures que se ejecutan dentro de una transacción devuelven este
/// tipo para poder propagar tanto `TrxError` como cualquier otro error
/// (`std::io::Error`, `serde_json::Error`, un `&str`, ...). `TrxNode::error`
/// recupera el `TrxError` por downcast o envuelve el resto en
/// `UnknownError`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error de dominio con forma uniforme.
///
/// - `name`: nombre estable con espacio de nombres (`Bucket.ObjNotFound`).
/// - `status`: código estilo HTTP.
/// - `message`: texto legible (localizable).
/// - `data`: datos estructurados opcionales, usados también para
///   interpolar los mensajes localizados.
/// - `stack`: representación de depuración del error original cuando fue
///   envuelto desde un error desconocido.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct TrxError {
    pub name: String,
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TrxError {
    pub const UNKNOWN: &'static str = "UnknownError";
    pub const UNAUTHORIZED: &'static str = "Unauthorized";
    pub const NO_PROVIDERS_REGISTERED: &'static str = "Authn.NoProvidersRegistered";
    pub const NO_PROVIDER_REGISTERED: &'static str = "Authn.NoProviderRegistered";
    pub const OBJ_NOT_FOUND: &'static str = "Bucket.ObjNotFound";
    pub const NOT_SUPPORTED: &'static str = "Bucket.NotSupported";
    pub const MODULE_NOT_FOUND: &'static str = "Module.NotFound";
    pub const BLOCK_NOT_FOUND: &'static str = "Module.BlockNotFound";
    pub const INVALID_TAG: &'static str = "External.InvalidTag";
    pub const STORAGE: &'static str = "Trx.Storage";

    /// Construye un error de dominio arbitrario.
    pub fn new(name: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self { name: name.into(),
               status,
               message: message.into(),
               data: None,
               stack: None }
    }

    /// Adjunta datos estructurados.
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    /// Adjunta la traza/representación del error original.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Error genérico para valores lanzados que no son errores de dominio.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, 500, message)
    }

    /// Ninguno de los proveedores requeridos tiene usuario resuelto.
    pub fn unauthorized<S: AsRef<str>>(providers: &[S]) -> Self {
        let names: Vec<&str> = providers.iter().map(|p| p.as_ref()).collect();
        Self::new(Self::UNAUTHORIZED,
                  401,
                  format!("No autenticado para ninguno de: {}", names.join(", "))).with_data(json!({ "providers": names }))
    }

    pub fn no_providers_registered(module: &str) -> Self {
        Self::new(Self::NO_PROVIDERS_REGISTERED,
                  500,
                  format!("El módulo '{}' no tiene proveedores de autenticación", module)).with_data(json!({ "module": module }))
    }

    pub fn no_provider_registered(module: &str, provider: &str) -> Self {
        Self::new(Self::NO_PROVIDER_REGISTERED,
                  500,
                  format!("Proveedor de autenticación '{}' no registrado en '{}'", provider, module))
            .with_data(json!({ "module": module, "provider": provider }))
    }

    /// Objeto inexistente en un bucket.
    pub fn obj_not_found(bucket: &str, id: &str) -> Self {
        Self::new(Self::OBJ_NOT_FOUND,
                  404,
                  format!("Objeto '{}' no encontrado en '{}'", id, bucket)).with_data(json!({ "bucket": bucket, "id": id }))
    }

    /// Operación no soportada por el adaptador.
    pub fn not_supported(operation: &str) -> Self {
        Self::new(Self::NOT_SUPPORTED,
                  501,
                  format!("Operación '{}' no soportada por el adaptador", operation)).with_data(json!({ "operation": operation }))
    }

    pub fn module_not_found(module: &str) -> Self {
        Self::new(Self::MODULE_NOT_FOUND, 404, format!("Módulo '{}' no encontrado", module)).with_data(json!({ "module": module }))
    }

    pub fn block_not_found(module: &str, kind: &str, name: &str) -> Self {
        Self::new(Self::BLOCK_NOT_FOUND,
                  404,
                  format!("Bloque '{}:{}' no encontrado en '{}'", kind, name, module))
            .with_data(json!({ "module": module, "kind": kind, "name": name }))
    }

    pub fn invalid_tag(tag: &str) -> Self {
        Self::new(Self::INVALID_TAG,
                  400,
                  format!("Tag externo inválido: '{}' (se espera '<module>::<kind>:<name>')", tag))
            .with_data(json!({ "tag": tag }))
    }

    /// Error de almacenamiento (adaptador, mutex envenenado, ...).
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(Self::STORAGE, 500, message)
    }

    /// Convierte un error lanzado en un `TrxError`: los errores de dominio
    /// se recuperan intactos, el resto se envuelve en `UnknownError`
    /// preservando mensaje y representación de depuración.
    ///
    /// Devuelve también si el error era de dominio.
    pub fn from_thrown(err: BoxError) -> (Self, bool) {
        match err.downcast::<TrxError>() {
            Ok(domain) => (*domain, true),
            Err(other) => (Self::unknown(other.to_string()).with_stack(format!("{:?}", other)), false),
        }
    }

    /// `true` para errores que no provienen de la taxonomía de dominio.
    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN
    }
}

impl From<serde_json::Error> for TrxError {
    fn from(e: serde_json::Error) -> Self {
        Self::new("Trx.Serialization", 500, e.to_string())
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, TrxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_survives_boxing() {
        let boxed: BoxError = Box::new(TrxError::obj_not_found("b", "7"));
        let (err, domain) = TrxError::from_thrown(boxed);
        assert!(domain);
        assert_eq!(err.name, TrxError::OBJ_NOT_FOUND);
        assert_eq!(err.status, 404);
        assert_eq!(err.data.unwrap()["id"], "7");
    }

    #[test]
    fn plain_error_is_wrapped_as_unknown() {
        let boxed: BoxError = "disco lleno".into();
        let (err, domain) = TrxError::from_thrown(boxed);
        assert!(!domain);
        assert!(err.is_unknown());
        assert_eq!(err.message, "disco lleno");
        assert!(err.stack.is_some());
    }
}
