// Archivo: i18n.rs
// Propósito: resolución de mensajes localizados para errores de dominio.
use crate::errors::TrxError;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Resuelve el mensaje legible de un error de dominio.
///
/// Devuelve `None` cuando no hay traducción; en ese caso se conserva el
/// mensaje por defecto del error.
pub trait ErrorLocalizer: Send + Sync {
    fn localize(&self, err: &TrxError, daemon: Option<&str>) -> Option<String>;
}

static BUILTIN: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([(TrxError::UNAUTHORIZED, "Acceso no autorizado ({providers})"),
                   (TrxError::NO_PROVIDERS_REGISTERED, "El módulo {module} no tiene proveedores de autenticación"),
                   (TrxError::NO_PROVIDER_REGISTERED, "El proveedor {provider} no está registrado en {module}"),
                   (TrxError::OBJ_NOT_FOUND, "No existe el objeto {id} en {bucket}"),
                   (TrxError::NOT_SUPPORTED, "Operación {operation} no soportada"),
                   (TrxError::MODULE_NOT_FOUND, "No existe el módulo {module}"),
                   (TrxError::BLOCK_NOT_FOUND, "No existe {kind}:{name} en {module}"),
                   (TrxError::INVALID_TAG, "Tag externo inválido: {tag}")])
});

/// Tabla de plantillas por nombre de error, con tablas opcionales por
/// daemon que tienen prioridad.
///
/// Las plantillas interpolan `{campo}` con los campos de `data`.
#[derive(Debug, Clone, Default)]
pub struct MessageTable {
    messages: HashMap<String, String>,
    daemons: HashMap<String, HashMap<String, String>>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tabla precargada con los mensajes de la taxonomía incorporada.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (name, template) in BUILTIN.iter() {
            table.messages.insert((*name).to_string(), (*template).to_string());
        }
        table
    }

    pub fn message(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.messages.insert(name.into(), template.into());
        self
    }

    pub fn daemon_message(mut self, daemon: impl Into<String>, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.daemons.entry(daemon.into()).or_default().insert(name.into(), template.into());
        self
    }
}

impl ErrorLocalizer for MessageTable {
    fn localize(&self, err: &TrxError, daemon: Option<&str>) -> Option<String> {
        let template = daemon.and_then(|d| self.daemons.get(d))
                             .and_then(|t| t.get(&err.name))
                             .or_else(|| self.messages.get(&err.name))?;
        Some(interpolate(template, err.data.as_ref()))
    }
}

fn interpolate(template: &str, data: Option<&JsonValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match data.and_then(|d| d.get(key)) {
                    Some(JsonValue::String(s)) => out.push_str(s),
                    Some(JsonValue::Array(items)) => {
                        let parts: Vec<String> = items.iter()
                                                      .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                                                      .collect();
                        out.push_str(&parts.join(", "));
                    }
                    Some(v) => out.push_str(&v.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
