// Archivo: status.rs
// Propósito: modelo de reporte inmutable (`TrxStatus`, `TrxNodeStatus`) y el
// estado de un nodo. Son proyecciones de solo lectura del árbol de
// ejecución; nunca se almacenan como sistema de registro.
use crate::errors::TrxError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::fmt::Write as _;

/// Estado de un nodo: `undefined → open → (ok | error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Undefined,
    Open,
    Ok,
    Error,
}

impl NodeState {
    /// `ok` y `error` son terminales.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Ok | NodeState::Error)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Undefined => "undefined",
            NodeState::Open => "open",
            NodeState::Ok => "ok",
            NodeState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Milisegundos entre `start` y `end`; -1 mientras el intervalo sigue
/// abierto.
pub fn elapsed_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(s), Some(e)) => (e - s).num_milliseconds().max(0),
        _ => -1,
    }
}

/// Proyección de un nodo y sus hijos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrxNodeStatus {
    pub id: String,
    pub global_id: String,
    pub scope: String,
    pub state: NodeState,
    pub action: Option<String>,
    pub input: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<TrxError>,
    pub nodes: Vec<TrxNodeStatus>,
    pub elapsed_ms: i64,
}

impl TrxNodeStatus {
    /// Búsqueda en profundidad por `scope` (incluye el propio nodo).
    pub fn find(&self, scope: &str) -> Option<&TrxNodeStatus> {
        if self.scope == scope {
            return Some(self);
        }
        self.nodes.iter().find_map(|n| n.find(scope))
    }

    fn write_summary(&self, out: &mut String, depth: usize) {
        let _ = write!(out, "{}- {} [{}]", "  ".repeat(depth), self.scope, self.state);
        if let Some(action) = &self.action {
            let _ = write!(out, " {}", action);
        }
        let _ = write!(out, " {}ms", self.elapsed_ms);
        if let Some(err) = &self.error {
            let _ = write!(out, " !! {}", err);
        }
        out.push('\n');
        for n in &self.nodes {
            n.write_summary(out, depth + 1);
        }
    }
}

/// Proyección de una transacción completa. `nodes` son los hijos del nodo
/// raíz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrxStatus {
    pub id: String,
    pub module: String,
    pub origin: String,
    pub state: NodeState,
    pub action: Option<String>,
    pub input: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<TrxError>,
    pub nodes: Vec<TrxNodeStatus>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
}

impl TrxStatus {
    pub fn is_ok(&self) -> bool {
        self.state == NodeState::Ok
    }

    /// Primer nodo (en profundidad, en orden de llamada) con el `scope`
    /// indicado.
    pub fn find(&self, scope: &str) -> Option<&TrxNodeStatus> {
        self.nodes.iter().find_map(|n| n.find(scope))
    }

    /// Resumen textual en árbol, apto para logs o salida de CLI.
    pub fn summary(&self) -> String {
        let mut out = format!("trx {} ({}, {}) [{}] {}ms", self.id, self.module, self.origin, self.state, self.elapsed_ms);
        if let Some(err) = &self.error {
            let _ = write!(out, " !! {}", err);
        }
        out.push('\n');
        for n in &self.nodes {
            n.write_summary(&mut out, 1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn elapsed_is_minus_one_while_open() {
        let now = Utc::now();
        assert_eq!(elapsed_ms(Some(now), None), -1);
        assert_eq!(elapsed_ms(Some(now), Some(now + Duration::milliseconds(15))), 15);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(NodeState::Error).unwrap(), "error");
        assert!(NodeState::Ok.is_terminal());
        assert!(!NodeState::Open.is_terminal());
    }
}
