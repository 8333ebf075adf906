// Archivo: node.rs
// Propósito: `TrxNode`, el nodo del árbol de ejecución. Cada operación
// observable (leer un registro, correr un job, avanzar una máquina, cruzar
// un módulo) se registra como nodo hijo con su propio estado, tiempos,
// entrada/salida y contexto de autenticación.
//
// Los datos de los nodos viven en la arena (`nodes`) de la `Trx`; `TrxNode`
// es solo un handle `(trx, id)` barato de clonar.
use crate::authn::AuthnCtx;
use crate::errors::{BoxError, Result, TrxError};
use crate::status::{elapsed_ms, NodeState, TrxNodeStatus};
use crate::trx::Trx;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Id fijo del nodo raíz.
pub const ROOT_ID: &str = "root";

/// Marcas de tiempo de un nodo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTime {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Registro persistible de un nodo dentro de la arena de la transacción.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub global_id: String,
    pub scope: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub state: NodeState,
    pub action: Option<String>,
    pub input: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<TrxError>,
    #[serde(default)]
    pub time: NodeTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn: Option<AuthnCtx>,
}

impl NodeRecord {
    /// Raíz abierta desde `now`.
    pub(crate) fn root(trx_id: &str, now: DateTime<Utc>, authn: Option<AuthnCtx>) -> Self {
        Self { id: ROOT_ID.to_string(),
               global_id: format!("{}.{}", trx_id, ROOT_ID),
               scope: ROOT_ID.to_string(),
               parent: None,
               children: Vec::new(),
               state: NodeState::Open,
               action: None,
               input: None,
               output: None,
               error: None,
               time: NodeTime { start: Some(now),
                                end: None },
               authn: authn.filter(|a| !a.is_empty()) }
    }

    fn child(trx_id: &str, parent: &str, scope: String) -> Self {
        let id = short_id();
        Self { global_id: format!("{}.{}", trx_id, id),
               id,
               scope,
               parent: Some(parent.to_string()),
               children: Vec::new(),
               state: NodeState::Undefined,
               action: None,
               input: None,
               output: None,
               error: None,
               time: NodeTime::default(),
               authn: None }
    }

    pub(crate) fn project(nodes: &IndexMap<String, NodeRecord>, id: &str) -> Option<TrxNodeStatus> {
        let rec = nodes.get(id)?;
        Some(TrxNodeStatus { id: rec.id.clone(),
                             global_id: rec.global_id.clone(),
                             scope: rec.scope.clone(),
                             state: rec.state,
                             action: rec.action.clone(),
                             input: rec.input.clone(),
                             output: rec.output.clone(),
                             error: rec.error.clone(),
                             nodes: rec.children.iter().filter_map(|c| Self::project(nodes, c)).collect(),
                             elapsed_ms: elapsed_ms(rec.time.start, rec.time.end) })
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Handle a un nodo del árbol de ejecución.
#[derive(Clone)]
pub struct TrxNode {
    trx: Trx,
    id: String,
}

impl fmt::Debug for TrxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrxNode")
         .field("global_id", &self.global_id())
         .field("scope", &self.scope())
         .field("state", &self.state())
         .finish()
    }
}

impl TrxNode {
    pub(crate) fn new(trx: Trx, id: impl Into<String>) -> Self {
        Self { trx, id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transacción dueña del nodo.
    pub fn trx(&self) -> &Trx {
        &self.trx
    }

    /// `{trx.id}.{id}`, único en todo el sistema.
    pub fn global_id(&self) -> String {
        self.read(|r| r.global_id.clone())
            .unwrap_or_else(|| format!("{}.{}", self.trx.id(), self.id))
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub fn scope(&self) -> String {
        self.read(|r| r.scope.clone()).unwrap_or_default()
    }

    pub fn state(&self) -> NodeState {
        self.read(|r| r.state).unwrap_or_default()
    }

    pub fn action(&self) -> Option<String> {
        self.read(|r| r.action.clone()).flatten()
    }

    pub fn output(&self) -> Option<JsonValue> {
        self.read(|r| r.output.clone()).flatten()
    }

    pub fn last_error(&self) -> Option<TrxError> {
        self.read(|r| r.error.clone()).flatten()
    }

    /// Copia del registro del nodo.
    pub fn record(&self) -> Option<NodeRecord> {
        self.read(|r| r.clone())
    }

    pub fn parent(&self) -> Option<TrxNode> {
        self.read(|r| r.parent.clone())
            .flatten()
            .map(|p| TrxNode::new(self.trx.clone(), p))
    }

    /// Hijos en orden de llamada.
    pub fn children(&self) -> Vec<TrxNode> {
        self.read(|r| r.children.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|c| TrxNode::new(self.trx.clone(), c))
            .collect()
    }

    fn read<T>(&self, f: impl FnOnce(&NodeRecord) -> T) -> Option<T> {
        let st = self.trx.lock();
        st.nodes.get(&self.id).map(f)
    }

    /// Aplica `f` al registro si el nodo no está en estado terminal.
    /// Devuelve `false` (y avisa) si el nodo ya estaba cerrado.
    fn transition(&self, what: &str, f: impl FnOnce(&mut NodeRecord)) -> bool {
        let mut guard = self.trx.lock();
        let st = &mut *guard;
        let Some(rec) = st.nodes.get_mut(&self.id) else {
            log::warn!("nodo {} inexistente en trx {}", self.id, st.id);
            return false;
        };
        if rec.state.is_terminal() {
            log::warn!("{} ignorado: el nodo {} ({}) ya está en estado {}", what, rec.global_id, rec.scope, rec.state);
            return false;
        }
        f(rec);
        true
    }

    /// Abre el nodo: registra acción y entrada e inicia el cronómetro.
    pub fn open(&self, action: impl Into<String>, input: Option<JsonValue>) {
        let action = action.into();
        let opened = self.transition("open", |rec| {
                             rec.state = NodeState::Open;
                             rec.action = Some(action);
                             rec.input = input;
                             rec.time.start = Some(Utc::now());
                         });
        if opened {
            log::debug!("open {} {}", self.global_id(), self.scope());
        }
    }

    /// Cierra el nodo con éxito.
    pub fn ok(&self, output: Option<JsonValue>) {
        let closed = self.transition("ok", |rec| {
                             let now = Utc::now();
                             rec.state = NodeState::Ok;
                             rec.output = output;
                             rec.time.start.get_or_insert(now);
                             rec.time.end = Some(now);
                         });
        if closed {
            log::debug!("ok {} {}", self.global_id(), self.scope());
        }
    }

    /// Cierra el nodo con error y devuelve el error (envuelto/localizado)
    /// para que el llamador lo relance.
    pub fn error<E: Into<BoxError>>(&self, err: E) -> TrxError {
        let err = self.wrap_error(err);
        let stored = err.clone();
        let closed = self.transition("error", |rec| {
                             let now = Utc::now();
                             rec.state = NodeState::Error;
                             rec.error = Some(stored);
                             rec.time.start.get_or_insert(now);
                             rec.time.end = Some(now);
                         });
        if closed {
            log::debug!("error {} {}: {}", self.global_id(), self.scope(), err);
        }
        err
    }

    /// Convierte un error lanzado en `TrxError` sin tocar el estado del
    /// nodo: localiza los errores de dominio y envuelve el resto en
    /// `UnknownError`.
    pub fn wrap_error<E: Into<BoxError>>(&self, err: E) -> TrxError {
        let (mut err, domain) = TrxError::from_thrown(err.into());
        if domain {
            let (localizer, daemon) = {
                let st = self.trx.lock();
                (st.localizer.clone(), st.daemon.clone())
            };
            if let Some(msg) = localizer.and_then(|l| l.localize(&err, daemon.as_deref())) {
                err.message = msg;
            }
        }
        err
    }

    /// Crea un hijo con scope `<module>::<block_kind>:<name>`.
    pub fn make_child_node(&self, module: &str, block_kind: &str, name: &str) -> TrxNode {
        self.attach_child(format!("{}::{}:{}", module, block_kind, name))
    }

    /// Crea un hijo con scope `<module>::virtual`, para lógica ejecutada
    /// contra un módulo ensamblado en tiempo de ejecución.
    pub fn make_virtual_child_node(&self, module: &str) -> TrxNode {
        self.attach_child(format!("{}::virtual", module))
    }

    fn attach_child(&self, scope: String) -> TrxNode {
        let trx_id = self.trx.id();
        let rec = NodeRecord::child(&trx_id, &self.id, scope);
        let id = rec.id.clone();
        {
            let mut st = self.trx.lock();
            if let Some(parent) = st.nodes.get_mut(&self.id) {
                parent.children.push(id.clone());
            }
        }
        self.trx.add_node(rec);
        TrxNode::new(self.trx.clone(), id)
    }

    /// Mezcla resultados de proveedores en el contexto local del nodo. Los
    /// descendientes (actuales y futuros) lo ven porque la resolución
    /// recorre los ancestros.
    pub fn add_authn(&self, tokens: IndexMap<String, String>, users: IndexMap<String, JsonValue>) {
        let mut st = self.trx.lock();
        if let Some(rec) = st.nodes.get_mut(&self.id) {
            rec.authn
               .get_or_insert_with(AuthnCtx::default)
               .merge(&AuthnCtx { tokens, users });
        }
    }

    /// Contexto de autenticación efectivo: ancestros primero, el nodo más
    /// cercano gana.
    pub fn authn(&self) -> AuthnCtx {
        let st = self.trx.lock();
        let mut chain = Vec::new();
        let mut cursor = Some(self.id.clone());
        while let Some(id) = cursor {
            match st.nodes.get(&id) {
                Some(rec) => {
                    if let Some(a) = &rec.authn {
                        chain.push(a.clone());
                    }
                    cursor = rec.parent.clone();
                }
                None => break,
            }
        }
        let mut out = AuthnCtx::default();
        for a in chain.iter().rev() {
            out.merge(a);
        }
        out
    }

    /// Falla con `Unauthorized` salvo que al menos uno de los proveedores
    /// tenga usuario resuelto en este nodo o en un ancestro. Una lista
    /// vacía no exige nada.
    pub fn check_authn<S: AsRef<str>>(&self, providers: &[S]) -> Result<()> {
        if providers.is_empty() {
            return Ok(());
        }
        let ctx = self.authn();
        if providers.iter().any(|p| ctx.has_user(p.as_ref())) {
            Ok(())
        } else {
            Err(TrxError::unauthorized(providers))
        }
    }

    /// Usuario resuelto para un proveedor, si lo hay.
    pub fn user(&self, provider: &str) -> Option<JsonValue> {
        self.authn().users.get(provider).cloned()
    }

    /// Proyección recursiva del nodo.
    pub fn status(&self) -> Option<TrxNodeStatus> {
        let st = self.trx.lock();
        NodeRecord::project(&st.nodes, &self.id)
    }

    /// Injerta bajo este nodo los hijos de la raíz de `other`, registrando
    /// cada nodo injertado en la arena propia. Ids y global ids se
    /// conservan salvo colisión, en cuyo caso se genera un id local nuevo.
    pub fn merge(&self, other: &Trx) -> Result<()> {
        if self.trx.same(other) {
            return Err(TrxError::storage("una transacción no puede fusionarse consigo misma"));
        }
        let (grafted, roots) = {
            let o = other.lock();
            let roots = o.nodes.get(ROOT_ID).map(|r| r.children.clone()).unwrap_or_default();
            let grafted: Vec<NodeRecord> = o.nodes.values().filter(|n| n.id != ROOT_ID).cloned().collect();
            (grafted, roots)
        };

        let mut st = self.trx.lock();
        if !st.nodes.contains_key(&self.id) {
            return Err(TrxError::storage(format!("nodo {} inexistente", self.id)));
        }
        let mut renames: HashMap<String, String> = HashMap::new();
        for rec in &grafted {
            if st.nodes.contains_key(&rec.id) {
                let mut fresh = short_id();
                while st.nodes.contains_key(&fresh) {
                    fresh = short_id();
                }
                renames.insert(rec.id.clone(), fresh);
            }
        }
        let rename = |id: &String| renames.get(id).cloned().unwrap_or_else(|| id.clone());

        for mut rec in grafted {
            rec.id = rename(&rec.id);
            rec.parent = match rec.parent.as_deref() {
                Some(ROOT_ID) | None => Some(self.id.clone()),
                Some(p) => Some(rename(&p.to_string())),
            };
            rec.children = rec.children.iter().map(&rename).collect();
            st.nodes.insert(rec.id.clone(), rec);
        }
        let roots: Vec<String> = roots.iter().map(&rename).collect();
        if let Some(me) = st.nodes.get_mut(&self.id) {
            me.children.extend(roots);
        }
        Ok(())
    }
}
