// Archivo: trx.rs
// Propósito: `Trx`, la unidad de trabajo. Es dueña del nodo raíz, de la
// arena plana de nodos (id → registro), de las marcas de inicio/fin y de un
// mapa de contexto libre para los adaptadores. `TrxRecord` es su forma
// persistible.
use crate::authn::AuthnCtx;
use crate::engine::HeldTrx;
use crate::i18n::ErrorLocalizer;
use crate::node::{NodeRecord, TrxNode, ROOT_ID};
use crate::repository::Record;
use crate::status::{elapsed_ms, NodeState, TrxStatus};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Registro persistible de una transacción, tal como lo recibe el
/// adaptador del ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrxRecord {
    pub id: String,
    pub module: String,
    pub origin: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ctx: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Nodos en orden de registro; la raíz va primero.
    pub nodes: Vec<NodeRecord>,
}

impl TrxRecord {
    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    /// Estado del nodo raíz.
    pub fn state(&self) -> NodeState {
        self.nodes
            .iter()
            .find(|n| n.id == ROOT_ID)
            .map(|n| n.state)
            .unwrap_or_default()
    }
}

impl Record for TrxRecord {
    fn record_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

pub(crate) struct TrxState {
    pub(crate) id: String,
    pub(crate) module: String,
    pub(crate) origin: String,
    pub(crate) start: DateTime<Utc>,
    pub(crate) end: Option<DateTime<Utc>>,
    pub(crate) ctx: Map<String, JsonValue>,
    pub(crate) nodes: IndexMap<String, NodeRecord>,
    pub(crate) held: Vec<HeldTrx>,
    pub(crate) is_held: bool,
    pub(crate) idempotency_key: Option<String>,
    pub(crate) localizer: Option<Arc<dyn ErrorLocalizer>>,
    pub(crate) daemon: Option<String>,
}

/// Unidad de trabajo. Clonar una `Trx` produce otro handle a la misma
/// transacción.
///
/// La arena solo la muta el flujo lógico dueño de la transacción; el
/// `Mutex` nunca se mantiene tomado a través de un `.await`.
#[derive(Clone)]
pub struct Trx {
    inner: Arc<Mutex<TrxState>>,
}

impl fmt::Debug for Trx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("Trx")
         .field("id", &st.id)
         .field("module", &st.module)
         .field("origin", &st.origin)
         .field("nodes", &st.nodes.len())
         .field("finished", &st.end.is_some())
         .finish()
    }
}

impl Trx {
    /// Crea una transacción en vuelo. Sin `id` se genera un UUID v4;
    /// `authn` es el contexto ya resuelto que hereda la raíz.
    pub fn new(module: &str, origin: &str, id: Option<String>, authn: Option<AuthnCtx>) -> Self {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let mut nodes = IndexMap::new();
        nodes.insert(ROOT_ID.to_string(), NodeRecord::root(&id, now, authn));
        Self::from_state(TrxState { id,
                                    module: module.to_string(),
                                    origin: origin.to_string(),
                                    start: now,
                                    end: None,
                                    ctx: Map::new(),
                                    nodes,
                                    held: Vec::new(),
                                    is_held: false,
                                    idempotency_key: None,
                                    localizer: None,
                                    daemon: None })
    }

    /// Rehidrata una transacción desde su registro persistido.
    pub fn from_record(record: TrxRecord) -> Self {
        let mut nodes: IndexMap<String, NodeRecord> = record.nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        if !nodes.contains_key(ROOT_ID) {
            log::warn!("registro de trx {} sin nodo raíz; se crea uno", record.id);
            nodes.insert(ROOT_ID.to_string(), NodeRecord::root(&record.id, record.start, None));
            nodes.move_index(nodes.len() - 1, 0);
        }
        Self::from_state(TrxState { id: record.id,
                                    module: record.module,
                                    origin: record.origin,
                                    start: record.start,
                                    end: record.end,
                                    ctx: record.ctx,
                                    nodes,
                                    held: Vec::new(),
                                    is_held: false,
                                    idempotency_key: record.idempotency_key,
                                    localizer: None,
                                    daemon: None })
    }

    fn from_state(state: TrxState) -> Self {
        Self { inner: Arc::new(Mutex::new(state)) }
    }

    /// Inyecta el resolvedor de mensajes y el nombre del daemon usados por
    /// `TrxNode::error`.
    pub fn with_localizer(self, localizer: Option<Arc<dyn ErrorLocalizer>>, daemon: Option<String>) -> Self {
        {
            let mut st = self.lock();
            st.localizer = localizer;
            st.daemon = daemon;
        }
        self
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TrxState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn same(&self, other: &Trx) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn module(&self) -> String {
        self.lock().module.clone()
    }

    pub fn origin(&self) -> String {
        self.lock().origin.clone()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.lock().start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.lock().end
    }

    pub fn is_finished(&self) -> bool {
        self.lock().end.is_some()
    }

    pub fn root(&self) -> TrxNode {
        TrxNode::new(self.clone(), ROOT_ID)
    }

    /// Nodo por id local.
    pub fn node(&self, id: &str) -> Option<TrxNode> {
        self.lock()
            .nodes
            .contains_key(id)
            .then(|| TrxNode::new(self.clone(), id))
    }

    /// Número de nodos registrados, raíz incluida.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexa un nodo por su id local.
    pub fn add_node(&self, node: NodeRecord) {
        self.lock().nodes.insert(node.id.clone(), node);
    }

    pub fn ctx_get(&self, key: &str) -> Option<JsonValue> {
        self.lock().ctx.get(key).cloned()
    }

    pub fn ctx_set(&self, key: impl Into<String>, value: JsonValue) {
        self.lock().ctx.insert(key.into(), value);
    }

    pub fn idempotency_key(&self) -> Option<String> {
        self.lock().idempotency_key.clone()
    }

    pub(crate) fn set_idempotency_key(&self, key: Option<String>) {
        self.lock().idempotency_key = key;
    }

    /// `true` si la transacción corre en modo retenido (su commit lo decide
    /// un llamador externo).
    pub fn is_held(&self) -> bool {
        self.lock().is_held
    }

    pub(crate) fn set_held(&self, held: bool) {
        self.lock().is_held = held;
    }

    /// Registra una sub-transacción retenida: se confirmará o revertirá
    /// junto con esta transacción.
    pub fn hold_node(&self, held: HeldTrx) {
        self.lock().held.push(held);
    }

    pub(crate) fn take_held(&self) -> Vec<HeldTrx> {
        std::mem::take(&mut self.lock().held)
    }

    /// Registra el fin de la transacción. Solo la primera llamada tiene
    /// efecto.
    pub fn on_finish(&self) {
        let mut st = self.lock();
        if st.end.is_some() {
            log::warn!("on_finish repetido para trx {}", st.id);
            return;
        }
        st.end = Some(Utc::now());
    }

    /// Proyección de reporte de toda la transacción.
    pub fn status(&self) -> TrxStatus {
        let st = self.lock();
        let root = NodeRecord::project(&st.nodes, ROOT_ID);
        let (state, action, input, output, error, nodes) = match root {
            Some(r) => (r.state, r.action, r.input, r.output, r.error, r.nodes),
            None => (NodeState::Undefined, None, None, None, None, Vec::new()),
        };
        TrxStatus { id: st.id.clone(),
                    module: st.module.clone(),
                    origin: st.origin.clone(),
                    state,
                    action,
                    input,
                    output,
                    error,
                    nodes,
                    start: st.start,
                    end: st.end,
                    elapsed_ms: elapsed_ms(Some(st.start), st.end) }
    }

    /// Forma persistible de la transacción.
    pub fn to_record(&self) -> TrxRecord {
        let st = self.lock();
        TrxRecord { id: st.id.clone(),
                    module: st.module.clone(),
                    origin: st.origin.clone(),
                    start: st.start,
                    end: st.end,
                    ctx: st.ctx.clone(),
                    idempotency_key: st.idempotency_key.clone(),
                    nodes: st.nodes.values().cloned().collect() }
    }
}
