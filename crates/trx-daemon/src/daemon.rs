// Archivo: daemon.rs
// Propósito: registro de módulos compartido (`Daemon`), fachada de entrada
// `DaemonTrx` y la implementación en proceso de `ExternalInvoker`.
use crate::config::DaemonConfig;
use crate::external::{ExternalCall, ExternalInvoker, ExternalOutcome, ExternalTag};
use crate::module::{Module, ModuleBuilder};
use crate::module_node::ModuleNode;
use crate::nodes::NodeKind;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::{Arc, Weak};
use trx_core::{AuthnCtx, AuthnRequest, BoxError, ErrorLocalizer, Finished, HeldTrx, Result, Trx, TrxError, TrxOptions,
               TrxOutput, TrxStatus};

/// Conjunto de módulos que comparten proceso. Se usa siempre detrás de un
/// `Arc` (ver `Daemon::new`).
pub struct Daemon {
  config: DaemonConfig,
  modules: DashMap<String, Arc<Module>>,
  localizer: Option<Arc<dyn ErrorLocalizer>>,
  me: Weak<Daemon>,
}

impl Daemon {
  pub fn new(config: DaemonConfig) -> Arc<Self> {
    Self::with_localizer(config, None)
  }

  pub fn with_localizer(config: DaemonConfig, localizer: Option<Arc<dyn ErrorLocalizer>>) -> Arc<Self> {
    Arc::new_cyclic(|me| Self { config, modules: DashMap::new(), localizer, me: me.clone() })
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn config(&self) -> &DaemonConfig {
    &self.config
  }

  /// Construye el motor del módulo y lo registra. Un nombre repetido
  /// reemplaza al anterior.
  pub fn register(&self, builder: ModuleBuilder) -> Arc<Module> {
    let module = Arc::new(builder.build(&self.config.name, &self.config.engine, self.localizer.clone()));
    if self.modules.insert(module.name().to_string(), Arc::clone(&module)).is_some() {
      log::warn!("módulo {} re-registrado en {}", module.name(), self.config.name);
    } else {
      log::info!("módulo {} registrado en {}", module.name(), self.config.name);
    }
    module
  }

  pub fn module(&self, name: &str) -> Option<Arc<Module>> {
    self.modules.get(name).map(|m| Arc::clone(m.value()))
  }

  pub fn module_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
  }

  /// Punto de entrada: transacción sobre `module`.
  pub fn trx(&self, module: &str) -> DaemonTrx {
    DaemonTrx { daemon: self.handle(), module: module.to_string(), options: TrxOptions::new() }
  }

  fn handle(&self) -> Option<Arc<Daemon>> {
    self.me.upgrade()
  }
}

/// Builder de una ejecución sobre un módulo del daemon.
pub struct DaemonTrx {
  daemon: Option<Arc<Daemon>>,
  module: String,
  options: TrxOptions,
}

impl DaemonTrx {
  pub fn authn(mut self, request: AuthnRequest) -> Self {
    self.options = self.options.authn(request);
    self
  }

  pub fn origin(mut self, origin: impl Into<String>) -> Self {
    self.options = self.options.origin(origin);
    self
  }

  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.options = self.options.id(id);
    self
  }

  pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.options = self.options.idempotency_key(key);
    self
  }

  pub fn inherit_authn(mut self, ctx: AuthnCtx) -> Self {
    self.options = self.options.inherit_authn(ctx);
    self
  }

  fn resolve(&self) -> Result<(Arc<Daemon>, Arc<Module>)> {
    let daemon = self.daemon.clone().ok_or_else(|| TrxError::storage("el daemon ya no existe"))?;
    let module = daemon.module(&self.module).ok_or_else(|| TrxError::module_not_found(&self.module))?;
    Ok((daemon, module))
  }

  /// Ejecuta `f` y devuelve el reporte. Nunca falla: un módulo
  /// inexistente también se reporta como estado de error.
  pub async fn run<F, Fut>(self, f: F) -> TrxStatus
  where
    F: FnOnce(ModuleNode) -> Fut + Send,
    Fut: Future<Output = TrxOutput> + Send,
  {
    self.execute(f).await.status
  }

  /// Igual que `run` pero devuelve también la transacción terminada.
  pub async fn execute<F, Fut>(self, f: F) -> Finished
  where
    F: FnOnce(ModuleNode) -> Fut + Send,
    Fut: Future<Output = TrxOutput> + Send,
  {
    let (daemon, module) = match self.resolve() {
      Ok(found) => found,
      Err(err) => return self.unresolved(err),
    };
    let engine = Arc::clone(module.engine());
    let invoker: Arc<dyn ExternalInvoker> = daemon;
    engine.execute(self.options, move |root| f(ModuleNode::new(root, module, invoker))).await
  }

  /// Variante retenida: ejecuta `f` sin confirmar ni revertir.
  pub async fn run_and_hold<F, Fut>(self, f: F) -> Result<HeldTrx>
  where
    F: FnOnce(ModuleNode) -> Fut + Send,
    Fut: Future<Output = TrxOutput> + Send,
  {
    let (daemon, module) = self.resolve()?;
    let engine = Arc::clone(module.engine());
    let invoker: Arc<dyn ExternalInvoker> = daemon;
    engine.trx_held(self.options, move |root| f(ModuleNode::new(root, module, invoker))).await
  }

  fn unresolved(self, err: TrxError) -> Finished {
    log::error!("no se pudo ejecutar en {}: {}", self.module, err);
    let origin = self.options.origin.clone().unwrap_or_else(|| format!("app:{}", self.module));
    let trx = Trx::new(&self.module, &origin, self.options.id.clone(), None);
    trx.root().error(err);
    trx.on_finish();
    Finished { status: trx.status(), trx }
  }
}

#[async_trait]
impl ExternalInvoker for Daemon {
  async fn invoke(&self, tag: &ExternalTag, action: &str, payload: JsonValue, call: ExternalCall) -> Result<ExternalOutcome> {
    if self.module(&tag.module).is_none() {
      return Err(TrxError::module_not_found(&tag.module));
    }
    let mut trx = self.trx(&tag.module).origin(call.origin);
    if let Some(key) = call.idempotency_key {
      trx = trx.idempotency_key(key);
    }
    if let Some(authn) = call.authn {
      trx = trx.inherit_authn(authn);
    }
    let target = tag.clone();
    let action = action.to_string();
    let run = move |node: ModuleNode| async move { dispatch(&node, &target, &action, payload).await.map_err(BoxError::from) };
    if call.hold {
      Ok(ExternalOutcome::Held(trx.run_and_hold(run).await?))
    } else {
      Ok(ExternalOutcome::Committed(trx.execute(run).await))
    }
  }
}

/// Traduce la acción remota a la operación del envoltorio correspondiente.
async fn dispatch(node: &ModuleNode, tag: &ExternalTag, action: &str, payload: JsonValue) -> Result<JsonValue> {
  match (tag.kind, action) {
    (NodeKind::Job, "run") => node.job(&tag.name).run(payload).await,
    (NodeKind::Bucket, "readOne") => node.bucket(&tag.name).read_one(&id_of(&payload)?).await,
    (NodeKind::Bucket, "create") => node.bucket(&tag.name).create(payload).await,
    (NodeKind::Machine, "run") => {
      let transition = transition_of(&payload)?;
      let input = payload.get("input").cloned().unwrap_or(JsonValue::Null);
      node.machine(&tag.name).run(&id_of(&payload)?, &transition, input).await
    }
    (NodeKind::Queue, "push") => node.queue(&tag.name).push(payload).await,
    (NodeKind::Topic, "publish") => node.topic(&tag.name).publish(payload).await,
    (kind, action) => Err(TrxError::not_supported(&format!("{}:{}", kind, action))),
  }
}

fn id_of(payload: &JsonValue) -> Result<String> {
  match payload.get("id") {
    Some(JsonValue::String(s)) => Ok(s.clone()),
    Some(JsonValue::Number(n)) => Ok(n.to_string()),
    _ => Err(TrxError::new("External.MissingId", 400, "La llamada externa requiere un campo 'id'").with_data(payload.clone())),
  }
}

fn transition_of(payload: &JsonValue) -> Result<String> {
  match payload.get("transition").and_then(JsonValue::as_str) {
    Some(t) if !t.is_empty() => Ok(t.to_string()),
    _ => Err(TrxError::new("External.MissingTransition", 400, "La llamada externa a una máquina requiere un campo 'transition'")
      .with_data(payload.clone())),
  }
}
