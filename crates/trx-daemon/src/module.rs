// Archivo: module.rs
// Propósito: un módulo del daemon: su motor de transacciones y los bloques
// (buckets, jobs, máquinas, recursos, colas, tópicos) que sus nodos pueden
// invocar por nombre.
use crate::handlers::{JobHandler, MachineHandler, QueueSink, TopicSink};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use trx_core::{AuthnProvider, BucketAdapter, ErrorLocalizer, MemoryBucketAdapter, TrxEngine, TrxEngineConfig, TrxRecord,
               TrxWrapper};

/// Recurso: fachada CRUD sobre un bucket, protegida por proveedores de
/// autenticación (basta con que uno tenga usuario).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDef {
  pub bucket: String,
  pub authn: Vec<String>,
}

impl ResourceDef {
  pub fn new(bucket: impl Into<String>) -> Self {
    Self { bucket: bucket.into(), authn: Vec::new() }
  }

  pub fn authn<S: AsRef<str>>(mut self, providers: &[S]) -> Self {
    self.authn = providers.iter().map(|p| p.as_ref().to_string()).collect();
    self
  }
}

pub struct Module {
  name: String,
  engine: Arc<TrxEngine>,
  buckets: IndexMap<String, Arc<dyn BucketAdapter<JsonValue>>>,
  jobs: IndexMap<String, Arc<dyn JobHandler>>,
  machines: IndexMap<String, Arc<dyn MachineHandler>>,
  resources: IndexMap<String, ResourceDef>,
  queues: IndexMap<String, Arc<dyn QueueSink>>,
  topics: IndexMap<String, Arc<dyn TopicSink>>,
}

impl fmt::Debug for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Module")
      .field("name", &self.name)
      .field("buckets", &self.buckets.keys().collect::<Vec<_>>())
      .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
      .field("machines", &self.machines.keys().collect::<Vec<_>>())
      .field("resources", &self.resources.keys().collect::<Vec<_>>())
      .field("queues", &self.queues.keys().collect::<Vec<_>>())
      .field("topics", &self.topics.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl Module {
  pub fn builder(name: impl Into<String>) -> ModuleBuilder {
    ModuleBuilder::new(name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn engine(&self) -> &Arc<TrxEngine> {
    &self.engine
  }

  pub fn bucket(&self, name: &str) -> Option<Arc<dyn BucketAdapter<JsonValue>>> {
    self.buckets.get(name).cloned()
  }

  pub fn job(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
    self.jobs.get(name).cloned()
  }

  pub fn machine(&self, name: &str) -> Option<Arc<dyn MachineHandler>> {
    self.machines.get(name).cloned()
  }

  pub fn resource(&self, name: &str) -> Option<ResourceDef> {
    self.resources.get(name).cloned()
  }

  pub fn queue(&self, name: &str) -> Option<Arc<dyn QueueSink>> {
    self.queues.get(name).cloned()
  }

  pub fn topic(&self, name: &str) -> Option<Arc<dyn TopicSink>> {
    self.topics.get(name).cloned()
  }
}

/// Ensambla un `Module`. El motor se construye al registrarlo en el
/// daemon, que aporta su nombre, su tabla de mensajes y la configuración
/// por defecto.
pub struct ModuleBuilder {
  name: String,
  ledger: Option<Arc<dyn BucketAdapter<TrxRecord>>>,
  config: Option<TrxEngineConfig>,
  providers: Vec<(String, Arc<dyn AuthnProvider>)>,
  wrapper: Option<Arc<dyn TrxWrapper>>,
  buckets: IndexMap<String, Arc<dyn BucketAdapter<JsonValue>>>,
  jobs: IndexMap<String, Arc<dyn JobHandler>>,
  machines: IndexMap<String, Arc<dyn MachineHandler>>,
  resources: IndexMap<String, ResourceDef>,
  queues: IndexMap<String, Arc<dyn QueueSink>>,
  topics: IndexMap<String, Arc<dyn TopicSink>>,
}

impl ModuleBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(),
           ledger: None,
           config: None,
           providers: Vec::new(),
           wrapper: None,
           buckets: IndexMap::new(),
           jobs: IndexMap::new(),
           machines: IndexMap::new(),
           resources: IndexMap::new(),
           queues: IndexMap::new(),
           topics: IndexMap::new() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Almacenamiento de transacciones. Por defecto, en memoria.
  pub fn ledger(mut self, ledger: Arc<dyn BucketAdapter<TrxRecord>>) -> Self {
    self.ledger = Some(ledger);
    self
  }

  pub fn config(mut self, config: TrxEngineConfig) -> Self {
    self.config = Some(config);
    self
  }

  pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn AuthnProvider>) -> Self {
    self.providers.push((name.into(), provider));
    self
  }

  pub fn wrapper(mut self, wrapper: Arc<dyn TrxWrapper>) -> Self {
    self.wrapper = Some(wrapper);
    self
  }

  pub fn bucket(mut self, name: impl Into<String>, adapter: Arc<dyn BucketAdapter<JsonValue>>) -> Self {
    self.buckets.insert(name.into(), adapter);
    self
  }

  pub fn job(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
    self.jobs.insert(name.into(), handler);
    self
  }

  pub fn machine(mut self, name: impl Into<String>, handler: Arc<dyn MachineHandler>) -> Self {
    self.machines.insert(name.into(), handler);
    self
  }

  pub fn resource(mut self, name: impl Into<String>, def: ResourceDef) -> Self {
    self.resources.insert(name.into(), def);
    self
  }

  pub fn queue(mut self, name: impl Into<String>, sink: Arc<dyn QueueSink>) -> Self {
    self.queues.insert(name.into(), sink);
    self
  }

  pub fn topic(mut self, name: impl Into<String>, sink: Arc<dyn TopicSink>) -> Self {
    self.topics.insert(name.into(), sink);
    self
  }

  pub(crate) fn build(self, daemon: &str, default_config: &TrxEngineConfig, localizer: Option<Arc<dyn ErrorLocalizer>>) -> Module {
    let ledger = self.ledger.unwrap_or_else(|| Arc::new(MemoryBucketAdapter::<TrxRecord>::new()));
    let config = self.config.unwrap_or_else(|| default_config.clone());
    let mut engine = TrxEngine::new(&self.name, ledger, config).with_daemon(daemon);
    for (name, provider) in self.providers {
      engine = engine.with_provider(name, provider);
    }
    if let Some(localizer) = localizer {
      engine = engine.with_localizer(localizer);
    }
    if let Some(wrapper) = self.wrapper {
      engine = engine.with_wrapper(wrapper);
    }
    Module { name: self.name,
             engine: Arc::new(engine),
             buckets: self.buckets,
             jobs: self.jobs,
             machines: self.machines,
             resources: self.resources,
             queues: self.queues,
             topics: self.topics }
  }
}
