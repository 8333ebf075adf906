// Archivo: engine.rs
// Propósito: implementar `TrxEngine`, la autoridad única que crea,
// autentica, ejecuta, confirma y revierte las transacciones de un módulo y
// las persiste a través de un `BucketAdapter<TrxRecord>`.
//
// Nota: el rollback es de reporte. El motor no deshace escrituras previas
// en buckets; quien necesite atomicidad debe diseñar pasos idempotentes o
// compensatorios.
use crate::authn::{AuthnCtx, AuthnProvider, AuthnRequest, AuthnUser};
use crate::config::TrxEngineConfig;
use crate::errors::{BoxError, Result, TrxError};
use crate::i18n::ErrorLocalizer;
use crate::node::TrxNode;
use crate::repository::BucketAdapter;
use crate::status::TrxStatus;
use crate::trx::{Trx, TrxRecord};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Futuro en caja, `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resultado de la función de negocio que corre sobre el nodo raíz.
pub type TrxOutput = std::result::Result<JsonValue, BoxError>;

/// Decorador que el módulo puede interponer alrededor de cada ejecución
/// (métricas, reintentos externos, ...).
#[async_trait]
pub trait TrxWrapper: Send + Sync {
    async fn around<'a>(&'a self, root: &'a TrxNode, run: BoxFuture<'a, TrxOutput>) -> TrxOutput;
}

/// Opciones de una ejecución.
///
/// - `id`: reanudar/encadenar bajo un id conocido.
/// - `origin`: etiqueta del contexto llamador (por defecto `app:<module>`).
/// - `authn`: proveedores a satisfacer en la raíz.
/// - `inherit_authn`: contexto ya resuelto (delegación entre módulos).
/// - `idempotency_key`: si una ejecución previa con la misma clave terminó
///   bien, se devuelve la transacción persistida sin volver a ejecutar.
#[derive(Debug, Clone, Default)]
pub struct TrxOptions {
    pub id: Option<String>,
    pub origin: Option<String>,
    pub authn: AuthnRequest,
    pub inherit_authn: Option<AuthnCtx>,
    pub idempotency_key: Option<String>,
}

impl TrxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn authn(mut self, request: AuthnRequest) -> Self {
        self.authn = request;
        self
    }

    pub fn inherit_authn(mut self, ctx: AuthnCtx) -> Self {
        self.inherit_authn = Some(ctx);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Transacción terminada junto con su reporte.
#[derive(Debug, Clone)]
pub struct Finished {
    pub trx: Trx,
    pub status: TrxStatus,
}

/// Transacción retenida: ejecutada pero sin commit/rollback. El llamador
/// externo la injerta en su árbol (`TrxNode::merge`) y la registra con
/// `Trx::hold_node`, o la finaliza directamente con `commit`/`rollback`.
#[derive(Clone)]
pub struct HeldTrx {
    engine: Arc<TrxEngine>,
    trx: Trx,
    outcome: std::result::Result<JsonValue, TrxError>,
}

impl fmt::Debug for HeldTrx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldTrx")
         .field("module", &self.engine.module)
         .field("trx", &self.trx)
         .field("ok", &self.outcome.is_ok())
         .finish()
    }
}

impl HeldTrx {
    pub fn trx(&self) -> &Trx {
        &self.trx
    }

    pub fn root(&self) -> TrxNode {
        self.trx.root()
    }

    /// Resultado de la función ejecutada.
    pub fn outcome(&self) -> std::result::Result<&JsonValue, &TrxError> {
        self.outcome.as_ref()
    }

    pub fn status(&self) -> TrxStatus {
        self.trx.status()
    }

    /// Confirma (o revierte, si la función falló) y persiste.
    pub async fn commit(self) -> Result<TrxStatus> {
        let outcome = self.outcome.clone();
        self.engine.finalize(&self.trx, outcome).await?;
        Ok(self.trx.status())
    }

    /// Revierte con `error` y persiste.
    pub async fn rollback(self, error: TrxError) -> Result<TrxStatus> {
        let error = match &self.outcome {
            Err(own) => own.clone(),
            Ok(_) => error,
        };
        self.engine.finalize(&self.trx, Err(error)).await?;
        Ok(self.trx.status())
    }
}

/// Motor de transacciones de un módulo.
pub struct TrxEngine {
    module: String,
    daemon: Option<String>,
    adapter: Arc<dyn BucketAdapter<TrxRecord>>,
    providers: IndexMap<String, Arc<dyn AuthnProvider>>,
    localizer: Option<Arc<dyn ErrorLocalizer>>,
    wrapper: Option<Arc<dyn TrxWrapper>>,
    config: TrxEngineConfig,
    /// Clave de idempotencia → id de la transacción que terminó bien.
    idempotency_cache: Mutex<IndexMap<String, String>>,
}

impl TrxEngine {
    /// Crea el motor de `module` persistiendo a través de `adapter`.
    pub fn new(module: impl Into<String>, adapter: Arc<dyn BucketAdapter<TrxRecord>>, config: TrxEngineConfig) -> Self {
        Self { module: module.into(),
               daemon: None,
               adapter,
               providers: IndexMap::new(),
               localizer: None,
               wrapper: None,
               config,
               idempotency_cache: Mutex::new(IndexMap::new()) }
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn AuthnProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn ErrorLocalizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn TrxWrapper>) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    /// Nombre del daemon, usado para elegir la tabla de mensajes.
    pub fn with_daemon(mut self, daemon: impl Into<String>) -> Self {
        self.daemon = Some(daemon.into());
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn config(&self) -> &TrxEngineConfig {
        &self.config
    }

    pub fn adapter(&self) -> Arc<dyn BucketAdapter<TrxRecord>> {
        Arc::clone(&self.adapter)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|k| k.as_str())
    }

    fn new_trx(&self, id: Option<String>, origin: &str, authn: Option<AuthnCtx>) -> Trx {
        Trx::new(&self.module, origin, id, authn).with_localizer(self.localizer.clone(), self.daemon.clone())
    }

    /// Obtiene la transacción sobre la que correr:
    ///
    /// - sin `id`: transacción nueva, con registro provisional (`create`);
    /// - `id` con registro finalizado: se rehidrata (reanudación/replay);
    /// - `id` con registro en vuelo: se encadena una transacción nueva bajo
    ///   ese id (`put`), nunca se reutiliza el estado a medias;
    /// - `id` desconocido: transacción nueva con ese id (`create`).
    pub async fn get(&self, id: Option<&str>, origin: &str, authn: Option<AuthnCtx>) -> Result<Trx> {
        let fresh = self.new_trx(id.map(str::to_string), origin, authn);
        let root = fresh.root();
        let Some(id) = id else {
            self.persist_placeholder(&root, &fresh, false).await?;
            return Ok(fresh);
        };
        match self.adapter.get(&root, id).await? {
            Some(record) if record.is_finished() => {
                log::debug!("trx {} encontrada finalizada; se reanuda", id);
                Ok(Trx::from_record(record).with_localizer(self.localizer.clone(), self.daemon.clone()))
            }
            Some(_) => {
                log::warn!("trx {} sigue en vuelo; se encadena una transacción nueva con el mismo id", id);
                self.persist_placeholder(&root, &fresh, true).await?;
                Ok(fresh)
            }
            None => {
                self.persist_placeholder(&root, &fresh, false).await?;
                Ok(fresh)
            }
        }
    }

    async fn persist_placeholder(&self, root: &TrxNode, trx: &Trx, exists: bool) -> Result<()> {
        if !self.config.persist_placeholder {
            return Ok(());
        }
        if exists {
            self.adapter.put(root, trx.to_record()).await?;
        } else {
            self.adapter.create(root, trx.to_record()).await?;
        }
        Ok(())
    }

    /// Ejecuta `f` en una transacción nueva y devuelve su reporte. Nunca
    /// falla: los errores quedan en `TrxStatus::error`.
    pub async fn trx<F, Fut>(&self, f: F) -> TrxStatus
        where F: FnOnce(TrxNode) -> Fut + Send,
              Fut: Future<Output = TrxOutput> + Send
    {
        self.execute(TrxOptions::default(), f).await.status
    }

    /// Igual que `trx` con opciones explícitas.
    pub async fn trx_with<F, Fut>(&self, options: TrxOptions, f: F) -> TrxStatus
        where F: FnOnce(TrxNode) -> Fut + Send,
              Fut: Future<Output = TrxOutput> + Send
    {
        self.execute(options, f).await.status
    }

    /// Orquesta una ejecución completa: `get` → autenticación → `f(root)`
    /// (envuelta por el decorador del módulo, si hay) → commit o rollback.
    /// Devuelve la transacción terminada y su reporte.
    pub async fn execute<F, Fut>(&self, options: TrxOptions, f: F) -> Finished
        where F: FnOnce(TrxNode) -> Fut + Send,
              Fut: Future<Output = TrxOutput> + Send
    {
        let origin = self.origin_of(&options);
        let id = self.resolve_id(&options);
        let trx = match self.get(id.as_deref(), &origin, options.inherit_authn.clone()).await {
            Ok(trx) => trx,
            Err(err) => return self.failed_to_open(id, &origin, err),
        };
        if trx.is_finished() {
            log::info!("trx {} ya finalizada; se devuelve el estado persistido", trx.id());
            return Finished { status: trx.status(),
                              trx };
        }
        trx.set_idempotency_key(options.idempotency_key.clone());

        let outcome = self.run_root(&trx, &options.authn, f).await;
        if let Err(err) = self.finalize(&trx, outcome).await {
            log::error!("no se pudo persistir la trx {}: {}", trx.id(), err);
        }
        Finished { status: trx.status(),
                   trx }
    }

    /// Variante retenida: ejecuta `f` igual que `execute` pero no confirma
    /// ni revierte. Un fallo de `f` queda en `HeldTrx::outcome` para que el
    /// llamador lo relance; solo la persistencia se difiere.
    pub async fn trx_held<F, Fut>(self: &Arc<Self>, options: TrxOptions, f: F) -> Result<HeldTrx>
        where F: FnOnce(TrxNode) -> Fut + Send,
              Fut: Future<Output = TrxOutput> + Send
    {
        let origin = self.origin_of(&options);
        let id = self.resolve_id(&options);
        let trx = self.get(id.as_deref(), &origin, options.inherit_authn.clone()).await?;
        if trx.is_finished() {
            let status = trx.status();
            let outcome = match status.error {
                Some(err) => Err(err),
                None => Ok(status.output.unwrap_or(JsonValue::Null)),
            };
            return Ok(HeldTrx { engine: Arc::clone(self),
                                trx,
                                outcome });
        }
        trx.set_held(true);
        trx.set_idempotency_key(options.idempotency_key.clone());
        let outcome = self.run_root(&trx, &options.authn, f).await;
        Ok(HeldTrx { engine: Arc::clone(self),
                     trx,
                     outcome })
    }

    fn origin_of(&self, options: &TrxOptions) -> String {
        options.origin.clone().unwrap_or_else(|| format!("app:{}", self.module))
    }

    fn resolve_id(&self, options: &TrxOptions) -> Option<String> {
        options.id
               .clone()
               .or_else(|| options.idempotency_key.as_deref().and_then(|k| self.recall(k)))
    }

    async fn run_root<F, Fut>(&self, trx: &Trx, request: &AuthnRequest, f: F) -> std::result::Result<JsonValue, TrxError>
        where F: FnOnce(TrxNode) -> Fut + Send,
              Fut: Future<Output = TrxOutput> + Send
    {
        let root = trx.root();
        self.authenticate(&root, request).await?;
        let output = match &self.wrapper {
            Some(wrapper) => wrapper.around(&root, Box::pin(f(root.clone()))).await,
            None => f(root.clone()).await,
        };
        output.map_err(|e| root.wrap_error(e))
    }

    /// La transacción no pudo abrirse (adaptador caído, ...): se reporta
    /// como error sin persistir.
    fn failed_to_open(&self, id: Option<String>, origin: &str, err: TrxError) -> Finished {
        log::error!("no se pudo abrir la trx en {}: {}", self.module, err);
        let trx = self.new_trx(id, origin, None);
        trx.root().error(err);
        trx.on_finish();
        Finished { status: trx.status(),
                   trx }
    }

    /// Autentica `node`: invoca cada proveedor registrado que sea `eager`
    /// o que la petición nombre, y mezcla los resultados en el nodo.
    ///
    /// Un fallo de un proveedor solicitado aborta; un fallo de un proveedor
    /// solo `eager` se registra y se omite.
    pub async fn authenticate(&self, node: &TrxNode, request: &AuthnRequest) -> Result<()> {
        if self.providers.is_empty() {
            if request.is_empty() {
                return Ok(());
            }
            return Err(TrxError::no_providers_registered(&self.module));
        }
        if let Some(missing) = request.providers().find(|p| !self.providers.contains_key(*p)) {
            return Err(TrxError::no_provider_registered(&self.module, missing));
        }

        let mut tokens = IndexMap::new();
        let mut users = IndexMap::new();
        for (name, provider) in &self.providers {
            let requested = request.get(name);
            if requested.is_none() && !provider.eager() {
                continue;
            }
            match provider.authenticate(node, requested.flatten()).await {
                Ok(AuthnUser { user, token }) => {
                    tokens.insert(name.clone(), token);
                    users.insert(name.clone(), user);
                }
                Err(err) if requested.is_none() => {
                    log::debug!("proveedor eager {} sin usuario: {}", name, err);
                }
                Err(err) => return Err(err),
            }
        }
        if !users.is_empty() {
            node.add_authn(tokens, users);
        }
        Ok(())
    }

    /// Marca la raíz `ok` con `output`, finaliza y persiste.
    pub async fn commit(&self, trx: &Trx, output: JsonValue) -> Result<TrxStatus> {
        self.finalize(trx, Ok(output)).await?;
        Ok(trx.status())
    }

    /// Marca la raíz `error`, finaliza y persiste.
    pub async fn rollback(&self, trx: &Trx, error: TrxError) -> Result<TrxStatus> {
        self.finalize(trx, Err(error)).await?;
        Ok(trx.status())
    }

    /// Cierra la raíz, finaliza las sub-transacciones retenidas (commit si
    /// esta transacción y la retenida terminaron bien, rollback si no),
    /// registra el fin y persiste.
    fn finalize<'a>(&'a self, trx: &'a Trx, outcome: std::result::Result<JsonValue, TrxError>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if trx.is_finished() {
                return Ok(());
            }
            let root = trx.root();
            let committed = outcome.is_ok();
            let failure = match outcome {
                Ok(output) => {
                    root.ok(Some(output));
                    None
                }
                Err(err) => Some(root.error(err)),
            };

            for held in trx.take_held() {
                let held_outcome = match (&failure, held.outcome) {
                    (None, Ok(output)) => Ok(output),
                    (_, Err(own)) => Err(own),
                    (Some(err), Ok(_)) => Err(err.clone()),
                };
                if let Err(err) = held.engine.finalize(&held.trx, held_outcome).await {
                    log::error!("no se pudo finalizar la trx retenida {}: {}", held.trx.id(), err);
                }
            }

            trx.set_held(false);
            trx.on_finish();
            let status = trx.status();
            if committed {
                log::info!("commit trx {} [{}] ({} ms)", status.id, self.module, status.elapsed_ms);
                if let Some(key) = trx.idempotency_key() {
                    self.remember(key, status.id.clone());
                }
            } else {
                log::info!("rollback trx {} [{}] ({} ms)", status.id, self.module, status.elapsed_ms);
            }
            if self.config.log_status {
                log::info!("{}", status.summary());
            }
            self.adapter.put(&root, trx.to_record()).await?;
            Ok(())
        })
    }

    fn recall(&self, key: &str) -> Option<String> {
        self.idempotency_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn remember(&self, key: String, trx_id: String) {
        let capacity = self.config.idempotency_capacity;
        if capacity == 0 {
            return;
        }
        let mut cache = self.idempotency_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, trx_id);
        while cache.len() > capacity {
            cache.shift_remove_index(0);
        }
    }
}

/// Deriva una clave de idempotencia estable (blake3) a partir de sus
/// partes.
pub fn derive_idempotency_key(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}
