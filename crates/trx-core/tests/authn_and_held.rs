use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use trx_core::{AuthnProvider, AuthnRequest, AuthnUser, MemoryBucketAdapter, NodeState, StaticAuthnProvider, TrxEngine,
               TrxEngineConfig, TrxError, TrxNode, TrxOptions, TrxRecord};

fn users_provider() -> Arc<StaticAuthnProvider> {
  Arc::new(StaticAuthnProvider::new().user("t-ana", json!({"name": "ana"})))
}

struct Anonymous;

#[async_trait]
impl AuthnProvider for Anonymous {
  fn eager(&self) -> bool {
    true
  }

  async fn authenticate(&self, _node: &TrxNode, _token: Option<&str>) -> trx_core::Result<AuthnUser> {
    Ok(AuthnUser { user: json!({"anonymous": true}),
                   token: String::new() })
  }
}

#[tokio::test]
async fn requested_provider_resolves_user_for_every_descendant() {
  let engine = TrxEngine::new("mod", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default())
    .with_provider("user", users_provider());

  let options = TrxOptions::new().authn(AuthnRequest::new().token("user", "t-ana"));
  let status = engine.trx_with(options, |root| async move {
                       let node = root.make_child_node("mod", "resource", "r");
                       node.open("view", None);
                       node.check_authn(&["user"])?;
                       let user = node.user("user").unwrap_or_default();
                       node.ok(Some(user.clone()));
                       Ok(user)
                     })
                     .await;
  assert!(status.is_ok(), "{}", status.summary());
  assert_eq!(status.output, Some(json!({"name": "ana"})));
}

#[tokio::test]
async fn invalid_token_for_requested_provider_aborts() {
  let engine = TrxEngine::new("mod", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default())
    .with_provider("user", users_provider());
  let options = TrxOptions::new().authn(AuthnRequest::new().token("user", "falso"));
  let status = engine.trx_with(options, |_root| async move { Ok(json!("no debería correr")) }).await;
  assert_eq!(status.state, NodeState::Error);
  assert_eq!(status.error.unwrap().name, "Unauthorized");
  assert!(status.output.is_none());
}

#[tokio::test]
async fn unknown_or_missing_providers_are_reported() {
  let bare = TrxEngine::new("mod", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default());
  let status = bare.trx_with(TrxOptions::new().authn(AuthnRequest::new().provider("user")), |_root| async move { Ok(json!(1)) })
                   .await;
  assert_eq!(status.error.unwrap().name, "Authn.NoProvidersRegistered");

  // without a request, a module with no providers runs normally
  assert!(bare.trx(|_root| async move { Ok(json!(1)) }).await.is_ok());

  let engine = TrxEngine::new("mod", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default())
    .with_provider("user", users_provider());
  let status = engine.trx_with(TrxOptions::new().authn(AuthnRequest::new().provider("api")), |_root| async move { Ok(json!(1)) })
                     .await;
  let err = status.error.unwrap();
  assert_eq!(err.name, "Authn.NoProviderRegistered");
  assert_eq!(err.data.unwrap()["provider"], "api");
}

#[tokio::test]
async fn eager_providers_run_unrequested_and_failures_are_skipped() {
  let engine = TrxEngine::new("mod", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default())
    .with_provider("anon", Arc::new(Anonymous))
    .with_provider("user", Arc::new(StaticAuthnProvider::new().as_eager()));

  let status = engine.trx(|root| async move {
                       assert!(root.check_authn(&["user"]).is_err());
                       root.check_authn(&["anon"])?;
                       Ok(root.user("anon").unwrap_or_default())
                     })
                     .await;
  assert!(status.is_ok(), "{}", status.summary());
  assert_eq!(status.output, Some(json!({"anonymous": true})));
}

#[tokio::test]
async fn held_trx_commits_with_its_caller() {
  let caller_ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
  let callee_ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
  let caller = TrxEngine::new("a", caller_ledger.clone(), TrxEngineConfig::default());
  let callee = Arc::new(TrxEngine::new("b", callee_ledger.clone(), TrxEngineConfig::default()));

  let held_id = Arc::new(std::sync::Mutex::new(String::new()));
  let slot = held_id.clone();
  let callee_engine = callee.clone();
  let status = caller.trx(|root| async move {
                       let ext = root.make_child_node("a", "externals", "b::job:j");
                       ext.open("run", None);
                       let held = callee_engine.trx_held(TrxOptions::new().origin("ext:test"), |r| async move {
                                                 let n = r.make_child_node("b", "job", "j");
                                                 n.open("run", None);
                                                 n.ok(Some(json!("hecho")));
                                                 Ok(json!("hecho"))
                                               })
                                               .await?;
                       *slot.lock().unwrap() = held.trx().id();
                       assert!(held.trx().is_held());
                       // not persisted as finished while the caller runs
                       assert!(!held.trx().is_finished());
                       ext.merge(held.trx())?;
                       let out = held.outcome().cloned().map_err(|e| ext.error(e.clone()))?;
                       root.trx().hold_node(held);
                       ext.ok(Some(out.clone()));
                       Ok(out)
                     })
                     .await;

  assert!(status.is_ok(), "{}", status.summary());
  assert_eq!(status.find("b::job:j").unwrap().state, NodeState::Ok);
  let id = held_id.lock().unwrap().clone();
  let record = callee_ledger.peek(&id).unwrap();
  assert!(record.is_finished());
  assert_eq!(record.state(), NodeState::Ok);
  assert_eq!(record.origin, "ext:test");
}

#[tokio::test]
async fn held_trx_rolls_back_when_the_caller_fails() {
  let callee_ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
  let caller = TrxEngine::new("a", Arc::new(MemoryBucketAdapter::new()), TrxEngineConfig::default());
  let callee = Arc::new(TrxEngine::new("b", callee_ledger.clone(), TrxEngineConfig::default()));

  let callee_engine = callee.clone();
  let status = caller.trx(|root| async move {
                       let held = callee_engine.trx_held(TrxOptions::new(), |_r| async move { Ok(json!(1)) }).await?;
                       root.trx().hold_node(held);
                       Err(TrxError::new("App.Boom", 500, "falla tras delegar").into())
                     })
                     .await;

  assert_eq!(status.state, NodeState::Error);
  let records = callee_ledger.snapshot();
  assert_eq!(records.len(), 1);
  assert!(records[0].is_finished());
  assert_eq!(records[0].state(), NodeState::Error);
  let root = records[0].nodes.iter().find(|n| n.id == "root").unwrap();
  assert_eq!(root.error.as_ref().unwrap().name, "App.Boom");
}

#[tokio::test]
async fn held_trx_can_be_finalized_directly() {
  let ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
  let engine = Arc::new(TrxEngine::new("b", ledger.clone(), TrxEngineConfig::default()));

  let failed = engine.trx_held(TrxOptions::new(), |_r| async move { Err(TrxError::obj_not_found("users", "1").into()) })
                     .await
                     .unwrap();
  assert_eq!(failed.outcome().unwrap_err().name, "Bucket.ObjNotFound");
  // commit of a failed run rolls back with its own error
  let status = failed.commit().await.unwrap();
  assert_eq!(status.state, NodeState::Error);
  assert_eq!(status.error.unwrap().name, "Bucket.ObjNotFound");

  let ok = engine.trx_held(TrxOptions::new(), |_r| async move { Ok(json!(5)) }).await.unwrap();
  let status = ok.rollback(TrxError::unknown("cancelado")).await.unwrap();
  assert_eq!(status.error.unwrap().message, "cancelado");
  assert_eq!(ledger.len(), 2);
}
