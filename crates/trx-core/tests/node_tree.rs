use indexmap::IndexMap;
use serde_json::json;
use trx_core::{AuthnCtx, NodeState, Trx, ROOT_ID};

fn authn_for(provider: &str, user: serde_json::Value) -> (IndexMap<String, String>, IndexMap<String, serde_json::Value>) {
  let mut tokens = IndexMap::new();
  tokens.insert(provider.to_string(), format!("tok-{}", provider));
  let mut users = IndexMap::new();
  users.insert(provider.to_string(), user);
  (tokens, users)
}

#[test]
fn new_trx_has_an_open_root() {
  let trx = Trx::new("mod", "app:test", None, None);
  let root = trx.root();
  assert_eq!(root.id(), ROOT_ID);
  assert!(root.is_root());
  assert_eq!(root.state(), NodeState::Open);
  assert_eq!(trx.len(), 1);
  assert!(!trx.is_finished());
  assert!(root.global_id().starts_with(&trx.id()));
}

#[test]
fn terminal_states_are_not_overwritten() {
  let trx = Trx::new("mod", "app:test", None, None);
  let node = trx.root().make_child_node("mod", "bucket", "b");
  node.open("create", Some(json!(1)));
  node.ok(Some(json!("primero")));

  node.error(trx_core::TrxError::unknown("tarde"));
  node.open("update", None);
  node.ok(Some(json!("segundo")));

  let st = node.status().unwrap();
  assert_eq!(st.state, NodeState::Ok);
  assert_eq!(st.action.as_deref(), Some("create"));
  assert_eq!(st.output, Some(json!("primero")));
  assert!(st.error.is_none());
}

#[test]
fn children_are_recorded_in_call_order_with_parent_links() {
  let trx = Trx::new("mod", "app:test", None, None);
  let root = trx.root();
  let a = root.make_child_node("mod", "job", "a");
  let b = root.make_child_node("mod", "job", "b");
  let a1 = a.make_child_node("mod", "bucket", "x");

  let ids: Vec<String> = root.children().iter().map(|c| c.id().to_string()).collect();
  assert_eq!(ids, vec![a.id().to_string(), b.id().to_string()]);
  assert_eq!(a1.parent().unwrap().id(), a.id());
  assert_eq!(a1.scope(), "mod::bucket:x");

  let status = trx.status();
  assert_eq!(status.nodes.len(), 2);
  assert_eq!(status.nodes[0].nodes[0].scope, "mod::bucket:x");
  assert!(status.find("mod::bucket:x").is_some());
}

#[test]
fn authn_is_inherited_and_closest_node_wins() {
  let trx = Trx::new("mod", "app:test", None, None);
  let root = trx.root();
  let (t, u) = authn_for("user", json!({"name": "root"}));
  root.add_authn(t, u);

  let child = root.make_child_node("mod", "job", "j");
  let grandchild = child.make_child_node("mod", "resource", "r");
  assert_eq!(grandchild.user("user"), Some(json!({"name": "root"})));
  assert!(grandchild.check_authn(&["user"]).is_ok());

  // added after the descendant existed and only on the middle node
  let (t, u) = authn_for("user", json!({"name": "child"}));
  child.add_authn(t, u);
  assert_eq!(grandchild.user("user"), Some(json!({"name": "child"})));
  assert_eq!(root.user("user"), Some(json!({"name": "root"})));
}

#[test]
fn check_authn_requires_any_listed_provider() {
  let mut ctx = AuthnCtx::default();
  ctx.tokens.insert("api".into(), "k".into());
  ctx.users.insert("api".into(), json!({"client": 1}));
  let trx = Trx::new("mod", "app:test", None, Some(ctx));
  let node = trx.root().make_child_node("mod", "resource", "r");

  assert!(node.check_authn::<&str>(&[]).is_ok());
  assert!(node.check_authn(&["user", "api"]).is_ok());
  let err = node.check_authn(&["user"]).unwrap_err();
  assert_eq!(err.name, "Unauthorized");
  assert_eq!(err.status, 401);
}

#[test]
fn merge_grafts_the_other_tree_and_renames_collisions() {
  let caller = Trx::new("a", "app:a", None, None);
  let ext = caller.root().make_child_node("a", "externals", "b::bucket:users");
  ext.open("readOne", Some(json!("7")));

  let callee = Trx::new("b", "ext:x", None, None);
  let bucket = callee.root().make_child_node("b", "bucket", "users");
  bucket.open("readOne", Some(json!("7")));
  bucket.ok(Some(json!({"id": 7})));
  caller.root().make_child_node("a", "job", "other");

  ext.merge(&callee).unwrap();
  ext.ok(Some(json!({"id": 7})));

  let status = caller.status();
  let ext_status = status.find("a::externals:b::bucket:users").unwrap();
  assert_eq!(ext_status.nodes.len(), 1);
  assert_eq!(ext_status.nodes[0].scope, "b::bucket:users");
  assert_eq!(ext_status.nodes[0].output, Some(json!({"id": 7})));
  // grafted node keeps its global id
  assert_eq!(ext_status.nodes[0].global_id, bucket.global_id());
  assert!(ext.merge(&caller).is_err());
}

#[test]
fn merging_twice_does_not_collide() {
  let caller = Trx::new("a", "app:a", None, None);
  let target = caller.root().make_child_node("a", "externals", "b::job:j");
  let callee = Trx::new("b", "ext:x", None, None);
  callee.root().make_child_node("b", "job", "j").ok(None);

  target.merge(&callee).unwrap();
  target.merge(&callee).unwrap();
  let nodes = target.status().unwrap().nodes;
  assert_eq!(nodes.len(), 2);
  assert_ne!(caller.len(), 0);
  assert_eq!(caller.len(), 4);
}

#[test]
fn records_rehydrate_into_the_same_tree() {
  let trx = Trx::new("mod", "app:test", Some("r-1".into()), None);
  let node = trx.root().make_child_node("mod", "bucket", "b");
  node.open("create", None);
  node.ok(Some(json!({"id": 1})));
  trx.root().ok(Some(json!("fin")));
  trx.on_finish();

  let record = trx.to_record();
  assert!(record.is_finished());
  let back = Trx::from_record(record);
  assert_eq!(back.id(), "r-1");
  assert_eq!(back.status(), trx.status());
}
