//! Shared worker fixtures and wire-level helpers for the scenarios

use serde_json::{json, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tesseradb::{
    AtomicIds, CatalogBuilder, ColumnDef, ColumnType, ComponentDef, MemoryBackend, Namespace,
    Permission, Persistence, SystemContext, SystemDef, TesseraError, Value, Worker, WorkerConfig,
};

fn ns() -> Namespace {
    Namespace::new("game").unwrap()
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn config() -> WorkerConfig {
    WorkerConfig {
        elevation_system: "login_test".to_string(),
        ..WorkerConfig::default()
    }
}

fn hp(permission: Permission) -> ComponentDef {
    ComponentDef::new(
        ns(),
        "HP",
        vec![
            ColumnDef::new("owner", ColumnType::I64).unique(),
            ColumnDef::new("value", ColumnType::I32),
        ],
        permission,
        Persistence::Persistent,
        "main",
    )
    .unwrap()
}

fn position() -> ComponentDef {
    ComponentDef::new(
        ns(),
        "Position",
        vec![
            ColumnDef::new("owner", ColumnType::I64).indexed(),
            ColumnDef::new("x", ColumnType::F32).indexed(),
            ColumnDef::new("y", ColumnType::F32),
        ],
        Permission::Everybody,
        Persistence::Persistent,
        "main",
    )
    .unwrap()
}

fn upsert_hp_system(name: &str, permission: Permission) -> SystemDef {
    SystemDef::new(
        ns(),
        name,
        permission,
        Arc::new(|ctx: &mut SystemContext, args: &[Json]| {
            let owner = args[0].as_i64().unwrap_or(0);
            let value = args[1].as_i64().unwrap_or(0);
            let mut row = ctx.update_or_insert("HP", &Value::Int(owner), "owner")?;
            row.set("value", Value::Int(value))?;
            ctx.update(row)?;
            Ok(None)
        }),
    )
    .unwrap()
    .with_components(["HP"])
}

/// Worker for S1–S5: open HP/Position plus the scenario Systems
pub fn game_worker() -> Arc<Worker> {
    init_tracing();
    let move_to = SystemDef::new(
        ns(),
        "move_to",
        Permission::Everybody,
        Arc::new(|ctx: &mut SystemContext, _args: &[Json]| {
            // Blind insert that collides with the live owner=1 row
            let mut row = ctx.new_row("HP")?;
            row.set("owner", Value::Int(1))?;
            row.set("value", Value::Int(5))?;
            ctx.insert(row)?;
            Ok(None)
        }),
    )
    .unwrap()
    .with_components(["HP"]);

    let use_hp = SystemDef::new(
        ns(),
        "use_hp",
        Permission::Everybody,
        Arc::new(|ctx: &mut SystemContext, args: &[Json]| {
            let owner = args[0].as_i64().unwrap_or(0);
            let amount = args[1].as_i64().unwrap_or(1);
            let Some(mut row) = ctx.get("HP", &Value::Int(owner), "owner")? else {
                return Err(TesseraError::logic("no HP row for owner"));
            };
            let value = row.get_int("value").unwrap_or(0);
            row.set("value", Value::Int(value - amount))?;
            ctx.update(row)?;
            Ok(None)
        }),
    )
    .unwrap()
    .with_components(["HP"]);

    let move_user = SystemDef::new(
        ns(),
        "move_user",
        Permission::User,
        Arc::new(|ctx: &mut SystemContext, args: &[Json]| {
            let owner = args[0].as_i64().unwrap_or(0);
            let x = args[1].as_f64().unwrap_or(0.0);
            let y = args[2].as_f64().unwrap_or(0.0);
            let mut row = ctx.update_or_insert("Position", &Value::Int(owner), "owner")?;
            row.set("x", Value::Float(x))?;
            row.set("y", Value::Float(y))?;
            ctx.update(row)?;
            Ok(None)
        }),
    )
    .unwrap()
    .with_components(["Position"]);

    let whoami = SystemDef::new(
        ns(),
        "whoami",
        Permission::User,
        Arc::new(|ctx: &mut SystemContext, _args: &[Json]| {
            Ok(Some(json!({ "caller": ctx.caller() })))
        }),
    )
    .unwrap();

    let builder = CatalogBuilder::new()
        .component(hp(Permission::Everybody))
        .unwrap()
        .component(position())
        .unwrap()
        .system(upsert_hp_system("update_or_insert_hp", Permission::User))
        .unwrap()
        .system(move_to)
        .unwrap()
        .system(use_hp)
        .unwrap()
        .system(move_user)
        .unwrap()
        .system(whoami)
        .unwrap();

    Worker::start(
        config(),
        builder,
        &ns(),
        MemoryBackend::new(),
        Arc::new(AtomicIds::default()),
    )
    .unwrap()
}

/// Worker for S6: HP carries OWNER permission
pub fn owner_worker() -> Arc<Worker> {
    init_tracing();
    let builder = CatalogBuilder::new()
        .component(hp(Permission::Owner))
        .unwrap()
        .system(upsert_hp_system("seed_hp", Permission::User))
        .unwrap();

    Worker::start(
        config(),
        builder,
        &ns(),
        MemoryBackend::new(),
        Arc::new(AtomicIds::default()),
    )
    .unwrap()
}

/// Dispatch an RPC and return the `rsp` payload, failing on error envelopes
pub async fn rpc(worker: &Arc<Worker>, conn: u64, message: Json) -> Json {
    let replies = worker.handle_message(conn, &message).await.unwrap();
    let json = replies[0].to_json();
    assert_eq!(json[0], "rsp", "unexpected reply {}", json);
    assert!(
        json[1].get("error").is_none(),
        "rpc failed: {} (request {})",
        json[1],
        message
    );
    json[1].clone()
}

/// Dispatch a subscribe and return the full `subOk` array
pub async fn sub_ok(worker: &Arc<Worker>, conn: u64, message: Json) -> Json {
    let replies = worker.handle_message(conn, &message).await.unwrap();
    let json = replies[0].to_json();
    assert_eq!(json[0], "subOk", "unexpected reply {}", json);
    json
}

/// Await the next `updt` push for a connection
pub async fn next_update(
    worker: &Arc<Worker>,
    conn: u64,
) -> (String, serde_json::Map<String, Json>) {
    let push = tokio::time::timeout(Duration::from_secs(1), worker.next_push(conn))
        .await
        .expect("updt within a second")
        .expect("queue open");
    let json = push.to_json();
    assert_eq!(json[0], "updt", "unexpected push {}", json);
    (
        json[1].as_str().unwrap().to_string(),
        json[2].as_object().unwrap().clone(),
    )
}

/// Collect every push that arrives within a short quiescence window
pub async fn drain_updates(
    worker: &Arc<Worker>,
    conn: u64,
) -> Vec<(String, serde_json::Map<String, Json>)> {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), worker.next_push(conn)).await {
            Ok(Some(push)) => {
                let json = push.to_json();
                if json[0] == "updt" {
                    out.push((
                        json[1].as_str().unwrap().to_string(),
                        json[2].as_object().unwrap().clone(),
                    ));
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    out
}
