//! A small users API served from the `demos/api` tree.
//!
//! ```text
//! cargo run --example users_api                       # defaults: demos/, 127.0.0.1:3000
//! cargo run --example users_api demos/users_api.toml  # settings from a file
//!
//! curl localhost:3000/users
//! curl -X POST localhost:3000/users -H 'content-type: application/json' \
//!      -d '{"firstName":"Tony","lastName":"Stark","email":"tony@stark.com"}'
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;
use treeroute::middleware::{Flow, MiddlewareHandler, from_fn, from_sync, require_json};
use treeroute::validation::{BodySchema, Property, Rule, Schema, ValidationConfig, validate};
use treeroute::{AppBuilder, AppConfig, HttpError, Modules};

#[derive(Clone, Default)]
struct Store {
    users: Arc<RwLock<BTreeMap<u64, Value>>>,
    next_id: Arc<AtomicU64>,
}

fn store(ctx: &treeroute::Context) -> Result<Store, HttpError> {
    ctx.extensions()
        .get::<Store>()
        .cloned()
        .ok_or_else(|| HttpError::internal_server_error("user store is not attached"))
}

fn user_id(ctx: &treeroute::Context) -> Result<u64, HttpError> {
    ctx.params()
        .get("userId")
        .and_then(|id| id.parse().ok())
        .ok_or_else(HttpError::not_found)
}

fn user_schema() -> Schema {
    Schema::new().body(
        BodySchema::new()
            .property("firstName", Property::string())
            .property("lastName", Property::string())
            .property("email", Property::string().rule(Rule::format("email")))
            .require("firstName")
            .require("lastName"),
    )
}

fn list() -> MiddlewareHandler {
    from_fn(|ctx| {
        Box::pin(async move {
            let store = store(ctx)?;
            let users: Vec<Value> = store.users.read().await.values().cloned().collect();
            Ok(Flow::json(Value::Array(users)))
        })
    })
}

fn create() -> MiddlewareHandler {
    from_fn(|ctx| {
        Box::pin(async move {
            let store = store(ctx)?;
            let id = store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let mut user = ctx.parsed_body().cloned().unwrap_or_else(|| json!({}));
            user["id"] = json!(id);
            store.users.write().await.insert(id, user.clone());
            info!(id, "user created");
            Ok(Flow::Respond(
                treeroute::Response::json(user).with_status(treeroute::StatusCode::Created),
            ))
        })
    })
}

fn show() -> MiddlewareHandler {
    from_fn(|ctx| {
        Box::pin(async move {
            let (store, id) = (store(ctx)?, user_id(ctx)?);
            let user = store.users.read().await.get(&id).cloned();
            user.map(Flow::json).ok_or_else(HttpError::not_found)
        })
    })
}

fn update() -> MiddlewareHandler {
    from_fn(|ctx| {
        Box::pin(async move {
            let (store, id) = (store(ctx)?, user_id(ctx)?);
            let mut users = store.users.write().await;
            let Some(existing) = users.get_mut(&id) else {
                return Err(HttpError::not_found());
            };
            let mut user = ctx.parsed_body().cloned().unwrap_or_else(|| json!({}));
            user["id"] = json!(id);
            *existing = user.clone();
            Ok(Flow::json(user))
        })
    })
}

fn remove() -> MiddlewareHandler {
    from_fn(|ctx| {
        Box::pin(async move {
            let (store, id) = (store(ctx)?, user_id(ctx)?);
            match store.users.write().await.remove(&id) {
                Some(_) => Ok(Flow::Respond(treeroute::Response::new(
                    treeroute::StatusCode::NoContent,
                ))),
                None => Err(HttpError::not_found()),
            }
        })
    })
}

fn modules(validation: &ValidationConfig) -> Result<Modules, Box<dyn std::error::Error>> {
    let shared = Store::default();

    Ok(Modules::new()
        .handler(
            "get",
            from_sync(|_| Ok(Flow::json(json!({ "service": "users", "status": "ok" })))),
        )
        .meta(
            "meta",
            vec![from_sync(|ctx| {
                info!(method = %ctx.method(), path = ctx.path(), "incoming request");
                Ok(Flow::Continue)
            })],
        )
        .meta(
            "users/meta",
            vec![from_sync(move |ctx| {
                ctx.extensions_mut().insert(shared.clone());
                Ok(Flow::Continue)
            })],
        )
        .handler("users/get", list())
        .chain(
            "users/post",
            vec![require_json(), validate(validation, user_schema())?, create()],
        )
        .handler("users/:userId/get", show())
        .chain(
            "users/:userId/put",
            vec![require_json(), validate(validation, user_schema())?, update()],
        )
        .handler("users/:userId/delete", remove()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos")),
    };

    let app = AppBuilder::from_config(config)
        .modules(modules(&ValidationConfig::new())?)
        .on_close(|| info!("goodbye"))
        .build()?;

    info!(address = app.address(), routes = ?app.routes(), "users API ready");

    app.serve(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
