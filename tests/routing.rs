//! End-to-end routing scenarios, dispatched in-process against temporary trees.

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;
use treeroute::middleware::{Flow, MiddlewareHandler, from_fn, from_sync, require_json};
use treeroute::validation::{BodySchema, Property, Rule, Schema, ValidationConfig, validate};
use treeroute::{App, AppBuilder, HttpError, Method, Modules, Request, StartupError, StatusCode};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates `<tmp>/api/<file>` for every entry.
fn tree(files: &[&str]) -> TempDir {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    for file in files {
        let path = dir.path().join("api").join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }
    dir
}

fn text(body: &'static str) -> MiddlewareHandler {
    from_sync(move |_| Ok(Flow::text(body)))
}

struct Trail(Vec<&'static str>);

fn mark(name: &'static str) -> MiddlewareHandler {
    from_sync(move |ctx| {
        let ext = ctx.extensions_mut();
        match ext.get_mut::<Trail>() {
            Some(trail) => trail.0.push(name),
            None => {
                ext.insert(Trail(vec![name]));
            }
        }
        Ok(Flow::Continue)
    })
}

fn report() -> MiddlewareHandler {
    from_sync(|ctx| {
        let mut trail = ctx
            .extensions()
            .get::<Trail>()
            .map(|t| t.0.clone())
            .unwrap_or_default();
        trail.push("module");
        Ok(Flow::text(trail.join("|")))
    })
}

fn users_app(root: &Path) -> AppBuilder {
    App::builder(root).modules(
        Modules::new()
            .handler("get", text("Hello, World!"))
            .handler("users/get", text("Listing users"))
            .handler(
                "users/:userId/get",
                from_fn(|ctx| {
                    Box::pin(async move {
                        let id = ctx.params().get("userId").unwrap_or_default().to_owned();
                        Ok(Flow::text(format!("Fetching user: {id}")))
                    })
                }),
            ),
    )
}

const USERS_TREE: &[&str] = &["get.rs", "users/get.rs", "users/:userId/get.rs"];

async fn get(app: &App, url: &str) -> treeroute::Response {
    app.dispatch(Request::new(Method::Get, url)).await
}

// ── basic requests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_on_root() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.payload(), b"Hello, World!");
}

#[tokio::test]
async fn request_on_dynamic_route() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();

    let response = get(&app, "/users").await;
    assert_eq!(response.payload(), b"Listing users");

    let response = get(&app, "/users/123").await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.payload(), b"Fetching user: 123");
}

#[tokio::test]
async fn route_summary_lists_every_pattern() {
    let dir = tree(&["users/get.rs", "users/post.rs", "users/:userId/get.rs"]);
    let app = App::builder(dir.path())
        .modules(
            Modules::new()
                .handler("users/get", text("list"))
                .handler("users/post", text("create"))
                .handler("users/:userId/get", text("show")),
        )
        .build()
        .unwrap();

    let routes = app.routes();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes["/users"], [Method::Get, Method::Post]);
    assert_eq!(routes["/users/:userId"], [Method::Get]);
}

// ── existence ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resource_does_not_exist() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    for url in ["/orders", "/users/1/posts", "/Users"] {
        let response = get(&app, url).await;
        assert_eq!(response.status(), StatusCode::NotFound, "{url}");
        assert!(response.payload().is_empty());
    }
}

#[tokio::test]
async fn method_does_not_exist() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    let response = app.dispatch(Request::new(Method::Delete, "/users/1")).await;
    assert_eq!(response.status(), StatusCode::MethodNotAllowed);

    let response = app.dispatch(Request::new(Method::Options, "/users")).await;
    assert_eq!(response.status(), StatusCode::MethodNotAllowed);
}

#[tokio::test]
async fn lowercase_methods_are_normalized() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    let method: Method = "get".parse().unwrap();
    let response = app.dispatch(Request::new(method, "/users")).await;
    assert_eq!(response.status(), StatusCode::Ok);
}

// ── middleware ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn all_levels_of_middleware_run_in_order() {
    let dir = tree(&["meta.rs", "users/meta.rs", "users/get.rs"]);
    let app = App::builder(dir.path())
        .middleware(mark("root"))
        .modules(
            Modules::new()
                .meta("meta", vec![mark("parent-meta")])
                .meta("users/meta", vec![mark("sibling-meta")])
                .handler("users/get", report()),
        )
        .build()
        .unwrap();

    let response = get(&app, "/users").await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.payload(), b"root|parent-meta|sibling-meta|module");
}

#[tokio::test]
async fn sibling_meta_does_not_leak() {
    let dir = tree(&["users/meta.rs", "users/get.rs", "orders/get.rs"]);
    let app = App::builder(dir.path())
        .modules(
            Modules::new()
                .meta("users/meta", vec![mark("users-meta")])
                .handler("users/get", report())
                .handler("orders/get", report()),
        )
        .build()
        .unwrap();

    assert_eq!(get(&app, "/users").await.payload(), b"users-meta|module");
    assert_eq!(get(&app, "/orders").await.payload(), b"module");
}

#[tokio::test]
async fn meta_can_short_circuit() {
    let dir = tree(&["users/meta.rs", "users/get.rs"]);
    let app = App::builder(dir.path())
        .modules(
            Modules::new()
                .meta(
                    "users/meta",
                    vec![from_sync(|ctx| {
                        if ctx.headers().contains("authorization") {
                            Ok(Flow::Continue)
                        } else {
                            Err(HttpError::unauthorized("missing credentials"))
                        }
                    })],
                )
                .handler("users/get", text("secret")),
        )
        .build()
        .unwrap();

    assert_eq!(get(&app, "/users").await.status(), StatusCode::Unauthorized);

    let request = Request::new(Method::Get, "/users").header("Authorization", "Bearer t");
    assert_eq!(app.dispatch(request).await.payload(), b"secret");
}

#[tokio::test]
async fn a_route_module_can_export_a_chain() {
    let dir = tree(&["users/post.rs"]);
    let app = App::builder(dir.path())
        .modules(Modules::new().chain(
            "users/post",
            vec![
                require_json(),
                from_sync(|ctx| {
                    let name = ctx
                        .parsed_body()
                        .and_then(|body| body["name"].as_str())
                        .unwrap_or_default()
                        .to_owned();
                    Ok(Flow::json(json!({ "created": name })))
                }),
            ],
        ))
        .build()
        .unwrap();

    let request = Request::new(Method::Post, "/users")
        .header("Content-Type", "application/json")
        .with_body(r#"{"name":"Tony"}"#);
    let response = app.dispatch(request).await;
    assert_eq!(response.payload_json(), Some(json!({ "created": "Tony" })));

    let request = Request::new(Method::Post, "/users")
        .header("Content-Type", "text/plain")
        .with_body(r#"{"name":"Tony"}"#);
    assert_eq!(
        app.dispatch(request).await.status(),
        StatusCode::UnsupportedMediaType
    );
}

// ── url handling ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mount_path_prefixes_every_route() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).mount_path("/api/v1").build().unwrap();

    assert_eq!(get(&app, "/api/v1/users/9").await.payload(), b"Fetching user: 9");
    assert_eq!(get(&app, "/api/v1").await.payload(), b"Hello, World!");
    assert_eq!(get(&app, "/users").await.status(), StatusCode::NotFound);
}

#[tokio::test]
async fn querystring_is_parsed() {
    let dir = tree(&["search/get.rs"]);
    let app = App::builder(dir.path())
        .modules(Modules::new().handler(
            "search/get",
            from_sync(|ctx| {
                let term = ctx.query_param("q").unwrap_or("none").to_owned();
                let page = ctx.query_param("page").unwrap_or("1").to_owned();
                Ok(Flow::text(format!("{term}@{page}")))
            }),
        ))
        .build()
        .unwrap();

    assert_eq!(get(&app, "/search?q=iron+man&page=2").await.payload(), b"iron man@2");
    assert_eq!(get(&app, "/search").await.payload(), b"none@1");
}

#[tokio::test]
async fn trailing_slash_is_an_extra_segment() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    let response = get(&app, "/users/").await;
    assert_eq!(response.payload(), b"Fetching user: ");
}

// ── endpoint errors ───────────────────────────────────────────────────────────

#[tokio::test]
async fn middleware_throws_error() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path())
        .middleware(from_sync(|_| Err(HttpError::from_source(std::fmt::Error))))
        .build()
        .unwrap();
    let response = get(&app, "/users").await;
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert!(response.payload().is_empty());
}

#[tokio::test]
async fn resource_throws_request_error_with_payload() {
    let dir = tree(&["get.rs"]);
    let app = App::builder(dir.path())
        .modules(Modules::new().handler(
            "get",
            from_sync(|_| Err(HttpError::unprocessable_content(json!({ "firstName": "Required" })))),
        ))
        .build()
        .unwrap();

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::UnprocessableContent);
    assert_eq!(response.headers().get("content-type"), Some("application/json"));
    assert_eq!(response.payload_json(), Some(json!({ "firstName": "Required" })));
}

#[tokio::test]
async fn validation_failures_become_422() {
    let dir = tree(&["users/:userId/put.rs"]);
    let schema = Schema::new().param("userId", Rule::format("uuid")).body(
        BodySchema::new()
            .property("firstName", Property::string())
            .require("firstName"),
    );
    let app = App::builder(dir.path())
        .modules(Modules::new().chain(
            "users/:userId/put",
            vec![
                validate(&ValidationConfig::new(), schema).unwrap(),
                from_sync(|ctx| Ok(Flow::json(ctx.parsed_body().cloned().unwrap_or_default()))),
            ],
        ))
        .build()
        .unwrap();

    let request = Request::new(Method::Put, "/users/123").with_body(r#"{"nickname":"Shellhead"}"#);
    let response = app.dispatch(request).await;
    assert_eq!(response.status(), StatusCode::UnprocessableContent);
    assert_eq!(
        response.payload_json(),
        Some(json!([
            { "path": "params.userId", "message": "must match format \"uuid\"" },
            { "path": "body", "message": "must have required property 'firstName'" },
        ]))
    );

    let request = Request::new(Method::Put, "/users/3e4666bf-d5e5-4aa7-b8ce-cefe41c7568a")
        .with_body(r#"{"firstName":"Tony","nickname":"Shellhead"}"#);
    let response = app.dispatch(request).await;
    assert_eq!(response.payload_json(), Some(json!({ "firstName": "Tony" })));
}

#[tokio::test]
async fn malformed_json_body_is_400() {
    let dir = tree(USERS_TREE);
    let app = users_app(dir.path()).build().unwrap();
    let request = Request::new(Method::Get, "/users").with_body("{");
    assert_eq!(app.dispatch(request).await.status(), StatusCode::BadRequest);
}

// ── initialization errors ─────────────────────────────────────────────────────

#[test]
fn unsupported_file_in_api_directory() {
    let dir = tree(&["users/get.rs", "users/README.md"]);
    let err = App::builder(dir.path())
        .modules(Modules::new().handler("users/get", text("x")))
        .build()
        .unwrap_err();
    assert!(err.is_structural());
    assert!(err.to_string().starts_with("directory contains illegal files:\n"));
    assert!(err.to_string().ends_with("users"));
}

#[test]
fn leaf_directory_has_no_method_file() {
    let dir = tree(&["get.rs", "users/meta.rs"]);
    let err = App::builder(dir.path())
        .modules(Modules::new().handler("get", text("x")))
        .build()
        .unwrap_err();
    assert!(matches!(err, StartupError::LeafWithoutHandler { .. }));
}

#[test]
fn method_file_has_no_default_export() {
    let dir = tree(&["users/get.rs"]);
    let err = App::builder(dir.path()).build().unwrap_err();
    assert!(err.is_configuration());
    match err {
        StartupError::MissingDefaultExport { path } => assert!(path.ends_with("users/get.rs")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_api_directory() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = App::builder(dir.path()).build().unwrap_err();
    assert!(matches!(err, StartupError::Io { .. }));
}

#[test]
fn duplicate_routes_are_rejected() {
    let dir = tree(&["users/:id/get.rs", "users/:userId/get.rs"]);
    let err = App::builder(dir.path())
        .modules(
            Modules::new()
                .handler("users/:id/get", text("a"))
                .handler("users/:userId/get", text("b")),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, StartupError::DuplicateRoute { .. }));
}

// ── determinism ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn literal_routes_beat_parameters_regardless_of_names() {
    let dir = tree(&["users/:userId/get.rs", "users/me/get.rs", "users/aaa/get.rs"]);
    let app = App::builder(dir.path())
        .modules(
            Modules::new()
                .handler("users/:userId/get", text("by id"))
                .handler("users/me/get", text("me"))
                .handler("users/aaa/get", text("aaa")),
        )
        .build()
        .unwrap();

    assert_eq!(get(&app, "/users/me").await.payload(), b"me");
    assert_eq!(get(&app, "/users/aaa").await.payload(), b"aaa");
    assert_eq!(get(&app, "/users/zzz").await.payload(), b"by id");
}

#[test]
fn builds_are_deterministic() {
    let dir = tree(&["get.rs", "b/get.rs", "a/:x/get.rs", "a/get.rs", "a/post.rs"]);
    let modules = Modules::new()
        .handler("get", text("."))
        .handler("b/get", text("."))
        .handler("a/:x/get", text("."))
        .handler("a/get", text("."))
        .handler("a/post", text("."));
    let first = App::builder(dir.path()).modules(modules.clone()).build().unwrap();
    let second = App::builder(dir.path()).modules(modules).build().unwrap();
    assert_eq!(first.routes(), second.routes());
}
