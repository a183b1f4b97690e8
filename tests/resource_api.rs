use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use async_trait::async_trait;
use model_rest::config::{
    ApiEntityConfig, ColumnConfig, ManyToManyConfig, ManyToManyRelation, RelationshipConfig, SchemaConfig,
    TableConfig,
};
use model_rest::error::RESOURCE_NOT_FOUND_MESSAGE;
use model_rest::filter::{Condition, ListQuery};
use model_rest::store::Row;
use model_rest::{
    resolve, resource_routes, AppError, AppState, AuthUser, FullConfig, MemoryStore, ResolvedEntity, Settings, Store,
    Transaction,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn default_api() -> Value {
    json!([
        { "entity_id": "t_author", "path_segment": "authors",
          "operations": ["read", "create", "update", "delete"], "display_field": "name" },
        { "entity_id": "t_book", "path_segment": "books",
          "operations": ["read", "create", "update", "delete"],
          "permissions": { "delete": ["admin"] } },
        { "entity_id": "t_tag", "path_segment": "tags", "operations": ["read", "create", "update", "delete"] }
    ])
}

fn config(api: Value) -> FullConfig {
    let tables: Vec<TableConfig> = serde_json::from_value(json!([
        { "id": "t_author", "name": "author", "primary_key": "id" },
        { "id": "t_book", "name": "book", "primary_key": "id" },
        { "id": "t_tag", "name": "tag", "primary_key": "id" }
    ]))
    .unwrap();
    let columns: Vec<ColumnConfig> = serde_json::from_value(json!([
        { "id": "a_id", "table_id": "t_author", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
        { "id": "a_name", "table_id": "t_author", "name": "name", "type": { "name": "varchar", "params": [80] }, "nullable": false },
        { "id": "b_id", "table_id": "t_book", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
        { "id": "b_title", "table_id": "t_book", "name": "title", "type": "text", "nullable": false },
        { "id": "b_author", "table_id": "t_book", "name": "author_id", "type": "bigint", "nullable": true },
        { "id": "g_id", "table_id": "t_tag", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
        { "id": "g_label", "table_id": "t_tag", "name": "label", "type": "text", "nullable": false }
    ]))
    .unwrap();
    let relationships: Vec<RelationshipConfig> = serde_json::from_value(json!([
        { "id": "r1", "from_table_id": "t_book", "from_column_id": "b_author",
          "to_table_id": "t_author", "to_column_id": "a_id", "related_name": "books" }
    ]))
    .unwrap();
    let many_to_many: Vec<ManyToManyConfig> = serde_json::from_value(json!([
        { "id": "m1", "name": "tags", "from_table_id": "t_book", "to_table_id": "t_tag",
          "through_table": "book_tags", "from_column": "book_id", "to_column": "tag_id" }
    ]))
    .unwrap();
    let api_entities: Vec<ApiEntityConfig> = serde_json::from_value(api).unwrap();
    FullConfig {
        schemas: vec![SchemaConfig { id: "s".into(), name: "public".into(), comment: None }],
        tables,
        columns,
        relationships,
        many_to_many,
        api_entities,
    }
}

struct TestApp {
    router: Router,
    store: MemoryStore,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        TestApp::with_api(default_api())
    }

    fn with_api(api: Value) -> Self {
        let store = MemoryStore::new();
        TestApp::build(api, store.clone(), Arc::new(store))
    }

    /// `store` backs the routes; `memory` is what the assertions read.
    fn build(api: Value, memory: MemoryStore, store: Arc<dyn Store>) -> Self {
        let state = AppState::new(store, resolve(&config(api)).unwrap(), Settings::default());
        let router = Router::new().nest("/api", resource_routes(state.clone()));
        TestApp {
            router,
            store: memory,
            state,
        }
    }

    fn entity(&self, table_id: &str) -> Arc<ResolvedEntity> {
        self.state.model.entity_by_table(table_id).unwrap().clone()
    }

    async fn rows(&self, table_id: &str) -> Vec<serde_json::Map<String, Value>> {
        self.store.rows(&self.entity(table_id)).await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

fn admin() -> AuthUser {
    AuthUser::new("1").with_roles(["admin"])
}

fn editor() -> AuthUser {
    AuthUser::new("2").with_roles(["editor"])
}

fn json_request(method: Method, uri: &str, user: Option<AuthUser>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.extension(user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<AuthUser>, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    if let Some(user) = user {
        builder = builder.extension(user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn post_creates_and_put_updates() {
    let app = TestApp::new();

    let created = app
        .send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    assert_eq!(body["name"], json!("Ann"));
    let id = body["id"].clone();
    assert_eq!(body["_rest_links"]["api-resource"]["url"], json!(format!("/api/authors/{}", id)));

    let updated = app
        .send(json_request(Method::PUT, &format!("/api/authors/{}", id), Some(admin()), json!({ "name": "Bea" })))
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(body_json(updated).await["name"], json!("Bea"));

    let rows = app.rows("t_author").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Bea"));
}

#[tokio::test]
async fn nested_forward_object_is_created_first() {
    let app = TestApp::new();
    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(admin()),
            json!({ "title": "Dune", "author": { "name": "Frank" } }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let authors = app.rows("t_author").await;
    let books = app.rows("t_book").await;
    assert_eq!(authors.len(), 1);
    assert_eq!(books[0]["author_id"], authors[0]["id"]);
}

#[tokio::test]
async fn fk_id_key_is_normalized() {
    let app = TestApp::new();
    app.send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;
    let author_id = app.rows("t_author").await[0]["id"].clone();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(admin()),
            json!({ "title": "Emma", "author_id": author_id }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.rows("t_book").await[0]["author_id"], author_id);
}

#[tokio::test]
async fn nested_errors_are_indexed_and_nothing_persists() {
    let app = TestApp::new();
    let response = app
        .send(json_request(
            Method::POST,
            "/api/authors",
            Some(admin()),
            json!({ "name": "Ann", "books": [{ "title": "ok" }, { "title": "" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let errors = body["errors"]["books"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["_index"], json!(2));
    assert_eq!(errors[0]["title"], json!("This field is required."));

    assert!(app.rows("t_author").await.is_empty());
    assert!(app.rows("t_book").await.is_empty());
}

#[tokio::test]
async fn reverse_list_reconciles_children() {
    let app = TestApp::new();
    let created = app
        .send(json_request(
            Method::POST,
            "/api/authors",
            Some(admin()),
            json!({ "name": "Ann", "books": [{ "title": "a" }, { "title": "b" }] }),
        ))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let books = app.rows("t_book").await;
    assert_eq!(books.len(), 2);
    let author_id = app.rows("t_author").await[0]["id"].clone();
    let keep = books[0]["id"].clone();

    // Without delete permission on books the dropped child stays.
    let response = app
        .send(json_request(
            Method::PUT,
            &format!("/api/authors/{}", author_id),
            Some(editor()),
            json!({ "books": [{ "id": keep, "title": "a2" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.rows("t_book").await.len(), 2);

    let response = app
        .send(json_request(
            Method::PUT,
            &format!("/api/authors/{}", author_id),
            Some(admin()),
            json!({ "books": [{ "id": keep, "title": "a3" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let books = app.rows("t_book").await;
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["title"], json!("a3"));
    assert_eq!(app.rows("t_author").await[0]["name"], json!("Ann"));
}

#[tokio::test]
async fn reverse_value_must_be_a_list() {
    let app = TestApp::new();
    let response = app
        .send(json_request(
            Method::POST,
            "/api/authors",
            Some(admin()),
            json!({ "name": "Ann", "books": { "title": "a" } }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errors"]["books"], json!("Enter a list of values."));
}

#[tokio::test]
async fn list_orders_and_counts() {
    let app = TestApp::new();
    for name in ["Bea", "Ann", "Cid"] {
        app.send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": name })))
            .await;
    }

    let response = app
        .send(get("/api/authors", Some(admin()), &[("X-Order", "name"), ("X-Direction", "desc")]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-total").unwrap(), "3");
    let names: Vec<Value> = body_json(response)
        .await
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("Cid"), json!("Bea"), json!("Ann")]);

    let response = app
        .send(get("/api/authors?name__startswith=A", Some(admin()), &[("X-Base", "1")]))
        .await;
    assert_eq!(response.headers().get("x-total").unwrap(), "1");
    assert_eq!(body_json(response).await[0]["name"], json!("Ann"));
}

#[tokio::test]
async fn bad_order_is_rejected_and_bad_filter_is_empty() {
    let app = TestApp::new();
    app.send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;

    let response = app
        .send(get("/api/authors", Some(admin()), &[("X-Order", "nope")]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["messages"]["error"],
        json!("Cannot resolve X-Order value \"nope\" into field")
    );

    let response = app.send(get("/api/authors?nope=1", Some(admin()), &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-total").unwrap(), "0");
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn field_selection_header() {
    let app = TestApp::new();
    app.send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;
    let id = app.rows("t_author").await[0]["id"].clone();

    let response = app
        .send(get(&format!("/api/authors/{}", id), Some(admin()), &[("X-Fields", "name,_obj_name")]))
        .await;
    assert_eq!(body_json(response).await, json!({ "name": "Ann", "_obj_name": "Ann" }));

    let missing = app.send(get("/api/authors/999", Some(admin()), &[])).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_requires_permission() {
    let app = TestApp::new();
    app.send(json_request(Method::POST, "/api/books", Some(admin()), json!({ "title": "Dune" })))
        .await;
    let id = app.rows("t_book").await[0]["id"].clone();
    let uri = format!("/api/books/{}", id);
    let delete = |user: AuthUser| {
        Request::builder()
            .method(Method::DELETE)
            .uri(uri.clone())
            .extension(user)
            .body(Body::empty())
            .unwrap()
    };

    let denied = app.send(delete(editor())).await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.rows("t_book").await.len(), 1);

    let deleted = app.send(delete(admin())).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert!(app.rows("t_book").await.is_empty());
}

#[tokio::test]
async fn gate_and_content_negotiation() {
    let app = TestApp::new();

    let anonymous = app.send(get("/api/authors", None, &[])).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let inactive = app.send(get("/api/authors", Some(admin().inactive()), &[])).await;
    assert_eq!(inactive.status(), StatusCode::FORBIDDEN);

    let unknown = app.send(get("/api/planets", Some(admin()), &[])).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let text = Request::builder()
        .method(Method::POST)
        .uri("/api/authors")
        .header(header::CONTENT_TYPE, "text/plain")
        .extension(admin())
        .body(Body::from("name=Ann"))
        .unwrap();
    assert_eq!(app.send(text).await.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let yaml = Request::builder()
        .method(Method::POST)
        .uri("/api/authors")
        .header(header::CONTENT_TYPE, "application/yaml")
        .extension(admin())
        .body(Body::from("name: Ann\n"))
        .unwrap();
    assert_eq!(app.send(yaml).await.status(), StatusCode::CREATED);

    let empty = app
        .send(json_request(Method::POST, "/api/authors", Some(admin()), json!({})))
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
}

/// Authors readable and updatable only, book creation open.
fn read_update_authors_api() -> Value {
    json!([
        { "entity_id": "t_author", "path_segment": "authors", "operations": ["read", "update"] },
        { "entity_id": "t_book", "path_segment": "books", "operations": ["read", "create", "update", "delete"] },
        { "entity_id": "t_tag", "path_segment": "tags", "operations": ["read"] }
    ])
}

/// Only admins may create or update authors.
fn admin_authors_api() -> Value {
    json!([
        { "entity_id": "t_author", "path_segment": "authors",
          "operations": ["read", "create", "update", "delete"],
          "permissions": { "create": ["admin"], "update": ["admin"] } },
        { "entity_id": "t_book", "path_segment": "books", "operations": ["read", "create", "update", "delete"] },
        { "entity_id": "t_tag", "path_segment": "tags", "operations": ["read"] }
    ])
}

#[tokio::test]
async fn nested_create_without_post_is_collected_as_not_found() {
    let app = TestApp::with_api(read_update_authors_api());
    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(admin()),
            json!({ "title": "Dune", "author": { "name": "Frank" } }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["errors"]["author"]["error"],
        json!(RESOURCE_NOT_FOUND_MESSAGE)
    );
    assert!(app.rows("t_author").await.is_empty());
    assert!(app.rows("t_book").await.is_empty());
}

#[tokio::test]
async fn nested_update_without_permission_keeps_the_row() {
    let app = TestApp::with_api(admin_authors_api());
    app.send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;
    let author_id = app.rows("t_author").await[0]["id"].clone();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(editor()),
            json!({ "title": "Emma", "author": { "id": author_id, "name": "Changed" } }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.rows("t_author").await[0]["name"], json!("Ann"));
    assert_eq!(app.rows("t_book").await[0]["author_id"], author_id);
}

#[tokio::test]
async fn nested_create_without_permission_is_refused() {
    let app = TestApp::with_api(admin_authors_api());
    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(editor()),
            json!({ "title": "Emma", "author": { "name": "Jane" } }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.rows("t_author").await.is_empty());
    assert!(app.rows("t_book").await.is_empty());
}

#[tokio::test]
async fn many_to_many_list_errors_are_indexed() {
    let app = TestApp::new();
    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(admin()),
            json!({ "title": "Dune", "tags": [{ "label": "sf" }, { "label": "" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let errors = body["errors"]["tags"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["_index"], json!(2));
    assert_eq!(errors[0]["label"], json!("This field is required."));
    assert!(app.rows("t_tag").await.is_empty());

    let response = app
        .send(json_request(
            Method::POST,
            "/api/books",
            Some(admin()),
            json!({ "title": "Dune", "tags": [{ "label": "sf" }, { "label": "classic" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let book = app.entity("t_book");
    let relation = book.many_to_many("tags").unwrap();
    assert_eq!(app.store.links(relation).await.len(), 2);
}

#[tokio::test]
async fn unknown_nested_id_is_an_indexed_not_found() {
    let app = TestApp::new();
    let response = app
        .send(json_request(
            Method::POST,
            "/api/authors",
            Some(admin()),
            json!({ "name": "Ann", "books": [{ "title": "a" }, { "id": 999, "title": "b" }] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["errors"]["books"],
        json!([{ "error": RESOURCE_NOT_FOUND_MESSAGE, "_index": 2 }])
    );
    assert!(app.rows("t_author").await.is_empty());
}

/// Memory store whose transactions fail every count.
struct BrokenCountStore(MemoryStore);

struct BrokenCountTransaction(Box<dyn Transaction>);

#[async_trait]
impl Store for BrokenCountStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        Ok(Box::new(BrokenCountTransaction(self.0.begin().await?)))
    }
}

#[async_trait]
impl Transaction for BrokenCountTransaction {
    async fn fetch(&mut self, entity: &ResolvedEntity, scope: &[Condition], id: &Value) -> Result<Option<Row>, AppError> {
        self.0.fetch(entity, scope, id).await
    }

    async fn select(&mut self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        self.0.select(entity, query).await
    }

    async fn count(&mut self, _entity: &ResolvedEntity, _conditions: &[Condition]) -> Result<u64, AppError> {
        Err(AppError::Storage("connection reset".into()))
    }

    async fn insert(&mut self, entity: &ResolvedEntity, values: &Row) -> Result<Row, AppError> {
        self.0.insert(entity, values).await
    }

    async fn update(&mut self, entity: &ResolvedEntity, id: &Value, values: &Row) -> Result<Option<Row>, AppError> {
        self.0.update(entity, id, values).await
    }

    async fn delete(&mut self, entity: &ResolvedEntity, id: &Value) -> Result<bool, AppError> {
        self.0.delete(entity, id).await
    }

    async fn link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        related: &ResolvedEntity,
        id: &Value,
    ) -> Result<Vec<Value>, AppError> {
        self.0.link_ids(entity, relation, related, id).await
    }

    async fn set_link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        related: &ResolvedEntity,
        id: &Value,
        related_ids: &[Value],
    ) -> Result<(), AppError> {
        self.0.set_link_ids(entity, relation, related, id, related_ids).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.0.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.0.rollback().await
    }
}

#[tokio::test]
async fn storage_failure_reads_as_empty_page() {
    let memory = MemoryStore::new();
    let app = TestApp::build(default_api(), memory.clone(), Arc::new(BrokenCountStore(memory)));
    let created = app
        .send(json_request(Method::POST, "/api/authors", Some(admin()), json!({ "name": "Ann" })))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let response = app.send(get("/api/authors", Some(admin()), &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-total").unwrap(), "0");
    assert_eq!(body_json(response).await, json!([]));
}
