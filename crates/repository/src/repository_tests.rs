//! Repository behaviour against the in-memory connection.
//!
//! The same scenarios run against SQLite in `crates/store/tests/`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::memory::MemoryConnection;
use crate::test_models::{
    attrs, BrokenModel, ChildModel, CompositeKeyModel, ParentModel, SimpleModel, SimpleModelCustomId,
};
use crate::{KeyValue, Relations, Repository, RepositoryError, StoreError, ValidationError};

const TABLE_NAME: &str = "models";

fn setup() -> (MemoryConnection, Repository<SimpleModel, MemoryConnection>) {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let repo = Repository::new(conn.clone()).expect("valid model");
    (conn, repo)
}

fn names(rows: &[crate::Record]) -> Vec<String> {
    let mut names: Vec<String> = rows
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect();
    names.sort();
    names
}

async fn seed_names(repo: &Repository<SimpleModel, MemoryConnection>, names: &[&str]) {
    for name in names {
        repo.create(&json!({ "name": name }), None).await.unwrap();
    }
}

// ============================================================
// construction
// ============================================================

#[test]
fn construction_copies_key_columns() {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let repo = Repository::<CompositeKeyModel, _>::new(conn).unwrap();
    assert_eq!(repo.key_columns(), &["name".to_string(), "code".to_string()]);
    assert_eq!(repo.entity_name(), "CompositeKeyModel");
}

#[test]
fn malformed_descriptor_is_rejected() {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let err = Repository::<BrokenModel, _>::new(conn).unwrap_err();
    match err {
        RepositoryError::Configuration(msg) => {
            assert!(msg.contains("not a valid entity-kind model"), "{msg}");
            assert!(msg.contains("uuid"), "{msg}");
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

// ============================================================
// from_json
// ============================================================

#[test]
fn from_json_happy_path() {
    let (_, repo) = setup();
    let entity = repo.from_json(Some(&attrs(json!({ "name": "dummyName" })))).unwrap();
    assert_eq!(Value::Object(entity), json!({ "name": "dummyName" }));
}

#[test]
fn from_json_without_attributes_equals_empty_mapping() {
    let (_, repo) = setup();
    let from_none = repo.from_json(None).unwrap();
    let from_empty = repo.from_json(Some(&attrs(json!({})))).unwrap();
    assert_eq!(from_none, from_empty);
    assert!(from_none.is_empty());
}

#[test]
fn from_json_rejects_schema_violations() {
    let (_, repo) = setup();
    let err = repo.from_json(Some(&attrs(json!({ "name": 12 })))).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Validation(ValidationError::WrongType { field: "name", .. })
    ));

    let err = repo.from_json(Some(&attrs(json!({ "colour": "red" })))).unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(ValidationError::UnknownField { .. })));
}

// ============================================================
// create
// ============================================================

#[tokio::test]
async fn create_happy_path() {
    let (conn, repo) = setup();
    let created = repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();

    let rows = conn.rows(TABLE_NAME);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "dummyName");
    assert_eq!(created["id"], json!(1));
}

#[tokio::test]
async fn create_leaves_input_untouched() {
    let (_, repo) = setup();
    let input = attrs(json!({ "name": "dummyName" }));
    let created = repo.create(&input, None).await.unwrap();

    assert_eq!(Value::Object(input), json!({ "name": "dummyName" }));
    assert!(created.contains_key("id"));
}

#[tokio::test]
async fn create_accepts_typed_entities() {
    #[derive(Serialize)]
    struct NewModel<'a> {
        name: &'a str,
        description: Option<&'a str>,
    }

    let (conn, repo) = setup();
    repo.create(&NewModel { name: "typed", description: None }, None)
        .await
        .unwrap();
    assert_eq!(conn.rows(TABLE_NAME)[0]["name"], "typed");
}

#[tokio::test]
async fn create_rejects_non_objects() {
    let (conn, repo) = setup();
    let err = repo.create(&json!(["name"]), None).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(ValidationError::NotAnObject { .. })));
    assert!(conn.rows(TABLE_NAME).is_empty());
}

#[tokio::test]
async fn create_reports_serialization_failure() {
    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("opaque handle"))
        }
    }

    let (conn, repo) = setup();
    let err = repo.create(&Opaque, None).await.unwrap_err();
    match err {
        RepositoryError::Validation(ValidationError::Unserializable { entity, message }) => {
            assert_eq!(entity, "SimpleModel");
            assert!(message.contains("opaque handle"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(conn.rows(TABLE_NAME).is_empty());
}

#[tokio::test]
async fn create_propagates_store_errors_unchanged() {
    let (_, repo) = setup();
    repo.create(&json!({ "id": 7, "name": "first" }), None).await.unwrap();

    let err = repo.create(&json!({ "id": 7, "name": "second" }), None).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Store(StoreError::Constraint { .. })));
}

#[tokio::test]
async fn connection_override_is_used_instead_of_bound_connection() {
    let (bound, repo) = setup();
    let other = MemoryConnection::new("127.0.0.1", "other_db");

    repo.create(&json!({ "name": "elsewhere" }), Some(&other)).await.unwrap();

    assert!(bound.rows(TABLE_NAME).is_empty());
    assert_eq!(other.rows(TABLE_NAME).len(), 1);
    assert_eq!(repo.find(&attrs(json!({})), Relations::none(), Some(&other)).await.unwrap().len(), 1);
}

// ============================================================
// update
// ============================================================

#[tokio::test]
async fn update_happy_path() {
    let (conn, repo) = setup();
    let mut persisted = repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();
    persisted.insert("name".into(), json!("updatedName"));

    let affected = repo.update(&persisted, None).await.unwrap();

    assert_eq!(affected, 1);
    let rows = conn.rows(TABLE_NAME);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "updatedName");
}

#[tokio::test]
async fn update_is_incremental() {
    let (conn, repo) = setup();
    let persisted = repo
        .create(&json!({ "name": "dummyName", "code": "C1" }), None)
        .await
        .unwrap();

    repo.update(&json!({ "id": persisted["id"], "description": "desc", "code": null }), None)
        .await
        .unwrap();

    let rows = conn.rows(TABLE_NAME);
    assert_eq!(rows.len(), 1);
    // absent ⇒ untouched, present ⇒ set, null ⇒ cleared
    assert_eq!(rows[0]["name"], "dummyName");
    assert_eq!(rows[0]["description"], "desc");
    assert_eq!(rows[0]["code"], Value::Null);
}

#[tokio::test]
async fn update_of_missing_row_is_not_found_and_writes_nothing() {
    let (conn, repo) = setup();
    repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();

    let err = repo
        .update(&json!({ "id": 999, "name": "ghost" }), None)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Entity with id 999 does not exist");
    match err {
        RepositoryError::NotFound(key) => assert_eq!(key, KeyValue::from(999)),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(names(&conn.rows(TABLE_NAME)), vec!["dummyName"]);
}

#[tokio::test]
async fn update_requires_key_column() {
    let (_, repo) = setup();
    let err = repo.update(&json!({ "name": "no key" }), None).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Validation(ValidationError::MissingKey { ref column, .. }) if column == "id"
    ));
}

#[tokio::test]
async fn update_with_only_key_reports_existing_row() {
    let (_, repo) = setup();
    let persisted = repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();

    assert_eq!(repo.update(&json!({ "id": persisted["id"] }), None).await.unwrap(), 1);
    assert!(matches!(
        repo.update(&json!({ "id": 404 }), None).await,
        Err(RepositoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_by_custom_key_column() {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let repo = Repository::<SimpleModelCustomId, _>::new(conn.clone()).unwrap();
    repo.create(&json!({ "code": "A1", "name": "first", "surname": "x" }), None)
        .await
        .unwrap();

    repo.update(&json!({ "code": "A1", "surname": null }), None).await.unwrap();

    let row = &conn.rows("custom_id_models")[0];
    assert_eq!(row["name"], "first");
    assert_eq!(row["surname"], Value::Null);
}

#[tokio::test]
async fn update_by_composite_key() {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let repo = Repository::<CompositeKeyModel, _>::new(conn.clone()).unwrap();
    repo.create(&json!({ "name": "n", "code": "1", "description": "one" }), None)
        .await
        .unwrap();
    repo.create(&json!({ "name": "n", "code": "2", "description": "two" }), None)
        .await
        .unwrap();

    let affected = repo
        .update(&json!({ "name": "n", "code": "2", "description": "changed" }), None)
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let err = repo
        .update(&json!({ "name": "n", "code": "3", "description": "x" }), None)
        .await
        .unwrap_err();
    match err {
        RepositoryError::NotFound(key) => assert_eq!(key.to_string(), "n,3"),
        other => panic!("expected NotFound, got {other:?}"),
    }

    let one = repo
        .find_one_by_id(vec![json!("n"), json!("1")], Relations::none(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one["description"], "one");
}

#[tokio::test]
async fn update_and_fetch_returns_refreshed_entity() {
    let (_, repo) = setup();
    let persisted = repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();

    let refreshed = repo
        .update_and_fetch(&json!({ "id": persisted["id"], "description": "desc" }), None)
        .await
        .unwrap();

    assert_eq!(refreshed["name"], "dummyName");
    assert_eq!(refreshed["description"], "desc");

    assert!(matches!(
        repo.update_and_fetch(&json!({ "id": 404, "name": "x" }), None).await,
        Err(RepositoryError::NotFound(_))
    ));
}

// ============================================================
// find / find_one
// ============================================================

#[tokio::test]
async fn find_happy_path() {
    let (_, repo) = setup();
    seed_names(&repo, &["dummyName", "dummyName", "testName"]).await;

    let found = repo
        .find(&attrs(json!({ "name": "dummyName" })), Relations::none(), None)
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|e| e["name"] == "dummyName"));
}

#[tokio::test]
async fn find_with_empty_filter_returns_everything() {
    let (_, repo) = setup();
    seed_names(&repo, &["a", "b", "c"]).await;
    let all = repo.find(&attrs(json!({})), Relations::none(), None).await.unwrap();
    assert_eq!(names(&all), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn find_one_happy_path() {
    let (_, repo) = setup();
    seed_names(&repo, &["dummyName", "dummyName", "testName"]).await;

    let entity = repo
        .find_one(&attrs(json!({ "name": "dummyName" })), Relations::none(), None)
        .await
        .unwrap()
        .expect("one entity");
    assert_eq!(entity["name"], "dummyName");

    let missing = repo
        .find_one(&attrs(json!({ "name": "nobody" })), Relations::none(), None)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn query_limit_caps_returned_rows() {
    let (conn, repo) = setup();
    seed_names(&repo, &["dummyName", "dummyName", "dummyName"]).await;

    let limited = repo
        .query(None)
        .where_eq(&attrs(json!({ "name": "dummyName" })))
        .limit(1)
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0]["id"], 1);

    let first = repo
        .find_one(&attrs(json!({ "name": "dummyName" })), Relations::none(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["id"], 1);
    assert_eq!(conn.rows(TABLE_NAME).len(), 3);
}

#[tokio::test]
async fn find_one_by_id_and_arity_check() {
    let (_, repo) = setup();
    let created = repo.create(&json!({ "name": "dummyName" }), None).await.unwrap();
    let id = created["id"].as_i64().unwrap();

    let found = repo.find_one_by_id(id, Relations::none(), None).await.unwrap();
    assert_eq!(found.unwrap()["name"], "dummyName");
    assert!(repo.find_one_by_id(id + 100, Relations::none(), None).await.unwrap().is_none());

    let err = repo
        .find_one_by_id(vec![json!(1), json!(2)], Relations::none(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Validation(ValidationError::KeyArity { expected: 1, found: 2, .. })
    ));
}

#[tokio::test]
async fn find_propagates_store_outage() {
    let (conn, repo) = setup();
    conn.simulate_outage("connection reset");
    let err = repo.find(&attrs(json!({})), Relations::none(), None).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Store(StoreError::Unavailable(ref m)) if m == "connection reset"));
    conn.restore();
    assert!(repo.find(&attrs(json!({})), Relations::none(), None).await.is_ok());
}

// ============================================================
// find_where_not
// ============================================================

#[tokio::test]
async fn find_where_not_negates_the_whole_conjunction() {
    let (_, repo) = setup();
    repo.create(&json!({ "name": "a", "code": "1" }), None).await.unwrap();
    repo.create(&json!({ "name": "a", "code": "2" }), None).await.unwrap();
    repo.create(&json!({ "name": "b", "code": "1" }), None).await.unwrap();

    let found = repo
        .find_where_not(&attrs(json!({ "name": "a", "code": "1" })), None)
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert!(!found.iter().any(|r| r["name"] == "a" && r["code"] == "1"));
}

#[tokio::test]
async fn find_where_not_with_empty_filter_returns_everything() {
    let (_, repo) = setup();
    seed_names(&repo, &["a", "b"]).await;
    assert_eq!(repo.find_where_not(&attrs(json!({})), None).await.unwrap().len(), 2);
}

// ============================================================
// find_where_in
// ============================================================

#[tokio::test]
async fn find_where_in_by_column_name() {
    let (_, repo) = setup();
    seed_names(&repo, &["a", "b", "c"]).await;

    let found = repo
        .find_where_in(("name", vec![json!("a"), json!("c")]), Relations::none(), None)
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["a", "c"]);
}

#[tokio::test]
async fn find_where_in_by_mapping() {
    let (_, repo) = setup();
    seed_names(&repo, &["a", "b", "c"]).await;

    let found = repo
        .find_where_in(attrs(json!({ "name": ["a", "c"] })), Relations::none(), None)
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["a", "c"]);
}

#[tokio::test]
async fn find_where_in_mixes_equality_and_membership() {
    let (_, repo) = setup();
    repo.create(&json!({ "name": "b", "code": "x" }), None).await.unwrap();
    repo.create(&json!({ "name": "b", "code": "y" }), None).await.unwrap();
    repo.create(&json!({ "name": "c", "code": "x" }), None).await.unwrap();

    let found = repo
        .find_where_in(attrs(json!({ "name": "b", "code": ["x"] })), Relations::none(), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "b");
    assert_eq!(found[0]["code"], "x");
}

#[tokio::test]
async fn find_where_in_with_no_candidates_matches_nothing() {
    let (_, repo) = setup();
    seed_names(&repo, &["a"]).await;
    let found = repo
        .find_where_in(("name", Vec::new()), Relations::none(), None)
        .await
        .unwrap();
    assert!(found.is_empty());
}

// ============================================================
// eager relations
// ============================================================

#[tokio::test]
async fn relations_are_forwarded_to_the_backend() {
    let conn = MemoryConnection::new("127.0.0.1", "repository_test");
    let parents = Repository::<ParentModel, _>::new(conn.clone()).unwrap();
    let children = Repository::<ChildModel, _>::new(conn.clone()).unwrap();

    let parent = parents.create(&json!({ "name": "p" }), None).await.unwrap();
    children
        .create(&json!({ "name": "c1", "parent_id": parent["id"] }), None)
        .await
        .unwrap();
    children
        .create(&json!({ "name": "c2", "parent_id": parent["id"] }), None)
        .await
        .unwrap();

    let loaded = parents
        .find_one(&attrs(json!({ "name": "p" })), "children", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded["children"].as_array().map(Vec::len), Some(2));

    let child = children
        .find_where_in(("name", vec![json!("c1")]), ["parent"], None)
        .await
        .unwrap();
    assert_eq!(child[0]["parent"]["name"], "p");

    let err = parents
        .find(&attrs(json!({})), "siblings", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Store(StoreError::UnknownRelation { .. })));
}

// ============================================================
// delete
// ============================================================

#[tokio::test]
async fn delete_by_returns_exact_count() {
    let (_, repo) = setup();
    seed_names(&repo, &["x", "x", "y"]).await;

    let deleted = repo.delete_by(&attrs(json!({ "name": "x" })), None).await.unwrap();
    assert_eq!(deleted, 2);

    let remaining = repo.find(&attrs(json!({})), Relations::none(), None).await.unwrap();
    assert_eq!(names(&remaining), vec!["y"]);
}

#[tokio::test]
async fn delete_by_id_removes_single_row() {
    let (_, repo) = setup();
    let created = repo.create(&json!({ "name": "doomed" }), None).await.unwrap();
    seed_names(&repo, &["kept"]).await;

    assert_eq!(repo.delete_by_id(created["id"].clone(), None).await.unwrap(), 1);
    assert_eq!(repo.delete_by_id(created["id"].clone(), None).await.unwrap(), 0);
    let remaining = repo.find(&attrs(json!({})), Relations::none(), None).await.unwrap();
    assert_eq!(names(&remaining), vec!["kept"]);
}

#[tokio::test]
async fn full_scenario() {
    let (conn, repo) = setup();
    seed_names(&repo, &["dummyName", "dummyName", "testName"]).await;

    let found = repo
        .find(&attrs(json!({ "name": "dummyName" })), Relations::none(), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let one = repo
        .find_one(&attrs(json!({ "name": "dummyName" })), Relations::none(), None)
        .await
        .unwrap()
        .unwrap();
    assert!(found.contains(&one));

    let deleted = repo
        .delete_by(&attrs(json!({ "name": "dummyName" })), None)
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(names(&conn.rows(TABLE_NAME)), vec!["testName"]);
}
