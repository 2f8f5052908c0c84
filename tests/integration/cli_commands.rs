#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("movies.db");
    let schema = dir.path().join("movies.json");
    fs::write(
        &schema,
        json!({
            "$id": "movies",
            "attributes": [
                {"key": "name", "type": "string"},
                {"key": "year", "type": "integer"}
            ]
        })
        .to_string(),
    )
    .expect("write schema");
    let docs = dir.path().join("docs.json");
    fs::write(
        &docs,
        json!([
            {"$id": "frozen", "name": "Frozen", "year": 2013, "$permissions": ["read(\"any\")"]},
            {"$id": "frozen-ii", "name": "Frozen II", "year": 2019, "$permissions": ["read(\"any\")"]},
            {"$id": "captain-marvel", "name": "Captain Marvel", "year": 2019, "$permissions": ["read(\"any\")"]},
            {"$id": "secret", "name": "Secret", "year": 2036, "$permissions": ["read(\"user:1\")"]}
        ])
        .to_string(),
    )
    .expect("write documents");

    cargo_bin_cmd!("docbase")
        .arg("--db")
        .arg(&db)
        .arg("init")
        .arg("--schema")
        .arg(&schema)
        .assert()
        .success();
    cargo_bin_cmd!("docbase")
        .arg("--db")
        .arg(&db)
        .args(["insert", "movies", "--file"])
        .arg(&docs)
        .assert()
        .success();
    (dir, db)
}

fn failure_stderr(db: &Path, args: &[&str]) -> String {
    let output = cargo_bin_cmd!("docbase")
        .arg("--db")
        .arg(db)
        .args(args)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    String::from_utf8(output).expect("utf8 output")
}

fn json_lines(db: &Path, args: &[&str]) -> Vec<Value> {
    let output = cargo_bin_cmd!("docbase")
        .arg("--db")
        .arg(db)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(output)
        .expect("utf8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn count_and_sum_apply_queries() {
    let (_dir, db) = setup_db();
    let equal_2019 = r#"{"method":"equal","attribute":"year","values":[2019]}"#;

    let lines = json_lines(&db, &["count", "movies", "--query", equal_2019]);
    assert_eq!(lines, [json!({"count": 2})]);

    let lines = json_lines(&db, &["sum", "movies", "year"]);
    assert_eq!(lines[0]["sum"].as_f64(), Some(6051.0));

    let lines = json_lines(&db, &["--role", "user:1", "count", "movies"]);
    assert_eq!(lines, [json!({"count": 1})]);

    let lines = json_lines(&db, &["--no-auth", "count", "movies"]);
    assert_eq!(lines, [json!({"count": 4})]);
}

#[test]
fn find_pages_with_cursor_tokens() {
    let (_dir, db) = setup_db();
    let first = json_lines(&db, &["find", "movies", "--order", "year:desc", "--limit", "2"]);
    assert_eq!(first.len(), 3);
    assert_eq!(first[0]["$id"], "frozen-ii");
    assert_eq!(first[1]["$id"], "captain-marvel");
    let token = first[2]["cursor"].as_str().expect("cursor token").to_string();

    let second = json_lines(
        &db,
        &["find", "movies", "--order", "year:desc", "--limit", "2", "--after", token.as_str()],
    );
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["$id"], "frozen");
}

#[test]
fn get_prints_document_or_fails() {
    let (_dir, db) = setup_db();
    let lines = json_lines(&db, &["get", "movies", "frozen"]);
    assert_eq!(lines[0]["name"], "Frozen");
    assert_eq!(lines[0]["year"], 2013);

    let stderr = failure_stderr(&db, &["get", "movies", "secret"]);
    assert!(stderr.contains("not found"), "{stderr}");
}

#[test]
fn malformed_query_is_reported() {
    let (_dir, db) = setup_db();
    let stderr = failure_stderr(&db, &["count", "movies", "--query", r#"{"method":"nope"}"#]);
    assert!(stderr.contains("unknown query method"), "{stderr}");
}
