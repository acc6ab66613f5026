//! Query-surface scenarios: every field type through CREATE/INSERT/GET,
//! and persistence across engine instances.

use tempfile::tempdir;
use tupledb::{QueryEngine, QueryOutput};

#[test]
fn every_field_type_roundtrips_as_text() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path());

    engine
        .execute("CREATE wide 'INT' 'SHORT INT INT64 DOUBLE BOOL STRING<12>'")
        .unwrap();
    engine
        .execute("INSERT wide '1' '-3 100000 -9000000000 2.5 0 hello'")
        .unwrap();

    assert_eq!(
        engine.execute("GET wide '1'").unwrap(),
        QueryOutput::Value(Some("-3 100000 -9000000000 2.5 0 hello".into()))
    );
}

#[test]
fn composite_keys_through_the_facade() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path());

    engine
        .execute("CREATE idx 'INT STRING<8>' 'INT'")
        .unwrap();
    engine.execute("INSERT idx '1 aa' '10'").unwrap();
    engine.execute("INSERT idx '1 bb' '11'").unwrap();
    engine.execute("INSERT idx '2 aa' '20'").unwrap();

    assert_eq!(
        engine.execute("GET idx '1 bb'").unwrap(),
        QueryOutput::Value(Some("11".into()))
    );
    assert_eq!(
        engine.execute("GET idx '2 bb'").unwrap(),
        QueryOutput::Value(None)
    );
}

#[test]
fn trees_persist_across_engine_instances() {
    let dir = tempdir().unwrap();
    {
        let engine = QueryEngine::new(dir.path());
        engine.execute("CREATE kv 'INT64' 'STRING<24>'").unwrap();
        engine.execute("INSERT kv '5' 'persisted'").unwrap();
    }

    let engine = QueryEngine::new(dir.path());
    assert_eq!(
        engine.execute("GET kv '5'").unwrap(),
        QueryOutput::Value(Some("persisted".into()))
    );
}

#[test]
fn two_trees_are_independent() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path());

    engine.execute("CREATE a 'INT' 'INT'").unwrap();
    engine.execute("CREATE b 'INT' 'INT'").unwrap();
    engine.execute("INSERT a '1' '10'").unwrap();
    engine.execute("INSERT b '1' '20'").unwrap();

    assert_eq!(
        engine.execute("GET a '1'").unwrap(),
        QueryOutput::Value(Some("10".into()))
    );
    assert_eq!(
        engine.execute("GET b '1'").unwrap(),
        QueryOutput::Value(Some("20".into()))
    );
}

#[test]
fn bad_literals_surface_as_errors() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path());
    engine.execute("CREATE t 'INT' 'BOOL'").unwrap();

    let err = engine.execute("INSERT t 'abc' '1'").unwrap_err();
    assert!(format!("{:#}", err).contains("INT literal"));

    let err = engine.execute("INSERT t '1' 'yes'").unwrap_err();
    assert!(format!("{:#}", err).contains("BOOL literal"));

    let err = engine.execute("CREATE u 'INT' 'STRING<oops>'").unwrap_err();
    assert!(format!("{:#}", err).contains("string capacity"));
}

#[test]
fn oversized_string_literal_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path());
    engine.execute("CREATE t 'INT' 'STRING<4>'").unwrap();

    let err = engine
        .execute("INSERT t '1' 'waytoolong'")
        .unwrap_err();
    assert!(format!("{:#}", err).contains("capacity"));
}

#[test]
fn get_on_duplicate_key_returns_a_matching_row() {
    let dir = tempdir().unwrap();
    let engine = QueryEngine::new(dir.path()).with_page_bytes(64);
    engine.execute("CREATE t 'INT' 'INT'").unwrap();

    engine.execute("INSERT t '1' '10'").unwrap();
    engine.execute("INSERT t '1' '11'").unwrap();

    // duplicates are allowed; GET returns the first equal key in order
    let out = engine.execute("GET t '1'").unwrap();
    assert!(matches!(out, QueryOutput::Value(Some(_))));
}
