use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use relq::{DataValue, Executor, QueryBuilder, QueryError, Record, SqliteStore, StoreConfig};

#[path = "../common/mod.rs"]
mod common;
use common::{Fixture, Member};

#[test]
fn test_persist_validates_records() -> Result<()> {
    let fixture = Fixture::new()?;
    let executor = fixture.executor();

    // age is required
    let missing = executor.persist(&Record::new("Member").set("username", "x"));
    assert!(matches!(missing, Err(QueryError::MissingValue(f)) if f == "Member.age"));

    let null = executor.persist(&Record::new("Member").set("age", DataValue::Null));
    assert!(matches!(null, Err(QueryError::NullValueNotAllowed(_))));

    let wrong_type = executor.persist(&Record::new("Member").set("age", "old"));
    assert!(matches!(wrong_type, Err(QueryError::TypeMismatch { .. })));

    let unknown = executor.persist(&Record::new("Member").set("age", 1).set("email", "a@b"));
    assert!(matches!(unknown, Err(QueryError::UnknownField(_))));

    let no_entity = executor.persist(&Record::new("Player"));
    assert!(matches!(no_entity, Err(QueryError::UnknownEntity(_))));

    // Nothing was written
    let count = executor.native_query("SELECT COUNT(*) AS n FROM member", &[])?;
    assert_eq!(count[0].get_i64("n")?, Some(4));
    Ok(())
}

/// A reference to a missing team is rejected by the store
#[test]
fn test_foreign_keys_enforced() -> Result<()> {
    let fixture = Fixture::new()?;
    let result = fixture.executor().persist(&common::member(Some("ghost"), 1, Some(999)));
    assert!(matches!(result, Err(QueryError::ExecutionError(_))));
    Ok(())
}

#[test]
fn test_update_fields() -> Result<()> {
    let fixture = Fixture::new()?;
    let executor = fixture.executor();
    let id = executor.persist(&common::member(Some("mover"), 33, Some(fixture.team_a)))?;

    executor.update(id, &Record::new("Member").set("team", fixture.team_b).set("age", 34))?;
    let moved: Member = executor.find("Member", id)?.expect("still there").decode()?;
    assert_eq!(moved.team_id, Some(fixture.team_b));
    assert_eq!(moved.age, 34);
    assert_eq!(moved.username.as_deref(), Some("mover"));

    assert!(matches!(
        executor.update(id, &Record::new("Member").set("age", DataValue::Null)),
        Err(QueryError::NullValueNotAllowed(_))
    ));
    assert!(matches!(
        executor.update(id + 100, &Record::new("Member").set("age", 1)),
        Err(QueryError::EntityNotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_transaction_rollback() -> Result<()> {
    let fixture = Fixture::new()?;

    let result: relq::QueryResult<()> = fixture.store.with_transaction(|tx| {
        let executor = Executor::new(&fixture.registry, tx);
        executor.persist(&common::member(Some("temp"), 1, None))?;
        // Fails on the missing age, after the first insert
        executor.persist(&Record::new("Member").set("username", "broken"))?;
        Ok(())
    });
    assert!(matches!(result, Err(QueryError::MissingValue(_))));

    let members = fixture.registry.predicates("Member")?;
    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("username", "temp")?)
        .plan(&fixture.registry)?;
    assert!(fixture.executor().fetch_one(&plan)?.is_none());

    // Dropping an open transaction rolls it back too
    {
        let tx = fixture.store.begin()?;
        Executor::new(&fixture.registry, &tx).persist(&common::member(Some("temp"), 1, None))?;
    }
    assert!(fixture.executor().fetch_one(&plan)?.is_none());

    let tx = fixture.store.begin()?;
    Executor::new(&fixture.registry, &tx).persist(&common::member(Some("temp"), 1, None))?;
    tx.commit()?;
    assert!(fixture.executor().fetch_one(&plan)?.is_some());
    Ok(())
}

/// Querying the store itself inside its own transaction fails instead of hanging
#[test]
fn test_store_reentry_inside_transaction() -> Result<()> {
    let registry = common::create_registry()?;
    let store = SqliteStore::open(&StoreConfig {
        busy_timeout: Duration::from_millis(50),
        ..StoreConfig::default()
    })?;
    store.create_schema(&registry)?;
    let plan = QueryBuilder::select_from("Member").plan(&registry)?;

    let result: relq::QueryResult<()> = store.with_transaction(|tx| {
        Executor::new(&registry, tx).persist(&common::member(Some("inside"), 1, None))?;
        Executor::new(&registry, &store).fetch(&plan)?;
        Ok(())
    });
    assert!(matches!(result, Err(QueryError::ExecutionError(_))));

    // The failed transaction rolled back and released the connection
    assert!(Executor::new(&registry, &store).fetch(&plan)?.is_empty());
    Ok(())
}

/// A file-backed store keeps its rows across connections
#[test]
fn test_file_backed_store() -> Result<()> {
    let dir = tempdir()?;
    let config = StoreConfig::file(dir.path().join("relq.db"));
    let registry = common::create_registry()?;

    let team_id = {
        let store = SqliteStore::open(&config)?;
        store.create_schema(&registry)?;
        Executor::new(&registry, &store).persist(&Record::new("Team").set("name", "teamA"))?
    };

    let store = SqliteStore::open(&config)?;
    // Creating the schema again leaves existing tables alone
    store.create_schema(&registry)?;
    let team = Executor::new(&registry, &store).find("Team", team_id)?.expect("persisted");
    assert_eq!(team.get_str("name")?, Some("teamA"));
    Ok(())
}
