use std::fs;
use std::process::Command;

use anyhow::Result;

const BIN: &str = env!("CARGO_BIN_EXE_relq");

/// The schema command lists the built-in entities
#[test]
fn test_cli_schema_command() -> Result<()> {
    let output = Command::new(BIN).args(["schema"]).output()?;
    assert!(output.status.success(), "CLI schema command failed");

    let output_str = String::from_utf8(output.stdout)?;
    assert!(output_str.contains("Team (table team)"));
    assert!(output_str.contains("Member (table member)"));
    assert!(output_str.contains("team REFERENCE -> Team"));
    assert!(output_str.contains("CREATE TABLE IF NOT EXISTS \"member\""));
    Ok(())
}

/// The demo seeds the sample data and prints every sample query
#[test]
fn test_cli_demo() -> Result<()> {
    let output = Command::new(BIN).args(["demo"]).output()?;
    assert!(output.status.success(), "CLI demo failed");

    let output_str = String::from_utf8(output.stdout)?;
    assert!(output_str.contains("'member4'"));
    assert!(output_str.contains("Team#"));
    assert!(output_str.contains("avg(age)"));
    assert!(output_str.contains("25"));
    Ok(())
}

/// Queries run against a database file seeded by the demo
#[test]
fn test_cli_query_after_demo() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("relq.db");
    let db = db_path.to_string_lossy().to_string();

    let seeded = Command::new(BIN).args(["--db", &db, "demo"]).output()?;
    assert!(seeded.status.success(), "CLI demo failed");

    let output = Command::new(BIN)
        .args(["--db", &db, "query", "--entity", "Member", "--eq", "username=member1"])
        .output()?;
    assert!(output.status.success(), "CLI query failed");
    let output_str = String::from_utf8(output.stdout)?;
    assert!(output_str.contains("'member1'"));
    assert!(output_str.contains("(1 of 1 rows)"));

    let output = Command::new(BIN)
        .args([
            "--db",
            &db,
            "query",
            "--entity",
            "Member",
            "--order-by",
            "age:desc",
            "--offset",
            "1",
            "--limit",
            "2",
            "--fetch-join",
            "team",
        ])
        .output()?;
    assert!(output.status.success(), "CLI paged query failed");
    let output_str = String::from_utf8(output.stdout)?;
    assert!(output_str.contains("'member3'"));
    assert!(output_str.contains("'member2'"));
    assert!(!output_str.contains("'member4'"));
    assert!(output_str.contains("(2 of 4 rows)"));
    Ok(())
}

#[test]
fn test_cli_custom_schema() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let schema_path = temp_dir.path().join("schema.json");
    fs::write(
        &schema_path,
        r#"{ "entities": [ { "name": "Book", "fields": [
            { "name": "id", "type": "integer", "primary_key": true },
            { "name": "title", "type": "text" }
        ]} ] }"#,
    )?;

    let output = Command::new(BIN)
        .args(["--schema", &schema_path.to_string_lossy(), "query", "--entity", "Book"])
        .output()?;
    assert!(output.status.success(), "CLI query with custom schema failed");
    assert!(String::from_utf8(output.stdout)?.contains("Empty result"));
    Ok(())
}

/// Invalid queries fail with the error on stderr
#[test]
fn test_cli_rejects_unknown_field() -> Result<()> {
    let output = Command::new(BIN)
        .args(["query", "--entity", "Member", "--eq", "email=x"])
        .output()?;
    assert!(!output.status.success());

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Unknown field: Member.email"));
    Ok(())
}
