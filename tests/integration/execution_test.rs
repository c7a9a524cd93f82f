use anyhow::Result;

use relq::query::planner::Aggregate;
use relq::{ComparisonOp, DataValue, QueryBuilder, QueryError, ScalarSubquery, SortKey};

#[path = "../common/mod.rs"]
mod common;
use common::{Fixture, Member, usernames};

#[test]
fn test_lookup_by_username() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("username", "member1")?)
        .plan(&fixture.registry)?;
    let row = fixture.executor().fetch_one(&plan)?.expect("member1 exists");
    let member: Member = row.decode()?;

    assert_eq!(member.username.as_deref(), Some("member1"));
    assert_eq!(member.age, 10);
    assert_eq!(member.team_id, Some(fixture.team_a));
    Ok(())
}

#[test]
fn test_username_and_age_range() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("username", "member1")?.and(members.between("age", 10, 20)?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member1")]);

    // Bounds are inclusive
    let plan = QueryBuilder::select_from("Member")
        .filter(members.between("age", 20, 30)?)
        .order_by(SortKey::asc(members.field("age")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member2"), Some("member3")]);
    Ok(())
}

#[test]
fn test_list_all() -> Result<()> {
    let fixture = Fixture::new()?;
    let plan = QueryBuilder::select_from("Member").plan(&fixture.registry)?;

    let page = fixture.executor().execute(&plan)?;
    assert_eq!(page.len(), 4);
    assert_eq!(page.total(), 4);
    assert!(page.rows().iter().all(|row| row.entity() == Some("Member")));
    Ok(())
}

#[test]
fn test_fetch_first() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .order_by(SortKey::asc(members.field("id")?))
        .plan(&fixture.registry)?;
    let first: Member = fixture.executor().fetch_first(&plan)?.expect("rows exist").decode()?;
    assert_eq!(first.username.as_deref(), Some("member1"));
    Ok(())
}

/// No match is an empty outcome, not an error
#[test]
fn test_empty_result() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("username", "nobody")?)
        .plan(&fixture.registry)?;
    let executor = fixture.executor();
    assert!(executor.fetch_one(&plan)?.is_none());
    assert!(executor.fetch_first(&plan)?.is_none());
    assert!(executor.execute(&plan)?.is_empty());
    Ok(())
}

#[test]
fn test_fetch_one_rejects_several_rows() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .filter(members.gt("age", 15)?)
        .plan(&fixture.registry)?;
    assert!(matches!(fixture.executor().fetch_one(&plan), Err(QueryError::NonUniqueResult(3))));
    Ok(())
}

/// age desc, username asc nulls last over the members aged 100
#[test]
fn test_sort_with_nulls_last() -> Result<()> {
    let fixture = Fixture::new()?;
    let executor = fixture.executor();
    executor.persist(&common::member(None, 100, None))?;
    executor.persist(&common::member(Some("member5"), 100, None))?;
    executor.persist(&common::member(Some("member6"), 100, None))?;

    let members = fixture.registry.predicates("Member")?;
    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("age", 100)?)
        .order_by(SortKey::desc(members.field("age")?))
        .order_by(SortKey::asc(members.field("username")?).nulls_last())
        .plan(&fixture.registry)?;
    let found: Vec<Member> = executor.fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member5"), Some("member6"), None]);

    // Ascending defaults to nulls first
    let plan = QueryBuilder::select_from("Member")
        .filter(members.eq("age", 100)?)
        .order_by(SortKey::asc(members.field("username")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = executor.fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![None, Some("member5"), Some("member6")]);
    Ok(())
}

#[test]
fn test_null_tests_and_negation() -> Result<()> {
    let fixture = Fixture::new()?;
    let executor = fixture.executor();
    executor.persist(&common::member(Some("loner"), 50, None))?;

    let members = fixture.registry.predicates("Member")?;
    let plan = QueryBuilder::select_from("Member")
        .filter(members.is_null("team")?)
        .plan(&fixture.registry)?;
    let found: Vec<Member> = executor.fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("loner")]);

    let plan = QueryBuilder::select_from("Member")
        .filter(members.not(members.eq("team", fixture.team_a)?).and(members.is_not_null("team")?))
        .order_by(SortKey::asc(members.field("age")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = executor.fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member3"), Some("member4")]);
    Ok(())
}

/// age >= avg(age) keeps the members aged 30 and 40
#[test]
fn test_average_age_subquery() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let avg_age = ScalarSubquery::new(Aggregate::avg(members.field("age")?)?);
    let plan = QueryBuilder::select_from("Member")
        .filter(members.compare_subquery("age", ComparisonOp::Ge, avg_age)?)
        .order_by(SortKey::asc(members.field("age")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;

    let ages: Vec<i64> = found.iter().map(|m| m.age).collect();
    assert_eq!(ages, vec![30, 40]);
    Ok(())
}

/// The subquery filter refers to the member being tested
#[test]
fn test_correlated_subquery() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;
    let teams = fixture.registry.predicates("Team")?;

    let own_team_a = ScalarSubquery::new(Aggregate::min(teams.field("id")?)?)
        .filter(teams.compare_field("id", ComparisonOp::Eq, &members.field("team")?)?)
        .filter(teams.eq("name", "teamA")?);
    let plan = QueryBuilder::select_from("Member")
        .filter(members.compare_subquery("team", ComparisonOp::Eq, own_team_a)?)
        .order_by(SortKey::asc(members.field("username")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member1"), Some("member2")]);
    Ok(())
}

/// Members at or above the average age of their own team
#[test]
fn test_correlated_subquery_over_same_entity() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;
    let teammates = fixture.registry.aliased_predicates("Member", "teammate")?;

    let team_avg = ScalarSubquery::new(Aggregate::avg(teammates.field("age")?)?)
        .filter(teammates.compare_field("team", ComparisonOp::Eq, &members.field("team")?)?);
    let plan = QueryBuilder::select_from("Member")
        .filter(members.compare_subquery("age", ComparisonOp::Ge, team_avg)?)
        .order_by(SortKey::asc(members.field("username")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;
    assert_eq!(usernames(&found), vec![Some("member2"), Some("member4")]);

    // Without the alias both sides are the same column
    assert!(matches!(
        members.compare_field("team", ComparisonOp::Eq, &members.field("team")?),
        Err(QueryError::InvalidJoin(_))
    ));
    Ok(())
}

#[test]
fn test_field_projection() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select(vec![members.field("username")?, members.field("age")?])
        .from("Member")
        .filter(members.le("age", 20)?)
        .order_by(SortKey::desc(members.field("age")?))
        .plan(&fixture.registry)?;
    let rows = fixture.executor().fetch(&plan)?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].columns(), vec!["username", "age"]);
    assert_eq!(rows[0].entity(), None);
    assert_eq!(rows[0].get("username"), Some(&DataValue::from("member2")));
    assert_eq!(rows[1].get_i64("age")?, Some(10));
    Ok(())
}

/// Hand-written SQL bypasses the planner
#[test]
fn test_native_query() -> Result<()> {
    let fixture = Fixture::new()?;
    let rows = fixture.executor().native_query(
        "SELECT username, age FROM member WHERE age > ? ORDER BY age",
        &[DataValue::Integer(25)],
    )?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_str("username")?, Some("member3"));
    assert_eq!(rows[1].get_i64("age")?, Some(40));

    let err = fixture.executor().native_query("SELECT * FROM nowhere", &[]);
    assert!(matches!(err, Err(QueryError::ExecutionError(_))));
    Ok(())
}
