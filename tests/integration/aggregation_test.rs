use anyhow::Result;

use relq::query::planner::Aggregate;
use relq::{DataValue, Predicate, ProjectionItem, QueryBuilder, QueryPlan, SchemaRegistry, SortKey};

#[path = "../common/mod.rs"]
mod common;
use common::Fixture;

fn age_statistics(registry: &SchemaRegistry, filter: Option<Predicate>) -> Result<QueryPlan> {
    let member = registry.resolve("Member")?;
    let age = member.field_ref("age")?;
    let mut builder = QueryBuilder::select(vec![
        ProjectionItem::from(Aggregate::count(&member)),
        Aggregate::sum(age.clone())?.into(),
        Aggregate::avg(age.clone())?.into(),
        Aggregate::min(age.clone())?.into(),
        Aggregate::max(age)?.into(),
    ])
    .from("Member");
    if let Some(filter) = filter {
        builder = builder.filter(filter);
    }
    Ok(builder.plan(registry)?)
}

/// count, sum, avg, min and max over every member
#[test]
fn test_aggregate_tuple() -> Result<()> {
    let fixture = Fixture::new()?;
    let plan = age_statistics(&fixture.registry, None)?;

    let page = fixture.executor().execute(&plan)?;
    assert_eq!(page.len(), 1);
    let row = &page.rows()[0];
    assert_eq!(row.columns(), vec!["count(*)", "sum(age)", "avg(age)", "min(age)", "max(age)"]);
    assert_eq!(row.get_i64("count(*)")?, Some(4));
    assert_eq!(row.get_i64("sum(age)")?, Some(100));
    assert_eq!(row.get_f64("avg(age)")?, Some(25.0));
    assert_eq!(row.get_i64("min(age)")?, Some(10));
    assert_eq!(row.get_i64("max(age)")?, Some(40));
    Ok(())
}

/// Aggregates equal independent reductions of the filtered set
#[test]
fn test_aggregates_match_reductions() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;
    let executor = fixture.executor();

    for threshold in [0, 15, 25, 35] {
        let filter = members.gt("age", threshold)?;
        let rows = executor.fetch(&QueryBuilder::select_from("Member").filter(filter.clone()).plan(&fixture.registry)?)?;
        let ages: Vec<i64> = rows
            .iter()
            .map(|r| r.get_i64("age"))
            .collect::<relq::QueryResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let stats = executor.fetch_one(&age_statistics(&fixture.registry, Some(filter))?)?.expect("one row");
        assert_eq!(stats.get_i64("count(*)")?, Some(ages.len() as i64));
        assert_eq!(stats.get_i64("sum(age)")?, Some(ages.iter().sum()));
        assert_eq!(stats.get_i64("min(age)")?, ages.iter().min().copied());
        assert_eq!(stats.get_i64("max(age)")?, ages.iter().max().copied());
        let avg = ages.iter().sum::<i64>() as f64 / ages.len() as f64;
        assert_eq!(stats.get_f64("avg(age)")?, Some(avg));
    }
    Ok(())
}

/// An empty set still yields one row: count 0, NULL elsewhere
#[test]
fn test_aggregate_over_empty_set() -> Result<()> {
    let fixture = Fixture::new()?;
    let members = fixture.registry.predicates("Member")?;
    let plan = age_statistics(&fixture.registry, Some(members.gt("age", 1000)?))?;

    let row = fixture.executor().fetch_one(&plan)?.expect("one row");
    assert_eq!(row.get_i64("count(*)")?, Some(0));
    assert_eq!(row.get("sum(age)"), Some(&DataValue::Null));
    assert_eq!(row.get_f64("avg(age)")?, None);
    Ok(())
}

/// A single aggregate row ignores offset and limit
#[test]
fn test_aggregate_ignores_pagination() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;

    let plan = QueryBuilder::select(vec![Aggregate::count(&member)])
        .from("Member")
        .offset(3)
        .limit(1)
        .plan(&fixture.registry)?;
    let page = fixture.executor().execute(&plan)?;
    assert_eq!(page.len(), 1);
    assert_eq!(page.total(), 1);
    assert_eq!(page.rows()[0].get_i64("count(*)")?, Some(4));
    Ok(())
}

#[test]
fn test_group_by_with_sort_and_page() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let team = member.field_ref("team")?;

    let plan = QueryBuilder::select(vec![
        ProjectionItem::Field(team.clone()),
        ProjectionItem::Aggregate(Aggregate::max(member.field_ref("age")?)?),
    ])
    .from("Member")
    .group_by(team.clone())
    .order_by(SortKey::desc(team))
    .limit(1)
    .plan(&fixture.registry)?;
    let page = fixture.executor().execute(&plan)?;

    // Two groups in total, the page holds the one sorted first
    assert_eq!(page.total(), 2);
    assert_eq!(page.len(), 1);
    assert_eq!(page.rows()[0].get_i64("team")?, Some(fixture.team_b));
    assert_eq!(page.rows()[0].get_i64("max(age)")?, Some(40));
    Ok(())
}

#[test]
fn test_count_of_field_skips_nulls() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.executor().persist(&common::member(None, 5, None))?;
    let member = fixture.registry.resolve("Member")?;

    let plan = QueryBuilder::select(vec![
        ProjectionItem::from(Aggregate::count(&member)),
        Aggregate::count_field(member.field_ref("username")?).into(),
    ])
    .from("Member")
    .plan(&fixture.registry)?;
    let row = fixture.executor().fetch_one(&plan)?.expect("one row");

    assert_eq!(row.get_i64("count(*)")?, Some(5));
    assert_eq!(row.get_i64("count(username)")?, Some(4));
    Ok(())
}
