use anyhow::Result;

use relq::query::planner::Aggregate;
use relq::{EntityRef, ProjectionItem, QueryBuilder, QueryError, SortKey};

#[path = "../common/mod.rs"]
mod common;
use common::{Fixture, Member, Team, usernames};

/// Join on team name teamA yields member1 and member2
#[test]
fn test_join_on_team_name() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let teams = fixture.registry.predicates("Team")?;

    let plan = QueryBuilder::select_from("Member")
        .join(member.field_ref("team")?)
        .filter(teams.eq("name", "teamA")?)
        .order_by(SortKey::asc(member.field_ref("username")?))
        .plan(&fixture.registry)?;
    let found: Vec<Member> = fixture.executor().fetch_as(&plan)?;

    assert_eq!(usernames(&found), vec![Some("member1"), Some("member2")]);
    Ok(())
}

/// A plain join leaves the team unresolved until asked for
#[test]
fn test_lazy_join_leaves_relation_unresolved() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .join(member.field_ref("team")?)
        .filter(members.eq("username", "member3")?)
        .plan(&fixture.registry)?;
    let executor = fixture.executor();
    let row = executor.fetch_one(&plan)?.expect("member3 exists");

    let relation = row.relation("team").expect("member3 has a team");
    assert!(!relation.is_loaded());
    assert_eq!(
        relation,
        &EntityRef::Unresolved {
            entity: "Team".to_string(),
            id: fixture.team_b
        }
    );

    let team: Team = executor.resolve(relation)?.decode()?;
    assert_eq!(team.name.as_deref(), Some("teamB"));
    Ok(())
}

/// A fetch join loads the team with each member
#[test]
fn test_fetch_join_loads_relation() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;

    let plan = QueryBuilder::select_from("Member")
        .fetch_join(member.field_ref("team")?)
        .order_by(SortKey::asc(member.field_ref("age")?))
        .plan(&fixture.registry)?;
    let page = fixture.executor().execute(&plan)?;
    assert_eq!(page.len(), 4);

    for row in page.rows() {
        assert!(row.relation("team").is_some_and(EntityRef::is_loaded));
    }
    let found: Vec<Member> = page.decode_all()?;
    let teams: Vec<Option<&str>> = found
        .iter()
        .map(|m| m.team.as_ref().and_then(|t| t.name.as_deref()))
        .collect();
    assert_eq!(teams, vec![Some("teamA"), Some("teamA"), Some("teamB"), Some("teamB")]);

    // Loaded relations resolve without touching the store
    let first = &page.rows()[0];
    let team = fixture.executor().resolve(first.relation("team").expect("fetched"))?;
    assert_eq!(team.id(), Some(fixture.team_a));
    Ok(())
}

/// Members without a team only survive a left join
#[test]
fn test_left_join_keeps_unmatched_rows() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.executor().persist(&common::member(Some("loner"), 50, None))?;
    let member = fixture.registry.resolve("Member")?;

    let inner = QueryBuilder::select_from("Member")
        .fetch_join(member.field_ref("team")?)
        .plan(&fixture.registry)?;
    assert_eq!(fixture.executor().execute(&inner)?.len(), 4);

    let left = QueryBuilder::select_from("Member")
        .left_fetch_join(member.field_ref("team")?)
        .order_by(SortKey::desc(member.field_ref("age")?))
        .plan(&fixture.registry)?;
    let rows = fixture.executor().fetch(&left)?;
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].get_str("username")?, Some("loner"));
    assert!(rows[0].relation("team").is_none());
    Ok(())
}

#[test]
fn test_resolve_missing_entity() -> Result<()> {
    let fixture = Fixture::new()?;
    let dangling = EntityRef::Unresolved {
        entity: "Team".to_string(),
        id: 999,
    };
    assert!(matches!(
        fixture.executor().resolve(&dangling),
        Err(QueryError::EntityNotFound { id: 999, .. })
    ));
    Ok(())
}

/// Joined entities can be projected, filtered and grouped on
#[test]
fn test_group_by_joined_field() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let team = fixture.registry.resolve("Team")?;

    let plan = QueryBuilder::select(vec![
        ProjectionItem::Field(team.field_ref("name")?),
        ProjectionItem::Aggregate(Aggregate::count(&member)),
        ProjectionItem::Aggregate(Aggregate::avg(member.field_ref("age")?)?),
    ])
    .from("Member")
    .join(member.field_ref("team")?)
    .group_by(team.field_ref("name")?)
    .order_by(SortKey::desc(team.field_ref("name")?))
    .plan(&fixture.registry)?;
    let rows = fixture.executor().fetch(&plan)?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_str("Team.name")?, Some("teamB"));
    assert_eq!(rows[0].get_i64("count(*)")?, Some(2));
    assert_eq!(rows[0].get_f64("avg(age)")?, Some(35.0));
    assert_eq!(rows[1].get_f64("avg(age)")?, Some(15.0));
    Ok(())
}

/// Counts over the source and the joined entity keep distinct labels
#[test]
fn test_count_labels_per_entity() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let team = fixture.registry.resolve("Team")?;

    let plan = QueryBuilder::select(vec![
        ProjectionItem::Aggregate(Aggregate::count(&member)),
        ProjectionItem::Aggregate(Aggregate::count(&team)),
    ])
    .from("Member")
    .join(member.field_ref("team")?)
    .plan(&fixture.registry)?;
    let rows = fixture.executor().fetch(&plan)?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("count(*)")?, Some(4));
    assert_eq!(rows[0].get_i64("count(Team.*)")?, Some(4));
    Ok(())
}

/// Projecting the joined entity returns team rows, one per member
#[test]
fn test_project_joined_entity() -> Result<()> {
    let fixture = Fixture::new()?;
    let member = fixture.registry.resolve("Member")?;
    let members = fixture.registry.predicates("Member")?;

    let plan = QueryBuilder::select(vec![ProjectionItem::entity("Team")])
        .from("Member")
        .join(member.field_ref("team")?)
        .filter(members.ge("age", 30)?)
        .plan(&fixture.registry)?;
    let found: Vec<Team> = fixture.executor().fetch_as(&plan)?;

    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|t| t.id == fixture.team_b));
    Ok(())
}
