use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use log::info;

use relq::catalog::SchemaRegistry;
use relq::query::executor::translate;
use relq::query::planner::Aggregate;
use relq::query::predicate::{ComparisonOp, ScalarSubquery};
use relq::{
    DataValue, EntityDescriptor, EntityId, Executor, Predicate, PredicateBuilder, ProjectionItem, QueryBuilder,
    Record, SortKey, SqliteStore, StoreConfig,
};

/// Schema used when no schema file is given
const DEFAULT_SCHEMA: &str = r#"{
  "entities": [
    { "name": "Team", "fields": [
      { "name": "id", "type": "integer", "primary_key": true },
      { "name": "name", "type": "text", "nullable": true }
    ]},
    { "name": "Member", "fields": [
      { "name": "id", "type": "integer", "primary_key": true },
      { "name": "username", "type": "text", "nullable": true },
      { "name": "age", "type": "integer" },
      { "name": "team", "type": "reference", "target": "Team", "nullable": true }
    ]}
  ]
}"#;

#[derive(Parser)]
#[command(author, version, about = "relq - typed queries over a relational store")]
struct Cli {
    /// Schema file (JSON); the built-in Member/Team schema when omitted
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Database file; in-memory when omitted
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the registered entities and their tables
    Schema,

    /// Seed the sample teams and members, then run the sample queries
    Demo,

    /// Query one entity
    Query {
        /// Entity to select from
        #[arg(short, long)]
        entity: String,

        /// Equality filter, repeatable
        #[arg(long = "eq", value_name = "FIELD=VALUE")]
        eq: Vec<String>,

        /// Sort key, repeatable
        #[arg(long = "order-by", value_name = "FIELD[:desc][:nulls-first|:nulls-last]")]
        order_by: Vec<String>,

        /// Rows to skip
        #[arg(long)]
        offset: Option<u64>,

        /// Maximum rows to return
        #[arg(long)]
        limit: Option<u64>,

        /// Relation to load with each row, repeatable; `Entity.field` for nested relations
        #[arg(long = "fetch-join", value_name = "RELATION")]
        fetch_join: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let registry = SchemaRegistry::instance();
    match &cli.schema {
        Some(path) => registry
            .load_file(path)
            .with_context(|| format!("Failed to load schema {}", path.display()))?,
        None => registry.load_json(DEFAULT_SCHEMA)?,
    }

    let config = StoreConfig {
        path: cli.db.clone(),
        ..StoreConfig::default()
    };
    let store = SqliteStore::open(&config).context("Failed to open store")?;
    store.create_schema(&registry)?;

    match cli.command {
        Commands::Schema => print_schema(&registry),
        Commands::Demo => run_demo(&registry, &store),
        Commands::Query {
            entity,
            eq,
            order_by,
            offset,
            limit,
            fetch_join,
        } => {
            let mut builder = QueryBuilder::select_from(&entity);
            let descriptor = registry.resolve(&entity)?;
            for filter in &eq {
                builder = builder.filter(parse_filter(&descriptor, filter)?);
            }
            for key in &order_by {
                builder = builder.order_by(parse_sort_key(&descriptor, key)?);
            }
            for relation in &fetch_join {
                let (owner, field) = match relation.split_once('.') {
                    Some((owner, field)) => (registry.resolve(owner)?, field),
                    None => (descriptor.clone(), relation.as_str()),
                };
                builder = builder.left_fetch_join(owner.field_ref(field)?);
            }
            if let Some(offset) = offset {
                builder = builder.offset(offset);
            }
            if let Some(limit) = limit {
                builder = builder.limit(limit);
            }

            let plan = builder.plan(&registry)?;
            info!("Query plan:\n{}", plan);
            let page = Executor::new(&registry, &store).execute(&plan)?;
            print!("{}", page.to_string_table());
            Ok(())
        }
    }
}

fn print_schema(registry: &SchemaRegistry) -> Result<()> {
    for entity in registry.entities() {
        println!("{} (table {})", entity.name(), entity.table());
        for field in entity.fields() {
            let mut line = format!("  {} {}", field.name(), field.data_type());
            if let Some(target) = field.target() {
                line.push_str(&format!(" -> {}", target));
            }
            if field.is_primary_key() {
                line.push_str(" primary key");
            } else if !field.is_nullable() {
                line.push_str(" not null");
            }
            println!("{}", line);
        }
        println!("  {}", translate::create_table(&entity, registry)?);
    }
    Ok(())
}

/// `field=value`, with the value parsed as the field's type; `null` tests for NULL
fn parse_filter(entity: &Arc<EntityDescriptor>, filter: &str) -> Result<Predicate> {
    let (name, raw) = filter
        .split_once('=')
        .ok_or_else(|| anyhow!("Filter {} must look like field=value", filter))?;
    let predicates = PredicateBuilder::new(entity.clone());
    let value = DataValue::parse_as(raw, predicates.field(name)?.data_type())?;

    if value.is_null() {
        return Ok(predicates.is_null(name)?);
    }
    Ok(predicates.compare(name, ComparisonOp::Eq, value)?)
}

/// `field[:asc|:desc][:nulls-first|:nulls-last]`
fn parse_sort_key(entity: &EntityDescriptor, text: &str) -> Result<SortKey> {
    let mut parts = text.split(':');
    let name = parts.next().unwrap_or_default();
    let field = entity.field_ref(name)?;

    let mut key = SortKey::asc(field.clone());
    for part in parts {
        key = match part {
            "asc" => SortKey::asc(field.clone()),
            "desc" => SortKey::desc(field.clone()),
            "nulls-first" => key.nulls_first(),
            "nulls-last" => key.nulls_last(),
            other => bail!("Unknown sort option {} in {}", other, text),
        };
    }
    Ok(key)
}

fn run_demo(registry: &SchemaRegistry, store: &SqliteStore) -> Result<()> {
    store.with_transaction(|tx| {
        let executor = Executor::new(registry, tx);
        let team_a = executor.persist(&Record::new("Team").set("name", "teamA"))?;
        let team_b = executor.persist(&Record::new("Team").set("name", "teamB"))?;
        let members: [(&str, i64, EntityId); 4] = [
            ("member1", 10, team_a),
            ("member2", 20, team_a),
            ("member3", 30, team_b),
            ("member4", 40, team_b),
        ];
        for (username, age, team) in members {
            executor.persist(
                &Record::new("Member")
                    .set("username", username)
                    .set("age", age)
                    .set("team", team),
            )?;
        }
        Ok(())
    })?;

    let executor = Executor::new(registry, store);
    let member = registry.resolve("Member")?;
    let members = registry.predicates("Member")?;
    let teams = registry.predicates("Team")?;

    println!("Members with their teams, oldest first:");
    let plan = QueryBuilder::select_from("Member")
        .fetch_join(member.field_ref("team")?)
        .order_by(SortKey::desc(member.field_ref("age")?))
        .plan(registry)?;
    print!("{}", executor.execute(&plan)?.to_string_table());

    println!("\nMembers of teamA:");
    let plan = QueryBuilder::select(vec![member.field_ref("username")?])
        .from("Member")
        .join(member.field_ref("team")?)
        .filter(teams.eq("name", "teamA")?)
        .order_by(SortKey::asc(member.field_ref("username")?))
        .plan(registry)?;
    print!("{}", executor.execute(&plan)?.to_string_table());

    println!("\nAge statistics:");
    let age = member.field_ref("age")?;
    let plan = QueryBuilder::select(vec![
        ProjectionItem::from(Aggregate::count(&member)),
        Aggregate::sum(age.clone())?.into(),
        Aggregate::avg(age.clone())?.into(),
        Aggregate::min(age.clone())?.into(),
        Aggregate::max(age.clone())?.into(),
    ])
    .from("Member")
    .plan(registry)?;
    print!("{}", executor.execute(&plan)?.to_string_table());

    println!("\nMembers at or above the average age:");
    let average = ScalarSubquery::new(Aggregate::avg(age)?);
    let plan = QueryBuilder::select_from("Member")
        .filter(members.compare_subquery("age", ComparisonOp::Ge, average)?)
        .plan(registry)?;
    print!("{}", executor.execute(&plan)?.to_string_table());
    Ok(())
}
