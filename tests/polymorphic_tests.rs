mod common;

use common::*;
use rustmemodb_orm::polymorphic::{PendingRelation, RelationLoader};
use rustmemodb_orm::prelude::*;
use rustmemodb_orm::sql::{InsertOperation, Operation};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::assert_err;

struct Fleet {
    fx: Fixture,
    trailers: Arc<PolymorphicPersister<Trailer>>,
    vehicles: Arc<PolymorphicPersister<Vehicle>>,
    garages: SimplePersister<Garage>,
}

async fn fleet(versioned: bool) -> anyhow::Result<Fleet> {
    let fx = Fixture::new(Vec::new()).await?;
    let trailers = trailer_persister(fx.provider())?;
    let vehicles = vehicle_persister(fx.provider(), versioned, trailers.clone())?;
    let garages = garage_persister(fx.provider(), vehicles.clone())?;

    let mut schemas = trailers.table_schemas();
    schemas.extend(vehicles.table_schemas());
    schemas.push(garages.mapping().table_schema());
    for schema in schemas {
        fx.store.create_table(schema).await?;
    }
    Ok(Fleet {
        fx,
        trailers,
        vehicles,
        garages,
    })
}

fn ids(values: &[i64]) -> Vec<Identifier> {
    values.iter().copied().map(Identifier::from).collect()
}

fn sql_of(fx: &Fixture, prefix: &str) -> Vec<String> {
    fx.statements_like(prefix).into_iter().map(|s| s.sql).collect()
}

#[tokio::test]
async fn test_joined_insert_writes_root_before_children() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut first = car(1, 5);
    let mut second = truck(2, 100, None);
    let written = fleet.vehicles.insert(&mut [&mut first, &mut second]).await?;
    assert_eq!(written, 4);

    assert_eq!(
        sql_of(&fleet.fx, "insert"),
        vec![
            "insert into vehicle(id, wheels) values (?, ?)",
            "insert into car(id, seats) values (?, ?)",
            "insert into truck(id, payload, trailer_id) values (?, ?, ?)",
        ]
    );
    assert_eq!(fleet.fx.store.row_count("vehicle").await?, 2);
    assert_eq!(fleet.fx.store.row_count("car").await?, 1);
    assert_eq!(fleet.fx.store.row_count("truck").await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_joined_select_resolves_subtypes_in_request_order() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut first = car(1, 5);
    let mut second = truck(2, 100, None);
    fleet.vehicles.insert(&mut [&mut first, &mut second]).await?;
    fleet.fx.store.clear_statements();

    let found = fleet.vehicles.select(ids(&[2, 1, 3])).await?;
    assert_eq!(found, vec![second, first]);

    assert_eq!(
        sql_of(&fleet.fx, "select"),
        vec![
            "select r.id as r_id, rs0.id as rs0_id, rs1.id as rs1_id from vehicle r left outer join car rs0 on r.id = rs0.id left outer join truck rs1 on r.id = rs1.id where r.id in (?, ?, ?)",
            "select t.id as t_id, t.seats as t_seats, p.wheels as p_wheels from car t inner join vehicle p on t.id = p.id where t.id = ?",
            "select t.id as t_id, t.payload as t_payload, t.trailer_id as t_trailer_id, p.wheels as p_wheels, r0.id as r0_id, r0.kind as r0_kind from truck t inner join vehicle p on t.id = p.id left outer join trailer r0 on t.trailer_id = r0.id where t.id = ?",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_relations_load_in_two_phases() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut tanker = Trailer::Tanker { id: 7, capacity: 900 };
    fleet.trailers.insert(&mut [&mut tanker]).await?;
    let mut hauler = truck(2, 100, Some(7));
    let mut sedan = car(1, 5);
    fleet.vehicles.insert(&mut [&mut hauler, &mut sedan]).await?;
    let mut north = garage(10, "north", Some(2));
    let mut south = garage(11, "south", Some(1));
    let mut empty = garage(12, "empty", None);
    fleet
        .garages
        .insert(&mut [&mut north, &mut south, &mut empty])
        .await?;

    let mut ctx = LoadContext::new();
    let found = fleet
        .garages
        .select_with_context(ids(&[10, 11, 12]), &mut ctx)
        .await?;
    assert_eq!(ctx.depth(), 0);
    assert!(ctx.is_empty());

    let expected_truck = Vehicle::Truck(Truck {
        id: 2,
        wheels: 6,
        payload: 100,
        trailer_id: Some(7),
        trailer: Some(Trailer::Tanker { id: 7, capacity: 900 }),
        version: VersionToken::default(),
    });
    assert_eq!(found.len(), 3);
    assert_eq!(found[0].vehicle, Some(expected_truck));
    assert_eq!(found[1].vehicle, Some(car(1, 5)));
    assert_eq!(found[2].vehicle, None);
    assert_eq!(found[2].name, "empty");
    Ok(())
}

#[tokio::test]
async fn test_dangling_foreign_key_leaves_relation_unset() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut orphan = garage(20, "orphan", Some(404));
    fleet.garages.insert(&mut [&mut orphan]).await?;

    let found = fleet.garages.select(ids(&[20])).await?;
    assert_eq!(found, vec![orphan]);
    Ok(())
}

#[tokio::test]
async fn test_single_table_ignores_unknown_discriminator() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut flatbed = Trailer::Flatbed { id: 1, length: 12 };
    let mut tanker = Trailer::Tanker { id: 2, capacity: 500 };
    fleet.trailers.insert(&mut [&mut flatbed, &mut tanker]).await?;
    assert_eq!(
        sql_of(&fleet.fx, "insert"),
        vec![
            "insert into trailer(id, length, kind) values (?, ?, ?)",
            "insert into trailer(id, capacity, kind) values (?, ?, ?)",
        ]
    );

    let raw = Operation::Insert(InsertOperation {
        table: "trailer".into(),
        columns: vec!["id".into(), "kind".into()],
        generated: None,
    });
    fleet
        .fx
        .store
        .apply(&raw, &[Value::Integer(9), Value::from("boat")])
        .await?;

    let found = fleet.trailers.select(ids(&[9, 2, 1])).await?;
    assert_eq!(found, vec![tanker, flatbed]);
    Ok(())
}

#[tokio::test]
async fn test_joined_delete_removes_child_then_root() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut sedan = car(1, 5);
    let mut hauler = truck(2, 100, None);
    fleet.vehicles.insert(&mut [&mut sedan, &mut hauler]).await?;
    fleet.fx.store.clear_statements();

    assert_eq!(fleet.vehicles.delete(&[&sedan]).await?, 2);
    assert_eq!(
        sql_of(&fleet.fx, "delete"),
        vec!["delete from car where id = ?", "delete from vehicle where id = ?"]
    );
    assert_eq!(fleet.fx.store.row_count("car").await?, 0);
    assert_eq!(fleet.fx.store.row_count("vehicle").await?, 1);

    assert_eq!(fleet.vehicles.delete_by_ids(ids(&[2])).await?, 2);
    assert_eq!(fleet.fx.store.row_count("truck").await?, 0);
    assert_eq!(fleet.fx.store.row_count("vehicle").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_subtype_only_change_bumps_root_version() -> anyhow::Result<()> {
    let fleet = fleet(true).await?;
    let mut sedan = car(1, 5);
    fleet.vehicles.insert(&mut [&mut sedan]).await?;
    assert_eq!(sedan.version().get(), Value::Integer(1));
    fleet.fx.store.clear_statements();

    let snapshot = sedan.clone();
    if let Vehicle::Car(inner) = &mut sedan {
        inner.seats = 7;
    }
    let written = fleet
        .vehicles
        .update(&mut [Duo::new(&mut sedan, &snapshot)], false)
        .await?;
    assert_eq!(written, 2);
    assert_eq!(sedan.version().get(), Value::Integer(2));

    let updates = fleet.fx.statements_like("update");
    assert_eq!(
        updates[0].sql,
        "update vehicle set version = ? where id = ? and version = ?"
    );
    assert_eq!(
        updates[0].bindings[0],
        vec![Value::Integer(2), Value::Integer(1), Value::Integer(1)]
    );
    assert_eq!(updates[1].sql, "update car set seats = ? where id = ?");

    let stored = fleet.vehicles.select(ids(&[1])).await?;
    assert_eq!(stored, vec![sedan]);
    Ok(())
}

#[tokio::test]
async fn test_unchanged_polymorphic_pair_issues_nothing() -> anyhow::Result<()> {
    let fleet = fleet(true).await?;
    let mut sedan = car(1, 5);
    fleet.vehicles.insert(&mut [&mut sedan]).await?;
    fleet.fx.store.clear_statements();

    let snapshot = sedan.clone();
    let written = fleet
        .vehicles
        .update(&mut [Duo::new(&mut sedan, &snapshot)], false)
        .await?;
    assert_eq!(written, 0);
    assert!(fleet.fx.statements_like("update").is_empty());
    assert_eq!(sedan.version().get(), Value::Integer(1));
    Ok(())
}

#[tokio::test]
async fn test_unclaimed_entity_fails_before_any_write() -> anyhow::Result<()> {
    let fx = Fixture::new(Vec::new()).await?;
    let listener = Arc::new(RecordingListener::default());
    let shapes = shape_persister(fx.provider())?.with_listener(listener.clone());
    for schema in shapes.table_schemas() {
        fx.store.create_table(schema).await?;
    }

    let mut circle = Shape::Circle { id: 1, radius: 3 };
    let mut triangle = Shape::Triangle { id: 2 };
    let err = assert_err!(shapes.insert(&mut [&mut circle, &mut triangle]).await);
    assert!(matches!(err, DbError::InvalidArgument(_)));

    assert!(fx.statements_like("insert").is_empty());
    assert_eq!(fx.store.row_count("circle").await?, 0);
    assert_eq!(
        listener.events(),
        vec!["before_insert:2".to_string(), "error:insert".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_table_per_class_select_unions_subtypes() -> anyhow::Result<()> {
    let fx = Fixture::new(Vec::new()).await?;
    let shapes = shape_persister(fx.provider())?;
    for schema in shapes.table_schemas() {
        fx.store.create_table(schema).await?;
    }

    let mut small = Shape::Circle { id: 1, radius: 3 };
    let mut square = Shape::Square { id: 2, side: 4 };
    let mut large = Shape::Circle { id: 3, radius: 5 };
    assert_eq!(
        shapes
            .insert(&mut [&mut small, &mut square, &mut large])
            .await?,
        3
    );
    assert_eq!(fx.store.row_count("circle").await?, 2);
    assert_eq!(fx.store.row_count("square").await?, 1);

    let found = shapes.select(ids(&[3, 2, 1, 99])).await?;
    assert_eq!(found, vec![large.clone(), square, small]);

    assert_eq!(shapes.delete_by_ids(ids(&[1, 2])).await?, 2);
    assert_eq!(fx.store.row_count("circle").await?, 1);
    assert_eq!(fx.store.row_count("square").await?, 0);
    assert_eq!(shapes.select(ids(&[1, 2, 3])).await?, vec![large]);
    Ok(())
}

#[tokio::test]
async fn test_polymorphic_statements_are_closed() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut sedan = car(1, 5);
    fleet.vehicles.insert(&mut [&mut sedan]).await?;

    let mut duplicate = car(1, 6);
    let err = assert_err!(fleet.vehicles.insert(&mut [&mut duplicate]).await);
    assert!(matches!(err, DbError::Statement { .. }));

    fleet.garages.select(ids(&[1])).await?;
    assert_eq!(fleet.fx.store.prepared_count(), fleet.fx.store.closed_count());
    Ok(())
}

// animal (joined): animal(id, name) + dog(id, breed) + cat(id, coat), all NOT NULL

#[derive(Debug, Clone, PartialEq)]
enum Animal {
    Dog {
        id: i64,
        name: Option<String>,
        breed: Option<String>,
    },
    Cat {
        id: i64,
        name: Option<String>,
        coat: Option<String>,
    },
}

impl Animal {
    fn id(&self) -> i64 {
        match self {
            Animal::Dog { id, .. } | Animal::Cat { id, .. } => *id,
        }
    }

    fn name(&self) -> Option<String> {
        match self {
            Animal::Dog { name, .. } | Animal::Cat { name, .. } => name.clone(),
        }
    }
}

fn animal_id() -> SimpleIdentifier<Animal> {
    SimpleIdentifier::new(Column::new("id", DataType::Integer), |a: &Animal| {
        a.id().into()
    })
}

fn dog(id: i64, name: &str, breed: &str) -> Animal {
    Animal::Dog {
        id,
        name: Some(name.to_string()),
        breed: Some(breed.to_string()),
    }
}

fn cat(id: i64, name: &str, coat: &str) -> Animal {
    Animal::Cat {
        id,
        name: Some(name.to_string()),
        coat: Some(coat.to_string()),
    }
}

async fn shelter() -> anyhow::Result<(Fixture, PolymorphicPersister<Animal>)> {
    let fx = Fixture::new(Vec::new()).await?;
    let config = PersisterConfig::default();

    let root = EntityMapping::abstract_root("animal", animal_id()).with_property(
        PropertyMapping::new(Column::new("name", DataType::Text).not_null(), |a: &Animal| {
            a.name().into()
        }),
    );
    let dogs = EntityMapping::new("dog", animal_id(), |row| {
        Ok(Animal::Dog {
            id: row.integer("id")?,
            name: row.optional_text("name")?,
            breed: row.optional_text("breed")?,
        })
    })
    .with_property(PropertyMapping::new(
        Column::new("breed", DataType::Text).not_null(),
        |a: &Animal| match a {
            Animal::Dog { breed, .. } => breed.clone().into(),
            Animal::Cat { .. } => Value::Null,
        },
    ))
    .with_parent("animal", &["name"]);
    let cats = EntityMapping::new("cat", animal_id(), |row| {
        Ok(Animal::Cat {
            id: row.integer("id")?,
            name: row.optional_text("name")?,
            coat: row.optional_text("coat")?,
        })
    })
    .with_property(PropertyMapping::new(
        Column::new("coat", DataType::Text).not_null(),
        |a: &Animal| match a {
            Animal::Cat { coat, .. } => coat.clone().into(),
            Animal::Dog { .. } => Value::Null,
        },
    ))
    .with_parent("animal", &["name"]);

    let layout = JoinedTablesPersister::new(
        SimplePersister::new(root, fx.provider(), config.clone())?,
        vec![
            Subtype::new(
                "dog",
                |a: &Animal| matches!(a, Animal::Dog { .. }),
                SimplePersister::new(dogs, fx.provider(), config.clone())?,
            ),
            Subtype::new(
                "cat",
                |a: &Animal| matches!(a, Animal::Cat { .. }),
                SimplePersister::new(cats, fx.provider(), config.clone())?,
            ),
        ],
        fx.provider(),
        config,
    )?;
    let animals: PolymorphicPersister<Animal> = layout.into();
    for schema in animals.table_schemas() {
        fx.store.create_table(schema).await?;
    }
    Ok((fx, animals))
}

#[tokio::test]
async fn test_subtype_null_fails_before_root_update() -> anyhow::Result<()> {
    let (fx, animals) = shelter().await?;
    let mut rex = dog(1, "rex", "collie");
    animals.insert(&mut [&mut rex]).await?;
    fx.store.clear_statements();

    let snapshot = rex.clone();
    if let Animal::Dog { name, breed, .. } = &mut rex {
        *name = Some("max".to_string());
        *breed = None;
    }
    let err = assert_err!(animals.update(&mut [Duo::new(&mut rex, &snapshot)], false).await);
    assert!(matches!(err, DbError::InvalidArgument(_)));

    assert!(fx.statements_like("update").is_empty());
    assert_eq!(animals.select(ids(&[1])).await?, vec![snapshot]);
    Ok(())
}

#[tokio::test]
async fn test_null_in_later_subtype_group_writes_nothing() -> anyhow::Result<()> {
    let (fx, animals) = shelter().await?;
    let mut rex = dog(1, "rex", "collie");
    let mut tom = cat(2, "tom", "tabby");
    animals.insert(&mut [&mut rex, &mut tom]).await?;
    fx.store.clear_statements();

    let (rex_before, tom_before) = (rex.clone(), tom.clone());
    if let Animal::Dog { breed, .. } = &mut rex {
        *breed = Some("beagle".to_string());
    }
    if let Animal::Cat { coat, .. } = &mut tom {
        *coat = None;
    }
    let err = assert_err!(
        animals
            .update(
                &mut [Duo::new(&mut rex, &rex_before), Duo::new(&mut tom, &tom_before)],
                false
            )
            .await
    );
    assert!(matches!(err, DbError::InvalidArgument(_)));

    assert!(fx.statements_like("update").is_empty());
    assert_eq!(
        animals.select(ids(&[1, 2])).await?,
        vec![rex_before, tom_before]
    );
    Ok(())
}

#[tokio::test]
async fn test_table_per_class_delete_by_id_stays_in_own_table() -> anyhow::Result<()> {
    let fx = Fixture::new(Vec::new()).await?;
    let shapes = shape_persister(fx.provider())?;
    for schema in shapes.table_schemas() {
        fx.store.create_table(schema).await?;
    }

    let mut circle = Shape::Circle { id: 1, radius: 3 };
    let mut square = Shape::Square { id: 1, side: 4 };
    shapes.insert(&mut [&mut circle, &mut square]).await?;

    assert_eq!(shapes.delete_by_id(&[&circle]).await?, 1);
    assert_eq!(fx.store.row_count("circle").await?, 0);
    assert_eq!(fx.store.row_count("square").await?, 1);

    assert_eq!(shapes.delete(&[&square]).await?, 1);
    assert_eq!(fx.store.row_count("square").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_update_of_unclaimed_entities_is_rejected() -> anyhow::Result<()> {
    let fx = Fixture::new(Vec::new()).await?;
    let listener = Arc::new(RecordingListener::default());
    let shapes = shape_persister(fx.provider())?.with_listener(listener.clone());
    for schema in shapes.table_schemas() {
        fx.store.create_table(schema).await?;
    }

    let snapshot = Shape::Triangle { id: 5 };
    let mut triangle = Shape::Triangle { id: 6 };
    let err = assert_err!(
        shapes
            .update(&mut [Duo::new(&mut triangle, &snapshot)], false)
            .await
    );
    assert!(matches!(err, DbError::InvalidArgument(_)));
    assert!(fx.statements_like("update").is_empty());
    assert_eq!(
        listener.events(),
        vec!["before_update:1".to_string(), "error:update".to_string()]
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    id: i64,
    shape: Option<Shape>,
}

#[tokio::test]
async fn test_relation_targets_keep_subtypes_apart() -> anyhow::Result<()> {
    let fx = Fixture::new(Vec::new()).await?;
    let shapes = Arc::new(shape_persister(fx.provider())?);
    for schema in shapes.table_schemas() {
        fx.store.create_table(schema).await?;
    }
    let mut circle = Shape::Circle { id: 1, radius: 3 };
    let mut square = Shape::Square { id: 1, side: 4 };
    shapes.insert(&mut [&mut circle, &mut square]).await?;

    let relation = PolymorphicRelation::new(
        "shape",
        &["shape_id"],
        shapes.clone(),
        |frame: &mut Frame, shape: Shape| frame.shape = Some(shape),
    );
    let pending = |selector: &str, owner: i64| PendingRelation {
        relation: 0,
        selector: selector.to_string(),
        owner: owner.into(),
        target: 1i64.into(),
    };
    let mut owners = vec![
        Frame { id: 10, shape: None },
        Frame { id: 11, shape: None },
    ];
    let index: HashMap<Identifier, usize> =
        HashMap::from([(Identifier::from(10i64), 0), (Identifier::from(11i64), 1)]);

    let mut ctx = LoadContext::new();
    relation
        .second_phase(
            vec![pending("circle", 10), pending("square", 11)],
            &mut owners,
            &index,
            &mut ctx,
        )
        .await?;
    assert_eq!(owners[0].shape, Some(circle));
    assert_eq!(owners[1].shape, Some(square));
    Ok(())
}

#[tokio::test]
async fn test_persist_reloads_without_relations() -> anyhow::Result<()> {
    let fleet = fleet(false).await?;
    let mut sedan = car(1, 5);
    fleet.vehicles.insert(&mut [&mut sedan]).await?;
    let mut north = garage(10, "north", Some(1));
    fleet.garages.insert(&mut [&mut north]).await?;
    fleet.fx.store.clear_statements();

    north.name = "north annex".to_string();
    assert_eq!(fleet.garages.persist(&mut [&mut north]).await?, 1);

    let selects = sql_of(&fleet.fx, "select");
    assert_eq!(selects.len(), 1);
    assert!(!selects[0].contains("join"), "{}", selects[0]);
    assert_eq!(
        sql_of(&fleet.fx, "update"),
        vec!["update garage set name = ? where id = ?"]
    );
    Ok(())
}
