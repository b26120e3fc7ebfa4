#![allow(dead_code)]

use rustmemodb_orm::engine::PersistListener;
use rustmemodb_orm::prelude::*;
use rustmemodb_orm::storage::ExecutedStatement;
use std::sync::{Arc, Mutex};

// ----------------------------------------------------------------------------
// Stores and providers
// ----------------------------------------------------------------------------

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub transactions: Arc<TransactionManager>,
    pub provider: Arc<MemoryConnectionProvider>,
}

impl Fixture {
    /// Transactional provider over a store holding `schemas`.
    pub async fn new(schemas: Vec<TableSchema>) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        for schema in schemas {
            store.create_table(schema).await?;
        }
        let transactions = Arc::new(TransactionManager::new(Arc::clone(&store)));
        let provider = Arc::new(MemoryConnectionProvider::transactional(Arc::clone(
            &transactions,
        )));
        Ok(Self {
            store,
            transactions,
            provider,
        })
    }

    pub fn provider(&self) -> Arc<dyn ConnectionProvider> {
        self.provider.clone()
    }

    pub fn statements_like(&self, prefix: &str) -> Vec<ExecutedStatement> {
        self.store
            .statements()
            .into_iter()
            .filter(|statement| statement.sql.starts_with(prefix))
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Person: assigned id, optional version
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: Option<String>,
    pub age: i64,
    pub version: VersionToken,
}

pub fn person(id: i64, name: &str, age: i64) -> Person {
    Person {
        id,
        name: Some(name.to_string()),
        age,
        version: VersionToken::default(),
    }
}

pub fn person_mapping(versioned: bool) -> EntityMapping<Person> {
    let mapping = EntityMapping::new(
        "person",
        SimpleIdentifier::new(Column::new("id", DataType::Integer), |p: &Person| {
            p.id.into()
        }),
        move |row| {
            Ok(Person {
                id: row.integer("id")?,
                name: row.optional_text("name")?,
                age: row.integer("age")?,
                version: if versioned {
                    row.version("version")?
                } else {
                    VersionToken::default()
                },
            })
        },
    )
    .with_property(PropertyMapping::new(
        Column::new("name", DataType::Text).not_null(),
        |p: &Person| p.name.clone().into(),
    ))
    .with_property(PropertyMapping::new(
        Column::new("age", DataType::Integer),
        |p: &Person| p.age.into(),
    ));

    if versioned {
        mapping.with_version(VersionMapping::counter("version", |p: &Person| &p.version))
    } else {
        mapping.with_is_new(|p: &Person| p.id == 0)
    }
}

pub fn people(ids: std::ops::RangeInclusive<i64>) -> Vec<Person> {
    ids.map(|id| person(id, &format!("p{}", id), 20 + id)).collect()
}

// ----------------------------------------------------------------------------
// Listener recording every hook
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl<C> PersistListener<C> for RecordingListener {
    fn before_insert(&self, entities: &[&C]) {
        self.push(format!("before_insert:{}", entities.len()));
    }

    fn after_insert(&self, entities: &[&C]) {
        self.push(format!("after_insert:{}", entities.len()));
    }

    fn before_update(&self, entities: &[&C]) {
        self.push(format!("before_update:{}", entities.len()));
    }

    fn after_update(&self, entities: &[&C]) {
        self.push(format!("after_update:{}", entities.len()));
    }

    fn before_delete(&self, entities: &[&C]) {
        self.push(format!("before_delete:{}", entities.len()));
    }

    fn after_delete(&self, entities: &[&C]) {
        self.push(format!("after_delete:{}", entities.len()));
    }

    fn before_select(&self, ids: &[Identifier]) {
        self.push(format!("before_select:{}", ids.len()));
    }

    fn after_select(&self, entities: &[C]) {
        self.push(format!("after_select:{}", entities.len()));
    }

    fn before_persist(&self, entities: &[&C]) {
        self.push(format!("before_persist:{}", entities.len()));
    }

    fn after_persist(&self, entities: &[&C]) {
        self.push(format!("after_persist:{}", entities.len()));
    }

    fn on_error(&self, operation: PersistOperation, _error: &DbError) {
        self.push(format!("error:{}", operation));
    }
}

// ----------------------------------------------------------------------------
// Polymorphic fixtures
//
// vehicle (joined):   vehicle(id, wheels, version) + car(id, seats)
//                                                  + truck(id, payload, trailer_id)
// trailer (single):   trailer(id, kind, length, capacity)
// garage:             garage(id, name, vehicle_id) -> vehicle
// shape (per class):  circle(id, radius), square(id, side)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Trailer {
    Flatbed { id: i64, length: i64 },
    Tanker { id: i64, capacity: i64 },
}

impl Trailer {
    pub fn id(&self) -> i64 {
        match self {
            Trailer::Flatbed { id, .. } | Trailer::Tanker { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub id: i64,
    pub wheels: i64,
    pub seats: i64,
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Truck {
    pub id: i64,
    pub wheels: i64,
    pub payload: i64,
    pub trailer_id: Option<i64>,
    pub trailer: Option<Trailer>,
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Vehicle {
    Car(Car),
    Truck(Truck),
}

impl Vehicle {
    pub fn id(&self) -> i64 {
        match self {
            Vehicle::Car(car) => car.id,
            Vehicle::Truck(truck) => truck.id,
        }
    }

    pub fn wheels(&self) -> i64 {
        match self {
            Vehicle::Car(car) => car.wheels,
            Vehicle::Truck(truck) => truck.wheels,
        }
    }

    pub fn version(&self) -> &VersionToken {
        match self {
            Vehicle::Car(car) => &car.version,
            Vehicle::Truck(truck) => &truck.version,
        }
    }
}

pub fn car(id: i64, seats: i64) -> Vehicle {
    Vehicle::Car(Car {
        id,
        wheels: 4,
        seats,
        version: VersionToken::default(),
    })
}

pub fn truck(id: i64, payload: i64, trailer_id: Option<i64>) -> Vehicle {
    Vehicle::Truck(Truck {
        id,
        wheels: 6,
        payload,
        trailer_id,
        trailer: None,
        version: VersionToken::default(),
    })
}

fn trailer_id_column() -> Column {
    Column::new("id", DataType::Integer)
}

pub fn trailer_persister(
    provider: Arc<dyn ConnectionProvider>,
) -> anyhow::Result<Arc<PolymorphicPersister<Trailer>>> {
    let config = PersisterConfig::default();
    let flatbed = EntityMapping::new(
        "trailer",
        SimpleIdentifier::new(trailer_id_column(), |t: &Trailer| t.id().into()),
        |row| {
            Ok(Trailer::Flatbed {
                id: row.integer("id")?,
                length: row.integer("length")?,
            })
        },
    )
    .with_property(PropertyMapping::new(
        Column::new("length", DataType::Integer).not_null(),
        |t: &Trailer| match t {
            Trailer::Flatbed { length, .. } => (*length).into(),
            Trailer::Tanker { .. } => Value::Null,
        },
    ))
    .with_discriminator("kind", "flatbed");

    let tanker = EntityMapping::new(
        "trailer",
        SimpleIdentifier::new(trailer_id_column(), |t: &Trailer| t.id().into()),
        |row| {
            Ok(Trailer::Tanker {
                id: row.integer("id")?,
                capacity: row.integer("capacity")?,
            })
        },
    )
    .with_property(PropertyMapping::new(
        Column::new("capacity", DataType::Integer).not_null(),
        |t: &Trailer| match t {
            Trailer::Tanker { capacity, .. } => (*capacity).into(),
            Trailer::Flatbed { .. } => Value::Null,
        },
    ))
    .with_discriminator("kind", "tanker");

    let layout = SingleTablePersister::new(
        "trailer",
        "kind",
        vec![
            Subtype::new(
                "flatbed",
                |t: &Trailer| matches!(t, Trailer::Flatbed { .. }),
                SimplePersister::new(flatbed, provider.clone(), config.clone())?,
            ),
            Subtype::new(
                "tanker",
                |t: &Trailer| matches!(t, Trailer::Tanker { .. }),
                SimplePersister::new(tanker, provider.clone(), config.clone())?,
            ),
        ],
        provider,
        config,
    )?;
    Ok(Arc::new(layout.into()))
}

fn vehicle_id() -> SimpleIdentifier<Vehicle> {
    SimpleIdentifier::new(Column::new("id", DataType::Integer), |v: &Vehicle| {
        v.id().into()
    })
}

/// Joined vehicle hierarchy; trucks load their trailer through `trailers`.
pub fn vehicle_persister(
    provider: Arc<dyn ConnectionProvider>,
    versioned: bool,
    trailers: Arc<PolymorphicPersister<Trailer>>,
) -> anyhow::Result<Arc<PolymorphicPersister<Vehicle>>> {
    let config = PersisterConfig::default();

    let mut root = EntityMapping::abstract_root("vehicle", vehicle_id()).with_property(
        PropertyMapping::new(Column::new("wheels", DataType::Integer).not_null(), |v: &Vehicle| {
            v.wheels().into()
        }),
    );
    if versioned {
        root = root.with_version(VersionMapping::counter("version", |v: &Vehicle| v.version()));
    }

    let car = EntityMapping::new("car", vehicle_id(), move |row| {
        Ok(Vehicle::Car(Car {
            id: row.integer("id")?,
            wheels: row.integer("wheels")?,
            seats: row.integer("seats")?,
            version: if versioned {
                row.version("version")?
            } else {
                VersionToken::default()
            },
        }))
    })
    .with_property(PropertyMapping::new(
        Column::new("seats", DataType::Integer).not_null(),
        |v: &Vehicle| match v {
            Vehicle::Car(car) => car.seats.into(),
            Vehicle::Truck(_) => Value::Null,
        },
    ))
    .with_parent("vehicle", &parent_columns(versioned));

    let truck = EntityMapping::new("truck", vehicle_id(), move |row| {
        Ok(Vehicle::Truck(Truck {
            id: row.integer("id")?,
            wheels: row.integer("wheels")?,
            payload: row.integer("payload")?,
            trailer_id: row.optional_integer("trailer_id")?,
            trailer: None,
            version: if versioned {
                row.version("version")?
            } else {
                VersionToken::default()
            },
        }))
    })
    .with_property(PropertyMapping::new(
        Column::new("payload", DataType::Integer).not_null(),
        |v: &Vehicle| match v {
            Vehicle::Truck(truck) => truck.payload.into(),
            Vehicle::Car(_) => Value::Null,
        },
    ))
    .with_property(PropertyMapping::new(
        Column::new("trailer_id", DataType::Integer),
        |v: &Vehicle| match v {
            Vehicle::Truck(truck) => truck.trailer_id.into(),
            Vehicle::Car(_) => Value::Null,
        },
    ))
    .with_parent("vehicle", &parent_columns(versioned));

    let trailer_relation = PolymorphicRelation::new(
        "trailer",
        &["trailer_id"],
        trailers,
        |v: &mut Vehicle, trailer: Trailer| {
            if let Vehicle::Truck(truck) = v {
                truck.trailer = Some(trailer);
            }
        },
    );

    let layout = JoinedTablesPersister::new(
        SimplePersister::new(root, provider.clone(), config.clone())?,
        vec![
            Subtype::new(
                "car",
                |v: &Vehicle| matches!(v, Vehicle::Car(_)),
                SimplePersister::new(car, provider.clone(), config.clone())?,
            ),
            Subtype::new(
                "truck",
                |v: &Vehicle| matches!(v, Vehicle::Truck(_)),
                SimplePersister::new(truck, provider.clone(), config.clone())?
                    .with_relation(Arc::new(trailer_relation)),
            ),
        ],
        provider,
        config,
    )?;
    Ok(Arc::new(layout.into()))
}

fn parent_columns(versioned: bool) -> Vec<&'static str> {
    if versioned {
        vec!["wheels", "version"]
    } else {
        vec!["wheels"]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Garage {
    pub id: i64,
    pub name: String,
    pub vehicle_id: Option<i64>,
    pub vehicle: Option<Vehicle>,
}

pub fn garage(id: i64, name: &str, vehicle_id: Option<i64>) -> Garage {
    Garage {
        id,
        name: name.to_string(),
        vehicle_id,
        vehicle: None,
    }
}

pub fn garage_persister(
    provider: Arc<dyn ConnectionProvider>,
    vehicles: Arc<PolymorphicPersister<Vehicle>>,
) -> anyhow::Result<SimplePersister<Garage>> {
    let mapping = EntityMapping::new(
        "garage",
        SimpleIdentifier::new(Column::new("id", DataType::Integer), |g: &Garage| {
            g.id.into()
        }),
        |row| {
            Ok(Garage {
                id: row.integer("id")?,
                name: row.text("name")?,
                vehicle_id: row.optional_integer("vehicle_id")?,
                vehicle: None,
            })
        },
    )
    .with_property(PropertyMapping::new(
        Column::new("name", DataType::Text).not_null(),
        |g: &Garage| g.name.clone().into(),
    ))
    .with_property(PropertyMapping::new(
        Column::new("vehicle_id", DataType::Integer),
        |g: &Garage| g.vehicle_id.into(),
    ));

    let relation = PolymorphicRelation::new(
        "vehicle",
        &["vehicle_id"],
        vehicles,
        |g: &mut Garage, vehicle: Vehicle| g.vehicle = Some(vehicle),
    );
    Ok(SimplePersister::new(mapping, provider, PersisterConfig::default())?
        .with_relation(Arc::new(relation)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { id: i64, radius: i64 },
    Square { id: i64, side: i64 },
    /// Claimed by no subtype.
    Triangle { id: i64 },
}

impl Shape {
    pub fn id(&self) -> i64 {
        match self {
            Shape::Circle { id, .. } | Shape::Square { id, .. } | Shape::Triangle { id } => *id,
        }
    }
}

pub fn shape_persister(provider: Arc<dyn ConnectionProvider>) -> anyhow::Result<PolymorphicPersister<Shape>> {
    let config = PersisterConfig::default();
    let shape_id = || {
        SimpleIdentifier::new(Column::new("id", DataType::Integer), |s: &Shape| {
            s.id().into()
        })
    };

    let circle = EntityMapping::new("circle", shape_id(), |row| {
        Ok(Shape::Circle {
            id: row.integer("id")?,
            radius: row.integer("radius")?,
        })
    })
    .with_property(PropertyMapping::new(
        Column::new("radius", DataType::Integer),
        |s: &Shape| match s {
            Shape::Circle { radius, .. } => (*radius).into(),
            _ => Value::Null,
        },
    ));

    let square = EntityMapping::new("square", shape_id(), |row| {
        Ok(Shape::Square {
            id: row.integer("id")?,
            side: row.integer("side")?,
        })
    })
    .with_property(PropertyMapping::new(
        Column::new("side", DataType::Integer),
        |s: &Shape| match s {
            Shape::Square { side, .. } => (*side).into(),
            _ => Value::Null,
        },
    ));

    let layout = TablePerClassPersister::new(
        "shape",
        vec![
            Subtype::new(
                "circle",
                |s: &Shape| matches!(s, Shape::Circle { .. }),
                SimplePersister::new(circle, provider.clone(), config.clone())?,
            ),
            Subtype::new(
                "square",
                |s: &Shape| matches!(s, Shape::Square { .. }),
                SimplePersister::new(square, provider, config)?,
            ),
        ],
    )?;
    Ok(layout.into())
}
