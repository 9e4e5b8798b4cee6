//! Id assignment for entities added without an id.
//!
//! Entities added with a negative integer id get the next free id of their
//! type. The next free id starts one past the largest committed id (or at 0 on
//! an empty table) and keeps counting across staged adds until the next
//! commit.
//!
//! Types linked by extensions share their ids, so the whole family draws from
//! one counter kept under the type at the root of the chain.

use std::collections::{HashMap, HashSet};

use repograph_core::{EntityId, EntitySchema, FieldKind, ID_FIELD, Link, Mapper, Record};
use serde_json::Value;

use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Default)]
pub struct IdAllocator {
    next: HashMap<String, i64>,
    seeded: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_seeded(&self, schema: &EntitySchema) -> bool {
        self.seeded.contains(schema.class_name())
    }

    /// Start counting after the largest committed id of `schema`.
    pub fn seed(&mut self, schema: &EntitySchema, committed_max: Option<EntityId>) {
        let floor = committed_max
            .and_then(|id| id.as_int())
            .map_or(0, |max| max.saturating_add(1));
        let next = self.next.entry(schema.class_name().to_owned()).or_insert(0);
        *next = (*next).max(floor);
        self.seeded.insert(schema.class_name().to_owned());
    }

    /// Give `record` an id if it carries the unassigned sentinel.
    ///
    /// Records that already have an id only move the counter forward.
    pub fn assign(&mut self, schema: &EntitySchema, record: &mut Record) -> RepositoryResult<EntityId> {
        self.assign_from(schema, schema, record)
    }

    /// [`assign`](Self::assign) drawing from the counter of `counter`.
    fn assign_from(
        &mut self,
        counter: &EntitySchema,
        schema: &EntitySchema,
        record: &mut Record,
    ) -> RepositoryResult<EntityId> {
        let id = schema.id_of(record)?;
        let next = self.next.entry(counter.class_name().to_owned()).or_insert(0);

        if !id.is_unassigned() {
            if let Some(value) = id.as_int() {
                *next = (*next).max(value.saturating_add(1));
            }
            return Ok(id);
        }

        let kind = schema.id_field().map(|field| field.kind);
        if !matches!(kind, Some(FieldKind::Integer | FieldKind::Identifier)) {
            return Err(RepositoryError::AutoIncrement(format!(
                "{} ids are not integers, can't assign one automatically",
                schema.type_name()
            )));
        }

        let assigned = EntityId::Int(*next);
        *next += 1;
        record.insert(ID_FIELD.to_owned(), assigned.to_value());
        Ok(assigned)
    }

    /// Assign ids to `record` and to every entity nested in it through the
    /// mapper's compositions.
    ///
    /// `committed_max` looks up the largest committed id of a type; it is only
    /// called the first time a type family needs a new id.
    pub fn assign_graph<F>(
        &mut self,
        mapper: &Mapper,
        schema: &EntitySchema,
        record: &mut Record,
        committed_max: &mut F,
    ) -> RepositoryResult<()>
    where
        F: FnMut(&EntitySchema) -> RepositoryResult<Option<EntityId>>,
    {
        for rel in mapper.outgoing(schema) {
            match rel.link() {
                Link::Extension => {}
                Link::SingleComposition(keys) => {
                    if let Some(Value::Object(nested)) = record.get_mut(&keys.source_attribute) {
                        self.assign_graph(mapper, rel.destination(), nested, committed_max)?;
                    }
                }
                Link::MultipleComposition(keys) => {
                    if let Some(Value::Array(items)) = record.get_mut(&keys.source_attribute) {
                        for item in items.iter_mut() {
                            if let Value::Object(nested) = item {
                                self.assign_graph(mapper, rel.destination(), nested, committed_max)?;
                            }
                        }
                    }
                }
            }
        }

        let root = extension_root(mapper, schema);
        if schema.id_of(record)?.is_unassigned() && !self.is_seeded(root) {
            let mut max = None;
            for member in extension_family(mapper, root) {
                max = larger(max, committed_max(member)?);
            }
            self.seed(root, max);
        }

        self.assign_from(root, schema, record)?;
        Ok(())
    }

    /// Forget the counters; the next assignment re-reads committed state.
    pub fn reset(&mut self) {
        self.next.clear();
        self.seeded.clear();
    }
}

/// Type at the top of the extension chain `schema` belongs to.
fn extension_root<'a>(mapper: &'a Mapper, schema: &'a EntitySchema) -> &'a EntitySchema {
    let mut root = schema;
    let mut seen = HashSet::from([schema.class_name()]);
    while let Some(rel) = mapper.extends(root) {
        if !seen.insert(rel.destination().class_name()) {
            break;
        }
        root = rel.destination();
    }
    root
}

/// `root` and every type extending it, directly or not.
fn extension_family<'a>(mapper: &'a Mapper, root: &'a EntitySchema) -> Vec<&'a EntitySchema> {
    let mut family = vec![root];
    let mut seen = HashSet::from([root.class_name()]);
    let mut index = 0;
    while index < family.len() {
        for rel in mapper.extended_by(family[index]) {
            if seen.insert(rel.source().class_name()) {
                family.push(rel.source());
            }
        }
        index += 1;
    }
    family
}

fn larger(a: Option<EntityId>, b: Option<EntityId>) -> Option<EntityId> {
    match (a, b) {
        (Some(EntityId::Int(a)), Some(EntityId::Int(b))) => Some(EntityId::Int(a.max(b))),
        (Some(a @ EntityId::Int(_)), _) => Some(a),
        (_, b @ Some(EntityId::Int(_))) => b,
        (a, _) => a,
    }
}
