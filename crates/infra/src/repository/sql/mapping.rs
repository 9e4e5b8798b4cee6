//! Mapping entity graphs onto tables and back.
//!
//! Writes split a record along the mapper's relationships: extension
//! attributes go to the extended type's table, composed entities to their own
//! tables (referenced through a foreign key or a join table). Reads join the
//! same tables back together, labelling every selected column
//! `<alias>.<column>` where the alias is the table name unless one table is
//! joined twice.

use std::collections::HashSet;

use repograph_core::{EntityId, EntitySchema, ID_FIELD, Link, Mapper, ModelError, Record, Relationship};
use serde_json::Value;

use super::Session;
use super::query::{self, JoinKind, SelectQuery, Statement};
use super::value::{RowValues, SqlValue, coerce};
use crate::error::{RepositoryError, RepositoryResult};
use crate::repository::{MatchMode, SearchFilter};

/// Columns stored in the table of `schema`.
///
/// Attributes holding entities are never columns; extension attributes live
/// in the extended type's table; single compositions add their foreign key.
pub fn table_columns(mapper: &Mapper, schema: &EntitySchema) -> Vec<String> {
    let extended = mapper.extends(schema).map(|rel| rel.destination());

    let mut columns: Vec<String> = schema
        .fields()
        .iter()
        .filter(|field| !field.kind.is_relation())
        .filter(|field| {
            field.name == ID_FIELD || !extended.is_some_and(|destination| destination.has_field(field.name))
        })
        .map(|field| field.name.to_owned())
        .collect();

    for rel in mapper.outgoing(schema) {
        if let Link::SingleComposition(keys) = rel.link() {
            if !columns.contains(&keys.source_id) {
                columns.push(keys.source_id.clone());
            }
        }
    }
    columns
}

fn invalid_attribute(schema: &EntitySchema, attribute: &str, expected: &str, got: &Value) -> RepositoryError {
    ModelError::invalid_record(
        schema.type_name(),
        format!("{attribute} must hold {expected}, got {got}"),
    )
    .into()
}

/// Insert or update `record` and the entities nested in it.
pub fn write(
    session: &mut Session<'_>,
    mapper: &Mapper,
    schema: &EntitySchema,
    mut record: Record,
) -> RepositoryResult<()> {
    let id = schema.id_of(&record)?;
    let mut links: Vec<Statement> = Vec::new();

    for rel in mapper.outgoing(schema) {
        let destination = rel.destination();
        match rel.link() {
            Link::Extension => {
                let mut shared = Record::new();
                shared.insert(ID_FIELD.to_owned(), id.to_value());
                for field in destination.fields() {
                    if field.name == ID_FIELD {
                        continue;
                    }
                    if let Some(value) = record.remove(field.name) {
                        shared.insert(field.name.to_owned(), value);
                    }
                }
                write(session, mapper, destination, shared)?;
            }
            Link::SingleComposition(keys) => match record.remove(&keys.source_attribute) {
                None => {}
                Some(Value::Null) => {
                    record.insert(keys.source_id.clone(), Value::Null);
                }
                Some(Value::Object(nested)) => {
                    let key = nested
                        .get(&keys.destination_id)
                        .cloned()
                        .unwrap_or(Value::Null);
                    write(session, mapper, destination, nested)?;
                    record.insert(keys.source_id.clone(), key);
                }
                Some(other) => {
                    return Err(invalid_attribute(
                        schema,
                        &keys.source_attribute,
                        "an entity or null",
                        &other,
                    ));
                }
            },
            Link::MultipleComposition(keys) => {
                let items = match record.remove(&keys.source_attribute) {
                    None => continue,
                    Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(invalid_attribute(
                            schema,
                            &keys.source_attribute,
                            "a list of entities",
                            &other,
                        ));
                    }
                };

                let owner = record.get(&keys.source_id).cloned().unwrap_or(Value::Null);
                let mut stale = linked_keys(session, rel, &owner)?;
                let mut seen: Vec<Value> = Vec::new();
                let mut fresh: Vec<Value> = Vec::new();

                for item in items {
                    let Value::Object(nested) = item else {
                        return Err(invalid_attribute(
                            schema,
                            &keys.source_attribute,
                            "a list of entities",
                            &item,
                        ));
                    };
                    let key = nested
                        .get(&keys.destination_id)
                        .cloned()
                        .unwrap_or(Value::Null);
                    write(session, mapper, destination, nested)?;

                    if seen.contains(&key) {
                        continue;
                    }
                    seen.push(key.clone());
                    match stale.iter().position(|linked| *linked == key) {
                        Some(pos) => {
                            stale.remove(pos);
                        }
                        None => fresh.push(key),
                    }
                }

                let source_column = rel.join_source_column();
                let destination_column = rel.join_destination_column();
                if !fresh.is_empty() {
                    let rows = fresh
                        .iter()
                        .map(|key| vec![SqlValue::from(&owner), SqlValue::from(key)])
                        .collect();
                    links.push(query::insert_ignore(
                        &rel.join_table(),
                        &[&source_column, &destination_column],
                        rows,
                    ));
                }
                if !stale.is_empty() {
                    links.push(query::delete_in(
                        &rel.join_table(),
                        &source_column,
                        SqlValue::from(&owner),
                        &destination_column,
                        stale.iter().map(SqlValue::from).collect(),
                    ));
                }
            }
        }
    }

    let row: Vec<(String, SqlValue)> = table_columns(mapper, schema)
        .into_iter()
        .filter_map(|column| {
            let value = record.get(&column).map(SqlValue::from)?;
            Some((column, value))
        })
        .collect();
    session.execute(&query::upsert(schema.class_name(), row, ID_FIELD))?;

    for statement in &links {
        session.execute(statement)?;
    }
    Ok(())
}

/// Destination keys linked to `owner` through a multiple composition.
fn linked_keys(session: &mut Session<'_>, rel: &Relationship, owner: &Value) -> RepositoryResult<Vec<Value>> {
    let table = rel.join_table();
    let mut select = SelectQuery::from(&table);
    select
        .column(&table, &rel.join_destination_column(), None)
        .filter_eq(&table, &rel.join_source_column(), SqlValue::from(owner));

    Ok(session
        .fetch(&select.build())?
        .into_iter()
        .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
        .collect())
}

/// Delete the row of `schema` with `id`, its links, and the extended row.
pub fn remove(
    session: &mut Session<'_>,
    mapper: &Mapper,
    schema: &EntitySchema,
    id: &EntityId,
) -> RepositoryResult<()> {
    for rel in mapper.get_relationships(schema) {
        match rel.link() {
            Link::Extension => {}
            Link::SingleComposition(keys) => {
                if rel.is_destination(schema) {
                    let key = column_value(session, schema, &keys.destination_id, id)?;
                    session.execute(&query::clear_reference(
                        rel.source().class_name(),
                        &keys.source_id,
                        SqlValue::from(&key),
                    ))?;
                }
            }
            Link::MultipleComposition(keys) => {
                if rel.is_source(schema) {
                    let key = column_value(session, schema, &keys.source_id, id)?;
                    session.execute(&query::delete_where(
                        &rel.join_table(),
                        &rel.join_source_column(),
                        SqlValue::from(&key),
                    ))?;
                }
                if rel.is_destination(schema) {
                    let key = column_value(session, schema, &keys.destination_id, id)?;
                    session.execute(&query::delete_where(
                        &rel.join_table(),
                        &rel.join_destination_column(),
                        SqlValue::from(&key),
                    ))?;
                }
            }
        }
    }

    session.execute(&query::delete_where(
        schema.class_name(),
        ID_FIELD,
        SqlValue::from(id),
    ))?;

    if let Some(extension) = mapper.extends(schema) {
        remove(session, mapper, extension.destination(), id)?;
    }
    Ok(())
}

/// Value of `column` in the row of `schema` with `id`.
fn column_value(
    session: &mut Session<'_>,
    schema: &EntitySchema,
    column: &str,
    id: &EntityId,
) -> RepositoryResult<Value> {
    if column == ID_FIELD {
        return Ok(id.to_value());
    }

    let table = schema.class_name();
    let mut select = SelectQuery::from(table);
    select
        .column(table, column, None)
        .filter_eq(table, ID_FIELD, SqlValue::from(id));

    Ok(session
        .fetch(&select.build())?
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .map_or(Value::Null, |(_, value)| value))
}

/// A relationship joined into a lookup, with the alias its columns carry.
struct Joined<'m> {
    rel: &'m Relationship,
    alias: String,
}

/// Query fetching one entity of `schema` with everything it composes.
fn lookup<'m>(mapper: &'m Mapper, schema: &EntitySchema, id: &EntityId) -> (Statement, Vec<Joined<'m>>) {
    let base = schema.class_name();
    let mut select = SelectQuery::from(base);
    for column in table_columns(mapper, schema) {
        select.column(base, &column, Some(&format!("{base}.{column}")));
    }

    let mut aliases: HashSet<String> = HashSet::from([base.to_owned()]);
    let mut list_orderings: Vec<(String, String)> = Vec::new();
    let mut joined = Vec::new();

    for rel in mapper.outgoing(schema) {
        let destination = rel.destination();
        let mut alias = destination.class_name().to_owned();
        if !aliases.insert(alias.clone()) {
            alias = format!("{alias}@{}", joined.len());
            aliases.insert(alias.clone());
        }

        match rel.link() {
            Link::Extension => {
                select.join(
                    JoinKind::Inner,
                    destination.class_name(),
                    &alias,
                    ID_FIELD,
                    (base, ID_FIELD),
                );
            }
            Link::SingleComposition(keys) => {
                select.join(
                    JoinKind::Left,
                    destination.class_name(),
                    &alias,
                    &keys.destination_id,
                    (base, &keys.source_id),
                );
            }
            Link::MultipleComposition(keys) => {
                let link_alias = format!("{alias}#link");
                select
                    .join(
                        JoinKind::Left,
                        &rel.join_table(),
                        &link_alias,
                        &rel.join_source_column(),
                        (base, &keys.source_id),
                    )
                    .join(
                        JoinKind::Left,
                        destination.class_name(),
                        &alias,
                        &keys.destination_id,
                        (&link_alias, &rel.join_destination_column()),
                    );
                list_orderings.push((alias.clone(), keys.destination_id.clone()));
            }
        }

        for column in table_columns(mapper, destination) {
            select.column(&alias, &column, Some(&format!("{alias}.{column}")));
        }
        joined.push(Joined { rel, alias });
    }

    select.filter_eq(base, ID_FIELD, SqlValue::from(id));
    select.order_by(base, ID_FIELD);
    for (alias, column) in &list_orderings {
        select.order_by(alias, column);
    }

    (select.build(), joined)
}

/// Attributes of `schema` found under `alias` in `row`.
fn columns_of(row: &RowValues, alias: &str, schema: &EntitySchema) -> Record {
    let prefix = format!("{alias}.");
    row.iter()
        .filter_map(|(label, value)| {
            let column = label.strip_prefix(&prefix)?;
            let value = match schema.field(column) {
                Some(field) => coerce(field.kind, value.clone()),
                None => value.clone(),
            };
            Some((column.to_owned(), value))
        })
        .collect()
}

/// Nested entity found under `alias`, or `None` when the join matched no row.
fn nested_entity(row: &RowValues, alias: &str, schema: &EntitySchema, key: &str) -> Option<Record> {
    let mut nested = columns_of(row, alias, schema);
    if nested.get(key).is_none_or(Value::is_null) {
        return None;
    }
    nested.retain(|column, _| schema.has_field(column));
    schema.fill_defaults(&mut nested);
    Some(nested)
}

fn assemble(schema: &EntitySchema, joined: &[Joined<'_>], rows: &[RowValues]) -> Record {
    let Some(first) = rows.first() else {
        return Record::new();
    };
    let mut record = columns_of(first, schema.class_name(), schema);

    for Joined { rel, alias } in joined {
        let destination = rel.destination();
        match rel.link() {
            Link::Extension => {
                for (column, value) in columns_of(first, alias, destination) {
                    if destination.has_field(&column) {
                        record.insert(column, value);
                    }
                }
            }
            Link::SingleComposition(keys) => {
                let reference = if schema.has_field(&keys.source_id) {
                    record.get(&keys.source_id).cloned()
                } else {
                    record.remove(&keys.source_id)
                };
                let nested = match reference {
                    Some(reference) if !reference.is_null() => {
                        nested_entity(first, alias, destination, &keys.destination_id)
                    }
                    _ => None,
                };
                record.insert(
                    keys.source_attribute.clone(),
                    nested.map_or(Value::Null, Value::Object),
                );
            }
            Link::MultipleComposition(keys) => {
                let mut seen: Vec<Value> = Vec::new();
                let mut items = Vec::new();
                for row in rows {
                    let Some(nested) = nested_entity(row, alias, destination, &keys.destination_id) else {
                        continue;
                    };
                    let key = nested.get(&keys.destination_id).cloned().unwrap_or(Value::Null);
                    if seen.contains(&key) {
                        continue;
                    }
                    seen.push(key);
                    items.push(Value::Object(nested));
                }
                record.insert(keys.source_attribute.clone(), Value::Array(items));
            }
        }
    }

    schema.fill_defaults(&mut record);
    record
}

/// Whether a row of `schema` with `id` exists.
fn exists(session: &mut Session<'_>, schema: &EntitySchema, id: &EntityId) -> RepositoryResult<bool> {
    let table = schema.class_name();
    let mut select = SelectQuery::from(table);
    select
        .column(table, ID_FIELD, None)
        .filter_eq(table, ID_FIELD, SqlValue::from(id))
        .limit(1);
    Ok(!session.fetch(&select.build())?.is_empty())
}

/// Fetch and reassemble one entity.
pub fn get(
    session: &mut Session<'_>,
    mapper: &Mapper,
    schema: &EntitySchema,
    id: &EntityId,
) -> RepositoryResult<Record> {
    for rel in mapper.extended_by(schema) {
        if exists(session, rel.source(), id)? {
            return Err(RepositoryError::extended_elsewhere(schema, rel.source(), id));
        }
    }

    let (statement, joined) = lookup(mapper, schema, id);
    let rows = session.fetch(&statement)?;
    if rows.is_empty() {
        return Err(RepositoryError::missing_id(schema, id));
    }
    Ok(assemble(schema, &joined, &rows))
}

/// Ids of the stored entities of `schema` (matching `filter` when given),
/// leaving out the ones that belong to extending types.
pub fn ids(
    session: &mut Session<'_>,
    mapper: &Mapper,
    schema: &EntitySchema,
    filter: Option<&SearchFilter>,
) -> RepositoryResult<Vec<EntityId>> {
    let statement = id_query(mapper, schema, filter)?;
    Ok(session
        .fetch(&statement)?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|(_, value)| EntityId::from_value(&value))
        .collect())
}

fn id_query(mapper: &Mapper, schema: &EntitySchema, filter: Option<&SearchFilter>) -> RepositoryResult<Statement> {
    let table = schema.class_name();
    let mut select = SelectQuery::from(table);
    select.column(table, ID_FIELD, None);

    for rel in mapper.extended_by(schema) {
        select.filter_not_in(table, ID_FIELD, rel.source().class_name(), ID_FIELD);
    }

    if let Some(filter) = filter {
        // Inherited attributes are filtered on the extended tables.
        let mut searchable = vec![(table.to_owned(), table_columns(mapper, schema))];
        let mut current = schema;
        let mut seen = HashSet::from([table.to_owned()]);
        while let Some(rel) = mapper.extends(current) {
            let destination = rel.destination();
            let alias = destination.class_name().to_owned();
            if !seen.insert(alias.clone()) {
                break;
            }
            select.join(JoinKind::Inner, &alias, &alias, ID_FIELD, (table, ID_FIELD));
            searchable.push((alias, table_columns(mapper, destination)));
            current = destination;
        }

        for criterion in filter.criteria() {
            let Some((alias, _)) = searchable
                .iter()
                .find(|(_, columns)| columns.contains(&criterion.field))
            else {
                return Err(RepositoryError::unknown_field(schema, &criterion.field));
            };
            match (&criterion.mode, &criterion.value) {
                (MatchMode::Contains, Value::String(text)) => {
                    select.filter_contains(alias, &criterion.field, text);
                }
                (_, value) => {
                    select.filter_eq(alias, &criterion.field, SqlValue::from(value));
                }
            }
        }
    }

    select.order_by(table, ID_FIELD);
    Ok(select.build())
}

/// Largest stored id of `schema`.
pub fn max_id(session: &mut Session<'_>, schema: &EntitySchema) -> RepositoryResult<Option<EntityId>> {
    let table = schema.class_name();
    let mut select = SelectQuery::from(table);
    select.max(table, ID_FIELD);

    Ok(session
        .fetch(&select.build())?
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .and_then(|(_, value)| EntityId::from_value(&value)))
}
