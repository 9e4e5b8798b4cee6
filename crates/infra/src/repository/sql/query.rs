//! SQL statement building.
//!
//! Identifiers are always quoted and values always bound, so table and column
//! names coming from schemas never need escaping by callers.

use super::value::SqlValue;

/// SQL text with its bound parameters in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote(alias), quote(column))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Escape LIKE wildcards so `text` matches literally (with `ESCAPE '\'`).
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// `SELECT` builder over one base table and any number of joins.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    columns: Vec<String>,
    from: String,
    joins: Vec<String>,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order_by: Vec<String>,
    limit: Option<u64>,
}

impl SelectQuery {
    /// Select from `table`, referenced by its own name.
    pub fn from(table: &str) -> Self {
        Self {
            columns: Vec::new(),
            from: quote(table),
            joins: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Select `alias.column`, labelled `label` when given.
    pub fn column(&mut self, alias: &str, column: &str, label: Option<&str>) -> &mut Self {
        let mut expr = qualified(alias, column);
        if let Some(label) = label {
            expr.push_str(" AS ");
            expr.push_str(&quote(label));
        }
        self.columns.push(expr);
        self
    }

    /// Select `MAX(alias.column)`.
    pub fn max(&mut self, alias: &str, column: &str) -> &mut Self {
        self.columns.push(format!("MAX({})", qualified(alias, column)));
        self
    }

    /// Join `table AS alias ON alias.column = other_alias.other_column`.
    pub fn join(
        &mut self,
        kind: JoinKind,
        table: &str,
        alias: &str,
        column: &str,
        other: (&str, &str),
    ) -> &mut Self {
        let keyword = match kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
        };
        self.joins.push(format!(
            "{keyword} {} AS {} ON {} = {}",
            quote(table),
            quote(alias),
            qualified(alias, column),
            qualified(other.0, other.1)
        ));
        self
    }

    /// `alias.column = value`, or `IS NULL` for null.
    pub fn filter_eq(&mut self, alias: &str, column: &str, value: SqlValue) -> &mut Self {
        if value == SqlValue::Null {
            self.conditions
                .push(format!("{} IS NULL", qualified(alias, column)));
        } else {
            self.conditions.push(format!("{} = ?", qualified(alias, column)));
            self.params.push(value);
        }
        self
    }

    /// `alias.column` contains `text`, case sensitively when the connection
    /// has `case_sensitive_like` on.
    pub fn filter_contains(&mut self, alias: &str, column: &str, text: &str) -> &mut Self {
        self.conditions
            .push(format!("{} LIKE ? ESCAPE '\\'", qualified(alias, column)));
        self.params
            .push(SqlValue::Text(format!("%{}%", escape_like(text))));
        self
    }

    /// `alias.column NOT IN (SELECT other_column FROM other_table)`.
    pub fn filter_not_in(
        &mut self,
        alias: &str,
        column: &str,
        other_table: &str,
        other_column: &str,
    ) -> &mut Self {
        self.conditions.push(format!(
            "{} NOT IN (SELECT {} FROM {})",
            qualified(alias, column),
            quote(other_column),
            quote(other_table)
        ));
        self
    }

    pub fn order_by(&mut self, alias: &str, column: &str) -> &mut Self {
        self.order_by.push(qualified(alias, column));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> Statement {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {}", self.from);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        Statement {
            sql,
            params: self.params.clone(),
        }
    }
}

/// Insert a row, or update every given column when `key` already exists.
pub fn upsert(table: &str, row: Vec<(String, SqlValue)>, key: &str) -> Statement {
    let columns: Vec<String> = row.iter().map(|(column, _)| quote(column)).collect();
    let updates: Vec<String> = row
        .iter()
        .filter(|(column, _)| column != key)
        .map(|(column, _)| format!("{} = excluded.{}", quote(column), quote(column)))
        .collect();

    let on_conflict = if updates.is_empty() {
        format!("ON CONFLICT ({}) DO NOTHING", quote(key))
    } else {
        format!("ON CONFLICT ({}) DO UPDATE SET {}", quote(key), updates.join(", "))
    };

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) {on_conflict}",
            quote(table),
            columns.join(", "),
            placeholders(row.len())
        ),
        params: row.into_iter().map(|(_, value)| value).collect(),
    }
}

/// Insert rows, skipping the ones that violate a uniqueness constraint.
pub fn insert_ignore(table: &str, columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Statement {
    let row_sql = format!("({})", placeholders(columns.len()));
    let values = vec![row_sql; rows.len()].join(", ");
    let columns: Vec<String> = columns.iter().map(|column| quote(column)).collect();

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {values} ON CONFLICT DO NOTHING",
            quote(table),
            columns.join(", ")
        ),
        params: rows.into_iter().flatten().collect(),
    }
}

/// `DELETE FROM table WHERE column = value`.
pub fn delete_where(table: &str, column: &str, value: SqlValue) -> Statement {
    Statement {
        sql: format!("DELETE FROM {} WHERE {} = ?", quote(table), quote(column)),
        params: vec![value],
    }
}

/// `DELETE FROM table WHERE column = value AND in_column IN (values)`.
pub fn delete_in(
    table: &str,
    column: &str,
    value: SqlValue,
    in_column: &str,
    values: Vec<SqlValue>,
) -> Statement {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} IN ({})",
        quote(table),
        quote(column),
        quote(in_column),
        placeholders(values.len())
    );
    let mut params = vec![value];
    params.extend(values);
    Statement { sql, params }
}

/// `UPDATE table SET column = NULL WHERE column = value`.
pub fn clear_reference(table: &str, column: &str, value: SqlValue) -> Statement {
    Statement {
        sql: format!(
            "UPDATE {} SET {} = NULL WHERE {} = ?",
            quote(table),
            quote(column),
            quote(column)
        ),
        params: vec![value],
    }
}
