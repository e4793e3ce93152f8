//! Statement resolution.
//!
//! A [`Resolver`] maps a logical statement to the statement that should run
//! against the shard table, plus the statement for the logical table used by
//! dual-write. [`SqlResolver`] is the stock implementation: it parses the
//! statement with [sqlparser](https://docs.rs/sqlparser/), pulls the sharding
//! key value out of `INSERT` rows, `key = value` conditions or `key IN (..)`
//! lists of the table's own query, asks a
//! [`ShardAlgorithm`] for the shard suffix and renames the table.
//!
//! Choosing the shard is always left to the caller's algorithm.

use crate::config::ShardingConfig;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Insert, ObjectName, ObjectNamePart, Query, SetExpr, Statement,
    TableFactor, UnaryOperator, Value, Visit, Visitor, visit_expressions, visit_expressions_mut,
    visit_relations, visit_relations_mut,
};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::trace;

/// Outcome of resolving one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Statement for the logical table, run first when dual-write is on.
    pub dual_write_sql: String,
    /// Statement to execute.
    pub sql: String,
    /// Logical table the statement was routed for. `None` when not sharded.
    pub table: Option<String>,
}

impl Resolution {
    pub fn unsharded(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            dual_write_sql: sql.clone(),
            sql,
            table: None,
        }
    }

    pub fn is_sharded(&self) -> bool {
        self.table.is_some()
    }
}

/// Rewrites logical statements into shard statements.
///
/// Must be deterministic for identical statement, parameters and configuration.
pub trait Resolver: Send + Sync {
    fn resolve(&self, sql: &str, params: &[QueryParam]) -> DbResult<Resolution>;

    /// SQL dialect the resolver parses with, if it is tied to one backend.
    fn db_type(&self) -> Option<DatabaseType> {
        None
    }
}

impl<F> Resolver for F
where
    F: Fn(&str, &[QueryParam]) -> DbResult<Resolution> + Send + Sync,
{
    fn resolve(&self, sql: &str, params: &[QueryParam]) -> DbResult<Resolution> {
        self(sql, params)
    }
}

/// Sharding key value extracted from a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Int(v) => write!(f, "{v}"),
            ShardKey::Text(v) => f.write_str(v),
        }
    }
}

/// Maps a sharding key value to the suffix of its shard table.
pub trait ShardAlgorithm: Send + Sync {
    /// For key 3 and table `orders`, a suffix of `_03` routes to `orders_03`.
    fn shard_suffix(&self, key: &ShardKey) -> DbResult<String>;
}

impl<F> ShardAlgorithm for F
where
    F: Fn(&ShardKey) -> DbResult<String> + Send + Sync,
{
    fn shard_suffix(&self, key: &ShardKey) -> DbResult<String> {
        self(key)
    }
}

#[derive(Clone)]
struct ShardRule {
    sharding_key: String,
    algorithm: Arc<dyn ShardAlgorithm>,
}

/// AST-based resolver over a set of sharded tables.
#[derive(Clone)]
pub struct SqlResolver {
    db_type: DatabaseType,
    rules: BTreeMap<String, ShardRule>,
}

impl SqlResolver {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            rules: BTreeMap::new(),
        }
    }

    /// Resolver for every table in `config`, all routed by `algorithm`.
    pub fn from_config(
        db_type: DatabaseType,
        config: &ShardingConfig,
        algorithm: impl ShardAlgorithm + 'static,
    ) -> Self {
        let algorithm: Arc<dyn ShardAlgorithm> = Arc::new(algorithm);
        let rules = config
            .tables
            .iter()
            .map(|(table, cfg)| {
                let rule = ShardRule {
                    sharding_key: cfg.sharding_key.clone(),
                    algorithm: algorithm.clone(),
                };
                (table.to_ascii_lowercase(), rule)
            })
            .collect();
        Self { db_type, rules }
    }

    /// Add or replace the rule for one table.
    pub fn with_table(
        mut self,
        table: impl AsRef<str>,
        sharding_key: impl Into<String>,
        algorithm: impl ShardAlgorithm + 'static,
    ) -> Self {
        self.rules.insert(
            table.as_ref().to_ascii_lowercase(),
            ShardRule {
                sharding_key: sharding_key.into(),
                algorithm: Arc::new(algorithm),
            },
        );
        self
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    fn mentions_sharded_table(&self, sql: &str) -> bool {
        let lower = sql.to_ascii_lowercase();
        self.rules.keys().any(|table| lower.contains(table.as_str()))
    }

    fn parse(&self, sql: &str) -> DbResult<Statement> {
        let dialect = get_dialect(self.db_type);
        let mut statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| DbError::resolution(format!("Failed to parse SQL statement: {e}")))?;
        if statements.len() != 1 {
            return Err(DbError::resolution(format!(
                "Expected exactly one statement, found {}",
                statements.len()
            )));
        }
        statements
            .pop()
            .ok_or_else(|| DbError::resolution("Empty SQL statement"))
    }

    /// Logical sharded tables referenced by `stmt`.
    fn sharded_tables(&self, stmt: &Statement) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let _ = visit_relations(stmt, |name| {
            if let Some(table) = base_name(name) {
                let table = table.to_ascii_lowercase();
                if self.rules.contains_key(&table) {
                    found.insert(table);
                }
            }
            ControlFlow::<()>::Continue(())
        });
        found
    }

    fn shard_suffix(
        &self,
        table: &str,
        rule: &ShardRule,
        stmt: &Statement,
        params: &[QueryParam],
    ) -> DbResult<String> {
        let keys = match stmt {
            Statement::Insert(insert) => insert_keys(insert, &rule.sharding_key, params)?,
            _ => condition_keys(stmt, table, &rule.sharding_key, params)?,
        };
        if keys.is_empty() {
            return Err(DbError::missing_sharding_key(table, &rule.sharding_key));
        }

        let mut suffixes = Vec::new();
        for key in &keys {
            let suffix = rule.algorithm.shard_suffix(key)?;
            if !suffixes.contains(&suffix) {
                suffixes.push(suffix);
            }
        }

        match suffixes.len() {
            1 => Ok(suffixes.remove(0)),
            _ => Err(DbError::inconsistent_shards(table, suffixes)),
        }
    }
}

impl fmt::Debug for SqlResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlResolver")
            .field("db_type", &self.db_type)
            .field("tables", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resolver for SqlResolver {
    fn resolve(&self, sql: &str, params: &[QueryParam]) -> DbResult<Resolution> {
        if !self.mentions_sharded_table(sql) {
            return Ok(Resolution::unsharded(sql));
        }

        let mut stmt = self.parse(sql)?;
        let tables = self.sharded_tables(&stmt);
        let table = match tables.len() {
            0 => return Ok(Resolution::unsharded(sql)),
            1 => tables.into_iter().next().unwrap_or_default(),
            _ => {
                return Err(DbError::resolution(format!(
                    "Statement references more than one sharded table: {}",
                    tables.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
        };
        let Some(rule) = self.rules.get(&table) else {
            return Ok(Resolution::unsharded(sql));
        };

        let suffix = self.shard_suffix(&table, rule, &stmt, params)?;
        let shard_table = format!("{table}{suffix}");
        rename_table(&mut stmt, &table, &shard_table);

        let resolved = stmt.to_string();
        trace!(table = %table, shard = %shard_table, sql = %resolved, "Statement resolved");
        Ok(Resolution {
            dual_write_sql: sql.to_string(),
            sql: resolved,
            table: Some(table),
        })
    }

    fn db_type(&self) -> Option<DatabaseType> {
        Some(self.db_type)
    }
}

/// Get the appropriate SQL dialect for the given database type.
pub(crate) fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Last identifier of a possibly schema-qualified name.
fn base_name(name: &ObjectName) -> Option<&str> {
    match name.0.last() {
        Some(ObjectNamePart::Identifier(ident)) => Some(ident.value.as_str()),
        _ => None,
    }
}

/// Column name without quoting or qualifiers.
fn bare_column(column: &str) -> String {
    let last = column.rsplit('.').next().unwrap_or(column);
    last.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}

fn count_sequential_placeholders(expr: &Expr) -> usize {
    let mut count = 0;
    let _ = visit_expressions(expr, |e| {
        if is_sequential_placeholder(e) {
            count += 1;
        }
        ControlFlow::<()>::Continue(())
    });
    count
}

fn is_sequential_placeholder(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(v) if matches!(&v.value, Value::Placeholder(p) if p == "?"))
}

/// Sharding key values of every `VALUES` row.
fn insert_keys(insert: &Insert, sharding_key: &str, params: &[QueryParam]) -> DbResult<Vec<ShardKey>> {
    let Some(column) = insert
        .columns
        .iter()
        .position(|c| bare_column(&c.to_string()).eq_ignore_ascii_case(sharding_key))
    else {
        return Ok(Vec::new());
    };
    let Some(SetExpr::Values(values)) = insert.source.as_ref().map(|q| q.body.as_ref()) else {
        return Ok(Vec::new());
    };

    let mut keys = Vec::with_capacity(values.rows.len());
    let mut ordinal = 0;
    for row in &values.rows {
        for (idx, expr) in row.iter().enumerate() {
            if idx == column {
                if let Some(key) = key_from_expr(expr, ordinal, params)? {
                    keys.push(key);
                }
            }
            ordinal += count_sequential_placeholders(expr);
        }
    }
    Ok(keys)
}

/// Query scopes that read `table` directly, in visiting order, and its aliases.
struct TableScopes<'a> {
    table: &'a str,
    open: Vec<usize>,
    owns: Vec<bool>,
    statement_owns: bool,
    aliases: BTreeSet<String>,
}

impl<'a> TableScopes<'a> {
    fn scan(stmt: &Statement, table: &'a str) -> Self {
        let mut scopes = Self {
            table,
            open: Vec::new(),
            owns: Vec::new(),
            statement_owns: false,
            aliases: BTreeSet::new(),
        };
        let _ = stmt.visit(&mut scopes);
        scopes
    }

    fn is_table(&self, name: &ObjectName) -> bool {
        base_name(name).is_some_and(|n| n.eq_ignore_ascii_case(self.table))
    }

    fn is_qualifier(&self, ident: &Ident) -> bool {
        ident.value.eq_ignore_ascii_case(self.table)
            || self.aliases.contains(&ident.value.to_ascii_lowercase())
    }
}

impl Visitor for TableScopes<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
        self.open.push(self.owns.len());
        self.owns.push(false);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
        self.open.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if self.is_table(relation) {
            match self.open.last() {
                Some(&scope) => self.owns[scope] = true,
                None => self.statement_owns = true,
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Table {
            name,
            alias: Some(alias),
            ..
        } = factor
        {
            if self.is_table(name) {
                self.aliases.insert(alias.name.value.to_ascii_lowercase());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Collects `key = value` comparisons and `key IN (..)` lists in visiting order.
///
/// An unqualified key column only counts inside a query that reads the table
/// itself. A qualified one counts wherever its qualifier names the table or
/// one of its aliases.
struct ConditionKeys<'a> {
    scopes: &'a TableScopes<'a>,
    sharding_key: &'a str,
    params: &'a [QueryParam],
    ordinal: usize,
    queries_seen: usize,
    open: Vec<bool>,
    keys: Vec<ShardKey>,
}

impl ConditionKeys<'_> {
    fn in_table_scope(&self) -> bool {
        self.open
            .last()
            .copied()
            .unwrap_or(self.scopes.statement_owns)
    }

    fn is_key_column(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Identifier(ident) => {
                self.in_table_scope() && ident.value.eq_ignore_ascii_case(self.sharding_key)
            }
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [column] => {
                    self.in_table_scope() && column.value.eq_ignore_ascii_case(self.sharding_key)
                }
                [.., qualifier, column] => {
                    column.value.eq_ignore_ascii_case(self.sharding_key)
                        && self.scopes.is_qualifier(qualifier)
                }
                [] => false,
            },
            _ => false,
        }
    }

    fn comparison_key(&self, left: &Expr, right: &Expr) -> DbResult<Option<ShardKey>> {
        if self.is_key_column(left) {
            let ordinal = self.ordinal + count_sequential_placeholders(left);
            key_from_expr(right, ordinal, self.params)
        } else if self.is_key_column(right) {
            key_from_expr(left, self.ordinal, self.params)
        } else {
            Ok(None)
        }
    }

    /// Keys of every listed value. Empty if any of them is not a literal or placeholder.
    fn list_keys(&self, column: &Expr, list: &[Expr]) -> DbResult<Vec<ShardKey>> {
        let mut ordinal = self.ordinal + count_sequential_placeholders(column);
        let mut keys = Vec::with_capacity(list.len());
        for item in list {
            match key_from_expr(item, ordinal, self.params)? {
                Some(key) => keys.push(key),
                None => return Ok(Vec::new()),
            }
            ordinal += count_sequential_placeholders(item);
        }
        Ok(keys)
    }

    fn collect(&mut self, expr: &Expr) -> DbResult<()> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if let Some(key) = self.comparison_key(left, right)? {
                    self.keys.push(key);
                }
            }
            Expr::InList {
                expr: column,
                list,
                negated: false,
            } if self.is_key_column(column) => {
                let keys = self.list_keys(column, list)?;
                self.keys.extend(keys);
            }
            _ => {}
        }
        Ok(())
    }
}

impl Visitor for ConditionKeys<'_> {
    type Break = DbError;

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        let owns = self.scopes.owns.get(self.queries_seen).copied().unwrap_or(false);
        self.queries_seen += 1;
        self.open.push(owns);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.open.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Err(err) = self.collect(expr) {
            return ControlFlow::Break(err);
        }
        if is_sequential_placeholder(expr) {
            self.ordinal += 1;
        }
        ControlFlow::Continue(())
    }
}

fn condition_keys(
    stmt: &Statement,
    table: &str,
    sharding_key: &str,
    params: &[QueryParam],
) -> DbResult<Vec<ShardKey>> {
    let scopes = TableScopes::scan(stmt, table);
    let mut visitor = ConditionKeys {
        scopes: &scopes,
        sharding_key,
        params,
        ordinal: 0,
        queries_seen: 0,
        open: Vec::new(),
        keys: Vec::new(),
    };
    match stmt.visit(&mut visitor) {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(visitor.keys),
    }
}

/// Key value of a literal or placeholder. `None` for anything else.
fn key_from_expr(expr: &Expr, ordinal: usize, params: &[QueryParam]) -> DbResult<Option<ShardKey>> {
    let value = match expr {
        Expr::Value(v) => &v.value,
        Expr::Nested(inner) => return key_from_expr(inner, ordinal, params),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => {
            return Ok(match inner.as_ref() {
                Expr::Value(v) => match &v.value {
                    Value::Number(n, _) => Some(number_key(&format!("-{n}"))),
                    _ => None,
                },
                _ => None,
            });
        }
        _ => return Ok(None),
    };

    match value {
        Value::Number(n, _) => Ok(Some(number_key(n))),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            Ok(Some(ShardKey::Text(s.clone())))
        }
        Value::Placeholder(p) => {
            let index = placeholder_index(p, ordinal)?;
            let param = params.get(index).ok_or_else(|| {
                DbError::resolution(format!(
                    "Placeholder {p} has no bound parameter ({} given)",
                    params.len()
                ))
            })?;
            key_from_param(param).map(Some)
        }
        _ => Ok(None),
    }
}

fn number_key(n: &str) -> ShardKey {
    n.parse::<i64>()
        .map(ShardKey::Int)
        .unwrap_or_else(|_| ShardKey::Text(n.to_string()))
}

/// Zero-based parameter index of a placeholder. `?` takes its ordinal.
fn placeholder_index(placeholder: &str, ordinal: usize) -> DbResult<usize> {
    if placeholder == "?" {
        return Ok(ordinal);
    }
    placeholder
        .strip_prefix('$')
        .or_else(|| placeholder.strip_prefix('?'))
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| DbError::resolution(format!("Unsupported placeholder: {placeholder}")))
}

fn key_from_param(param: &QueryParam) -> DbResult<ShardKey> {
    match param {
        QueryParam::Int(v) => Ok(ShardKey::Int(*v)),
        QueryParam::String(v) => Ok(ShardKey::Text(v.clone())),
        other => Err(DbError::resolution(format!(
            "Sharding key must be an integer or string, got {}",
            other.type_name()
        ))),
    }
}

/// Point every reference to `table` at `shard_table`, keeping quote style.
fn rename_table(stmt: &mut Statement, table: &str, shard_table: &str) {
    let rename = |name: &mut ObjectName| {
        if let Some(ObjectNamePart::Identifier(ident)) = name.0.last_mut() {
            if ident.value.eq_ignore_ascii_case(table) {
                ident.value = shard_table.to_string();
            }
        }
    };

    let _ = visit_relations_mut(stmt, |name: &mut ObjectName| {
        rename(name);
        ControlFlow::<()>::Continue(())
    });

    // MySQL multi-table DELETE targets are not visited as relations
    if let Statement::Delete(delete) = stmt {
        delete.tables.iter_mut().for_each(rename);
    }

    // Qualified columns such as `orders.user_id`
    let _ = visit_expressions_mut(stmt, |expr| {
        if let Expr::CompoundIdentifier(parts) = expr {
            if parts.len() >= 2 {
                let qualifier = parts.len() - 2;
                if parts[qualifier].value.eq_ignore_ascii_case(table) {
                    parts[qualifier].value = shard_table.to_string();
                }
            }
        }
        ControlFlow::<()>::Continue(())
    });
}
