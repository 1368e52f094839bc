//! Static checks on user-submitted SQL before anything reaches the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{visit_relations, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::constants::RESTRICTED_TABLES;
use crate::error::{AppError, Result};
use crate::schema::Ident;

const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
}

impl QueryKind {
    pub fn is_write(&self) -> bool {
        matches!(self, QueryKind::Insert | QueryKind::Update | QueryKind::Delete)
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "SELECT" => Some(QueryKind::Select),
            "INSERT" => Some(QueryKind::Insert),
            "UPDATE" => Some(QueryKind::Update),
            "DELETE" => Some(QueryKind::Delete),
            "CREATE" => Some(QueryKind::Create),
            _ => None,
        }
    }
}

/// A relation referenced by a query, with Postgres case folding applied
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parse `name`, `schema.name` or their quoted forms
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = split_qualified(text)?;
        let name = parts.pop()?;
        let schema = parts.pop();
        if !parts.is_empty() {
            return None;
        }
        Some(TableRef { schema, name })
    }

    /// Catalog, identity or engine-internal relation, or anything outside `public`
    pub fn is_restricted(&self) -> bool {
        let name = self.name.to_lowercase();
        if RESTRICTED_TABLES.contains(&name.as_str()) || name.starts_with("pg_") {
            return true;
        }
        match self.schema.as_deref().map(str::to_lowercase) {
            None => false,
            Some(schema) => schema != DEFAULT_SCHEMA,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Result of a successful inspection
#[derive(Debug, Clone)]
pub struct InspectedQuery {
    /// Trimmed text without a trailing semicolon
    pub sql: String,
    pub kind: QueryKind,
    /// Every relation the statement touches, deduplicated
    pub relations: Vec<TableRef>,
    /// Written table for INSERT/UPDATE/DELETE, new table for CREATE
    pub target: Option<String>,
}

impl InspectedQuery {
    /// Relations other than the target
    pub fn read_relations(&self) -> impl Iterator<Item = &TableRef> {
        self.relations
            .iter()
            .filter(move |r| Some(r.name.as_str()) != self.target.as_deref())
    }
}

/// Run the whole static pipeline: parse, heuristics, restricted guard, classify
pub fn inspect(raw: &str) -> Result<InspectedQuery> {
    let sql = strip_trailing_semicolon(raw.trim()).to_string();
    if sql.is_empty() {
        return Err(AppError::InvalidQuery("Query is empty".to_string()));
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
        .map_err(|e| AppError::InvalidQuery(e.to_string()))?;

    let masked = mask_literals(&sql);
    check_injection(&sql, &masked, statements.len())?;

    let statement = statements
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidQuery("Query is empty".to_string()))?;

    let keyword = leading_keyword(&masked);
    let relations = collect_relations(&masked, &statement, keyword == "CREATE");
    if let Some(forbidden) = relations.iter().find(|r| r.is_restricted()) {
        tracing::warn!("Rejected query touching restricted relation {}", forbidden);
        return Err(AppError::ForbiddenTable(forbidden.to_string()));
    }

    let kind = QueryKind::from_keyword(&keyword)
        .ok_or_else(|| AppError::UnsupportedQueryType(keyword.clone()))?;

    let target = match kind {
        QueryKind::Create => Some(create_table_name(&statement)?),
        kind if kind.is_write() => Some(write_target(kind, &masked)?.name),
        _ => None,
    };

    Ok(InspectedQuery {
        sql,
        kind,
        relations: relations.into_iter().collect(),
        target,
    })
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    sql.strip_suffix(';').map(str::trim_end).unwrap_or(sql)
}

/// Replace the contents of single-quoted literals with spaces, keeping offsets
pub fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            if in_literal && chars.peek() == Some(&'\'') {
                chars.next();
                out.push_str("  ");
                continue;
            }
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn union_select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bunion\s+(?:all\s+)?select\b").expect("valid union select regex")
    })
}

fn engine_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bpg_\w*\s*\(").expect("valid engine function regex")
    })
}

/// Functions that run SQL handed to them as text, or resolve relation names
/// from text, and so reach tables no scan of the query can see
fn text_query_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(?:query_to_\w+|table_to_xml\w*|cursor_to_xml\w*|schema_to_xml\w*|database_to_xml\w*|dblink\w*|lo_\w+|ts_stat|ts_rewrite|current_setting|set_config|to_reg\w+)"?\s*\("#,
        )
        .expect("valid text query function regex")
    })
}

fn object_id_cast_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(?:::\s*|\bas\s+)"?(?:pg_catalog"?\s*\.\s*"?)?reg(?:class|proc|procedure|oper|operator|type|role|namespace|config|dictionary|collation)\b"#,
        )
        .expect("valid object id cast regex")
    })
}

fn numeric_tautology_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bor\s+(\d+)\s*=\s*(\d+)\b").expect("valid numeric tautology regex")
    })
}

fn quoted_tautology_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bor\s+'([^']*)'\s*=\s*'([^']*)'").expect("valid quoted tautology regex")
    })
}

/// Reject well-known injection shapes. Heuristic only: the restricted guard
/// and ownership checks are what actually protect data.
fn check_injection(sql: &str, masked: &str, statement_count: usize) -> Result<()> {
    let reject = |what: &str| {
        tracing::warn!("Rejected query with suspicious shape: {}", what);
        Err(AppError::InvalidQuery(format!(
            "Query looks like an injection attempt ({})",
            what
        )))
    };

    if statement_count > 1 || masked.contains(';') {
        return reject("stacked statements");
    }
    if masked.contains("--") || masked.contains("/*") {
        return reject("comment marker");
    }
    if union_select_re().is_match(masked) {
        return reject("UNION SELECT");
    }
    if engine_function_re().is_match(masked) {
        return reject("engine function call");
    }
    if text_query_function_re().is_match(masked) {
        return reject("function reading tables by name");
    }
    if object_id_cast_re().is_match(masked) {
        return reject("object identifier cast");
    }

    let tautology = numeric_tautology_re()
        .captures_iter(masked)
        .chain(quoted_tautology_re().captures_iter(sql))
        .any(|caps| caps.get(1).map(|m| m.as_str()) == caps.get(2).map(|m| m.as_str()));
    if tautology {
        return reject("always-true condition");
    }

    Ok(())
}

fn relation_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:from|join|into|update|table)\s+((?:"[^"]+"|\w+)(?:\s*\.\s*(?:"[^"]+"|\w+))?)"#)
            .expect("valid relation keyword regex")
    })
}

/// Tables a `CREATE TABLE` borrows from: foreign keys, inheritance,
/// partitions and copied definitions
fn ddl_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:\breferences\s+|\binherits\s*\(\s*|\bpartition\s+of\s+|[(,]\s*like\s+|\bclone\s+)((?:"[^"]+"|\w+)(?:\s*\.\s*(?:"[^"]+"|\w+))?)"#)
            .expect("valid ddl reference regex")
    })
}

fn inherits_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\binherits\s*\(([^)]*)\)").expect("valid inherits regex"))
}

/// Relations from the keyword scan plus the parser's relation visitor.
/// `ddl` adds the tables a new table's definition points at.
fn collect_relations(masked: &str, statement: &Statement, ddl: bool) -> BTreeSet<TableRef> {
    let mut relations: BTreeSet<TableRef> = relation_keyword_re()
        .captures_iter(masked)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| TableRef::parse(&m.as_str().replace(char::is_whitespace, "")))
        .filter(|r| !is_scan_noise(r))
        .collect();

    if ddl {
        let referenced = ddl_reference_re()
            .captures_iter(masked)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let inherited = inherits_list_re()
            .captures_iter(masked)
            .filter_map(|caps| caps.get(1))
            .flat_map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            });
        relations.extend(
            referenced
                .chain(inherited)
                .filter_map(|text| TableRef::parse(&text.replace(char::is_whitespace, ""))),
        );
    }

    let _ = visit_relations(statement, |name| {
        if let Some(relation) = TableRef::parse(&name.to_string()) {
            relations.insert(relation);
        }
        ControlFlow::<()>::Continue(())
    });

    relations
}

/// Words the keyword scan picks up that are never relation names
fn is_scan_noise(relation: &TableRef) -> bool {
    relation.schema.is_none() && matches!(relation.name.as_str(), "only" | "select" | "lateral")
}

/// Split a possibly qualified identifier, folding unquoted parts to lowercase
fn split_qualified(text: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '.' if !quoted => {
                parts.push(finish_part(&mut current, was_quoted)?);
                was_quoted = false;
            }
            other => current.push(other),
        }
    }
    if quoted {
        return None;
    }
    parts.push(finish_part(&mut current, was_quoted)?);
    Some(parts)
}

fn finish_part(current: &mut String, was_quoted: bool) -> Option<String> {
    let part = std::mem::take(current);
    if part.is_empty() {
        return None;
    }
    Some(if was_quoted { part } else { part.to_lowercase() })
}

fn leading_keyword(masked: &str) -> String {
    masked
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Name of the table a CREATE statement makes
fn create_table_name(statement: &Statement) -> Result<String> {
    let Statement::CreateTable(create) = statement else {
        return Err(AppError::UnsupportedQueryType(
            "Only CREATE TABLE is supported".to_string(),
        ));
    };
    if create.temporary {
        return Err(AppError::UnsupportedQueryType(
            "Temporary tables are not supported".to_string(),
        ));
    }

    let rendered = create.name.to_string();
    let relation = TableRef::parse(&rendered)
        .ok_or_else(|| AppError::InvalidQuery(format!("Cannot read table name '{}'", rendered)))?;
    if relation.schema.is_some() {
        return Err(AppError::InvalidQuery(
            "Table names must not be schema-qualified".to_string(),
        ));
    }

    Ok(Ident::table(&relation.name)?.as_str().to_string())
}

fn insert_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)^\s*insert\s+into\s+((?:"[^"]+"|\w+)(?:\s*\.\s*(?:"[^"]+"|\w+))?)"#)
            .expect("valid insert target regex")
    })
}

fn update_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)^\s*update\s+(?:only\s+)?((?:"[^"]+"|\w+)(?:\s*\.\s*(?:"[^"]+"|\w+))?)"#)
            .expect("valid update target regex")
    })
}

fn delete_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^\s*delete\s+from\s+(?:only\s+)?((?:"[^"]+"|\w+)(?:\s*\.\s*(?:"[^"]+"|\w+))?)"#,
        )
        .expect("valid delete target regex")
    })
}

/// Table written by an INSERT, UPDATE or DELETE
pub fn write_target(kind: QueryKind, sql: &str) -> Result<TableRef> {
    let re = match kind {
        QueryKind::Insert => insert_target_re(),
        QueryKind::Update => update_target_re(),
        QueryKind::Delete => delete_target_re(),
        other => {
            return Err(AppError::UnsupportedQueryType(format!(
                "{:?} has no write target",
                other
            )))
        }
    };

    let text = re
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(char::is_whitespace, ""))
        .ok_or_else(|| AppError::InvalidQuery("Cannot find the target table".to_string()))?;

    let target = TableRef::parse(&text)
        .ok_or_else(|| AppError::InvalidQuery(format!("Cannot read table name '{}'", text)))?;
    if target.is_restricted() {
        return Err(AppError::ForbiddenTable(target.to_string()));
    }
    Ok(target)
}
