//! In-memory catalog store.
//!
//! Models the parts of a Postgres session the tenancy layer depends on:
//! schemas, tables and indexes, schema comments, a per-session
//! `search_path`, and transactions that become visible atomically on commit.
//! Rows are counted, not stored.
//!
//! Sessions are pooled. A session returned to the pool keeps whatever
//! `search_path` it had, so a missing reset is observable through
//! [`InMemoryStore::idle_search_paths`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::BackendError;
use crate::tenant::SchemaName;

use super::{QueryResult, RelationalStore, StoreConnection};

const BACKEND_NAME: &str = "memory";

/// The `search_path` every fresh session starts with.
const DEFAULT_SEARCH_PATH: [&str; 2] = ["$user", "public"];

#[derive(Debug, Clone, Default)]
struct SchemaEntry {
    tables: BTreeMap<String, u64>,
    indexes: BTreeSet<String>,
    comment: Option<String>,
    grants: usize,
}

#[derive(Debug, Clone)]
struct Catalog {
    schemas: BTreeMap<String, SchemaEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), SchemaEntry::default());
        Self { schemas }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relation {
    schema: Option<String>,
    table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmlKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
enum CatalogOp {
    CreateSchema { name: String, if_not_exists: bool },
    DropSchema { name: String, if_exists: bool, cascade: bool },
    CreateTable { relation: Relation, if_not_exists: bool },
    CreateIndex { name: String, relation: Relation, if_not_exists: bool },
    CommentOnSchema { name: String, comment: Option<String> },
    Grant { schema: Option<String> },
    Dml { kind: DmlKind, relation: Relation },
}

#[derive(Debug)]
enum Statement {
    Begin,
    Commit,
    Rollback,
    SetSearchPath { path: Vec<String>, local: bool },
    ResetSearchPath,
    ShowSearchPath,
    Select(Option<Relation>),
    Catalog(CatalogOp),
    Ignored,
}

fn missing_schema(name: &str) -> BackendError {
    BackendError::QueryError {
        message: format!("schema \"{}\" does not exist", name),
    }
}

fn missing_relation(table: &str) -> BackendError {
    BackendError::QueryError {
        message: format!("relation \"{}\" does not exist", table),
    }
}

impl Catalog {
    /// Schema that receives unqualified new objects: first existing path entry.
    fn creation_schema(&self, search_path: &[String]) -> Option<String> {
        search_path
            .iter()
            .find(|s| self.schemas.contains_key(s.as_str()))
            .cloned()
    }

    /// Schema an unqualified table resolves to.
    fn resolve(&self, relation: &Relation, search_path: &[String]) -> Result<String, BackendError> {
        match &relation.schema {
            Some(schema) => {
                let entry = self
                    .schemas
                    .get(schema)
                    .ok_or_else(|| missing_schema(schema))?;
                if entry.tables.contains_key(&relation.table) {
                    Ok(schema.clone())
                } else {
                    Err(missing_relation(&relation.table))
                }
            }
            None => search_path
                .iter()
                .find(|s| {
                    self.schemas
                        .get(s.as_str())
                        .is_some_and(|e| e.tables.contains_key(&relation.table))
                })
                .cloned()
                .ok_or_else(|| missing_relation(&relation.table)),
        }
    }

    fn apply(&mut self, op: &CatalogOp, search_path: &[String]) -> Result<u64, BackendError> {
        match op {
            CatalogOp::CreateSchema {
                name,
                if_not_exists,
            } => {
                if self.schemas.contains_key(name) {
                    return if *if_not_exists {
                        Ok(0)
                    } else {
                        Err(BackendError::AlreadyExists {
                            object: format!("schema \"{}\"", name),
                        })
                    };
                }
                self.schemas.insert(name.clone(), SchemaEntry::default());
                Ok(0)
            }
            CatalogOp::DropSchema {
                name,
                if_exists,
                cascade,
            } => {
                let Some(entry) = self.schemas.get(name) else {
                    return if *if_exists {
                        Ok(0)
                    } else {
                        Err(missing_schema(name))
                    };
                };
                if !cascade && !entry.tables.is_empty() {
                    return Err(BackendError::QueryError {
                        message: format!(
                            "cannot drop schema {} because other objects depend on it",
                            name
                        ),
                    });
                }
                self.schemas.remove(name);
                Ok(0)
            }
            CatalogOp::CreateTable {
                relation,
                if_not_exists,
            } => {
                let schema = match &relation.schema {
                    Some(schema) => schema.clone(),
                    None => self.creation_schema(search_path).ok_or_else(|| {
                        BackendError::QueryError {
                            message: "no schema has been selected to create in".to_string(),
                        }
                    })?,
                };
                let entry = self
                    .schemas
                    .get_mut(&schema)
                    .ok_or_else(|| missing_schema(&schema))?;
                if entry.tables.contains_key(&relation.table) {
                    return if *if_not_exists {
                        Ok(0)
                    } else {
                        Err(BackendError::QueryError {
                            message: format!("relation \"{}\" already exists", relation.table),
                        })
                    };
                }
                entry.tables.insert(relation.table.clone(), 0);
                Ok(0)
            }
            CatalogOp::CreateIndex {
                name,
                relation,
                if_not_exists,
            } => {
                let schema = self.resolve(relation, search_path)?;
                let entry = self
                    .schemas
                    .get_mut(&schema)
                    .ok_or_else(|| missing_schema(&schema))?;
                if !entry.indexes.insert(name.clone()) && !if_not_exists {
                    return Err(BackendError::QueryError {
                        message: format!("relation \"{}\" already exists", name),
                    });
                }
                Ok(0)
            }
            CatalogOp::CommentOnSchema { name, comment } => {
                let entry = self
                    .schemas
                    .get_mut(name)
                    .ok_or_else(|| missing_schema(name))?;
                entry.comment = comment.clone();
                Ok(0)
            }
            CatalogOp::Grant { schema } => {
                if let Some(name) = schema {
                    let entry = self
                        .schemas
                        .get_mut(name)
                        .ok_or_else(|| missing_schema(name))?;
                    entry.grants += 1;
                }
                Ok(0)
            }
            CatalogOp::Dml { kind, relation } => {
                let schema = self.resolve(relation, search_path)?;
                let rows = self
                    .schemas
                    .get_mut(&schema)
                    .and_then(|e| e.tables.get_mut(&relation.table))
                    .ok_or_else(|| missing_relation(&relation.table))?;
                Ok(match kind {
                    DmlKind::Insert => {
                        *rows += 1;
                        1
                    }
                    DmlKind::Update => *rows,
                    DmlKind::Delete => std::mem::take(rows),
                })
            }
        }
    }
}

#[derive(Debug)]
struct Session {
    id: usize,
    search_path: Vec<String>,
}

#[derive(Debug)]
struct Staged {
    view: Catalog,
    ops: Vec<(CatalogOp, Vec<String>)>,
    aborted: bool,
    /// Session path to restore when the transaction ends after `SET LOCAL`.
    saved_search_path: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct Shared {
    catalog: Mutex<Catalog>,
    idle: Mutex<Vec<Session>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<String>>,
    opened: AtomicUsize,
    discarded: AtomicUsize,
}

/// A pooled, catalog-only store.
///
/// Cloning shares the catalog and the pool.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates an empty store containing only the `public` schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every statement containing `fragment` (case-insensitive) fail.
    pub fn fail_on(&self, fragment: impl Into<String>) {
        self.shared
            .failures
            .lock()
            .push(fragment.into().to_lowercase());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.shared.failures.lock().clear();
    }

    /// Returns the committed schema names.
    pub fn schemas(&self) -> Vec<String> {
        self.shared.catalog.lock().schemas.keys().cloned().collect()
    }

    /// Returns the committed tables of `schema`.
    pub fn tables(&self, schema: &str) -> Vec<String> {
        self.shared
            .catalog
            .lock()
            .schemas
            .get(schema)
            .map(|e| e.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns whether `schema` has an index named `index`.
    pub fn has_index(&self, schema: &str, index: &str) -> bool {
        self.shared
            .catalog
            .lock()
            .schemas
            .get(schema)
            .is_some_and(|e| e.indexes.contains(index))
    }

    /// Returns the number of grants recorded against `schema`.
    pub fn grant_count(&self, schema: &str) -> usize {
        self.shared
            .catalog
            .lock()
            .schemas
            .get(schema)
            .map_or(0, |e| e.grants)
    }

    /// Returns the committed row count of `schema.table`.
    pub fn row_count(&self, schema: &str, table: &str) -> Option<u64> {
        self.shared
            .catalog
            .lock()
            .schemas
            .get(schema)
            .and_then(|e| e.tables.get(table).copied())
    }

    /// Drops a table behind the manager's back.
    pub fn remove_table(&self, schema: &str, table: &str) -> bool {
        self.shared
            .catalog
            .lock()
            .schemas
            .get_mut(schema)
            .is_some_and(|e| e.tables.remove(table).is_some())
    }

    /// Returns the rendered `search_path` of every idle session.
    pub fn idle_search_paths(&self) -> Vec<String> {
        self.shared
            .idle
            .lock()
            .iter()
            .map(|s| render_search_path(&s.search_path))
            .collect()
    }

    /// Number of idle sessions in the pool.
    pub fn idle_connections(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of sessions ever opened.
    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of sessions discarded instead of returned.
    pub fn connections_discarded(&self) -> usize {
        self.shared.discarded.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, in order.
    pub fn statement_log(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }
}

#[async_trait]
impl RelationalStore for InMemoryStore {
    type Connection = InMemoryConnection;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn acquire(&self) -> Result<Self::Connection, BackendError> {
        let session = self.shared.idle.lock().pop().unwrap_or_else(|| {
            let id = self.shared.opened.fetch_add(1, Ordering::SeqCst);
            Session {
                id,
                search_path: DEFAULT_SEARCH_PATH.iter().map(|s| s.to_string()).collect(),
            }
        });
        trace!(session = session.id, "Acquired in-memory session");

        Ok(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            session: Some(session),
            staged: None,
        })
    }
}

/// A session on an [`InMemoryStore`]. Returns to the pool on drop.
#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    session: Option<Session>,
    staged: Option<Staged>,
}

impl InMemoryConnection {
    fn session(&mut self) -> Result<&mut Session, BackendError> {
        self.session.as_mut().ok_or_else(|| BackendError::Unavailable {
            backend_name: BACKEND_NAME.to_string(),
            message: "session was discarded".to_string(),
        })
    }

    fn with_view<T>(&self, f: impl FnOnce(&Catalog) -> T) -> T {
        match &self.staged {
            Some(staged) => f(&staged.view),
            None => f(&self.shared.catalog.lock()),
        }
    }

    fn check_injected_failure(&self, sql: &str) -> Result<(), BackendError> {
        let lowered = sql.to_lowercase();
        let failures = self.shared.failures.lock();
        match failures.iter().find(|f| lowered.contains(f.as_str())) {
            Some(fragment) => Err(BackendError::QueryError {
                message: format!("injected failure on '{}'", fragment),
            }),
            None => Ok(()),
        }
    }

    /// Closes the open transaction and undoes any `SET LOCAL`.
    fn end_transaction(&mut self) -> Option<Staged> {
        let mut staged = self.staged.take()?;
        if let (Some(saved), Some(session)) =
            (staged.saved_search_path.take(), self.session.as_mut())
        {
            session.search_path = saved;
        }
        Some(staged)
    }

    fn run(&mut self, sql: &str) -> Result<QueryResult, BackendError> {
        self.session()?;
        self.shared.log.lock().push(sql.to_string());

        if let Err(e) = self.check_injected_failure(sql) {
            if let Some(staged) = self.staged.as_mut() {
                staged.aborted = true;
            }
            return Err(e);
        }

        let statement = parse(sql)?;
        let affected = |rows_affected| QueryResult {
            rows_affected,
            ..Default::default()
        };

        match statement {
            Statement::Begin => {
                if self.staged.is_none() {
                    let view = self.shared.catalog.lock().clone();
                    self.staged = Some(Staged {
                        view,
                        ops: Vec::new(),
                        aborted: false,
                        saved_search_path: None,
                    });
                }
                Ok(affected(0))
            }
            Statement::Commit => {
                let Some(staged) = self.end_transaction() else {
                    return Ok(affected(0));
                };
                if staged.aborted {
                    return Err(BackendError::TransactionError {
                        message: "transaction was aborted and has been rolled back".to_string(),
                    });
                }
                let mut catalog = self.shared.catalog.lock();
                let mut next = catalog.clone();
                for (op, search_path) in &staged.ops {
                    next.apply(op, search_path)?;
                }
                *catalog = next;
                Ok(affected(0))
            }
            Statement::Rollback => {
                self.end_transaction();
                Ok(affected(0))
            }
            Statement::SetSearchPath { path, local } => {
                let previous = std::mem::replace(&mut self.session()?.search_path, path);
                if local {
                    match self.staged.as_mut() {
                        Some(staged) => {
                            staged.saved_search_path.get_or_insert(previous);
                        }
                        // SET LOCAL outside a transaction has no effect.
                        None => self.session()?.search_path = previous,
                    }
                }
                Ok(affected(0))
            }
            Statement::ResetSearchPath => {
                self.session()?.search_path =
                    DEFAULT_SEARCH_PATH.iter().map(|s| s.to_string()).collect();
                Ok(affected(0))
            }
            Statement::ShowSearchPath => {
                let rendered = render_search_path(&self.session()?.search_path);
                Ok(QueryResult {
                    columns: vec!["search_path".to_string()],
                    rows: vec![vec![Some(rendered)]],
                    rows_affected: 1,
                })
            }
            Statement::Select(None) => Ok(QueryResult {
                columns: vec!["?column?".to_string()],
                rows: vec![vec![None]],
                rows_affected: 1,
            }),
            Statement::Select(Some(relation)) => {
                let search_path = self.session()?.search_path.clone();
                let schema = self.with_view(|c| c.resolve(&relation, &search_path))?;
                Ok(QueryResult {
                    columns: vec!["schema".to_string(), "table".to_string()],
                    rows: vec![vec![Some(schema), Some(relation.table)]],
                    rows_affected: 1,
                })
            }
            Statement::Catalog(op) => {
                let search_path = self.session()?.search_path.clone();
                match self.staged.as_mut() {
                    Some(staged) if staged.aborted => Err(BackendError::TransactionError {
                        message: "current transaction is aborted".to_string(),
                    }),
                    Some(staged) => match staged.view.apply(&op, &search_path) {
                        Ok(rows) => {
                            staged.ops.push((op, search_path));
                            Ok(affected(rows))
                        }
                        Err(e) => {
                            staged.aborted = true;
                            Err(e)
                        }
                    },
                    None => self
                        .shared
                        .catalog
                        .lock()
                        .apply(&op, &search_path)
                        .map(affected),
                }
            }
            Statement::Ignored => Ok(affected(0)),
        }
    }
}

#[async_trait]
impl StoreConnection for InMemoryConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        tokio::task::yield_now().await;
        self.run(sql).map(|r| r.rows_affected)
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, BackendError> {
        tokio::task::yield_now().await;
        self.run(sql)
    }

    async fn schema_exists(&mut self, schema: &SchemaName) -> Result<bool, BackendError> {
        self.session()?;
        Ok(self.with_view(|c| c.schemas.contains_key(schema.as_str())))
    }

    async fn schema_comment(
        &mut self,
        schema: &SchemaName,
    ) -> Result<Option<String>, BackendError> {
        self.session()?;
        Ok(self.with_view(|c| {
            c.schemas
                .get(schema.as_str())
                .and_then(|e| e.comment.clone())
        }))
    }

    async fn missing_tables(
        &mut self,
        schema: &SchemaName,
        tables: &[&str],
    ) -> Result<Vec<String>, BackendError> {
        self.session()?;
        Ok(self.with_view(|c| {
            let existing = c.schemas.get(schema.as_str());
            tables
                .iter()
                .filter(|t| !existing.is_some_and(|e| e.tables.contains_key(**t)))
                .map(|t| t.to_string())
                .collect()
        }))
    }

    async fn list_schemas(&mut self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.session()?;
        Ok(self.with_view(|c| {
            c.schemas
                .keys()
                .filter(|s| s.starts_with(prefix))
                .cloned()
                .collect()
        }))
    }

    async fn current_search_path(&mut self) -> Result<String, BackendError> {
        Ok(render_search_path(&self.session()?.search_path))
    }

    fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            trace!(session = session.id, "Discarding in-memory session");
            self.staged = None;
            self.shared.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_discarded(&self) -> bool {
        self.session.is_none()
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.shared.idle.lock().push(session);
        }
    }
}

/// Renders a path the way `SHOW search_path` does.
fn render_search_path(path: &[String]) -> String {
    path.iter()
        .map(|s| {
            let plain = s
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && s.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if plain {
                s.clone()
            } else {
                format!("\"{}\"", s.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Statement parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Literal(String),
    Punct(char),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, BackendError> {
    let unterminated = || BackendError::QueryError {
        message: "unterminated quoted string or identifier".to_string(),
    };
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '"' | '\'' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => {
                            if chars.peek() == Some(&c) {
                                chars.next();
                                value.push(c);
                            } else {
                                break;
                            }
                        }
                        Some(other) => value.push(other),
                        None => return Err(unterminated()),
                    }
                }
                tokens.push(if c == '"' {
                    Token::Quoted(value)
                } else {
                    Token::Literal(value)
                });
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut word = c.to_string();
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '$' {
                        word.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => tokens.push(Token::Punct(other)),
        }
    }
    Ok(tokens)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn keywords(&mut self, keywords: &[&str]) -> bool {
        let start = self.pos;
        if keywords.iter().all(|k| self.keyword(k)) {
            true
        } else {
            self.pos = start;
            false
        }
    }

    fn punct(&mut self, p: char) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<String> {
        let ident = match self.tokens.get(self.pos)? {
            Token::Word(w) => w.to_lowercase(),
            Token::Quoted(q) => q.clone(),
            _ => return None,
        };
        self.pos += 1;
        Some(ident)
    }

    fn relation(&mut self) -> Option<Relation> {
        let first = self.ident()?;
        if self.punct('.') {
            let table = self.ident()?;
            Some(Relation {
                schema: Some(first),
                table,
            })
        } else {
            Some(Relation {
                schema: None,
                table: first,
            })
        }
    }

    fn literal(&mut self) -> Option<String> {
        match self.tokens.get(self.pos)? {
            Token::Literal(l) => {
                let value = l.clone();
                self.pos += 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Moves past the next occurrence of `keyword`.
    fn seek(&mut self, keyword: &str) -> bool {
        while self.pos < self.tokens.len() {
            if self.keyword(keyword) {
                return true;
            }
            self.pos += 1;
        }
        false
    }

    fn contains(&self, keyword: &str) -> bool {
        self.tokens[self.pos..]
            .iter()
            .any(|t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case(keyword)))
    }
}

fn unsupported(sql: &str) -> BackendError {
    BackendError::QueryError {
        message: format!(
            "statement not supported by the in-memory store: {}",
            sql.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
        ),
    }
}

fn parse(sql: &str) -> Result<Statement, BackendError> {
    let mut c = Cursor {
        tokens: tokenize(sql)?,
        pos: 0,
    };
    let bad = || unsupported(sql);

    if c.keyword("begin") || c.keywords(&["start", "transaction"]) {
        return Ok(Statement::Begin);
    }
    if c.keyword("commit") || c.keyword("end") {
        return Ok(Statement::Commit);
    }
    if c.keyword("rollback") || c.keyword("abort") {
        return Ok(Statement::Rollback);
    }

    if c.keyword("set") {
        let local = c.keyword("local");
        let _ = local || c.keyword("session");
        if !c.keyword("search_path") {
            return Ok(Statement::Ignored);
        }
        if !(c.keyword("to") || c.punct('=')) {
            return Err(bad());
        }
        let mut path = vec![c.ident().ok_or_else(bad)?];
        while c.punct(',') {
            path.push(c.ident().ok_or_else(bad)?);
        }
        return Ok(Statement::SetSearchPath { path, local });
    }
    if c.keyword("reset") {
        return if c.keyword("search_path") || c.keyword("all") {
            Ok(Statement::ResetSearchPath)
        } else {
            Ok(Statement::Ignored)
        };
    }
    if c.keywords(&["show", "search_path"]) {
        return Ok(Statement::ShowSearchPath);
    }

    if c.keyword("select") {
        return Ok(Statement::Select(if c.seek("from") {
            c.relation()
        } else {
            None
        }));
    }

    let op = if c.keyword("create") {
        if c.keyword("schema") {
            let if_not_exists = c.keywords(&["if", "not", "exists"]);
            CatalogOp::CreateSchema {
                name: c.ident().ok_or_else(bad)?,
                if_not_exists,
            }
        } else if c.keyword("table") {
            let if_not_exists = c.keywords(&["if", "not", "exists"]);
            CatalogOp::CreateTable {
                relation: c.relation().ok_or_else(bad)?,
                if_not_exists,
            }
        } else {
            let _ = c.keyword("unique");
            if !c.keyword("index") {
                return Err(bad());
            }
            let if_not_exists = c.keywords(&["if", "not", "exists"]);
            let name = c.ident().ok_or_else(bad)?;
            if !c.keyword("on") {
                return Err(bad());
            }
            CatalogOp::CreateIndex {
                name,
                relation: c.relation().ok_or_else(bad)?,
                if_not_exists,
            }
        }
    } else if c.keywords(&["drop", "schema"]) {
        let if_exists = c.keywords(&["if", "exists"]);
        let name = c.ident().ok_or_else(bad)?;
        CatalogOp::DropSchema {
            name,
            if_exists,
            cascade: c.contains("cascade"),
        }
    } else if c.keywords(&["comment", "on", "schema"]) {
        let name = c.ident().ok_or_else(bad)?;
        if !c.keyword("is") {
            return Err(bad());
        }
        let comment = if c.keyword("null") {
            None
        } else {
            Some(c.literal().ok_or_else(bad)?)
        };
        CatalogOp::CommentOnSchema { name, comment }
    } else if c.keyword("grant")
        || c.keyword("revoke")
        || c.keywords(&["alter", "default", "privileges"])
    {
        CatalogOp::Grant {
            schema: if c.seek("schema") { c.ident() } else { None },
        }
    } else if c.keywords(&["insert", "into"]) {
        CatalogOp::Dml {
            kind: DmlKind::Insert,
            relation: c.relation().ok_or_else(bad)?,
        }
    } else if c.keyword("update") {
        CatalogOp::Dml {
            kind: DmlKind::Update,
            relation: c.relation().ok_or_else(bad)?,
        }
    } else if c.keywords(&["delete", "from"]) {
        CatalogOp::Dml {
            kind: DmlKind::Delete,
            relation: c.relation().ok_or_else(bad)?,
        }
    } else {
        return Err(bad());
    };

    Ok(Statement::Catalog(op))
}
