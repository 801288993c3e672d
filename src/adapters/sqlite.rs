use crate::domain::model::{
    Country, HierarchyNode, HsType, NewRulesDocument, NodeKind, NomenclatureTree, ReloadRun,
    Rule, RulesDocument, RulesDocumentFootnote, SubRule,
};
use crate::domain::ports::{NomenclatureRepository, ReloadTracking, RulesRepository, RulesStore};
use crate::utils::error::{HelpdeskError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Ordered schema migrations. Entry `n` moves the database from
/// `user_version` n to n + 1; applied entries are never edited.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE countries (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_eu INTEGER NOT NULL DEFAULT 0,
        trade_agreement_title TEXT
    );

    CREATE TABLE nomenclature_trees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        region TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT
    );

    CREATE TABLE hierarchy_nodes (
        id INTEGER NOT NULL,
        tree_id INTEGER NOT NULL REFERENCES nomenclature_trees(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        code TEXT NOT NULL,
        goods_nomenclature_sid INTEGER NOT NULL,
        description TEXT NOT NULL,
        parent_id INTEGER,
        number_indents INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tree_id, id)
    );
    CREATE INDEX idx_hierarchy_nodes_code ON hierarchy_nodes(tree_id, code);

    CREATE TABLE rules_documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        description TEXT NOT NULL,
        nomenclature_tree_id INTEGER NOT NULL REFERENCES nomenclature_trees(id) ON DELETE CASCADE,
        start_date TEXT NOT NULL,
        end_date TEXT
    );

    CREATE TABLE rules_document_countries (
        rules_document_id INTEGER NOT NULL REFERENCES rules_documents(id) ON DELETE CASCADE,
        country_code TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (rules_document_id, country_code)
    );

    CREATE TABLE rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rules_document_id INTEGER NOT NULL REFERENCES rules_documents(id) ON DELETE CASCADE,
        code TEXT,
        description TEXT NOT NULL,
        hs_from TEXT NOT NULL,
        hs_to TEXT,
        hs_type TEXT NOT NULL,
        is_extract INTEGER NOT NULL DEFAULT 0,
        rule_text TEXT,
        alt_rule_text TEXT
    );
    CREATE INDEX idx_rules_document ON rules(rules_document_id);

    CREATE TABLE subrules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_id INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
        ordering INTEGER NOT NULL,
        description TEXT,
        rule_text TEXT,
        alt_rule_text TEXT
    );

    CREATE TABLE rules_document_footnotes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rules_document_id INTEGER NOT NULL REFERENCES rules_documents(id) ON DELETE CASCADE,
        number INTEGER NOT NULL,
        identifier TEXT NOT NULL,
        note TEXT NOT NULL
    );",
    "CREATE TABLE reload_data_tracking (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time TEXT NOT NULL,
        end_time TEXT,
        reason TEXT
    );",
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<usize> {
        let conn = self.lock()?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version as usize)
    }

    /// Applies pending migrations; returns how many ran.
    pub fn migrate(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let current = current as usize;

        if current > MIGRATIONS.len() {
            return Err(HelpdeskError::StorageError {
                message: format!(
                    "database schema version {} is newer than this build ({})",
                    current,
                    MIGRATIONS.len()
                ),
            });
        }

        let pending = &MIGRATIONS[current..];
        for (offset, sql) in pending.iter().enumerate() {
            let version = current + offset + 1;
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version as i64)?;
            tx.commit()?;
            tracing::info!("Applied schema migration {}", version);
        }

        Ok(pending.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| HelpdeskError::StorageError {
            message: "sqlite connection lock poisoned".to_string(),
        })
    }

    fn load_document(conn: &Connection, row: &Row<'_>) -> rusqlite::Result<RulesDocument> {
        let id: i64 = row.get(0)?;
        let mut stmt = conn.prepare_cached(
            "SELECT country_code FROM rules_document_countries
             WHERE rules_document_id = ?1 ORDER BY position",
        )?;
        let country_codes = stmt
            .query_map([id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(RulesDocument {
            id,
            description: row.get(1)?,
            nomenclature_tree_id: row.get(2)?,
            country_codes,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
        })
    }

    fn query_documents(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<RulesDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let documents = stmt
            .query_map(args, |row| Self::load_document(&conn, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn country_from_row(row: &Row<'_>) -> rusqlite::Result<Country> {
    Ok(Country {
        code: row.get(0)?,
        name: row.get(1)?,
        is_eu: row.get(2)?,
        trade_agreement_title: row.get(3)?,
    })
}

fn tree_from_row(row: &Row<'_>) -> rusqlite::Result<NomenclatureTree> {
    Ok(NomenclatureTree {
        id: row.get(0)?,
        region: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<ReloadRun> {
    Ok(ReloadRun {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        reason: row.get(3)?,
    })
}

const DOCUMENT_COLUMNS: &str = "id, description, nomenclature_tree_id, start_date, end_date";

impl RulesRepository for SqliteStore {
    fn country(&self, code: &str) -> Result<Option<Country>> {
        let conn = self.lock()?;
        let country = conn
            .query_row(
                "SELECT code, name, is_eu, trade_agreement_title FROM countries WHERE code = ?1",
                [code],
                country_from_row,
            )
            .optional()?;
        Ok(country)
    }

    fn countries(&self) -> Result<Vec<Country>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT code, name, is_eu, trade_agreement_title FROM countries ORDER BY code",
        )?;
        let countries = stmt
            .query_map([], country_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(countries)
    }

    fn documents(&self) -> Result<Vec<RulesDocument>> {
        self.query_documents(
            &format!("SELECT {} FROM rules_documents ORDER BY id", DOCUMENT_COLUMNS),
            &[],
        )
    }

    fn documents_for_country(&self, country_code: &str, tree_id: i64) -> Result<Vec<RulesDocument>> {
        self.query_documents(
            &format!(
                "SELECT {} FROM rules_documents WHERE nomenclature_tree_id = ?2 AND id IN (
                    SELECT rules_document_id FROM rules_document_countries WHERE country_code = ?1
                 ) ORDER BY id",
                DOCUMENT_COLUMNS
            ),
            &[&country_code, &tree_id],
        )
    }

    fn rules(&self, document_id: i64) -> Result<Vec<Rule>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT s.rule_id, s.ordering, s.description, s.rule_text, s.alt_rule_text
             FROM subrules s JOIN rules r ON r.id = s.rule_id
             WHERE r.rules_document_id = ?1
             ORDER BY s.rule_id, s.ordering",
        )?;
        let mut subrules: HashMap<i64, Vec<SubRule>> = HashMap::new();
        let rows = stmt.query_map([document_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                SubRule {
                    order: row.get(1)?,
                    description: row.get(2)?,
                    rule_text: row.get(3)?,
                    alt_rule_text: row.get(4)?,
                },
            ))
        })?;
        for row in rows {
            let (rule_id, subrule) = row?;
            subrules.entry(rule_id).or_default().push(subrule);
        }

        let mut stmt = conn.prepare(
            "SELECT id, rules_document_id, code, description, hs_from, hs_to, hs_type,
                    is_extract, rule_text, alt_rule_text
             FROM rules WHERE rules_document_id = ?1 ORDER BY id",
        )?;
        let rules = stmt
            .query_map([document_id], |row| {
                let id: i64 = row.get(0)?;
                let hs_type: String = row.get(6)?;
                let hs_type = HsType::parse(&hs_type)
                    .ok_or_else(|| conversion_error(6, format!("unknown hs_type {}", hs_type)))?;
                Ok(Rule {
                    id,
                    rules_document_id: row.get(1)?,
                    code: row.get(2)?,
                    description: row.get(3)?,
                    hs_from: row.get(4)?,
                    hs_to: row.get(5)?,
                    hs_type,
                    is_extract: row.get(7)?,
                    rule_text: row.get(8)?,
                    alt_rule_text: row.get(9)?,
                    subrules: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rules
            .into_iter()
            .map(|mut rule| {
                rule.subrules = subrules.remove(&rule.id).unwrap_or_default();
                rule
            })
            .collect())
    }

    fn footnotes(&self, document_id: i64) -> Result<Vec<RulesDocumentFootnote>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, rules_document_id, number, identifier, note
             FROM rules_document_footnotes WHERE rules_document_id = ?1 ORDER BY id",
        )?;
        let footnotes = stmt
            .query_map([document_id], |row| {
                Ok(RulesDocumentFootnote {
                    id: row.get(0)?,
                    rules_document_id: row.get(1)?,
                    number: row.get(2)?,
                    identifier: row.get(3)?,
                    note: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(footnotes)
    }
}

impl RulesStore for SqliteStore {
    fn upsert_country(&self, country: &Country) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO countries (code, name, is_eu, trade_agreement_title)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                is_eu = excluded.is_eu,
                trade_agreement_title = excluded.trade_agreement_title",
            params![
                country.code,
                country.name,
                country.is_eu,
                country.trade_agreement_title
            ],
        )?;
        Ok(())
    }

    fn save_document(&self, document: NewRulesDocument) -> Result<RulesDocument> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO rules_documents (description, nomenclature_tree_id, start_date)
             VALUES (?1, ?2, ?3)",
            params![
                document.description,
                document.nomenclature_tree_id,
                document.start_date
            ],
        )?;
        let document_id = tx.last_insert_rowid();

        for (position, code) in document.country_codes.iter().enumerate() {
            tx.execute(
                "INSERT INTO rules_document_countries (rules_document_id, country_code, position)
                 VALUES (?1, ?2, ?3)",
                params![document_id, code, position as i64],
            )?;
        }

        for rule in &document.rules {
            tx.execute(
                "INSERT INTO rules (rules_document_id, code, description, hs_from, hs_to,
                                    hs_type, is_extract, rule_text, alt_rule_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    document_id,
                    rule.code,
                    rule.description,
                    rule.hs_from,
                    rule.hs_to,
                    rule.hs_type.as_str(),
                    rule.is_extract,
                    rule.rule_text,
                    rule.alt_rule_text
                ],
            )?;
            let rule_id = tx.last_insert_rowid();

            for subrule in &rule.subrules {
                tx.execute(
                    "INSERT INTO subrules (rule_id, ordering, description, rule_text, alt_rule_text)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        rule_id,
                        subrule.order,
                        subrule.description,
                        subrule.rule_text,
                        subrule.alt_rule_text
                    ],
                )?;
            }
        }

        for note in &document.footnotes {
            tx.execute(
                "INSERT INTO rules_document_footnotes (rules_document_id, number, identifier, note)
                 VALUES (?1, ?2, ?3, ?4)",
                params![document_id, note.number, note.identifier, note.note],
            )?;
        }

        tx.commit()?;

        Ok(RulesDocument {
            id: document_id,
            description: document.description,
            nomenclature_tree_id: document.nomenclature_tree_id,
            country_codes: document.country_codes,
            start_date: document.start_date,
            end_date: None,
        })
    }

    fn delete_documents_for_tree(&self, tree_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM rules_documents WHERE nomenclature_tree_id = ?1",
            [tree_id],
        )?;
        Ok(deleted)
    }
}

impl NomenclatureRepository for SqliteStore {
    fn trees(&self, region: &str) -> Result<Vec<NomenclatureTree>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, region, start_date, end_date FROM nomenclature_trees
             WHERE region = ?1 ORDER BY start_date, id",
        )?;
        let trees = stmt
            .query_map([region], tree_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trees)
    }

    fn create_tree(&self, region: &str, start_date: DateTime<Utc>) -> Result<NomenclatureTree> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nomenclature_trees (region, start_date, end_date) VALUES (?1, ?2, ?2)",
            params![region, start_date],
        )?;
        Ok(NomenclatureTree {
            id: conn.last_insert_rowid(),
            region: region.to_string(),
            start_date,
            end_date: Some(start_date),
        })
    }

    fn set_tree_end_date(&self, tree_id: i64, end_date: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE nomenclature_trees SET end_date = ?2 WHERE id = ?1",
            params![tree_id, end_date],
        )?;
        if updated == 0 {
            return Err(HelpdeskError::StorageError {
                message: format!("nomenclature tree {} does not exist", tree_id),
            });
        }
        Ok(())
    }

    fn delete_tree(&self, tree_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM nomenclature_trees WHERE id = ?1", [tree_id])?;
        Ok(())
    }

    fn nodes(&self, tree_id: i64) -> Result<Vec<HierarchyNode>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tree_id, kind, code, goods_nomenclature_sid, description, parent_id,
                    number_indents
             FROM hierarchy_nodes WHERE tree_id = ?1 ORDER BY id",
        )?;
        let nodes = stmt
            .query_map([tree_id], |row| {
                let kind: String = row.get(2)?;
                let kind = NodeKind::parse(&kind)
                    .ok_or_else(|| conversion_error(2, format!("unknown node kind {}", kind)))?;
                Ok(HierarchyNode {
                    id: row.get(0)?,
                    tree_id: row.get(1)?,
                    kind,
                    code: row.get(3)?,
                    goods_nomenclature_sid: row.get(4)?,
                    description: row.get(5)?,
                    parent_id: row.get(6)?,
                    number_indents: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    fn insert_node(&self, node: &HierarchyNode) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO hierarchy_nodes (id, tree_id, kind, code, goods_nomenclature_sid,
                                          description, parent_id, number_indents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.id,
                node.tree_id,
                node.kind.as_str(),
                node.code,
                node.goods_nomenclature_sid,
                node.description,
                node.parent_id,
                node.number_indents
            ],
        )?;
        Ok(())
    }
}

impl ReloadTracking for SqliteStore {
    fn open_runs(&self) -> Result<Vec<ReloadRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, start_time, end_time, reason FROM reload_data_tracking
             WHERE end_time IS NULL ORDER BY id",
        )?;
        let runs = stmt
            .query_map([], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn start_run(&self, at: DateTime<Utc>) -> Result<ReloadRun> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reload_data_tracking (start_time) VALUES (?1)",
            params![at],
        )?;
        Ok(ReloadRun {
            id: conn.last_insert_rowid(),
            start_time: at,
            end_time: None,
            reason: None,
        })
    }

    fn finish_run(&self, run_id: i64, at: DateTime<Utc>, reason: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE reload_data_tracking SET end_time = ?2, reason = ?3 WHERE id = ?1",
            params![run_id, at, reason],
        )?;
        Ok(())
    }
}
