#![forbid(unsafe_code)]

use super::sqlite_schema;
use super::{Backend, ItemRow, RichVersionRow, TagRow, TagScope, UnitOfWork, VersionRow, Write};
use crate::store::StoreError;
use crate::store::error::map_insert_conflict;
use lc_core::dag::VersionSuccessor;
use lc_core::model::ItemKind;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const DB_FILE_NAME: &str = "lineage_catalog.db";

/// Relational engine. Every unit of work is an `IMMEDIATE` transaction on the
/// single connection, committed or rolled back explicitly.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open(storage_dir: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(busy_timeout)?;
        install_schema(&conn)?;
        debug!(path = %db_path.display(), "sqlite catalog opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        install_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sqlite_schema::full_schema_sql())?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", sqlite_schema::SCHEMA_VERSION],
    )?;
    Ok(())
}

fn version_table(kind: ItemKind) -> String {
    format!("{}_version", kind.as_str())
}

impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        Ok(Box::new(SqliteUnit::begin(self.conn.lock())?))
    }

    fn tags(&self, scope: TagScope, owner_id: i64) -> Result<Vec<TagRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {owner}, key, value, type FROM {table} WHERE {owner}=?1 ORDER BY key",
            owner = scope.owner_column(),
            table = scope.table(),
        ))?;
        let mut rows = stmt.query(params![owner_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(TagRow {
                owner_id: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
                value_type: row.get(3)?,
            });
        }
        Ok(out)
    }

    fn tag_owners(&self, scope: TagScope, key: &str) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {owner} FROM {table} WHERE key=?1 ORDER BY {owner}",
            owner = scope.owner_column(),
            table = scope.table(),
        ))?;
        let ids = stmt
            .query_map(params![key], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn successors(&self, item_id: i64) -> Result<Vec<VersionSuccessor>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, item_id, from_version_id, to_version_id FROM version_successor \
             WHERE item_id=?1 ORDER BY id",
        )?;
        let edges = stmt
            .query_map(params![item_id], |row| {
                Ok(VersionSuccessor {
                    id: row.get(0)?,
                    item_id: row.get(1)?,
                    from_version_id: row.get(2)?,
                    to_version_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn item(&self, kind: ItemKind, id: i64) -> Result<Option<ItemRow>, StoreError> {
        let conn = self.conn.lock();
        select_item(&conn, kind, "id", &id)
    }

    fn item_kind(&self, id: i64) -> Result<Option<ItemKind>, StoreError> {
        let conn = self.conn.lock();
        let stored = conn
            .query_row("SELECT kind FROM item WHERE id=?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        stored
            .map(|raw| {
                ItemKind::parse(&raw)
                    .ok_or_else(|| StoreError::Backend(format!("item {id} has unknown kind {raw:?}")))
            })
            .transpose()
    }

    fn item_by_source_key(
        &self,
        kind: ItemKind,
        source_key: &str,
    ) -> Result<Option<ItemRow>, StoreError> {
        let conn = self.conn.lock();
        select_item(&conn, kind, "source_key", &source_key)
    }

    fn rich_version(&self, id: i64) -> Result<Option<RichVersionRow>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, structure_version_id, reference, reference_parameters \
                 FROM rich_version WHERE id=?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, structure_version_id, reference, parameters)) = row else {
            return Ok(None);
        };
        Ok(Some(RichVersionRow {
            id,
            structure_version_id,
            reference,
            reference_parameters: serde_json::from_str(&parameters)?,
        }))
    }

    fn version(&self, kind: ItemKind, id: i64) -> Result<Option<VersionRow>, StoreError> {
        let conn = self.conn.lock();
        let row = match kind {
            ItemKind::Node => conn
                .query_row(
                    "SELECT id, node_id FROM node_version WHERE id=?1",
                    params![id],
                    |row| {
                        Ok(VersionRow::Node {
                            id: row.get(0)?,
                            node_id: row.get(1)?,
                        })
                    },
                )
                .optional()?,
            ItemKind::Edge => conn
                .query_row(
                    "SELECT id, edge_id, from_node_version_start_id, from_node_version_end_id, \
                     to_node_version_start_id, to_node_version_end_id FROM edge_version WHERE id=?1",
                    params![id],
                    |row| {
                        Ok(VersionRow::Edge {
                            id: row.get(0)?,
                            edge_id: row.get(1)?,
                            from_node_version_start_id: row.get(2)?,
                            from_node_version_end_id: row.get(3)?,
                            to_node_version_start_id: row.get(4)?,
                            to_node_version_end_id: row.get(5)?,
                        })
                    },
                )
                .optional()?,
            ItemKind::Structure => {
                let row = conn
                    .query_row(
                        "SELECT id, structure_id, attributes FROM structure_version WHERE id=?1",
                        params![id],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                match row {
                    Some((id, structure_id, attributes)) => Some(VersionRow::Structure {
                        id,
                        structure_id,
                        attributes: serde_json::from_str::<BTreeMap<String, String>>(
                            &attributes,
                        )?,
                    }),
                    None => None,
                }
            }
            ItemKind::LineageEdge => conn
                .query_row(
                    "SELECT id, lineage_edge_id, from_rich_version_id, to_rich_version_id \
                     FROM lineage_edge_version WHERE id=?1",
                    params![id],
                    |row| {
                        Ok(VersionRow::LineageEdge {
                            id: row.get(0)?,
                            lineage_edge_id: row.get(1)?,
                            from_rich_version_id: row.get(2)?,
                            to_rich_version_id: row.get(3)?,
                        })
                    },
                )
                .optional()?,
        };
        Ok(row)
    }

    fn max_assigned_id(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let max = conn.query_row(
            "SELECT MAX(m) FROM ( \
               SELECT MAX(id) AS m FROM item \
               UNION ALL SELECT MAX(id) FROM rich_version \
               UNION ALL SELECT MAX(id) FROM version_successor)",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max.unwrap_or(0))
    }
}

fn select_item(
    conn: &Connection,
    kind: ItemKind,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<ItemRow>, StoreError> {
    let columns = match kind {
        ItemKind::Edge => "id, name, source_key, from_node_id, to_node_id",
        _ => "id, name, source_key, NULL, NULL",
    };
    let sql = format!(
        "SELECT {columns} FROM {table} WHERE {column}=?1",
        table = kind.as_str()
    );
    let row = conn
        .query_row(&sql, &[value], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })
        .optional()?;
    Ok(row.map(|(id, name, source_key, from, to)| ItemRow {
        id,
        kind,
        name,
        source_key,
        endpoints: from.zip(to),
    }))
}

fn apply_write(conn: &Connection, write: &Write) -> Result<(), StoreError> {
    match write {
        Write::InsertItem(row) => {
            conn.execute(
                "INSERT INTO item(id, kind) VALUES (?1, ?2)",
                params![row.id, row.kind.as_str()],
            )
            .map_err(map_insert_conflict)?;
            match (row.kind, row.endpoints) {
                (ItemKind::Edge, Some((from_node_id, to_node_id))) => conn.execute(
                    "INSERT INTO edge(id, name, source_key, from_node_id, to_node_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.id, row.name, row.source_key, from_node_id, to_node_id],
                ),
                (ItemKind::Edge, None) => {
                    return Err(StoreError::InvalidArgument(
                        "edge row requires endpoints".to_string(),
                    ));
                }
                (kind, _) => conn.execute(
                    &format!(
                        "INSERT INTO {}(id, name, source_key) VALUES (?1, ?2, ?3)",
                        kind.as_str()
                    ),
                    params![row.id, row.name, row.source_key],
                ),
            }
            .map_err(map_insert_conflict)?;
        }
        Write::InsertTag { scope, row } => {
            conn.execute(
                &format!(
                    "INSERT INTO {table}({owner}, key, value, type) VALUES (?1, ?2, ?3, ?4)",
                    table = scope.table(),
                    owner = scope.owner_column(),
                ),
                params![row.owner_id, row.key, row.value, row.value_type],
            )
            .map_err(map_insert_conflict)?;
        }
        Write::InsertRichVersion(row) => {
            conn.execute(
                "INSERT INTO rich_version(id, structure_version_id, reference, reference_parameters) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id,
                    row.structure_version_id,
                    row.reference,
                    serde_json::to_string(&row.reference_parameters)?
                ],
            )
            .map_err(map_insert_conflict)?;
        }
        Write::InsertVersion(row) => {
            insert_version(conn, row).map_err(map_insert_conflict)?;
        }
        Write::InsertSuccessor(edge) => {
            conn.execute(
                "INSERT INTO version_successor(id, item_id, from_version_id, to_version_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    edge.id,
                    edge.item_id,
                    edge.from_version_id,
                    edge.to_version_id
                ],
            )
            .map_err(map_insert_conflict)?;
        }
        Write::DeleteSuccessor { id } => {
            conn.execute("DELETE FROM version_successor WHERE id=?1", params![id])?;
        }
        Write::DeleteVersion { kind, id } => {
            conn.execute(
                "DELETE FROM rich_version_tag WHERE rich_version_id=?1",
                params![id],
            )?;
            conn.execute("DELETE FROM rich_version WHERE id=?1", params![id])?;
            conn.execute(
                &format!("DELETE FROM {} WHERE id=?1", version_table(*kind)),
                params![id],
            )?;
        }
    }
    Ok(())
}

fn insert_version(conn: &Connection, row: &VersionRow) -> rusqlite::Result<usize> {
    match row {
        VersionRow::Node { id, node_id } => conn.execute(
            "INSERT INTO node_version(id, node_id) VALUES (?1, ?2)",
            params![id, node_id],
        ),
        VersionRow::Edge {
            id,
            edge_id,
            from_node_version_start_id,
            from_node_version_end_id,
            to_node_version_start_id,
            to_node_version_end_id,
        } => conn.execute(
            "INSERT INTO edge_version(id, edge_id, from_node_version_start_id, from_node_version_end_id, \
             to_node_version_start_id, to_node_version_end_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                edge_id,
                from_node_version_start_id,
                from_node_version_end_id,
                to_node_version_start_id,
                to_node_version_end_id
            ],
        ),
        VersionRow::Structure {
            id,
            structure_id,
            attributes,
        } => {
            let attributes = serde_json::to_string(attributes)
                .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
            conn.execute(
                "INSERT INTO structure_version(id, structure_id, attributes) VALUES (?1, ?2, ?3)",
                params![id, structure_id, attributes],
            )
        }
        VersionRow::LineageEdge {
            id,
            lineage_edge_id,
            from_rich_version_id,
            to_rich_version_id,
        } => conn.execute(
            "INSERT INTO lineage_edge_version(id, lineage_edge_id, from_rich_version_id, to_rich_version_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![id, lineage_edge_id, from_rich_version_id, to_rich_version_id],
        ),
    }
}

struct SqliteUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
}

impl<'a> SqliteUnit<'a> {
    fn begin(conn: MutexGuard<'a, Connection>) -> Result<Self, StoreError> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, open: true })
    }

    fn rollback(&mut self) {
        self.open = false;
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %err, "sqlite rollback failed");
        }
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        apply_write(&self.conn, write)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                self.open = false;
                Ok(())
            }
            Err(err) => {
                self.rollback();
                Err(err.into())
            }
        }
    }

    fn abort(mut self: Box<Self>) {
        self.rollback();
    }
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if self.open {
            warn!("sqlite unit of work dropped without commit; rolling back");
            self.rollback();
        }
    }
}
