#![forbid(unsafe_code)]

pub(super) const SCHEMA_VERSION: &str = "v1";

pub(super) const PRAGMAS: &str = r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
"#;

pub(super) const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS item (
          id INTEGER PRIMARY KEY,
          kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS item_tag (
          item_id INTEGER NOT NULL,
          key TEXT NOT NULL,
          value TEXT,
          type TEXT,
          PRIMARY KEY (item_id, key)
        );

        CREATE TABLE IF NOT EXISTS rich_version (
          id INTEGER PRIMARY KEY,
          structure_version_id INTEGER,
          reference TEXT,
          reference_parameters TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rich_version_tag (
          rich_version_id INTEGER NOT NULL,
          key TEXT NOT NULL,
          value TEXT,
          type TEXT,
          PRIMARY KEY (rich_version_id, key)
        );

        CREATE TABLE IF NOT EXISTS version_successor (
          id INTEGER PRIMARY KEY,
          item_id INTEGER NOT NULL,
          from_version_id INTEGER NOT NULL,
          to_version_id INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS node (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          source_key TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS edge (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          source_key TEXT NOT NULL UNIQUE,
          from_node_id INTEGER NOT NULL,
          to_node_id INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS structure (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          source_key TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS lineage_edge (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          source_key TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS node_version (
          id INTEGER PRIMARY KEY,
          node_id INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS edge_version (
          id INTEGER PRIMARY KEY,
          edge_id INTEGER NOT NULL,
          from_node_version_start_id INTEGER NOT NULL,
          from_node_version_end_id INTEGER,
          to_node_version_start_id INTEGER NOT NULL,
          to_node_version_end_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS structure_version (
          id INTEGER PRIMARY KEY,
          structure_id INTEGER NOT NULL,
          attributes TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lineage_edge_version (
          id INTEGER PRIMARY KEY,
          lineage_edge_id INTEGER NOT NULL,
          from_rich_version_id INTEGER NOT NULL,
          to_rich_version_id INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_version_successor_item ON version_successor(item_id);
        CREATE INDEX IF NOT EXISTS idx_item_tag_key ON item_tag(key);
        CREATE INDEX IF NOT EXISTS idx_rich_version_tag_key ON rich_version_tag(key);
"#;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(PRAGMAS);
    sql.push_str(SQL);
    sql
}
