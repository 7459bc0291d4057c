#![forbid(unsafe_code)]

use lc_core::model::{Edge, Node, NodeVersion};
use lc_storage::{BackendKind, Catalog, CatalogConfig, ErrorKind, SqliteBackend};
use std::time::Duration;

fn config(dir: &tempfile::TempDir) -> CatalogConfig {
    CatalogConfig {
        backend: BackendKind::Sqlite,
        storage_dir: dir.path().to_path_buf(),
        ..CatalogConfig::default()
    }
}

fn create_node(catalog: &Catalog, source_key: &str) -> Node {
    catalog
        .create_item(&Node {
            name: source_key.to_string(),
            source_key: source_key.to_string(),
            ..Node::default()
        })
        .expect("create node")
}

#[test]
fn reopened_catalog_keeps_history_and_never_reuses_ids() {
    let dir = tempfile::tempdir().expect("temp dir");

    let (node, v1, v2) = {
        let catalog = Catalog::open(&config(&dir)).expect("open catalog");
        let node = create_node(&catalog, "orders");
        let v1 = catalog
            .create_version(
                &NodeVersion {
                    node_id: node.item.id,
                    ..NodeVersion::default()
                },
                &[],
            )
            .expect("v1");
        let v2 = catalog
            .create_version(
                &NodeVersion {
                    node_id: node.item.id,
                    ..NodeVersion::default()
                },
                &[v1.rich.id],
            )
            .expect("v2");
        (node, v1.rich.id, v2.rich.id)
    };

    let catalog = Catalog::open(&config(&dir)).expect("reopen catalog");
    assert_eq!(catalog.leaves(node.item.id).expect("leaves"), vec![v2]);
    let loaded: Node = catalog
        .retrieve_item_by_source_key("orders")
        .expect("lookup by source key");
    assert_eq!(loaded, node);

    let other = create_node(&catalog, "customers");
    let v3 = catalog
        .create_version(
            &NodeVersion {
                node_id: node.item.id,
                ..NodeVersion::default()
            },
            &[v2],
        )
        .expect("v3")
        .rich
        .id;
    let max_before_reopen = [node.item.id, v1, v2].into_iter().max().unwrap_or_default();
    assert!(other.item.id > max_before_reopen);
    assert!(v3 > max_before_reopen);
}

#[test]
fn database_file_lives_in_the_storage_dir() {
    let dir = tempfile::tempdir().expect("temp dir");
    let backend = SqliteBackend::open(dir.path(), Duration::from_millis(100)).expect("open");
    let path = backend.db_path().expect("file backed").to_path_buf();
    assert!(path.starts_with(dir.path()));
    assert!(path.exists());
}

#[test]
fn unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().expect("temp dir");
    let catalog = Catalog::open(&config(&dir)).expect("open catalog");

    let err = catalog.retrieve_item::<Node>(31_337).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = catalog.retrieve_item_by_source_key::<Node>("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = catalog.retrieve_version::<NodeVersion>(31_337).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = catalog
        .create_item(&Edge {
            name: "flow".to_string(),
            source_key: "flow".to_string(),
            from_node_id: 1,
            to_node_id: 2,
            ..Edge::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn invalid_machine_layout_is_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Catalog::open(&CatalogConfig {
        machine_id: 4,
        num_machines: 4,
        ..config(&dir)
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
