use super::*;

fn chain(item_id: i64, versions: &[i64]) -> VersionHistoryDag {
    let mut dag = VersionHistoryDag::empty(item_id);
    let mut parent = ROOT_VERSION_ID;
    for (edge_id, version) in versions.iter().enumerate() {
        dag.add_edge(1000 + edge_id as i64, parent, *version)
            .expect("chain edge");
        parent = *version;
    }
    dag
}

#[test]
fn empty_dag_has_no_leaves() {
    let dag = VersionHistoryDag::empty(7);
    assert!(dag.is_empty());
    assert!(dag.leaves().is_empty());
    assert!(dag.contains_version(ROOT_VERSION_ID));
    assert!(!dag.contains_version(1));
}

#[test]
fn leaves_follow_the_newest_versions() {
    let mut dag = VersionHistoryDag::empty(7);
    dag.add_edge(100, ROOT_VERSION_ID, 1).unwrap();
    assert_eq!(dag.leaves(), vec![1]);

    dag.add_edge(101, 1, 2).unwrap();
    assert_eq!(dag.leaves(), vec![2]);
    assert!(dag.contains_version(1));

    dag.add_edge(102, 1, 3).unwrap();
    assert_eq!(dag.leaves(), vec![2, 3]);
}

#[test]
fn merge_version_with_two_parents() {
    let mut dag = VersionHistoryDag::empty(7);
    dag.add_edge(100, ROOT_VERSION_ID, 1).unwrap();
    dag.add_edge(101, 1, 2).unwrap();
    dag.add_edge(102, 1, 3).unwrap();
    dag.add_edge(103, 2, 4).unwrap();
    dag.add_edge(104, 3, 4).unwrap();
    assert_eq!(dag.leaves(), vec![4]);
    assert_eq!(dag.parents_of(4).collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn unknown_parent_is_rejected_without_mutation() {
    let mut dag = chain(7, &[1]);
    let before = dag.clone();
    assert_eq!(
        dag.add_edge(200, 99, 2).unwrap_err(),
        DagError::InvalidParent { parent: 99, item: 7 }
    );
    assert_eq!(dag, before);
}

#[test]
fn cycles_and_root_children_are_rejected() {
    let mut dag = chain(7, &[1, 2, 3]);
    assert!(matches!(dag.add_edge(300, 3, 1), Err(DagError::Cycle { .. })));
    assert!(matches!(dag.add_edge(301, 2, 2), Err(DagError::Cycle { .. })));
    assert_eq!(
        dag.add_edge(302, 1, ROOT_VERSION_ID).unwrap_err(),
        DagError::RootAsChild { item: 7 }
    );
}

#[test]
fn rebuild_is_order_independent() {
    let dag = chain(7, &[1, 2, 3]);
    let mut reversed: Vec<VersionSuccessor> = dag.edges().to_vec();
    reversed.reverse();
    let rebuilt = VersionHistoryDag::from_edges(7, reversed).expect("rebuild");
    assert_eq!(rebuilt.leaves(), dag.leaves());
    assert_eq!(
        rebuilt.versions().collect::<Vec<_>>(),
        dag.versions().collect::<Vec<_>>()
    );
}

#[test]
fn rebuild_rejects_dangling_foreign_and_cyclic_edges() {
    let edge = |id, from, to| VersionSuccessor {
        id,
        item_id: 7,
        from_version_id: from,
        to_version_id: to,
    };
    assert_eq!(
        VersionHistoryDag::from_edges(7, [edge(1, 5, 6)]).unwrap_err(),
        DagError::DanglingParent { parent: 5, item: 7 }
    );
    assert!(matches!(
        VersionHistoryDag::from_edges(8, [edge(1, 0, 6)]),
        Err(DagError::ForeignEdge { .. })
    ));
    assert!(matches!(
        VersionHistoryDag::from_edges(7, [edge(1, 0, 1), edge(2, 1, 2), edge(3, 2, 1)]),
        Err(DagError::Cycle { .. })
    ));
}

#[test]
fn truncate_one_level_roots_the_parent_of_the_leaf() {
    let mut dag = chain(7, &[1, 2, 3]);
    let leaves_before = dag.leaves();
    let plan = dag.plan_truncation(1).expect("plan");

    assert_eq!(plan.retained.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(plan.removed_versions.iter().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(plan.removed_edges.len(), 2);
    assert_eq!(plan.new_roots, vec![2]);

    let mut next = 500;
    let roots = dag.apply_truncation(&plan, || {
        next += 1;
        next
    });
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].from_version_id, ROOT_VERSION_ID);
    assert_eq!(roots[0].to_version_id, 2);
    assert_eq!(dag.leaves(), leaves_before);
    assert!(!dag.contains_version(1));
    assert_eq!(dag.parents_of(2).count(), 0);
    assert!(VersionHistoryDag::from_edges(7, dag.edges().to_vec()).is_ok());
}

#[test]
fn truncate_deeper_than_history_is_a_noop() {
    let dag = chain(7, &[1, 2, 3]);
    let plan = dag.plan_truncation(2).expect("plan");
    assert!(plan.is_noop());
    assert!(dag.plan_truncation(50).expect("plan").is_noop());
}

#[test]
fn truncate_requires_positive_depth() {
    let dag = chain(7, &[1, 2]);
    assert_eq!(dag.plan_truncation(0).unwrap_err(), DagError::InvalidDepth(0));
    assert_eq!(dag.plan_truncation(-3).unwrap_err(), DagError::InvalidDepth(-3));
}

#[test]
fn truncate_keeps_every_branch_frontier() {
    // 1 -> 2 -> 3 -> 4 and 1 -> 5
    let mut dag = chain(7, &[1, 2, 3, 4]);
    dag.add_edge(900, 1, 5).unwrap();
    let plan = dag.plan_truncation(1).expect("plan");

    assert_eq!(
        plan.retained.iter().copied().collect::<Vec<_>>(),
        vec![1, 3, 4, 5]
    );
    assert_eq!(plan.removed_versions.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(plan.new_roots, vec![3]);

    let leaves_before = dag.leaves();
    dag.apply_truncation(&plan, || 901);
    assert_eq!(dag.leaves(), leaves_before);
    assert_eq!(dag.parents_of(5).collect::<Vec<_>>(), vec![1]);
}

#[test]
fn truncate_drops_only_the_removed_parent_of_a_merge() {
    // 1 -> 2 -> 4, 3 -> 4 where 3 is a separate root
    let mut dag = chain(7, &[1, 2, 4]);
    dag.add_edge(800, ROOT_VERSION_ID, 3).unwrap();
    dag.add_edge(801, 3, 4).unwrap();
    let plan = dag.plan_truncation(1).expect("plan");

    assert_eq!(plan.retained.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    assert_eq!(plan.new_roots, vec![2]);
    dag.apply_truncation(&plan, || 802);
    assert_eq!(dag.leaves(), vec![4]);
    assert_eq!(dag.parents_of(4).collect::<Vec<_>>(), vec![2, 3]);
}
