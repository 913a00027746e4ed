//! Tests for Structural Moves and the Two-Phase Update
//!
//! Each test seeds the reference forest
//!
//! ```text
//! Root1 (1,10)
//!   Child1 (2,3)
//!   Child2 (4,7)
//!     Child2.1 (5,6)
//!   Child3 (8,9)
//! Root2 (11,12)
//! ```
//!
//! and asserts the interval layout after each move against hand-computed
//! values, plus the structural validity of the whole forest.

#[cfg(test)]
mod move_tests {
    use crate::db::{MemoryStore, NodeFilter, NodeStore, StoreTransaction};
    use crate::models::{Node, TreeConfig};
    use crate::services::{MoveEvent, MoveObserver, NewNode, TreeService, TreeServiceError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn create_test_service() -> (Arc<TreeService>, Arc<MemoryStore>) {
        create_test_service_with(TreeConfig::new()).await
    }

    async fn create_test_service_with(config: TreeConfig) -> (Arc<TreeService>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(TreeService::new(store.clone(), config));
        (service, store)
    }

    async fn seed_tree(service: &TreeService) {
        for (id, parent) in [
            ("root1", None),
            ("child1", Some("root1")),
            ("child2", Some("root1")),
            ("child2_1", Some("child2")),
            ("child3", Some("root1")),
            ("root2", None),
        ] {
            let mut params = NewNode::new(json!({"name": id})).with_id(id);
            if let Some(parent) = parent {
                params = params.with_parent(parent);
            }
            service.create(params).await.unwrap();
        }
    }

    async fn assert_bounds(store: &MemoryStore, id: &str, left: i64, right: i64) {
        let node = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(node.bounds(), Some((left, right)), "bounds of {id}");
    }

    async fn fetch(store: &MemoryStore, id: &str) -> Node {
        store.find_by_id(id).await.unwrap().unwrap()
    }

    fn layout(mut rows: Vec<Node>) -> Vec<(String, Option<i64>, Option<i64>, i64, Option<String>)> {
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows.into_iter()
            .map(|n| (n.id, n.left, n.right, n.depth, n.parent_id))
            .collect()
    }

    #[tokio::test]
    async fn test_create_builds_reference_layout() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        assert_bounds(&store, "root1", 1, 10).await;
        assert_bounds(&store, "child1", 2, 3).await;
        assert_bounds(&store, "child2", 4, 7).await;
        assert_bounds(&store, "child2_1", 5, 6).await;
        assert_bounds(&store, "child3", 8, 9).await;
        assert_bounds(&store, "root2", 11, 12).await;

        assert_eq!(fetch(&store, "root1").await.depth, 0);
        assert_eq!(fetch(&store, "child2").await.depth, 1);
        assert_eq!(fetch(&store, "child2_1").await.depth, 2);
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_left_swaps_with_nearest_sibling() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        service.move_left("child2").await.unwrap();

        assert!(service.left_sibling("child2").await.unwrap().is_none());
        let right = service.right_sibling("child2").await.unwrap().unwrap();
        assert_eq!(right.id, "child1");

        assert_bounds(&store, "child2", 2, 5).await;
        assert_bounds(&store, "child2_1", 3, 4).await;
        assert_bounds(&store, "child1", 6, 7).await;
        assert_bounds(&store, "child3", 8, 9).await;
        assert_bounds(&store, "root1", 1, 10).await;

        // depths unchanged by a sibling reorder
        assert_eq!(fetch(&store, "child2").await.depth, 1);
        assert_eq!(fetch(&store, "child2_1").await.depth, 2);
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_make_child_of_sibling() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let moved = service.make_child_of("child1", "child3").await.unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("child3"));
        assert_eq!(moved.depth, 2);

        assert_bounds(&store, "root1", 1, 10).await;
        assert_bounds(&store, "child2", 2, 5).await;
        assert_bounds(&store, "child2_1", 3, 4).await;
        assert_bounds(&store, "child3", 6, 9).await;
        assert_bounds(&store, "child1", 7, 8).await;
        assert_bounds(&store, "root2", 11, 12).await;
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_subtree_under_new_root() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        service
            .create(NewNode::new(json!({"name": "root3"})).with_id("root3"))
            .await
            .unwrap();
        assert_bounds(&store, "root3", 13, 14).await;

        service.make_child_of("root1", "root3").await.unwrap();

        assert_bounds(&store, "root2", 1, 2).await;
        assert_bounds(&store, "root3", 3, 14).await;
        assert_bounds(&store, "root1", 4, 13).await;
        // relative positions inside the moved subtree are preserved
        assert_bounds(&store, "child1", 5, 6).await;
        assert_bounds(&store, "child2", 7, 10).await;
        assert_bounds(&store, "child2_1", 8, 9).await;
        assert_bounds(&store, "child3", 11, 12).await;

        assert_eq!(fetch(&store, "root1").await.depth, 1);
        assert_eq!(fetch(&store, "child2_1").await.depth, 3);
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_make_root_detaches_subtree() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let node = service.make_root("child2").await.unwrap();
        assert!(node.parent_id.is_none());
        assert_eq!(node.depth, 0);

        assert_bounds(&store, "root1", 1, 6).await;
        assert_bounds(&store, "child1", 2, 3).await;
        assert_bounds(&store, "child3", 4, 5).await;
        assert_bounds(&store, "root2", 7, 8).await;
        assert_bounds(&store, "child2", 9, 12).await;
        assert_bounds(&store, "child2_1", 10, 11).await;
        assert_eq!(fetch(&store, "child2_1").await.depth, 1);
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_to_descendant_rejected_without_mutation() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        let before = layout(store.snapshot().await);

        let err = service.make_child_of("root1", "child2_1").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::CannotMoveToDescendant { .. }));

        assert_eq!(layout(store.snapshot().await), before);
    }

    #[tokio::test]
    async fn test_move_to_self_rejected() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let err = service.make_child_of("child1", "child1").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::CannotMoveToSelf { .. }));
    }

    #[tokio::test]
    async fn test_noop_move_leaves_storage_untouched() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        let observer = Arc::new(CountingObserver::default());
        service.add_observer(observer.clone());
        let before = layout(store.snapshot().await);

        // child2 is already immediately right of child1
        service.move_to_right_of("child2", "child1").await.unwrap();

        assert_eq!(layout(store.snapshot().await), before);
        // a structural no-op never reaches the observers
        assert_eq!(observer.moving_calls.load(Ordering::SeqCst), 0);
        assert_eq!(observer.moved_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_move_past_edge_fails() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let err = service.move_left("child1").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NoTargetToResolve { .. }));

        let err = service.move_right("child3").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NoTargetToResolve { .. }));
    }

    #[tokio::test]
    async fn test_unpositioned_node_cannot_move() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(Node::new_with_id("raw".to_string(), json!({})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let err = service.make_child_of("raw", "root1").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NewNodeCannotMove { .. }));
    }

    #[tokio::test]
    async fn test_move_across_scopes_rejected() {
        let config = TreeConfig::new().with_scope_columns(vec!["org".to_string()]);
        let (service, store) = create_test_service_with(config).await;
        service
            .create(NewNode::new(json!({"org": 1})).with_id("a"))
            .await
            .unwrap();
        service
            .create(NewNode::new(json!({"org": 2})).with_id("b"))
            .await
            .unwrap();
        // scoped partitions number independently
        assert_bounds(&store, "a", 1, 2).await;
        assert_bounds(&store, "b", 1, 2).await;

        let err = service.make_child_of("b", "a").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::ScopeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_create_under_cross_scope_parent_rolls_back() {
        let config = TreeConfig::new().with_scope_columns(vec!["org".to_string()]);
        let (service, _store) = create_test_service_with(config).await;
        service
            .create(NewNode::new(json!({"org": 1})).with_id("a"))
            .await
            .unwrap();

        let err = service
            .create(NewNode::new(json!({"org": 2})).with_id("b").with_parent("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeServiceError::ScopeMismatch { .. }));
        // the insert rolled back together with the failed attach
        assert!(service.get_node("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_make_first_child_of() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let moved = service.make_first_child_of("child3", "child2").await.unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("child2"));

        assert_bounds(&store, "child2", 4, 9).await;
        assert_bounds(&store, "child3", 5, 6).await;
        assert_bounds(&store, "child2_1", 7, 8).await;
        assert!(service.is_valid_nested_set(None).await.unwrap());

        // an empty target degrades to a plain child move
        let moved = service.make_first_child_of("child1", "child2_1").await.unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("child2_1"));
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[derive(Default)]
    struct CountingObserver {
        moving_calls: AtomicUsize,
        moved_calls: AtomicUsize,
        veto: bool,
    }

    impl MoveObserver for CountingObserver {
        fn moving(&self, _event: &MoveEvent) -> bool {
            self.moving_calls.fetch_add(1, Ordering::SeqCst);
            !self.veto
        }

        fn moved(&self, _event: &MoveEvent) {
            self.moved_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_observer_veto_aborts_move() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        let observer = Arc::new(CountingObserver {
            veto: true,
            ..Default::default()
        });
        service.add_observer(observer.clone());
        let before = layout(store.snapshot().await);

        let err = service.make_child_of("child1", "child3").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::MoveVetoed { .. }));

        assert_eq!(layout(store.snapshot().await), before);
        assert_eq!(observer.moving_calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.moved_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_observer_notified_after_commit() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;
        let observer = Arc::new(CountingObserver::default());
        service.add_observer(observer.clone());

        service.make_child_of("child1", "child3").await.unwrap();
        assert_eq!(observer.moving_calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.moved_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_update_reparents() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let intent = service.begin_update("child1").await.unwrap();
        let node = service
            .commit_update(intent.set_parent(Some("child3".to_string())))
            .await
            .unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("child3"));
        assert_bounds(&store, "child3", 6, 9).await;
        assert_bounds(&store, "child1", 7, 8).await;
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_update_to_root() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let intent = service.begin_update("child2").await.unwrap();
        let node = service.commit_update(intent.set_parent(None)).await.unwrap();
        assert!(node.parent_id.is_none());
        assert_bounds(&store, "child2", 9, 12).await;
        assert!(service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_update_properties_without_move() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        let before = fetch(&store, "child1").await;

        let intent = service.begin_update("child1").await.unwrap();
        let node = service
            .commit_update(intent.merge_properties(json!({"name": "renamed", "extra": 7})))
            .await
            .unwrap();

        assert_eq!(node.property("name"), &json!("renamed"));
        assert_eq!(node.property("extra"), &json!(7));
        assert_eq!(node.bounds(), before.bounds());
        assert_eq!(node.parent_id, before.parent_id);
    }

    #[tokio::test]
    async fn test_commit_update_same_parent_is_not_a_move() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        let before = layout(store.snapshot().await);

        let intent = service.begin_update("child1").await.unwrap();
        service
            .commit_update(intent.set_parent(Some("root1".to_string())))
            .await
            .unwrap();
        assert_eq!(layout(store.snapshot().await), before);
    }

    #[tokio::test]
    async fn test_move_requires_target() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let err = service.make_child_of("child1", "nope").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unpositioned_target_rejected() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(Node::new_with_id("raw".to_string(), json!({})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let err = service.make_child_of("child1", "raw").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NoTargetToResolve { .. }));

        let filter = NodeFilter::new().with_id("child1");
        let rows = store.query(&filter).await.unwrap();
        assert_eq!(rows[0].bounds(), Some((2, 3)));
    }
}
