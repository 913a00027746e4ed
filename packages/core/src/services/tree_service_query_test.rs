//! Tests for Structural Queries and Hierarchical Exports

#[cfg(test)]
mod query_tests {
    use crate::db::{MemoryStore, NodeChanges, NodeFilter, NodeStore, StoreTransaction};
    use crate::models::TreeConfig;
    use crate::services::{to_hierarchy, NewNode, TreeService, TreeServiceError};
    use serde_json::json;
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

    fn ids(rows: &[crate::models::Node]) -> Vec<&str> {
        rows.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_roots_and_root() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let roots = service.roots(None).await.unwrap();
        assert_eq!(ids(&roots), ["root1", "root2"]);
        assert_eq!(service.root(None).await.unwrap().unwrap().id, "root1");
    }

    #[tokio::test]
    async fn test_children_in_tree_order() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let children = service.children("root1").await.unwrap();
        assert_eq!(ids(&children), ["child1", "child2", "child3"]);
        assert!(service.children("child1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_siblings() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let siblings = service.siblings("child2").await.unwrap();
        assert_eq!(ids(&siblings), ["child1", "child3"]);

        let with_self = service.siblings_and_self("child2").await.unwrap();
        assert_eq!(ids(&with_self), ["child1", "child2", "child3"]);

        // roots are each other's siblings
        let root_siblings = service.siblings("root1").await.unwrap();
        assert_eq!(ids(&root_siblings), ["root2"]);
    }

    #[tokio::test]
    async fn test_left_and_right_sibling() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        assert!(service.left_sibling("child1").await.unwrap().is_none());
        assert_eq!(
            service.left_sibling("child2").await.unwrap().unwrap().id,
            "child1"
        );
        assert_eq!(
            service.right_sibling("child2").await.unwrap().unwrap().id,
            "child3"
        );
        assert!(service.right_sibling("child3").await.unwrap().is_none());
        // an only child has neither
        assert!(service.left_sibling("child2_1").await.unwrap().is_none());
        assert!(service.right_sibling("child2_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ancestors_and_get_root() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let chain = service.ancestors_and_self("child2_1").await.unwrap();
        assert_eq!(ids(&chain), ["root1", "child2", "child2_1"]);

        let ancestors = service.ancestors("child2_1").await.unwrap();
        assert_eq!(ids(&ancestors), ["root1", "child2"]);

        assert_eq!(service.get_root("child2_1").await.unwrap().id, "root1");
        assert_eq!(service.get_root("root2").await.unwrap().id, "root2");
        assert!(service.ancestors("root1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_descendants() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let all = service.descendants_and_self("root1").await.unwrap();
        assert_eq!(ids(&all), ["root1", "child1", "child2", "child2_1", "child3"]);

        let strict = service.descendants("root1").await.unwrap();
        assert_eq!(ids(&strict), ["child1", "child2", "child2_1", "child3"]);

        assert!(service.descendants("child1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_descendants_limited_by_depth() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let one_level = service.descendants_limit_depth("root1", 1).await.unwrap();
        assert_eq!(ids(&one_level), ["child1", "child2", "child3"]);

        let with_self = service
            .descendants_and_self_limit_depth("root1", 1)
            .await
            .unwrap();
        assert_eq!(ids(&with_self), ["root1", "child1", "child2", "child3"]);

        let two_levels = service.descendants_limit_depth("root1", 2).await.unwrap();
        assert_eq!(ids(&two_levels), ["child1", "child2", "child2_1", "child3"]);
    }

    #[tokio::test]
    async fn test_leaves_and_trunks() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let leaves = service.all_leaves(None).await.unwrap();
        assert_eq!(ids(&leaves), ["child1", "child2_1", "child3", "root2"]);

        // trunk = positioned, below a root, with children
        let trunks = service.all_trunks(None).await.unwrap();
        assert_eq!(ids(&trunks), ["child2"]);
    }

    #[tokio::test]
    async fn test_level_walks_parent_chain() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        assert_eq!(service.level("root1").await.unwrap(), 0);
        assert_eq!(service.level("child2").await.unwrap(), 1);
        assert_eq!(service.level("child2_1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_node() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        assert!(service.get_node("child3").await.unwrap().is_some());
        assert!(service.get_node("nope").await.unwrap().is_none());

        let err = service.ancestors("nope").await.unwrap_err();
        assert!(matches!(err, TreeServiceError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_to_hierarchy_nests_flat_result() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let flat = service.descendants_and_self("root1").await.unwrap();
        let trees = to_hierarchy(flat);

        assert_eq!(trees.len(), 1);
        let root = &trees[0];
        assert_eq!(root.node.id, "root1");
        assert_eq!(
            root.children.iter().map(|t| t.node.id.as_str()).collect::<Vec<_>>(),
            ["child1", "child2", "child3"]
        );
        assert_eq!(root.children[1].children[0].node.id, "child2_1");
        assert!(root.children[1].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_to_hierarchy_orphans_become_top_level() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        // a strict-descendants slice has no root1 row for the children to
        // attach to
        let flat = service.descendants("root1").await.unwrap();
        let trees = to_hierarchy(flat);
        assert_eq!(
            trees.iter().map(|t| t.node.id.as_str()).collect::<Vec<_>>(),
            ["child1", "child2", "child3"]
        );
        assert_eq!(trees[1].children[0].node.id, "child2_1");
    }

    #[tokio::test]
    async fn test_get_nested_list_indents_by_depth() {
        let (service, _store) = create_test_service().await;
        seed_tree(&service).await;

        let list = service.get_nested_list(None, "name", "  ").await.unwrap();
        let expected = [
            ("root1", "root1"),
            ("child1", "  child1"),
            ("child2", "  child2"),
            ("child2_1", "    child2_1"),
            ("child3", "  child3"),
            ("root2", "root2"),
        ];
        let got: Vec<(&str, &str)> = list.iter().map(|(id, l)| (id.as_str(), l.as_str())).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_is_valid_nested_set_detects_corruption() {
        let (service, store) = create_test_service().await;
        seed_tree(&service).await;
        assert!(service.is_valid_nested_set(None).await.unwrap());

        let mut tx = store.begin().await.unwrap();
        tx.update_where(
            &NodeFilter::new().with_id("child1"),
            &NodeChanges::new().with_left(99),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(!service.is_valid_nested_set(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_scoped_queries_stay_in_partition() {
        let config = TreeConfig::new().with_scope_columns(vec!["org".to_string()]);
        let (service, _store) = create_test_service_with(config).await;
        for (id, org, parent) in [
            ("a", 1, None),
            ("a1", 1, Some("a")),
            ("b", 2, None),
            ("b1", 2, Some("b")),
        ] {
            let mut params = NewNode::new(json!({"org": org, "name": id})).with_id(id);
            if let Some(parent) = parent {
                params = params.with_parent(parent);
            }
            service.create(params).await.unwrap();
        }

        let scope_one = service.get_node("a").await.unwrap().unwrap();
        let scope_key = scope_one.scope_key(service.config());
        assert_eq!(ids(&service.roots(Some(&scope_key)).await.unwrap()), ["a"]);
        assert_eq!(
            ids(&service.descendants_and_self("a").await.unwrap()),
            ["a", "a1"]
        );
        // both partitions validate even though their intervals coincide
        assert!(service.is_valid_nested_set(None).await.unwrap());
        assert!(service.is_valid_nested_set(Some(&scope_key)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sibling_order_follows_order_column() {
        let config = TreeConfig::new().with_order_column("rank");
        let (service, _store) = create_test_service_with(config).await;
        service
            .create(NewNode::new(json!({"rank": 1})).with_id("r"))
            .await
            .unwrap();
        for (id, rank) in [("c", 3), ("a", 1), ("b", 2)] {
            service
                .create(NewNode::new(json!({"rank": rank})).with_id(id).with_parent("r"))
                .await
                .unwrap();
        }

        // listing follows the order column
        assert_eq!(ids(&service.children("r").await.unwrap()), ["a", "b", "c"]);
        // adjacency follows tree position: intervals sit in creation order
        // (c, a, b) because each create appends as the last child
        assert_eq!(service.left_sibling("a").await.unwrap().unwrap().id, "c");
        assert_eq!(service.right_sibling("a").await.unwrap().unwrap().id, "b");
        assert!(service.right_sibling("b").await.unwrap().is_none());
    }
}
