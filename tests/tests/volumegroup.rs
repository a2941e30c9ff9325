use apis::{
    Api, Informer, LocalVolume, LocalVolumeGroup, LocalVolumeGroupSpec, MemoryStore, ObjectKey,
    ObjectMeta, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodSpec, PodVolume,
    RecordStore, StorageClass, VolumeInfo, CSI_DRIVER_NAME, GIB, VOLUME_GROUP_FINALIZER,
};
use local_storage_tests::{eventually, fast_queue, init_tracing, local_volume, placed_volume};
use std::sync::Arc;
use volumegroup::{GroupError, GroupIndex, VolumeGroupManager};

const APPS: &str = "apps";
const CLASS: &str = "local-hdd";

struct Fixture {
    store: Arc<dyn RecordStore>,
    manager: Arc<VolumeGroupManager>,
}

impl Fixture {
    fn new() -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let manager = VolumeGroupManager::new(store.clone(), volumegroup::Config { queue: fast_queue() });
        Self { store, manager }
    }

    fn groups(&self) -> Api<LocalVolumeGroup> {
        Api::all(self.store.clone())
    }

    fn volumes(&self) -> Api<LocalVolume> {
        Api::all(self.store.clone())
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.store.clone(), APPS)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.store.clone(), APPS)
    }

    /// Creates the group and runs it through finalizer and indexing.
    async fn indexed_group(&self, group: LocalVolumeGroup) {
        let name = group.metadata.name.clone();
        self.groups().create(&group).await.unwrap();
        self.manager.process_group(&name).await.unwrap();
        self.manager.process_group(&name).await.unwrap();
    }

    async fn driver_class(&self) {
        Api::<StorageClass>::all(self.store.clone())
            .create(&StorageClass {
                metadata: ObjectMeta::named(CLASS),
                provisioner: CSI_DRIVER_NAME.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn claim(&self, name: &str) {
        self.claims().create(&claim(name, CLASS)).await.unwrap();
    }
}

fn group(name: &str, members: &[(&str, &str)], pods: &[&str]) -> LocalVolumeGroup {
    LocalVolumeGroup {
        metadata: ObjectMeta::named(name),
        spec: LocalVolumeGroupSpec {
            namespace: APPS.to_string(),
            volumes: members
                .iter()
                .map(|(pvc, lv)| VolumeInfo {
                    pvc_name: pvc.to_string(),
                    local_volume_name: lv.to_string(),
                })
                .collect(),
            pods: pods.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
    }
}

fn claim(name: &str, class: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta::namespaced(APPS, name),
        spec: PersistentVolumeClaimSpec {
            storage_class_name: class.to_string(),
            requested_bytes: GIB,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pod(name: &str, claims: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta::namespaced(APPS, name),
        spec: PodSpec {
            node_name: "node-1".to_string(),
            volumes: claims
                .iter()
                .map(|c| PodVolume {
                    name: format!("vol-{}", c),
                    claim_name: Some(c.to_string()),
                })
                .collect(),
        },
    }
}

fn grouped_volume(name: &str, group: &str, claim: &str, nodes: &[&str]) -> LocalVolume {
    let mut vol = if nodes.is_empty() {
        local_volume(name, GIB, 1)
    } else {
        placed_volume(name, GIB, nodes, -1)
    };
    vol.spec.volume_group = group.to_string();
    vol.spec.persistent_volume_claim_namespace = APPS.to_string();
    vol.spec.persistent_volume_claim_name = claim.to_string();
    vol
}

#[test]
fn test_index_insert_and_remove() {
    let mut index = GroupIndex::default();
    assert!(index.is_empty());

    index.insert_group(&group("group-1", &[("a", "pvc-a"), ("b", "")], &["web-0"]));
    index.insert_group(&group("group-2", &[("c", "pvc-c")], &[]));
    assert_eq!(index.volumes.get("pvc-a").map(String::as_str), Some("group-1"));
    assert!(!index.volumes.contains_key(""));
    assert_eq!(
        index.claims.get(&ObjectKey::new(APPS, "b")).map(String::as_str),
        Some("group-1")
    );
    assert_eq!(
        index.pods.get(&ObjectKey::new(APPS, "web-0")).map(String::as_str),
        Some("group-1")
    );

    index.remove_group("group-1");
    assert_eq!(index.volumes.len(), 1);
    assert!(index.pods.is_empty());
    index.remove_group("group-2");
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_group_is_protected_then_indexed() {
    let fx = Fixture::new();
    fx.groups()
        .create(&group("group-1", &[("a", "pvc-a")], &["web-0"]))
        .await
        .unwrap();

    fx.manager.process_group("group-1").await.unwrap();
    let stored = fx.groups().get("group-1").await.unwrap();
    assert!(stored.metadata.finalizers.contains(&VOLUME_GROUP_FINALIZER.to_string()));
    assert!(fx.manager.index().await.is_empty());

    fx.manager.process_group("group-1").await.unwrap();
    assert_eq!(fx.manager.group_name_for_volume("pvc-a").await.as_deref(), Some("group-1"));
    assert_eq!(fx.manager.group_name_for_claim(APPS, "a").await.as_deref(), Some("group-1"));
    assert_eq!(
        fx.manager.group_by_volume("pvc-a").await.unwrap().unwrap().metadata.name,
        "group-1"
    );
    assert!(fx.manager.group_by_volume("pvc-z").await.unwrap().is_none());
    // the claim lookup falls back to the stored groups
    assert!(fx.manager.group_by_claim("other", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_nodes_follow_volume_placement() {
    let fx = Fixture::new();
    fx.volumes()
        .create(&grouped_volume("pvc-a", "group-1", "a", &["node-2", "node-1"]))
        .await
        .unwrap();
    fx.volumes()
        .create(&grouped_volume("pvc-b", "group-1", "b", &["node-1", "node-2"]))
        .await
        .unwrap();
    fx.indexed_group(group("group-1", &[("a", "pvc-a"), ("b", "pvc-b")], &[]))
        .await;

    let stored = fx.groups().get("group-1").await.unwrap();
    assert_eq!(
        stored.spec.accessibility.nodes,
        vec!["node-1".to_string(), "node-2".to_string()]
    );
    assert_eq!(fx.manager.volumes_of_group(&stored).await.unwrap().len(), 2);

    fx.volumes()
        .create(&grouped_volume("pvc-c", "group-1", "c", &["node-1"]))
        .await
        .unwrap();
    let mut grown = fx.groups().get("group-1").await.unwrap();
    grown.spec.volumes.push(VolumeInfo {
        pvc_name: "c".to_string(),
        local_volume_name: "pvc-c".to_string(),
    });
    fx.groups().update(&grown).await.unwrap();
    assert!(matches!(
        fx.manager.process_group("group-1").await,
        Err(GroupError::InconsistentAccessibility(name)) if name == "group-1"
    ));
}

#[tokio::test]
async fn test_volume_fills_its_claim_entry() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "")], &[])).await;

    let mut vol = grouped_volume("pvc-data", "group-1", "data", &[]);
    vol.spec.accessibility.nodes = vec!["node-3".to_string()];
    fx.volumes().create(&vol).await.unwrap();
    fx.manager.process_volume("pvc-data").await.unwrap();

    let stored = fx.groups().get("group-1").await.unwrap();
    assert!(stored.has_volume("pvc-data"));
    assert_eq!(
        fx.manager.group_name_for_volume("pvc-data").await.as_deref(),
        Some("group-1")
    );

    // a second pass copies the volume's nodes onto the node-less group
    fx.manager.process_volume("pvc-data").await.unwrap();
    let stored = fx.groups().get("group-1").await.unwrap();
    assert_eq!(stored.spec.accessibility.nodes, vec!["node-3".to_string()]);

    fx.volumes()
        .create(&grouped_volume("pvc-stray", "group-1", "other", &[]))
        .await
        .unwrap();
    assert!(matches!(
        fx.manager.process_volume("pvc-stray").await,
        Err(GroupError::NoMatchingClaim { .. })
    ));
}

#[tokio::test]
async fn test_removed_volume_leaves_claim_entry() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "pvc-data"), ("", "pvc-orphan")], &[]))
        .await;

    fx.manager.process_volume("pvc-data").await.unwrap();
    fx.manager.process_volume("pvc-orphan").await.unwrap();

    let stored = fx.groups().get("group-1").await.unwrap();
    assert_eq!(
        stored.spec.volumes,
        vec![VolumeInfo {
            pvc_name: "data".to_string(),
            local_volume_name: String::new(),
        }]
    );
    assert!(fx.manager.group_name_for_volume("pvc-data").await.is_none());
}

#[tokio::test]
async fn test_removed_claim_leaves_volume_entry() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "pvc-data"), ("logs", "")], &[]))
        .await;

    fx.manager.process_claim(&ObjectKey::new(APPS, "logs")).await.unwrap();
    fx.manager.process_claim(&ObjectKey::new(APPS, "data")).await.unwrap();

    let stored = fx.groups().get("group-1").await.unwrap();
    assert_eq!(
        stored.spec.volumes,
        vec![VolumeInfo {
            pvc_name: String::new(),
            local_volume_name: "pvc-data".to_string(),
        }]
    );
    assert!(fx.manager.group_name_for_claim(APPS, "data").await.is_none());
}

#[tokio::test]
async fn test_claim_joins_group_of_sibling() {
    let fx = Fixture::new();
    fx.driver_class().await;
    fx.claim("data").await;
    fx.claim("logs").await;
    fx.pods().create(&pod("web-0", &["data", "logs"])).await.unwrap();
    fx.indexed_group(group("group-1", &[("data", "pvc-data")], &[])).await;

    fx.manager.process_claim(&ObjectKey::new(APPS, "logs")).await.unwrap();

    let stored = fx.groups().get("group-1").await.unwrap();
    assert!(stored.has_pvc("logs"));
    assert_eq!(stored.spec.pods, vec!["web-0".to_string()]);
    assert_eq!(fx.manager.group_name_for_claim(APPS, "logs").await.as_deref(), Some("group-1"));

    // processing it again changes nothing
    let rv = stored.metadata.resource_version;
    fx.manager.process_claim(&ObjectKey::new(APPS, "logs")).await.unwrap();
    assert_eq!(fx.groups().get("group-1").await.unwrap().metadata.resource_version, rv);
}

#[tokio::test]
async fn test_foreign_claims_are_ignored() {
    let fx = Fixture::new();
    fx.driver_class().await;
    Api::<StorageClass>::all(fx.store.clone())
        .create(&StorageClass {
            metadata: ObjectMeta::named("nfs"),
            provisioner: "nfs.csi.k8s.io".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(fx.manager.is_driver_claim(&claim("a", CLASS)).await.unwrap());
    assert!(!fx.manager.is_driver_claim(&claim("a", "nfs")).await.unwrap());
    assert!(!fx.manager.is_driver_claim(&claim("a", "missing")).await.unwrap());
    assert!(!fx.manager.is_driver_claim(&claim("a", "")).await.unwrap());

    fx.claims().create(&claim("shared", "nfs")).await.unwrap();
    fx.pods().create(&pod("web-0", &["data", "shared"])).await.unwrap();
    fx.indexed_group(group("group-1", &[("data", "pvc-data")], &[])).await;
    fx.manager.process_claim(&ObjectKey::new(APPS, "shared")).await.unwrap();
    assert!(!fx.groups().get("group-1").await.unwrap().has_pvc("shared"));
}

#[tokio::test]
async fn test_pods_join_and_leave() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "pvc-data")], &[])).await;
    fx.pods().create(&pod("web-1", &["data"])).await.unwrap();
    fx.pods().create(&pod("other", &["scratch"])).await.unwrap();

    let key = ObjectKey::new(APPS, "web-1");
    fx.manager.process_pod(&key).await.unwrap();
    fx.manager.process_pod(&ObjectKey::new(APPS, "other")).await.unwrap();
    assert_eq!(fx.groups().get("group-1").await.unwrap().spec.pods, vec!["web-1".to_string()]);
    assert_eq!(fx.manager.index().await.pods.get(&key).map(String::as_str), Some("group-1"));

    fx.pods().delete("web-1").await.unwrap();
    fx.manager.process_pod(&key).await.unwrap();
    assert!(fx.groups().get("group-1").await.unwrap().spec.pods.is_empty());
    assert!(fx.manager.index().await.pods.is_empty());
}

#[tokio::test]
async fn test_empty_group_is_deleted() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "pvc-data")], &[])).await;

    let mut emptied = fx.groups().get("group-1").await.unwrap();
    emptied.spec.volumes.clear();
    fx.groups().update(&emptied).await.unwrap();
    fx.manager.process_group("group-1").await.unwrap();

    assert!(fx.groups().get_opt("group-1").await.unwrap().is_none());
    assert!(fx.manager.index().await.is_empty());
}

#[tokio::test]
async fn test_deleting_group_is_released() {
    let fx = Fixture::new();
    fx.indexed_group(group("group-1", &[("data", "pvc-data")], &["web-0"])).await;

    fx.groups().delete("group-1").await.unwrap();
    assert!(fx.groups().get("group-1").await.unwrap().metadata.is_deleting());
    fx.manager.process_group("group-1").await.unwrap();

    assert!(fx.groups().get_opt("group-1").await.unwrap().is_none());
    assert!(fx.manager.index().await.is_empty());
}

#[tokio::test]
async fn test_workers_follow_watch_events() {
    init_tracing();
    let fx = Fixture::new();
    let groups = Informer::<LocalVolumeGroup>::new(fx.store.clone());
    let volumes = Informer::<LocalVolume>::new(fx.store.clone());
    let claims = Informer::<PersistentVolumeClaim>::new(fx.store.clone());
    let pods = Informer::<Pod>::new(fx.store.clone());
    fx.manager.register_handlers(&groups, &volumes, &claims, &pods);
    let informers = vec![groups.spawn(), volumes.spawn(), claims.spawn(), pods.spawn()];
    let worker = tokio::spawn(fx.manager.clone().run());

    fx.groups()
        .create(&group("group-1", &[("data", "pvc-data")], &[]))
        .await
        .unwrap();
    let manager = fx.manager.clone();
    eventually("group indexed", || {
        let manager = manager.clone();
        async move { manager.group_name_for_volume("pvc-data").await.is_some() }
    })
    .await;

    fx.pods().create(&pod("web-0", &["data"])).await.unwrap();
    let groups_api = fx.groups();
    eventually("pod listed on group", || {
        let groups = groups_api.clone();
        async move { groups.get("group-1").await.unwrap().spec.pods == vec!["web-0".to_string()] }
    })
    .await;

    fx.manager.shutdown();
    worker.await.unwrap();
    for informer in informers {
        informer.abort();
    }
}
