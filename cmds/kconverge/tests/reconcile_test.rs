//! Integration tests for reconcile passes using a mock Kubernetes API server.
//!
//! These drive the real `KubeCluster` over HTTP, so discovery, listing and
//! every write go through kube-rs exactly as they would against a cluster.

use std::{fs, path::Path};

use assert_matches::assert_matches;
use indoc::indoc;
use k8s_mock::{
	DiscoveryMode, HttpMockK8sServer, MockApiResource, MockDiscovery, RunningHttpMockK8sServer,
};
use kconverge::{
	driver::{PassError, Reconciler},
	k8s::{client::ClusterConnection, cluster::KubeCluster},
	reconcile::{Action, ReconcileOptions, UpdateMode},
};
use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

const CONFIG_MAP: &str = indoc! {"
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: cfg
	  namespace: ns
	data:
	  k: v
"};

async fn connect(server: &RunningHttpMockK8sServer) -> KubeCluster {
	let connection = ClusterConnection::from_kubeconfig(server.kubeconfig(), None)
		.await
		.expect("failed to create connection");
	KubeCluster::from(&connection)
}

fn manifests(files: &[(&str, &str)]) -> TempDir {
	let dir = TempDir::new().unwrap();
	for (name, content) in files {
		let path = dir.path().join(name);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, content).unwrap();
	}
	dir
}

async fn reconciler(
	server: &RunningHttpMockK8sServer,
	dir: &Path,
	options: ReconcileOptions,
) -> Reconciler<KubeCluster> {
	Reconciler::builder()
		.cluster(connect(server).await)
		.directory(dir)
		.options(options)
		.build()
}

fn config_map(namespace: &str, name: &str) -> serde_json::Value {
	json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {"name": name, "namespace": namespace},
		"data": {"k": "v"}
	})
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_config_map_is_created_in_its_namespace(#[case] mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(mode)
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.report.created(), 1);
	assert!(summary.is_clean());
	assert_eq!(
		server.mutations().await,
		vec![("POST".to_string(), "/api/v1/namespaces/ns/configmaps".to_string())]
	);
	let stored = server.object("v1", "ConfigMap", "ns", "cfg").unwrap();
	assert_eq!(stored["data"]["k"], "v");
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_orphans_are_pruned_across_scopes(#[case] mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(mode)
		.resources(vec![
			config_map("ns", "cfg"),
			config_map("other", "orphan"),
			json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "stale"}}),
			json!({
				"apiVersion": "apps/v1",
				"kind": "Deployment",
				"metadata": {"name": "web", "namespace": "ns"},
				"spec": {}
			}),
		])
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.live_objects, 4);
	assert_eq!(summary.report.updated(), 1);
	assert_eq!(summary.report.deleted(), 3);
	assert_eq!(server.object_count(), 1);
	assert!(server.object("v1", "ConfigMap", "ns", "cfg").is_some());

	let deletes: Vec<String> = server
		.mutations()
		.await
		.into_iter()
		.filter(|(method, _)| method == "DELETE")
		.map(|(_, path)| path)
		.collect();
	assert_eq!(
		deletes,
		vec![
			"/api/v1/namespaces/other/configmaps/orphan",
			"/api/v1/namespaces/stale",
			"/apis/apps/v1/namespaces/ns/deployments/web",
		]
	);
}

#[tokio::test]
async fn test_existing_object_is_replaced_every_pass() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![config_map("ns", "cfg")])
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	for _ in 0..2 {
		let summary = reconciler.run_pass().await.unwrap();
		assert_eq!(summary.report.updated(), 1);
		assert_eq!(summary.report.created(), 0);
		assert_eq!(summary.report.deleted(), 0);
	}

	let puts = server
		.mutations()
		.await
		.into_iter()
		.filter(|(method, path)| method == "PUT" && path == "/api/v1/namespaces/ns/configmaps/cfg")
		.count();
	assert_eq!(puts, 2);
}

#[tokio::test]
async fn test_skip_unchanged_issues_no_writes_for_matching_objects() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![config_map("ns", "cfg")])
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let options = ReconcileOptions {
		update_mode: UpdateMode::SkipUnchanged,
		..ReconcileOptions::default()
	};
	let reconciler = reconciler(&server, dir.path(), options).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.report.unchanged(), 1);
	assert!(server.mutations().await.is_empty());
}

#[tokio::test]
async fn test_forbidden_list_only_skips_that_type() {
	let server = HttpMockK8sServer::builder()
		.forbidden_lists(vec!["secrets".to_string()])
		.resources(vec![
			config_map("ns", "orphan"),
			json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s", "namespace": "ns"}}),
		])
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.skipped_types, vec!["v1/secrets".to_string()]);
	assert_eq!(summary.report.created(), 1);
	assert_eq!(summary.report.deleted(), 1);
	// Unseen objects are never pruned
	assert!(server.object("v1", "Secret", "ns", "s").is_some());
}

#[tokio::test]
async fn test_discovery_failure_fails_the_pass_without_writes() {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(DiscoveryMode::Broken)
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	assert_matches!(reconciler.run_pass().await, Err(PassError::Discovery(_)));
	assert!(server.mutations().await.is_empty());
}

#[tokio::test]
async fn test_rejected_write_does_not_stop_the_pass() {
	let server = HttpMockK8sServer::builder()
		.rejected_names(vec!["bad".to_string()])
		.resources(vec![config_map("ns", "orphan")])
		.build()
		.start()
		.await;
	let dir = manifests(&[(
		"app.yaml",
		indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata: {name: bad, namespace: ns}
			---
			apiVersion: apps/v1
			kind: Deployment
			metadata: {name: web, namespace: ns}
			spec: {replicas: 1}
		"},
	)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.report.failed(), 1);
	let failure = summary.report.failures().next().unwrap();
	assert_eq!(failure.identity.name, "bad");
	assert_eq!(failure.action, Action::Create);
	assert_eq!(summary.report.created(), 1);
	assert_eq!(summary.report.deleted(), 1);
	assert!(server.object("apps/v1", "Deployment", "ns", "web").is_some());
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_namespace_less_config_map_is_rejected_without_writes(#[case] mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(mode)
		.resources(vec![config_map("default", "cfg")])
		.build()
		.start()
		.await;
	let dir = manifests(&[(
		"cfg.yaml",
		indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: cfg
			data:
			  k: v
		"},
	)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.report.rejected(), 1);
	assert!(!summary.is_clean());
	assert!(server.mutations().await.is_empty());
	assert!(server.object("v1", "ConfigMap", "default", "cfg").is_some());
}

#[tokio::test]
async fn test_custom_resource_uses_discovered_plural() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let dir = manifests(&[(
		"crs/widget.yml",
		indoc! {"
			apiVersion: example.com/v1
			kind: Widget
			metadata:
			  name: w
			  namespace: ns
			spec:
			  size: 3
		"},
	)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert_eq!(summary.report.created(), 1);
	assert_eq!(
		server.mutations().await,
		vec![("POST".to_string(), "/apis/example.com/v1/namespaces/ns/widgets".to_string())]
	);
}

#[tokio::test]
async fn test_prune_disabled_keeps_orphans() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![config_map("ns", "orphan")])
		.build()
		.start()
		.await;
	let dir = manifests(&[]);
	let options = ReconcileOptions {
		prune: false,
		..ReconcileOptions::default()
	};
	let reconciler = reconciler(&server, dir.path(), options).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert!(summary.report.operations.is_empty());
	assert!(server.mutations().await.is_empty());
	assert_eq!(server.object_count(), 1);
}

#[tokio::test]
async fn test_types_without_list_verb_are_not_listed() {
	let discovery = MockDiscovery::default().with_resource(
		"authentication.k8s.io/v1",
		MockApiResource::cluster_scoped("tokenreviews", "TokenReview").with_verbs(&["create"]),
	);
	let server = HttpMockK8sServer::builder()
		.discovery(discovery)
		.forbidden_lists(vec!["tokenreviews".to_string()])
		.build()
		.start()
		.await;
	let dir = manifests(&[("cfg.yaml", CONFIG_MAP)]);
	let reconciler = reconciler(&server, dir.path(), ReconcileOptions::default()).await;

	let summary = reconciler.run_pass().await.unwrap();

	assert!(summary.skipped_types.is_empty());
	assert_eq!(summary.report.created(), 1);
}
