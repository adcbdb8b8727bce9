//! HTTP-based mock Kubernetes server using wiremock.
//!
//! Serves discovery, LIST, GET, POST (create), PUT (replace) and DELETE for the
//! resource types in [`MockDiscovery`]. Objects are kept in memory, every write
//! bumps a global `resourceVersion`, and PUT enforces optimistic concurrency the
//! way a real API server does.

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::{Arc, RwLock},
};

use bon::Builder;
use k8s::split_api_version;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::{DiscoveryMode, MockApiResource, MockDiscovery};

/// Storage key of an object: collection prefix, plural, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
	/// `/api/v1` or `/apis/<group>/<version>`.
	prefix: String,
	plural: String,
	namespace: String,
	name: String,
}

#[derive(Default)]
struct ClusterState {
	objects: BTreeMap<ObjectKey, serde_json::Value>,
	resource_version: u64,
}

impl ClusterState {
	fn next_resource_version(&mut self) -> String {
		self.resource_version += 1;
		self.resource_version.to_string()
	}
}

type SharedState = Arc<RwLock<ClusterState>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	#[builder(default)]
	discovery: MockDiscovery,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
	/// Plurals whose LIST requests are answered with 403 Forbidden.
	#[builder(default)]
	forbidden_lists: Vec<String>,
	/// Object names whose create/replace/delete requests are answered with 422.
	#[builder(default)]
	rejected_names: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: MockDiscovery,
	state: SharedState,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut state = ClusterState::default();
		for mut manifest in self.resources {
			let Some(key) = key_for_manifest(&manifest, &self.discovery) else {
				trace!(manifest = %manifest, "Ignoring resource without a served type");
				continue;
			};
			let version = state.next_resource_version();
			set_metadata(&mut manifest, "resourceVersion", &version);
			if !key.namespace.is_empty() {
				set_metadata(&mut manifest, "namespace", &key.namespace);
			}
			trace!(?key, "Registered resource");
			state.objects.insert(key, manifest);
		}
		let state = Arc::new(RwLock::new(state));

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_resources(
			&server,
			&state,
			Arc::new(self.forbidden_lists.into_iter().collect()),
			Arc::new(self.rejected_names.into_iter().collect()),
		)
		.await;

		RunningHttpMockK8sServer {
			server,
			discovery: self.discovery,
			state,
		}
	}
}

/// Derive the storage key for a manifest using discovery data.
fn key_for_manifest(manifest: &serde_json::Value, discovery: &MockDiscovery) -> Option<ObjectKey> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(|n| n.as_str());

	let resource = discovery.find(api_version, kind)?;
	Some(ObjectKey {
		prefix: collection_prefix(api_version),
		plural: resource.name.clone(),
		namespace: if resource.namespaced {
			namespace.unwrap_or("default").to_string()
		} else {
			String::new()
		},
		name: name.to_string(),
	})
}

fn collection_prefix(api_version: &str) -> String {
	match split_api_version(api_version) {
		("", version) => format!("/api/{}", version),
		(group, version) => format!("/apis/{}/{}", group, version),
	}
}

fn set_metadata(manifest: &mut serde_json::Value, field: &str, value: &str) {
	if let Some(obj) = manifest.as_object_mut() {
		let metadata = obj
			.entry("metadata")
			.or_insert_with(|| serde_json::json!({}));
		if let Some(metadata) = metadata.as_object_mut() {
			metadata.insert(field.to_string(), value.into());
		}
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Look up a stored object. Use an empty namespace for cluster-scoped kinds.
	pub fn object(
		&self,
		api_version: &str,
		kind: &str,
		namespace: &str,
		name: &str,
	) -> Option<serde_json::Value> {
		let resource = self.discovery.find(api_version, kind)?;
		let key = ObjectKey {
			prefix: collection_prefix(api_version),
			plural: resource.name.clone(),
			namespace: namespace.to_string(),
			name: name.to_string(),
		};
		self.state.read().unwrap().objects.get(&key).cloned()
	}

	/// Number of stored objects across all types.
	pub fn object_count(&self) -> usize {
		self.state.read().unwrap().objects.len()
	}

	/// Every non-GET request received so far, as `(method, path)`, in arrival order.
	pub async fn mutations(&self) -> Vec<(String, String)> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| (req.method.to_string(), req.url.path().to_string()))
			.filter(|(method, _)| method != "GET")
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(group: &str, version: &str, r: &MockApiResource) -> serde_json::Value {
	serde_json::json!({
		"resource": r.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": r.kind
		},
		"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": r.verbs,
	})
}

fn legacy_resource(r: &MockApiResource) -> serde_json::Value {
	serde_json::json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// The Content-Type must name the aggregated format or clients refuse to parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Broken => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.respond_with(status_response(403, "Forbidden", "discovery is forbidden"))
					.mount(server)
					.await;
			}
			return;
		}
		DiscoveryMode::Legacy => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Aggregated => {
			let core: Vec<_> = discovery
				.core_resources
				.iter()
				.map(|r| aggregated_resource("", "v1", r))
				.collect();
			let core_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [{
					"metadata": { "name": "" },
					"versions": [{
						"version": "v1",
						"resources": core,
						"freshness": "Current"
					}]
				}]
			});

			let groups: Vec<_> = discovery
				.group_resources
				.iter()
				.map(|(gv, rs)| {
					let (group, version) = split_api_version(gv);
					let resources: Vec<_> = rs
						.iter()
						.map(|r| aggregated_resource(group, version, r))
						.collect();
					serde_json::json!({
						"metadata": { "name": group },
						"versions": [{
							"version": version,
							"resources": resources,
							"freshness": "Current"
						}]
					})
				})
				.collect();
			let apis_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": groups
			});

			for (endpoint, body) in [("/api", core_body), ("/apis", apis_body)] {
				// set_body_json would overwrite the Content-Type
				let body = serde_json::to_vec(&body)
					.expect("serializing discovery JSON should never fail");
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(
						ResponseTemplate::new(200)
							.set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
					)
					.mount(server)
					.await;
			}
		}
	}

	// Legacy discovery endpoints
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = split_api_version(gv);
			serde_json::json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	let core: Vec<_> = discovery.core_resources.iter().map(legacy_resource).collect();
	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": "v1",
			"resources": core
		})))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		let resources: Vec<_> = rs.iter().map(legacy_resource).collect();
		Mock::given(method("GET"))
			.and(path(format!("/apis/{}", gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": gv,
				"resources": resources
			})))
			.mount(server)
			.await;
	}
}

/// A request path split into its addressing parts.
#[derive(Debug, PartialEq, Eq)]
struct ApiPath {
	prefix: String,
	plural: String,
	namespace: Option<String>,
	name: Option<String>,
}

impl ApiPath {
	fn key(&self, name: &str) -> ObjectKey {
		ObjectKey {
			prefix: self.prefix.clone(),
			plural: self.plural.clone(),
			namespace: self.namespace.clone().unwrap_or_default(),
			name: name.to_string(),
		}
	}

	/// Whether a stored object belongs to the collection this path lists.
	fn lists(&self, key: &ObjectKey) -> bool {
		key.prefix == self.prefix
			&& key.plural == self.plural
			&& self
				.namespace
				.as_ref()
				.map_or(true, |ns| *ns == key.namespace)
	}
}

/// Parse a Kubernetes API path.
///
/// Examples:
/// - `/api/v1/configmaps` -> list across all namespaces
/// - `/api/v1/namespaces/default/configmaps/my-config` -> single namespaced object
/// - `/apis/apps/v1/namespaces/default/deployments` -> list in one namespace
/// - `/api/v1/namespaces/my-ns` -> single cluster-scoped `Namespace`
fn parse_api_path(path: &str) -> Option<ApiPath> {
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let (prefix_len, rest) = match segments.as_slice() {
		["api", _version, rest @ ..] => (2, rest),
		["apis", _group, _version, rest @ ..] => (3, rest),
		_ => return None,
	};
	let prefix = format!("/{}", segments[..prefix_len].join("/"));

	let (namespace, plural, name) = match rest {
		[plural] => (None, *plural, None),
		[plural, name] => (None, *plural, Some(*name)),
		["namespaces", ns, plural] => (Some(*ns), *plural, None),
		["namespaces", ns, plural, name] => (Some(*ns), *plural, Some(*name)),
		_ => return None,
	};

	Some(ApiPath {
		prefix,
		plural: plural.to_string(),
		namespace: namespace.map(str::to_string),
		name: name.map(str::to_string),
	})
}

fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn not_found(path: &str) -> ResponseTemplate {
	status_response(404, "NotFound", &format!("{} not found", path))
}

/// Parse a write request into its path and JSON body.
fn parse_write(req: &Request) -> Result<(ApiPath, serde_json::Value), ResponseTemplate> {
	let api_path = parse_api_path(req.url.path()).ok_or_else(|| not_found(req.url.path()))?;
	let body = serde_json::from_slice(&req.body)
		.map_err(|e| status_response(400, "BadRequest", &e.to_string()))?;
	Ok((api_path, body))
}

fn resource_version(obj: &serde_json::Value) -> Option<&str> {
	obj.pointer("/metadata/resourceVersion")
		.and_then(|v| v.as_str())
}

async fn mount_resources(
	server: &MockServer,
	state: &SharedState,
	forbidden_lists: Arc<BTreeSet<String>>,
	rejected_names: Arc<BTreeSet<String>>,
) {
	// GET: single object or LIST, depending on whether the path carries a name
	let get_state = Arc::clone(state);
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(api_path) = parse_api_path(req.url.path()) else {
				return not_found(req.url.path());
			};
			let state = get_state.read().unwrap();

			if let Some(name) = &api_path.name {
				return match state.objects.get(&api_path.key(name)) {
					Some(obj) => ResponseTemplate::new(200).set_body_json(obj.clone()),
					None => not_found(req.url.path()),
				};
			}

			if forbidden_lists.contains(&api_path.plural) {
				return status_response(
					403,
					"Forbidden",
					&format!("cannot list {}", api_path.plural),
				);
			}

			let items: Vec<_> = state
				.objects
				.iter()
				.filter(|(key, _)| api_path.lists(key))
				.map(|(_, obj)| obj.clone())
				.collect();

			ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "List",
				"apiVersion": "v1",
				"metadata": {"resourceVersion": state.resource_version.to_string()},
				"items": items
			}))
		})
		.mount(server)
		.await;

	// POST: create, rejecting names that already exist
	let post_state = Arc::clone(state);
	let post_rejected = Arc::clone(&rejected_names);
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, mut body) = match parse_write(req) {
				Ok(parsed) => parsed,
				Err(response) => return response,
			};
			if api_path.name.is_some() {
				return status_response(405, "MethodNotAllowed", "POST to a named object");
			}
			let Some(name) = body
				.pointer("/metadata/name")
				.and_then(|v| v.as_str())
				.map(str::to_string)
			else {
				return status_response(422, "Invalid", "metadata.name: Required value");
			};
			if post_rejected.contains(&name) {
				return status_response(422, "Invalid", &format!("{} is rejected", name));
			}

			let key = api_path.key(&name);
			let mut state = post_state.write().unwrap();
			if state.objects.contains_key(&key) {
				return status_response(
					409,
					"AlreadyExists",
					&format!("{} \"{}\" already exists", api_path.plural, name),
				);
			}

			if let Some(ns) = &api_path.namespace {
				set_metadata(&mut body, "namespace", ns);
			}
			let version = state.next_resource_version();
			set_metadata(&mut body, "resourceVersion", &version);
			state.objects.insert(key, body.clone());

			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	// PUT: full replacement guarded by resourceVersion
	let put_state = Arc::clone(state);
	let put_rejected = Arc::clone(&rejected_names);
	Mock::given(method("PUT"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, mut body) = match parse_write(req) {
				Ok(parsed) => parsed,
				Err(response) => return response,
			};
			let Some(name) = api_path.name.clone() else {
				return status_response(405, "MethodNotAllowed", "PUT to a collection");
			};
			if put_rejected.contains(&name) {
				return status_response(422, "Invalid", &format!("{} is rejected", name));
			}

			let key = api_path.key(&name);
			let mut state = put_state.write().unwrap();
			let Some(existing) = state.objects.get(&key) else {
				return not_found(req.url.path());
			};
			if resource_version(existing) != resource_version(&body) {
				return status_response(
					409,
					"Conflict",
					&format!(
						"Operation cannot be fulfilled on {} \"{}\": the object has been modified",
						api_path.plural, name
					),
				);
			}

			let version = state.next_resource_version();
			set_metadata(&mut body, "resourceVersion", &version);
			state.objects.insert(key, body.clone());

			ResponseTemplate::new(200).set_body_json(body)
		})
		.mount(server)
		.await;

	// DELETE: remove and echo the removed object
	let delete_state = Arc::clone(state);
	Mock::given(method("DELETE"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(api_path) = parse_api_path(req.url.path()) else {
				return not_found(req.url.path());
			};
			let Some(name) = &api_path.name else {
				return status_response(405, "MethodNotAllowed", "DELETE of a collection");
			};
			if rejected_names.contains(name) {
				return status_response(422, "Invalid", &format!("{} is rejected", name));
			}

			match delete_state.write().unwrap().objects.remove(&api_path.key(name)) {
				Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
				None => not_found(req.url.path()),
			}
		})
		.mount(server)
		.await;
}
