//! Kind to plural resource name mapping.
//!
//! The lexical fallback mis-pluralizes irregular kinds (`Policy` becomes
//! `policys`). Callers that have discovery data should prefer the plural the
//! server advertises and only use [`plural_from_kind`] for kinds it does not
//! know about.

use phf::phf_map;

static WELL_KNOWN_PLURALS: phf::Map<&'static str, &'static str> = phf_map! {
	"Pod" => "pods",
	"Deployment" => "deployments",
	"ReplicaSet" => "replicasets",
	"Service" => "services",
	"ConfigMap" => "configmaps",
	"Secret" => "secrets",
	"DaemonSet" => "daemonsets",
	"StatefulSet" => "statefulsets",
	"Ingress" => "ingresses",
	"Job" => "jobs",
	"CronJob" => "cronjobs",
	"Namespace" => "namespaces",
	"ServiceAccount" => "serviceaccounts",
	"PersistentVolume" => "persistentvolumes",
	"PersistentVolumeClaim" => "persistentvolumeclaims",
	"Role" => "roles",
	"RoleBinding" => "rolebindings",
	"ClusterRole" => "clusterroles",
	"ClusterRoleBinding" => "clusterrolebindings",
	"NetworkPolicy" => "networkpolicies",
	"StorageClass" => "storageclasses",
	"CustomResourceDefinition" => "customresourcedefinitions",
	"Endpoints" => "endpoints",
	"LimitRange" => "limitranges",
	"ResourceQuota" => "resourcequotas",
	"HorizontalPodAutoscaler" => "horizontalpodautoscalers",
	"PodDisruptionBudget" => "poddisruptionbudgets",
	"PriorityClass" => "priorityclasses",
	"IngressClass" => "ingressclasses",
};

/// Plural for a built-in kind, if it is in the fixed table.
pub fn well_known_plural(kind: &str) -> Option<&'static str> {
	WELL_KNOWN_PLURALS.get(kind).copied()
}

/// Derive the lower-case plural collection name for a kind.
pub fn plural_from_kind(kind: &str) -> String {
	if let Some(plural) = well_known_plural(kind) {
		return plural.to_string();
	}

	let lower = kind.to_lowercase();
	if lower.ends_with('s') {
		lower
	} else {
		lower + "s"
	}
}
