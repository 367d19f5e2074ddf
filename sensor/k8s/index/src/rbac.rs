//! Evaluates the effective permission level of service accounts.
//!
//! Roles and bindings are indexed as they are observed. A service account's level is the highest
//! level granted by any binding that names it:
//!
//! - A cluster-wide binding to a role that grants every verb on every resource in every API group
//!   (or to the `cluster-admin` role) grants [`PermissionLevel::ClusterAdmin`].
//! - A cluster-wide binding to a role with any elevated rule grants
//!   [`PermissionLevel::ElevatedClusterWide`].
//! - A namespaced binding to a role with any elevated rule grants
//!   [`PermissionLevel::ElevatedInNamespace`].
//! - Any other binding to a role with rules grants [`PermissionLevel::Default`].
//!
//! A rule is elevated if it permits writes, privilege escalation, wildcard resources, or reading
//! secrets.

use ahash::AHashMap as HashMap;
use kube_sensor_core::{
    store::RbacStore, DeploymentReference, PermissionLevel, ResourceAction, Selector,
};
use kube_sensor_k8s_api as k8s;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct Rbac(RwLock<Index>);

/// Roles and bindings are keyed by namespace and name; cluster-scoped ones have no namespace.
type Key = (Option<String>, String);

#[derive(Debug, Default)]
struct Index {
    roles: HashMap<Key, Vec<Rule>>,
    bindings: HashMap<Key, Binding>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    verbs: Vec<String>,
    resources: Vec<String>,
    api_groups: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    role: Key,
    subjects: Vec<Subject>,
}

/// The service accounts named by a binding.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Subject {
    ServiceAccount { namespace: String, name: String },

    /// The `system:serviceaccounts:<namespace>` group.
    Namespace(String),

    /// The `system:serviceaccounts` group.
    All,
}

const ELEVATED_VERBS: [&str; 9] = [
    "*",
    "create",
    "update",
    "patch",
    "delete",
    "deletecollection",
    "escalate",
    "bind",
    "impersonate",
];

const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

// === impl Rbac ===

impl Rbac {
    /// Stores a role's rules and returns the subjects whose permissions may have changed.
    pub fn upsert_role(
        &self,
        namespace: Option<String>,
        name: String,
        rules: Vec<Rule>,
    ) -> Vec<Subject> {
        let mut index = self.0.write();
        let key = (namespace, name);
        let affected = index.subjects_bound_to(&key);
        index.roles.insert(key, rules);
        affected
    }

    pub fn remove_role(&self, namespace: Option<String>, name: String) -> Vec<Subject> {
        let mut index = self.0.write();
        let key = (namespace, name);
        if index.roles.remove(&key).is_none() {
            return vec![];
        }
        index.subjects_bound_to(&key)
    }

    /// Stores a binding and returns the subjects of both the new and the replaced binding.
    pub fn upsert_binding(
        &self,
        namespace: Option<String>,
        name: String,
        binding: Binding,
    ) -> Vec<Subject> {
        let mut index = self.0.write();
        let mut affected = binding.subjects.clone();
        if let Some(old) = index.bindings.insert((namespace, name), binding) {
            affected.extend(old.subjects);
        }
        affected.sort();
        affected.dedup();
        affected
    }

    pub fn remove_binding(&self, namespace: Option<String>, name: String) -> Vec<Subject> {
        self.0
            .write()
            .bindings
            .remove(&(namespace, name))
            .map(|b| b.subjects)
            .unwrap_or_default()
    }
}

impl RbacStore for Rbac {
    fn get_permission_level(&self, namespace: &str, service_account: &str) -> PermissionLevel {
        let index = self.0.read();
        index
            .bindings
            .iter()
            .filter(|(_, binding)| {
                binding
                    .subjects
                    .iter()
                    .any(|s| s.includes(namespace, service_account))
            })
            .map(|((binding_ns, _), binding)| {
                let rules = index
                    .roles
                    .get(&binding.role)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                level(binding_ns.is_none(), &binding.role.1, rules)
            })
            .max()
            .unwrap_or_default()
    }
}

// === impl Index ===

impl Index {
    fn subjects_bound_to(&self, role: &Key) -> Vec<Subject> {
        let mut subjects = self
            .bindings
            .values()
            .filter(|b| b.role == *role)
            .flat_map(|b| b.subjects.iter().cloned())
            .collect::<Vec<_>>();
        subjects.sort();
        subjects.dedup();
        subjects
    }
}

fn level(cluster_wide: bool, role_name: &str, rules: &[Rule]) -> PermissionLevel {
    if rules.is_empty() {
        return PermissionLevel::None;
    }
    if cluster_wide {
        if role_name == "cluster-admin" || rules.iter().any(Rule::is_admin) {
            return PermissionLevel::ClusterAdmin;
        }
        if rules.iter().any(Rule::is_elevated) {
            return PermissionLevel::ElevatedClusterWide;
        }
    } else if rules.iter().any(Rule::is_elevated) {
        return PermissionLevel::ElevatedInNamespace;
    }
    PermissionLevel::Default
}

// === impl Rule ===

impl Rule {
    pub fn new(
        verbs: impl IntoIterator<Item = impl Into<String>>,
        resources: impl IntoIterator<Item = impl Into<String>>,
        api_groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            verbs: verbs.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            api_groups: api_groups.into_iter().map(Into::into).collect(),
        }
    }

    fn is_admin(&self) -> bool {
        let wild = |values: &[String]| values.iter().any(|v| v == "*");
        wild(&self.verbs) && wild(&self.resources) && wild(&self.api_groups)
    }

    fn is_elevated(&self) -> bool {
        let verb = |verbs: &[&str]| self.verbs.iter().any(|v| verbs.contains(&v.as_str()));
        verb(&ELEVATED_VERBS)
            || self.resources.iter().any(|r| r == "*")
            || (verb(&READ_VERBS) && self.resources.iter().any(|r| r == "secrets"))
    }
}

pub(crate) fn rules(rules: Option<Vec<k8s::PolicyRule>>) -> Vec<Rule> {
    rules
        .into_iter()
        .flatten()
        .map(|rule| Rule {
            verbs: rule.verbs,
            resources: rule.resources.unwrap_or_default(),
            api_groups: rule.api_groups.unwrap_or_default(),
        })
        .collect()
}

// === impl Binding ===

impl Binding {
    /// Builds a binding from its role reference and subjects. Subjects of a namespaced binding
    /// default to the binding's namespace.
    pub fn new(
        namespace: Option<&str>,
        role_kind: &str,
        role_name: impl Into<String>,
        subjects: impl IntoIterator<Item = Subject>,
    ) -> Self {
        let role_ns = match role_kind {
            "Role" => namespace.map(ToString::to_string),
            _ => None,
        };
        Self {
            role: (role_ns, role_name.into()),
            subjects: subjects.into_iter().collect(),
        }
    }
}

pub(crate) fn binding(
    namespace: Option<&str>,
    role_ref: k8s::api::rbac::v1::RoleRef,
    subjects: Option<Vec<k8s::Subject>>,
) -> Binding {
    let subjects = subjects
        .into_iter()
        .flatten()
        .filter_map(|s| Subject::from_k8s(namespace, s));
    Binding::new(namespace, &role_ref.kind, role_ref.name, subjects)
}

// === impl Subject ===

impl Subject {
    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ServiceAccount {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn from_k8s(binding_ns: Option<&str>, subject: k8s::Subject) -> Option<Self> {
        match subject.kind.as_str() {
            "ServiceAccount" => {
                let namespace = subject
                    .namespace
                    .filter(|ns| !ns.is_empty())
                    .or_else(|| binding_ns.map(ToString::to_string))?;
                Some(Self::service_account(namespace, subject.name))
            }
            "User" => {
                let sa = subject.name.strip_prefix("system:serviceaccount:")?;
                let (namespace, name) = sa.split_once(':')?;
                Some(Self::service_account(namespace, name))
            }
            "Group" if subject.name == "system:serviceaccounts" => Some(Self::All),
            "Group" => subject
                .name
                .strip_prefix("system:serviceaccounts:")
                .map(|ns| Self::Namespace(ns.to_string())),
            _ => None,
        }
    }

    fn includes(&self, namespace: &str, service_account: &str) -> bool {
        match self {
            Self::ServiceAccount { namespace: ns, name } => {
                ns == namespace && name == service_account
            }
            Self::Namespace(ns) => ns == namespace,
            Self::All => true,
        }
    }

    /// References the workloads running as this subject.
    pub fn reference(&self, action: ResourceAction) -> DeploymentReference {
        match self {
            Self::ServiceAccount { namespace, name } => {
                DeploymentReference::by_service_account(action, namespace.clone(), name.clone())
            }
            Self::Namespace(ns) => {
                DeploymentReference::by_labels(action, ns.clone(), Selector::default())
            }
            Self::All => DeploymentReference::all(action),
        }
    }
}
