use crate::inventory::{
    AccessKeyPair, ClusterHandle, ClusterSpec, Endpoint, InstanceDescription, InstanceHandle,
    InstanceSpec, ResourceRef, STATUS_AVAILABLE,
};
use crate::{IdentityApi, ResourceLifecycle};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

/// Operation failures to inject into a mock. `always` fails every call to
/// the operation until cleared; `once` fails the next call only.
#[derive(Default)]
struct Faults {
    always: HashSet<String>,
    once: HashSet<String>,
}

impl Faults {
    fn check(&mut self, op: &str) -> Result<()> {
        if self.always.contains(op) || self.once.remove(op) {
            bail!("injected failure in {}", op);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MockCluster {
    resource_id: String,
    spec: ClusterSpec,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct MockInstance {
    spec: InstanceSpec,
    status: String,
    endpoint: Option<Endpoint>,
    tags: BTreeMap<String, String>,
}

#[derive(Default)]
struct LifecycleState {
    clusters: HashMap<String, MockCluster>,
    instances: HashMap<String, MockInstance>,
    calls: Vec<String>,
    faults: Faults,
    next_id: u64,
}

/// In-memory database provisioning API. Instances start in `creating` and
/// only become available through [`MockResourceLifecycle::mark_available`]
/// unless auto-availability is enabled.
pub struct MockResourceLifecycle {
    region: String,
    auto_available: bool,
    state: Mutex<LifecycleState>,
}

impl MockResourceLifecycle {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            auto_available: false,
            state: Mutex::new(LifecycleState::default()),
        }
    }

    /// Instances report `available` immediately after creation.
    pub fn with_auto_available(mut self) -> Self {
        self.auto_available = true;
        self
    }

    fn endpoint_for(&self, name: &str) -> Endpoint {
        Endpoint {
            address: format!("{}.cluster-mock.{}.neptune.amazonaws.com", name, self.region),
            port: 8182,
        }
    }

    pub async fn mark_available(&self, name: &str) -> bool {
        let endpoint = self.endpoint_for(name);
        let mut state = self.state.lock().await;
        match state.instances.get_mut(name) {
            Some(inst) => {
                inst.status = STATUS_AVAILABLE.to_string();
                inst.endpoint = Some(endpoint);
                true
            }
            None => false,
        }
    }

    pub async fn mark_all_available(&self) -> usize {
        let names: Vec<String> = self.state.lock().await.instances.keys().cloned().collect();
        let mut n = 0;
        for name in names {
            if self.mark_available(&name).await {
                n += 1;
            }
        }
        n
    }

    pub async fn fail_always(&self, op: &str) {
        self.state.lock().await.faults.always.insert(op.to_string());
    }

    pub async fn fail_once(&self, op: &str) {
        self.state.lock().await.faults.once.insert(op.to_string());
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.faults = Faults::default();
    }

    /// Every call made so far, as `op:identifier`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn instance_exists(&self, name: &str) -> bool {
        self.state.lock().await.instances.contains_key(name)
    }

    pub async fn cluster_count(&self) -> usize {
        self.state.lock().await.clusters.len()
    }

    pub async fn resource_id(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .clusters
            .get(name)
            .map(|c| c.resource_id.clone())
    }

    pub async fn tags(&self, resource: &ResourceRef) -> BTreeMap<String, String> {
        let state = self.state.lock().await;
        let tags = match resource {
            ResourceRef::Cluster(id) => state.clusters.get(id).map(|c| c.tags.clone()),
            ResourceRef::Instance(id) => state.instances.get(id).map(|i| i.tags.clone()),
        };
        tags.unwrap_or_default()
    }

    pub async fn instance_class(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .instances
            .get(name)
            .map(|i| i.spec.instance_class.clone())
    }

    pub async fn cluster_kms_key(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .clusters
            .get(name)
            .map(|c| c.spec.kms_key_id.clone())
    }
}

#[async_trait]
impl ResourceLifecycle for MockResourceLifecycle {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_cluster:{}", spec.identifier));
        state.faults.check("create_cluster")?;
        if state.clusters.contains_key(&spec.identifier) {
            bail!("DBClusterAlreadyExistsFault: {}", spec.identifier);
        }
        state.next_id += 1;
        let resource_id = format!("cluster-MOCK{:012}", state.next_id);
        state.clusters.insert(
            spec.identifier.clone(),
            MockCluster {
                resource_id: resource_id.clone(),
                spec: spec.clone(),
                tags: BTreeMap::new(),
            },
        );
        Ok(ClusterHandle {
            identifier: spec.identifier.clone(),
            resource_id,
        })
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle> {
        let endpoint = self.endpoint_for(&spec.identifier);
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_instance:{}", spec.identifier));
        state.faults.check("create_instance")?;
        if !state.clusters.contains_key(&spec.cluster_identifier) {
            bail!("DBClusterNotFoundFault: {}", spec.cluster_identifier);
        }
        if state.instances.contains_key(&spec.identifier) {
            bail!("DBInstanceAlreadyExists: {}", spec.identifier);
        }
        let (status, endpoint) = if self.auto_available {
            (STATUS_AVAILABLE.to_string(), Some(endpoint))
        } else {
            ("creating".to_string(), None)
        };
        state.instances.insert(
            spec.identifier.clone(),
            MockInstance {
                spec: spec.clone(),
                status,
                endpoint,
                tags: spec.tags.iter().cloned().collect(),
            },
        );
        Ok(InstanceHandle {
            identifier: spec.identifier.clone(),
        })
    }

    async fn describe_instance(&self, name: &str) -> Result<Option<InstanceDescription>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("describe_instance:{}", name));
        state.faults.check("describe_instance")?;
        Ok(state.instances.get(name).map(|inst| InstanceDescription {
            identifier: name.to_string(),
            status: inst.status.clone(),
            endpoint: inst.endpoint.clone(),
        }))
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("cluster_exists:{}", name));
        state.faults.check("cluster_exists")?;
        Ok(state.clusters.contains_key(name))
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_instance:{}", name));
        state.faults.check("delete_instance")?;
        state
            .instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("DBInstanceNotFound: {}", name))
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_cluster:{}", name));
        state.faults.check("delete_cluster")?;
        if state
            .instances
            .values()
            .any(|i| i.spec.cluster_identifier == name)
        {
            bail!("InvalidDBClusterStateFault: cluster {} still has instances", name);
        }
        state
            .clusters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("DBClusterNotFoundFault: {}", name))
    }

    async fn tag_resource(&self, resource: &ResourceRef, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let op = match resource {
            ResourceRef::Cluster(_) => "tag_cluster",
            ResourceRef::Instance(_) => "tag_instance",
        };
        state.calls.push(format!("{}:{}", op, resource.identifier()));
        state.faults.check(op)?;
        let tags = match resource {
            ResourceRef::Cluster(id) => state.clusters.get_mut(id).map(|c| &mut c.tags),
            ResourceRef::Instance(id) => state.instances.get_mut(id).map(|i| &mut i.tags),
        };
        let tags = tags.ok_or_else(|| anyhow!("resource {} not found", resource.identifier()))?;
        tags.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default, Debug, Clone)]
struct MockIdentity {
    keys: Vec<String>,
    attached: Vec<String>,
}

#[derive(Default)]
struct IdentityState {
    identities: HashMap<String, MockIdentity>,
    policies: HashMap<String, String>,
    calls: Vec<String>,
    faults: Faults,
    next_key: u64,
}

/// In-memory identity API. Mirrors the provider's conflict rules: an
/// identity with keys or attached policies cannot be deleted, and an
/// attached policy cannot be deleted.
#[derive(Default)]
pub struct MockIdentityApi {
    state: Mutex<IdentityState>,
}

impl MockIdentityApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_always(&self, op: &str) {
        self.state.lock().await.faults.always.insert(op.to_string());
    }

    pub async fn fail_once(&self, op: &str) {
        self.state.lock().await.faults.once.insert(op.to_string());
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.faults = Faults::default();
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn identity_exists(&self, name: &str) -> bool {
        self.state.lock().await.identities.contains_key(name)
    }

    pub async fn identity_count(&self) -> usize {
        self.state.lock().await.identities.len()
    }

    pub async fn policy_count(&self) -> usize {
        self.state.lock().await.policies.len()
    }

    /// Policy documents attached to an identity.
    pub async fn attached_documents(&self, identity: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .identities
            .get(identity)
            .map(|i| {
                i.attached
                    .iter()
                    .filter_map(|arn| state.policies.get(arn).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityApi for MockIdentityApi {
    async fn identity_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("identity_exists:{}", name));
        state.faults.check("identity_exists")?;
        Ok(state.identities.contains_key(name))
    }

    async fn create_identity(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_identity:{}", name));
        state.faults.check("create_identity")?;
        if state.identities.contains_key(name) {
            bail!("EntityAlreadyExists: user {}", name);
        }
        state.identities.insert(name.to_string(), MockIdentity::default());
        Ok(format!("arn:aws:iam::mock:user/{}", name))
    }

    async fn create_access_key(&self, identity: &str) -> Result<AccessKeyPair> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_access_key:{}", identity));
        state.faults.check("create_access_key")?;
        state.next_key += 1;
        let n = state.next_key;
        let ident = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))?;
        let access_key_id = format!("AKIAMOCK{:012}", n);
        ident.keys.push(access_key_id.clone());
        Ok(AccessKeyPair {
            access_key_id,
            secret_access_key: format!("mock-secret-{:024}", n),
        })
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_policy:{}", name));
        state.faults.check("create_policy")?;
        let arn = format!("arn:aws:iam::mock:policy/{}", name);
        if state.policies.contains_key(&arn) {
            bail!("EntityAlreadyExists: policy {}", name);
        }
        state.policies.insert(arn.clone(), document.to_string());
        Ok(arn)
    }

    async fn find_policy(&self, name: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("find_policy:{}", name));
        state.faults.check("find_policy")?;
        let arn = format!("arn:aws:iam::mock:policy/{}", name);
        Ok(state.policies.contains_key(&arn).then_some(arn))
    }

    async fn attach_policy(&self, identity: &str, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("attach_policy:{}", identity));
        state.faults.check("attach_policy")?;
        if !state.policies.contains_key(policy) {
            bail!("NoSuchEntity: policy {}", policy);
        }
        let ident = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))?;
        if !ident.attached.iter().any(|p| p == policy) {
            ident.attached.push(policy.to_string());
        }
        Ok(())
    }

    async fn list_attached_policies(&self, identity: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("list_attached_policies:{}", identity));
        state.faults.check("list_attached_policies")?;
        state
            .identities
            .get(identity)
            .map(|i| i.attached.clone())
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))
    }

    async fn detach_policy(&self, identity: &str, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("detach_policy:{}", identity));
        state.faults.check("detach_policy")?;
        let ident = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))?;
        let before = ident.attached.len();
        ident.attached.retain(|p| p != policy);
        if ident.attached.len() == before {
            bail!("NoSuchEntity: policy {} not attached to {}", policy, identity);
        }
        Ok(())
    }

    async fn delete_policy(&self, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_policy:{}", policy));
        state.faults.check("delete_policy")?;
        if state
            .identities
            .values()
            .any(|i| i.attached.iter().any(|p| p == policy))
        {
            bail!("DeleteConflict: policy {} is attached", policy);
        }
        state
            .policies
            .remove(policy)
            .map(|_| ())
            .ok_or_else(|| anyhow!("NoSuchEntity: policy {}", policy))
    }

    async fn list_access_keys(&self, identity: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("list_access_keys:{}", identity));
        state.faults.check("list_access_keys")?;
        state
            .identities
            .get(identity)
            .map(|i| i.keys.clone())
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))
    }

    async fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_access_key:{}", identity));
        state.faults.check("delete_access_key")?;
        let ident = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| anyhow!("NoSuchEntity: user {}", identity))?;
        let before = ident.keys.len();
        ident.keys.retain(|k| k != access_key_id);
        if ident.keys.len() == before {
            bail!("NoSuchEntity: access key {}", access_key_id);
        }
        Ok(())
    }

    async fn delete_identity(&self, identity: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_identity:{}", identity));
        state.faults.check("delete_identity")?;
        let conflict = match state.identities.get(identity) {
            None => bail!("NoSuchEntity: user {}", identity),
            Some(i) => !i.keys.is_empty() || !i.attached.is_empty(),
        };
        if conflict {
            bail!("DeleteConflict: user {} still has keys or policies", identity);
        }
        state.identities.remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_spec(name: &str) -> ClusterSpec {
        ClusterSpec {
            identifier: name.to_string(),
            engine: "neptune".to_string(),
            subnet_group: "subnets".to_string(),
            security_group_id: "sg-1".to_string(),
            kms_key_id: "kms-1".to_string(),
            storage_encrypted: true,
            iam_auth: true,
        }
    }

    fn instance_spec(name: &str) -> InstanceSpec {
        InstanceSpec {
            identifier: name.to_string(),
            cluster_identifier: name.to_string(),
            instance_class: "db.r4.large".to_string(),
            engine: "neptune".to_string(),
            subnet_group: "subnets".to_string(),
            multi_az: false,
            storage_encrypted: true,
            tags: vec![("Name".to_string(), name.to_string())],
        }
    }

    #[tokio::test]
    async fn instance_becomes_available_only_when_marked() {
        let api = MockResourceLifecycle::new("us-east-1");
        api.create_cluster(&cluster_spec("db1")).await.unwrap();
        api.create_instance(&instance_spec("db1")).await.unwrap();

        let d = api.describe_instance("db1").await.unwrap().unwrap();
        assert!(!d.is_available());
        assert!(d.endpoint.is_none());

        assert!(api.mark_available("db1").await);
        let d = api.describe_instance("db1").await.unwrap().unwrap();
        assert!(d.is_available());
        assert_eq!(d.endpoint.unwrap().port, 8182);
        assert!(api.describe_instance("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cluster_cannot_be_deleted_before_its_instance() {
        let api = MockResourceLifecycle::new("us-east-1");
        api.create_cluster(&cluster_spec("db1")).await.unwrap();
        api.create_instance(&instance_spec("db1")).await.unwrap();

        assert!(api.delete_cluster("db1").await.is_err());
        api.delete_instance("db1").await.unwrap();
        api.delete_cluster("db1").await.unwrap();
        assert!(!api.cluster_exists("db1").await.unwrap());
    }

    #[tokio::test]
    async fn injected_faults_fire() {
        let api = MockResourceLifecycle::new("us-east-1");
        api.fail_once("create_cluster").await;
        assert!(api.create_cluster(&cluster_spec("db1")).await.is_err());
        assert!(api.create_cluster(&cluster_spec("db1")).await.is_ok());
    }

    #[tokio::test]
    async fn identity_with_keys_cannot_be_deleted() {
        let iam = MockIdentityApi::new();
        iam.create_identity("db1").await.unwrap();
        let key = iam.create_access_key("db1").await.unwrap();
        let arn = iam.create_policy("db1policy", "{}").await.unwrap();
        iam.attach_policy("db1", &arn).await.unwrap();

        assert!(iam.delete_identity("db1").await.is_err());
        assert!(iam.delete_policy(&arn).await.is_err());

        iam.detach_policy("db1", &arn).await.unwrap();
        iam.delete_policy(&arn).await.unwrap();
        iam.delete_access_key("db1", &key.access_key_id).await.unwrap();
        iam.delete_identity("db1").await.unwrap();
        assert_eq!(iam.identity_count().await, 0);
        assert_eq!(iam.policy_count().await, 0);
    }
}
