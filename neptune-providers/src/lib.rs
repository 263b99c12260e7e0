use anyhow::Result;
use async_trait::async_trait;

/// Database provisioning API (clusters, instances, tags).
///
/// Deletions are accepted asynchronously by the provider; implementations
/// return once the request is accepted, not once the resource is gone.
#[async_trait]
pub trait ResourceLifecycle: Send + Sync {
    async fn create_cluster(&self, spec: &inventory::ClusterSpec) -> Result<inventory::ClusterHandle>;
    async fn create_instance(
        &self,
        spec: &inventory::InstanceSpec,
    ) -> Result<inventory::InstanceHandle>;

    /// Current status and endpoint of an instance. `Ok(None)` when the
    /// provider does not know the instance.
    async fn describe_instance(&self, name: &str) -> Result<Option<inventory::InstanceDescription>>;

    async fn cluster_exists(&self, name: &str) -> Result<bool>;

    async fn delete_instance(&self, name: &str) -> Result<()>;
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    async fn tag_resource(&self, resource: &inventory::ResourceRef, key: &str, value: &str) -> Result<()>;
}

/// Identity and access management API used to mint per-instance credentials.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn identity_exists(&self, name: &str) -> Result<bool>;
    async fn create_identity(&self, name: &str) -> Result<String>;
    async fn create_access_key(&self, identity: &str) -> Result<inventory::AccessKeyPair>;

    /// Returns the policy reference (ARN) used by attach/detach/delete.
    async fn create_policy(&self, name: &str, document: &str) -> Result<String>;
    /// Reference of the customer-managed policy called `name`, attached or not.
    async fn find_policy(&self, name: &str) -> Result<Option<String>>;
    async fn attach_policy(&self, identity: &str, policy: &str) -> Result<()>;
    async fn list_attached_policies(&self, identity: &str) -> Result<Vec<String>>;
    async fn detach_policy(&self, identity: &str, policy: &str) -> Result<()>;
    async fn delete_policy(&self, policy: &str) -> Result<()>;

    async fn list_access_keys(&self, identity: &str) -> Result<Vec<String>>;
    async fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()>;
    async fn delete_identity(&self, identity: &str) -> Result<()>;
}

pub mod inventory {
    /// Status string reported by the provider once an instance accepts connections.
    pub const STATUS_AVAILABLE: &str = "available";

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ClusterSpec {
        pub identifier: String,
        pub engine: String,
        pub subnet_group: String,
        pub security_group_id: String,
        pub kms_key_id: String,
        pub storage_encrypted: bool,
        pub iam_auth: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct InstanceSpec {
        pub identifier: String,
        pub cluster_identifier: String,
        pub instance_class: String,
        pub engine: String,
        pub subnet_group: String,
        pub multi_az: bool,
        pub storage_encrypted: bool,
        pub tags: Vec<(String, String)>,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ClusterHandle {
        pub identifier: String,
        /// Provider-internal id; credential policies must reference this,
        /// not the user-chosen identifier.
        pub resource_id: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct InstanceHandle {
        pub identifier: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Endpoint {
        pub address: String,
        pub port: u16,
    }

    impl std::fmt::Display for Endpoint {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}:{}", self.address, self.port)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct InstanceDescription {
        pub identifier: String,
        pub status: String,
        pub endpoint: Option<Endpoint>,
    }

    impl InstanceDescription {
        pub fn is_available(&self) -> bool {
            self.status.eq_ignore_ascii_case(STATUS_AVAILABLE)
        }
    }

    /// Taggable resources. Clusters and instances share an identifier but
    /// are tagged separately.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub enum ResourceRef {
        Cluster(String),
        Instance(String),
    }

    impl ResourceRef {
        pub fn identifier(&self) -> &str {
            match self {
                ResourceRef::Cluster(id) | ResourceRef::Instance(id) => id,
            }
        }
    }

    #[derive(Clone, PartialEq, Eq)]
    pub struct AccessKeyPair {
        pub access_key_id: String,
        pub secret_access_key: String,
    }

    impl std::fmt::Debug for AccessKeyPair {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("AccessKeyPair")
                .field("access_key_id", &self.access_key_id)
                .finish_non_exhaustive()
        }
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "aws")]
pub mod aws;
