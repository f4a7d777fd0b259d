//! [`ProxyClient`]: the composition of rings, dispatchers, and the
//! container-info cache behind the account/container/object operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode};
use petrel_ring::Ring;
use petrel_types::{ContainerInfo, Device, PolicyList, PolicyType};
use tracing::{debug, warn};

use crate::backend::{BackendClient, BackendRequest};
use crate::builder;
use crate::cache::{ContainerCache, SharedCache, parse_container_info};
use crate::dispatch;
use crate::error::ProxyError;
use crate::response::Response;
use crate::router::{ErroringObjectClient, ObjectBody, ObjectClient, ReplicatedObjectClient};
use crate::{POLICY_DEFAULT_HEADER, POLICY_INDEX_HEADER, STORAGE_POLICY_HEADER};

/// The proxy core: translates one client operation into coordinated backend
/// requests and returns a single representative [`Response`].
///
/// Owns the per-policy object clients; each client borrows the proxy back
/// through a weak handle for ring access, so the composition root builds the
/// whole cycle with [`Arc::new_cyclic`].
pub struct ProxyClient {
    pub(crate) backend: Arc<dyn BackendClient>,
    pub(crate) account_ring: Arc<dyn Ring>,
    pub(crate) container_ring: Arc<dyn Ring>,
    policies: PolicyList,
    object_clients: HashMap<usize, Arc<dyn ObjectClient>>,
    cache: ContainerCache,
}

impl ProxyClient {
    /// Assemble the proxy.
    ///
    /// `object_rings` maps each policy index to that policy's object ring;
    /// policies without a ring are skipped with a warning. EC-nursery
    /// policies get a device limit of their nursery replica count.
    pub fn new(
        backend: Arc<dyn BackendClient>,
        account_ring: Arc<dyn Ring>,
        container_ring: Arc<dyn Ring>,
        object_rings: HashMap<usize, Arc<dyn Ring>>,
        policies: PolicyList,
        shared_cache: Option<Arc<dyn SharedCache>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let mut object_clients: HashMap<usize, Arc<dyn ObjectClient>> = HashMap::new();
            for policy in policies.iter() {
                let Some(ring) = object_rings.get(&policy.index) else {
                    warn!(policy = policy.index, "no object ring for policy, skipping");
                    continue;
                };
                let device_limit = match policy.policy_type {
                    PolicyType::EcNursery => Some(policy.nursery_replica_count()),
                    PolicyType::Replicated => None,
                };
                object_clients.insert(
                    policy.index,
                    Arc::new(ReplicatedObjectClient {
                        proxy: weak.clone(),
                        policy_index: policy.index,
                        ring: ring.clone(),
                        device_limit,
                    }),
                );
            }
            Self {
                backend,
                account_ring,
                container_ring,
                policies,
                object_clients,
                cache: ContainerCache::new(shared_cache),
            }
        })
    }

    /// The container ring (account updates for container listings).
    pub fn container_ring(&self) -> Arc<dyn Ring> {
        self.container_ring.clone()
    }

    /// The account ring.
    pub fn account_ring(&self) -> Arc<dyn Ring> {
        self.account_ring.clone()
    }

    // -------------------------------------------------------------------
    // Account operations
    // -------------------------------------------------------------------

    /// Create or update an account on a quorum of its primaries.
    pub async fn put_account(&self, account: &str, headers: HeaderMap) -> Response {
        self.account_quorum(Method::PUT, account, headers).await
    }

    /// Update account metadata on a quorum of its primaries.
    pub async fn post_account(&self, account: &str, headers: HeaderMap) -> Response {
        self.account_quorum(Method::POST, account, headers).await
    }

    /// Delete an account on a quorum of its primaries.
    pub async fn delete_account(&self, account: &str, headers: HeaderMap) -> Response {
        self.account_quorum(Method::DELETE, account, headers).await
    }

    async fn account_quorum(&self, method: Method, account: &str, headers: HeaderMap) -> Response {
        let partition = self.account_ring.partition(account, "", "");
        let account = account.to_string();
        let build: Arc<dispatch::QuorumBuildFn> = Arc::new(move |_index: usize, dev: &Device| {
            let mut req =
                BackendRequest::new(method.clone(), builder::account_url(dev, partition, &account));
            builder::copy_headers(&mut req.headers, &headers);
            Ok(req)
        });
        dispatch::quorum_response(&self.backend, self.account_ring.as_ref(), partition, build).await
    }

    /// List an account from the first primary that answers acceptably.
    pub async fn get_account(
        &self,
        account: &str,
        options: &BTreeMap<String, String>,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.account_ring.partition(account, "", "");
        let query = builder::query_string(options);
        let account = account.to_string();
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = format!("{}{}", builder::account_url(dev, partition, &account), query);
            let mut req = BackendRequest::new(Method::GET, url);
            builder::copy_headers(&mut req.headers, &headers);
            Ok(req)
        });
        dispatch::first_response(&self.backend, self.account_ring.as_ref(), partition, None, build)
            .await
    }

    /// Fetch account metadata from the first answering primary.
    pub async fn head_account(&self, account: &str, headers: HeaderMap) -> Response {
        let partition = self.account_ring.partition(account, "", "");
        let account = account.to_string();
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let mut req =
                BackendRequest::new(Method::HEAD, builder::account_url(dev, partition, &account));
            builder::copy_headers(&mut req.headers, &headers);
            Ok(req)
        });
        dispatch::first_response(&self.backend, self.account_ring.as_ref(), partition, None, build)
            .await
    }

    // -------------------------------------------------------------------
    // Container operations
    // -------------------------------------------------------------------

    /// Create or update a container on a quorum of its primaries.
    ///
    /// Resolves `X-Storage-Policy` (400 on unknown or deprecated names) and
    /// carries the account update headers so backends can update listings
    /// asynchronously.
    pub async fn put_container(
        &self,
        account: &str,
        container: &str,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.container_ring.partition(account, container, "");
        let account_partition = self.account_ring.partition(account, "", "");
        let account_devices = self.account_ring.primaries(account_partition);
        let replicas = self.container_ring.replica_count();
        let policy_default = self.policies.default_index();

        let mut policy_index: Option<usize> = None;
        let policy_name = headers
            .get(STORAGE_POLICY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(name) = policy_name {
            match self.policies.name_lookup(name) {
                None => {
                    return Response::stub(
                        StatusCode::BAD_REQUEST,
                        format!("Invalid X-Storage-Policy {name:?}"),
                    );
                }
                Some(policy) if policy.deprecated => {
                    return Response::stub(
                        StatusCode::BAD_REQUEST,
                        format!("Storage Policy {name:?} is deprecated"),
                    );
                }
                Some(policy) => policy_index = Some(policy.index),
            }
        }

        let account = account.to_string();
        let container = container.to_string();
        let build: Arc<dispatch::QuorumBuildFn> = {
            let account = account.clone();
            let container = container.clone();
            Arc::new(move |index: usize, dev: &Device| {
                let url = builder::container_url(dev, partition, &account, &container);
                let mut req = BackendRequest::new(Method::PUT, url);
                builder::copy_headers(&mut req.headers, &headers);
                if let Some(policy_index) = policy_index {
                    builder::set_header(
                        &mut req.headers,
                        POLICY_INDEX_HEADER,
                        &policy_index.to_string(),
                    );
                }
                builder::set_header(
                    &mut req.headers,
                    POLICY_DEFAULT_HEADER,
                    &policy_default.to_string(),
                );
                builder::set_header(
                    &mut req.headers,
                    "X-Account-Partition",
                    &account_partition.to_string(),
                );
                builder::add_update_headers(
                    "X-Account",
                    &mut req.headers,
                    &account_devices,
                    index,
                    replicas,
                );
                Ok(req)
            })
        };
        let resp =
            dispatch::quorum_response(&self.backend, self.container_ring.as_ref(), partition, build)
                .await;
        self.cache.invalidate(&account, &container).await;
        resp
    }

    /// Update container metadata on a quorum of its primaries.
    pub async fn post_container(
        &self,
        account: &str,
        container: &str,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.container_ring.partition(account, container, "");
        let account_owned = account.to_string();
        let container_owned = container.to_string();
        let build: Arc<dispatch::QuorumBuildFn> = {
            let account = account_owned.clone();
            let container = container_owned.clone();
            Arc::new(move |_index: usize, dev: &Device| {
                let url = builder::container_url(dev, partition, &account, &container);
                let mut req = BackendRequest::new(Method::POST, url);
                builder::copy_headers(&mut req.headers, &headers);
                Ok(req)
            })
        };
        let resp =
            dispatch::quorum_response(&self.backend, self.container_ring.as_ref(), partition, build)
                .await;
        self.cache.invalidate(&account_owned, &container_owned).await;
        resp
    }

    /// List a container from the first primary that answers acceptably.
    pub async fn get_container(
        &self,
        account: &str,
        container: &str,
        options: &BTreeMap<String, String>,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.container_ring.partition(account, container, "");
        let query = builder::query_string(options);
        let account = account.to_string();
        let container = container.to_string();
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = format!(
                "{}{}",
                builder::container_url(dev, partition, &account, &container),
                query
            );
            let mut req = BackendRequest::new(Method::GET, url);
            builder::copy_headers(&mut req.headers, &headers);
            Ok(req)
        });
        dispatch::first_response(
            &self.backend,
            self.container_ring.as_ref(),
            partition,
            None,
            build,
        )
        .await
    }

    /// Fetch container metadata from the first answering primary.
    pub async fn head_container(
        &self,
        account: &str,
        container: &str,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.container_ring.partition(account, container, "");
        let account = account.to_string();
        let container = container.to_string();
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = builder::container_url(dev, partition, &account, &container);
            let mut req = BackendRequest::new(Method::HEAD, url);
            builder::copy_headers(&mut req.headers, &headers);
            Ok(req)
        });
        dispatch::first_response(
            &self.backend,
            self.container_ring.as_ref(),
            partition,
            None,
            build,
        )
        .await
    }

    /// Delete a container on a quorum of its primaries.
    pub async fn delete_container(
        &self,
        account: &str,
        container: &str,
        headers: HeaderMap,
    ) -> Response {
        let partition = self.container_ring.partition(account, container, "");
        let account_partition = self.account_ring.partition(account, "", "");
        let account_devices = self.account_ring.primaries(account_partition);
        let replicas = self.container_ring.replica_count();
        let account_owned = account.to_string();
        let container_owned = container.to_string();
        let build: Arc<dispatch::QuorumBuildFn> = {
            let account = account_owned.clone();
            let container = container_owned.clone();
            Arc::new(move |index: usize, dev: &Device| {
                let url = builder::container_url(dev, partition, &account, &container);
                let mut req = BackendRequest::new(Method::DELETE, url);
                builder::copy_headers(&mut req.headers, &headers);
                builder::set_header(
                    &mut req.headers,
                    "X-Account-Partition",
                    &account_partition.to_string(),
                );
                builder::add_update_headers(
                    "X-Account",
                    &mut req.headers,
                    &account_devices,
                    index,
                    replicas,
                );
                Ok(req)
            })
        };
        let resp =
            dispatch::quorum_response(&self.backend, self.container_ring.as_ref(), partition, build)
                .await;
        self.cache.invalidate(&account_owned, &container_owned).await;
        resp
    }

    // -------------------------------------------------------------------
    // Container info
    // -------------------------------------------------------------------

    /// Resolve container info: local cache → shared cache → HEAD container.
    pub async fn get_container_info(
        &self,
        account: &str,
        container: &str,
    ) -> Result<ContainerInfo, ProxyError> {
        if let Some(info) = self.cache.lookup(account, container).await {
            return Ok(info);
        }
        let resp = self.head_container(account, container, HeaderMap::new()).await;
        if !resp.status().is_success() {
            return Err(ProxyError::ContainerInfo {
                status: resp.status().as_u16(),
                account: account.to_string(),
                container: container.to_string(),
            });
        }
        let info = parse_container_info(resp.headers())?;
        debug!(account, container, policy = info.storage_policy_index, "cached container info");
        self.cache.store(account, container, &info).await;
        Ok(info)
    }

    /// Parse and cache container info from a response already in hand.
    pub async fn set_container_info(
        &self,
        account: &str,
        container: &str,
        resp: &Response,
    ) -> Result<ContainerInfo, ProxyError> {
        let info = parse_container_info(resp.headers())?;
        self.cache.store(account, container, &info).await;
        Ok(info)
    }

    // -------------------------------------------------------------------
    // Object operations
    // -------------------------------------------------------------------

    async fn object_client(&self, account: &str, container: &str) -> Arc<dyn ObjectClient> {
        match self.get_container_info(account, container).await {
            Ok(info) => match self.object_clients.get(&info.storage_policy_index) {
                Some(client) => client.clone(),
                None => Arc::new(ErroringObjectClient {
                    detail: format!(
                        "no object client for storage policy {}",
                        info.storage_policy_index
                    ),
                }),
            },
            Err(e) => Arc::new(ErroringObjectClient {
                detail: e.to_string(),
            }),
        }
    }

    /// Stream an object body to its policy's replicas.
    pub async fn put_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
        src: ObjectBody,
    ) -> Response {
        self.object_client(account, container)
            .await
            .put_object(account, container, object, headers, src)
            .await
    }

    /// Update object metadata via its policy's dispatcher.
    pub async fn post_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        self.object_client(account, container)
            .await
            .post_object(account, container, object, headers)
            .await
    }

    /// Fetch an object via its policy's dispatcher.
    pub async fn get_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        self.object_client(account, container)
            .await
            .get_object(account, container, object, headers)
            .await
    }

    /// Server-side content search via the policy's dispatcher.
    pub async fn grep_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        search: &str,
    ) -> Response {
        self.object_client(account, container)
            .await
            .grep_object(account, container, object, search)
            .await
    }

    /// Fetch object metadata via its policy's dispatcher.
    pub async fn head_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        self.object_client(account, container)
            .await
            .head_object(account, container, object, headers)
            .await
    }

    /// Delete an object via its policy's dispatcher.
    pub async fn delete_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        self.object_client(account, container)
            .await
            .delete_object(account, container, object, headers)
            .await
    }

    /// The object ring serving a container's policy.
    pub async fn object_ring_for(
        &self,
        account: &str,
        container: &str,
    ) -> Result<Arc<dyn Ring>, Response> {
        self.object_client(account, container).await.object_ring()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, ScriptedReply};
    use petrel_ring::StaticRing;
    use petrel_types::StoragePolicy;

    fn device(id: u64) -> Device {
        Device {
            id,
            scheme: "http".to_string(),
            host: format!("10.0.0.{id}"),
            port: 6000,
            device: format!("sd{id}"),
        }
    }

    fn static_ring(ids: std::ops::Range<u64>, replicas: usize) -> Arc<dyn Ring> {
        Arc::new(StaticRing::new(
            ids.map(device).collect(),
            replicas,
            16,
            "p",
            "s",
        ))
    }

    fn policies() -> PolicyList {
        PolicyList::new(vec![
            StoragePolicy {
                index: 0,
                name: "gold".to_string(),
                policy_type: PolicyType::Replicated,
                deprecated: false,
                nursery_replicas: None,
            },
            StoragePolicy {
                index: 1,
                name: "heck".to_string(),
                policy_type: PolicyType::EcNursery,
                deprecated: false,
                nursery_replicas: Some(3),
            },
            StoragePolicy {
                index: 2,
                name: "old".to_string(),
                policy_type: PolicyType::Replicated,
                deprecated: true,
                nursery_replicas: None,
            },
        ])
    }

    /// Account ring on devices 30..33, container ring on 20..23, policy-0
    /// objects on 1..4, policy-1 objects on 10..16 (EC-style wider ring).
    fn proxy(backend: Arc<dyn BackendClient>) -> Arc<ProxyClient> {
        let object_rings = HashMap::from([
            (0usize, static_ring(1..4, 3)),
            (1usize, static_ring(10..16, 6)),
            (2usize, static_ring(1..4, 3)),
        ]);
        ProxyClient::new(
            backend,
            static_ring(30..33, 3),
            static_ring(20..23, 3),
            object_rings,
            policies(),
            None,
        )
    }

    fn container_info_reply(policy: usize) -> ScriptedReply {
        ScriptedReply::status(204)
            .header("X-Container-Object-Count", "0")
            .header("X-Container-Bytes-Used", "0")
            .header("X-Backend-Storage-Policy-Index", &policy.to_string())
    }

    fn script_container_heads(mut backend: ScriptedBackend, policy: usize) -> ScriptedBackend {
        for id in 20..23 {
            backend = backend.on(
                "HEAD",
                &device(id).endpoint(),
                container_info_reply(policy),
            );
        }
        backend
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_account_quorum() {
        let mut backend = ScriptedBackend::new();
        for id in 30..33 {
            backend = backend.on("PUT", &device(id).endpoint(), ScriptedReply::status(201));
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());
        let resp = proxy.put_account("AUTH_test", HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(backend.request_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_object_with_replica_refusing_handshake() {
        // Scenario: R=3 object PUT; one replica refuses the 100-continue
        // handshake (503, never reads the body). The copy starts once the
        // other two commit, final statuses 201/201/503, client sees 201.
        let mut backend = ScriptedBackend::new();
        backend = script_container_heads(backend, 0);
        let object_ring = static_ring(1..4, 3);
        let partition = object_ring.partition("AUTH_test", "pics", "cat.jpg");
        let primaries = object_ring.primaries(partition);
        backend = backend
            .on("PUT", &primaries[0].endpoint(), ScriptedReply::status(201))
            .on("PUT", &primaries[1].endpoint(), ScriptedReply::status(201))
            .on(
                "PUT",
                &primaries[2].endpoint(),
                ScriptedReply::status(503).refuse_body(),
            );
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let body: ObjectBody = Box::new(&b"a body worth replicating"[..]);
        let resp = proxy
            .put_object("AUTH_test", "pics", "cat.jpg", HeaderMap::new(), body)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let puts: Vec<_> = backend
            .requests()
            .await
            .into_iter()
            .filter(|r| r.method == Method::PUT)
            .collect();
        assert_eq!(puts.len(), 3);
        let committed: Vec<_> = puts.iter().filter(|r| !r.body.is_empty()).collect();
        assert_eq!(committed.len(), 2, "two replicas received the body");
        for put in &committed {
            assert_eq!(&put.body[..], b"a body worth replicating");
            assert_eq!(put.headers.get("expect").unwrap(), "100-continue");
            assert_eq!(put.headers.get(POLICY_INDEX_HEADER).unwrap(), "0");
            assert!(put.headers.contains_key("x-container-partition"));
            assert!(put.headers.contains_key("x-container-host"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_routing_follows_policy_index() {
        // Container info says policy 1; the GET must go to policy 1's ring
        // (devices 10..16), never policy 0's.
        let mut backend = ScriptedBackend::new();
        backend = script_container_heads(backend, 1);
        for id in 10..16 {
            backend = backend.on(
                "GET",
                &device(id).endpoint(),
                ScriptedReply::status(200).body(&b"frag"[..]),
            );
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let resp = proxy
            .get_object("AUTH_test", "staging", "obj", HeaderMap::new())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        for req in backend.requests().await {
            if req.method == Method::GET {
                let on_policy_one = (10..16).any(|id| req.url.contains(&device(id).endpoint()));
                assert!(on_policy_one, "GET hit a non-policy-1 device: {}", req.url);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_ops_500_when_container_info_unavailable() {
        // All container HEADs 404: the router must answer with a synthetic
        // 500 for every object method.
        let mut backend = ScriptedBackend::new();
        for id in 20..23 {
            backend = backend.on("HEAD", &device(id).endpoint(), ScriptedReply::status(404));
        }
        let proxy = proxy(Arc::new(backend));

        let resp = proxy
            .get_object("AUTH_test", "ghost", "obj", HeaderMap::new())
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.detail().unwrap().contains("ghost"));

        let resp = proxy
            .delete_object("AUTH_test", "ghost", "obj", HeaderMap::new())
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert!(proxy.object_ring_for("AUTH_test", "ghost").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_mutation_invalidates_info_cache() {
        let mut backend = ScriptedBackend::new();
        backend = script_container_heads(backend, 0);
        for id in 20..23 {
            backend = backend.on("PUT", &device(id).endpoint(), ScriptedReply::status(202));
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let head_count = |reqs: Vec<crate::testing::RecordedRequest>| {
            reqs.iter().filter(|r| r.method == Method::HEAD).count()
        };

        proxy.get_container_info("AUTH_test", "c").await.unwrap();
        proxy.get_container_info("AUTH_test", "c").await.unwrap();
        assert_eq!(
            head_count(backend.requests().await),
            1,
            "second lookup must come from cache"
        );

        let resp = proxy
            .put_container("AUTH_test", "c", HeaderMap::new())
            .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        proxy.get_container_info("AUTH_test", "c").await.unwrap();
        assert_eq!(
            head_count(backend.requests().await),
            2,
            "mutation must invalidate the cache"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_container_rejects_unknown_policy() {
        let proxy = proxy(Arc::new(ScriptedBackend::new()));
        let mut headers = HeaderMap::new();
        builder::set_header(&mut headers, STORAGE_POLICY_HEADER, "no-such-policy");
        let resp = proxy.put_container("AUTH_test", "c", headers).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.detail().unwrap().contains("no-such-policy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_container_rejects_deprecated_policy() {
        let proxy = proxy(Arc::new(ScriptedBackend::new()));
        let mut headers = HeaderMap::new();
        builder::set_header(&mut headers, STORAGE_POLICY_HEADER, "old");
        let resp = proxy.put_container("AUTH_test", "c", headers).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.detail().unwrap().contains("deprecated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_container_carries_policy_and_update_headers() {
        let mut backend = ScriptedBackend::new();
        for id in 20..23 {
            backend = backend.on("PUT", &device(id).endpoint(), ScriptedReply::status(201));
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let mut headers = HeaderMap::new();
        builder::set_header(&mut headers, STORAGE_POLICY_HEADER, "heck");
        let resp = proxy.put_container("AUTH_test", "c", headers).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        for req in backend.requests().await {
            assert_eq!(req.headers.get(POLICY_INDEX_HEADER).unwrap(), "1");
            assert_eq!(req.headers.get(POLICY_DEFAULT_HEADER).unwrap(), "0");
            assert!(req.headers.contains_key("x-account-partition"));
            assert!(req.headers.contains_key("x-account-host"));
            assert!(req.headers.contains_key("x-account-device"));
            assert!(req.headers.contains_key("x-account-scheme"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_account_passes_query_options() {
        let mut backend = ScriptedBackend::new();
        for id in 30..33 {
            backend = backend.on("GET", &device(id).endpoint(), ScriptedReply::status(200));
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let options = BTreeMap::from([
            ("format".to_string(), "json".to_string()),
            ("marker".to_string(), "m".to_string()),
        ]);
        let resp = proxy
            .get_account("AUTH_test", &options, HeaderMap::new())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let req = &backend.requests().await[0];
        assert!(req.url.ends_with("?format=json&marker=m"), "url: {}", req.url);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nursery_policy_grep_reaches_a_device() {
        let mut backend = ScriptedBackend::new();
        backend = script_container_heads(backend, 1);
        for id in 10..16 {
            backend = backend.on("GREP", &device(id).endpoint(), ScriptedReply::status(200));
        }
        let backend = Arc::new(backend);
        let proxy = proxy(backend.clone());

        let resp = proxy
            .grep_object("AUTH_test", "staging", "obj", "needle")
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let greps: Vec<_> = backend
            .requests()
            .await
            .into_iter()
            .filter(|r| r.method.as_str() == "GREP")
            .collect();
        assert!(!greps.is_empty());
        assert!(greps[0].url.contains("?e=needle"));
    }
}
