//! Per-policy object dispatchers.
//!
//! Every object operation resolves container → storage-policy index → an
//! [`ObjectClient`]. The replicated client drives the quorum/first-response
//! machinery against the policy's object ring; the erroring client stands in
//! when container info cannot be fetched and answers 500 to everything.

use std::sync::{Arc, Weak};

use http::{HeaderMap, HeaderValue, Method, header};
use petrel_ring::{Handoffs, Ring};
use petrel_types::Device;
use tokio::io::AsyncRead;

use crate::backend::{BackendBody, BackendRequest, OBJECT_TRANSFER_TIMEOUT};
use crate::builder;
use crate::client::ProxyClient;
use crate::dispatch;
use crate::error::ProxyError;
use crate::response::Response;
use crate::POLICY_INDEX_HEADER;
use crate::stream;

/// A client-supplied object body.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Dispatcher for the objects of one storage policy.
#[async_trait::async_trait]
pub trait ObjectClient: Send + Sync {
    /// Stream an object body to a quorum of replicas.
    async fn put_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
        src: ObjectBody,
    ) -> Response;

    /// Update object metadata on a quorum of replicas.
    async fn post_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response;

    /// Fetch the object from the first replica that answers acceptably.
    async fn get_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response;

    /// Server-side content search against the first answering replica.
    async fn grep_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        search: &str,
    ) -> Response;

    /// Fetch object metadata from the first replica that answers acceptably.
    async fn head_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response;

    /// Delete the object on a quorum of replicas.
    async fn delete_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response;

    /// The object ring this client dispatches against.
    fn object_ring(&self) -> Result<Arc<dyn Ring>, Response>;
}

/// Stand-in client used when container info cannot be resolved.
pub(crate) struct ErroringObjectClient {
    pub(crate) detail: String,
}

impl ErroringObjectClient {
    fn stub(&self) -> Response {
        Response::stub(http::StatusCode::INTERNAL_SERVER_ERROR, self.detail.clone())
    }
}

#[async_trait::async_trait]
impl ObjectClient for ErroringObjectClient {
    async fn put_object(&self, _: &str, _: &str, _: &str, _: HeaderMap, _: ObjectBody) -> Response {
        self.stub()
    }
    async fn post_object(&self, _: &str, _: &str, _: &str, _: HeaderMap) -> Response {
        self.stub()
    }
    async fn get_object(&self, _: &str, _: &str, _: &str, _: HeaderMap) -> Response {
        self.stub()
    }
    async fn grep_object(&self, _: &str, _: &str, _: &str, _: &str) -> Response {
        self.stub()
    }
    async fn head_object(&self, _: &str, _: &str, _: &str, _: HeaderMap) -> Response {
        self.stub()
    }
    async fn delete_object(&self, _: &str, _: &str, _: &str, _: HeaderMap) -> Response {
        self.stub()
    }
    fn object_ring(&self) -> Result<Arc<dyn Ring>, Response> {
        Err(self.stub())
    }
}

/// The standard object dispatcher for replicated and nursery policies.
///
/// Holds a non-owning handle back to the proxy (which owns this client) for
/// the container ring and the backend transport.
pub(crate) struct ReplicatedObjectClient {
    pub(crate) proxy: Weak<ProxyClient>,
    pub(crate) policy_index: usize,
    pub(crate) ring: Arc<dyn Ring>,
    /// Nursery policies cap the write/read fan-out below the ring's
    /// replica count.
    pub(crate) device_limit: Option<usize>,
}

impl ReplicatedObjectClient {
    fn proxy(&self) -> Result<Arc<ProxyClient>, Response> {
        self.proxy.upgrade().ok_or_else(|| {
            Response::stub(
                http::StatusCode::INTERNAL_SERVER_ERROR,
                ProxyError::CoreGone.to_string(),
            )
        })
    }

    /// Devices to write to, and the handoff stream behind them.
    ///
    /// With a device limit, primaries past the limit become the leading
    /// handoffs; either way handoff draws are capped at the write width so
    /// one bad partition cannot walk the whole cluster.
    fn write_nodes(&self, partition: u64) -> (Vec<Device>, Handoffs) {
        let mut devs = self.ring.primaries(partition);
        let handoffs = self.ring.handoffs(partition);
        match self.device_limit {
            Some(limit) if devs.len() > limit => {
                let leftover = devs.split_off(limit);
                let handoffs = Handoffs::with_front(leftover, handoffs, limit);
                (devs, handoffs)
            }
            _ => {
                let limit = devs.len();
                (devs, Handoffs::with_front(Vec::new(), handoffs, limit))
            }
        }
    }
}

#[async_trait::async_trait]
impl ObjectClient for ReplicatedObjectClient {
    async fn put_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
        src: ObjectBody,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let container_partition = proxy.container_ring.partition(account, container, "");
        let container_devices = proxy.container_ring.primaries(container_partition);
        let (devs, handoffs) = self.write_nodes(partition);
        let replicas = devs.len();

        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let policy_index = self.policy_index;
        let build: Arc<stream::PutBuildFn> = Arc::new(
            move |index: usize, dev: &Device, body: stream::PutBody| {
                let url = builder::object_url(dev, partition, &account, &container, &object);
                let mut req = BackendRequest::new(Method::PUT, url);
                req.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                builder::copy_headers(&mut req.headers, &headers);
                builder::set_header(
                    &mut req.headers,
                    POLICY_INDEX_HEADER,
                    &policy_index.to_string(),
                );
                builder::set_header(
                    &mut req.headers,
                    "X-Container-Partition",
                    &container_partition.to_string(),
                );
                builder::add_update_headers(
                    "X-Container",
                    &mut req.headers,
                    &container_devices,
                    index,
                    replicas,
                );
                req.headers
                    .insert(header::EXPECT, HeaderValue::from_static("100-continue"));
                req.body = BackendBody::Stream(Box::pin(body));
                req.timeout = OBJECT_TRANSFER_TIMEOUT;
                Ok(req)
            },
        );
        stream::quorum_put(&proxy.backend, devs, handoffs, build, src).await
    }

    async fn post_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let container_partition = proxy.container_ring.partition(account, container, "");
        let container_devices = proxy.container_ring.primaries(container_partition);
        let replicas = self.ring.replica_count();

        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let policy_index = self.policy_index;
        let build: Arc<dispatch::QuorumBuildFn> = Arc::new(move |index: usize, dev: &Device| {
            let url = builder::object_url(dev, partition, &account, &container, &object);
            let mut req = BackendRequest::new(Method::POST, url);
            builder::copy_headers(&mut req.headers, &headers);
            builder::set_header(
                &mut req.headers,
                POLICY_INDEX_HEADER,
                &policy_index.to_string(),
            );
            builder::set_header(
                &mut req.headers,
                "X-Container-Partition",
                &container_partition.to_string(),
            );
            builder::add_update_headers(
                "X-Container",
                &mut req.headers,
                &container_devices,
                index,
                replicas,
            );
            Ok(req)
        });
        dispatch::quorum_response(&proxy.backend, self.ring.as_ref(), partition, build).await
    }

    async fn get_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let policy_index = self.policy_index;
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = builder::object_url(dev, partition, &account, &container, &object);
            let mut req = BackendRequest::new(Method::GET, url);
            builder::copy_headers(&mut req.headers, &headers);
            builder::set_header(
                &mut req.headers,
                POLICY_INDEX_HEADER,
                &policy_index.to_string(),
            );
            req.timeout = OBJECT_TRANSFER_TIMEOUT;
            Ok(req)
        });
        dispatch::first_response(
            &proxy.backend,
            self.ring.as_ref(),
            partition,
            self.device_limit,
            build,
        )
        .await
    }

    async fn grep_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        search: &str,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let search = builder::urlencode(search);
        let policy_index = self.policy_index;
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = format!(
                "{}?e={}",
                builder::object_url(dev, partition, &account, &container, &object),
                search
            );
            let method = Method::from_bytes(b"GREP").expect("valid method");
            let mut req = BackendRequest::new(method, url);
            builder::set_header(
                &mut req.headers,
                POLICY_INDEX_HEADER,
                &policy_index.to_string(),
            );
            Ok(req)
        });
        dispatch::first_response(
            &proxy.backend,
            self.ring.as_ref(),
            partition,
            self.device_limit,
            build,
        )
        .await
    }

    async fn head_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let policy_index = self.policy_index;
        let build: Arc<dispatch::ReadBuildFn> = Arc::new(move |dev: &Device| {
            let url = builder::object_url(dev, partition, &account, &container, &object);
            let mut req = BackendRequest::new(Method::HEAD, url);
            builder::copy_headers(&mut req.headers, &headers);
            builder::set_header(
                &mut req.headers,
                POLICY_INDEX_HEADER,
                &policy_index.to_string(),
            );
            Ok(req)
        });
        dispatch::first_response(
            &proxy.backend,
            self.ring.as_ref(),
            partition,
            self.device_limit,
            build,
        )
        .await
    }

    async fn delete_object(
        &self,
        account: &str,
        container: &str,
        object: &str,
        headers: HeaderMap,
    ) -> Response {
        let proxy = match self.proxy() {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let partition = self.ring.partition(account, container, object);
        let container_partition = proxy.container_ring.partition(account, container, "");
        let container_devices = proxy.container_ring.primaries(container_partition);
        let replicas = self.ring.replica_count();

        let account = account.to_string();
        let container = container.to_string();
        let object = object.to_string();
        let policy_index = self.policy_index;
        let build: Arc<dispatch::QuorumBuildFn> = Arc::new(move |index: usize, dev: &Device| {
            let url = builder::object_url(dev, partition, &account, &container, &object);
            let mut req = BackendRequest::new(Method::DELETE, url);
            builder::copy_headers(&mut req.headers, &headers);
            if !req.headers.contains_key(header::CONTENT_TYPE) {
                req.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
            }
            builder::set_header(
                &mut req.headers,
                POLICY_INDEX_HEADER,
                &policy_index.to_string(),
            );
            builder::set_header(
                &mut req.headers,
                "X-Container-Partition",
                &container_partition.to_string(),
            );
            builder::add_update_headers(
                "X-Container",
                &mut req.headers,
                &container_devices,
                index,
                replicas,
            );
            Ok(req)
        });
        dispatch::quorum_response(&proxy.backend, self.ring.as_ref(), partition, build).await
    }

    fn object_ring(&self) -> Result<Arc<dyn Ring>, Response> {
        Ok(self.ring.clone())
    }
}
