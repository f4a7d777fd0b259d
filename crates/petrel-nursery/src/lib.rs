//! EC nursery replication.
//!
//! Objects written under an EC policy land whole in a per-device *nursery*
//! (`<drive_root>/<device>/ec/nursery/<hash>/`). The replicator walks the
//! nursery, derives each entry's partition from its hash, and either
//! propagates a tombstone (`.ts`) as fragment DELETEs or fans the data file
//! (`.data`) out as `k + m` parallel fragment PUTs fed by one streaming
//! split pass. An entry only leaves the retry pool when every responsible
//! node acknowledged.

mod error;
mod replicator;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tracing::warn;

pub use error::NurseryError;
pub use replicator::{NurseryReplicator, ReplicationStats};

/// The nursery trigger surface: `POST /ec-nursery/{device}` runs one
/// replication pass over that device's nursery.
pub fn router(replicator: Arc<NurseryReplicator>) -> Router {
    Router::new()
        .route("/ec-nursery/{device}", post(replicate_device))
        .with_state(replicator)
}

async fn replicate_device(
    State(replicator): State<Arc<NurseryReplicator>>,
    Path(device): Path<String>,
) -> Response {
    match replicator.replicate_device(&device).await {
        Ok(stats) => (StatusCode::OK, axum::Json(stats)).into_response(),
        Err(NurseryError::NoNursery(path)) => {
            warn!(path = %path.display(), "no nursery to replicate");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!(%device, %e, "nursery replication pass failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use petrel_proxy::testing::ScriptedBackend;
    use petrel_ring::StaticRing;
    use petrel_types::Device;
    use tower::util::ServiceExt;

    fn device(id: u64) -> Device {
        Device {
            id,
            scheme: "http".to_string(),
            host: format!("10.0.0.{id}"),
            port: 6000,
            device: format!("sd{id}"),
        }
    }

    #[tokio::test]
    async fn test_router_missing_device_nursery_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Arc::new(StaticRing::new((0..3).map(device).collect(), 3, 16, "p", "s"));
        let replicator = Arc::new(NurseryReplicator::new(
            Arc::new(ScriptedBackend::new()),
            ring,
            dir.path().to_path_buf(),
        ));
        let app = router(replicator);
        let resp = app
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/ec-nursery/ghost")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
