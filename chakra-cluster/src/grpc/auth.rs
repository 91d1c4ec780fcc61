use std::sync::Arc;
use subtle::ConstantTimeEq;
use tonic::{Request, Status};
use tracing::warn;

/// Metadata key for cluster authentication shared secret
pub const AUTH_SECRET_METADATA_KEY: &str = "x-cluster-secret";

/// Requires the shared cluster secret on every control-plane request.
///
/// An empty secret disables the check.
#[derive(Clone)]
pub struct ClusterAuthInterceptor {
    secret: Arc<String>,
}

impl ClusterAuthInterceptor {
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn validate<T>(&self, request: Request<T>) -> Result<Request<T>, Status> {
        if self.secret.is_empty() {
            return Ok(request);
        }

        let provided = request
            .metadata()
            .get(AUTH_SECRET_METADATA_KEY)
            .ok_or_else(|| Status::unauthenticated("missing cluster authentication secret"))?
            .as_bytes();

        // ct_eq is false for slices of different length
        if bool::from(provided.ct_eq(self.secret.as_bytes())) {
            Ok(request)
        } else {
            warn!("Control-plane auth failed: invalid cluster secret");
            Err(Status::unauthenticated("invalid cluster authentication secret"))
        }
    }
}
