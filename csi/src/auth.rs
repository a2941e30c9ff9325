use system::AuthConfig;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::{CsiError, CsiResult};

pub const ACCESS_ID_HEADER: &str = "x-access-id";
pub const SECRET_KEY_HEADER: &str = "x-secret-key";

pub struct AuthContext {
    pub access_id: String,
    pub authenticated: bool,
}

fn header<'a>(metadata: &'a MetadataMap, name: &str) -> CsiResult<Option<&'a str>> {
    match metadata.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| CsiError::Unauthenticated(format!("Invalid {} header encoding", name))),
    }
}

/// Checks the credential metadata against the configured pair. With auth
/// disabled every caller is let through anonymously.
pub fn extract_auth_info(metadata: &MetadataMap, auth: &AuthConfig) -> CsiResult<AuthContext> {
    let access_id = header(metadata, ACCESS_ID_HEADER)?;
    let secret_key = header(metadata, SECRET_KEY_HEADER)?;

    if !auth.verify(access_id, secret_key) {
        return Err(CsiError::Unauthenticated(match access_id {
            Some(id) => format!("invalid credentials for access id {}", id),
            None => "missing credentials".to_string(),
        }));
    }

    Ok(AuthContext {
        access_id: access_id.unwrap_or("anonymous").to_string(),
        authenticated: auth.enabled,
    })
}

/// Rejects calls whose metadata fails `extract_auth_info`.
#[derive(Clone)]
pub struct AuthInterceptor {
    auth: AuthConfig,
}

impl AuthInterceptor {
    pub fn new(auth: AuthConfig) -> Self {
        Self { auth }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let ctx = extract_auth_info(request.metadata(), &self.auth)?;
        tracing::trace!(access_id = %ctx.access_id, authenticated = ctx.authenticated, "Request authorized");
        Ok(request)
    }
}
