//! Shared state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::AuthContext;

/// Per-service application state: the service itself plus what the auth
/// extractors need.
pub struct AppState<T> {
    pub service: Arc<T>,
    pub auth: AuthContext,
}

impl<T> AppState<T> {
    pub fn new(service: Arc<T>, auth: AuthContext) -> Arc<Self> {
        Arc::new(Self { service, auth })
    }
}

impl<T> FromRef<Arc<AppState<T>>> for AuthContext {
    fn from_ref(state: &Arc<AppState<T>>) -> Self {
        state.auth.clone()
    }
}
