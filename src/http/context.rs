//! Per-request state threaded through the filter chain.

use axum::http::Extensions;
use uuid::Uuid;

use crate::net::ConnectionInfo;

/// State for one request, passed by `&mut` from filter to filter.
///
/// Values are keyed by type: a filter defines a small type (for example
/// `ClientId`) and inserts it; later filters read it back with `get`. A
/// value stays as written unless a later filter overwrites it. The context
/// is created when the request arrives and dropped when it completes, so
/// nothing may hold on to it past the call that received it.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    connection: ConnectionInfo,
    values: Extensions,
}

impl RequestContext {
    pub fn new(connection: ConnectionInfo) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            connection,
            values: Extensions::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The accepted connection carrying this request.
    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Store a value, returning the one it replaced.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.values.remove::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.values.get::<T>().is_some()
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> RequestContext {
    use crate::net::{AdmissionBudget, AdmissionPermit};
    use std::sync::Arc;

    let permit = AdmissionPermit::new(Arc::new(AdmissionBudget::new(0)));
    RequestContext::new(ConnectionInfo::new(
        "127.0.0.1:40000".parse().unwrap(),
        false,
        permit,
    ))
}
