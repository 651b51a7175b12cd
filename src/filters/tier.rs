//! Service tier tagging.
//!
//! Membership is looked up through [`ProMembership`] so a deployment can
//! back it with something other than the static list from configuration.
//! The filter never rejects; it only marks pro clients with [`ProTier`].

use std::collections::HashSet;
use std::sync::Arc;

use axum::{body::Body, http::Request};
use futures_util::future::BoxFuture;

use crate::filters::{ClientId, Filter, FilterResult, Next};
use crate::http::context::RequestContext;

/// Context marker present when the client is on the pro tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProTier;

/// Answers whether a client is a pro user.
pub trait ProMembership: Send + Sync {
    fn is_pro(&self, client: &ClientId) -> bool;
}

/// Fixed set of pro client ids.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    users: HashSet<String>,
}

impl StaticMembership {
    pub fn new(users: impl IntoIterator<Item = String>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl ProMembership for StaticMembership {
    fn is_pro(&self, client: &ClientId) -> bool {
        self.users.contains(client.as_str())
    }
}

pub struct TierFilter {
    membership: Arc<dyn ProMembership>,
}

impl TierFilter {
    pub fn new(membership: Arc<dyn ProMembership>) -> Self {
        Self { membership }
    }
}

impl Filter for TierFilter {
    fn name(&self) -> &'static str {
        "tier"
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        req: Request<Body>,
        next: Next<'a>,
    ) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            let pro = ctx
                .get::<ClientId>()
                .is_some_and(|client| self.membership.is_pro(client));
            if pro {
                tracing::trace!(request_id = %ctx.request_id(), "Pro client");
                ctx.insert(ProTier);
            }
            next.run(ctx, req).await
        })
    }
}
