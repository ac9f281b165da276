//! Capability guard.
//!
//! One table decides which role may do what. Routers attach a capability with
//! [`AuthRouterExt::with_capability`]; handlers that need a finer check (for
//! example "own order or any order") call [`authorize`] directly.

use super::{auth_middleware, AuthUser};
use crate::entities::UserRole;
use crate::errors::ServiceError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageOwnCart,
    PlaceOrder,
    ViewOwnOrders,
    InitiatePayment,
    PayForAnyCart,
    ViewAllOrders,
    ManageOrders,
    ManageCarts,
    CreateManualOrder,
    ViewPayments,
}

impl Capability {
    fn granted_to(self, role: UserRole) -> bool {
        match self {
            Capability::ManageOwnCart
            | Capability::PlaceOrder
            | Capability::ViewOwnOrders
            | Capability::InitiatePayment => true,
            Capability::PayForAnyCart
            | Capability::ViewAllOrders
            | Capability::ManageOrders
            | Capability::ManageCarts
            | Capability::CreateManualOrder
            | Capability::ViewPayments => role == UserRole::Admin,
        }
    }
}

pub fn authorize(role: UserRole, capability: Capability) -> Result<(), ServiceError> {
    if capability.granted_to(role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "missing capability {:?}",
            capability
        )))
    }
}

pub async fn capability_middleware(
    State(capability): State<Capability>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

    authorize(user.role, capability)?;
    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_capability(self, capability: Capability) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_capability(self, capability: Capability) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            capability,
            capability_middleware,
        ))
        .with_auth()
    }
}
