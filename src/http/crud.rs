//! CRUD controller.
//!
//! A controller declares which operations it allows on a securable resource. Each
//! operation takes the caller's [`Identity`] (from the auth middleware) and the request
//! parameters, checks the operation is allowed and hands back a [`CrudRequest`] ready to
//! be turned into a procedure call. Parameters arrive already validated by
//! [`ValidatedJson`](crate::http::validation::ValidatedJson).

use crate::auth::Identity;
use crate::error::DbError;
use crate::http::error::ApiError;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Create,
    Read,
    Update,
    Delete,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Read => write!(f, "READ"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SecurityRule {
    pub securable: &'static str,
    pub permission: Permission,
}

/// An authorized operation on behalf of an authenticated caller.
#[derive(Debug, Clone)]
pub struct CrudRequest<P> {
    pub credential: Identity,
    pub params: P,
}

#[derive(Debug, Clone, Copy)]
pub struct CrudController {
    rules: &'static [SecurityRule],
}

impl CrudController {
    pub const fn new(rules: &'static [SecurityRule]) -> Self {
        Self { rules }
    }

    pub fn create<P>(&self, credential: Identity, params: P) -> Result<CrudRequest<P>, ApiError> {
        self.authorize(Permission::Create, credential, params)
    }

    pub fn read<P>(&self, credential: Identity, params: P) -> Result<CrudRequest<P>, ApiError> {
        self.authorize(Permission::Read, credential, params)
    }

    pub fn update<P>(&self, credential: Identity, params: P) -> Result<CrudRequest<P>, ApiError> {
        self.authorize(Permission::Update, credential, params)
    }

    pub fn delete<P>(&self, credential: Identity, params: P) -> Result<CrudRequest<P>, ApiError> {
        self.authorize(Permission::Delete, credential, params)
    }

    fn authorize<P>(
        &self,
        permission: Permission,
        credential: Identity,
        params: P,
    ) -> Result<CrudRequest<P>, ApiError> {
        let Some(rule) = self.rules.iter().find(|r| r.permission == permission) else {
            return Err(DbError::internal(format!(
                "Operation {} is not configured on this controller",
                permission
            ))
            .into());
        };

        debug!(
            securable = rule.securable,
            permission = %permission,
            account_id = credential.account_id,
            user_id = credential.user_id,
            "CRUD operation authorized"
        );

        Ok(CrudRequest { credential, params })
    }
}
