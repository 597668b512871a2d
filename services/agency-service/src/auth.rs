//! Request authorization.
//!
//! Sessions are issued elsewhere; this service only receives opaque bearer
//! tokens. A token is resolved once per request into an [`AuthContext`]
//! carrying a typed [`Role`], and handlers check typed [`Permission`]s
//! against it instead of comparing role names.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::db::{self, TokenIdentity};
use crate::error::ServiceError;
use crate::models::TaskRecord;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    AccountManager,
    Qc,
    Agent,
    DataEntry,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ClientsRead,
    ClientsUpgrade,
    AssignmentsRegenerate,
    PostingTrigger,
    TasksRead,
    TasksUpdateStatus,
    QcReview,
    DashboardView,
    ActivityRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ClientsRead => "clients:read",
            Permission::ClientsUpgrade => "clients:upgrade",
            Permission::AssignmentsRegenerate => "assignments:regenerate",
            Permission::PostingTrigger => "posting:trigger",
            Permission::TasksRead => "tasks:read",
            Permission::TasksUpdateStatus => "tasks:update_status",
            Permission::QcReview => "qc:review",
            Permission::DashboardView => "dashboard:view",
            Permission::ActivityRead => "activity:read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::AccountManager => "am",
            Role::Qc => "qc",
            Role::Agent => "agent",
            Role::DataEntry => "data_entry",
            Role::Client => "client",
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin | Role::Manager => &[
                ClientsRead,
                ClientsUpgrade,
                AssignmentsRegenerate,
                PostingTrigger,
                TasksRead,
                TasksUpdateStatus,
                QcReview,
                DashboardView,
                ActivityRead,
            ],
            Role::AccountManager => &[
                ClientsRead,
                ClientsUpgrade,
                PostingTrigger,
                TasksRead,
                DashboardView,
            ],
            Role::Qc => &[TasksRead, TasksUpdateStatus, QcReview, DashboardView],
            Role::Agent | Role::DataEntry => &[TasksRead, TasksUpdateStatus],
            Role::Client => &[ClientsRead],
        }
    }

    /// Roles that may only touch tasks assigned to them.
    pub fn is_assignee_scoped(&self) -> bool {
        matches!(self, Role::Agent | Role::DataEntry)
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "am" | "account_manager" => Ok(Role::AccountManager),
            "qc" => Ok(Role::Qc),
            "agent" => Ok(Role::Agent),
            "data_entry" => Ok(Role::DataEntry),
            "client" => Ok(Role::Client),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub role: Role,
    pub client_id: Option<i64>,
}

impl AuthContext {
    pub fn has(&self, permission: Permission) -> bool {
        self.role.permissions().contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), ServiceError> {
        if self.has(permission) {
            return Ok(());
        }
        tracing::info!(
            user_id = self.user_id,
            role = self.role.as_str(),
            permission = permission.as_str(),
            "permission denied"
        );
        Err(ServiceError::with_reasons(
            axum::http::StatusCode::FORBIDDEN,
            "forbidden",
            "missing permission",
            vec![permission.to_string()],
        ))
    }

    /// Client users only ever see their own client record.
    pub fn require_client_scope(&self, client_id: i64) -> Result<(), ServiceError> {
        if self.role == Role::Client && self.client_id != Some(client_id) {
            return Err(ServiceError::forbidden("client outside of your account"));
        }
        Ok(())
    }

    pub fn require_task_scope(&self, task: &TaskRecord) -> Result<(), ServiceError> {
        if self.role.is_assignee_scoped() && task.assigned_to_id != Some(self.user_id) {
            return Err(ServiceError::forbidden("task is not assigned to you"));
        }
        Ok(())
    }

    pub fn permission_names(&self) -> Vec<&'static str> {
        self.role
            .permissions()
            .iter()
            .map(Permission::as_str)
            .collect()
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = required_token(&parts.headers)?;
        let token_hash = hash_token(token);

        let identity = {
            let db = state.db.lock().await;
            db::lookup_token(&*db, &token_hash)
                .await
                .map_err(|err| ServiceError::db("lookup token", err))?
        };
        context_for(identity)
    }
}

fn required_token(headers: &HeaderMap) -> Result<&str, ServiceError> {
    bearer_token(headers).ok_or_else(|| ServiceError::unauthorized("missing bearer token"))
}

/// Unknown tokens are 401; a known user whose role this service does not
/// recognise is 403.
fn context_for(identity: Option<TokenIdentity>) -> Result<AuthContext, ServiceError> {
    let Some(identity) = identity else {
        return Err(ServiceError::unauthorized("invalid or revoked token"));
    };

    let role = identity.role_name.parse::<Role>().map_err(|_| {
        tracing::warn!(
            user_id = identity.user_id,
            role = identity.role_name.as_str(),
            "unknown role"
        );
        ServiceError::forbidden("role has no access to this service")
    })?;

    Ok(AuthContext {
        user_id: identity.user_id,
        role,
        client_id: identity.client_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            user_id: 7,
            role,
            client_id: None,
        }
    }

    fn task(assigned_to_id: Option<i64>) -> TaskRecord {
        TaskRecord {
            id: 1,
            assignment_id: 1,
            name: "Profile".to_string(),
            status: "pending".to_string(),
            category_name: None,
            template_site_asset_id: None,
            assigned_to_id,
            due_date: None,
            completed_at: None,
        }
    }

    #[test]
    fn reads_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn token_hash_is_hex_sha256() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn role_names_parse() {
        assert_eq!("AM".parse::<Role>(), Ok(Role::AccountManager));
        assert_eq!("data_entry".parse::<Role>(), Ok(Role::DataEntry));
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn qc_can_review_but_not_upgrade() {
        let qc = context(Role::Qc);
        assert!(qc.require(Permission::QcReview).is_ok());
        let err = qc.require(Permission::ClientsUpgrade).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.body.reasons, vec!["clients:upgrade".to_string()]);
    }

    #[test]
    fn clients_are_limited_to_their_own_record() {
        let mut client = context(Role::Client);
        client.client_id = Some(3);
        assert!(client.require_client_scope(3).is_ok());
        assert!(client.require_client_scope(4).is_err());
        assert!(context(Role::Manager).require_client_scope(4).is_ok());
    }

    #[test]
    fn agents_only_touch_their_tasks() {
        let agent = context(Role::Agent);
        assert!(agent.require_task_scope(&task(Some(7))).is_ok());
        assert!(agent.require_task_scope(&task(Some(8))).is_err());
        assert!(agent.require_task_scope(&task(None)).is_err());
        assert!(context(Role::Qc).require_task_scope(&task(Some(8))).is_ok());
    }

    fn identity(role_name: &str) -> TokenIdentity {
        TokenIdentity {
            user_id: 11,
            role_name: role_name.to_string(),
            client_id: Some(3),
        }
    }

    #[test]
    fn missing_token_is_unauthorized() {
        let err = required_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(err.body.code, "unauthorized");

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert!(required_token(&headers).is_err());
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let err = context_for(None).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_role_is_forbidden() {
        let err = context_for(Some(identity("superuser"))).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.body.code, "forbidden");
    }

    #[test]
    fn known_role_builds_the_context() {
        let auth = context_for(Some(identity("Account_Manager"))).unwrap();
        assert_eq!(auth.user_id, 11);
        assert_eq!(auth.role, Role::AccountManager);
        assert_eq!(auth.client_id, Some(3));
    }

    #[test]
    fn admin_holds_every_permission() {
        let admin = context(Role::Admin);
        assert_eq!(admin.permission_names().len(), 9);
    }
}
