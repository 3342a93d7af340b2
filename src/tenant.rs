//! Tenant context resolution.
//!
//! Every operator-facing operation takes a [`TenantContext`] and every device-facing
//! one an [`OrganizationScope`]; both implement [`TenantScoped`], which is the only way
//! the rest of the crate learns which organization a query belongs to.

use crate::entities;
use crate::errors::TetherError;
use crate::principal::Principal;
use crate::storage;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Active,
    Suspended,
    Cancelled,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Suspended => "suspended",
            OrganizationStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrganizationStatus {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrganizationStatus::Active),
            "suspended" => Ok(OrganizationStatus::Suspended),
            "cancelled" => Ok(OrganizationStatus::Cancelled),
            other => Err(TetherError::BadRequest(format!(
                "unknown organization status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }

    pub fn permissions(&self) -> PermissionSet {
        use Permission::*;
        let granted: &[Permission] = match self {
            Role::Owner | Role::Admin => &[
                ViewDevices,
                ManageDevices,
                ManagePairing,
                IssueCommands,
                IssueDestructiveCommands,
                CancelCommands,
            ],
            Role::Operator => &[ViewDevices, ManagePairing, IssueCommands, CancelCommands],
            Role::Viewer => &[ViewDevices],
        };
        PermissionSet(granted.iter().copied().collect())
    }
}

impl FromStr for Role {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "viewer" => Ok(Role::Viewer),
            other => Err(TetherError::BadRequest(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewDevices,
    ManageDevices,
    ManagePairing,
    IssueCommands,
    IssueDestructiveCommands,
    CancelCommands,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::ViewDevices => "view_devices",
            Permission::ManageDevices => "manage_devices",
            Permission::ManagePairing => "manage_pairing",
            Permission::IssueCommands => "issue_commands",
            Permission::IssueDestructiveCommands => "issue_destructive_commands",
            Permission::CancelCommands => "cancel_commands",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub status: OrganizationStatus,
    pub max_devices: i64,
    pub max_users: i64,
    pub created_at: i64,
}

impl TryFrom<entities::organization::Model> for Organization {
    type Error = TetherError;

    fn try_from(model: entities::organization::Model) -> Result<Self, Self::Error> {
        Ok(Organization {
            status: model.status.parse()?,
            id: model.id,
            name: model.name,
            max_devices: model.max_devices,
            max_users: model.max_users,
            created_at: model.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrganization {
    /// Caller-chosen id; generated when absent
    pub id: Option<String>,
    pub name: String,
    pub max_devices: i64,
    pub max_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub organization_id: String,
    pub subject: String,
    pub role: Role,
    pub created_at: i64,
}

/// Anything that pins a query to one organization.
pub trait TenantScoped {
    fn organization_id(&self) -> &str;
}

/// Resolved operator context: a verified principal, its active organization and the
/// permissions its membership grants there.
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    pub subject: String,
    pub organization: Organization,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl TenantContext {
    pub fn require(&self, permission: Permission) -> Result<(), TetherError> {
        if self.permissions.contains(permission) {
            Ok(())
        } else {
            Err(TetherError::Forbidden(format!(
                "role '{}' lacks permission '{}'",
                self.role.as_str(),
                permission
            )))
        }
    }
}

impl TenantScoped for TenantContext {
    fn organization_id(&self) -> &str {
        &self.organization.id
    }
}

/// Organization asserted by a device-originated request and checked to be active.
#[derive(Debug, Clone)]
pub struct OrganizationScope {
    pub organization: Organization,
}

impl TenantScoped for OrganizationScope {
    fn organization_id(&self) -> &str {
        &self.organization.id
    }
}

/// Resolve an authenticated principal into its tenant context.
///
/// Fails with `Unauthorized` when there is no usable principal and with `Forbidden`
/// when the principal has no membership in an active organization.
pub async fn resolve<C: ConnectionTrait>(
    db: &C,
    principal: &Principal,
) -> Result<TenantContext, TetherError> {
    if principal.subject.trim().is_empty() {
        return Err(TetherError::Unauthorized("missing principal".to_string()));
    }

    let membership = match principal.organization_id.as_deref() {
        Some(org_id) => get_membership(db, org_id, &principal.subject)
            .await?
            .ok_or_else(|| {
                TetherError::Forbidden("principal is not a member of this organization".to_string())
            })?,
        None => {
            let mut memberships = list_memberships_for_subject(db, &principal.subject).await?;
            match memberships.len() {
                0 => {
                    return Err(TetherError::Forbidden(
                        "principal has no organization membership".to_string(),
                    ))
                }
                1 => memberships.remove(0),
                _ => {
                    return Err(TetherError::BadRequest(
                        "principal belongs to several organizations; select one".to_string(),
                    ))
                }
            }
        }
    };

    let organization = get_organization(db, &membership.organization_id)
        .await?
        .ok_or_else(|| TetherError::Forbidden("organization not found".to_string()))?;
    ensure_active(&organization)?;

    Ok(TenantContext {
        subject: principal.subject.clone(),
        permissions: membership.role.permissions(),
        role: membership.role,
        organization,
    })
}

/// Resolve the organization a device request claims to belong to.
pub async fn resolve_organization<C: ConnectionTrait>(
    db: &C,
    organization_id: Option<&str>,
) -> Result<OrganizationScope, TetherError> {
    let organization_id = organization_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TetherError::Unauthorized("missing organization id".to_string()))?;

    let organization = get_organization(db, organization_id)
        .await?
        .ok_or_else(|| TetherError::Forbidden("unknown organization".to_string()))?;
    ensure_active(&organization)?;

    Ok(OrganizationScope { organization })
}

fn ensure_active(organization: &Organization) -> Result<(), TetherError> {
    match organization.status {
        OrganizationStatus::Active => Ok(()),
        other => Err(TetherError::Forbidden(format!(
            "organization is {}",
            other.as_str()
        ))),
    }
}

// Organization and membership storage

pub async fn create_organization<C: ConnectionTrait>(
    db: &C,
    input: NewOrganization,
) -> Result<Organization, TetherError> {
    if input.name.trim().is_empty() {
        return Err(TetherError::BadRequest("organization name is required".to_string()));
    }
    if input.max_devices < 0 || input.max_users < 0 {
        return Err(TetherError::BadRequest("plan limits must not be negative".to_string()));
    }

    let now = storage::now();
    let id = input.id.unwrap_or_else(storage::random_id);

    let model = entities::organization::ActiveModel {
        id: Set(id),
        name: Set(input.name),
        status: Set(OrganizationStatus::Active.as_str().to_string()),
        max_devices: Set(input.max_devices),
        max_users: Set(input.max_users),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    tracing::info!(organization_id = %model.id, "Created organization");
    model.try_into()
}

pub async fn get_organization<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
) -> Result<Option<Organization>, TetherError> {
    entities::Organization::find_by_id(organization_id.to_string())
        .one(db)
        .await?
        .map(Organization::try_from)
        .transpose()
}

/// Soft-disable (or re-enable) an organization. Organizations are never hard-deleted.
pub async fn set_organization_status<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
    status: OrganizationStatus,
) -> Result<Organization, TetherError> {
    let model = entities::Organization::find_by_id(organization_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| TetherError::NotFound("organization not found".to_string()))?;

    let mut active = model.into_active_model();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(storage::now());
    let model = active.update(db).await?;

    tracing::info!(organization_id, status = status.as_str(), "Organization status changed");
    model.try_into()
}

pub async fn update_organization<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
    name: &str,
    max_devices: i64,
    max_users: i64,
) -> Result<Organization, TetherError> {
    let model = entities::Organization::find_by_id(organization_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| TetherError::NotFound("organization not found".to_string()))?;

    let mut active = model.into_active_model();
    active.name = Set(name.to_string());
    active.max_devices = Set(max_devices);
    active.max_users = Set(max_users);
    active.updated_at = Set(storage::now());
    active.update(db).await?.try_into()
}

pub async fn get_membership<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
    subject: &str,
) -> Result<Option<Membership>, TetherError> {
    entities::Membership::find_by_id((organization_id.to_string(), subject.to_string()))
        .one(db)
        .await?
        .map(membership_from_model)
        .transpose()
}

pub async fn list_memberships_for_subject<C: ConnectionTrait>(
    db: &C,
    subject: &str,
) -> Result<Vec<Membership>, TetherError> {
    use entities::membership::{Column, Entity};

    Entity::find()
        .filter(Column::Subject.eq(subject))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(membership_from_model)
        .collect()
}

/// Add a member or change an existing member's role. New members count against the
/// organization's user limit.
pub async fn upsert_membership<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
    subject: &str,
    role: Role,
) -> Result<Membership, TetherError> {
    use entities::membership::{Column, Entity};

    let organization = get_organization(db, organization_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("organization not found".to_string()))?;

    if let Some(existing) = Entity::find_by_id((organization_id.to_string(), subject.to_string()))
        .one(db)
        .await?
    {
        let mut active = existing.into_active_model();
        active.role = Set(role.as_str().to_string());
        return membership_from_model(active.update(db).await?);
    }

    let members = Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .count(db)
        .await?;
    if members as i64 >= organization.max_users {
        return Err(TetherError::LimitExceeded(format!(
            "organization allows at most {} users",
            organization.max_users
        )));
    }

    let model = entities::membership::ActiveModel {
        organization_id: Set(organization_id.to_string()),
        subject: Set(subject.to_string()),
        role: Set(role.as_str().to_string()),
        created_at: Set(storage::now()),
    }
    .insert(db)
    .await?;

    membership_from_model(model)
}

pub async fn remove_membership<C: ConnectionTrait>(
    db: &C,
    organization_id: &str,
    subject: &str,
) -> Result<bool, TetherError> {
    let result =
        entities::Membership::delete_by_id((organization_id.to_string(), subject.to_string()))
            .exec(db)
            .await?;
    Ok(result.rows_affected > 0)
}

fn membership_from_model(model: entities::membership::Model) -> Result<Membership, TetherError> {
    Ok(Membership {
        role: model.role.parse()?,
        organization_id: model.organization_id,
        subject: model.subject,
        created_at: model.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_cannot_issue_commands() {
        let perms = Role::Viewer.permissions();
        assert!(perms.contains(Permission::ViewDevices));
        assert!(!perms.contains(Permission::IssueCommands));
        assert!(!perms.contains(Permission::ManagePairing));
    }

    #[test]
    fn test_only_admins_issue_destructive_commands() {
        assert!(!Role::Operator
            .permissions()
            .contains(Permission::IssueDestructiveCommands));
        assert!(Role::Admin
            .permissions()
            .contains(Permission::IssueDestructiveCommands));
        assert!(Role::Owner
            .permissions()
            .contains(Permission::IssueDestructiveCommands));
    }

    #[test]
    fn test_require_reports_missing_permission() {
        let ctx = TenantContext {
            subject: "user-1".to_string(),
            organization: Organization {
                id: "org-1".to_string(),
                name: "Acme".to_string(),
                status: OrganizationStatus::Active,
                max_devices: 10,
                max_users: 10,
                created_at: 0,
            },
            role: Role::Viewer,
            permissions: Role::Viewer.permissions(),
        };

        match ctx.require(Permission::CancelCommands) {
            Err(TetherError::Forbidden(msg)) => assert!(msg.contains("cancel_commands")),
            other => panic!("expected Forbidden, got {other:?}"),
        }
        assert!(ctx.require(Permission::ViewDevices).is_ok());
        assert_eq!(ctx.organization_id(), "org-1");
    }

    #[test]
    fn test_role_and_status_parse() {
        assert_eq!("operator".parse::<Role>().unwrap(), Role::Operator);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(
            "suspended".parse::<OrganizationStatus>().unwrap(),
            OrganizationStatus::Suspended
        );
    }
}
