use crate::tenant::{self, NewOrganization, OrganizationStatus, Role};
use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::fs;

/// Organization definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: OrganizationStatus,
    pub max_devices: i64,
    pub max_users: i64,
    #[serde(default)]
    pub members: Vec<MemberDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDefinition {
    /// Subject as asserted by the identity provider
    pub subject: String,
    pub role: Role,
}

fn default_status() -> OrganizationStatus {
    OrganizationStatus::Active
}

/// Root structure of the organizations JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationsFile {
    pub organizations: Vec<OrganizationDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Sync organizations and memberships from a JSON file to the database (idempotent)
pub async fn sync_organizations_from_file(
    db: &DatabaseConnection,
    file_path: &str,
) -> Result<SyncSummary> {
    tracing::info!("Loading organizations from {}", file_path);

    let content = fs::read_to_string(file_path)
        .into_diagnostic()
        .map_err(|e| miette::miette!("Failed to read organizations file at '{}': {}", file_path, e))?;

    let file: OrganizationsFile = serde_json::from_str(&content)
        .into_diagnostic()
        .map_err(|e| {
            miette::miette!(
                "Failed to parse organizations JSON file: {}\n\nExpected format:\n{{\n  \"organizations\": [\n    {{\n      \"id\": \"acme\",\n      \"name\": \"Acme Corp\",\n      \"max_devices\": 50,\n      \"max_users\": 5,\n      \"members\": [\n        {{ \"subject\": \"alice\", \"role\": \"owner\" }}\n      ]\n    }}\n  ]\n}}",
                e
            )
        })?;

    sync_organizations(db, &file).await
}

pub async fn sync_organizations(
    db: &DatabaseConnection,
    file: &OrganizationsFile,
) -> Result<SyncSummary> {
    tracing::info!("Found {} organization(s) in file", file.organizations.len());

    let mut summary = SyncSummary::default();
    for def in &file.organizations {
        match sync_organization(db, def).await? {
            SyncResult::Created => summary.created += 1,
            SyncResult::Updated => summary.updated += 1,
            SyncResult::Unchanged => summary.unchanged += 1,
        }
    }

    tracing::info!(
        "Organization sync complete: {} created, {} updated, {} unchanged",
        summary.created,
        summary.updated,
        summary.unchanged
    );

    Ok(summary)
}

#[derive(Debug)]
enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

/// Sync a single organization and its members (idempotent)
async fn sync_organization(
    db: &DatabaseConnection,
    def: &OrganizationDefinition,
) -> Result<SyncResult> {
    let existing = tenant::get_organization(db, &def.id).await.into_diagnostic()?;

    let mut result = match existing {
        None => {
            tracing::info!("Creating organization: {}", def.id);
            tenant::create_organization(
                db,
                NewOrganization {
                    id: Some(def.id.clone()),
                    name: def.name.clone(),
                    max_devices: def.max_devices,
                    max_users: def.max_users,
                },
            )
            .await
            .into_diagnostic()?;

            if def.status != OrganizationStatus::Active {
                tenant::set_organization_status(db, &def.id, def.status)
                    .await
                    .into_diagnostic()?;
            }
            SyncResult::Created
        }
        Some(org) => {
            let mut changed = false;
            if org.name != def.name
                || org.max_devices != def.max_devices
                || org.max_users != def.max_users
            {
                tenant::update_organization(db, &def.id, &def.name, def.max_devices, def.max_users)
                    .await
                    .into_diagnostic()?;
                changed = true;
            }
            if org.status != def.status {
                tenant::set_organization_status(db, &def.id, def.status)
                    .await
                    .into_diagnostic()?;
                changed = true;
            }
            if changed {
                tracing::info!("Updated organization: {}", def.id);
                SyncResult::Updated
            } else {
                SyncResult::Unchanged
            }
        }
    };

    for member in &def.members {
        let current = tenant::get_membership(db, &def.id, &member.subject)
            .await
            .into_diagnostic()?;
        if current.as_ref().map(|m| m.role) == Some(member.role) {
            continue;
        }
        tenant::upsert_membership(db, &def.id, &member.subject, member.role)
            .await
            .into_diagnostic()?;
        tracing::debug!(
            "Synced member {} of {} as {}",
            member.subject,
            def.id,
            member.role.as_str()
        );
        if matches!(result, SyncResult::Unchanged) {
            result = SyncResult::Updated;
        }
    }

    Ok(result)
}
