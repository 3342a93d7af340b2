use async_graphql::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::sync::Arc;

use crate::jobs::{self, JobContext, JobKind};
use crate::tenant::{self, OrganizationStatus};

fn job_context<'a>(ctx: &'a Context<'_>) -> Result<&'a Arc<JobContext>> {
    ctx.data::<Arc<JobContext>>()
        .map_err(|_| Error::new("Job context not available"))
}

/// Custom mutations for admin operations
#[derive(Default)]
pub struct AdminMutation;

#[Object]
impl AdminMutation {
    /// Manually trigger a background job by name
    async fn trigger_job(&self, ctx: &Context<'_>, job_name: String) -> Result<JobTriggerResult> {
        let job_ctx = job_context(ctx)?;

        match jobs::trigger_job_manually(job_ctx.as_ref(), &job_name).await {
            Ok(count) => Ok(JobTriggerResult {
                success: true,
                message: format!("Job '{}' completed, {} records processed", job_name, count),
                records_processed: Some(count as i64),
                job_name,
            }),
            Err(e) => Ok(JobTriggerResult {
                success: false,
                message: format!("Failed to run job '{}': {}", job_name, e),
                records_processed: None,
                job_name,
            }),
        }
    }

    /// Suspend, cancel or reactivate an organization
    async fn set_organization_status(
        &self,
        ctx: &Context<'_>,
        organization_id: String,
        #[graphql(desc = "active, suspended or cancelled")] status: String,
    ) -> Result<OrganizationInfo> {
        let job_ctx = job_context(ctx)?;
        let status: OrganizationStatus = status.parse().map_err(|e| Error::new(format!("{e}")))?;

        let org = tenant::set_organization_status(&job_ctx.db, &organization_id, status)
            .await
            .map_err(|e| Error::new(e.to_string()))?;

        Ok(OrganizationInfo {
            id: org.id,
            name: org.name,
            status: org.status.as_str().to_string(),
            max_devices: org.max_devices,
            max_users: org.max_users,
        })
    }
}

/// Result of triggering a job
#[derive(SimpleObject)]
pub struct JobTriggerResult {
    pub success: bool,
    pub message: String,
    pub job_name: String,
    pub records_processed: Option<i64>,
}

/// Custom queries for admin operations
#[derive(Default)]
pub struct AdminQuery;

#[Object]
impl AdminQuery {
    /// Get recent job executions with optional filtering
    async fn job_logs(
        &self,
        ctx: &Context<'_>,
        #[graphql(desc = "Filter by job name")] job_name: Option<String>,
        #[graphql(desc = "Limit number of results", default = 100)] limit: i64,
        #[graphql(desc = "Only show failed jobs")] only_failures: Option<bool>,
    ) -> Result<Vec<JobLog>> {
        let job_ctx = job_context(ctx)?;

        use crate::entities::job_execution::{Column, Entity};

        let mut query = Entity::find();

        if let Some(name) = job_name {
            query = query.filter(Column::JobName.eq(name));
        }

        if let Some(true) = only_failures {
            query = query.filter(Column::Success.eq(0));
        }

        let results = query
            .order_by_desc(Column::StartedAt)
            .limit(limit.max(0) as u64)
            .all(&job_ctx.db)
            .await
            .map_err(|e| Error::new(format!("Database error: {}", e)))?;

        Ok(results
            .into_iter()
            .map(|model| JobLog {
                id: model.id,
                job_name: model.job_name,
                trigger: model.trigger,
                started_at: model.started_at,
                completed_at: model.completed_at,
                success: model.success,
                error_message: model.error_message,
                records_processed: model.records_processed,
            })
            .collect())
    }

    /// Get list of available jobs that can be triggered
    async fn available_jobs(&self, ctx: &Context<'_>) -> Result<Vec<JobInfo>> {
        let job_ctx = job_context(ctx)?;

        Ok(JobKind::ALL
            .into_iter()
            .map(|kind| JobInfo {
                name: kind.name().to_string(),
                description: kind.description().to_string(),
                schedule: kind.schedule(&job_ctx.settings).to_string(),
            })
            .collect())
    }

    /// Look up an organization by id
    async fn organization(
        &self,
        ctx: &Context<'_>,
        organization_id: String,
    ) -> Result<Option<OrganizationInfo>> {
        let job_ctx = job_context(ctx)?;
        let org = tenant::get_organization(&job_ctx.db, &organization_id)
            .await
            .map_err(|e| Error::new(e.to_string()))?;

        Ok(org.map(|org| OrganizationInfo {
            id: org.id,
            name: org.name,
            status: org.status.as_str().to_string(),
            max_devices: org.max_devices,
            max_users: org.max_users,
        }))
    }
}

/// Job log entry
#[derive(SimpleObject)]
pub struct JobLog {
    pub id: i64,
    pub job_name: String,
    /// "schedule" or "manual"
    pub trigger: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub success: Option<i64>,
    pub error_message: Option<String>,
    pub records_processed: Option<i64>,
}

/// Information about an available job
#[derive(SimpleObject)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    pub schedule: String,
}

#[derive(SimpleObject)]
pub struct OrganizationInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub max_devices: i64,
    pub max_users: i64,
}
