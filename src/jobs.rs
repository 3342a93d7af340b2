use crate::dispatcher::Dispatcher;
use crate::entities;
use crate::errors::TetherError;
use crate::pairing;
use crate::presence;
use crate::settings::Settings;
use crate::storage;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Everything a background job needs.
#[derive(Clone)]
pub struct JobContext {
    pub db: DatabaseConnection,
    pub dispatcher: Dispatcher,
    pub settings: Arc<Settings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    DispatchCommands,
    SweepCommandTimeouts,
    SweepStalePresence,
    ExpireRegistrations,
    PruneHistory,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::DispatchCommands,
        JobKind::SweepCommandTimeouts,
        JobKind::SweepStalePresence,
        JobKind::ExpireRegistrations,
        JobKind::PruneHistory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::DispatchCommands => "dispatch_commands",
            JobKind::SweepCommandTimeouts => "sweep_command_timeouts",
            JobKind::SweepStalePresence => "sweep_stale_presence",
            JobKind::ExpireRegistrations => "expire_registrations",
            JobKind::PruneHistory => "prune_history",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            JobKind::DispatchCommands => "Deliver due pending and queued commands",
            JobKind::SweepCommandTimeouts => "Retry or time out commands past their window",
            JobKind::SweepStalePresence => "Mark silent devices offline or inactive",
            JobKind::ExpireRegistrations => "Persist expiry of lapsed pairing codes",
            JobKind::PruneHistory => "Delete old heartbeats and job execution records",
        }
    }

    pub fn schedule<'a>(&self, settings: &'a Settings) -> &'a str {
        let jobs = &settings.jobs;
        match self {
            JobKind::DispatchCommands => &jobs.dispatch,
            JobKind::SweepCommandTimeouts => &jobs.timeout_sweep,
            JobKind::SweepStalePresence => &jobs.presence_sweep,
            JobKind::ExpireRegistrations => &jobs.registration_sweep,
            JobKind::PruneHistory => &jobs.history_prune,
        }
    }

    pub fn from_name(name: &str) -> Option<JobKind> {
        JobKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(ctx: JobContext) -> Result<JobScheduler, TetherError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| TetherError::Other(format!("Failed to create job scheduler: {}", e)))?;

    for kind in JobKind::ALL {
        let job_ctx = ctx.clone();
        let schedule = kind.schedule(&ctx.settings).to_string();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let ctx = job_ctx.clone();
            Box::pin(async move {
                // Failures are already logged and recorded
                let _ = run_recorded(&ctx, kind, "schedule").await;
            })
        })
        .map_err(|e| {
            TetherError::Other(format!("Failed to create {} job: {}", kind.name(), e))
        })?;

        sched
            .add(job)
            .await
            .map_err(|e| TetherError::Other(format!("Failed to add {} job: {}", kind.name(), e)))?;
    }

    sched
        .start()
        .await
        .map_err(|e| TetherError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", JobKind::ALL.len());

    Ok(sched)
}

async fn run_job(ctx: &JobContext, kind: JobKind) -> Result<u64, TetherError> {
    match kind {
        JobKind::DispatchCommands => Ok(ctx.dispatcher.dispatch_due().await?.processed()),
        JobKind::SweepCommandTimeouts => Ok(ctx.dispatcher.sweep_timeouts().await?.processed()),
        JobKind::SweepStalePresence => {
            presence::sweep_stale_presence(&ctx.db, &ctx.settings.presence).await
        }
        JobKind::ExpireRegistrations => pairing::expire_stale_registrations(&ctx.db).await,
        JobKind::PruneHistory => {
            let heartbeats = presence::prune_heartbeats(&ctx.db, &ctx.settings.presence).await?;
            let executions =
                prune_job_executions(&ctx.db, ctx.settings.jobs.execution_retention_secs).await?;
            Ok(heartbeats + executions)
        }
    }
}

/// Run a job once and record the run in `job_executions`.
pub async fn run_recorded(ctx: &JobContext, kind: JobKind, trigger: &str) -> Result<u64, TetherError> {
    let execution_id = start_job_execution(&ctx.db, kind.name(), trigger).await.ok();

    match run_job(ctx, kind).await {
        Ok(count) => {
            if count > 0 {
                info!(job = kind.name(), trigger, records = count, "Job completed");
            }
            if let Some(id) = execution_id {
                let _ = complete_job_execution(&ctx.db, id, true, None, Some(count as i64)).await;
            }
            Ok(count)
        }
        Err(e) => {
            error!(job = kind.name(), trigger, error = %e, "Job failed");
            if let Some(id) = execution_id {
                let _ =
                    complete_job_execution(&ctx.db, id, false, Some(e.to_string()), None).await;
            }
            Err(e)
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
    trigger: &str,
) -> Result<i64, TetherError> {
    use entities::job_execution;

    let execution = job_execution::ActiveModel {
        job_name: Set(job_name.to_string()),
        trigger: Set(trigger.to_string()),
        started_at: Set(storage::now()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
        ..Default::default()
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), TetherError> {
    use entities::job_execution::{Column, Entity};

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(storage::now()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

async fn prune_job_executions(db: &DatabaseConnection, retention_secs: i64) -> Result<u64, TetherError> {
    use entities::job_execution::{Column, Entity};

    let cutoff = storage::now() - retention_secs;
    let result = Entity::delete_many()
        .filter(Column::StartedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Manually trigger a job by name (useful for admin API)
pub async fn trigger_job_manually(ctx: &JobContext, job_name: &str) -> Result<u64, TetherError> {
    let kind = JobKind::from_name(job_name)
        .ok_or_else(|| TetherError::NotFound(format!("Unknown job name: {}", job_name)))?;
    info!("Manually triggering job: {}", job_name);
    run_recorded(ctx, kind, "manual").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(JobKind::from_name("cleanup_expired_sessions"), None);
    }

    #[test]
    fn test_schedules_come_from_settings() {
        let mut settings = Settings::default();
        settings.jobs.dispatch = "*/2 * * * * *".to_string();
        assert_eq!(JobKind::DispatchCommands.schedule(&settings), "*/2 * * * * *");
        assert_eq!(
            JobKind::PruneHistory.schedule(&settings),
            settings.jobs.history_prune
        );
    }
}
