use std::fmt;

use neptune_common::BrokerError;

use crate::store::TeardownTask;
use crate::Broker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DeleteInstance,
    DeleteCluster,
    RemoveRecord,
    RevokeCredential,
}

impl TeardownStep {
    pub const ALL: [TeardownStep; 4] = [
        TeardownStep::DeleteInstance,
        TeardownStep::DeleteCluster,
        TeardownStep::RemoveRecord,
        TeardownStep::RevokeCredential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::DeleteInstance => "delete_instance",
            TeardownStep::DeleteCluster => "delete_cluster",
            TeardownStep::RemoveRecord => "remove_record",
            TeardownStep::RevokeCredential => "revoke_credential",
        }
    }

    fn is_done(&self, task: &TeardownTask) -> bool {
        match self {
            TeardownStep::DeleteInstance => task.instance_deleted,
            TeardownStep::DeleteCluster => task.cluster_deleted,
            TeardownStep::RemoveRecord => task.record_removed,
            TeardownStep::RevokeCredential => task.credential_revoked,
        }
    }

    fn mark_done(&self, task: &mut TeardownTask) {
        match self {
            TeardownStep::DeleteInstance => task.instance_deleted = true,
            TeardownStep::DeleteCluster => task.cluster_deleted = true,
            TeardownStep::RemoveRecord => task.record_removed = true,
            TeardownStep::RevokeCredential => task.credential_revoked = true,
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    /// Not attempted because a step it depends on failed.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub name: String,
    pub steps: Vec<(TeardownStep, StepStatus)>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|(_, s)| *s == StepStatus::Done)
    }

    pub fn status(&self, step: TeardownStep) -> Option<&StepStatus> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, st)| st)
    }

    pub fn failed_steps(&self) -> Vec<TeardownStep> {
        self.steps
            .iter()
            .filter(|(_, s)| *s != StepStatus::Done)
            .map(|(step, _)| *step)
            .collect()
    }
}

impl Broker {
    /// Delete an instance: cloud instance, cluster, pool record, credential.
    ///
    /// The record is marked deleting first so it can no longer be claimed
    /// and a concurrent delete sees `NotFound`. The store queues a teardown
    /// task with that transition, so a delete dropped mid-way is finished
    /// by [`Broker::retry_teardowns`]. Cloud deletions are only submitted,
    /// not awaited.
    pub async fn delete(&self, name: &str) -> Result<TeardownReport, BrokerError> {
        let Some(previous) = self.store.mark_deleting(name).await? else {
            return Err(BrokerError::NotFound(name.to_string()));
        };
        tracing::info!(name, plan = %previous.plan, state = %previous.state, "deleting instance");

        let mut task = TeardownTask::new(name);
        let report = self.run_teardown(&mut task).await;
        if report.is_complete() {
            tracing::info!(name, "instance deleted");
            if let Err(e) = self.store.remove_teardown(name).await {
                tracing::error!(name, error = %e, "could not clear finished teardown task");
            }
        } else {
            task.attempts = 1;
            tracing::warn!(
                name,
                failed = ?report.failed_steps(),
                "teardown incomplete, queued for retry"
            );
            if let Err(e) = self.store.save_teardown(&task).await {
                tracing::error!(name, error = %e, "could not persist teardown task");
            }
        }
        Ok(report)
    }

    /// Re-drive queued teardowns. Returns how many finished on this pass.
    pub async fn retry_teardowns(&self) -> Result<usize, BrokerError> {
        let tasks = self.store.pending_teardowns().await?;
        let mut finished = 0;
        for mut task in tasks {
            task.attempts += 1;
            let report = self.run_teardown(&mut task).await;
            if report.is_complete() {
                self.store.remove_teardown(&task.name).await?;
                tracing::info!(name = %task.name, attempts = task.attempts, "queued teardown finished");
                finished += 1;
            } else {
                tracing::warn!(
                    name = %task.name,
                    attempts = task.attempts,
                    failed = ?report.failed_steps(),
                    "queued teardown still incomplete"
                );
                self.store.save_teardown(&task).await?;
            }
        }
        Ok(finished)
    }

    async fn run_teardown(&self, task: &mut TeardownTask) -> TeardownReport {
        let name = task.name.clone();
        let mut steps = Vec::with_capacity(TeardownStep::ALL.len());
        let mut last_error = None;

        for step in TeardownStep::ALL {
            if step.is_done(task) {
                steps.push((step, StepStatus::Done));
                continue;
            }
            // A cluster cannot go while its instance remains.
            if step == TeardownStep::DeleteCluster && !task.instance_deleted {
                steps.push((step, StepStatus::Skipped));
                continue;
            }
            match self.run_step(step, &name).await {
                Ok(()) => {
                    step.mark_done(task);
                    steps.push((step, StepStatus::Done));
                }
                Err(err) => {
                    tracing::warn!(name = %name, step = %step, error = %err, "teardown step failed");
                    last_error = Some(err.to_string());
                    steps.push((step, StepStatus::Failed(err.to_string())));
                }
            }
        }

        task.last_error = last_error;
        TeardownReport { name, steps }
    }

    async fn run_step(&self, step: TeardownStep, name: &str) -> Result<(), BrokerError> {
        match step {
            TeardownStep::DeleteInstance => match self.resources.delete_instance(name).await {
                Ok(()) => Ok(()),
                // Gone already counts as deleted.
                Err(e) => match self.resources.describe_instance(name).await {
                    Ok(None) => Ok(()),
                    _ => Err(BrokerError::upstream("delete_instance", e)),
                },
            },
            TeardownStep::DeleteCluster => match self.resources.delete_cluster(name).await {
                Ok(()) => Ok(()),
                Err(e) => match self.resources.cluster_exists(name).await {
                    Ok(false) => Ok(()),
                    _ => Err(BrokerError::upstream("delete_cluster", e)),
                },
            },
            TeardownStep::RemoveRecord => {
                self.store.remove(name).await?;
                Ok(())
            }
            TeardownStep::RevokeCredential => self.revoke_credential(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_unfinished_steps() {
        let report = TeardownReport {
            name: "db1".into(),
            steps: vec![
                (TeardownStep::DeleteInstance, StepStatus::Failed("boom".into())),
                (TeardownStep::DeleteCluster, StepStatus::Skipped),
                (TeardownStep::RemoveRecord, StepStatus::Done),
                (TeardownStep::RevokeCredential, StepStatus::Done),
            ],
        };
        assert!(!report.is_complete());
        assert_eq!(
            report.failed_steps(),
            vec![TeardownStep::DeleteInstance, TeardownStep::DeleteCluster]
        );
        assert_eq!(report.status(TeardownStep::RemoveRecord), Some(&StepStatus::Done));
    }

    #[test]
    fn step_flags_map_to_task_columns() {
        let mut task = TeardownTask::new("db1");
        for step in TeardownStep::ALL {
            assert!(!step.is_done(&task));
            step.mark_done(&mut task);
        }
        assert!(task.is_complete());
    }
}
