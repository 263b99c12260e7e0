use std::time::Duration;

use crate::provisioning::ProvisionOutcome;
use crate::Broker;

/// What one pass did. Step errors are logged and counted, never fatal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub created: Vec<String>,
    pub endpoints_recorded: usize,
    pub credentials_issued: usize,
    pub teardowns_finished: usize,
    pub errors: usize,
}

/// job-preprovision: one maintenance pass over the pool.
///
/// - top up every configured plan by at most one instance
/// - record endpoints of instances that became ready
/// - issue credentials that failed at creation time
/// - re-drive unfinished teardowns
pub async fn run_pass(broker: &Broker) -> PassSummary {
    let mut summary = PassSummary::default();

    for (plan, minimum) in &broker.settings.provisioning.minimums {
        match broker.ensure_minimum(plan, *minimum).await {
            Ok(ProvisionOutcome::Created { name, .. }) => summary.created.push(name),
            Ok(ProvisionOutcome::Satisfied { .. }) => {}
            Err(e) => {
                tracing::error!(plan = %plan, error = %e, "[job-preprovision] ensure_minimum failed");
                summary.errors += 1;
            }
        }
    }

    match broker.reconcile_endpoints().await {
        Ok(n) => summary.endpoints_recorded = n,
        Err(e) => {
            tracing::error!(error = %e, "[job-preprovision] reconcile_endpoints failed");
            summary.errors += 1;
        }
    }

    match broker.reconcile_credentials().await {
        Ok(n) => summary.credentials_issued = n,
        Err(e) => {
            tracing::error!(error = %e, "[job-preprovision] reconcile_credentials failed");
            summary.errors += 1;
        }
    }

    match broker.retry_teardowns().await {
        Ok(n) => summary.teardowns_finished = n,
        Err(e) => {
            tracing::error!(error = %e, "[job-preprovision] retry_teardowns failed");
            summary.errors += 1;
        }
    }

    summary
}

pub async fn run(broker: Broker, every: Duration) {
    let mut interval = tokio::time::interval(every);
    tracing::info!(interval_secs = every.as_secs(), "job-preprovision started");

    loop {
        interval.tick().await;
        let summary = run_pass(&broker).await;
        if !summary.created.is_empty() || summary.endpoints_recorded > 0 || summary.errors > 0 {
            tracing::info!(
                created = summary.created.len(),
                endpoints = summary.endpoints_recorded,
                credentials = summary.credentials_issued,
                teardowns = summary.teardowns_finished,
                errors = summary.errors,
                "[job-preprovision] pass complete"
            );
        }
    }
}
