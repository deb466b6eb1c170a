//! Dashboard statistics.
//!
//! Three tables are read in full and aggregated in memory: application
//! counts by status, form templates by activity, updates by publication,
//! plus a per-day application count over a trailing window.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, StatsError};

/// Length of the daily application series, today included.
pub const DAILY_WINDOW_DAYS: u64 = 30;

/// An application row, reduced to what the dashboard counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRow {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A form template row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRow {
    pub id: String,
    #[serde(default)]
    pub is_active: bool,
}

/// An update (announcement) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRow {
    pub id: String,
    #[serde(default)]
    pub is_published: bool,
}

/// Application counts per known status. Unknown statuses are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDistribution {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub revision_requested: usize,
}

impl StatusDistribution {
    fn record(&mut self, status: &str) {
        match status {
            "pending" => self.pending += 1,
            "approved" => self.approved += 1,
            "rejected" => self.rejected += 1,
            "revision_requested" => self.revision_requested += 1,
            _ => {}
        }
    }
}

/// Applications created on one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Aggregated dashboard numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_applications: usize,
    pub pending_applications: usize,
    pub approved_applications: usize,
    pub rejected_applications: usize,
    pub active_forms: usize,
    pub total_forms: usize,
    pub published_updates: usize,
    pub draft_updates: usize,
    /// Oldest first, one entry per day, zero-filled.
    pub daily_applications: Vec<DailyCount>,
    pub status_distribution: StatusDistribution,
}

impl DashboardStats {
    /// Aggregate rows as of `today` (UTC).
    #[must_use]
    pub fn compute(
        applications: &[ApplicationRow],
        forms: &[FormRow],
        updates: &[UpdateRow],
        today: NaiveDate,
    ) -> Self {
        let mut distribution = StatusDistribution::default();
        for app in applications {
            distribution.record(&app.status);
        }

        let mut daily: BTreeMap<NaiveDate, usize> = (0..DAILY_WINDOW_DAYS)
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .map(|date| (date, 0))
            .collect();
        for app in applications {
            if let Some(count) = daily.get_mut(&app.created_at.date_naive()) {
                *count += 1;
            }
        }

        let active_forms = forms.iter().filter(|f| f.is_active).count();
        let published_updates = updates.iter().filter(|u| u.is_published).count();

        Self {
            total_applications: applications.len(),
            pending_applications: distribution.pending,
            approved_applications: distribution.approved,
            rejected_applications: distribution.rejected,
            active_forms,
            total_forms: forms.len(),
            published_updates,
            draft_updates: updates.len() - published_updates,
            daily_applications: daily
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
            status_distribution: distribution,
        }
    }
}

/// Where the dashboard's rows come from.
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`BackendError`] if the table could not be read.
    async fn applications(&self) -> Result<Vec<ApplicationRow>, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError`] if the table could not be read.
    async fn forms(&self) -> Result<Vec<FormRow>, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError`] if the table could not be read.
    async fn updates(&self) -> Result<Vec<UpdateRow>, BackendError>;
}

/// Fetch all three tables concurrently and aggregate them.
///
/// # Errors
///
/// Returns [`StatsError::Fetch`] naming the first table that failed.
pub async fn load_dashboard(
    source: &dyn StatsSource,
    today: NaiveDate,
) -> Result<DashboardStats, StatsError> {
    let (applications, forms, updates) = tokio::try_join!(
        async {
            source.applications().await.map_err(|source| StatsError::Fetch {
                table: "applications",
                source,
            })
        },
        async {
            source.forms().await.map_err(|source| StatsError::Fetch {
                table: "form_templates",
                source,
            })
        },
        async {
            source.updates().await.map_err(|source| StatsError::Fetch {
                table: "updates",
                source,
            })
        },
    )?;

    debug!(
        applications = applications.len(),
        forms = forms.len(),
        updates = updates.len(),
        "dashboard rows fetched"
    );
    Ok(DashboardStats::compute(&applications, &forms, &updates, today))
}
