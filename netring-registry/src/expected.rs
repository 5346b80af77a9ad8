//! Missing-member detection against a declarative expected topology
//!
//! Operators describe how many members each location should run and how
//! critical that location is. The analysis compares the live active set
//! against the descriptor and grades the gaps.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};
use netring_core::error::{Error, Result};
use netring_core::protocol::MemberEntry;
use serde::{Deserialize, Serialize};

/// Per-location expectation from the descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpectedLocation {
    pub expected_count: u32,
    pub criticality: Criticality,
    pub grace_period_s: u64,
    pub description: String,
}

impl Default for ExpectedLocation {
    fn default() -> Self {
        Self {
            expected_count: 1,
            criticality: Criticality::Medium,
            grace_period_s: 0,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    High,
    Medium,
    Low,
}

impl Criticality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Error-level global alert once this many high-criticality locations
    /// are missing members.
    pub critical_missing_threshold: u32,
    /// Warning-level global alert once this many members are missing in
    /// total.
    pub total_missing_threshold: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_missing_threshold: 1,
            total_missing_threshold: 3,
        }
    }
}

/// The full descriptor, loaded once at registry start and immutable for
/// the process lifetime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpectedTopology {
    pub locations: BTreeMap<String, ExpectedLocation>,
    pub alert_thresholds: AlertThresholds,
}

impl ExpectedTopology {
    /// Load the descriptor from its YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-UTF8 descriptor path: {}", path.display())))?;
        let cfg = ConfigBuilder::builder()
            .add_source(File::new(path_str, FileFormat::Yaml))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        cfg.try_deserialize::<Self>()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Analyze live membership against the descriptor.
    #[must_use]
    pub fn analyze(&self, members: &[MemberEntry]) -> MissingAnalysis {
        let active: Vec<&MemberEntry> = members.iter().filter(|m| m.is_active()).collect();

        let mut locations = BTreeMap::new();
        let mut alerts = Vec::new();
        let mut total_missing = 0_u32;
        let mut critical_missing = 0_u32;

        for (location, expectation) in &self.locations {
            let present: Vec<String> = active
                .iter()
                .filter(|member| &member.location == location)
                .map(|member| member.instance_id.clone())
                .collect();
            let actual = present.len() as u32;
            let missing = expectation.expected_count.saturating_sub(actual);

            let status = if actual > expectation.expected_count {
                "extra_members"
            } else if missing > 0 {
                "missing_members"
            } else {
                "healthy"
            };

            match expectation.criticality {
                Criticality::High if missing > 0 => {
                    critical_missing += 1;
                    alerts.push(Alert {
                        level: "error".to_string(),
                        message: format!(
                            "critical location {location} is missing {missing} of {} expected members",
                            expectation.expected_count
                        ),
                        location: Some(location.clone()),
                    });
                }
                Criticality::Medium if missing >= 2 => {
                    alerts.push(Alert {
                        level: "warning".to_string(),
                        message: format!(
                            "location {location} is missing {missing} of {} expected members",
                            expectation.expected_count
                        ),
                        location: Some(location.clone()),
                    });
                }
                _ => {}
            }
            total_missing += missing;

            locations.insert(
                location.clone(),
                LocationAnalysis {
                    expected_count: expectation.expected_count,
                    actual_count: actual,
                    missing_count: missing,
                    criticality: expectation.criticality.as_str().to_string(),
                    grace_period_s: expectation.grace_period_s,
                    description: expectation.description.clone(),
                    status: status.to_string(),
                    members: present,
                },
            );
        }

        // Live locations nobody declared; reported, never alerted on.
        let declared: HashSet<&String> = self.locations.keys().collect();
        let mut unexpected = 0_u32;
        for member in &active {
            if declared.contains(&member.location) {
                continue;
            }
            unexpected = unexpected.saturating_add(
                u32::from(!locations.contains_key(&member.location)),
            );
            let entry = locations
                .entry(member.location.clone())
                .or_insert_with(|| LocationAnalysis {
                    expected_count: 0,
                    actual_count: 0,
                    missing_count: 0,
                    criticality: "none".to_string(),
                    grace_period_s: 0,
                    description: String::new(),
                    status: "unexpected_location".to_string(),
                    members: Vec::new(),
                });
            entry.actual_count += 1;
            entry.members.push(member.instance_id.clone());
        }

        if critical_missing >= self.alert_thresholds.critical_missing_threshold
            && critical_missing > 0
        {
            alerts.push(Alert {
                level: "error".to_string(),
                message: format!(
                    "{critical_missing} critical location(s) are missing members"
                ),
                location: None,
            });
        } else if total_missing >= self.alert_thresholds.total_missing_threshold
            && total_missing > 0
        {
            alerts.push(Alert {
                level: "warning".to_string(),
                message: format!("{total_missing} member(s) missing across the ring"),
                location: None,
            });
        }

        MissingAnalysis {
            enabled: true,
            locations,
            alerts,
            summary: AnalysisSummary {
                total_missing_members: total_missing,
                critical_locations_missing: critical_missing,
                unexpected_locations: unexpected,
            },
        }
    }
}

/// Analysis output for one location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationAnalysis {
    pub expected_count: u32,
    pub actual_count: u32,
    pub missing_count: u32,
    pub criticality: String,
    pub grace_period_s: u64,
    pub description: String,
    pub status: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub total_missing_members: u32,
    pub critical_locations_missing: u32,
    pub unexpected_locations: u32,
}

/// Background loop that re-evaluates the analysis on an interval and logs
/// active alerts, so missing members surface in the registry logs even
/// when nobody polls the dashboard API.
pub fn spawn_missing_check_loop(
    membership: std::sync::Arc<crate::membership::MembershipStore>,
    expected: std::sync::Arc<ExpectedTopology>,
    interval: std::time::Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let members = match membership.members().await {
                        Ok(members) => members,
                        Err(e) => {
                            tracing::warn!(error = %e, "missing-member check could not list members");
                            continue;
                        }
                    };
                    let analysis = expected.analyze(&members);
                    for alert in &analysis.alerts {
                        match alert.level.as_str() {
                            "error" => tracing::error!(
                                location = alert.location.as_deref().unwrap_or("ring"),
                                "{}", alert.message
                            ),
                            _ => tracing::warn!(
                                location = alert.location.as_deref().unwrap_or("ring"),
                                "{}", alert.message
                            ),
                        }
                    }
                }
            }
        }
    })
}

/// The full analysis body served under `missing_analysis`.
#[derive(Debug, Clone, Serialize)]
pub struct MissingAnalysis {
    pub enabled: bool,
    pub locations: BTreeMap<String, LocationAnalysis>,
    pub alerts: Vec<Alert>,
    pub summary: AnalysisSummary,
}

impl MissingAnalysis {
    /// The body served when no descriptor is loaded or detection is off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            locations: BTreeMap::new(),
            alerts: Vec::new(),
            summary: AnalysisSummary {
                total_missing_members: 0,
                critical_locations_missing: 0,
                unexpected_locations: 0,
            },
        }
    }
}
