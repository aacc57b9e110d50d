//! GitLab deployment webhook payload and artifact target resolution

use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::config::DeployerConfig;

/// Deployment status reported by GitLab
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failed,
    Canceled,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventProject {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventUser {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

/// Body of a GitLab deployment event. Missing or null fields take their
/// defaults, unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeploymentEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub object_kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: DeploymentStatus,
    pub deployment_id: Option<u64>,
    pub deployable_id: Option<u64>,
    pub deployable_url: Option<String>,
    pub environment: Option<String>,
    pub environment_external_url: Option<String>,
    pub short_sha: Option<String>,
    pub commit_url: Option<String>,
    pub commit_title: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub project: EventProject,
    #[serde(deserialize_with = "null_as_default")]
    pub user: EventUser,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DeploymentEvent {
    pub fn is_deployment(&self) -> bool {
        self.object_kind == "deployment"
    }

    /// Id of the job that ran the deployment, 0 when absent
    pub fn job_id(&self) -> u64 {
        self.deployable_id.unwrap_or(0)
    }

    /// Project id after applying the configured override
    pub fn effective_project_id(&self, config: &DeployerConfig) -> u64 {
        config
            .project_id_override()
            .or(self.project.id)
            .unwrap_or(0)
    }

    /// Name of the user that triggered the deployment
    pub fn triggered_by(&self) -> &str {
        self.user.name.as_deref().unwrap_or("unknown")
    }
}

/// How the artifact to download is located upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocator {
    /// Artifact of one specific job run
    JobId(u64),
    /// Latest artifact of a named job on a branch
    JobName { branch: String, job: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub project_id: u64,
    pub locator: ArtifactLocator,
}

impl FetchTarget {
    /// By job id whenever the event carries a nonzero job id and the
    /// configuration does not ask for job names, by job name otherwise.
    pub fn resolve(event: &DeploymentEvent, config: &DeployerConfig) -> Self {
        let project_id = event.effective_project_id(config);
        let job_id = event.job_id();

        let locator = if job_id != 0 && !config.use_job_name {
            ArtifactLocator::JobId(job_id)
        } else {
            ArtifactLocator::JobName {
                branch: config.branch.clone(),
                job: config.job_name.clone(),
            }
        };

        Self {
            project_id,
            locator,
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            ArtifactLocator::JobId(job_id) => {
                write!(f, "project ID: {}, job ID: {}", self.project_id, job_id)
            }
            ArtifactLocator::JobName { branch, job } => write!(
                f,
                "project ID: {}, job '{}' on branch '{}'",
                self.project_id, job, branch
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeployerConfig {
        DeployerConfig {
            secret_token: "token".to_string(),
            ..DeployerConfig::default()
        }
    }

    fn success_event() -> DeploymentEvent {
        serde_json::from_str(
            r#"{
                "object_kind": "deployment",
                "status": "success",
                "deployment_id": 15,
                "deployable_id": 7,
                "environment": "production",
                "project": { "id": 42, "name": "site" },
                "user": { "name": "Ada" },
                "some_future_field": true
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_deployment_payload() {
        let event = success_event();
        assert!(event.is_deployment());
        assert_eq!(event.status, DeploymentStatus::Success);
        assert_eq!(event.job_id(), 7);
        assert_eq!(event.project.id, Some(42));
        assert_eq!(event.triggered_by(), "Ada");
    }

    #[test]
    fn unknown_status_maps_to_other() {
        let event: DeploymentEvent =
            serde_json::from_str(r#"{"object_kind":"deployment","status":"blocked"}"#).unwrap();
        assert_eq!(event.status, DeploymentStatus::Other);
        assert_eq!(event.job_id(), 0);
    }

    #[test]
    fn null_fields_take_defaults() {
        let event: DeploymentEvent = serde_json::from_str(
            r#"{"object_kind":null,"status":null,"project":null,"user":null,"deployable_id":null}"#,
        )
        .unwrap();
        assert!(!event.is_deployment());
        assert_eq!(event.status, DeploymentStatus::Other);
        assert_eq!(event.project.id, None);
        assert_eq!(event.triggered_by(), "unknown");
        assert_eq!(event.job_id(), 0);
    }

    #[test]
    fn null_project_falls_back_to_override() {
        let event: DeploymentEvent = serde_json::from_str(
            r#"{"object_kind":"deployment","status":"success","deployable_id":7,"project":null,"user":null}"#,
        )
        .unwrap();
        let config = DeployerConfig {
            project_id: Some("99".to_string()),
            ..config()
        };
        let target = FetchTarget::resolve(&event, &config);
        assert_eq!(target.project_id, 99);
        assert_eq!(target.locator, ArtifactLocator::JobId(7));
    }

    #[test]
    fn resolves_by_job_id_without_override() {
        let target = FetchTarget::resolve(&success_event(), &config());
        assert_eq!(target.project_id, 42);
        assert_eq!(target.locator, ArtifactLocator::JobId(7));
    }

    #[test]
    fn override_replaces_payload_project() {
        let config = DeployerConfig {
            project_id: Some("99".to_string()),
            ..config()
        };
        let target = FetchTarget::resolve(&success_event(), &config);
        assert_eq!(target.project_id, 99);
        assert_eq!(target.locator, ArtifactLocator::JobId(7));
    }

    #[test]
    fn job_name_flag_wins_over_job_id() {
        let config = DeployerConfig {
            use_job_name: true,
            job_name: "pages".to_string(),
            branch: "release".to_string(),
            ..config()
        };
        let target = FetchTarget::resolve(&success_event(), &config);
        assert_eq!(
            target.locator,
            ArtifactLocator::JobName {
                branch: "release".to_string(),
                job: "pages".to_string(),
            }
        );
    }

    #[test]
    fn zero_job_id_falls_back_to_job_name() {
        let mut event = success_event();
        event.deployable_id = Some(0);
        let target = FetchTarget::resolve(&event, &config());
        assert_eq!(
            target.locator,
            ArtifactLocator::JobName {
                branch: "main".to_string(),
                job: "deploy".to_string(),
            }
        );
    }
}
