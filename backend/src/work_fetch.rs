//! De dónde sale el perfil de trabajo de la próxima ventana.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ProcessGroup, WorkProfile};
use tracing::debug;

use crate::config::StaticWorkProfilesConfig;
use crate::error::WorkFetchError;
use crate::leader::LeaderStore;

#[async_trait]
pub trait WorkFetcher: Send + Sync {
    async fn fetch_work(&self, process_group: &ProcessGroup) -> Result<WorkProfile, WorkFetchError>;
}

/// Le pide el perfil al líder por HTTP.
#[derive(Debug, Clone)]
pub struct LeaderWorkFetcher {
    client: reqwest::Client,
    leader: Arc<LeaderStore>,
    port: u16,
}

impl LeaderWorkFetcher {
    pub fn new(leader: Arc<LeaderStore>, port: u16, timeout: Duration) -> Result<Self, WorkFetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            leader,
            port,
        })
    }
}

#[async_trait]
impl WorkFetcher for LeaderWorkFetcher {
    async fn fetch_work(&self, process_group: &ProcessGroup) -> Result<WorkProfile, WorkFetchError> {
        let leader = self
            .leader
            .get_leader_ip_address()
            .ok_or(WorkFetchError::NoLeader)?;
        let url = format!("http://{}:{}/leader/work", leader, self.port);
        debug!(%url, %process_group, "pidiendo trabajo al líder");

        let resp = self.client.post(&url).json(process_group).send().await?;
        if !resp.status().is_success() {
            return Err(WorkFetchError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<WorkProfile>().await?)
    }
}

/// Perfiles fijos de la configuración; `default` cubre a los grupos sin override.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkFetcher {
    default: Option<WorkProfile>,
    overrides: HashMap<ProcessGroup, WorkProfile>,
}

impl StaticWorkFetcher {
    pub fn new(config: &StaticWorkProfilesConfig) -> Self {
        Self {
            default: config.default.clone(),
            overrides: config
                .overrides
                .iter()
                .map(|o| (o.process_group.clone(), o.profile.clone()))
                .collect(),
        }
    }

    pub fn profile_for(&self, process_group: &ProcessGroup) -> Option<&WorkProfile> {
        self.overrides.get(process_group).or(self.default.as_ref())
    }
}

#[async_trait]
impl WorkFetcher for StaticWorkFetcher {
    async fn fetch_work(&self, process_group: &ProcessGroup) -> Result<WorkProfile, WorkFetchError> {
        self.profile_for(process_group)
            .cloned()
            .ok_or_else(|| WorkFetchError::NotConfigured(process_group.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkProfileOverride;
    use common::Work;

    fn profile(duration: u32) -> WorkProfile {
        WorkProfile {
            work: vec![Work::CpuSample {
                frequency: 50,
                max_frames: 64,
            }],
            duration,
            coverage_pct: 10,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn static_profiles_fall_back_to_default() {
        let special = ProcessGroup::new("a", "c", "special");
        let fetcher = StaticWorkFetcher::new(&StaticWorkProfilesConfig {
            default: Some(profile(60)),
            overrides: vec![WorkProfileOverride {
                process_group: special.clone(),
                profile: profile(30),
            }],
        });

        assert_eq!(fetcher.fetch_work(&special).await.unwrap().duration, 30);
        let other = ProcessGroup::new("a", "c", "other");
        assert_eq!(fetcher.fetch_work(&other).await.unwrap().duration, 60);
    }

    #[tokio::test]
    async fn missing_profile_is_an_error() {
        let fetcher = StaticWorkFetcher::default();
        assert!(matches!(
            fetcher.fetch_work(&ProcessGroup::new("a", "c", "p")).await,
            Err(WorkFetchError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn leader_fetch_without_leader_fails_fast() {
        let fetcher = LeaderWorkFetcher::new(
            Arc::new(LeaderStore::new("127.0.0.1", None)),
            2496,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            fetcher.fetch_work(&ProcessGroup::new("a", "c", "p")).await,
            Err(WorkFetchError::NoLeader)
        ));
    }
}
