use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use common::{ProcessGroup, WorkProfile};
use serde::Deserialize;

/// Configuración del backend, se carga desde un YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Dirección HTTP donde escuchamos a recorders y operadores.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// IP con la que este backend se anuncia; se compara contra el líder.
    #[serde(default = "default_ip_address")]
    pub ip_address: String,

    /// Se devuelve a los recorders en cada poll.
    #[serde(default = "default_controller_id")]
    pub controller_id: u32,

    /// Duración de cada ventana de agregación. Default: 30m.
    #[serde(default = "default_window_duration", with = "humantime_serde")]
    pub aggregation_window_duration: Duration,

    /// Cuánto antes del fin de ventana se pide el trabajo de la siguiente. Default: 2m.
    #[serde(default = "default_refresh_buffer", with = "humantime_serde")]
    pub work_profile_refresh_buffer: Duration,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Cupos de asignaciones simultáneas para todo el backend.
    #[serde(default = "default_max_concurrent_slots")]
    pub max_concurrent_slots: u32,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub recorders: RecorderLivenessConfig,

    #[serde(default)]
    pub leader: LeaderConfig,

    /// Perfiles locales, se usan cuando no hay líder configurado.
    #[serde(default)]
    pub work_profiles: StaticWorkProfilesConfig,
}

/// Holguras del schedule dentro de la ventana, todo en segundos.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_scheduling_buffer_secs")]
    pub scheduling_buffer_secs: u32,
    #[serde(default = "default_window_end_tolerance_secs")]
    pub window_end_tolerance_secs: u32,
    #[serde(default)]
    pub min_acceptable_delay_secs: u32,
    #[serde(default = "default_max_acceptable_delay_secs")]
    pub max_acceptable_delay_secs: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scheduling_buffer_secs: default_scheduling_buffer_secs(),
            window_end_tolerance_secs: default_window_end_tolerance_secs(),
            min_acceptable_delay_secs: 0,
            max_acceptable_delay_secs: default_max_acceptable_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: u32,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: default_max_header_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderLivenessConfig {
    /// Sin polls por este tiempo, el recorder deja de contar para la cobertura. Default: 2m.
    #[serde(default = "default_defunct_threshold", with = "humantime_serde")]
    pub defunct_threshold: Duration,
    /// Sin polls por este tiempo, se olvida el recorder. Default: 30m.
    #[serde(default = "default_eviction_threshold", with = "humantime_serde")]
    pub eviction_threshold: Duration,
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RecorderLivenessConfig {
    fn default() -> Self {
        Self {
            defunct_threshold: default_defunct_threshold(),
            eviction_threshold: default_eviction_threshold(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderConfig {
    /// Si está presente se usa como líder inicial; si no, se usan los perfiles locales.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_leader_port")]
    pub port: u16,
    #[serde(default = "default_leader_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_leader_port(),
            request_timeout: default_leader_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticWorkProfilesConfig {
    #[serde(default)]
    pub default: Option<WorkProfile>,
    #[serde(default)]
    pub overrides: Vec<WorkProfileOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkProfileOverride {
    pub process_group: ProcessGroup,
    pub profile: WorkProfile,
}

/// Parámetros que necesita un `WorkAssignmentSchedule`, en segundos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleBootstrapConfig {
    pub scheduling_buffer_secs: u32,
    pub window_duration_secs: u32,
    pub window_end_tolerance_secs: u32,
    pub min_acceptable_delay_secs: u32,
    pub max_acceptable_delay_secs: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ip_address: default_ip_address(),
            controller_id: default_controller_id(),
            aggregation_window_duration: default_window_duration(),
            work_profile_refresh_buffer: default_refresh_buffer(),
            schedule: ScheduleConfig::default(),
            max_concurrent_slots: default_max_concurrent_slots(),
            ingestion: IngestionConfig::default(),
            recorders: RecorderLivenessConfig::default(),
            leader: LeaderConfig::default(),
            work_profiles: StaticWorkProfilesConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: BackendConfig = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let window_secs = self.aggregation_window_duration.as_secs();
        if window_secs == 0 {
            bail!("aggregation_window_duration must be at least 1s");
        }

        if self.work_profile_refresh_buffer >= self.aggregation_window_duration {
            bail!("work_profile_refresh_buffer must be shorter than aggregation_window_duration");
        }

        let pad = 2 * self.schedule.scheduling_buffer_secs as u64
            + self.schedule.window_end_tolerance_secs as u64;
        if pad >= window_secs {
            bail!(
                "schedule buffers ({}s) leave no room in a {}s aggregation window",
                pad,
                window_secs
            );
        }

        if self.schedule.min_acceptable_delay_secs > self.schedule.max_acceptable_delay_secs {
            bail!("schedule.min_acceptable_delay_secs must not exceed max_acceptable_delay_secs");
        }

        if self.max_concurrent_slots == 0 {
            bail!("max_concurrent_slots must be positive");
        }

        if self.ingestion.max_header_bytes == 0 || self.ingestion.max_entry_bytes == 0 {
            bail!("ingestion limits must be positive");
        }

        if self.recorders.sweep_interval.is_zero() {
            bail!("recorders.sweep_interval must be positive");
        }

        if self.recorders.eviction_threshold < self.recorders.defunct_threshold {
            bail!("recorders.eviction_threshold must be >= defunct_threshold");
        }

        if let Some(profile) = &self.work_profiles.default {
            validate_profile(profile).context("work_profiles.default")?;
        }
        for o in &self.work_profiles.overrides {
            validate_profile(&o.profile)
                .with_context(|| format!("work_profiles override for {}", o.process_group))?;
        }

        Ok(())
    }

    pub fn schedule_bootstrap(&self) -> ScheduleBootstrapConfig {
        ScheduleBootstrapConfig {
            scheduling_buffer_secs: self.schedule.scheduling_buffer_secs,
            window_duration_secs: self.aggregation_window_duration.as_secs() as u32,
            window_end_tolerance_secs: self.schedule.window_end_tolerance_secs,
            min_acceptable_delay_secs: self.schedule.min_acceptable_delay_secs,
            max_acceptable_delay_secs: self.schedule.max_acceptable_delay_secs,
        }
    }
}

fn validate_profile(profile: &WorkProfile) -> Result<()> {
    if profile.coverage_pct > 100 {
        bail!("coverage_pct must be within 0..=100");
    }
    if profile.duration == 0 {
        bail!("duration must be positive");
    }
    Ok(())
}

fn default_listen_addr() -> String {
    "0.0.0.0:2491".to_string()
}

fn default_ip_address() -> String {
    "127.0.0.1".to_string()
}

fn default_controller_id() -> u32 {
    1
}

fn default_window_duration() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_refresh_buffer() -> Duration {
    Duration::from_secs(120)
}

fn default_scheduling_buffer_secs() -> u32 {
    10
}

fn default_window_end_tolerance_secs() -> u32 {
    120
}

fn default_max_acceptable_delay_secs() -> u32 {
    120
}

fn default_max_concurrent_slots() -> u32 {
    1000
}

fn default_max_header_bytes() -> u32 {
    1024 * 1024
}

fn default_max_entry_bytes() -> u32 {
    10 * 1024 * 1024
}

fn default_defunct_threshold() -> Duration {
    Duration::from_secs(120)
}

fn default_eviction_threshold() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_leader_port() -> u16 {
    2496
}

fn default_leader_timeout() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = BackendConfig::from_yaml("{}").unwrap();
        assert_eq!(cfg.aggregation_window_duration, Duration::from_secs(1800));
        assert_eq!(cfg.schedule.scheduling_buffer_secs, 10);
        assert_eq!(cfg.max_concurrent_slots, 1000);
        assert!(cfg.leader.address.is_none());
    }

    #[test]
    fn parses_humantime_and_profiles() {
        let yaml = r#"
aggregation_window_duration: 10m
work_profile_refresh_buffer: 90s
schedule:
  scheduling_buffer_secs: 5
  window_end_tolerance_secs: 30
  min_acceptable_delay_secs: 2
  max_acceptable_delay_secs: 60
work_profiles:
  default:
    duration: 60
    coverage_pct: 20
    work:
      - type: cpu_sample
        frequency: 49
        max_frames: 200
  overrides:
    - process_group: { app_id: a, cluster: c, proc_name: p }
      profile:
        duration: 30
        coverage_pct: 100
        work: []
"#;
        let cfg = BackendConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            cfg.schedule_bootstrap(),
            ScheduleBootstrapConfig {
                scheduling_buffer_secs: 5,
                window_duration_secs: 600,
                window_end_tolerance_secs: 30,
                min_acceptable_delay_secs: 2,
                max_acceptable_delay_secs: 60,
            }
        );
        assert_eq!(cfg.work_profiles.default.unwrap().coverage_pct, 20);
        assert_eq!(cfg.work_profiles.overrides.len(), 1);
    }

    #[test]
    fn refresh_buffer_longer_than_window_is_rejected() {
        let yaml = "aggregation_window_duration: 1m\nwork_profile_refresh_buffer: 2m\n";
        assert!(BackendConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn inverted_delay_bounds_are_rejected() {
        let mut cfg = BackendConfig::default();
        cfg.schedule.min_acceptable_delay_secs = 90;
        cfg.schedule.max_acceptable_delay_secs = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn coverage_over_hundred_is_rejected() {
        let yaml = "work_profiles:\n  default: { duration: 60, coverage_pct: 150, work: [] }\n";
        assert!(BackendConfig::from_yaml(yaml).is_err());
    }
}
