use serde::{Deserialize, Serialize};
use std::fmt;

/// Aplicación monitoreada: (app_id, cluster, proc_name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub app_id: String,
    pub cluster: String,
    pub proc_name: String,
}

impl ProcessGroup {
    pub fn new(
        app_id: impl Into<String>,
        cluster: impl Into<String>,
        proc_name: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: cluster.into(),
            proc_name: proc_name.into(),
        }
    }
}

/// Forma compacta `app_id/cluster/proc_name`, la que usamos en logs.
impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_id, self.cluster, self.proc_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_repr_joins_with_slashes() {
        let pg = ProcessGroup::new("checkout", "c1", "java");
        assert_eq!(pg.to_string(), "checkout/c1/java");
    }
}
