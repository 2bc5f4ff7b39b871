use parking_lot::RwLock;
use tracing::info;

/// Quién es el líder actual. Lo actualiza el operador (o el proceso de elección).
#[derive(Debug)]
pub struct LeaderStore {
    own_ip: String,
    leader: RwLock<Option<String>>,
}

impl LeaderStore {
    pub fn new(own_ip: impl Into<String>, initial: Option<String>) -> Self {
        Self {
            own_ip: own_ip.into(),
            leader: RwLock::new(initial),
        }
    }

    pub fn set_leader_ip_address(&self, address: Option<String>) {
        let mut leader = self.leader.write();
        if *leader != address {
            info!(old = ?*leader, new = ?address, "cambio de líder");
        }
        *leader = address;
    }

    pub fn get_leader_ip_address(&self) -> Option<String> {
        self.leader.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.read().as_deref() == Some(self.own_ip.as_str())
    }
}
