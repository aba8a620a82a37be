use crate::handle::Owner;
use crate::state::ServerState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Fields only the owner (per the access policy) may see
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PrivateDetails {
    pub owner: Owner,
    pub pid: Option<u32>,
    pub home_directory: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
}

/// One registry entry as seen by a lister
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerSummary {
    pub id: u32,
    pub name: String,
    pub state: ServerState,
    pub elapsed_seconds: u64,
    pub max_run_seconds: u64,
    pub private: Option<PrivateDetails>,
}

impl fmt::Display for ServerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<4} {:<20} {:<9} {}s",
            self.id, self.name, self.state, self.elapsed_seconds
        )?;
        if self.max_run_seconds > 0 {
            write!(f, "/{}s", self.max_run_seconds)?;
        }
        if let Some(private) = &self.private {
            write!(f, " uid={} gid={}", private.owner.uid, private.owner.gid)?;
            if let Some(pid) = private.pid {
                write!(f, " pid={pid}")?;
            }
            write!(f, " home={}", private.home_directory.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(private: Option<PrivateDetails>) -> ServerSummary {
        ServerSummary {
            id: 3,
            name: "creative".into(),
            state: ServerState::Running,
            elapsed_seconds: 42,
            max_run_seconds: 600,
            private,
        }
    }

    #[test]
    fn test_public_line_hides_owner() {
        let line = summary(None).to_string();
        assert!(line.contains("creative"));
        assert!(line.contains("42s/600s"));
        assert!(!line.contains("uid="));
    }

    #[test]
    fn test_private_line_shows_owner() {
        let line = summary(Some(PrivateDetails {
            owner: Owner { uid: 100, gid: 10 },
            pid: Some(4242),
            home_directory: PathBuf::from("/srv/creative"),
            started_at: None,
        }))
        .to_string();
        assert!(line.contains("uid=100 gid=10 pid=4242 home=/srv/creative"));
    }
}
