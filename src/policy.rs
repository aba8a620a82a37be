//! Who may manage or inspect a server.
//!
//! The registry asks an [`AccessPolicy`] instead of comparing ids itself,
//! so richer rules (ACLs, group hierarchies) can be plugged in without
//! touching checkout.

use crate::handle::Owner;

/// Identity of the caller asking for servers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Requester {
    pub uid: Option<u32>,
    /// `None` matches no group
    pub gid: Option<u32>,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(uid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: None,
        }
    }

    pub fn user_in_group(uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: Some(gid),
        }
    }
}

pub trait AccessPolicy: Send + Sync {
    fn permits(&self, owner: Owner, requester: Requester) -> bool;
}

/// Owner uid matches, or the owner's group matches for shared access.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerPolicy;

impl AccessPolicy for OwnerPolicy {
    fn permits(&self, owner: Owner, requester: Requester) -> bool {
        requester.uid == Some(owner.uid) || requester.gid == Some(owner.gid)
    }
}
