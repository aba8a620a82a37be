use crate::server::ServerProcess;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies the client connection a server belongs to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix owner of a server
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// A supervised server bound to the client connection that owns it.
///
/// Whoever holds the handle has exclusive access to the server. Handles
/// move into the registry on `attach` and out of it on checkout.
pub struct ServerHandle {
    server: ServerProcess,
    client: ClientId,
    issued: bool,
}

impl ServerHandle {
    pub(crate) fn new(server: ServerProcess, client: ClientId) -> Self {
        Self {
            server,
            client,
            issued: true,
        }
    }

    pub fn server(&self) -> &ServerProcess {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut ServerProcess {
        &mut self.server
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// True while checked out of (or never placed in) the registry
    pub fn is_issued(&self) -> bool {
        self.issued
    }

    pub(crate) fn set_issued(&mut self, issued: bool) {
        self.issued = issued;
    }

    /// Release the supervisor; dropping it ends a running server.
    pub fn into_server(self) -> ServerProcess {
        self.server
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.server.id())
            .field("client", &self.client)
            .field("issued", &self.issued)
            .finish()
    }
}
