//! Command reconciliation run on the first READY of a session.
//!
//! The remote side is reached through [`CommandSync`]; talking to the REST
//! API is the transport layer's job.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Snowflake, SyncError};

/// A command definition as the remote knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    pub id: Snowflake,
    pub application_id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Remote command registry.
#[async_trait]
pub trait CommandSync: Send + Sync {
    /// Every command currently registered for the application.
    async fn remote_commands(
        &self,
        application_id: Snowflake,
    ) -> Result<Vec<ApplicationCommand>, SyncError>;

    async fn delete_command(
        &self,
        application_id: Snowflake,
        command_id: Snowflake,
    ) -> Result<(), SyncError>;
}

/// Removes remote commands that are no longer declared locally.
pub struct CommandReconciler {
    declared: HashSet<String>,
    remote: Arc<dyn CommandSync>,
}

impl CommandReconciler {
    pub fn new(
        declared: impl IntoIterator<Item = impl Into<String>>,
        remote: Arc<dyn CommandSync>,
    ) -> Self {
        Self {
            declared: declared.into_iter().map(Into::into).collect(),
            remote,
        }
    }

    /// Delete every remote command whose name is not declared.
    ///
    /// Returns the commands that were removed, in remote order.
    #[tracing::instrument(skip(self), fields(declared = self.declared.len()))]
    pub async fn reconcile(
        &self,
        application_id: Snowflake,
    ) -> Result<Vec<ApplicationCommand>, SyncError> {
        let remote = self.remote.remote_commands(application_id).await?;

        let mut removed = Vec::new();
        for command in remote {
            if self.declared.contains(&command.name) {
                debug!(name = %command.name, "command still declared");
                continue;
            }
            self.remote
                .delete_command(application_id, command.id)
                .await?;
            info!(name = %command.name, id = %command.id, "removed stale command");
            removed.push(command);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeRemote {
        commands: Mutex<Vec<ApplicationCommand>>,
        fail_listing: bool,
    }

    #[async_trait]
    impl CommandSync for FakeRemote {
        async fn remote_commands(
            &self,
            application_id: Snowflake,
        ) -> Result<Vec<ApplicationCommand>, SyncError> {
            if self.fail_listing {
                return Err(SyncError::Commands {
                    application_id,
                    message: "unreachable".to_string(),
                });
            }
            Ok(self.commands.lock().clone())
        }

        async fn delete_command(
            &self,
            _application_id: Snowflake,
            command_id: Snowflake,
        ) -> Result<(), SyncError> {
            self.commands.lock().retain(|c| c.id != command_id);
            Ok(())
        }
    }

    fn command(id: u64, name: &str) -> ApplicationCommand {
        ApplicationCommand {
            id: Snowflake(id),
            application_id: Snowflake(1),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_removes_undeclared() {
        let remote = Arc::new(FakeRemote {
            commands: Mutex::new(vec![command(1, "ping"), command(2, "old"), command(3, "help")]),
            fail_listing: false,
        });
        let reconciler = CommandReconciler::new(["ping", "help"], remote.clone());

        let removed = reconciler.reconcile(Snowflake(1)).await.unwrap();
        assert_eq!(removed, vec![command(2, "old")]);

        let left: Vec<_> = remote.commands.lock().iter().map(|c| c.name.clone()).collect();
        assert_eq!(left, vec!["ping", "help"]);
    }

    #[tokio::test]
    async fn test_reconcile_propagates_remote_failure() {
        let remote = Arc::new(FakeRemote {
            fail_listing: true,
            ..Default::default()
        });
        let reconciler = CommandReconciler::new(Vec::<String>::new(), remote);
        assert!(matches!(
            reconciler.reconcile(Snowflake(1)).await,
            Err(SyncError::Commands { .. })
        ));
    }
}
