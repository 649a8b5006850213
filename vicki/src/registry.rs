//! Script registry
//!
//! Holds every installed script in rank order together with the handle of
//! its sandbox. Registration is all or nothing: the metablock is parsed and
//! the program installed against a fresh `Listener` before anything becomes
//! visible to dispatch.

use crate::capabilities::{CapabilityProxy, ScopedCapabilities, ScriptGrants};
use crate::error::{VickiError, VickiResult};
use crate::logging::Console;
use crate::sandbox::host::panic_message;
use crate::sandbox::listener::InstalledListeners;
use crate::sandbox::{Listener, SandboxHandle, SandboxHost, ScriptApi, ScriptSource};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;
use vicki_script::{parse_metablock, Metablock, PermissionSet, PermissionSpec};

/// An installed script. Immutable; an update replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Script {
    #[serde(flatten)]
    metablock: Metablock,
    rank: u32,
}

impl Script {
    pub fn id(&self) -> &str {
        &self.metablock.id
    }

    pub fn name(&self) -> &str {
        &self.metablock.name
    }

    pub fn description(&self) -> Option<&str> {
        self.metablock.description.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.metablock.icon.as_deref()
    }

    pub fn permissions(&self) -> &[PermissionSpec] {
        &self.metablock.permissions
    }

    pub fn version(&self) -> u32 {
        self.metablock.version
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn update_urls(&self) -> &[String] {
        &self.metablock.update_urls
    }

    /// `@utterance` examples with the invocation name filled in.
    pub fn utterances(&self, invocation: &str) -> Vec<String> {
        self.metablock.utterances_for(invocation)
    }

    pub fn metablock(&self) -> &Metablock {
        &self.metablock
    }
}

#[derive(Clone)]
pub struct RegisteredScript {
    pub script: Arc<Script>,
    pub sandbox: SandboxHandle,
}

pub struct ScriptRegistry {
    entries: RwLock<Vec<RegisteredScript>>,
    host: SandboxHost,
    proxy: Arc<CapabilityProxy>,
}

impl ScriptRegistry {
    pub fn new(proxy: Arc<CapabilityProxy>, mailbox_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            host: SandboxHost::new(mailbox_capacity),
            proxy,
        }
    }

    fn prepare(&self, source: &ScriptSource) -> VickiResult<(Metablock, InstalledListeners)> {
        let metablock = parse_metablock(&source.source)?;
        let grants = ScriptGrants::new(
            metablock.id.clone(),
            PermissionSet::from_specs(&metablock.permissions),
        );
        let api = ScriptApi::new(
            ScopedCapabilities::new(self.proxy.clone(), grants),
            Console::new(metablock.id.clone(), metablock.name.clone()),
        );

        let mut listener = Listener::new(api);
        // Top-level script code may panic; that only costs this script.
        let installed = catch_unwind(AssertUnwindSafe(|| source.program.install(&mut listener)));
        let message = match installed {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
        };
        if let Some(message) = message {
            return Err(VickiError::Install {
                script: metablock.id,
                message,
            });
        }
        let installed = listener.finish().map_err(|source| VickiError::Listen {
            script: metablock.id.clone(),
            source,
        })?;
        Ok((metablock, installed))
    }

    /// Register behind every installed script.
    pub async fn register(&self, source: ScriptSource) -> VickiResult<Arc<Script>> {
        self.insert(source, None).await
    }

    pub async fn register_with_rank(&self, source: ScriptSource, rank: u32) -> VickiResult<Arc<Script>> {
        self.insert(source, Some(rank)).await
    }

    async fn insert(&self, source: ScriptSource, rank: Option<u32>) -> VickiResult<Arc<Script>> {
        let (metablock, installed) = self.prepare(&source)?;

        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.script.id() == metablock.id) {
            return Err(VickiError::DuplicateScript(metablock.id));
        }
        let rank = match rank {
            Some(rank) if entries.iter().any(|e| e.script.rank == rank) => {
                return Err(VickiError::DuplicateRank(rank));
            }
            Some(rank) => rank,
            None => match entries.last() {
                Some(last) => last
                    .script
                    .rank
                    .checked_add(1)
                    .ok_or(VickiError::RankExhausted(last.script.rank))?,
                None => 1,
            },
        };

        let script = Arc::new(Script { metablock, rank });
        let sandbox = self.host.spawn(script.id(), installed);
        let position = entries.partition_point(|e| e.script.rank < rank);
        entries.insert(
            position,
            RegisteredScript {
                script: script.clone(),
                sandbox,
            },
        );
        tracing::info!(script = %script.id(), name = %script.name(), rank, "script registered");
        Ok(script)
    }

    /// Swap in a newer version of an installed script, keeping its rank.
    pub async fn replace(&self, source: ScriptSource) -> VickiResult<Arc<Script>> {
        let (metablock, installed) = self.prepare(&source)?;

        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|e| e.script.id() == metablock.id)
            .ok_or_else(|| VickiError::UnknownScript(metablock.id.clone()))?;
        let current = entries[index].script.clone();
        if metablock.version <= current.version() {
            return Err(VickiError::VersionNotNewer {
                id: metablock.id,
                installed: current.version(),
                new: metablock.version,
            });
        }

        entries.remove(index);
        self.host.shutdown(current.id()).await;

        let script = Arc::new(Script {
            metablock,
            rank: current.rank,
        });
        let sandbox = self.host.spawn(script.id(), installed);
        entries.insert(
            index,
            RegisteredScript {
                script: script.clone(),
                sandbox,
            },
        );
        tracing::info!(
            script = %script.id(),
            from = current.version(),
            to = script.version(),
            "script updated"
        );
        Ok(script)
    }

    pub async fn unregister(&self, script_id: &str) -> VickiResult<Arc<Script>> {
        let removed = {
            let mut entries = self.entries.write().await;
            let index = entries
                .iter()
                .position(|e| e.script.id() == script_id)
                .ok_or_else(|| VickiError::UnknownScript(script_id.to_string()))?;
            entries.remove(index)
        };
        self.host.shutdown(script_id).await;
        tracing::info!(script = %script_id, "script unregistered");
        Ok(removed.script)
    }

    /// Installed scripts by ascending rank.
    pub async fn all(&self) -> Vec<Arc<Script>> {
        self.entries.read().await.iter().map(|e| e.script.clone()).collect()
    }

    pub async fn get(&self, script_id: &str) -> Option<RegisteredScript> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.script.id() == script_id)
            .cloned()
    }

    /// Snapshot used for one dispatch. Later registrations do not affect a
    /// dispatch already in progress.
    pub(crate) async fn candidates(&self) -> Vec<RegisteredScript> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.host.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{DisconnectedBrowser, NoNativeCompanion};
    use pretty_assertions::assert_eq;
    use vicki_script::MetablockError;

    fn registry() -> ScriptRegistry {
        let proxy = Arc::new(CapabilityProxy::new(
            Arc::new(DisconnectedBrowser),
            Arc::new(NoNativeCompanion),
        ));
        ScriptRegistry::new(proxy, 8)
    }

    fn source(id: &str, version: u32) -> ScriptSource {
        ScriptSource::new(
            format!(
                "// ==VickiScript==\n// @name {id}\n// @version {version}\n// ==/VickiScript==\n"
            ),
            |_| Ok(()),
        )
    }

    async fn ids(registry: &ScriptRegistry) -> Vec<String> {
        registry.all().await.iter().map(|s| s.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_name_is_rejected() {
        let registry = registry();
        let err = registry
            .register(ScriptSource::new(
                "// ==VickiScript==\n// @description nameless\n// ==/VickiScript==\n",
                |_| Ok(()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, VickiError::Metablock(MetablockError::MissingName)));
        assert!(registry.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_rank_order() {
        let registry = registry();
        registry.register(source("b", 1)).await.unwrap();
        registry.register_with_rank(source("a", 1), 0).await.unwrap();
        registry.register(source("c", 1)).await.unwrap();
        assert_eq!(ids(&registry).await, vec!["a", "b", "c"]);
        let ranks: Vec<u32> = registry.all().await.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicates() {
        let registry = registry();
        registry.register_with_rank(source("a", 1), 5).await.unwrap();
        assert!(matches!(
            registry.register(source("a", 2)).await,
            Err(VickiError::DuplicateScript(_))
        ));
        assert!(matches!(
            registry.register_with_rank(source("b", 1), 5).await,
            Err(VickiError::DuplicateRank(5))
        ));
    }

    #[tokio::test]
    async fn test_failed_install_is_not_registered() {
        let registry = registry();
        let bad = ScriptSource::new(
            "// ==VickiScript==\n// @name bad\n// ==/VickiScript==\n",
            |vs| {
                vs.listen("(unclosed", |_ctx| async { Ok(()) });
                Ok(())
            },
        );
        assert!(matches!(
            registry.register(bad).await,
            Err(VickiError::Listen { .. })
        ));

        let failing = ScriptSource::new(
            "// ==VickiScript==\n// @name failing\n// ==/VickiScript==\n",
            |_| anyhow::bail!("top level threw"),
        );
        let err = registry.register(failing).await.unwrap_err();
        assert_eq!(err.to_string(), "script 'failing' failed to install: top level threw");
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_install_is_not_registered() {
        let registry = registry();
        let err = registry
            .register(ScriptSource::new(
                "// ==VickiScript==\n// @name boom\n// ==/VickiScript==\n",
                |_| panic!("top level bug"),
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "script 'boom' failed to install: panicked: top level bug"
        );
        assert_eq!(registry.len().await, 0);

        registry.register(source("after", 1)).await.unwrap();
        assert_eq!(ids(&registry).await, vec!["after"]);
    }

    #[tokio::test]
    async fn test_auto_rank_after_max() {
        let registry = registry();
        registry.register_with_rank(source("last", 1), u32::MAX).await.unwrap();
        assert!(matches!(
            registry.register(source("next", 1)).await,
            Err(VickiError::RankExhausted(u32::MAX))
        ));
        registry.register_with_rank(source("next", 1), 3).await.unwrap();
        assert_eq!(ids(&registry).await, vec!["next", "last"]);
    }

    #[tokio::test]
    async fn test_update_keeps_rank() {
        let registry = registry();
        registry.register(source("a", 1)).await.unwrap();
        registry.register(source("b", 1)).await.unwrap();

        assert!(matches!(
            registry.replace(source("a", 1)).await,
            Err(VickiError::VersionNotNewer { installed: 1, new: 1, .. })
        ));
        let updated = registry.replace(source("a", 2)).await.unwrap();
        assert_eq!(updated.version(), 2);
        assert_eq!(updated.rank(), 1);
        assert_eq!(ids(&registry).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = registry();
        registry.register(source("a", 1)).await.unwrap();
        let sandbox = registry.get("a").await.unwrap().sandbox;
        registry.unregister("a").await.unwrap();
        assert!(registry.all().await.is_empty());
        assert!(matches!(
            sandbox.status().await,
            Err(VickiError::SandboxClosed(_))
        ));
        assert!(matches!(
            registry.unregister("a").await,
            Err(VickiError::UnknownScript(_))
        ));
    }
}
