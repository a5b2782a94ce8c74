use crate::core::{ContentPack, Result};
use crate::store::WorldStore;
use std::sync::Arc;
use tracing::{Level, event};

/// Lifts a content pack's lock for the duration of a migration.
///
/// Call [`release`](Self::release) to restore the lock. If the guard is
/// dropped instead (an early return or a panic), the relock is spawned on the
/// current tokio runtime.
pub struct PackLockGuard {
    store: Arc<dyn WorldStore>,
    pack_id: String,
    was_locked: bool,
    released: bool,
}

impl PackLockGuard {
    pub async fn acquire(store: Arc<dyn WorldStore>, pack: &ContentPack) -> Result<Self> {
        if pack.locked {
            store.set_pack_locked(&pack.id, false).await?;
            event!(Level::DEBUG, pack = %pack.id, "Unlocked content pack for migration");
        }
        Ok(Self {
            store,
            pack_id: pack.id.clone(),
            was_locked: pack.locked,
            released: false,
        })
    }

    pub fn pack_id(&self) -> &str {
        &self.pack_id
    }

    pub fn was_locked(&self) -> bool {
        self.was_locked
    }

    /// Puts the original lock state back.
    pub async fn release(mut self) -> Result<()> {
        if !self.was_locked {
            self.released = true;
            return Ok(());
        }
        let result = self.store.set_pack_locked(&self.pack_id, true).await;
        self.released = result.is_ok();
        if result.is_ok() {
            event!(Level::DEBUG, pack = %self.pack_id, "Relocked content pack");
        }
        result
    }
}

impl Drop for PackLockGuard {
    fn drop(&mut self) {
        if self.released || !self.was_locked {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                event!(
                    Level::WARN,
                    pack = %self.pack_id,
                    "PackLockGuard dropped without release; relocking in the background"
                );
                let store = self.store.clone();
                let pack_id = self.pack_id.clone();
                handle.spawn(async move {
                    if let Err(err) = store.set_pack_locked(&pack_id, true).await {
                        event!(Level::ERROR, pack = %pack_id, "Failed to relock content pack: {}", err);
                    }
                });
            }
            Err(_) => {
                event!(
                    Level::ERROR,
                    pack = %self.pack_id,
                    "PackLockGuard dropped outside a runtime; the pack stays unlocked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PackContentKind, PackSource};
    use crate::store::{InMemoryWorldStore, PackSnapshot, WorldSnapshot};

    fn store_with(pack: ContentPack) -> Arc<InMemoryWorldStore> {
        Arc::new(InMemoryWorldStore::from_snapshot(
            WorldSnapshot::new().with_pack(PackSnapshot::new(pack)),
        ))
    }

    fn locked_pack() -> ContentPack {
        ContentPack::new("world.gear", "Gear", PackSource::World, PackContentKind::Records).locked()
    }

    async fn is_locked(store: &InMemoryWorldStore) -> bool {
        store.packs().await.unwrap()[0].locked
    }

    #[tokio::test]
    async fn release_restores_the_lock() {
        let store = store_with(locked_pack());
        let guard = PackLockGuard::acquire(store.clone(), &locked_pack()).await.unwrap();
        assert!(guard.was_locked());
        assert!(!is_locked(&store).await);
        guard.release().await.unwrap();
        assert!(is_locked(&store).await);
    }

    #[tokio::test]
    async fn unlocked_packs_are_left_alone() {
        let pack = ContentPack::new("world.npcs", "NPCs", PackSource::World, PackContentKind::Owners);
        let store = store_with(pack.clone());
        let guard = PackLockGuard::acquire(store.clone(), &pack).await.unwrap();
        guard.release().await.unwrap();
        assert!(!is_locked(&store).await);
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_still_relocks() {
        let store = store_with(locked_pack());
        {
            let _guard = PackLockGuard::acquire(store.clone(), &locked_pack()).await.unwrap();
        }
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if is_locked(&store).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(is_locked(&store).await);
    }
}
