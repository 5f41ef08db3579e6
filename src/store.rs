use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{EngineError, EngineResult};

pub trait Keyed {
    fn key(&self) -> &str;
}

/// Key-value persistence for session and match records. Last write wins;
/// callers serialize read-modify-write cycles through [`EntityLocks`].
#[async_trait]
pub trait Repository<T>: Send + Sync {
    async fn create(&self, record: T) -> EngineResult<()>;
    async fn get(&self, id: &str) -> EngineResult<T>;
    async fn update(&self, record: T) -> EngineResult<()>;
    async fn delete(&self, id: &str) -> EngineResult<()>;
}

pub struct MemoryRepository<T> {
    kind: &'static str,
    records: DashMap<String, T>,
}

impl<T> MemoryRepository<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl<T> Repository<T> for MemoryRepository<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    async fn create(&self, record: T) -> EngineResult<()> {
        let key = record.key().to_string();
        if self.records.contains_key(&key) {
            return Err(EngineError::Conflict(format!("{} {key} already exists", self.kind)));
        }
        self.records.insert(key, record);
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<T> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound(self.kind))
    }

    async fn update(&self, record: T) -> EngineResult<()> {
        match self.records.get_mut(record.key()) {
            Some(mut entry) => {
                *entry = record;
                Ok(())
            }
            None => Err(EngineError::NotFound(self.kind)),
        }
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(EngineError::NotFound(self.kind))
    }
}

/// One async mutex per entity id. An entry lives only while some caller
/// holds or waits on it.
#[derive(Clone, Default)]
pub struct EntityLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held lock on one entity; releasing the last handle drops the map entry.
pub struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The shard lock is held while checking, so a concurrent `lock`
        // either cloned the mutex already or will insert a fresh one.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &str) -> EntityGuard {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        EntityGuard {
            guard: Some(lock.lock_owned().await),
            id: id.to_string(),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{EntityLocks, Keyed, MemoryRepository, Repository};
    use crate::error::EngineError;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        id: String,
        value: u32,
    }

    impl Keyed for Counter {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn counter(value: u32) -> Counter {
        Counter {
            id: "c".into(),
            value,
        }
    }

    #[tokio::test]
    async fn basic_key_value_semantics() {
        let repo = MemoryRepository::new("counter");
        repo.create(counter(1)).await.unwrap();
        assert!(matches!(repo.create(counter(2)).await, Err(EngineError::Conflict(_))));
        repo.update(counter(3)).await.unwrap();
        assert_eq!(repo.get("c").await.unwrap().value, 3);
        repo.delete("c").await.unwrap();
        assert!(matches!(repo.get("c").await, Err(EngineError::NotFound("counter"))));
        assert!(matches!(repo.update(counter(4)).await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn locks_prevent_lost_updates() {
        let repo = Arc::new(MemoryRepository::new("counter"));
        repo.create(counter(0)).await.unwrap();
        let locks = EntityLocks::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("c").await;
                let mut current = repo.get("c").await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                current.value += 1;
                repo.update(current).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(repo.get("c").await.unwrap().value, 16);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let locks = EntityLocks::new();
        let first = locks.lock("a").await;
        let other = locks.lock("b").await;
        assert_eq!(locks.len(), 2);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        waiter.await.unwrap();
        drop(other);
        assert_eq!(locks.len(), 0);

        drop(locks.lock("a").await);
        assert_eq!(locks.len(), 0);
    }
}
