use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// Hands out small integer ids, lowest free first, and takes them back.
#[derive(Debug, Default)]
pub struct IdPool {
    inner: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    next: u32,
    free: BTreeSet<u32>,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> u32 {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.free.pop_first() {
            return id;
        }
        state.next += 1;
        state.next
    }

    pub fn release(&self, id: u32) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if id == 0 || id > state.next {
            return;
        }
        if id == state.next {
            state.next -= 1;
            // shrink past any trailing free ids
            loop {
                let next = state.next;
                if next == 0 || !state.free.remove(&next) {
                    break;
                }
                state.next -= 1;
            }
        } else {
            state.free.insert(id);
        }
    }

    /// Number of ids currently handed out
    pub fn in_use(&self) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next as usize - state.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_start_at_one() {
        let pool = IdPool::new();
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 2);
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_lowest_free_id_is_reused() {
        let pool = IdPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        let _c = pool.acquire();
        pool.release(b);
        pool.release(a);
        assert_eq!(pool.acquire(), a);
        assert_eq!(pool.acquire(), b);
        assert_eq!(pool.acquire(), 4);
    }

    #[test]
    fn test_release_trailing_ids_shrinks() {
        let pool = IdPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.in_use(), 1);
        pool.release(a);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.acquire(), 1);
    }

    #[test]
    fn test_concurrent_acquire_unique() {
        let pool = Arc::new(IdPool::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || (0..50).map(|_| pool.acquire()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for w in workers {
            for id in w.join().unwrap() {
                assert!(seen.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), 200);
    }
}
