use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes read-modify-write cycles per phone number.
#[derive(Default)]
pub struct PhoneLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, phone: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody is holding or waiting on.
            if locks.len() > 1024 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_phone_is_serialized() {
        let locks = Arc::new(PhoneLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("4811").await;
        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("4811").await;
                order.lock().await.push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_phones_do_not_block() {
        let locks = PhoneLocks::new();
        let _a = locks.lock("1").await;
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.lock("2")).await;
        assert!(acquired.is_ok());
    }
}
