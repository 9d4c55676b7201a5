//! 上次使用的 Worker（粘滞路由用）
//!
//! 进程内单一所有者，读写都经过锁，后写者生效；trait 化以便换成按会话存储。

use std::sync::RwLock;

pub trait RoutingHint: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, worker: &str);
}

#[derive(Debug, Default)]
pub struct LastServiceHint {
    slot: RwLock<Option<String>>,
}

impl LastServiceHint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingHint for LastServiceHint {
    fn get(&self) -> Option<String> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, worker: &str) {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(worker.to_string());
    }
}
