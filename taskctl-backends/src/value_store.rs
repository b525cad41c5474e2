use async_trait::async_trait;
use taskctl_common::Result;

/// The abstracted secret payload store (spec.md §6). Keyed by the secret's
/// `name`; metadata lives elsewhere (the Secret Service's repository).
#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn put(&self, name: &str, value: &str) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[cfg(feature = "test-utils")]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeValueStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl FakeValueStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ValueStore for FakeValueStore {
        async fn put(&self, name: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&self, name: &str) -> Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(name).cloned())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.values.lock().unwrap().remove(name);
            Ok(())
        }
    }
}
