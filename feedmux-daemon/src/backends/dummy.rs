//! Dummy service
//!
//! Serves a fixed set of items so the daemon can be exercised without
//! network access. Each item gets a secondary "author" lookup, the same
//! shape real adapters use for avatar fetches.
//!
//! Params: `count` (number of items, default 2).

use crate::backend::{Backend, BackendError, CallScope};
use async_trait::async_trait;
use feedmux_common::{Params, Record};
use tracing::debug;

const SERVICE: &str = "dummy";
const DEFAULT_COUNT: usize = 2;

#[derive(Debug, Clone)]
pub struct DummyBackend {
    /// Anchor for item timestamps so repeated polls are identical
    epoch: i64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            epoch: chrono::Utc::now().timestamp(),
        }
    }

    fn item(&self, n: usize) -> Record {
        let timestamp = self.epoch - (n as i64 - 1) * 3600;
        let date = chrono::DateTime::from_timestamp(timestamp, 0)
            .map(|d| d.to_rfc3339())
            .unwrap_or_default();

        Record::builder(SERVICE, format!("dummy-{}", n), timestamp)
            .put("title", &format!("Dummy {}", n))
            .put("url", "http://example.com/")
            .take("date".to_string(), date)
            .build()
    }
}

#[async_trait]
impl Backend for DummyBackend {
    fn name(&self) -> &str {
        SERVICE
    }

    fn static_caps(&self) -> Vec<String> {
        vec!["is-configured".to_string()]
    }

    fn dynamic_caps(&self) -> Vec<String> {
        vec!["credentials-valid".to_string()]
    }

    async fn fetch(
        &self,
        query: &str,
        params: &Params,
        scope: CallScope,
    ) -> Result<(), BackendError> {
        let count = match params.get("count") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| BackendError::MalformedResponse(format!("count={}: {}", raw, e)))?,
            None => DEFAULT_COUNT,
        };
        debug!(query, count, "Dummy fetch");

        let items: Vec<Record> = (1..=count).map(|n| self.item(n)).collect();
        // Base records go first so the author lookups replace them, not the reverse
        scope.submit(items.clone());

        for item in items {
            scope.spawn(format!("author {}", item.identity()), |author_scope| async move {
                author_scope.submit(vec![item.with_property("author", "Dummy Author")]);
                Ok(())
            });
        }
        Ok(())
    }
}
