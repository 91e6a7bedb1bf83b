//! No-op [`MapDataStore`] implementation.
//!
//! [`NullDataStore`] discards all writes and returns empty results for reads.
//! Useful for testing, benchmarks, and ephemeral data that does not require
//! persistence beyond the in-memory [`RecordStore`](crate::storage::RecordStore).

use async_trait::async_trait;

use crate::storage::map_data_store::MapDataStore;
use crate::storage::record::RecordValue;

/// No-op `MapDataStore` for testing and ephemeral data.
///
/// All write operations succeed immediately without side effects.
/// All read operations return empty results. This is the default
/// data store when no external persistence backend is configured.
pub struct NullDataStore;

#[async_trait]
impl MapDataStore for NullDataStore {
    async fn add(
        &self,
        _map: &str,
        _key: &str,
        _value: &RecordValue,
        _expiration_time: i64,
        _now: i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_backup(
        &self,
        _map: &str,
        _key: &str,
        _value: &RecordValue,
        _expiration_time: i64,
        _now: i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _map: &str, _key: &str, _now: i64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove_backup(&self, _map: &str, _key: &str, _now: i64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load(&self, _map: &str, _key: &str) -> anyhow::Result<Option<RecordValue>> {
        Ok(None)
    }

    async fn load_all(
        &self,
        _map: &str,
        _keys: &[String],
    ) -> anyhow::Result<Vec<(String, RecordValue)>> {
        Ok(Vec::new())
    }

    async fn remove_all(&self, _map: &str, _keys: &[String]) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_loadable(&self, _key: &str) -> bool {
        true
    }

    fn pending_operation_count(&self) -> u64 {
        0
    }

    async fn soft_flush(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn hard_flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn flush_key(
        &self,
        _map: &str,
        _key: &str,
        _value: &RecordValue,
        _is_backup: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn reset(&self) {
        // Nothing to reset — NullDataStore holds no state.
    }

    fn is_null(&self) -> bool {
        true
    }
}
