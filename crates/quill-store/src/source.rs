use crate::store::{DataSource, StoreResult};
use crate::types::DataHandle;

/// A data source over an already materialized, ordered list of handles.
#[derive(Clone, Debug, Default)]
pub struct QuickDataSource {
    handles: Vec<DataHandle>,
}

impl QuickDataSource {
    pub fn new(handles: Vec<DataHandle>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn into_handles(self) -> Vec<DataHandle> {
        self.handles
    }
}

impl FromIterator<DataHandle> for QuickDataSource {
    fn from_iter<T: IntoIterator<Item = DataHandle>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait::async_trait]
impl DataSource for QuickDataSource {
    async fn enumerate(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .handles
            .iter()
            .map(|handle| handle.key().to_string())
            .collect())
    }

    async fn read(&self, key: &str) -> StoreResult<Option<DataHandle>> {
        Ok(self
            .handles
            .iter()
            .find(|handle| handle.key() == key)
            .cloned())
    }

    async fn handles(&self) -> StoreResult<Vec<DataHandle>> {
        Ok(self.handles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DataStore;
    use crate::store::StoreError;

    #[tokio::test(flavor = "current_thread")]
    async fn enumerate_expected_insertion_order() {
        let sink = DataStore::new().sink(None);
        let b = sink.write_data("b", "2", None, Vec::new()).expect("write");
        let a = sink.write_data("a", "1", None, Vec::new()).expect("write");
        let source = QuickDataSource::new(vec![b.clone(), a.clone()]);

        let keys = source.enumerate().await.expect("enumerate should succeed");
        assert_eq!(keys, vec![b.key().to_string(), a.key().to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn read_strict_unknown_key_expected_not_found() {
        let source = QuickDataSource::default();
        let error = source
            .read_strict("nope")
            .await
            .expect_err("unknown key should fail");
        assert_eq!(error, StoreError::NotFound("nope".to_string()));
    }
}
