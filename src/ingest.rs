use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::layers::PartitionKey;
use crate::source::{RateRequest, RateSource};
use crate::storage::PartitionStore;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FetchOutcome {
    pub location: String,
    pub fetched: bool,
    pub sha256: Option<String>,
}

/// Stores the provider payload for `date` once. An existing raw snapshot is
/// returned as-is without contacting the source.
pub async fn fetch_and_store_raw(
    store: &dyn PartitionStore,
    source: &dyn RateSource,
    base_currency: &str,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<FetchOutcome> {
    let key = PartitionKey::raw(date);
    if store.exists(&key)? {
        let location = store.location(&key);
        info!("raw snapshot already present at {location}, skipping fetch");
        return Ok(FetchOutcome {
            location,
            fetched: false,
            sha256: None,
        });
    }

    let request = RateRequest {
        base_currency: base_currency.to_string(),
        date: (date != today).then_some(date),
    };
    let bytes = source.fetch(&request).await?;
    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&bytes) {
        return Err(PipelineError::SourceUnavailable {
            reason: format!("{} returned a body that is not JSON: {e}", source.name()),
            transient: false,
        });
    }

    let digest = sha256_hex(&bytes);
    let location = store.write(&key, &bytes)?;
    info!(
        "stored raw snapshot from {} at {location} (sha256={digest})",
        source.name()
    );
    Ok(FetchOutcome {
        location,
        fetched: true,
        sha256: Some(digest),
    })
}

pub fn load_raw(store: &dyn PartitionStore, date: NaiveDate) -> Result<serde_json::Value> {
    let key = PartitionKey::raw(date);
    let bytes = store.read(&key)?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::malformed(store.location(&key), e))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::{fetch_and_store_raw, load_raw};
    use crate::error::{PipelineError, Result};
    use crate::layers::PartitionKey;
    use crate::source::{RateRequest, RateSource};
    use crate::storage::{MemoryStore, PartitionStore};

    // Unsorted keys and a trailing-zero float, as a provider might send them.
    const PROVIDER_BODY: &[u8] = br#"{"result":"success","documentation":"kept verbatim","base_code":"BRL",
  "conversion_rates":{"USD":0.190,"EUR":0.16}}"#;

    struct CountingSource {
        calls: AtomicUsize,
        last_request: Mutex<Option<RateRequest>>,
        fail: bool,
        body: &'static [u8],
    }

    impl CountingSource {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                fail,
                body: PROVIDER_BODY,
            }
        }
    }

    #[async_trait]
    impl RateSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch(&self, request: &RateRequest) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().expect("lock") = Some(request.clone());
            if self.fail {
                return Err(PipelineError::SourceUnavailable {
                    reason: "503".to_string(),
                    transient: true,
                });
            }
            Ok(self.body.to_vec())
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).expect("valid date")
    }

    #[tokio::test]
    async fn second_fetch_for_same_date_skips_source() {
        let store = MemoryStore::new();
        let source = CountingSource::new(false);

        let first = fetch_and_store_raw(&store, &source, "BRL", date(17), date(17))
            .await
            .expect("first fetch");
        let second = fetch_and_store_raw(&store, &source, "BRL", date(17), date(17))
            .await
            .expect("second fetch");

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(first.fetched);
        assert!(!second.fetched);
        assert_eq!(first.location, second.location);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn stores_full_payload_verbatim() {
        let store = MemoryStore::new();
        let source = CountingSource::new(false);
        fetch_and_store_raw(&store, &source, "BRL", date(17), date(17))
            .await
            .expect("fetch");
        let bytes = store.read(&PartitionKey::raw(date(17))).expect("read");
        assert_eq!(bytes, PROVIDER_BODY);
        let stored = load_raw(&store, date(17)).expect("load");
        assert_eq!(stored["documentation"], "kept verbatim");
        assert_eq!(stored["conversion_rates"]["USD"], 0.19);
    }

    #[tokio::test]
    async fn non_json_body_is_rejected_before_writing() {
        let store = MemoryStore::new();
        let mut source = CountingSource::new(false);
        source.body = b"<html>maintenance</html>";
        let err = fetch_and_store_raw(&store, &source, "BRL", date(17), date(17))
            .await
            .expect_err("not json");
        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                transient: false,
                ..
            }
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn past_dates_request_history() {
        let store = MemoryStore::new();
        let source = CountingSource::new(false);
        fetch_and_store_raw(&store, &source, "BRL", date(10), date(17))
            .await
            .expect("fetch");
        let request = source.last_request.lock().expect("lock").clone().expect("request");
        assert_eq!(request.date, Some(date(10)));
    }

    #[tokio::test]
    async fn failed_fetch_writes_nothing() {
        let store = MemoryStore::new();
        let source = CountingSource::new(true);
        let err = fetch_and_store_raw(&store, &source, "BRL", date(17), date(17))
            .await
            .expect_err("source down");
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert!(!store.exists(&PartitionKey::raw(date(17))).expect("exists"));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn outcome_digest_matches_stored_bytes() {
        let store = MemoryStore::new();
        let source = CountingSource::new(false);
        let outcome = tokio_test::block_on(fetch_and_store_raw(
            &store,
            &source,
            "BRL",
            date(17),
            date(17),
        ))
        .expect("fetch");
        let bytes = store.read(&PartitionKey::raw(date(17))).expect("read");
        assert_eq!(outcome.sha256.as_deref(), Some(super::sha256_hex(&bytes).as_str()));
        assert_eq!(outcome.sha256, Some(super::sha256_hex(PROVIDER_BODY)));
        assert_eq!(outcome.sha256.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let store = MemoryStore::new();
        store
            .write(&PartitionKey::raw(date(17)), b"{not json")
            .expect("write");
        let err = load_raw(&store, date(17)).expect_err("bad json");
        assert!(matches!(err, PipelineError::Malformed { .. }));
    }
}
