//! Scroll-reading source: one instance per slice.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::backends::Source;
use crate::common::Doc;
use crate::es::{EsApi, EsApiBackend, ScrollRequest, SliceSpec};

/// A per-slice scroll cursor. The first page arrives at open time and rides
/// along with the cursor; afterwards the source advances the server-side
/// scroll until it hands back an empty page, which releases the context.
#[derive(Debug)]
pub(crate) struct ElasticsearchSource {
    api: EsApiBackend,
    keep_alive: String,
    scroll_id: String,
    first: Option<Vec<Doc>>,
    slice: usize,
    emitted: u64,
}

#[async_trait]
impl Source for ElasticsearchSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Doc>>> {
        if let Some(first) = self.first.take() {
            // scan-mode opens hand back an empty first page with a live
            // cursor; fall through to the first advance instead of EOF
            if !first.is_empty() {
                self.emitted += first.len() as u64;
                return Ok(Some(first));
            }
        }
        let batch = self
            .api
            .next_scroll(&self.keep_alive, &self.scroll_id)
            .await
            .with_context(|| format!("slice {} failed to advance its scroll", self.slice))?;
        if !batch.scroll_id.is_empty() {
            self.scroll_id = batch.scroll_id;
        }
        if batch.docs.is_empty() {
            debug!("slice {} exhausted after {} documents", self.slice, self.emitted);
            return Ok(None);
        }
        self.emitted += batch.docs.len() as u64;
        Ok(Some(batch.docs))
    }
}

/// Opens every slice scroll in parallel and sums their `hits.total` for the
/// early read estimate. A slice that fails to open is fatal for that slice
/// alone: the others proceed and the failure lands in the final summary.
pub(crate) async fn open_slices(
    api: &EsApiBackend,
    request: &ScrollRequest,
    slices: usize,
) -> Result<(Vec<ElasticsearchSource>, u64, usize)> {
    let opens = (0..slices).map(|id| {
        let api = api.clone();
        let request = request.clone();
        async move {
            let slice = SliceSpec { id, max: slices };
            (id, api.open_scroll(&request, Some(slice)).await)
        }
    });

    let mut sources = Vec::with_capacity(slices);
    let mut total = 0u64;
    let mut failed = 0usize;
    for (id, outcome) in join_all(opens).await {
        match outcome {
            Ok(batch) => {
                total += batch.total;
                sources.push(ElasticsearchSource {
                    api: api.clone(),
                    keep_alive: request.keep_alive.clone(),
                    scroll_id: batch.scroll_id,
                    first: Some(batch.docs),
                    slice: id,
                    emitted: 0,
                });
            }
            Err(error) => {
                warn!("failed to open scroll slice {id}: {error:#}");
                failed += 1;
            }
        }
    }
    if sources.is_empty() {
        bail!("could not open any scroll slice against the source");
    }
    Ok((sources, total, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::es::client::{EsClient, EsEndpoint};
    use crate::es::v7::EsApiV7;

    fn request() -> ScrollRequest {
        ScrollRequest {
            indices: "logs".into(),
            keep_alive: "1m".into(),
            batch_size: 2,
            query: None,
            fields: None,
        }
    }

    async fn v7_api(server: &MockServer) -> EsApiBackend {
        let client = EsClient::new(EsEndpoint {
            url: server.uri(),
            username: None,
            password: None,
            api_key: None,
            proxy: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        EsApiBackend::V7(EsApiV7::new(client))
    }

    fn page(scroll_id: &str, total: u64, ids: &[u32]) -> serde_json::Value {
        let hits: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "_index": "logs",
                    "_id": id.to_string(),
                    "_source": { "n": id }
                })
            })
            .collect();
        serde_json::json!({
            "_scroll_id": scroll_id,
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits }
        })
    }

    #[tokio::test]
    async fn a_slice_drains_until_the_server_sends_an_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page("s1", 3, &[1, 2])))
            .mount(&server)
            .await;
        // ids rotate: each advance matches on the previous page's id
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_string_contains("s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page("s2", 3, &[3])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_string_contains("s2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page("s3", 3, &[])))
            .mount(&server)
            .await;

        let api = v7_api(&server).await;
        let (mut sources, total, failed) = open_slices(&api, &request(), 1).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(failed, 0);

        let source = &mut sources[0];
        let first = source.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = source.next_batch().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn totals_sum_across_slices_and_bad_slices_are_counted() {
        let server = MockServer::start().await;
        // slice 0 opens fine, slice 1 is refused
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .and(body_string_contains(r#""id":0"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(page("s1", 5, &[1])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .and(body_string_contains(r#""id":1"#))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let api = v7_api(&server).await;
        let (sources, total, failed) = open_slices(&api, &request(), 2).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(total, 5);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn no_openable_slice_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let api = v7_api(&server).await;
        assert!(open_slices(&api, &request(), 2).await.is_err());
    }
}
