//! chromiumoxide-backed [`DomChunkProvider`] and [`VisionAnnotator`].
//!
//! Serialization and annotation run through the bundled page script
//! ([`crate::dom_scripts`]); settling watches the page's network events until
//! a quiet window elapses with nothing in flight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::{
    network::{
        self, EventLoadingFailed, EventLoadingFinished, EventRequestServedFromCache,
        EventRequestWillBeSent, EventResponseReceived, ResourceType,
    },
    page as page_domain,
    page::{CaptureScreenshotFormat, EventFrameStoppedLoading},
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::dom::{
    ChunkResponse, DomChunkProvider, DomError, SelectorMap, SerializedDom, VisionAnnotator,
};
use crate::dom_scripts;
use crate::logging::{AuxiliaryValue, StagehandLogger, auxiliary};

const QUIET_WINDOW: Duration = Duration::from_millis(500);
const STALL_THRESHOLD: Duration = Duration::from_secs(2);
const STALL_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

fn cdp_error(err: impl std::fmt::Display) -> DomError {
    DomError::Cdp(err.to_string())
}

/// Raw shape returned by the page script's `nextChunk`/`fullPage` helpers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptChunk {
    output_string: String,
    #[serde(default = "no_chunk")]
    chunk: i64,
    #[serde(default)]
    chunks: Vec<usize>,
    #[serde(default)]
    selector_map: SelectorMap,
}

fn no_chunk() -> i64 {
    -1
}

/// DOM provider bound to a single chromiumoxide page.
#[derive(Clone)]
pub struct ChromiumDomProvider {
    page: Page,
    logger: Arc<StagehandLogger>,
    script: &'static str,
}

impl ChromiumDomProvider {
    pub fn new(page: Page, logger: Arc<StagehandLogger>) -> Self {
        Self {
            page,
            logger,
            script: dom_scripts::dom_chunks_script(),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn ensure_script(&self) -> Result<(), DomError> {
        self.page.evaluate(self.script).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn call_helper(&self, call: &str) -> Result<JsonValue, DomError> {
        self.ensure_script().await?;
        let expression = format!("window.__stagehandHandlers.{call}");
        let result = self.page.evaluate(expression.as_str()).await.map_err(cdp_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn run_chunk_helper(&self, call: &str) -> Result<ScriptChunk, DomError> {
        let value = self.call_helper(call).await?;
        if value.is_null() {
            return Err(DomError::Script(format!("{call} returned no value")));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Network and frame events of the page folded into one stream. Dropping
    /// the stream detaches every listener.
    async fn network_activity(&self) -> Result<BoxStream<'static, NetworkActivity>, DomError> {
        let page = &self.page;
        let started = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp_error)?
            .map(|ev| request_started(&ev));
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp_error)?
            .map(|ev| Some(NetworkActivity::finished(ev.request_id.as_ref())));
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp_error)?
            .map(|ev| Some(NetworkActivity::finished(ev.request_id.as_ref())));
        let cached = page
            .event_listener::<EventRequestServedFromCache>()
            .await
            .map_err(cdp_error)?
            .map(|ev| Some(NetworkActivity::finished(ev.request_id.as_ref())));
        // data: URLs never emit loadingFinished.
        let inline = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_error)?
            .map(|ev| {
                ev.response
                    .url
                    .starts_with("data:")
                    .then(|| NetworkActivity::finished(ev.request_id.as_ref()))
            });
        let frames = page
            .event_listener::<EventFrameStoppedLoading>()
            .await
            .map_err(cdp_error)?
            .map(|ev| {
                Some(NetworkActivity::FrameStopped {
                    frame_id: ev.frame_id.as_ref().to_string(),
                })
            });

        Ok(stream::select_all([
            started.boxed(),
            finished.boxed(),
            failed.boxed(),
            cached.boxed(),
            inline.boxed(),
            frames.boxed(),
        ])
        .filter_map(future::ready)
        .boxed())
    }
}

#[async_trait]
impl DomChunkProvider for ChromiumDomProvider {
    async fn wait_for_settled_dom(&self, timeout_ms: u64) -> Result<(), DomError> {
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(cdp_error)?;
        self.page
            .execute(page_domain::EnableParams::default())
            .await
            .map_err(cdp_error)?;

        let mut activity = self.network_activity().await?;
        let mut tracker = SettleTracker::new(Instant::now());
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut stall_tick = time::interval(STALL_SWEEP_INTERVAL);
        stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let quiet_at = tracker.quiet_deadline();
            tokio::select! {
                next = activity.next() => match next {
                    Some(event) => tracker.apply(event, Instant::now()),
                    None => return Ok(()),
                },
                _ = time::sleep_until(quiet_at.unwrap_or(deadline)), if quiet_at.is_some() => {
                    return Ok(());
                }
                _ = stall_tick.tick() => {
                    for url in tracker.release_stalled(Instant::now()) {
                        self.logger.debug(
                            "dom-settle",
                            "forcing completion of stalled request",
                            auxiliary([("url", AuxiliaryValue::string(url))]),
                        );
                    }
                }
                _ = time::sleep_until(deadline) => {
                    if tracker.pending() == 0 {
                        return Ok(());
                    }
                    self.logger.debug(
                        "dom-settle",
                        "DOM settle timeout reached with requests in flight",
                        auxiliary([(
                            "inflight",
                            AuxiliaryValue::integer(tracker.pending() as i64),
                        )]),
                    );
                    return Err(DomError::NotSettled { timeout_ms });
                }
            }
        }
    }

    async fn next_chunk(&self, chunks_seen: &[usize]) -> Result<ChunkResponse, DomError> {
        let seen = serde_json::to_string(chunks_seen)?;
        let raw = self.run_chunk_helper(&format!("nextChunk({seen})")).await?;
        let chunk = usize::try_from(raw.chunk).map_err(|_| DomError::NoChunksRemaining {
            seen: chunks_seen.len(),
            total: raw.chunks.len(),
        })?;
        Ok(ChunkResponse {
            output_string: raw.output_string,
            chunk,
            chunks: raw.chunks,
        })
    }

    async fn serialize(&self, full_page: bool) -> Result<SerializedDom, DomError> {
        let call = if full_page { "fullPage()" } else { "nextChunk([])" };
        let raw = self.run_chunk_helper(call).await?;
        Ok(SerializedDom {
            output_string: raw.output_string,
            selector_map: raw.selector_map,
        })
    }
}

#[async_trait]
impl VisionAnnotator for ChromiumDomProvider {
    async fn annotate(
        &self,
        selector_map: &SelectorMap,
        full_page: bool,
    ) -> Result<Vec<u8>, DomError> {
        let map = serde_json::to_string(selector_map)?;
        self.call_helper(&format!("annotate({map})")).await?;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        let captured = self.page.screenshot(params).await.map_err(cdp_error);

        if let Err(err) = self.call_helper("clearAnnotations()").await {
            self.logger.debug(
                "vision",
                format!("failed to clear annotations: {err}"),
                Default::default(),
            );
        }

        captured
    }
}

/// What the settle wait cares about in a CDP network or frame event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NetworkActivity {
    Started {
        request_id: String,
        url: String,
        /// Frame whose main document this request loads.
        document_frame: Option<String>,
    },
    Finished {
        request_id: String,
    },
    FrameStopped {
        frame_id: String,
    },
}

impl NetworkActivity {
    fn finished(request_id: &str) -> Self {
        NetworkActivity::Finished {
            request_id: request_id.to_string(),
        }
    }
}

// Long-lived channels never finish, so they do not hold the page unsettled.
fn request_started(ev: &EventRequestWillBeSent) -> Option<NetworkActivity> {
    let kind = ev.r#type.as_ref();
    if matches!(kind, Some(ResourceType::WebSocket | ResourceType::EventSource)) {
        return None;
    }
    let document_frame = match (kind, ev.frame_id.as_ref()) {
        (Some(ResourceType::Document), Some(frame_id)) => Some(frame_id.as_ref().to_string()),
        _ => None,
    };
    Some(NetworkActivity::Started {
        request_id: ev.request_id.as_ref().to_string(),
        url: ev.request.url.clone(),
        document_frame,
    })
}

#[derive(Debug)]
struct PendingRequest {
    url: String,
    started_at: Instant,
}

/// Pending-request bookkeeping for one settle wait. The page is quiet once
/// nothing is pending for [`QUIET_WINDOW`].
#[derive(Debug)]
struct SettleTracker {
    pending: HashMap<String, PendingRequest>,
    documents: HashMap<String, String>,
    idle_since: Option<Instant>,
}

impl SettleTracker {
    fn new(now: Instant) -> Self {
        Self {
            pending: HashMap::new(),
            documents: HashMap::new(),
            idle_since: Some(now),
        }
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn quiet_deadline(&self) -> Option<Instant> {
        self.idle_since.map(|since| since + QUIET_WINDOW)
    }

    fn apply(&mut self, activity: NetworkActivity, now: Instant) {
        match activity {
            NetworkActivity::Started {
                request_id,
                url,
                document_frame,
            } => {
                if let Some(frame_id) = document_frame {
                    self.documents.insert(frame_id, request_id.clone());
                }
                self.pending.insert(
                    request_id,
                    PendingRequest {
                        url,
                        started_at: now,
                    },
                );
                self.idle_since = None;
            }
            NetworkActivity::Finished { request_id } => self.complete(&request_id, now),
            NetworkActivity::FrameStopped { frame_id } => {
                if let Some(request_id) = self.documents.remove(&frame_id) {
                    self.complete(&request_id, now);
                }
            }
        }
    }

    fn complete(&mut self, request_id: &str, now: Instant) {
        let was_pending = self.pending.remove(request_id).is_some();
        self.documents.retain(|_, document| document != request_id);
        if self.pending.is_empty() && (was_pending || self.idle_since.is_none()) {
            self.idle_since = Some(now);
        }
    }

    /// Force-complete requests pending longer than [`STALL_THRESHOLD`],
    /// returning their URLs.
    fn release_stalled(&mut self, now: Instant) -> Vec<String> {
        let stalled: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, request)| now.duration_since(request.started_at) > STALL_THRESHOLD)
            .map(|(request_id, request)| (request_id.clone(), request.url.clone()))
            .collect();
        stalled
            .into_iter()
            .map(|(request_id, url)| {
                self.complete(&request_id, now);
                url
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(request_id: &str, document_frame: Option<&str>) -> NetworkActivity {
        NetworkActivity::Started {
            request_id: request_id.into(),
            url: format!("https://example.com/{request_id}"),
            document_frame: document_frame.map(str::to_string),
        }
    }

    #[test]
    fn idle_page_is_quiet_after_one_window() {
        let now = Instant::now();
        let tracker = SettleTracker::new(now);
        assert_eq!(tracker.quiet_deadline(), Some(now + QUIET_WINDOW));
    }

    #[test]
    fn pending_request_suspends_quiet_window_until_it_finishes() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(t0);
        tracker.apply(started("r1", None), t0);
        assert_eq!(tracker.quiet_deadline(), None);

        let t1 = t0 + Duration::from_millis(300);
        tracker.apply(NetworkActivity::finished("r1"), t1);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.quiet_deadline(), Some(t1 + QUIET_WINDOW));
    }

    #[test]
    fn unknown_completion_does_not_restart_the_window() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(t0);
        tracker.apply(
            NetworkActivity::finished("never-started"),
            t0 + Duration::from_millis(400),
        );
        assert_eq!(tracker.quiet_deadline(), Some(t0 + QUIET_WINDOW));
    }

    #[test]
    fn frame_stop_completes_its_document_request() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(t0);
        tracker.apply(started("doc", Some("frame-1")), t0);
        tracker.apply(started("img", None), t0);

        tracker.apply(
            NetworkActivity::FrameStopped {
                frame_id: "frame-1".into(),
            },
            t0,
        );
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.quiet_deadline(), None);
    }

    #[test]
    fn stalled_requests_are_released_with_their_urls() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(t0);
        tracker.apply(started("slow", None), t0);
        tracker.apply(started("fresh", None), t0 + Duration::from_millis(1_900));

        let later = t0 + STALL_THRESHOLD + Duration::from_millis(100);
        assert_eq!(
            tracker.release_stalled(later),
            vec!["https://example.com/slow".to_string()]
        );
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.quiet_deadline(), None);
    }
}
