use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::limiter::ConcurrencyLimiter;
use crate::model::{Batch, DisplayName, LoadScope, ResourceKind, ResourcePage, short_id};
use crate::service::ResourceService;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct LoadReport {
    pub pages: usize,
    pub items: usize,
    pub dropped: usize,
    pub stopped_early: bool,
}

#[derive(Debug)]
pub enum LoadEvent<T> {
    Batch(Batch<T>),
    Failed(String),
    Finished(LoadReport),
}

pub type BatchStream<T> = mpsc::Receiver<LoadEvent<T>>;

/// Paginated listing with bounded per-item describe fan-out.
pub struct ResourceLoader<S> {
    service: Arc<S>,
    limiter: ConcurrencyLimiter,
    page_size: usize,
    call_timeout: Duration,
}

impl<S> Clone for ResourceLoader<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            limiter: self.limiter.clone(),
            page_size: self.page_size,
            call_timeout: self.call_timeout,
        }
    }
}

impl<S: ResourceService> ResourceLoader<S> {
    pub fn new(service: Arc<S>, limiter: ConcurrencyLimiter, page_size: usize) -> Self {
        Self {
            service,
            limiter,
            page_size: page_size.max(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Walks every page of `kind`, awaiting `on_batch` once per page.
    ///
    /// A listing failure aborts the load. A failed describe only drops that item.
    /// Returning `false` from `on_batch` stops pagination.
    pub async fn load<F, Fut>(&self, kind: ResourceKind, on_batch: F) -> Result<LoadReport>
    where
        F: FnMut(Batch<S::Detail>) -> Fut,
        Fut: Future<Output = bool>,
    {
        self.paginate(kind, None, on_batch).await
    }

    /// Same as [`Self::load`] for the rows that live under one parent row.
    pub async fn load_children<F, Fut>(
        &self,
        kind: ResourceKind,
        parent: &str,
        on_batch: F,
    ) -> Result<LoadReport>
    where
        F: FnMut(Batch<S::Detail>) -> Fut,
        Fut: Future<Output = bool>,
    {
        self.paginate(kind, Some(parent), on_batch).await
    }

    async fn paginate<F, Fut>(
        &self,
        kind: ResourceKind,
        parent: Option<&str>,
        mut on_batch: F,
    ) -> Result<LoadReport>
    where
        F: FnMut(Batch<S::Detail>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut report = LoadReport::default();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(kind, parent, token.as_deref()).await?;
            let has_more = page.has_more();
            let ids = page
                .summaries
                .into_iter()
                .map(|summary| summary.id)
                .collect::<Vec<_>>();
            let requested = ids.len();
            debug!(
                "{} page {} listed {requested} ids (more={has_more})",
                kind.title(),
                report.pages + 1
            );

            let items = self.fetch_details(kind, ids).await;
            report.pages += 1;
            report.items += items.len();
            report.dropped += requested - items.len();

            let batch = Batch {
                items,
                has_more,
                is_append: report.pages > 1,
            };
            if !on_batch(batch).await {
                report.stopped_early = true;
                break;
            }
            if !has_more {
                break;
            }
            token = page.next_token;
        }

        info!(
            "loaded {} {} across {} pages ({} dropped)",
            report.items,
            kind.title(),
            report.pages,
            report.dropped
        );
        Ok(report)
    }

    /// Describes a fixed identifier set and emits it as a single batch.
    pub async fn load_ids<F, Fut>(
        &self,
        kind: ResourceKind,
        ids: Vec<String>,
        mut on_batch: F,
    ) -> Result<LoadReport>
    where
        F: FnMut(Batch<S::Detail>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let requested = ids.len();
        let items = self.fetch_details(kind, ids).await;
        let mut report = LoadReport {
            pages: 1,
            items: items.len(),
            dropped: requested - items.len(),
            stopped_early: false,
        };

        let batch = Batch {
            items,
            has_more: false,
            is_append: false,
        };
        report.stopped_early = !on_batch(batch).await;
        Ok(report)
    }

    /// Loads only the `kind` resources that belong to `stack`.
    pub async fn load_scoped<F, Fut>(
        &self,
        kind: ResourceKind,
        stack: &str,
        on_batch: F,
    ) -> Result<LoadReport>
    where
        F: FnMut(Batch<S::Detail>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let ids = match timeout(self.call_timeout, self.service.scope_members(kind, stack)).await
        {
            Ok(result) => result
                .with_context(|| format!("failed to list {} in stack {stack}", kind.title()))?,
            Err(_) => {
                return Err(anyhow!(
                    "listing {} in stack {stack} timed out after {}s",
                    kind.title(),
                    self.call_timeout.as_secs()
                ));
            }
        };
        debug!("stack {stack} holds {} {}", ids.len(), kind.title());
        self.load_ids(kind, ids, on_batch).await
    }

    /// Runs a load on its own task and hands batches over a bounded channel.
    ///
    /// The producer waits while the channel is full. Dropping the receiver ends
    /// the load at its next delivery.
    pub fn spawn_load(
        &self,
        kind: ResourceKind,
        scope: LoadScope,
    ) -> (BatchStream<S::Detail>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let loader = self.clone();

        let handle = tokio::spawn(async move {
            let deliver = |batch: Batch<S::Detail>| {
                let tx = tx.clone();
                async move { tx.send(LoadEvent::Batch(batch)).await.is_ok() }
            };
            let result = match scope {
                LoadScope::All => loader.load(kind, deliver).await,
                LoadScope::Stack(stack) => loader.load_scoped(kind, &stack, deliver).await,
                LoadScope::Parent(parent) => loader.load_children(kind, &parent, deliver).await,
            };
            let event = match result {
                Ok(report) => LoadEvent::Finished(report),
                Err(error) => {
                    warn!("{} load failed: {error:#}", kind.title());
                    LoadEvent::Failed(compact_error(&error))
                }
            };
            let _ = tx.send(event).await;
        });

        (rx, handle)
    }

    async fn list_page(
        &self,
        kind: ResourceKind,
        parent: Option<&str>,
        token: Option<&str>,
    ) -> Result<ResourcePage> {
        match timeout(
            self.call_timeout,
            self.service.list_page(kind, parent, token, self.page_size),
        )
        .await
        {
            Ok(result) => result.with_context(|| match parent {
                Some(parent) => format!("failed to list {} in {}", kind.title(), short_id(parent)),
                None => format!("failed to list {}", kind.title()),
            }),
            Err(_) => Err(anyhow!(
                "listing {} timed out after {}s",
                kind.title(),
                self.call_timeout.as_secs()
            )),
        }
    }

    async fn fetch_details(&self, kind: ResourceKind, ids: Vec<String>) -> Vec<S::Detail> {
        let mut slots = Vec::with_capacity(ids.len());
        slots.resize_with(ids.len(), || None);
        let mut workers = JoinSet::new();

        for (index, id) in ids.into_iter().enumerate() {
            let permit = self.limiter.acquire().await;
            let service = Arc::clone(&self.service);
            let call_timeout = self.call_timeout;
            workers.spawn(async move {
                let result = match timeout(call_timeout, service.describe_one(kind, &id)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}s", call_timeout.as_secs())),
                };
                permit.release();
                (index, id, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, _, Ok(detail))) => slots[index] = Some(detail),
                Ok((_, id, Err(error))) => {
                    warn!("dropping {} {id}: {error:#}", kind.title());
                }
                Err(error) => warn!("{} detail worker failed: {error}", kind.title()),
            }
        }

        let mut items = slots.into_iter().flatten().collect::<Vec<_>>();
        items.sort_by_cached_key(|item| item.display_name().to_lowercase());
        items
    }
}

/// First cause plus up to two underlying causes, one per line.
pub fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
