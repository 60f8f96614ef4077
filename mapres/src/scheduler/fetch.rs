//! Fetch task for a single resource entry.
//!
//! The task checks for cancellation at three points: while waiting for a pool
//! permit (handled by the pool), when claiming the entry
//! (`Requested -> ProcessingRequest`), and when publishing the result
//! (`ProcessingRequest -> Ready | Unavailable`). Losing either CAS means the
//! scheduler already doomed the entry, so the task cleans up instead of
//! writing state.
//!
//! Provider calls for one key never overlap: a task waits for the collection's
//! fetch slot while a stale fetch for the same tile is still running.

use super::pool::PoolTask;
use crate::bindings::BindingRegistry;
use crate::error::ProviderError;
use crate::hooks::RendererHooks;
use crate::resource::{ResourceEntry, ResourceState, TiledCollection};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) struct FetchTask {
    collection: Arc<TiledCollection>,
    entry: Arc<ResourceEntry>,
    bindings: Arc<BindingRegistry>,
    hooks: Arc<dyn RendererHooks>,
    token: CancellationToken,
}

impl FetchTask {
    pub(crate) fn new(
        collection: Arc<TiledCollection>,
        entry: Arc<ResourceEntry>,
        bindings: Arc<BindingRegistry>,
        hooks: Arc<dyn RendererHooks>,
        token: CancellationToken,
    ) -> Self {
        Self {
            collection,
            entry,
            bindings,
            hooks,
            token,
        }
    }

    fn remove_if_doomed(&self) {
        if self.entry.state() == ResourceState::JustBeforeDeath {
            self.collection.remove_entry(&self.entry);
        }
    }
}

impl PoolTask for FetchTask {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn run(self) {
        if self.token.is_cancelled() {
            return self.cancelled();
        }
        if !self
            .entry
            .set_state_if(ResourceState::Requested, ResourceState::ProcessingRequest)
        {
            return self.cancelled();
        }

        let entry = Arc::clone(&self.entry);
        let slot = self.collection.claim_fetch(entry.tile(), entry.zoom());
        if entry.state() != ResourceState::ProcessingRequest {
            drop(slot);
            return self.cancelled();
        }
        let outcome = match self.bindings.provider_for(entry.collection_id()) {
            Some(provider) => entry.fetch(&provider),
            None => Err(ProviderError::Unbound(entry.collection_id().value())),
        };
        drop(slot);

        match outcome {
            Err(e) => {
                debug!(
                    tile = %entry.tile(),
                    zoom = %entry.zoom(),
                    kind = %entry.resource_type(),
                    error = %e,
                    "Fetch failed, will retry on next pass"
                );
                entry.set_state_if(ResourceState::ProcessingRequest, ResourceState::JustBeforeDeath);
                self.remove_if_doomed();
                entry.detach_request();
            }
            Ok(available) => {
                let next = if available {
                    ResourceState::Ready
                } else {
                    ResourceState::Unavailable
                };
                if !entry.set_state_if(ResourceState::ProcessingRequest, next) {
                    self.token.cancel();
                    return self.cancelled();
                }
                entry.detach_request();

                trace!(tile = %entry.tile(), zoom = %entry.zoom(), state = %next, "Fetch complete");
                if available {
                    self.hooks.request_upload();
                } else {
                    self.hooks.invalidate_frame();
                }
            }
        }
    }

    fn cancelled(self) {
        self.entry.set_state_if_any(
            &[
                ResourceState::Requested,
                ResourceState::Ready,
                ResourceState::Unavailable,
            ],
            ResourceState::JustBeforeDeath,
        );
        self.remove_if_doomed();
        self.entry.detach_request();
    }
}
