//! Request handling: dispatch, response provision and bookkeeping.

use super::MockServer;
use crate::config::ProxyAndRecordSettings;
use crate::log::LogEntry;
use crate::mapping::{BestMatch, Mapping, MappingMatcher, ResponseProvider};
use crate::message::{RequestMessage, ResponseMessage};
use crate::proxy::{proxy, save_mapping_to_file, target_url};
use crate::scenario::Advance;
use crate::webhook;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl MockServer {
    /// Produce the response for one request.
    ///
    /// Never fails: no match yields the 404 not-found response. The
    /// scenario of the selected mapping advances only after its response
    /// has been built, and never for partial matches.
    pub async fn handle_request(&self, request: RequestMessage) -> ResponseMessage {
        let _serialized = match &self.sync_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let snapshot = self.registry.snapshot();
        let best = MappingMatcher::new(&snapshot, &self.scenarios)
            .with_threshold(self.settings.almost_perfect_threshold)
            .find_best_match(&request);

        let Some((selected, is_partial)) = best.selected(self.settings.allow_partial_mapping) else {
            debug!("No mapping found for {} {}", request.method, request.path);
            let response = ResponseMessage::no_matching_mapping();
            self.log_exchange(request, response.clone(), None, &best);
            return response;
        };

        let mapping = Arc::clone(&selected.mapping);
        debug!(
            guid = %mapping.guid,
            score = selected.score(),
            partial = is_partial,
            "Responding with mapping {}",
            mapping.display_name()
        );

        let response = self.provide(&mapping, &request).await;

        if !is_partial {
            if let Some(transition) = mapping.transition() {
                if let Advance::Stale = self.scenarios.advance(transition) {
                    debug!(guid = %mapping.guid, "Scenario transition skipped");
                }
            }
        }

        self.fire_webhooks(&mapping, &request).await;

        if let Some(delay) = response.delay() {
            tokio::time::sleep(delay).await;
        }

        if mapping.log_mapping {
            self.log_exchange(request, response.clone(), Some(&mapping), &best);
        }
        response
    }

    async fn provide(&self, mapping: &Mapping, request: &RequestMessage) -> ResponseMessage {
        match &mapping.provider {
            ResponseProvider::Static(response) => response.clone(),
            ResponseProvider::Dynamic(responder) => responder.respond(request).await,
            ResponseProvider::Proxy(settings) => {
                let url = target_url(settings, request);
                let outcome = proxy(Some(mapping), settings, self.client().as_ref(), request, &url).await;
                if let Some(recorded) = outcome.mapping {
                    self.keep_recorded(recorded, settings);
                }
                outcome.response
            }
        }
    }

    /// Register and/or persist a mapping recorded by the proxy.
    fn keep_recorded(&self, recorded: Mapping, settings: &ProxyAndRecordSettings) {
        if settings.save_mapping_to_file {
            if let Err(e) = save_mapping_to_file(&recorded, settings, &self.settings.mappings_dir) {
                warn!("Failed to save recorded mapping {}: {:#}", recorded.guid, e);
            }
        }
        if settings.save_mapping {
            let guid = recorded.guid;
            match self.add_or_update_mapping(recorded) {
                Ok(_) => info!("Recorded mapping {} from proxied response", guid),
                Err(e) => warn!("Failed to register recorded mapping {}: {}", guid, e),
            }
        }
    }

    async fn fire_webhooks(&self, mapping: &Mapping, request: &RequestMessage) {
        if mapping.webhooks.is_empty() {
            return;
        }
        debug!(
            "Firing {} webhook(s) for {} {}",
            mapping.webhooks.len(),
            request.method,
            request.path
        );

        if mapping.webhooks_fire_and_forget {
            for hook in mapping.webhooks.iter().cloned() {
                let client = Arc::clone(self.client());
                tokio::spawn(async move {
                    webhook::fire(&hook, client.as_ref()).await;
                });
            }
        } else {
            let client = self.client().as_ref();
            join_all(mapping.webhooks.iter().map(|hook| webhook::fire(hook, client))).await;
        }
    }

    fn log_exchange(
        &self,
        request: RequestMessage,
        response: ResponseMessage,
        mapping: Option<&Mapping>,
        best: &BestMatch,
    ) {
        let mut entry = LogEntry::new(request, response);
        if let Some(mapping) = mapping {
            entry.mapping_guid = Some(mapping.guid);
            entry.mapping_title = mapping.title.clone();
        }
        if let Some(full) = &best.full {
            entry.match_result = Some(full.result.clone());
        }
        if let Some(partial) = &best.partial {
            entry.partial_mapping_guid = Some(partial.mapping.guid);
            entry.partial_match_result = Some(partial.result.clone());
        }
        self.log.add(entry);
    }
}
