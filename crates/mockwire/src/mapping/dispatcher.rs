//! Best-match selection over a registry snapshot.

use super::types::Mapping;
use crate::matchers::{MatchScores, RequestMatchResult};
use crate::message::RequestMessage;
use crate::scenario::ScenarioStore;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

/// A mapping together with the scores that selected it.
#[derive(Debug, Clone)]
pub struct MappingMatch {
    pub mapping: Arc<Mapping>,
    pub result: RequestMatchResult,
}

impl MappingMatch {
    pub fn score(&self) -> f64 {
        self.result.average_total_score()
    }
}

/// Outcome of one dispatch: the best full match and the best partial one.
#[derive(Debug, Clone, Default)]
pub struct BestMatch {
    pub full: Option<MappingMatch>,
    pub partial: Option<MappingMatch>,
}

impl BestMatch {
    /// The mapping to respond with, flagged `true` when it is only partial.
    pub fn selected(&self, allow_partial: bool) -> Option<(&MappingMatch, bool)> {
        match (&self.full, &self.partial) {
            (Some(full), _) => Some((full, false)),
            (None, Some(partial)) if allow_partial => Some((partial, true)),
            _ => None,
        }
    }
}

/// Scores every mapping of a snapshot against one request.
///
/// A mapping is a full match when its average score reaches the
/// almost-perfect threshold and it is either perfect or leaves no facet at
/// zero. Among full matches the first one (in priority order) reaching the
/// highest score wins, unless mappings in the same score and priority tier
/// declare probabilities, in which case the winner is drawn by weight.
pub struct MappingMatcher<'a> {
    mappings: &'a [Arc<Mapping>],
    scenarios: &'a ScenarioStore,
    almost_perfect_threshold: f64,
}

impl<'a> MappingMatcher<'a> {
    pub fn new(mappings: &'a [Arc<Mapping>], scenarios: &'a ScenarioStore) -> Self {
        Self {
            mappings,
            scenarios,
            almost_perfect_threshold: MatchScores::ALMOST_PERFECT,
        }
    }

    pub fn with_threshold(mut self, almost_perfect_threshold: f64) -> Self {
        self.almost_perfect_threshold = almost_perfect_threshold;
        self
    }

    pub fn find_best_match(&self, request: &RequestMessage) -> BestMatch {
        self.find_best_match_with(request, &mut rand::thread_rng())
    }

    /// Same as [`find_best_match`](Self::find_best_match) with an explicit
    /// random source for probability draws.
    pub fn find_best_match_with<R: Rng + ?Sized>(
        &self,
        request: &RequestMessage,
        rng: &mut R,
    ) -> BestMatch {
        let mut full_matches: Vec<MappingMatch> = Vec::new();
        let mut best_full: Option<(usize, f64)> = None;
        let mut partial: Option<MappingMatch> = None;
        let mut partial_score = MatchScores::MISMATCH;

        for mapping in self.mappings {
            let result = mapping.score(request, self.scenarios);
            for (facet, fault) in result.faults() {
                warn!(
                    mapping = %mapping.guid,
                    facet = %facet,
                    "Matcher fault: {}",
                    fault
                );
            }

            let score = result.average_total_score();
            let is_full = score >= self.almost_perfect_threshold
                && (MatchScores::is_perfect(score) || !result.has_unmatched_facet());

            if is_full {
                if best_full.map_or(true, |(_, best)| score > best) {
                    best_full = Some((full_matches.len(), score));
                }
                full_matches.push(MappingMatch {
                    mapping: Arc::clone(mapping),
                    result,
                });
            } else if !mapping.is_admin_interface && score > partial_score {
                partial_score = score;
                partial = Some(MappingMatch {
                    mapping: Arc::clone(mapping),
                    result,
                });
            }
        }

        let full = best_full.map(|(index, score)| {
            let winner = pick_weighted(&full_matches, index, score, rng);
            full_matches.swap_remove(winner)
        });

        match (&full, &partial) {
            (Some(m), _) => debug!(
                mapping = %m.mapping.guid,
                score = m.score(),
                "Full match for {} {}",
                request.method,
                request.path
            ),
            (None, Some(m)) => debug!(
                mapping = %m.mapping.guid,
                score = m.score(),
                "Only a partial match for {} {}",
                request.method,
                request.path
            ),
            (None, None) => debug!("No mapping matched {} {}", request.method, request.path),
        }

        BestMatch { full, partial }
    }
}

/// Index of the full match to use.
///
/// The tier is every full match sharing the winner's score and priority. If
/// any of them declares a probability, the pick is weighted: declared
/// probabilities are used as-is and the remaining mass is split evenly
/// across mappings without one.
fn pick_weighted<R: Rng + ?Sized>(
    matches: &[MappingMatch],
    winner: usize,
    score: f64,
    rng: &mut R,
) -> usize {
    let priority = matches[winner].mapping.priority;
    let tier: Vec<usize> = matches
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.mapping.priority == priority && (m.score() - score).abs() <= MatchScores::TOLERANCE
        })
        .map(|(i, _)| i)
        .collect();

    if tier.len() < 2 || tier.iter().all(|&i| matches[i].mapping.probability.is_none()) {
        return winner;
    }

    let declared: f64 = tier
        .iter()
        .filter_map(|&i| matches[i].mapping.probability)
        .sum();
    let undeclared = tier
        .iter()
        .filter(|&&i| matches[i].mapping.probability.is_none())
        .count();
    let share = if undeclared > 0 {
        (1.0 - declared).max(0.0) / undeclared as f64
    } else {
        0.0
    };

    let weights: Vec<f64> = tier
        .iter()
        .map(|&i| matches[i].mapping.probability.unwrap_or(share))
        .collect();

    match WeightedIndex::new(&weights) {
        Ok(distribution) => tier[distribution.sample(rng)],
        Err(_) => winner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingRegistry;
    use crate::matchers::{MatcherSpec, RequestMatcherSpec};
    use crate::message::ResponseMessage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn get(path: &str) -> RequestMatcherSpec {
        RequestMatcherSpec::new()
            .with_path(MatcherSpec::exact(path))
            .using_method("GET")
    }

    fn add(registry: &MappingRegistry, guid: u128, priority: i32, spec: RequestMatcherSpec) {
        registry
            .upsert(
                Mapping::builder()
                    .with_guid(Uuid::from_u128(guid))
                    .at_priority(priority)
                    .given(spec)
                    .respond_with(ResponseMessage::ok())
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    fn dispatch(registry: &MappingRegistry, scenarios: &ScenarioStore, request: &RequestMessage) -> BestMatch {
        let snapshot = registry.snapshot();
        MappingMatcher::new(&snapshot, scenarios).find_best_match(request)
    }

    #[test]
    fn test_lower_priority_wins_among_perfect_matches() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(&registry, 1, 10, get("/a"));
        add(&registry, 2, 1, get("/a"));

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("GET", "/a"));
        assert_eq!(best.full.unwrap().mapping.guid, Uuid::from_u128(2));
    }

    #[test]
    fn test_guid_breaks_priority_ties() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(&registry, 9, 0, get("/a"));
        add(&registry, 4, 0, get("/a"));

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("GET", "/a"));
        assert_eq!(best.full.unwrap().mapping.guid, Uuid::from_u128(4));
    }

    #[test]
    fn test_higher_score_beats_priority() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        // 2 of 3 facets match, not a full match
        add(
            &registry,
            1,
            0,
            get("/a").with_header("X-Env", MatcherSpec::exact("prod")),
        );
        add(&registry, 2, 5, get("/a"));

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("GET", "/a"));
        assert_eq!(best.full.unwrap().mapping.guid, Uuid::from_u128(2));
        assert_eq!(best.partial.unwrap().mapping.guid, Uuid::from_u128(1));
    }

    #[test]
    fn test_zero_match_yields_nothing() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(&registry, 1, 0, get("/a"));

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("POST", "/b"));
        assert!(best.full.is_none());
        assert!(best.partial.is_none());
        assert!(best.selected(true).is_none());
    }

    #[test]
    fn test_partial_only_when_allowed() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(&registry, 1, 0, get("/a"));

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("POST", "/a"));
        assert!(best.full.is_none());
        assert_eq!(best.partial.as_ref().unwrap().score(), 0.5);
        assert!(best.selected(false).is_none());
        let (selected, is_partial) = best.selected(true).unwrap();
        assert!(is_partial);
        assert_eq!(selected.mapping.guid, Uuid::from_u128(1));
    }

    #[test]
    fn test_empty_matcher_never_matches() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(&registry, 1, 0, RequestMatcherSpec::new());

        let best = dispatch(&registry, &scenarios, &RequestMessage::new("GET", "/"));
        assert!(best.full.is_none());
    }

    #[test]
    fn test_idempotent_upsert() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        let request = RequestMessage::new("GET", "/a");

        add(&registry, 1, 0, get("/a"));
        let first = dispatch(&registry, &scenarios, &request).full.unwrap();
        add(&registry, 1, 0, get("/a"));
        let second = dispatch(&registry, &scenarios, &request).full.unwrap();
        assert_eq!(first.mapping.guid, second.mapping.guid);
        assert_eq!(first.result, second.result);

        add(&registry, 1, 0, get("/b"));
        assert!(dispatch(&registry, &scenarios, &request).full.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fault_does_not_abort_dispatch() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        add(
            &registry,
            1,
            0,
            get("/x").with_body(MatcherSpec::json_partial(serde_json::json!({"a": 1}))),
        );
        add(&registry, 2, 1, get("/x"));

        let request = RequestMessage::new("GET", "/x")
            .with_body(crate::message::BodyData::from_string("not json"));
        let best = dispatch(&registry, &scenarios, &request);
        assert_eq!(best.full.unwrap().mapping.guid, Uuid::from_u128(2));
        let partial = best.partial.unwrap();
        assert_eq!(partial.result.faults().count(), 1);
    }

    #[test]
    fn test_probability_selection_frequencies() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        for (guid, probability) in [(1u128, 0.3), (2u128, 0.7)] {
            registry
                .upsert(
                    Mapping::builder()
                        .with_guid(Uuid::from_u128(guid))
                        .given(get("/coin"))
                        .with_probability(probability)
                        .respond_with(ResponseMessage::ok())
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }

        let snapshot = registry.snapshot();
        let matcher = MappingMatcher::new(&snapshot, &scenarios);
        let request = RequestMessage::new("GET", "/coin");
        let mut rng = StdRng::seed_from_u64(7);

        let samples = 10_000;
        let second = (0..samples)
            .filter(|_| {
                matcher
                    .find_best_match_with(&request, &mut rng)
                    .full
                    .unwrap()
                    .mapping
                    .guid
                    == Uuid::from_u128(2)
            })
            .count();
        let ratio = second as f64 / samples as f64;
        assert!((ratio - 0.7).abs() < 0.03, "ratio {ratio}");
    }

    #[test]
    fn test_probability_ignored_across_priorities() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        for (guid, priority) in [(1u128, 0), (2u128, 1)] {
            registry
                .upsert(
                    Mapping::builder()
                        .with_guid(Uuid::from_u128(guid))
                        .at_priority(priority)
                        .given(get("/coin"))
                        .with_probability(0.5)
                        .respond_with(ResponseMessage::ok())
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }

        let request = RequestMessage::new("GET", "/coin");
        for _ in 0..50 {
            let best = dispatch(&registry, &scenarios, &request);
            assert_eq!(best.full.unwrap().mapping.guid, Uuid::from_u128(1));
        }
    }

    #[test]
    fn test_scenario_gates_eligibility() {
        let registry = MappingRegistry::new();
        let scenarios = ScenarioStore::new();
        registry
            .upsert(
                Mapping::builder()
                    .with_guid(Uuid::from_u128(1))
                    .given(get("/s"))
                    .in_scenario("S")
                    .when_state_is("S2")
                    .respond_with(ResponseMessage::ok())
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let request = RequestMessage::new("GET", "/s");
        assert!(dispatch(&registry, &scenarios, &request).full.is_none());

        scenarios.set_state("s", Some("S2"));
        assert!(dispatch(&registry, &scenarios, &request).full.is_some());
    }
}
