//! Drives a detail page until its lazily rendered content has settled.
//!
//! The page goes through a fixed sequence: load, wait for the heading,
//! scroll to trigger lazy loading, expand collapsed sections, then poll the
//! equipment list until two consecutive polls agree. Every step after
//! navigation is best-effort; failures become [`Degradation`]s.

use std::time::Duration;

use indexmap::IndexSet;
use listingscout_shared::{Degradation, ListingScoutError, Result, StabilizerConfig};
use tracing::{debug, instrument, trace, warn};

use crate::session::{BrowserSession, Locator};

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight / 2);";

/// Where the protocol currently is for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    HeadingWait,
    Scrolled,
    Expanding,
    Polling,
    Stable,
}

/// Per-page bookkeeping, discarded once the page is captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilizationState {
    pub heading_seen: bool,
    pub equipment_count: usize,
    /// Consecutive polls whose count matched the previous one.
    pub unchanged_polls: u32,
    pub polls: u32,
    pub reached_fixed_point: bool,
}

/// The captured page.
#[derive(Debug, Clone)]
pub struct StabilizedPage {
    pub html: String,
    /// Equipment labels in first-seen order, without duplicates.
    pub equipments: Vec<String>,
    pub state: StabilizationState,
    pub degradations: Vec<Degradation>,
}

/// Runs the stabilization protocol with fixed bounds.
#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizerConfig,
    equipment_locator: Locator,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        let equipment_locator = Locator::xpath(format!(
            "//h2[text()={}]/following-sibling::div//img",
            xpath_literal(&config.equipment_heading)
        ));
        Self {
            config,
            equipment_locator,
        }
    }

    /// Load `url` in `session` and return its settled source and equipment labels.
    ///
    /// Only navigation and page-source failures are errors.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn stabilize<S>(&self, session: &mut S, url: &str) -> Result<StabilizedPage>
    where
        S: BrowserSession + ?Sized,
    {
        let mut state = StabilizationState::default();
        let mut degradations = Vec::new();
        let mut phase = Phase::Loading;

        session.navigate(url).await.map_err(|e| {
            if e.is_navigation() {
                e
            } else {
                ListingScoutError::navigation(url, e.to_string())
            }
        })?;

        advance(&mut phase, Phase::HeadingWait);
        self.wait_for_heading(session, &mut state, &mut degradations)
            .await;

        advance(&mut phase, Phase::Scrolled);
        if let Err(e) = session.execute_script(SCROLL_SCRIPT).await {
            degrade(&mut degradations, step_failed("scroll", &e));
        }
        pause(self.config.settle_ms).await;

        advance(&mut phase, Phase::Expanding);
        match expand_script(&self.config.expand_label) {
            Ok(script) => {
                if let Err(e) = session.execute_script(&script).await {
                    degrade(&mut degradations, step_failed("expand", &e));
                }
            }
            Err(e) => degrade(&mut degradations, step_failed("expand", &e)),
        }

        advance(&mut phase, Phase::Polling);
        self.poll_equipment(session, &mut state, &mut degradations)
            .await;
        if state.reached_fixed_point {
            advance(&mut phase, Phase::Stable);
        }

        let equipments = match session.find_elements(&self.equipment_locator).await {
            Ok(elements) => elements
                .iter()
                .filter_map(|el| el.attr("alt"))
                .filter(|alt| !alt.is_empty())
                .map(str::to_string)
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                degrade(
                    &mut degradations,
                    Degradation::EquipmentExtraction(e.to_string()),
                );
                Vec::new()
            }
        };

        let html = session.page_source().await?;

        debug!(
            ?phase,
            heading_seen = state.heading_seen,
            polls = state.polls,
            equipment_count = state.equipment_count,
            unchanged_polls = state.unchanged_polls,
            stable = state.reached_fixed_point,
            equipments = equipments.len(),
            "page captured"
        );

        Ok(StabilizedPage {
            html,
            equipments,
            state,
            degradations,
        })
    }

    async fn wait_for_heading<S>(
        &self,
        session: &mut S,
        state: &mut StabilizationState,
        degradations: &mut Vec<Degradation>,
    ) where
        S: BrowserSession + ?Sized,
    {
        let heading = Locator::tag(self.config.heading_selector.clone());
        let attempts = self.config.heading_attempts;

        for attempt in 1..=attempts {
            match session.find_elements(&heading).await {
                Ok(found) if !found.is_empty() => {
                    trace!(attempt, "heading present");
                    state.heading_seen = true;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    degrade(degradations, step_failed("heading wait", &e));
                    return;
                }
            }
            if attempt < attempts {
                pause(self.config.heading_interval_ms).await;
            }
        }

        degrade(degradations, Degradation::HeadingTimeout);
    }

    async fn poll_equipment<S>(
        &self,
        session: &mut S,
        state: &mut StabilizationState,
        degradations: &mut Vec<Degradation>,
    ) where
        S: BrowserSession + ?Sized,
    {
        let attempts = self.config.equipment_attempts;
        let mut prev = 0usize;

        for poll in 1..=attempts {
            let count = match session.find_elements(&self.equipment_locator).await {
                Ok(found) => found.len(),
                Err(e) => {
                    degrade(degradations, step_failed("equipment poll", &e));
                    return;
                }
            };

            state.polls = poll;
            state.equipment_count = count;
            if count == prev {
                state.unchanged_polls += 1;
            } else {
                state.unchanged_polls = 0;
            }
            trace!(poll, count, prev, "equipment poll");

            if count > 0 && count == prev {
                state.reached_fixed_point = true;
                return;
            }
            prev = count;

            if poll < attempts {
                pause(self.config.equipment_interval_ms).await;
            }
        }

        degrade(
            degradations,
            Degradation::StabilizationTimeout {
                last_count: state.equipment_count,
            },
        );
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    trace!(from = ?phase, to = ?next, "stabilizer phase");
    *phase = next;
}

fn degrade(degradations: &mut Vec<Degradation>, degradation: Degradation) {
    warn!(%degradation, "page degraded");
    degradations.push(degradation);
}

fn step_failed(step: &'static str, error: &ListingScoutError) -> Degradation {
    Degradation::StepFailed {
        step,
        message: error.to_string(),
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Click every button whose `aria-label` equals `label`.
fn expand_script(label: &str) -> Result<String> {
    let label = serde_json::to_string(label)
        .map_err(|e| ListingScoutError::Browser(format!("unencodable expand label: {e}")))?;
    Ok(format!(
        "for (const btn of document.querySelectorAll('button')) {{ \
           if (btn.getAttribute('aria-label') === {label}) {{ btn.click(); }} \
         }}"
    ))
}

/// Quote `value` as an XPath string literal.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ElementSnapshot;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};

    /// Session replaying scripted equipment counts.
    #[derive(Default)]
    struct FakeSession {
        fail_navigation: bool,
        fail_scripts: bool,
        /// Equipment lookup number (1-based) that returns an error.
        fail_lookup: Option<usize>,
        heading_after: usize,
        heading_checks: usize,
        counts: VecDeque<usize>,
        last_count: usize,
        labels: Vec<&'static str>,
        scripts: Vec<String>,
        equipment_lookups: usize,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            if self.fail_navigation {
                return Err(ListingScoutError::navigation(url, "connection refused"));
            }
            Ok(())
        }

        async fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementSnapshot>> {
            match locator {
                Locator::Tag(_) => {
                    self.heading_checks += 1;
                    if self.heading_checks > self.heading_after {
                        Ok(vec![ElementSnapshot {
                            tag: "h1".into(),
                            ..Default::default()
                        }])
                    } else {
                        Ok(vec![])
                    }
                }
                _ => {
                    self.equipment_lookups += 1;
                    if self.fail_lookup == Some(self.equipment_lookups) {
                        return Err(ListingScoutError::Browser("stale element reference".into()));
                    }
                    if let Some(count) = self.counts.pop_front() {
                        self.last_count = count;
                    }
                    Ok((0..self.last_count)
                        .map(|i| ElementSnapshot {
                            tag: "img".into(),
                            text: String::new(),
                            attributes: HashMap::from([(
                                "alt".to_string(),
                                self.labels
                                    .get(i)
                                    .copied()
                                    .unwrap_or("Ascenseur")
                                    .to_string(),
                            )]),
                        })
                        .collect())
                }
            }
        }

        async fn execute_script(&mut self, source: &str) -> Result<()> {
            self.scripts.push(source.to_string());
            if self.fail_scripts {
                return Err(ListingScoutError::Browser("script execution timed out".into()));
            }
            Ok(())
        }

        async fn page_source(&mut self) -> Result<String> {
            Ok("<html><h1>Annonce</h1></html>".into())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn stabilizer() -> Stabilizer {
        Stabilizer::new(StabilizerConfig {
            heading_interval_ms: 0,
            settle_ms: 0,
            equipment_interval_ms: 0,
            ..StabilizerConfig::default()
        })
    }

    #[tokio::test]
    async fn halts_once_count_repeats() {
        let mut session = FakeSession {
            counts: VecDeque::from([0, 2, 2]),
            labels: vec!["Ascenseur", "Balcon"],
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();

        assert_eq!(page.state.polls, 3);
        assert_eq!(page.state.equipment_count, 2);
        assert!(page.state.reached_fixed_point);
        assert!(page.state.heading_seen);
        assert_eq!(page.equipments, vec!["Ascenseur", "Balcon"]);
        assert!(page.degradations.is_empty());
        assert_eq!(session.scripts.len(), 2);
        assert!(session.scripts[1].contains(r#""Voir plus""#));
    }

    #[tokio::test]
    async fn increasing_counts_exhaust_the_bound() {
        let mut session = FakeSession {
            counts: (1..=12).collect(),
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();

        assert_eq!(page.state.polls, 10);
        assert!(!page.state.reached_fixed_point);
        assert_eq!(
            page.degradations,
            vec![Degradation::StabilizationTimeout { last_count: 10 }]
        );
        // 10 polls plus the final label read
        assert_eq!(session.equipment_lookups, 11);
    }

    #[tokio::test]
    async fn missing_heading_degrades_but_continues() {
        let mut session = FakeSession {
            heading_after: usize::MAX,
            counts: VecDeque::from([1, 1]),
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();

        assert_eq!(session.heading_checks, 20);
        assert!(!page.state.heading_seen);
        assert!(page.degradations.contains(&Degradation::HeadingTimeout));
        assert_eq!(page.equipments, vec!["Ascenseur"]);
    }

    #[tokio::test]
    async fn duplicate_labels_are_collapsed() {
        let mut session = FakeSession {
            counts: VecDeque::from([3, 3]),
            labels: vec!["Parking", "Parking", "Terrasse"],
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();
        assert_eq!(page.equipments, vec!["Parking", "Terrasse"]);
    }

    #[tokio::test]
    async fn label_read_failure_yields_empty_equipments() {
        let mut session = FakeSession {
            counts: VecDeque::from([2, 2]),
            // two polls, then the final label read
            fail_lookup: Some(3),
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();

        assert!(page.state.reached_fixed_point);
        assert!(page.equipments.is_empty());
        assert_eq!(page.degradations.len(), 1);
        assert!(matches!(
            &page.degradations[0],
            Degradation::EquipmentExtraction(msg) if msg.contains("stale element")
        ));
        assert!(page.html.contains("Annonce"));
    }

    #[tokio::test]
    async fn failed_scroll_and_expand_still_capture_page() {
        let mut session = FakeSession {
            fail_scripts: true,
            counts: VecDeque::from([1, 1]),
            ..Default::default()
        };

        let page = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap();

        let failed_steps: Vec<&str> = page
            .degradations
            .iter()
            .filter_map(|d| match d {
                Degradation::StepFailed { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(failed_steps, vec!["scroll", "expand"]);
        assert_eq!(page.equipments, vec!["Ascenseur"]);
        assert!(page.html.contains("Annonce"));
    }

    #[tokio::test]
    async fn navigation_failure_is_fatal() {
        let mut session = FakeSession {
            fail_navigation: true,
            ..Default::default()
        };

        let err = stabilizer()
            .stabilize(&mut session, "https://www.avito.ma/fr/x/a_1.htm")
            .await
            .unwrap_err();
        assert!(err.is_navigation());
        assert!(session.scripts.is_empty());
    }

    #[test]
    fn xpath_literal_quoting() {
        assert_eq!(xpath_literal("Équipements"), "'Équipements'");
        assert_eq!(xpath_literal("l'équipe"), "\"l'équipe\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn default_equipment_locator() {
        let s = Stabilizer::new(StabilizerConfig::default());
        assert_eq!(
            s.equipment_locator,
            Locator::xpath("//h2[text()='Équipements']/following-sibling::div//img")
        );
    }
}
