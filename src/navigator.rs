//! Selection, loading and position state for the post viewer.
//!
//! The navigator never performs I/O itself. Selecting a source hands back a
//! [`FetchTicket`] that the caller executes; the result is fed back through
//! [`Navigator::complete_fetch`]. Time is injected as well so the autoplay
//! timer can be driven by the event loop (or by tests) without sleeping.

use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::sources::{SourceEntry, SourceKey};
use crate::token::CancelToken;

pub const DEFAULT_AUTOPLAY_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Back10,
    Back1,
    Forward1,
    Forward10,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Back10, Step::Back1, Step::Forward1, Step::Forward10];

    pub fn delta(self) -> i64 {
        match self {
            Step::Back10 => -10,
            Step::Back1 => -1,
            Step::Forward1 => 1,
            Step::Forward10 => 10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Back10 => "-10",
            Step::Back1 => "-1",
            Step::Forward1 => "+1",
            Step::Forward10 => "+10",
        }
    }
}

/// Value reported by a continuous position control. Range controls report
/// two endpoints; only the first one is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliderValue {
    Single(usize),
    Range(usize, usize),
}

impl SliderValue {
    pub fn first(self) -> usize {
        match self {
            SliderValue::Single(value) | SliderValue::Range(value, _) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Source(SourceKey),
    Loading(usize),
    List { len: usize },
    Position { from: usize, to: usize },
    Autoplay(bool),
}

/// A list fetch the caller must perform on the navigator's behalf.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    pub request_id: u64,
    pub source: SourceKey,
    pub url: String,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Committed,
    Stale,
}

struct PendingFetch {
    request_id: u64,
    source: SourceKey,
    cancel: CancelToken,
}

pub struct Navigator {
    source: Option<SourceKey>,
    posts: Option<Vec<String>>,
    position: usize,
    loading: usize,
    autoplay: bool,
    interval: Duration,
    autoplay_deadline: Option<Instant>,
    pending: Option<PendingFetch>,
    next_request_id: u64,
    subscribers: Vec<Sender<StateChange>>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOPLAY_INTERVAL)
    }
}

impl Navigator {
    pub fn new(interval: Duration) -> Self {
        Self {
            source: None,
            posts: None,
            position: 0,
            loading: 0,
            autoplay: false,
            interval,
            autoplay_deadline: None,
            pending: None,
            next_request_id: 1,
            subscribers: Vec::new(),
        }
    }

    /// Every subsequent field change is delivered to the returned receiver.
    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, change: StateChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn source(&self) -> Option<SourceKey> {
        self.source
    }

    pub fn posts(&self) -> Option<&[String]> {
        self.posts.as_deref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current_post(&self) -> Option<&str> {
        self.posts
            .as_ref()
            .and_then(|posts| posts.get(self.position))
            .map(String::as_str)
    }

    pub fn max_position(&self) -> usize {
        self.posts
            .as_ref()
            .map(|posts| posts.len().saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn loading_count(&self) -> usize {
        self.loading
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.autoplay_deadline
    }

    pub fn phase(&self) -> Phase {
        if self.loading > 0 {
            Phase::Loading
        } else if self.posts.is_some() {
            Phase::Ready
        } else {
            Phase::Idle
        }
    }

    /// Steps, position entry and the slider only act in this state.
    pub fn controls_enabled(&self) -> bool {
        self.phase() == Phase::Ready
    }

    pub fn select_source(&mut self, entry: &SourceEntry) -> FetchTicket {
        if let Some(previous) = self.pending.take() {
            previous.cancel.cancel();
            self.loading = self.loading.saturating_sub(1);
            debug!(
                request_id = previous.request_id,
                source = %previous.source,
                "superseded in-flight list fetch"
            );
        }
        self.autoplay_deadline = None;

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel = CancelToken::new();
        self.pending = Some(PendingFetch {
            request_id,
            source: entry.key,
            cancel: cancel.clone(),
        });
        self.loading += 1;
        self.source = Some(entry.key);
        info!(request_id, source = %entry.key, url = entry.url, "fetching post list");

        self.notify(StateChange::Source(entry.key));
        self.notify(StateChange::Loading(self.loading));

        FetchTicket {
            request_id,
            source: entry.key,
            url: entry.url.to_string(),
            cancel,
        }
    }

    /// Applies the result of a fetch issued by [`Navigator::select_source`].
    ///
    /// Results for superseded requests are discarded. A failed fetch still
    /// releases its loading slot and leaves the previous list in place.
    pub fn complete_fetch(
        &mut self,
        request_id: u64,
        result: Result<Vec<String>>,
        now: Instant,
    ) -> Result<FetchOutcome> {
        let current = match &self.pending {
            Some(pending) if pending.request_id == request_id && !pending.cancel.is_cancelled() => {
                pending.source
            }
            _ => {
                debug!(request_id, "discarding stale list fetch result");
                return Ok(FetchOutcome::Stale);
            }
        };
        self.pending = None;
        self.loading = self.loading.saturating_sub(1);
        self.notify(StateChange::Loading(self.loading));

        let outcome = match result {
            Ok(posts) => {
                info!(request_id, source = %current, len = posts.len(), "post list loaded");
                self.replace_posts(posts);
                Ok(FetchOutcome::Committed)
            }
            Err(err) => {
                warn!(request_id, source = %current, error = %err, "post list fetch failed");
                Err(err.context(format!("load posts for {current}")))
            }
        };
        // No post-load signal follows when the mounted post stays the same.
        if self.autoplay && self.posts.is_some() {
            self.autoplay_deadline = Some(now + self.interval);
        }
        outcome
    }

    fn replace_posts(&mut self, posts: Vec<String>) {
        let len = posts.len();
        self.posts = Some(posts);
        self.notify(StateChange::List { len });
        self.set_position(0);
    }

    fn set_position(&mut self, target: usize) -> bool {
        if target == self.position {
            return false;
        }
        let from = self.position;
        self.position = target;
        self.notify(StateChange::Position { from, to: target });
        true
    }

    fn clamp_index(&self, value: i64) -> usize {
        let max = self.max_position() as i64;
        value.clamp(0, max) as usize
    }

    pub fn step(&mut self, step: Step) -> bool {
        if !self.controls_enabled() {
            return false;
        }
        let target = self.clamp_index(self.position as i64 + step.delta());
        self.set_position(target)
    }

    /// Live update while the position field is being edited. Only a value
    /// that already names a valid index moves the position.
    pub fn enter_position(&mut self, raw: &str) -> bool {
        if !self.controls_enabled() {
            return false;
        }
        match raw.trim().parse::<i64>() {
            Ok(value) if value >= 0 && value <= self.max_position() as i64 => {
                self.set_position(value as usize)
            }
            _ => false,
        }
    }

    /// Commit of the position field. Any integer is accepted and clamped;
    /// text that is not a number leaves the position untouched.
    pub fn commit_position(&mut self, raw: &str) -> usize {
        if self.controls_enabled() {
            if let Ok(value) = raw.trim().parse::<i64>() {
                let target = self.clamp_index(value);
                self.set_position(target);
            }
        }
        self.position
    }

    pub fn set_from_slider(&mut self, value: SliderValue) -> bool {
        if !self.controls_enabled() {
            return false;
        }
        let target = self.clamp_index(value.first() as i64);
        self.set_position(target)
    }

    pub fn toggle_autoplay(&mut self, now: Instant) -> bool {
        self.autoplay = !self.autoplay;
        if self.autoplay && self.phase() == Phase::Ready {
            self.autoplay_deadline = Some(now + self.interval);
        } else if !self.autoplay {
            self.autoplay_deadline = None;
        }
        debug!(enabled = self.autoplay, "autoplay toggled");
        self.notify(StateChange::Autoplay(self.autoplay));
        self.autoplay
    }

    /// Called each time the renderer finishes mounting a post, found or not.
    pub fn post_loaded(&mut self, now: Instant) {
        if self.autoplay {
            self.autoplay_deadline = Some(now + self.interval);
        }
    }

    /// Fires the autoplay timer if it is due. Returns true when the position moved.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.autoplay_deadline {
            Some(deadline) if now >= deadline => {
                self.autoplay_deadline = None;
                if self.posts.is_none() {
                    return false;
                }
                let target = self.clamp_index(self.position as i64 + 1);
                let moved = self.set_position(target);
                if moved {
                    debug!(position = target, "autoplay advanced");
                }
                moved
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const SOURCE_A: SourceEntry = SourceEntry {
        key: SourceKey(2021),
        name: "2021",
        url: "https://example.invalid/a",
    };
    const SOURCE_B: SourceEntry = SourceEntry {
        key: SourceKey(2020),
        name: "2020",
        url: "https://example.invalid/b",
    };

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn ready(items: &[&str]) -> Navigator {
        let mut nav = Navigator::default();
        let ticket = nav.select_source(&SOURCE_A);
        nav.complete_fetch(ticket.request_id, Ok(list(items)), Instant::now())
            .unwrap();
        nav
    }

    #[test]
    fn step_sequence_clamps_at_both_ends() {
        let mut nav = ready(&["a", "b", "c"]);
        assert_eq!(nav.position(), 0);
        nav.step(Step::Forward1);
        assert_eq!(nav.position(), 1);
        nav.step(Step::Forward10);
        assert_eq!(nav.position(), 2);
        nav.step(Step::Back1);
        nav.step(Step::Back1);
        assert_eq!(nav.position(), 0);
        nav.step(Step::Back1);
        assert_eq!(nav.position(), 0);
    }

    #[test]
    fn steps_stay_in_bounds_for_every_start() {
        let items: Vec<String> = (0..23).map(|i| format!("id{i}")).collect();
        for start in 0..items.len() {
            for step in Step::ALL {
                let mut nav = Navigator::default();
                let ticket = nav.select_source(&SOURCE_A);
                nav.complete_fetch(ticket.request_id, Ok(items.clone()), Instant::now())
                    .unwrap();
                nav.commit_position(&start.to_string());
                nav.step(step);
                assert!(nav.position() <= items.len() - 1);
            }
        }
    }

    #[test]
    fn controls_disabled_while_loading() {
        let mut nav = ready(&["a", "b", "c"]);
        nav.step(Step::Forward1);
        let _ticket = nav.select_source(&SOURCE_B);
        assert_eq!(nav.phase(), Phase::Loading);
        assert!(!nav.step(Step::Forward1));
        assert!(!nav.set_from_slider(SliderValue::Single(2)));
        assert_eq!(nav.commit_position("2"), 1);
        assert_eq!(nav.position(), 1);
    }

    #[test]
    fn new_source_resets_position() {
        let mut nav = ready(&["a", "b", "c"]);
        nav.step(Step::Forward10);
        assert_eq!(nav.position(), 2);
        let ticket = nav.select_source(&SOURCE_B);
        // Stale list stays visible until the new one lands.
        assert_eq!(nav.posts().unwrap().len(), 3);
        nav.complete_fetch(ticket.request_id, Ok(list(&["x", "y"])), Instant::now())
            .unwrap();
        assert_eq!(nav.position(), 0);
        assert_eq!(nav.current_post(), Some("x"));
        assert_eq!(nav.phase(), Phase::Ready);
    }

    #[test]
    fn superseded_fetch_never_overwrites() {
        let mut nav = Navigator::default();
        let first = nav.select_source(&SOURCE_A);
        let second = nav.select_source(&SOURCE_B);
        assert!(first.cancel.is_cancelled());
        assert_eq!(nav.loading_count(), 1);

        let outcome = nav
            .complete_fetch(second.request_id, Ok(list(&["b1", "b2"])), Instant::now())
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Committed);

        let outcome = nav
            .complete_fetch(first.request_id, Ok(list(&["a1"])), Instant::now())
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Stale);
        assert_eq!(nav.posts().unwrap(), list(&["b1", "b2"]).as_slice());
        assert_eq!(nav.loading_count(), 0);
        assert_eq!(nav.source(), Some(SOURCE_B.key));
    }

    #[test]
    fn failed_fetch_releases_loading_and_keeps_list() {
        let mut nav = ready(&["a", "b"]);
        let ticket = nav.select_source(&SOURCE_B);
        let err = nav
            .complete_fetch(ticket.request_id, Err(anyhow!("connection reset")), Instant::now())
            .unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));
        assert_eq!(nav.loading_count(), 0);
        assert_eq!(nav.phase(), Phase::Ready);
        assert_eq!(nav.posts().unwrap(), list(&["a", "b"]).as_slice());
    }

    #[test]
    fn failed_first_fetch_returns_to_idle() {
        let mut nav = Navigator::default();
        let ticket = nav.select_source(&SOURCE_A);
        assert!(nav
            .complete_fetch(ticket.request_id, Err(anyhow!("offline")), Instant::now())
            .is_err());
        assert_eq!(nav.phase(), Phase::Idle);
        assert!(!nav.step(Step::Forward1));
    }

    #[test]
    fn position_entry_tolerates_intermediate_values() {
        let mut nav = ready(&["a", "b", "c", "d"]);
        assert!(nav.enter_position("2"));
        assert_eq!(nav.position(), 2);
        assert!(!nav.enter_position("-"));
        assert!(!nav.enter_position("40"));
        assert_eq!(nav.position(), 2);
        assert_eq!(nav.commit_position("40"), 3);
        assert_eq!(nav.commit_position("-7"), 0);
        assert_eq!(nav.commit_position("abc"), 0);
    }

    #[test]
    fn slider_uses_first_endpoint_and_clamps() {
        let mut nav = ready(&["a", "b", "c", "d"]);
        nav.set_from_slider(SliderValue::Range(2, 3));
        assert_eq!(nav.position(), 2);
        nav.set_from_slider(SliderValue::Single(4));
        assert_eq!(nav.position(), 3);
    }

    #[test]
    fn autoplay_advances_once_per_signal() {
        let mut nav = ready(&["a", "b", "c", "d"]);
        let start = Instant::now();
        let interval = nav.interval();
        nav.toggle_autoplay(start);

        let mut now = start;
        for expected in 1..=3 {
            now += interval;
            assert!(nav.tick(now));
            assert_eq!(nav.position(), expected);
            nav.post_loaded(now);
            assert!(!nav.tick(now + interval / 2));
        }
        now += interval;
        assert!(!nav.tick(now));
        assert_eq!(nav.position(), 3);
    }

    #[test]
    fn signals_without_autoplay_do_nothing() {
        let mut nav = ready(&["a", "b"]);
        let now = Instant::now();
        nav.post_loaded(now);
        assert_eq!(nav.next_deadline(), None);
        assert!(!nav.tick(now + Duration::from_secs(60)));
    }

    #[test]
    fn disabling_autoplay_cancels_pending_advance() {
        let mut nav = ready(&["a", "b", "c"]);
        let now = Instant::now();
        nav.toggle_autoplay(now);
        nav.post_loaded(now);
        nav.toggle_autoplay(now);
        assert!(!nav.tick(now + nav.interval()));
        assert_eq!(nav.position(), 0);
    }

    #[test]
    fn source_change_cancels_pending_advance() {
        let mut nav = ready(&["a", "b", "c"]);
        let now = Instant::now();
        nav.toggle_autoplay(now);
        let _ticket = nav.select_source(&SOURCE_B);
        assert_eq!(nav.next_deadline(), None);
        assert!(!nav.tick(now + nav.interval()));
    }

    #[test]
    fn autoplay_enabled_while_loading_arms_when_list_lands() {
        let mut nav = Navigator::default();
        let now = Instant::now();
        let ticket = nav.select_source(&SOURCE_A);
        nav.toggle_autoplay(now);
        assert_eq!(nav.next_deadline(), None);
        nav.complete_fetch(ticket.request_id, Ok(list(&["a", "b"])), now)
            .unwrap();
        assert_eq!(nav.next_deadline(), Some(now + nav.interval()));

        let loaded = now + Duration::from_millis(500);
        nav.post_loaded(loaded);
        assert!(!nav.tick(now + nav.interval()));
        assert!(nav.tick(loaded + nav.interval()));
        assert_eq!(nav.position(), 1);
    }

    #[test]
    fn autoplay_resumes_after_failed_source_switch() {
        let mut nav = ready(&["a", "b", "c"]);
        let now = Instant::now();
        nav.toggle_autoplay(now);
        let ticket = nav.select_source(&SOURCE_B);
        let failed_at = now + Duration::from_secs(1);
        assert!(nav
            .complete_fetch(ticket.request_id, Err(anyhow!("offline")), failed_at)
            .is_err());
        assert!(nav.autoplay());
        assert_eq!(nav.next_deadline(), Some(failed_at + nav.interval()));
        assert!(nav.tick(failed_at + nav.interval()));
        assert_eq!(nav.position(), 1);
    }

    #[test]
    fn stale_result_does_not_arm_autoplay() {
        let mut nav = ready(&["a", "b", "c"]);
        let now = Instant::now();
        nav.toggle_autoplay(now);
        let first = nav.select_source(&SOURCE_B);
        let _second = nav.select_source(&SOURCE_A);
        nav.complete_fetch(first.request_id, Ok(list(&["x"])), now)
            .unwrap();
        assert_eq!(nav.next_deadline(), None);
    }

    #[test]
    fn subscribers_see_each_change() {
        let mut nav = Navigator::default();
        let changes = nav.subscribe();
        let ticket = nav.select_source(&SOURCE_A);
        nav.complete_fetch(ticket.request_id, Ok(list(&["a", "b"])), Instant::now())
            .unwrap();
        nav.step(Step::Forward1);
        nav.toggle_autoplay(Instant::now());

        let seen: Vec<StateChange> = changes.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                StateChange::Source(SOURCE_A.key),
                StateChange::Loading(1),
                StateChange::Loading(0),
                StateChange::List { len: 2 },
                StateChange::Position { from: 0, to: 1 },
                StateChange::Autoplay(true),
            ]
        );
    }
}
