//! Conflict resolution for near-simultaneous remote actions.
//!
//! Actions are bucketed by a conflict key (layer, kind and, for strokes and
//! fills, a cell of a 10×10 grid over normalized space). Two actions
//! conflict when they share a key and their timestamps lie within the
//! conflict window. What happens on conflict depends on the
//! [`MergeStrategy`]:
//!
//! | Strategy | Host action | Client action |
//! |----------|-------------|---------------|
//! | host-override | accepted, `overrides` lists beaten client ids | rejected if a host action is in the window |
//! | last-write-wins | accepted, `supersededBy` set if a newer action exists | same |
//! | crdt | accepted | accepted |
//!
//! Reference: Shapiro et al., "Conflict-free Replicated Data Types" (2011)

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use paintnook_core::{now_millis, Action, ActionPayload, Priority};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::PriorityConfig;
use crate::lock;

// ───────────────────────────────────────────────────────────────────
// Strategy selection
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    #[default]
    HostOverride,
    Crdt,
    LastWriteWins,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::HostOverride => "host-override",
            MergeStrategy::Crdt => "crdt",
            MergeStrategy::LastWriteWins => "last-write-wins",
        }
    }

    /// Instantiate the policy.
    pub fn build(self) -> Box<dyn ConflictStrategy> {
        match self {
            MergeStrategy::HostOverride => Box::new(HostOverride),
            MergeStrategy::Crdt => Box::new(Crdt),
            MergeStrategy::LastWriteWins => Box::new(LastWriteWins),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host-override" => Ok(MergeStrategy::HostOverride),
            "crdt" => Ok(MergeStrategy::Crdt),
            "last-write-wins" => Ok(MergeStrategy::LastWriteWins),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Ledger and outcomes
// ───────────────────────────────────────────────────────────────────

/// What the resolver remembers about an accepted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: u64,
    pub priority: Priority,
    pub author_id: Option<String>,
    pub vector_clock: u64,
}

impl LedgerEntry {
    pub fn of(action: &Action) -> Self {
        Self {
            id: action.id.clone(),
            timestamp: action.timestamp,
            priority: action.priority,
            author_id: action.author_id.clone(),
            vector_clock: action.vector_clock,
        }
    }

    /// Total order used by last-write-wins: timestamp, then vector clock,
    /// then author id.
    fn lww_cmp(&self, action: &Action) -> Ordering {
        self.timestamp
            .cmp(&action.timestamp)
            .then(self.vector_clock.cmp(&action.vector_clock))
            .then_with(|| self.author_id.as_deref().cmp(&action.author_id.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A host action on the same key is inside the conflict window.
    HostConflict { winner: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::HostConflict { winner } => write!(f, "conflict with host action {winner}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Possibly annotated with `overrides` or `superseded_by`.
    Accepted(Action),
    Rejected { action: Action, reason: RejectReason },
}

impl Resolution {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Resolution::Accepted(_))
    }
}

// ───────────────────────────────────────────────────────────────────
// Strategies
// ───────────────────────────────────────────────────────────────────

/// A conflict policy. `recent` holds the ledger entries for the action's
/// key that are still inside the conflict window, oldest first.
pub trait ConflictStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> MergeStrategy;

    fn resolve(&self, action: Action, recent: &[LedgerEntry]) -> Resolution;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostOverride;

impl ConflictStrategy for HostOverride {
    fn kind(&self) -> MergeStrategy {
        MergeStrategy::HostOverride
    }

    fn resolve(&self, mut action: Action, recent: &[LedgerEntry]) -> Resolution {
        if action.is_host() {
            for entry in recent.iter().filter(|e| e.priority < Priority::Host) {
                if !action.overrides.contains(&entry.id) {
                    action.overrides.push(entry.id.clone());
                }
            }
            return Resolution::Accepted(action);
        }

        match recent.iter().find(|e| e.priority == Priority::Host) {
            Some(host) => Resolution::Rejected {
                reason: RejectReason::HostConflict {
                    winner: host.id.clone(),
                },
                action,
            },
            None => Resolution::Accepted(action),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictStrategy for LastWriteWins {
    fn kind(&self) -> MergeStrategy {
        MergeStrategy::LastWriteWins
    }

    fn resolve(&self, mut action: Action, recent: &[LedgerEntry]) -> Resolution {
        // Still accepted: the newer action paints over it.
        if let Some(newer) = recent.iter().find(|e| e.lww_cmp(&action) == Ordering::Greater) {
            action.superseded_by = Some(newer.id.clone());
        }
        Resolution::Accepted(action)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Crdt;

impl ConflictStrategy for Crdt {
    fn kind(&self) -> MergeStrategy {
        MergeStrategy::Crdt
    }

    fn resolve(&self, action: Action, _recent: &[LedgerEntry]) -> Resolution {
        Resolution::Accepted(action)
    }
}

// ───────────────────────────────────────────────────────────────────
// Conflict key
// ───────────────────────────────────────────────────────────────────

fn grid_cell(v: f64) -> i64 {
    (v * 10.0).floor() as i64
}

/// Bucket an action for conflict detection.
pub fn conflict_key(action: &Action) -> String {
    let kind = action.action_type();
    let anchor = match &action.payload {
        ActionPayload::Stroke(stroke) => stroke.points.first(),
        ActionPayload::Fill(fill) => Some(&fill.point),
        _ => None,
    };

    if let Some(p) = anchor {
        return format!("{}:{}:{}:{}", action.layer_id, kind, grid_cell(p.x), grid_cell(p.y));
    }
    if kind.is_layer_op() {
        return format!("{}:{}", action.layer_id, kind);
    }
    format!("{}:{}:global", action.layer_id, kind)
}

// ───────────────────────────────────────────────────────────────────
// Resolver
// ───────────────────────────────────────────────────────────────────

struct ResolverState {
    window: u64,
    strategy: Box<dyn ConflictStrategy>,
    ledger: HashMap<String, Vec<LedgerEntry>>,
}

impl ResolverState {
    fn retention_cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.window.saturating_mul(2))
    }

    fn sweep(&mut self, now: u64) {
        let cutoff = self.retention_cutoff(now);
        self.ledger.retain(|_, entries| {
            entries.retain(|e| e.timestamp > cutoff);
            !entries.is_empty()
        });
    }
}

struct ResolverInner {
    state: Mutex<ResolverState>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Ledger of recently accepted actions plus the active strategy.
///
/// When created inside a tokio runtime a background task prunes stale ledger
/// entries every `2 × window`; it stops on [`stop`](Self::stop) or drop.
pub struct ConflictResolver {
    inner: Arc<ResolverInner>,
}

impl ConflictResolver {
    pub fn new(config: &PriorityConfig) -> Self {
        let resolver = Self {
            inner: Arc::new(ResolverInner {
                state: Mutex::new(ResolverState {
                    window: config.conflict_window,
                    strategy: config.merge_strategy.build(),
                    ledger: HashMap::new(),
                }),
                sweeper: Mutex::new(None),
            }),
        };
        resolver.start_sweeper();
        resolver
    }

    fn start_sweeper(&self) {
        let Ok(handle) = Handle::try_current() else {
            log::debug!("No runtime, conflict ledger is pruned on insert only");
            return;
        };
        let period = Duration::from_millis(lock(&self.inner.state).window.saturating_mul(2).max(1));
        let weak: Weak<ResolverInner> = Arc::downgrade(&self.inner);

        let task = handle.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                lock(&inner.state).sweep(now_millis());
            }
        });

        if let Some(old) = lock(&self.inner.sweeper).replace(task) {
            old.abort();
        }
    }

    /// Resolve against the wall clock.
    pub fn resolve(&self, action: Action) -> Resolution {
        self.resolve_at(action, now_millis())
    }

    /// Resolve as if the current time were `now` (ms since the epoch).
    pub fn resolve_at(&self, action: Action, now: u64) -> Resolution {
        let key = conflict_key(&action);
        let mut st = lock(&self.inner.state);
        let window = st.window;

        let recent: Vec<LedgerEntry> = st
            .ledger
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| now.saturating_sub(e.timestamp) < window)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let resolution = st.strategy.resolve(action, &recent);

        match &resolution {
            Resolution::Accepted(accepted) => {
                let cutoff = st.retention_cutoff(now);
                let entries = st.ledger.entry(key).or_default();
                entries.push(LedgerEntry::of(accepted));
                entries.retain(|e| e.timestamp > cutoff);
                if entries.is_empty() {
                    st.ledger.remove(&conflict_key(accepted));
                }
            }
            Resolution::Rejected { action, reason } => {
                log::debug!("Rejected action {} on {}: {}", action.id, key, reason);
            }
        }
        resolution
    }

    /// True when both actions share a key and lie within the window.
    pub fn actions_conflict(&self, a: &Action, b: &Action) -> bool {
        if conflict_key(a) != conflict_key(b) {
            return false;
        }
        a.timestamp.abs_diff(b.timestamp) < lock(&self.inner.state).window
    }

    pub fn strategy(&self) -> MergeStrategy {
        lock(&self.inner.state).strategy.kind()
    }

    pub fn set_strategy(&self, strategy: MergeStrategy) {
        let mut st = lock(&self.inner.state);
        if st.strategy.kind() != strategy {
            log::info!("Conflict strategy {} -> {}", st.strategy.kind(), strategy);
            st.strategy = strategy.build();
        }
    }

    /// Install a custom policy.
    pub fn set_custom_strategy(&self, strategy: Box<dyn ConflictStrategy>) {
        lock(&self.inner.state).strategy = strategy;
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(lock(&self.inner.state).window)
    }

    /// Apply a new window and strategy. Restarts the sweep when the window
    /// changes.
    pub fn update_config(&self, config: &PriorityConfig) {
        let window_changed = {
            let mut st = lock(&self.inner.state);
            let changed = st.window != config.conflict_window;
            st.window = config.conflict_window;
            changed
        };
        self.set_strategy(config.merge_strategy);
        if window_changed && lock(&self.inner.sweeper).is_some() {
            self.start_sweeper();
        }
    }

    /// Drop entries older than `2 × window` relative to `now`.
    pub fn sweep_at(&self, now: u64) {
        lock(&self.inner.state).sweep(now);
    }

    /// Number of keys with live entries.
    pub fn tracked_keys(&self) -> usize {
        lock(&self.inner.state).ledger.len()
    }

    pub fn entries(&self, key: &str) -> Vec<LedgerEntry> {
        lock(&self.inner.state).ledger.get(key).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        lock(&self.inner.state).ledger.clear();
    }

    /// Cancel the background sweep and forget the ledger.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.inner.sweeper).take() {
            task.abort();
        }
        self.clear();
    }
}

impl Drop for ConflictResolver {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.inner.sweeper).take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("ConflictResolver")
            .field("strategy", &st.strategy.kind())
            .field("window", &st.window)
            .field("keys", &st.ledger.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paintnook_core::{
        ActionType, Bounds, Color, FillData, Point, ShapeData, ShapeKind, StrokeData,
    };
    use serde_json::json;

    const T0: u64 = 1_700_000_000_000;

    fn stroke_at(x: f64, y: f64, author: &str, priority: Priority, ts: u64) -> Action {
        Action::new(
            "layer-1",
            ActionPayload::Stroke(StrokeData::new(vec![Point::new(x, y)], Color::BLACK)),
        )
        .with_author(author)
        .with_priority(priority)
        .with_timestamp(ts)
    }

    fn resolver(strategy: MergeStrategy) -> ConflictResolver {
        ConflictResolver::new(&PriorityConfig {
            merge_strategy: strategy,
            ..PriorityConfig::default()
        })
    }

    #[test]
    fn test_conflict_keys() {
        let s = stroke_at(0.55, 0.31, "a", Priority::Normal, T0);
        assert_eq!(conflict_key(&s), "layer-1:stroke:5:3");

        let f = Action::new("bg", ActionPayload::Fill(FillData::new(Point::new(0.99, 0.0), Color::WHITE)));
        assert_eq!(conflict_key(&f), "bg:fill:9:0");

        let layer = Action::new("bg", ActionPayload::opaque(ActionType::LayerOpacity, json!({"opacity": 0.5})));
        assert_eq!(conflict_key(&layer), "bg:layer_opacity");

        let shape = Action::new(
            "bg",
            ActionPayload::Shape(ShapeData::new(ShapeKind::Line, Bounds::new(0.1, 0.1, 0.2, 0.2))),
        );
        assert_eq!(conflict_key(&shape), "bg:shape:global");

        let empty = Action::new("bg", ActionPayload::Stroke(StrokeData::new(vec![], Color::BLACK)));
        assert_eq!(conflict_key(&empty), "bg:stroke:global");

        let clear = Action::new("bg", ActionPayload::opaque(ActionType::ClearLayer, json!({})));
        assert_eq!(conflict_key(&clear), "bg:clear_layer:global");
    }

    #[test]
    fn test_conflict_key_stable_within_cell() {
        let a = stroke_at(0.50, 0.50, "a", Priority::Normal, T0);
        let b = stroke_at(0.5999, 0.5001, "b", Priority::Normal, T0);
        let c = stroke_at(0.60, 0.50, "c", Priority::Normal, T0);
        assert_eq!(conflict_key(&a), conflict_key(&b));
        assert_ne!(conflict_key(&a), conflict_key(&c));
    }

    #[test]
    fn test_host_override_rejects_client_in_window() {
        let r = resolver(MergeStrategy::HostOverride);
        let host = stroke_at(0.5, 0.5, "host", Priority::Host, T0);
        let host_id = host.id.clone();
        assert!(r.resolve_at(host, T0).is_accepted());

        let client = stroke_at(0.52, 0.53, "guest", Priority::Normal, T0 + 100);
        match r.resolve_at(client, T0 + 100) {
            Resolution::Rejected { reason, .. } => {
                assert_eq!(reason, RejectReason::HostConflict { winner: host_id })
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_host_override_accepts_client_outside_window_or_cell() {
        let r = resolver(MergeStrategy::HostOverride);
        r.resolve_at(stroke_at(0.5, 0.5, "host", Priority::Host, T0), T0);

        let far = stroke_at(0.9, 0.9, "guest", Priority::Normal, T0 + 10);
        assert!(r.resolve_at(far, T0 + 10).is_accepted());

        let late = stroke_at(0.5, 0.5, "guest", Priority::Normal, T0 + 600);
        assert!(r.resolve_at(late, T0 + 600).is_accepted());
    }

    #[test]
    fn test_host_annotates_overridden_clients() {
        let r = resolver(MergeStrategy::HostOverride);
        let c1 = stroke_at(0.5, 0.5, "g1", Priority::Normal, T0);
        let c2 = stroke_at(0.51, 0.51, "g2", Priority::Normal, T0 + 50);
        let ids = vec![c1.id.clone(), c2.id.clone()];
        r.resolve_at(c1, T0);
        r.resolve_at(c2, T0 + 50);

        let host = stroke_at(0.5, 0.5, "host", Priority::Host, T0 + 100);
        match r.resolve_at(host, T0 + 100) {
            Resolution::Accepted(a) => assert_eq!(a.overrides, ids),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_host_actions_always_accepted() {
        let r = resolver(MergeStrategy::HostOverride);
        for i in 0..5 {
            let h = stroke_at(0.5, 0.5, "host", Priority::Host, T0 + i);
            assert!(r.resolve_at(h, T0 + i).is_accepted());
        }
    }

    #[test]
    fn test_last_write_wins_annotates_older() {
        let r = resolver(MergeStrategy::LastWriteWins);
        let newer = stroke_at(0.5, 0.5, "a", Priority::Normal, T0 + 200);
        let newer_id = newer.id.clone();
        r.resolve_at(newer, T0 + 200);

        let older = stroke_at(0.5, 0.5, "b", Priority::Host, T0 + 100);
        match r.resolve_at(older, T0 + 250) {
            Resolution::Accepted(a) => assert_eq!(a.superseded_by, Some(newer_id)),
            other => panic!("expected acceptance, got {other:?}"),
        }

        let newest = stroke_at(0.5, 0.5, "c", Priority::Normal, T0 + 300);
        match r.resolve_at(newest, T0 + 300) {
            Resolution::Accepted(a) => assert_eq!(a.superseded_by, None),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_last_write_wins_tie_break() {
        let r = resolver(MergeStrategy::LastWriteWins);
        let first = stroke_at(0.5, 0.5, "zed", Priority::Normal, T0).with_vector_clock(3);
        let first_id = first.id.clone();
        r.resolve_at(first, T0);

        let lower_clock = stroke_at(0.5, 0.5, "amy", Priority::Normal, T0).with_vector_clock(2);
        match r.resolve_at(lower_clock, T0) {
            Resolution::Accepted(a) => assert_eq!(a.superseded_by.as_deref(), Some(first_id.as_str())),
            other => panic!("{other:?}"),
        }

        let same_clock = stroke_at(0.5, 0.5, "amy", Priority::Normal, T0).with_vector_clock(3);
        match r.resolve_at(same_clock, T0) {
            Resolution::Accepted(a) => assert!(a.superseded_by.is_some()),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_crdt_accepts_everything() {
        let r = resolver(MergeStrategy::Crdt);
        r.resolve_at(stroke_at(0.5, 0.5, "host", Priority::Host, T0), T0);
        let client = stroke_at(0.5, 0.5, "guest", Priority::Normal, T0 + 1);
        match r.resolve_at(client, T0 + 1) {
            Resolution::Accepted(a) => {
                assert!(a.overrides.is_empty());
                assert!(a.superseded_by.is_none());
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_ledger_pruning() {
        let r = resolver(MergeStrategy::Crdt);
        let a = stroke_at(0.5, 0.5, "a", Priority::Normal, T0);
        let key = conflict_key(&a);
        r.resolve_at(a, T0);
        r.resolve_at(stroke_at(0.5, 0.5, "b", Priority::Normal, T0 + 900), T0 + 900);
        assert_eq!(r.entries(&key).len(), 2);

        r.resolve_at(stroke_at(0.5, 0.5, "c", Priority::Normal, T0 + 1001), T0 + 1001);
        assert_eq!(r.entries(&key).len(), 2);

        r.sweep_at(T0 + 5000);
        assert_eq!(r.tracked_keys(), 0);
    }

    #[test]
    fn test_actions_conflict() {
        let r = resolver(MergeStrategy::HostOverride);
        let a = stroke_at(0.5, 0.5, "a", Priority::Normal, T0);
        let b = stroke_at(0.55, 0.55, "b", Priority::Normal, T0 + 499);
        let c = stroke_at(0.55, 0.55, "c", Priority::Normal, T0 + 500);
        let d = stroke_at(0.1, 0.5, "d", Priority::Normal, T0);
        assert!(r.actions_conflict(&a, &b));
        assert!(!r.actions_conflict(&a, &c));
        assert!(!r.actions_conflict(&a, &d));
    }

    #[test]
    fn test_set_strategy_and_clear() {
        let r = resolver(MergeStrategy::HostOverride);
        r.resolve_at(stroke_at(0.5, 0.5, "host", Priority::Host, T0), T0);
        r.set_strategy(MergeStrategy::Crdt);
        assert_eq!(r.strategy(), MergeStrategy::Crdt);
        assert!(r.resolve_at(stroke_at(0.5, 0.5, "g", Priority::Normal, T0 + 1), T0 + 1).is_accepted());

        r.clear();
        assert_eq!(r.tracked_keys(), 0);
        assert_eq!("last-write-wins".parse::<MergeStrategy>(), Ok(MergeStrategy::LastWriteWins));
        assert!("vote".parse::<MergeStrategy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_runs() {
        let r = ConflictResolver::new(&PriorityConfig {
            conflict_window: 50,
            merge_strategy: MergeStrategy::Crdt,
            ..PriorityConfig::default()
        });
        // Timestamped far in the past relative to the wall clock.
        let old = stroke_at(0.5, 0.5, "a", Priority::Normal, 1_000);
        r.resolve_at(old, 1_000);
        assert_eq!(r.tracked_keys(), 1);

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(r.tracked_keys(), 0);

        r.stop();
    }
}
