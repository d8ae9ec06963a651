//! Per-screen selection state machine.
//!
//! The catalog fetch and channel pushes race each other, so a pushed id that
//! arrives before any catalog is parked as `Pending` instead of dropped, and
//! nothing outside the catalog is ever `Resolved`.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::protocol::{ChannelEvent, Outbound, ScreenId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    Unresolved,
    /// Announced before any catalog was available to check it against.
    Pending(String),
    /// Always a member of the current catalog.
    Resolved(String),
}

impl SelectionState {
    pub fn resolved(&self) -> Option<&str> {
        match self {
            Self::Resolved(id) => Some(id),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&str> {
        match self {
            Self::Pending(id) => Some(id),
            _ => None,
        }
    }
}

/// What a transition is reacting to.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// A new catalog snapshot (already stored as the `catalog` argument).
    Catalog,
    /// The server announced this id for our screen.
    Push(&'a str),
}

/// Why a transition discarded an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// Pushed id is not in a non-empty catalog.
    Invalid(String),
    /// Pending id was absent from the catalog that finally arrived.
    StalePending(String),
    /// Resolved id left the catalog on refresh.
    Removed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: SelectionState,
    pub discarded: Option<Discard>,
}

impl Step {
    fn to(next: SelectionState) -> Self {
        Self {
            next,
            discarded: None,
        }
    }

    fn discard(next: SelectionState, discarded: Discard) -> Self {
        Self {
            next,
            discarded: Some(discarded),
        }
    }
}

/// `(state, input, catalog) -> state`.  No side effects.
pub fn transition(state: &SelectionState, input: Input<'_>, catalog: &Catalog) -> Step {
    use SelectionState::*;

    match input {
        Input::Catalog => match state {
            Unresolved => Step::to(Unresolved),
            Pending(x) if catalog.is_empty() => Step::to(Pending(x.clone())),
            Pending(x) if catalog.contains(x) => Step::to(Resolved(x.clone())),
            Pending(x) => Step::discard(Unresolved, Discard::StalePending(x.clone())),
            Resolved(y) if catalog.contains(y) => Step::to(Resolved(y.clone())),
            Resolved(y) => Step::discard(Unresolved, Discard::Removed(y.clone())),
        },
        Input::Push(x) => {
            if catalog.is_empty() {
                Step::to(Pending(x.to_string()))
            } else if catalog.contains(x) {
                Step::to(Resolved(x.to_string()))
            } else {
                Step::discard(state.clone(), Discard::Invalid(x.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Changed,
    Unchanged,
    /// Event was not addressed to this screen or carries no selection.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickError {
    #[error("catalog not loaded yet")]
    NoCatalog,
    #[error("'{0}' is not in the catalog")]
    Unknown(String),
}

/// Owns the selection of one screen.
#[derive(Debug)]
pub struct Reconciler {
    screen: ScreenId,
    state: SelectionState,
    catalog: Arc<Catalog>,
}

impl Reconciler {
    pub fn new(screen: ScreenId) -> Self {
        Self {
            screen,
            state: SelectionState::Unresolved,
            catalog: Arc::new(Catalog::default()),
        }
    }

    pub fn screen(&self) -> &ScreenId {
        &self.screen
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// Resolved id, if any.
    pub fn current(&self) -> Option<&str> {
        self.state.resolved()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn apply(&mut self, input: Input<'_>) -> Outcome {
        let step = transition(&self.state, input, &self.catalog);
        match &step.discarded {
            Some(Discard::Invalid(id)) => {
                warn!("[{}] ignoring selection '{}': not in catalog", self.screen, id)
            }
            Some(Discard::StalePending(id)) => {
                warn!("[{}] dropping pending selection '{}': not in catalog", self.screen, id)
            }
            Some(Discard::Removed(id)) => {
                warn!("[{}] selection '{}' was removed from the catalog", self.screen, id)
            }
            None => {}
        }
        if step.next == self.state {
            return Outcome::Unchanged;
        }
        debug!("[{}] {:?} -> {:?}", self.screen, self.state, step.next);
        self.state = step.next;
        Outcome::Changed
    }

    pub fn on_catalog(&mut self, catalog: Arc<Catalog>) -> Outcome {
        self.catalog = catalog;
        self.apply(Input::Catalog)
    }

    pub fn on_push(&mut self, id: &str) -> Outcome {
        self.apply(Input::Push(id))
    }

    /// Applies a channel event if it is addressed to this screen.
    pub fn handle(&mut self, event: &ChannelEvent) -> Outcome {
        match event {
            ChannelEvent::ChangeUrl(payload) | ChannelEvent::CurrentUrlState(payload) => {
                if payload.targets(&self.screen) {
                    self.on_push(payload.id())
                } else {
                    Outcome::Ignored
                }
            }
            ChannelEvent::CurrentUrlStates(states) => match states.get(&self.screen) {
                Some(id) => self.on_push(id),
                None => Outcome::Ignored,
            },
            _ => Outcome::Ignored,
        }
    }

    /// HTTP `current-url` answer.  Only fills an empty state; the channel
    /// stays authoritative.
    pub fn seed(&mut self, id: &str) -> Outcome {
        if self.state != SelectionState::Unresolved {
            return Outcome::Ignored;
        }
        self.on_push(id)
    }

    /// Local choice (remote operator or rotation).  Optimistically resolves and
    /// returns the announcement to emit; `Ok(None)` when `id` is already current.
    pub fn pick(&mut self, id: &str) -> Result<Option<Outbound>, PickError> {
        if self.catalog.is_empty() {
            warn!("[{}] pick '{}' rejected: catalog not loaded", self.screen, id);
            return Err(PickError::NoCatalog);
        }
        if !self.catalog.contains(id) {
            warn!("[{}] pick '{}' rejected: not in catalog", self.screen, id);
            return Err(PickError::Unknown(id.to_string()));
        }
        if self.current() == Some(id) {
            return Ok(None);
        }
        self.state = SelectionState::Resolved(id.to_string());
        Ok(Some(Outbound::ChangeUrl {
            id: id.to_string(),
            screen: self.screen.clone(),
        }))
    }

    pub fn request_current(&self) -> Outbound {
        Outbound::RequestCurrentUrl {
            screen: Some(self.screen.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Destination;
    use crate::protocol::{ScreenStates, SelectionPayload};
    use tracing_test::traced_test;

    fn catalog(ids: &[&str]) -> Arc<Catalog> {
        Arc::new(Catalog::new(
            ids.iter().map(|id| Destination::new(*id, *id, "")).collect(),
        ))
    }

    fn state_for(screen: &str, id: &str) -> ChannelEvent {
        ChannelEvent::CurrentUrlState(SelectionPayload::Scoped {
            id: id.to_string(),
            screen: Some(ScreenId::new(screen)),
        })
    }

    fn screen_a() -> Reconciler {
        Reconciler::new(ScreenId::default())
    }

    #[test]
    fn test_transition_table() {
        use SelectionState::*;
        let empty = Catalog::default();
        let xy = Catalog::new(vec![Destination::new("x", "", ""), Destination::new("y", "", "")]);

        let cases: Vec<(SelectionState, Input, &Catalog, SelectionState, bool)> = vec![
            (Unresolved, Input::Catalog, &xy, Unresolved, false),
            (Unresolved, Input::Push("x"), &empty, Pending("x".into()), false),
            (Unresolved, Input::Push("x"), &xy, Resolved("x".into()), false),
            (Unresolved, Input::Push("z"), &xy, Unresolved, true),
            (Pending("x".into()), Input::Catalog, &xy, Resolved("x".into()), false),
            (Pending("z".into()), Input::Catalog, &xy, Unresolved, true),
            (Pending("x".into()), Input::Catalog, &empty, Pending("x".into()), false),
            (Resolved("y".into()), Input::Push("x"), &xy, Resolved("x".into()), false),
            (Resolved("y".into()), Input::Push("z"), &xy, Resolved("y".into()), true),
            (Resolved("y".into()), Input::Catalog, &empty, Unresolved, true),
        ];
        for (from, input, cat, expected, discards) in cases {
            let step = transition(&from, input, cat);
            assert_eq!(step.next, expected, "from {:?} on {:?}", from, input);
            assert_eq!(step.discarded.is_some(), discards, "from {:?} on {:?}", from, input);
        }
    }

    #[test]
    fn test_catalog_then_push() {
        let mut r = screen_a();
        assert_eq!(r.on_catalog(catalog(&["x", "y"])), Outcome::Unchanged);
        assert_eq!(r.handle(&state_for("A", "y")), Outcome::Changed);
        assert_eq!(r.state(), &SelectionState::Resolved("y".into()));
    }

    #[test]
    fn test_push_then_catalog_goes_through_pending() {
        let mut r = screen_a();
        r.handle(&state_for("A", "y"));
        assert_eq!(r.state(), &SelectionState::Pending("y".into()));
        assert_eq!(r.current(), None);

        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.state(), &SelectionState::Resolved("y".into()));
    }

    #[test]
    fn test_latest_pending_wins() {
        let mut r = screen_a();
        r.on_push("x");
        r.on_push("y");
        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.current(), Some("y"));
    }

    #[test]
    #[traced_test]
    fn test_invalid_push_logs_once_and_keeps_state() {
        let mut r = screen_a();
        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.handle(&state_for("A", "z")), Outcome::Unchanged);
        assert_eq!(r.state(), &SelectionState::Unresolved);

        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("'z': not in catalog")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning, saw {}", n)),
            }
        });
    }

    #[test]
    fn test_invalid_push_keeps_resolved() {
        let mut r = screen_a();
        r.on_catalog(catalog(&["x", "y"]));
        r.on_push("x");
        r.on_push("nope");
        assert_eq!(r.current(), Some("x"));
    }

    #[test]
    fn test_refresh_demotes_removed_selection() {
        let mut r = screen_a();
        r.on_catalog(catalog(&["x", "y"]));
        r.on_push("y");
        assert_eq!(r.on_catalog(catalog(&["x"])), Outcome::Changed);
        assert_eq!(r.state(), &SelectionState::Unresolved);
    }

    #[test]
    fn test_screen_isolation() {
        let mut a = screen_a();
        let mut b = Reconciler::new(ScreenId::new("B"));
        let cat = catalog(&["x", "y"]);
        a.on_catalog(cat.clone());
        b.on_catalog(cat);

        let events = [
            state_for("B", "x"),
            ChannelEvent::ChangeUrl(SelectionPayload::Legacy("y".into())),
            state_for("B", "y"),
        ];
        for event in &events {
            a.handle(event);
            b.handle(event);
        }
        assert_eq!(a.current(), Some("y"));
        assert_eq!(b.current(), Some("y"));

        assert_eq!(a.handle(&state_for("B", "x")), Outcome::Ignored);
        assert_eq!(a.current(), Some("y"));
        assert_eq!(b.handle(&state_for("B", "x")), Outcome::Changed);
        assert_eq!(b.current(), Some("x"));
    }

    #[test]
    fn test_bulk_states_pick_own_screen() {
        let mut b = Reconciler::new(ScreenId::new("B"));
        b.on_catalog(catalog(&["x", "y"]));
        let states: ScreenStates = [("A".to_string(), "x".to_string()), ("B".to_string(), "y".to_string())]
            .into_iter()
            .collect();
        assert_eq!(b.handle(&ChannelEvent::CurrentUrlStates(states)), Outcome::Changed);
        assert_eq!(b.current(), Some("y"));

        let only_a: ScreenStates = [("A".to_string(), "x".to_string())].into_iter().collect();
        assert_eq!(b.handle(&ChannelEvent::CurrentUrlStates(only_a)), Outcome::Ignored);
    }

    #[test]
    fn test_repeated_state_is_idempotent() {
        let mut r = screen_a();
        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.handle(&state_for("A", "x")), Outcome::Changed);
        assert_eq!(r.handle(&state_for("A", "x")), Outcome::Unchanged);
        assert_eq!(r.request_current(), r.request_current());
        assert_eq!(r.current(), Some("x"));
    }

    #[test]
    fn test_pick() {
        let mut r = Reconciler::new(ScreenId::new("B"));
        assert_eq!(r.pick("x"), Err(PickError::NoCatalog));

        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.pick("z"), Err(PickError::Unknown("z".into())));
        assert_eq!(
            r.pick("x"),
            Ok(Some(Outbound::ChangeUrl {
                id: "x".into(),
                screen: ScreenId::new("B"),
            }))
        );
        assert_eq!(r.current(), Some("x"));
        assert_eq!(r.pick("x"), Ok(None));
    }

    #[test]
    fn test_seed_only_fills_unresolved() {
        let mut r = screen_a();
        r.on_catalog(catalog(&["x", "y"]));
        assert_eq!(r.seed("x"), Outcome::Changed);
        assert_eq!(r.seed("y"), Outcome::Ignored);
        assert_eq!(r.current(), Some("x"));
    }

    #[test]
    fn test_either_delivery_order_converges() {
        let orders: [&[&str]; 2] = [&["catalog", "push"], &["push", "catalog"]];
        for order in orders {
            let mut r = screen_a();
            for step in order {
                match *step {
                    "catalog" => {
                        r.on_catalog(catalog(&["x", "y"]));
                    }
                    _ => {
                        r.on_push("y");
                    }
                }
            }
            assert_eq!(r.current(), Some("y"), "order {:?}", order);
        }
    }

    /// Delivery steps used by the sequence tests.
    #[derive(Debug, Clone, Copy)]
    enum Op {
        Push(&'static str),
        Catalog(&'static [&'static str]),
    }

    const OPS: &[Op] = &[
        Op::Push("x"),
        Op::Push("y"),
        Op::Push("z"),
        Op::Catalog(&[]),
        Op::Catalog(&["x"]),
        Op::Catalog(&["y"]),
        Op::Catalog(&["x", "y"]),
    ];

    /// Plain bookkeeping of what the screen should end up showing: the last
    /// accepted push, whether it still waits for its first non-empty
    /// catalog, and whether a refresh has already dropped it.
    #[derive(Default)]
    struct Model {
        catalog: Vec<&'static str>,
        wanted: Option<&'static str>,
        parked: bool,
        lost: bool,
    }

    impl Model {
        fn apply(&mut self, op: Op) {
            match op {
                Op::Push(id) => {
                    if self.catalog.is_empty() || self.catalog.contains(&id) {
                        self.wanted = Some(id);
                        self.parked = self.catalog.is_empty();
                        self.lost = false;
                    }
                }
                Op::Catalog(ids) => {
                    self.catalog = ids.to_vec();
                    let Some(wanted) = self.wanted.filter(|_| !self.lost) else {
                        return;
                    };
                    if ids.is_empty() {
                        self.lost = !self.parked;
                    } else if ids.contains(&wanted) {
                        self.parked = false;
                    } else {
                        self.lost = true;
                    }
                }
            }
        }

        fn expected(&self) -> SelectionState {
            match self.wanted {
                Some(_) if self.lost => SelectionState::Unresolved,
                Some(id) if self.parked => SelectionState::Pending(id.to_string()),
                Some(id) => SelectionState::Resolved(id.to_string()),
                None => SelectionState::Unresolved,
            }
        }
    }

    fn run_sequence(ops: &[Op]) {
        let mut r = screen_a();
        let mut model = Model::default();
        let mut last_valid = None;
        for op in ops {
            match *op {
                Op::Push(id) => {
                    if model.catalog.is_empty() || model.catalog.contains(&id) {
                        last_valid = Some(id);
                    }
                    r.on_push(id);
                }
                Op::Catalog(ids) => {
                    r.on_catalog(catalog(ids));
                }
            }
            model.apply(*op);
            assert_eq!(*r.state(), model.expected(), "after {:?}", ops);
        }
        if let Some(id) = r.current() {
            assert_eq!(Some(id), last_valid, "after {:?}", ops);
            assert!(r.catalog().contains(id), "after {:?}", ops);
        }
        if let (Some(id), false) = (last_valid, model.lost) {
            if r.catalog().contains(id) {
                assert_eq!(r.current(), Some(id), "after {:?}", ops);
            }
        }
    }

    #[test]
    fn test_interleaved_pushes_and_refreshes() {
        run_sequence(&[
            Op::Push("x"),
            Op::Catalog(&["y"]),
            Op::Push("y"),
            Op::Catalog(&["x", "y"]),
            Op::Push("z"),
        ]);
        let mut r = screen_a();
        r.on_push("x");
        r.on_catalog(catalog(&["y"]));
        r.on_push("y");
        r.on_catalog(catalog(&["x", "y"]));
        r.on_push("z");
        assert_eq!(r.current(), Some("y"));
    }

    #[test]
    fn test_every_short_sequence_matches_model() {
        const LEN: u32 = 5;
        for n in 0..(OPS.len() as u32).pow(LEN) {
            let mut code = n;
            let ops: Vec<Op> = (0..LEN)
                .map(|_| {
                    let op = OPS[(code % OPS.len() as u32) as usize];
                    code /= OPS.len() as u32;
                    op
                })
                .collect();
            run_sequence(&ops);
        }
    }

    #[test]
    fn test_long_random_sequences_match_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let ops: Vec<Op> = (0..40).map(|_| OPS[rng.gen_range(0..OPS.len())]).collect();
            run_sequence(&ops);
        }
    }
}
