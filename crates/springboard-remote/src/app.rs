//! Remote control: one catalog list, one selection per screen.
//!
//! The app owns a [`Reconciler`] per screen it can switch to, so every
//! screen's state stays current while another one is on display.  Picks are
//! applied optimistically and tracked by an [`Intent`] until the server
//! announces the screen's selection.

use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use springboard_proto::catalog::{Catalog, CatalogHandle};
use springboard_proto::channel::Channel;
use springboard_proto::protocol::{events, ChannelEvent, ScreenId};
use springboard_proto::reconciler::{Outcome, Reconciler};

use crate::action::Action;
use crate::intent::Intent;
use crate::ui;

/// Intent timeouts and the waiting marker's blink.
const UI_TICK: Duration = Duration::from_millis(100);

pub struct ScreenView {
    pub reconciler: Reconciler,
    pub intent: Intent<Option<String>>,
    pub last_change: Option<DateTime<Local>>,
}

impl ScreenView {
    fn new(screen: ScreenId) -> Self {
        Self {
            reconciler: Reconciler::new(screen),
            intent: Intent::new(None),
            last_change: None,
        }
    }

    pub fn screen(&self) -> &ScreenId {
        self.reconciler.screen()
    }

    pub fn current(&self) -> Option<&str> {
        self.reconciler.current()
    }
}

pub struct App {
    channel: Channel,
    catalog: CatalogHandle,
    views: Vec<ScreenView>,
    active: usize,
    snapshot: Arc<Catalog>,
    cursor: usize,
    connected: bool,
    catalog_error: Option<String>,
    status: Option<String>,
    should_quit: bool,
}

impl App {
    pub fn new(screens: Vec<ScreenId>, channel: Channel, catalog: CatalogHandle) -> Self {
        let mut views: Vec<ScreenView> = screens.into_iter().map(ScreenView::new).collect();
        if views.is_empty() {
            views.push(ScreenView::new(ScreenId::default()));
        }
        let initial = catalog.snapshot();
        let mut app = Self {
            channel,
            catalog,
            views,
            active: 0,
            snapshot: Arc::new(Catalog::default()),
            cursor: 0,
            connected: false,
            catalog_error: None,
            status: None,
            should_quit: false,
        };
        app.on_catalog(initial);
        app
    }

    pub fn views(&self) -> &[ScreenView] {
        &self.views
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_view(&self) -> &ScreenView {
        &self.views[self.active]
    }

    pub fn snapshot(&self) -> &Catalog {
        &self.snapshot
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn catalog_error(&self) -> Option<&str> {
        self.catalog_error.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    // ── Inputs ───────────────────────────────────────────────────────────────

    /// Returns `true` when the screen needs a redraw.
    pub fn on_channel_event(&mut self, event: &ChannelEvent) -> bool {
        match event {
            ChannelEvent::Connected => {
                info!("connected to {}", self.channel.endpoint());
                self.connected = true;
                self.status = None;
                for view in &self.views {
                    self.channel.emit(view.reconciler.request_current());
                }
                self.catalog.request_refresh();
                true
            }
            ChannelEvent::Disconnected => {
                if self.connected {
                    warn!("disconnected, retrying");
                }
                self.connected = false;
                true
            }
            ChannelEvent::Error(data) => {
                warn!("server error: {}", data);
                self.status = Some(format!("server error: {data}"));
                true
            }
            _ => {
                let mut redraw = false;
                for view in &mut self.views {
                    let outcome = view.reconciler.handle(event);
                    if outcome == Outcome::Ignored {
                        continue;
                    }
                    let announced = view.reconciler.current().map(str::to_string);
                    let was_waiting = view.intent.is_waiting();
                    if !view.intent.echo(announced) && was_waiting {
                        info!(
                            "[{}] pick superseded by '{}'",
                            view.screen(),
                            view.current().unwrap_or("")
                        );
                    }
                    if outcome == Outcome::Changed {
                        view.last_change = Some(Local::now());
                    }
                    redraw = true;
                }
                redraw
            }
        }
    }

    pub fn on_catalog(&mut self, snapshot: Arc<Catalog>) {
        let under_cursor = self
            .snapshot
            .entries()
            .get(self.cursor)
            .map(|d| d.id.clone());
        let was_empty = self.snapshot.is_empty();

        for view in &mut self.views {
            if view.reconciler.on_catalog(Arc::clone(&snapshot)) == Outcome::Changed {
                view.last_change = Some(Local::now());
            }
        }
        debug!("catalog now has {} entries", snapshot.len());
        self.snapshot = snapshot;

        if was_empty {
            self.cursor_to_current();
            return;
        }
        // Keep the cursor on the same destination when the list moves.
        self.cursor = under_cursor
            .and_then(|id| self.snapshot.position(&id))
            .unwrap_or(self.cursor)
            .min(self.snapshot.len().saturating_sub(1));
    }

    pub fn on_catalog_error(&mut self, error: Option<String>) {
        self.catalog_error = error;
    }

    /// Expires overdue picks.  Returns `true` while something is animating.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut redraw = false;
        for view in &mut self.views {
            if view.intent.expire(now) {
                warn!("[{}] pick not confirmed by the server", view.screen());
                redraw = true;
            }
            redraw |= view.intent.is_waiting();
        }
        redraw
    }

    fn on_terminal_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) => match self.handle_key(key) {
                Some(action) => {
                    self.dispatch(action, Instant::now());
                    true
                }
                None => false,
            },
            Event::Resize(..) => true,
            _ => false,
        }
    }

    pub fn handle_key(&self, key: KeyEvent) -> Option<Action> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return (key.code == KeyCode::Char('c')).then_some(Action::Quit);
        }
        let action = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
            KeyCode::Up | KeyCode::Char('k') => Action::CursorUp,
            KeyCode::Down | KeyCode::Char('j') => Action::CursorDown,
            KeyCode::Home | KeyCode::Char('g') => Action::CursorFirst,
            KeyCode::End | KeyCode::Char('G') => Action::CursorLast,
            KeyCode::Char('c') => Action::CursorToCurrent,
            KeyCode::Enter | KeyCode::Char(' ') => Action::Pick,
            KeyCode::Char('r') => Action::Refresh,
            KeyCode::Char(']') | KeyCode::Tab => Action::NextScreen,
            KeyCode::Char('[') | KeyCode::BackTab => Action::PrevScreen,
            _ => return None,
        };
        Some(action)
    }

    pub fn dispatch(&mut self, action: Action, now: Instant) {
        match action {
            Action::CursorUp => self.cursor = self.cursor.saturating_sub(1),
            Action::CursorDown => {
                if self.cursor + 1 < self.snapshot.len() {
                    self.cursor += 1;
                }
            }
            Action::CursorFirst => self.cursor = 0,
            Action::CursorLast => self.cursor = self.snapshot.len().saturating_sub(1),
            Action::CursorToCurrent => self.cursor_to_current(),
            Action::Pick => self.pick(now),
            Action::Refresh => {
                self.catalog.request_refresh();
                self.status = Some("refreshing catalog".to_string());
            }
            Action::NextScreen => self.switch_screen(1),
            Action::PrevScreen => self.switch_screen(-1),
            Action::Quit => self.should_quit = true,
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn pick(&mut self, now: Instant) {
        let Some(id) = self
            .snapshot
            .entries()
            .get(self.cursor)
            .map(|d| d.id.clone())
        else {
            return;
        };
        if !self.connected {
            self.status = Some("offline: pick not sent".to_string());
            return;
        }
        let view = &mut self.views[self.active];
        match view.reconciler.pick(&id) {
            Ok(Some(outbound)) => {
                info!("[{}] pick '{}'", view.screen(), id);
                self.channel.emit(outbound);
                view.intent.want(Some(id), now);
                view.last_change = Some(Local::now());
                self.status = None;
            }
            Ok(None) => {
                self.status = Some(format!("screen {} already shows '{}'", view.screen(), id));
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    fn switch_screen(&mut self, delta: isize) {
        let len = self.views.len() as isize;
        self.active = (self.active as isize + delta).rem_euclid(len) as usize;
        self.status = None;
        self.cursor_to_current();
        let view = &self.views[self.active];
        debug!("switched to screen {}", view.screen());
        self.channel.emit(view.reconciler.request_current());
    }

    fn cursor_to_current(&mut self) {
        if let Some(pos) = self
            .active_view()
            .current()
            .and_then(|id| self.snapshot.position(id))
        {
            self.cursor = pos;
        } else {
            self.cursor = self.cursor.min(self.snapshot.len().saturating_sub(1));
        }
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Event>(1024);

        // Poll so the reader notices the app has gone and stops.
        tokio::task::spawn_blocking(move || loop {
            match event::poll(Duration::from_millis(250)) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.blocking_send(ev).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) if tx.is_closed() => break,
                Ok(false) => {}
                Err(_) => break,
            }
        });

        let mut events = self.channel.subscribe(&[
            events::CONNECT,
            events::DISCONNECT,
            events::CHANGE_URL,
            events::CURRENT_URL_STATE,
            events::CURRENT_URL_STATES,
            events::ERROR,
        ]);
        let mut catalog_rx = self.catalog.subscribe();
        let mut errors_rx = self.catalog.errors();

        let mut ui_tick = tokio::time::interval(UI_TICK);
        ui_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let initial = catalog_rx.borrow_and_update().clone();
        self.on_catalog(initial);
        self.on_catalog_error(errors_rx.borrow_and_update().clone());
        if self.channel.state().is_connected() {
            self.on_channel_event(&ChannelEvent::Connected);
        }

        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                let now = Instant::now();
                terminal.draw(|f| ui::draw(f, self, now))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(ev) = rx.recv() => {
                    needs_redraw = self.on_terminal_event(ev);
                }
                Some(event) = events.recv() => {
                    needs_redraw = self.on_channel_event(&event);
                }
                Ok(()) = catalog_rx.changed() => {
                    let snapshot = catalog_rx.borrow_and_update().clone();
                    self.on_catalog(snapshot);
                    needs_redraw = true;
                }
                Ok(()) = errors_rx.changed() => {
                    let error = errors_rx.borrow_and_update().clone();
                    self.on_catalog_error(error);
                    needs_redraw = true;
                }
                _ = ui_tick.tick() => {
                    needs_redraw = self.tick(Instant::now());
                }
            }
        }
        info!("remote closing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use springboard_proto::catalog::Destination;
    use springboard_proto::protocol::{Outbound, ScreenStates, SelectionPayload};
    use tokio::sync::watch;

    fn catalog(ids: &[&str]) -> Arc<Catalog> {
        Arc::new(Catalog::new(
            ids.iter()
                .map(|id| Destination::new(*id, id.to_uppercase(), format!("https://{id}.test")))
                .collect(),
        ))
    }

    fn state_for(screen: &str, id: &str) -> ChannelEvent {
        ChannelEvent::CurrentUrlState(SelectionPayload::Scoped {
            id: id.to_string(),
            screen: Some(ScreenId::new(screen)),
        })
    }

    struct Harness {
        app: App,
        channel: Channel,
        out: mpsc::UnboundedReceiver<Outbound>,
        catalog_tx: watch::Sender<Arc<Catalog>>,
        refresh_rx: mpsc::UnboundedReceiver<()>,
    }

    impl Harness {
        fn new(screens: &[&str], ids: &[&str]) -> Self {
            let (channel, out) = Channel::loopback();
            let (handle, catalog_tx, refresh_rx) = CatalogHandle::manual(catalog(ids));
            let screens = screens.iter().map(|s| ScreenId::new(*s)).collect();
            let app = App::new(screens, channel.clone(), handle);
            Self {
                app,
                channel,
                out,
                catalog_tx,
                refresh_rx,
            }
        }

        fn connect(&mut self) {
            self.channel.dispatch(ChannelEvent::Connected);
            self.app.on_channel_event(&ChannelEvent::Connected);
        }

        fn sent(&mut self) -> Vec<Outbound> {
            std::iter::from_fn(|| self.out.try_recv().ok()).collect()
        }

        fn key(&mut self, code: KeyCode) {
            let action = self
                .app
                .handle_key(KeyEvent::new(code, KeyModifiers::NONE))
                .expect("bound key");
            self.app.dispatch(action, Instant::now());
        }
    }

    #[tokio::test]
    async fn test_connect_requests_every_screen_and_refreshes() {
        let mut h = Harness::new(&["A", "B"], &["x"]);
        h.connect();
        assert_eq!(
            h.sent(),
            vec![
                Outbound::RequestCurrentUrl {
                    screen: Some(ScreenId::new("A"))
                },
                Outbound::RequestCurrentUrl {
                    screen: Some(ScreenId::new("B"))
                },
            ]
        );
        assert!(h.refresh_rx.try_recv().is_ok());
        assert!(h.app.is_connected());
    }

    #[tokio::test]
    async fn test_pick_emits_scoped_change_and_waits_for_echo() {
        let mut h = Harness::new(&["B"], &["x", "y"]);
        h.connect();
        h.sent();

        h.key(KeyCode::Down);
        h.key(KeyCode::Enter);
        assert_eq!(
            h.sent(),
            vec![Outbound::ChangeUrl {
                id: "y".into(),
                screen: ScreenId::new("B"),
            }]
        );
        assert_eq!(h.app.active_view().current(), Some("y"));
        assert!(h.app.active_view().intent.is_waiting());

        assert!(h.app.on_channel_event(&state_for("B", "y")));
        assert_eq!(h.app.active_view().intent, Intent::Settled(Some("y".into())));
    }

    #[tokio::test]
    async fn test_repick_of_current_sends_nothing() {
        let mut h = Harness::new(&["A"], &["x", "y"]);
        h.connect();
        h.app.on_channel_event(&state_for("A", "x"));
        h.sent();

        h.key(KeyCode::Char('c'));
        h.key(KeyCode::Enter);
        assert!(h.sent().is_empty());
        assert!(h.app.status().unwrap().contains("already shows"));
    }

    #[tokio::test]
    async fn test_offline_pick_is_refused() {
        let mut h = Harness::new(&["A"], &["x"]);
        h.key(KeyCode::Enter);
        assert!(h.sent().is_empty());
        assert_eq!(h.app.active_view().current(), None);
        assert_eq!(h.app.status(), Some("offline: pick not sent"));
    }

    #[tokio::test]
    async fn test_pick_before_catalog_is_rejected() {
        let mut h = Harness::new(&["A"], &[]);
        h.connect();
        h.sent();
        h.key(KeyCode::Enter);
        assert!(h.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_pick_times_out() {
        let mut h = Harness::new(&["A"], &["x"]);
        h.connect();
        h.key(KeyCode::Enter);
        assert!(h.app.tick(Instant::now()));

        tokio::time::advance(crate::intent::CONFIRM_TIMEOUT).await;
        assert!(h.app.tick(Instant::now()));
        assert!(matches!(
            h.app.active_view().intent,
            Intent::Unconfirmed { .. }
        ));
        assert!(!h.app.tick(Instant::now()));
    }

    #[tokio::test]
    async fn test_each_screen_tracks_its_own_selection() {
        let mut h = Harness::new(&["A", "B"], &["x", "y", "z"]);
        h.connect();
        let states: ScreenStates = [
            ("A".to_string(), "x".to_string()),
            ("B".to_string(), "z".to_string()),
        ]
        .into_iter()
        .collect();
        h.app.on_channel_event(&ChannelEvent::CurrentUrlStates(states));
        h.sent();

        assert_eq!(h.app.active_view().current(), Some("x"));
        h.key(KeyCode::Char(']'));
        assert_eq!(h.app.active_view().screen().as_str(), "B");
        assert_eq!(h.app.cursor(), 2);
        assert_eq!(
            h.sent(),
            vec![Outbound::RequestCurrentUrl {
                screen: Some(ScreenId::new("B"))
            }]
        );

        h.app.on_channel_event(&state_for("A", "y"));
        assert_eq!(h.app.views()[0].current(), Some("y"));
        assert_eq!(h.app.active_view().current(), Some("z"));

        h.key(KeyCode::Char('['));
        h.key(KeyCode::Char('['));
        assert_eq!(h.app.active_index(), 1);
    }

    #[tokio::test]
    async fn test_catalog_update_keeps_cursor_on_destination() {
        let mut h = Harness::new(&["A"], &["x", "y", "z"]);
        h.key(KeyCode::End);
        assert_eq!(h.app.cursor(), 2);

        h.catalog_tx.send_replace(catalog(&["z", "x"]));
        h.app.on_catalog(h.catalog_tx.borrow().clone());
        assert_eq!(h.app.cursor(), 0);

        h.app.on_catalog(catalog(&["q"]));
        assert_eq!(h.app.cursor(), 0);
    }

    #[tokio::test]
    async fn test_pending_selection_resolves_when_catalog_arrives() {
        let mut h = Harness::new(&["A"], &[]);
        h.connect();
        h.app.on_channel_event(&state_for("A", "y"));
        assert_eq!(h.app.active_view().current(), None);

        h.app.on_catalog(catalog(&["x", "y"]));
        assert_eq!(h.app.active_view().current(), Some("y"));
        assert_eq!(h.app.cursor(), 1);
        assert!(h.app.active_view().last_change.is_some());
    }

    #[tokio::test]
    async fn test_server_error_shows_in_status() {
        let mut h = Harness::new(&["A"], &["x"]);
        h.app
            .on_channel_event(&ChannelEvent::Error(serde_json::json!("nope")));
        assert!(h.app.status().unwrap().contains("nope"));
        h.app.on_catalog_error(Some("catalog request failed".into()));
        assert_eq!(h.app.catalog_error(), Some("catalog request failed"));
    }

    #[test]
    fn test_key_bindings() {
        let (channel, _out) = Channel::loopback();
        let (handle, _tx, _rx) = CatalogHandle::manual(catalog(&[]));
        let app = App::new(vec![], channel, handle);
        let press = |code| app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));

        assert_eq!(press(KeyCode::Char('q')), Some(Action::Quit));
        assert_eq!(press(KeyCode::Char('r')), Some(Action::Refresh));
        assert_eq!(press(KeyCode::Tab), Some(Action::NextScreen));
        assert_eq!(press(KeyCode::Char('x')), None);
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
        assert_eq!(app.active_view().screen(), &ScreenId::default());
    }
}
