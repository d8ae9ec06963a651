use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use tokio::time::Instant;

use crate::app::App;
use crate::intent::Hint;
use crate::theme::*;

const HELP: &str = " ↑↓ move  enter pick  [ ] screen  c current  r refresh  q quit";

pub fn draw(frame: &mut Frame, app: &App, now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(Paragraph::new(header_line(app)), rows[0]);
    draw_catalog(frame, app, now, rows[1]);
    frame.render_widget(Paragraph::new(footer_line(app)), rows[2]);
}

fn header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, view) in app.views().iter().enumerate() {
        let style = if i == app.active_index() {
            style_tab_active()
        } else {
            style_secondary()
        };
        spans.push(Span::styled(format!(" {} ", view.screen()), style));
    }
    spans.push(Span::raw("  "));
    if app.is_connected() {
        spans.push(Span::styled("● online", style_live()));
    } else {
        spans.push(Span::styled("○ offline", style_error()));
    }
    if let Some(at) = app.active_view().last_change {
        spans.push(Span::styled(
            format!("  changed {}", at.format("%H:%M:%S")),
            style_muted(),
        ));
    }
    Line::from(spans)
}

fn draw_catalog(frame: &mut Frame, app: &App, now: Instant, area: Rect) {
    let view = app.active_view();
    let catalog = app.snapshot();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border())
        .title(format!(
            " screen {} · {} destinations ",
            view.screen(),
            catalog.len()
        ));

    if catalog.is_empty() {
        frame.render_widget(
            Paragraph::new(Span::styled(" waiting for catalog…", style_muted())).block(block),
            area,
        );
        return;
    }

    let live = view.current();
    let picked = view.intent.wanted().as_deref();
    let hint = view.intent.hint(now);

    let items: Vec<ListItem> = catalog
        .entries()
        .iter()
        .map(|dest| {
            let id = Some(dest.id.as_str());
            let (marker, style) = if live == id && picked == id {
                match hint {
                    Hint::Plain => ("▶ ", style_live()),
                    Hint::PulseOn => ("◆ ", style_waiting()),
                    Hint::PulseOff => ("◇ ", style_waiting()),
                    Hint::Stale => ("? ", style_error()),
                }
            } else if live == id {
                ("▶ ", style_live())
            } else {
                ("  ", style_default())
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, style),
                Span::styled(dest.label().to_string(), style),
                Span::styled(format!("  {}", dest.address), style_muted()),
            ]))
        })
        .collect();

    let list = List::new(items).block(block).highlight_style(style_cursor());
    let mut state = ListState::default();
    state.select(Some(app.cursor()));
    frame.render_stateful_widget(list, area, &mut state);
}

fn footer_line(app: &App) -> Line<'static> {
    if let Some(err) = app.catalog_error() {
        return Line::from(Span::styled(format!(" catalog: {err}"), style_error()));
    }
    if let Some(status) = app.status() {
        return Line::from(Span::styled(format!(" {status}"), style_waiting()));
    }
    Line::from(Span::styled(HELP, style_muted()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};
    use springboard_proto::catalog::{Catalog, CatalogHandle, Destination};
    use springboard_proto::channel::Channel;
    use springboard_proto::protocol::{ChannelEvent, ScreenId, SelectionPayload};
    use std::sync::Arc;

    fn render(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(70, 8)).unwrap();
        terminal.draw(|f| draw(f, app, Instant::now())).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[tokio::test]
    async fn test_draws_catalog_with_live_marker() {
        let (channel, _out) = Channel::loopback();
        let catalog = Arc::new(Catalog::new(vec![
            Destination::new("x", "Lobby", "https://x.test"),
            Destination::new("y", "Gallery", "https://y.test"),
        ]));
        let (handle, _tx, _rx) = CatalogHandle::manual(catalog);
        let mut app = App::new(vec![ScreenId::new("B")], channel, handle);
        app.on_channel_event(&ChannelEvent::CurrentUrlState(SelectionPayload::Scoped {
            id: "y".into(),
            screen: Some(ScreenId::new("B")),
        }));

        let screen = render(&app);
        assert!(screen.contains("offline"));
        assert!(screen.contains("screen B · 2 destinations"));
        assert!(screen.contains("▶ Gallery"));
        assert!(screen.contains("enter pick"));
    }

    #[tokio::test]
    async fn test_empty_catalog_and_error_line() {
        let (channel, _out) = Channel::loopback();
        let (handle, _tx, _rx) = CatalogHandle::manual(Arc::new(Catalog::default()));
        let mut app = App::new(vec![], channel, handle);
        app.on_catalog_error(Some("HTTP 500".into()));

        let screen = render(&app);
        assert!(screen.contains("waiting for catalog"));
        assert!(screen.contains("catalog: HTTP 500"));
    }
}
