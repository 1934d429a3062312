use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap},
};
use throbber_widgets_tui::{BRAILLE_SIX, Throbber, WhichUse};

use crate::app::{App, MENU};
use crate::model::{
    BrowserPane, ClusterPane, ClusterStatus, ItemKind, ItemRef, ProviderStatus, Screen, Severity,
};

fn highlight() -> Style {
    Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD)
}

fn pane_block(title: impl Into<String>, focused: bool) -> Block<'static> {
    let style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(title.into())
}

fn cluster_status_style(status: &ClusterStatus) -> Style {
    let color = match status {
        ClusterStatus::Online => Color::Green,
        ClusterStatus::Offline(_) => Color::Red,
        ClusterStatus::Timeout => Color::Yellow,
        ClusterStatus::Loading => Color::Gray,
    };
    Style::default().fg(color)
}

fn provider_status_style(status: &ProviderStatus) -> Style {
    let color = match status {
        ProviderStatus::Connected => Color::Green,
        ProviderStatus::Error(_) => Color::Red,
        ProviderStatus::Connecting => Color::Gray,
    };
    Style::default().fg(color)
}

/// Draw router
pub fn draw_ui(f: &mut Frame<'_>, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);
    match app.screen {
        Screen::MainMenu => draw_main_menu(f, app, chunks[1]),
        Screen::Clusters(pane) => draw_clusters(f, app, pane, chunks[1]),
        Screen::ClusterDetail => draw_cluster_detail(f, app, chunks[1]),
        Screen::Providers(pane) => draw_providers(f, app, pane, chunks[1]),
    }
    draw_footer(f, app, chunks[2]);

    if let Some(message) = &app.overlay {
        let area = centered_rect(60, 30, f.area());
        f.render_widget(Clear, area);
        let p = Paragraph::new(format!("{message}\n\nEsc: dismiss"))
            .wrap(Wrap { trim: true })
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Error")
                    .style(Style::default().bg(Color::Red)),
            );
        f.render_widget(p, area);
    }
}

fn draw_header(f: &mut Frame<'_>, app: &mut App, area: Rect) {
    let title = match app.screen {
        Screen::MainMenu => "MTV Dev Console".to_string(),
        Screen::Clusters(_) => format!("Clusters ({})", app.clusters.entries.len()),
        Screen::ClusterDetail => app
            .selected_cluster()
            .map(|c| format!("Cluster {}", c.name))
            .unwrap_or_else(|| "Cluster".to_string()),
        Screen::Providers(_) => format!("Providers ({})", app.providers.entries.len()),
    };
    let search = match app.screen {
        Screen::Clusters(_) => Some((&app.clusters.search, ItemKind::Cluster)),
        Screen::Providers(_) => Some((&app.providers.search, ItemKind::Vm)),
        _ => None,
    };
    let search_text = match search {
        Some((s, kind)) if s.typing => format!("  Search {kind}s: {}_", s.query),
        Some((s, kind)) if !s.query.is_empty() => format!("  Filter {kind}s: {}", s.query),
        _ => String::new(),
    };
    let header = Paragraph::new(format!("{title}{search_text}"))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);

    if app.is_loading() {
        let throbber = Throbber::default()
            .label(" Loading...")
            .style(Style::default().fg(Color::Yellow))
            .throbber_set(BRAILLE_SIX)
            .use_type(WhichUse::Spin);
        let spinner = Rect {
            x: area.right().saturating_sub(16),
            y: area.y + 1,
            width: 14.min(area.width),
            height: 1,
        };
        f.render_stateful_widget(throbber, spinner, &mut app.throbber_state);
    }
}

fn draw_footer(f: &mut Frame<'_>, app: &App, area: Rect) {
    let (text, style) = match &app.notification {
        Some(n) => {
            let color = match n.severity {
                Severity::Info => Color::Green,
                Severity::Error => Color::Red,
            };
            (n.text.clone(), Style::default().fg(color))
        }
        None => {
            let help = match app.screen {
                Screen::MainMenu => "↑/↓ move  Enter select  Ctrl-R refresh all  q quit",
                Screen::Clusters(_) => {
                    "↑/↓ move  Tab pane  Enter open/copy  / search  Ctrl-R refresh  Ctrl-U refresh one  Esc back"
                }
                Screen::ClusterDetail => "↑/↓ move  Enter copy  Ctrl-U refresh  Esc back",
                Screen::Providers(_) => {
                    "↑/↓ move  PgUp/PgDn page  Tab pane  ←/→ config  Enter copy  / search  r refresh  Esc back"
                }
            };
            (help.to_string(), Style::default().fg(Color::DarkGray))
        }
    };
    let footer = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

fn draw_main_menu(f: &mut Frame<'_>, app: &App, area: Rect) {
    let online = app
        .clusters
        .entries
        .iter()
        .filter(|c| c.status == ClusterStatus::Online)
        .count();
    let connected = app
        .providers
        .entries
        .iter()
        .filter(|p| p.status == ProviderStatus::Connected)
        .count();
    let counts = [
        format!("{online}/{} online", app.clusters.entries.len()),
        format!("{connected}/{} connected", app.providers.entries.len()),
        String::new(),
    ];
    let items: Vec<ListItem> = MENU
        .iter()
        .zip(counts)
        .map(|(label, count)| {
            ListItem::new(Line::from(vec![
                Span::raw(format!("{label:<12}")),
                Span::styled(count, Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(pane_block("Menu", true))
        .highlight_style(highlight())
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.menu_index));
    f.render_stateful_widget(list, centered_rect(50, 50, area), &mut state);
}

fn draw_clusters(f: &mut Frame<'_>, app: &App, pane: ClusterPane, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let visible = app.visible_clusters();
    let rows: Vec<Row> = visible
        .iter()
        .map(|c| {
            let versions = c
                .info
                .as_ref()
                .map(|i| [i.ocp_version.clone(), i.mtv_version.clone(), i.cnv_version.clone()])
                .unwrap_or_default();
            let status = if app.clusters.is_refreshing(&c.name) {
                "Refreshing".to_string()
            } else {
                c.status.label().to_string()
            };
            let item = ItemRef::Cluster(*c);
            let name_style = if c.accessible() {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Row::new(vec![
                Cell::from(item.name().to_string()).style(name_style),
                Cell::from(status).style(cluster_status_style(&c.status)),
                Cell::from(versions[0].clone()),
                Cell::from(versions[1].clone()),
                Cell::from(versions[2].clone()),
            ])
        })
        .collect();
    let empty = if app.clusters.loading {
        "Loading clusters..."
    } else {
        "No clusters"
    };
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(30),
            Constraint::Percentage(16),
            Constraint::Percentage(18),
            Constraint::Percentage(18),
            Constraint::Percentage(18),
        ],
    )
    .header(Row::new(vec!["Name", "Status", "OCP", "MTV", "CNV"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(pane_block(
        if visible.is_empty() { empty } else { "Clusters" },
        pane == ClusterPane::List,
    ))
    .row_highlight_style(highlight());
    let mut state = TableState::default()
        .with_selected((!visible.is_empty()).then_some(app.clusters.selected));
    f.render_stateful_widget(table, cols[0], &mut state);

    let detail_focused = pane == ClusterPane::Detail;
    draw_detail_rows(
        f,
        app.selected_cluster()
            .map(|c| app.cluster_detail_rows(c))
            .unwrap_or_default(),
        detail_focused.then_some(app.clusters.detail_row),
        pane_block("Details", detail_focused),
        cols[1],
    );
}

fn draw_cluster_detail(f: &mut Frame<'_>, app: &App, area: Rect) {
    let rows = app
        .selected_cluster()
        .map(|c| app.cluster_detail_rows(c))
        .unwrap_or_default();
    draw_detail_rows(
        f,
        rows,
        Some(app.clusters.detail_row),
        pane_block("Details (Enter copies)", true),
        area,
    );
}

fn draw_detail_rows(
    f: &mut Frame<'_>,
    rows: Vec<(&'static str, String)>,
    selected: Option<usize>,
    block: Block<'static>,
    area: Rect,
) {
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|(label, value)| {
            Row::new(vec![
                Cell::from(label).style(Style::default().fg(Color::Cyan)),
                Cell::from(value),
            ])
        })
        .collect();
    let table = Table::new(rows, [Constraint::Length(10), Constraint::Min(10)])
        .block(block)
        .row_highlight_style(highlight());
    let mut state = TableState::default().with_selected(selected);
    f.render_stateful_widget(table, area, &mut state);
}

fn draw_providers(f: &mut Frame<'_>, app: &mut App, pane: BrowserPane, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(28),
            Constraint::Percentage(40),
            Constraint::Percentage(32),
        ])
        .split(area);

    // Providers, with the selected one's config tree inline when expanded.
    let mut items = Vec::new();
    let mut selected_line = 0;
    for (idx, p) in app.providers.entries.iter().enumerate() {
        let is_selected = idx == app.providers.selected;
        let marker = if is_selected && app.providers.expanded { "▾" } else { "▸" };
        if is_selected {
            selected_line = items.len();
        }
        items.push(ListItem::new(Line::from(vec![
            Span::raw(format!("{marker} {} ", ItemRef::Provider(p).name())),
            Span::styled(
                format!("[{}] {}", p.status.label(), p.vm_count),
                provider_status_style(&p.status),
            ),
        ])));
        if is_selected && app.providers.expanded {
            if let Some(cfg) = app.providers.configs.get(&p.name) {
                for (row, (label, value)) in cfg.tree_rows().into_iter().enumerate() {
                    let shown = if label == "Password" { "********".to_string() } else { value };
                    if row == app.providers.tree_row {
                        selected_line = items.len();
                    }
                    items.push(ListItem::new(format!("    {label}: {shown}")));
                }
            }
        }
    }
    let title = if app.providers.loading && app.providers.entries.is_empty() {
        "Loading providers..."
    } else {
        "Providers"
    };
    let list = List::new(items)
        .block(pane_block(title, pane == BrowserPane::Providers))
        .highlight_style(highlight());
    let mut state = ListState::default()
        .with_selected((!app.providers.entries.is_empty()).then_some(selected_line));
    f.render_stateful_widget(list, cols[0], &mut state);

    // Borders plus the header row.
    app.providers.viewport = cols[1].height.saturating_sub(3).max(1) as usize;
    let vms = app.visible_vms();
    let rows: Vec<Row> = vms
        .iter()
        .map(|vm| {
            let state_style = if vm.is_running() {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Row::new(vec![
                Cell::from(vm.name.clone()),
                Cell::from(vm.power_state.clone()).style(state_style),
                Cell::from(vm.ip_addresses.first().cloned().unwrap_or_default()),
            ])
        })
        .collect();
    let vm_title = match app.selected_provider() {
        Some(p) => format!("VMs of {} ({})", p.name, vms.len()),
        None => "VMs".to_string(),
    };
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(50),
            Constraint::Percentage(20),
            Constraint::Percentage(30),
        ],
    )
    .header(Row::new(vec!["Name", "State", "IP"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(pane_block(vm_title, pane == BrowserPane::Vms))
    .row_highlight_style(highlight());
    let mut state = TableState::default()
        .with_offset(app.providers.vm_offset)
        .with_selected((!vms.is_empty()).then_some(app.providers.vm_selected));
    f.render_stateful_widget(table, cols[1], &mut state);

    let details_focused = pane == BrowserPane::Details;
    draw_detail_rows(
        f,
        vms.get(app.providers.vm_selected)
            .map(|vm| vm.detail_rows())
            .unwrap_or_default(),
        details_focused.then_some(app.providers.detail_row),
        pane_block("VM details", details_focused),
        cols[2],
    );
}

/// Helper to center a rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use ratatui::{Terminal, backend::TestBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn render(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw_ui(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn main_menu_and_overlay_render() {
        let mut app = App::new(
            Arc::new(ResultCache::new()),
            Arc::new(ResultCache::new()),
            Duration::from_secs(3),
        );
        let screen = render(&mut app);
        assert!(screen.contains("Clusters"));
        assert!(screen.contains("Providers"));

        app.overlay = Some("no supported providers found".to_string());
        assert!(render(&mut app).contains("no supported providers"));
    }

    #[test]
    fn centered_rect_is_inside() {
        let outer = Rect::new(0, 0, 100, 50);
        let inner = centered_rect(60, 40, outer);
        assert_eq!(inner.width, 60);
        assert_eq!(inner.height, 20);
        assert_eq!(inner.x, 20);
    }
}
