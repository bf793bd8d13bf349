use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, InputMode, OutputPanel, View};
use crate::model::{Endpoint, LoadScope, REGIONS, ResourceKind};
use crate::tunnel::{Exposure, Tunnel};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);
const PL_E: Color = Color::Rgb(13, 148, 136);
const PL_F: Color = Color::Rgb(88, 28, 135);

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if let Some(output) = app.output() {
        render_output(frame, root[1], output);
    }
    if app.show_regions() {
        render_region_picker(frame, app);
    }
    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let left_line = build_left_header_line(app);
    if area.width < 42 {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let right_line = build_right_header_line(app);
    let right_width = spans_width(&right_line.spans) as u16;
    if right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line).style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn build_left_header_line(app: &App) -> Line<'static> {
    let active_view = match app.view() {
        View::Tunnels => "󰛳 tunnels".to_string(),
        View::Resources => format!(
            "{} {}",
            kind_icon(app.active_kind()),
            breadcrumb(app)
        ),
    };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " VAWS ", Color::Black, ACCENT, PL_A);
    push_powerline_segment(
        &mut spans,
        format!(" 󰀄 {} ", compact_text(app.profile(), 14)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰖟 {} ", compact_text(app.region(), 14)),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {} ", scope_badge(app.scope())),
        Color::White,
        PL_C,
        PL_D,
    );
    push_powerline_segment(
        &mut spans,
        format!(
            " 󰈲 {} ",
            compact_text(
                if app.filter().is_empty() {
                    "-"
                } else {
                    app.filter()
                },
                14,
            )
        ),
        Color::White,
        PL_D,
        PL_F,
    );
    if let Some(badge) = tunnel_badge(app) {
        push_powerline_segment(
            &mut spans,
            format!(" {active_view} "),
            Color::White,
            PL_F,
            PL_E,
        );
        push_powerline_segment(
            &mut spans,
            format!(" {} ", compact_text(&badge, 20)),
            Color::White,
            PL_E,
            BG,
        );
    } else {
        push_powerline_segment(
            &mut spans,
            format!(" {active_view} "),
            Color::White,
            PL_F,
            BG,
        );
    }

    Line::from(spans)
}

fn build_right_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    let mut next_bg = BG;
    for (index, kind) in app.kinds().iter().enumerate() {
        let active = app.view() == View::Resources && index == app.active_kind_index();
        let bg = if active {
            Color::Rgb(59, 130, 246)
        } else {
            Color::Rgb(30, 41, 59)
        };
        let fg = if active { Color::Black } else { Color::White };
        let label = if active {
            format!("◉{}", kind.short_token())
        } else {
            kind.short_token().to_string()
        };
        push_powerline_segment_rtl(&mut spans, label, fg, bg, next_bg);
        next_bg = bg;
    }
    if !spans.is_empty() {
        spans.push(Span::styled(" ", Style::default().bg(next_bg)));
    }
    Line::from(spans)
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    app.set_table_page_size(table_rows_visible(area));

    if app.view() == View::Tunnels {
        render_tunnels(frame, area, app);
        return;
    }

    if app.show_details() && app.active_selected_row().is_some() {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);
        render_table(frame, chunks[0], app, false);
        render_detail(frame, chunks[1], app, true);
    } else {
        render_table(frame, area, app, true);
    }
}

fn render_table(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let kind = app.active_kind();
    if let Some(error) = app.active_table().and_then(|table| table.error.as_deref()) {
        let panel = Paragraph::new(Text::from(error.to_string()))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(format!("{} Error", kind.title()))
                    .borders(Borders::ALL)
                    .border_style(if focused {
                        Style::default().fg(ERROR)
                    } else {
                        Style::default().fg(MUTED)
                    })
                    .style(Style::default().bg(PANEL)),
            )
            .style(Style::default().fg(ERROR));
        frame.render_widget(panel, area);
        return;
    }

    let headers = kind.headers();
    let visible_rows = app.active_visible_rows();

    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(header.to_string()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = visible_rows.iter().map(|row| {
        let private = row.endpoints.iter().any(Endpoint::is_private);
        Row::new(row.columns.iter().enumerate().map(|(index, column)| {
            let color = if index == 0 && private {
                Color::Rgb(125, 211, 252)
            } else {
                status_color(column)
            };
            Cell::from(column.clone()).style(Style::default().fg(color))
        }))
    });

    let loading = app.active_table().is_some_and(|table| table.loading);
    let scope = match app.drill_path().last() {
        Some(level) => LoadScope::Parent(level.parent_name.clone()),
        None => app.scope().clone(),
    };
    let title = if loading {
        format!(
            "{} ({}) {} loading…",
            kind.title(),
            visible_rows.len(),
            scope_badge(&scope)
        )
    } else {
        format!(
            "{} ({}) {}",
            kind.title(),
            visible_rows.len(),
            scope_badge(&scope)
        )
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL));

    let table = Table::new(rows, column_constraints(headers.len()))
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(app.active_selected_index());
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_detail(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let Some(row) = app.active_selected_row() else {
        return;
    };
    let block = Block::default()
        .title(format!("{} {}", app.active_kind().title(), row.name))
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL));
    let paragraph = Paragraph::new(highlight_detail_text(&row.detail_text()))
        .block(block)
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_tunnels(frame: &mut Frame, area: Rect, app: &App) {
    let headers = ["Id", "Target", "Local", "Remote", "Route", "State", "Since"];
    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(header.to_string()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = app.tunnels().iter().map(|tunnel| {
        Row::new(
            tunnel_columns(tunnel)
                .into_iter()
                .map(|column| Cell::from(column).style(Style::default().fg(Color::White))),
        )
    });

    let title = match app.pending_tunnel() {
        Some(label) => format!(
            "Tunnels ({}) 󰔟 resolving jump host for {}",
            app.tunnels().len(),
            compact_text(label, 24)
        ),
        None => format!("Tunnels ({})", app.tunnels().len()),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(5),
            Constraint::Percentage(30),
            Constraint::Length(16),
            Constraint::Length(7),
            Constraint::Percentage(25),
            Constraint::Length(9),
            Constraint::Length(9),
        ],
    )
    .header(header_row)
    .block(block)
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(24, 36, 58))
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(app.selected_tunnel_index());
    frame.render_stateful_widget(table, area, &mut state);
}

fn tunnel_columns(tunnel: &Tunnel) -> Vec<String> {
    let exposure = match &tunnel.target.exposure {
        Exposure::Public => "",
        Exposure::Http(_) => " 󰖟",
        Exposure::Private { .. } => " 󰌾",
        Exposure::Container { .. } => " 󰡨",
    };
    vec![
        tunnel.id.to_string(),
        format!("{}{exposure}", compact_text(&tunnel.target.label, 28)),
        tunnel.local_addr(),
        tunnel.remote_port.to_string(),
        compact_text(&tunnel.route_label(), 32),
        tunnel.state.label().to_string(),
        tunnel.created_at.format("%H:%M:%S").to_string(),
    ]
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    if matches!(app.mode(), InputMode::Normal) {
        let status_text = app.status().to_string();
        let status_icon = footer_status_icon(&status_text);
        let mut spans = Vec::new();
        push_powerline_segment(&mut spans, " 󰘳 nrm ", Color::White, PL_A, PL_B);
        let status_width_hint = area.width.saturating_sub(24).min(120) as usize;
        push_powerline_segment(
            &mut spans,
            format!(
                " {status_icon} {} ",
                compact_text(&status_text, status_width_hint.max(24))
            ),
            Color::White,
            PL_B,
            BG,
        );

        let right_spans = build_footer_glance_spans(app);
        let min_left = 28u16;
        let max_right = area.width.saturating_sub(min_left);
        let right_width = (spans_width(&right_spans) as u16).min(max_right);
        if right_spans.is_empty() || right_width == 0 {
            frame.render_widget(
                Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
                area,
            );
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(1), Constraint::Length(right_width)])
            .split(area);
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            chunks[0],
        );
        frame.render_widget(
            Paragraph::new(Line::from(right_spans))
                .style(Style::default().bg(BG))
                .alignment(Alignment::Right),
            chunks[1],
        );
        return;
    }

    let (label, prompt, prompt_bg) = match app.mode() {
        InputMode::Filter => (" 󰈲 flt ", format!("/{}", app.input()), WARN),
        InputMode::Command | InputMode::Normal => {
            (" 󰘳 cmd ", format!(":{}", app.input()), ACCENT)
        }
    };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, label, Color::Black, prompt_bg, PL_B);
    push_powerline_segment(&mut spans, format!(" {prompt} "), Color::White, PL_B, BG);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn build_footer_glance_spans(app: &App) -> Vec<Span<'static>> {
    let mut segments = Vec::new();
    if let Some(table) = app.active_table() {
        if table.loading {
            segments.push((" 󰔟 loading ".to_string(), Color::Black, WARN));
        } else if let Some(refreshed) = app.active_last_refresh() {
            segments.push((format!(" 󰑓 {refreshed} "), Color::White, PL_C));
        }
    }
    let (in_flight, capacity) = app.load_pressure();
    if in_flight > 0 {
        segments.push((format!(" 󰓅 {in_flight}/{capacity} "), Color::Black, WARN));
    }
    if let Some(source) = app.tailing() {
        segments.push((
            format!(" 󰦪 {} ", compact_text(&source.group, 24)),
            Color::White,
            PL_D,
        ));
    }
    segments.push((
        format!(" 󰛳 {} ", app.tunnels().len()),
        Color::White,
        PL_E,
    ));

    let mut spans = Vec::new();
    let mut next_bg = BG;
    for (content, fg, bg) in segments {
        push_powerline_segment_rtl(&mut spans, content, fg, bg, next_bg);
        next_bg = bg;
    }
    spans
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = [
        "failed",
        "error",
        "timed out",
        "timeout",
        "unreachable",
        "refused",
        "denied",
        "in use",
    ]
    .iter()
    .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn highlight_detail_text(input: &str) -> Text<'static> {
    Text::from(input.lines().map(highlight_detail_line).collect::<Vec<_>>())
}

fn highlight_detail_line(line: &str) -> Line<'static> {
    let Some((key, value)) = line.split_once(':').filter(|(key, _)| !key.contains(' ')) else {
        return Line::from(Span::styled(
            line.to_string(),
            Style::default().fg(Color::White),
        ));
    };
    Line::from(vec![
        Span::styled(
            key.to_string(),
            Style::default().fg(Color::Rgb(103, 232, 249)),
        ),
        Span::styled(":", Style::default().fg(MUTED)),
        Span::raw(" "),
        Span::styled(
            value.trim_start().to_string(),
            Style::default().fg(detail_value_color(value.trim())),
        ),
    ])
}

fn detail_value_color(value: &str) -> Color {
    if matches!(value, "true" | "false" | "-") {
        WARN
    } else if value.parse::<f64>().is_ok() {
        Color::Rgb(251, 146, 60)
    } else {
        status_color(value)
    }
}

fn status_color(value: &str) -> Color {
    let upper = value.to_ascii_uppercase();
    if upper.contains("FAILED") || upper.contains("ROLLBACK") || upper.contains("INACTIVE") {
        ERROR
    } else if upper.ends_with("_IN_PROGRESS") || upper == "UPDATING" || upper == "PENDING" {
        WARN
    } else if upper.ends_with("_COMPLETE") || upper == "ACTIVE" {
        ACCENT
    } else {
        Color::White
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(78, 72, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "vaws help  mode:{}  scope:{}  tab:{}",
            help_mode_label(app.mode()),
            app.scope().label(),
            app.active_kind().title()
        )),
        Line::from(""),
    ];
    for line in contextual_help_lines(app) {
        lines.push(Line::from(line));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn contextual_help_lines(app: &App) -> Vec<String> {
    let mut lines = vec![
        "Flow: Enter scope to stack / open children / toggle details  Esc step-back  d details"
            .to_string(),
        "Move: j/k  g g/G top/bottom  Ctrl+u/d page  h/l or ←/→ switch tab".to_string(),
        "Input: : command  / filter  r refresh  o output  ? close help  q quit".to_string(),
        "Kinds: :stack  :sqs  :fn  :ecs  :api  :ddb".to_string(),
        "Scope: :stack <name>  :unscope  R or :region [code]".to_string(),
        String::new(),
    ];

    if app.view() == View::Tunnels {
        lines.push("Tunnels view active".to_string());
        lines.push("Keys: j/k select  x stop selected  t or Esc back to resources".to_string());
        lines.push("Commands: :stop <id>".to_string());
        return lines;
    }

    lines.push(format!(
        "Selected resource: {} (alias: {})",
        app.active_kind().title(),
        app.active_kind().short_token()
    ));
    lines.push(
        "Tunnels: p prompt  :tunnel [local-port] [endpoint]  :via <jump-host> [local-port]  t list"
            .to_string(),
    );
    match app.active_kind() {
        ResourceKind::Functions => {
            lines.push("Actions: :invoke [json]  :logs  :tail (Esc stops)".to_string());
        }
        ResourceKind::Tables => {
            lines.push("Actions: :scan [limit]  :query [key=]value  :more".to_string());
        }
        ResourceKind::Tasks => {
            lines.push("Actions: :logs  :tail  :tunnel [local-port] <container:port>".to_string());
        }
        ResourceKind::Clusters | ResourceKind::Services | ResourceKind::Apis => {
            lines.push("Enter lists the selected row's children".to_string());
        }
        _ => {}
    }
    if app.pending_tunnel().is_some() {
        lines.push("A jump host lookup is running: Esc cancels it".to_string());
    }
    lines
}

fn help_mode_label(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Normal => "normal",
        InputMode::Filter => "filter",
        InputMode::Command => "command",
    }
}

fn table_rows_visible(area: Rect) -> usize {
    area.height.saturating_sub(3).max(1) as usize
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn scope_badge(scope: &LoadScope) -> String {
    match scope {
        LoadScope::All => "󰕰 all".to_string(),
        LoadScope::Stack(stack) => format!("󰆧 {}", compact_text(stack, 18)),
        LoadScope::Parent(_) => format!("󰁔 {}", compact_text(&scope.label(), 18)),
    }
}

fn tunnel_badge(app: &App) -> Option<String> {
    if let Some(label) = app.pending_tunnel() {
        return Some(format!("󰔟 {label}"));
    }
    let tunnels = app.tunnels();
    match tunnels {
        [] => None,
        [only] => Some(format!("󰛳 {}", only.local_addr())),
        _ => Some(format!("󰛳 {} tunnels", tunnels.len())),
    }
}

fn kind_icon(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Stacks => "󰆧",
        ResourceKind::Queues => "󰒍",
        ResourceKind::Functions => "󰘧",
        ResourceKind::Clusters => "󰠳",
        ResourceKind::Services => "󰒋",
        ResourceKind::Tasks => "󰐱",
        ResourceKind::Apis => "󰒓",
        ResourceKind::Stages => "󰛶",
        ResourceKind::Tables => "󰆼",
    }
}

/// Tab name followed by each drilled-into parent, e.g. `ecs › payments › api`.
fn breadcrumb(app: &App) -> String {
    let root = app
        .kinds()
        .get(app.active_kind_index())
        .copied()
        .unwrap_or(ResourceKind::Stacks);
    let mut parts = vec![root.title().to_ascii_lowercase()];
    parts.extend(
        app.drill_path()
            .iter()
            .map(|level| compact_text(&level.parent_name, 16)),
    );
    if let Some(level) = app.drill_path().last() {
        parts.push(level.kind.title().to_ascii_lowercase());
    }
    parts.join(" › ")
}

fn render_output(frame: &mut Frame, area: Rect, output: &OutputPanel) {
    frame.render_widget(Clear, area);
    let height = area.height.saturating_sub(2) as usize;
    let offset = output_offset(output, height);
    let block = Block::default()
        .title(format!(
            "{} ({} lines)  Esc close  j/k scroll  G follow",
            output.title,
            output.line_count()
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));
    let paragraph = Paragraph::new(highlight_detail_text(&output.body))
        .block(block)
        .style(Style::default().fg(Color::White))
        .scroll((offset.min(u16::MAX as usize) as u16, 0));
    frame.render_widget(paragraph, area);
}

fn output_offset(output: &OutputPanel, height: usize) -> usize {
    let last_page = output.line_count().saturating_sub(height.max(1));
    if output.follow {
        last_page
    } else {
        output.scroll.min(last_page)
    }
}

fn render_region_picker(frame: &mut Frame, app: &App) {
    let area = centered_rect(50, 70, frame.area());
    frame.render_widget(Clear, area);

    let rows = REGIONS.iter().map(|region| {
        let current = region.code == app.region();
        let marker = if current { "●" } else { " " };
        Row::new(vec![
            Cell::from(marker.to_string()).style(Style::default().fg(ACCENT)),
            Cell::from(region.code.to_string()),
            Cell::from(region.name.to_string()),
            Cell::from(region.group.to_string()).style(Style::default().fg(MUTED)),
        ])
    });
    let table = Table::new(
        rows,
        vec![
            Constraint::Length(1),
            Constraint::Length(15),
            Constraint::Min(12),
            Constraint::Length(13),
        ],
    )
    .block(
        Block::default()
            .title(format!("Region (now {})", app.region()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(ACCENT))
            .style(Style::default().bg(PANEL)),
    )
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(24, 36, 58))
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(Some(app.region_selected()));
    frame.render_stateful_widget(table, area, &mut state);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}
