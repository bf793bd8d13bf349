use crate::actions::{
    ActionOutcome, ActionRequest, DEFAULT_ITEM_LIMIT, ItemPage, ItemQuery, LOG_LOOKBACK,
};
use crate::input::Action;
use crate::loader::LoadReport;
use crate::model::{
    Batch, LoadScope, LogSource, REGIONS, ResourceDetail, ResourceKind, TableData,
    is_region_code,
};
use crate::tunnel::{
    PendingTunnelRequest, Tunnel, TunnelEvent, TunnelId, TunnelRequest, TunnelState,
    TunnelTarget,
};
use chrono::Local;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Command,
    Filter,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum View {
    Resources,
    Tunnels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Load {
        kind: ResourceKind,
        scope: LoadScope,
        generation: u64,
    },
    /// Point every later call at `region` and reload `kind` from scratch.
    SwitchRegion {
        region: String,
        kind: ResourceKind,
        generation: u64,
    },
    RunAction(ActionRequest),
    StartTunnel(TunnelRequest),
    StopTunnel(TunnelId),
    CancelPendingTunnel,
}

/// One step of a parent to child drill-down, e.g. cluster to services.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DrillLevel {
    pub kind: ResourceKind,
    pub parent_id: String,
    pub parent_name: String,
}

/// Text produced by an action on a row, shown over the table.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct OutputPanel {
    pub title: String,
    pub body: String,
    pub scroll: usize,
    /// Keep the newest lines in view.
    pub follow: bool,
}

impl OutputPanel {
    fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            scroll: 0,
            follow: false,
        }
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.body.is_empty() {
            self.body.push('\n');
        }
        self.body.push_str(text);
    }

    pub fn line_count(&self) -> usize {
        self.body.lines().count()
    }

    fn scroll_by(&mut self, delta: isize) {
        let max_index = self.line_count().saturating_sub(1) as isize;
        self.scroll = (self.scroll as isize)
            .saturating_add(delta)
            .clamp(0, max_index) as usize;
        self.follow = false;
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct LogTail {
    source: LogSource,
    cursor_ms: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct ItemCursor {
    query: ItemQuery,
    shown: usize,
}

pub struct App {
    running: bool,
    mode: InputMode,
    view: View,
    show_help: bool,
    show_details: bool,
    show_regions: bool,
    show_output: bool,
    pending_g: bool,
    active_kind_index: usize,
    region_selected: usize,
    tables: HashMap<ResourceKind, TableData>,
    scope: LoadScope,
    drill: Vec<DrillLevel>,
    filter: String,
    input: String,
    status: String,
    profile: String,
    region: String,
    tunnels: Vec<Tunnel>,
    tunnel_selected: usize,
    pending_tunnel: Option<(TunnelId, String)>,
    output: Option<OutputPanel>,
    tail: Option<LogTail>,
    items: Option<ItemCursor>,
    action_in_flight: bool,
    load_pressure: (usize, usize),
    next_generation: u64,
    table_page_size: usize,
}

impl App {
    pub fn new(profile: String, region: String) -> Self {
        let tables = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, TableData::default()))
            .collect::<HashMap<_, _>>();

        Self {
            running: true,
            mode: InputMode::Normal,
            view: View::Resources,
            show_help: false,
            show_details: false,
            show_regions: false,
            show_output: false,
            pending_g: false,
            active_kind_index: 0,
            region_selected: 0,
            tables,
            scope: LoadScope::All,
            drill: Vec::new(),
            filter: String::new(),
            input: String::new(),
            status: "Ready".to_string(),
            profile,
            region,
            tunnels: Vec::new(),
            tunnel_selected: 0,
            pending_tunnel: None,
            output: None,
            tail: None,
            items: None,
            action_in_flight: false,
            load_pressure: (0, 0),
            next_generation: 0,
            table_page_size: 10,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Kinds on the tab bar.
    pub fn kinds(&self) -> &'static [ResourceKind] {
        &ResourceKind::TABS
    }

    /// Kind of the table on screen: the deepest drill level, else the tab.
    pub fn active_kind(&self) -> ResourceKind {
        match self.drill.last() {
            Some(level) => level.kind,
            None => ResourceKind::TABS[self.active_kind_index.min(ResourceKind::TABS.len() - 1)],
        }
    }

    pub fn active_kind_index(&self) -> usize {
        self.active_kind_index
    }

    pub fn scope(&self) -> &LoadScope {
        &self.scope
    }

    pub fn drill_path(&self) -> &[DrillLevel] {
        &self.drill
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn show_details(&self) -> bool {
        self.show_details
    }

    pub fn show_regions(&self) -> bool {
        self.show_regions
    }

    pub fn region_selected(&self) -> usize {
        self.region_selected.min(REGIONS.len() - 1)
    }

    /// The output panel, when it is open.
    pub fn output(&self) -> Option<&OutputPanel> {
        self.output.as_ref().filter(|_| self.show_output)
    }

    pub fn tailing(&self) -> Option<&LogSource> {
        self.tail.as_ref().map(|tail| &tail.source)
    }

    pub fn load_pressure(&self) -> (usize, usize) {
        self.load_pressure
    }

    pub fn tunnels(&self) -> &[Tunnel] {
        &self.tunnels
    }

    pub fn selected_tunnel_index(&self) -> Option<usize> {
        (!self.tunnels.is_empty()).then(|| self.tunnel_selected.min(self.tunnels.len() - 1))
    }

    pub fn pending_tunnel(&self) -> Option<&str> {
        self.pending_tunnel
            .as_ref()
            .map(|(_, label)| label.as_str())
    }

    pub fn active_table(&self) -> Option<&TableData> {
        self.tables.get(&self.active_kind())
    }

    pub fn active_last_refresh(&self) -> Option<String> {
        self.active_table()
            .and_then(|table| table.last_refreshed)
            .map(|ts| ts.format("%H:%M:%S").to_string())
    }

    pub fn active_visible_rows(&self) -> Vec<&ResourceDetail> {
        self.visible_rows_for(self.active_kind())
    }

    pub fn active_selected_index(&self) -> Option<usize> {
        let len = self.active_visible_len();
        if len == 0 {
            return None;
        }
        self.active_table()
            .map(|table| table.selected.min(len.saturating_sub(1)))
    }

    pub fn active_selected_row(&self) -> Option<&ResourceDetail> {
        let index = self.active_selected_index()?;
        self.active_visible_rows().get(index).copied()
    }

    pub fn set_table_page_size(&mut self, rows: usize) {
        self.table_page_size = rows.max(1);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn set_load_pressure(&mut self, in_flight: usize, capacity: usize) {
        self.load_pressure = (in_flight, capacity);
    }

    /// Scope a load of `kind` runs under right now.
    fn load_scope_for(&self, kind: ResourceKind) -> LoadScope {
        match self.drill.iter().rev().find(|level| level.kind == kind) {
            Some(level) => LoadScope::Parent(level.parent_id.clone()),
            None => self.scope.clone(),
        }
    }

    /// Starts a fresh generation for `kind`. Batches tagged with older
    /// generations are ignored from now on.
    pub fn request_load(&mut self, kind: ResourceKind) -> AppCommand {
        let generation = self.begin_generation(kind);
        AppCommand::Load {
            kind,
            scope: self.load_scope_for(kind),
            generation,
        }
    }

    fn begin_generation(&mut self, kind: ResourceKind) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(table) = self.tables.get_mut(&kind) {
            table.begin_load(generation);
        }
        generation
    }

    pub fn apply_batch(
        &mut self,
        kind: ResourceKind,
        generation: u64,
        batch: Batch<ResourceDetail>,
    ) -> bool {
        let selected_id = self.selected_row_id_for(kind);
        let Some(table) = self.tables.get_mut(&kind) else {
            return false;
        };
        if table.generation != generation {
            return false;
        }
        table.apply_batch(batch, Local::now());

        let restored = selected_id.and_then(|id| {
            self.visible_rows_for(kind)
                .iter()
                .position(|row| row.id == id)
        });
        if let Some(index) = restored
            && let Some(table) = self.tables.get_mut(&kind)
        {
            table.selected = index;
        }
        self.clamp_selection_for(kind);
        true
    }

    pub fn finish_load(&mut self, kind: ResourceKind, generation: u64, report: LoadReport) {
        let Some(table) = self.tables.get_mut(&kind) else {
            return;
        };
        if table.generation != generation {
            return;
        }
        table.finish_load();
        if kind == self.active_kind() {
            let mut status = format!(
                "Loaded {} {} ({})",
                report.items,
                kind.title(),
                self.load_scope_for(kind).label()
            );
            if report.dropped > 0 {
                status.push_str(&format!(", {} failed to load", report.dropped));
            }
            self.set_status(status);
        }
    }

    pub fn fail_load(&mut self, kind: ResourceKind, generation: u64, error: &str) {
        let Some(table) = self.tables.get_mut(&kind) else {
            return;
        };
        if table.generation != generation {
            return;
        }
        table.set_error(error, Local::now());
        if kind == self.active_kind() {
            self.set_status(format!(
                "{} load failed: {}",
                kind.title(),
                summarize_error_line(error)
            ));
        }
    }

    pub fn set_tunnels(&mut self, tunnels: Vec<Tunnel>) {
        self.tunnels = tunnels;
        self.tunnel_selected = self
            .tunnel_selected
            .min(self.tunnels.len().saturating_sub(1));
    }

    pub fn apply_tunnel_event(&mut self, event: &TunnelEvent) {
        match event.state {
            TunnelState::ResolvingJumpHost => {
                self.pending_tunnel = Some((event.id, event.label.clone()));
            }
            TunnelState::Idle => {}
            _ => {
                if self
                    .pending_tunnel
                    .as_ref()
                    .is_some_and(|(id, _)| *id == event.id)
                {
                    self.pending_tunnel = None;
                }
            }
        }

        let detail = event
            .message
            .as_deref()
            .map(|message| format!(": {}", summarize_error_line(message)))
            .unwrap_or_default();
        self.set_status(format!(
            "Tunnel {} ({}) {}{detail}",
            event.id,
            event.label,
            event.state.label()
        ));
    }

    /// Mirrors the orchestrator's pending slot, which wins over event order.
    pub fn sync_pending(&mut self, pending: Option<&PendingTunnelRequest>) {
        self.pending_tunnel = pending.map(|request| (request.id, request.target.label.clone()));
    }

    /// Next read of a followed log source, unless one is already running.
    pub fn poll_tail(&mut self) -> AppCommand {
        if self.action_in_flight {
            return AppCommand::None;
        }
        let Some(tail) = &self.tail else {
            return AppCommand::None;
        };
        let request = ActionRequest::Logs {
            source: tail.source.clone(),
            since_ms: tail.cursor_ms,
        };
        self.run_action(request)
    }

    fn run_action(&mut self, request: ActionRequest) -> AppCommand {
        self.action_in_flight = true;
        AppCommand::RunAction(request)
    }

    pub fn apply_action_outcome(&mut self, outcome: ActionOutcome) {
        self.action_in_flight = false;
        match outcome {
            ActionOutcome::Invoked { function, result } => match result {
                Ok(invocation) => {
                    let name = &invocation.function;
                    self.set_status(if invocation.failed() {
                        format!(
                            "Invoked {name}: {}",
                            invocation
                                .function_error
                                .as_deref()
                                .unwrap_or("function error")
                        )
                    } else {
                        format!("Invoked {name} (status {})", invocation.status_code)
                    });
                    self.open_output(OutputPanel::new(
                        format!("invoke {name}"),
                        invocation.render(),
                    ));
                }
                Err(error) => {
                    self.set_status(format!(
                        "Invoke {function} failed: {}",
                        summarize_error_line(&error)
                    ));
                }
            },
            ActionOutcome::Logs { source, result } => {
                let tailing = self.tail.as_ref().is_some_and(|tail| tail.source == source);
                match result {
                    Ok(batch) if tailing => {
                        if let Some(tail) = self.tail.as_mut()
                            && let Some(last) = batch.last_timestamp()
                        {
                            tail.cursor_ms = last;
                        }
                        if let Some(output) = self.output.as_mut() {
                            output.append(&batch.render());
                        }
                    }
                    Ok(batch) => {
                        let body = if batch.events.is_empty() {
                            format!(
                                "no events in the last {} minutes",
                                LOG_LOOKBACK.as_secs() / 60
                            )
                        } else {
                            batch.render()
                        };
                        self.set_status(format!(
                            "{} log events from {}",
                            batch.events.len(),
                            source.group
                        ));
                        self.open_output(OutputPanel::new(format!("logs {}", source.group), body));
                    }
                    Err(error) => {
                        if tailing {
                            self.tail = None;
                        }
                        self.set_status(format!(
                            "Reading {} failed: {}",
                            source.group,
                            summarize_error_line(&error)
                        ));
                    }
                }
            }
            ActionOutcome::Items { query, result } => match result {
                Ok(page) => self.apply_item_page(query, page),
                Err(error) => {
                    self.set_status(format!(
                        "{} failed: {}",
                        query.describe(),
                        summarize_error_line(&error)
                    ));
                }
            },
        }
    }

    fn apply_item_page(&mut self, query: ItemQuery, page: ItemPage) {
        let continuing = query.next_token.is_some();
        let shown = match (&self.items, continuing) {
            (Some(cursor), true) => cursor.shown,
            _ => 0,
        };
        let rendered = page.render(shown);
        if continuing && let Some(output) = self.output.as_mut() {
            output.append(&rendered);
            self.show_output = true;
        } else {
            let body = if page.items.is_empty() {
                "no items".to_string()
            } else {
                rendered
            };
            self.open_output(OutputPanel::new(query.describe(), body));
        }

        let total = shown + page.items.len();
        self.set_status(if page.has_more() {
            format!("{total} items from {} (:more for the next page)", query.table)
        } else {
            format!("{total} items from {}", query.table)
        });
        self.items = Some(ItemCursor {
            query: ItemQuery {
                next_token: page.next_token.filter(|token| !token.is_empty()),
                ..query
            },
            shown: total,
        });
    }

    fn open_output(&mut self, panel: OutputPanel) {
        self.output = Some(panel);
        self.show_output = true;
    }

    fn close_output(&mut self) {
        self.show_output = false;
        if let Some(tail) = self.tail.take() {
            self.status = format!("Stopped following {}", tail.source.group);
        } else {
            self.status = "Closed output".to_string();
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if !matches!(action, Action::GPrefix) {
            self.pending_g = false;
        }

        if self.show_help && !matches!(action, Action::ToggleHelp | Action::Quit) {
            self.show_help = false;
            if matches!(action, Action::Escape) {
                return AppCommand::None;
            }
        }

        if self.show_regions {
            return self.apply_region_picker_action(action);
        }

        if self.show_output
            && self.mode == InputMode::Normal
            && let Some(output) = self.output.as_mut()
        {
            match action {
                Action::Down => return scrolled(output, 1),
                Action::Up => return scrolled(output, -1),
                Action::PageDown => return scrolled(output, self.table_page_size as isize),
                Action::PageUp => return scrolled(output, -(self.table_page_size as isize)),
                Action::Top => return scrolled(output, isize::MIN / 2),
                Action::Bottom => {
                    output.follow = true;
                    return AppCommand::None;
                }
                Action::Escape => {
                    self.close_output();
                    return AppCommand::None;
                }
                _ => {}
            }
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::NextTab => self.switch_tab_by_offset(1),
            Action::PrevTab => self.switch_tab_by_offset(-1),
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::PageDown => {
                self.move_selection(self.table_page_size as isize);
                AppCommand::None
            }
            Action::PageUp => {
                self.move_selection(-(self.table_page_size as isize));
                AppCommand::None
            }
            Action::Top => {
                self.move_selection(isize::MIN / 2);
                AppCommand::None
            }
            Action::Bottom => {
                self.move_selection(isize::MAX / 2);
                AppCommand::None
            }
            Action::GPrefix => {
                if self.pending_g {
                    self.pending_g = false;
                    self.move_selection(isize::MIN / 2);
                } else {
                    self.pending_g = true;
                }
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::ToggleDetails => {
                self.show_details = !self.show_details;
                AppCommand::None
            }
            Action::ToggleRegions => {
                self.show_regions = true;
                self.region_selected = REGIONS
                    .iter()
                    .position(|region| region.code == self.region)
                    .unwrap_or(0);
                self.status = "Pick a region (Enter switches, Esc closes)".to_string();
                AppCommand::None
            }
            Action::ToggleOutput => {
                if self.show_output {
                    self.close_output();
                } else if self.output.is_some() {
                    self.show_output = true;
                } else {
                    self.status = "No output yet".to_string();
                }
                AppCommand::None
            }
            Action::EnterResource => self.enter_selected_resource(),
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                self.status = "Command mode (:help for commands)".to_string();
                AppCommand::None
            }
            Action::StartFilter => {
                self.mode = InputMode::Filter;
                self.input = self.filter.clone();
                self.status = "Filter mode".to_string();
                AppCommand::None
            }
            Action::Refresh => {
                let kind = self.active_kind();
                self.status = format!(
                    "Reloading {} ({})",
                    kind.title(),
                    self.load_scope_for(kind).label()
                );
                self.request_load(kind)
            }
            Action::StartTunnelPrompt => {
                self.mode = InputMode::Command;
                self.input = "tunnel ".to_string();
                self.status = "Tunnel mode (:tunnel [local-port] [endpoint])".to_string();
                AppCommand::None
            }
            Action::ToggleTunnels => {
                self.view = match self.view {
                    View::Resources => View::Tunnels,
                    View::Tunnels => View::Resources,
                };
                AppCommand::None
            }
            Action::StopSelectedTunnel => self.stop_selected_tunnel(),
            Action::Escape => self.escape(),
            Action::SubmitInput => self.submit_input(),
            Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.input.clear();
                self.status = "Input cancelled".to_string();
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                AppCommand::None
            }
            Action::Delete => {
                while self.input.ends_with(' ') {
                    self.input.pop();
                }
                while !self.input.ends_with(' ') && !self.input.is_empty() {
                    self.input.pop();
                }
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.input.push(c);
                AppCommand::None
            }
        }
    }

    fn apply_region_picker_action(&mut self, action: Action) -> AppCommand {
        let last = REGIONS.len() - 1;
        match action {
            Action::Down => self.region_selected = (self.region_selected + 1).min(last),
            Action::Up => self.region_selected = self.region_selected.saturating_sub(1),
            Action::Top | Action::GPrefix => self.region_selected = 0,
            Action::Bottom => self.region_selected = last,
            Action::EnterResource => {
                self.show_regions = false;
                let code = REGIONS[self.region_selected()].code;
                return self.switch_region(code);
            }
            Action::Escape | Action::ToggleRegions => {
                self.show_regions = false;
                self.status = format!("Staying in {}", self.region);
            }
            Action::Quit => {
                self.show_regions = false;
                self.running = false;
                self.status = "Exit requested".to_string();
            }
            _ => {}
        }
        AppCommand::None
    }

    /// Drops every table and drill level, then reloads the current tab in `region`.
    fn switch_region(&mut self, code: &str) -> AppCommand {
        if code == self.region {
            self.status = format!("Already in {code}");
            return AppCommand::None;
        }
        self.region = code.to_string();
        self.scope = LoadScope::All;
        self.reset_tables();
        self.output = None;
        self.show_output = false;
        self.tail = None;
        self.items = None;

        let kind = self.active_kind();
        let generation = self.begin_generation(kind);
        self.status = format!("Switched to {code}");
        AppCommand::SwitchRegion {
            region: code.to_string(),
            kind,
            generation,
        }
    }

    fn reset_tables(&mut self) {
        for table in self.tables.values_mut() {
            *table = TableData::default();
        }
        self.drill.clear();
        self.filter.clear();
        self.show_details = false;
    }

    fn escape(&mut self) -> AppCommand {
        if let Some((_, label)) = self.pending_tunnel.take() {
            self.status = format!("Cancelling tunnel to {label}");
            return AppCommand::CancelPendingTunnel;
        }
        if self.view == View::Tunnels {
            self.view = View::Resources;
            self.status = "Back to resources".to_string();
            return AppCommand::None;
        }
        if self.show_details {
            self.show_details = false;
            self.status = "Closed details".to_string();
            return AppCommand::None;
        }
        if !self.filter.is_empty() {
            self.filter.clear();
            self.clamp_selection_for(self.active_kind());
            self.status = "Filter cleared".to_string();
            return AppCommand::None;
        }
        if let Some(level) = self.drill.pop() {
            self.status = format!(
                "Back to {} ({})",
                self.active_kind().title(),
                self.load_scope_for(self.active_kind()).label()
            );
            if let Some(table) = self.tables.get_mut(&level.kind) {
                *table = TableData::default();
            }
            return AppCommand::None;
        }
        if matches!(self.scope, LoadScope::Stack(_)) {
            return self.set_scope(LoadScope::All);
        }
        self.status = "Nothing to close".to_string();
        AppCommand::None
    }

    fn submit_input(&mut self) -> AppCommand {
        match self.mode {
            InputMode::Normal => AppCommand::None,
            InputMode::Filter => {
                self.filter = self.input.trim().to_string();
                self.mode = InputMode::Normal;
                self.input.clear();
                self.clamp_selection_for(self.active_kind());
                self.status = if self.filter.is_empty() {
                    "Filter cleared".to_string()
                } else {
                    format!("Filter: '{}'", self.filter)
                };
                AppCommand::None
            }
            InputMode::Command => {
                let command = self.input.trim().to_string();
                self.mode = InputMode::Normal;
                self.input.clear();
                self.execute_command_line(&command)
            }
        }
    }

    fn execute_command_line(&mut self, line: &str) -> AppCommand {
        let normalized = line.trim().trim_start_matches(':').trim();
        if normalized.is_empty() {
            self.status = "No command entered".to_string();
            return AppCommand::None;
        }

        let mut parts = normalized.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let rest = parts.collect::<Vec<_>>();
        let remainder = normalized
            .split_once(char::is_whitespace)
            .map(|(_, remainder)| remainder.trim())
            .filter(|remainder| !remainder.is_empty());

        match command.as_str() {
            "q" | "quit" | "exit" => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            "help" | "h" => {
                self.show_help = true;
                AppCommand::None
            }
            "refresh" | "reload" | "r" => self.request_load(self.active_kind()),
            "filter" | "f" => {
                self.filter = rest.join(" ");
                self.clamp_selection_for(self.active_kind());
                self.status = if self.filter.is_empty() {
                    "Filter cleared".to_string()
                } else {
                    format!("Filter: '{}'", self.filter)
                };
                AppCommand::None
            }
            "stack" if !rest.is_empty() => self.set_scope(LoadScope::Stack(rest[0].to_string())),
            "unscope" | "all" => self.set_scope(LoadScope::All),
            "region" | "reg" => match rest.first() {
                None => self.apply_action(Action::ToggleRegions),
                Some(code) if is_region_code(code) => self.switch_region(code),
                Some(code) => {
                    self.status = format!("Unknown region: {code}");
                    AppCommand::None
                }
            },
            "tunnels" | "tun" => {
                self.view = View::Tunnels;
                AppCommand::None
            }
            "tunnel" | "proxy" => {
                let (port, selector) = match rest.as_slice() {
                    [] => (None, None),
                    [only] if only.parse::<u16>().is_ok() => (Some(*only), None),
                    [only] => (None, Some(*only)),
                    [port, selector, ..] => (Some(*port), Some(*selector)),
                };
                let Some(local_port) = parse_optional_port(port) else {
                    self.status = "Usage: :tunnel [local-port] [endpoint]".to_string();
                    return AppCommand::None;
                };
                self.prepare_tunnel(local_port, None, selector)
            }
            "via" => {
                let Some(jump_host) = rest.first() else {
                    self.status = "Usage: :via <jump-host> [local-port]".to_string();
                    return AppCommand::None;
                };
                let Some(local_port) = parse_optional_port(rest.get(1).copied()) else {
                    self.status = "Usage: :via <jump-host> [local-port]".to_string();
                    return AppCommand::None;
                };
                self.prepare_tunnel(local_port, Some(jump_host.to_string()), rest.get(2).copied())
            }
            "stop" => {
                let Some(id) = rest.first().and_then(|raw| raw.parse::<TunnelId>().ok()) else {
                    self.status = "Usage: :stop <tunnel-id>".to_string();
                    return AppCommand::None;
                };
                self.status = format!("Stopping tunnel {id}");
                AppCommand::StopTunnel(id)
            }
            "invoke" | "call" => self.invoke_selected(remainder),
            "logs" | "log" => self.read_logs(false),
            "tail" | "follow" => self.read_logs(true),
            "scan" => {
                let Some(limit) = parse_limit(rest.first().copied()) else {
                    self.status = "Usage: :scan [limit]".to_string();
                    return AppCommand::None;
                };
                self.query_selected_table(|table| ItemQuery::scan(table, limit))
            }
            "query" => {
                let Some(condition) = remainder else {
                    self.status = "Usage: :query [key=]value".to_string();
                    return AppCommand::None;
                };
                let (key, value) = match condition.split_once('=') {
                    Some((key, value)) if !key.trim().is_empty() => {
                        (Some(key.trim().to_string()), value.trim().to_string())
                    }
                    _ => (None, condition.trim_start_matches('=').trim().to_string()),
                };
                self.query_selected_table(|table| {
                    ItemQuery::key_equals(table, key, value, DEFAULT_ITEM_LIMIT)
                })
            }
            "more" | "next" => self.next_item_page(),
            token => match ResourceKind::from_token(token) {
                Some(kind) => {
                    if let Some(stack) = rest.first()
                        && kind == ResourceKind::Stacks
                    {
                        return self.set_scope(LoadScope::Stack(stack.to_string()));
                    }
                    self.switch_to_kind(kind)
                }
                None => {
                    self.status = format!("Unknown command: {normalized}");
                    AppCommand::None
                }
            },
        }
    }

    fn invoke_selected(&mut self, payload: Option<&str>) -> AppCommand {
        if self.active_kind() != ResourceKind::Functions {
            self.status = "Invoke works on functions (:fn)".to_string();
            return AppCommand::None;
        }
        let Some(row) = self.active_selected_row() else {
            self.status = "Select a function first".to_string();
            return AppCommand::None;
        };
        let function = row.name.clone();
        self.status = format!("Invoking {function}");
        self.run_action(ActionRequest::Invoke {
            function,
            payload: payload.map(str::to_string),
        })
    }

    fn read_logs(&mut self, follow: bool) -> AppCommand {
        let Some(row) = self.active_selected_row() else {
            self.status = "Select a resource first".to_string();
            return AppCommand::None;
        };
        let Some(source) = row.logs.clone() else {
            self.status = format!("{} has no log group", row.name);
            return AppCommand::None;
        };
        let lookback = i64::try_from(LOG_LOOKBACK.as_millis()).unwrap_or(i64::MAX);
        let since_ms = Local::now().timestamp_millis().saturating_sub(lookback);

        if follow {
            self.tail = Some(LogTail {
                source: source.clone(),
                cursor_ms: since_ms,
            });
            let mut panel = OutputPanel::new(format!("tail {}", source.group), String::new());
            panel.follow = true;
            self.open_output(panel);
            self.status = format!("Following {} (Esc stops)", source.group);
        } else {
            self.tail = None;
            self.status = format!("Reading {}", source.group);
        }
        self.run_action(ActionRequest::Logs { source, since_ms })
    }

    fn query_selected_table(&mut self, build: impl FnOnce(String) -> ItemQuery) -> AppCommand {
        if self.active_kind() != ResourceKind::Tables {
            self.status = "Item queries work on tables (:ddb)".to_string();
            return AppCommand::None;
        }
        let Some(row) = self.active_selected_row() else {
            self.status = "Select a table first".to_string();
            return AppCommand::None;
        };
        let query = build(row.name.clone());
        self.status = format!("Running {}", query.describe());
        self.items = None;
        self.run_action(ActionRequest::Items(query))
    }

    fn next_item_page(&mut self) -> AppCommand {
        let Some(query) = self
            .items
            .as_ref()
            .filter(|cursor| cursor.query.next_token.is_some())
            .map(|cursor| cursor.query.clone())
        else {
            self.status = "No more items".to_string();
            return AppCommand::None;
        };
        self.status = format!("Fetching more from {}", query.table);
        self.run_action(ActionRequest::Items(query))
    }

    fn prepare_tunnel(
        &mut self,
        local_port: Option<u16>,
        jump_host: Option<String>,
        selector: Option<&str>,
    ) -> AppCommand {
        let Some(row) = self.active_selected_row() else {
            self.status = "Select a resource first".to_string();
            return AppCommand::None;
        };
        if row.endpoints.is_empty() {
            self.status = format!("{} has no network endpoint to tunnel to", row.name);
            return AppCommand::None;
        }
        let Some(endpoint) = row.endpoint(selector) else {
            let names = row
                .endpoints
                .iter()
                .map(|endpoint| endpoint.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.status = format!(
                "{} has no endpoint {} (try {names})",
                row.name,
                selector.unwrap_or_default()
            );
            return AppCommand::None;
        };
        let target = TunnelTarget::from_endpoint(&row.name, endpoint, row.endpoints.len() > 1);
        if let Some((_, label)) = &self.pending_tunnel
            && target.is_private()
        {
            self.status = format!("Still resolving a jump host for {label} (Esc cancels)");
            return AppCommand::None;
        }

        self.status = match (&jump_host, target.route_kind()) {
            (Some(host), _) => format!("Opening tunnel to {} via {host}", target.label),
            (None, "private") => format!("Opening private tunnel to {}", target.label),
            (None, "container") => format!("Forwarding container port {}", target.label),
            (None, "http") => format!("Proxying HTTP for {}", target.label),
            (None, _) => format!("Proxying {}", target.label),
        };
        AppCommand::StartTunnel(TunnelRequest {
            target,
            local_port,
            jump_host,
        })
    }

    fn stop_selected_tunnel(&mut self) -> AppCommand {
        if self.view != View::Tunnels {
            self.status = "Open the tunnels view (t) to stop a tunnel".to_string();
            return AppCommand::None;
        }
        let Some(tunnel) = self
            .selected_tunnel_index()
            .and_then(|index| self.tunnels.get(index))
        else {
            self.status = "No active tunnels".to_string();
            return AppCommand::None;
        };
        self.status = format!("Stopping tunnel {}", tunnel.id);
        AppCommand::StopTunnel(tunnel.id)
    }

    fn enter_selected_resource(&mut self) -> AppCommand {
        if self.view == View::Tunnels {
            return AppCommand::None;
        }
        let Some(row) = self.active_selected_row() else {
            self.status = "Nothing selected".to_string();
            return AppCommand::None;
        };
        let kind = self.active_kind();
        if kind == ResourceKind::Stacks {
            let scope = LoadScope::Stack(row.name.clone());
            if self.scope == scope {
                return self.switch_to_kind(ResourceKind::Queues);
            }
            self.active_kind_index = kind_index(ResourceKind::Queues);
            return self.set_scope(scope);
        }
        let Some(child) = kind.child() else {
            self.show_details = !self.show_details;
            return AppCommand::None;
        };

        let level = DrillLevel {
            kind: child,
            parent_id: row.id.clone(),
            parent_name: row.name.clone(),
        };
        self.status = format!("{} in {}", child.title(), level.parent_name);
        self.drill.push(level);
        self.show_details = false;
        self.filter.clear();
        if let Some(table) = self.tables.get_mut(&child) {
            *table = TableData::default();
        }
        self.request_load(child)
    }

    fn set_scope(&mut self, scope: LoadScope) -> AppCommand {
        if self.scope == scope {
            self.status = format!("Already scoped to {}", scope.label());
            return AppCommand::None;
        }
        self.scope = scope;
        self.reset_tables();
        let kind = self.active_kind();
        let command = self.request_load(kind);
        self.status = match &self.scope {
            LoadScope::Stack(stack) => format!("Scoped to stack {stack}"),
            LoadScope::All | LoadScope::Parent(_) => "Scope cleared".to_string(),
        };
        command
    }

    fn switch_tab_by_offset(&mut self, delta: isize) -> AppCommand {
        let len = ResourceKind::TABS.len() as isize;
        let next = (self.active_kind_index as isize + delta).rem_euclid(len) as usize;
        self.switch_to_kind(ResourceKind::TABS[next])
    }

    fn switch_to_kind(&mut self, kind: ResourceKind) -> AppCommand {
        if !ResourceKind::TABS.contains(&kind) {
            let Some(depth) = self.drill.iter().position(|level| level.kind == kind) else {
                let parent = kind.parent().map(ResourceKind::title).unwrap_or("parent");
                self.status = format!("Open a row in {parent} (Enter) to list its {}", kind.title());
                return AppCommand::None;
            };
            self.view = View::Resources;
            self.drill.truncate(depth + 1);
            self.status = format!("{} ({})", kind.title(), self.load_scope_for(kind).label());
            return AppCommand::None;
        }

        self.view = View::Resources;
        self.drill.clear();
        self.active_kind_index = kind_index(kind);
        self.status = format!("{} ({})", kind.title(), self.scope.label());
        let never_loaded = self
            .tables
            .get(&kind)
            .is_none_or(|table| table.generation == 0);
        if never_loaded {
            self.request_load(kind)
        } else {
            AppCommand::None
        }
    }

    fn visible_rows_for(&self, kind: ResourceKind) -> Vec<&ResourceDetail> {
        let Some(table) = self.tables.get(&kind) else {
            return Vec::new();
        };
        table
            .rows
            .iter()
            .filter(|row| row.matches_filter(&self.filter))
            .collect()
    }

    fn active_visible_len(&self) -> usize {
        self.visible_rows_for(self.active_kind()).len()
    }

    fn selected_row_id_for(&self, kind: ResourceKind) -> Option<String> {
        let table = self.tables.get(&kind)?;
        self.visible_rows_for(kind)
            .get(table.selected)
            .map(|row| row.id.clone())
    }

    fn move_selection(&mut self, delta: isize) {
        if self.view == View::Tunnels {
            if self.tunnels.is_empty() {
                self.tunnel_selected = 0;
                return;
            }
            let max_index = self.tunnels.len().saturating_sub(1) as isize;
            let current = self.tunnel_selected.min(max_index as usize) as isize;
            self.tunnel_selected = current.saturating_add(delta).clamp(0, max_index) as usize;
            return;
        }

        let visible_len = self.active_visible_len();
        let Some(table) = self.tables.get_mut(&self.active_kind()) else {
            return;
        };
        if visible_len == 0 {
            table.selected = 0;
            return;
        }
        let max_index = visible_len.saturating_sub(1) as isize;
        let current = table.selected.min(max_index as usize) as isize;
        table.selected = current.saturating_add(delta).clamp(0, max_index) as usize;
    }

    fn clamp_selection_for(&mut self, kind: ResourceKind) {
        let filter = self.filter.clone();
        if let Some(table) = self.tables.get_mut(&kind) {
            let visible_len = table
                .rows
                .iter()
                .filter(|row| row.matches_filter(&filter))
                .count();
            table.selected = table.selected.min(visible_len.saturating_sub(1));
        }
    }
}

fn scrolled(output: &mut OutputPanel, delta: isize) -> AppCommand {
    output.scroll_by(delta);
    AppCommand::None
}

fn kind_index(kind: ResourceKind) -> usize {
    ResourceKind::TABS
        .iter()
        .position(|candidate| *candidate == kind)
        .unwrap_or(0)
}

fn parse_optional_port(raw: Option<&str>) -> Option<Option<u16>> {
    match raw {
        None => Some(None),
        Some(value) => value.parse::<u16>().ok().filter(|port| *port > 0).map(Some),
    }
}

fn parse_limit(raw: Option<&str>) -> Option<usize> {
    match raw {
        None => Some(DEFAULT_ITEM_LIMIT),
        Some(value) => value.parse::<usize>().ok().filter(|limit| *limit > 0),
    }
}

fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, InputMode, View};
    use crate::actions::{ActionOutcome, ActionRequest, Invocation, ItemPage, LogBatch, LogEvent};
    use crate::input::Action;
    use crate::loader::LoadReport;
    use crate::model::{
        Batch, Endpoint, Exposure, LoadScope, LogSource, ResourceDetail, ResourceKind,
    };
    use crate::tunnel::{PendingTunnelRequest, TunnelEvent, TunnelId, TunnelState, TunnelTarget};
    use chrono::Local;
    use serde_json::json;
    use std::time::Duration;

    fn app() -> App {
        App::new("dev".to_string(), "eu-west-1".to_string())
    }

    fn row(name: &str) -> ResourceDetail {
        ResourceDetail {
            id: name.to_string(),
            name: name.to_string(),
            columns: vec![name.to_string()],
            ..ResourceDetail::default()
        }
    }

    fn api_row(name: &str, private: bool) -> ResourceDetail {
        let exposure = if private {
            Exposure::Private { network_id: None }
        } else {
            Exposure::Public
        };
        ResourceDetail {
            endpoints: vec![Endpoint {
                name: "api".to_string(),
                host: format!("{name}.execute-api.eu-west-1.amazonaws.com"),
                port: 443,
                exposure,
            }],
            ..row(name)
        }
    }

    fn task_row(name: &str) -> ResourceDetail {
        let port = |container: &str, port: u16| Endpoint {
            name: format!("{container}:{port}"),
            host: "localhost".to_string(),
            port,
            exposure: Exposure::Container {
                ssm_target: format!("ecs:payments_{name}_{name}-rt"),
            },
        };
        ResourceDetail {
            endpoints: vec![port("web", 8080), port("admin", 9000)],
            ..row(name)
        }
    }

    fn event(id: u64, label: &str, state: TunnelState) -> TunnelEvent {
        TunnelEvent {
            id: TunnelId(id),
            label: label.to_string(),
            state,
            message: None,
        }
    }

    fn type_command(app: &mut App, line: &str) -> AppCommand {
        app.apply_action(Action::StartCommand);
        for c in line.chars() {
            app.apply_action(Action::InputChar(c));
        }
        app.apply_action(Action::SubmitInput)
    }

    fn deliver(app: &mut App, command: AppCommand, rows: Vec<ResourceDetail>) {
        let (kind, generation) = match command {
            AppCommand::Load {
                kind, generation, ..
            }
            | AppCommand::SwitchRegion {
                kind, generation, ..
            } => (kind, generation),
            other => panic!("expected load, got {other:?}"),
        };
        assert!(app.apply_batch(
            kind,
            generation,
            Batch {
                items: rows,
                has_more: false,
                is_append: false,
            },
        ));
    }

    fn load(app: &mut App, kind: ResourceKind, rows: Vec<ResourceDetail>) {
        let command = app.request_load(kind);
        deliver(app, command, rows);
    }

    #[test]
    fn stale_generations_are_ignored() {
        let mut app = app();
        let AppCommand::Load { generation: old, .. } = app.request_load(ResourceKind::Stacks)
        else {
            panic!("expected load");
        };
        let AppCommand::Load { generation: new, .. } = app.request_load(ResourceKind::Stacks)
        else {
            panic!("expected load");
        };
        assert!(new > old);

        let stale = Batch {
            items: vec![row("old")],
            has_more: false,
            is_append: false,
        };
        assert!(!app.apply_batch(ResourceKind::Stacks, old, stale));
        assert!(app.active_visible_rows().is_empty());

        let fresh = Batch {
            items: vec![row("new")],
            has_more: true,
            is_append: false,
        };
        assert!(app.apply_batch(ResourceKind::Stacks, new, fresh));
        assert_eq!(app.active_visible_rows()[0].name, "new");
        assert!(app.active_table().is_some_and(|t| t.loading));

        app.finish_load(ResourceKind::Stacks, new, LoadReport::default());
        assert!(app.active_table().is_some_and(|t| !t.loading));
    }

    #[test]
    fn kind_token_switches_tab_and_loads_once() {
        let mut app = app();
        let command = type_command(&mut app, "sqs");
        assert!(matches!(
            command,
            AppCommand::Load {
                kind: ResourceKind::Queues,
                scope: LoadScope::All,
                ..
            }
        ));
        assert_eq!(app.active_kind(), ResourceKind::Queues);
        assert_eq!(type_command(&mut app, "queues"), AppCommand::None);
    }

    #[test]
    fn enter_on_stack_scopes_and_switches_to_queues() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("orders")]);
        let command = app.apply_action(Action::EnterResource);
        assert_eq!(app.scope(), &LoadScope::Stack("orders".to_string()));
        assert_eq!(app.active_kind(), ResourceKind::Queues);
        assert!(matches!(
            command,
            AppCommand::Load {
                kind: ResourceKind::Queues,
                scope: LoadScope::Stack(_),
                ..
            }
        ));

        let cleared = app.apply_action(Action::Escape);
        assert_eq!(app.scope(), &LoadScope::All);
        assert!(matches!(cleared, AppCommand::Load { .. }));
    }

    #[test]
    fn enter_drills_from_cluster_to_services_to_tasks() {
        let mut app = app();
        let command = type_command(&mut app, "ecs");
        let cluster = ResourceDetail {
            id: "arn:aws:ecs:eu-west-1:123:cluster/payments".to_string(),
            ..row("payments")
        };
        deliver(&mut app, command, vec![cluster]);

        let services = app.apply_action(Action::EnterResource);
        assert_eq!(
            services,
            AppCommand::Load {
                kind: ResourceKind::Services,
                scope: LoadScope::Parent("arn:aws:ecs:eu-west-1:123:cluster/payments".to_string()),
                generation: 2,
            }
        );
        assert_eq!(app.active_kind(), ResourceKind::Services);
        let service = ResourceDetail {
            id: "arn:aws:ecs:eu-west-1:123:service/payments/api".to_string(),
            ..row("api")
        };
        deliver(&mut app, services, vec![service]);

        let tasks = app.apply_action(Action::EnterResource);
        assert!(matches!(
            &tasks,
            AppCommand::Load {
                kind: ResourceKind::Tasks,
                scope: LoadScope::Parent(parent),
                ..
            } if parent.ends_with("service/payments/api")
        ));
        deliver(&mut app, tasks, vec![task_row("0f9e")]);
        let names = app
            .drill_path()
            .iter()
            .map(|level| level.parent_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["payments", "api"]);

        assert_eq!(app.apply_action(Action::EnterResource), AppCommand::None);
        assert!(app.show_details());
        app.apply_action(Action::Escape);
        assert!(!app.show_details());

        app.apply_action(Action::Escape);
        assert_eq!(app.active_kind(), ResourceKind::Services);
        assert_eq!(app.active_selected_row().map(|r| r.name.as_str()), Some("api"));
        app.apply_action(Action::Escape);
        assert_eq!(app.active_kind(), ResourceKind::Clusters);
        assert!(app.drill_path().is_empty());
    }

    #[test]
    fn switching_tabs_leaves_the_drill_down() {
        let mut app = app();
        let command = type_command(&mut app, "api");
        deliver(&mut app, command, vec![api_row("orders", false)]);
        app.apply_action(Action::EnterResource);
        assert_eq!(app.active_kind(), ResourceKind::Stages);

        app.apply_action(Action::NextTab);
        assert!(app.drill_path().is_empty());
        assert_eq!(app.active_kind(), ResourceKind::Tables);
    }

    #[test]
    fn child_kinds_need_a_parent_row() {
        let mut app = app();
        assert_eq!(type_command(&mut app, "svc"), AppCommand::None);
        assert!(app.status().contains("Open a row in Clusters"));
        assert_eq!(app.active_kind(), ResourceKind::Stacks);
    }

    #[test]
    fn region_command_resets_tables_and_reloads() {
        let mut app = app();
        let command = type_command(&mut app, "ecs");
        deliver(&mut app, command, vec![row("payments")]);
        app.apply_action(Action::EnterResource);

        let command = type_command(&mut app, "region us-east-2");
        assert!(matches!(
            &command,
            AppCommand::SwitchRegion {
                region,
                kind: ResourceKind::Clusters,
                ..
            } if region == "us-east-2"
        ));
        assert_eq!(app.region(), "us-east-2");
        assert!(app.drill_path().is_empty());
        assert_eq!(app.scope(), &LoadScope::All);
        assert!(app.active_visible_rows().is_empty());
        assert!(app.active_table().is_some_and(|t| t.loading));
        deliver(&mut app, command, vec![row("ohio-cluster")]);

        assert_eq!(type_command(&mut app, "region us-east-2"), AppCommand::None);
        assert_eq!(type_command(&mut app, "region mars"), AppCommand::None);
        assert_eq!(app.status(), "Unknown region: mars");
    }

    #[test]
    fn region_picker_starts_on_current_region() {
        let mut app = app();
        app.apply_action(Action::ToggleRegions);
        assert!(app.show_regions());
        let start = app.region_selected();
        app.apply_action(Action::Down);
        assert_eq!(app.region_selected(), start + 1);

        let command = app.apply_action(Action::EnterResource);
        assert!(!app.show_regions());
        assert!(matches!(
            command,
            AppCommand::SwitchRegion { region, .. } if region == "eu-west-2"
        ));

        app.apply_action(Action::ToggleRegions);
        app.apply_action(Action::Escape);
        assert!(!app.show_regions());
        assert_eq!(app.region(), "eu-west-2");
    }

    #[test]
    fn tunnel_command_builds_request_for_selected_endpoint() {
        let mut app = app();
        type_command(&mut app, "api");
        load(&mut app, ResourceKind::Apis, vec![api_row("internal", true)]);

        let command = type_command(&mut app, "tunnel 8443");
        let AppCommand::StartTunnel(request) = command else {
            panic!("expected tunnel request");
        };
        assert_eq!(request.local_port, Some(8443));
        assert!(request.target.is_private());
        assert_eq!(request.target.label, "internal");
        assert_eq!(request.jump_host, None);

        let AppCommand::StartTunnel(via) = type_command(&mut app, "via i-0abc") else {
            panic!("expected tunnel request");
        };
        assert_eq!(via.jump_host.as_deref(), Some("i-0abc"));
        assert_eq!(via.local_port, None);
    }

    #[test]
    fn container_tunnels_pick_the_named_port() {
        let mut app = app();
        app.drill.push(super::DrillLevel {
            kind: ResourceKind::Tasks,
            parent_id: "arn:aws:ecs:eu-west-1:123:service/payments/api".to_string(),
            parent_name: "api".to_string(),
        });
        load(&mut app, ResourceKind::Tasks, vec![task_row("0f9e")]);

        let AppCommand::StartTunnel(first) = type_command(&mut app, "tunnel") else {
            panic!("expected tunnel request");
        };
        assert_eq!(first.target.label, "0f9e/web:8080");
        assert_eq!(first.target.route_kind(), "container");
        assert!(app.status().starts_with("Forwarding container port"));

        let AppCommand::StartTunnel(admin) = type_command(&mut app, "tunnel 19000 admin:9000")
        else {
            panic!("expected tunnel request");
        };
        assert_eq!(admin.local_port, Some(19000));
        assert_eq!(admin.target.port, 9000);

        assert_eq!(type_command(&mut app, "tunnel metrics"), AppCommand::None);
        assert!(app.status().contains("try web:8080, admin:9000"));
    }

    #[test]
    fn tunnel_command_rejects_resources_without_endpoint() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("orders")]);
        assert_eq!(type_command(&mut app, "tunnel"), AppCommand::None);
        assert!(app.status().contains("no network endpoint"));
        assert_eq!(type_command(&mut app, "tunnel notaport 1"), AppCommand::None);
        assert!(app.status().starts_with("Usage"));
    }

    #[test]
    fn port_prompt_prefills_tunnel_command() {
        let mut app = app();
        app.apply_action(Action::StartTunnelPrompt);
        assert_eq!(app.mode(), InputMode::Command);
        assert_eq!(app.input(), "tunnel ");
    }

    #[test]
    fn escape_cancels_pending_resolution_first() {
        let mut app = app();
        app.apply_tunnel_event(&event(1, "internal", TunnelState::ResolvingJumpHost));
        assert_eq!(app.pending_tunnel(), Some("internal"));
        assert_eq!(
            app.apply_action(Action::Escape),
            AppCommand::CancelPendingTunnel
        );
        assert_eq!(app.pending_tunnel(), None);
    }

    #[test]
    fn failed_event_clears_pending_label() {
        let mut app = app();
        for state in [TunnelState::ResolvingJumpHost, TunnelState::Failed] {
            app.apply_tunnel_event(&TunnelEvent {
                message: Some("no reachable jump host found".to_string()),
                ..event(2, "internal", state)
            });
        }
        assert_eq!(app.pending_tunnel(), None);
        assert!(app.status().contains("failed"));
    }

    #[test]
    fn pending_label_survives_events_for_other_tunnels() {
        let mut app = app();
        app.apply_tunnel_event(&event(1, "orders", TunnelState::ResolvingJumpHost));
        app.apply_tunnel_event(&event(2, "orders", TunnelState::EstablishingSession));
        app.apply_tunnel_event(&event(2, "orders", TunnelState::Active));
        assert_eq!(app.pending_tunnel(), Some("orders"));

        app.apply_tunnel_event(&event(1, "orders", TunnelState::EstablishingSession));
        assert_eq!(app.pending_tunnel(), None);
    }

    #[test]
    fn pending_label_follows_the_orchestrator() {
        let mut app = app();
        let pending = PendingTunnelRequest {
            id: TunnelId(5),
            target: TunnelTarget::private("billing", "billing.internal", 443, None),
            local_port: None,
            requested_at: Local::now(),
        };
        app.sync_pending(Some(&pending));
        assert_eq!(app.pending_tunnel(), Some("billing"));
        app.apply_tunnel_event(&event(4, "billing", TunnelState::Failed));
        assert_eq!(app.pending_tunnel(), Some("billing"));
        app.sync_pending(None);
        assert_eq!(app.pending_tunnel(), None);
    }

    #[test]
    fn stop_key_only_acts_in_tunnels_view() {
        let mut app = app();
        assert_eq!(app.apply_action(Action::StopSelectedTunnel), AppCommand::None);
        app.apply_action(Action::ToggleTunnels);
        assert_eq!(app.view(), View::Tunnels);
        assert_eq!(app.apply_action(Action::StopSelectedTunnel), AppCommand::None);
        assert_eq!(app.status(), "No active tunnels");
        assert_eq!(
            type_command(&mut app, "stop t4"),
            AppCommand::StopTunnel(TunnelId(4))
        );
    }

    #[test]
    fn invoke_targets_the_selected_function_with_raw_payload() {
        let mut app = app();
        type_command(&mut app, "fn");
        load(&mut app, ResourceKind::Functions, vec![row("resize")]);

        let command = type_command(&mut app, r#"invoke {"size": 2}"#);
        assert_eq!(
            command,
            AppCommand::RunAction(ActionRequest::Invoke {
                function: "resize".to_string(),
                payload: Some(r#"{"size": 2}"#.to_string()),
            })
        );

        app.apply_action_outcome(ActionOutcome::Invoked {
            function: "resize".to_string(),
            result: Ok(Invocation {
                function: "resize".to_string(),
                status_code: 200,
                executed_version: None,
                function_error: None,
                payload: "{}".to_string(),
                log_tail: None,
                duration: Duration::from_millis(40),
            }),
        });
        assert_eq!(app.status(), "Invoked resize (status 200)");
        assert_eq!(
            app.output().map(|panel| panel.title.as_str()),
            Some("invoke resize")
        );

        app.apply_action(Action::Escape);
        assert!(app.output().is_none());
        app.apply_action(Action::ToggleOutput);
        assert!(app.output().is_some());
    }

    #[test]
    fn invoke_needs_the_functions_tab() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("orders")]);
        assert_eq!(type_command(&mut app, "invoke"), AppCommand::None);
        assert!(app.status().contains(":fn"));
    }

    #[test]
    fn tail_polls_from_the_newest_event_seen() {
        let mut app = app();
        type_command(&mut app, "fn");
        let source = LogSource {
            group: "/aws/lambda/resize".to_string(),
            stream: None,
        };
        let function = ResourceDetail {
            logs: Some(source.clone()),
            ..row("resize")
        };
        load(&mut app, ResourceKind::Functions, vec![function]);

        let AppCommand::RunAction(ActionRequest::Logs { since_ms, .. }) =
            type_command(&mut app, "tail")
        else {
            panic!("expected log read");
        };
        assert!(since_ms < Local::now().timestamp_millis());
        assert_eq!(app.tailing(), Some(&source));
        assert_eq!(app.poll_tail(), AppCommand::None);

        app.apply_action_outcome(ActionOutcome::Logs {
            source: source.clone(),
            result: Ok(LogBatch {
                events: vec![LogEvent {
                    timestamp_ms: 1_700_000_000_123,
                    stream: None,
                    message: "resized 3 images".to_string(),
                }],
            }),
        });
        assert!(
            app.output()
                .is_some_and(|panel| panel.body.contains("resized 3 images") && panel.follow)
        );
        assert_eq!(
            app.poll_tail(),
            AppCommand::RunAction(ActionRequest::Logs {
                source: source.clone(),
                since_ms: 1_700_000_000_123,
            })
        );

        app.apply_action_outcome(ActionOutcome::Logs {
            source,
            result: Ok(LogBatch::default()),
        });
        app.apply_action(Action::Escape);
        assert!(app.tailing().is_none());
        assert_eq!(app.poll_tail(), AppCommand::None);
    }

    #[test]
    fn logs_need_a_log_group() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("orders")]);
        assert_eq!(type_command(&mut app, "logs"), AppCommand::None);
        assert_eq!(app.status(), "orders has no log group");
    }

    #[test]
    fn item_queries_page_with_more() {
        let mut app = app();
        type_command(&mut app, "ddb");
        load(&mut app, ResourceKind::Tables, vec![row("users")]);

        let AppCommand::RunAction(ActionRequest::Items(query)) =
            type_command(&mut app, "query email = a@b.c")
        else {
            panic!("expected item query");
        };
        assert_eq!(query.describe(), "query users email=a@b.c");

        let AppCommand::RunAction(ActionRequest::Items(scan)) = type_command(&mut app, "scan 2")
        else {
            panic!("expected scan");
        };
        assert_eq!(scan.limit, 2);
        app.apply_action_outcome(ActionOutcome::Items {
            query: scan,
            result: Ok(ItemPage {
                items: vec![json!({"pk": {"S": "a"}}), json!({"pk": {"S": "b"}})],
                next_token: Some("tok".to_string()),
            }),
        });
        assert_eq!(app.status(), "2 items from users (:more for the next page)");

        let AppCommand::RunAction(ActionRequest::Items(more)) = type_command(&mut app, "more")
        else {
            panic!("expected next page");
        };
        assert_eq!(more.next_token.as_deref(), Some("tok"));
        app.apply_action_outcome(ActionOutcome::Items {
            query: more,
            result: Ok(ItemPage {
                items: vec![json!({"pk": {"S": "c"}})],
                next_token: None,
            }),
        });
        assert_eq!(app.status(), "3 items from users");
        assert!(app.output().is_some_and(|panel| panel.body.contains("# 3")));
        assert_eq!(type_command(&mut app, "more"), AppCommand::None);
    }

    #[test]
    fn output_scrolls_instead_of_the_table() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("a"), row("b")]);
        app.apply_action_outcome(ActionOutcome::Logs {
            source: LogSource::default(),
            result: Err("throttled".to_string()),
        });
        assert!(app.output().is_none());
        assert!(app.status().contains("throttled"));

        app.apply_action_outcome(ActionOutcome::Invoked {
            function: "f".to_string(),
            result: Ok(Invocation {
                function: "f".to_string(),
                status_code: 200,
                executed_version: Some("$LATEST".to_string()),
                function_error: Some("Unhandled".to_string()),
                payload: "{}".to_string(),
                log_tail: Some("line one\nline two".to_string()),
                duration: Duration::ZERO,
            }),
        });
        assert_eq!(app.status(), "Invoked f: Unhandled");
        app.apply_action(Action::Down);
        assert_eq!(app.output().map(|panel| panel.scroll), Some(1));
        assert_eq!(app.active_selected_index(), Some(0));
    }

    #[test]
    fn filter_narrows_rows_and_esc_clears_it() {
        let mut app = app();
        load(
            &mut app,
            ResourceKind::Stacks,
            vec![row("billing"), row("orders"), row("orders-dlq")],
        );
        app.apply_action(Action::StartFilter);
        for c in "orders".chars() {
            app.apply_action(Action::InputChar(c));
        }
        app.apply_action(Action::SubmitInput);
        assert_eq!(app.active_visible_rows().len(), 2);

        app.apply_action(Action::Bottom);
        assert_eq!(app.active_selected_row().map(|r| r.name.as_str()), Some("orders-dlq"));

        app.apply_action(Action::Escape);
        assert_eq!(app.filter(), "");
        assert_eq!(app.active_visible_rows().len(), 3);
    }

    #[test]
    fn selection_follows_row_across_reload() {
        let mut app = app();
        load(&mut app, ResourceKind::Stacks, vec![row("a"), row("b")]);
        app.apply_action(Action::Down);
        assert_eq!(app.active_selected_row().map(|r| r.name.as_str()), Some("b"));

        load(
            &mut app,
            ResourceKind::Stacks,
            vec![row("0"), row("a"), row("b")],
        );
        assert_eq!(app.active_selected_index(), Some(2));
    }

    #[test]
    fn failed_load_reports_first_error_line() {
        let mut app = app();
        let AppCommand::Load { generation, .. } = app.request_load(ResourceKind::Stacks) else {
            panic!("expected load");
        };
        app.fail_load(
            ResourceKind::Stacks,
            generation,
            "failed to list Stacks\ncaused by: expired token",
        );
        assert_eq!(app.status(), "Stacks load failed: failed to list Stacks");
        assert!(app.active_table().is_some_and(|t| t.error.is_some()));
    }
}
