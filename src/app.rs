use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use throbber_widgets_tui::ThrobberState;
use tracing::debug;

use crate::cache::ResultCache;
use crate::discovery::{AggregationOutcome, Outcome, RoundId};
use crate::error::SetupError;
use crate::model::{
    AppEvent, BrowserPane, ClusterEntry, ClusterInfo, ClusterPane, ClusterScope, ClusterStatus,
    Command, ItemRef, Notification, ProviderEntry, ProviderScope, ProviderStatus, Screen, Severity,
    VmInfo,
};
use crate::providers::ProviderConfig;

pub const MENU: [&str; 3] = ["Clusters", "Providers", "Quit"];
const DEFAULT_VIEWPORT: usize = 10;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchState {
    pub query: String,
    pub typing: bool,
}

impl SearchState {
    fn start(&mut self) {
        self.typing = true;
    }

    /// Applies a key while typing. Returns whether the query changed.
    fn handle(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Esc => {
                self.typing = false;
                let had_query = !self.query.is_empty();
                self.query.clear();
                had_query
            }
            KeyCode::Enter => {
                self.typing = false;
                false
            }
            KeyCode::Backspace => self.query.pop().is_some(),
            KeyCode::Char(c) => {
                self.query.push(c);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClustersView {
    pub entries: Vec<ClusterEntry>,
    pub selected: usize,
    pub detail_row: usize,
    pub search: SearchState,
    pub loading: bool,
    round: Option<RoundId>,
    pending: HashMap<String, RoundId>,
    secrets_requested: HashSet<String>,
}

impl ClustersView {
    pub fn is_refreshing(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }
}

#[derive(Debug)]
pub struct ProvidersView {
    pub entries: Vec<ProviderEntry>,
    pub configs: BTreeMap<String, ProviderConfig>,
    pub selected: usize,
    pub expanded: bool,
    pub tree_row: usize,
    pub vm_selected: usize,
    pub vm_offset: usize,
    pub viewport: usize,
    pub detail_row: usize,
    pub search: SearchState,
    pub loading: bool,
    discovery_round: Option<RoundId>,
    round: Option<RoundId>,
    pending: HashMap<String, RoundId>,
}

impl Default for ProvidersView {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            configs: BTreeMap::new(),
            selected: 0,
            expanded: false,
            tree_row: 0,
            vm_selected: 0,
            vm_offset: 0,
            viewport: DEFAULT_VIEWPORT,
            detail_row: 0,
            search: SearchState::default(),
            loading: false,
            discovery_round: None,
            round: None,
            pending: HashMap::new(),
        }
    }
}

/// Navigation state. `update` is the only mutator and never performs I/O.
pub struct App {
    pub screen: Screen,
    history: Vec<Screen>,
    pub menu_index: usize,
    pub clusters: ClustersView,
    pub providers: ProvidersView,
    pub overlay: Option<String>,
    pub notification: Option<Notification>,
    pub quit: bool,
    pub throbber_state: ThrobberState,
    pub cluster_cache: Arc<ResultCache<ClusterInfo>>,
    pub vm_cache: Arc<ResultCache<Vec<VmInfo>>>,
    notification_ttl: Duration,
    next_round: u64,
}

fn step(current: usize, len: usize, delta: isize) -> usize {
    if len == 0 {
        return 0;
    }
    current.saturating_add_signed(delta).min(len - 1)
}

impl App {
    pub fn new(
        cluster_cache: Arc<ResultCache<ClusterInfo>>,
        vm_cache: Arc<ResultCache<Vec<VmInfo>>>,
        notification_ttl: Duration,
    ) -> Self {
        Self {
            screen: Screen::MainMenu,
            history: Vec::new(),
            menu_index: 0,
            clusters: ClustersView::default(),
            providers: ProvidersView::default(),
            overlay: None,
            notification: None,
            quit: false,
            throbber_state: ThrobberState::default(),
            cluster_cache,
            vm_cache,
            notification_ttl,
            next_round: 0,
        }
    }

    /// Startup loads: one cluster round and one provider round.
    pub fn init(&mut self) -> Vec<Command> {
        vec![self.start_cluster_round(), self.start_provider_round()]
    }

    pub fn is_loading(&self) -> bool {
        self.clusters.loading
            || self.providers.loading
            || !self.clusters.pending.is_empty()
            || !self.providers.pending.is_empty()
    }

    pub fn update(&mut self, event: AppEvent, now: Instant) -> Vec<Command> {
        if self.quit {
            return Vec::new();
        }
        match event {
            AppEvent::Key(key) => self.handle_key(key, now),
            AppEvent::Resize(_, height) => {
                self.providers.viewport = (height as usize).saturating_sub(8).max(1);
                self.ensure_vm_visible();
                Vec::new()
            }
            AppEvent::Tick => {
                if self.notification.as_ref().is_some_and(|n| now >= n.expires_at) {
                    self.notification = None;
                }
                if self.is_loading() {
                    self.throbber_state.calc_next();
                }
                Vec::new()
            }
            AppEvent::ClustersAggregated { round, result } => self.on_clusters(round, result),
            AppEvent::ProvidersDiscovered { round, result } => {
                self.on_providers_discovered(round, result)
            }
            AppEvent::ProvidersAggregated { round, outcome } => self.on_providers(round, outcome),
            AppEvent::ClusterSecretLoaded { name, result } => {
                self.clusters.secrets_requested.remove(&name);
                match result {
                    Ok(password) => self.cluster_cache.put_secret(&name, password),
                    Err(e) => self.notify(format!("Password for {name}: {e}"), Severity::Error, now),
                }
                Vec::new()
            }
            AppEvent::ClipboardResult { label, result } => {
                match result {
                    Ok(()) => self.notify(format!("{label} copied to clipboard"), Severity::Info, now),
                    Err(e) => self.notify(format!("Clipboard error: {e}"), Severity::Error, now),
                }
                Vec::new()
            }
        }
    }

    /// Replaces any current notification.
    pub fn notify(&mut self, text: impl Into<String>, severity: Severity, now: Instant) {
        self.notification = Some(Notification {
            text: text.into(),
            severity,
            expires_at: now + self.notification_ttl,
        });
    }

    fn new_round(&mut self) -> RoundId {
        self.next_round += 1;
        RoundId(self.next_round)
    }

    // ---- clusters -------------------------------------------------------

    pub fn visible_clusters(&self) -> Vec<&ClusterEntry> {
        let query = &self.clusters.search.query;
        self.clusters
            .entries
            .iter()
            .filter(|c| ItemRef::Cluster(*c).matches(query))
            .collect()
    }

    pub fn selected_cluster(&self) -> Option<&ClusterEntry> {
        self.visible_clusters().get(self.clusters.selected).copied()
    }

    /// Rows of the cluster details view, in display order.
    pub fn cluster_detail_rows(&self, entry: &ClusterEntry) -> Vec<(&'static str, String)> {
        let Some(info) = &entry.info else {
            let status = match &entry.status {
                ClusterStatus::Offline(reason) => format!("Offline: {reason}"),
                other => other.label().to_string(),
            };
            return vec![("Name", entry.name.clone()), ("Status", status)];
        };
        let password = self.cluster_cache.get_secret(&entry.name);
        vec![
            ("Name", info.name.clone()),
            ("OCP", info.ocp_version.clone()),
            ("MTV", info.mtv_display()),
            ("CNV", info.cnv_version.clone()),
            ("IIB", info.iib.clone()),
            ("API", info.api_url.clone()),
            ("Console", info.console_url.clone()),
            (
                "Password",
                password.clone().unwrap_or_else(|| "loading...".to_string()),
            ),
            (
                "Login",
                password
                    .map(|pw| info.login_command(&pw))
                    .unwrap_or_else(|| "loading...".to_string()),
            ),
        ]
    }

    fn start_cluster_round(&mut self) -> Command {
        let round = self.new_round();
        self.clusters.round = Some(round);
        self.clusters.pending.clear();
        self.clusters.loading = true;
        for entry in &mut self.clusters.entries {
            entry.status = ClusterStatus::Loading;
            entry.info = None;
        }
        debug!("Cluster round {round} started");
        Command::DispatchClusters {
            round,
            scope: ClusterScope::All,
        }
    }

    fn refresh_all_clusters(&mut self) -> Vec<Command> {
        self.cluster_cache.invalidate_all();
        self.clusters.secrets_requested.clear();
        vec![self.start_cluster_round()]
    }

    fn refresh_selected_cluster(&mut self, now: Instant) -> Vec<Command> {
        let Some(name) = self.selected_cluster().map(|c| c.name.clone()) else {
            self.notify("No cluster selected", Severity::Error, now);
            return Vec::new();
        };
        self.cluster_cache.invalidate_target(&name);
        self.clusters.secrets_requested.remove(&name);
        let round = self.new_round();
        self.clusters.pending.insert(name.clone(), round);
        if let Some(entry) = self.clusters.entries.iter_mut().find(|c| c.name == name) {
            entry.status = ClusterStatus::Loading;
            entry.info = None;
        }
        self.notify(format!("Refreshing {name}..."), Severity::Info, now);
        vec![Command::DispatchClusters {
            round,
            scope: ClusterScope::One(name),
        }]
    }

    fn cluster_entry(&self, name: &str, outcome: &Outcome<ClusterInfo>) -> ClusterEntry {
        let (status, info) = match outcome {
            Outcome::Success(info) => (
                ClusterStatus::Online,
                Some(self.cluster_cache.get(name).unwrap_or_else(|| info.clone())),
            ),
            Outcome::Error(e) => (ClusterStatus::Offline(e.clone()), None),
            Outcome::Timeout => (ClusterStatus::Timeout, None),
        };
        ClusterEntry {
            name: name.to_string(),
            status,
            info,
        }
    }

    fn on_clusters(
        &mut self,
        round: RoundId,
        result: Result<AggregationOutcome<ClusterInfo>, SetupError>,
    ) -> Vec<Command> {
        if self.clusters.round == Some(round) {
            self.clusters.loading = false;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.overlay = Some(e.to_string());
                    return Vec::new();
                }
            };
            // Targets with a refresh-one in flight take their value from that round only.
            let pending = &self.clusters.pending;
            self.cluster_cache
                .merge_where(&outcome, |target| !pending.contains_key(target));
            let mut entries: Vec<ClusterEntry> = outcome
                .results
                .iter()
                .map(|r| self.cluster_entry(&r.target, &r.outcome))
                .collect();
            // A single-target refresh started after this round is still authoritative.
            for entry in &mut entries {
                if self.clusters.pending.contains_key(&entry.name) {
                    entry.status = ClusterStatus::Loading;
                    entry.info = None;
                }
            }
            self.clusters.entries = entries;
        } else if let Some(name) = self
            .clusters
            .pending
            .iter()
            .find(|(_, r)| **r == round)
            .map(|(name, _)| name.clone())
        {
            self.clusters.pending.remove(&name);
            let Ok(outcome) = result else {
                return Vec::new();
            };
            self.cluster_cache.merge(&outcome);
            if let Some(r) = outcome.results.iter().find(|r| r.target == name) {
                let entry = self.cluster_entry(&name, &r.outcome);
                match self.clusters.entries.binary_search_by(|c| c.name.cmp(&name)) {
                    Ok(idx) => self.clusters.entries[idx] = entry,
                    Err(idx) => self.clusters.entries.insert(idx, entry),
                }
            }
        } else {
            debug!("Ignoring stale cluster round {round}");
            return Vec::new();
        }
        self.clamp_cluster_selection();
        self.on_cluster_selection()
    }

    fn clamp_cluster_selection(&mut self) {
        let len = self.visible_clusters().len();
        self.clusters.selected = step(self.clusters.selected, len, 0);
    }

    /// Loads the selected cluster's password when it is online and not cached.
    fn on_cluster_selection(&mut self) -> Vec<Command> {
        self.clusters.detail_row = 0;
        let Some(entry) = self.selected_cluster() else {
            return Vec::new();
        };
        if entry.status != ClusterStatus::Online
            || self.cluster_cache.get_secret(&entry.name).is_some()
            || self.clusters.secrets_requested.contains(&entry.name)
        {
            return Vec::new();
        }
        let name = entry.name.clone();
        self.clusters.secrets_requested.insert(name.clone());
        vec![Command::FetchClusterSecret { name }]
    }

    // ---- providers ------------------------------------------------------

    pub fn selected_provider(&self) -> Option<&ProviderEntry> {
        self.providers.entries.get(self.providers.selected)
    }

    pub fn selected_provider_config(&self) -> Option<&ProviderConfig> {
        self.selected_provider()
            .and_then(|p| self.providers.configs.get(&p.name))
    }

    /// VMs of the selected provider that match the VM search.
    pub fn visible_vms(&self) -> Vec<VmInfo> {
        let Some(provider) = self.selected_provider() else {
            return Vec::new();
        };
        let query = &self.providers.search.query;
        self.vm_cache
            .get(&provider.name)
            .unwrap_or_default()
            .into_iter()
            .filter(|vm| ItemRef::Vm(vm).matches(query))
            .collect()
    }

    pub fn selected_vm(&self) -> Option<VmInfo> {
        self.visible_vms().into_iter().nth(self.providers.vm_selected)
    }

    fn start_provider_round(&mut self) -> Command {
        let round = self.new_round();
        self.providers.discovery_round = Some(round);
        self.providers.round = None;
        self.providers.pending.clear();
        self.providers.loading = true;
        for entry in &mut self.providers.entries {
            entry.status = ProviderStatus::Connecting;
            entry.vm_count = 0;
        }
        debug!("Provider round {round} started");
        Command::DispatchProviders {
            round,
            scope: ProviderScope::All,
        }
    }

    fn refresh_all_providers(&mut self) -> Vec<Command> {
        self.vm_cache.invalidate_all();
        vec![self.start_provider_round()]
    }

    fn refresh_provider(&mut self, name: String, now: Instant) -> Vec<Command> {
        let Some(config) = self.providers.configs.get(&name).cloned() else {
            self.notify(format!("Provider {name} is not configured"), Severity::Error, now);
            return Vec::new();
        };
        self.vm_cache.invalidate_target(&name);
        let round = self.new_round();
        self.providers.pending.insert(name.clone(), round);
        if let Some(entry) = self.providers.entries.iter_mut().find(|p| p.name == name) {
            entry.status = ProviderStatus::Connecting;
            entry.vm_count = 0;
        }
        self.reset_vm_cursor();
        self.notify(format!("Refreshing {name}..."), Severity::Info, now);
        vec![Command::DispatchProviders {
            round,
            scope: ProviderScope::One(name, config),
        }]
    }

    fn on_providers_discovered(
        &mut self,
        round: RoundId,
        result: Result<BTreeMap<String, ProviderConfig>, SetupError>,
    ) -> Vec<Command> {
        if self.providers.discovery_round != Some(round) {
            debug!("Ignoring stale provider discovery {round}");
            return Vec::new();
        }
        match result {
            Ok(configs) => {
                self.providers.entries = configs
                    .iter()
                    .map(|(name, cfg)| ProviderEntry {
                        name: name.clone(),
                        kind: cfg.provider_type.clone(),
                        status: ProviderStatus::Connecting,
                        vm_count: 0,
                    })
                    .collect();
                self.providers.configs = configs;
                self.providers.round = Some(round);
                self.providers.selected =
                    step(self.providers.selected, self.providers.entries.len(), 0);
            }
            Err(e) => {
                self.providers.loading = false;
                self.overlay = Some(e.to_string());
            }
        }
        Vec::new()
    }

    fn apply_provider_outcome(&mut self, name: &str, outcome: &Outcome<Vec<VmInfo>>) {
        let Some(entry) = self.providers.entries.iter_mut().find(|p| p.name == name) else {
            return;
        };
        match outcome {
            Outcome::Success(_) => {
                entry.status = ProviderStatus::Connected;
                entry.vm_count = self.vm_cache.get(name).map(|vms| vms.len()).unwrap_or(0);
            }
            Outcome::Error(e) => entry.status = ProviderStatus::Error(e.clone()),
            Outcome::Timeout => entry.status = ProviderStatus::Error("timed out".to_string()),
        }
    }

    fn on_providers(
        &mut self,
        round: RoundId,
        outcome: AggregationOutcome<Vec<VmInfo>>,
    ) -> Vec<Command> {
        if self.providers.round == Some(round) {
            self.providers.loading = false;
            let pending = &self.providers.pending;
            self.vm_cache
                .merge_where(&outcome, |target| !pending.contains_key(target));
            for r in &outcome.results {
                if !self.providers.pending.contains_key(&r.target) {
                    self.apply_provider_outcome(&r.target, &r.outcome);
                }
            }
        } else if let Some(name) = self
            .providers
            .pending
            .iter()
            .find(|(_, r)| **r == round)
            .map(|(name, _)| name.clone())
        {
            self.providers.pending.remove(&name);
            self.vm_cache.merge(&outcome);
            if let Some(r) = outcome.results.iter().find(|r| r.target == name) {
                self.apply_provider_outcome(&name, &r.outcome);
            }
        } else {
            debug!("Ignoring stale provider round {round}");
            return Vec::new();
        }
        let len = self.visible_vms().len();
        self.providers.vm_selected = step(self.providers.vm_selected, len, 0);
        self.ensure_vm_visible();
        Vec::new()
    }

    fn reset_vm_cursor(&mut self) {
        self.providers.vm_selected = 0;
        self.providers.vm_offset = 0;
        self.providers.detail_row = 0;
    }

    fn ensure_vm_visible(&mut self) {
        let p = &mut self.providers;
        let viewport = p.viewport.max(1);
        if p.vm_selected < p.vm_offset {
            p.vm_offset = p.vm_selected;
        } else if p.vm_selected >= p.vm_offset + viewport {
            p.vm_offset = p.vm_selected + 1 - viewport;
        }
    }

    /// Re-loads VMs for a connected provider whose cache entry has gone.
    fn on_provider_selection(&mut self, now: Instant) -> Vec<Command> {
        self.reset_vm_cursor();
        self.providers.tree_row = 0;
        let Some(entry) = self.selected_provider() else {
            return Vec::new();
        };
        if entry.status == ProviderStatus::Connected
            && !self.vm_cache.contains(&entry.name)
            && !self.providers.pending.contains_key(&entry.name)
        {
            let name = entry.name.clone();
            return self.refresh_provider(name, now);
        }
        Vec::new()
    }

    // ---- keys -----------------------------------------------------------

    fn active_search(&mut self) -> Option<&mut SearchState> {
        match self.screen {
            Screen::Clusters(_) => Some(&mut self.clusters.search),
            Screen::Providers(_) => Some(&mut self.providers.search),
            Screen::MainMenu | Screen::ClusterDetail => None,
        }
    }

    fn go_to(&mut self, screen: Screen) {
        self.history.push(self.screen);
        self.screen = screen;
    }

    fn go_back(&mut self) {
        self.screen = self.history.pop().unwrap_or(Screen::MainMenu);
    }

    fn copy(label: &str, text: String) -> Vec<Command> {
        vec![Command::CopyToClipboard {
            label: label.to_string(),
            text,
        }]
    }

    fn handle_key(&mut self, key: KeyEvent, now: Instant) -> Vec<Command> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            return self.quit();
        }

        if self.overlay.is_some() {
            match key.code {
                KeyCode::Esc | KeyCode::Enter => self.overlay = None,
                KeyCode::Char('q') => return self.quit(),
                _ => {}
            }
            return Vec::new();
        }

        if let Some(search) = self.active_search().filter(|s| s.typing) {
            if search.handle(key.code) {
                return self.on_filter_changed();
            }
            return Vec::new();
        }

        match key.code {
            KeyCode::Char('q') => return self.quit(),
            KeyCode::Char('r') if ctrl => return self.refresh_screen(),
            KeyCode::Char('u') if ctrl => {
                return match self.screen {
                    Screen::Clusters(_) | Screen::ClusterDetail => {
                        self.refresh_selected_cluster(now)
                    }
                    _ => Vec::new(),
                };
            }
            _ => {}
        }

        match self.screen {
            Screen::MainMenu => self.main_menu_key(key.code, now),
            Screen::Clusters(pane) => self.clusters_key(pane, key.code, now),
            Screen::ClusterDetail => self.cluster_detail_key(key.code, now),
            Screen::Providers(pane) => self.providers_key(pane, key.code, now),
        }
    }

    fn quit(&mut self) -> Vec<Command> {
        self.quit = true;
        vec![Command::Quit]
    }

    fn refresh_screen(&mut self) -> Vec<Command> {
        match self.screen {
            Screen::MainMenu => {
                let mut cmds = self.refresh_all_clusters();
                cmds.extend(self.refresh_all_providers());
                cmds
            }
            Screen::Clusters(_) | Screen::ClusterDetail => self.refresh_all_clusters(),
            Screen::Providers(_) => self.refresh_all_providers(),
        }
    }

    fn on_filter_changed(&mut self) -> Vec<Command> {
        match self.screen {
            Screen::Clusters(_) => {
                self.clusters.selected = 0;
                self.on_cluster_selection()
            }
            Screen::Providers(_) => {
                self.reset_vm_cursor();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn main_menu_key(&mut self, code: KeyCode, now: Instant) -> Vec<Command> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.menu_index = step(self.menu_index, MENU.len(), -1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.menu_index = step(self.menu_index, MENU.len(), 1);
            }
            KeyCode::Enter => match self.menu_index {
                0 => {
                    self.go_to(Screen::Clusters(ClusterPane::List));
                    return self.on_cluster_selection();
                }
                1 => {
                    self.go_to(Screen::Providers(BrowserPane::Providers));
                    return self.on_provider_selection(now);
                }
                _ => return self.quit(),
            },
            _ => {}
        }
        Vec::new()
    }

    fn move_cluster(&mut self, delta: isize) -> Vec<Command> {
        let len = self.visible_clusters().len();
        let next = step(self.clusters.selected, len, delta);
        if next == self.clusters.selected {
            return Vec::new();
        }
        self.clusters.selected = next;
        self.on_cluster_selection()
    }

    fn copy_cluster_row(&mut self, now: Instant) -> Vec<Command> {
        let Some(entry) = self.selected_cluster() else {
            return Vec::new();
        };
        let rows = self.cluster_detail_rows(entry);
        let Some((label, value)) = rows.get(self.clusters.detail_row) else {
            return Vec::new();
        };
        if (*label == "Password" || *label == "Login")
            && self.cluster_cache.get_secret(&entry.name).is_none()
        {
            self.notify("Password not loaded yet", Severity::Error, now);
            return Vec::new();
        }
        Self::copy(label, value.clone())
    }

    fn move_cluster_detail(&mut self, delta: isize) {
        let len = self
            .selected_cluster()
            .map(|c| self.cluster_detail_rows(c).len())
            .unwrap_or(0);
        self.clusters.detail_row = step(self.clusters.detail_row, len, delta);
    }

    fn clusters_key(&mut self, pane: ClusterPane, code: KeyCode, now: Instant) -> Vec<Command> {
        match code {
            KeyCode::Tab | KeyCode::BackTab => {
                let next = match pane {
                    ClusterPane::List => ClusterPane::Detail,
                    ClusterPane::Detail => ClusterPane::List,
                };
                self.screen = Screen::Clusters(next);
            }
            KeyCode::Char('/') => {
                self.screen = Screen::Clusters(ClusterPane::List);
                self.clusters.search.start();
            }
            KeyCode::Esc if !self.clusters.search.query.is_empty() => {
                self.clusters.search.query.clear();
                return self.on_filter_changed();
            }
            KeyCode::Esc => self.go_back(),
            _ => {}
        }
        match (pane, code) {
            (ClusterPane::List, KeyCode::Up | KeyCode::Char('k')) => self.move_cluster(-1),
            (ClusterPane::List, KeyCode::Down | KeyCode::Char('j')) => self.move_cluster(1),
            (ClusterPane::List, KeyCode::Enter) => {
                if self.selected_cluster().is_some() {
                    self.go_to(Screen::ClusterDetail);
                }
                Vec::new()
            }
            (ClusterPane::Detail, KeyCode::Up | KeyCode::Char('k')) => {
                self.move_cluster_detail(-1);
                Vec::new()
            }
            (ClusterPane::Detail, KeyCode::Down | KeyCode::Char('j')) => {
                self.move_cluster_detail(1);
                Vec::new()
            }
            (ClusterPane::Detail, KeyCode::Enter) => self.copy_cluster_row(now),
            _ => Vec::new(),
        }
    }

    fn cluster_detail_key(&mut self, code: KeyCode, now: Instant) -> Vec<Command> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => self.move_cluster_detail(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cluster_detail(1),
            KeyCode::Enter => return self.copy_cluster_row(now),
            KeyCode::Esc => self.go_back(),
            _ => {}
        }
        Vec::new()
    }

    fn move_vm(&mut self, delta: isize) {
        let len = self.visible_vms().len();
        let next = step(self.providers.vm_selected, len, delta);
        if next != self.providers.vm_selected {
            self.providers.vm_selected = next;
            self.providers.detail_row = 0;
        }
        self.ensure_vm_visible();
    }

    fn providers_key(&mut self, pane: BrowserPane, code: KeyCode, now: Instant) -> Vec<Command> {
        match code {
            KeyCode::Tab => {
                self.screen = Screen::Providers(pane.next());
                return Vec::new();
            }
            KeyCode::BackTab => {
                self.screen = Screen::Providers(pane.prev());
                return Vec::new();
            }
            KeyCode::Char('/') => {
                self.screen = Screen::Providers(BrowserPane::Vms);
                self.providers.search.start();
                return Vec::new();
            }
            KeyCode::Char('r') => {
                return match self.selected_provider().map(|p| p.name.clone()) {
                    Some(name) => self.refresh_provider(name, now),
                    None => Vec::new(),
                };
            }
            KeyCode::Esc if !self.providers.search.query.is_empty() => {
                self.providers.search.query.clear();
                return self.on_filter_changed();
            }
            KeyCode::Esc => {
                self.go_back();
                return Vec::new();
            }
            _ => {}
        }

        let page = self.providers.viewport.max(1) as isize;
        match pane {
            BrowserPane::Providers => self.provider_pane_key(code, now),
            BrowserPane::Vms => {
                match code {
                    KeyCode::Up | KeyCode::Char('k') => self.move_vm(-1),
                    KeyCode::Down | KeyCode::Char('j') => self.move_vm(1),
                    KeyCode::PageUp => self.move_vm(-page),
                    KeyCode::PageDown => self.move_vm(page),
                    KeyCode::Enter if self.selected_vm().is_some() => {
                        self.screen = Screen::Providers(BrowserPane::Details);
                    }
                    _ => {}
                }
                Vec::new()
            }
            BrowserPane::Details => {
                let rows = self
                    .selected_vm()
                    .map(|vm| vm.detail_rows())
                    .unwrap_or_default();
                match code {
                    KeyCode::Up | KeyCode::Char('k') => {
                        self.providers.detail_row = step(self.providers.detail_row, rows.len(), -1);
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        self.providers.detail_row = step(self.providers.detail_row, rows.len(), 1);
                    }
                    KeyCode::Enter => {
                        if let Some((label, value)) = rows.into_iter().nth(self.providers.detail_row) {
                            return Self::copy(label, value);
                        }
                    }
                    _ => {}
                }
                Vec::new()
            }
        }
    }

    fn provider_pane_key(&mut self, code: KeyCode, now: Instant) -> Vec<Command> {
        let tree_len = self
            .selected_provider_config()
            .map(|c| c.tree_rows().len())
            .unwrap_or(0);
        match (self.providers.expanded, code) {
            (_, KeyCode::Right) if tree_len > 0 => {
                self.providers.expanded = true;
            }
            (_, KeyCode::Left) => {
                self.providers.expanded = false;
                self.providers.tree_row = 0;
            }
            (false, KeyCode::Enter) if tree_len > 0 => {
                self.providers.expanded = true;
            }
            (true, KeyCode::Up | KeyCode::Char('k')) => {
                self.providers.tree_row = step(self.providers.tree_row, tree_len, -1);
            }
            (true, KeyCode::Down | KeyCode::Char('j')) => {
                self.providers.tree_row = step(self.providers.tree_row, tree_len, 1);
            }
            (true, KeyCode::Enter) => {
                let row = self
                    .selected_provider_config()
                    .and_then(|c| c.tree_rows().into_iter().nth(self.providers.tree_row));
                if let Some((label, value)) = row {
                    return Self::copy(label, value);
                }
            }
            (false, KeyCode::Up | KeyCode::Char('k') | KeyCode::Down | KeyCode::Char('j')) => {
                let delta = if matches!(code, KeyCode::Up | KeyCode::Char('k')) {
                    -1
                } else {
                    1
                };
                let next = step(self.providers.selected, self.providers.entries.len(), delta);
                if next != self.providers.selected {
                    self.providers.selected = next;
                    return self.on_provider_selection(now);
                }
            }
            _ => {}
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ConnectionResult;
    use std::collections::BTreeSet;

    fn app() -> App {
        App::new(
            Arc::new(ResultCache::new()),
            Arc::new(ResultCache::new()),
            Duration::from_secs(3),
        )
    }

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> AppEvent {
        AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    fn info(name: &str) -> ClusterInfo {
        ClusterInfo {
            name: name.to_string(),
            ocp_version: "4.19.3".to_string(),
            mtv_version: "2.9.1".to_string(),
            cnv_version: "4.19.0".to_string(),
            iib: "N/A".to_string(),
            api_url: format!("https://api.{name}.example:6443"),
            console_url: format!("https://console.{name}.example"),
        }
    }

    fn cluster_outcome(results: Vec<(&str, Outcome<ClusterInfo>)>) -> AggregationOutcome<ClusterInfo> {
        let timed_out = results
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Timeout))
            .map(|(n, _)| n.to_string())
            .collect::<BTreeSet<_>>();
        AggregationOutcome {
            results: results
                .into_iter()
                .map(|(target, outcome)| ConnectionResult {
                    target: target.to_string(),
                    outcome,
                })
                .collect(),
            timed_out,
        }
    }

    fn round_of(cmd: &Command) -> RoundId {
        match cmd {
            Command::DispatchClusters { round, .. } | Command::DispatchProviders { round, .. } => {
                *round
            }
            other => panic!("not a dispatch: {other:?}"),
        }
    }

    /// App with three clusters loaded (b offline) and the cluster screen open.
    fn app_with_clusters() -> (App, Instant) {
        let now = Instant::now();
        let mut app = app();
        let cmds = app.init();
        let round = round_of(&cmds[0]);
        app.update(
            AppEvent::ClustersAggregated {
                round,
                result: Ok(cluster_outcome(vec![
                    ("qemtv-a", Outcome::Success(info("qemtv-a"))),
                    ("qemtv-b", Outcome::Error("login failed".to_string())),
                    ("qemtv-c", Outcome::Success(info("qemtv-c"))),
                ])),
            },
            now,
        );
        app.update(key(KeyCode::Enter), now);
        (app, now)
    }

    fn vm(name: &str, state: &str) -> VmInfo {
        VmInfo {
            name: name.to_string(),
            provider: "vmware".to_string(),
            power_state: state.to_string(),
            ..Default::default()
        }
    }

    fn provider_config(kind: &str) -> ProviderConfig {
        ProviderConfig {
            provider_type: kind.to_string(),
            url: format!("https://{kind}.example"),
            username: "admin".to_string(),
            password: "pw".to_string(),
            insecure: true,
            ..Default::default()
        }
    }

    /// App with two providers discovered, `vc` connected with 25 VMs, `rhv` failed.
    fn app_with_providers() -> (App, Instant) {
        let now = Instant::now();
        let mut app = app();
        let cmds = app.init();
        let round = round_of(&cmds[1]);
        app.update(
            AppEvent::ProvidersDiscovered {
                round,
                result: Ok(BTreeMap::from([
                    ("rhv".to_string(), provider_config("ovirt")),
                    ("vc".to_string(), provider_config("vmware")),
                ])),
            },
            now,
        );
        let vms = (0..25).map(|i| vm(&format!("vm-{i:02}"), "poweredOn")).collect();
        app.update(
            AppEvent::ProvidersAggregated {
                round,
                outcome: AggregationOutcome {
                    results: vec![
                        ConnectionResult {
                            target: "rhv".to_string(),
                            outcome: Outcome::Error("401".to_string()),
                        },
                        ConnectionResult {
                            target: "vc".to_string(),
                            outcome: Outcome::Success(vms),
                        },
                    ],
                    timed_out: BTreeSet::new(),
                },
            },
            now,
        );
        app.menu_index = 1;
        app.update(key(KeyCode::Enter), now);
        (app, now)
    }

    #[test]
    fn init_dispatches_both_rounds() {
        let mut app = app();
        let cmds = app.init();
        assert!(matches!(
            cmds[0],
            Command::DispatchClusters { scope: ClusterScope::All, .. }
        ));
        assert!(matches!(
            cmds[1],
            Command::DispatchProviders { scope: ProviderScope::All, .. }
        ));
        assert_ne!(round_of(&cmds[0]), round_of(&cmds[1]));
        assert!(app.is_loading());
        assert_eq!(app.screen, Screen::MainMenu);
    }

    #[test]
    fn cluster_round_fills_list_and_fetches_first_password() {
        let now = Instant::now();
        let mut app = app();
        let round = round_of(&app.init()[0]);
        let cmds = app.update(
            AppEvent::ClustersAggregated {
                round,
                result: Ok(cluster_outcome(vec![
                    ("qemtv-a", Outcome::Success(info("qemtv-a"))),
                    ("qemtv-b", Outcome::Timeout),
                ])),
            },
            now,
        );
        assert_eq!(
            cmds,
            vec![Command::FetchClusterSecret {
                name: "qemtv-a".to_string()
            }]
        );
        assert_eq!(app.clusters.entries[1].status, ClusterStatus::Timeout);
        assert!(app.cluster_cache.contains("qemtv-a"));
        assert!(!app.cluster_cache.contains("qemtv-b"));
        assert!(!app.clusters.loading);
    }

    #[test]
    fn stale_round_is_ignored() {
        let (mut app, now) = app_with_clusters();
        let before = app.clusters.entries.clone();
        let cmds = app.update(
            AppEvent::ClustersAggregated {
                round: RoundId(999),
                result: Ok(cluster_outcome(vec![("qemtv-z", Outcome::Timeout)])),
            },
            now,
        );
        assert!(cmds.is_empty());
        assert_eq!(app.clusters.entries, before);
    }

    #[test]
    fn setup_error_becomes_overlay() {
        let now = Instant::now();
        let mut app = app();
        let round = round_of(&app.init()[0]);
        app.update(
            AppEvent::ClustersAggregated {
                round,
                result: Err(SetupError::Enumerate {
                    path: "/mnt/x".to_string(),
                    reason: "No such file or directory".to_string(),
                }),
            },
            now,
        );
        assert!(app.overlay.as_deref().is_some_and(|o| o.contains("/mnt/x")));
        // Any key dismisses the overlay without acting on the screen.
        app.update(key(KeyCode::Esc), now);
        assert!(app.overlay.is_none());
        assert_eq!(app.screen, Screen::MainMenu);
    }

    #[test]
    fn refresh_one_touches_only_selected_cluster() {
        let (mut app, now) = app_with_clusters();
        app.cluster_cache.put_secret("qemtv-a", "pw-a".to_string());
        app.cluster_cache.put_secret("qemtv-c", "pw-c".to_string());

        let cmds = app.update(ctrl('u'), now);
        let round = round_of(&cmds[0]);
        assert_eq!(
            cmds[0],
            Command::DispatchClusters {
                round,
                scope: ClusterScope::One("qemtv-a".to_string())
            }
        );
        assert_eq!(app.clusters.entries[0].status, ClusterStatus::Loading);
        assert!(!app.cluster_cache.contains("qemtv-a"));
        assert_eq!(app.cluster_cache.get_secret("qemtv-a"), None);
        assert!(app.cluster_cache.contains("qemtv-c"));
        assert_eq!(app.cluster_cache.get_secret("qemtv-c").as_deref(), Some("pw-c"));
        assert!(app.clusters.is_refreshing("qemtv-a"));

        let mut fresh = info("qemtv-a");
        fresh.ocp_version = "4.20.0".to_string();
        let cmds = app.update(
            AppEvent::ClustersAggregated {
                round,
                result: Ok(cluster_outcome(vec![("qemtv-a", Outcome::Success(fresh))])),
            },
            now,
        );
        assert_eq!(app.clusters.entries.len(), 3);
        assert_eq!(
            app.clusters.entries[0].info.as_ref().map(|i| i.ocp_version.as_str()),
            Some("4.20.0")
        );
        assert!(!app.clusters.is_refreshing("qemtv-a"));
        // Password was invalidated, so it is fetched again.
        assert_eq!(
            cmds,
            vec![Command::FetchClusterSecret {
                name: "qemtv-a".to_string()
            }]
        );
    }

    #[test]
    fn refresh_all_clears_cache_and_redispatches() {
        let (mut app, now) = app_with_clusters();
        let cmds = app.update(ctrl('r'), now);
        assert!(matches!(
            cmds.as_slice(),
            [Command::DispatchClusters { scope: ClusterScope::All, .. }]
        ));
        assert!(app.cluster_cache.is_empty());
        assert!(app.clusters.entries.iter().all(|c| c.status == ClusterStatus::Loading));
    }

    #[test]
    fn search_filters_without_touching_cache() {
        let (mut app, now) = app_with_clusters();
        app.update(key(KeyCode::Char('/')), now);
        for c in "zzz".chars() {
            app.update(key(KeyCode::Char(c)), now);
        }
        assert!(app.visible_clusters().is_empty());
        assert_eq!(app.cluster_cache.len(), 2);

        // `q` while typing is text, not quit.
        app.update(key(KeyCode::Char('q')), now);
        assert!(!app.quit);

        app.update(key(KeyCode::Esc), now);
        assert_eq!(app.visible_clusters().len(), 3);
        assert!(!app.clusters.search.typing);

        app.update(key(KeyCode::Char('/')), now);
        for c in "OFFLINE".chars() {
            app.update(key(KeyCode::Char(c)), now);
        }
        app.update(key(KeyCode::Enter), now);
        assert!(!app.clusters.search.typing);
        let names: Vec<_> = app.visible_clusters().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["qemtv-b"]);
        // Esc with an active filter clears it before navigating back.
        app.update(key(KeyCode::Esc), now);
        assert_eq!(app.visible_clusters().len(), 3);
        assert_eq!(app.screen, Screen::Clusters(ClusterPane::List));
    }

    #[test]
    fn navigation_between_screens_and_panes() {
        let (mut app, now) = app_with_clusters();
        assert_eq!(app.screen, Screen::Clusters(ClusterPane::List));
        app.update(key(KeyCode::Tab), now);
        assert_eq!(app.screen, Screen::Clusters(ClusterPane::Detail));
        app.update(key(KeyCode::BackTab), now);
        app.update(key(KeyCode::Enter), now);
        assert_eq!(app.screen, Screen::ClusterDetail);
        app.update(key(KeyCode::Esc), now);
        assert_eq!(app.screen, Screen::Clusters(ClusterPane::List));
        app.update(key(KeyCode::Esc), now);
        assert_eq!(app.screen, Screen::MainMenu);
    }

    #[test]
    fn copy_detail_field_and_report_result() {
        let (mut app, now) = app_with_clusters();
        app.update(key(KeyCode::Enter), now);
        app.update(key(KeyCode::Down), now);
        let cmds = app.update(key(KeyCode::Enter), now);
        assert_eq!(
            cmds,
            vec![Command::CopyToClipboard {
                label: "OCP".to_string(),
                text: "4.19.3".to_string()
            }]
        );

        // Password row before the secret arrives.
        for _ in 0..6 {
            app.update(key(KeyCode::Down), now);
        }
        assert!(app.update(key(KeyCode::Enter), now).is_empty());
        assert_eq!(
            app.notification.as_ref().map(|n| n.severity),
            Some(Severity::Error)
        );

        app.update(
            AppEvent::ClusterSecretLoaded {
                name: "qemtv-a".to_string(),
                result: Ok("s3cret".to_string()),
            },
            now,
        );
        assert_eq!(
            app.update(key(KeyCode::Enter), now),
            vec![Command::CopyToClipboard {
                label: "Password".to_string(),
                text: "s3cret".to_string()
            }]
        );

        app.update(
            AppEvent::ClipboardResult {
                label: "Password".to_string(),
                result: Err("no display".to_string()),
            },
            now,
        );
        let n = app.notification.clone().unwrap();
        assert_eq!(n.severity, Severity::Error);
        assert!(n.text.contains("no display"));

        app.update(
            AppEvent::ClipboardResult {
                label: "Password".to_string(),
                result: Ok(()),
            },
            now,
        );
        assert_eq!(app.notification.as_ref().map(|n| n.severity), Some(Severity::Info));
    }

    #[test]
    fn notifications_expire_on_tick() {
        let mut app = app();
        let now = Instant::now();
        app.notify("hello", Severity::Info, now);
        app.update(AppEvent::Tick, now + Duration::from_secs(2));
        assert!(app.notification.is_some());
        app.update(AppEvent::Tick, now + Duration::from_secs(3));
        assert!(app.notification.is_none());
    }

    #[test]
    fn quit_ends_the_machine() {
        let mut app = app();
        let now = Instant::now();
        assert_eq!(app.update(key(KeyCode::Char('q')), now), vec![Command::Quit]);
        assert!(app.quit);
        assert!(app.update(ctrl('r'), now).is_empty());
    }

    #[test]
    fn provider_round_populates_rows() {
        let (app, _) = app_with_providers();
        assert_eq!(app.screen, Screen::Providers(BrowserPane::Providers));
        assert_eq!(app.providers.entries[0].name, "rhv");
        assert!(matches!(app.providers.entries[0].status, ProviderStatus::Error(_)));
        assert_eq!(app.providers.entries[1].status, ProviderStatus::Connected);
        assert_eq!(app.providers.entries[1].vm_count, 25);
        assert!(!app.providers.loading);
    }

    #[test]
    fn vm_paging_and_search() {
        let (mut app, now) = app_with_providers();
        app.update(key(KeyCode::Down), now);
        assert_eq!(app.selected_provider().map(|p| p.name.as_str()), Some("vc"));
        app.update(key(KeyCode::Tab), now);
        assert_eq!(app.screen, Screen::Providers(BrowserPane::Vms));

        app.update(key(KeyCode::PageDown), now);
        assert_eq!(app.providers.vm_selected, 10);
        assert_eq!(app.providers.vm_offset, 1);
        app.update(key(KeyCode::PageDown), now);
        app.update(key(KeyCode::PageDown), now);
        assert_eq!(app.providers.vm_selected, 24);
        app.update(key(KeyCode::PageUp), now);
        assert_eq!(app.providers.vm_selected, 14);

        app.update(key(KeyCode::Char('/')), now);
        for c in "vm-2".chars() {
            app.update(key(KeyCode::Char(c)), now);
        }
        assert_eq!(app.visible_vms().len(), 5);
        assert_eq!(app.providers.vm_selected, 0);
        app.update(key(KeyCode::Enter), now);
        app.update(key(KeyCode::Enter), now);
        assert_eq!(app.screen, Screen::Providers(BrowserPane::Details));
        let cmds = app.update(key(KeyCode::Enter), now);
        assert_eq!(
            cmds,
            vec![Command::CopyToClipboard {
                label: "Name".to_string(),
                text: "vm-20".to_string()
            }]
        );
    }

    #[test]
    fn provider_tree_expand_copy_collapse() {
        let (mut app, now) = app_with_providers();
        app.update(key(KeyCode::Right), now);
        assert!(app.providers.expanded);
        app.update(key(KeyCode::Down), now);
        let cmds = app.update(key(KeyCode::Enter), now);
        assert_eq!(
            cmds,
            vec![Command::CopyToClipboard {
                label: "URL".to_string(),
                text: "https://ovirt.example".to_string()
            }]
        );
        app.update(key(KeyCode::Left), now);
        assert!(!app.providers.expanded);
        // Selection still on the first provider while the tree was open.
        assert_eq!(app.providers.selected, 0);
    }

    #[test]
    fn refresh_selected_provider_is_a_single_round() {
        let (mut app, now) = app_with_providers();
        app.update(key(KeyCode::Down), now);
        let cmds = app.update(key(KeyCode::Char('r')), now);
        let round = round_of(&cmds[0]);
        assert!(matches!(
            &cmds[0],
            Command::DispatchProviders { scope: ProviderScope::One(name, cfg), .. }
                if name == "vc" && cfg.provider_type == "vmware"
        ));
        assert_eq!(app.providers.entries[1].status, ProviderStatus::Connecting);
        assert!(!app.vm_cache.contains("vc"));
        assert!(matches!(app.providers.entries[0].status, ProviderStatus::Error(_)));

        app.update(
            AppEvent::ProvidersAggregated {
                round,
                outcome: AggregationOutcome {
                    results: vec![ConnectionResult {
                        target: "vc".to_string(),
                        outcome: Outcome::Success(vec![vm("solo", "poweredOff")]),
                    }],
                    timed_out: BTreeSet::new(),
                },
            },
            now,
        );
        assert_eq!(app.providers.entries[1].vm_count, 1);
        assert_eq!(app.visible_vms()[0].name, "solo");
    }

    #[test]
    fn provider_setup_failure_shows_overlay() {
        let now = Instant::now();
        let mut app = app();
        let round = round_of(&app.init()[1]);
        app.update(
            AppEvent::ProvidersDiscovered {
                round,
                result: Err(SetupError::NoProviders),
            },
            now,
        );
        assert!(app.overlay.is_some());
        assert!(!app.providers.loading);
    }

    #[test]
    fn refresh_one_result_survives_full_round_landing_first() {
        let (mut app, now) = app_with_clusters();
        let full = round_of(&app.update(ctrl('r'), now)[0]);
        let single = round_of(&app.update(ctrl('u'), now)[0]);
        assert_ne!(full, single);

        let mut stale = info("qemtv-a");
        stale.ocp_version = "stale".to_string();
        app.update(
            AppEvent::ClustersAggregated {
                round: full,
                result: Ok(cluster_outcome(vec![
                    ("qemtv-a", Outcome::Success(stale)),
                    ("qemtv-c", Outcome::Success(info("qemtv-c"))),
                ])),
            },
            now,
        );
        assert_eq!(app.clusters.entries[0].status, ClusterStatus::Loading);
        assert!(!app.cluster_cache.contains("qemtv-a"));
        assert!(app.cluster_cache.contains("qemtv-c"));

        let mut fresh = info("qemtv-a");
        fresh.ocp_version = "fresh".to_string();
        app.update(
            AppEvent::ClustersAggregated {
                round: single,
                result: Ok(cluster_outcome(vec![("qemtv-a", Outcome::Success(fresh))])),
            },
            now,
        );
        let shown = app.clusters.entries[0].info.as_ref().map(|i| i.ocp_version.clone());
        assert_eq!(shown.as_deref(), Some("fresh"));
        assert_eq!(
            app.cluster_cache.get("qemtv-a").map(|i| i.ocp_version),
            Some("fresh".to_string())
        );
    }

    #[test]
    fn provider_refresh_survives_full_round_landing_first() {
        let (mut app, now) = app_with_providers();
        let full = round_of(&app.update(ctrl('r'), now)[0]);
        app.update(key(KeyCode::Down), now);
        let single = round_of(&app.update(key(KeyCode::Char('r')), now)[0]);

        app.update(
            AppEvent::ProvidersDiscovered {
                round: full,
                result: Ok(BTreeMap::from([
                    ("rhv".to_string(), provider_config("ovirt")),
                    ("vc".to_string(), provider_config("vmware")),
                ])),
            },
            now,
        );
        app.update(
            AppEvent::ProvidersAggregated {
                round: full,
                outcome: AggregationOutcome {
                    results: vec![ConnectionResult {
                        target: "vc".to_string(),
                        outcome: Outcome::Success(vec![vm("stale-1", "up"), vm("stale-2", "up")]),
                    }],
                    timed_out: BTreeSet::new(),
                },
            },
            now,
        );
        assert!(!app.vm_cache.contains("vc"));
        assert_eq!(app.providers.entries[1].status, ProviderStatus::Connecting);

        app.update(
            AppEvent::ProvidersAggregated {
                round: single,
                outcome: AggregationOutcome {
                    results: vec![ConnectionResult {
                        target: "vc".to_string(),
                        outcome: Outcome::Success(vec![vm("fresh", "poweredOn")]),
                    }],
                    timed_out: BTreeSet::new(),
                },
            },
            now,
        );
        assert_eq!(app.providers.entries[1].status, ProviderStatus::Connected);
        assert_eq!(app.providers.entries[1].vm_count, 1);
        assert_eq!(app.visible_vms()[0].name, "fresh");
    }

    #[test]
    fn notifications_expire_on_the_event_clock() {
        let (mut app, now) = app_with_clusters();
        let later = now + Duration::from_secs(100);
        app.update(key(KeyCode::Tab), later);
        for _ in 0..7 {
            app.update(key(KeyCode::Down), later);
        }
        // Password row, secret not loaded yet.
        assert!(app.update(key(KeyCode::Enter), later).is_empty());
        let notice = app.notification.clone().unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.expires_at, later + Duration::from_secs(3));

        let (mut app, now) = app_with_providers();
        let later = now + Duration::from_secs(50);
        app.vm_cache.invalidate("vc");
        let cmds = app.update(key(KeyCode::Down), later);
        assert!(matches!(
            cmds.as_slice(),
            [Command::DispatchProviders { scope: ProviderScope::One(name, _), .. }] if name == "vc"
        ));
        assert_eq!(
            app.notification.map(|n| n.expires_at),
            Some(later + Duration::from_secs(3))
        );
    }
}
