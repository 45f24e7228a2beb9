//! Plugin manager: discovery, load order, lifecycle, dispatch.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use core_native::NativeModule;
use core_script::{Action, Capabilities, Program, Sandbox, ScriptError, ScriptHost};
use tracing::{debug, info, warn};

use crate::manifest::{MANIFEST_FILE, PluginKind, PluginManifest};
use crate::{EditorEvent, PluginError, PluginState};

/// Default per-callback wall budget; exceeding it is logged, not preempted.
pub const DEFAULT_CALLBACK_BUDGET: Duration = Duration::from_millis(50);

/// Result of scanning the plugin roots. Plugins are id-sorted; the first
/// occurrence of an id wins and later ones are reported as duplicates.
#[derive(Default)]
pub struct DiscoveryReport {
    pub plugins: Vec<(PluginManifest, PathBuf)>,
    pub duplicates: Vec<(String, PathBuf)>,
    pub errors: Vec<(PathBuf, PluginError)>,
}

/// Scan each root's top-level entries for manifest files. Roots are scanned
/// in the order given; entries within a root lexicographically, so the
/// outcome is deterministic.
pub fn discover(roots: &[PathBuf]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen: BTreeMap<String, (PluginManifest, PathBuf)> = BTreeMap::new();
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            debug!(target: "plugin.manager", root = %root.display(), "plugin root unreadable, skipping");
            continue;
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        for dir in dirs {
            let manifest_path = dir.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match PluginManifest::load(&manifest_path) {
                Ok(manifest) => {
                    if seen.contains_key(&manifest.id) {
                        warn!(target: "plugin.manager", id = %manifest.id, path = %dir.display(), "duplicate plugin id ignored");
                        report.duplicates.push((manifest.id, dir));
                    } else {
                        seen.insert(manifest.id.clone(), (manifest, dir));
                    }
                }
                Err(err) => report.errors.push((manifest_path, err)),
            }
        }
    }
    report.plugins = seen.into_values().collect();
    report
}

/// Dependency-ordered load plan plus per-plugin resolution failures.
pub struct Resolution {
    pub order: Vec<String>,
    pub failures: BTreeMap<String, PluginError>,
}

/// Topological sort by manifest id with deterministic tie-breaking. Missing
/// dependencies fail the dependent (transitively); a cycle fails every
/// member, reported as one representative cycle.
pub fn resolve_order(plugins: &[(PluginManifest, PathBuf)]) -> Resolution {
    let ids: BTreeSet<&str> = plugins.iter().map(|(m, _)| m.id.as_str()).collect();
    let mut failures: BTreeMap<String, PluginError> = BTreeMap::new();

    // Direct missing dependencies, then transitive propagation.
    for (manifest, _) in plugins {
        for dep in &manifest.dependencies {
            if !ids.contains(dep.as_str()) {
                failures.insert(
                    manifest.id.clone(),
                    PluginError::UnsatisfiedDependency {
                        plugin: manifest.id.clone(),
                        missing: dep.clone(),
                    },
                );
                break;
            }
        }
    }
    loop {
        let mut changed = false;
        for (manifest, _) in plugins {
            if failures.contains_key(&manifest.id) {
                continue;
            }
            if let Some(dep) = manifest
                .dependencies
                .iter()
                .find(|d| failures.contains_key(*d))
            {
                failures.insert(
                    manifest.id.clone(),
                    PluginError::UnsatisfiedDependency {
                        plugin: manifest.id.clone(),
                        missing: dep.clone(),
                    },
                );
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Kahn over the survivors.
    let mut remaining: BTreeMap<&str, BTreeSet<&str>> = plugins
        .iter()
        .filter(|(m, _)| !failures.contains_key(&m.id))
        .map(|(m, _)| {
            let deps: BTreeSet<&str> = m
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| ids.contains(d) && !failures.contains_key(*d))
                .collect();
            (m.id.as_str(), deps)
        })
        .collect();
    let mut order = Vec::new();
    loop {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            remaining.remove(id);
            order.push(id.to_string());
            for deps in remaining.values_mut() {
                deps.remove(id);
            }
        }
    }
    if !remaining.is_empty() {
        let members = representative_cycle(&remaining);
        warn!(target: "plugin.manager", cycle = ?members, "dependency cycle");
        for id in remaining.keys() {
            failures.insert(
                id.to_string(),
                PluginError::DependencyCycle {
                    members: members.clone(),
                },
            );
        }
    }
    Resolution { order, failures }
}

/// Walk first-dependency edges from the smallest stuck node until a node
/// repeats; the loop found is the representative cycle, sorted by id.
fn representative_cycle(remaining: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    let mut path: Vec<&str> = Vec::new();
    let mut current = *remaining.keys().next().expect("non-empty cycle set");
    loop {
        if let Some(pos) = path.iter().position(|id| *id == current) {
            let mut members: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            members.sort();
            return members;
        }
        path.push(current);
        current = match remaining.get(current).and_then(|deps| deps.iter().next()) {
            Some(next) => *next,
            // Dangling edge inside the stuck set; treat the walked path as
            // the representative.
            None => {
                let mut members: Vec<String> = path.iter().map(|s| s.to_string()).collect();
                members.sort();
                return members;
            }
        };
    }
}

enum PluginHandle {
    Script { host: ScriptHost, program: Program },
    Native(NativeModule),
}

/// Runtime object for one plugin. Owned exclusively by the manager.
pub struct PluginInstance {
    manifest: PluginManifest,
    origin_path: PathBuf,
    kind: Option<PluginKind>,
    state: PluginState,
    handle: Option<PluginHandle>,
    token: u64,
    last_error: Option<String>,
    themes: Vec<String>,
}

impl PluginInstance {
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn origin_path(&self) -> &Path {
        &self.origin_path
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn kind(&self) -> Option<PluginKind> {
        self.kind
    }

    /// Opaque bridge token identifying this instance in audit logs.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn registered_themes(&self) -> &[String] {
        &self.themes
    }

    /// Host statistics for script instances.
    pub fn script_stats(&self) -> Option<core_script::HostStats> {
        match &self.handle {
            Some(PluginHandle::Script { host, .. }) => Some(host.stats()),
            _ => None,
        }
    }
}

/// Theme registration callbacks supplied by the embedder.
pub struct ThemeHooks {
    pub register: Box<dyn FnMut(&str, &str, &str)>,
    pub unregister: Box<dyn FnMut(&str, &str)>,
}

impl ThemeHooks {
    pub fn noop() -> Self {
        Self {
            register: Box::new(|_, _, _| {}),
            unregister: Box::new(|_, _| {}),
        }
    }
}

/// Wraps the editor capabilities so theme registrations route through the
/// manager's hooks and are remembered for unload cleanup.
struct ThemeCaps<'a> {
    inner: &'a mut dyn Capabilities,
    hooks: &'a mut ThemeHooks,
    plugin_id: &'a str,
    themes: &'a mut Vec<String>,
}

impl Capabilities for ThemeCaps<'_> {
    fn apply(&mut self, sandbox: &mut Sandbox, action: &Action) -> Result<(), ScriptError> {
        match action {
            Action::RegisterTheme(name) => {
                // Scripts carry only the theme name; colors arrive later via
                // the theme loader, so the payload starts empty.
                (self.hooks.register)(self.plugin_id, name, "{}");
                if !self.themes.contains(name) {
                    self.themes.push(name.clone());
                }
                Ok(())
            }
            other => self.inner.apply(sandbox, other),
        }
    }
}

/// Outcome of one event dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: u32,
    pub failed: u32,
}

pub struct PluginManager {
    instances: BTreeMap<String, PluginInstance>,
    load_order: Vec<String>,
    theme_hooks: ThemeHooks,
    callback_budget: Duration,
    next_token: u64,
}

impl PluginManager {
    pub fn new(theme_hooks: ThemeHooks) -> Self {
        Self {
            instances: BTreeMap::new(),
            load_order: Vec::new(),
            theme_hooks,
            callback_budget: DEFAULT_CALLBACK_BUDGET,
            next_token: 1,
        }
    }

    pub fn with_callback_budget(mut self, budget: Duration) -> Self {
        self.callback_budget = budget;
        self
    }

    /// Admit discovery results: create instances, compute the load order,
    /// and mark resolution failures without touching unrelated plugins.
    pub fn ingest(&mut self, report: DiscoveryReport) {
        for (path, err) in &report.errors {
            warn!(target: "plugin.manager", path = %path.display(), error = %err, "manifest rejected");
        }
        let resolution = resolve_order(&report.plugins);
        for (manifest, origin_path) in report.plugins {
            let id = manifest.id.clone();
            let kind = manifest.kind().ok();
            let token = self.next_token;
            self.next_token += 1;
            let mut instance = PluginInstance {
                manifest,
                origin_path,
                kind,
                state: PluginState::Discovered,
                handle: None,
                token,
                last_error: None,
                themes: Vec::new(),
            };
            if let Some(err) = resolution.failures.get(&id) {
                instance.state = PluginState::Failed;
                instance.last_error = Some(err.to_string());
            }
            self.instances.insert(id, instance);
        }
        self.load_order = resolution.order;
        info!(
            target: "plugin.manager",
            plugins = self.instances.len(),
            loadable = self.load_order.len(),
            "discovery ingested"
        );
    }

    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    pub fn instance(&self, id: &str) -> Option<&PluginInstance> {
        self.instances.get(id)
    }

    /// All instances in id order.
    pub fn instances(&self) -> impl Iterator<Item = &PluginInstance> {
        self.instances.values()
    }

    /// Load every discovered plugin in dependency order. Individual failures
    /// are recorded on the instance and do not stop the pass.
    pub fn load_all(&mut self, caps: &mut dyn Capabilities) {
        let order = self.load_order.clone();
        for id in order {
            let discovered = self
                .instances
                .get(&id)
                .is_some_and(|i| i.state == PluginState::Discovered);
            if discovered {
                if let Err(err) = self.load(&id, caps) {
                    warn!(target: "plugin.manager", id = %id, error = %err, "plugin failed to load");
                }
            }
        }
    }

    /// Drive one plugin through discovered -> loading -> ready.
    pub fn load(&mut self, id: &str, caps: &mut dyn Capabilities) -> Result<(), PluginError> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin { id: id.to_string() })?;
        if instance.state != PluginState::Discovered {
            return Err(PluginError::InvalidState {
                id: id.to_string(),
                state: instance.state,
                op: "load",
            });
        }
        instance.state = PluginState::Loading;
        let kind = match instance.kind {
            Some(kind) => kind,
            None => {
                let err = PluginError::InvalidManifest {
                    path: instance.manifest.entry_point.clone(),
                    detail: "unrecognized entry point kind".to_string(),
                };
                instance.state = PluginState::Failed;
                instance.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        let entry = instance.origin_path.join(&instance.manifest.entry_point);
        let result = match kind {
            PluginKind::Script => Self::load_script(
                id,
                &entry,
                &instance.manifest,
                &mut self.theme_hooks,
                &mut instance.themes,
                caps,
            )
            .map(|(host, program)| PluginHandle::Script { host, program }),
            PluginKind::Native => NativeModule::load(&entry)
                .map(PluginHandle::Native)
                .map_err(|source| PluginError::Native {
                    id: id.to_string(),
                    source,
                }),
        };
        match result {
            Ok(handle) => {
                instance.handle = Some(handle);
                instance.state = PluginState::Ready;
                info!(target: "plugin.manager", id, "plugin ready");
                Ok(())
            }
            Err(err) => {
                instance.state = PluginState::Failed;
                instance.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn load_script(
        id: &str,
        entry: &Path,
        manifest: &PluginManifest,
        hooks: &mut ThemeHooks,
        themes: &mut Vec<String>,
        caps: &mut dyn Capabilities,
    ) -> Result<(ScriptHost, Program), PluginError> {
        if !entry.is_file() {
            return Err(PluginError::EntryPointMissing {
                id: id.to_string(),
                entry: entry.display().to_string(),
            });
        }
        let source = std::fs::read_to_string(entry).map_err(|err| PluginError::Io {
            id: id.to_string(),
            detail: err.to_string(),
        })?;
        let mut host = ScriptHost::new(manifest.sandbox_config());
        let program = host.compile(&source).map_err(|source| PluginError::Script {
            id: id.to_string(),
            source,
        })?;
        let mut theme_caps = ThemeCaps {
            inner: caps,
            hooks,
            plugin_id: id,
            themes,
        };
        host.execute(&program, &mut theme_caps)
            .map_err(|source| PluginError::Script {
                id: id.to_string(),
                source,
            })?;
        Ok((host, program))
    }

    /// Synchronously deliver an editor event to every ready subscriber in
    /// load order. Per-subscriber errors are recorded and do not stop the
    /// pass; callbacks over the wall budget are logged.
    pub fn dispatch(&mut self, event: EditorEvent, caps: &mut dyn Capabilities) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let order = self.load_order.clone();
        for id in &order {
            let Some(instance) = self.instances.get_mut(id) else {
                continue;
            };
            if instance.state != PluginState::Ready {
                continue;
            }
            let started = Instant::now();
            let delivered = match instance.handle.as_mut() {
                Some(PluginHandle::Script { host, program }) => {
                    if program.function(event.handler()).is_none() {
                        continue;
                    }
                    let mut theme_caps = ThemeCaps {
                        inner: caps,
                        hooks: &mut self.theme_hooks,
                        plugin_id: id.as_str(),
                        themes: &mut instance.themes,
                    };
                    match host.execute_function(program, event.handler(), &mut theme_caps) {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(target: "plugin.manager", id = %id, event = event.name(), error = %err, "subscriber failed");
                            instance.last_error = Some(err.to_string());
                            outcome.failed += 1;
                            false
                        }
                    }
                }
                Some(PluginHandle::Native(module)) => module.dispatch_event(event.name()),
                None => false,
            };
            if delivered {
                outcome.delivered += 1;
            }
            let elapsed = started.elapsed();
            if elapsed > self.callback_budget {
                warn!(
                    target: "plugin.manager",
                    id = %id,
                    event = event.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.callback_budget.as_millis() as u64,
                    "subscriber exceeded callback budget"
                );
            }
        }
        outcome
    }

    /// Unload a ready plugin: teardown the handle and unregister its themes.
    pub fn unload(&mut self, id: &str) -> Result<(), PluginError> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin { id: id.to_string() })?;
        if instance.state != PluginState::Ready {
            return Err(PluginError::InvalidState {
                id: id.to_string(),
                state: instance.state,
                op: "unload",
            });
        }
        if let Some(PluginHandle::Native(module)) = instance.handle.take() {
            module.unload();
        }
        for theme in instance.themes.drain(..) {
            (self.theme_hooks.unregister)(id, &theme);
        }
        instance.state = PluginState::Unloaded;
        info!(target: "plugin.manager", id, "plugin unloaded");
        Ok(())
    }
}
