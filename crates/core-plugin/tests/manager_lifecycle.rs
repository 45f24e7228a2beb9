//! Manager lifecycle over real plugin directories on disk.

use std::cell::RefCell;
use std::rc::Rc;

use core_plugin::manager::{DiscoveryReport, PluginManager, ThemeHooks, discover, resolve_order};
use core_plugin::{EditorEvent, PluginState};
use core_script::{Action, Capabilities, Sandbox, ScriptError};

#[derive(Default)]
struct Recorder {
    messages: Vec<String>,
    logs: Vec<String>,
}

impl Capabilities for Recorder {
    fn apply(&mut self, _sandbox: &mut Sandbox, action: &Action) -> Result<(), ScriptError> {
        match action {
            Action::ShowMessage(text) => self.messages.push(text.clone()),
            Action::Log(text) => self.logs.push(text.clone()),
            _ => {}
        }
        Ok(())
    }
}

fn write_plugin(root: &std::path::Path, id: &str, deps: &[&str], script: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    let deps_toml = deps
        .iter()
        .map(|d| format!("{d:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(
        dir.join("plugin.toml"),
        format!(
            "id = {id:?}\nname = {id:?}\nversion = \"1.0.0\"\nentry_point = \"init.gza\"\ndependencies = [{deps_toml}]\n"
        ),
    )
    .unwrap();
    std::fs::write(dir.join("init.gza"), script).unwrap();
}

fn discover_roots(root: &std::path::Path) -> DiscoveryReport {
    discover(&[root.to_path_buf()])
}

#[test]
fn discovery_is_id_sorted_and_dedupes() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "zeta", &[], "fn setup() {}");
    write_plugin(dir.path(), "alpha", &[], "fn setup() {}");
    let other = tempfile::tempdir().unwrap();
    write_plugin(other.path(), "alpha", &[], "fn setup() {}");

    let report = discover(&[dir.path().to_path_buf(), other.path().to_path_buf()]);
    let ids: Vec<&str> = report.plugins.iter().map(|(m, _)| m.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "zeta"]);
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].0, "alpha");
    // First occurrence wins: the surviving alpha is from the first root.
    let (_, alpha_path) = &report.plugins[0];
    assert!(alpha_path.starts_with(dir.path()));
}

#[test]
fn load_order_respects_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "app", &["lib-a", "lib-b"], "fn setup() {}");
    write_plugin(dir.path(), "lib-b", &["lib-a"], "fn setup() {}");
    write_plugin(dir.path(), "lib-a", &[], "fn setup() {}");

    let report = discover_roots(dir.path());
    let resolution = resolve_order(&report.plugins);
    assert!(resolution.failures.is_empty());
    assert_eq!(resolution.order, vec!["lib-a", "lib-b", "app"]);
}

#[test]
fn dependency_cycle_names_members_and_spares_unrelated() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "a", &["b"], "fn setup() {}");
    write_plugin(dir.path(), "b", &["c"], "fn setup() {}");
    write_plugin(dir.path(), "c", &["a"], "fn setup() {}");
    write_plugin(dir.path(), "d", &[], "fn setup() { ctx.showMessage(\"d up\"); }");

    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);

    for id in ["a", "b", "c"] {
        let instance = manager.instance(id).unwrap();
        assert_eq!(instance.state(), PluginState::Failed);
        let err = instance.last_error().unwrap();
        assert!(err.contains("cycle"), "error should name the cycle: {err}");
        for member in ["a", "b", "c"] {
            assert!(err.contains(member));
        }
    }
    let d = manager.instance("d").unwrap();
    assert_eq!(d.state(), PluginState::Ready);
    assert_eq!(caps.messages, vec!["d up".to_string()]);
}

#[test]
fn missing_dependency_fails_only_dependents() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "needs-ghost", &["ghost-lib"], "fn setup() {}");
    write_plugin(dir.path(), "standalone", &[], "fn setup() {}");

    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);

    assert_eq!(
        manager.instance("needs-ghost").unwrap().state(),
        PluginState::Failed
    );
    assert_eq!(
        manager.instance("standalone").unwrap().state(),
        PluginState::Ready
    );
}

#[test]
fn broken_script_does_not_abort_peers() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "broken", &[], "fn not_setup() {}");
    write_plugin(dir.path(), "healthy", &[], "fn setup() { ctx.log(\"ok\"); }");

    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);

    let broken = manager.instance("broken").unwrap();
    assert_eq!(broken.state(), PluginState::Failed);
    assert!(broken.last_error().unwrap().contains("setup"));
    assert_eq!(
        manager.instance("healthy").unwrap().state(),
        PluginState::Ready
    );
    assert_eq!(caps.logs, vec!["ok".to_string()]);
}

#[test]
fn event_dispatch_reaches_ready_subscribers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(
        dir.path(),
        "first",
        &[],
        "fn setup() {}\nfn on_buffer_saved() { ctx.log(\"first saw save\"); }",
    );
    write_plugin(
        dir.path(),
        "second",
        &["first"],
        "fn setup() {}\nfn on_buffer_saved() { ctx.log(\"second saw save\"); }",
    );
    write_plugin(dir.path(), "silent", &[], "fn setup() {}");

    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);

    let outcome = manager.dispatch(EditorEvent::BufferSaved, &mut caps);
    assert_eq!(outcome.delivered, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(
        caps.logs,
        vec!["first saw save".to_string(), "second saw save".to_string()]
    );
    // No subscriber for other events.
    let outcome = manager.dispatch(EditorEvent::CursorMoved, &mut caps);
    assert_eq!(outcome.delivered, 0);
}

#[test]
fn themes_unregister_on_unload() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(
        dir.path(),
        "themer",
        &[],
        "fn setup() { register_theme(\"gruvdark\"); register_theme(\"gruvlight\"); }",
    );

    let registered: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
    let unregistered: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
    let reg = Rc::clone(&registered);
    let unreg = Rc::clone(&unregistered);
    let hooks = ThemeHooks {
        register: Box::new(move |plugin, name, _colors| {
            reg.borrow_mut().push((plugin.to_string(), name.to_string()));
        }),
        unregister: Box::new(move |plugin, name| {
            unreg.borrow_mut()
                .push((plugin.to_string(), name.to_string()));
        }),
    };

    let mut manager = PluginManager::new(hooks);
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);

    assert_eq!(registered.borrow().len(), 2);
    assert_eq!(
        manager.instance("themer").unwrap().registered_themes(),
        ["gruvdark", "gruvlight"]
    );

    manager.unload("themer").unwrap();
    assert_eq!(
        manager.instance("themer").unwrap().state(),
        PluginState::Unloaded
    );
    assert_eq!(unregistered.borrow().len(), 2);
    assert_eq!(
        unregistered.borrow()[0],
        ("themer".to_string(), "gruvdark".to_string())
    );
    // Unloaded plugins no longer receive events.
    let outcome = manager.dispatch(EditorEvent::BufferSaved, &mut caps);
    assert_eq!(outcome.delivered, 0);
}

#[test]
fn state_machine_rejects_double_load() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "solo", &[], "fn setup() {}");
    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load("solo", &mut caps).unwrap();
    assert!(manager.load("solo", &mut caps).is_err());
    manager.unload("solo").unwrap();
    // Unloaded is terminal.
    assert!(manager.load("solo", &mut caps).is_err());
    assert!(manager.unload("solo").is_err());
}

#[test]
fn script_stats_exposed_per_instance() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "counted", &[], "fn setup() { ctx.log(\"x\"); }");
    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let mut caps = Recorder::default();
    manager.load_all(&mut caps);
    let stats = manager.instance("counted").unwrap().script_stats().unwrap();
    assert_eq!(stats.execution_count, 1);
    assert_eq!(stats.violations, 0);
}

#[test]
fn tokens_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "one", &[], "fn setup() {}");
    write_plugin(dir.path(), "two", &[], "fn setup() {}");
    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover_roots(dir.path()));
    let tokens: Vec<u64> = manager.instances().map(|i| i.token()).collect();
    let unique: std::collections::BTreeSet<u64> = tokens.iter().copied().collect();
    assert_eq!(tokens.len(), unique.len());
}
