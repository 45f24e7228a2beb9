//! End-to-end core wiring: document edits feed the highlight cache, the
//! plugin manager loads scripts against the real bridge, and editor events
//! land on subscribers that mutate the session back through capabilities.

use std::cell::RefCell;
use std::rc::Rc;

use core_bridge::{Bridge, EditorSession};
use core_plugin::manager::{PluginManager, ThemeHooks, discover};
use core_plugin::{EditorEvent, PluginState};
use core_syntax::TokenClass;

fn write_plugin(root: &std::path::Path, id: &str, script: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("plugin.toml"),
        format!(
            "id = {id:?}\nname = {id:?}\nversion = \"1.0.0\"\nentry_point = \"init.gza\"\n"
        ),
    )
    .unwrap();
    std::fs::write(dir.join("init.gza"), script).unwrap();
}

#[test]
fn script_plugin_drives_the_session_through_the_bridge() {
    let plugins = tempfile::tempdir().unwrap();
    write_plugin(
        plugins.path(),
        "greeter",
        "fn setup() { ctx.showMessage(\"greeter ready\"); }\n\
         fn on_buffer_saved() { ctx.insertText(\"// saved\\n\"); }\n",
    );

    let mut session = EditorSession::with_text("rust", "fn main() {}\n");
    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover(&[plugins.path().to_path_buf()]));

    {
        let mut bridge = Bridge::new(&mut session, 1);
        manager.load_all(&mut bridge);
    }
    assert_eq!(
        manager.instance("greeter").unwrap().state(),
        PluginState::Ready
    );
    assert_eq!(session.drain_messages(), vec!["greeter ready".to_string()]);

    // Cursor at the start; the save handler prepends a comment line.
    let version_before = session.document().version();
    {
        let mut bridge = Bridge::new(&mut session, 1);
        let outcome = manager.dispatch(EditorEvent::BufferSaved, &mut bridge);
        assert_eq!(outcome.delivered, 1);
    }
    assert!(session.document().to_text().starts_with("// saved\n"));
    assert_eq!(session.document().version(), version_before + 1);

    // The edit flowed into the highlight cache: the new first line lexes as
    // a comment span.
    let spans = session.highlight().unwrap();
    assert_eq!(spans[0].class, TokenClass::Comment);

    // And the plugin's edit is a regular undo step.
    session.undo().unwrap();
    assert_eq!(session.document().to_text(), "fn main() {}\n");
}

#[test]
fn theme_registration_routes_through_hooks_with_bridge_caps() {
    let plugins = tempfile::tempdir().unwrap();
    write_plugin(
        plugins.path(),
        "nightfall",
        "fn setup() { register_theme(\"nightfall\"); }\n",
    );

    let themes: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&themes);
    let hooks = ThemeHooks {
        register: Box::new(move |plugin, name, colors| {
            sink.borrow_mut()
                .push(format!("{plugin}:{name}:{colors}"));
        }),
        unregister: Box::new(|_, _| {}),
    };

    let mut session = EditorSession::new("rust");
    let mut manager = PluginManager::new(hooks);
    manager.ingest(discover(&[plugins.path().to_path_buf()]));
    let mut bridge = Bridge::new(&mut session, 9);
    manager.load_all(&mut bridge);

    assert_eq!(themes.borrow().as_slice(), ["nightfall:nightfall:{}"]);
}

#[test]
fn sandboxed_plugin_cannot_touch_blocked_paths() {
    // The bridge consults the per-plugin sandbox before filesystem work;
    // a plugin without the filesystem permission keeps a zero op count.
    let plugins = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "confined", "fn setup() { ctx.log(\"up\"); }\n");

    let mut session = EditorSession::new("rust");
    let mut manager = PluginManager::new(ThemeHooks::noop());
    manager.ingest(discover(&[plugins.path().to_path_buf()]));
    let mut bridge = Bridge::new(&mut session, 2);
    manager.load_all(&mut bridge);

    let stats = manager
        .instance("confined")
        .unwrap()
        .script_stats()
        .unwrap();
    assert_eq!(stats.file_ops, 0);
    assert_eq!(stats.execution_count, 1);
}
