use parking_lot::Mutex;
use printkit_core::{
    CommandDispatcher, CommandError, CommandHandler, CommandLine, VariableStore,
};
use printkit_settings::FileVariableStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct MapDispatcher {
    handlers: Mutex<HashMap<String, CommandHandler>>,
}

impl CommandDispatcher for MapDispatcher {
    fn register_command(&self, name: &str, handler: CommandHandler) {
        self.handlers.lock().insert(name.to_string(), handler);
    }

    fn dispatch(&self, line: &str) -> Result<(), CommandError> {
        let Some(cmd) = CommandLine::parse(line) else {
            return Ok(());
        };
        let handler = self.handlers.lock().get(cmd.name()).cloned();
        match handler {
            Some(handler) => handler(&cmd),
            None => Err(CommandError::UnknownCommand {
                name: cmd.name().to_string(),
            }),
        }
    }

    fn try_acquire(&self) -> bool {
        true
    }

    fn respond_info(&self, _message: &str) {}
}

fn setup() -> (tempfile::TempDir, Arc<FileVariableStore>, Arc<dyn CommandDispatcher>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileVariableStore::open(dir.path().join("vars.json"), 16).unwrap());
    let dispatcher: Arc<dyn CommandDispatcher> = Arc::new(MapDispatcher::default());
    store.register_commands(&dispatcher);
    (dir, store, dispatcher)
}

#[test]
fn test_save_variable_stores_json_literals() {
    let (_dir, store, dispatcher) = setup();

    dispatcher
        .dispatch("SAVE_VARIABLE VARIABLE=Nozzle_Wipes VALUE=3")
        .unwrap();
    dispatcher
        .dispatch(r#"SAVE_VARIABLE VARIABLE=last_file VALUE="part.gcode""#)
        .unwrap();

    let vars = store.variables();
    assert_eq!(vars["nozzle_wipes"], json!(3));
    assert_eq!(vars["last_file"], json!("part.gcode"));
}

#[test]
fn test_save_variable_rejects_bad_values() {
    let (_dir, store, dispatcher) = setup();

    let err = dispatcher
        .dispatch("SAVE_VARIABLE VARIABLE=x VALUE=not-json")
        .unwrap_err();
    assert!(matches!(err, CommandError::MalformedParameter { .. }));

    let err = dispatcher.dispatch("SAVE_VARIABLE VALUE=1").unwrap_err();
    assert!(matches!(err, CommandError::MissingParameter { .. }));

    assert!(store.variables().is_empty());
}
