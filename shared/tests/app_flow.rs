use std::collections::{HashMap, HashSet, VecDeque};

use camplist_core::capabilities::shell::{StorageOperation, StorageOutput};
use camplist_core::capabilities::{HttpError, HttpResponse};
use camplist_core::model::{decode_sections, fallback_sections};
use camplist_core::template::TEMPLATE_UNAVAILABLE_MESSAGE;
use camplist_core::{
    App, Command, CommandOutcome, Effect, Event, KvError, ListSource, Model, PlannerConfig,
    TemplateOrigin,
};
use crux_core::testing::AppTester;

const DATA_KEY: &str = "campChecklist_data";
const META_KEY: &str = "campChecklist_meta";
const TEMPLATE: &str =
    r#"[{"id":"kitchen","title":"Kitchen","items":[{"id":"stove","text":"Stove"}]}]"#;
const STORED: &str =
    r#"[{"id":"general","title":"General","items":[{"id":"tent","text":"Tent"}]}]"#;

/// Plays the shell: answers storage from a map, the template endpoint from a
/// queue, and timers at once.
#[derive(Default)]
struct Shell {
    store: HashMap<String, Vec<u8>>,
    full_keys: HashSet<String>,
    responses: VecDeque<Result<HttpResponse, HttpError>>,
    fetched: Vec<String>,
    waits: Vec<u64>,
    renders: usize,
}

impl Shell {
    fn with_list(list: &str) -> Self {
        let mut shell = Self::default();
        shell.store.insert(DATA_KEY.into(), list.as_bytes().to_vec());
        shell
    }

    fn storage(&mut self, operation: &StorageOperation) -> StorageOutput {
        match operation {
            StorageOperation::Get { key } => Ok(self.store.get(key).cloned()),
            StorageOperation::Set { key, value } => {
                if self.full_keys.contains(key) {
                    return Err(KvError::QuotaExceeded { key: key.clone() });
                }
                self.store.insert(key.clone(), value.clone());
                Ok(None)
            }
            StorageOperation::Remove { key } => {
                self.store.remove(key);
                Ok(None)
            }
        }
    }

    fn stored_list(&self) -> Vec<camplist_core::Section> {
        decode_sections(&self.store[DATA_KEY]).unwrap()
    }
}

/// Sends `event` and keeps answering effects until the app goes quiet.
fn run(app: &AppTester<App, Effect>, model: &mut Model, shell: &mut Shell, event: Event) {
    let mut events = VecDeque::from([event]);
    while let Some(event) = events.pop_front() {
        let update = app.update(event, model);
        events.extend(update.events);
        let mut effects: VecDeque<Effect> = update.effects.into();

        while let Some(effect) = effects.pop_front() {
            let resolved = match effect {
                Effect::Render(_) => {
                    shell.renders += 1;
                    continue;
                }
                Effect::Storage(mut request) => {
                    let output = shell.storage(&request.operation);
                    app.resolve(&mut request, output).expect("storage request")
                }
                Effect::Fetch(mut request) => {
                    shell.fetched.push(request.operation.url.clone());
                    let response = shell.responses.pop_front().unwrap_or_else(|| {
                        Err(HttpError::Connection {
                            message: "offline".into(),
                        })
                    });
                    app.resolve(&mut request, response).expect("fetch request")
                }
                Effect::Timer(mut request) => {
                    shell.waits.push(request.operation.millis);
                    app.resolve(&mut request, ()).expect("timer request")
                }
            };
            events.extend(resolved.events);
            effects.extend(resolved.effects);
        }
    }
}

fn start(shell: &mut Shell) -> (AppTester<App, Effect>, Model) {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    run(&app, &mut model, shell, Event::Start(PlannerConfig::default()));
    (app, model)
}

#[test]
fn test_first_run_loads_and_stores_template() {
    let mut shell = Shell::default();
    shell
        .responses
        .push_back(Ok(HttpResponse::ok(TEMPLATE.as_bytes().to_vec())));

    let (app, model) = start(&mut shell);

    let planner = model.planner().expect("planner loaded");
    assert_eq!(
        planner.list_source(),
        ListSource::Template(TemplateOrigin::Remote { attempts: 1 })
    );
    assert_eq!(shell.fetched.len(), 1);
    assert!(shell.fetched[0].starts_with("camplist.json?_="));
    assert_eq!(shell.stored_list()[0].id.as_str(), "kitchen");
    assert!(shell.store.contains_key(META_KEY));
    assert!(shell.renders > 0);

    let view = app.view(&model);
    assert!(!view.loading);
    assert_eq!(view.planner.unwrap().sections[0].title, "Kitchen");
    assert!(view.notices.is_empty());
}

#[test]
fn test_template_retries_wait_between_attempts() {
    let mut shell = Shell::default();
    shell.responses.push_back(Err(HttpError::Connection {
        message: "reset".into(),
    }));
    shell
        .responses
        .push_back(Ok(HttpResponse::new(503, Vec::new())));
    shell
        .responses
        .push_back(Ok(HttpResponse::ok(TEMPLATE.as_bytes().to_vec())));

    let (_, model) = start(&mut shell);

    assert_eq!(shell.waits, vec![500, 1000]);
    assert_eq!(shell.fetched.len(), 3);
    assert_eq!(
        model.planner().unwrap().list_source(),
        ListSource::Template(TemplateOrigin::Remote { attempts: 3 })
    );
}

#[test]
fn test_template_exhaustion_falls_back_with_notice() {
    let mut shell = Shell::default();

    let (_, model) = start(&mut shell);

    assert_eq!(shell.fetched.len(), 3);
    assert_eq!(shell.waits, vec![500, 1000]);
    assert_eq!(shell.stored_list(), fallback_sections());
    let notice = &model.notices()[0];
    assert_eq!(notice.message, TEMPLATE_UNAVAILABLE_MESSAGE);
    assert!(!notice.is_dialog());
}

#[test]
fn test_stored_list_skips_fetch_and_commands_are_saved() {
    let mut shell = Shell::with_list(STORED);
    let (app, mut model) = start(&mut shell);
    assert!(shell.fetched.is_empty());
    assert_eq!(model.planner().unwrap().list_source(), ListSource::Stored);

    run(
        &app,
        &mut model,
        &mut shell,
        Event::Command(Command::AddItem {
            section_id: "general".into(),
            text: "Lantern".into(),
        }),
    );

    assert!(matches!(
        model.last_outcome(),
        Some(CommandOutcome::Created { .. })
    ));
    let stored = shell.stored_list();
    assert_eq!(stored[0].items.len(), 2);
    assert_eq!(stored[0].items[1].text, "Lantern");
    assert!(app.view(&model).planner.unwrap().can_undo);
}

#[test]
fn test_quota_reported_by_shell_becomes_dialog() {
    let mut shell = Shell::with_list(STORED);
    let (app, mut model) = start(&mut shell);
    shell.full_keys.insert(DATA_KEY.into());

    run(
        &app,
        &mut model,
        &mut shell,
        Event::Command(Command::DeleteItem {
            item_id: "tent".into(),
        }),
    );

    assert!(model.planner().unwrap().find_item("tent").is_none());
    let notice = model.notices().last().unwrap();
    assert!(notice.is_dialog());
    assert!(notice.message.contains("Storage space is full"));

    run(&app, &mut model, &mut shell, Event::NoticesShown);
    assert!(model.notices().is_empty());
}

#[test]
fn test_reset_refetches_template() {
    let mut shell = Shell::with_list(STORED);
    shell
        .store
        .insert(META_KEY.into(), br#"{"destination":"Zion"}"#.to_vec());
    let (app, mut model) = start(&mut shell);
    assert_eq!(model.planner().unwrap().document().meta.destination, "Zion");
    shell
        .responses
        .push_back(Ok(HttpResponse::ok(TEMPLATE.as_bytes().to_vec())));

    run(&app, &mut model, &mut shell, Event::Reset);

    let planner = model.planner().unwrap();
    assert_eq!(planner.document().sections[0].id.as_str(), "kitchen");
    assert_eq!(planner.document().meta.destination, "");
    assert_eq!(shell.fetched.len(), 1);
    assert_eq!(shell.stored_list()[0].id.as_str(), "kitchen");
    assert_eq!(
        String::from_utf8(shell.store[META_KEY].clone()).unwrap(),
        serde_json::to_string(&planner.document().meta).unwrap()
    );
}

#[test]
fn test_events_before_start_are_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut shell = Shell::default();

    run(
        &app,
        &mut model,
        &mut shell,
        Event::Command(Command::AddSection {
            title: "Water".into(),
        }),
    );
    run(&app, &mut model, &mut shell, Event::Reset);

    assert!(model.planner().is_none());
    assert!(shell.store.is_empty());
    assert!(shell.fetched.is_empty());
    assert!(app.view(&model).planner.is_none());
}

#[test]
fn test_corrupted_stored_list_recovers_with_dialog() {
    let mut shell = Shell::with_list("{{garbage");

    let (_, model) = start(&mut shell);

    assert_eq!(model.planner().unwrap().list_source(), ListSource::Recovered);
    assert!(shell.fetched.is_empty());
    assert_eq!(shell.stored_list(), fallback_sections());
    assert!(model.notices().iter().any(|n| n.is_dialog()
        && n.message == "Could not load saved checklist data. Using default list."));
}

#[test]
fn test_invalid_config_is_reported_without_loading() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut shell = Shell::default();
    let config = PlannerConfig {
        storage_prefix: "bad prefix!".into(),
        ..PlannerConfig::default()
    };

    run(&app, &mut model, &mut shell, Event::Start(config));

    assert!(model.planner().is_none());
    assert!(!model.is_loading());
    assert_eq!(model.notices().len(), 1);
    assert!(shell.store.is_empty());
}
