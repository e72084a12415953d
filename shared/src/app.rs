//! The planner as a crux app.
//!
//! Shells send [`Event`]s and answer the effects declared on
//! [`Capabilities`]. Storage reads happen once at start-up and are mirrored
//! in a [`ShellStore`]; from then on the planner runs synchronously against
//! that mirror and every write it makes is forwarded to the shell after the
//! event that caused it.

use std::mem;

use crux_core::render::Render;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::capabilities::shell::{Fetch, Storage, StorageOutput, Timer};
use crate::capabilities::{HttpError, HttpResponse, PendingWrite, ShellStore, TemplateUrl};
use crate::command::{Command, CommandOutcome};
use crate::config::PlannerConfig;
use crate::persistence::Persistence;
use crate::planner::Planner;
use crate::template::{self, TemplateOutcome};
use crate::view::ViewModel;
use crate::{AppError, ErrorKind, Notice};

/// Why the template is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePurpose {
    Load,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Loads the stored state, or the template when nothing is stored.
    Start(PlannerConfig),
    Command(Command),
    /// Discards the checklist and trip info and fetches the template again.
    Reset,
    /// The shell has shown every queued notice.
    NoticesShown,

    // Capability responses
    #[serde(skip)]
    StoredSlice { key: String, output: StorageOutput },
    #[serde(skip)]
    Saved { key: String, output: StorageOutput },
    #[serde(skip)]
    TemplateResponse {
        purpose: TemplatePurpose,
        attempt: u32,
        result: Result<HttpResponse, HttpError>,
    },
    #[serde(skip)]
    RetryTemplate { purpose: TemplatePurpose, attempt: u32 },
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Command(command) => command.name(),
            Self::Reset => "reset",
            Self::NoticesShown => "notices_shown",
            Self::StoredSlice { .. } => "stored_slice",
            Self::Saved { .. } => "saved",
            Self::TemplateResponse { .. } => "template_response",
            Self::RetryTemplate { .. } => "retry_template",
        }
    }
}

#[derive(Default)]
enum Stage {
    #[default]
    Idle,
    /// Waiting for the listed keys, then possibly for the template.
    Loading {
        persistence: Persistence<ShellStore>,
        awaiting: Vec<String>,
    },
    Ready(Box<Planner<ShellStore>>),
}

#[derive(Default)]
pub struct Model {
    config: PlannerConfig,
    template_url: Option<TemplateUrl>,
    store: ShellStore,
    stage: Stage,
    notices: Vec<Notice>,
    last_outcome: Option<CommandOutcome>,
}

impl Model {
    /// The loaded planner; `None` until every stored slice has arrived.
    #[must_use]
    pub fn planner(&self) -> Option<&Planner<ShellStore>> {
        match &self.stage {
            Stage::Ready(planner) => Some(planner),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.stage, Stage::Loading { .. })
    }

    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&CommandOutcome> {
        self.last_outcome.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppView {
    pub loading: bool,
    pub planner: Option<ViewModel>,
    pub notices: Vec<Notice>,
    pub last_outcome: Option<CommandOutcome>,
}

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub storage: Storage<Event>,
    pub fetch: Fetch<Event>,
    pub timer: Timer<Event>,
}

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = AppView;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(event = event.name(), "update");

        match event {
            Event::Start(config) => Self::start(config, model, caps),
            Event::StoredSlice { key, output } => Self::slice_read(&key, output, model, caps),
            Event::TemplateResponse {
                purpose,
                attempt,
                result,
            } => Self::template_response(purpose, attempt, result, model, caps),
            Event::RetryTemplate { purpose, attempt } => {
                Self::fetch_template(purpose, attempt, model, caps);
            }
            Event::Command(command) => match &mut model.stage {
                Stage::Ready(planner) => model.last_outcome = Some(planner.dispatch(command)),
                _ => warn!(command = command.name(), "command before load ignored"),
            },
            Event::Reset => {
                if let Stage::Ready(planner) = &mut model.stage {
                    planner.begin_reset();
                    Self::fetch_template(TemplatePurpose::Reset, 0, model, caps);
                } else {
                    warn!("reset before load ignored");
                }
            }
            Event::Saved { key, output } => {
                if let Err(e) = output {
                    match &mut model.stage {
                        Stage::Ready(planner) => planner.report_save_failure(&key, e),
                        _ => error!(key = %key, error = %e, "save failed during load"),
                    }
                }
            }
            Event::NoticesShown => model.notices.clear(),
        }

        Self::flush_writes(model, caps);
        if let Stage::Ready(planner) = &mut model.stage {
            model.notices.extend(planner.take_notices());
        }
        caps.render.render();
    }

    fn view(&self, model: &Model) -> AppView {
        AppView {
            loading: model.is_loading(),
            planner: model.planner().map(Planner::view),
            notices: model.notices.clone(),
            last_outcome: model.last_outcome.clone(),
        }
    }
}

impl App {
    fn start(config: PlannerConfig, model: &mut Model, caps: &Capabilities) {
        let prepared = config
            .validate()
            .and_then(|()| Ok((config.storage_keys()?, config.parsed_template_url()?)));
        let (keys, url) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "planner config rejected");
                model
                    .notices
                    .push(Notice::from(&AppError::new(ErrorKind::Validation, e.to_string())));
                return;
            }
        };

        info!(prefix = %config.storage_prefix, "loading planner");
        model.store = ShellStore::new();
        let awaiting = keys.all().map(str::to_string).to_vec();
        for key in &awaiting {
            let for_event = key.clone();
            caps.storage.get(key.clone(), move |output| Event::StoredSlice {
                key: for_event,
                output,
            });
        }
        model.stage = Stage::Loading {
            persistence: Persistence::new(model.store.clone(), keys),
            awaiting,
        };
        model.template_url = Some(url);
        model.config = config;
    }

    fn slice_read(key: &str, output: StorageOutput, model: &mut Model, caps: &Capabilities) {
        let needs_template = match &mut model.stage {
            Stage::Loading {
                persistence,
                awaiting,
            } => {
                model.store.seed(key, output);
                awaiting.retain(|k| k != key);
                if !awaiting.is_empty() {
                    return;
                }
                persistence.needs_template()
            }
            _ => {
                debug!(key, "storage read after load ignored");
                return;
            }
        };

        if needs_template {
            Self::fetch_template(TemplatePurpose::Load, 0, model, caps);
        } else {
            Self::finish_load(None, model);
        }
    }

    fn fetch_template(
        purpose: TemplatePurpose,
        attempt: u32,
        model: &Model,
        caps: &Capabilities,
    ) {
        let Some(url) = &model.template_url else {
            return;
        };
        caps.fetch.get(template::attempt_url(url, attempt), move |result| {
            Event::TemplateResponse {
                purpose,
                attempt,
                result,
            }
        });
    }

    fn template_response(
        purpose: TemplatePurpose,
        attempt: u32,
        result: Result<HttpResponse, HttpError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let outcome = match template::read_response(result) {
            Ok(sections) => TemplateOutcome::remote(sections, attempt + 1),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "template fetch attempt failed");
                if let Some(wait) = model.config.retry.wait_after(attempt, &e) {
                    let millis = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                    caps.timer.wait(millis, move || Event::RetryTemplate {
                        purpose,
                        attempt: attempt + 1,
                    });
                    return;
                }
                TemplateOutcome::fallback()
            }
        };

        match purpose {
            TemplatePurpose::Load => Self::finish_load(Some(outcome), model),
            TemplatePurpose::Reset => {
                if let Stage::Ready(planner) = &mut model.stage {
                    planner.finish_reset(outcome);
                }
            }
        }
    }

    fn finish_load(template: Option<TemplateOutcome>, model: &mut Model) {
        match mem::take(&mut model.stage) {
            Stage::Loading { persistence, .. } => {
                let report = persistence.load_with(template);
                let planner = Planner::from_report(&model.config, persistence, report);
                info!(source = ?planner.list_source(), "planner ready");
                model.stage = Stage::Ready(Box::new(planner));
            }
            other => model.stage = other,
        }
    }

    fn flush_writes(model: &Model, caps: &Capabilities) {
        for write in model.store.take_pending() {
            match write {
                PendingWrite::Set { key, value } => {
                    let for_event = key.clone();
                    caps.storage.set(key, value, move |output| Event::Saved {
                        key: for_event,
                        output,
                    });
                }
                PendingWrite::Remove { key } => {
                    let for_event = key.clone();
                    caps.storage.remove(key, move |output| Event::Saved {
                        key: for_event,
                        output,
                    });
                }
            }
        }
    }
}
