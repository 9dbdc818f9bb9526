use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use stream_session::ws::{WsConnector, event_channel};
use stream_session::{
    MessageTemplates, ModelInfo, SessionId, SessionRegistry, TransportEvent, dispatch,
};

use crate::backend::BackendClient;
use crate::commands::{self, Command, HELP};
use crate::config::ChatConfig;
use crate::render::{Renderer, pane_label};
use crate::selection::{Selection, SelectionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything the event loop mutates. All methods run to completion; the
/// loop in [`run`] serializes user input, transport events and flush ticks.
pub struct App<W> {
    registry: SessionRegistry,
    selection: Selection,
    models: Vec<ModelInfo>,
    templates: Arc<MessageTemplates>,
    renderer: Renderer<W>,
}

impl<W: Write> App<W> {
    pub fn new(
        registry: SessionRegistry,
        selection: Selection,
        models: Vec<ModelInfo>,
        templates: Arc<MessageTemplates>,
        renderer: Renderer<W>,
    ) -> Self {
        Self {
            registry,
            selection,
            models,
            templates,
            renderer,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[cfg(test)]
    pub fn into_renderer(self) -> Renderer<W> {
        self.renderer
    }

    pub fn open_panes(&mut self, count: usize) -> io::Result<()> {
        for _ in 0..count {
            self.add_pane()?;
        }
        Ok(())
    }

    pub fn print_selection(&mut self) -> io::Result<()> {
        let ctx = self.selection.context();
        let line = if ctx.collection.is_none() {
            "No product selected.".to_string()
        } else {
            format!(
                "Product: {} {}",
                ctx.collection.collection_full_name, ctx.version
            )
        };
        self.renderer.line(&line)
    }

    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let command = match commands::parse(line) {
            Ok(command) => command,
            Err(e) => {
                self.renderer.line(&e.to_string())?;
                return Ok(Flow::Continue);
            }
        };
        debug!(?command, "input");

        match command {
            Command::Submit(text) => self.submit(&text)?,
            Command::Add => self.add_pane()?,
            Command::Remove => self.remove_pane()?,
            Command::Reset => self.reset()?,
            Command::Product(name) => {
                let selected = self.selection.select_product(&name).map(|_| ());
                self.after_selection(selected)?;
            }
            Command::Version(version) => {
                let selected = self.selection.select_version(&version).map(|_| ());
                self.after_selection(selected)?;
            }
            Command::Model { pane, name } => self.set_model(pane, &name)?,
            Command::Models => self.list_models()?,
            Command::Products => self.list_products()?,
            Command::Show => {
                for (position, session) in self.registry.iter().enumerate() {
                    self.renderer.transcript(position, session)?;
                }
            }
            Command::Help => self.renderer.line(HELP)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Apply one transport event and print whatever it completed.
    pub fn handle_transport(
        &mut self,
        id: SessionId,
        event: TransportEvent,
        now: Instant,
    ) -> io::Result<()> {
        let is_frame = matches!(event, TransportEvent::Frame(_));
        if let Err(e) = self.registry.handle_event(id, event) {
            debug!(session = %id, error = %e, "dropping event");
            return Ok(());
        }
        if !is_frame {
            return Ok(());
        }
        let Some(position) = self.registry.position_of(id) else {
            return Ok(());
        };
        match self.registry.by_position(position) {
            Some(session) => self.renderer.stream(position, session, now),
            None => Ok(()),
        }
    }

    pub fn flush(&mut self, now: Instant) -> io::Result<()> {
        self.renderer.flush_quiet(&self.registry, now)
    }

    /// Close every session exactly once.
    pub fn shutdown(&mut self) {
        self.registry.close_all();
        info!(panes = self.registry.len(), "all sessions closed");
    }

    fn submit(&mut self, text: &str) -> io::Result<()> {
        if self.registry.is_empty() {
            return self.renderer.line("No panes are open; /add one first.");
        }
        let report = dispatch::submit(&mut self.registry, self.selection.context(), text);
        for id in &report.delivered {
            self.renderer.begin_turn(*id);
        }
        for id in &report.empty {
            let Some(position) = self.registry.position_of(*id) else {
                continue;
            };
            if let Some(session) = self.registry.by_position(position) {
                if let Some(notice) = session.notice() {
                    self.renderer
                        .pane_message(position, session.model(), &notice.text())?;
                }
            }
        }
        Ok(())
    }

    fn add_pane(&mut self) -> io::Result<()> {
        let Some(id) = self.registry.add_session() else {
            return self.renderer.line(&format!(
                "Already at the maximum of {} panes.",
                self.registry.max_sessions()
            ));
        };
        self.renderer.begin_turn(id);
        let position = self.registry.len() - 1;
        let model = self
            .registry
            .get(id)
            .map(|s| s.model().to_string())
            .unwrap_or_default();
        self.renderer
            .pane_message(position, &model, &self.templates.greeting)
    }

    fn remove_pane(&mut self) -> io::Result<()> {
        let position = self.registry.len();
        match self.registry.remove_session() {
            Some(id) => {
                self.renderer.forget(id);
                self.renderer.line(&format!("Closed pane {position}."))
            }
            None => self.renderer.line("No panes are open."),
        }
    }

    fn reset(&mut self) -> io::Result<()> {
        let report = dispatch::reset_all(&mut self.registry);
        for id in &report.delivered {
            self.renderer.begin_turn(*id);
        }
        self.renderer.line(&format!("* {}", self.templates.greeting))
    }

    fn after_selection(&mut self, selected: Result<(), SelectionError>) -> io::Result<()> {
        match selected {
            Ok(()) => self.broadcast_context(),
            Err(e) => self.renderer.line(&e.to_string()),
        }
    }

    fn broadcast_context(&mut self) -> io::Result<()> {
        let ctx = self.selection.context();
        let report = dispatch::broadcast_context_change(&mut self.registry, ctx);
        for id in &report.delivered {
            self.renderer.begin_turn(*id);
        }
        let message = self.templates.context_message(&ctx.collection, &ctx.version);
        self.renderer.line(&format!("* {message}"))
    }

    fn set_model(&mut self, pane: usize, name: &str) -> io::Result<()> {
        if !self.models.is_empty() && !self.models.iter().any(|m| m.name == name) {
            return self
                .renderer
                .line(&format!("Unknown model {name:?}; see /models."));
        }
        let position = pane.saturating_sub(1);
        let Some(session) = self.registry.by_position_mut(position).filter(|_| pane >= 1) else {
            return self.renderer.line(&format!("There is no pane {pane}."));
        };
        match session.set_model(name) {
            Ok(()) => {
                let label = pane_label(position, session.model());
                self.renderer.line(&format!("{label} model set."))
            }
            Err(e) => {
                warn!(pane, error = %e, "model change refused");
                self.renderer.line(&format!("Pane {pane}: {e}."))
            }
        }
    }

    fn list_models(&mut self) -> io::Result<()> {
        if self.models.is_empty() {
            return self.renderer.line("No models available.");
        }
        let names: Vec<&str> = self.models.iter().map(|m| m.name.as_str()).collect();
        let line = names.join("\n");
        self.renderer.line(&line)
    }

    fn list_products(&mut self) -> io::Result<()> {
        if self.selection.catalog().is_empty() {
            return self.renderer.line("No products available.");
        }
        let current = &self.selection.context().collection;
        let mut lines = Vec::new();
        for collection in self.selection.catalog() {
            let marker = if collection == current { "*" } else { " " };
            let versions: Vec<&str> = collection
                .versions
                .iter()
                .map(|v| v.version_number.as_str())
                .collect();
            lines.push(format!(
                "{marker} {} ({})",
                collection.collection_full_name,
                versions.join(", ")
            ));
        }
        self.renderer.line(&lines.join("\n"))
    }
}

/// Fetch the catalog, open the configured panes and run the interactive loop
/// until `/quit`, end of input or Ctrl-C.
pub async fn run(config: ChatConfig) -> Result<()> {
    let client = BackendClient::new(&config.api_url, config.request_timeout)
        .context("Failed to build HTTP client")?;

    let collections = match client.collections().await {
        Ok(collections) => collections,
        Err(e) => {
            warn!(error = %e, "could not load products, continuing without");
            Vec::new()
        }
    };
    let models = match client.models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(error = %e, "could not load models, continuing without");
            Vec::new()
        }
    };
    let default_model = config
        .default_model
        .clone()
        .or_else(|| models.first().map(|m| m.name.clone()))
        .unwrap_or_default();
    info!(
        products = collections.len(),
        models = models.len(),
        %default_model,
        "catalog loaded"
    );

    let mut selection = Selection::new(config.language.clone());
    selection.load_catalog(collections);

    let templates = Arc::new(config.messages.clone());
    let (events_tx, mut events_rx) = event_channel();
    let connector =
        WsConnector::new(config.ws_url.clone(), events_tx).with_policy(config.reconnect.clone());
    let registry = SessionRegistry::new(Box::new(connector), config.max_panes, templates.clone())
        .with_default_model(default_model);

    let renderer = Renderer::new(io::stdout(), config.flush_interval);
    let mut app = App::new(registry, selection, models, templates, renderer);
    app.print_selection()?;
    app.open_panes(config.initial_panes)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(tick_period(config.flush_interval));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match app.handle_line(&line) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(e) => break Err(e),
                    },
                    Ok(None) => {
                        debug!("end of input");
                        break Ok(());
                    }
                    Err(e) => break Err(anyhow::Error::from(e).context("Failed to read input")),
                }
            }

            Some((id, event)) = events_rx.recv() => {
                if let Err(e) = app.handle_transport(id, event, Instant::now()) {
                    break Err(e.into());
                }
            }

            _ = tick.tick() => {
                if let Err(e) = app.flush(Instant::now()) {
                    break Err(e.into());
                }
            }

            _ = &mut ctrl_c => {
                info!("Received interrupt, shutting down");
                break Ok(());
            }
        }
    };

    app.shutdown();
    result
}

fn tick_period(flush_interval: Duration) -> Duration {
    (flush_interval / 4).max(Duration::from_millis(25))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_session::{
        Collection, CollectionVersion, MessageEntry, RecordingConnector, SessionState,
    };

    fn catalog() -> Vec<Collection> {
        vec![
            Collection {
                collection_base_name: "ocp".to_string(),
                collection_full_name: "OpenShift Container Platform".to_string(),
                versions: vec![
                    CollectionVersion {
                        version_number: "4.16".to_string(),
                    },
                    CollectionVersion {
                        version_number: "4.15".to_string(),
                    },
                ],
                language: "en".to_string(),
            },
            Collection {
                collection_base_name: "rhel".to_string(),
                collection_full_name: "Red Hat Enterprise Linux".to_string(),
                versions: vec![CollectionVersion {
                    version_number: "9".to_string(),
                }],
                language: "en".to_string(),
            },
        ]
    }

    fn models() -> Vec<ModelInfo> {
        ["granite", "mistral"]
            .iter()
            .map(|n| ModelInfo {
                name: n.to_string(),
            })
            .collect()
    }

    fn app(max: usize, panes: usize) -> (App<Vec<u8>>, RecordingConnector) {
        let connector = RecordingConnector::new();
        let templates = Arc::new(MessageTemplates::default());
        let registry = SessionRegistry::new(Box::new(connector.clone()), max, templates.clone())
            .with_default_model("granite");
        let mut selection = Selection::new("en");
        selection.load_catalog(catalog());
        let renderer = Renderer::new(Vec::new(), Duration::from_millis(100));
        let mut app = App::new(registry, selection, models(), templates, renderer);
        app.open_panes(panes).unwrap();
        let ids: Vec<SessionId> = app.registry().iter().map(|s| s.id()).collect();
        for id in ids {
            app.handle_transport(id, TransportEvent::Opened, Instant::now())
                .unwrap();
        }
        (app, connector)
    }

    fn output(app: App<Vec<u8>>) -> String {
        String::from_utf8(app.into_renderer().into_inner()).unwrap()
    }

    #[test]
    fn opening_panes_prints_greetings() {
        let (app, _) = app(4, 2);
        let out = output(app);
        assert!(out.contains("[1 granite] Hi!"));
        assert!(out.contains("[2 granite] Hi!"));
    }

    #[test]
    fn add_stops_at_limit_and_remove_goes_to_zero() {
        let (mut app, connector) = app(2, 1);
        app.handle_line("/add").unwrap();
        app.handle_line("/add").unwrap();
        assert_eq!(app.registry().len(), 2);

        app.handle_line("/remove").unwrap();
        app.handle_line("/remove").unwrap();
        assert!(app.registry().is_empty());
        app.handle_line("/remove").unwrap();
        app.handle_line("anyone there?").unwrap();
        assert!(app.registry().is_empty());
        assert!(connector.connected().iter().all(|id| connector.sent(*id).is_empty()));

        let out = output(app);
        assert!(out.contains("Already at the maximum of 2 panes."));
        assert!(out.contains("Closed pane 2."));
        assert!(out.contains("Closed pane 1."));
        assert!(out.contains("No panes are open.\n"));
        assert!(out.contains("No panes are open; /add one first."));
    }

    #[test]
    fn question_goes_to_every_pane_with_selection() {
        let (mut app, connector) = app(4, 2);
        app.handle_line("how do I upgrade?").unwrap();

        for session in app.registry() {
            let sent = connector.sent(session.id());
            assert_eq!(sent.len(), 1);
            let request: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(request["query"], "how do I upgrade?");
            assert_eq!(request["collection"], "ocp_4_16");
            assert_eq!(request["version"], "4.16");
            assert_eq!(request["language"], "en");
        }
    }

    #[test]
    fn empty_question_shows_notice_per_pane() {
        let (mut app, connector) = app(4, 2);
        app.handle_line("").unwrap();
        for session in app.registry() {
            assert!(connector.sent(session.id()).is_empty());
        }
        let out = output(app);
        assert!(out.contains("[1 granite] Please enter a query..."));
        assert!(out.contains("[2 granite] Please enter a query..."));
    }

    #[test]
    fn product_change_broadcasts_first_version() {
        let (mut app, _) = app(4, 2);
        app.handle_line("/version 4.15").unwrap();
        app.handle_line("/product red hat enterprise linux").unwrap();

        assert_eq!(app.selection().context().version, "9");
        for session in app.registry() {
            let last = session.history().last().unwrap();
            assert!(matches!(last, MessageEntry::Answer(_)));
            assert!(last.text().contains("Red Hat Enterprise Linux version 9"));
            // greeting + two context messages
            assert_eq!(session.history().len(), 3);
        }
    }

    #[test]
    fn bad_selection_is_reported_without_broadcast() {
        let (mut app, _) = app(4, 1);
        app.handle_line("/version 1.0").unwrap();
        app.handle_line("/product Nope").unwrap();
        assert_eq!(app.registry().by_position(0).unwrap().history().len(), 1);
        let out = output(app);
        assert!(out.contains("has no version \"1.0\""));
        assert!(out.contains("no product named \"Nope\""));
    }

    #[test]
    fn model_change_applies_to_one_pane() {
        let (mut app, connector) = app(4, 2);
        app.handle_line("/model 2 mistral").unwrap();
        app.handle_line("/model 1 unknown").unwrap();
        app.handle_line("/model 3 granite").unwrap();
        app.handle_line("q").unwrap();

        let models: Vec<String> = app
            .registry()
            .iter()
            .map(|s| s.model().to_string())
            .collect();
        assert_eq!(models, vec!["granite", "mistral"]);
        let second = app.registry().by_position(1).unwrap().id();
        assert!(connector.sent(second)[0].contains(r#""model":"mistral""#));

        let out = output(app);
        assert!(out.contains("[2 mistral] model set."));
        assert!(out.contains("Unknown model \"unknown\""));
        assert!(out.contains("There is no pane 3."));
    }

    #[test]
    fn streamed_frames_are_rendered() {
        let (mut app, _) = app(4, 1);
        app.handle_line("install?").unwrap();
        let id = app.registry().by_position(0).unwrap().id();
        let t0 = Instant::now();
        app.handle_transport(
            id,
            TransportEvent::Frame(r#"{"type":"token","token":"Run setup.\n"}"#.to_string()),
            t0,
        )
        .unwrap();
        app.flush(t0 + Duration::from_secs(1)).unwrap();
        let out = output(app);
        assert!(out.contains("[1 granite] Run setup.\n"));
        assert!(out.contains("tokens/s") || out.contains("to first token"));
    }

    #[test]
    fn reset_clears_every_pane() {
        let (mut app, _) = app(4, 2);
        app.handle_line("q").unwrap();
        app.handle_line("/reset").unwrap();
        for session in app.registry() {
            assert_eq!(session.history().len(), 1);
            assert_eq!(session.state(), SessionState::Idle);
        }
    }

    #[test]
    fn quit_and_shutdown_close_once() {
        let (mut app, connector) = app(4, 2);
        assert_eq!(app.handle_line("/quit").unwrap(), Flow::Quit);
        app.shutdown();
        let ids: Vec<SessionId> = app.registry().iter().map(|s| s.id()).collect();
        drop(app);
        for id in ids {
            assert_eq!(connector.log(id).close_calls, 1);
        }
    }

    #[test]
    fn listings() {
        let (mut app, _) = app(4, 1);
        app.handle_line("/models").unwrap();
        app.handle_line("/products").unwrap();
        let out = output(app);
        assert!(out.contains("granite\nmistral\n"));
        assert!(out.contains("* OpenShift Container Platform (4.16, 4.15)"));
        assert!(out.contains("  Red Hat Enterprise Linux (9)"));
    }

    #[test]
    fn events_for_removed_pane_are_ignored() {
        let (mut app, _) = app(4, 2);
        let gone = app.registry().by_position(1).unwrap().id();
        app.handle_line("/remove").unwrap();
        app.handle_transport(gone, TransportEvent::Opened, Instant::now())
            .unwrap();
        assert_eq!(app.registry().len(), 1);
    }

    #[test]
    fn tick_period_has_floor() {
        assert_eq!(tick_period(Duration::from_millis(400)), Duration::from_millis(100));
        assert_eq!(tick_period(Duration::from_millis(20)), Duration::from_millis(25));
    }
}
