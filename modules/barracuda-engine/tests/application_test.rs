//! Integration tests for request handling through Application.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use barracuda_common::AppConfig;
use barracuda_engine::{
    Application, DispatchError, EventGateway, Listener, MemoryContextStore, Outcome, Redirect, RequestOutcome,
};
use barracuda_events::{ClassTable, DispatchQueue, Event, EventClassSpec, EventSource, PoolStats};

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Handles `Login`: greets the `user` param, queues the `Home` view.
struct LoginHandler {
    classes: Arc<ClassTable>,
}

#[async_trait]
impl Listener for LoginHandler {
    fn id(&self) -> &str {
        "shop.listeners.LoginHandler"
    }

    async fn handle_control_event(&self, event: &mut Event, queue: &mut DispatchQueue) -> Result<Outcome> {
        let user = event.param("user").unwrap_or("guest").to_string();
        let mut home = self.classes.instantiate("shop.views.Home")?;
        home.put_state("greeting", format!("hello {user}"));
        queue.add_event(home);
        Ok(Outcome::Handled)
    }
}

struct HomeRenderer;

#[async_trait]
impl Listener for HomeRenderer {
    fn id(&self) -> &str {
        "shop.listeners.HomeRenderer"
    }

    async fn handle_view_event(&self, _event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        Ok(Outcome::Handled)
    }
}

/// Redirects `Logout` to `Home.event`, saving a farewell for the next request.
struct LogoutHandler;

#[async_trait]
impl Listener for LogoutHandler {
    fn id(&self) -> &str {
        "shop.listeners.LogoutHandler"
    }

    async fn handle_control_event(&self, event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        event.put_state("farewell", "bye");
        Ok(Outcome::Redirect(Redirect::to("Home.event")))
    }
}

/// Echoes restored state back into the rendered view.
struct RestoredHome;

#[async_trait]
impl Listener for RestoredHome {
    fn id(&self) -> &str {
        "shop.listeners.RestoredHome"
    }

    async fn handle_view_event(&self, event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        if event.state("farewell").is_some() {
            event.put_state("restored", true);
        }
        Ok(Outcome::Handled)
    }
}

struct Broken;

#[async_trait]
impl Listener for Broken {
    fn id(&self) -> &str {
        "shop.listeners.Broken"
    }

    async fn handle_control_event(&self, _event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        bail!("checkout service unavailable")
    }
}

/// Only reachable through `$eid` targeting.
struct Popup;

#[async_trait]
impl Listener for Popup {
    fn id(&self) -> &str {
        "shop.listeners.Popup"
    }

    async fn handle_control_event(&self, event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        event.put_state("popup", true);
        Ok(Outcome::Handled)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn classes() -> Arc<ClassTable> {
    let table = ClassTable::new()
        .with(EventClassSpec::control("shop.events.Login"))
        .unwrap()
        .with(EventClassSpec::control("shop.events.Logout"))
        .unwrap()
        .with(EventClassSpec::control("shop.events.Checkout"))
        .unwrap()
        .with(EventClassSpec::view("shop.views.Home"))
        .unwrap();
    Arc::new(table)
}

fn gateway(classes: Arc<ClassTable>) -> EventGateway {
    EventGateway::new("shop")
        .with_interest(Arc::new(LoginHandler { classes }), "shop.events.Login")
        .with_interest(Arc::new(LogoutHandler), "shop.events.Logout")
        .with_interest(Arc::new(Broken), "shop.events.Checkout")
        .with_interest(Arc::new(HomeRenderer), "shop.views.Home")
        .with_child(EventGateway::new("widgets").with_listener(Arc::new(Popup)))
}

fn app(config: AppConfig) -> Application<Arc<MemoryContextStore>> {
    let classes = classes();
    Application::new(
        config,
        Arc::clone(&classes),
        gateway(classes),
        Arc::new(MemoryContextStore::new()),
    )
    .unwrap()
}

fn completed(outcome: RequestOutcome) -> (barracuda_engine::DispatchReport, Vec<barracuda_events::EventSnapshot>) {
    match outcome {
        RequestOutcome::Completed { report, processed } => (report, processed),
        other => panic!("expected completed request, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_resolves_alias_and_dispatches_both_phases() {
    let app = app(AppConfig::default());

    let outcome = app.handle("/shop/Login.event?user=ann").await.unwrap();
    let (report, processed) = completed(outcome);

    assert!(report.response_handled);
    let classes: Vec<_> = processed.iter().map(|e| e.class.as_str()).collect();
    assert_eq!(classes, vec!["shop.events.Login", "shop.views.Home"]);
    assert_eq!(processed[0].params["user"], vec!["ann".to_string()]);
    assert_eq!(
        processed[0].source,
        Some(EventSource::Request {
            target: "/shop/Login.event?user=ann".into()
        })
    );
    assert_eq!(processed[1].state["greeting"], "hello ann");

    app.shutdown().await;
}

#[tokio::test]
async fn root_event_returns_to_pool() {
    let app = app(AppConfig::default());

    app.handle("Login.event").await.unwrap();
    app.handle("Login.event").await.unwrap();

    let pool = app.pool().unwrap();
    assert_eq!(pool.stats("shop.events.Login"), Some(PoolStats { free: 1, locked: 0 }));

    app.shutdown().await;
}

#[tokio::test]
async fn listener_failure_still_returns_event_to_pool() {
    let app = app(AppConfig::default());

    let err = app.handle("Checkout.event").await.unwrap_err();
    assert!(matches!(err, DispatchError::Listener { .. }));

    let pool = app.pool().unwrap();
    assert_eq!(pool.stats("shop.events.Checkout"), Some(PoolStats { free: 1, locked: 0 }));

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_targets_are_not_found() {
    let app = app(AppConfig::default());

    assert!(matches!(
        app.handle("/shop/index.html").await.unwrap(),
        RequestOutcome::NotFound { .. }
    ));
    assert!(matches!(
        app.handle("/shop/Nothing.event").await.unwrap(),
        RequestOutcome::NotFound { target } if target == "/shop/Nothing.event"
    ));

    app.shutdown().await;
}

#[tokio::test]
async fn eid_param_targets_a_listener() {
    let app = app(AppConfig::default());

    let outcome = app.handle("Login.event?$eid=Popup").await.unwrap();
    let (report, processed) = completed(outcome);

    // Popup handled Login instead of LoginHandler, so no Home view was queued.
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].state["popup"], true);
    assert!(!processed[0].params.contains_key("$eid"));
    assert!(report.is_unanswered());

    app.shutdown().await;
}

// ---------------------------------------------------------------------------
// Redirect round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redirect_context_is_restored_on_follow_up_request() {
    let classes = classes();
    let gateway = EventGateway::new("shop")
        .with_interest(Arc::new(LoginHandler { classes: Arc::clone(&classes) }), "shop.events.Login")
        .with_interest(Arc::new(LogoutHandler), "shop.events.Logout")
        .with_interest(Arc::new(RestoredHome), "shop.views.Home");
    let store = Arc::new(MemoryContextStore::new());
    let app = Application::new(AppConfig::default(), classes, gateway, Arc::clone(&store)).unwrap();

    let outcome = app.handle("/shop/Logout.event").await.unwrap();
    match outcome {
        RequestOutcome::Redirect { url, .. } => assert_eq!(url, "Home.event"),
        other => panic!("expected redirect, got {other:?}"),
    }
    assert_eq!(store.pending(), 1);

    let (_, processed) = completed(app.handle("/shop/Home.event").await.unwrap());
    assert_eq!(processed[0].state["farewell"], "bye");
    assert_eq!(processed[0].state["restored"], true);
    assert_eq!(store.pending(), 0);

    app.shutdown().await;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pooling_can_be_disabled() {
    let mut config = AppConfig::default();
    config.pool.enabled = false;
    let app = app(config);

    assert!(app.pool().is_none());
    let (report, _) = completed(app.handle("Login.event").await.unwrap());
    assert!(report.response_handled);

    app.shutdown().await;
}

#[tokio::test]
async fn listeners_share_the_application_class_table() {
    let classes = classes();
    let app = Application::new(
        AppConfig::default(),
        Arc::clone(&classes),
        gateway(Arc::clone(&classes)),
        Arc::new(MemoryContextStore::new()),
    )
    .unwrap();

    assert!(Arc::ptr_eq(app.classes(), &classes));
    assert!(Arc::ptr_eq(app.pool().unwrap().classes(), &classes));
    assert!(Arc::ptr_eq(app.broker().read().unwrap().classes(), &classes));

    app.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = AppConfig::default();
    config.dispatch.event_extension = "event".into();
    let result = Application::new(
        config,
        classes(),
        EventGateway::new("empty"),
        Arc::new(MemoryContextStore::new()),
    );
    assert!(matches!(result, Err(DispatchError::Config(_))));
}

#[tokio::test]
async fn shutdown_deregisters_listeners() {
    let app = app(AppConfig::default());
    let broker = Arc::clone(app.broker());
    let pool = Arc::clone(app.pool().unwrap());

    app.shutdown().await;

    let broker = broker.read().unwrap();
    assert!(broker.listeners_for("shop.events.Login").is_empty());
    assert!(broker.listener("shop.listeners.Popup").is_none());
    assert!(pool.is_shut_down());
}
