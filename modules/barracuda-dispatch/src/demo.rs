//! A small storefront wired up for command-line dispatch.
//!
//! `Login` and `Logout` extend the polymorphic `HttpRequest`, so every request
//! also passes the audit listener. Logging in without a `user` parameter
//! interrupts to the login form; logging out redirects home.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use barracuda_engine::{EventGateway, Listener, Outcome, Redirect};
use barracuda_events::{ClassError, ClassTable, DispatchQueue, Event, EventClassSpec};
use tracing::info;

pub fn classes() -> Result<ClassTable, ClassError> {
    ClassTable::new()
        .with(EventClassSpec::control("demo.events.HttpRequest").polymorphic())?
        .with(EventClassSpec::new("demo.events.Login").extends("demo.events.HttpRequest"))?
        .with(EventClassSpec::new("demo.events.Logout").extends("demo.events.HttpRequest"))?
        .with(EventClassSpec::view("demo.views.RenderPage"))?
        .with(EventClassSpec::new("demo.views.Home").extends("demo.views.RenderPage"))?
        .with(EventClassSpec::new("demo.views.LoginForm").extends("demo.views.RenderPage"))
}

pub fn gateway(classes: Arc<ClassTable>) -> EventGateway {
    let pages: Arc<dyn Listener> = Arc::new(PageRenderer);
    EventGateway::new("demo")
        .with_interest(Arc::new(RequestAudit), "demo.events.HttpRequest")
        .with_child(
            EventGateway::new("account")
                .with_interest(Arc::new(LoginHandler { classes }), "demo.events.Login")
                .with_interest(Arc::new(LogoutHandler), "demo.events.Logout"),
        )
        .with_child(
            EventGateway::new("pages")
                .with_interest(Arc::clone(&pages), "demo.views.Home")
                .with_interest(pages, "demo.views.LoginForm"),
        )
}

struct RequestAudit;

#[async_trait]
impl Listener for RequestAudit {
    fn id(&self) -> &str {
        "demo.listeners.RequestAudit"
    }

    fn notify_always(&self) -> bool {
        true
    }

    async fn handle_control_event(&self, event: &mut Event, queue: &mut DispatchQueue) -> Result<Outcome> {
        let root = queue.root_event_of(event).class_name().to_string();
        info!(request = root.as_str(), "Audited request");
        Ok(Outcome::Continue)
    }
}

struct LoginHandler {
    classes: Arc<ClassTable>,
}

#[async_trait]
impl Listener for LoginHandler {
    fn id(&self) -> &str {
        "demo.listeners.LoginHandler"
    }

    async fn handle_control_event(&self, event: &mut Event, queue: &mut DispatchQueue) -> Result<Outcome> {
        let Some(user) = event.param("user").map(str::to_string) else {
            return Ok(Outcome::Interrupt(self.classes.instantiate("demo.views.LoginForm")?));
        };
        let roles = event.param_values("role").map(<[String]>::to_vec).unwrap_or_default();
        let mut home = self.classes.instantiate("demo.views.Home")?;
        home.put_state("user", user);
        home.put_state("roles", roles);
        queue.add_event(home);
        Ok(Outcome::Handled)
    }
}

struct LogoutHandler;

#[async_trait]
impl Listener for LogoutHandler {
    fn id(&self) -> &str {
        "demo.listeners.LogoutHandler"
    }

    async fn handle_control_event(&self, _event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        Ok(Outcome::Redirect(Redirect::to("Home.event")))
    }
}

struct PageRenderer;

#[async_trait]
impl Listener for PageRenderer {
    fn id(&self) -> &str {
        "demo.listeners.PageRenderer"
    }

    async fn handle_view_event(&self, event: &mut Event, _queue: &mut DispatchQueue) -> Result<Outcome> {
        info!(page = event.class().short_name(), user = ?event.state("user"), "Rendered page");
        Ok(Outcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barracuda_common::AppConfig;
    use barracuda_engine::{Application, DiscardContext, RequestOutcome};

    fn app() -> Application<DiscardContext> {
        let classes = Arc::new(classes().unwrap());
        Application::new(
            AppConfig::default(),
            Arc::clone(&classes),
            gateway(classes),
            DiscardContext,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn login_renders_home_for_user() {
        let app = app();
        let RequestOutcome::Completed { report, processed } = app
            .handle("/demo/Login.event?user=ann&role=admin&role=staff")
            .await
            .unwrap()
        else {
            panic!("expected completed request");
        };
        assert!(report.response_handled);
        let home = processed.iter().find(|e| e.class == "demo.views.Home").unwrap();
        assert_eq!(home.state["user"], "ann");
        assert_eq!(home.state["roles"], serde_json::json!(["admin", "staff"]));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn login_without_user_interrupts_to_form() {
        let app = app();
        let RequestOutcome::Completed { report, processed } = app.handle("Login.event").await.unwrap() else {
            panic!("expected completed request");
        };
        assert_eq!(report.interrupts, 1);
        assert!(processed.iter().any(|e| e.class == "demo.views.LoginForm"));
        assert!(processed.iter().all(|e| e.class != "demo.views.Home"));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn logout_redirects_home() {
        let app = app();
        let outcome = app.handle("Logout.event").await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Redirect { url, .. } if url == "Home.event"));
        app.shutdown().await;
    }
}
