use crate::common::*;
use std::time::Duration;

use devpanel::dashboard::server::{bind, start_dashboard_server};
use devpanel::orchestrator::service::ServicePhase;
use tokio_util::sync::CancellationToken;

struct Panel {
    base: String,
    cancel: CancellationToken,
    client: reqwest::Client,
}

async fn serve(project: &TestProject) -> (std::sync::Arc<devpanel::orchestrator::Supervisor>, Panel) {
    let supervisor = project.supervisor();
    let listener = bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    tokio::spawn(start_dashboard_server(
        listener,
        supervisor.clone(),
        cancel.clone(),
    ));
    let panel = Panel {
        base: format!("http://127.0.0.1:{}", port),
        cancel,
        client: reqwest::Client::new(),
    };
    (supervisor, panel)
}

impl Panel {
    async fn post_action(&self, action: &str) -> reqwest::Response {
        self.client
            .post(&self.base)
            .form(&[("action", action)])
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn status_and_logs_endpoints() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    let (supervisor, panel) = serve(&project).await;
    supervisor.logs().append("api", "hello from api");

    let status: serde_json::Value = panel
        .client
        .get(format!("{}/api/status", panel.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["api"], "Stopped");
    assert_eq!(status["frontend"], "Stopped");
    assert!(status["dependencies"].is_string());
    assert_eq!(status["services"]["api"]["label"], "API Server");
    assert_eq!(status["services"]["api"]["port"], ports[0]);

    let logs: serde_json::Value = panel
        .client
        .get(format!("{}/api/logs", panel.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let api = logs["api"].as_array().unwrap();
    assert!(api[0].as_str().unwrap().ends_with("] hello from api"));
    let combined = logs["combined"].as_array().unwrap();
    assert!(combined[0].as_str().unwrap().ends_with("] [api] hello from api"));
    assert!(logs["frontend"].as_array().unwrap().is_empty());

    let filtered: serde_json::Value = panel
        .client
        .get(format!("{}/api/logs?channel=api&grep=nothing-matches", panel.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filtered.as_object().unwrap().len(), 1);
    assert!(filtered["api"].as_array().unwrap().is_empty());

    panel.cancel.cancel();
}

#[tokio::test]
async fn control_page_is_served() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    let (_supervisor, panel) = serve(&project).await;

    let resp = panel.client.get(&panel.base).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let ct = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(ct.starts_with("text/html"), "{ct}");
    let body = resp.text().await.unwrap();
    assert!(body.contains("/api/status"));
    panel.cancel.cancel();
}

#[tokio::test]
async fn unknown_actions_are_rejected() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    let (_supervisor, panel) = serve(&project).await;

    assert_eq!(panel.post_action("reboot").await.status(), 400);
    assert_eq!(panel.post_action("start_database").await.status(), 400);
    panel.cancel.cancel();
}

#[tokio::test]
async fn actions_drive_services_in_the_background() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    project.add_service_dir("api-server");
    let (supervisor, panel) = serve(&project).await;

    let resp = panel.post_action("start_api").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
    let api = wait_for_phase(&supervisor, "api", ServicePhase::Running, Duration::from_secs(10)).await;
    assert_eq!(api.phase, ServicePhase::Running);
    let pid = api.pid.unwrap();

    assert_eq!(panel.post_action("stop_all").await.status(), 200);
    let api = wait_for_phase(&supervisor, "api", ServicePhase::Stopped, Duration::from_secs(10)).await;
    assert_eq!(api.phase, ServicePhase::Stopped);
    assert!(!pid_alive(pid));

    supervisor.logs().append("api", "noise");
    assert_eq!(panel.post_action("clear_logs").await.status(), 200);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(supervisor.channel_logs("api").is_empty());
    panel.cancel.cancel();
}

#[tokio::test]
async fn cancelling_the_token_closes_the_panel() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    let supervisor = project.supervisor();
    let listener = bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(start_dashboard_server(listener, supervisor, cancel.clone()));
    assert!(wait_for_port(port, Duration::from_secs(5)).await);

    cancel.cancel();
    let served = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits after cancel")
        .unwrap();
    assert!(served.is_ok());
    assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_err());
}
