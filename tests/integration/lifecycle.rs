use crate::common::*;
use std::time::Duration;

use devpanel::error::ServiceError;
use devpanel::orchestrator::service::ServicePhase;
use devpanel::orchestrator::Action;
use devpanel::ui::logs::COMBINED;

#[tokio::test]
async fn start_all_then_stop_all_leaves_no_processes() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    project.add_service_dir("api-server");
    project.add_service_dir("admin-frontend");
    let supervisor = project.supervisor();

    supervisor.dispatch(Action::StartAll).await.unwrap();
    let api = wait_for_phase(&supervisor, "api", ServicePhase::Running, Duration::from_secs(10)).await;
    let frontend =
        wait_for_phase(&supervisor, "frontend", ServicePhase::Running, Duration::from_secs(10))
            .await;
    assert_eq!(api.phase, ServicePhase::Running);
    assert_eq!(frontend.phase, ServicePhase::Running);
    let pids = [api.pid.unwrap(), frontend.pid.unwrap()];
    assert!(pids.iter().all(|p| pid_alive(*p)));

    supervisor.stop_all().await;
    let status = supervisor.status();
    assert_eq!(status.labels["api"], "Stopped");
    assert_eq!(status.labels["frontend"], "Stopped");
    assert!(pids.iter().all(|p| !pid_alive(*p)));

    // Output reached both the service channel and combined.
    assert!(supervisor
        .channel_logs("api")
        .iter()
        .any(|l| l.ends_with(&format!("Server running on port {}", ports[0]))));
    assert!(supervisor
        .channel_logs(COMBINED)
        .iter()
        .any(|l| l.contains("[frontend] Ready in 12ms")));
}

#[tokio::test]
async fn stop_all_kills_a_child_that_ignores_sigterm() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], "trap '' TERM; "));
    project.add_service_dir("api-server");
    let supervisor = project.supervisor();

    assert!(supervisor.start("api").unwrap());
    let api = wait_for_phase(&supervisor, "api", ServicePhase::Running, Duration::from_secs(10)).await;
    let pid = api.pid.unwrap();

    let started = std::time::Instant::now();
    supervisor.stop_all().await;
    assert!(started.elapsed() >= Duration::from_secs(2), "grace period was skipped");
    assert_eq!(supervisor.service_status("api").unwrap().phase, ServicePhase::Stopped);
    assert!(!pid_alive(pid));
    assert!(supervisor
        .channel_logs("api")
        .iter()
        .any(|l| l.contains("killed")));
}

#[tokio::test]
async fn stop_all_while_api_is_starting_and_frontend_is_running() {
    let ports = free_ports(2);
    // No readiness marker and no listener: the api stays Starting.
    let config = two_service_config(ports[0], ports[1], "trap '' TERM; ").replace(
        &format!("echo 'Server running on port {}'; ", ports[0]),
        "echo booting; ",
    );
    let project = TestProject::new(&config);
    project.add_service_dir("api-server");
    project.add_service_dir("admin-frontend");
    let supervisor = project.supervisor();

    assert!(supervisor.start("frontend").unwrap());
    let frontend =
        wait_for_phase(&supervisor, "frontend", ServicePhase::Running, Duration::from_secs(10))
            .await;
    assert_eq!(frontend.phase, ServicePhase::Running);

    assert!(supervisor.start("api").unwrap());
    let started = std::time::Instant::now();
    let api = loop {
        let status = supervisor.service_status("api").unwrap();
        if status.pid.is_some() || started.elapsed() > Duration::from_secs(5) {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(api.phase, ServicePhase::Starting);
    let pids = [api.pid.unwrap(), frontend.pid.unwrap()];

    supervisor.stop_all().await;
    let status = supervisor.status();
    assert_eq!(status.services["api"].phase, ServicePhase::Stopped);
    assert_eq!(status.services["frontend"].phase, ServicePhase::Stopped);
    assert!(pids.iter().all(|p| !pid_alive(*p)));
}

#[tokio::test]
async fn stop_all_waits_for_a_stop_already_in_progress() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], "trap '' TERM; "));
    project.add_service_dir("api-server");
    let supervisor = project.supervisor();

    assert!(supervisor.start("api").unwrap());
    let api = wait_for_phase(&supervisor, "api", ServicePhase::Running, Duration::from_secs(10)).await;
    let pid = api.pid.unwrap();

    let single = tokio::spawn({
        let supervisor = std::sync::Arc::clone(&supervisor);
        async move { supervisor.stop("api").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.service_status("api").unwrap().state, "Stopping");

    supervisor.stop_all().await;
    let status = supervisor.service_status("api").unwrap();
    assert_eq!(status.phase, ServicePhase::Stopped);
    assert!(status.pid.is_none());
    assert!(!pid_alive(pid));
    assert!(single.await.unwrap().unwrap());
}

#[tokio::test]
async fn missing_manifest_leaves_service_stopped_and_logged() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    let supervisor = project.supervisor();

    let err = supervisor.start("api").unwrap_err();
    assert!(matches!(err, ServiceError::MissingManifest { .. }));
    let status = supervisor.service_status("api").unwrap();
    assert_eq!(status.phase, ServicePhase::Stopped);
    assert!(status.pid.is_none());
    assert!(supervisor
        .channel_logs("api")
        .iter()
        .any(|l| l.contains("package.json not found")));
}

#[tokio::test]
async fn stop_is_idempotent_through_the_facade() {
    let ports = free_ports(2);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    project.add_service_dir("api-server");
    let supervisor = project.supervisor();

    assert!(!supervisor.stop("api").await.unwrap());
    supervisor.start("api").unwrap();
    let phase = supervisor.service_status("api").unwrap().phase;
    assert!(matches!(phase, ServicePhase::Starting | ServicePhase::Running));
    assert!(supervisor.stop("api").await.unwrap());
    assert!(!supervisor.stop("api").await.unwrap());
    assert_eq!(supervisor.service_status("api").unwrap().phase, ServicePhase::Stopped);
}

#[tokio::test]
async fn install_deps_runs_install_and_refreshes_report() {
    let ports = free_ports(2);
    let mut config = two_service_config(ports[0], ports[1], "").replace(
        "[services.frontend]",
        "install = \"mkdir -p node_modules\"\n\n[services.frontend]",
    );
    config.push_str("install = \"true\"\n");
    let project = TestProject::new(&config);
    let dir = project.root().join("api-server");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("package.json"), "{}").unwrap();
    project.add_service_dir("admin-frontend");
    let supervisor = project.supervisor();

    let errors = supervisor.install_deps().await;
    assert!(errors.is_empty(), "{:?}", errors.iter().map(|e| e.to_string()).collect::<Vec<_>>());
    assert!(dir.join("node_modules").is_dir());
    assert_eq!(supervisor.status().dependencies, "All dependencies available");
    let report = supervisor.dependency_report().unwrap();
    assert!(report.projects.iter().all(|p| p.installed));
}
