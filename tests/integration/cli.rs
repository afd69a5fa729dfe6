use crate::common::*;
use std::time::Duration;

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use tokio::process::Command;

#[test]
fn help_lists_flags() {
    AssertCommand::cargo_bin("devpanel")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--web"))
        .stdout(predicate::str::contains("--port"));
}

#[test]
fn missing_config_file_exits_with_error() {
    AssertCommand::cargo_bin("devpanel")
        .unwrap()
        .args(["-f", "/definitely/not/here/devpanel.toml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: Config file not found"));
}

#[test]
fn invalid_config_exits_with_error() {
    let project = TestProject::new(
        r#"
[services.api]
path = "api-server"
command = ""
port = 3470
"#,
    );
    AssertCommand::cargo_bin("devpanel")
        .unwrap()
        .args(["-f", project.config_path.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration errors"));
}

#[tokio::test]
async fn web_mode_serves_and_cleans_up_on_sigint() {
    let ports = free_ports(3);
    let project = TestProject::new(&two_service_config(ports[0], ports[1], ""));
    project.add_service_dir("api-server");
    let web_port = ports[2];

    let child = Command::new(env!("CARGO_BIN_EXE_devpanel"))
        .args([
            "--web",
            "--port",
            &web_port.to_string(),
            "-f",
            project.config_path.to_str().unwrap(),
        ])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start devpanel");
    let mut child = scopeguard::guard(child, |mut c| {
        let _ = c.start_kill();
    });

    assert!(
        wait_for_port(web_port, Duration::from_secs(10)).await,
        "web panel did not come up on {web_port}"
    );
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", web_port);
    let resp = client
        .post(&base)
        .form(&[("action", "start_api")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut api_pid = None;
    for _ in 0..100 {
        let status: serde_json::Value = client
            .get(format!("{}/api/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["api"] == "Running" {
            api_pid = status["services"]["api"]["pid"].as_u64();
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let api_pid = api_pid.expect("api never reached Running") as u32;
    assert!(pid_alive(api_pid));

    let pid = child.id().unwrap();
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGINT,
    )
    .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("devpanel did not exit in time")
        .expect("failed to wait on devpanel");
    assert!(status.success(), "exit status {status:?}");
    assert!(!pid_alive(api_pid));
    assert!(std::net::TcpStream::connect(("127.0.0.1", web_port)).is_err());

    let logs_dir = project.root().join("logs");
    let entries: Vec<_> = std::fs::read_dir(&logs_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
