//! Tests for the health monitor: validation, probe execution and the
//! transition state machine.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::common::command_check;
use crate::error::OverseerError;
use crate::model::{
    CheckId, HealthCheckConfig, HealthStatus, HealthTransition, ProbeOutcome, ProbeSpec, ServiceId,
};
use crate::services::health::HealthMonitor;

fn http_check(id: &str, service: &str, endpoint: &str, retries: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        id: CheckId::from(id),
        service_id: ServiceId::from(service),
        probe: ProbeSpec::Http {
            endpoint: endpoint.to_string(),
            expected_status: 200,
            expected_body: None,
        },
        interval_secs: 1,
        timeout_secs: 5,
        retries,
        enabled: false,
    }
}

/// Minimal HTTP stub answering every connection with a fixed response
async fn spawn_http_stub(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}/health")
}

fn assert_no_event(rx: &mut tokio::sync::broadcast::Receiver<HealthTransition>) {
    assert!(
        rx.try_recv().is_err(),
        "no further transition should have fired"
    );
}

#[tokio::test]
async fn http_check_without_endpoint_is_rejected() {
    let monitor = HealthMonitor::new();
    let config = http_check("c1", "svc", "  ", 3);
    let err = monitor.register_check(config).await.unwrap_err();
    assert!(matches!(err, OverseerError::Validation { .. }));
}

#[tokio::test]
async fn command_check_without_command_is_rejected() {
    let monitor = HealthMonitor::new();
    let config = command_check("c1", "svc", "", 3);
    let err = monitor.register_check(config).await.unwrap_err();
    assert!(matches!(err, OverseerError::Validation { .. }));
}

#[tokio::test]
async fn tcp_check_on_port_zero_is_rejected() {
    let monitor = HealthMonitor::new();
    let config = HealthCheckConfig {
        probe: ProbeSpec::Tcp { port: 0 },
        ..http_check("c1", "svc", "unused", 3)
    };
    let err = monitor.register_check(config).await.unwrap_err();
    assert!(matches!(err, OverseerError::Validation { .. }));
}

#[tokio::test]
async fn zero_interval_is_rejected() {
    let monitor = HealthMonitor::new();
    let mut config = command_check("c1", "svc", "true", 3);
    config.interval_secs = 0;
    let err = monitor.register_check(config).await.unwrap_err();
    assert!(matches!(err, OverseerError::Validation { .. }));
}

#[tokio::test]
async fn run_check_now_on_unknown_id_is_not_found() {
    let monitor = HealthMonitor::new();
    let err = monitor.run_check_now(&CheckId::from("ghost")).await.unwrap_err();
    assert!(matches!(err, OverseerError::NotFound { .. }));
}

#[tokio::test]
async fn first_success_transitions_unknown_to_healthy() {
    let monitor = HealthMonitor::new();
    let mut events = monitor.subscribe();
    let service = ServiceId::from("svc");

    monitor
        .register_check(command_check("c1", "svc", "true", 3))
        .await
        .unwrap();
    let outcome = monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    assert_eq!(outcome, ProbeOutcome::Success);

    let event = events.try_recv().unwrap();
    assert_eq!(event.previous, HealthStatus::Unknown);
    assert_eq!(event.new, HealthStatus::Healthy);

    let state = monitor.state_of(&service).await.unwrap();
    assert_eq!(state.status, HealthStatus::Healthy);
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_checked_at.is_some());
}

#[tokio::test]
async fn unhealthy_fires_exactly_once_at_the_retry_boundary() {
    let monitor = HealthMonitor::new();
    let mut events = monitor.subscribe();
    let check = CheckId::from("c1");
    let service = ServiceId::from("svc");

    monitor
        .register_check(command_check("c1", "svc", "false", 3))
        .await
        .unwrap();

    // Two failures: still below the boundary, no transition
    for _ in 0..2 {
        monitor.run_check_now(&check).await.unwrap();
    }
    assert_no_event(&mut events);
    assert_eq!(
        monitor.state_of(&service).await.unwrap().status,
        HealthStatus::Unknown
    );

    // Third failure crosses the boundary
    monitor.run_check_now(&check).await.unwrap();
    let event = events.try_recv().unwrap();
    assert_eq!(event.new, HealthStatus::Unhealthy);

    // Further failures keep counting but never re-fire the event
    for _ in 0..3 {
        monitor.run_check_now(&check).await.unwrap();
    }
    assert_no_event(&mut events);
    let state = monitor.state_of(&service).await.unwrap();
    assert_eq!(state.status, HealthStatus::Unhealthy);
    assert_eq!(state.consecutive_failures, 6);
}

#[tokio::test]
async fn success_recovers_an_unhealthy_service() {
    let monitor = HealthMonitor::new();
    let check = CheckId::from("c1");
    let service = ServiceId::from("svc");

    monitor
        .register_check(command_check("c1", "svc", "false", 1))
        .await
        .unwrap();
    monitor.run_check_now(&check).await.unwrap();
    assert_eq!(
        monitor.state_of(&service).await.unwrap().status,
        HealthStatus::Unhealthy
    );

    let mut events = monitor.subscribe();
    monitor
        .update_check(command_check("c1", "svc", "true", 1))
        .await
        .unwrap();
    monitor.run_check_now(&check).await.unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.previous, HealthStatus::Unhealthy);
    assert_eq!(event.new, HealthStatus::Healthy);
    assert_eq!(
        monitor.state_of(&service).await.unwrap().consecutive_failures,
        0
    );
}

#[tokio::test]
async fn tcp_probe_succeeds_against_a_live_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Keep accepting so connects complete
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let monitor = HealthMonitor::new();
    let config = HealthCheckConfig {
        probe: ProbeSpec::Tcp { port },
        ..http_check("c1", "svc", "unused", 3)
    };
    monitor.register_check(config).await.unwrap();

    let outcome = monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    assert_eq!(outcome, ProbeOutcome::Success);
}

#[tokio::test]
async fn tcp_probe_fails_against_a_closed_port() {
    // Bind then drop to find a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let monitor = HealthMonitor::new();
    let config = HealthCheckConfig {
        probe: ProbeSpec::Tcp { port },
        ..http_check("c1", "svc", "unused", 3)
    };
    monitor.register_check(config).await.unwrap();

    let outcome = monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    assert!(matches!(outcome, ProbeOutcome::Failure(_)));
}

#[tokio::test]
async fn http_probe_matches_status_and_body() {
    let ok_url = spawn_http_stub("200 OK", "service ready").await;

    let monitor = HealthMonitor::new();
    let mut config = http_check("c1", "svc", &ok_url, 3);
    config.probe = ProbeSpec::Http {
        endpoint: ok_url.clone(),
        expected_status: 200,
        expected_body: Some("ready".to_string()),
    };
    monitor.register_check(config).await.unwrap();
    let outcome = monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    assert_eq!(outcome, ProbeOutcome::Success);

    // Same endpoint, wrong expected body
    let mut config = http_check("c2", "svc", &ok_url, 3);
    config.probe = ProbeSpec::Http {
        endpoint: ok_url,
        expected_status: 200,
        expected_body: Some("absent".to_string()),
    };
    monitor.register_check(config).await.unwrap();
    let outcome = monitor.run_check_now(&CheckId::from("c2")).await.unwrap();
    assert!(matches!(outcome, ProbeOutcome::Failure(_)));
}

#[tokio::test]
async fn http_500_three_times_yields_one_unhealthy_transition() {
    let url = spawn_http_stub("500 Internal Server Error", "").await;

    let monitor = HealthMonitor::new();
    let mut events = monitor.subscribe();
    let check = CheckId::from("c1");

    monitor
        .register_check(http_check("c1", "svc", &url, 3))
        .await
        .unwrap();

    for _ in 0..3 {
        let outcome = monitor.run_check_now(&check).await.unwrap();
        assert!(matches!(outcome, ProbeOutcome::Failure(_)));
    }

    let event = events.try_recv().unwrap();
    assert_eq!(event.previous, HealthStatus::Unknown);
    assert_eq!(event.new, HealthStatus::Unhealthy);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn command_probe_times_out() {
    let monitor = HealthMonitor::new();
    let mut config = command_check("c1", "svc", "sleep 30", 3);
    config.timeout_secs = 1;
    monitor.register_check(config).await.unwrap();

    let outcome = timeout(
        Duration::from_secs(5),
        monitor.run_check_now(&CheckId::from("c1")),
    )
    .await
    .expect("probe must respect its timeout budget")
    .unwrap();
    assert_eq!(outcome, ProbeOutcome::Timeout);
}

#[tokio::test]
async fn enabled_check_probes_on_its_own() {
    let monitor = HealthMonitor::new();
    let mut config = command_check("c1", "svc", "true", 3);
    config.enabled = true;
    monitor.register_check(config).await.unwrap();

    let service = ServiceId::from("svc");
    let healthy = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(state) = monitor.state_of(&service).await {
                if state.status == HealthStatus::Healthy {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(healthy.is_ok(), "periodic task should have probed by now");

    monitor.cleanup().await;
}

#[tokio::test]
async fn set_degraded_emits_and_success_restores_healthy() {
    let monitor = HealthMonitor::new();
    let mut events = monitor.subscribe();
    let service = ServiceId::from("svc");

    monitor.set_degraded(&service).await;
    let event = events.try_recv().unwrap();
    assert_eq!(event.new, HealthStatus::Degraded);

    // Setting it again is not a boundary crossing
    monitor.set_degraded(&service).await;
    assert_no_event(&mut events);

    monitor
        .register_check(command_check("c1", "svc", "true", 3))
        .await
        .unwrap();
    monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    let event = events.try_recv().unwrap();
    assert_eq!(event.previous, HealthStatus::Degraded);
    assert_eq!(event.new, HealthStatus::Healthy);
}

#[tokio::test]
async fn removed_check_is_gone() {
    let monitor = HealthMonitor::new();
    let check = CheckId::from("c1");
    monitor
        .register_check(command_check("c1", "svc", "true", 3))
        .await
        .unwrap();

    monitor.remove_check(&check).await.unwrap();
    let err = monitor.run_check_now(&check).await.unwrap_err();
    assert!(matches!(err, OverseerError::NotFound { .. }));
}

#[tokio::test]
async fn service_state_can_be_dropped() {
    let monitor = HealthMonitor::new();
    let service = ServiceId::from("svc");
    monitor
        .register_check(command_check("c1", "svc", "true", 3))
        .await
        .unwrap();
    monitor.run_check_now(&CheckId::from("c1")).await.unwrap();
    assert!(monitor.state_of(&service).await.is_some());

    monitor.remove_service_state(&service).await;
    assert!(monitor.state_of(&service).await.is_none());
}
