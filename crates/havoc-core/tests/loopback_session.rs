//! Whole sessions over real loopback TCP.
//!
//! These complement the simulated sessions in `havoc-harness` by checking
//! behaviour that depends on the real socket layer, mostly that the listening
//! port is actually released when a session ends.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use havoc_core::{
    AgentConfig, CycleRequest, CycleTarget, DeployRequest, Deployer, Environment, Orchestrator, Outcome,
    PayloadCatalog, Reporter, ScheduleConfig, Session, SessionConfig, SessionError, SessionState,
    SystemEnv, TcpTransport, agent::mint_token, error::DeployError, run_session,
    sink::{MemoryAuditLog, MemoryVariableStore, Sinks},
};
use havoc_proto::Status;

fn quick_config() -> SessionConfig {
    SessionConfig {
        idle_timeout: Duration::from_millis(300),
        read_timeout: Duration::from_secs(5),
        accept_backoff: Duration::from_millis(10),
    }
}

async fn assert_port_free(port: u16) {
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|e| panic!("port {port} still held after session end: {e}"));
}

async fn well_behaved_agent(config: AgentConfig) {
    let token = mint_token(&SystemEnv);
    let mut reporter = Reporter::connect(&config).await.expect("connect");
    reporter.init(&token, "starting").await.expect("init");
    reporter.report(&token, "x").await.expect("report");
    reporter.complete(&token).await.expect("complete");
    // The monitor may already have closed the socket after the last frame.
    let _ = reporter.shutdown().await;
}

#[tokio::test]
async fn agent_drains_session_and_port_is_released() {
    let mut session = Session::<TcpTransport>::start("127.0.0.1:0", &SystemEnv, quick_config())
        .await
        .expect("start");
    let port = session.port();

    let agent = tokio::spawn(well_behaved_agent(session.agent_config("127.0.0.1")));

    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();
    let outcome = session.run(Sinks::new(&audit, &variables)).await;
    agent.await.expect("agent task");

    assert!(matches!(outcome, Outcome::Success), "unexpected outcome {outcome:?}");
    assert_eq!(session.state(), SessionState::Closed);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    let record = havoc_proto::ChaosMessage::from_json(&records[0]).expect("audit record is json");
    assert_eq!(record.status, Status::ChaosReport);
    assert_eq!(record.message, "x");

    assert_port_free(port).await;
}

#[tokio::test]
async fn idle_session_times_out_and_port_is_released() {
    let mut session = Session::<TcpTransport>::start("127.0.0.1:0", &SystemEnv, quick_config())
        .await
        .expect("start");
    let port = session.port();

    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();
    let outcome = session.run(Sinks::new(&audit, &variables)).await;

    assert!(matches!(outcome, Outcome::TimedOut), "unexpected outcome {outcome:?}");
    assert_eq!(session.state(), SessionState::Closed);
    assert_port_free(port).await;
}

/// Deployer that records requests and either fails or starts an in-process
/// agent.
#[derive(Default)]
struct RecordingDeployer {
    fail: bool,
    requests: Mutex<Vec<DeployRequest>>,
}

impl RecordingDeployer {
    fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError> {
        self.requests.lock().expect("lock").push(request.clone());
        if self.fail {
            return Err(DeployError::Copy("target unreachable".to_string()));
        }
        tokio::spawn(well_behaved_agent(request.agent.clone()));
        Ok(())
    }
}

fn cycle(payload: &str) -> CycleRequest {
    CycleRequest {
        bind_address: "127.0.0.1:0".to_string(),
        advertise_host: "127.0.0.1".to_string(),
        target_host: "target.test".to_string(),
        payload: payload.to_string(),
    }
}

#[tokio::test]
async fn run_session_succeeds_with_deployed_agent() {
    let deployer = RecordingDeployer::default();
    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();

    let outcome = run_session::<TcpTransport, _, _>(
        &cycle("jumble"),
        &SystemEnv,
        &quick_config(),
        &deployer,
        Sinks::new(&audit, &variables),
    )
    .await;

    assert!(matches!(outcome, Outcome::Success), "unexpected outcome {outcome:?}");
    let requests = deployer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload, "jumble");
    assert_eq!(requests[0].target_host, "target.test");
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test]
async fn deploy_failure_ends_session_immediately() {
    let deployer = RecordingDeployer::failing();
    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();
    let config = SessionConfig { idle_timeout: Duration::from_secs(3600), ..quick_config() };

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        run_session::<TcpTransport, _, _>(
            &cycle("jumble"),
            &SystemEnv,
            &config,
            &deployer,
            Sinks::new(&audit, &variables),
        ),
    )
    .await
    .expect("deploy failure must not wait for the idle timeout");

    assert!(matches!(outcome, Outcome::Error(SessionError::Deploy(DeployError::Copy(_)))));
    let port = deployer.requests()[0].agent.port;
    assert_port_free(port).await;
}

/// Deployer whose build takes longer than the idle window.
struct SlowDeployer {
    delay: Duration,
}

#[async_trait]
impl Deployer for SlowDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError> {
        tokio::time::sleep(self.delay).await;
        tokio::spawn(well_behaved_agent(request.agent.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn deploy_longer_than_idle_window_still_succeeds() {
    let config = quick_config();
    let deployer = SlowDeployer { delay: config.idle_timeout + Duration::from_millis(200) };
    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();

    let outcome = run_session::<TcpTransport, _, _>(
        &cycle("jumble"),
        &SystemEnv,
        &config,
        &deployer,
        Sinks::new(&audit, &variables),
    )
    .await;

    assert!(matches!(outcome, Outcome::Success), "unexpected outcome {outcome:?}");
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test]
async fn idle_window_opens_when_deploy_returns() {
    // Launch "succeeds" but no agent ever dials in.
    struct SilentDeployer;

    #[async_trait]
    impl Deployer for SilentDeployer {
        async fn deploy(&self, _request: &DeployRequest) -> Result<(), DeployError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }
    }

    let config = quick_config();
    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();
    let started = std::time::Instant::now();
    let outcome = run_session::<TcpTransport, _, _>(
        &cycle("jumble"),
        &SystemEnv,
        &config,
        &SilentDeployer,
        Sinks::new(&audit, &variables),
    )
    .await;

    assert!(matches!(outcome, Outcome::TimedOut), "unexpected outcome {outcome:?}");
    assert!(started.elapsed() >= Duration::from_millis(500) + config.idle_timeout);
}

/// Real randomness, no real sleeping.
#[derive(Clone, Default)]
struct NoSleepEnv {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl Environment for NoSleepEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("lock").push(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        SystemEnv.random_bytes(buffer);
    }
}

#[tokio::test]
async fn orchestrator_alternates_when_every_pause_reaches_long_interval() {
    let env = NoSleepEnv::default();
    let deployer = RecordingDeployer::failing();
    let audit = MemoryAuditLog::new();
    let variables = MemoryVariableStore::new();

    let schedule = ScheduleConfig {
        short_min: Duration::from_secs(300),
        short_max: Duration::from_secs(300),
        long_min: Duration::from_secs(300),
        long_max: Duration::from_secs(300),
    };
    let catalog = PayloadCatalog { cheap: vec!["cheap".into()], expensive: vec!["expensive".into()] };
    let target = CycleTarget {
        bind_address: "127.0.0.1:0".to_string(),
        advertise_host: "127.0.0.1".to_string(),
        target_host: "target.test".to_string(),
    };

    let orchestrator = Orchestrator::<TcpTransport, _, _>::new(
        env.clone(),
        quick_config(),
        schedule,
        catalog,
        target,
        &deployer,
        Sinks::new(&audit, &variables),
    );
    let stats = orchestrator.run(Some(4)).await;

    assert_eq!(stats.failed, 4);
    let payloads: Vec<_> = deployer.requests().into_iter().map(|r| r.payload).collect();
    assert_eq!(payloads, ["cheap", "expensive", "cheap", "expensive"]);
    assert_eq!(*env.slept.lock().expect("lock"), vec![Duration::from_secs(300); 2]);
}
