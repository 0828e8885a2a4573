//! Lifecycle Hooks
//!
//! One hook runs per process. Nothing is kept in memory between hooks:
//! the seed record and lock live in the coordination store and the
//! session id in the local cache file.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;

use super::election::{Election, SeedElection};
use crate::config::SeedPilotConfig;
use crate::coordination::CoordinationStore;
use crate::error::{Error, Result};
use crate::executor::{ClusterService, SeedList};
use crate::network::{NodeIdentity, ReachabilityProbe};

/// Exit code for success / healthy
pub const EXIT_OK: i32 = 0;

/// Exit code for failure / unhealthy / unknown command
pub const EXIT_FAILURE: i32 = 1;

/// Hooks the supervisor can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    PreStart,
    PreStop,
    Health,
    BasicHealth,
    RenewSession,
}

impl LifecycleCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleCommand::PreStart => "pre_start",
            LifecycleCommand::PreStop => "pre_stop",
            LifecycleCommand::Health => "health",
            LifecycleCommand::BasicHealth => "basic_health",
            LifecycleCommand::RenewSession => "renew_session",
        }
    }
}

impl FromStr for LifecycleCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre_start" => Ok(LifecycleCommand::PreStart),
            "pre_stop" => Ok(LifecycleCommand::PreStop),
            "health" => Ok(LifecycleCommand::Health),
            "basic_health" => Ok(LifecycleCommand::BasicHealth),
            "renew_session" => Ok(LifecycleCommand::RenewSession),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a hook left this node in the seed lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedState {
    Unseeded,
    SeedClaimed,
    Joining,
    Active,
    Leaving,
    Gone,
}

impl std::fmt::Display for SeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedState::Unseeded => write!(f, "UNSEEDED"),
            SeedState::SeedClaimed => write!(f, "SEED_CLAIMED"),
            SeedState::Joining => write!(f, "JOINING"),
            SeedState::Active => write!(f, "ACTIVE"),
            SeedState::Leaving => write!(f, "LEAVING"),
            SeedState::Gone => write!(f, "GONE"),
        }
    }
}

/// Result of one hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOutcome {
    pub state: SeedState,
    pub exit_code: i32,
}

impl HookOutcome {
    pub fn success(state: SeedState) -> Self {
        Self { state, exit_code: EXIT_OK }
    }

    pub fn failure(state: SeedState) -> Self {
        Self { state, exit_code: EXIT_FAILURE }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_OK
    }
}

/// Everything a hook needs, built once per invocation
pub struct HookContext {
    pub config: SeedPilotConfig,
    pub identity: NodeIdentity,
    pub store: Arc<dyn CoordinationStore>,
    pub service: Box<dyn ClusterService>,
    pub probe: Box<dyn ReachabilityProbe>,
}

/// Runs lifecycle hooks for this node
pub struct LifecycleNode {
    ctx: HookContext,
    election: SeedElection,
}

impl LifecycleNode {
    pub fn new(ctx: HookContext) -> Self {
        let election = SeedElection::new(Arc::clone(&ctx.store), &ctx.config);
        Self { ctx, election }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.ctx.identity
    }

    /// Dispatch a hook
    pub async fn run(&mut self, command: LifecycleCommand) -> Result<HookOutcome> {
        match command {
            LifecycleCommand::PreStart => self.pre_start().await,
            LifecycleCommand::PreStop => self.pre_stop().await,
            LifecycleCommand::Health | LifecycleCommand::BasicHealth => Ok(self.health().await),
            LifecycleCommand::RenewSession => self.renew_session().await,
        }
    }

    /// Claim the seed role or configure this node to join the seed
    pub async fn pre_start(&mut self) -> Result<HookOutcome> {
        let address = self.ctx.identity.address_string();
        tracing::info!("{} starting at {}", self.ctx.identity.name, address);

        let (seeds, state) = match self.election.claim_or_join(&address).await? {
            Election::Claimed => {
                tracing::info!("{} is the seed", address);
                (SeedList::Own, SeedState::SeedClaimed)
            }
            Election::Join(seed) => {
                tracing::info!("Joining cluster through seed {}", seed);
                let pause = join_jitter(self.ctx.config.join_jitter());
                tracing::info!("Waiting {:?} before joining", pause);
                tokio::time::sleep(pause).await;
                (SeedList::Join(vec![seed.address().to_string()]), SeedState::Joining)
            }
        };

        self.ctx.service.set_seeds(seeds);
        self.ctx.service.update_config(&address).await?;

        Ok(HookOutcome::success(state))
    }

    /// Clean up coordination state on the way out; never fails shutdown
    /// on its own decisions
    pub async fn pre_stop(&mut self) -> Result<HookOutcome> {
        let address = self.ctx.identity.address_string();

        match self.election.current_seed().await? {
            None => tracing::info!("No seed record, nothing to clean up"),
            Some(seed) if seed.names(&address) => {
                tracing::info!("Leaving as seed, freeing the seed slot");
                self.election.relinquish().await?;
            }
            Some(seed) => {
                if self.ctx.probe.is_reachable(seed.address()).await {
                    tracing::debug!("Seed {} is reachable, leaving the record", seed);
                } else {
                    self.election.clear_stale(&seed).await?;
                }
            }
        }

        self.election.retire_session().await;
        Ok(HookOutcome::success(SeedState::Gone))
    }

    /// Healthy only when the service lists this node as Up/Normal
    pub async fn health(&self) -> HookOutcome {
        let address = self.ctx.identity.address_string();

        match self.ctx.service.node_status(&address).await {
            Ok(Some(status)) if status.is_healthy() => {
                tracing::debug!("Node {} is {}", address, status);
                HookOutcome::success(SeedState::Active)
            }
            Ok(Some(status)) => {
                tracing::warn!("Node {} reports status {}", address, status);
                HookOutcome::failure(SeedState::Active)
            }
            Ok(None) => {
                tracing::warn!("Node {} not listed by the service", address);
                HookOutcome::failure(SeedState::Active)
            }
            Err(e) => {
                tracing::warn!("Status query for {} failed: {}", address, e);
                HookOutcome::failure(SeedState::Active)
            }
        }
    }

    /// Extend the cached session's TTL
    pub async fn renew_session(&self) -> Result<HookOutcome> {
        let sessions = self.election.sessions();
        match sessions.renew(self.ctx.store.as_ref()).await {
            Ok(Some(_)) => Ok(HookOutcome::success(SeedState::Active)),
            Ok(None) => {
                tracing::debug!("No cached session to renew");
                Ok(HookOutcome::success(SeedState::Active))
            }
            Err(e) if e.is_invalid_session() => {
                tracing::warn!("{}, dropping the cached id", e);
                sessions.invalidate().await?;
                Ok(HookOutcome::failure(SeedState::Active))
            }
            Err(e) => Err(e),
        }
    }
}

/// Uniform random pause in `[0, max]`
fn join_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryStore;
    use crate::executor::NodeStatus;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// What the fake service saw
    #[derive(Default)]
    struct ServiceLog {
        seeds: Option<SeedList>,
        listen_address: Option<String>,
        updates: usize,
        status: Option<String>,
        fail_status: bool,
    }

    struct FakeService {
        log: Arc<Mutex<ServiceLog>>,
    }

    #[async_trait::async_trait]
    impl ClusterService for FakeService {
        fn set_seeds(&mut self, seeds: SeedList) {
            self.log.lock().unwrap().seeds = Some(seeds);
        }

        async fn update_config(&mut self, listen_address: &str) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            log.listen_address = Some(listen_address.to_string());
            log.updates += 1;
            Ok(())
        }

        async fn node_status(&self, _address: &str) -> Result<Option<NodeStatus>> {
            let log = self.log.lock().unwrap();
            if log.fail_status {
                return Err(Error::Service("nodetool unavailable".into()));
            }
            Ok(log.status.as_deref().and_then(NodeStatus::parse))
        }
    }

    struct FakeProbe {
        reachable: HashSet<String>,
    }

    #[async_trait::async_trait]
    impl ReachabilityProbe for FakeProbe {
        async fn is_reachable(&self, address: &str) -> bool {
            self.reachable.contains(address)
        }
    }

    fn node_with(
        store: Arc<MemoryStore>,
        ip: Ipv4Addr,
        dir: &Path,
        reachable: &[&str],
    ) -> (LifecycleNode, Arc<Mutex<ServiceLog>>) {
        let mut config = SeedPilotConfig::default();
        config.cluster.join_jitter_secs = 0;
        config.session.cache_file = dir.join(format!("session-{}", ip));

        let log = Arc::new(Mutex::new(ServiceLog::default()));
        let ctx = HookContext {
            config,
            identity: NodeIdentity::new("cassandra", format!("host-{}", ip.octets()[3]), ip),
            store,
            service: Box::new(FakeService { log: Arc::clone(&log) }),
            probe: Box::new(FakeProbe {
                reachable: reachable.iter().map(|s| s.to_string()).collect(),
            }),
        };
        (LifecycleNode::new(ctx), log)
    }

    fn node(
        store: Arc<MemoryStore>,
        ip: Ipv4Addr,
        dir: &Path,
    ) -> (LifecycleNode, Arc<Mutex<ServiceLog>>) {
        node_with(store, ip, dir, &[])
    }

    async fn seed_record(store: &MemoryStore) -> Option<String> {
        store
            .get("cluster_seeds")
            .await
            .unwrap()
            .map(|v| String::from_utf8(v).unwrap())
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("pre_start".parse::<LifecycleCommand>().unwrap(), LifecycleCommand::PreStart);
        assert_eq!("pre_stop".parse::<LifecycleCommand>().unwrap(), LifecycleCommand::PreStop);
        assert_eq!("health".parse::<LifecycleCommand>().unwrap(), LifecycleCommand::Health);
        assert_eq!(
            "basic_health".parse::<LifecycleCommand>().unwrap(),
            LifecycleCommand::BasicHealth
        );
        assert_eq!(
            "renew_session".parse::<LifecycleCommand>().unwrap(),
            LifecycleCommand::RenewSession
        );

        let err = "restart".parse::<LifecycleCommand>().unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(ref name) if name == "restart"));
        assert!("PRE_START".parse::<LifecycleCommand>().is_err());
        assert_eq!(LifecycleCommand::BasicHealth.to_string(), "basic_health");
    }

    #[test]
    fn test_join_jitter_bounds() {
        assert_eq!(join_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(join_jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let (mut a, a_log) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());
        let outcome = a.pre_start().await.unwrap();
        assert_eq!(outcome, HookOutcome::success(SeedState::SeedClaimed));
        assert_eq!(seed_record(&store).await.as_deref(), Some("10.0.0.1"));
        {
            let log = a_log.lock().unwrap();
            assert_eq!(log.seeds, Some(SeedList::Own));
            assert_eq!(log.listen_address.as_deref(), Some("10.0.0.1"));
        }

        let (mut b, b_log) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 2), dir.path());
        let outcome = b.pre_start().await.unwrap();
        assert_eq!(outcome, HookOutcome::success(SeedState::Joining));
        assert_eq!(seed_record(&store).await.as_deref(), Some("10.0.0.1"));
        {
            let log = b_log.lock().unwrap();
            assert_eq!(log.seeds, Some(SeedList::Join(vec!["10.0.0.1".to_string()])));
            assert_eq!(log.listen_address.as_deref(), Some("10.0.0.2"));
        }

        let outcome = a.pre_stop().await.unwrap();
        assert_eq!(outcome, HookOutcome::success(SeedState::Gone));
        assert_eq!(seed_record(&store).await, None);
        assert_eq!(store.lock_holder("cluster_seeds_lock").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_winner() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 1..=16u8 {
            let (mut n, log) = node(store.clone(), Ipv4Addr::new(10, 0, 1, i), dir.path());
            handles.push(tokio::spawn(async move {
                let outcome = n.pre_start().await.unwrap();
                let seeds = log.lock().unwrap().seeds.clone();
                (n.identity().address_string(), outcome, seeds)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let winners: Vec<_> = results
            .iter()
            .filter(|(_, outcome, _)| outcome.state == SeedState::SeedClaimed)
            .collect();
        assert_eq!(winners.len(), 1);

        let winner = winners[0].0.clone();
        assert_eq!(seed_record(&store).await, Some(winner.clone()));

        for (address, outcome, seeds) in &results {
            assert!(outcome.is_success());
            if *address == winner {
                assert_eq!(*seeds, Some(SeedList::Own));
            } else {
                assert_eq!(outcome.state, SeedState::Joining);
                assert_eq!(*seeds, Some(SeedList::Join(vec![winner.clone()])));
            }
        }
    }

    #[tokio::test]
    async fn test_seed_restart_keeps_role() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let (mut a, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());
        a.pre_start().await.unwrap();

        let (mut a_again, log) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());
        let outcome = a_again.pre_start().await.unwrap();
        assert_eq!(outcome.state, SeedState::SeedClaimed);
        assert_eq!(log.lock().unwrap().seeds, Some(SeedList::Own));
    }

    #[tokio::test]
    async fn test_reelection_after_seed_leaves() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let (mut a, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());
        a.pre_start().await.unwrap();
        a.pre_stop().await.unwrap();

        let (mut c, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 3), dir.path());
        let outcome = c.pre_start().await.unwrap();
        assert_eq!(outcome.state, SeedState::SeedClaimed);
        assert_eq!(seed_record(&store).await.as_deref(), Some("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_idempotent_stop() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let (mut a, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());
        a.pre_start().await.unwrap();

        assert!(a.pre_stop().await.unwrap().is_success());
        let after_once = store.keys().await;
        assert!(a.pre_stop().await.unwrap().is_success());

        assert_eq!(store.keys().await, after_once);
        assert_eq!(seed_record(&store).await, None);
    }

    #[tokio::test]
    async fn test_stop_without_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (mut b, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 2), dir.path());

        let outcome = b.pre_stop().await.unwrap();
        assert_eq!(outcome, HookOutcome::success(SeedState::Gone));
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_self_healing_unreachable_seed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("cluster_seeds", b"10.0.0.1").await.unwrap();

        let (mut b, _) = node_with(store.clone(), Ipv4Addr::new(10, 0, 0, 2), dir.path(), &[]);
        assert!(b.pre_stop().await.unwrap().is_success());
        assert_eq!(seed_record(&store).await, None);
    }

    #[tokio::test]
    async fn test_reachable_seed_left_alone() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("cluster_seeds", b"10.0.0.1").await.unwrap();

        let (mut b, _) =
            node_with(store.clone(), Ipv4Addr::new(10, 0, 0, 2), dir.path(), &["10.0.0.1"]);
        assert!(b.pre_stop().await.unwrap().is_success());
        assert_eq!(seed_record(&store).await.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_health_scenario() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (a, log) = node(store, Ipv4Addr::new(10, 0, 0, 1), dir.path());

        log.lock().unwrap().status = Some("UN".into());
        assert_eq!(a.health().await.exit_code, EXIT_OK);

        for status in [None, Some("DN"), Some("UJ"), Some("UL")] {
            log.lock().unwrap().status = status.map(String::from);
            assert_eq!(a.health().await.exit_code, EXIT_FAILURE);
        }

        {
            let mut log = log.lock().unwrap();
            log.status = Some("UN".into());
            log.fail_status = true;
        }
        assert_eq!(a.health().await.exit_code, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_basic_health_is_health() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (mut a, log) = node(store, Ipv4Addr::new(10, 0, 0, 1), dir.path());
        log.lock().unwrap().status = Some("UN".into());

        let health = a.run(LifecycleCommand::Health).await.unwrap();
        let basic = a.run(LifecycleCommand::BasicHealth).await.unwrap();
        assert_eq!(health, basic);
        assert!(basic.is_success());
    }

    #[tokio::test]
    async fn test_renew_session_hook() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (mut a, _) = node(store.clone(), Ipv4Addr::new(10, 0, 0, 1), dir.path());

        // Nothing cached yet
        assert!(a.run(LifecycleCommand::RenewSession).await.unwrap().is_success());

        a.pre_start().await.unwrap();
        assert!(a.run(LifecycleCommand::RenewSession).await.unwrap().is_success());

        let cache = dir.path().join("session-10.0.0.1");
        let session = std::fs::read_to_string(&cache).unwrap();
        store.expire_session(&session).await;

        let outcome = a.run(LifecycleCommand::RenewSession).await.unwrap();
        assert_eq!(outcome.exit_code, EXIT_FAILURE);
        assert!(!cache.exists());
    }
}
