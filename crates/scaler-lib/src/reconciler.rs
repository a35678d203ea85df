//! Reconciliation loop
//!
//! The control process of the scaler: a warm-up phase that primes the
//! forecast oracle with historical data, then a steady-state phase that
//! runs one gather -> forecast -> decide -> actuate cycle per interval.
//! Any error aborts only the cycle it happened in; the loop itself runs
//! until shutdown.

use crate::actuator::PoolActuator;
use crate::aggregate::{aggregate_capacity, aggregate_usage};
use crate::cluster::{NodeInventory, UsageSource};
use crate::delta::{compute_node_deltas, DimensionDelta, NodeDeltas};
use crate::error::ScalerError;
use crate::forecast::{find_dataset, ForecastOracle};
use crate::health::{components, HealthRegistry};
use crate::models::{
    ForecastRequest, ForecastResult, NodeShape, NodeSnapshot, ResourceAggregate, ResourceKind,
    ScalingDecision, MIB,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::policy;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between steady-state cycles (default: 30 seconds)
    pub cycle_interval: Duration,
    /// Pause after issuing a pool-size change (default: 30 seconds)
    pub settle_delay: Duration,
    /// Retry delay while the oracle is not ready (default: 5 seconds)
    pub warmup_retry_delay: Duration,
    /// How far ahead demand is predicted (default: 20 minutes)
    pub forecast_horizon: chrono::Duration,
    /// Directory the data generator drops historical datasets into
    pub data_dir: PathBuf,
    /// Reference footprint of one compute node
    pub node_shape: NodeShape,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(30),
            warmup_retry_delay: Duration::from_secs(5),
            forecast_horizon: chrono::Duration::minutes(20),
            data_dir: PathBuf::from("data"),
            node_shape: NodeShape {
                cpu_millis: 4000,
                memory_bytes: 16 * 1024 * MIB,
            },
        }
    }
}

/// Outcome of one steady-state cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    pub decision: ScalingDecision,
    /// Whether a replica update was issued this cycle
    pub actuated: bool,
}

/// The reconciliation loop and its collaborators
pub struct Reconciler {
    inventory: Arc<dyn NodeInventory>,
    usage: Arc<dyn UsageSource>,
    oracle: Arc<dyn ForecastOracle>,
    actuator: Arc<dyn PoolActuator>,
    config: ReconcilerConfig,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inventory: Arc<dyn NodeInventory>,
        usage: Arc<dyn UsageSource>,
        oracle: Arc<dyn ForecastOracle>,
        actuator: Arc<dyn PoolActuator>,
        config: ReconcilerConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            inventory,
            usage,
            oracle,
            actuator,
            config,
            health,
            metrics: ScalerMetrics::new(),
            logger,
        }
    }

    /// Run until shutdown: warm-up once, then steady-state cycles forever.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.warm_up(&mut shutdown).await {
            return;
        }
        self.health.set_ready(true).await;

        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            "Starting reconciliation loop"
        );

        loop {
            match self.run_cycle().await {
                Ok(outcome) => {
                    self.metrics.inc_cycles();
                    if outcome.actuated {
                        // Let the machine API settle before the next tally.
                        if !self.pause(self.config.settle_delay, &mut shutdown).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.metrics.inc_cycle_errors();
                    error!(error = %e, "Reconciliation cycle failed");
                }
            }

            if !self.pause(self.config.cycle_interval, &mut shutdown).await {
                break;
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Warm-up phase: prime the oracle, retrying with a fixed delay until
    /// the first success. Never re-entered afterwards. Returns false if
    /// shutdown arrived first.
    async fn warm_up(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        info!("Priming the forecast oracle with historical data");
        loop {
            match self.prime_oracle().await {
                Ok(dataset) => {
                    self.metrics.set_oracle_primed(true);
                    self.health.set_healthy(components::FORECAST).await;
                    self.logger.log_oracle_primed(&dataset);
                    return true;
                }
                Err(e) => {
                    info!(error = %e, "Waiting for the forecast oracle to be ready");
                }
            }

            if !self.pause(self.config.warmup_retry_delay, shutdown).await {
                return false;
            }
        }
    }

    async fn prime_oracle(&self) -> Result<String, ScalerError> {
        let dataset = find_dataset(&self.config.data_dir)?;
        self.oracle.fit(&dataset).await?;
        Ok(dataset.display().to_string())
    }

    /// Sleep that aborts early on shutdown; returns false when shutting
    /// down.
    async fn pause(&self, duration: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = shutdown.recv() => false,
        }
    }

    /// One full gather -> aggregate -> forecast -> decide -> actuate cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ScalerError> {
        let nodes = self.gather_snapshots().await?;
        let compute_nodes = nodes.iter().filter(|n| n.is_compute()).count() as i32;
        let not_ready = nodes
            .iter()
            .filter(|n| n.is_compute() && !n.ready)
            .count();
        info!(
            nodes = nodes.len(),
            compute = compute_nodes,
            not_ready,
            "Tallied cluster nodes"
        );
        if not_ready > 0 {
            // NotReady nodes still count toward capacity; a freshly created
            // machine shows up here before it can take load.
            warn!(not_ready, "Some compute nodes are not ready");
        }

        let capacity = aggregate_capacity(&nodes);
        let usage = aggregate_usage(&nodes);
        self.log_capacity(&capacity);

        let forecast = self.query_forecast(&capacity).await?;
        let deltas = compute_node_deltas(&capacity, &forecast, &self.config.node_shape);
        self.log_deltas(&deltas);

        let decision = policy::decide(compute_nodes, &deltas, &usage, &forecast);
        self.metrics
            .set_node_counts(decision.current_nodes, decision.desired_nodes);
        if decision.scale_down_suppressed {
            self.metrics.inc_suppressed_scale_downs();
            self.logger.log_suppressed_scale_down(&decision, &forecast);
        }

        let actuated = self.apply(&decision).await?;
        Ok(CycleOutcome { decision, actuated })
    }

    /// Fetch fresh node snapshots and join per-node usage onto them.
    async fn gather_snapshots(&self) -> Result<Vec<NodeSnapshot>, ScalerError> {
        let mut nodes = self
            .check(components::INVENTORY, self.inventory.list_nodes().await)
            .await?;
        let usage = self
            .check(components::USAGE, self.usage.node_usage().await)
            .await?;

        for node in &mut nodes {
            if let Some(quantities) = usage.get(&node.name) {
                node.usage = quantities.clone();
            }
        }
        Ok(nodes)
    }

    async fn query_forecast(
        &self,
        capacity: &ResourceAggregate,
    ) -> Result<ForecastResult, ScalerError> {
        let request = ForecastRequest {
            at: Utc::now() + self.config.forecast_horizon,
            current_cpu_millis: capacity.cpu_millis().unwrap_or(0),
            current_memory_mib: capacity.memory_mib().unwrap_or(0),
        };

        let start = Instant::now();
        let forecast = self
            .check(components::FORECAST, self.oracle.predict(&request).await)
            .await?;
        self.metrics
            .observe_forecast_latency(start.elapsed().as_secs_f64());

        info!(
            cpu_millis = forecast.cpu_millis,
            memory_mib = forecast.memory_mib,
            "Received demand forecast"
        );
        if let (Some(cpu), Some(memory)) = (capacity.cpu_millis(), capacity.memory_mib()) {
            if cpu > 0 && memory > 0 {
                debug!(
                    cpu_pct = 100 * forecast.cpu_millis / cpu,
                    memory_pct = 100 * forecast.memory_mib / memory,
                    "Forecast relative to current capacity"
                );
            }
        }
        Ok(forecast)
    }

    /// Issue the replica update when the desired count differs from what
    /// the actuator reports. The pool's replica count is re-read every
    /// cycle; the machine API owns it.
    async fn apply(&self, decision: &ScalingDecision) -> Result<bool, ScalerError> {
        let reported = self
            .check(components::ACTUATOR, self.actuator.current_replicas().await)
            .await?;

        if decision.desired_nodes == reported {
            info!(replicas = reported, "Pool already at desired size");
            return Ok(false);
        }

        self.logger.log_scaling(decision, reported);
        self.check(
            components::ACTUATOR,
            self.actuator.scale_to(decision.desired_nodes).await,
        )
        .await?;
        self.metrics.inc_actuations();
        Ok(true)
    }

    /// Record a collaborator call's outcome in the health registry
    async fn check<T>(
        &self,
        component: &str,
        result: Result<T, ScalerError>,
    ) -> Result<T, ScalerError> {
        match &result {
            Ok(_) => self.health.set_healthy(component).await,
            Err(e) => self.health.set_unhealthy(component, e.to_string()).await,
        }
        result
    }

    fn log_capacity(&self, capacity: &ResourceAggregate) {
        for kind in [ResourceKind::Cpu, ResourceKind::Memory] {
            match capacity.get(kind) {
                Some(value) => info!(resource = %kind, value, "Compute capacity total"),
                None => {
                    error!(error = %ScalerError::IncompleteData(kind), "Capacity dimension missing")
                }
            }
        }
    }

    fn log_deltas(&self, deltas: &NodeDeltas) {
        self.log_dimension(ResourceKind::Cpu, deltas.cpu);
        self.log_dimension(ResourceKind::Memory, deltas.memory);
    }

    fn log_dimension(&self, kind: ResourceKind, delta: DimensionDelta) {
        match delta {
            DimensionDelta::Nodes(nodes) => {
                info!(resource = %kind, nodes, "Node delta for dimension")
            }
            DimensionDelta::MissingCapacity => {
                warn!(
                    error = %ScalerError::IncompleteData(kind),
                    "Excluding dimension from the decision"
                )
            }
            DimensionDelta::InvalidShape => {
                error!(
                    error = %ScalerError::Configuration(kind),
                    "Node shape is misconfigured, excluding dimension"
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeRole, ResourceQuantities};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticInventory {
        nodes: Vec<NodeSnapshot>,
    }

    #[async_trait]
    impl NodeInventory for StaticInventory {
        async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ScalerError> {
            Ok(self.nodes.clone())
        }
    }

    struct FailingInventory;

    #[async_trait]
    impl NodeInventory for FailingInventory {
        async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ScalerError> {
            Err(ScalerError::transient("inventory", "connection refused"))
        }
    }

    struct StaticUsage {
        usage: HashMap<String, ResourceQuantities>,
    }

    #[async_trait]
    impl UsageSource for StaticUsage {
        async fn node_usage(&self) -> Result<HashMap<String, ResourceQuantities>, ScalerError> {
            Ok(self.usage.clone())
        }
    }

    struct MockOracle {
        fit_failures_left: AtomicUsize,
        fit_calls: AtomicUsize,
        predict_calls: AtomicUsize,
        forecast: ForecastResult,
    }

    impl MockOracle {
        fn new(fit_failures: usize, forecast: ForecastResult) -> Self {
            Self {
                fit_failures_left: AtomicUsize::new(fit_failures),
                fit_calls: AtomicUsize::new(0),
                predict_calls: AtomicUsize::new(0),
                forecast,
            }
        }
    }

    #[async_trait]
    impl ForecastOracle for MockOracle {
        async fn fit(&self, _dataset: &std::path::Path) -> Result<(), ScalerError> {
            self.fit_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fit_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(ScalerError::WarmUpNotReady("model server booting".into()));
            }
            Ok(())
        }

        async fn predict(
            &self,
            _request: &ForecastRequest,
        ) -> Result<ForecastResult, ScalerError> {
            self.predict_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.forecast)
        }
    }

    struct MockActuator {
        replicas: AtomicI32,
        scaled_to: Mutex<Vec<i32>>,
    }

    impl MockActuator {
        fn new(replicas: i32) -> Self {
            Self {
                replicas: AtomicI32::new(replicas),
                scaled_to: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PoolActuator for MockActuator {
        async fn current_replicas(&self) -> Result<i32, ScalerError> {
            Ok(self.replicas.load(Ordering::SeqCst))
        }

        async fn scale_to(&self, replicas: i32) -> Result<(), ScalerError> {
            self.scaled_to.lock().unwrap().push(replicas);
            self.replicas.store(replicas, Ordering::SeqCst);
            Ok(())
        }
    }

    fn worker(name: &str, usage_cpu: i64, usage_memory_mib: i64) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            role: NodeRole::Compute,
            ready: true,
            capacity: ResourceQuantities::new()
                .with_cpu_millis(4000)
                .with_memory_bytes(16384 * MIB),
            usage: ResourceQuantities::new()
                .with_cpu_millis(usage_cpu)
                .with_memory_bytes(usage_memory_mib * MIB),
        }
    }

    fn fast_config(data_dir: &std::path::Path) -> ReconcilerConfig {
        ReconcilerConfig {
            cycle_interval: Duration::from_millis(10),
            settle_delay: Duration::from_millis(1),
            warmup_retry_delay: Duration::from_millis(10),
            data_dir: data_dir.to_path_buf(),
            ..ReconcilerConfig::default()
        }
    }

    fn reconciler(
        nodes: Vec<NodeSnapshot>,
        oracle: Arc<MockOracle>,
        actuator: Arc<MockActuator>,
        config: ReconcilerConfig,
    ) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            Arc::new(StaticInventory { nodes }),
            Arc::new(StaticUsage {
                usage: HashMap::new(),
            }),
            oracle,
            actuator,
            config,
            HealthRegistry::new(),
            StructuredLogger::new("test-pool"),
        ))
    }

    fn dataset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("resource-2024-03-01.csv"), "t,cpu,mem\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_end_to_end_scale_up_cycle() {
        // 3 workers at 4000m/16384Mi, forecast one node's worth above
        // capacity on both dimensions.
        let nodes = vec![
            worker("w0", 500, 1024),
            worker("w1", 500, 1024),
            worker("w2", 500, 1024),
        ];
        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 16000,
                memory_mib: 65536,
            },
        ));
        let actuator = Arc::new(MockActuator::new(3));
        let dir = dataset_dir();
        let rec = reconciler(nodes, oracle, actuator.clone(), fast_config(dir.path()));

        let outcome = rec.run_cycle().await.unwrap();

        assert_eq!(outcome.decision.current_nodes, 3);
        assert_eq!(outcome.decision.desired_nodes, 4);
        assert!(!outcome.decision.scale_down_suppressed);
        assert!(outcome.actuated);
        assert_eq!(*actuator.scaled_to.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_no_actuation_when_pool_already_sized() {
        // Forecast equals capacity: zero delta on both dimensions.
        let nodes = vec![worker("w0", 500, 1024), worker("w1", 500, 1024)];
        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 8000,
                memory_mib: 32768,
            },
        ));
        let actuator = Arc::new(MockActuator::new(2));
        let dir = dataset_dir();
        let rec = reconciler(nodes, oracle, actuator.clone(), fast_config(dir.path()));

        let outcome = rec.run_cycle().await.unwrap();

        assert_eq!(outcome.decision.desired_nodes, 2);
        assert!(!outcome.actuated);
        assert!(actuator.scaled_to.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guard_suppresses_scale_down_in_cycle() {
        // Forecast justifies dropping a node, but CPU burn is above it.
        let nodes = vec![
            worker("w0", 5000, 1024),
            worker("w1", 5000, 1024),
            worker("w2", 5000, 1024),
        ];
        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 8000,
                memory_mib: 32768,
            },
        ));
        let actuator = Arc::new(MockActuator::new(3));
        let dir = dataset_dir();
        let rec = reconciler(nodes, oracle, actuator.clone(), fast_config(dir.path()));

        let outcome = rec.run_cycle().await.unwrap();

        assert!(outcome.decision.scale_down_suppressed);
        assert_eq!(outcome.decision.desired_nodes, 3);
        assert!(!outcome.actuated);
        assert!(actuator.scaled_to.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_error_aborts_only_that_cycle() {
        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 1,
                memory_mib: 1,
            },
        ));
        let actuator = Arc::new(MockActuator::new(0));
        let dir = dataset_dir();
        let rec = Arc::new(Reconciler::new(
            Arc::new(FailingInventory),
            Arc::new(StaticUsage {
                usage: HashMap::new(),
            }),
            oracle.clone(),
            actuator.clone(),
            fast_config(dir.path()),
            HealthRegistry::new(),
            StructuredLogger::new("test-pool"),
        ));

        let err = rec.run_cycle().await.unwrap_err();
        assert!(matches!(err, ScalerError::Transient { .. }));
        // Nothing downstream of the failure ran.
        assert_eq!(oracle.predict_calls.load(Ordering::SeqCst), 0);
        assert!(actuator.scaled_to.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_warm_up_retries_until_first_success() {
        let oracle = Arc::new(MockOracle::new(
            2,
            ForecastResult {
                cpu_millis: 1,
                memory_mib: 1,
            },
        ));
        let actuator = Arc::new(MockActuator::new(0));
        let dir = dataset_dir();
        let rec = reconciler(vec![], oracle.clone(), actuator, fast_config(dir.path()));

        let (_tx, mut rx) = broadcast::channel(1);
        let primed = rec.warm_up(&mut rx).await;

        assert!(primed);
        assert_eq!(oracle.fit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_warm_up_aborts_on_shutdown() {
        let oracle = Arc::new(MockOracle::new(
            usize::MAX,
            ForecastResult {
                cpu_millis: 1,
                memory_mib: 1,
            },
        ));
        let actuator = Arc::new(MockActuator::new(0));
        let dir = dataset_dir();
        let mut config = fast_config(dir.path());
        config.warmup_retry_delay = Duration::from_secs(30);
        let rec = reconciler(vec![], oracle.clone(), actuator, config);

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        let mut rx = rx;
        let primed = rec.warm_up(&mut rx).await;

        assert!(!primed);
        assert_eq!(oracle.fit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loop_never_re_enters_warm_up() {
        let nodes = vec![worker("w0", 500, 1024)];
        let oracle = Arc::new(MockOracle::new(
            1,
            ForecastResult {
                cpu_millis: 4000,
                memory_mib: 16384,
            },
        ));
        let actuator = Arc::new(MockActuator::new(1));
        let dir = dataset_dir();
        let rec = reconciler(nodes, oracle.clone(), actuator, fast_config(dir.path()));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(rec.run(rx));
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // One failed fit, one successful fit, then only predictions.
        assert_eq!(oracle.fit_calls.load(Ordering::SeqCst), 2);
        assert!(oracle.predict_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_collaborator_is_marked_unhealthy() {
        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 1,
                memory_mib: 1,
            },
        ));
        let health = HealthRegistry::new();
        let dir = dataset_dir();
        let rec = Arc::new(Reconciler::new(
            Arc::new(FailingInventory),
            Arc::new(StaticUsage {
                usage: HashMap::new(),
            }),
            oracle,
            Arc::new(MockActuator::new(0)),
            fast_config(dir.path()),
            health.clone(),
            StructuredLogger::new("test-pool"),
        ));

        let _ = rec.run_cycle().await;

        let snapshot = health.health().await;
        assert_eq!(
            snapshot.components[components::INVENTORY].status,
            crate::health::ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_usage_is_joined_onto_snapshots_by_name() {
        // Usage arrives keyed by node name from a separate collaborator;
        // only matching names contribute to the usage aggregate.
        let mut usage = HashMap::new();
        usage.insert(
            "w0".to_string(),
            ResourceQuantities::new().with_cpu_millis(999),
        );
        usage.insert(
            "unknown-node".to_string(),
            ResourceQuantities::new().with_cpu_millis(5000),
        );

        let oracle = Arc::new(MockOracle::new(
            0,
            ForecastResult {
                cpu_millis: 4000,
                memory_mib: 16384,
            },
        ));
        let dir = dataset_dir();
        let rec = Arc::new(Reconciler::new(
            Arc::new(StaticInventory {
                nodes: vec![worker("w0", 0, 0)],
            }),
            Arc::new(StaticUsage { usage }),
            oracle,
            Arc::new(MockActuator::new(1)),
            fast_config(dir.path()),
            HealthRegistry::new(),
            StructuredLogger::new("test-pool"),
        ));

        let gathered = rec.gather_snapshots().await.unwrap();
        assert_eq!(gathered[0].usage.get(ResourceKind::Cpu), Some(999));
    }
}
