//! Campaign integration tests.
//!
//! Full rollouts against the in-memory control plane and release manager:
//! happy path, fail-fast, rollback, resume after interruption, guards and
//! cancellation. Time-bounded paths run with a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use noderoll_cluster::{AnnotationPatch, ClusterOp, ControlPlane, MemoryCluster, WorkloadStatus};
use noderoll_core::{Campaign, ConfigError, LabelSelector, Phase, Version};
use noderoll_release::{MemoryReleases, ReleaseManager, ReleaseOp};
use noderoll_rollout::{FleetSequencer, NodeOutcome, NodeUpgrade, PlannedAction, RolloutError};
use noderoll_state::StatusStore;
use noderoll_verify::{Outcome, VerificationRunner};

const RELEASE: &str = "calico";
const NAMESPACE: &str = "tigera-operator";
const PREFIX: &str = "noderoll.io";

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

struct Fleet {
    cluster: MemoryCluster,
    releases: MemoryReleases,
}

impl Fleet {
    /// Workers labelled `role=worker`, all running 3.26.4.
    fn new(hosts: &[&str]) -> Self {
        let cluster = MemoryCluster::new();
        let releases = MemoryReleases::new();
        releases.install(RELEASE, NAMESPACE, v("3.26.4"));
        for host in hosts {
            cluster.add_node(host, &[("role", "worker")]);
            releases.add_instance(host, v("3.26.4"));
        }
        Self { cluster, releases }
    }

    fn machine(&self) -> NodeUpgrade {
        let cluster: Arc<dyn ControlPlane> = Arc::new(self.cluster.clone());
        let store = StatusStore::new(cluster.clone(), PREFIX);
        let verifier = VerificationRunner::new(cluster.clone(), Duration::from_secs(60))
            .with_poll_interval(Duration::from_secs(1));
        NodeUpgrade::new(
            cluster,
            Arc::new(self.releases.clone()),
            store,
            verifier,
            Duration::from_secs(30),
        )
    }

    fn sequencer(&self) -> FleetSequencer {
        FleetSequencer::new(self.machine(), v("3.20.0"))
    }

    fn annotation(&self, host: &str, key: &str) -> Option<String> {
        self.cluster
            .node(host)
            .and_then(|n| n.annotations.get(&format!("{PREFIX}/{key}")).cloned())
    }

    fn phase(&self, host: &str) -> Option<String> {
        self.annotation(host, "phase")
    }

    fn cordoned(&self, host: &str) -> bool {
        self.cluster.node(host).is_some_and(|n| n.unschedulable)
    }

    fn fail_verification(&self, host: &str, exit_code: i32) {
        self.cluster.script_workload(
            &format!("node: {host}\n"),
            WorkloadStatus::Failed {
                exit_code: Some(exit_code),
                reason: Some("Error".into()),
            },
        );
    }

    /// Leave `host` as a run killed in `phase` for 3.27.0 would.
    async fn interrupt_at(&self, host: &str, phase: &str, revert_release: bool) {
        let mut patch = AnnotationPatch::new();
        patch.insert(format!("{PREFIX}/phase"), Some(phase.into()));
        patch.insert(format!("{PREFIX}/target-version"), Some("3.27.0".into()));
        patch.insert(format!("{PREFIX}/current-version"), Some("3.26.4".into()));
        patch.insert(
            format!("{PREFIX}/revert-release"),
            Some(revert_release.to_string()),
        );
        self.cluster.annotate(host, &patch).await.unwrap();
        self.cluster.cordon(host).await.unwrap();
    }

    /// The release upgrade and this node's restart both went through.
    async fn upgraded_before_crash(&self, host: &str) {
        self.releases
            .upgrade(RELEASE, NAMESPACE, &v("3.27.0"))
            .await
            .unwrap();
        self.releases
            .restart_instance(RELEASE, NAMESPACE, host)
            .await
            .unwrap();
    }

    fn cordons(&self) -> usize {
        self.cluster
            .journal()
            .iter()
            .filter(|op| matches!(op, ClusterOp::Cordon(_)))
            .count()
    }

    fn rollbacks(&self) -> usize {
        self.releases
            .journal()
            .iter()
            .filter(|op| **op == ReleaseOp::Rollback)
            .count()
    }

    fn restarts(&self, host: &str) -> usize {
        self.releases
            .journal()
            .iter()
            .filter(|op| **op == ReleaseOp::Restart(host.to_string()))
            .count()
    }
}

fn campaign(target: &str) -> Campaign {
    Campaign {
        target_version: v(target),
        release_name: RELEASE.into(),
        release_namespace: NAMESPACE.into(),
        node_selector: "role=worker".into(),
        taint_key: None,
        taint_value: None,
        drain_enabled: false,
        drain_timeout: Duration::from_secs(120),
        verification_template: "name: check-{{CHECK_ID}}\nnode: {{NODE_NAME}}\n".into(),
        verification_namespace: "default".into(),
    }
}

// ── Happy path ─────────────────────────────────────────────────

#[tokio::test]
async fn two_nodes_complete_on_target() {
    let fleet = Fleet::new(&["w1", "w2"]);
    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.nodes_completed, vec!["w1", "w2"]);
    for host in ["w1", "w2"] {
        assert_eq!(fleet.phase(host).as_deref(), Some("completed"));
        assert_eq!(fleet.annotation(host, "current-version").as_deref(), Some("3.27.0"));
        assert_eq!(fleet.releases.instance_version(host), Some(v("3.27.0")));
        assert!(!fleet.cordoned(host));
    }

    // The second node's upgrade is a no-op on the release.
    let info = fleet.releases.deployed(RELEASE, NAMESPACE).await.unwrap();
    assert_eq!(info.revision, 2);
    assert!(fleet.cluster.live_workloads().is_empty());
}

#[tokio::test]
async fn empty_selection_is_a_no_op() {
    let fleet = Fleet::new(&["w1"]);
    let mut c = campaign("3.27.0");
    c.node_selector = "role=gpu".into();

    let report = fleet.sequencer().run(&c).await.unwrap();
    assert_eq!(report.nodes_total, 0);
    assert!(report.succeeded());
    assert!(fleet.cluster.journal().is_empty());
}

#[tokio::test]
async fn node_already_on_target_is_not_restarted() {
    let fleet = Fleet::new(&["w1"]);
    fleet.releases.add_instance("w1", v("3.27.0"));

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.restarts("w1"), 0);
    assert_eq!(fleet.releases.upgrade_count(), 0);
    assert_eq!(fleet.phase("w1").as_deref(), Some("completed"));
}

#[tokio::test]
async fn drain_evicts_before_upgrade() {
    let fleet = Fleet::new(&["w1"]);
    fleet.cluster.set_pods("w1", 3);
    let mut c = campaign("3.27.0");
    c.drain_enabled = true;

    let report = fleet.sequencer().run(&c).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.cluster.node("w1").unwrap().pods, 0);
    assert!(fleet.cluster.journal().contains(&ClusterOp::Evict("w1".into())));
}

// ── Failure and rollback ───────────────────────────────────────

#[tokio::test]
async fn failed_verification_rolls_back_and_stops() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.fail_verification("w1", 1);

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.aborted);
    assert!(report.nodes_completed.is_empty());
    let failure = report.first_failed_node.unwrap();
    assert_eq!(failure.hostname, "w1");
    let run = failure.verification.unwrap();
    assert_eq!(run.outcome, Outcome::Failed);
    assert_eq!(run.exit_code, Some(1));

    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.annotation("w1", "current-version").as_deref(), Some("3.26.4"));
    assert_eq!(fleet.releases.instance_version("w1"), Some(v("3.26.4")));
    assert_eq!(fleet.releases.desired_version(RELEASE, NAMESPACE), Some(v("3.26.4")));
    assert!(!fleet.cordoned("w1"));

    // w2 is never touched.
    assert_eq!(fleet.cluster.cordon_order(), vec!["w1"]);
    assert!(fleet.cluster.node("w2").unwrap().annotations.is_empty());
    assert!(fleet.cluster.live_workloads().is_empty());
}

#[tokio::test]
async fn fail_fast_keeps_earlier_nodes_upgraded() {
    let fleet = Fleet::new(&["a", "b", "c"]);
    fleet.fail_verification("b", 2);

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert_eq!(report.nodes_completed, vec!["a"]);
    assert_eq!(report.first_failed_node.unwrap().hostname, "b");
    assert_eq!(fleet.phase("a").as_deref(), Some("completed"));
    assert_eq!(fleet.phase("b").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.phase("c"), None);

    // No cluster-wide rollback: a keeps the new version.
    assert_eq!(fleet.releases.instance_version("a"), Some(v("3.27.0")));
    assert_eq!(fleet.releases.instance_version("b"), Some(v("3.26.4")));
    assert_eq!(fleet.releases.instance_version("c"), Some(v("3.26.4")));

    // Cordoned nodes form a prefix of the ordered list.
    assert_eq!(fleet.cluster.cordon_order(), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn verification_timeout_rolls_back() {
    let fleet = Fleet::new(&["w1"]);
    fleet
        .cluster
        .script_workload("node: w1\n", WorkloadStatus::Running);

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    let failure = report.first_failed_node.unwrap();
    assert_eq!(failure.verification.unwrap().outcome, Outcome::TimedOut);
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert!(fleet.cluster.live_workloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_timeout_rolls_back_without_touching_release() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.cluster.block_drain("w1");
    let mut c = campaign("3.27.0");
    c.drain_enabled = true;

    let report = fleet.sequencer().run(&c).await.unwrap();

    assert!(report.aborted);
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert!(!fleet.cordoned("w1"));
    assert!(fleet.releases.journal().is_empty());
    assert_eq!(fleet.phase("w2"), None);
}

#[tokio::test]
async fn cordon_failure_aborts_without_rollback() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.cluster.fail_cordon("w1");

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.aborted);
    let failure = report.first_failed_node.unwrap();
    assert_eq!(failure.hostname, "w1");
    assert_eq!(failure.phase, Some(Phase::Cordoned));
    assert!(!fleet.cordoned("w1"));
    assert!(fleet.releases.journal().is_empty());
    assert_eq!(fleet.phase("w2"), None);
}

#[tokio::test(start_paused = true)]
async fn failed_rollback_leaves_node_cordoned() {
    let fleet = Fleet::new(&["w1"]);
    fleet.releases.never_ready("w1");

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let failure = report.first_failed_node.unwrap();
    assert!(failure.error.contains("rollback"));
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolling-back"));
    assert_eq!(fleet.annotation("w1", "revert-release").as_deref(), Some("true"));
    assert!(fleet.cordoned("w1"));
}

#[tokio::test]
async fn instance_missing_target_version_rolls_back() {
    let fleet = Fleet::new(&["w1", "w2"]);
    // The chart change never reaches the image on w1.
    fleet.releases.pin_version("w1", v("3.26.4"));

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.aborted);
    let failure = report.first_failed_node.unwrap();
    assert_eq!(failure.hostname, "w1");
    assert!(failure.error.contains("expected 3.27.0"), "{}", failure.error);
    assert!(failure.verification.is_none());
    assert!(fleet.cluster.created_specs().is_empty());

    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.annotation("w1", "current-version").as_deref(), Some("3.26.4"));
    assert_eq!(fleet.releases.desired_version(RELEASE, NAMESPACE), Some(v("3.26.4")));
    assert_eq!(fleet.restarts("w1"), 1);
    assert!(!fleet.cordoned("w1"));
    assert_eq!(fleet.phase("w2"), None);
}

#[tokio::test]
async fn rollback_missing_previous_version_stays_cordoned() {
    let fleet = Fleet::new(&["w1"]);
    fleet.fail_verification("w1", 1);
    // Restarts on w1 keep the new image even after the release is reverted.
    fleet.releases.pin_version("w1", v("3.27.0"));

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let failure = report.first_failed_node.unwrap();
    assert!(failure.error.contains("rollback"));
    assert!(failure.error.contains("expected 3.26.4"), "{}", failure.error);
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolling-back"));
    assert!(fleet.cordoned("w1"));
    assert_eq!(fleet.restarts("w1"), 2);
}

// ── Guards ─────────────────────────────────────────────────────

#[tokio::test]
async fn below_minimum_touches_nothing() {
    let fleet = Fleet::new(&["w1", "w2"]);
    let err = fleet.sequencer().run(&campaign("3.19.0")).await.unwrap_err();

    assert!(matches!(
        err,
        RolloutError::Config(ConfigError::VersionBelowMinimum { .. })
    ));
    assert!(fleet.cluster.journal().is_empty());
    for host in ["w1", "w2"] {
        assert_eq!(fleet.phase(host), None);
    }
}

#[tokio::test]
async fn no_selection_criteria_is_rejected() {
    let fleet = Fleet::new(&["w1"]);
    let mut c = campaign("3.27.0");
    c.node_selector = String::new();

    let err = fleet.sequencer().run(&c).await.unwrap_err();
    assert!(matches!(err, RolloutError::Config(ConfigError::NoSelectionCriteria)));
}

#[tokio::test]
async fn newer_node_is_refused_untouched() {
    let fleet = Fleet::new(&["w1"]);
    fleet.releases.add_instance("w1", v("3.28.0"));

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let failure = report.first_failed_node.unwrap();
    assert!(failure.error.contains("downgrades are refused"));
    assert_eq!(fleet.phase("w1"), None);
    assert!(fleet.cluster.journal().is_empty());
}

#[tokio::test]
async fn busy_release_is_loud() {
    let fleet = Fleet::new(&["w1"]);
    fleet
        .releases
        .set_pending(RELEASE, NAMESPACE, Some("pending-upgrade"));

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let failure = report.first_failed_node.unwrap();
    assert!(failure.error.contains("busy"));
    assert_eq!(fleet.phase("w1"), None);
    assert!(!fleet.cordoned("w1"));
    assert!(fleet.releases.journal().is_empty());
}

#[tokio::test]
async fn in_flight_node_outside_selection_blocks_campaign() {
    let fleet = Fleet::new(&["w1"]);
    fleet.cluster.add_node("db1", &[("role", "db")]);
    let mut patch = AnnotationPatch::new();
    patch.insert(format!("{PREFIX}/phase"), Some("upgrading".into()));
    patch.insert(format!("{PREFIX}/target-version"), Some("3.27.0".into()));
    fleet.cluster.annotate("db1", &patch).await.unwrap();

    let err = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap_err();
    assert!(matches!(err, RolloutError::Config(ConfigError::InFlight { .. })));
    assert!(!fleet.cordoned("w1"));
}

#[tokio::test]
async fn in_flight_node_for_other_target_blocks_campaign() {
    let fleet = Fleet::new(&["w1", "w2"]);
    let mut patch = AnnotationPatch::new();
    patch.insert(format!("{PREFIX}/phase"), Some("verifying".into()));
    patch.insert(format!("{PREFIX}/target-version"), Some("3.26.9".into()));
    fleet.cluster.annotate("w2", &patch).await.unwrap();

    let err = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap_err();
    assert!(matches!(err, RolloutError::Config(ConfigError::InFlight { .. })));
}

// ── Resumability ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn interrupted_run_resumes_from_persisted_phase() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet
        .cluster
        .script_workload("node: w1\n", WorkloadStatus::Running);

    // Kill the run while w1 is verifying.
    let sequencer = fleet.sequencer();
    let c = campaign("3.27.0");
    let interrupted =
        tokio::time::timeout(Duration::from_secs(20), sequencer.run(&c)).await;
    assert!(interrupted.is_err());
    assert_eq!(fleet.phase("w1").as_deref(), Some("verifying"));
    assert!(fleet.cordoned("w1"));

    let plan = fleet.sequencer().plan(&c).await.unwrap();
    assert_eq!(plan[0].node.hostname, "w1");
    assert_eq!(plan[0].action, PlannedAction::Resume(Phase::Verifying));
    assert_eq!(plan[1].action, PlannedAction::Start);

    fleet
        .cluster
        .script_workload("node: w1\n", WorkloadStatus::Succeeded);
    let report = fleet.sequencer().run(&c).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.nodes_completed, vec!["w1", "w2"]);
    // w1 was not upgraded or restarted a second time.
    assert_eq!(fleet.restarts("w1"), 1);
    assert_eq!(fleet.releases.upgrade_count(), 2);
}

#[tokio::test]
async fn resume_from_cordoned_upgrades_once() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.interrupt_at("w1", "cordoned", false).await;
    let c = campaign("3.27.0");

    let plan = fleet.sequencer().plan(&c).await.unwrap();
    assert_eq!(plan[0].action, PlannedAction::Resume(Phase::Cordoned));

    let report = fleet.sequencer().run(&c).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.phase("w1").as_deref(), Some("completed"));
    assert_eq!(fleet.releases.instance_version("w1"), Some(v("3.27.0")));
    assert_eq!(fleet.restarts("w1"), 1);
    // One upgrade call per node; the second creates no revision.
    assert_eq!(fleet.releases.upgrade_count(), 2);
    assert!(!fleet.cordoned("w1"));
}

#[tokio::test]
async fn resume_from_draining_finishes_drain() {
    let fleet = Fleet::new(&["w1"]);
    fleet.cluster.set_pods("w1", 2);
    fleet.interrupt_at("w1", "draining", false).await;
    let mut c = campaign("3.27.0");
    c.drain_enabled = true;

    let report = fleet.sequencer().run(&c).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.cluster.node("w1").unwrap().pods, 0);
    assert!(fleet.cluster.journal().contains(&ClusterOp::Evict("w1".into())));
    assert_eq!(fleet.restarts("w1"), 1);
    assert_eq!(fleet.releases.upgrade_count(), 1);
}

#[tokio::test]
async fn resume_from_upgrading_before_release_call() {
    let fleet = Fleet::new(&["w1"]);
    fleet.interrupt_at("w1", "upgrading", false).await;

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.releases.upgrade_count(), 1);
    assert_eq!(fleet.restarts("w1"), 1);
    assert_eq!(fleet.releases.instance_version("w1"), Some(v("3.27.0")));
}

#[tokio::test]
async fn resume_from_upgrading_after_restart_does_not_repeat_it() {
    let fleet = Fleet::new(&["w1"]);
    fleet.upgraded_before_crash("w1").await;
    fleet.interrupt_at("w1", "upgrading", false).await;

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.releases.upgrade_count(), 1);
    assert_eq!(fleet.restarts("w1"), 1);
    assert_eq!(fleet.phase("w1").as_deref(), Some("completed"));
}

#[tokio::test]
async fn resume_from_rolling_back_finishes_rollback() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.upgraded_before_crash("w1").await;
    fleet.interrupt_at("w1", "rolling-back", true).await;

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.aborted);
    let failure = report.first_failed_node.unwrap();
    assert_eq!(failure.hostname, "w1");
    assert!(failure.error.contains("interrupted rollback"));
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.releases.instance_version("w1"), Some(v("3.26.4")));
    assert_eq!(fleet.releases.desired_version(RELEASE, NAMESPACE), Some(v("3.26.4")));
    assert_eq!(fleet.rollbacks(), 1);
    assert_eq!(fleet.restarts("w1"), 2);
    assert!(!fleet.cordoned("w1"));
    assert_eq!(fleet.phase("w2"), None);
}

#[tokio::test]
async fn resume_from_rolling_back_leaves_untouched_release_alone() {
    let fleet = Fleet::new(&["w1"]);
    fleet.interrupt_at("w1", "rolling-back", false).await;

    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    assert!(report.aborted);
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert!(fleet.releases.journal().is_empty());
    assert!(!fleet.cordoned("w1"));
}

#[tokio::test]
async fn completed_nodes_are_skipped_on_rerun() {
    let fleet = Fleet::new(&["w1", "w2"]);
    let c = campaign("3.27.0");
    fleet.sequencer().run(&c).await.unwrap();
    let ops_before = fleet.cluster.journal().len();

    let report = fleet.sequencer().run(&c).await.unwrap();
    assert!(report.succeeded());
    assert!(report.nodes_completed.is_empty());
    assert_eq!(report.nodes_skipped, vec!["w1", "w2"]);
    assert_eq!(fleet.cluster.journal().len(), ops_before);
}

#[tokio::test]
async fn rolled_back_node_starts_fresh_in_next_campaign() {
    let fleet = Fleet::new(&["w1"]);
    fleet.fail_verification("w1", 1);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));

    fleet
        .cluster
        .script_workload("node: w1\n", WorkloadStatus::Succeeded);
    let report = fleet.sequencer().run(&campaign("3.27.1")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(fleet.annotation("w1", "current-version").as_deref(), Some("3.27.1"));
}

#[tokio::test]
async fn cancelled_campaign_stops_at_node_boundary() {
    let fleet = Fleet::new(&["w1", "w2"]);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = fleet
        .sequencer()
        .with_cancel(rx)
        .run(&campaign("3.27.0"))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.succeeded());
    assert!(fleet.cluster.cordon_order().is_empty());
}

// ── Operator surface ───────────────────────────────────────────

#[tokio::test]
async fn manual_rollback_reverts_one_node() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let outcome = fleet.machine().manual_rollback("w2", RELEASE, NAMESPACE).await;

    assert!(matches!(outcome, NodeOutcome::RolledBack(_)));
    assert_eq!(fleet.phase("w2").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.releases.instance_version("w2"), Some(v("3.26.4")));
    assert_eq!(fleet.releases.instance_version("w1"), Some(v("3.27.0")));
    assert!(!fleet.cordoned("w2"));
}

#[tokio::test]
async fn manual_rollbacks_in_a_row_restore_every_node() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    let machine = fleet.machine();

    for host in ["w1", "w2"] {
        let outcome = machine.manual_rollback(host, RELEASE, NAMESPACE).await;
        assert!(matches!(outcome, NodeOutcome::RolledBack(_)), "{host}: {outcome:?}");
        assert_eq!(fleet.releases.instance_version(host), Some(v("3.26.4")));
        assert_eq!(fleet.annotation(host, "current-version").as_deref(), Some("3.26.4"));
        assert!(!fleet.cordoned(host));
    }
    // Only the first rollback had to move the release.
    assert_eq!(fleet.rollbacks(), 1);

    // Nothing left to revert on w1: refused before cordoning.
    let cordons = fleet.cordons();
    let outcome = machine.manual_rollback("w1", RELEASE, NAMESPACE).await;
    let failure = outcome.failure().unwrap();
    assert!(failure.error.contains("nothing to roll back"), "{}", failure.error);
    assert_eq!(fleet.cordons(), cordons);
    assert_eq!(fleet.rollbacks(), 1);
    assert_eq!(fleet.releases.desired_version(RELEASE, NAMESPACE), Some(v("3.26.4")));
}

#[tokio::test]
async fn manual_rollback_after_fail_fast_restores_completed_node() {
    let fleet = Fleet::new(&["a", "b"]);
    fleet.fail_verification("b", 1);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert_eq!(fleet.releases.instance_version("a"), Some(v("3.27.0")));

    let outcome = fleet.machine().manual_rollback("a", RELEASE, NAMESPACE).await;

    assert!(matches!(outcome, NodeOutcome::RolledBack(_)));
    assert_eq!(fleet.phase("a").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.releases.instance_version("a"), Some(v("3.26.4")));
    assert_eq!(fleet.annotation("a", "current-version").as_deref(), Some("3.26.4"));
    // The release was already reverted by b's turn.
    assert_eq!(fleet.rollbacks(), 1);
    assert!(!fleet.cordoned("a"));
}

#[tokio::test]
async fn manual_rollback_without_history_touches_nothing() {
    let fleet = Fleet::new(&["w1"]);

    let outcome = fleet.machine().manual_rollback("w1", RELEASE, NAMESPACE).await;

    assert!(matches!(outcome, NodeOutcome::FatalAbort(_)));
    assert!(outcome.failure().unwrap().error.contains("no previous revision"));
    assert_eq!(fleet.phase("w1"), None);
    assert!(fleet.cluster.cordon_order().is_empty());

    // The fleet is still free for a campaign.
    let report = fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    assert!(report.succeeded());
}

#[tokio::test(start_paused = true)]
async fn interrupted_manual_rollback_is_finished_by_rerun() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();
    fleet.releases.never_ready("w1");
    let machine = fleet.machine();

    let outcome = machine.manual_rollback("w1", RELEASE, NAMESPACE).await;
    assert!(matches!(outcome, NodeOutcome::FatalAbort(_)));
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolling-back"));
    assert_eq!(fleet.annotation("w1", "target-version").as_deref(), Some("3.27.0"));
    assert!(fleet.cordoned("w1"));

    // A campaign for another version must not run over it.
    let err = fleet.sequencer().run(&campaign("3.28.0")).await.unwrap_err();
    assert!(matches!(err, RolloutError::Config(ConfigError::InFlight { .. })));
    assert!(err.to_string().contains("noderoll rollback"), "{err}");

    // The replacement instance comes up; the rerun finishes the job.
    fleet.releases.add_instance("w1", v("3.26.4"));
    let outcome = machine.manual_rollback("w1", RELEASE, NAMESPACE).await;
    assert!(matches!(outcome, NodeOutcome::RolledBack(_)));
    assert_eq!(fleet.phase("w1").as_deref(), Some("rolled-back"));
    assert_eq!(fleet.annotation("w1", "current-version").as_deref(), Some("3.26.4"));
    assert!(!fleet.cordoned("w1"));
    assert_eq!(fleet.rollbacks(), 1);
}

#[tokio::test]
async fn status_query_reads_annotations() {
    let fleet = Fleet::new(&["w1", "w2"]);
    fleet.cluster.add_node("db1", &[("role", "db")]);
    fleet.fail_verification("w2", 1);
    fleet.sequencer().run(&campaign("3.27.0")).await.unwrap();

    let sequencer = fleet.sequencer();
    let all = sequencer.status(&LabelSelector::default(), None).await.unwrap();
    let names: Vec<_> = all.iter().map(|n| n.hostname.as_str()).collect();
    assert_eq!(names, vec!["w1", "w2"]);
    assert_eq!(all[0].phase, Some(Phase::Completed));
    assert_eq!(all[1].phase, Some(Phase::RolledBack));

    let selector: LabelSelector = "role=db".parse().unwrap();
    let db = sequencer.status(&selector, None).await.unwrap();
    assert_eq!(db.len(), 1);
    assert_eq!(db[0].phase, None);
}
