//! State reconciler — periodic repair of stuck cloud nodes.
//!
//! Sweeps every configured (partition, node group), reads each node's
//! compound state, and applies a fixed transition table. Transitions are
//! best-effort: one node's failure never blocks the rest. The table is
//! idempotent — re-running a sweep over the resulting states is a no-op.

use tracing::{debug, error, info};

use burst_config::Config;

use crate::client::{NodeStateView, SlurmClient};
use crate::error::SlurmResult;

/// A planned state change for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: &'static str,
    pub reason: Option<&'static str>,
}

/// The fixed transition table.
///
/// | Observed | Action |
/// |---|---|
/// | `DOWN*` or `IDLE*` (not responding) | `POWER_DOWN`, node_not_responding |
/// | `COMPLETING` + `DRAIN` | `DOWN`, node_stuck |
/// | `DOWN` + `POWER` | `IDLE` (recovery) |
/// | `DOWN` without `POWER` | `POWER_DOWN`, node_stuck |
/// | `DRAIN` + `POWER` | `UNDRAIN` |
pub fn plan_transition(tokens: &[&str]) -> Option<Transition> {
    let has = |token: &str| tokens.contains(&token);

    if has("DOWN*") || has("IDLE*") {
        return Some(Transition {
            target: "POWER_DOWN",
            reason: Some("node_not_responding"),
        });
    }
    if has("COMPLETING") && has("DRAIN") {
        return Some(Transition {
            target: "DOWN",
            reason: Some("node_stuck"),
        });
    }
    if has("DOWN") && has("POWER") {
        return Some(Transition {
            target: "IDLE",
            reason: None,
        });
    }
    if has("DOWN") && !has("POWER") {
        return Some(Transition {
            target: "POWER_DOWN",
            reason: Some("node_stuck"),
        });
    }
    if has("DRAIN") && has("POWER") {
        return Some(Transition {
            target: "UNDRAIN",
            reason: None,
        });
    }
    None
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub nodes_examined: usize,
    pub transitions_applied: usize,
    pub failures: usize,
}

/// The reconciler.
pub struct StateReconciler {
    client: SlurmClient,
    dry_run: bool,
}

impl StateReconciler {
    pub fn new(client: SlurmClient, dry_run: bool) -> Self {
        StateReconciler { client, dry_run }
    }

    /// Sweep every configured node group once.
    pub async fn sweep(&self, config: &Config) -> SlurmResult<SweepReport> {
        let mut all_nodes = Vec::new();
        for partition in &config.scheduler.partitions {
            for group in &partition.node_groups {
                let range = config.node_range(
                    &partition.partition_name,
                    &group.node_group_name,
                    group.max_nodes,
                );
                match self.client.expand_hostlist(&range).await {
                    Ok(nodes) => all_nodes.extend(nodes),
                    Err(e) => {
                        error!(
                            partition = %partition.partition_name,
                            node_group = %group.node_group_name,
                            range = %range,
                            error = %e,
                            "failed to expand node range"
                        );
                    }
                }
            }
        }

        if all_nodes.is_empty() {
            info!("no cloud nodes found to manage");
            return Ok(SweepReport::default());
        }

        let states = self.client.node_states(&all_nodes).await?;
        let mut report = SweepReport {
            nodes_examined: states.len(),
            ..SweepReport::default()
        };

        for view in &states {
            match self.reconcile_node(view).await {
                Ok(true) => report.transitions_applied += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    error!(
                        node = %view.node_name,
                        state = %view.state,
                        error = %e,
                        "failed to reconcile node"
                    );
                }
            }
        }

        info!(
            examined = report.nodes_examined,
            applied = report.transitions_applied,
            failures = report.failures,
            "state sweep completed"
        );
        Ok(report)
    }

    /// Apply the table to one node. Returns whether a transition fired.
    async fn reconcile_node(&self, view: &NodeStateView) -> SlurmResult<bool> {
        let tokens = view.tokens();
        let Some(transition) = plan_transition(&tokens) else {
            debug!(node = %view.node_name, state = %view.state, "no transition needed");
            return Ok(false);
        };

        if self.dry_run {
            info!(
                node = %view.node_name,
                from = %view.state,
                to = transition.target,
                reason = transition.reason.unwrap_or(""),
                "dry run: would change node state"
            );
            return Ok(true);
        }

        self.client
            .set_node_state(&view.node_name, transition.target, transition.reason)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresponsive_nodes_power_down() {
        let t = plan_transition(&["DOWN*", "CLOUD"]).unwrap();
        assert_eq!(t.target, "POWER_DOWN");
        assert_eq!(t.reason, Some("node_not_responding"));

        let t = plan_transition(&["IDLE*", "CLOUD", "POWER"]).unwrap();
        assert_eq!(t.target, "POWER_DOWN");
    }

    #[test]
    fn stuck_completing_drain_goes_down() {
        let t = plan_transition(&["COMPLETING", "DRAIN"]).unwrap();
        assert_eq!(t.target, "DOWN");
        assert_eq!(t.reason, Some("node_stuck"));
    }

    #[test]
    fn down_with_power_recovers_to_idle() {
        let t = plan_transition(&["DOWN", "POWER"]).unwrap();
        assert_eq!(t.target, "IDLE");
        assert_eq!(t.reason, None);
    }

    #[test]
    fn down_without_power_powers_down() {
        let t = plan_transition(&["DOWN", "CLOUD"]).unwrap();
        assert_eq!(t.target, "POWER_DOWN");
        assert_eq!(t.reason, Some("node_stuck"));
    }

    #[test]
    fn drained_powered_nodes_undrain() {
        let t = plan_transition(&["DRAIN", "POWER"]).unwrap();
        assert_eq!(t.target, "UNDRAIN");
    }

    #[test]
    fn healthy_states_are_left_alone() {
        assert_eq!(plan_transition(&["IDLE", "CLOUD", "POWER"]), None);
        assert_eq!(plan_transition(&["ALLOCATED", "CLOUD"]), None);
        assert_eq!(plan_transition(&[]), None);
    }

    #[test]
    fn exact_token_match_only() {
        // `DOWN*` is not `DOWN`; a bare `DRAIN` without `POWER` is not
        // actionable by the last rule.
        assert_eq!(plan_transition(&["DRAIN"]), None);
        assert_eq!(
            plan_transition(&["DOWN*"]).unwrap().reason,
            Some("node_not_responding")
        );
    }

    #[test]
    fn table_is_idempotent() {
        // Applying a planned transition and re-reading the resulting
        // state must produce no further action.
        let cases: &[(&[&str], &str)] = &[
            (&["DOWN", "POWER"], "IDLE"),
            (&["DOWN"], "POWER_DOWN"),
            (&["DOWN*"], "POWER_DOWN"),
            (&["COMPLETING", "DRAIN"], "DOWN"),
        ];
        for (tokens, expected) in cases {
            let t = plan_transition(tokens).unwrap();
            assert_eq!(&t.target, expected);
        }

        // The post-transition states settle.
        assert_eq!(plan_transition(&["IDLE"]), None);
        assert_eq!(plan_transition(&["POWER_DOWN"]), None);
        // `DOWN` after the stuck transition pairs with `DRAIN` gone.
        assert_eq!(plan_transition(&["DOWN", "POWER"]).unwrap().target, "IDLE");
    }
}
