//! Random join/leave/crash sequences must settle on a single host that
//! matches the oracle's owner.

mod common;

use std::time::Duration;

use common::Cluster;
use proptest::prelude::*;

const NAMES: [&str; 6] = ["Ayse", "Bora", "Cem", "Deniz", "Ece", "Filiz"];

#[derive(Debug, Clone)]
enum Op {
    Join,
    Leave(usize),
    Crash(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Join),
        2 => (0usize..8).prop_map(Op::Leave),
        1 => (0usize..8).prop_map(Op::Crash),
    ]
}

fn apply(cluster: &mut Cluster, op: &Op) {
    match *op {
        Op::Join => {
            let name = NAMES[cluster.members.len() % NAMES.len()];
            // Full or already closed groups refuse the join
            let _ = cluster.try_join(name, false);
        }
        Op::Leave(pick) => {
            let live = cluster.in_group();
            if let Some(&index) = live.get(pick % live.len().max(1)) {
                let now = cluster.now;
                let _ = cluster.node_mut(index).leave(now);
            }
        }
        Op::Crash(pick) => {
            let live = cluster.in_group();
            if let Some(&index) = live.get(pick % live.len().max(1)) {
                cluster.crash(index);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn host_view_converges_to_oracle_owner(ops in prop::collection::vec(op(), 1..12)) {
        let mut cluster = Cluster::new();
        cluster.create(NAMES[0], false);
        cluster.join(NAMES[1], false);
        cluster.join(NAMES[2], false);
        cluster.run(2, Duration::from_millis(50));

        for op in &ops {
            apply(&mut cluster, op);
            cluster.run(2, Duration::from_millis(50));
        }
        cluster.run(12, Duration::from_millis(250));

        let live = cluster.in_group();
        let group = cluster.group();
        match cluster.oracle.owner(group) {
            Ok(owner) => {
                let mut members = cluster.oracle.members(group).unwrap();
                let mut ids: Vec<_> = live.iter().map(|&i| cluster.id(i)).collect();
                members.sort();
                ids.sort();
                prop_assert_eq!(members, ids);

                for &index in &live {
                    prop_assert_eq!(cluster.node(index).cached_host(), Some(owner));
                }
                let hosts: Vec<_> = cluster.hosts().into_iter().map(|i| cluster.id(i)).collect();
                prop_assert_eq!(hosts, vec![owner]);
            }
            Err(_) => prop_assert!(live.is_empty()),
        }
    }
}
