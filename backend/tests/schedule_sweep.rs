use std::collections::HashMap;
use std::time::Duration;

use backend::config::ScheduleBootstrapConfig;
use backend::schedule::WorkAssignmentSchedule;
use chrono::Utc;
use common::{ProcessGroup, RecorderIdentifier, Work, WorkAssignment, WorkId};
use pretty_assertions::assert_eq;

fn bootstrap() -> ScheduleBootstrapConfig {
    ScheduleBootstrapConfig {
        scheduling_buffer_secs: 5,
        window_duration_secs: 600,
        window_end_tolerance_secs: 30,
        min_acceptable_delay_secs: 0,
        max_acceptable_delay_secs: 60,
    }
}

fn recorder(i: usize) -> RecorderIdentifier {
    RecorderIdentifier {
        ip: format!("10.0.0.{i}"),
        hostname: format!("host-{i}"),
        instance_id: format!("i-{i}"),
        process_group: ProcessGroup::new("shop", "prod", "api"),
    }
}

/// Muchos recorders pollean cada segundo durante toda la ventana: cada
/// asignación sale exactamente una vez y arranca justo en su offset.
#[test]
fn full_window_sweep_hands_out_every_assignment_once() {
    let assignments: Vec<WorkAssignment> = (1..=3)
        .map(|i| {
            WorkAssignment::new(
                WorkId::from_parts(1, i),
                vec![Work::CpuSample {
                    frequency: 100,
                    max_frames: 64,
                }],
                "cpu".to_string(),
                60,
            )
        })
        .collect();
    let schedule = WorkAssignmentSchedule::new(&bootstrap(), assignments, 60, 10).unwrap();
    assert_eq!(schedule.max_serial(), 8);
    assert_eq!(schedule.max_overlap(), 1);

    let mut starts: HashMap<WorkId, u64> = HashMap::new();
    let mut holder: HashMap<WorkId, usize> = HashMap::new();
    let recorders = 10;

    for t in 0..600u64 {
        for r in 0..recorders {
            let Some(a) = schedule.get_next_work_assignment_at(
                &recorder(r),
                Duration::from_secs(t),
                Utc::now(),
            ) else {
                continue;
            };
            assert!(a.delay <= 60);
            match holder.get(&a.work_id) {
                Some(owner) => assert_eq!(*owner, r, "work_id entregado a dos recorders"),
                None => {
                    holder.insert(a.work_id, r);
                    starts.insert(a.work_id, t + a.delay as u64);
                }
            }
        }
    }

    let mut got: Vec<u64> = starts.values().copied().collect();
    got.sort_unstable();
    assert_eq!(got, vec![10, 75, 140]);
    assert_eq!(schedule.pending(), 0);

    // cada recorder tuvo como mucho una
    let mut owners: Vec<usize> = holder.values().copied().collect();
    owners.sort_unstable();
    owners.dedup();
    assert_eq!(owners.len(), 3);
}

#[test]
fn concurrent_pollers_never_share_a_work_id() {
    let assignments: Vec<WorkAssignment> = (1..=16)
        .map(|i| WorkAssignment::new(WorkId::from_parts(2, i), vec![], String::new(), 30))
        .collect();
    let config = ScheduleBootstrapConfig {
        max_acceptable_delay_secs: 600,
        ..bootstrap()
    };
    let schedule = std::sync::Arc::new(WorkAssignmentSchedule::new(&config, assignments, 30, 100).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|thread| {
            let schedule = schedule.clone();
            std::thread::spawn(move || {
                (0..4)
                    .filter_map(|k| {
                        schedule.get_next_work_assignment_at(
                            &recorder(thread * 10 + k),
                            Duration::ZERO,
                            Utc::now(),
                        )
                    })
                    .map(|a| a.work_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<WorkId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);
    assert_eq!(total, 16);
}
