use mlfq_sim::*;

mod common;

/// A lone real-time process dispatches at once and is charged exactly the
/// share of the level-0 cost it reports.
#[test]
fn test_single_realtime_process() {
    common::setup_test();
    let config = SchedConfig {
        realtime_percent: 100,
        ..common::config(1, 1)
    };
    let base = config.base_cost(PRIO_REALTIME);
    let mut sim = Simulator::new(config, common::uniform(vec![Burst::Terminate { percent: 50 }]))
        .unwrap();
    let mut state = sim.new_state();

    sim.tick(&mut state).unwrap();
    assert_eq!(state.running, Some(LocalPid(1)));
    assert_eq!(state.table.get(LocalPid(1)).unwrap().priority, PRIO_REALTIME);

    let before = state.clock;
    sim.tick(&mut state).unwrap();
    state.check_invariants().unwrap();
    assert!(sim.is_finished(&state));

    let cpu = SimTime::from_nanos(base / 2);
    assert_eq!(state.stats.cpu, cpu);
    assert_eq!(state.stats.exited, 1);
    assert_eq!(state.stats.spawned, 1);
    assert_eq!(state.stats.realtime_spawned, 1);
    assert_eq!(state.clock, before + SimTime::from_nanos(10_000) + cpu);

    // Arrival at the first tick, exit after the second tick plus the burst.
    assert_eq!(state.stats.turnaround, SimTime::from_nanos(15_000));
    assert_eq!(state.stats.wait, SimTime::from_nanos(10_000));
    assert!(state.table.is_empty());
}

#[test]
fn test_single_realtime_process_full_run() {
    common::setup_test();
    let config = SchedConfig {
        realtime_percent: 100,
        ..common::config(1, 1)
    };
    let mut sim = Simulator::new(config, common::uniform(vec![Burst::Terminate { percent: 50 }]))
        .unwrap();
    let result = sim.run().unwrap();
    result.trace.dump();

    assert_eq!(result.exit, ExitKind::Completed);
    assert_eq!(result.report.stats.spawned, result.report.stats.exited);
    assert_eq!(result.report.avg_cpu, Some(SimTime::from_nanos(5_000)));
    assert_eq!(result.trace.dispatch_order(), vec![LocalPid(1)]);
}

/// Processes at the same level dispatch in insertion order.
#[test]
fn test_fifo_within_level() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(2, 2), common::uniform(vec![])).unwrap();
    let mut state = sim.new_state();

    assert_eq!(sim.try_spawn(&mut state).unwrap(), Some(LocalPid(1)));
    assert_eq!(sim.try_spawn(&mut state).unwrap(), Some(LocalPid(2)));
    assert_eq!(
        state.queues.active().snapshot()[PRIO_NORMAL],
        vec![LocalPid(1), LocalPid(2)]
    );

    assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(LocalPid(1)));
    assert_eq!(state.queues.active().level(PRIO_NORMAL).peek(), Some(LocalPid(2)));
    state.check_invariants().unwrap();
}

#[test]
fn test_fifo_round_robin_across_swaps() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(2, 2), common::uniform(common::expires(1))).unwrap();
    let state = common::run_checked(&mut sim, 1_000).unwrap();

    assert_eq!(
        state.trace.dispatch_order(),
        vec![LocalPid(1), LocalPid(2), LocalPid(1), LocalPid(2)]
    );
    assert_eq!(state.stats.swaps, 1);
    assert_eq!(state.stats.exited, 2);
}

/// A blocked process leaves the blocked queue only on its own UNBLOCKED
/// reply and returns at its pre-block level.
#[test]
fn test_block_then_unblock() {
    common::setup_test();
    let script = vec![Burst::Block {
        percent: 20,
        wake_after: 3,
    }];
    let mut sim = Simulator::new(common::config(1, 1), common::uniform(script)).unwrap();
    let mut state = sim.new_state();
    let pid = LocalPid(1);

    sim.tick(&mut state).unwrap();
    assert_eq!(state.running, Some(pid));

    // BLOCKED is handled, then two polls find nothing.
    sim.tick(&mut state).unwrap();
    assert!(state.queues.blocked().contains(pid));
    assert_eq!(state.table.get(pid).unwrap().state, ProcState::Blocked);
    sim.tick(&mut state).unwrap();
    assert!(state.queues.blocked().contains(pid));
    assert!(!state.queues.active().contains(pid));
    assert_eq!(state.running, None);
    assert!(state.stats.idle > SimTime::ZERO);

    // Third poll wakes it and it is dispatched in the same tick.
    sim.tick(&mut state).unwrap();
    assert!(state.queues.blocked().is_empty());
    assert_eq!(state.running, Some(pid));
    let pcb = state.table.get(pid).unwrap();
    assert_eq!(pcb.priority, PRIO_NORMAL);
    assert!(pcb.block > SimTime::ZERO);
    assert_eq!(pcb.blocked_since, None);

    let unblocks: Vec<_> = state
        .trace
        .for_pid(pid)
        .filter(|e| matches!(e.kind, TraceKind::Unblocked { .. }))
        .collect();
    assert_eq!(unblocks.len(), 1);
    assert_eq!(
        unblocks[0].kind,
        TraceKind::Unblocked {
            pid,
            prio: PRIO_NORMAL
        }
    );
    state.check_invariants().unwrap();

    sim.tick(&mut state).unwrap();
    assert!(sim.is_finished(&state));
    let block = state.stats.block;
    let report = state.stats.report(state.clock);
    assert_eq!(report.avg_block, Some(block));
}

#[test]
fn test_unblock_matches_own_id() {
    common::setup_test();
    let backend = common::scripted(vec![
        vec![Burst::Block {
            percent: 10,
            wake_after: 4,
        }],
        vec![Burst::Block {
            percent: 10,
            wake_after: 1,
        }],
    ]);
    let mut sim = Simulator::new(common::config(2, 2), backend).unwrap();
    let state = common::run_checked(&mut sim, 1_000).unwrap();

    let unblocked: Vec<LocalPid> = state
        .trace
        .events()
        .iter()
        .filter_map(|e| match e.kind {
            TraceKind::Unblocked { pid, .. } => Some(pid),
            _ => None,
        })
        .collect();
    // Blocked later, woken first.
    assert_eq!(unblocked, vec![LocalPid(2), LocalPid(1)]);
    assert_eq!(state.stats.exited, 2);
}

/// A normal process past its level's aging threshold is demoted onto the
/// expired set and stays out of reach until the next swap.
#[test]
fn test_demotion_lands_on_expired_set() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(2, 2), common::uniform(common::expires(1))).unwrap();
    let mut state = sim.new_state();
    let p1 = sim.try_spawn(&mut state).unwrap().unwrap();
    let p2 = sim.try_spawn(&mut state).unwrap().unwrap();

    assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(p1));
    // One more full level-1 quantum crosses the 20us threshold.
    state.table.get_mut(p1).unwrap().queue = SimTime::from_nanos(15_000);
    assert_eq!(
        sim.handle_running(&mut state).unwrap(),
        Some(ReplyKind::Expired)
    );

    let pcb = state.table.get(p1).unwrap();
    assert_eq!(pcb.priority, 2);
    assert_eq!(pcb.queue, SimTime::ZERO);
    assert!(state.queues.expired().level(2).contains(p1));
    assert!(!state.queues.active().contains(p1));
    assert_eq!(state.stats.demotions, 1);

    assert!(!sim.try_swap(&mut state));
    assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(p2));
    state.check_invariants().unwrap();
}

#[test]
fn test_demotion_after_aging_threshold() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(1, 1), common::uniform(common::expires(4))).unwrap();
    let state = common::run_checked(&mut sim, 1_000).unwrap();

    let shifts: Vec<(Priority, Priority)> = state
        .trace
        .events()
        .iter()
        .filter_map(|e| match e.kind {
            TraceKind::Expired { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    // 5us per level-1 quantum against a 20us threshold.
    assert_eq!(shifts, vec![(1, 1), (1, 1), (1, 1), (1, 2)]);
    assert_eq!(state.stats.demotions, 1);
    assert!(state
        .trace
        .events()
        .iter()
        .any(|e| e.kind == TraceKind::Dispatched { pid: LocalPid(1), prio: 2 }));
}

#[test]
fn test_realtime_never_ages() {
    common::setup_test();
    let config = SchedConfig {
        realtime_percent: 100,
        ..common::config(1, 1)
    };
    let mut sim = Simulator::new(config, common::uniform(common::expires(10))).unwrap();
    let state = common::run_checked(&mut sim, 1_000).unwrap();

    assert_eq!(state.stats.demotions, 0);
    // Requeued on the active set, so no swap is ever needed.
    assert_eq!(state.stats.swaps, 0);
    assert_eq!(state.trace.dispatch_count(LocalPid(1)), 11);
}

/// Drained active set, populated expired set, nothing running: the sets
/// swap and the former expired work dispatches in the same tick.
#[test]
fn test_swap_makes_expired_runnable() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(2, 2), common::uniform(vec![])).unwrap();
    let mut state = sim.new_state();
    let p1 = sim.try_spawn(&mut state).unwrap().unwrap();
    let p2 = sim.try_spawn(&mut state).unwrap().unwrap();
    for pid in [p1, p2] {
        state.queues.active_mut().remove(pid);
        state.queues.expired_mut().level_mut(PRIO_NORMAL).push(pid);
    }
    state.check_invariants().unwrap();

    assert!(sim.try_swap(&mut state));
    assert!(state.queues.expired().is_empty());
    assert_eq!(
        state.queues.active().snapshot()[PRIO_NORMAL],
        vec![p1, p2]
    );
    assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(p1));
    assert_eq!(state.stats.swaps, 1);
    assert_eq!(state.trace.swap_count(), 1);
}

#[test]
fn test_no_swap_while_running_or_active_nonempty() {
    common::setup_test();
    let mut sim = Simulator::new(common::config(3, 3), common::uniform(vec![])).unwrap();
    let mut state = sim.new_state();
    let p1 = sim.try_spawn(&mut state).unwrap().unwrap();
    let p2 = sim.try_spawn(&mut state).unwrap().unwrap();
    let p3 = sim.try_spawn(&mut state).unwrap().unwrap();
    state.queues.active_mut().remove(p3);
    state.queues.expired_mut().level_mut(PRIO_NORMAL).push(p3);

    // p2 still on the active set.
    assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(p1));
    assert!(!sim.try_swap(&mut state));

    // Active set empty but p1 is running.
    state.queues.active_mut().remove(p2);
    state.queues.expired_mut().level_mut(PRIO_NORMAL).push(p2);
    assert!(!sim.try_swap(&mut state));
    assert_eq!(state.stats.swaps, 0);
}

/// A push onto a full queue is dropped and leaves the queue untouched.
#[test]
fn test_full_queue_drops_push() {
    let mut queues = RunQueues::new(2);
    let level = queues.active_mut().level_mut(PRIO_NORMAL);
    assert!(level.push(LocalPid(1)));
    assert!(level.push(LocalPid(2)));
    assert!(level.is_full());
    assert!(!level.push(LocalPid(3)));
    assert_eq!(level.len(), 2);

    assert_eq!(level.pop(), Some(LocalPid(1)));
    assert!(level.push(LocalPid(4)));
    assert!(!level.push(LocalPid(5)));
    assert_eq!(level.pop(), Some(LocalPid(2)));
    assert_eq!(level.pop(), Some(LocalPid(4)));
    assert_eq!(level.pop(), None);
    assert_eq!(queues.occurrences(LocalPid(3)), 0);
}

/// Requeueing a blocked id that is still waiting keeps the others in order.
#[test]
fn test_blocked_requeue_preserves_order() {
    let mut blocked = BoundedQueue::new(4);
    for pid in 1..=3 {
        blocked.push(LocalPid(pid));
    }
    let n = blocked.len();
    for _ in 0..n {
        let pid = blocked.pop().unwrap();
        blocked.push(pid);
    }
    assert_eq!(
        blocked.iter().collect::<Vec<_>>(),
        vec![LocalPid(1), LocalPid(2), LocalPid(3)]
    );
}
