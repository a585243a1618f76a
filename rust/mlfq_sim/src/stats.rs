//! Statistics aggregation.
//!
//! Per-process totals are folded in when a worker is reaped. The final
//! [`Report`] carries raw totals and per-process averages; an average over
//! zero exited processes is `None` and prints as "undefined".

use std::fmt;

use serde::Serialize;

use crate::clock::SimTime;
use crate::pcb::Pcb;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub spawned: u32,
    pub exited: u32,
    pub realtime_spawned: u32,
    pub normal_spawned: u32,
    pub dispatches: u64,
    pub demotions: u64,
    pub swaps: u64,
    pub cpu: SimTime,
    pub block: SimTime,
    pub wait: SimTime,
    pub turnaround: SimTime,
    pub idle: SimTime,
}

impl Stats {
    /// Fold the totals of a reaped process in.
    pub fn fold(&mut self, pcb: &Pcb) {
        self.cpu += pcb.cpu;
        self.block += pcb.block;
        self.wait += pcb.wait;
        self.turnaround += pcb.turnaround();
        self.exited += 1;
    }

    pub fn add_idle(&mut self, nanos: u64) {
        self.idle.advance(nanos);
    }

    pub fn report(&self, system: SimTime) -> Report {
        let n = self.exited as u64;
        Report {
            stats: self.clone(),
            system,
            avg_cpu: self.cpu.checked_div(n),
            avg_block: self.block.checked_div(n),
            avg_wait: self.wait.checked_div(n),
            avg_turnaround: self.turnaround.checked_div(n),
        }
    }
}

/// Shutdown summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub stats: Stats,
    /// Simulated clock at shutdown.
    pub system: SimTime,
    pub avg_cpu: Option<SimTime>,
    pub avg_block: Option<SimTime>,
    pub avg_wait: Option<SimTime>,
    pub avg_turnaround: Option<SimTime>,
}

struct Avg(Option<SimTime>);

impl fmt::Display for Avg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(t) => write!(f, "{t}"),
            None => write!(f, "undefined"),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(
            f,
            "processes: spawned={} exited={} (realtime={} normal={})",
            s.spawned, s.exited, s.realtime_spawned, s.normal_spawned
        )?;
        writeln!(
            f,
            "scheduling: dispatches={} demotions={} swaps={}",
            s.dispatches, s.demotions, s.swaps
        )?;
        writeln!(f, "TOTAL TIMES")?;
        writeln!(f, "  system     {}", self.system)?;
        writeln!(f, "  idle       {}", s.idle)?;
        writeln!(f, "  cpu        {}", s.cpu)?;
        writeln!(f, "  block      {}", s.block)?;
        writeln!(f, "  wait       {}", s.wait)?;
        writeln!(f, "  turnaround {}", s.turnaround)?;
        writeln!(f, "AVERAGE TIMES")?;
        writeln!(f, "  cpu        {}", Avg(self.avg_cpu))?;
        writeln!(f, "  block      {}", Avg(self.avg_block))?;
        writeln!(f, "  wait       {}", Avg(self.avg_wait))?;
        write!(f, "  turnaround {}", Avg(self.avg_turnaround))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_undefined_without_exits() {
        let stats = Stats::default();
        let report = stats.report(SimTime::new(3, 0));
        assert_eq!(report.avg_cpu, None);
        let text = report.to_string();
        assert!(text.contains("cpu        undefined"), "{text}");
    }

    #[test]
    fn fold_accumulates_and_averages() {
        let mut stats = Stats::default();
        for cpu in [1_000, 3_000] {
            let mut pcb = Pcb {
                arrival: SimTime::ZERO,
                exit: SimTime::from_nanos(10_000),
                cpu: SimTime::from_nanos(cpu),
                ..Pcb::default()
            };
            pcb.settle_wait();
            stats.fold(&pcb);
        }
        let report = stats.report(SimTime::from_nanos(10_000));
        assert_eq!(report.stats.exited, 2);
        assert_eq!(report.stats.cpu, SimTime::from_nanos(4_000));
        assert_eq!(report.avg_cpu, Some(SimTime::from_nanos(2_000)));
        assert_eq!(report.avg_wait, Some(SimTime::from_nanos(8_000)));
        assert_eq!(report.avg_turnaround, Some(SimTime::from_nanos(10_000)));
    }

    #[test]
    fn serializes_to_json() {
        let report = Stats::default().report(SimTime::ZERO);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["exited"], 0);
        assert!(json["avg_wait"].is_null());
    }
}
