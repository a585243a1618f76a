// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The `worker` side of the line protocol.

use std::io::BufRead;
use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;

use mlfq_sim::transport::DISPATCH_LINE;
use mlfq_sim::{Burst, RandomWorkload, Reply, Workload, EXIT_STATUS_OFFSET};

/// Wall-clock length of one simulated I/O wake unit.
const WAKE_UNIT: Duration = Duration::from_millis(1);

/// Serve dispatches from `input` until the workload terminates or the
/// coordinator hangs up. Returns the exit status to terminate with.
pub fn serve(
    local: u32,
    workload: &mut dyn Workload,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<i32> {
    for line in input.lines() {
        let line = line.context("Failed to read dispatch")?;
        if line.trim() != DISPATCH_LINE {
            bail!("worker {}: unexpected message {:?}", local, line);
        }

        let burst = workload.next_burst();
        debug!("worker {}: {:?}", local, burst);
        writeln!(output, "{}", burst.reply())?;
        output.flush()?;

        match burst {
            Burst::Terminate { .. } => return Ok(EXIT_STATUS_OFFSET + local as i32),
            Burst::Block { wake_after, .. } => {
                thread::sleep(WAKE_UNIT * wake_after);
                writeln!(output, "{}", Reply::unblocked())?;
                output.flush()?;
            }
            Burst::Expire => {}
        }
    }
    debug!("worker {}: coordinator hung up", local);
    Ok(0)
}

pub fn run(local: u32, seed: u64) -> Result<i32> {
    let mut workload = RandomWorkload::new(seed);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(local, &mut workload, stdin.lock(), stdout.lock())
}
