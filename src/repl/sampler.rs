//! Background CPU/RSS sampler for a worker's process tree. See SPEC_FULL.md §4.2, §9.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls a root pid and its descendants at ~1 Hz, tracking peak CPU percent and
/// peak resident-set size summed over the tree. Runs as a detached tokio task
/// for the worker's lifetime; `cancel` aborts it so it never outlives a closed
/// worker.
pub struct Sampler {
    cpu_max_bits: Arc<AtomicU64>,
    mem_max: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl Sampler {
    pub fn spawn(root_pid: Option<u32>) -> Self {
        let cpu_max_bits = Arc::new(AtomicU64::new(0));
        let mem_max = Arc::new(AtomicU64::new(0));

        let handle = match root_pid {
            Some(pid) => {
                let cpu_max_bits = cpu_max_bits.clone();
                let mem_max = mem_max.clone();
                tokio::spawn(async move { poll_loop(Pid::from_u32(pid), cpu_max_bits, mem_max).await })
            }
            None => tokio::spawn(async {}),
        };

        Sampler { cpu_max_bits, mem_max, handle }
    }

    /// Peak CPU percent and peak RSS bytes observed so far.
    pub fn peaks(&self) -> (f64, u64) {
        let cpu = f64::from_bits(self.cpu_max_bits.load(Ordering::Relaxed));
        let mem = self.mem_max.load(Ordering::Relaxed);
        (cpu, mem)
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

async fn poll_loop(root: Pid, cpu_max_bits: Arc<AtomicU64>, mem_max: Arc<AtomicU64>) {
    let mut sys = System::new();
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let (cpu, mem) = sum_process_tree(&sys, root);

        // cpu is always >= 0, so the bit pattern of a non-negative f64 orders the
        // same as the float itself; a plain integer fetch_max is safe here.
        cpu_max_bits.fetch_max(f64::to_bits(cpu), Ordering::Relaxed);
        mem_max.fetch_max(mem, Ordering::Relaxed);
    }
}

fn sum_process_tree(sys: &System, root: Pid) -> (f64, u64) {
    let mut cpu = 0f64;
    let mut mem = 0u64;
    for (pid, process) in sys.processes() {
        if *pid == root || is_descendant_of(sys, *pid, root) {
            cpu += process.cpu_usage() as f64;
            mem += process.memory();
        }
    }
    (cpu, mem)
}

fn is_descendant_of(sys: &System, pid: Pid, ancestor: Pid) -> bool {
    let mut current = pid;
    while let Some(process) = sys.process(current) {
        match process.parent() {
            Some(parent) if parent == ancestor => return true,
            Some(parent) if parent != current => current = parent,
            _ => return false,
        }
    }
    false
}
