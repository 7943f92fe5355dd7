use serde::Serialize;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

#[derive(Serialize, Debug)]
pub struct ProcessStats {
    pub pid: u32,
    pub cpu_percent: f32,
    pub memory_rss: u64,
    pub memory_virtual: u64,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
}

#[derive(Serialize, Debug)]
pub struct HostStats {
    pub total_memory: u64,
    pub used_memory: u64,
    pub cpus: usize,
}

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub uptime_secs: f64,
    pub process: Option<ProcessStats>,
    pub host: HostStats,
}

lazy_static::lazy_static! {
    static ref START_TIME: Instant = Instant::now();
}

/// Pins the uptime origin. Called once at startup.
pub fn mark_start() {
    lazy_static::initialize(&START_TIME);
}

pub fn uptime() -> Duration {
    START_TIME.elapsed()
}

pub async fn get_system_info() -> SystemInfo {
    let mut sys = System::new_all();
    let pid = Pid::from_u32(std::process::id());

    // cpu_usage needs two samples
    sys.refresh_pids(&[pid]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    sys.refresh_pids(&[pid]);

    let process = sys.process(pid).map(|p| {
        let disk = p.disk_usage();
        ProcessStats {
            pid: pid.as_u32(),
            cpu_percent: p.cpu_usage(),
            memory_rss: p.memory(),
            memory_virtual: p.virtual_memory(),
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
        }
    });

    SystemInfo {
        uptime_secs: uptime().as_secs_f64(),
        process,
        host: HostStats {
            total_memory: sys.total_memory(),
            used_memory: sys.used_memory(),
            cpus: sys.cpus().len(),
        },
    }
}
