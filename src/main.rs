/*!
 * ZSRM Daemon - Main Entry Point
 *
 * Starts the scheduler runtime and drives a small demonstration task set:
 * - A high-criticality control loop with zero-slack enforcement
 * - A low-criticality logger that gets evicted under overload
 *
 * Prints the drained trace and overhead statistics on exit.
 */

use anyhow::Context;
use mixed_trust_kernel::host::LocalTasks;
use mixed_trust_kernel::{
    init_tracing, ReserveSpec, RuntimeHosts, SchedulerConfig, SchedulerRuntime, Session,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const CONTROL_PID: i32 = 1001;
const LOGGER_PID: i32 = 1002;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("ZSRM daemon starting...");
    info!("================================================");

    let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    info!(
        admission = %config.admission,
        secure_bootstrap = config.secure_bootstrap,
        trace_capacity = config.trace_capacity,
        "Configuration loaded"
    );

    let periods: u64 = std::env::var("ZSRM_DEMO_PERIODS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let tasks = Arc::new(LocalTasks::new());
    tasks.register(CONTROL_PID);
    tasks.register(LOGGER_PID);
    let hosts = RuntimeHosts::default().with_tasks(tasks.clone());

    let runtime = SchedulerRuntime::start(config, hosts).context("scheduler failed to start")?;
    info!("Scheduler ready");

    let control = ReserveSpec::new(10_000_000, 4_000_000, 2)
        .with_nominal(2_000_000)
        .with_zero_slack(10_000_000);
    let logger = ReserveSpec::new(20_000_000, 5_000_000, 1);

    let jobs = vec![
        tokio::spawn(run_periodic(runtime.session(CONTROL_PID), control, periods, 1_000)),
        tokio::spawn(run_periodic(runtime.session(LOGGER_PID), logger, periods, 3_000)),
    ];

    tokio::select! {
        results = futures::future::join_all(jobs) => {
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Periodic task failed"),
                    Err(e) => warn!(error = %e, "Periodic task panicked"),
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    let (records, overhead) = runtime
        .scheduler()
        .with_core(|core| (core.read_trace(), core.overhead()));

    info!(records = records.len(), "Trace drained");
    for record in records.iter().take(32) {
        println!(
            "{:>14} {:<28} rid={}",
            record.timestamp_ns,
            record.event.name(),
            record.rid
        );
    }
    println!("{}", serde_json::to_string_pretty(&overhead)?);

    runtime.shutdown().await;
    info!("ZSRM daemon stopped");
    Ok(())
}

/// Create, attach, and run `periods` jobs of `work_us` busy time each
async fn run_periodic(
    session: Session,
    spec: ReserveSpec,
    periods: u64,
    work_us: u64,
) -> anyhow::Result<()> {
    let rid = session.create(spec).await?;
    session.attach(rid).await?;
    info!(rid, pid = session.pid(), "Reserve attached");

    for _ in 0..periods {
        tokio::time::sleep(Duration::from_micros(work_us)).await;
        session.wait_period(rid).await?;
    }

    let wcet = session.wcet_ns(rid).await?;
    let acet = session.acet_ns(rid).await?;
    info!(rid, wcet_ns = wcet, acet_ns = acet, "Reserve finished");

    session.delete(rid).await?;
    Ok(())
}
