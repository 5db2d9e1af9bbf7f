use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use pslaunch_remote::{HostRouter, Launcher};

use crate::JobArgs;

use super::{EXIT_FAILURE, EXIT_SUCCESS, load_config, load_hosts, mode};

/// Best-effort `pkill -f <program>` on every host, for cleaning up after a
/// launcher that died without cancelling its job.
pub async fn kill(args: &JobArgs, report: bool) -> anyhow::Result<u8> {
    let config = load_config(args)?;
    let hosts = load_hosts(&config)?;
    let program = config.program(mode(report))?.to_string();
    let router = Arc::new(HostRouter::from_config(&config.launch, &config.job.name));

    let mut tasks = JoinSet::new();
    for host in hosts.iter() {
        let host = host.to_string();
        let program = program.clone();
        let router = router.clone();
        tasks.spawn(async move {
            let result = router.kill_all(&host, &program).await;
            (host, result)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (host, result) = joined?;
        match result {
            Ok(true) => println!("{host}: killed {program}"),
            Ok(false) => println!("{host}: no {program} running"),
            Err(e) => {
                warn!(%host, error = %e.message, "kill failed");
                println!("{host}: failed: {}", e.message);
                failed += 1;
            }
        }
    }

    info!(hosts = hosts.len(), failed, "kill finished");
    Ok(if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILURE })
}
