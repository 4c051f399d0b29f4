use tk_core::config::RemoteSettings;
use tk_core::project::detect_project;
use tk_core::repo::RealGitRunner;
use tk_sync::{SyncClient, SyncState};

use super::open_store;

/// `ticks sync`: bidirectional sync with the remote until interrupted.
pub async fn run() -> anyhow::Result<i32> {
    let store = open_store()?;
    let project = detect_project(store.repo_root(), &RealGitRunner)?;
    let settings = RemoteSettings::resolve(RemoteSettings::default_rc_path().as_deref());

    let client = SyncClient::new(store, project.as_str(), settings);
    eprintln!("syncing {project} with {}", client.endpoint_url());

    // Report state transitions on stderr.
    let mut state = client.state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let s = *state.borrow();
            match s {
                SyncState::Connected => eprintln!("sync: connected"),
                SyncState::Connecting => eprintln!("sync: connecting..."),
                SyncState::Disconnected => eprintln!("sync: disconnected"),
                SyncState::Error => eprintln!("sync: connection error; backing off"),
            }
        }
    });

    let stopper = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; stopping sync");
            stopper.stop();
        }
    });

    client.run().await?;
    Ok(0)
}
