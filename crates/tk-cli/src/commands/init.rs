use tk_core::config::TickConfig;
use tk_core::project::{detect_project, whoami as detect_whoami};
use tk_core::repo::{wire_merge_driver, RealGitRunner};
use tk_core::store::TickStore;

use super::{repo_root, UsageError};

/// `ticks init`: create `.tick/`, write the config, and wire the merge
/// driver into `.gitattributes` / `.git/config`.
pub async fn run(id_length: u8) -> anyhow::Result<i32> {
    if !(3..=4).contains(&id_length) {
        return Err(UsageError("id length must be 3 or 4".into()).into());
    }

    let root = repo_root()?;
    let store = TickStore::new(&root);
    store.ensure()?;

    let config = TickConfig {
        id_length,
        ..TickConfig::default()
    };
    config.save(&root)?;

    wire_merge_driver(&root, &RealGitRunner, "ticks")?;

    println!("initialized .tick/ in {}", root.display());
    Ok(0)
}

/// `ticks whoami`: the identity new ticks get, plus the detected project.
pub fn whoami() -> anyhow::Result<i32> {
    let root = repo_root()?;
    let git = RealGitRunner;
    println!("{}", detect_whoami(&root, &git));
    match detect_project(&root, &git) {
        Ok(project) => println!("project: {project}"),
        Err(e) => println!("project: unknown ({e})"),
    }
    Ok(0)
}
