//! Subcommand implementations.

pub mod chat;
pub mod relay;

use crate::ui;
use moresh_types::ConnectionKey;
use std::future::Future;
use std::time::Duration;

/// Run an async command on a fresh runtime.
pub fn block_on<F>(fut: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(fut);
    // Stdin reads run on a blocking thread that never returns on its own.
    rt.shutdown_timeout(Duration::from_millis(200));
    result
}

pub fn keygen() {
    let key = ConnectionKey::generate();
    println!("{key}");
    ui::hint(&format!("Share it with your peer: moresh chat --key <yours> --peer {key}"));
}
