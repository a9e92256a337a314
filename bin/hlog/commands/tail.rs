//! Tail command - follow one task's log until it ends

use crate::style::*;
use anyhow::{bail, Result};
use headless_logs::{
    BufferKey, BufferRegistry, FollowOutcome, LogEvent, LogServiceClient, ReaderConfig,
    StreamReader, TaskLogFollower,
};
use std::io::Write;
use tokio_util::sync::CancellationToken;

pub async fn run(server: &str, instance_id: &str, task_id: &str) -> Result<()> {
    let registry = BufferRegistry::new();
    let key = BufferKey::new(instance_id, task_id);
    let buffer = registry.acquire(key.clone());

    let printer = {
        let mut subscription = buffer.subscribe();
        tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(event) = subscription.next().await {
                match event {
                    LogEvent::Logs(text) => {
                        let _ = stdout.write_all(text.as_bytes());
                        let _ = stdout.flush();
                    }
                    LogEvent::Reset => {
                        eprintln!();
                        eprintln!("{}", Tone::Dim.paint("── log restarted ──"));
                    }
                    // final errors are reported with the outcome
                    LogEvent::Error(_) | LogEvent::End => {}
                }
            }
        })
    };

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let follower = TaskLogFollower::new(
        LogServiceClient::new(server),
        StreamReader::new(ReaderConfig::from_env()),
    );
    let outcome = follower
        .follow(instance_id, task_id, buffer.clone(), &cancel)
        .await;

    interrupt.abort();
    registry.release(&key);
    printer.await?;

    match outcome {
        FollowOutcome::Completed => {
            print_success(&format!("Task {} log complete", Tone::Bold.paint(task_id)));
            Ok(())
        }
        FollowOutcome::Cancelled => {
            print_warning("Interrupted");
            Ok(())
        }
        FollowOutcome::Failed(e) => bail!("log stream failed: {}", e),
        FollowOutcome::AlreadyStreaming => bail!("task {} is already being followed", task_id),
    }
}
