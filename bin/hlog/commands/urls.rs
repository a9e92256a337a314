//! Urls command - list the log endpoint of every task

use crate::style::*;
use anyhow::Result;
use headless_logs::LogServiceClient;

pub async fn run(server: &str, instance_id: &str) -> Result<()> {
    let client = LogServiceClient::new(server);
    let urls = client.resolve_urls(instance_id).await?;

    print_header(&format!("Instance {}", instance_id));

    if urls.streams.is_empty() {
        print_warning("No task logs found");
        return Ok(());
    }

    for endpoint in urls.streams.values() {
        let (source, tone) = if endpoint.online {
            ("live", Tone::Live)
        } else {
            ("archived", Tone::Archived)
        };
        print_entry(
            &format!("Task {}", endpoint.task_id),
            &format!("{} ({})", endpoint.url, source),
            tone,
        );
    }
    println!();

    Ok(())
}
