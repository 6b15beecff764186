//! Output posting rules: inline for short output, attachment for long.

use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::Task;
use tracing::warn;

/// Output at or below this length is posted inline in a preformatted block;
/// anything longer goes out as a file attachment.
pub const INLINE_LIMIT: usize = 1900;

/// Post a task's result to its channel under a status header. Posting errors
/// are logged and non-fatal.
pub async fn post_task_result(gateway: &dyn ChatGateway, task: &Task, reason: &str) {
    let header = format!("{} Task {} — {}", task.status.emoji(), task.id, reason);

    let result = if task.output.is_empty() {
        gateway
            .send_to_channel(&task.channel_id, &format!("{header}\nno output captured"))
            .await
            .map(|_| ())
    } else if task.output.len() <= INLINE_LIMIT {
        let body = format!("{header}\n```\n{}\n```", task.output);
        gateway.send_to_channel(&task.channel_id, &body).await.map(|_| ())
    } else {
        let notice = format!(
            "{header}\noutput is {} characters, attached as a file",
            task.output.len()
        );
        let filename = format!("task-{}-output.txt", task.id);
        match gateway.send_to_channel(&task.channel_id, &notice).await {
            Ok(_) => {
                gateway
                    .send_file(&task.channel_id, task.output.clone().into_bytes(), &filename)
                    .await
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        warn!(task = %task.id, channel = %task.channel_id, error = %e, "result post failed");
    }
}
