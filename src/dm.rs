//! Developer DM commands: the newest message in the developer conversation
//! is posted verbatim to the public timeline as a thread.

use crate::dispatch;
use crate::pipeline::PipelineContext;

use std::sync::Arc;
use std::time::Duration;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);
const ERROR_PAUSE: Duration = Duration::from_secs(60);
const MESSAGE_FETCH_LIMIT: u32 = 5;

/// Spawn the background DM command polling loop.
pub fn spawn_command_loop(ctx: Arc<PipelineContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("DM command loop started");
        loop {
            match check_commands(&ctx).await {
                Ok(()) => tokio::time::sleep(CHECK_INTERVAL).await,
                Err(error) => {
                    tracing::error!(%error, "DM command check failed");
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
        }
    })
}

async fn check_commands(ctx: &PipelineContext) -> crate::Result<()> {
    ctx.limits.wait_for_social().await;
    let convo_id = ctx
        .social
        .get_or_create_convo(&ctx.config.credentials.developer_did)
        .await?;

    let messages = ctx
        .social
        .get_dm_messages(&convo_id, MESSAGE_FETCH_LIMIT)
        .await?;
    let Some(latest) = messages.first() else {
        return Ok(());
    };

    // Skip our own acknowledgements and anything already handled. DM ids
    // share the dedup key space with post URIs under a distinct prefix.
    if latest.sender.did == ctx.bot.did {
        return Ok(());
    }
    if ctx.dedup.mark_and_check(&format!("dm:{}", latest.id)) {
        return Ok(());
    }
    if latest.text.trim().is_empty() {
        return Ok(());
    }

    tracing::info!(message_id = %latest.id, "posting DM command from developer");

    if let Err(error) = ctx.social.mark_dm_read(&convo_id).await {
        tracing::warn!(%error, "could not mark DM conversation read");
    }

    match dispatch::post_chain(ctx, &latest.text).await {
        Ok(posted) if posted > 0 => {
            ctx.limits.wait_for_social().await;
            ctx.social
                .send_dm(&convo_id, "Post created successfully!")
                .await?;
        }
        Ok(_) => {
            tracing::warn!("DM command produced no postable text");
        }
        Err(error) => {
            tracing::error!(%error, "DM command post failed");
            let notice = format!("Error creating post: {error}");
            let notice: String = notice.chars().take(200).collect();
            ctx.limits.wait_for_social().await;
            ctx.social.send_dm(&convo_id, &notice).await?;
        }
    }

    Ok(())
}
