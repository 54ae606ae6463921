use std::future::Future;
use std::time::Duration;

/// Race a request against a delayed backup to a distinct peer.
///
/// The primary request is issued immediately. If it has not resolved
/// within `delay` and a backup channel is available, the same request is
/// issued on the backup and the first reply of either wins. Used on the
/// read path to tame tail latency of a slow or restarting peer; writes are
/// never hedged, as they are not idempotent at the transport layer.
pub async fn hedge<C, F, Fut, T, E>(
    primary: C,
    backup: Option<C>,
    delay: Duration,
    call: F,
) -> Result<T, E>
where
    F: Fn(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let Some(backup) = backup else {
        return call(primary).await;
    };

    let primary_call = call(primary);
    tokio::pin!(primary_call);

    tokio::select! {
        result = &mut primary_call => return result,
        () = tokio::time::sleep(delay) => {}
    }

    tracing::debug!(delay = ?delay, "request is slow, dispatching backup");
    let backup_call = call(backup);
    tokio::pin!(backup_call);

    tokio::select! {
        result = &mut primary_call => result,
        result = &mut backup_call => result,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn respond(
        address: &'static str,
        latency: Duration,
    ) -> Result<&'static str, &'static str> {
        tokio::time::sleep(latency).await;
        Ok(address)
    }

    #[tokio::test(start_paused = true)]
    async fn fast_primary_wins_without_hedging() {
        let result = hedge(
            "primary",
            Some("backup"),
            Duration::from_millis(100),
            |address| respond(address, Duration::from_millis(10)),
        )
        .await;
        assert_eq!(result, Ok("primary"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_loses_to_backup() {
        let result = hedge(
            "primary",
            Some("backup"),
            Duration::from_millis(100),
            |address| {
                let latency = if address == "primary" {
                    Duration::from_secs(10)
                } else {
                    Duration::from_millis(10)
                };
                respond(address, latency)
            },
        )
        .await;
        assert_eq!(result, Ok("backup"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_backup_degrades_to_a_plain_call() {
        let result = hedge("primary", None::<&str>, Duration::from_millis(1), |address| {
            respond(address, Duration::from_secs(5))
        })
        .await;
        assert_eq!(result, Ok("primary"));
    }
}
