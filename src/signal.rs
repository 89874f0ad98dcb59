//! Turning process signals into a shutdown request.

use tokio_util::sync::CancellationToken;

/// Cancel `shutdown` on the first termination signal.
pub fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait().await;
        tracing::info!(signal, "Shutting down");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait() -> &'static str {
    use tokio::signal::unix::signal;

    let mut streams = Vec::new();
    for (name, kind) in watched() {
        match signal(kind) {
            Ok(stream) => streams.push((name, stream)),
            Err(e) => tracing::warn!(signal = name, error = %e, "Could not listen for signal"),
        }
    }
    if streams.is_empty() {
        return fallback().await;
    }
    let waiting = streams.iter_mut().map(|(name, stream)| {
        let name = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    futures::future::select_all(waiting).await.0
}

#[cfg(unix)]
fn watched() -> [(&'static str, tokio::signal::unix::SignalKind); 5] {
    use tokio::signal::unix::SignalKind;

    // tokio has no named constructor for SIGABRT.
    const SIGABRT: i32 = 6;
    [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGHUP", SignalKind::hangup()),
        ("SIGQUIT", SignalKind::quit()),
        ("SIGABRT", SignalKind::from_raw(SIGABRT)),
    ]
}

#[cfg(not(unix))]
async fn wait() -> &'static str {
    fallback().await
}

async fn fallback() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C; only the feed ending will stop regsync");
            std::future::pending().await
        },
    }
}
