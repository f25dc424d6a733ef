/// Signal handling for graceful shutdown.
///
/// Handles SIGINT (Ctrl-C), SIGTERM and SIGQUIT. The streams stay registered
/// for the life of the handler, so a second signal during shutdown is seen
/// rather than swallowed.
/// First signal: let any in-flight build cycle finish, then stop the app.
/// Second signal: abort the cycle and kill its challenger immediately.
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct ShutdownSignals {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next shutdown signal and name it.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal as NixSignal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_signal_is_still_delivered() {
        let mut signals = ShutdownSignals::install().unwrap();

        raise(NixSignal::SIGQUIT).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .expect("first signal");
        assert_eq!(first, "SIGQUIT");

        raise(NixSignal::SIGQUIT).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .expect("second signal");
        assert_eq!(second, "SIGQUIT");
    }
}
