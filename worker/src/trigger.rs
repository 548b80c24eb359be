use tokio::sync::watch;

/// One-shot broadcast signal: fires exactly once, observable by any number of
/// watchers, and remembers that it fired.
///
/// Used for a job's done signal and for an output reader's close signal.
#[derive(Debug)]
pub(crate) struct Trigger {
    tx: watch::Sender<bool>,
}

impl Trigger {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Watch side of a [`Trigger`].
#[derive(Clone, Debug)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Whether the signal has fired.
    pub fn fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // an Err means the trigger was dropped, which can only happen after
        // the owning job is gone; treat it the same as fired
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_after_fire() {
        let trigger = Trigger::new();
        let signal = trigger.watch();
        assert!(!signal.fired());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait().await }
        });

        trigger.fire();
        waiter.await.expect("waiter");
        assert!(signal.fired());
        assert!(trigger.fired());
    }

    #[tokio::test]
    async fn firing_twice_is_harmless() {
        let trigger = Trigger::new();
        trigger.fire();
        trigger.fire();
        let signal = trigger.watch();
        signal.wait().await;
        assert!(signal.fired());
    }
}
