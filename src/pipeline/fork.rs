use tokio::sync::mpsc;

/// Outputs of [`fork`]: items the predicate matched and items it did not.
pub struct ForkOutputs<T> {
    pub matched: mpsc::UnboundedReceiver<T>,
    pub unmatched: mpsc::UnboundedReceiver<T>,
}

/// Routes every item from `input` to one of two outputs. The predicate is
/// evaluated exactly once per item (stateful predicates are fine); items pass
/// through unmodified. There is no ordering guarantee across the two outputs.
/// When `input` closes, the routing task ends and both outputs close after
/// any in-flight items are delivered.
pub fn fork<T, P>(mut input: mpsc::UnboundedReceiver<T>, mut predicate: P) -> ForkOutputs<T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    let (matched_tx, matched_rx) = mpsc::unbounded_channel();
    let (unmatched_tx, unmatched_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(item) = input.recv().await {
            let sent = if predicate(&item) {
                matched_tx.send(item)
            } else {
                unmatched_tx.send(item)
            };
            if sent.is_err() {
                // Receiver gone; nothing left to route to.
                break;
            }
        }
    });

    ForkOutputs {
        matched: matched_rx,
        unmatched: unmatched_rx,
    }
}
