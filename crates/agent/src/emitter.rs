//! The producer side of a turn's output channel.

use crate::output::{OutputUnit, UnitBody};
use cairn_core::error::{Error, Result};
use chrono::Utc;
use std::future::Future;
use tokio::sync::mpsc;

/// Numbers units and pushes them into the bounded output channel.
///
/// The consumer cancels a turn by dropping its receiver. Every method that
/// can observe that returns [`Error::Cancelled`].
pub(crate) struct Emitter {
    tx: mpsc::Sender<OutputUnit>,
    next_seq: u64,
}

impl Emitter {
    pub(crate) fn new(tx: mpsc::Sender<OutputUnit>) -> Self {
        Self { tx, next_seq: 0 }
    }

    /// Send one unit, waiting for channel capacity.
    pub(crate) async fn emit(&mut self, body: UnitBody) -> Result<()> {
        let unit = OutputUnit {
            seq: self.next_seq,
            timestamp: Utc::now(),
            body,
        };
        self.tx.send(unit).await.map_err(|_| Error::Cancelled)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Fail fast if the consumer has gone away.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.tx.is_closed() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the consumer goes away first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.tx.closed() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn units_are_numbered_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut emitter = Emitter::new(tx);
        emitter.emit(UnitBody::Text { content: "a".into() }).await.unwrap();
        emitter.emit(UnitBody::Text { content: "b".into() }).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().seq, 0);
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(emitter.emitted(), 2);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels() {
        let (tx, rx) = mpsc::channel(4);
        let mut emitter = Emitter::new(tx);
        drop(rx);
        assert!(matches!(emitter.ensure_open(), Err(Error::Cancelled)));
        assert!(matches!(
            emitter.emit(UnitBody::InputControl { enabled: true }).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_races_against_closure() {
        let (tx, rx) = mpsc::channel(1);
        let emitter = Emitter::new(tx);
        let dropper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(rx);
        });
        let out = emitter.guard(tokio::time::sleep(Duration::from_secs(3600))).await;
        assert!(matches!(out, Err(Error::Cancelled)));
        dropper.await.unwrap();
    }

    #[tokio::test]
    async fn guard_passes_through_output() {
        let (tx, _rx) = mpsc::channel(1);
        let emitter = Emitter::new(tx);
        assert_eq!(emitter.guard(async { 7 }).await.unwrap(), 7);
    }
}
