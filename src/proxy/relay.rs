//! In-process connection relay.
//!
//! A relay is a listener without a socket: the CONNECT handler pushes hijacked
//! connections into it and the intercept server accepts them like any other
//! listener. Connections come out in the order they went in.
//!
//! Closing the relay is idempotent. After close, `send` hands the connection
//! back to the caller and `accept` reports end of stream; connections still
//! queued at that point are dropped with the listener.

use super::error::ProxyError;
use super::listener::Listener;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Create a connected relay sender and listener pair.
pub fn channel<C>() -> (RelaySender<C>, ChannelListener<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed = Arc::new(closed_tx);

    let sender = RelaySender {
        tx,
        closed: Arc::clone(&closed),
    };
    let listener = ChannelListener {
        rx,
        closed,
        closed_rx,
    };
    (sender, listener)
}

/// Producer side of a relay. Cheap to clone.
pub struct RelaySender<C> {
    tx: mpsc::UnboundedSender<C>,
    closed: Arc<watch::Sender<bool>>,
}

/// Consumer side of a relay.
pub struct ChannelListener<C> {
    rx: mpsc::UnboundedReceiver<C>,
    closed: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

/// Placeholder address reported for relayed connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayAddr;

impl fmt::Display for RelayAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("relay")
    }
}

/// Returned by [`RelaySender::send`] when the relay is closed.
///
/// Carries the rejected connection so the caller decides how to drop it.
pub struct RelayClosed<C>(pub C);

impl<C> RelayClosed<C> {
    /// Take back the connection that could not be delivered.
    pub fn into_inner(self) -> C {
        self.0
    }
}

impl<C> fmt::Debug for RelayClosed<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RelayClosed(..)")
    }
}

impl<C> fmt::Display for RelayClosed<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("relay is closed")
    }
}

impl<C> std::error::Error for RelayClosed<C> {}

impl<C> From<RelayClosed<C>> for ProxyError {
    fn from(_: RelayClosed<C>) -> Self {
        ProxyError::RelayClosed
    }
}

fn relay_closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "relay closed")
}

/// Mark the relay closed. Returns true if this call performed the close.
fn close_flag(closed: &watch::Sender<bool>) -> bool {
    !closed.send_replace(true)
}

impl<C> Clone for RelaySender<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<C> RelaySender<C> {
    /// Enqueue a connection for the listener.
    ///
    /// Never blocks. Fails only when the relay has been closed.
    pub fn send(&self, conn: C) -> Result<(), RelayClosed<C>> {
        if *self.closed.borrow() {
            return Err(RelayClosed(conn));
        }
        self.tx
            .send(conn)
            .map_err(|mpsc::error::SendError(conn)| RelayClosed(conn))
    }

    /// Close the relay.
    pub fn close(&self) -> bool {
        close_flag(&self.closed)
    }

    /// Whether the relay has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl<C> ChannelListener<C> {
    /// Wait for the next relayed connection.
    ///
    /// Returns an `UnexpectedEof` error once the relay is closed, including
    /// when close happens while waiting.
    pub async fn accept(&mut self) -> io::Result<C> {
        if *self.closed_rx.borrow_and_update() {
            return Err(relay_closed());
        }

        tokio::select! {
            biased;
            _ = self.closed_rx.changed() => Err(relay_closed()),
            conn = self.rx.recv() => conn.ok_or_else(relay_closed),
        }
    }

    /// Close the relay from the listener side.
    pub fn close(&self) -> bool {
        close_flag(&self.closed)
    }

    /// Placeholder address of the relay.
    pub fn local_addr(&self) -> RelayAddr {
        RelayAddr
    }
}

impl<C> Listener for ChannelListener<C>
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    type Io = C;
    type Addr = RelayAddr;

    async fn accept(&mut self) -> io::Result<(C, RelayAddr)> {
        let conn = ChannelListener::accept(self).await?;
        Ok((conn, RelayAddr))
    }

    fn local_addr(&self) -> io::Result<RelayAddr> {
        Ok(RelayAddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel::<u32>();
        for i in 0..10 {
            tx.send(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx.accept().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_returns_connection() {
        let (tx, _rx) = channel::<String>();
        assert!(tx.close());
        let err = tx.send("conn".to_string()).unwrap_err();
        assert_eq!(err.into_inner(), "conn");

        let err = ProxyError::from(tx.send("again".to_string()).unwrap_err());
        assert!(matches!(err, ProxyError::RelayClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, rx) = channel::<u32>();
        assert!(!tx.is_closed());
        assert!(rx.close());
        assert!(!tx.close());
        assert!(!rx.close());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_accept() {
        let (tx, mut rx) = channel::<u32>();
        let waiter = tokio::spawn(async move { rx.accept().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_accept_after_close_with_queued_items() {
        let (tx, mut rx) = channel::<u32>();
        tx.send(1).unwrap();
        tx.close();
        assert_eq!(
            rx.accept().await.unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let (tx, mut rx) = channel::<usize>();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move { tx.send(i).unwrap() }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(rx.accept().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_relay_addr() {
        let (_tx, rx) = channel::<u32>();
        assert_eq!(rx.local_addr().to_string(), "relay");
    }
}
