//! The boundary to whatever actually carries voice packets.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::send::AudioSendHandler;
use crate::common::{
    errors::TransportError,
    types::{ChannelId, GuildId},
};

/// Connection control consumed by the session state machine.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn open_connection(
        &self,
        guild_id: &GuildId,
        channel_id: ChannelId,
    ) -> Result<(), TransportError>;

    async fn close_connection(&self, guild_id: &GuildId) -> Result<(), TransportError>;
}

/// In-process transport that only records what it was asked to do.
#[derive(Default)]
pub struct LoopbackTransport {
    opened: Mutex<Vec<(GuildId, ChannelId)>>,
    closed: Mutex<Vec<GuildId>>,
    live: Mutex<HashSet<GuildId>>,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    pub fn opened(&self) -> Vec<(GuildId, ChannelId)> {
        self.opened.lock().clone()
    }

    pub fn closed(&self) -> Vec<GuildId> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn open_connection(
        &self,
        guild_id: &GuildId,
        channel_id: ChannelId,
    ) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectFailed {
                channel: channel_id.0,
                reason: "loopback configured to fail".into(),
            });
        }
        self.opened.lock().push((guild_id.clone(), channel_id));
        self.live.lock().insert(guild_id.clone());
        Ok(())
    }

    async fn close_connection(&self, guild_id: &GuildId) -> Result<(), TransportError> {
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(TransportError::DisconnectFailed(
                "loopback configured to fail".into(),
            ));
        }
        if !self.live.lock().remove(guild_id) {
            return Err(TransportError::NotConnected);
        }
        self.closed.lock().push(guild_id.clone());
        Ok(())
    }
}

/// Frame counters of a running [`TickDriver`].
#[derive(Debug, Default)]
pub struct TickStats {
    pub frames_sent: AtomicU64,
    pub frames_nulled: AtomicU64,
}

/// Pulls one frame every interval from a handler and forwards it to a
/// channel, for transports that have no cadence of their own.
pub struct TickDriver {
    cancel_token: CancellationToken,
    stats: Arc<TickStats>,
    task: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        label: impl Into<String>,
        handler: Arc<dyn AudioSendHandler>,
        interval: Duration,
        sink: flume::Sender<Bytes>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let stats = Arc::new(TickStats::default());
        let task = tokio::spawn(tick_loop(
            label.into(),
            handler,
            interval,
            sink,
            stats.clone(),
            cancel_token.clone(),
        ));

        Self {
            cancel_token,
            stats,
            task: Some(task),
        }
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn tick_loop(
    label: String,
    handler: Arc<dyn AudioSendHandler>,
    interval: Duration,
    sink: flume::Sender<Bytes>,
    stats: Arc<TickStats>,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    debug!("[{}] Tick driver started", label);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = interval.tick() => {
                let Some(frame) = handler.provide_20ms_audio() else {
                    stats.frames_nulled.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                trace!("[{}] Tick produced {} bytes", label, frame.len());
                if sink.send_async(frame).await.is_err() {
                    debug!("[{}] Frame sink closed", label);
                    break;
                }
            }
        }
    }

    debug!(
        "[{}] Tick driver stopped (sent: {}, nulled: {})",
        label,
        stats.frames_sent.load(Ordering::Relaxed),
        stats.frames_nulled.load(Ordering::Relaxed)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::pcm::encode, voice::send::BasicSendHandler};

    #[tokio::test]
    async fn test_loopback_records_and_fails_on_request() {
        let transport = LoopbackTransport::new();
        let guild = GuildId::from("g");

        assert!(transport.open_connection(&guild, ChannelId(5)).await.is_ok());
        assert_eq!(transport.opened(), vec![(guild.clone(), ChannelId(5))]);

        transport.fail_close(true);
        assert!(matches!(
            transport.close_connection(&guild).await,
            Err(TransportError::DisconnectFailed(_))
        ));
        assert!(transport.closed().is_empty());

        transport.fail_close(false);
        assert!(transport.close_connection(&guild).await.is_ok());
        assert_eq!(
            transport.close_connection(&guild).await,
            Err(TransportError::NotConnected)
        );
        assert_eq!(transport.closed(), vec![guild.clone()]);

        transport.fail_open(true);
        assert!(transport.open_connection(&guild, ChannelId(6)).await.is_err());
    }

    #[tokio::test]
    async fn test_tick_driver_forwards_frames() {
        let handler = Arc::new(BasicSendHandler::default());
        handler.queue_audio(encode(&[1, 2]));
        handler.queue_audio(encode(&[3, 4]));

        let (tx, rx) = flume::unbounded();
        let driver = TickDriver::spawn("test", handler, Duration::from_millis(20), tx);

        assert_eq!(rx.recv_async().await.unwrap(), encode(&[1, 2]));
        assert_eq!(rx.recv_async().await.unwrap(), encode(&[3, 4]));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(driver.stats().frames_sent.load(Ordering::Relaxed), 2);
        assert!(driver.stats().frames_nulled.load(Ordering::Relaxed) > 0);
        assert!(driver.is_running());
        driver.stop().await;
        assert!(rx.try_recv().is_err());
    }
}
