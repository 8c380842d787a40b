use std::{sync::Arc, time::Duration};

use rustamix::{
    api::{EventKind, EventPriority},
    audio::{
        constants::{CHANNELS, FRAME_SIZE_SAMPLES},
        pcm,
    },
    common::{
        banner::{BannerInfo, print_banner},
        logger,
        types::{ChannelId, GuildId, PluginId},
    },
    configs::Config,
    voice::{AudioSendHandler, AudioSessionRegistry, LoopbackTransport, SourceProfile, TickDriver},
};
use tracing::{info, warn};

const DEMO_DURATION: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    print_banner(&BannerInfo::default());

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}, falling back to defaults");
            Config::default()
        }
    };
    logger::init(&config);

    let transport = Arc::new(LoopbackTransport::new());
    let registry = Arc::new(AudioSessionRegistry::new(
        transport.clone(),
        config.engine.clone(),
    ));

    let guild = GuildId::from("demo-guild");
    let plugin = PluginId::from("demo-plugin");

    registry.events().subscribe(
        EventKind::QueueOverflow,
        EventPriority::Monitor,
        None,
        |ctx| warn!("Queue overflow: {:?}", ctx.event()),
    );

    if !registry.join_voice_channel(&guild, ChannelId(1)).await {
        warn!("[{}] Could not join the demo channel", guild);
        return Ok(());
    }

    let handler = registry.mixing_send_handler();
    handler.add_audio_source_with("music", SourceProfile::new(100, 30)?);
    handler.add_audio_source_with("announce", SourceProfile::new(100, 90)?);
    registry.register_send_handler(&guild, &plugin, handler.clone(), 100, 50)?;

    let Some(session) = registry.session(&guild) else {
        warn!("[{}] Session vanished before playback", guild);
        return Ok(());
    };

    let (tx, rx) = flume::bounded(64);
    let driver = TickDriver::spawn(
        guild.to_string(),
        session as Arc<dyn AudioSendHandler>,
        Duration::from_millis(config.engine.tick_interval_ms),
        tx,
    );

    // Two seconds of music with a one-second announcement over the middle.
    let frames_per_second = 1000 / config.engine.tick_interval_ms.max(1);
    let producer = {
        let handler = handler.clone();
        let tick = Duration::from_millis(config.engine.tick_interval_ms);
        tokio::spawn(async move {
            let step = (FRAME_SIZE_SAMPLES / CHANNELS) as u64;
            let mut pace = tokio::time::interval(tick);
            for i in 0..frames_per_second * 2 {
                pace.tick().await;
                handler.queue_audio("music", pcm::tone(220.0, 8_000, i * step));
                if (frames_per_second / 2..frames_per_second * 3 / 2).contains(&i) {
                    handler.queue_audio("announce", pcm::tone(880.0, 6_000, i * step));
                }
            }
        })
    };

    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        while let Ok(frame) = rx.recv_async().await {
            received += 1;
            if received % 50 == 0 {
                info!("Consumed {} frames ({} bytes each)", received, frame.len());
            }
        }
        received
    });

    let _ = producer.await;
    info!(
        "Music registration at {:?}% effective volume, fading out",
        registry.get_effective_volume(&guild, &plugin)
    );
    registry.fade_volume(&guild, &plugin, 0, Duration::from_secs(1))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
        _ = tokio::time::sleep(DEMO_DURATION) => info!("Demo finished"),
    }

    driver.stop().await;
    registry.shutdown().await;
    let received = consumer.await.unwrap_or(0);
    info!(
        "Shut down after {} frames; transport closed {} connection(s)",
        received,
        transport.closed().len()
    );

    Ok(())
}
