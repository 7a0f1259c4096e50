use clap::Parser;
use client::game::RemotePlayers;
use client::input::{FireTrigger, OrbitPath, PoseSource};
use client::network::{NetworkPump, PumpConfig};
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless pose relay client", long_about = None)]
struct Args {
    /// Relay server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Relay server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Interval between pose transmissions in milliseconds
    #[arg(long, default_value_t = shared::DEFAULT_SEND_INTERVAL_MS)]
    send_interval_ms: u64,

    /// Simulation frames per second
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Fire every N frames (0 disables firing)
    #[arg(long, default_value = "120")]
    fire_every: u32,

    /// Stop after this many frames (0 runs until the connection ends)
    #[arg(long, default_value = "0")]
    frames: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let config = PumpConfig {
        send_interval: Duration::from_millis(args.send_interval_ms.max(1)),
        ..PumpConfig::default()
    };
    let pump = Arc::new(NetworkPump::new(runtime.handle().clone(), config));
    let mut players = RemotePlayers::new();
    let mut path = OrbitPath::new(5.0, 1.5);
    let mut trigger = FireTrigger::new(Arc::clone(&pump), args.fire_every);

    info!("Starting client...");
    pump.connect(&args.host, args.port)?;

    let frame_time = Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1)));
    let mut frame: u64 = 0;

    while args.frames == 0 || frame < args.frames {
        let started = Instant::now();

        pump.pump_deferred_actions(&mut players);
        if players.connection_ended() {
            break;
        }
        for event in players.take_fire_events() {
            info!("{} fired from {}", event.id, event.position);
        }

        path.advance();
        let pose = path.local_pose();
        pump.set_local_pose(pose.position, pose.rotation);
        trigger.tick(&path);

        frame += 1;
        if frame % u64::from(args.fps.max(1)) == 0 {
            info!(
                "State: {}, {} remote players, {} shots",
                pump.state(),
                players.len(),
                trigger.shots()
            );
        }

        if let Some(remaining) = frame_time.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    pump.disconnect();
    info!("Client stopped after {} frames", frame);
    Ok(())
}
