use clap::{App, Arg};
use pmb_avionics::hardware::sim::{simulated, LinkTransport, SimFlash};
use pmb_avionics::protocol::{ProtocolRx, UartReceiver};
use pmb_avionics::{AppContext, AppError, SystemConfig};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let matches = App::new("pmb")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🚀 Power management board firmware on simulated hardware")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON system configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address the radio link listens on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("period")
                .short("p")
                .long("period")
                .value_name("MS")
                .help("Telemetry log period in milliseconds")
                .takes_value(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Period must be a number of milliseconds".into()),
                }),
        )
        .arg(
            Arg::with_name("charger")
                .long("charger")
                .help("Start with the charger connected"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log at debug level"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => SystemConfig::load(Path::new(path))?,
        None => SystemConfig::default(),
    };
    if let Some(addr) = matches.value_of("listen") {
        config.radio_listen_addr = addr.to_string();
    }
    if let Some(period) = matches.value_of("period").and_then(|p| p.parse().ok()) {
        config.telemetry_period_ms = period;
    }
    if matches.is_present("verbose") {
        config.log_level = "debug".into();
    }

    tracing_subscriber::fmt().with_max_level(config.log_level()).init();

    let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut app = AppContext::new(config, Box::new(LinkTransport::new(frames_tx)))?;
    let (hardware, sim) = simulated(SimFlash::new());
    sim.battery.connect_charger(matches.is_present("charger"));
    app.init(hardware);

    let mut rx = app.protocol_rx();
    let listener = TcpListener::bind(&app.config().radio_listen_addr).await?;
    info!("📡 radio link listening on {}", app.config().radio_listen_addr);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => Some(accepted?),
            // Nobody is listening, so outbound frames are lost like on an unpaired radio.
            frame = frames_rx.recv() => match frame {
                Some(_) => None,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some((stream, addr)) = accepted else {
            continue;
        };

        info!("🔗 ground station connected: {}", addr);
        if let Err(e) = serve_link(stream, &mut rx, &mut frames_rx).await {
            warn!("link {} error: {}", addr, e);
        }
        let stats = rx.stats();
        info!(
            frames = stats.frames_queued,
            dropped = stats.frames_dropped,
            overflows = stats.overflows,
            "🔌 ground station {} disconnected",
            addr
        );
    }

    app.shutdown();
    info!("PMB stopped");
    Ok(())
}

/// Pumps bytes between one connected ground station and the board until the
/// peer hangs up.
async fn serve_link(
    mut stream: TcpStream,
    rx: &mut ProtocolRx,
    frames: &mut UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 256];
    loop {
        let event = tokio::select! {
            read = stream.read(&mut buffer) => LinkEvent::Read(read?),
            frame = frames.recv() => LinkEvent::Frame(frame),
        };
        match event {
            LinkEvent::Read(0) | LinkEvent::Frame(None) => return Ok(()),
            LinkEvent::Read(n) => {
                for &byte in &buffer[..n] {
                    rx.interrupt_rx_data(Ok(byte));
                }
            }
            LinkEvent::Frame(Some(frame)) => stream.write_all(&frame).await?,
        }
    }
}

enum LinkEvent {
    Read(usize),
    Frame(Option<Vec<u8>>),
}
