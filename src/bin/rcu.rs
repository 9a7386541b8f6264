use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use pmb_avionics::config::PROTOCOL_TX_FRAME_SZ_BYTES;
use pmb_avionics::protocol::messages::{
    CommandBody, CommandMessage, ControlBody, ControlMessage, PmbCommand, PmbCommandCode, SystemCommand,
    SystemControl, TelemetryBody, TelemetryMessage,
};
use pmb_avionics::protocol::{decode_body, decode_frame, encode_frame, MessageId, Node, WriteBuffer};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_ADDR: &str = "127.0.0.1:5400";

/// One decoded frame from the board.
#[derive(Debug, Serialize)]
#[serde(tag = "category")]
enum Received {
    Command(CommandMessage),
    Control(ControlMessage),
    Telemetry(TelemetryMessage),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("rcu")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🛰️  Radio control unit console for the PMB")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("addr")
                .short("a")
                .long("addr")
                .value_name("ADDR")
                .help("Radio link address of the board")
                .takes_value(true)
                .default_value(DEFAULT_ADDR)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("w")
                .long("listen")
                .value_name("MS")
                .help("How long to print replies after sending")
                .takes_value(true)
                .default_value("500")
                .global(true),
        )
        .arg(
            Arg::with_name("seq")
                .long("seq")
                .value_name("N")
                .help("Sequence number of the sent message")
                .takes_value(true)
                .default_value("1")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("🏓 Ping the board and wait for its ack"))
        .subcommand(SubCommand::with_name("heartbeat").about("💓 Send a radio heartbeat"))
        .subcommand(SubCommand::with_name("abort").about("🛑 Move the rocket to Abort from any state"))
        .subcommand(SubCommand::with_name("prelaunch").about("Return the rocket from Abort to PreLaunch"))
        .subcommand(
            SubCommand::with_name("reset").about("Reset the board").arg(
                Arg::with_name("confirm")
                    .long("confirm")
                    .help("Confirm the reset")
                    .required(true),
            ),
        )
        .subcommand(
            SubCommand::with_name("erase-flash").about("Erase all of the board's flash").arg(
                Arg::with_name("confirm")
                    .long("confirm")
                    .help("Confirm the erase")
                    .required(true),
            ),
        )
        .subcommand(SubCommand::with_name("log-enable").about("Enable flash logging"))
        .subcommand(SubCommand::with_name("log-disable").about("Disable flash logging"))
        .subcommand(
            SubCommand::with_name("log-period")
                .about("Change the telemetry log period")
                .arg(
                    Arg::with_name("ms")
                        .help("New period in milliseconds")
                        .required(true)
                        .validator(|v| match v.parse::<u32>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Period must be a number of milliseconds".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("monitor").about("📈 Print everything the board sends"))
        .get_matches();

    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDR);
    let json = matches.value_of("format") == Some("json");
    let listen_ms = matches.value_of("listen").and_then(|v| v.parse().ok()).unwrap_or(500);
    let seq = matches.value_of("seq").and_then(|v| v.parse().ok()).unwrap_or(1);

    let mut stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to the board at {}", "❌".red(), addr.bright_white());
            eprintln!("{} Start it with: {}", "💡".yellow(), "cargo run --bin pmb".bright_cyan());
            return Err(e.into());
        }
    };

    let listen = match matches.subcommand() {
        ("monitor", _) => None,
        (name, sub) => {
            let (id, body) = build_message(name, sub, seq)?;
            let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
            let frame = encode_frame(id, body.as_bytes(), &mut out)?;
            stream.write_all(frame).await?;
            if !json {
                println!("{} {} (seq {})", "➡️ ".bright_blue(), name.bright_white().bold(), seq);
            }
            Some(Duration::from_millis(listen_ms))
        }
    };

    print_replies(&mut stream, listen, json).await
}

fn build_message(
    name: &str,
    sub: Option<&ArgMatches<'_>>,
    seq: u32,
) -> Result<(MessageId, WriteBuffer), Box<dyn std::error::Error>> {
    let control = |body: ControlBody| ControlMessage {
        source: Node::Rcu,
        target: Node::Pmb,
        source_sequence_num: seq,
        body: Some(body),
    };
    let sys = |sys_cmd: SystemCommand, cmd_param: u32| control(ControlBody::SysCtrl(SystemControl { sys_cmd, cmd_param }));
    let command = |code: PmbCommandCode| CommandMessage {
        source: Node::Rcu,
        target: Node::Pmb,
        source_sequence_num: seq,
        command: Some(CommandBody::Pmb(PmbCommand { command_enum: code })),
    };

    let mut buffer = WriteBuffer::new();
    let id = match name {
        "ping" => {
            buffer.serialize(&control(ControlBody::Ping))?;
            MessageId::Control
        }
        "heartbeat" => {
            buffer.serialize(&control(ControlBody::Heartbeat))?;
            MessageId::Control
        }
        "abort" => {
            buffer.serialize(&command(PmbCommandCode::RscAnyToAbort))?;
            MessageId::Command
        }
        "prelaunch" => {
            buffer.serialize(&command(PmbCommandCode::RscAbortToPreLaunch))?;
            MessageId::Command
        }
        "reset" => {
            buffer.serialize(&sys(SystemCommand::Reset, 0))?;
            MessageId::Control
        }
        "erase-flash" => {
            buffer.serialize(&sys(SystemCommand::CriticalFlashFullErase, 0))?;
            MessageId::Control
        }
        "log-enable" => {
            buffer.serialize(&sys(SystemCommand::FlashLogEnable, 0))?;
            MessageId::Control
        }
        "log-disable" => {
            buffer.serialize(&sys(SystemCommand::FlashLogDisable, 0))?;
            MessageId::Control
        }
        "log-period" => {
            let ms = sub.and_then(|m| m.value_of("ms")).and_then(|v| v.parse().ok()).unwrap_or(0);
            buffer.serialize(&sys(SystemCommand::LogPeriodChange, ms))?;
            MessageId::Control
        }
        other => return Err(format!("unknown command {}", other).into()),
    };
    Ok((id, buffer))
}

/// Prints decoded frames until `listen` runs out, or forever when it is `None`.
async fn print_replies(
    stream: &mut TcpStream,
    listen: Option<Duration>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = listen.map(|d| tokio::time::Instant::now() + d);
    let mut pending: Vec<u8> = Vec::new();
    let mut buffer = [0u8; 512];

    loop {
        let n = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, stream.read(&mut buffer)).await {
                Ok(read) => read?,
                Err(_) => return Ok(()),
            },
            None => stream.read(&mut buffer).await?,
        };
        if n == 0 {
            println!("{}", "Board closed the link".yellow());
            return Ok(());
        }

        for &byte in &buffer[..n] {
            if byte != 0 {
                pending.push(byte);
                continue;
            }
            if !pending.is_empty() {
                match decode(&mut pending) {
                    Ok(received) => print_received(&received, json)?,
                    Err(e) => eprintln!("{} {}", "⚠️  dropped frame:".yellow(), e),
                }
            }
            pending.clear();
        }
    }
}

fn decode(raw: &mut [u8]) -> Result<Received, pmb_avionics::protocol::ProtocolError> {
    let frame = decode_frame(raw)?;
    Ok(match frame.message_id {
        MessageId::Command => Received::Command(decode_body(frame.body)?),
        MessageId::Control => Received::Control(decode_body(frame.body)?),
        MessageId::Telemetry => Received::Telemetry(decode_body(frame.body)?),
        MessageId::Invalid => {
            return Err(pmb_avionics::protocol::ProtocolError::MalformedBody("MessageId::Invalid"))
        }
    })
}

fn print_received(received: &Received, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(received)?);
        return Ok(());
    }

    match received {
        Received::Control(msg) => match &msg.body {
            Some(ControlBody::Ack(ack)) => println!(
                "{} {} seq {} from {:?}",
                "✅".green(),
                "ACK".bright_green(),
                ack.acking_sequence_num,
                msg.source
            ),
            Some(ControlBody::Nack(nack)) => println!(
                "{} {} seq {} from {:?}",
                "❌".red(),
                "NACK".bright_red(),
                nack.acking_sequence_num,
                msg.source
            ),
            Some(ControlBody::Heartbeat) => println!("{} {}", "💓".red(), "heartbeat".dimmed()),
            Some(ControlBody::SysState(state)) => println!(
                "{} {:<16} rocket {}",
                "📊".bright_blue(),
                format!("{:?}", state.sys_state).bright_white(),
                format!("{:?}", state.rocket_state).bright_cyan()
            ),
            other => println!("{} {:?}", "control".dimmed(), other),
        },
        Received::Telemetry(msg) => match &msg.body {
            Some(TelemetryBody::BatteryStatus(battery)) => {
                let voltage = format!("{:>5}mV", battery.pack_voltage_mv);
                println!(
                    "{} {:<14} {} {:>6}mA {:>3}%",
                    "🔋".bright_yellow(),
                    format!("{:?}", battery.state).bright_white(),
                    if battery.pack_voltage_mv > 6800 { voltage.green() } else { voltage.yellow() },
                    battery.current_ma,
                    battery.state_of_charge
                );
            }
            Some(TelemetryBody::ValveStatus(valves)) => {
                let flag = |open: bool| if open { "OPEN".bright_red() } else { "SHUT".bright_green() };
                println!(
                    "🔧 vent {} drain {} mev {} power {}",
                    flag(valves.vent_open),
                    flag(valves.drain_open),
                    flag(valves.mev_open),
                    if valves.internal_power { "INTERNAL".bright_yellow() } else { "UMBILICAL".bright_cyan() }
                );
            }
            None => println!("{}", "empty telemetry".dimmed()),
        },
        Received::Command(msg) => println!("{} {:?}", "command".dimmed(), msg),
    }
    Ok(())
}
