use pmb_avionics::command::{HeartbeatOpcode, ProtocolOpcode, TaskOpcode};
use pmb_avionics::config::PROTOCOL_TX_FRAME_SZ_BYTES;
use pmb_avionics::hardware::sim::LinkTransport;
use pmb_avionics::machines::RocketControlCommand;
use pmb_avionics::protocol::messages::*;
use pmb_avionics::protocol::*;
use pmb_avionics::tasks::{PmbProtocolTask, ProtocolRoutes};
use pmb_avionics::*;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    task: PmbProtocolTask,
    frames: UnboundedReceiver<Vec<u8>>,
    flight: CommandReceiver,
    watchdog: CommandReceiver,
    flash: CommandReceiver,
    telemetry: CommandReceiver,
}

fn harness() -> Harness {
    let (frames_tx, frames) = tokio::sync::mpsc::unbounded_channel();
    let sender = ProtocolSender::new(Node::Pmb, Box::new(LinkTransport::new(frames_tx)));

    let (flight_tx, flight) = command_queue(10);
    let (watchdog_tx, watchdog) = command_queue(10);
    let (flash_tx, flash) = command_queue(10);
    let (telemetry_tx, telemetry) = command_queue(10);
    let routes = ProtocolRoutes {
        flight: TaskHandle::from_sender("FlightTask", flight_tx),
        watchdog: TaskHandle::from_sender("WatchdogTask", watchdog_tx),
        flash: TaskHandle::from_sender("FlashTask", flash_tx),
        telemetry: TaskHandle::from_sender("TelemetryTask", telemetry_tx),
    };

    Harness {
        task: PmbProtocolTask::new(Node::Rcu, sender, routes),
        frames,
        flight,
        watchdog,
        flash,
        telemetry,
    }
}

impl Harness {
    fn nothing_routed(&mut self) -> bool {
        self.flight.receive().is_none()
            && self.watchdog.receive().is_none()
            && self.flash.receive().is_none()
            && self.telemetry.receive().is_none()
    }
}

/// Builds the packet command the receive path would queue for `msg`.
fn packet<T: Serialize>(id: MessageId, msg: &T) -> Command {
    let mut body = WriteBuffer::new();
    body.serialize(msg).unwrap();
    let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
    let frame = encode_frame(id, body.as_bytes(), &mut out).unwrap();
    let without_delimiter = &frame[..frame.len() - 1];
    Command::with_payload(
        CommandKind::Protocol,
        ProtocolOpcode::PacketReceived,
        Payload::from_slice(without_delimiter).unwrap(),
    )
}

fn control(source: Node, target: Node, seq: u32, body: ControlBody) -> Command {
    packet(
        MessageId::Control,
        &ControlMessage {
            source,
            target,
            source_sequence_num: seq,
            body: Some(body),
        },
    )
}

fn sys_ctrl(sys_cmd: SystemCommand, cmd_param: u32) -> Command {
    control(
        Node::Rcu,
        Node::Pmb,
        1,
        ControlBody::SysCtrl(SystemControl { sys_cmd, cmd_param }),
    )
}

fn decode_sent(mut frame: Vec<u8>) -> ControlMessage {
    assert_eq!(frame.pop(), Some(0));
    let frame = decode_frame(&mut frame).unwrap();
    assert_eq!(frame.message_id, MessageId::Control);
    decode_body(frame.body).unwrap()
}

#[tokio::test]
async fn test_ping_is_acked_once_with_echoed_sequence() {
    let mut h = harness();

    h.task.handle_command(control(Node::Rcu, Node::Pmb, 42, ControlBody::Ping)).await;

    let ack = decode_sent(h.frames.try_recv().unwrap());
    assert_eq!(ack.source, Node::Pmb);
    assert_eq!(ack.target, Node::Rcu);
    assert_eq!(
        ack.body,
        Some(ControlBody::Ack(AckNack {
            acking_msg_source: Node::Rcu,
            acking_sequence_num: 42,
        }))
    );

    // Exactly one frame goes out
    assert!(h.frames.try_recv().is_err());
    assert_eq!(h.task.stats().acks_sent, 1);
    assert!(h.nothing_routed());
}

#[tokio::test]
async fn test_misaddressed_messages_have_no_effect() {
    let mut h = harness();

    // Wrong target
    h.task.handle_command(control(Node::Rcu, Node::Dmb, 1, ControlBody::Ping)).await;
    // Wrong source
    h.task.handle_command(control(Node::Dmb, Node::Pmb, 2, ControlBody::Heartbeat)).await;
    // Broadcast target is not accepted either
    h.task
        .handle_command(packet(
            MessageId::Command,
            &CommandMessage {
                source: Node::Rcu,
                target: Node::Any,
                source_sequence_num: 3,
                command: Some(CommandBody::Pmb(PmbCommand {
                    command_enum: PmbCommandCode::RscAnyToAbort,
                })),
            },
        ))
        .await;

    assert!(h.frames.try_recv().is_err());
    assert!(h.nothing_routed());
    assert_eq!(h.task.stats().misaddressed, 3);
}

#[tokio::test]
async fn test_heartbeat_routes_to_watchdog() {
    let mut h = harness();

    h.task.handle_command(control(Node::Rcu, Node::Pmb, 5, ControlBody::Heartbeat)).await;

    let cmd = h.watchdog.receive().unwrap();
    assert_eq!(cmd.kind(), CommandKind::Heartbeat);
    assert_eq!(cmd.opcode(), u16::from(HeartbeatOpcode::RadioHeartbeatRequest));
    assert!(h.frames.try_recv().is_err());
}

#[tokio::test]
async fn test_pmb_commands_route_to_flight() {
    let mut h = harness();
    let command = |seq, code| {
        packet(
            MessageId::Command,
            &CommandMessage {
                source: Node::Rcu,
                target: Node::Pmb,
                source_sequence_num: seq,
                command: Some(CommandBody::Pmb(PmbCommand { command_enum: code })),
            },
        )
    };

    h.task.handle_command(command(1, PmbCommandCode::RscAnyToAbort)).await;
    h.task.handle_command(command(2, PmbCommandCode::RscAbortToPreLaunch)).await;

    let abort = h.flight.receive().unwrap();
    assert_eq!(abort.kind(), CommandKind::ControlAction);
    assert_eq!(abort.opcode(), u16::from(RocketControlCommand::AnyToAbort));
    let prelaunch = h.flight.receive().unwrap();
    assert_eq!(prelaunch.opcode(), u16::from(RocketControlCommand::AbortToPreLaunch));
    assert!(h.flight.receive().is_none());
}

#[tokio::test]
async fn test_commands_for_other_boards_are_ignored() {
    let mut h = harness();

    h.task
        .handle_command(packet(
            MessageId::Command,
            &CommandMessage {
                source: Node::Rcu,
                target: Node::Pmb,
                source_sequence_num: 9,
                command: Some(CommandBody::Dmb(DmbCommand { command_enum: 4 })),
            },
        ))
        .await;

    assert!(h.nothing_routed());
}

#[tokio::test]
async fn test_log_period_change_is_clamped_to_u16() {
    let mut h = harness();

    h.task.handle_command(sys_ctrl(SystemCommand::LogPeriodChange, 70_000)).await;
    h.task.handle_command(sys_ctrl(SystemCommand::LogPeriodChange, 250)).await;

    let clamped = h.telemetry.receive().unwrap();
    assert_eq!(clamped.kind(), CommandKind::TelemetryChangePeriod);
    assert_eq!(clamped.opcode(), 65534);
    assert_eq!(h.telemetry.receive().unwrap().opcode(), 250);
}

#[tokio::test]
async fn test_flash_erase_routes_only_to_flash() {
    let mut h = harness();

    h.task.handle_command(sys_ctrl(SystemCommand::CriticalFlashFullErase, 0)).await;

    let erase = h.flash.receive().unwrap();
    assert_eq!(erase.kind(), CommandKind::TaskSpecific);
    assert_eq!(erase.opcode(), u16::from(TaskOpcode::EraseAllFlash));
    assert!(h.nothing_routed());
    assert!(h.frames.try_recv().is_err());
}

#[tokio::test]
async fn test_flash_logging_toggles_route_to_flash() {
    let mut h = harness();

    h.task.handle_command(sys_ctrl(SystemCommand::FlashLogEnable, 0)).await;
    h.task.handle_command(sys_ctrl(SystemCommand::FlashLogDisable, 0)).await;

    assert_eq!(h.flash.receive().unwrap().opcode(), u16::from(TaskOpcode::FlashLogEnable));
    assert_eq!(h.flash.receive().unwrap().opcode(), u16::from(TaskOpcode::FlashLogDisable));
}

#[tokio::test]
#[should_panic(expected = "System reset requested!")]
async fn test_reset_request_halts() {
    let mut h = harness();
    h.task.handle_command(sys_ctrl(SystemCommand::Reset, 0)).await;
}

#[tokio::test]
async fn test_malformed_frames_are_counted_and_dropped() {
    let mut h = harness();

    let garbage = Command::with_payload(
        CommandKind::Protocol,
        ProtocolOpcode::PacketReceived,
        Payload::from_slice(&[0x03, 0x01, 0xFF]).unwrap(),
    );
    h.task.handle_command(garbage).await;

    // Valid frame, body is not a control message
    h.task.handle_command(packet(MessageId::Control, &[0xFFu8; 4])).await;

    assert_eq!(h.task.stats().malformed, 2);
    assert!(h.nothing_routed());
    assert!(h.frames.try_recv().is_err());
}

#[tokio::test]
async fn test_bytes_from_the_uart_reach_the_task() {
    let mut h = harness();
    let (protocol_tx, mut protocol_rx) = command_queue(10);
    let mut uart = ProtocolRx::new(protocol_tx.isr_sender());

    let mut body = WriteBuffer::new();
    body.serialize(&ControlMessage {
        source: Node::Rcu,
        target: Node::Pmb,
        source_sequence_num: 77,
        body: Some(ControlBody::Ping),
    })
    .unwrap();
    let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
    let frame = encode_frame(MessageId::Control, body.as_bytes(), &mut out).unwrap();

    // Line noise before the frame is flushed by the delimiter
    for &byte in [0x55u8, 0x00].iter().chain(frame) {
        uart.interrupt_rx_data(Ok(byte));
    }

    // The noise arrives as a frame of its own and is rejected by the task
    while let Some(cmd) = protocol_rx.receive() {
        h.task.handle_command(cmd).await;
    }
    assert_eq!(h.task.stats().malformed, 1);

    let ack = decode_sent(h.frames.try_recv().unwrap());
    assert_eq!(
        ack.body,
        Some(ControlBody::Ack(AckNack {
            acking_msg_source: Node::Rcu,
            acking_sequence_num: 77,
        }))
    );
    assert_eq!(uart.stats().frames_queued, 2);
}
