use pmb_avionics::command::{HeartbeatOpcode, TaskOpcode};
use pmb_avionics::hardware::sim::LinkTransport;
use pmb_avionics::machines::RocketControlCommand;
use pmb_avionics::protocol::messages::{ControlBody, ControlMessage};
use pmb_avionics::protocol::{decode_body, decode_frame, Node, ProtocolSender};
use pmb_avionics::tasks::WatchdogTask;
use pmb_avionics::*;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_millis(15_000);

fn watchdog() -> (WatchdogTask, CommandReceiver, UnboundedReceiver<Vec<u8>>) {
    let (frames_tx, frames) = tokio::sync::mpsc::unbounded_channel();
    let sender = ProtocolSender::new(Node::Pmb, Box::new(LinkTransport::new(frames_tx)));
    let (flight_tx, flight) = command_queue(10);
    let task = WatchdogTask::new(
        TIMEOUT,
        Duration::from_millis(500),
        TaskHandle::from_sender("FlightTask", flight_tx),
        Node::Rcu,
        sender,
    );
    (task, flight, frames)
}

fn heartbeat() -> Command {
    Command::new(CommandKind::Heartbeat, HeartbeatOpcode::RadioHeartbeatRequest)
}

#[tokio::test]
async fn test_no_abort_before_first_heartbeat() {
    let (mut wd, mut flight, _frames) = watchdog();
    let start = Instant::now();

    assert!(!wd.check_heartbeat(start + TIMEOUT * 4).await);
    assert!(flight.receive().is_none());
}

#[tokio::test]
async fn test_heartbeat_loss_sends_one_abort() {
    let (mut wd, mut flight, _frames) = watchdog();
    let start = Instant::now();

    wd.handle_command(heartbeat(), start);
    assert_eq!(wd.heartbeats(), 1);

    // Still within the timeout
    assert!(!wd.check_heartbeat(start + TIMEOUT / 2).await);
    assert!(flight.receive().is_none());

    // Lost
    assert!(wd.check_heartbeat(start + TIMEOUT).await);
    let abort = flight.receive().unwrap();
    assert_eq!(abort.kind(), CommandKind::ControlAction);
    assert_eq!(abort.opcode(), u16::from(RocketControlCommand::AnyToAbort));

    // Only once per loss
    assert!(!wd.check_heartbeat(start + TIMEOUT * 2).await);
    assert!(flight.receive().is_none());
}

#[tokio::test]
async fn test_regained_heartbeat_rearms_abort() {
    let (mut wd, mut flight, _frames) = watchdog();
    let start = Instant::now();

    wd.handle_command(heartbeat(), start);
    assert!(wd.check_heartbeat(start + TIMEOUT).await);
    assert!(flight.receive().is_some());

    let regained = start + TIMEOUT * 2;
    wd.handle_command(heartbeat(), regained);
    assert!(!wd.check_heartbeat(regained + TIMEOUT / 2).await);
    assert!(wd.check_heartbeat(regained + TIMEOUT).await);
    assert!(flight.receive().is_some());
}

#[tokio::test]
async fn test_heartbeat_status_request_sends_heartbeat_to_peer() {
    let (mut wd, mut flight, mut frames) = watchdog();

    wd.handle_command(
        Command::new(CommandKind::TaskSpecific, TaskOpcode::HeartbeatStatusSend),
        Instant::now(),
    );

    let mut frame = frames.try_recv().unwrap();
    assert_eq!(frame.pop(), Some(0));
    let frame = decode_frame(&mut frame).unwrap();
    let msg: ControlMessage = decode_body(frame.body).unwrap();
    assert_eq!(msg.source, Node::Pmb);
    assert_eq!(msg.target, Node::Rcu);
    assert_eq!(msg.body, Some(ControlBody::Heartbeat));

    // Not a radio heartbeat, so the watchdog stays unarmed
    assert_eq!(wd.heartbeats(), 0);
    assert!(flight.receive().is_none());
}
