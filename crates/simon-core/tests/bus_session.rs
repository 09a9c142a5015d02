//! End-to-end session tests over the simulated bus.
//!
//! # Purpose
//!
//! Every test attaches real [`SimonNode`]s to one [`SimBus`], runs each node
//! on its own thread and checks what the application layer would observe:
//!
//! - The happy path: a message arrives intact and the sender returns only
//!   after the accept byte.
//! - Corruption: a flipped bit on the wire is answered with a rejection and
//!   the sender retransmits the same frame until it is accepted.
//! - Addressing: a bystander decodes the frame but never answers it.
//! - Truncation, empty payloads and a two-way exchange.
//!
//! # Thread layout
//!
//! ```text
//! main thread                 node threads
//! ───────────                 ────────────
//! bus.attach() per node  ──►  bind, send/receive, return stats
//! join                   ◄──  (lines dropped → participant detached)
//! ```

use std::thread::{self, JoinHandle};

use simon_core::line::sim::{SimBus, SimConfig, SimError, SimLines};
use simon_core::{
    Checksum, Direction, Level, Line, LineInterface, LinkError, NodeConfig, SessionStats,
    SimonNode,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn bus() -> SimBus {
    SimBus::new(SimConfig::default().with_deadline(2_000_000))
}

/// Binds a node to freshly attached lines and runs `job` on its own thread.
fn spawn_node<L, F, R>(lines: L, config: NodeConfig, job: F) -> JoinHandle<(R, SessionStats)>
where
    L: LineInterface + Send + 'static,
    L::Error: Send,
    F: FnOnce(&mut SimonNode<L>) -> R + Send + 'static,
    R: Send + 'static,
{
    thread::spawn(move || {
        let mut node = SimonNode::with_config(config).expect("valid config");
        node.bind(lines).expect("bind");
        let result = job(&mut node);
        (result, *node.stats())
    })
}

/// Inverts one DATA write, counted from the first write on the lines.
///
/// Also keeps the DATA levels the node asked for, one list per frame: a new
/// list starts whenever DATA is switched to output.
struct Tamper<L> {
    inner: L,
    data_writes: usize,
    flip_at: usize,
    frames: Vec<Vec<Level>>,
}

impl<L> Tamper<L> {
    fn new(inner: L, flip_at: usize) -> Self {
        Self {
            inner,
            data_writes: 0,
            flip_at,
            frames: Vec::new(),
        }
    }
}

impl<L: LineInterface> LineInterface for Tamper<L> {
    type Error = L::Error;

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), Self::Error> {
        if line == Line::Data && direction == Direction::Output {
            self.frames.push(Vec::new());
        }
        self.inner.set_direction(line, direction)
    }

    fn write_level(&mut self, line: Line, level: Level) -> Result<(), Self::Error> {
        if line == Line::Data {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(level);
            }
            self.data_writes += 1;
            if self.data_writes == self.flip_at {
                return self.inner.write_level(line, !level);
            }
        }
        self.inner.write_level(line, level)
    }

    fn read_level(&mut self, line: Line) -> Result<Level, Self::Error> {
        self.inner.read_level(line)
    }

    fn delay_us(&mut self, us: u32) -> Result<(), Self::Error> {
        self.inner.delay_us(us)
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

/// A(5) sends "PING" to B(9); B returns the text and A sees the accept byte.
#[test]
fn test_ping_is_delivered_and_acknowledged() {
    // Arrange
    let bus = bus();
    let sender = spawn_node(bus.attach(), NodeConfig::new(5), |node| node.send(9, "PING"));
    let receiver = spawn_node(bus.attach(), NodeConfig::new(9), |node| {
        let text = node.receive();
        let checksum = node.frame().stored_checksum(4);
        (text, checksum)
    });

    // Act
    let (sent, sender_stats) = sender.join().unwrap();
    let ((received, checksum), receiver_stats) = receiver.join().unwrap();

    // Assert
    assert_eq!(sent, Ok(()));
    assert_eq!(received.as_deref(), Ok("PING"));
    assert_eq!(checksum, Checksum { sum1: 47, sum2: 1 });
    assert_eq!(sender_stats.frames_transmitted, 1);
    assert_eq!(sender_stats.acks_accepted, 1);
    assert_eq!(sender_stats.retransmissions, 0);
    assert_eq!(receiver_stats.frames_accepted, 1);
    assert_eq!(receiver_stats.frames_rejected, 0);
}

/// The first payload bit goes out inverted; B rejects, A retransmits the
/// identical frame and the second copy is accepted.
#[test]
fn test_corrupted_frame_is_rejected_then_retransmitted() {
    // Arrange – DATA writes: idle, start low, start high, then bit 7 of 'P'
    let bus = bus();
    let tampered = Tamper::new(bus.attach(), 4);
    let sender = spawn_node(tampered, NodeConfig::new(5), |node| {
        let sent = node.send(9, "PING");
        let frames = node.lines().map(|l| l.frames.clone()).unwrap_or_default();
        (sent, frames)
    });
    let receiver = spawn_node(bus.attach(), NodeConfig::new(9), |node| node.receive());

    // Act
    let ((sent, frames), sender_stats) = sender.join().unwrap();
    let (received, receiver_stats) = receiver.join().unwrap();

    // Assert
    assert_eq!(sent, Ok(()));
    assert_eq!(received.as_deref(), Ok("PING"));
    assert_eq!(receiver_stats.frames_rejected, 1);
    assert_eq!(receiver_stats.frames_accepted, 1);
    assert_eq!(sender_stats.frames_transmitted, 2);
    assert_eq!(sender_stats.retransmissions, 1);
    assert_eq!(sender_stats.acks_rejected, 1);
    assert_eq!(sender_stats.acks_accepted, 1);

    // idle, start pulse, 7 bytes of bits, park, stop pulse
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 1 + 2 + 7 * 8 + 1 + 2);
    assert_eq!(frames[0], frames[1], "retransmission must repeat the frame");
}

/// A bystander with another address decodes the frame, stays silent and
/// keeps listening until the bus deadline stops it.
#[test]
fn test_frame_for_another_address_is_ignored() {
    // Arrange
    let bus = SimBus::new(SimConfig::default().with_deadline(200_000));
    let sender = spawn_node(bus.attach(), NodeConfig::new(5), |node| node.send(9, "for B"));
    let receiver = spawn_node(bus.attach(), NodeConfig::new(9), |node| node.receive());
    let bystander = spawn_node(bus.attach(), NodeConfig::new(7), |node| node.receive());

    // Act
    let (sent, _) = sender.join().unwrap();
    let (received, _) = receiver.join().unwrap();
    let (overheard, bystander_stats) = bystander.join().unwrap();

    // Assert
    assert_eq!(sent, Ok(()));
    assert_eq!(received.as_deref(), Ok("for B"));
    assert_eq!(
        overheard,
        Err(LinkError::Line(SimError::DeadlineExceeded(200_000)))
    );
    assert!(bystander_stats.frames_ignored >= 1);
    assert_eq!(bystander_stats.frames_accepted, 0);
    assert_eq!(bystander_stats.frames_rejected, 0);
}

/// Text longer than the capacity arrives cut to the capacity.
#[test]
fn test_oversized_message_arrives_truncated() {
    // Arrange
    let text: String = ('a'..='z').cycle().take(150).collect();
    let expected = text[..100].to_string();
    let bus = bus();
    let sender = spawn_node(bus.attach(), NodeConfig::new(1), move |node| {
        node.send(2, &text)
    });
    let receiver = spawn_node(bus.attach(), NodeConfig::new(2), |node| node.receive());

    // Act
    let (sent, _) = sender.join().unwrap();
    let (received, receiver_stats) = receiver.join().unwrap();

    // Assert
    assert_eq!(sent, Ok(()));
    assert_eq!(received, Ok(expected));
    assert_eq!(receiver_stats.overflows, 0);
}

#[test]
fn test_empty_message_is_delivered() {
    let bus = bus();
    let sender = spawn_node(bus.attach(), NodeConfig::new(1), |node| node.send(2, ""));
    let receiver = spawn_node(bus.attach(), NodeConfig::new(2), |node| node.receive());

    let (sent, _) = sender.join().unwrap();
    let (received, _) = receiver.join().unwrap();

    assert_eq!(sent, Ok(()));
    assert_eq!(received.as_deref(), Ok(""));
}

/// Request and reply: each node sends once and receives once.
#[test]
fn test_two_way_exchange() {
    // Arrange
    let bus = bus();
    let a = spawn_node(bus.attach(), NodeConfig::new(5), |node| {
        node.send(9, "ONE")?;
        node.receive()
    });
    let b = spawn_node(bus.attach(), NodeConfig::new(9), |node| {
        let request = node.receive()?;
        node.send(5, "TWO")?;
        Ok::<_, LinkError<SimError>>(request)
    });

    // Act
    let (reply, a_stats) = a.join().unwrap();
    let (request, b_stats) = b.join().unwrap();

    // Assert
    assert_eq!(request.as_deref(), Ok("ONE"));
    assert_eq!(reply.as_deref(), Ok("TWO"));
    assert_eq!(a_stats.frames_transmitted, 1);
    assert_eq!(b_stats.frames_transmitted, 1);
}

/// Slower timing and a smaller buffer on both ends.
#[test]
fn test_custom_half_period_and_capacity() {
    let config = |address| NodeConfig {
        address,
        half_period_us: 120,
        payload_capacity: 16,
    };
    let bus = bus();
    let sender = spawn_node(bus.attach(), config(3), |node| node.send(4, "slow and short"));
    let receiver = spawn_node(bus.attach(), config(4), |node| node.receive());

    let (sent, _) = sender.join().unwrap();
    let (received, _) = receiver.join().unwrap();

    assert_eq!(sent, Ok(()));
    assert_eq!(received.as_deref(), Ok("slow and short"));
}

/// Closing the bus releases a receiver that would otherwise wait forever.
#[test]
fn test_close_aborts_blocked_receive() {
    // Arrange
    let bus = SimBus::default();
    let receiver = spawn_node(bus.attach(), NodeConfig::new(1), |node| node.receive());

    // Act
    thread::sleep(std::time::Duration::from_millis(20));
    bus.close();
    let (result, _): (Result<String, LinkError<SimError>>, _) = receiver.join().unwrap();

    // Assert
    assert_eq!(result, Err(LinkError::Line(SimError::Closed)));
}

#[test]
fn test_sim_lines_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<SimLines>();
    assert_send::<SimonNode<SimLines>>();
}
