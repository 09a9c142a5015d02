//! Use case: deliver a scripted list of messages between nodes on one bus.
//!
//! # Flow
//!
//! ```text
//! validate config ─► build one SimonNode per [[nodes]] entry
//!                 ─► attach + bind each node, then park it (suspend)
//!                 ─► for every [[messages]] entry, in order:
//!                       resume sender and receiver
//!                       receiver thread: receive(), then park
//!                       sender thread:   send(to, text), then park
//!                 ─► report deliveries and per-node statistics
//! ```
//!
//! Parked nodes are taken out of the simulated bus scheduling, so only the
//! two nodes of the current message take part in a transfer and virtual time
//! is not held back by idle nodes.  Each node parks itself on its own thread
//! the moment its half of the transfer returns: a finished node that stays
//! runnable keeps the turn and its peer never completes.

use std::collections::HashMap;
use std::thread;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use simon_core::line::sim::{SimBus, SimError, SimLines};
use simon_core::{LinkError, NodeConfig, SessionStats, SimonNode};

use crate::infrastructure::storage::config::AppConfig;

/// Error type for a scripted exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("two nodes are named {0:?}")]
    DuplicateNode(String),

    #[error("message refers to unknown node {0:?}")]
    UnknownNode(String),

    #[error("node {0:?} cannot send a message to itself")]
    SelfAddressed(String),

    #[error("invalid configuration for node {node:?}: {source}")]
    Node {
        node: String,
        #[source]
        source: simon_core::ConfigError,
    },

    #[error("bus failure on node {node:?}: {source}")]
    Link {
        node: String,
        #[source]
        source: LinkError<SimError>,
    },

    #[error("thread of node {0:?} panicked")]
    NodePanicked(String),
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub from: String,
    pub to: String,
    pub sent: String,
    pub received: String,
    /// `true` when the text was cut to the payload capacity.
    pub truncated: bool,
}

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub address: u8,
    pub stats: SessionStats,
}

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeReport {
    pub deliveries: Vec<Delivery>,
    pub nodes: Vec<NodeReport>,
    /// Simulated bus time consumed, in microseconds.
    pub virtual_time_us: u64,
}

struct Participant {
    name: String,
    node: SimonNode<SimLines>,
}

/// Runs every message of `config` over `bus`, blocking until all of them are
/// delivered or a node fails.
///
/// # Errors
///
/// Configuration problems are reported before any node touches the bus.
/// Afterwards the first failing line operation aborts the exchange as
/// [`ExchangeError::Link`]; that is how a closed bus shows up.
pub fn run_exchange(config: &AppConfig, bus: &SimBus) -> Result<ExchangeReport, ExchangeError> {
    let index = index_nodes(config)?;
    let route = resolve_messages(config, &index)?;

    let mut participants = Vec::with_capacity(config.nodes.len());
    for entry in &config.nodes {
        let node_config = NodeConfig {
            address: entry.address,
            half_period_us: config.bus.half_period_us,
            payload_capacity: entry.payload_capacity.unwrap_or(config.bus.payload_capacity),
        };
        let node = SimonNode::with_config(node_config).map_err(|source| ExchangeError::Node {
            node: entry.name.clone(),
            source,
        })?;
        participants.push(Participant {
            name: entry.name.clone(),
            node,
        });
    }

    // Bind one node at a time: an attached node that is not parked holds the
    // turn, and a later bind on this thread would wait for it forever.
    for participant in &mut participants {
        participant
            .node
            .bind(bus.attach())
            .map_err(|source| ExchangeError::Link {
                node: participant.name.clone(),
                source,
            })?;
        park(&participant.node);
    }
    debug!(nodes = participants.len(), "nodes attached");

    let mut deliveries = Vec::with_capacity(route.len());
    for (message, &(from, to)) in config.messages.iter().zip(&route) {
        let (sender, receiver) = pair_mut(&mut participants, from, to);
        let truncated = message.text.len() > sender.node.frame().capacity();
        let received = deliver(sender, receiver, &message.text)?;
        info!(
            from = %message.from,
            to = %message.to,
            bytes = received.len(),
            "message exchanged"
        );
        deliveries.push(Delivery {
            from: message.from.clone(),
            to: message.to.clone(),
            truncated,
            sent: message.text.clone(),
            received,
        });
    }

    let nodes = participants
        .iter()
        .map(|p| NodeReport {
            name: p.name.clone(),
            address: p.node.address(),
            stats: *p.node.stats(),
        })
        .collect();

    Ok(ExchangeReport {
        deliveries,
        nodes,
        virtual_time_us: bus.now(),
    })
}

fn index_nodes(config: &AppConfig) -> Result<HashMap<&str, usize>, ExchangeError> {
    let mut index = HashMap::with_capacity(config.nodes.len());
    for (i, entry) in config.nodes.iter().enumerate() {
        if index.insert(entry.name.as_str(), i).is_some() {
            return Err(ExchangeError::DuplicateNode(entry.name.clone()));
        }
    }
    Ok(index)
}

fn resolve_messages(
    config: &AppConfig,
    index: &HashMap<&str, usize>,
) -> Result<Vec<(usize, usize)>, ExchangeError> {
    config
        .messages
        .iter()
        .map(|message| {
            let lookup = |name: &str| {
                index
                    .get(name)
                    .copied()
                    .ok_or_else(|| ExchangeError::UnknownNode(name.to_string()))
            };
            let from = lookup(&message.from)?;
            let to = lookup(&message.to)?;
            if from == to {
                return Err(ExchangeError::SelfAddressed(message.from.clone()));
            }
            Ok((from, to))
        })
        .collect()
}

/// Runs one transfer with the sender and the receiver on their own threads.
fn deliver(
    sender: &mut Participant,
    receiver: &mut Participant,
    text: &str,
) -> Result<String, ExchangeError> {
    let destination = receiver.node.address();
    unpark(&receiver.node);
    unpark(&sender.node);

    let (sent, received) = thread::scope(|scope| {
        let rx_node = &mut receiver.node;
        let tx_node = &mut sender.node;
        let rx = scope.spawn(move || {
            let result = rx_node.receive();
            park(rx_node);
            result
        });
        let tx = scope.spawn(move || {
            let result = tx_node.send(destination, text);
            park(tx_node);
            result
        });
        (tx.join(), rx.join())
    });

    sent.map_err(|_| ExchangeError::NodePanicked(sender.name.clone()))?
        .map_err(|source| ExchangeError::Link {
            node: sender.name.clone(),
            source,
        })?;
    received
        .map_err(|_| ExchangeError::NodePanicked(receiver.name.clone()))?
        .map_err(|source| ExchangeError::Link {
            node: receiver.name.clone(),
            source,
        })
}

fn park(node: &SimonNode<SimLines>) {
    if let Some(lines) = node.lines() {
        lines.suspend();
    }
}

fn unpark(node: &SimonNode<SimLines>) {
    if let Some(lines) = node.lines() {
        lines.resume();
    }
}

/// Mutable references to two distinct participants.
fn pair_mut(
    participants: &mut [Participant],
    a: usize,
    b: usize,
) -> (&mut Participant, &mut Participant) {
    debug_assert_ne!(a, b, "pair_mut needs two distinct indices");
    if a < b {
        let (head, tail) = participants.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = participants.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
