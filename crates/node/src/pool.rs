//! This module implements concurrent handling of regtest nodes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use tracing::{error, info};

use crate::{Error, Node};

/// The node pool starts one or more [Node]s concurrently, which can then be handed out in a
/// round robin fashion.
pub struct NodePool<T> {
    next: AtomicUsize,
    nodes: Vec<Arc<T>>,
}

impl<T> NodePool<T>
where
    T: Node + Send + Sync + 'static,
{
    /// Starts every node on its own thread and waits for all of them.
    ///
    /// If any node fails to start, every node is disposed and the first failure is returned.
    pub fn spawn(nodes: Vec<T>) -> anyhow::Result<Self> {
        anyhow::ensure!(!nodes.is_empty(), "A node pool needs at least one node");

        let nodes = nodes.into_iter().map(Arc::new).collect::<Vec<_>>();
        let handles = nodes
            .iter()
            .map(|node| {
                let node = node.clone();
                thread::spawn(move || spawn_node(node.as_ref()))
            })
            .collect::<Vec<_>>();

        let mut failure = None;
        for handle in handles {
            let result = handle
                .join()
                .map_err(|error| anyhow::anyhow!("failed to spawn node: {:?}", error))
                .and_then(|result| {
                    result.map_err(|error| anyhow::anyhow!("node failed to spawn: {error}"))
                });
            if let Err(error) = result {
                failure.get_or_insert(error);
            }
        }

        if let Some(failure) = failure {
            for node in &nodes {
                if let Err(error) = node.dispose() {
                    error!(node_id = node.id(), %error, "Failed to dispose of a pooled node");
                }
            }
            return Err(failure);
        }

        Ok(Self {
            nodes,
            next: Default::default(),
        })
    }

    /// Get a handle to the next node.
    pub fn round_robin(&self) -> &T {
        let current = self.next.fetch_add(1, Ordering::SeqCst) % self.nodes.len();
        &self.nodes[current]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stops every node, returning the first failure after all of them were attempted.
    pub fn stop_all(&self) -> Result<(), Error> {
        let mut failure = None;
        for node in &self.nodes {
            if let Err(error) = node.stop() {
                error!(node_id = node.id(), %error, "Failed to stop a pooled node");
                failure.get_or_insert(error);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

fn spawn_node<T: Node>(node: &T) -> Result<(), Error> {
    info!("starting node: {}", node.connection_string());
    node.start()
}
