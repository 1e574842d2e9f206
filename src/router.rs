//! Static-route demultiplexer: fans an async channel's incoming queue out
//! to per-route queues registered by name, and merges route outbound
//! queues back onto the channel's outgoing queue.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::{Message, CODE_MISSING_ROUTE};
use crate::error::RouterError;

struct Route {
    inbound: mpsc::Sender<Message>,
    outbound: Option<mpsc::Receiver<Message>>,
}

/// Dispatches messages by their `name` field, reused here as the routing
/// key, to per-route queues.
///
/// Routes must be registered before [`Router::start`]; registering after
/// `start` is not supported.
pub struct Router {
    name: String,
    input: mpsc::Receiver<Message>,
    output: mpsc::Sender<Message>,
    routes: HashMap<String, Route>,
}

impl Router {
    /// Create a router reading from `input` and writing unrouted/error
    /// traffic and route-outbound traffic to `output`. `name` identifies
    /// this router in synthesized missing-route error messages.
    pub fn new(name: impl Into<String>, input: mpsc::Receiver<Message>, output: mpsc::Sender<Message>) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            routes: HashMap::new(),
        }
    }

    /// Register a route. `outbound` may be omitted for a one-way route that
    /// only ever receives.
    pub fn register(
        &mut self,
        route_name: impl Into<String>,
        inbound: mpsc::Sender<Message>,
        outbound: Option<mpsc::Receiver<Message>>,
    ) -> Result<(), RouterError> {
        let route_name = route_name.into();
        if route_name.is_empty() {
            return Err(RouterError::WrongIncomeData);
        }
        if self.routes.contains_key(&route_name) {
            return Err(RouterError::AlreadyExists);
        }
        self.routes.insert(
            route_name,
            Route {
                inbound,
                outbound,
            },
        );
        Ok(())
    }

    /// Spawn the dispatch task plus one forwarder task per route that has
    /// an outbound queue. After this call, no further routes may be
    /// registered (the route table has been consumed).
    pub fn start(mut self) {
        for (route_name, route) in self.routes.iter_mut() {
            if let Some(outbound) = route.outbound.take() {
                let output = self.output.clone();
                let route_name = route_name.clone();
                tokio::spawn(async move {
                    Self::forward_outbound(route_name, outbound, output).await;
                });
            }
        }

        tokio::spawn(async move {
            self.run_dispatch().await;
        });
    }

    async fn run_dispatch(mut self) {
        while let Some(msg) = self.input.recv().await {
            self.route_one(msg).await;
        }
        debug!(router = %self.name, "dispatch task exiting: upstream incoming queue closed");
    }

    async fn route_one(&self, msg: Message) {
        match self.routes.get(&msg.name) {
            Some(route) => {
                if route.inbound.send(msg).await.is_err() {
                    debug!(router = %self.name, "route inbound queue closed, dropping message");
                }
            }
            None => {
                let route_key = msg.name.clone();
                let err_msg = Message::new(
                    CODE_MISSING_ROUTE,
                    route_key.clone(),
                    format!(
                        "Routing is not found for name: {} router: {}",
                        route_key, self.name
                    )
                    .into_bytes(),
                );
                let _ = self.output.send(err_msg).await;
            }
        }
    }

    async fn forward_outbound(
        route_name: String,
        mut outbound: mpsc::Receiver<Message>,
        output: mpsc::Sender<Message>,
    ) {
        while let Some(msg) = outbound.recv().await {
            if output.send(msg).await.is_err() {
                debug!(route = %route_name, "upstream outgoing queue closed, stopping forwarder");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatches_known_route() {
        let (upstream_in_tx, upstream_in_rx) = mpsc::channel(8);
        let (upstream_out_tx, mut upstream_out_rx) = mpsc::channel(8);
        let mut router = Router::new("r1", upstream_in_rx, upstream_out_tx);

        let (route1_in_tx, mut route1_in_rx) = mpsc::channel(8);
        router.register("1", route1_in_tx, None).unwrap();

        router.start();

        upstream_in_tx
            .send(Message::new(0, "1", vec![1, 2, 3]))
            .await
            .unwrap();

        let routed = route1_in_rx.recv().await.unwrap();
        assert_eq!(routed.payload, vec![1, 2, 3]);

        drop(upstream_in_tx);
        assert!(upstream_out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_route_produces_missing_route_marker() {
        let (upstream_in_tx, upstream_in_rx) = mpsc::channel(8);
        let (upstream_out_tx, mut upstream_out_rx) = mpsc::channel(8);
        let router = Router::new("r1", upstream_in_rx, upstream_out_tx);
        router.start();

        upstream_in_tx
            .send(Message::new(0, "3", vec![]))
            .await
            .unwrap();

        let err_msg = upstream_out_rx.recv().await.unwrap();
        assert_eq!(err_msg.code, CODE_MISSING_ROUTE);
        assert_eq!(err_msg.name, "3");
    }

    #[tokio::test]
    async fn route_outbound_is_merged_upstream() {
        let (upstream_in_tx, upstream_in_rx) = mpsc::channel(8);
        let (upstream_out_tx, mut upstream_out_rx) = mpsc::channel(8);
        let mut router = Router::new("r1", upstream_in_rx, upstream_out_tx);

        let (route1_in_tx, _route1_in_rx) = mpsc::channel(8);
        let (route1_out_tx, route1_out_rx) = mpsc::channel(8);
        router.register("1", route1_in_tx, Some(route1_out_rx)).unwrap();
        router.start();

        route1_out_tx
            .send(Message::new(0, "reply", vec![9]))
            .await
            .unwrap();

        let forwarded = upstream_out_rx.recv().await.unwrap();
        assert_eq!(forwarded.payload, vec![9]);

        let _ = upstream_in_tx;
    }

    #[test]
    fn register_rejects_empty_name() {
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let mut router = Router::new("r1", in_rx, out_tx);
        let (route_tx, _route_rx) = mpsc::channel(1);
        assert_eq!(
            router.register("", route_tx, None).unwrap_err(),
            RouterError::WrongIncomeData
        );
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let mut router = Router::new("r1", in_rx, out_tx);
        let (route_tx1, _route_rx1) = mpsc::channel(1);
        let (route_tx2, _route_rx2) = mpsc::channel(1);
        router.register("a", route_tx1, None).unwrap();
        assert_eq!(
            router.register("a", route_tx2, None).unwrap_err(),
            RouterError::AlreadyExists
        );
    }
}
