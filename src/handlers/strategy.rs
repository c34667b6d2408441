use anyhow::Result;
use tracing::{debug, error, info};

use crate::message::Message;

/// One business rule triggered by message content.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Pure check, no side effects.
    fn can_handle(&self, message: &Message) -> bool;

    /// Act on the message. `Ok(true)` means it was fully handled and no
    /// later strategy should run.
    fn process(&self, message: &Message) -> Result<bool>;
}

/// Ordered strategies; the first one that handles a message wins.
#[derive(Default)]
pub struct StrategyChain {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the chain. Returns the name of the strategy that handled the
    /// message, if any. A strategy that errors counts as not handling it.
    pub fn run(&self, message: &Message) -> Option<&str> {
        for strategy in &self.strategies {
            if !strategy.can_handle(message) {
                continue;
            }

            info!(strategy = strategy.name(), id = %message.id, "applying strategy");
            match strategy.process(message) {
                Ok(true) => return Some(strategy.name()),
                Ok(false) => {
                    debug!(strategy = strategy.name(), "strategy did not handle message");
                }
                Err(e) => error!(
                    platform = %message.platform,
                    strategy = strategy.name(),
                    kind = "consumer",
                    error = %format!("{:#}", e),
                    "strategy failed"
                ),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Platform;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: &'static str,
        can_handle: bool,
        outcome: fn() -> Result<bool>,
        log: Log,
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _message: &Message) -> bool {
            self.log.lock().unwrap().push(format!("{}.can_handle", self.name));
            self.can_handle
        }

        fn process(&self, _message: &Message) -> Result<bool> {
            self.log.lock().unwrap().push(format!("{}.process", self.name));
            (self.outcome)()
        }
    }

    fn scripted(
        log: &Log,
        name: &'static str,
        can_handle: bool,
        outcome: fn() -> Result<bool>,
    ) -> Box<dyn Strategy> {
        Box::new(Scripted {
            name,
            can_handle,
            outcome,
            log: Arc::clone(log),
        })
    }

    fn message() -> Message {
        Message::new("1", "magnet:?xt=urn:btih:abc", Platform::Telegram, "7", "bob")
    }

    #[test]
    fn test_first_successful_strategy_short_circuits() {
        let log: Log = Arc::default();
        let chain = StrategyChain::new(vec![
            scripted(&log, "s1", false, || Ok(true)),
            scripted(&log, "s2", true, || Ok(true)),
            scripted(&log, "s3", true, || Ok(true)),
        ]);

        assert_eq!(chain.run(&message()), Some("s2"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["s1.can_handle", "s2.can_handle", "s2.process"]
        );
    }

    #[test]
    fn test_unhandled_or_failing_strategy_falls_through() {
        let log: Log = Arc::default();
        let chain = StrategyChain::new(vec![
            scripted(&log, "s1", true, || Ok(false)),
            scripted(&log, "s2", true, || anyhow::bail!("queue closed")),
            scripted(&log, "s3", true, || Ok(true)),
        ]);

        assert_eq!(chain.run(&message()), Some("s3"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "s1.can_handle",
                "s1.process",
                "s2.can_handle",
                "s2.process",
                "s3.can_handle",
                "s3.process"
            ]
        );
    }

    #[test]
    fn test_exhausted_chain_is_silent() {
        let log: Log = Arc::default();
        let chain = StrategyChain::new(vec![scripted(&log, "s1", false, || Ok(true))]);
        assert_eq!(chain.run(&message()), None);
        assert!(StrategyChain::default().run(&message()).is_none());
    }
}
