use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::message::{Message, Platform};

/// Something that wants to see normalized messages.
pub trait Consumer: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn consume(&self, message: &Message) -> Result<()>;
}

impl<F> Consumer for F
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn consume(&self, message: &Message) -> Result<()> {
        self(message)
    }
}

/// A closure consumer with a readable name
pub struct Named<F> {
    name: String,
    f: F,
}

pub fn named<F>(name: impl Into<String>, f: F) -> Named<F>
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    Named {
        name: name.into(),
        f,
    }
}

impl<F> Consumer for Named<F>
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&self, message: &Message) -> Result<()> {
        (self.f)(message)
    }
}

/// Collects consumer registrations before any listener runs.
#[derive(Default)]
pub struct DispatcherBuilder {
    global: Vec<Arc<dyn Consumer>>,
    platforms: HashMap<Platform, Vec<Arc<dyn Consumer>>>,
}

impl DispatcherBuilder {
    /// Add a consumer that sees every message. Called in registration order.
    pub fn register_global(&mut self, consumer: impl Consumer + 'static) {
        info!(consumer = consumer.name(), "registered global consumer");
        self.global.push(Arc::new(consumer));
    }

    /// Add a consumer for one platform's messages. Called in registration
    /// order, after all global consumers.
    pub fn register_platform(&mut self, platform: Platform, consumer: impl Consumer + 'static) {
        info!(platform = %platform, consumer = consumer.name(), "registered platform consumer");
        self.platforms
            .entry(platform)
            .or_default()
            .push(Arc::new(consumer));
    }

    pub fn consumer_count(&self) -> usize {
        self.global.len() + self.platforms.values().map(Vec::len).sum::<usize>()
    }

    /// Freeze the registration tables.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            global: self.global,
            platforms: self.platforms,
        }
    }
}

/// Fans a normalized message out to every interested consumer.
///
/// Registration tables are read-only once built, so `handle_message` can run
/// from several listener tasks at the same time without locking.
pub struct Dispatcher {
    global: Vec<Arc<dyn Consumer>>,
    platforms: HashMap<Platform, Vec<Arc<dyn Consumer>>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Deliver to global consumers, then to the message platform's consumers.
    /// A failing consumer is logged and skipped.
    pub fn handle_message(&self, message: &Message) {
        debug!(
            platform = %message.platform,
            id = %message.id,
            author = %message.author_name,
            "dispatching message"
        );

        for consumer in &self.global {
            invoke(consumer.as_ref(), message, "global");
        }

        if let Some(consumers) = self.platforms.get(&message.platform) {
            for consumer in consumers {
                invoke(consumer.as_ref(), message, message.platform.as_str());
            }
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.global.len() + self.platforms.values().map(Vec::len).sum::<usize>()
    }
}

fn invoke(consumer: &dyn Consumer, message: &Message, scope: &str) {
    match catch_unwind(AssertUnwindSafe(|| consumer.consume(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(
            platform = %message.platform,
            scope,
            consumer = consumer.name(),
            kind = "consumer",
            error = %format!("{:#}", e),
            "consumer failed"
        ),
        Err(_) => error!(
            platform = %message.platform,
            scope,
            consumer = consumer.name(),
            kind = "consumer",
            "consumer panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<String>>>;

    fn recorder(calls: &Calls, label: &'static str) -> impl Consumer + 'static {
        let calls = Arc::clone(calls);
        named(label, move |m: &Message| {
            calls.lock().unwrap().push(format!("{}:{}", label, m.id));
            Ok(())
        })
    }

    fn msg(id: &str, platform: Platform) -> Message {
        Message::new(id, "content", platform, "1", "alice")
    }

    #[test]
    fn test_global_then_platform_order() {
        let calls: Calls = Arc::default();
        let mut builder = Dispatcher::builder();
        builder.register_global(recorder(&calls, "A"));
        builder.register_platform(Platform::Telegram, recorder(&calls, "C"));
        builder.register_global(recorder(&calls, "B"));
        let dispatcher = builder.build();

        dispatcher.handle_message(&msg("1", Platform::Telegram));

        assert_eq!(*calls.lock().unwrap(), vec!["A:1", "B:1", "C:1"]);
        assert_eq!(dispatcher.consumer_count(), 3);
    }

    #[test]
    fn test_other_platform_consumers_are_not_called() {
        let calls: Calls = Arc::default();
        let mut builder = Dispatcher::builder();
        builder.register_global(recorder(&calls, "A"));
        builder.register_platform(Platform::Discord, recorder(&calls, "D"));
        let dispatcher = builder.build();

        dispatcher.handle_message(&msg("1", Platform::Telegram));

        assert_eq!(*calls.lock().unwrap(), vec!["A:1"]);
    }

    #[test]
    fn test_failing_consumer_is_isolated() {
        let calls: Calls = Arc::default();
        let mut builder = Dispatcher::builder();
        builder.register_global(named("broken", |_: &Message| anyhow::bail!("disk full")));
        builder.register_global(recorder(&calls, "B"));
        builder.register_platform(Platform::Telegram, |_: &Message| -> Result<()> {
            panic!("strategy blew up")
        });
        builder.register_platform(Platform::Telegram, recorder(&calls, "C"));
        let dispatcher = builder.build();

        dispatcher.handle_message(&msg("1", Platform::Telegram));
        dispatcher.handle_message(&msg("2", Platform::Telegram));

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["B:1", "C:1", "B:2", "C:2"]
        );
    }

    #[test]
    fn test_concurrent_dispatch() {
        let calls: Calls = Arc::default();
        let mut builder = Dispatcher::builder();
        builder.register_global(recorder(&calls, "A"));
        let dispatcher = Arc::new(builder.build());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        dispatcher.handle_message(&msg(&format!("{i}-{j}"), Platform::Telegram));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.lock().unwrap().len(), 100);
    }
}
