//! Ordered notification fan-out.
//!
//! Listeners are effectful callbacks: each returns a fresh
//! `BoxedEffect<(), ProcessingError, Env>`, so a callback may suspend
//! (awaiting a remote call, say) while the machine stays locked on the
//! in-flight cycle. A failing listener propagates to the original
//! `process_event` caller; the configuration stays at the last
//! committed phase and the machine is not destroyed.

use crate::core::event::{Cause, Event};
use crate::core::state::StateId;
use crate::error::ProcessingError;
use std::sync::Arc;
use stillwater::effect::BoxedEffect;
use stillwater::prelude::*;

/// Everything a machine reports, in emission order.
#[derive(Clone, Debug)]
pub enum Notification<E: Event> {
    StateEntered {
        state: StateId,
        cause: Cause<E>,
    },
    StateExited {
        state: StateId,
        cause: Cause<E>,
    },
    TransitionTriggered {
        source: StateId,
        targets: Vec<StateId>,
        label: Option<String>,
        cause: Cause<E>,
    },
    /// A transition matched the event type but declined; the event was
    /// consumed without a state change.
    TransitionDeclined {
        source: StateId,
        cause: Cause<E>,
    },
    /// No active state matched the event at all.
    EventIgnored {
        event: E,
    },
    Finished,
    Destroyed,
}

/// Effectful listener callback.
pub type ListenerFn<E, Env> =
    Arc<dyn Fn(&Notification<E>) -> BoxedEffect<(), ProcessingError, Env> + Send + Sync>;

/// Registration-ordered set of listeners plus the dedicated
/// ignored-event handlers.
pub struct ListenerRegistry<E: Event, Env> {
    listeners: Vec<ListenerFn<E, Env>>,
    ignored: Vec<ListenerFn<E, Env>>,
}

impl<E: Event, Env> Default for ListenerRegistry<E, Env> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            ignored: Vec::new(),
        }
    }
}

impl<E: Event, Env: Clone + Send + Sync + 'static> ListenerRegistry<E, Env> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            ignored: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: ListenerFn<E, Env>) {
        self.listeners.push(listener);
    }

    /// Subscribe a synchronous callback; its `Result` is lifted into an
    /// effect.
    pub fn subscribe_fn<F>(&mut self, f: F)
    where
        F: Fn(&Notification<E>) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(move |notification| match f(notification) {
            Ok(()) => pure(()).boxed(),
            Err(err) => fail(err).boxed(),
        }));
    }

    /// Register a dedicated ignored-event handler. It runs after the
    /// regular listeners have seen the `EventIgnored` notification.
    pub fn on_ignored(&mut self, listener: ListenerFn<E, Env>) {
        self.ignored.push(listener);
    }

    pub fn on_ignored_fn<F>(&mut self, f: F)
    where
        F: Fn(&Notification<E>) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.on_ignored(Arc::new(move |notification| match f(notification) {
            Ok(()) => pure(()).boxed(),
            Err(err) => fail(err).boxed(),
        }));
    }

    pub(crate) fn merge(&mut self, other: ListenerRegistry<E, Env>) {
        self.listeners.extend(other.listeners);
        self.ignored.extend(other.ignored);
    }

    pub(crate) async fn notify(
        &self,
        notification: &Notification<E>,
        env: &Env,
    ) -> Result<(), ProcessingError> {
        for listener in &self.listeners {
            listener(notification).run(env).await?;
        }
        Ok(())
    }

    pub(crate) async fn notify_ignored(&self, event: &E, env: &Env) -> Result<(), ProcessingError> {
        let notification = Notification::EventIgnored {
            event: event.clone(),
        };
        self.notify(&notification, env).await?;
        for handler in &self.ignored {
            handler(&notification).run(env).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Debug)]
    struct Ping;

    impl Event for Ping {
        fn label(&self) -> &str {
            "Ping"
        }
    }

    fn recording_listener(
        log: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> ListenerFn<Ping, ()> {
        Arc::new(move |notification| {
            let entry = match notification {
                Notification::StateEntered { state, .. } => format!("{tag}:enter:{}", state.index()),
                Notification::EventIgnored { .. } => format!("{tag}:ignored"),
                _ => format!("{tag}:other"),
            };
            log.lock().unwrap().push(entry);
            pure(()).boxed()
        })
    }

    #[tokio::test]
    async fn listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry: ListenerRegistry<Ping, ()> = ListenerRegistry::new();
        registry.subscribe(recording_listener(Arc::clone(&log), "first"));
        registry.subscribe(recording_listener(Arc::clone(&log), "second"));

        registry
            .notify(
                &Notification::StateEntered {
                    state: StateId(1),
                    cause: Cause::Start,
                },
                &(),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:enter:1".to_string(), "second:enter:1".to_string()]
        );
    }

    #[tokio::test]
    async fn ignored_handler_runs_after_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry: ListenerRegistry<Ping, ()> = ListenerRegistry::new();
        registry.subscribe(recording_listener(Arc::clone(&log), "listener"));
        registry.on_ignored(recording_listener(Arc::clone(&log), "handler"));

        registry.notify_ignored(&Ping, &()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["listener:ignored".to_string(), "handler:ignored".to_string()]
        );
    }

    #[tokio::test]
    async fn failing_listener_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry: ListenerRegistry<Ping, ()> = ListenerRegistry::new();
        registry.subscribe_fn(|_| Err(ProcessingError::Callback("boom".into())));
        registry.subscribe(recording_listener(Arc::clone(&log), "late"));

        let err = registry
            .notify(&Notification::Finished, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Callback(_)));
        assert!(log.lock().unwrap().is_empty());
    }
}
