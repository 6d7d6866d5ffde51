use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use bilee_events::{Event, EventBus, EventHandler, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// An event already being handled is finished first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Delivers bus events to an async handler.
///
/// The bus is synchronous, so the worker owns a dedicated thread and drives
/// each `handle` call to completion on the given Tokio runtime. Events are
/// processed one at a time in arrival order.
#[derive(Debug)]
pub struct SessionEventWorker;

impl SessionEventWorker {
    /// Subscribe to `bus` and spawn the delivery thread.
    ///
    /// The subscription is taken before this returns, so anything published
    /// afterwards is delivered. Handler errors are logged and delivery
    /// continues. Fails only if the OS refuses to start the thread.
    pub fn spawn<E, B, H>(name: &'static str, bus: B, handler: Arc<H>, runtime: Handle) -> io::Result<WorkerHandle>
    where
        E: Event + 'static,
        B: EventBus<E> + 'static,
        H: EventHandler<E> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<E> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, handler, runtime))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<E, H>(
    name: &'static str,
    sub: Subscription<E>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: Arc<H>,
    runtime: Handle,
) where
    E: Event,
    H: EventHandler<E>,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(event) => {
                let event_type = event.event_type();
                debug!(worker = name, event_type, "delivering event");
                if let Err(err) = runtime.block_on(handler.handle(event)) {
                    warn!(worker = name, event_type, error = %err, "event handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use bilee_events::InMemoryEventBus;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone)]
    struct Ping(u32);

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl EventHandler<Ping> for Recorder {
        type Error = String;

        async fn handle(&self, event: Ping) -> Result<(), Self::Error> {
            self.seen.lock().unwrap().push(event.0);
            if event.0 == 2 { Err("boom".into()) } else { Ok(()) }
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for worker");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn handler_failure_does_not_stop_delivery() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let bus = Arc::new(InMemoryEventBus::<Ping>::new());
        let recorder = Arc::new(Recorder::default());
        let worker =
            SessionEventWorker::spawn("test-worker", bus.clone(), recorder.clone(), runtime.handle().clone()).unwrap();

        for i in 1..=3 {
            bus.publish(Ping(i)).unwrap();
        }

        wait_for(|| recorder.seen.lock().unwrap().len() == 3);
        worker.shutdown();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
