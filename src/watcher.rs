//! Feeds WorkloadEntry events to the [`Reconciler`], one pass at a time.

use std::pin::pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kubernetes::{Event, WorkloadEntry};
use tracing::{debug, info, warn};
use tripwire::Tripwire;

use crate::reconcile::{MembershipEvent, Reconciler, Workload};
use crate::store::DocumentStore;

/// How long to wait before subscribing again after the event stream failed.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Translate a watch event, `None` means there is nothing to reconcile.
fn membership(event: Event<WorkloadEntry>) -> Option<MembershipEvent> {
    let (entry, build): (_, fn(Workload) -> MembershipEvent) = match event {
        // objects of the initial list are reconciled like new ones
        Event::Added(entry) | Event::InitApply(entry) => (entry, MembershipEvent::Added),
        Event::Modified(entry) => (entry, MembershipEvent::Modified),
        Event::Deleted(entry) => (entry, MembershipEvent::Deleted),
        Event::Init => {
            debug!(message = "initial list of workload entries started");
            return None;
        }
        Event::InitDone => {
            debug!(message = "initial list of workload entries done");
            return None;
        }
    };

    if entry.spec.address.is_empty() {
        warn!(
            message = "workload entry without address, skipped",
            name = %entry.metadata.name,
            namespace = %entry.metadata.namespace,
        );

        return None;
    }

    Some(build(Workload {
        name: entry.metadata.name,
        address: entry.spec.address,
    }))
}

/// Consume workload events until `shutdown` fires.
///
/// `subscribe` is called for a fresh event stream at start and every time the
/// previous one failed or ended. `shutdown` is only checked between passes, a
/// pass which already started always finishes.
pub async fn run<F, S, D>(
    mut subscribe: F,
    reconciler: &Reconciler<D>,
    mut shutdown: Tripwire,
    resubscribe_delay: Duration,
) where
    F: FnMut() -> S,
    S: Stream<Item = Result<Event<WorkloadEntry>, kubernetes::Error>>,
    D: DocumentStore,
{
    loop {
        {
            let mut stream = pin!(subscribe());

            loop {
                let result = tokio::select! {
                    biased;

                    _ = &mut shutdown => {
                        info!(message = "stop watching workload entries");
                        return;
                    }
                    result = stream.next() => result,
                };

                match result {
                    Some(Ok(event)) => {
                        let Some(event) = membership(event) else {
                            continue;
                        };

                        if let Err(err) = reconciler.reconcile(&event).await {
                            warn!(
                                message = "reconcile target list failed",
                                workload = %event.workload().name,
                                address = %event.workload().address,
                                %err,
                            );
                        }
                    }
                    Some(Err(kubernetes::Error::Deserialize(err))) => {
                        warn!(message = "unexpected workload entry payload, skipped", %err);
                    }
                    Some(Err(err)) => {
                        warn!(
                            message = "watch workload entries failed",
                            %err,
                            delay = ?resubscribe_delay,
                        );

                        break;
                    }
                    None => {
                        warn!(
                            message = "workload entry stream ended",
                            delay = ?resubscribe_delay,
                        );

                        break;
                    }
                }
            }
        }

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(message = "stop watching workload entries");
                return;
            }
            _ = tokio::time::sleep(resubscribe_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;

    use futures::stream::{self, BoxStream};
    use kubernetes::{ObjectMeta, WorkloadEntrySpec};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;
    use crate::targets::DedupStrategy;

    type Item = Result<Event<WorkloadEntry>, kubernetes::Error>;

    const KEY: &str = "staticConfigurations.json";

    fn entry(name: &str, address: &str) -> WorkloadEntry {
        WorkloadEntry {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "vm".to_string(),
                ..Default::default()
            },
            spec: WorkloadEntrySpec {
                address: address.to_string(),
                ..Default::default()
            },
        }
    }

    fn payload_error() -> kubernetes::Error {
        kubernetes::Error::Deserialize(serde_json::from_str::<u8>("\"x\"").unwrap_err())
    }

    fn reconciler() -> Reconciler<MemoryStore> {
        Reconciler::new(MemoryStore::new(KEY), 15020, DedupStrategy::Group)
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[test]
    fn translate_events() {
        assert_eq!(
            membership(Event::InitApply(entry("vm-1", "10.0.0.5"))),
            Some(MembershipEvent::Added(Workload {
                name: "vm-1".to_string(),
                address: "10.0.0.5".to_string(),
            }))
        );
        assert!(matches!(
            membership(Event::Modified(entry("vm-1", "10.0.0.5"))),
            Some(MembershipEvent::Modified(_))
        ));
        assert!(matches!(
            membership(Event::Deleted(entry("vm-1", "10.0.0.5"))),
            Some(MembershipEvent::Deleted(_))
        ));
        assert_eq!(membership(Event::Init), None);
        assert_eq!(membership(Event::InitDone), None);
        assert_eq!(membership(Event::Added(entry("vm-2", ""))), None);
    }

    #[tokio::test(start_paused = true)]
    async fn events_in_order() {
        let reconciler = reconciler();
        let (trigger, tripwire) = Tripwire::new("watcher");
        let (tx, rx) = futures::channel::mpsc::unbounded::<Item>();
        let mut rx = Some(rx);

        for item in [
            Ok(Event::Init),
            Ok(Event::InitApply(entry("vm-1", "10.0.0.5"))),
            Ok(Event::InitDone),
            Ok(Event::Added(entry("vm-2", "10.0.0.6"))),
            Ok(Event::Modified(entry("vm-3", ""))),
            Err(payload_error()),
            Ok(Event::Added(entry("vm-1", "10.0.0.5"))),
            Ok(Event::Deleted(entry("vm-1", "10.0.0.5"))),
        ] {
            tx.unbounded_send(item).unwrap();
        }

        let subscribe = || match rx.take() {
            Some(rx) => rx.boxed(),
            None => stream::pending().boxed(),
        };
        let driver = async {
            wait_until(|| reconciler.store().updates() == 3).await;
            trigger.cancel();
        };

        tokio::join!(
            run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY),
            driver
        );

        assert_eq!(
            reconciler.store().text().as_deref(),
            Some(r#"[{"targets":["10.0.0.6:15020"]}]"#)
        );
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_after_failure() {
        let reconciler = reconciler();
        let (trigger, tripwire) = Tripwire::new("watcher");
        let subscribed = Cell::new(0);

        let mut streams: VecDeque<BoxStream<'static, Item>> = VecDeque::from([
            stream::iter([
                Ok(Event::Added(entry("vm-1", "10.0.0.5"))),
                Err(kubernetes::Error::Validation("connection reset".to_string())),
                Ok(Event::Added(entry("vm-9", "10.0.0.9"))),
            ])
            .boxed(),
            stream::iter([Ok(Event::Added(entry("vm-2", "10.0.0.6")))])
                .chain(stream::pending())
                .boxed(),
        ]);
        let subscribe = || {
            subscribed.set(subscribed.get() + 1);
            streams.pop_front().unwrap_or_else(|| stream::pending().boxed())
        };

        let start = tokio::time::Instant::now();
        let driver = async {
            wait_until(|| reconciler.store().updates() == 2).await;
            trigger.cancel();
        };

        tokio::join!(
            run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY),
            driver
        );

        assert_eq!(subscribed.get(), 2);
        assert!(start.elapsed() >= RESUBSCRIBE_DELAY);
        // events after the failure on the first stream are dropped with it
        assert_eq!(
            reconciler.store().text().as_deref(),
            Some(r#"[{"targets":["10.0.0.5:15020"]},{"targets":["10.0.0.6:15020"]}]"#)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_pulled_after_shutdown() {
        let reconciler = reconciler();
        let (trigger, tripwire) = Tripwire::new("watcher");
        trigger.cancel();

        let subscribe = || stream::iter([Ok(Event::Added(entry("vm-1", "10.0.0.5")))]);
        run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY).await;

        assert_eq!(reconciler.store().gets(), 0);
        assert_eq!(reconciler.store().text(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_resubscribe_delay() {
        let reconciler = reconciler();
        let (trigger, tripwire) = Tripwire::new("watcher");
        let subscribed = Cell::new(0);

        let subscribe = || {
            subscribed.set(subscribed.get() + 1);
            stream::empty::<Item>()
        };

        let start = tokio::time::Instant::now();
        let driver = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        };

        tokio::join!(
            run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY),
            driver
        );

        assert_eq!(subscribed.get(), 1);
        assert!(start.elapsed() < RESUBSCRIBE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_running_pass() {
        let reconciler = reconciler();
        reconciler.store().hold_updates();
        let (trigger, tripwire) = Tripwire::new("watcher");

        let subscribe = || {
            stream::iter([
                Ok(Event::Added(entry("vm-1", "10.0.0.5"))),
                Ok(Event::Added(entry("vm-2", "10.0.0.6"))),
            ])
            .chain(stream::pending())
        };
        let driver = async {
            wait_until(|| reconciler.store().held() == 1).await;
            trigger.cancel();
            reconciler.store().release();
        };

        tokio::join!(
            run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY),
            driver
        );

        // the held write lands, the queued event is never pulled
        assert_eq!(reconciler.store().updates(), 1);
        assert_eq!(reconciler.store().gets(), 1);
        assert_eq!(
            reconciler.store().text().as_deref(),
            Some(r#"[{"targets":["10.0.0.5:15020"]}]"#)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_list_waits_before_relisting() {
        let reconciler = reconciler();
        let (trigger, tripwire) = Tripwire::new("watcher");
        let subscribed = Cell::new(0);

        let subscribe = || {
            subscribed.set(subscribed.get() + 1);
            stream::iter([
                Ok(Event::Init),
                Err(kubernetes::Error::DecodeList(
                    serde_json::from_str::<u8>("[]").unwrap_err(),
                )),
            ])
        };
        let driver = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        };

        tokio::join!(
            run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY),
            driver
        );

        // subscribed at 0s, 5s and 10s
        assert_eq!(subscribed.get(), 3);
        assert_eq!(reconciler.store().gets(), 0);
    }
}
