use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::Resource;
use super::client::{Client, Error, VersionMatch};
use super::client::{ListParams, WatchEvent, WatchParams};

#[derive(Debug)]
pub enum Event<T> {
    /// An object was added
    Added(T),

    /// An object was modified
    Modified(T),

    /// An object was deleted
    ///
    /// NOTE: events may be lost if the watcher is unavailable, so the initial
    /// list after a restart is the only way to learn what vanished meanwhile.
    Deleted(T),

    /// The watch stream was restarted.
    ///
    /// A series of `InitApply` events are expected to follow until all matching objects
    /// have been listed.
    Init,

    /// Received an object during `Init`
    ///
    /// Objects returned here are either from the initial stream using the `StreamingList`
    /// strategy, or from pages using the `ListWatch` strategy.
    InitApply(T),

    /// The initialisation is complete
    ///
    /// Any objects that were previously applied but are not listed in any of the `InitApply` events
    /// should be assumed to have been Deleted
    InitDone,
}

#[derive(Copy, Clone, Debug, Default)]
pub enum InitialListStrategy {
    #[default]
    ListWatch,
    StreamingList,
}

enum State<R: Resource> {
    Start {
        resource_version: Option<String>,
    },
    Listing {
        continue_token: Option<String>,
        objects: VecDeque<serde_json::Value>,
        last_bookmark: Option<String>,
    },
    InitialWatch {
        params: WatchParams,
        resource_version: Option<String>,
        initial_list_done: bool,
    },
    Watching {
        resource_version: String,
        stream: BoxStream<'static, Result<WatchEvent<R>, Error>>,
        initial_list_done: bool,
    },
}

impl<R: Resource> Default for State<R> {
    fn default() -> Self {
        State::Start {
            resource_version: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Config {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub timeout: Option<u32>,
    pub initial_list_strategy: InitialListStrategy,
    pub bookmark: bool,
}

impl Config {
    fn list_params(&self, continue_token: Option<String>) -> ListParams {
        ListParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: self.timeout,
            limit: Some(500),
            continue_token,
            version_match: Some(VersionMatch::NotOlderThan),
            resource_version: Some("0".to_string()),
        }
    }

    fn watch_params(&self) -> WatchParams {
        WatchParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: self.timeout,
            bookmarks: self.bookmark,
            send_initial_events: match self.initial_list_strategy {
                InitialListStrategy::StreamingList => true,
                InitialListStrategy::ListWatch => false,
            },
        }
    }
}

/// Watches a Kubernetes Resource for changes continuously.
///
/// Failed list or watch requests are yielded as errors and the state machine
/// starts over on the next poll, so the caller decides how long to wait before
/// polling again. An object that cannot be decoded, either in a list page or
/// on the watch stream, is yielded as [`Error::Deserialize`] without dropping
/// the watch. A list response which is not a list at all fails the request
/// with [`Error::DecodeList`].
pub fn watcher<R: Resource + Send + 'static>(
    client: Client,
    config: Config,
) -> impl Stream<Item = Result<Event<R>, Error>> {
    futures::stream::unfold(
        (client, config, State::default()),
        |(client, config, mut state)| async {
            loop {
                let (result, new_state) = step(&client, &config, state).await;
                state = new_state;

                if let Some(result) = result {
                    return Some((result, (client, config, state)));
                }
            }
        },
    )
}

async fn step<R: Resource + Send + 'static>(
    client: &Client,
    config: &Config,
    state: State<R>,
) -> (Option<Result<Event<R>, Error>>, State<R>) {
    match state {
        State::Start { resource_version } => {
            let new_state = match config.initial_list_strategy {
                InitialListStrategy::ListWatch => State::Listing {
                    continue_token: None,
                    objects: VecDeque::new(),
                    last_bookmark: None,
                },
                InitialListStrategy::StreamingList => State::InitialWatch {
                    params: config.watch_params(),
                    resource_version,
                    initial_list_done: false,
                },
            };

            (Some(Ok(Event::Init)), new_state)
        }
        State::Listing {
            continue_token,
            mut objects,
            last_bookmark,
        } => {
            if let Some(obj) = objects.pop_front() {
                // a malformed object is yielded on its own, the rest of the
                // page is still applied
                let result = serde_json::from_value::<R>(obj)
                    .map(Event::InitApply)
                    .map_err(Error::Deserialize);

                return (
                    Some(result),
                    State::Listing {
                        continue_token,
                        objects,
                        last_bookmark,
                    },
                );
            }

            // check if we need to perform more pages
            if continue_token.is_none() {
                if let Some(resource_version) = last_bookmark {
                    // we have drained the last page - move on to next state
                    debug!(message = "list done, start watching", kind = R::KIND);

                    let mut params = config.watch_params();
                    params.send_initial_events = false;

                    return (
                        Some(Ok(Event::InitDone)),
                        State::InitialWatch {
                            params,
                            resource_version: Some(resource_version),
                            initial_list_done: true,
                        },
                    );
                }
            }

            let params = config.list_params(continue_token);
            match client.list_raw::<R>(&params).await {
                Ok(list) => (
                    None,
                    State::Listing {
                        continue_token: list.metadata.r#continue,
                        objects: VecDeque::from(list.items),
                        last_bookmark: list.metadata.resource_version.or(last_bookmark),
                    },
                ),
                Err(err) => (Some(Err(err)), State::default()),
            }
        }
        State::InitialWatch {
            params,
            resource_version,
            initial_list_done,
        } => {
            let version = resource_version.as_deref().unwrap_or("0");

            match client.watch::<R>(&params, version).await {
                Ok(stream) => (
                    None,
                    State::Watching {
                        resource_version: resource_version.unwrap_or_else(|| "0".to_string()),
                        stream,
                        initial_list_done,
                    },
                ),
                Err(err) => {
                    if err.code() == Some(403) {
                        warn!(message = "watch forbidden", kind = R::KIND, ?err);
                    } else {
                        debug!(message = "watch initial list error", kind = R::KIND, ?err);
                    }

                    (Some(Err(err)), State::Start { resource_version })
                }
            }
        }
        State::Watching {
            mut stream,
            resource_version,
            initial_list_done,
        } => {
            let Some(result) = stream.next().await else {
                debug!(message = "watch stream timeout", timeout = config.timeout);

                let mut params = config.watch_params();
                params.send_initial_events = false;

                return (
                    None,
                    State::InitialWatch {
                        params,
                        resource_version: Some(resource_version),
                        initial_list_done,
                    },
                );
            };

            let event = match result {
                Ok(event) => event,
                // a single undecodable object, the stream itself is still fine
                Err(err @ Error::Deserialize(_)) => {
                    return (
                        Some(Err(err)),
                        State::Watching {
                            resource_version,
                            stream,
                            initial_list_done,
                        },
                    );
                }
                Err(err) => return (Some(Err(err)), State::default()),
            };

            let result = match event {
                WatchEvent::Added(obj) if !initial_list_done => Event::InitApply(obj),
                WatchEvent::Modified(obj) if !initial_list_done => Event::InitApply(obj),
                WatchEvent::Added(obj) => Event::Added(obj),
                WatchEvent::Modified(obj) => Event::Modified(obj),
                WatchEvent::Deleted(obj) => {
                    if !initial_list_done {
                        // Kubernetes claims these events are impossible
                        // https://kubernetes.io/docs/reference/using-api/api-concepts/#streaming-lists
                        warn!(message = "got deleted event during initial watch", kind = R::KIND);
                    }

                    Event::Deleted(obj)
                }
                WatchEvent::Bookmark(bookmark) => {
                    // Added in 1.27, enabled in 1.32
                    let list_done = bookmark
                        .metadata
                        .annotations
                        .contains_key("k8s.io/initial-events-end");

                    let event = if list_done && !initial_list_done {
                        debug!(message = "initial list done", kind = R::KIND);
                        Some(Ok(Event::InitDone))
                    } else {
                        None
                    };

                    return (
                        event,
                        State::Watching {
                            resource_version: bookmark.metadata.resource_version,
                            stream,
                            initial_list_done: initial_list_done || list_done,
                        },
                    );
                }
                WatchEvent::Error(err) => {
                    // HTTP GONE, means we have desynced and need to start over and re-list :(
                    let new_state = if err.code == 410 {
                        State::Start {
                            resource_version: Some(resource_version),
                        }
                    } else {
                        State::Watching {
                            resource_version,
                            stream,
                            initial_list_done,
                        }
                    };

                    if err.code == 403 {
                        warn!(message = "watch event error", kind = R::KIND, ?err);
                    } else {
                        debug!(message = "watch event error", kind = R::KIND, ?err);
                    }

                    return (Some(Err(Error::Api(err))), new_state);
                }
            };

            (
                Some(Ok(result)),
                State::Watching {
                    resource_version,
                    stream,
                    initial_list_done,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::WorkloadEntry;
    use crate::config::{Auth, Config as ClientConfig};

    /// Answer every request with `body`, returning a client pointing at the
    /// server and the number of requests served.
    async fn serve(body: &'static str) -> (Client, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));

        let served = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                        match conn.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }

                    served.fetch_add(1, Ordering::SeqCst);
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = conn.write_all(resp.as_bytes()).await;
                });
            }
        });

        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let config = ClientConfig {
            cluster_url: format!("http://{addr}").parse().unwrap(),
            auth: Auth::None,
            tls,
        };

        (Client::with_config(config, None), requests)
    }

    #[tokio::test]
    async fn malformed_object_in_list_page() {
        let (client, requests) = serve(
            r#"{"metadata":{"resourceVersion":"10"},"items":[{"metadata":{"name":"good"},"spec":{"address":"10.0.0.5"}},{"metadata":{"name":"bad"},"spec":{"address":5}}]}"#,
        )
        .await;

        let events = watcher::<WorkloadEntry>(client, Config::default())
            .take(4)
            .collect::<Vec<_>>()
            .await;

        assert!(matches!(events[0], Ok(Event::Init)));
        assert!(matches!(
            &events[1],
            Ok(Event::InitApply(entry)) if entry.metadata.name == "good"
        ));
        assert!(matches!(events[2], Err(Error::Deserialize(_))));
        assert!(matches!(events[3], Ok(Event::InitDone)));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_response_is_not_a_list() {
        let (client, requests) = serve(r#"{"items":"gateway error"}"#).await;

        let events = watcher::<WorkloadEntry>(client, Config::default())
            .take(2)
            .collect::<Vec<_>>()
            .await;

        assert!(matches!(events[0], Ok(Event::Init)));
        assert!(matches!(events[1], Err(Error::DecodeList(_))));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}
